use clap::Parser;
use log::info;
use server::store::MemoryStore;
use server::{Server, ServerConfig};
use std::sync::Arc;
use tokio::net::TcpListener;

/// Authoritative Pong match server.
/// Parses command-line arguments, binds both transports and runs the server loop.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    #[derive(Parser, Debug)]
    #[clap(author, version, about)]
    struct Args {
        /// Address to bind to
        #[clap(short = 'H', long, default_value = "127.0.0.1")]
        host: String,
        /// HTTP and WebSocket port
        #[clap(short, long, default_value = "3000")]
        port: u16,
        /// Port of the newline-delimited JSON fallback transport
        #[clap(short, long, default_value = "3001")]
        fallback_port: u16,
        /// Tick rate (updates per second)
        #[clap(short, long, default_value = "60")]
        tick_rate: u32,
        /// Score that wins a match
        #[clap(short, long, default_value = "10")]
        win_score: u32,
        /// Countdown length in seconds once everyone is ready
        #[clap(short, long, default_value = "5")]
        countdown: u32,
        /// Seconds a match may go without any connected player before it is dropped
        #[clap(short, long, default_value = "30")]
        idle_timeout: u32,
    }

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let config = ServerConfig {
        host: args.host,
        port: args.port,
        fallback_port: args.fallback_port,
        tick_rate: args.tick_rate,
        win_score: args.win_score,
        countdown_seconds: args.countdown,
        idle_timeout_seconds: args.idle_timeout,
    };

    let http = TcpListener::bind(config.http_addr()).await?;
    let fallback = TcpListener::bind(config.fallback_addr()).await?;

    let store = Arc::new(MemoryStore::new());
    let server = Server::new(config, store.clone(), store);
    let handle = server.handle();

    let server_task = tokio::spawn(server.run(http, fallback));

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => return Err(e as Box<dyn std::error::Error>),
                Err(e) => return Err(Box::new(e)),
                Ok(Ok(())) => {}
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
            handle.shutdown();
        }
    }

    Ok(())
}
