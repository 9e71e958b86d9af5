//! Fallback transport: newline-delimited JSON over plain TCP.
//!
//! The first line a client sends is a [`Handshake`] naming the match and the
//! player. Every following line is a [`ClientMessage`]; every line written
//! back is one server event. Lines are capped at [`MAX_LINE_BYTES`] and the
//! handshake must arrive within [`HANDSHAKE_TIMEOUT`].

use crate::network::ServerHandle;
use crate::session::{LineFrame, LineSession, Session};
use log::{debug, error, info};
use shared::{ClientMessage, Handshake, FORBIDDEN};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

pub const MAX_LINE_BYTES: usize = 16 * 1024;
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Reads one line without its terminator. `Ok(None)` at end of stream; a line
/// longer than [`MAX_LINE_BYTES`] is an `InvalidData` error.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> io::Result<Option<String>> {
    let mut buf = Vec::new();
    let read = (&mut *reader)
        .take(MAX_LINE_BYTES as u64 + 1)
        .read_until(b'\n', &mut buf)
        .await?;
    if read == 0 {
        return Ok(None);
    }

    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
    } else if read > MAX_LINE_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "line too long"));
    }
    String::from_utf8(buf)
        .map(Some)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Waits for the handshake line. `None` when it is late, malformed or missing.
async fn read_handshake<R: AsyncBufRead + Unpin>(reader: &mut R) -> Option<Handshake> {
    match timeout(HANDSHAKE_TIMEOUT, read_line(reader)).await {
        Ok(Ok(Some(line))) => serde_json::from_str(&line).ok(),
        Ok(Ok(None)) => None,
        Ok(Err(e)) => {
            debug!("Fallback handshake read error: {}", e);
            None
        }
        Err(_) => {
            debug!("Fallback handshake timed out");
            None
        }
    }
}

/// Accepts fallback connections until the listener fails permanently.
pub async fn serve(listener: TcpListener, server: ServerHandle) {
    loop {
        match listener.accept().await {
            Ok((stream, addr)) => {
                debug!("Fallback connection from {}", addr);
                tokio::spawn(serve_connection(stream, server.clone()));
            }
            Err(e) => {
                error!("Error accepting fallback connection: {}", e);
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        }
    }
}

async fn serve_connection(stream: TcpStream, server: ServerHandle) {
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);
    let (session, mut rx) = LineSession::channel();
    let handle = session.id();

    let mut writer = tokio::spawn(async move {
        while let Some(frame) = rx.recv().await {
            match frame {
                LineFrame::Line(mut line) => {
                    line.push('\n');
                    if write_half.write_all(line.as_bytes()).await.is_err() {
                        break;
                    }
                }
                LineFrame::Close => {
                    let _ = write_half.shutdown().await;
                    break;
                }
            }
        }
    });

    let Some(Handshake {
        match_id,
        user_id,
        username,
    }) = read_handshake(&mut reader).await
    else {
        info!("Rejecting fallback connection without a valid handshake");
        session.close(FORBIDDEN);
        let _ = writer.await;
        return;
    };

    if server
        .attach(match_id, user_id, username, Box::new(session))
        .is_err()
    {
        writer.abort();
        return;
    }

    let incoming = async {
        loop {
            let line = match read_line(&mut reader).await {
                Ok(Some(line)) => line,
                Ok(None) => break,
                Err(e) => {
                    debug!("Fallback handle {} read error: {}", handle, e);
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str::<ClientMessage>(&line) {
                Ok(message) => {
                    if server.deliver(match_id, user_id, handle, message).is_err() {
                        break;
                    }
                }
                Err(e) => debug!("Ignoring line from handle {}: {}", handle, e),
            }
        }
    };

    tokio::select! {
        _ = incoming => {},
        _ = &mut writer => {},
    }

    server.detach(match_id, user_id, handle);
    writer.abort();
}
