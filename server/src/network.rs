//! Server event loop coordinating the lobby, connections and the global tick

use crate::config::ServerConfig;
use crate::error::{LobbyError, ServerClosed};
use crate::game::{Lifecycle, MatchRules};
use crate::lobby::Lobby;
use crate::recorder::ResultRecorder;
use crate::session::{HandleId, Session};
use crate::store::{ResultStore, UserDirectory};
use crate::{fallback, gateway};
use log::{debug, error, info, warn};
use shared::{ClientMessage, MatchId, Mode, PlayerId, QueueStatus, FORBIDDEN, MATCH_NOT_FOUND};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval, MissedTickBehavior};

/// Commands sent from HTTP handlers and connection tasks to the server loop
pub enum ServerMessage {
    Join {
        mode: Mode,
        player: PlayerId,
        reply: oneshot::Sender<QueueStatus>,
    },
    Status {
        mode: Mode,
        player: PlayerId,
        reply: oneshot::Sender<QueueStatus>,
    },
    Cancel {
        mode: Mode,
        player: PlayerId,
        reply: oneshot::Sender<()>,
    },
    CreateMatch {
        mode: Mode,
        players: Vec<PlayerId>,
        reply: oneshot::Sender<Result<MatchId, LobbyError>>,
    },
    Attach {
        match_id: MatchId,
        player: PlayerId,
        /// Name supplied by the fallback handshake
        username: Option<String>,
        session: Box<dyn Session>,
    },
    Detach {
        match_id: MatchId,
        player: PlayerId,
        handle: HandleId,
    },
    Deliver {
        match_id: MatchId,
        player: PlayerId,
        handle: HandleId,
        message: ClientMessage,
    },
    Shutdown,
}

/// Cloneable entry point into a running [`Server`]
#[derive(Clone)]
pub struct ServerHandle {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl ServerHandle {
    pub fn send(&self, message: ServerMessage) -> Result<(), ServerClosed> {
        self.tx.send(message).map_err(|_| ServerClosed)
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> ServerMessage,
    ) -> Result<T, ServerClosed> {
        let (reply, response) = oneshot::channel();
        self.send(build(reply))?;
        response.await.map_err(|_| ServerClosed)
    }

    pub async fn join(&self, mode: Mode, player: PlayerId) -> Result<QueueStatus, ServerClosed> {
        self.request(|reply| ServerMessage::Join {
            mode,
            player,
            reply,
        })
        .await
    }

    pub async fn status(&self, mode: Mode, player: PlayerId) -> Result<QueueStatus, ServerClosed> {
        self.request(|reply| ServerMessage::Status {
            mode,
            player,
            reply,
        })
        .await
    }

    pub async fn cancel(&self, mode: Mode, player: PlayerId) -> Result<(), ServerClosed> {
        self.request(|reply| ServerMessage::Cancel {
            mode,
            player,
            reply,
        })
        .await
    }

    pub async fn create_match(
        &self,
        mode: Mode,
        players: Vec<PlayerId>,
    ) -> Result<Result<MatchId, LobbyError>, ServerClosed> {
        self.request(|reply| ServerMessage::CreateMatch {
            mode,
            players,
            reply,
        })
        .await
    }

    pub fn attach(
        &self,
        match_id: MatchId,
        player: PlayerId,
        username: Option<String>,
        session: Box<dyn Session>,
    ) -> Result<(), ServerClosed> {
        self.send(ServerMessage::Attach {
            match_id,
            player,
            username,
            session,
        })
    }

    pub fn detach(&self, match_id: MatchId, player: PlayerId, handle: HandleId) {
        let _ = self.send(ServerMessage::Detach {
            match_id,
            player,
            handle,
        });
    }

    pub fn deliver(
        &self,
        match_id: MatchId,
        player: PlayerId,
        handle: HandleId,
        message: ClientMessage,
    ) -> Result<(), ServerClosed> {
        self.send(ServerMessage::Deliver {
            match_id,
            player,
            handle,
            message,
        })
    }

    pub fn shutdown(&self) {
        let _ = self.send(ServerMessage::Shutdown);
    }
}

/// Authoritative match server
///
/// Owns the lobby and therefore every live match. All mutations happen on
/// the task running [`Server::run`], so matches need no locking.
pub struct Server {
    config: ServerConfig,
    rules: MatchRules,
    lobby: Lobby,
    store: Arc<dyn ResultStore>,
    recorder: Arc<ResultRecorder>,
    ticks: u64,

    server_tx: mpsc::UnboundedSender<ServerMessage>,
    server_rx: mpsc::UnboundedReceiver<ServerMessage>,
}

impl Server {
    pub fn new(
        config: ServerConfig,
        directory: Arc<dyn UserDirectory>,
        store: Arc<dyn ResultStore>,
    ) -> Self {
        let rules = config.rules();
        let (server_tx, server_rx) = mpsc::unbounded_channel();

        Server {
            config,
            rules,
            lobby: Lobby::new(rules, directory),
            recorder: Arc::new(ResultRecorder::new(Arc::clone(&store))),
            store,
            ticks: 0,
            server_tx,
            server_rx,
        }
    }

    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            tx: self.server_tx.clone(),
        }
    }

    pub fn lobby(&self) -> &Lobby {
        &self.lobby
    }

    pub fn lobby_mut(&mut self) -> &mut Lobby {
        &mut self.lobby
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Applies one command. Returns false once the loop should stop.
    pub fn handle_message(&mut self, message: ServerMessage) -> bool {
        match message {
            ServerMessage::Join {
                mode,
                player,
                reply,
            } => {
                let _ = reply.send(self.lobby.join(mode, player));
            }
            ServerMessage::Status {
                mode,
                player,
                reply,
            } => {
                let _ = reply.send(self.lobby.status(mode, player));
            }
            ServerMessage::Cancel {
                mode,
                player,
                reply,
            } => {
                self.lobby.cancel(mode, player);
                let _ = reply.send(());
            }
            ServerMessage::CreateMatch {
                mode,
                players,
                reply,
            } => {
                let result = self.lobby.create_match(mode, &players);
                if let Err(e) = &result {
                    warn!("Rejected match request for {:?}: {}", players, e);
                }
                let _ = reply.send(result);
            }
            ServerMessage::Attach {
                match_id,
                player,
                username,
                session,
            } => self.attach(match_id, player, username, session),
            ServerMessage::Detach {
                match_id,
                player,
                handle,
            } => self.detach(match_id, player, handle),
            ServerMessage::Deliver {
                match_id,
                player,
                handle,
                message,
            } => {
                if let Some(game) = self.lobby.registry.get_mut(match_id) {
                    if game.has_handle(player, handle) {
                        game.handle_message(player, handle, message);
                    }
                }
            }
            ServerMessage::Shutdown => {
                info!("Server shutting down");
                return false;
            }
        }
        true
    }

    fn attach(
        &mut self,
        match_id: MatchId,
        player: PlayerId,
        username: Option<String>,
        session: Box<dyn Session>,
    ) {
        let Some(game) = self.lobby.registry.get_mut(match_id) else {
            warn!(
                "Player {} tried to connect to unknown match {}",
                player, match_id
            );
            session.close(MATCH_NOT_FOUND);
            return;
        };
        if !game.is_participant(player) {
            warn!(
                "Player {} is not a participant of match {}",
                player, match_id
            );
            session.close(FORBIDDEN);
            return;
        }

        if let Some(name) = username {
            game.adopt_name(player, &name);
        }
        game.attach(player, session);
    }

    fn detach(&mut self, match_id: MatchId, player: PlayerId, handle: HandleId) {
        let Some(game) = self.lobby.registry.get_mut(match_id) else {
            return;
        };
        if game.detach(player, handle) == Lifecycle::Abandoned {
            self.lobby.evict(match_id);
        }
    }

    /// Steps every registered match once, then evicts the ones that ended
    pub fn tick(&mut self) {
        self.ticks += 1;

        let mut ended = Vec::new();
        for game in self.lobby.registry.iter_mut() {
            match game.tick() {
                Lifecycle::Continue => {}
                Lifecycle::Abandoned => ended.push((game.id, None)),
                Lifecycle::Finished(result) => ended.push((game.id, Some((game.mode, result)))),
            }
        }

        for (match_id, finished) in ended {
            self.lobby.evict(match_id);
            match finished {
                Some((Mode::Duo, result)) => self.recorder.spawn(result),
                Some((Mode::Quad, _)) => {
                    info!("Match {} is a quad match, result not recorded", match_id)
                }
                None => {}
            }
        }

        if self.ticks % u64::from(self.rules.tick_rate) == 0 && !self.lobby.registry.is_empty() {
            debug!(
                "Tick {}: {} matches, {} waiting duo, {} waiting quad",
                self.ticks,
                self.lobby.registry.len(),
                self.lobby.queues.waiting(Mode::Duo),
                self.lobby.queues.waiting(Mode::Quad)
            );
        }
    }

    /// Main server loop: serves both transports and drives the global tick
    pub async fn run(
        mut self,
        http: TcpListener,
        fallback: TcpListener,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        info!("HTTP and WebSocket listening on {}", http.local_addr()?);
        info!("Fallback transport listening on {}", fallback.local_addr()?);

        let app = gateway::router(gateway::AppState {
            server: self.handle(),
            store: Arc::clone(&self.store),
        });
        tokio::spawn(async move {
            if let Err(e) = axum::serve(http, app).await {
                error!("HTTP server stopped: {}", e);
            }
        });
        tokio::spawn(fallback::serve(fallback, self.handle()));

        let mut tick_interval = interval(Duration::from_secs_f64(
            1.0 / f64::from(self.rules.tick_rate),
        ));
        tick_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            "Server started ({} Hz, first to {})",
            self.rules.tick_rate, self.rules.win_score
        );
        debug!("Configuration: {:?}", self.config);

        loop {
            tokio::select! {
                message = self.server_rx.recv() => {
                    match message {
                        Some(message) => {
                            if !self.handle_message(message) {
                                break;
                            }
                        }
                        None => break,
                    }
                },
                _ = tick_interval.tick() => self.tick(),
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{LineFrame, LineSession};
    use crate::store::MemoryStore;
    use shared::{ServerEvent, TICK_RATE};
    use tokio::sync::mpsc::UnboundedReceiver;

    fn create_test_server() -> Server {
        let store = Arc::new(MemoryStore::new());
        Server::new(ServerConfig::default(), store.clone(), store)
    }

    fn connect(
        server: &mut Server,
        match_id: MatchId,
        player: PlayerId,
    ) -> (HandleId, UnboundedReceiver<LineFrame>) {
        let (session, rx) = LineSession::channel();
        let handle = session.id();
        server.handle_message(ServerMessage::Attach {
            match_id,
            player,
            username: None,
            session: Box::new(session),
        });
        (handle, rx)
    }

    fn open_duo(server: &mut Server) -> MatchId {
        server.lobby_mut().create_match(Mode::Duo, &[1, 2]).unwrap()
    }

    fn last_error(rx: &mut UnboundedReceiver<LineFrame>) -> Option<String> {
        let mut message = None;
        while let Ok(frame) = rx.try_recv() {
            if let LineFrame::Line(line) = frame {
                if let Ok(ServerEvent::Error { message: m }) = serde_json::from_str(&line) {
                    message = Some(m);
                }
            }
        }
        message
    }

    #[test]
    fn test_join_replies_through_channel() {
        let mut server = create_test_server();
        let (reply, mut response) = oneshot::channel();
        server.handle_message(ServerMessage::Join {
            mode: Mode::Duo,
            player: 1,
            reply,
        });
        assert_eq!(response.try_recv().unwrap(), QueueStatus::Waiting);

        let (reply, mut response) = oneshot::channel();
        server.handle_message(ServerMessage::Cancel {
            mode: Mode::Duo,
            player: 1,
            reply,
        });
        assert!(response.try_recv().is_ok());
        assert_eq!(server.lobby().queues.waiting(Mode::Duo), 0);
    }

    #[test]
    fn test_unknown_match_is_rejected() {
        let mut server = create_test_server();
        let (_, mut rx) = connect(&mut server, 99, 1);
        assert_eq!(last_error(&mut rx).as_deref(), Some(MATCH_NOT_FOUND));
        assert!(server.lobby().registry.is_empty());
    }

    #[test]
    fn test_non_participant_is_rejected() {
        let mut server = create_test_server();
        let match_id = open_duo(&mut server);
        let (_, mut rx) = connect(&mut server, match_id, 3);

        assert_eq!(last_error(&mut rx).as_deref(), Some(FORBIDDEN));
        let game = server.lobby().registry.get(match_id).unwrap();
        assert_eq!(game.handle_count(3), 0);
        assert_eq!(game.handle_count(1), 0);
    }

    #[test]
    fn test_messages_from_unattached_handles_are_dropped() {
        let mut server = create_test_server();
        let match_id = open_duo(&mut server);
        connect(&mut server, match_id, 1);

        server.handle_message(ServerMessage::Deliver {
            match_id,
            player: 1,
            handle: 0,
            message: ClientMessage::Ready,
        });
        let game = server.lobby().registry.get(match_id).unwrap();
        assert!(game.ready_ids().is_empty());
    }

    #[test]
    fn test_last_detach_evicts_match() {
        let mut server = create_test_server();
        let match_id = open_duo(&mut server);
        let (a, _rx_a) = connect(&mut server, match_id, 1);
        let (b, _rx_b) = connect(&mut server, match_id, 2);

        server.handle_message(ServerMessage::Detach {
            match_id,
            player: 1,
            handle: a,
        });
        assert!(server.lobby().registry.get(match_id).is_some());

        server.handle_message(ServerMessage::Detach {
            match_id,
            player: 2,
            handle: b,
        });
        assert!(server.lobby().registry.get(match_id).is_none());
        assert_eq!(server.lobby().registry.active_match_of(1), None);
    }

    #[test]
    fn test_rejoin_after_eviction_waits() {
        let mut server = create_test_server();
        server.lobby_mut().join(Mode::Duo, 1);
        let QueueStatus::Matched { match_id } = server.lobby_mut().join(Mode::Duo, 2) else {
            panic!("Expected a match");
        };
        let (a, _rx_a) = connect(&mut server, match_id, 1);
        let (b, _rx_b) = connect(&mut server, match_id, 2);
        server.handle_message(ServerMessage::Detach { match_id, player: 1, handle: a });
        server.handle_message(ServerMessage::Detach { match_id, player: 2, handle: b });
        assert!(server.lobby().registry.get(match_id).is_none());

        assert_eq!(server.lobby_mut().join(Mode::Duo, 2), QueueStatus::Waiting);
        assert_eq!(server.lobby_mut().status(Mode::Duo, 2), QueueStatus::Waiting);
        assert_eq!(server.lobby_mut().status(Mode::Duo, 1), QueueStatus::Waiting);
    }

    #[test]
    fn test_tick_evicts_match_nobody_joined() {
        let store = Arc::new(MemoryStore::new());
        let config = ServerConfig {
            idle_timeout_seconds: 1,
            ..ServerConfig::default()
        };
        let mut server = Server::new(config, store.clone(), store);
        let match_id = open_duo(&mut server);

        for _ in 1..TICK_RATE {
            server.tick();
        }
        assert!(server.lobby().registry.get(match_id).is_some());

        server.tick();
        assert!(server.lobby().registry.get(match_id).is_none());
        assert_eq!(server.lobby().registry.active_match_of(1), None);
        assert_eq!(server.lobby_mut().join(Mode::Duo, 1), QueueStatus::Waiting);
    }

    #[test]
    fn test_handle_reports_stopped_server() {
        let server = create_test_server();
        let handle = server.handle();
        drop(server);

        tokio_test::assert_err!(tokio_test::block_on(handle.join(Mode::Duo, 1)));
        tokio_test::assert_err!(handle.deliver(1, 1, 1, ClientMessage::Ready));
    }

    #[test]
    fn test_shutdown_stops_loop() {
        let mut server = create_test_server();
        assert!(!server.handle_message(ServerMessage::Shutdown));
    }

    #[test]
    fn test_tick_counts() {
        let mut server = create_test_server();
        open_duo(&mut server);
        for _ in 0..3 {
            server.tick();
        }
        assert_eq!(server.ticks(), 3);
        assert_eq!(server.lobby().registry.len(), 1);
    }
}
