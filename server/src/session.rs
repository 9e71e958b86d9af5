//! Transport-agnostic connection handles.
//!
//! Match logic only ever talks to a [`Session`]. Each transport supplies an
//! adapter that forwards frames to the task owning the socket:
//! - [`WsSession`] for the raw WebSocket transport
//! - [`LineSession`] for the newline-delimited fallback stream

use axum::extract::ws::{CloseFrame, Message};
use log::debug;
use shared::ServerEvent;
use std::borrow::Cow;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

pub type HandleId = u64;

static HANDLE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Generate a process-unique connection handle id
pub fn next_handle_id() -> HandleId {
    HANDLE_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// WebSocket close code used when the server rejects a connection.
pub const CLOSE_POLICY: u16 = 4003;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportKind {
    Raw,
    Fallback,
}

pub trait Session: Send {
    fn id(&self) -> HandleId;
    fn kind(&self) -> TransportKind;
    /// Queues one JSON text frame. Delivery failures are silent: a dead
    /// connection is cleaned up when its reader task reports the detach.
    fn send(&self, frame: &str);
    /// Reports `reason` to the peer and closes the connection.
    fn close(&self, reason: &str);
}

/// Sends a single event to one session.
pub fn send_event(session: &dyn Session, event: &ServerEvent) {
    match serde_json::to_string(event) {
        Ok(frame) => session.send(&frame),
        Err(e) => debug!("Failed to encode event for handle {}: {}", session.id(), e),
    }
}

fn error_frame(reason: &str) -> Option<String> {
    serde_json::to_string(&ServerEvent::Error {
        message: reason.to_string(),
    })
    .ok()
}

pub struct WsSession {
    id: HandleId,
    tx: mpsc::UnboundedSender<Message>,
}

impl WsSession {
    pub fn new(tx: mpsc::UnboundedSender<Message>) -> Self {
        Self {
            id: next_handle_id(),
            tx,
        }
    }
}

impl Session for WsSession {
    fn id(&self) -> HandleId {
        self.id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Raw
    }

    fn send(&self, frame: &str) {
        let _ = self.tx.send(Message::Text(frame.to_string()));
    }

    fn close(&self, reason: &str) {
        if let Some(frame) = error_frame(reason) {
            let _ = self.tx.send(Message::Text(frame));
        }
        let _ = self.tx.send(Message::Close(Some(CloseFrame {
            code: CLOSE_POLICY,
            reason: Cow::Owned(reason.to_string()),
        })));
    }
}

/// Outbound frame of the fallback stream.
#[derive(Debug, Clone, PartialEq)]
pub enum LineFrame {
    Line(String),
    Close,
}

pub struct LineSession {
    id: HandleId,
    tx: mpsc::UnboundedSender<LineFrame>,
}

impl LineSession {
    /// Creates a session together with the receiver its writer task drains.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<LineFrame>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                id: next_handle_id(),
                tx,
            },
            rx,
        )
    }
}

impl Session for LineSession {
    fn id(&self) -> HandleId {
        self.id
    }

    fn kind(&self) -> TransportKind {
        TransportKind::Fallback
    }

    fn send(&self, frame: &str) {
        let _ = self.tx.send(LineFrame::Line(frame.to_string()));
    }

    fn close(&self, reason: &str) {
        if let Some(frame) = error_frame(reason) {
            let _ = self.tx.send(LineFrame::Line(frame));
        }
        let _ = self.tx.send(LineFrame::Close);
    }
}
