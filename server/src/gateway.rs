//! HTTP surface and the raw WebSocket transport.
//!
//! Routes:
//! - `POST /api/join-{duo,quad}`, `GET /api/join-{duo,quad}/status`,
//!   `POST /api/join-{duo,quad}/cancel`
//! - `POST /api/matches` for bracket progression
//! - `GET /api/users/:id/match-history`, `GET /api/users/:id/stats`
//! - `GET /game?matchId=..&userId=..` upgrades to the match socket

use crate::error::ServerClosed;
use crate::network::ServerHandle;
use crate::session::{Session, WsSession};
use crate::store::ResultStore;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{SinkExt, StreamExt};
use log::{debug, error};
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared::{ClientMessage, ConnectParams, MatchId, Mode, PlayerId};
use std::sync::Arc;
use tokio::sync::mpsc;

#[derive(Clone)]
pub struct AppState {
    pub server: ServerHandle,
    pub store: Arc<dyn ResultStore>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueRequest {
    pub user_id: PlayerId,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateMatchRequest {
    pub mode: Mode,
    pub players: Vec<PlayerId>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateMatchResponse {
    pub match_id: MatchId,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(|| async { "ok" }))
        .route("/api/join-duo", post(join_duo))
        .route("/api/join-quad", post(join_quad))
        .route("/api/join-duo/status", get(status_duo))
        .route("/api/join-quad/status", get(status_quad))
        .route("/api/join-duo/cancel", post(cancel_duo))
        .route("/api/join-quad/cancel", post(cancel_quad))
        .route("/api/matches", post(create_match))
        .route("/api/users/:id/match-history", get(match_history))
        .route("/api/users/:id/stats", get(stats))
        .route("/game", get(game_socket))
        .with_state(state)
}

fn unavailable(e: ServerClosed) -> Response {
    error!("Request failed: {}", e);
    (
        StatusCode::SERVICE_UNAVAILABLE,
        Json(json!({ "error": e.to_string() })),
    )
        .into_response()
}

async fn join(state: AppState, mode: Mode, player: PlayerId) -> Response {
    match state.server.join(mode, player).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => unavailable(e),
    }
}

async fn status(state: AppState, mode: Mode, player: PlayerId) -> Response {
    match state.server.status(mode, player).await {
        Ok(status) => Json(status).into_response(),
        Err(e) => unavailable(e),
    }
}

async fn cancel(state: AppState, mode: Mode, player: PlayerId) -> Response {
    match state.server.cancel(mode, player).await {
        Ok(()) => Json(json!({ "ok": true })).into_response(),
        Err(e) => unavailable(e),
    }
}

async fn join_duo(State(state): State<AppState>, Json(body): Json<QueueRequest>) -> Response {
    join(state, Mode::Duo, body.user_id).await
}

async fn join_quad(State(state): State<AppState>, Json(body): Json<QueueRequest>) -> Response {
    join(state, Mode::Quad, body.user_id).await
}

async fn status_duo(State(state): State<AppState>, Query(q): Query<QueueRequest>) -> Response {
    status(state, Mode::Duo, q.user_id).await
}

async fn status_quad(State(state): State<AppState>, Query(q): Query<QueueRequest>) -> Response {
    status(state, Mode::Quad, q.user_id).await
}

async fn cancel_duo(State(state): State<AppState>, Json(body): Json<QueueRequest>) -> Response {
    cancel(state, Mode::Duo, body.user_id).await
}

async fn cancel_quad(State(state): State<AppState>, Json(body): Json<QueueRequest>) -> Response {
    cancel(state, Mode::Quad, body.user_id).await
}

async fn create_match(
    State(state): State<AppState>,
    Json(body): Json<CreateMatchRequest>,
) -> Response {
    match state.server.create_match(body.mode, body.players).await {
        Ok(Ok(match_id)) => Json(CreateMatchResponse { match_id }).into_response(),
        Ok(Err(e)) => (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
        Err(e) => unavailable(e),
    }
}

async fn match_history(State(state): State<AppState>, Path(player): Path<PlayerId>) -> Response {
    match state.store.history(player) {
        Ok(mut rows) => {
            rows.reverse();
            Json(rows).into_response()
        }
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn stats(State(state): State<AppState>, Path(player): Path<PlayerId>) -> Response {
    match state.store.rating(player) {
        Ok(Some(record)) => Json(record).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no stats for user {}", player) })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

async fn game_socket(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, params, state.server))
}

/// Runs one raw connection: a writer task drains the session channel into the
/// socket while this task parses inbound frames until either side stops.
async fn serve_socket(socket: WebSocket, params: ConnectParams, server: ServerHandle) {
    let ConnectParams { match_id, user_id } = params;
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let session = WsSession::new(tx);
    let handle = session.id();

    let mut writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let closing = matches!(message, Message::Close(_));
            if sink.send(message).await.is_err() || closing {
                break;
            }
        }
    });

    if server
        .attach(match_id, user_id, None, Box::new(session))
        .is_err()
    {
        writer.abort();
        return;
    }

    let reader = async {
        while let Some(Ok(message)) = stream.next().await {
            match message {
                Message::Text(text) => match serde_json::from_str::<ClientMessage>(&text) {
                    Ok(message) => {
                        if server.deliver(match_id, user_id, handle, message).is_err() {
                            break;
                        }
                    }
                    Err(e) => debug!("Ignoring message from handle {}: {}", handle, e),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = reader => {},
        _ = &mut writer => {},
    }

    server.detach(match_id, user_id, handle);
    writer.abort();
}
