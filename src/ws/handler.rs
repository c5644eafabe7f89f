//! WebSocket upgrade handler

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
};
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::dispatcher;
use crate::game::room::RoomError;
use crate::game::snapshot::Frame;
use crate::session::Connection;
use crate::util::rate_limit::PlayerRateLimiter;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Join token issued by the handshake
    pub token: Option<String>,
    /// Nickname the token was issued for
    pub nickname: Option<String>,
}

/// Reasons an upgrade is refused
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("Missing token or nickname")]
    MissingParams,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Join rejected: {0}")]
    JoinRejected(#[from] RoomError),
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (StatusCode::UNAUTHORIZED, "Unauthorized").into_response()
    }
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(state): State<AppState>,
) -> Response {
    // Authorize before upgrading; a refused upgrade touches no game state
    match authorize(&state, query).await {
        Ok(connection) => {
            info!(player_id = %connection.player_id(), "WebSocket upgrade for authorized player");
            ws.on_upgrade(move |socket| handle_socket(socket, connection))
        }
        Err(e) => {
            warn!(error = %e, "WebSocket authorization failed");
            e.into_response()
        }
    }
}

/// Consume the join token and put the player into the room
pub async fn authorize(state: &AppState, query: WsQuery) -> Result<Connection, AuthError> {
    let (Some(token), Some(nickname)) = (query.token, query.nickname) else {
        return Err(AuthError::MissingParams);
    };
    // Tokens are issued under the trimmed nickname
    let nickname = nickname.trim();
    if token.is_empty() || nickname.is_empty() {
        return Err(AuthError::MissingParams);
    }

    state
        .tokens
        .consume(nickname, &token)
        .map_err(|_| AuthError::InvalidToken)?;

    let player_id = state.sim.join(nickname).await?;
    Ok(Connection::authorized(
        player_id,
        state.sessions.clone(),
        state.sim.clone(),
    ))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, connection: Connection) {
    let player_id = connection.player_id();

    let Some(frames) = connection.open() else {
        warn!(player_id = %player_id, "Connection was not in authorizing state");
        return;
    };

    let (ws_sink, ws_stream) = socket.split();

    // Writer task: frames -> WebSocket
    let mut writer_handle = tokio::spawn(write_frames(player_id, ws_sink, frames));

    // Reader: WebSocket -> simulation. Whichever side ends first ends both.
    tokio::select! {
        _ = read_commands(player_id, ws_stream, &connection) => {
            writer_handle.abort();
        }
        _ = &mut writer_handle => {
            debug!(player_id = %player_id, "Writer finished before reader");
        }
    }

    connection.close();

    info!(player_id = %player_id, "WebSocket connection closed");
}

async fn write_frames(
    player_id: Uuid,
    mut ws_sink: SplitSink<WebSocket, Message>,
    mut frames: mpsc::Receiver<Frame>,
) {
    while let Some(frame) = frames.recv().await {
        if let Err(e) = ws_sink.send(Message::Text(frame.to_string())).await {
            debug!(player_id = %player_id, error = %e, "WebSocket send failed");
            return;
        }
    }
    debug!(player_id = %player_id, "Frame channel closed");
}

async fn read_commands(
    player_id: Uuid,
    mut ws_stream: SplitStream<WebSocket>,
    connection: &Connection,
) {
    let rate_limiter = PlayerRateLimiter::new();

    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_input() {
                    warn!(player_id = %player_id, "Rate limited input message");
                    continue;
                }

                match dispatcher::decode(&text) {
                    Ok(command) => connection.submit(command),
                    Err(e) if e.is_ignorable() => {
                        debug!(player_id = %player_id, error = %e, "Ignoring client message");
                    }
                    Err(e) => {
                        warn!(player_id = %player_id, error = %e, "Dropping client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(player_id = %player_id, "Received binary message, ignoring");
            }
            Ok(Message::Ping(_)) => {
                debug!(player_id = %player_id, "Received ping");
            }
            Ok(Message::Pong(_)) => {
                debug!(player_id = %player_id, "Received pong");
            }
            Ok(Message::Close(_)) => {
                info!(player_id = %player_id, "Client initiated close");
                break;
            }
            Err(e) => {
                error!(player_id = %player_id, error = %e, "WebSocket error");
                break;
            }
        }
    }
}
