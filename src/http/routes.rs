//! HTTP route definitions

use axum::{
    extract::{rejection::JsonRejection, State},
    http::{header, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::store::TokenError;
use crate::util::time::{unix_millis, uptime_secs};
use crate::ws::handler::ws_handler;

/// Longest nickname accepted by the join handshake
pub const MAX_NICKNAME_LEN: usize = 32;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    // CORS configuration - support multiple origins (comma-separated in CLIENT_ORIGIN)
    let allowed_origins: Vec<header::HeaderValue> = state
        .config
        .client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<header::HeaderValue>().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    Router::new()
        .route("/health", get(health_handler))
        .route("/join_game", get(ws_handler).post(join_game_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    server_time: u64,
    players: usize,
    sessions: usize,
    pending_joins: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        server_time: unix_millis(),
        players: state.sim.player_count(),
        sessions: state.sessions.len(),
        pending_joins: state.tokens.len(),
    })
}

// ============================================================================
// Join handshake
// ============================================================================

#[derive(Deserialize)]
struct JoinGameRequest {
    nickname: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct JoinGameResponse {
    pub status: String,
    pub nickname: String,
    pub token: Uuid,
}

async fn join_game_handler(
    State(state): State<AppState>,
    payload: Result<Json<JoinGameRequest>, JsonRejection>,
) -> Result<Json<JoinGameResponse>, AppError> {
    let Json(req) = payload.map_err(|e| {
        warn!(error = %e, "Malformed join request");
        AppError::BadRequest("Incorrect nickname")
    })?;

    let nickname = req.nickname.trim().to_string();
    if nickname.is_empty() || nickname.chars().count() > MAX_NICKNAME_LEN {
        return Err(AppError::BadRequest("Incorrect nickname"));
    }

    let in_room = state.sim.is_nickname_taken(&nickname).await.map_err(|e| {
        warn!(error = %e, "Nickname lookup failed");
        AppError::Internal("Something went wrong")
    })?;
    if in_room {
        return Err(AppError::Conflict("Nickname already taken."));
    }

    let token = state.tokens.issue(&nickname).map_err(|e| match e {
        TokenError::Pending => AppError::Conflict("Nickname already taken."),
        TokenError::Invalid => AppError::Internal("Something went wrong"),
    })?;

    info!(nickname = %nickname, "Issued join token");

    Ok(Json(JoinGameResponse {
        status: "success".to_string(),
        nickname,
        token,
    }))
}

// ============================================================================
// Error handling
// ============================================================================

/// Join handshake failures, rendered as `{"title": ...}`
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(&'static str),

    #[error("Conflict: {0}")]
    Conflict(&'static str),

    #[error("Internal error: {0}")]
    Internal(&'static str),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, title) = match &self {
            AppError::BadRequest(title) => (StatusCode::BAD_REQUEST, *title),
            // clients treat every rejected join as 400
            AppError::Conflict(title) => (StatusCode::BAD_REQUEST, *title),
            AppError::Internal(title) => (StatusCode::INTERNAL_SERVER_ERROR, *title),
        };

        let body = serde_json::json!({
            "title": title,
            "status": status.as_u16(),
        });

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::config::Config;
    use crate::game::build_arena;
    use crate::game::physics::{BackendKind, KinematicBackend, Vec2};

    fn test_state() -> AppState {
        let config = Config {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            log_level: "debug".to_string(),
            client_origin: "http://localhost:3000".to_string(),
            session_buffer: 4,
            ball_count: 0,
            physics_backend: BackendKind::Kinematic,
        };
        let world = build_arena(Box::new(KinematicBackend::new(Vec2::ZERO)), 0);
        let (state, simulation) = AppState::with_world(config, world);
        tokio::spawn(simulation.run());
        state
    }

    async fn post_join(state: &AppState, body: &str) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/join_game")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[tokio::test]
    async fn join_issues_a_token() {
        let state = test_state();
        let (status, body) = post_join(&state, r#"{"nickname":"alice"}"#).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "success");
        assert_eq!(body["nickname"], "alice");
        let token = body["token"].as_str().unwrap();
        tokio_test::assert_ok!(state.tokens.consume("alice", token));
    }

    #[tokio::test]
    async fn pending_nickname_is_taken() {
        let state = test_state();
        post_join(&state, r#"{"nickname":"bob"}"#).await;
        let (status, body) = post_join(&state, r#"{"nickname":"bob"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["title"], "Nickname already taken.");
    }

    #[tokio::test]
    async fn nickname_in_room_is_taken() {
        let state = test_state();
        state.sim.join("carol").await.unwrap();

        let (status, body) = post_join(&state, r#"{"nickname":"carol"}"#).await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["title"], "Nickname already taken.");
        assert!(!state.tokens.is_pending("carol"));
    }

    #[tokio::test]
    async fn malformed_body_is_rejected() {
        let state = test_state();
        for body in [r#"{"name":"x"}"#, "nope", r#"{"nickname":"   "}"#] {
            let (status, json) = post_join(&state, body).await;
            assert_eq!(status, StatusCode::BAD_REQUEST);
            assert_eq!(json["title"], "Incorrect nickname");
        }
        assert!(state.tokens.is_empty());
    }

    #[tokio::test]
    async fn health_reports_players() {
        let state = test_state();
        state.sim.join("dave").await.unwrap();

        let request = Request::builder().uri("/health").body(Body::empty()).unwrap();
        let response = build_router(state.clone()).oneshot(request).await.unwrap();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();

        assert_eq!(body["status"], "ok");
        assert_eq!(body["players"], 1);
    }
}
