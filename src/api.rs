//! HTTP control surface
//!
//! | Method | Path                | Description                                |
//! |--------|---------------------|--------------------------------------------|
//! | GET    | `/`                 | Static control panel                       |
//! | GET    | `/health`           | Liveness probe                             |
//! | POST   | `/session/start`    | Create a session or confirm it exists      |
//! | POST   | `/session/pair`     | Relay a session's credentials to a number  |
//! | GET    | `/sessions`         | List sessions                              |
//! | POST   | `/generate-session` | Start a session and deliver it once online |
//!
//! The session routes are also mounted under `/api` for older clients.
//! Failures answer `{success:false, error, code}`.

use crate::error::LinkError;
use crate::service::{LinkService, StartOutcome};
use crate::types::SessionInfo;
use axum::{
    extract::State,
    http::{header, Method, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

const PANEL_HTML: &str = include_str!("../assets/panel.html");

/// Build the HTTP application
pub fn build_app(service: Arc<LinkService>, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(panel))
        .route("/health", get(health_check))
        .route("/generate-session", post(generate_session))
        .merge(session_routes())
        .nest("/api", session_routes())
        .with_state(service)
        .layer(TraceLayer::new_for_http())
        .layer(build_cors(cors_origins))
}

fn session_routes() -> Router<Arc<LinkService>> {
    Router::new()
        .route("/session/start", post(start_session))
        .route("/session/pair", post(pair_session))
        .route("/sessions", get(list_sessions))
}

// =============================================================================
// Request / Response types
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartRequest {
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub phone_number: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    #[serde(default)]
    pub number: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SessionListResponse {
    pub sessions: Vec<SessionInfo>,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub success: bool,
    pub error: String,
    pub code: &'static str,
}

/// A `LinkError` rendered as an HTTP response
pub struct ApiError(LinkError);

impl From<LinkError> for ApiError {
    fn from(e: LinkError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            LinkError::SessionNotFound(_) => StatusCode::NOT_FOUND,
            LinkError::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            LinkError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let error = match &self.0 {
            LinkError::SessionNotFound(_) => "Session not found".to_string(),
            LinkError::InvalidRequest(msg) => msg.clone(),
            other => other.to_string(),
        };
        let body = ErrorResponse {
            success: false,
            error,
            code: self.0.code(),
        };
        (status, Json(body)).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

// =============================================================================
// Handlers
// =============================================================================

async fn panel() -> Html<&'static str> {
    Html(PANEL_HTML)
}

async fn health_check() -> impl IntoResponse {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// POST /session/start
async fn start_session(
    State(service): State<Arc<LinkService>>,
    body: Option<Json<StartRequest>>,
) -> ApiResult<SessionResponse> {
    let request = body.map(|Json(r)| r).unwrap_or_default();
    let (session_id, outcome) = service
        .start_session(request.session_id.as_deref())
        .await?;

    let message = match outcome {
        StartOutcome::Created => "Session started successfully",
        StartOutcome::Existing => "Session already exists",
        StartOutcome::Restarted => "Session restarted",
    };
    Ok(Json(SessionResponse {
        success: true,
        message: message.to_string(),
        session_id: Some(session_id),
    }))
}

/// POST /session/pair
async fn pair_session(
    State(service): State<Arc<LinkService>>,
    Json(request): Json<PairRequest>,
) -> ApiResult<SessionResponse> {
    let session_id = request
        .session_id
        .ok_or_else(|| LinkError::InvalidRequest("sessionId is required".to_string()))?;
    let phone_number = request
        .phone_number
        .ok_or_else(|| LinkError::InvalidRequest("phoneNumber is required".to_string()))?;

    service.pair(&session_id, &phone_number).await?;
    Ok(Json(SessionResponse {
        success: true,
        message: format!("Credentials sent to {}", phone_number),
        session_id: None,
    }))
}

/// GET /sessions
async fn list_sessions(State(service): State<Arc<LinkService>>) -> Json<SessionListResponse> {
    Json(SessionListResponse {
        sessions: service.list(),
    })
}

/// POST /generate-session
async fn generate_session(
    State(service): State<Arc<LinkService>>,
    body: Option<Json<GenerateRequest>>,
) -> ApiResult<SessionResponse> {
    let number = body
        .and_then(|Json(r)| r.number)
        .filter(|n| !n.trim().is_empty())
        .ok_or_else(|| LinkError::InvalidRequest("Phone number required".to_string()))?;

    let session_id = service.generate_session(&number).await?;
    Ok(Json(SessionResponse {
        success: true,
        message: "Session created and sent!".to_string(),
        session_id: Some(session_id),
    }))
}

fn build_cors(origins: &[String]) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT]);

    if origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let parsed: Vec<_> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        cors.allow_origin(parsed)
    }
}
