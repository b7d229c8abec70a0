//! HTTP surface: `POST /assess-action` and `GET /health`.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::State,
    http::{HeaderValue, Method, StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::timeout::TimeoutLayer;

use crate::config::ServerConfig;
use crate::error::{ConfigError, Result};
use crate::gate::{ContactGate, ContactSubmission, GateOutcome};

/// Shared state for the gate routes.
#[derive(Clone)]
pub struct AppState {
    pub gate: Arc<ContactGate>,
}

/// Build the router with CORS and a request timeout applied.
pub fn contact_routes(gate: Arc<ContactGate>, config: &ServerConfig) -> Result<Router> {
    let origin = match &config.allowed_origin {
        Some(origin) => AllowOrigin::exact(HeaderValue::from_str(origin).map_err(|e| {
            ConfigError::InvalidValue {
                key: "CONTACT_GATE_ALLOWED_ORIGIN".to_string(),
                message: e.to_string(),
            }
        })?),
        None => AllowOrigin::any(),
    };

    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    Ok(Router::new()
        .route("/assess-action", post(assess_action))
        .route("/health", get(health))
        .with_state(AppState { gate })
        .layer(
            ServiceBuilder::new()
                .layer(cors)
                .layer(TimeoutLayer::new(config.request_timeout)),
        ))
}

// ── Health ──────────────────────────────────────────────────────────────

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "contact-gate"
    }))
}

// ── Submission ──────────────────────────────────────────────────────────

/// POST /assess-action
///
/// Assessment failures get a generic message; the provider's reason only
/// goes to the audit row and the logs.
async fn assess_action(
    State(state): State<AppState>,
    Json(submission): Json<ContactSubmission>,
) -> impl IntoResponse {
    match state.gate.submit(&submission).await {
        GateOutcome::Queued { message_id } => (
            StatusCode::OK,
            Json(serde_json::json!({"status": "queued", "messageId": message_id})),
        ),
        GateOutcome::InvalidPayload(reason) => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": reason.to_string()})),
        ),
        GateOutcome::AssessmentFailed { .. } => (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": "Verification failed"})),
        ),
        GateOutcome::AuditUnavailable(_) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({"error": "Service temporarily unavailable"})),
        ),
        GateOutcome::DispatchFailed(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "Failed to queue message"})),
        ),
    }
}
