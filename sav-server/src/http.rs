//! SAV HTTP REST API
//!
//! Axum-based HTTP server exposing sessions, templates, AI helpers, message
//! delivery and CRM access checks.
//!
//! Architecture: each endpoint has a thin axum handler that delegates to a pure
//! inner function. The inner functions validate input, build a `SavRequest` and
//! go through `router::handle_request`, so they are testable without axum.
//!
//! Endpoints:
//! - GET  /health                    — remote store health
//! - GET  /version                   — server version info
//! - POST /access                    — CRM access level for a Telegram id
//! - POST /sessions/track            — append to a session's action log
//! - POST /sessions/save             — persist form data with the log
//! - POST /sessions/reset            — start a fresh session
//! - GET  /templates/:type           — load a notification template
//! - PUT  /templates/:type           — save a notification template
//! - POST /templates/:type/send      — render and deliver a template
//! - POST /ai/classify-seller        — seller classification
//! - POST /ai/match-experts          — expert matching
//! - POST /ai/recommend-tariff       — tariff recommendation
//! - POST /messages/send             — deliver a text message
//! - POST /profiles                  — upsert a Telegram profile

use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use sav_core::api::{SavRequest, SavResponse, PROTOCOL};
use sav_core::models::{SessionKind, TelegramProfile, TemplateSettings};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::net::TcpListener;
use tokio::sync::broadcast;

use crate::state::AppState;

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/version", get(version_handler))
        .route("/access", post(access_handler))
        .route("/sessions/track", post(track_handler))
        .route("/sessions/save", post(save_session_handler))
        .route("/sessions/reset", post(reset_session_handler))
        .route(
            "/templates/:template_type",
            get(get_template_handler).put(save_template_handler),
        )
        .route("/templates/:template_type/send", post(send_template_handler))
        .route("/ai/classify-seller", post(classify_handler))
        .route("/ai/match-experts", post(match_experts_handler))
        .route("/ai/recommend-tariff", post(recommend_tariff_handler))
        .route("/messages/send", post(send_message_handler))
        .route("/profiles", post(profile_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) -> Result<()> {
    let addr = format!("{}:{}", state.config.http.host, state.config.http.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("SAV HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
pub struct AccessRequest {
    pub telegram_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TrackRequest {
    pub telegram_user_id: Option<String>,
    pub kind: Option<SessionKind>,
    pub action: Option<String>,
    pub page: Option<String>,
    pub field: Option<String>,
    pub value: Option<String>,
    #[serde(default)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct SaveSessionRequest {
    pub telegram_user_id: Option<String>,
    pub kind: Option<SessionKind>,
    #[serde(default)]
    pub form_data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ResetSessionRequest {
    pub telegram_user_id: Option<String>,
    pub kind: Option<SessionKind>,
}

#[derive(Debug, Deserialize)]
pub struct SendTemplateRequest {
    pub chat_id: Option<String>,
    pub client_id: Option<String>,
    #[serde(default)]
    pub data: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct ClassifyRequest {
    pub description: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct MatchExpertsRequest {
    pub query: Option<String>,
    pub city: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Deserialize)]
pub struct TariffRequest {
    pub description: Option<String>,
    #[serde(default)]
    pub answers: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    pub chat_id: Option<String>,
    pub text: Option<String>,
    pub client_id: Option<String>,
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check — asks the remote store and returns (status_code, json_body).
pub async fn health_inner(state: &AppState) -> (StatusCode, Value) {
    let response = crate::router::handle_request(SavRequest::Health, state).await;
    match response.data {
        Some(data) if response.status == "ok" => (StatusCode::OK, data),
        _ => (
            StatusCode::SERVICE_UNAVAILABLE,
            json!({
                "status": "unhealthy",
                "error": response.error,
            }),
        ),
    }
}

/// Inner version — returns version info (pure, no IO).
pub fn version_inner() -> Value {
    json!({
        "version": env!("CARGO_PKG_VERSION"),
        "protocol": PROTOCOL,
    })
}

pub async fn access_inner(state: &AppState, req: AccessRequest) -> (StatusCode, Value) {
    dispatch(
        state,
        SavRequest::Access {
            telegram_id: req.telegram_id,
        },
    )
    .await
}

pub async fn track_inner(state: &AppState, req: TrackRequest) -> (StatusCode, Value) {
    let Some(name) = required(req.action) else {
        return bad_request("action field is required");
    };
    dispatch(
        state,
        SavRequest::TrackAction {
            telegram_user_id: req.telegram_user_id,
            kind: req.kind.unwrap_or(SessionKind::Calculator),
            name,
            page: req.page,
            field: req.field,
            value: req.value,
            extra: req.extra,
        },
    )
    .await
}

pub async fn save_session_inner(state: &AppState, req: SaveSessionRequest) -> (StatusCode, Value) {
    dispatch(
        state,
        SavRequest::SaveSession {
            telegram_user_id: req.telegram_user_id,
            kind: req.kind.unwrap_or(SessionKind::Calculator),
            form_data: req.form_data,
        },
    )
    .await
}

pub async fn reset_session_inner(state: &AppState, req: ResetSessionRequest) -> (StatusCode, Value) {
    dispatch(
        state,
        SavRequest::ResetSession {
            telegram_user_id: req.telegram_user_id,
            kind: req.kind.unwrap_or(SessionKind::Calculator),
        },
    )
    .await
}

pub async fn get_template_inner(state: &AppState, template_type: String) -> (StatusCode, Value) {
    let Some(template_type) = required(Some(template_type)) else {
        return bad_request("template type is required");
    };
    dispatch(state, SavRequest::GetTemplate { template_type }).await
}

pub async fn save_template_inner(
    state: &AppState,
    template_type: String,
    settings: TemplateSettings,
) -> (StatusCode, Value) {
    let Some(template_type) = required(Some(template_type)) else {
        return bad_request("template type is required");
    };
    dispatch(
        state,
        SavRequest::SaveTemplate {
            template_type,
            settings,
        },
    )
    .await
}

pub async fn send_template_inner(
    state: &AppState,
    template_type: String,
    req: SendTemplateRequest,
) -> (StatusCode, Value) {
    let Some(chat_id) = required(req.chat_id) else {
        return bad_request("chat_id field is required");
    };
    dispatch(
        state,
        SavRequest::SendTemplate {
            template_type,
            chat_id,
            client_id: req.client_id,
            data: req.data,
        },
    )
    .await
}

pub async fn classify_inner(state: &AppState, req: ClassifyRequest) -> (StatusCode, Value) {
    let Some(description) = required(req.description) else {
        return bad_request("description field is required");
    };
    timed(dispatch(state, SavRequest::ClassifySeller { description })).await
}

pub async fn match_experts_inner(state: &AppState, req: MatchExpertsRequest) -> (StatusCode, Value) {
    let Some(query) = required(req.query) else {
        return bad_request("query field is required");
    };
    timed(dispatch(
        state,
        SavRequest::MatchExperts {
            query,
            city: req.city,
            limit: req.limit,
        },
    ))
    .await
}

pub async fn recommend_tariff_inner(state: &AppState, req: TariffRequest) -> (StatusCode, Value) {
    let Some(description) = required(req.description) else {
        return bad_request("description field is required");
    };
    timed(dispatch(
        state,
        SavRequest::RecommendTariff {
            description,
            answers: req.answers,
        },
    ))
    .await
}

pub async fn send_message_inner(state: &AppState, req: SendMessageRequest) -> (StatusCode, Value) {
    let (Some(chat_id), Some(text)) = (required(req.chat_id), required(req.text)) else {
        return bad_request("chat_id and text fields are required");
    };
    dispatch(
        state,
        SavRequest::SendMessage {
            chat_id,
            text,
            client_id: req.client_id,
        },
    )
    .await
}

pub async fn profile_inner(state: &AppState, profile: TelegramProfile) -> (StatusCode, Value) {
    if profile.telegram_id.trim().is_empty() {
        return bad_request("telegram_id field is required");
    }
    dispatch(state, SavRequest::UpsertProfile { profile }).await
}

// ============================================================================
// Axum handler wrappers (thin — delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (status, body) = health_inner(&state).await;
    (status, Json(body))
}

pub async fn version_handler() -> impl IntoResponse {
    (StatusCode::OK, Json(version_inner()))
}

pub async fn access_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AccessRequest>,
) -> impl IntoResponse {
    let (status, body) = access_inner(&state, req).await;
    (status, Json(body))
}

pub async fn track_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TrackRequest>,
) -> impl IntoResponse {
    let (status, body) = track_inner(&state, req).await;
    (status, Json(body))
}

pub async fn save_session_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SaveSessionRequest>,
) -> impl IntoResponse {
    let (status, body) = save_session_inner(&state, req).await;
    (status, Json(body))
}

pub async fn reset_session_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ResetSessionRequest>,
) -> impl IntoResponse {
    let (status, body) = reset_session_inner(&state, req).await;
    (status, Json(body))
}

pub async fn get_template_handler(
    State(state): State<Arc<AppState>>,
    Path(template_type): Path<String>,
) -> impl IntoResponse {
    let (status, body) = get_template_inner(&state, template_type).await;
    (status, Json(body))
}

pub async fn save_template_handler(
    State(state): State<Arc<AppState>>,
    Path(template_type): Path<String>,
    Json(settings): Json<TemplateSettings>,
) -> impl IntoResponse {
    let (status, body) = save_template_inner(&state, template_type, settings).await;
    (status, Json(body))
}

pub async fn send_template_handler(
    State(state): State<Arc<AppState>>,
    Path(template_type): Path<String>,
    Json(req): Json<SendTemplateRequest>,
) -> impl IntoResponse {
    let (status, body) = send_template_inner(&state, template_type, req).await;
    (status, Json(body))
}

pub async fn classify_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ClassifyRequest>,
) -> impl IntoResponse {
    let (status, body) = classify_inner(&state, req).await;
    (status, Json(body))
}

pub async fn match_experts_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<MatchExpertsRequest>,
) -> impl IntoResponse {
    let (status, body) = match_experts_inner(&state, req).await;
    (status, Json(body))
}

pub async fn recommend_tariff_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<TariffRequest>,
) -> impl IntoResponse {
    let (status, body) = recommend_tariff_inner(&state, req).await;
    (status, Json(body))
}

pub async fn send_message_handler(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendMessageRequest>,
) -> impl IntoResponse {
    let (status, body) = send_message_inner(&state, req).await;
    (status, Json(body))
}

pub async fn profile_handler(
    State(state): State<Arc<AppState>>,
    Json(profile): Json<TelegramProfile>,
) -> impl IntoResponse {
    let (status, body) = profile_inner(&state, profile).await;
    (status, Json(body))
}

// ============================================================================
// Helpers
// ============================================================================

async fn dispatch(state: &AppState, request: SavRequest) -> (StatusCode, Value) {
    response_to_http(crate::router::handle_request(request, state).await)
}

/// Adds `took_ms` to successful bodies.
async fn timed(fut: impl std::future::Future<Output = (StatusCode, Value)>) -> (StatusCode, Value) {
    let start = Instant::now();
    let (status, mut body) = fut.await;
    if status == StatusCode::OK {
        if let Some(obj) = body.as_object_mut() {
            obj.insert("took_ms".to_string(), json!(start.elapsed().as_millis() as u64));
        }
    }
    (status, body)
}

fn required(field: Option<String>) -> Option<String> {
    field.filter(|f| !f.trim().is_empty())
}

fn bad_request(msg: &str) -> (StatusCode, Value) {
    (
        StatusCode::BAD_REQUEST,
        json!({
            "error": msg,
            "status": "error",
        }),
    )
}

/// Convert a `SavResponse` into an HTTP status and body. Errors without a
/// specific code become 500.
pub fn response_to_http(response: SavResponse) -> (StatusCode, Value) {
    if response.is_ok() {
        return (StatusCode::OK, response.data.unwrap_or_else(|| json!({})));
    }

    let status = response
        .code
        .and_then(|c| StatusCode::from_u16(c).ok())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        json!({
            "error": response.error.unwrap_or_else(|| "unknown error".to_string()),
            "status": "error",
        }),
    )
}

// ============================================================================
// Unit Tests — call inner functions directly
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_inner_pure() {
        let v = version_inner();
        assert!(v["version"].is_string(), "version must be string");
        assert_eq!(v["protocol"], "sav/1", "protocol must be sav/1");
    }

    #[test]
    fn test_response_to_http_ok() {
        let (status, body) = response_to_http(SavResponse::ok(json!({"count": 0})));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 0);
    }

    #[test]
    fn test_response_to_http_uses_error_code() {
        let (status, body) = response_to_http(SavResponse::err_with_code("slow down", 429));
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "slow down");
        assert_eq!(body["status"], "error");

        let (status, _) = response_to_http(SavResponse::err_with_code("pay", 402));
        assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    }

    #[test]
    fn test_response_to_http_error_defaults_to_500() {
        let mut resp = SavResponse::err("x");
        resp.error = None;
        let (status, body) = response_to_http(resp);
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "unknown error");
    }

    #[test]
    fn test_ok_with_no_data_is_empty_object() {
        let mut resp = SavResponse::ok(json!({}));
        resp.data = None;
        let (_, body) = response_to_http(resp);
        assert!(body.is_object());
    }

    #[test]
    fn test_required_rejects_blank() {
        assert_eq!(required(Some("  ".to_string())), None);
        assert_eq!(required(None), None);
        assert_eq!(required(Some("x".to_string())).as_deref(), Some("x"));
    }
}
