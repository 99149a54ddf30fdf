//! Webhook listener: lets an external notifier trigger pull and push.

use super::api::ApiError;
use super::serve::wait_for_shutdown;
use axum::{
    extract::{Request, State},
    http::{header, HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use gitwiki_core::{CallContext, SiteService};
use serde_json::json;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
struct WebhookState {
    service: Arc<SiteService>,
    secret: Arc<str>,
}

pub fn webhook_router(service: Arc<SiteService>, secret: &str) -> Router {
    let state = WebhookState {
        service,
        secret: Arc::from(secret),
    };
    Router::new()
        .route("/webhook/pull", get(webhook_pull))
        .route("/webhook/push", get(webhook_push))
        .layer(middleware::from_fn_with_state(state.clone(), authorize))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve_webhook(
    listener: TcpListener,
    service: Arc<SiteService>,
    secret: String,
    shutdown: watch::Receiver<bool>,
) {
    let app = webhook_router(service, &secret);
    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_shutdown(shutdown))
        .await
    {
        tracing::error!(error = %err, "webhook listener failed");
    }
}

async fn authorize(
    State(state): State<WebhookState>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Response {
    let provided = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok());
    if !bearer_matches(provided, &state.secret) {
        tracing::warn!(path = %request.uri().path(), "webhook request rejected");
        return (StatusCode::UNAUTHORIZED, Json(json!({ "error": "unauthorized" })))
            .into_response();
    }
    next.run(request).await
}

/// An empty secret accepts every request.
pub fn bearer_matches(header: Option<&str>, secret: &str) -> bool {
    if secret.is_empty() {
        return true;
    }
    match header.and_then(|value| value.strip_prefix("Bearer ")) {
        Some(token) => constant_time_eq(token.as_bytes(), secret.as_bytes()),
        None => false,
    }
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

async fn webhook_pull(
    State(state): State<WebhookState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let changed = state.service.pull(&CallContext::background()).await?;
    tracing::info!(changed, "webhook pull completed");
    Ok(Json(json!({ "status": "synced" })))
}

async fn webhook_push(
    State(state): State<WebhookState>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state.service.push(&CallContext::background()).await?;
    tracing::info!("webhook push completed");
    Ok(Json(json!({ "status": "pushed" })))
}
