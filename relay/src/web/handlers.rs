//! Webhook ingestion handlers.
//!
//! The webhook handler:
//! 1. Rejects bodies that are not JSON
//! 2. Records the raw payload in the recent-request log (best effort)
//! 3. Resolves the address to its targets
//! 4. Fans the payload out and waits for every target to finish
//!
//! The status code depends on routing alone; per-target failures are logged.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use bytes::Bytes;
use serde::de::IgnoredAny;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::policy::not_found_status;
use crate::routing::{self, RoutingError};
use crate::web::AppState;

/// Bodies longer than this are logged as a preview.
const PREVIEW_THRESHOLD: usize = 80;
const PREVIEW_CHARS: usize = 50;

// =============================================================================
// Health Check
// =============================================================================

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// =============================================================================
// Webhook
// =============================================================================

/// Webhook response.
#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub targets: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed: Option<usize>,
}

impl WebhookResponse {
    fn status(status: &'static str) -> Json<Self> {
        Json(Self {
            status,
            targets: None,
            failed: None,
        })
    }
}

/// `POST /w/:address`
pub async fn receive_webhook(
    State(state): State<AppState>,
    Path(address): Path<String>,
    body: Bytes,
) -> (StatusCode, Json<WebhookResponse>) {
    info!(
        address = %address,
        body_length = body.len(),
        body = %preview(&body),
        "webhook_received"
    );

    if let Err(e) = serde_json::from_slice::<IgnoredAny>(&body) {
        warn!(address = %address, error = %e, "webhook_invalid_json");
        return (StatusCode::BAD_REQUEST, WebhookResponse::status("invalid_json"));
    }

    if let Some(recent) = &state.recent {
        if let Err(e) = recent.record(&address, body.clone()).await {
            warn!(address = %address, error = %e, "recent_request_record_failed");
        }
    }

    let targets = match routing::resolve(state.endpoints.as_ref(), &address).await {
        Ok(targets) => targets,
        Err(RoutingError::NotFound(_)) => {
            let status = not_found_status(&mut rand::thread_rng());
            info!(address = %address, status = status.as_u16(), "webhook_address_unmapped");
            return (status, WebhookResponse::status("no_targets"));
        }
        Err(e @ RoutingError::Store(_)) => {
            error!(address = %address, error = %e, "webhook_routing_failed");
            return (
                StatusCode::INTERNAL_SERVER_ERROR,
                WebhookResponse::status("error"),
            );
        }
    };

    // Dropping this future (client went away) cancels every in-flight target.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();

    let outcomes = state.dispatcher.dispatch(body, targets, &cancel).await;
    let failed = outcomes.iter().filter(|o| !o.is_success()).count();

    info!(
        address = %address,
        targets = outcomes.len(),
        failed = failed,
        "webhook_dispatched"
    );

    (
        StatusCode::OK,
        Json(WebhookResponse {
            status: "dispatched",
            targets: Some(outcomes.len()),
            failed: Some(failed),
        }),
    )
}

/// Whole body when short, otherwise its first few characters.
fn preview(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    if body.len() > PREVIEW_THRESHOLD {
        let head: String = text.chars().take(PREVIEW_CHARS).collect();
        format!("{head}...")
    } else {
        text.into_owned()
    }
}
