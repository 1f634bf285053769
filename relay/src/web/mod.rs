//! HTTP surface of the relay.
//!
//! - `POST /w/:address` receives webhooks and fans them out
//! - `/trello/card` lets the Power-Up manage the addresses pointing at a card
//! - `GET /health` for liveness probes
//!
//! Every request carries an `x-request-id`, generated when the caller does not
//! send one, which is recorded on the request's trace span and echoed back.

pub mod handlers;
pub mod management;

use std::sync::Arc;

use axum::{
    extract::Request,
    http::HeaderName,
    routing::{get, post},
    Router,
};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use tracing::Span;

use crate::config::Config;
use crate::dispatch::FanOutDispatcher;
use crate::identity::IdentityVerifier;
use crate::recent::RecentRequestLog;
use crate::routing::EndpointStore;

pub use handlers::{health, receive_webhook, HealthResponse, WebhookResponse};
pub use management::{card_requests, delete_card, get_card, set_card, ManagementError};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Shared application state, built once at startup.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub endpoints: Arc<dyn EndpointStore>,
    /// `None` when no Redis is configured
    pub recent: Option<RecentRequestLog>,
    pub dispatcher: FanOutDispatcher,
    pub identity: Arc<dyn IdentityVerifier>,
}

/// Build the router with tracing and request-id layers applied.
pub fn router(state: AppState) -> Router {
    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);

    Router::new()
        .route("/health", get(health))
        .route("/w/:address", post(receive_webhook))
        .route(
            "/trello/card",
            get(get_card).put(set_card).delete(delete_card),
        )
        .route("/trello/card/requests", get(card_requests))
        // Layers run bottom-up: the id is set before the trace span opens.
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .with_state(state)
}

fn request_span(request: &Request) -> Span {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();

    tracing::info_span!(
        "http_request",
        method = %request.method(),
        uri = %request.uri(),
        request_id = %request_id,
    )
}
