//! Sinks: destinations that consume a filtered payload.
//!
//! [`SinkRegistry`] maps a target's `kind` to the [`Sink`] that handles it, so
//! new destination kinds plug in without touching the fan-out engine.

pub mod trello;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::routing::EndpointTarget;
use crate::trello::TrelloError;

pub use trello::{comment_text, TrelloCommentSink, TRELLO_COMMENT_KIND};

/// Errors from dispatching to a sink.
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("unrecognized output kind '{kind}' for target '{target}' on address '{address}'")]
    UnknownKind {
        kind: String,
        target: String,
        address: String,
    },
    #[error("invalid sink configuration: {0}")]
    Config(String),
    #[error("destination request failed: {0}")]
    Http(#[source] reqwest::Error),
    #[error("destination returned {status}: '{body}'")]
    Rejected { status: u16, body: String },
}

impl From<TrelloError> for SinkError {
    fn from(err: TrelloError) -> Self {
        match err {
            TrelloError::InvalidUrl(url) => SinkError::Config(format!("invalid api url '{url}'")),
            TrelloError::Http(e) => SinkError::Http(e),
            TrelloError::Rejected { status, body, .. } => SinkError::Rejected { status, body },
        }
    }
}

/// Per-dispatch request context carrying the outbound deadline.
#[derive(Debug, Clone, Copy)]
pub struct OutgoingRequest {
    deadline: Instant,
}

impl OutgoingRequest {
    pub fn new(timeout: Duration) -> Self {
        Self {
            deadline: Instant::now() + timeout,
        }
    }

    /// Time left before the deadline, zero once it has passed.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }
}

/// A destination capability.
#[async_trait]
pub trait Sink: Send + Sync {
    /// Sink name (used for logging)
    fn name(&self) -> &str;

    /// Deliver `payload` to `target`.
    async fn dispatch(
        &self,
        request: &OutgoingRequest,
        payload: &[u8],
        target: &EndpointTarget,
    ) -> Result<(), SinkError>;
}

/// Mapping from sink kind to implementation.
#[derive(Clone, Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, Arc<dyn Sink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `sink` for `kind`, replacing any previous registration.
    pub fn register(mut self, kind: impl Into<String>, sink: Arc<dyn Sink>) -> Self {
        self.sinks.insert(kind.into(), sink);
        self
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.sinks.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Dispatch to the sink registered for `target.kind`.
    ///
    /// An unknown kind is a configuration error for this target only.
    pub async fn dispatch(
        &self,
        request: &OutgoingRequest,
        payload: &[u8],
        target: &EndpointTarget,
    ) -> Result<(), SinkError> {
        let Some(sink) = self.sinks.get(&target.kind) else {
            warn!(
                kind = %target.kind,
                target = %target.target,
                address = %target.address,
                "sink_kind_unrecognized"
            );
            return Err(SinkError::UnknownKind {
                kind: target.kind.clone(),
                target: target.target.clone(),
                address: target.address.clone(),
            });
        };

        debug!(
            sink = sink.name(),
            target = %target.target,
            address = %target.address,
            "sink_dispatching"
        );
        sink.dispatch(request, payload, target).await
    }
}
