//! Filter evaluation: transforms raw webhook payloads with a jq expression.
//!
//! The engine sits behind [`FilterEvaluator`] so the dispatcher can run
//! against a fake in tests. Deadlines and cancellation are applied by the
//! caller; dropping an in-flight evaluation must stop it.

pub mod jq;

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

pub use jq::JqEvaluator;

/// Errors from the filter engine.
#[derive(Error, Debug)]
pub enum FilterError {
    #[error("failed to start filter engine: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("filter engine I/O failed: {0}")]
    Io(#[source] std::io::Error),
    #[error("filter '{filter}' failed: {stderr}")]
    Engine { filter: String, stderr: String },
}

/// Narrow interface over the expression engine.
#[async_trait]
pub trait FilterEvaluator: Send + Sync {
    /// Apply `filter` to `payload`, returning compact output with scalars unquoted.
    async fn evaluate(&self, payload: &[u8], filter: &str) -> Result<Bytes, FilterError>;
}
