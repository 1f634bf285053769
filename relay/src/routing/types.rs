//! Routing table types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One fan-out destination for an inbound address.
///
/// Rows come from the `input ⋈ pipe ⋈ output` join; many targets may share an
/// address.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EndpointTarget {
    /// Inbound address this target hangs off
    pub address: String,
    /// jq filter applied to the raw payload
    pub filter: String,
    /// Sink kind, e.g. `trello:comment`
    pub kind: String,
    /// Sink-specific destination id (a Trello card id for comment sinks)
    pub target: String,
    /// Opaque sink configuration
    pub data: serde_json::Value,
}

/// Address/filter pair returned to the management UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct EndpointSummary {
    pub address: String,
    pub filter: String,
}

/// A new address wired to a single output.
#[derive(Debug, Clone)]
pub struct NewEndpoint {
    pub address: String,
    pub owner: String,
    pub kind: String,
    pub target: String,
    pub filter: String,
    pub data: serde_json::Value,
}

/// Replacement values for an existing address and its output.
#[derive(Debug, Clone)]
pub struct EndpointUpdate {
    pub address: String,
    pub new_address: String,
    pub owner: String,
    pub target: String,
    pub filter: String,
    pub data: serde_json::Value,
}

/// Errors raised by the endpoint store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("address '{0}' is already taken")]
    AddressTaken(String),
    #[error("endpoint not found")]
    NotFound,
}

/// Errors from resolving an inbound address.
///
/// `NotFound` is a soft condition (nothing configured); `Store` means the
/// routing infrastructure itself failed.
#[derive(Error, Debug)]
pub enum RoutingError {
    #[error("no targets configured for address '{0}'")]
    NotFound(String),
    #[error("routing store error: {0}")]
    Store(#[from] StoreError),
}
