//! Routing table: maps inbound addresses to their output targets.
//!
//! ## Tables
//!
//! ```text
//! input (address, owner) ── pipe (i, o) ── output (id, kind, target, filter, owner, data)
//! ```
//!
//! One address may be piped to many outputs; resolution reads all of them in a
//! single query so an inbound event sees a consistent target set.

pub mod memory;
pub mod postgres;
pub mod types;

use async_trait::async_trait;
use tracing::{debug, error};

pub use memory::MemoryEndpointStore;
pub use postgres::PgEndpointStore;
pub use types::{
    EndpointSummary, EndpointTarget, EndpointUpdate, NewEndpoint, RoutingError, StoreError,
};

/// Storage backend for the routing table.
#[async_trait]
pub trait EndpointStore: Send + Sync {
    /// All targets piped from `address`, ordered by output id.
    async fn targets_for(&self, address: &str) -> Result<Vec<EndpointTarget>, StoreError>;

    /// Endpoints owned by `owner` whose output points at `target`.
    async fn list_for_target(
        &self,
        target: &str,
        owner: &str,
    ) -> Result<Vec<EndpointSummary>, StoreError>;

    /// Create an address wired to one output.
    async fn create(&self, endpoint: NewEndpoint) -> Result<(), StoreError>;

    /// Rename an owned address and replace its output settings.
    async fn update(&self, update: EndpointUpdate) -> Result<(), StoreError>;

    /// Remove an owned address together with its outputs.
    async fn delete(&self, address: &str, owner: &str) -> Result<(), StoreError>;
}

/// Resolve an inbound address to its ordered target list.
///
/// An address with no targets is reported as [`RoutingError::NotFound`] so
/// callers can tell "nothing configured" apart from a store failure.
pub async fn resolve(
    store: &dyn EndpointStore,
    address: &str,
) -> Result<Vec<EndpointTarget>, RoutingError> {
    let targets = store.targets_for(address).await.map_err(|e| {
        error!(address = %address, error = %e, "routing_resolve_failed");
        RoutingError::Store(e)
    })?;

    if targets.is_empty() {
        debug!(address = %address, "routing_no_targets");
        return Err(RoutingError::NotFound(address.to_string()));
    }

    debug!(address = %address, targets = targets.len(), "routing_resolved");
    Ok(targets)
}
