//! In-memory routing table for tests and local runs without Postgres.

use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::types::{EndpointSummary, EndpointTarget, EndpointUpdate, NewEndpoint, StoreError};
use super::EndpointStore;

/// One `input ⋈ pipe ⋈ output` row.
#[derive(Debug, Clone)]
struct Link {
    output_id: i64,
    owner: String,
    target: EndpointTarget,
}

/// Routing table held in process memory.
#[derive(Default)]
pub struct MemoryEndpointStore {
    links: RwLock<Vec<Link>>,
    next_id: AtomicI64,
}

impl MemoryEndpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pipe an address to another output, creating the address if needed.
    pub async fn link(&self, owner: &str, target: EndpointTarget) {
        let output_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.links.write().await.push(Link {
            output_id,
            owner: owner.to_string(),
            target,
        });
    }
}

#[async_trait]
impl EndpointStore for MemoryEndpointStore {
    async fn targets_for(&self, address: &str) -> Result<Vec<EndpointTarget>, StoreError> {
        let links = self.links.read().await;
        let mut matching: Vec<&Link> = links
            .iter()
            .filter(|l| l.target.address == address)
            .collect();
        matching.sort_by_key(|l| l.output_id);
        Ok(matching.into_iter().map(|l| l.target.clone()).collect())
    }

    async fn list_for_target(
        &self,
        target: &str,
        owner: &str,
    ) -> Result<Vec<EndpointSummary>, StoreError> {
        let links = self.links.read().await;
        Ok(links
            .iter()
            .filter(|l| l.target.target == target && l.owner == owner)
            .map(|l| EndpointSummary {
                address: l.target.address.clone(),
                filter: l.target.filter.clone(),
            })
            .collect())
    }

    async fn create(&self, endpoint: NewEndpoint) -> Result<(), StoreError> {
        let mut links = self.links.write().await;
        if links.iter().any(|l| l.target.address == endpoint.address) {
            return Err(StoreError::AddressTaken(endpoint.address));
        }

        links.push(Link {
            output_id: self.next_id.fetch_add(1, Ordering::Relaxed),
            owner: endpoint.owner,
            target: EndpointTarget {
                address: endpoint.address,
                filter: endpoint.filter,
                kind: endpoint.kind,
                target: endpoint.target,
                data: endpoint.data,
            },
        });
        Ok(())
    }

    async fn update(&self, update: EndpointUpdate) -> Result<(), StoreError> {
        let mut links = self.links.write().await;

        let first = links
            .iter()
            .filter(|l| l.target.address == update.address && l.owner == update.owner)
            .map(|l| l.output_id)
            .min()
            .ok_or(StoreError::NotFound)?;

        if update.new_address != update.address
            && links.iter().any(|l| l.target.address == update.new_address)
        {
            return Err(StoreError::AddressTaken(update.new_address));
        }

        for link in links.iter_mut().filter(|l| l.target.address == update.address) {
            link.target.address = update.new_address.clone();
            if link.output_id == first {
                link.target.filter = update.filter.clone();
                link.target.target = update.target.clone();
                link.target.data = update.data.clone();
            }
        }
        Ok(())
    }

    async fn delete(&self, address: &str, owner: &str) -> Result<(), StoreError> {
        let mut links = self.links.write().await;
        let before = links.len();
        links.retain(|l| !(l.target.address == address && l.owner == owner));
        if links.len() == before {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}
