//! Process-wide store-gateway client pool
//!
//! Clients are keyed by replica address and reused across requests. The
//! factory seam lets tests plug in in-memory clients and production wire a
//! real transport, without the pool caring.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tracing::debug;

use super::StoreGatewayClient;
use crate::Result;

/// Creates a client for a replica address.
#[async_trait]
pub trait StoreClientFactory: Send + Sync {
    async fn new_client(&self, addr: &str) -> Result<Arc<dyn StoreGatewayClient>>;
}

/// Shared, thread-safe pool of store-gateway clients.
pub struct StoreClientPool {
    factory: Arc<dyn StoreClientFactory>,
    clients: DashMap<String, Arc<dyn StoreGatewayClient>>,
}

impl StoreClientPool {
    pub fn new(factory: Arc<dyn StoreClientFactory>) -> Self {
        Self {
            factory,
            clients: DashMap::new(),
        }
    }

    /// Get the pooled client for an address, dialing one if needed.
    pub async fn get(&self, addr: &str) -> Result<Arc<dyn StoreGatewayClient>> {
        if let Some(client) = self.clients.get(addr) {
            return Ok(Arc::clone(client.value()));
        }

        let client = self.factory.new_client(addr).await?;
        debug!(addr = %addr, "created store-gateway client");
        self.clients.insert(addr.to_string(), Arc::clone(&client));
        Ok(client)
    }

    /// Drop the pooled client for an address, forcing a re-dial next time.
    pub fn remove(&self, addr: &str) {
        self.clients.remove(addr);
    }

    pub fn len(&self) -> usize {
        self.clients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}
