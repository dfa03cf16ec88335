//! Ring KV store abstraction
//!
//! The ring is stored as a single serialized value keyed by component name
//! (`store-gateway`, `ruler`). This trait abstracts the KV backend so tests
//! and single-process deployments can run against the in-memory store.

use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;

use super::RingDesc;
use crate::Result;

/// KV client for ring values.
#[async_trait]
pub trait RingKvStore: Send + Sync {
    /// Fetch the ring value for a component key. `None` if the ring has
    /// never been written.
    async fn get(&self, key: &str) -> Result<Option<RingDesc>>;

    /// Replace the ring value for a component key.
    async fn put(&self, key: &str, desc: &RingDesc) -> Result<()>;
}

/// In-memory ring KV store for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    values: RwLock<HashMap<String, RingDesc>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RingKvStore for InMemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<RingDesc>> {
        Ok(self.values.read().get(key).cloned())
    }

    async fn put(&self, key: &str, desc: &RingDesc) -> Result<()> {
        self.values.write().insert(key.to_string(), desc.clone());
        Ok(())
    }
}
