//! Per-tenant bucket index object
//!
//! The compactor side of the system periodically writes, per tenant, a
//! single serialized object listing every block and deletion mark in the
//! bucket. Queriers read it instead of scanning the bucket. Freshness is
//! judged by `updated_at` against the wall clock.

use object_store::path::Path;
use object_store::ObjectStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::block::{Block, DeletionMark};
use crate::Result;

/// Name of the index object within a tenant prefix.
pub const INDEX_OBJECT_NAME: &str = "bucket-index.json";

/// Current index format version.
pub const INDEX_VERSION: u32 = 1;

/// The serialized per-tenant block catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BucketIndex {
    pub version: u32,
    /// When the index producer last refreshed this object, unix seconds
    pub updated_at: i64,
    pub blocks: Vec<Block>,
    pub deletion_marks: Vec<DeletionMark>,
}

impl BucketIndex {
    pub fn new(updated_at: i64) -> Self {
        Self {
            version: INDEX_VERSION,
            updated_at,
            blocks: Vec::new(),
            deletion_marks: Vec::new(),
        }
    }

    pub fn with_blocks(mut self, blocks: Vec<Block>) -> Self {
        self.blocks = blocks;
        self
    }

    pub fn with_deletion_marks(mut self, marks: Vec<DeletionMark>) -> Self {
        self.deletion_marks = marks;
        self
    }
}

/// Object path of a tenant's index.
pub fn index_path(tenant: &str) -> Path {
    Path::from_iter([tenant, INDEX_OBJECT_NAME])
}

/// Read a tenant's bucket index. `None` when the tenant has no index yet,
/// which callers treat as "tenant has no blocks".
pub async fn read_index(store: &Arc<dyn ObjectStore>, tenant: &str) -> Result<Option<BucketIndex>> {
    match store.get(&index_path(tenant)).await {
        Ok(result) => {
            let bytes = result.bytes().await?;
            let index: BucketIndex = serde_json::from_slice(&bytes)?;
            Ok(Some(index))
        }
        Err(object_store::Error::NotFound { .. }) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a tenant's bucket index. Used by index producers and tests.
pub async fn write_index(
    store: &Arc<dyn ObjectStore>,
    tenant: &str,
    index: &BucketIndex,
) -> Result<()> {
    let payload = serde_json::to_vec(index)?;
    store.put(&index_path(tenant), payload.into()).await?;
    Ok(())
}
