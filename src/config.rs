//! Component factory for environment-based configuration
//!
//! Factory methods creating the object store, the blocks finder, and the
//! ring KV client from environment variables, so development setups
//! (in-memory everything) and production (S3 + bucket index) differ only in
//! environment.

use object_store::{aws::AmazonS3Builder, memory::InMemory, ObjectStore};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::finder::{
    BlocksFinder, BucketIndexFinder, BucketIndexFinderConfig, BucketScanFinder,
    BucketScanFinderConfig,
};
use crate::querier::ConsistencyChecker;
use crate::ring::{InMemoryKvStore, RingKvStore};
use crate::Result;

/// Blocks-storage durations shared by the finder and the consistency
/// checker. The uploaded-block grace of the checker is derived from the
/// same sync interval the finder refreshes with, which is what makes the
/// consistency check sound.
#[derive(Debug, Clone)]
pub struct BlocksStorageConfig {
    /// How long after upload a block must be loaded by store-gateways
    pub consistency_delay: Duration,
    /// Store-gateway block sync cadence (also the finder refresh cadence)
    pub sync_interval: Duration,
    /// How long deletion-marked blocks keep being queried
    pub ignore_deletion_marks_delay: Duration,
    /// Refuse a block catalog staler than this
    pub max_stale_period: Duration,
}

impl Default for BlocksStorageConfig {
    fn default() -> Self {
        Self {
            consistency_delay: Duration::ZERO,
            sync_interval: Duration::from_secs(15 * 60),
            ignore_deletion_marks_delay: Duration::from_secs(60 * 60),
            max_stale_period: Duration::from_secs(60 * 60),
        }
    }
}

impl BlocksStorageConfig {
    /// The consistency checker matching this blocks-storage configuration.
    pub fn consistency_checker(&self) -> ConsistencyChecker {
        ConsistencyChecker::new(
            self.consistency_delay,
            self.sync_interval,
            self.ignore_deletion_marks_delay,
        )
    }
}

pub struct ComponentFactory;

impl ComponentFactory {
    /// Create object store from environment
    ///
    /// Environment variables:
    /// - STORAGE_BACKEND: "memory" (default) or "s3"
    /// - S3_BUCKET: S3 bucket name (required for s3)
    /// - S3_REGION: S3 region (default: us-east-1)
    /// - S3_ENDPOINT: Custom S3 endpoint (optional, for MinIO)
    pub fn create_object_store() -> Result<Arc<dyn ObjectStore>> {
        let backend = std::env::var("STORAGE_BACKEND").unwrap_or_else(|_| "memory".to_string());

        match backend.as_str() {
            "memory" => {
                info!("Using in-memory object store (development mode)");
                Ok(Arc::new(InMemory::new()))
            }
            "s3" => {
                let bucket = std::env::var("S3_BUCKET").map_err(|_| {
                    crate::Error::Config("S3_BUCKET required when STORAGE_BACKEND=s3".to_string())
                })?;
                let region = std::env::var("S3_REGION").unwrap_or_else(|_| "us-east-1".to_string());

                info!(bucket = %bucket, region = %region, "Using S3 object store");

                let mut builder = AmazonS3Builder::from_env()
                    .with_bucket_name(&bucket)
                    .with_region(&region);

                if let Ok(endpoint) = std::env::var("S3_ENDPOINT") {
                    info!(endpoint = %endpoint, "Using custom S3 endpoint");
                    builder = builder.with_endpoint(&endpoint).with_allow_http(true);
                }

                Ok(Arc::new(builder.build()?))
            }
            _ => Err(crate::Error::Config(format!(
                "Unknown STORAGE_BACKEND: {backend}. Use 'memory' or 's3'"
            ))),
        }
    }

    /// Create a blocks finder from environment
    ///
    /// Environment variables:
    /// - FINDER_BACKEND: "bucket-index" (default) or "scan"
    ///
    /// The scan variant performs its initial bucket scan before returning.
    pub async fn create_blocks_finder(
        storage: &BlocksStorageConfig,
        object_store: Arc<dyn ObjectStore>,
    ) -> Result<Arc<dyn BlocksFinder>> {
        let backend =
            std::env::var("FINDER_BACKEND").unwrap_or_else(|_| "bucket-index".to_string());

        match backend.as_str() {
            "bucket-index" => {
                info!("Using bucket-index blocks finder");
                let finder = BucketIndexFinder::new(
                    BucketIndexFinderConfig {
                        update_on_stale_after: storage.sync_interval,
                        max_stale_period: storage.max_stale_period,
                        ignore_deletion_marks_delay: storage.ignore_deletion_marks_delay,
                        ..Default::default()
                    },
                    object_store,
                );
                finder.start();
                Ok(Arc::new(finder))
            }
            "scan" => {
                info!("Using bucket-scan blocks finder");
                let finder = BucketScanFinder::new(
                    BucketScanFinderConfig {
                        scan_interval: storage.sync_interval,
                        max_stale_period: storage.max_stale_period,
                        ignore_deletion_marks_delay: storage.ignore_deletion_marks_delay,
                        ..Default::default()
                    },
                    object_store,
                );
                finder.start().await?;
                Ok(Arc::new(finder))
            }
            _ => Err(crate::Error::Config(format!(
                "Unknown FINDER_BACKEND: {backend}. Use 'bucket-index' or 'scan'"
            ))),
        }
    }

    /// Create a ring KV client from environment
    ///
    /// Environment variables:
    /// - RING_BACKEND: "memory" (default)
    pub fn create_ring_kv() -> Result<Arc<dyn RingKvStore>> {
        let backend = std::env::var("RING_BACKEND").unwrap_or_else(|_| "memory".to_string());

        match backend.as_str() {
            "memory" => {
                info!("Using in-memory ring KV store (single-process mode)");
                Ok(Arc::new(InMemoryKvStore::new()))
            }
            _ => Err(crate::Error::Config(format!(
                "Unknown RING_BACKEND: {backend}. Use 'memory'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn consistency_checker_derives_from_storage_config() {
        let storage = BlocksStorageConfig {
            consistency_delay: Duration::from_secs(300),
            sync_interval: Duration::from_secs(100),
            ignore_deletion_marks_delay: Duration::from_secs(600),
            ..Default::default()
        };

        // Grace windows verified through behavior in the checker tests;
        // here we only assert construction succeeds with derived values.
        let _checker = storage.consistency_checker();
    }
}
