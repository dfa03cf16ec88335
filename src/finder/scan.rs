//! Bucket-scanning blocks finder (scan variant)
//!
//! Periodically enumerates the bucket layout directly instead of reading a
//! prepared index: one `meta.json` per block under the tenant prefix, plus
//! an optional `deletion-mark.json` next to it. Tenant and meta fetches run
//! with bounded concurrency so a bucket with many tenants cannot saturate
//! the object store.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::{FuturesUnordered, StreamExt, TryStreamExt};
use object_store::path::Path;
use object_store::ObjectStore;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{select_blocks, BlocksFinder};
use crate::block::{Block, BlockId, DeletionMark};
use crate::clock::QueryClock;
use crate::{Error, Result};

/// Name of the block descriptor object within a block prefix.
pub const META_OBJECT_NAME: &str = "meta.json";

/// Name of the deletion tombstone within a block prefix.
pub const DELETION_MARK_OBJECT_NAME: &str = "deletion-mark.json";

/// Configuration of the scanning finder.
#[derive(Debug, Clone)]
pub struct BucketScanFinderConfig {
    /// Cadence of full bucket scans
    pub scan_interval: Duration,
    /// How many tenants are scanned concurrently
    pub tenants_concurrency: usize,
    /// How many meta objects are fetched concurrently per tenant
    pub metas_concurrency: usize,
    /// Refuse to serve results once the last successful scan is older than
    /// this
    pub max_stale_period: Duration,
    /// Blocks with a deletion mark older than this are not returned
    pub ignore_deletion_marks_delay: Duration,
}

impl Default for BucketScanFinderConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(15 * 60),
            tenants_concurrency: 10,
            metas_concurrency: 20,
            max_stale_period: Duration::from_secs(60 * 60),
            ignore_deletion_marks_delay: Duration::from_secs(60 * 60),
        }
    }
}

#[derive(Debug, Default)]
struct TenantBlocks {
    blocks: Vec<Block>,
    marks: Vec<DeletionMark>,
}

/// Blocks finder that scans the bucket layout itself.
pub struct BucketScanFinder {
    cfg: BucketScanFinderConfig,
    store: Arc<dyn ObjectStore>,
    clock: Arc<QueryClock>,
    tenants: Arc<DashMap<String, Arc<TenantBlocks>>>,
    /// Unix seconds of the last successful full scan; zero before the first
    last_scan_unix: Arc<AtomicI64>,
    shutdown: CancellationToken,
}

impl BucketScanFinder {
    pub fn new(cfg: BucketScanFinderConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            cfg,
            store,
            clock: Arc::new(QueryClock::new()),
            tenants: Arc::new(DashMap::new()),
            last_scan_unix: Arc::new(AtomicI64::new(0)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Run an initial scan and spawn the periodic rescan loop. The initial
    /// scan must succeed so the finder never serves from an empty cache it
    /// cannot vouch for.
    pub async fn start(&self) -> Result<()> {
        self.scan_once().await?;

        let cfg = self.cfg.clone();
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let tenants = Arc::clone(&self.tenants);
        let last_scan = Arc::clone(&self.last_scan_unix);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(cfg.scan_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The interval fires immediately once; skip that first tick
            // since we just scanned.
            tick.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("bucket scan finder stopped");
                        return;
                    }
                    _ = tick.tick() => {
                        match scan_bucket(&cfg, &store).await {
                            Ok(scanned) => {
                                tenants.clear();
                                for (tenant, data) in scanned {
                                    tenants.insert(tenant, Arc::new(data));
                                }
                                last_scan.store(clock.now_millis() / 1000, Ordering::Relaxed);
                            }
                            Err(err) => {
                                warn!(error = %err, "bucket scan failed, keeping previous results");
                            }
                        }
                    }
                }
            }
        });

        Ok(())
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run one full scan on the caller's task.
    pub async fn scan_once(&self) -> Result<()> {
        let scanned = scan_bucket(&self.cfg, &self.store).await?;
        self.tenants.clear();
        for (tenant, data) in scanned {
            self.tenants.insert(tenant, Arc::new(data));
        }
        self.last_scan_unix
            .store(self.clock.now_millis() / 1000, Ordering::Relaxed);
        Ok(())
    }
}

async fn scan_bucket(
    cfg: &BucketScanFinderConfig,
    store: &Arc<dyn ObjectStore>,
) -> Result<Vec<(String, TenantBlocks)>> {
    let root = store.list_with_delimiter(None).await?;
    let tenant_prefixes: Vec<Path> = root.common_prefixes;

    let mut scans = FuturesUnordered::new();
    let mut results = Vec::new();
    let mut pending = tenant_prefixes.into_iter();

    loop {
        while scans.len() < cfg.tenants_concurrency {
            match pending.next() {
                Some(prefix) => scans.push(scan_tenant(cfg, store, prefix)),
                None => break,
            }
        }
        match scans.next().await {
            Some(result) => results.push(result?),
            None => break,
        }
    }

    Ok(results)
}

async fn scan_tenant(
    cfg: &BucketScanFinderConfig,
    store: &Arc<dyn ObjectStore>,
    tenant_prefix: Path,
) -> Result<(String, TenantBlocks)> {
    let tenant = tenant_prefix
        .parts()
        .last()
        .map(|p| p.as_ref().to_string())
        .unwrap_or_default();

    let listing = store.list_with_delimiter(Some(&tenant_prefix)).await?;

    let fetches = futures::stream::iter(
        listing
            .common_prefixes
            .into_iter()
            .map(|block_prefix| fetch_block(store, block_prefix)),
    )
    .buffer_unordered(cfg.metas_concurrency);

    let fetched: Vec<Option<(Block, Option<DeletionMark>)>> = fetches.try_collect().await?;

    let mut data = TenantBlocks::default();
    for item in fetched.into_iter().flatten() {
        let (block, mark) = item;
        data.blocks.push(block);
        if let Some(mark) = mark {
            data.marks.push(mark);
        }
    }

    debug!(
        tenant = %tenant,
        blocks = data.blocks.len(),
        deletion_marks = data.marks.len(),
        "scanned tenant blocks"
    );
    Ok((tenant, data))
}

/// Fetch one block's meta and deletion mark. Prefixes without a parsable
/// meta are skipped: a block being uploaded has no meta yet and must not
/// fail the whole scan.
async fn fetch_block(
    store: &Arc<dyn ObjectStore>,
    block_prefix: Path,
) -> Result<Option<(Block, Option<DeletionMark>)>> {
    let meta_path = block_prefix.child(META_OBJECT_NAME);

    let block: Block = match store.get(&meta_path).await {
        Ok(result) => {
            let bytes = result.bytes().await?;
            match serde_json::from_slice(&bytes) {
                Ok(block) => block,
                Err(err) => {
                    warn!(path = %meta_path, error = %err, "skipping block with unparsable meta");
                    return Ok(None);
                }
            }
        }
        Err(object_store::Error::NotFound { .. }) => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let mark_path = block_prefix.child(DELETION_MARK_OBJECT_NAME);
    let mark = match store.get(&mark_path).await {
        Ok(result) => {
            let bytes = result.bytes().await?;
            serde_json::from_slice::<DeletionMark>(&bytes).ok()
        }
        Err(object_store::Error::NotFound { .. }) => None,
        Err(e) => return Err(e.into()),
    };

    Ok(Some((block, mark)))
}

#[async_trait]
impl BlocksFinder for BucketScanFinder {
    async fn get_blocks(
        &self,
        tenant: &str,
        min_t: i64,
        max_t: i64,
    ) -> Result<(Vec<Block>, HashMap<BlockId, DeletionMark>)> {
        let now_secs = self.clock.now_millis() / 1000;
        let last_scan = self.last_scan_unix.load(Ordering::Relaxed);
        if last_scan == 0 || now_secs - last_scan > self.cfg.max_stale_period.as_secs() as i64 {
            return Err(Error::IndexStale {
                tenant: tenant.to_string(),
                updated_at: last_scan,
            });
        }

        let Some(data) = self.tenants.get(tenant).map(|e| Arc::clone(e.value())) else {
            return Ok((Vec::new(), HashMap::new()));
        };

        Ok(select_blocks(
            &data.blocks,
            &data.marks,
            min_t,
            max_t,
            self.cfg.ignore_deletion_marks_delay,
            now_secs,
        ))
    }
}
