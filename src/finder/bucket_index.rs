//! Bucket-index blocks finder (pull variant)
//!
//! Serves block lookups from the per-tenant bucket index object, refreshing
//! each cached index in the background: on staleness at the regular cadence,
//! sooner after a failed refresh, and evicting tenants nobody has queried
//! for a while.

use async_trait::async_trait;
use dashmap::DashMap;
use object_store::ObjectStore;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{select_blocks, BlocksFinder};
use crate::block::{Block, BlockId, DeletionMark};
use crate::bucket_index::{read_index, BucketIndex};
use crate::clock::QueryClock;
use crate::{Error, Result};

/// Configuration of the bucket-index finder.
#[derive(Debug, Clone)]
pub struct BucketIndexFinderConfig {
    /// Cadence of the background maintenance pass
    pub check_interval: Duration,
    /// Refresh a cached index once it is older than this
    pub update_on_stale_after: Duration,
    /// Retry cadence after a failed refresh
    pub update_on_error_interval: Duration,
    /// Evict a tenant's cached index after this long without a query
    pub idle_timeout: Duration,
    /// Refuse to serve an index whose producer timestamp is older than this
    pub max_stale_period: Duration,
    /// Blocks with a deletion mark older than this are not returned
    pub ignore_deletion_marks_delay: Duration,
}

impl Default for BucketIndexFinderConfig {
    fn default() -> Self {
        Self {
            check_interval: Duration::from_secs(60),
            update_on_stale_after: Duration::from_secs(15 * 60),
            update_on_error_interval: Duration::from_secs(60),
            idle_timeout: Duration::from_secs(60 * 60),
            max_stale_period: Duration::from_secs(60 * 60),
            ignore_deletion_marks_delay: Duration::from_secs(60 * 60),
        }
    }
}

enum IndexState {
    NotLoaded,
    Loaded {
        index: Arc<BucketIndex>,
        refreshed_at: Instant,
    },
    Failed {
        attempted_at: Instant,
    },
}

struct TenantEntry {
    state: RwLock<IndexState>,
    /// Unix seconds of the last `get_blocks` touching this tenant
    last_requested: AtomicI64,
}

/// Blocks finder backed by per-tenant bucket index objects.
pub struct BucketIndexFinder {
    cfg: BucketIndexFinderConfig,
    store: Arc<dyn ObjectStore>,
    clock: Arc<QueryClock>,
    tenants: Arc<DashMap<String, Arc<TenantEntry>>>,
    shutdown: CancellationToken,
}

impl BucketIndexFinder {
    pub fn new(cfg: BucketIndexFinderConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            cfg,
            store,
            clock: Arc::new(QueryClock::new()),
            tenants: Arc::new(DashMap::new()),
            shutdown: CancellationToken::new(),
        }
    }

    /// Spawn the background maintenance loop.
    pub fn start(&self) {
        let cfg = self.cfg.clone();
        let store = Arc::clone(&self.store);
        let clock = Arc::clone(&self.clock);
        let tenants = Arc::clone(&self.tenants);
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(cfg.check_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("bucket index finder maintenance stopped");
                        return;
                    }
                    _ = tick.tick() => {
                        maintain(&cfg, &store, &clock, &tenants).await;
                    }
                }
            }
        });
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Number of tenants with a cached index. Exposed for tests and
    /// introspection.
    pub fn cached_tenants(&self) -> usize {
        self.tenants.len()
    }

    async fn get_or_load(&self, tenant: &str) -> Result<Option<Arc<BucketIndex>>> {
        let entry = self
            .tenants
            .entry(tenant.to_string())
            .or_insert_with(|| {
                Arc::new(TenantEntry {
                    state: RwLock::new(IndexState::NotLoaded),
                    last_requested: AtomicI64::new(0),
                })
            })
            .clone();

        entry
            .last_requested
            .store(self.clock.now_millis() / 1000, Ordering::Relaxed);

        if let IndexState::Loaded { index, .. } = &*entry.state.read() {
            return Ok(Some(Arc::clone(index)));
        }

        // No usable cached index: load synchronously on the query path.
        match read_index(&self.store, tenant).await {
            Ok(Some(index)) => {
                let index = Arc::new(index);
                *entry.state.write() = IndexState::Loaded {
                    index: Arc::clone(&index),
                    refreshed_at: Instant::now(),
                };
                Ok(Some(index))
            }
            Ok(None) => {
                // Tenant has no index object: treat as empty, but remember
                // the attempt so the maintenance loop retries on cadence.
                *entry.state.write() = IndexState::Failed {
                    attempted_at: Instant::now(),
                };
                Ok(None)
            }
            Err(err) => {
                *entry.state.write() = IndexState::Failed {
                    attempted_at: Instant::now(),
                };
                Err(err)
            }
        }
    }
}

async fn maintain(
    cfg: &BucketIndexFinderConfig,
    store: &Arc<dyn ObjectStore>,
    clock: &Arc<QueryClock>,
    tenants: &Arc<DashMap<String, Arc<TenantEntry>>>,
) {
    let now_secs = clock.now_millis() / 1000;
    let idle_secs = cfg.idle_timeout.as_secs() as i64;

    // Idle eviction first, so evicted tenants are not refreshed.
    tenants.retain(|tenant, entry| {
        let last = entry.last_requested.load(Ordering::Relaxed);
        let keep = last == 0 || now_secs - last <= idle_secs;
        if !keep {
            debug!(tenant = %tenant, "evicting idle bucket index");
        }
        keep
    });

    let refresh_targets: Vec<String> = tenants
        .iter()
        .filter(|entry| {
            let state = entry.value().state.read();
            match &*state {
                IndexState::NotLoaded => false,
                IndexState::Loaded { refreshed_at, .. } => {
                    refreshed_at.elapsed() >= cfg.update_on_stale_after
                }
                IndexState::Failed { attempted_at } => {
                    attempted_at.elapsed() >= cfg.update_on_error_interval
                }
            }
        })
        .map(|entry| entry.key().clone())
        .collect();

    for tenant in refresh_targets {
        let Some(entry) = tenants.get(&tenant).map(|e| Arc::clone(e.value())) else {
            continue;
        };

        match read_index(store, &tenant).await {
            Ok(Some(index)) => {
                *entry.state.write() = IndexState::Loaded {
                    index: Arc::new(index),
                    refreshed_at: Instant::now(),
                };
            }
            Ok(None) => {
                *entry.state.write() = IndexState::Failed {
                    attempted_at: Instant::now(),
                };
            }
            Err(err) => {
                warn!(tenant = %tenant, error = %err, "failed to refresh bucket index");
                *entry.state.write() = IndexState::Failed {
                    attempted_at: Instant::now(),
                };
            }
        }
    }
}

#[async_trait]
impl BlocksFinder for BucketIndexFinder {
    async fn get_blocks(
        &self,
        tenant: &str,
        min_t: i64,
        max_t: i64,
    ) -> Result<(Vec<Block>, HashMap<BlockId, DeletionMark>)> {
        let Some(index) = self.get_or_load(tenant).await? else {
            return Ok((Vec::new(), HashMap::new()));
        };

        let now_secs = self.clock.now_millis() / 1000;
        if now_secs - index.updated_at > self.cfg.max_stale_period.as_secs() as i64 {
            return Err(Error::IndexStale {
                tenant: tenant.to_string(),
                updated_at: index.updated_at,
            });
        }

        Ok(select_blocks(
            &index.blocks,
            &index.deletion_marks,
            min_t,
            max_t,
            self.cfg.ignore_deletion_marks_delay,
            now_secs,
        ))
    }
}
