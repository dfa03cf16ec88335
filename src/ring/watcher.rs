//! Background ring membership watcher
//!
//! Periodically reads the ring value from the KV store and swaps in a fresh
//! health-filtered snapshot. Request threads only ever touch the current
//! snapshot through an `Arc`, so a lookup never blocks on a refresh.

use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{RingDesc, RingKvStore, RingSnapshot};
use crate::clock::QueryClock;
use crate::Result;

/// Configuration of one ring client.
#[derive(Debug, Clone)]
pub struct RingConfig {
    /// Component key under which the ring value is stored
    pub key: String,
    /// How often to re-read the ring value
    pub poll_interval: Duration,
    /// Heartbeats older than this mark an instance as absent
    pub heartbeat_timeout: Duration,
    /// How many distinct replicas own each token range
    pub replication_factor: usize,
}

impl RingConfig {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            poll_interval: Duration::from_secs(5),
            heartbeat_timeout: Duration::from_secs(60),
            replication_factor: 3,
        }
    }

    pub fn with_replication_factor(mut self, rf: usize) -> Self {
        self.replication_factor = rf;
        self
    }

    pub fn with_heartbeat_timeout(mut self, timeout: Duration) -> Self {
        self.heartbeat_timeout = timeout;
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Read-only ring client with a background refresh loop.
pub struct RingWatcher {
    cfg: RingConfig,
    kv: Arc<dyn RingKvStore>,
    clock: Arc<QueryClock>,
    snapshot: Arc<RwLock<Arc<RingSnapshot>>>,
    shutdown: CancellationToken,
}

impl RingWatcher {
    pub fn new(cfg: RingConfig, kv: Arc<dyn RingKvStore>) -> Self {
        let empty = Arc::new(RingSnapshot::empty(cfg.replication_factor));
        Self {
            cfg,
            kv,
            clock: Arc::new(QueryClock::new()),
            snapshot: Arc::new(RwLock::new(empty)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Load the ring once and spawn the refresh loop. The initial load must
    /// succeed so consumers never run against a ring that was never read.
    pub async fn start(&self) -> Result<()> {
        self.refresh_once().await?;

        let kv = Arc::clone(&self.kv);
        let clock = Arc::clone(&self.clock);
        let snapshot = Arc::clone(&self.snapshot);
        let cfg = self.cfg.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let mut tick = tokio::time::interval(cfg.poll_interval);
            tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!(key = %cfg.key, "ring watcher stopped");
                        return;
                    }
                    _ = tick.tick() => {
                        match kv.get(&cfg.key).await {
                            Ok(desc) => {
                                let desc = desc.unwrap_or_default();
                                let fresh = build_snapshot(&cfg, &clock, &desc);
                                *snapshot.write() = Arc::new(fresh);
                            }
                            Err(err) => {
                                // Keep serving the previous snapshot; a
                                // stale ring beats no ring.
                                warn!(key = %cfg.key, error = %err, "failed to refresh ring");
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

    /// The current ring view. Cheap to call on every request.
    pub fn snapshot(&self) -> Arc<RingSnapshot> {
        Arc::clone(&self.snapshot.read())
    }

    /// Re-read the ring value immediately.
    pub async fn refresh_once(&self) -> Result<()> {
        let desc = self.kv.get(&self.cfg.key).await?.unwrap_or_default();
        let fresh = build_snapshot(&self.cfg, &self.clock, &desc);
        *self.snapshot.write() = Arc::new(fresh);
        Ok(())
    }
}

fn build_snapshot(cfg: &RingConfig, clock: &QueryClock, desc: &RingDesc) -> RingSnapshot {
    RingSnapshot::from_desc(
        desc,
        clock.now_millis() / 1000,
        cfg.heartbeat_timeout.as_secs() as i64,
        cfg.replication_factor,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::{InMemoryKvStore, InstanceState};
    use chrono::Utc;

    fn ring_desc(addr: &str) -> RingDesc {
        RingDesc::default().with_instance(
            "sg-1",
            addr,
            vec![100],
            InstanceState::Active,
            Utc::now().timestamp(),
        )
    }

    #[tokio::test]
    async fn start_publishes_an_initial_snapshot() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.put("store-gateway", &ring_desc("addr-1")).await.unwrap();

        let watcher = RingWatcher::new(RingConfig::new("store-gateway"), kv);
        watcher.start().await.unwrap();

        let snapshot = watcher.snapshot();
        assert!(snapshot.has_instance("sg-1"));
        watcher.shutdown();
    }

    #[tokio::test]
    async fn refresh_once_picks_up_membership_changes() {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.put("store-gateway", &ring_desc("addr-1")).await.unwrap();

        let kv_client: Arc<dyn RingKvStore> = kv.clone();
        let watcher = RingWatcher::new(RingConfig::new("store-gateway"), kv_client);
        watcher.start().await.unwrap();

        let updated = ring_desc("addr-1").with_instance(
            "sg-2",
            "addr-2",
            vec![200],
            InstanceState::Active,
            Utc::now().timestamp(),
        );
        kv.put("store-gateway", &updated).await.unwrap();
        watcher.refresh_once().await.unwrap();

        assert_eq!(watcher.snapshot().len(), 2);
        watcher.shutdown();
    }

    #[tokio::test]
    async fn missing_ring_value_yields_empty_snapshot() {
        let kv = Arc::new(InMemoryKvStore::new());
        let watcher = RingWatcher::new(RingConfig::new("store-gateway"), kv);
        watcher.start().await.unwrap();
        assert!(watcher.snapshot().is_empty());
        watcher.shutdown();
    }
}
