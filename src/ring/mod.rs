//! Consistent-hash ring view
//!
//! Replicas (store-gateways, rulers) register themselves in a shared KV
//! store as one serialized [`RingDesc`] per component. Consumers never
//! mutate the ring: a background watcher periodically reads the value and
//! publishes an immutable [`RingSnapshot`] that request threads use for
//! token lookups. Instances whose heartbeat is older than the configured
//! timeout are treated as absent.

mod kv;
mod watcher;

pub use kv::{InMemoryKvStore, RingKvStore};
pub use watcher::{RingConfig, RingWatcher};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::hashing::fnv64a;

/// Ring key for the store-gateway component.
pub const STORE_GATEWAY_RING_KEY: &str = "store-gateway";

/// Ring key for the ruler component.
pub const RULER_RING_KEY: &str = "ruler";

/// Lifecycle state of a ring member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum InstanceState {
    /// Member serves requests and owns its token ranges
    Active,
    /// Member is joining and not yet serving
    Joining,
    /// Member is shutting down and handing off ownership
    Leaving,
}

/// One ring member as stored in the KV value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceDesc {
    /// Routable address of the replica
    pub addr: String,
    /// Tokens owned by the replica on the hash ring
    pub tokens: Vec<u32>,
    pub state: InstanceState,
    /// Last heartbeat, unix seconds
    pub heartbeat_ts: i64,
}

/// The ring value stored in the KV store, one per component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RingDesc {
    /// Instance ID -> instance descriptor
    pub instances: BTreeMap<String, InstanceDesc>,
}

impl RingDesc {
    /// Register or replace an instance. Intended for lifecyclers and tests;
    /// query-side consumers only read.
    pub fn with_instance(
        mut self,
        id: impl Into<String>,
        addr: impl Into<String>,
        tokens: Vec<u32>,
        state: InstanceState,
        heartbeat_ts: i64,
    ) -> Self {
        self.instances.insert(
            id.into(),
            InstanceDesc {
                addr: addr.into(),
                tokens,
                state,
                heartbeat_ts,
            },
        );
        self
    }
}

/// Identity of a healthy ring member, used to detect topology changes
/// between two snapshots.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MemberIdentity {
    pub id: String,
    pub addr: String,
    pub state: InstanceState,
}

impl PartialOrd for InstanceState {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for InstanceState {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        (*self as u8).cmp(&(*other as u8))
    }
}

/// An immutable, health-filtered view of the ring at one point in time.
///
/// Unhealthy instances are dropped at construction, so lookups never have
/// to re-check heartbeats.
#[derive(Debug, Clone)]
pub struct RingSnapshot {
    /// Healthy instances, sorted by ID
    instances: Vec<(String, InstanceDesc)>,
    /// (token, index into `instances`), sorted by token; only Active
    /// instances contribute tokens
    tokens: Vec<(u32, usize)>,
    replication_factor: usize,
}

impl RingSnapshot {
    /// Build a snapshot from the stored descriptor, dropping instances
    /// whose heartbeat is older than `heartbeat_timeout_secs`.
    pub fn from_desc(
        desc: &RingDesc,
        now_unix_secs: i64,
        heartbeat_timeout_secs: i64,
        replication_factor: usize,
    ) -> Self {
        let instances: Vec<(String, InstanceDesc)> = desc
            .instances
            .iter()
            .filter(|(_, inst)| now_unix_secs - inst.heartbeat_ts <= heartbeat_timeout_secs)
            .map(|(id, inst)| (id.clone(), inst.clone()))
            .collect();

        Self::from_instances(instances, replication_factor)
    }

    fn from_instances(instances: Vec<(String, InstanceDesc)>, replication_factor: usize) -> Self {
        let mut tokens = Vec::new();
        for (idx, (_, inst)) in instances.iter().enumerate() {
            if inst.state == InstanceState::Active {
                for &t in &inst.tokens {
                    tokens.push((t, idx));
                }
            }
        }
        tokens.sort_unstable();

        Self {
            instances,
            tokens,
            replication_factor: replication_factor.max(1),
        }
    }

    /// An empty snapshot, used before the watcher has seen any ring value.
    pub fn empty(replication_factor: usize) -> Self {
        Self::from_instances(Vec::new(), replication_factor)
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn replication_factor(&self) -> usize {
        self.replication_factor
    }

    /// Number of healthy instances in the snapshot.
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn has_instance(&self, id: &str) -> bool {
        self.instances.iter().any(|(i, _)| i == id)
    }

    pub fn instance(&self, id: &str) -> Option<&InstanceDesc> {
        self.instances
            .iter()
            .find(|(i, _)| i == id)
            .map(|(_, inst)| inst)
    }

    /// The replication set for a token: up to `replication_factor` distinct
    /// Active instances, walking the ring clockwise from the first token
    /// greater than or equal to the hash.
    pub fn get(&self, token: u32) -> Vec<&InstanceDesc> {
        if self.tokens.is_empty() {
            return Vec::new();
        }

        let start = self.tokens.partition_point(|(t, _)| *t < token) % self.tokens.len();

        let mut out: Vec<&InstanceDesc> = Vec::with_capacity(self.replication_factor);
        let mut seen = Vec::with_capacity(self.replication_factor);
        for step in 0..self.tokens.len() {
            let (_, idx) = self.tokens[(start + step) % self.tokens.len()];
            if seen.contains(&idx) {
                continue;
            }
            seen.push(idx);
            out.push(&self.instances[idx].1);
            if out.len() == self.replication_factor {
                break;
            }
        }
        out
    }

    /// Identities of all healthy members, sorted. Two snapshots with equal
    /// member sets are considered topologically identical regardless of
    /// heartbeat timestamps or token order.
    pub fn member_identities(&self) -> Vec<MemberIdentity> {
        let mut ids: Vec<MemberIdentity> = self
            .instances
            .iter()
            .map(|(id, inst)| MemberIdentity {
                id: id.clone(),
                addr: inst.addr.clone(),
                state: inst.state,
            })
            .collect();
        ids.sort();
        ids
    }

    /// Deterministic per-tenant sub-ring of up to `size` instances.
    ///
    /// Instances are ranked by `fnv64a(tenant, instance id)` so every
    /// consumer computes the same subset for a tenant without coordination,
    /// and a tenant's subset is stable under unrelated membership changes.
    pub fn shuffle_shard(&self, tenant: &str, size: usize) -> RingSnapshot {
        if size == 0 || size >= self.instances.len() {
            return self.clone();
        }

        let mut ranked: Vec<(u64, usize)> = self
            .instances
            .iter()
            .enumerate()
            .map(|(idx, (id, _))| {
                let score = fnv64a([tenant.as_bytes(), &[0xff][..], id.as_bytes()]);
                (score, idx)
            })
            .collect();
        ranked.sort_unstable();

        let mut subset: Vec<(String, InstanceDesc)> = ranked
            .into_iter()
            .take(size)
            .map(|(_, idx)| self.instances[idx].clone())
            .collect();
        subset.sort_by(|a, b| a.0.cmp(&b.0));

        RingSnapshot::from_instances(subset, self.replication_factor)
    }
}
