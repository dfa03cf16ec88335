//! Ruler work-assignment loop
//!
//! Every ruler replica periodically decides which rule groups it owns:
//! a group's `(tenant, namespace, name)` triple hashes to a ring token and
//! the replica owning the primary position for that token evaluates the
//! group. Syncs run at startup once the replica is active in the ring, on a
//! poll interval, and whenever the healthy replica set changes, so that in
//! steady state no group runs on two replicas at once.

mod manager;
mod store;
pub mod telemetry;

pub use manager::{GroupKey, LocalRuleManager, RuleGroupManager};
pub use store::{InMemoryRuleStore, RuleDesc, RuleGroupDesc, RuleStore};

use futures::stream::{StreamExt, TryStreamExt};
use rand::Rng;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::hashing::fnv32a;
use crate::limits::TenantLimits;
use crate::ring::{InstanceState, RingSnapshot, RingWatcher};
use crate::{Error, Result};

/// Number of concurrent per-tenant group list operations per sync.
const LIST_RULES_CONCURRENCY: usize = 10;

/// Sync trigger labels.
pub const SYNC_REASON_INITIAL: &str = "initial";
pub const SYNC_REASON_PERIODIC: &str = "periodic";
pub const SYNC_REASON_RING_CHANGE: &str = "ring-change";

/// Ruler configuration.
#[derive(Debug, Clone)]
pub struct RulerConfig {
    /// This replica's instance ID in the ruler ring
    pub instance_id: String,
    /// This replica's address; ownership compares against it
    pub instance_addr: String,
    /// How frequently to poll for rule changes
    pub poll_interval: Duration,
    /// How frequently to compare the ring against the last seen state
    pub ring_check_period: Duration,
    /// If non-empty, only these tenants are handled
    pub enabled_tenants: Vec<String>,
    /// Tenants this ruler must never handle
    pub disabled_tenants: Vec<String>,
}

impl RulerConfig {
    pub fn new(instance_id: impl Into<String>, instance_addr: impl Into<String>) -> Self {
        Self {
            instance_id: instance_id.into(),
            instance_addr: instance_addr.into(),
            poll_interval: Duration::from_secs(60),
            ring_check_period: Duration::from_secs(5),
            enabled_tenants: Vec::new(),
            disabled_tenants: Vec::new(),
        }
    }
}

/// Enabled/disabled tenant gate.
#[derive(Debug, Default)]
struct AllowedTenants {
    enabled: Option<HashSet<String>>,
    disabled: HashSet<String>,
}

impl AllowedTenants {
    fn new(enabled: &[String], disabled: &[String]) -> Self {
        Self {
            enabled: (!enabled.is_empty()).then(|| enabled.iter().cloned().collect()),
            disabled: disabled.iter().cloned().collect(),
        }
    }

    fn is_allowed(&self, tenant: &str) -> bool {
        if self.disabled.contains(tenant) {
            return false;
        }
        match &self.enabled {
            Some(enabled) => enabled.contains(tenant),
            None => true,
        }
    }
}

/// Ring token of a rule group, hashed over `tenant/namespace/name`.
pub fn token_for_group(tenant: &str, namespace: &str, name: &str) -> u32 {
    fnv32a([
        tenant.as_bytes(),
        b"/",
        namespace.as_bytes(),
        b"/",
        name.as_bytes(),
    ])
}

/// Whether the replica at `instance_addr` owns `group` under `ring`: the
/// primary owner of the group token must be this replica.
fn instance_owns_rule_group(
    ring: &RingSnapshot,
    group: &RuleGroupDesc,
    instance_addr: &str,
) -> Result<bool> {
    let token = token_for_group(&group.tenant, &group.namespace, &group.name);
    let owners = ring.get(token);
    let primary = owners.first().ok_or_else(|| {
        Error::Internal("empty replication set while checking rule group ownership".to_string())
    })?;
    Ok(primary.addr == instance_addr)
}

/// Keep only the rule groups this instance owns. Deliberately a free
/// function over the ring passed in, so per-tenant sub-rings cannot be
/// mixed up with the full ring.
fn filter_rule_groups(
    tenant: &str,
    groups: Vec<RuleGroupDesc>,
    ring: &RingSnapshot,
    instance_addr: &str,
) -> Vec<RuleGroupDesc> {
    groups
        .into_iter()
        .filter(|group| {
            match instance_owns_rule_group(ring, group, instance_addr) {
                Ok(true) => {
                    debug!(
                        tenant = %tenant,
                        namespace = %group.namespace,
                        group = %group.name,
                        "rule group owned"
                    );
                    true
                }
                Ok(false) => false,
                Err(err) => {
                    telemetry::record_ring_check_error();
                    error!(
                        tenant = %tenant,
                        namespace = %group.namespace,
                        group = %group.name,
                        error = %err,
                        "failed to check whether this replica owns the rule group"
                    );
                    false
                }
            }
        })
        .collect()
}

/// The ruler: periodically reconciles the local rule manager with the
/// groups this replica owns.
pub struct Ruler {
    cfg: RulerConfig,
    ring: Arc<RingWatcher>,
    store: Arc<dyn RuleStore>,
    manager: Arc<dyn RuleGroupManager>,
    limits: Arc<dyn TenantLimits>,
    allowed: AllowedTenants,
    shutdown: CancellationToken,
}

impl Ruler {
    pub fn new(
        cfg: RulerConfig,
        ring: Arc<RingWatcher>,
        store: Arc<dyn RuleStore>,
        manager: Arc<dyn RuleGroupManager>,
        limits: Arc<dyn TenantLimits>,
    ) -> Self {
        let allowed = AllowedTenants::new(&cfg.enabled_tenants, &cfg.disabled_tenants);
        if let Some(enabled) = &allowed.enabled {
            info!(enabled = ?enabled, "ruler handling enabled tenants only");
        }
        if !allowed.disabled.is_empty() {
            info!(disabled = ?allowed.disabled, "ruler ignoring disabled tenants");
        }

        Self {
            cfg,
            ring,
            store,
            manager,
            limits,
            allowed,
            shutdown: CancellationToken::new(),
        }
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }

    /// Run the sync loop until shutdown. The initial sync waits for this
    /// replica to be active in the ring, so the first ownership decision
    /// already sees our own tokens.
    pub async fn run(&self) -> Result<()> {
        info!("waiting until ruler is ACTIVE in the ring");
        self.wait_until_active().await?;
        info!("ruler is ACTIVE in the ring");

        let poll_period = self.cfg.poll_interval.max(Duration::from_millis(100));
        let ring_period = duration_with_jitter(self.cfg.ring_check_period, 0.2)
            .max(Duration::from_millis(100));
        let mut poll = tokio::time::interval(poll_period);
        let mut ring_tick = tokio::time::interval(ring_period);
        // Both intervals fire immediately once; the initial sync below
        // covers that.
        poll.tick().await;
        ring_tick.tick().await;

        let mut ring_last_state = self.ring.snapshot().member_identities();
        self.sync_rules(SYNC_REASON_INITIAL).await;

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    self.manager.stop();
                    info!("ruler stopped");
                    return Ok(());
                }
                _ = poll.tick() => {
                    self.sync_rules(SYNC_REASON_PERIODIC).await;
                }
                _ = ring_tick.tick() => {
                    let current = self.ring.snapshot().member_identities();
                    if current != ring_last_state {
                        ring_last_state = current;
                        self.sync_rules(SYNC_REASON_RING_CHANGE).await;
                    }
                }
            }
        }
    }

    async fn wait_until_active(&self) -> Result<()> {
        loop {
            if let Some(instance) = self.ring.snapshot().instance(&self.cfg.instance_id) {
                if instance.state == InstanceState::Active {
                    return Ok(());
                }
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => return Err(Error::Cancelled),
                _ = tokio::time::sleep(Duration::from_millis(100)) => {}
            }
        }
    }

    /// One sync pass: list owned groups, load their rules, reconcile the
    /// manager. Errors are logged, not propagated: the next trigger retries.
    pub async fn sync_rules(&self, reason: &'static str) {
        debug!(reason, "syncing rules");
        telemetry::record_sync(reason);

        let mut configs = match self.list_owned_rules().await {
            Ok(configs) => configs,
            Err(err) => {
                error!(error = %err, "unable to list rules");
                return;
            }
        };

        let start = Instant::now();
        if let Err(err) = self.store.load_rule_groups(&mut configs).await {
            error!(error = %err, "unable to load rules owned by this ruler");
            return;
        }
        telemetry::record_load_rule_groups_duration(start.elapsed().as_secs_f64());

        // A tenant missing from the map has its local groups torn down.
        self.manager.sync_rule_groups(configs);
    }

    async fn list_owned_rules(&self) -> Result<HashMap<String, Vec<RuleGroupDesc>>> {
        let start = Instant::now();
        let result = self.list_owned_rules_sharded().await;
        telemetry::record_list_rules_duration(start.elapsed().as_secs_f64());

        let mut result = result?;
        result.retain(|tenant, _| {
            let allowed = self.allowed.is_allowed(tenant);
            if !allowed {
                debug!(tenant = %tenant, "ignoring rule groups for tenant, not allowed");
            }
            allowed
        });
        Ok(result)
    }

    async fn list_owned_rules_sharded(&self) -> Result<HashMap<String, Vec<RuleGroupDesc>>> {
        let tenants = self.store.list_tenants().await?;
        let full_ring = self.ring.snapshot();

        // Resolve each tenant's ring up front: the shuffle-shard sub-ring
        // when the tenant has a shard size, the full ring otherwise. A
        // tenant whose sub-ring does not include this replica is skipped
        // entirely.
        let mut tenant_rings: Vec<(String, RingSnapshot)> = Vec::new();
        for tenant in tenants {
            let shard_size = self.limits.ruler_tenant_shard_size(&tenant);
            if shard_size > 0 {
                let sub_ring = full_ring.shuffle_shard(&tenant, shard_size);
                if sub_ring.has_instance(&self.cfg.instance_id) {
                    tenant_rings.push((tenant, sub_ring));
                }
            } else {
                tenant_rings.push((tenant, (*full_ring).clone()));
            }
        }

        if tenant_rings.is_empty() {
            return Ok(HashMap::new());
        }

        let instance_addr = self.cfg.instance_addr.as_str();
        let listed: Vec<(String, Vec<RuleGroupDesc>)> =
            futures::stream::iter(tenant_rings.into_iter().map(|(tenant, ring)| async move {
                let groups = self
                    .store
                    .list_rule_groups(&tenant, "")
                    .await
                    .map_err(|err| {
                        Error::Internal(format!(
                            "failed to fetch rule groups for tenant {tenant}: {err}"
                        ))
                    })?;
                let filtered = filter_rule_groups(&tenant, groups, &ring, instance_addr);
                Ok::<_, Error>((tenant, filtered))
            }))
            .buffer_unordered(LIST_RULES_CONCURRENCY)
            .try_collect()
            .await?;

        Ok(listed
            .into_iter()
            .filter(|(_, groups)| !groups.is_empty())
            .collect())
    }

    /// Validate a tenant's total rule group count against its limit.
    pub fn assert_max_rule_groups(&self, tenant: &str, groups: usize) -> Result<()> {
        let limit = self.limits.ruler_max_rule_groups_per_tenant(tenant);
        if limit == 0 || groups <= limit {
            return Ok(());
        }
        Err(Error::Config(format!(
            "per-tenant rule groups limit (limit: {limit} actual: {groups}) exceeded"
        )))
    }

    /// Validate a rule group's rule count against the tenant's limit.
    pub fn assert_max_rules_per_rule_group(&self, tenant: &str, rules: usize) -> Result<()> {
        let limit = self.limits.ruler_max_rules_per_rule_group(tenant);
        if limit == 0 || rules <= limit {
            return Ok(());
        }
        Err(Error::Config(format!(
            "per-tenant rules per rule group limit (limit: {limit} actual: {rules}) exceeded"
        )))
    }
}

/// A duration randomized by ±`variance` of itself, so replicas do not check
/// the ring in lockstep.
fn duration_with_jitter(base: Duration, variance: f64) -> Duration {
    if base.is_zero() {
        return base;
    }
    let max_jitter = (base.as_secs_f64() * variance).abs();
    let jitter = rand::thread_rng().gen_range(-max_jitter..=max_jitter);
    Duration::from_secs_f64((base.as_secs_f64() + jitter).max(0.001))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ring::RingDesc;

    #[test]
    fn group_token_is_stable_and_separator_sensitive() {
        let a = token_for_group("tenant", "ns", "group");
        let b = token_for_group("tenant", "ns", "group");
        assert_eq!(a, b);

        // Moving a character across the separator changes the token.
        assert_ne!(
            token_for_group("tenant", "nsx", "group"),
            token_for_group("tenant", "ns", "xgroup")
        );
    }

    #[test]
    fn ownership_follows_the_primary_token_owner() {
        let group = RuleGroupDesc::new("tenant-a", "ns", "g1");
        let token = token_for_group("tenant-a", "ns", "g1");

        // One instance below the token, one at/above it: the one whose
        // token is the first >= group token is primary.
        let desc = RingDesc::default()
            .with_instance(
                "r-1",
                "addr-1",
                vec![token.wrapping_sub(1)],
                InstanceState::Active,
                1000,
            )
            .with_instance("r-2", "addr-2", vec![token], InstanceState::Active, 1000);
        let ring = RingSnapshot::from_desc(&desc, 1000, 60, 1);

        assert!(instance_owns_rule_group(&ring, &group, "addr-2").unwrap());
        assert!(!instance_owns_rule_group(&ring, &group, "addr-1").unwrap());
    }

    #[test]
    fn ownership_check_fails_on_empty_ring() {
        let ring = RingSnapshot::empty(1);
        let group = RuleGroupDesc::new("tenant-a", "ns", "g1");
        assert!(instance_owns_rule_group(&ring, &group, "addr-1").is_err());
    }

    #[test]
    fn filter_drops_unowned_groups() {
        let groups = vec![
            RuleGroupDesc::new("tenant-a", "ns", "g1"),
            RuleGroupDesc::new("tenant-a", "ns", "g2"),
            RuleGroupDesc::new("tenant-a", "ns", "g3"),
        ];

        let desc = RingDesc::default()
            .with_instance("r-1", "addr-1", vec![u32::MAX / 2], InstanceState::Active, 1000)
            .with_instance("r-2", "addr-2", vec![u32::MAX], InstanceState::Active, 1000);
        let ring = RingSnapshot::from_desc(&desc, 1000, 60, 1);

        let mine = filter_rule_groups("tenant-a", groups.clone(), &ring, "addr-1");
        let theirs = filter_rule_groups("tenant-a", groups.clone(), &ring, "addr-2");

        // Every group is owned by exactly one of the two replicas.
        assert_eq!(mine.len() + theirs.len(), groups.len());
        for group in &groups {
            let in_mine = mine.iter().any(|g| g.name == group.name);
            let in_theirs = theirs.iter().any(|g| g.name == group.name);
            assert!(in_mine ^ in_theirs);
        }
    }

    #[test]
    fn allowed_tenants_gate() {
        let allowed = AllowedTenants::new(&[], &["blocked".to_string()]);
        assert!(allowed.is_allowed("anyone"));
        assert!(!allowed.is_allowed("blocked"));

        let allow_list = AllowedTenants::new(&["vip".to_string()], &[]);
        assert!(allow_list.is_allowed("vip"));
        assert!(!allow_list.is_allowed("anyone"));

        // Disabled wins over enabled.
        let both = AllowedTenants::new(&["t".to_string()], &["t".to_string()]);
        assert!(!both.is_allowed("t"));
    }

    #[test]
    fn jitter_stays_within_bounds() {
        let base = Duration::from_secs(5);
        for _ in 0..100 {
            let jittered = duration_with_jitter(base, 0.2);
            assert!(jittered >= Duration::from_secs(4));
            assert!(jittered <= Duration::from_secs(6));
        }
    }
}
