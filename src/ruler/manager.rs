//! Local rule evaluation manager seam
//!
//! The ruler decides which groups this replica owns; the manager runs them.
//! Evaluation itself (query execution, sample writing, alert firing) lives
//! behind this trait. Reconciliation is whole-state: each sync hands the
//! manager the complete owned set, and the manager tears down whatever is
//! no longer in it.

use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::{debug, info};

use super::store::RuleGroupDesc;

/// Key identifying one active rule group.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct GroupKey {
    pub tenant: String,
    pub namespace: String,
    pub name: String,
}

impl GroupKey {
    pub fn of(group: &RuleGroupDesc) -> Self {
        Self {
            tenant: group.tenant.clone(),
            namespace: group.namespace.clone(),
            name: group.name.clone(),
        }
    }
}

/// Tenant-aware manager of running rule groups.
pub trait RuleGroupManager: Send + Sync {
    /// Reconcile the running set against `groups`: start what is new, stop
    /// what disappeared. A tenant absent from the map loses all its
    /// groups.
    fn sync_rule_groups(&self, groups: HashMap<String, Vec<RuleGroupDesc>>);

    /// Keys of all currently running groups.
    fn active_groups(&self) -> Vec<GroupKey>;

    /// Stop everything.
    fn stop(&self);
}

/// Default manager keeping the owned groups as local state.
///
/// Groups are started lazily at first sync and torn down when they leave
/// the owned set. Useful on its own for tests and as the reconciliation
/// core an evaluating manager wraps.
#[derive(Debug, Default)]
pub struct LocalRuleManager {
    active: RwLock<HashMap<GroupKey, RuleGroupDesc>>,
}

impl LocalRuleManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, key: &GroupKey) -> Option<RuleGroupDesc> {
        self.active.read().get(key).cloned()
    }
}

impl RuleGroupManager for LocalRuleManager {
    fn sync_rule_groups(&self, groups: HashMap<String, Vec<RuleGroupDesc>>) {
        let mut active = self.active.write();

        let incoming: HashMap<GroupKey, RuleGroupDesc> = groups
            .into_values()
            .flatten()
            .map(|g| (GroupKey::of(&g), g))
            .collect();

        let stopped: Vec<GroupKey> = active
            .keys()
            .filter(|key| !incoming.contains_key(key))
            .cloned()
            .collect();
        for key in &stopped {
            debug!(
                tenant = %key.tenant,
                namespace = %key.namespace,
                group = %key.name,
                "stopping rule group no longer owned"
            );
            active.remove(key);
        }

        let mut started = 0usize;
        for (key, group) in incoming {
            if !active.contains_key(&key) {
                debug!(
                    tenant = %key.tenant,
                    namespace = %key.namespace,
                    group = %key.name,
                    "starting newly owned rule group"
                );
                started += 1;
            }
            active.insert(key, group);
        }

        info!(
            active = active.len(),
            started,
            stopped = stopped.len(),
            "reconciled rule groups"
        );
    }

    fn active_groups(&self) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = self.active.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    fn stop(&self) {
        let mut active = self.active.write();
        info!(stopped = active.len(), "stopping all rule groups");
        active.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn groups_map(groups: &[(&str, &str, &str)]) -> HashMap<String, Vec<RuleGroupDesc>> {
        let mut map: HashMap<String, Vec<RuleGroupDesc>> = HashMap::new();
        for (tenant, namespace, name) in groups {
            map.entry(tenant.to_string())
                .or_default()
                .push(RuleGroupDesc::new(*tenant, *namespace, *name));
        }
        map
    }

    #[test]
    fn sync_starts_new_and_stops_removed_groups() {
        let manager = LocalRuleManager::new();

        manager.sync_rule_groups(groups_map(&[
            ("tenant-a", "ns", "g1"),
            ("tenant-a", "ns", "g2"),
        ]));
        assert_eq!(manager.active_groups().len(), 2);

        manager.sync_rule_groups(groups_map(&[
            ("tenant-a", "ns", "g2"),
            ("tenant-b", "ns", "g3"),
        ]));
        let keys = manager.active_groups();
        assert_eq!(keys.len(), 2);
        assert!(keys.iter().any(|k| k.tenant == "tenant-b" && k.name == "g3"));
        assert!(!keys.iter().any(|k| k.name == "g1"));
    }

    #[test]
    fn missing_tenant_loses_all_groups() {
        let manager = LocalRuleManager::new();
        manager.sync_rule_groups(groups_map(&[("tenant-a", "ns", "g1")]));
        manager.sync_rule_groups(HashMap::new());
        assert!(manager.active_groups().is_empty());
    }

    #[test]
    fn stop_clears_everything() {
        let manager = LocalRuleManager::new();
        manager.sync_rule_groups(groups_map(&[("tenant-a", "ns", "g1")]));
        manager.stop();
        assert!(manager.active_groups().is_empty());
    }
}
