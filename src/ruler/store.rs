//! Rule storage abstraction
//!
//! Rule groups live in an external store, keyed by tenant and namespace.
//! Listing returns lightweight descriptors; rule bodies are loaded in a
//! second phase only for the groups this replica owns.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::Result;

/// One rule inside a group. Either a recording rule (`record`) or an
/// alerting rule (`alert`).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleDesc {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alert: Option<String>,
    pub expr: String,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
}

/// A rule group identity plus its rules. Ownership hashes only the
/// `(tenant, namespace, name)` triple.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleGroupDesc {
    pub tenant: String,
    pub namespace: String,
    pub name: String,
    /// Evaluation interval in seconds; zero means the manager default
    #[serde(default)]
    pub interval_secs: u64,
    /// Empty until loaded through `load_rule_groups`
    #[serde(default)]
    pub rules: Vec<RuleDesc>,
}

impl RuleGroupDesc {
    pub fn new(
        tenant: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            tenant: tenant.into(),
            namespace: namespace.into(),
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Storage backend for rule groups.
#[async_trait]
pub trait RuleStore: Send + Sync {
    /// All tenants with at least one rule group.
    async fn list_tenants(&self) -> Result<Vec<String>>;

    /// Descriptors of a tenant's rule groups; an empty namespace matches
    /// all namespaces. Rule bodies may be omitted.
    async fn list_rule_groups(&self, tenant: &str, namespace: &str)
        -> Result<Vec<RuleGroupDesc>>;

    /// Fill in the rule bodies of the given descriptors, in place.
    async fn load_rule_groups(
        &self,
        groups: &mut HashMap<String, Vec<RuleGroupDesc>>,
    ) -> Result<()>;
}

/// In-memory rule store for development and tests.
#[derive(Debug, Default)]
pub struct InMemoryRuleStore {
    groups: RwLock<HashMap<String, Vec<RuleGroupDesc>>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all rule groups of a tenant.
    pub fn set_rule_groups(&self, tenant: impl Into<String>, groups: Vec<RuleGroupDesc>) {
        self.groups.write().insert(tenant.into(), groups);
    }

    pub fn delete_tenant(&self, tenant: &str) {
        self.groups.write().remove(tenant);
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn list_tenants(&self) -> Result<Vec<String>> {
        let mut tenants: Vec<String> = self.groups.read().keys().cloned().collect();
        tenants.sort();
        Ok(tenants)
    }

    async fn list_rule_groups(
        &self,
        tenant: &str,
        namespace: &str,
    ) -> Result<Vec<RuleGroupDesc>> {
        let groups = self.groups.read();
        let Some(tenant_groups) = groups.get(tenant) else {
            return Ok(Vec::new());
        };

        // Listing strips rule bodies; they come back via load_rule_groups.
        Ok(tenant_groups
            .iter()
            .filter(|g| namespace.is_empty() || g.namespace == namespace)
            .map(|g| RuleGroupDesc {
                rules: Vec::new(),
                ..g.clone()
            })
            .collect())
    }

    async fn load_rule_groups(
        &self,
        groups: &mut HashMap<String, Vec<RuleGroupDesc>>,
    ) -> Result<()> {
        let stored = self.groups.read();
        for (tenant, descs) in groups.iter_mut() {
            let Some(tenant_groups) = stored.get(tenant) else {
                continue;
            };
            for desc in descs.iter_mut() {
                if let Some(full) = tenant_groups
                    .iter()
                    .find(|g| g.namespace == desc.namespace && g.name == desc.name)
                {
                    desc.rules = full.rules.clone();
                    desc.interval_secs = full.interval_secs;
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group_with_rule(tenant: &str, namespace: &str, name: &str) -> RuleGroupDesc {
        let mut group = RuleGroupDesc::new(tenant, namespace, name);
        group.rules = vec![RuleDesc {
            record: Some("job:up:sum".to_string()),
            expr: "sum by (job) (up)".to_string(),
            ..Default::default()
        }];
        group
    }

    #[tokio::test]
    async fn listing_strips_rules_and_loading_restores_them() {
        let store = InMemoryRuleStore::new();
        store.set_rule_groups(
            "tenant-a",
            vec![group_with_rule("tenant-a", "ns1", "g1")],
        );

        let listed = store.list_rule_groups("tenant-a", "").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(listed[0].rules.is_empty());

        let mut owned = HashMap::from([("tenant-a".to_string(), listed)]);
        store.load_rule_groups(&mut owned).await.unwrap();
        assert_eq!(owned["tenant-a"][0].rules.len(), 1);
    }

    #[tokio::test]
    async fn namespace_filter_applies() {
        let store = InMemoryRuleStore::new();
        store.set_rule_groups(
            "tenant-a",
            vec![
                group_with_rule("tenant-a", "ns1", "g1"),
                group_with_rule("tenant-a", "ns2", "g2"),
            ],
        );

        let ns1 = store.list_rule_groups("tenant-a", "ns1").await.unwrap();
        assert_eq!(ns1.len(), 1);
        assert_eq!(ns1[0].name, "g1");
    }
}
