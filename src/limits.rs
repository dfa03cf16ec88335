//! Per-tenant limits read by the query and rule paths
//!
//! The engine never hard-codes tenant quotas: everything is resolved through
//! the [`TenantLimits`] trait so deployments can plug in runtime-reloadable
//! overrides. [`Overrides`] is the standard implementation backed by a
//! default set plus per-tenant exceptions.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Read surface for tenant limits. A value of zero always means "disabled".
pub trait TenantLimits: Send + Sync {
    /// Maximum time range of a label names/values query. The range is
    /// clamped, not rejected.
    fn max_labels_query_length(&self, tenant: &str) -> Duration;

    /// Maximum number of chunks a single query may fetch from
    /// store-gateways, across all retry attempts.
    fn max_chunks_per_query(&self, tenant: &str) -> u64;

    /// Maximum number of distinct series a single query may fetch.
    fn max_fetched_series_per_query(&self, tenant: &str) -> u64;

    /// Maximum total chunk bytes a single query may fetch.
    fn max_fetched_chunk_bytes_per_query(&self, tenant: &str) -> u64;

    /// Shuffle-shard size of the tenant on the store-gateway ring. Zero
    /// means the tenant uses the full ring.
    fn store_gateway_tenant_shard_size(&self, tenant: &str) -> usize;

    /// Shuffle-shard size of the tenant on the ruler ring. Zero means the
    /// tenant's rule groups are sharded across all rulers.
    fn ruler_tenant_shard_size(&self, tenant: &str) -> usize;

    /// Maximum number of rule groups per tenant.
    fn ruler_max_rule_groups_per_tenant(&self, tenant: &str) -> usize;

    /// Maximum number of rules per rule group.
    fn ruler_max_rules_per_rule_group(&self, tenant: &str) -> usize;
}

/// One set of limit values, used both as defaults and as per-tenant
/// exceptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum label query length in seconds (0 = disabled)
    pub max_labels_query_length_secs: u64,
    pub max_chunks_per_query: u64,
    pub max_fetched_series_per_query: u64,
    pub max_fetched_chunk_bytes_per_query: u64,
    pub store_gateway_tenant_shard_size: usize,
    pub ruler_tenant_shard_size: usize,
    pub ruler_max_rule_groups_per_tenant: usize,
    pub ruler_max_rules_per_rule_group: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_labels_query_length_secs: 0,
            max_chunks_per_query: 2_000_000,
            max_fetched_series_per_query: 0,
            max_fetched_chunk_bytes_per_query: 0,
            store_gateway_tenant_shard_size: 0,
            ruler_tenant_shard_size: 0,
            ruler_max_rule_groups_per_tenant: 70,
            ruler_max_rules_per_rule_group: 20,
        }
    }
}

/// [`TenantLimits`] provider combining defaults with per-tenant overrides.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    defaults: LimitsConfig,
    tenants: HashMap<String, LimitsConfig>,
}

impl Overrides {
    pub fn new(defaults: LimitsConfig) -> Self {
        Self {
            defaults,
            tenants: HashMap::new(),
        }
    }

    pub fn with_tenant(mut self, tenant: impl Into<String>, limits: LimitsConfig) -> Self {
        self.tenants.insert(tenant.into(), limits);
        self
    }

    fn for_tenant(&self, tenant: &str) -> &LimitsConfig {
        self.tenants.get(tenant).unwrap_or(&self.defaults)
    }
}

impl TenantLimits for Overrides {
    fn max_labels_query_length(&self, tenant: &str) -> Duration {
        Duration::from_secs(self.for_tenant(tenant).max_labels_query_length_secs)
    }

    fn max_chunks_per_query(&self, tenant: &str) -> u64 {
        self.for_tenant(tenant).max_chunks_per_query
    }

    fn max_fetched_series_per_query(&self, tenant: &str) -> u64 {
        self.for_tenant(tenant).max_fetched_series_per_query
    }

    fn max_fetched_chunk_bytes_per_query(&self, tenant: &str) -> u64 {
        self.for_tenant(tenant).max_fetched_chunk_bytes_per_query
    }

    fn store_gateway_tenant_shard_size(&self, tenant: &str) -> usize {
        self.for_tenant(tenant).store_gateway_tenant_shard_size
    }

    fn ruler_tenant_shard_size(&self, tenant: &str) -> usize {
        self.for_tenant(tenant).ruler_tenant_shard_size
    }

    fn ruler_max_rule_groups_per_tenant(&self, tenant: &str) -> usize {
        self.for_tenant(tenant).ruler_max_rule_groups_per_tenant
    }

    fn ruler_max_rules_per_rule_group(&self, tenant: &str) -> usize {
        self.for_tenant(tenant).ruler_max_rules_per_rule_group
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_tenant_override_wins_over_defaults() {
        let overrides = Overrides::new(LimitsConfig {
            max_chunks_per_query: 1000,
            ..Default::default()
        })
        .with_tenant(
            "tenant-a",
            LimitsConfig {
                max_chunks_per_query: 5,
                ..Default::default()
            },
        );

        assert_eq!(overrides.max_chunks_per_query("tenant-a"), 5);
        assert_eq!(overrides.max_chunks_per_query("tenant-b"), 1000);
    }
}
