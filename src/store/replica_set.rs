//! Replica selection for block sets
//!
//! Maps the blocks of one query attempt to the store-gateway replicas that
//! should serve them, honoring the exclusion map built from prior attempts.
//! Assignments are grouped per replica to keep the RPC count low.

use rand::Rng;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::debug;

use super::{StoreClientPool, StoreGatewayClient};
use crate::block::BlockId;
use crate::limits::TenantLimits;
use crate::ring::RingWatcher;
use crate::{Error, Result};

/// How to pick one replica among the eligible ones for a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BalancingStrategy {
    /// Spread load by picking uniformly at random
    #[default]
    Random,
    /// Pick the lexicographically smallest address; reproducible, used by
    /// tests
    ByAddress,
}

/// One replica and the blocks it was assigned for an attempt.
pub struct ClientAssignment {
    pub client: Arc<dyn StoreGatewayClient>,
    pub blocks: Vec<BlockId>,
}

impl std::fmt::Debug for ClientAssignment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientAssignment")
            .field("client", &self.client.remote_address())
            .field("blocks", &self.blocks)
            .finish()
    }
}

/// Selects store-gateway replicas for block sets via the ring.
pub struct StoreSet {
    ring: Arc<RingWatcher>,
    pool: StoreClientPool,
    limits: Arc<dyn TenantLimits>,
    balancing: BalancingStrategy,
}

impl StoreSet {
    pub fn new(
        ring: Arc<RingWatcher>,
        pool: StoreClientPool,
        limits: Arc<dyn TenantLimits>,
        balancing: BalancingStrategy,
    ) -> Self {
        Self {
            ring,
            pool,
            limits,
            balancing,
        }
    }

    /// Map `block_ids` to the replicas that should serve them.
    ///
    /// `exclude` lists, per block, the replica addresses already attempted;
    /// those never get the block again. Fails with
    /// [`Error::NoReplicasForBlocks`] when any block has no eligible
    /// replica left.
    pub async fn clients_for(
        &self,
        tenant: &str,
        block_ids: &[BlockId],
        exclude: &HashMap<BlockId, Vec<String>>,
    ) -> Result<Vec<ClientAssignment>> {
        let snapshot = self.ring.snapshot();
        let shard_size = self.limits.store_gateway_tenant_shard_size(tenant);
        let snapshot = if shard_size > 0 {
            snapshot.shuffle_shard(tenant, shard_size)
        } else {
            (*snapshot).clone()
        };

        let mut by_addr: BTreeMap<String, Vec<BlockId>> = BTreeMap::new();
        let mut uncovered: Vec<BlockId> = Vec::new();

        for &block_id in block_ids {
            let replicas = snapshot.get(block_id.ring_token());
            let excluded = exclude.get(&block_id);

            let eligible: Vec<&str> = replicas
                .iter()
                .map(|inst| inst.addr.as_str())
                .filter(|addr| !excluded.is_some_and(|ex| ex.iter().any(|e| e == addr)))
                .collect();

            if eligible.is_empty() {
                uncovered.push(block_id);
                continue;
            }

            let chosen = match self.balancing {
                BalancingStrategy::Random => {
                    eligible[rand::thread_rng().gen_range(0..eligible.len())]
                }
                BalancingStrategy::ByAddress => eligible.iter().min().copied().unwrap_or_default(),
            };

            by_addr.entry(chosen.to_string()).or_default().push(block_id);
        }

        if !uncovered.is_empty() {
            return Err(Error::NoReplicasForBlocks {
                block_ids: uncovered,
            });
        }

        let mut assignments = Vec::with_capacity(by_addr.len());
        for (addr, blocks) in by_addr {
            let client = self.pool.get(&addr).await?;
            assignments.push(ClientAssignment { client, blocks });
        }

        debug!(
            tenant = %tenant,
            replicas = assignments.len(),
            blocks = block_ids.len(),
            "selected store-gateway replicas"
        );
        Ok(assignments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limits::{LimitsConfig, Overrides};
    use crate::ring::{InMemoryKvStore, InstanceState, RingConfig, RingDesc, RingKvStore, RingWatcher};
    use crate::store::{
        LabelNamesRequest, LabelNamesResponse, LabelValuesRequest, LabelValuesResponse,
        SeriesRequest, SeriesStream,
    };
    use async_trait::async_trait;
    use chrono::Utc;

    struct FakeClient {
        addr: String,
    }

    #[async_trait]
    impl StoreGatewayClient for FakeClient {
        fn remote_address(&self) -> &str {
            &self.addr
        }

        async fn series(&self, _tenant: &str, _req: SeriesRequest) -> crate::Result<SeriesStream> {
            Ok(Box::pin(futures::stream::empty()))
        }

        async fn label_names(
            &self,
            _tenant: &str,
            _req: LabelNamesRequest,
        ) -> crate::Result<LabelNamesResponse> {
            Ok(LabelNamesResponse::default())
        }

        async fn label_values(
            &self,
            _tenant: &str,
            _req: LabelValuesRequest,
        ) -> crate::Result<LabelValuesResponse> {
            Ok(LabelValuesResponse::default())
        }
    }

    struct FakeFactory;

    #[async_trait]
    impl crate::store::StoreClientFactory for FakeFactory {
        async fn new_client(&self, addr: &str) -> crate::Result<Arc<dyn StoreGatewayClient>> {
            Ok(Arc::new(FakeClient {
                addr: addr.to_string(),
            }))
        }
    }

    async fn store_set_with_ring(desc: RingDesc, rf: usize) -> StoreSet {
        let kv = Arc::new(InMemoryKvStore::new());
        kv.put("store-gateway", &desc).await.unwrap();
        let ring = Arc::new(RingWatcher::new(
            RingConfig::new("store-gateway").with_replication_factor(rf),
            kv,
        ));
        ring.refresh_once().await.unwrap();

        StoreSet::new(
            ring,
            StoreClientPool::new(Arc::new(FakeFactory)),
            Arc::new(Overrides::new(LimitsConfig::default())),
            BalancingStrategy::ByAddress,
        )
    }

    fn two_instance_ring() -> RingDesc {
        let now = Utc::now().timestamp();
        RingDesc::default()
            .with_instance("sg-1", "addr-1", vec![0x4000_0000], InstanceState::Active, now)
            .with_instance("sg-2", "addr-2", vec![0xc000_0000], InstanceState::Active, now)
    }

    #[tokio::test]
    async fn assigns_every_block_to_one_replica() {
        let stores = store_set_with_ring(two_instance_ring(), 2).await;
        let blocks: Vec<BlockId> = (1..=4).map(BlockId::from_u128).collect();

        let assignments = stores
            .clients_for("tenant-a", &blocks, &HashMap::new())
            .await
            .unwrap();

        let assigned: usize = assignments.iter().map(|a| a.blocks.len()).sum();
        assert_eq!(assigned, blocks.len());

        // No block appears under two replicas.
        let mut seen = std::collections::HashSet::new();
        for a in &assignments {
            for b in &a.blocks {
                assert!(seen.insert(*b), "block {b} assigned twice");
            }
        }
    }

    #[tokio::test]
    async fn exclusion_moves_blocks_to_other_replicas() {
        let stores = store_set_with_ring(two_instance_ring(), 2).await;
        let block = BlockId::from_u128(42);

        let first = stores
            .clients_for("tenant-a", &[block], &HashMap::new())
            .await
            .unwrap();
        let first_addr = first[0].client.remote_address().to_string();

        let exclude = HashMap::from([(block, vec![first_addr.clone()])]);
        let second = stores
            .clients_for("tenant-a", &[block], &exclude)
            .await
            .unwrap();

        assert_ne!(second[0].client.remote_address(), first_addr);
    }

    #[tokio::test]
    async fn exhausted_replicas_fail_naming_the_blocks() {
        let stores = store_set_with_ring(two_instance_ring(), 2).await;
        let block = BlockId::from_u128(42);

        let exclude = HashMap::from([(
            block,
            vec!["addr-1".to_string(), "addr-2".to_string()],
        )]);
        let err = stores
            .clients_for("tenant-a", &[block], &exclude)
            .await
            .unwrap_err();

        match err {
            Error::NoReplicasForBlocks { block_ids } => assert_eq!(block_ids, vec![block]),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn by_address_balancing_is_reproducible() {
        let stores = store_set_with_ring(two_instance_ring(), 2).await;
        let blocks: Vec<BlockId> = (1..=8).map(BlockId::from_u128).collect();

        let a = stores
            .clients_for("tenant-a", &blocks, &HashMap::new())
            .await
            .unwrap();
        let b = stores
            .clients_for("tenant-a", &blocks, &HashMap::new())
            .await
            .unwrap();

        let addrs =
            |v: &[ClientAssignment]| -> Vec<String> {
                v.iter()
                    .map(|a| a.client.remote_address().to_string())
                    .collect()
            };
        assert_eq!(addrs(&a), addrs(&b));
        let blocks_of = |v: &[ClientAssignment]| -> Vec<Vec<BlockId>> {
            v.iter().map(|a| a.blocks.clone()).collect()
        };
        assert_eq!(blocks_of(&a), blocks_of(&b));
    }
}
