//! Integration tests of the ruler ownership loop over an in-memory ring
//! and rule store.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;

use strata::limits::{LimitsConfig, Overrides};
use strata::ring::{InMemoryKvStore, InstanceState, RingConfig, RingDesc, RingKvStore, RingWatcher};
use strata::ruler::{
    InMemoryRuleStore, LocalRuleManager, RuleGroupDesc, RuleGroupManager, Ruler, RulerConfig,
    SYNC_REASON_INITIAL, SYNC_REASON_PERIODIC,
};

async fn ring_watcher(kv: Arc<InMemoryKvStore>) -> Arc<RingWatcher> {
    let watcher = Arc::new(RingWatcher::new(
        RingConfig::new("ruler")
            .with_replication_factor(1)
            .with_poll_interval(Duration::from_millis(50)),
        kv,
    ));
    watcher.refresh_once().await.unwrap();
    watcher
}

fn two_ruler_ring(now: i64) -> RingDesc {
    RingDesc::default()
        .with_instance("ruler-1", "addr-1", vec![u32::MAX / 2], InstanceState::Active, now)
        .with_instance("ruler-2", "addr-2", vec![u32::MAX], InstanceState::Active, now)
}

fn groups_for(tenant: &str, count: usize) -> Vec<RuleGroupDesc> {
    (0..count)
        .map(|i| RuleGroupDesc::new(tenant, "ns", format!("group-{i}")))
        .collect()
}

fn build_ruler(
    instance_id: &str,
    instance_addr: &str,
    ring: Arc<RingWatcher>,
    store: Arc<InMemoryRuleStore>,
    manager: Arc<LocalRuleManager>,
    limits: Overrides,
) -> Ruler {
    Ruler::new(
        RulerConfig::new(instance_id, instance_addr),
        ring,
        store,
        manager,
        Arc::new(limits),
    )
}

#[tokio::test]
async fn every_group_is_owned_by_exactly_one_replica() {
    let kv = Arc::new(InMemoryKvStore::new());
    kv.put("ruler", &two_ruler_ring(Utc::now().timestamp()))
        .await
        .unwrap();

    let store = Arc::new(InMemoryRuleStore::new());
    store.set_rule_groups("tenant-a", groups_for("tenant-a", 16));

    let manager_1 = Arc::new(LocalRuleManager::new());
    let manager_2 = Arc::new(LocalRuleManager::new());

    let ruler_1 = build_ruler(
        "ruler-1",
        "addr-1",
        ring_watcher(Arc::clone(&kv)).await,
        store.clone(),
        Arc::clone(&manager_1),
        Overrides::new(LimitsConfig::default()),
    );
    let ruler_2 = build_ruler(
        "ruler-2",
        "addr-2",
        ring_watcher(Arc::clone(&kv)).await,
        store.clone(),
        Arc::clone(&manager_2),
        Overrides::new(LimitsConfig::default()),
    );

    ruler_1.sync_rules(SYNC_REASON_INITIAL).await;
    ruler_2.sync_rules(SYNC_REASON_INITIAL).await;

    let mine = manager_1.active_groups();
    let theirs = manager_2.active_groups();

    assert_eq!(mine.len() + theirs.len(), 16);
    for key in &mine {
        assert!(!theirs.contains(key), "group {key:?} active on both replicas");
    }
    // With 16 groups and two replicas the split should touch both.
    assert!(!mine.is_empty());
    assert!(!theirs.is_empty());
}

#[tokio::test]
async fn groups_move_when_the_ring_changes() {
    let kv = Arc::new(InMemoryKvStore::new());
    let now = Utc::now().timestamp();
    kv.put("ruler", &two_ruler_ring(now)).await.unwrap();

    let store = Arc::new(InMemoryRuleStore::new());
    store.set_rule_groups("tenant-a", groups_for("tenant-a", 16));

    let manager = Arc::new(LocalRuleManager::new());
    let ring = ring_watcher(Arc::clone(&kv)).await;
    let ruler = build_ruler(
        "ruler-1",
        "addr-1",
        Arc::clone(&ring),
        store.clone(),
        manager.clone(),
        Overrides::new(LimitsConfig::default()),
    );

    ruler.sync_rules(SYNC_REASON_INITIAL).await;
    let before = manager.active_groups().len();
    assert!(before < 16, "one replica of two should not own everything");

    // The other replica leaves the ring: this replica inherits everything.
    let only_me = RingDesc::default().with_instance(
        "ruler-1",
        "addr-1",
        vec![u32::MAX / 2],
        InstanceState::Active,
        Utc::now().timestamp(),
    );
    kv.put("ruler", &only_me).await.unwrap();
    ring.refresh_once().await.unwrap();

    ruler.sync_rules(SYNC_REASON_PERIODIC).await;
    assert_eq!(manager.active_groups().len(), 16);
}

#[tokio::test]
async fn unowned_tenant_groups_are_torn_down() {
    let kv = Arc::new(InMemoryKvStore::new());
    kv.put("ruler", &two_ruler_ring(Utc::now().timestamp()))
        .await
        .unwrap();

    let store = Arc::new(InMemoryRuleStore::new());
    store.set_rule_groups("tenant-a", groups_for("tenant-a", 8));

    let manager = Arc::new(LocalRuleManager::new());
    let ruler = build_ruler(
        "ruler-1",
        "addr-1",
        ring_watcher(Arc::clone(&kv)).await,
        store.clone(),
        manager.clone(),
        Overrides::new(LimitsConfig::default()),
    );

    ruler.sync_rules(SYNC_REASON_INITIAL).await;
    assert!(!manager.active_groups().is_empty());

    // All groups deleted from the store: the next sync stops everything.
    store.delete_tenant("tenant-a");
    ruler.sync_rules(SYNC_REASON_PERIODIC).await;
    assert!(manager.active_groups().is_empty());
}

#[tokio::test]
async fn shuffle_shard_restricts_tenants_to_their_sub_ring() {
    let kv = Arc::new(InMemoryKvStore::new());
    let now = Utc::now().timestamp();

    // Four rulers; the tenant's shard size is one, so exactly one of them
    // may own any of the tenant's groups.
    let mut desc = RingDesc::default();
    for i in 0..4u32 {
        desc = desc.with_instance(
            format!("ruler-{i}"),
            format!("addr-{i}"),
            vec![(u32::MAX / 4).saturating_mul(i + 1)],
            InstanceState::Active,
            now,
        );
    }
    kv.put("ruler", &desc).await.unwrap();

    let store = Arc::new(InMemoryRuleStore::new());
    store.set_rule_groups("tenant-a", groups_for("tenant-a", 8));

    let limits = Overrides::new(LimitsConfig {
        ruler_tenant_shard_size: 1,
        ..Default::default()
    });

    let mut owners = 0;
    let mut total_owned = 0;
    for i in 0..4u32 {
        let manager = Arc::new(LocalRuleManager::new());
        let ruler = build_ruler(
            &format!("ruler-{i}"),
            &format!("addr-{i}"),
            ring_watcher(Arc::clone(&kv)).await,
            store.clone(),
            manager.clone(),
            limits.clone(),
        );
        ruler.sync_rules(SYNC_REASON_INITIAL).await;

        let owned = manager.active_groups().len();
        if owned > 0 {
            owners += 1;
        }
        total_owned += owned;
    }

    assert_eq!(owners, 1, "sub-ring of size one must pin all groups to one replica");
    assert_eq!(total_owned, 8);
}

#[tokio::test]
async fn disabled_tenants_are_skipped() {
    let kv = Arc::new(InMemoryKvStore::new());
    let now = Utc::now().timestamp();
    let desc = RingDesc::default().with_instance(
        "ruler-1",
        "addr-1",
        vec![u32::MAX / 2],
        InstanceState::Active,
        now,
    );
    kv.put("ruler", &desc).await.unwrap();

    let store = Arc::new(InMemoryRuleStore::new());
    store.set_rule_groups("tenant-a", groups_for("tenant-a", 2));
    store.set_rule_groups("tenant-b", groups_for("tenant-b", 2));

    let manager = Arc::new(LocalRuleManager::new());
    let mut cfg = RulerConfig::new("ruler-1", "addr-1");
    cfg.disabled_tenants = vec!["tenant-b".to_string()];

    let ruler = Ruler::new(
        cfg,
        ring_watcher(Arc::clone(&kv)).await,
        store.clone(),
        manager.clone(),
        Arc::new(Overrides::new(LimitsConfig::default())),
    );

    ruler.sync_rules(SYNC_REASON_INITIAL).await;
    let keys = manager.active_groups();
    assert_eq!(keys.len(), 2);
    assert!(keys.iter().all(|k| k.tenant == "tenant-a"));
}

#[tokio::test]
async fn run_loop_performs_initial_sync_and_stops_cleanly() {
    let kv = Arc::new(InMemoryKvStore::new());
    let now = Utc::now().timestamp();
    let desc = RingDesc::default().with_instance(
        "ruler-1",
        "addr-1",
        vec![u32::MAX / 2],
        InstanceState::Active,
        now,
    );
    kv.put("ruler", &desc).await.unwrap();

    let store = Arc::new(InMemoryRuleStore::new());
    store.set_rule_groups("tenant-a", groups_for("tenant-a", 4));

    let manager = Arc::new(LocalRuleManager::new());
    let ruler = Arc::new(build_ruler(
        "ruler-1",
        "addr-1",
        ring_watcher(Arc::clone(&kv)).await,
        store.clone(),
        manager.clone(),
        Overrides::new(LimitsConfig::default()),
    ));

    let run_handle = {
        let ruler = Arc::clone(&ruler);
        tokio::spawn(async move { ruler.run().await })
    };

    // Wait for the initial sync to land.
    for _ in 0..100 {
        if manager.active_groups().len() == 4 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(manager.active_groups().len(), 4);

    ruler.shutdown();
    run_handle.await.unwrap().unwrap();
    // Shutdown tears the local state down.
    assert!(manager.active_groups().is_empty());
}

#[tokio::test]
async fn rule_group_limits_are_enforced() {
    let kv = Arc::new(InMemoryKvStore::new());
    let desc = RingDesc::default().with_instance(
        "ruler-1",
        "addr-1",
        vec![1],
        InstanceState::Active,
        Utc::now().timestamp(),
    );
    kv.put("ruler", &desc).await.unwrap();

    let limits = Overrides::new(LimitsConfig {
        ruler_max_rule_groups_per_tenant: 2,
        ruler_max_rules_per_rule_group: 3,
        ..Default::default()
    });
    let ruler = build_ruler(
        "ruler-1",
        "addr-1",
        ring_watcher(kv).await,
        Arc::new(InMemoryRuleStore::new()),
        Arc::new(LocalRuleManager::new()),
        limits,
    );

    assert!(ruler.assert_max_rule_groups("tenant-a", 2).is_ok());
    assert!(ruler.assert_max_rule_groups("tenant-a", 3).is_err());
    assert!(ruler.assert_max_rules_per_rule_group("tenant-a", 3).is_ok());
    assert!(ruler.assert_max_rules_per_rule_group("tenant-a", 4).is_err());
}
