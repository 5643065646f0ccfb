use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use capacity_core::models::{NodeHealth, QueryKind, SelectionPolicy};
use capacity_core::CapacityError;
use capacity_router::{NodeHealthEvent, NodeRouter, WeightedStrategy};
use capacity_testing_utils::{router_config, MockQueryExecutor, ScriptedNodeProbe};
use tokio::sync::broadcast;

fn router(replicas: usize, policy: SelectionPolicy) -> NodeRouter {
    NodeRouter::new(router_config(replicas, policy))
}

#[test]
fn test_write_always_targets_primary() {
    let router = router(3, SelectionPolicy::RoundRobin);
    for _ in 0..10 {
        assert_eq!(router.select_node(QueryKind::Write).node().id, "primary");
    }

    for id in ["replica-1", "replica-2", "replica-3"] {
        for _ in 0..3 {
            router.record_outcome(id, 5.0, false).unwrap();
        }
    }
    let selection = router.select_node(QueryKind::Write);
    assert_eq!(selection.node().id, "primary");
    assert!(!selection.degraded);
}

#[test]
fn test_round_robin_visits_each_replica_once() {
    let router = router(4, SelectionPolicy::RoundRobin);
    let visited: HashSet<String> = (0..4)
        .map(|_| router.select_node(QueryKind::Read).node().id.clone())
        .collect();
    assert_eq!(visited.len(), 4);
    assert!(!visited.contains("primary"));
}

#[test]
fn test_read_falls_back_to_primary_when_all_replicas_unhealthy() {
    let router = router(2, SelectionPolicy::LeastConnections);
    for id in ["replica-1", "replica-2"] {
        for _ in 0..3 {
            router.record_outcome(id, 5.0, false).unwrap();
        }
    }

    let selection = router.select_node(QueryKind::Read);
    assert_eq!(selection.node().id, "primary");
    assert!(selection.degraded);
}

#[test]
fn test_primary_only_reads_are_not_degraded() {
    let router = router(0, SelectionPolicy::RoundRobin);
    let selection = router.select_node(QueryKind::Read);
    assert_eq!(selection.node().id, "primary");
    assert!(!selection.degraded);
}

#[test]
fn test_unhealthy_replica_excluded_from_reads() {
    let router = router(2, SelectionPolicy::RoundRobin);
    for _ in 0..3 {
        router.record_outcome("replica-1", 5.0, false).unwrap();
    }
    for _ in 0..6 {
        assert_eq!(router.select_node(QueryKind::Read).node().id, "replica-2");
    }
}

#[test]
fn test_record_outcome_unknown_node() {
    let router = router(1, SelectionPolicy::RoundRobin);
    let err = router.record_outcome("ghost", 1.0, true).unwrap_err();
    assert!(matches!(err, CapacityError::NodeNotFound { .. }));
}

#[test]
fn test_weighted_policy_uses_weights() {
    let mut config = router_config(2, SelectionPolicy::Weighted);
    config.replicas[0].weight = 1;
    config.replicas[1].weight = 9;
    let router = NodeRouter::with_strategy(config, Box::new(WeightedStrategy::with_seed(42)));

    let heavy = (0..1000)
        .filter(|_| router.select_node(QueryKind::Read).node().id == "replica-2")
        .count();
    assert!(heavy > 820, "replica-2 picked {heavy} times");
}

#[tokio::test]
async fn test_run_query_records_outcome() {
    let router = router(1, SelectionPolicy::RoundRobin);
    let executor = MockQueryExecutor::new();

    let outcome = router
        .run_query(&executor, "SELECT 1", &[serde_json::json!(1)], QueryKind::Read)
        .await
        .unwrap();
    assert_eq!(outcome.node_id, "replica-1");
    assert_eq!(outcome.value["node"], "replica-1");
    assert!(!outcome.degraded);

    executor.fail_node("primary");
    let err = router
        .run_query(&executor, "UPDATE t SET x = 1", &[], QueryKind::Write)
        .await
        .unwrap_err();
    assert!(matches!(err, CapacityError::QueryExecution(_)));

    let statuses = router.statuses();
    let primary = statuses.iter().find(|s| s.id == "primary").unwrap();
    assert_eq!(primary.total_queries, 1);
    assert_eq!(primary.failed_queries, 1);
    assert_eq!(primary.active_connections, 0);
    assert!(router.mean_latency_ms().is_some());
}

#[tokio::test]
async fn test_consecutive_query_failures_publish_degraded() {
    let router = router(2, SelectionPolicy::RoundRobin);
    let mut events = router.subscribe();
    let executor = MockQueryExecutor::new();
    executor.fail_node("replica-1");
    executor.fail_node("replica-2");

    for _ in 0..6 {
        let _ = router.run_query(&executor, "SELECT 1", &[], QueryKind::Read).await;
    }

    let mut degraded = HashSet::new();
    while let Ok(event) = events.try_recv() {
        if let NodeHealthEvent::Degraded { node_id, .. } = event {
            degraded.insert(node_id);
        }
    }
    assert_eq!(degraded.len(), 2);

    // 全部只读节点被摘除后读请求降级到主节点且仍然成功
    let outcome = router
        .run_query(&executor, "SELECT 1", &[], QueryKind::Read)
        .await
        .unwrap();
    assert_eq!(outcome.node_id, "primary");
    assert!(outcome.degraded);
}

#[tokio::test]
async fn test_probe_recovery_and_degradation() {
    let router = router(2, SelectionPolicy::RoundRobin);
    let mut events = router.subscribe();
    let probe = ScriptedNodeProbe::new();

    probe.set_down("replica-1", true);
    router.check_health(&probe).await;
    assert_eq!(
        events.try_recv().unwrap(),
        NodeHealthEvent::Degraded {
            node_id: "replica-1".to_string(),
            reason: "内部错误: node replica-1 is down".to_string(),
        }
    );
    assert_eq!(router.unhealthy_count(), 1);

    // 持续失败不会重复通知
    router.check_health(&probe).await;
    assert!(events.try_recv().is_err());

    probe.set_down("replica-1", false);
    router.check_health(&probe).await;
    assert_eq!(
        events.try_recv().unwrap(),
        NodeHealthEvent::Recovered {
            node_id: "replica-1".to_string()
        }
    );
    let replica = router
        .statuses()
        .into_iter()
        .find(|s| s.id == "replica-1")
        .unwrap();
    assert_eq!(replica.health, NodeHealth::Healthy);
}

#[tokio::test]
async fn test_hanging_probe_is_bounded_by_timeout() {
    let router = router(1, SelectionPolicy::RoundRobin);
    let probe = ScriptedNodeProbe::new();
    probe.set_hanging("replica-1", true);

    tokio::time::timeout(Duration::from_secs(2), router.check_health(&probe))
        .await
        .expect("probe round must finish within the probe timeout");
    assert_eq!(router.unhealthy_count(), 1);
}

#[tokio::test]
async fn test_health_loop_stops_on_shutdown() {
    let router = Arc::new(router(1, SelectionPolicy::RoundRobin));
    let probe = ScriptedNodeProbe::new();
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let handle = router.start_health_loop(Arc::new(probe.clone()), shutdown_rx);
    tokio::time::sleep(Duration::from_millis(120)).await;
    assert!(probe.probe_count("replica-1") >= 2);

    shutdown_tx.send(()).unwrap();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .unwrap()
        .unwrap();
}
