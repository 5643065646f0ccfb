use std::sync::Arc;
use std::time::Duration;

use capacity_core::models::WorkerState;
use capacity_testing_utils::{wait_until, MockWorkerRuntime, ScalingConfigBuilder};
use capacity_worker::{CapacityManager, ScalingDecision};
use tokio::sync::broadcast;

fn manager(builder: ScalingConfigBuilder, runtime: &MockWorkerRuntime) -> Arc<CapacityManager> {
    Arc::new(CapacityManager::new(builder.build(), Arc::new(runtime.clone())))
}

async fn active_is(manager: &CapacityManager, expected: usize) -> bool {
    wait_until(
        || async { manager.active_count().await == expected },
        Duration::from_secs(2),
    )
    .await
}

#[tokio::test]
async fn test_second_evaluation_within_cooldown_changes_nothing() {
    let runtime = MockWorkerRuntime::single_queue();
    let manager = manager(
        ScalingConfigBuilder::new(1, 4).with_cooldown_ms(10_000),
        &runtime,
    );
    manager.initialize().await.unwrap();

    let first = manager.evaluate_scaling(95.0).await.unwrap();
    assert!(matches!(first, ScalingDecision::ScaledUp { .. }));
    let second = manager.evaluate_scaling(95.0).await.unwrap();
    assert!(matches!(second, ScalingDecision::Cooldown { .. }));
    let third = manager.evaluate_scaling(1.0).await.unwrap();
    assert!(matches!(third, ScalingDecision::Cooldown { .. }));

    assert_eq!(manager.active_count().await, 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_sustained_high_load_reaches_max_and_plateaus() {
    let runtime = MockWorkerRuntime::single_queue();
    let manager = manager(ScalingConfigBuilder::new(2, 4).with_cooldown_ms(50), &runtime);
    manager.initialize().await.unwrap();

    let mut decisions = Vec::new();
    for _ in 0..3 {
        decisions.push(manager.evaluate_scaling(95.0).await.unwrap());
        tokio::time::sleep(Duration::from_millis(80)).await;
    }

    assert!(decisions[0].is_action());
    assert!(decisions[1].is_action());
    assert_eq!(decisions[2], ScalingDecision::AtMaximum);
    assert_eq!(manager.active_count().await, 4);
    assert_eq!(runtime.started_count(), 4);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_worker_count_stays_within_bounds() {
    let runtime = MockWorkerRuntime::new(&[("a", 1), ("b", 1)]);
    let manager = manager(ScalingConfigBuilder::new(2, 5).with_cooldown_ms(0), &runtime);
    manager.initialize().await.unwrap();

    let loads = [95.0, 95.0, 95.0, 95.0, 95.0, 5.0, 5.0, 5.0, 5.0, 5.0, 50.0, 99.0];
    for load in loads {
        manager.evaluate_scaling(load).await.unwrap();
        let active = manager.active_count().await;
        assert!((2..=5).contains(&active), "active={active} after load {load}");
    }
    manager.shutdown().await;
}

#[tokio::test]
async fn test_scale_down_drains_oldest_worker() {
    let runtime = MockWorkerRuntime::single_queue();
    let manager = manager(ScalingConfigBuilder::new(1, 3).with_cooldown_ms(0), &runtime);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let listener = manager.start_exit_listener(shutdown_rx);

    manager.initialize().await.unwrap();
    manager.evaluate_scaling(95.0).await.unwrap();
    manager.evaluate_scaling(95.0).await.unwrap();
    assert_eq!(manager.active_count().await, 3);

    let decision = manager.evaluate_scaling(5.0).await.unwrap();
    assert_eq!(
        decision,
        ScalingDecision::ScaledDown {
            worker_id: "worker-1".to_string()
        }
    );
    assert_eq!(manager.active_count().await, 2);

    // 排空的Worker自行退出后被移除，不会被替换
    assert!(
        wait_until(
            || async { manager.worker_count().await == 2 },
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(runtime.started_count(), 3);
    assert!(!runtime.running().contains(&"worker-1".to_string()));

    shutdown_tx.send(()).unwrap();
    listener.await.unwrap();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_crashed_worker_is_replaced() {
    let runtime = MockWorkerRuntime::single_queue();
    let manager = manager(ScalingConfigBuilder::new(2, 4), &runtime);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    manager.start_exit_listener(shutdown_rx);
    manager.initialize().await.unwrap();

    runtime.crash("worker-1");
    assert!(
        wait_until(
            || async { runtime.started_count() == 3 },
            Duration::from_secs(2)
        )
        .await
    );
    assert!(active_is(&manager, 2).await);

    let ids: Vec<String> = manager.workers().await.into_iter().map(|w| w.id).collect();
    assert_eq!(ids, vec!["worker-2".to_string(), "worker-3".to_string()]);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_panicking_worker_is_replaced() {
    let runtime = MockWorkerRuntime::single_queue();
    let manager = manager(ScalingConfigBuilder::new(1, 2), &runtime);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    manager.start_exit_listener(shutdown_rx);
    manager.initialize().await.unwrap();

    runtime.panic("worker-1");
    assert!(
        wait_until(
            || async {
                manager
                    .workers()
                    .await
                    .iter()
                    .any(|w| w.id == "worker-2" && w.state == WorkerState::Online)
            },
            Duration::from_secs(2)
        )
        .await
    );
    assert_eq!(manager.active_count().await, 1);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_hung_worker_is_detected_by_health_check() {
    let runtime = MockWorkerRuntime::single_queue();
    let manager = manager(
        ScalingConfigBuilder::new(1, 2).with_heartbeat(10, 100),
        &runtime,
    );
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let health = manager.start_health_loop(shutdown_rx);
    manager.initialize().await.unwrap();

    runtime.hang("worker-1");
    assert!(
        wait_until(
            || async {
                manager
                    .workers()
                    .await
                    .iter()
                    .map(|w| w.id.clone())
                    .collect::<Vec<_>>()
                    == vec!["worker-2".to_string()]
            },
            Duration::from_secs(2)
        )
        .await
    );
    assert!(!runtime.running().contains(&"worker-1".to_string()));

    shutdown_tx.send(()).unwrap();
    health.await.unwrap();
    manager.shutdown().await;
}

#[tokio::test]
async fn test_restart_guard_defers_replacement_until_reconcile() {
    let runtime = MockWorkerRuntime::single_queue();
    let manager = manager(
        ScalingConfigBuilder::new(2, 4).with_restart_guard(1, 300),
        &runtime,
    );
    manager.initialize().await.unwrap();

    let first = manager.on_worker_exit("worker-1", false).await.unwrap();
    assert_eq!(first, Some("worker-3".to_string()));
    let second = manager.on_worker_exit("worker-2", false).await.unwrap();
    assert_eq!(second, None);
    assert_eq!(manager.active_count().await, 1);

    // 额度未恢复前补足也被拒绝
    assert_eq!(
        manager.evaluate_scaling(50.0).await.unwrap(),
        ScalingDecision::Steady
    );
    assert_eq!(manager.active_count().await, 1);

    tokio::time::sleep(Duration::from_millis(350)).await;
    manager.evaluate_scaling(50.0).await.unwrap();
    assert_eq!(manager.active_count().await, 2);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_crash_loop_is_bounded_by_restart_guard() {
    let runtime = MockWorkerRuntime::single_queue();
    runtime.set_crash_on_start(true);
    let manager = manager(
        ScalingConfigBuilder::new(1, 2).with_restart_guard(3, 60_000),
        &runtime,
    );
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    manager.start_exit_listener(shutdown_rx);
    manager.initialize().await.unwrap();

    assert!(
        wait_until(
            || async { runtime.started_count() == 4 },
            Duration::from_secs(2)
        )
        .await
    );
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(runtime.started_count(), 4);
    assert!(active_is(&manager, 0).await);
    manager.shutdown().await;
}

#[tokio::test]
async fn test_shutdown_drains_all_workers_without_replacement() {
    let runtime = MockWorkerRuntime::new(&[("a", 1), ("b", 1)]);
    let manager = manager(ScalingConfigBuilder::new(3, 4), &runtime);
    let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
    manager.start_exit_listener(shutdown_rx);
    manager.initialize().await.unwrap();
    assert!(
        wait_until(
            || async { runtime.running().len() == 3 },
            Duration::from_secs(1)
        )
        .await
    );

    let aborted = manager.shutdown().await;
    assert_eq!(aborted, 0);
    assert!(manager.is_shutting_down());
    assert_eq!(manager.worker_count().await, 0);

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(runtime.running().is_empty());
    assert_eq!(runtime.started_count(), 3);
}
