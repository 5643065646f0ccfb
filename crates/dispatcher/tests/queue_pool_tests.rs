use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use capacity_core::config::QueueConfig;
use capacity_core::models::{TaskPriority, WorkerCounters, WorkerState};
use capacity_core::traits::{CancellationSignal, TaskHandler, WorkerContext, WorkerRuntime};
use capacity_core::{CapacityError, CapacityResult};
use capacity_dispatcher::{HandlerRegistry, TaskQueuePool};
use capacity_testing_utils::{fast_queue, wait_for, RecordingTaskHandler, ScriptedTaskHandler};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;

struct RunningWorker {
    drain: watch::Sender<bool>,
    counters: Arc<WorkerCounters>,
    handle: JoinHandle<CapacityResult<()>>,
}

fn spawn_worker(pool: &Arc<TaskQueuePool>, queue: &str, id: &str) -> RunningWorker {
    let (drain, drain_rx) = watch::channel(false);
    let counters = Arc::new(WorkerCounters::new());
    let context = WorkerContext {
        worker_id: id.to_string(),
        queue: queue.to_string(),
        counters: counters.clone(),
        drain: drain_rx,
        cancel: CancellationSignal::never(),
        heartbeat_interval: Duration::from_millis(10),
    };
    let pool = pool.clone();
    let handle = tokio::spawn(async move { pool.run_worker(context).await });
    RunningWorker {
        drain,
        counters,
        handle,
    }
}

fn pool_with(config: QueueConfig, handler: Arc<dyn TaskHandler>) -> Arc<TaskQueuePool> {
    let registry = HandlerRegistry::new().with(config.handler.clone(), handler);
    Arc::new(TaskQueuePool::new(&[config], &registry).unwrap())
}

async fn stop(worker: RunningWorker) {
    worker.drain.send(true).unwrap();
    tokio::time::timeout(Duration::from_secs(2), worker.handle)
        .await
        .expect("worker should drain")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn test_failed_urgent_task_is_dead_lettered_while_others_complete() {
    let handler = ScriptedTaskHandler::new("scripted");
    let pool = pool_with(
        fast_queue("jobs", "scripted").with_max_attempts(1),
        Arc::new(handler.clone()),
    );

    let doomed = pool
        .enqueue("jobs", json!({ "fail": true }), TaskPriority::Urgent)
        .unwrap();
    pool.enqueue("jobs", json!({ "n": 1 }), TaskPriority::Urgent).unwrap();
    pool.enqueue("jobs", json!({ "n": 2 }), TaskPriority::Urgent).unwrap();
    pool.enqueue("jobs", json!({ "n": 3 }), TaskPriority::Normal).unwrap();
    pool.enqueue("jobs", json!({ "n": 4 }), TaskPriority::Normal).unwrap();

    let worker = spawn_worker(&pool, "jobs", "worker-1");
    assert!(
        wait_for(
            || {
                let status = &pool.statuses()[0];
                status.processed == 4 && status.dead_letters == 1
            },
            Duration::from_secs(2)
        )
        .await
    );

    let status = &pool.statuses()[0];
    assert_eq!(status.depth, 0);
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.failed, 1);

    let dead = pool.dead_letters("jobs").unwrap();
    assert_eq!(dead.len(), 1);
    assert_eq!(dead[0].entry.id, doomed);
    assert_eq!(handler.succeeded().len(), 4);
    assert_eq!(worker.counters.processed(), 4);
    assert_eq!(worker.counters.errors(), 1);

    stop(worker).await;
}

#[tokio::test]
async fn test_urgent_overtakes_waiting_normal_but_not_in_flight() {
    let handler = RecordingTaskHandler::gated("recording");
    let pool = pool_with(fast_queue("jobs", "recording"), Arc::new(handler.clone()));
    let worker = spawn_worker(&pool, "jobs", "worker-1");

    pool.enqueue("jobs", json!("n1"), TaskPriority::Normal).unwrap();
    assert!(wait_for(|| handler.started().len() == 1, Duration::from_secs(2)).await);

    pool.enqueue("jobs", json!("n2"), TaskPriority::Normal).unwrap();
    pool.enqueue("jobs", json!("u1"), TaskPriority::Urgent).unwrap();
    handler.release(3);

    assert!(wait_for(|| handler.completed().len() == 3, Duration::from_secs(2)).await);
    assert_eq!(
        handler.completed(),
        vec![json!("n1"), json!("u1"), json!("n2")]
    );

    stop(worker).await;
}

#[tokio::test]
async fn test_same_tier_is_fifo_with_single_worker() {
    let handler = RecordingTaskHandler::new("recording");
    let pool = pool_with(fast_queue("jobs", "recording"), Arc::new(handler.clone()));
    for i in 0..10 {
        pool.enqueue("jobs", json!(i), TaskPriority::Normal).unwrap();
    }

    let worker = spawn_worker(&pool, "jobs", "worker-1");
    assert!(wait_for(|| handler.completed().len() == 10, Duration::from_secs(2)).await);
    assert_eq!(
        handler.completed(),
        (0..10).map(|i| json!(i)).collect::<Vec<_>>()
    );

    stop(worker).await;
}

#[tokio::test]
async fn test_queue_full_rejects_without_changing_length() {
    let handler = RecordingTaskHandler::gated("recording");
    let pool = pool_with(
        fast_queue("jobs", "recording").with_capacity(2),
        Arc::new(handler.clone()),
    );
    pool.enqueue("jobs", json!(1), TaskPriority::Normal).unwrap();
    pool.enqueue("jobs", json!(2), TaskPriority::Normal).unwrap();

    let err = pool
        .enqueue("jobs", json!(3), TaskPriority::Urgent)
        .unwrap_err();
    assert!(matches!(err, CapacityError::QueueFull { capacity: 2, .. }));
    assert!(err.is_caller_error());
    assert_eq!(pool.total_depth(), 2);
}

#[tokio::test]
async fn test_failing_task_retries_until_success() {
    let handler = ScriptedTaskHandler::new("scripted");
    let pool = pool_with(
        fast_queue("jobs", "scripted").with_max_attempts(3),
        Arc::new(handler.clone()),
    );
    let id = pool
        .enqueue("jobs", json!({ "fail_times": 2 }), TaskPriority::Normal)
        .unwrap();

    let worker = spawn_worker(&pool, "jobs", "worker-1");
    assert!(wait_for(|| handler.succeeded().len() == 1, Duration::from_secs(2)).await);

    assert_eq!(
        handler.attempts(),
        vec![(id.clone(), 1), (id.clone(), 2), (id, 3)]
    );
    let status = &pool.statuses()[0];
    assert_eq!(status.retried, 2);
    assert_eq!(status.processed, 1);
    assert_eq!(status.dead_letters, 0);
    assert_eq!(pool.attempt_totals(), (3, 2));

    stop(worker).await;
}

#[tokio::test]
async fn test_panicking_handler_does_not_kill_worker() {
    let handler = ScriptedTaskHandler::new("scripted");
    let pool = pool_with(
        fast_queue("jobs", "scripted").with_max_attempts(1),
        Arc::new(handler.clone()),
    );
    let worker = spawn_worker(&pool, "jobs", "worker-1");

    pool.enqueue("jobs", json!({ "panic": true }), TaskPriority::Normal)
        .unwrap();
    pool.enqueue("jobs", json!({ "ok": true }), TaskPriority::Normal)
        .unwrap();

    assert!(wait_for(|| handler.succeeded().len() == 1, Duration::from_secs(2)).await);
    let dead = pool.dead_letters("jobs").unwrap();
    assert_eq!(dead.len(), 1);
    assert!(dead[0].reason.contains("panic"));
    assert!(!worker.handle.is_finished());

    stop(worker).await;
}

#[tokio::test]
async fn test_task_timeout_counts_as_failure() {
    let handler = ScriptedTaskHandler::new("scripted");
    let pool = pool_with(
        fast_queue("jobs", "scripted")
            .with_max_attempts(1)
            .with_task_timeout(50),
        Arc::new(handler.clone()),
    );
    let worker = spawn_worker(&pool, "jobs", "worker-1");
    pool.enqueue("jobs", json!({ "sleep_ms": 5_000 }), TaskPriority::Normal)
        .unwrap();

    assert!(
        wait_for(
            || pool.dead_letters("jobs").map(|d| d.len() == 1).unwrap_or(false),
            Duration::from_secs(2)
        )
        .await
    );
    let dead = pool.dead_letters("jobs").unwrap();
    assert!(dead[0].reason.contains("超时"));

    stop(worker).await;
}

#[tokio::test]
async fn test_requeued_dead_letter_runs_again() {
    let handler = ScriptedTaskHandler::new("scripted");
    let pool = pool_with(
        fast_queue("jobs", "scripted").with_max_attempts(1),
        Arc::new(handler.clone()),
    );
    let id = pool
        .enqueue("jobs", json!({ "fail_times": 1 }), TaskPriority::Normal)
        .unwrap();
    let worker = spawn_worker(&pool, "jobs", "worker-1");
    assert!(
        wait_for(
            || pool.statuses()[0].dead_letters == 1,
            Duration::from_secs(2)
        )
        .await
    );

    // 重新入队后尝试次数从头计算，第二次总尝试对处理器而言仍是第1次
    pool.requeue_dead_letter("jobs", &id).unwrap();
    assert!(wait_for(|| handler.attempt_count() == 2, Duration::from_secs(2)).await);
    assert_eq!(handler.attempts()[1], (id, 1));

    stop(worker).await;
}

#[tokio::test]
async fn test_concurrent_workers_process_each_task_once() {
    let handler = ScriptedTaskHandler::new("scripted");
    let pool = pool_with(fast_queue("jobs", "scripted"), Arc::new(handler.clone()));
    let workers: Vec<RunningWorker> = (1..=3)
        .map(|i| spawn_worker(&pool, "jobs", &format!("worker-{i}")))
        .collect();

    for i in 0..60 {
        pool.enqueue("jobs", json!({ "n": i }), TaskPriority::Normal)
            .unwrap();
    }

    assert!(wait_for(|| handler.succeeded().len() == 60, Duration::from_secs(3)).await);
    let unique: HashSet<String> = handler.succeeded().into_iter().collect();
    assert_eq!(unique.len(), 60);
    assert_eq!(handler.attempt_count(), 60);

    let status = &pool.statuses()[0];
    assert_eq!(status.assigned_workers, 3);
    assert_eq!(
        status.workers.iter().map(|w| w.processed).sum::<u64>(),
        60
    );

    for worker in workers {
        stop(worker).await;
    }
    assert_eq!(pool.statuses()[0].assigned_workers, 0);
}

#[tokio::test]
async fn test_worker_goes_online_and_beats_during_long_task() {
    let handler = ScriptedTaskHandler::new("scripted");
    let pool = pool_with(fast_queue("jobs", "scripted"), Arc::new(handler.clone()));
    let worker = spawn_worker(&pool, "jobs", "worker-1");
    assert!(
        wait_for(
            || worker.counters.state() == WorkerState::Online,
            Duration::from_secs(1)
        )
        .await
    );

    pool.enqueue("jobs", json!({ "sleep_ms": 300 }), TaskPriority::Normal)
        .unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(handler.succeeded().is_empty());
    assert!(worker.counters.last_beat().elapsed() < Duration::from_millis(100));

    assert!(wait_for(|| handler.succeeded().len() == 1, Duration::from_secs(2)).await);
    stop(worker).await;
}

#[tokio::test]
async fn test_aborted_worker_dead_letters_its_task_and_frees_capacity() {
    let handler = RecordingTaskHandler::gated("recording");
    let pool = pool_with(
        fast_queue("jobs", "recording")
            .with_capacity(1)
            .with_max_attempts(1),
        Arc::new(handler.clone()),
    );
    let task_id = pool.enqueue("jobs", json!(1), TaskPriority::Normal).unwrap();

    let worker = spawn_worker(&pool, "jobs", "worker-1");
    assert!(wait_for(|| handler.started().len() == 1, Duration::from_secs(2)).await);
    assert_eq!(pool.statuses()[0].in_flight, 1);

    worker.handle.abort();
    assert!(worker.handle.await.unwrap_err().is_cancelled());

    let status = &pool.statuses()[0];
    assert_eq!(status.depth, 0);
    assert_eq!(status.in_flight, 0);
    assert_eq!(status.processed, 0);
    assert_eq!(status.dead_letters, 1);

    let dead = pool.dead_letters("jobs").unwrap();
    assert_eq!(dead[0].entry.id, task_id);
    assert!(dead[0].reason.contains("worker-1"));

    pool.enqueue("jobs", json!(2), TaskPriority::Normal).unwrap();
}

#[tokio::test]
async fn test_aborted_worker_task_is_retried_by_next_worker() {
    let handler = RecordingTaskHandler::gated("recording");
    let pool = pool_with(
        fast_queue("jobs", "recording").with_max_attempts(2),
        Arc::new(handler.clone()),
    );
    pool.enqueue("jobs", json!("report"), TaskPriority::Normal)
        .unwrap();

    let first = spawn_worker(&pool, "jobs", "worker-1");
    assert!(wait_for(|| handler.started().len() == 1, Duration::from_secs(2)).await);
    first.handle.abort();
    let _ = first.handle.await;
    assert_eq!(pool.statuses()[0].depth, 1);
    assert_eq!(pool.statuses()[0].retried, 1);

    let second = spawn_worker(&pool, "jobs", "worker-2");
    handler.release(1);
    assert!(wait_for(|| pool.statuses()[0].processed == 1, Duration::from_secs(2)).await);
    assert_eq!(handler.completed(), vec![json!("report")]);
    assert_eq!(pool.statuses()[0].in_flight, 0);
    stop(second).await;
}

#[tokio::test]
async fn test_run_worker_on_unknown_queue_fails() {
    let pool = pool_with(
        fast_queue("jobs", "scripted"),
        Arc::new(ScriptedTaskHandler::new("scripted")),
    );
    let worker = spawn_worker(&pool, "missing", "worker-1");
    let result = worker.handle.await.unwrap();
    assert!(matches!(result, Err(CapacityError::UnknownQueue { .. })));
}
