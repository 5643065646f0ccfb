use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant as StdInstant;

use async_trait::async_trait;
use capacity_core::config::QueueConfig;
use capacity_core::models::{DeadLetter, QueueEntry, QueueStatus, TaskPriority};
use capacity_core::traits::{
    MetricSink, NoopMetricSink, QueueLoad, TaskContext, WorkerContext, WorkerRuntime,
};
use capacity_core::{CapacityError, CapacityResult};
use futures::FutureExt;
use serde_json::Value;
use tokio::time::{interval, sleep, timeout, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::queue::{FailureDisposition, NamedQueue};
use crate::registry::HandlerRegistry;

/// 任务队列池
///
/// 持有全部命名队列。提交只在队列不存在或已满时同步失败，其余错误都在
/// 分发循环内部通过重试和死信消化。
pub struct TaskQueuePool {
    queues: HashMap<String, Arc<NamedQueue>>,
    order: Vec<String>,
    metric_sink: Arc<dyn MetricSink>,
}

impl TaskQueuePool {
    /// 按配置创建队列，每个队列的处理器必须已注册
    pub fn new(configs: &[QueueConfig], registry: &HandlerRegistry) -> CapacityResult<Self> {
        let mut queues = HashMap::new();
        let mut order = Vec::new();
        for config in configs {
            if queues.contains_key(&config.name) {
                return Err(CapacityError::config_error(format!(
                    "duplicate queue name '{}'",
                    config.name
                )));
            }
            let handler = registry.resolve(&config.name, &config.handler)?;
            info!(
                queue = %config.name,
                handler = handler.name(),
                capacity = config.capacity,
                max_attempts = config.max_attempts,
                "Queue registered"
            );
            order.push(config.name.clone());
            queues.insert(
                config.name.clone(),
                Arc::new(NamedQueue::new(config.clone(), handler)),
            );
        }

        Ok(Self {
            queues,
            order,
            metric_sink: Arc::new(NoopMetricSink),
        })
    }

    pub fn with_metric_sink(mut self, metric_sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = metric_sink;
        self
    }

    pub fn queue(&self, name: &str) -> CapacityResult<&Arc<NamedQueue>> {
        self.queues
            .get(name)
            .ok_or_else(|| CapacityError::unknown_queue(name))
    }

    pub fn queue_names(&self) -> &[String] {
        &self.order
    }

    /// 提交任务，返回任务ID
    pub fn enqueue(
        &self,
        queue: &str,
        payload: Value,
        priority: TaskPriority,
    ) -> CapacityResult<String> {
        let result = self.queue(queue)?.enqueue(payload, priority);
        if let Err(e @ CapacityError::QueueFull { .. }) = &result {
            warn!(queue = %queue, error = %e, "Task rejected");
            metrics::counter!("capacity_tasks_rejected_total", "queue" => queue.to_string())
                .increment(1);
        }
        result
    }

    pub fn statuses(&self) -> Vec<QueueStatus> {
        self.order
            .iter()
            .filter_map(|name| self.queues.get(name))
            .map(|queue| queue.status())
            .collect()
    }

    pub fn dead_letters(&self, queue: &str) -> CapacityResult<Vec<DeadLetter>> {
        Ok(self.queue(queue)?.dead_letters())
    }

    pub fn requeue_dead_letter(&self, queue: &str, task_id: &str) -> CapacityResult<String> {
        self.queue(queue)?.requeue_dead_letter(task_id)
    }

    /// 所有队列的待处理任务总数
    pub fn total_depth(&self) -> usize {
        self.queues.values().map(|queue| queue.depth()).sum()
    }

    /// 所有队列累计的 `(attempts, failed_attempts)`
    pub fn attempt_totals(&self) -> (u64, u64) {
        self.queues
            .values()
            .map(|queue| queue.attempt_totals())
            .fold((0, 0), |(a, f), (qa, qf)| (a + qa, f + qf))
    }

    async fn execute(&self, queue: &NamedQueue, entry: QueueEntry, context: &WorkerContext) {
        let task_context = TaskContext {
            task_id: entry.id.clone(),
            queue: entry.queue.clone(),
            worker_id: context.worker_id.clone(),
            priority: entry.priority,
            attempt: entry.attempts,
            max_attempts: entry.max_attempts,
            payload: entry.payload.clone(),
            cancel: context.cancel.clone(),
        };
        let handler = queue.handler();
        let task_timeout = queue.config().task_timeout();
        let queue_name = entry.queue.clone();

        debug!(
            worker_id = %context.worker_id,
            queue = %entry.queue,
            task_id = %entry.id,
            attempt = entry.attempts,
            "Task dispatched"
        );

        let started = StdInstant::now();
        let mut in_flight = InFlightAttempt {
            queue,
            worker_id: &context.worker_id,
            entry: Some(entry),
            started,
        };
        let attempt = async {
            let guarded = AssertUnwindSafe(handler.handle(&task_context)).catch_unwind();
            let outcome = match task_timeout {
                Some(limit) => match timeout(limit, guarded).await {
                    Ok(outcome) => outcome,
                    Err(_) => {
                        return Err(CapacityError::Timeout(format!(
                            "task {} exceeded {:?}",
                            task_context.task_id, limit
                        )))
                    }
                },
                None => guarded.await,
            };
            match outcome {
                Ok(result) => result,
                Err(panic) => Err(CapacityError::TaskExecution(format!(
                    "处理器panic: {}",
                    panic_message(panic.as_ref())
                ))),
            }
        };
        tokio::pin!(attempt);

        // 长任务执行期间持续刷新心跳，卡死的处理器会停止心跳
        let mut ticker = interval(context.heartbeat_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let result = loop {
            tokio::select! {
                result = &mut attempt => break result,
                _ = ticker.tick() => context.beat(),
            }
        };
        let Some(entry) = in_flight.finish() else {
            return;
        };
        let elapsed = started.elapsed();
        let latency_ms = elapsed.as_secs_f64() * 1000.0;

        self.metric_sink.record("task_latency_ms", latency_ms);
        metrics::histogram!("capacity_task_duration_seconds", "queue" => queue_name)
            .record(elapsed.as_secs_f64());

        match result {
            Ok(_) => {
                context.counters.record_success();
                queue.complete_success(&entry, elapsed);
                metrics::counter!(
                    "capacity_tasks_processed_total",
                    "queue" => entry.queue.clone(),
                    "outcome" => "success"
                )
                .increment(1);
            }
            Err(e) => {
                context.counters.record_error();
                metrics::counter!(
                    "capacity_tasks_processed_total",
                    "queue" => entry.queue.clone(),
                    "outcome" => "failure"
                )
                .increment(1);

                let task_id = entry.id.clone();
                match queue.complete_failure(entry, &e, elapsed) {
                    FailureDisposition::Retry { attempt, delay } => {
                        warn!(
                            worker_id = %context.worker_id,
                            queue = %queue.name(),
                            task_id = %task_id,
                            attempt,
                            retry_in_ms = delay.as_millis() as u64,
                            error = %e,
                            "Task attempt failed, scheduled for retry"
                        );
                    }
                    FailureDisposition::DeadLettered => {
                        metrics::counter!(
                            "capacity_tasks_dead_lettered_total",
                            "queue" => queue.name().to_string()
                        )
                        .increment(1);
                    }
                }
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        msg.to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// 已出队且尚未结算的任务
///
/// Worker在任务执行中被中止时，分发循环的future连同它一起被丢弃，
/// 此时Drop把这次尝试按Worker崩溃记为失败，任务重试或转入死信并释放容量。
struct InFlightAttempt<'a> {
    queue: &'a NamedQueue,
    worker_id: &'a str,
    entry: Option<QueueEntry>,
    started: StdInstant,
}

impl InFlightAttempt<'_> {
    fn finish(&mut self) -> Option<QueueEntry> {
        self.entry.take()
    }
}

impl Drop for InFlightAttempt<'_> {
    fn drop(&mut self) {
        let Some(entry) = self.entry.take() else {
            return;
        };
        let crashed = CapacityError::WorkerCrashed {
            worker_id: self.worker_id.to_string(),
        };
        let task_id = entry.id.clone();
        let disposition = self
            .queue
            .complete_failure(entry, &crashed, self.started.elapsed());
        warn!(
            worker_id = %self.worker_id,
            queue = %self.queue.name(),
            task_id = %task_id,
            disposition = ?disposition,
            "Worker aborted mid-task, attempt recorded as failed"
        );
        if disposition == FailureDisposition::DeadLettered {
            metrics::counter!(
                "capacity_tasks_dead_lettered_total",
                "queue" => self.queue.name().to_string()
            )
            .increment(1);
        }
    }
}

/// 分发循环退出时注销Worker
struct Registration<'a> {
    queue: &'a NamedQueue,
    worker_id: String,
}

impl Drop for Registration<'_> {
    fn drop(&mut self) {
        self.queue.unregister_worker(&self.worker_id);
    }
}

#[async_trait]
impl WorkerRuntime for TaskQueuePool {
    fn queue_loads(&self) -> Vec<QueueLoad> {
        self.order
            .iter()
            .filter_map(|name| self.queues.get(name))
            .map(|queue| QueueLoad {
                name: queue.name().to_string(),
                weight: queue.config().workers,
                depth: queue.depth(),
            })
            .collect()
    }

    async fn run_worker(&self, mut context: WorkerContext) -> CapacityResult<()> {
        let queue = self.queue(&context.queue)?.clone();
        queue.register_worker(&context.worker_id, context.counters.clone());
        let _registration = Registration {
            queue: &queue,
            worker_id: context.worker_id.clone(),
        };
        context.mark_online();
        info!(worker_id = %context.worker_id, queue = %context.queue, "Worker dispatch loop started");

        loop {
            if context.is_draining() {
                break;
            }
            context.beat();

            if let Some(entry) = queue.take_ready(Instant::now()) {
                self.execute(&queue, entry, &context).await;
                continue;
            }

            let wait = queue.idle_wait(Instant::now());
            tokio::select! {
                _ = queue.notified() => {}
                _ = sleep(wait) => {}
                _ = context.drained() => break,
            }
        }

        info!(worker_id = %context.worker_id, queue = %context.queue, "Worker drained");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacity_testing_utils::{fast_queue, ScriptedTaskHandler};
    use serde_json::json;

    fn pool() -> TaskQueuePool {
        let registry =
            HandlerRegistry::new().with("scripted", Arc::new(ScriptedTaskHandler::new("scripted")));
        TaskQueuePool::new(
            &[
                fast_queue("emails", "scripted").with_workers(2),
                fast_queue("reports", "scripted"),
            ],
            &registry,
        )
        .unwrap()
    }

    #[test]
    fn test_unknown_handler_fails_construction() {
        let err = TaskQueuePool::new(&[fast_queue("emails", "missing")], &HandlerRegistry::new())
            .err()
            .unwrap();
        assert!(matches!(err, CapacityError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_queue_fails_construction() {
        let registry =
            HandlerRegistry::new().with("scripted", Arc::new(ScriptedTaskHandler::new("scripted")));
        let configs = [fast_queue("a", "scripted"), fast_queue("a", "scripted")];
        assert!(TaskQueuePool::new(&configs, &registry).is_err());
    }

    #[test]
    fn test_enqueue_unknown_queue() {
        let pool = pool();
        let err = pool
            .enqueue("missing", json!({}), TaskPriority::Normal)
            .unwrap_err();
        assert!(matches!(err, CapacityError::UnknownQueue { .. }));
        assert_eq!(pool.total_depth(), 0);
    }

    #[test]
    fn test_queue_loads_follow_config_order() {
        let pool = pool();
        pool.enqueue("reports", json!({}), TaskPriority::Urgent).unwrap();
        let loads = pool.queue_loads();
        assert_eq!(loads.len(), 2);
        assert_eq!(loads[0].name, "emails");
        assert_eq!(loads[0].weight, 2);
        assert_eq!(loads[1].depth, 1);
    }

    #[test]
    fn test_panic_message_extraction() {
        let boxed: Box<dyn Any + Send> = Box::new("static message");
        assert_eq!(panic_message(boxed.as_ref()), "static message");
        let boxed: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(boxed.as_ref()), "owned");
        let boxed: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(boxed.as_ref()), "unknown panic payload");
    }
}
