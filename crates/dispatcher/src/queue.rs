use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use capacity_core::config::QueueConfig;
use capacity_core::models::{
    DeadLetter, QueueEntry, QueueStatus, QueueWorkerStats, TaskPriority, WorkerCounters,
};
use capacity_core::traits::TaskHandler;
use capacity_core::{CapacityError, CapacityResult};
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, error, warn};

const LATENCY_SMOOTHING: f64 = 0.2;

#[derive(Debug)]
struct Pending {
    entry: QueueEntry,
    not_before: Option<Instant>,
}

impl Pending {
    fn is_ready(&self, now: Instant) -> bool {
        self.not_before.map_or(true, |at| at <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    urgent: VecDeque<Pending>,
    normal: VecDeque<Pending>,
    /// 已出队但尚未完成的任务，完成前继续占用容量
    in_flight: usize,
    dead_letters: Vec<DeadLetter>,
}

impl QueueState {
    fn pending(&self) -> usize {
        self.urgent.len() + self.normal.len()
    }

    fn tier_mut(&mut self, priority: TaskPriority) -> &mut VecDeque<Pending> {
        match priority {
            TaskPriority::Urgent => &mut self.urgent,
            TaskPriority::Normal => &mut self.normal,
        }
    }

    fn take_ready(tier: &mut VecDeque<Pending>, now: Instant) -> Option<QueueEntry> {
        let index = tier.iter().position(|p| p.is_ready(now))?;
        tier.remove(index).map(|p| p.entry)
    }
}

/// 失败任务的去向
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    Retry { attempt: u32, delay: Duration },
    DeadLettered,
}

/// 命名的有界优先级队列
///
/// 紧急任务和普通任务分两层存放，层内先进先出，出队时紧急层优先。
/// 入队、出队和重试都在同一把锁内完成。
pub struct NamedQueue {
    config: QueueConfig,
    handler: Arc<dyn TaskHandler>,
    state: Mutex<QueueState>,
    notify: Notify,
    workers: Mutex<BTreeMap<String, Arc<WorkerCounters>>>,
    processed: AtomicU64,
    failed: AtomicU64,
    retried: AtomicU64,
    attempts: AtomicU64,
    failed_attempts: AtomicU64,
    avg_latency_ms: Mutex<Option<f64>>,
}

impl NamedQueue {
    pub fn new(config: QueueConfig, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            config,
            handler,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            workers: Mutex::new(BTreeMap::new()),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            retried: AtomicU64::new(0),
            attempts: AtomicU64::new(0),
            failed_attempts: AtomicU64::new(0),
            avg_latency_ms: Mutex::new(None),
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn handler(&self) -> Arc<dyn TaskHandler> {
        self.handler.clone()
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 提交任务，返回任务ID
    pub fn enqueue(
        &self,
        payload: serde_json::Value,
        priority: TaskPriority,
    ) -> CapacityResult<String> {
        let entry = QueueEntry::new(
            self.config.name.clone(),
            payload,
            priority,
            self.config.max_attempts,
        );
        self.admit(entry)
    }

    fn admit(&self, entry: QueueEntry) -> CapacityResult<String> {
        let id = entry.id.clone();
        {
            let mut state = self.lock_state();
            if state.pending() + state.in_flight >= self.config.capacity {
                return Err(CapacityError::queue_full(
                    self.config.name.clone(),
                    self.config.capacity,
                ));
            }
            let priority = entry.priority;
            state.tier_mut(priority).push_back(Pending {
                entry,
                not_before: None,
            });
        }

        debug!(queue = %self.config.name, task_id = %id, "Task enqueued");
        self.notify.notify_one();
        Ok(id)
    }

    /// 取出第一个可执行的任务，紧急层优先
    pub fn take_ready(&self, now: Instant) -> Option<QueueEntry> {
        let mut state = self.lock_state();
        let entry = QueueState::take_ready(&mut state.urgent, now)
            .or_else(|| QueueState::take_ready(&mut state.normal, now))?;
        state.in_flight += 1;
        drop(state);

        let mut entry = entry;
        entry.attempts += 1;
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Some(entry)
    }

    /// 空闲时最多等待的时长：空闲退避与最近一个重试到期时间中较小者
    pub fn idle_wait(&self, now: Instant) -> Duration {
        let backoff = self.config.idle_backoff();
        let state = self.lock_state();
        state
            .urgent
            .iter()
            .chain(state.normal.iter())
            .filter_map(|p| p.not_before)
            .map(|at| at.saturating_duration_since(now))
            .min()
            .map_or(backoff, |until_ready| until_ready.min(backoff))
    }

    pub async fn notified(&self) {
        self.notify.notified().await;
    }

    pub fn complete_success(&self, entry: &QueueEntry, latency: Duration) {
        {
            let mut state = self.lock_state();
            state.in_flight = state.in_flight.saturating_sub(1);
        }
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.observe_latency(latency);
        debug!(
            queue = %self.config.name,
            task_id = %entry.id,
            attempt = entry.attempts,
            latency_ms = latency.as_millis() as u64,
            "Task completed"
        );
    }

    /// 处理失败：仍有尝试次数则回到本层队尾，否则转入死信
    pub fn complete_failure(
        &self,
        mut entry: QueueEntry,
        err: &CapacityError,
        latency: Duration,
    ) -> FailureDisposition {
        self.failed_attempts.fetch_add(1, Ordering::Relaxed);
        self.observe_latency(latency);
        entry.last_error = Some(err.to_string());

        if entry.has_attempts_left() {
            let attempt = entry.attempts;
            let delay = self.config.retry_delay(attempt);
            let not_before = (!delay.is_zero()).then(|| Instant::now() + delay);
            let priority = entry.priority;
            {
                let mut state = self.lock_state();
                state.in_flight = state.in_flight.saturating_sub(1);
                state.tier_mut(priority).push_back(Pending { entry, not_before });
            }
            self.retried.fetch_add(1, Ordering::Relaxed);
            self.notify.notify_one();
            return FailureDisposition::Retry { attempt, delay };
        }

        let exhausted = CapacityError::TaskAttemptsExhausted {
            task_id: entry.id.clone(),
            attempts: entry.attempts,
        };
        error!(
            queue = %self.config.name,
            task_id = %entry.id,
            attempts = entry.attempts,
            last_error = %err,
            "{}",
            exhausted
        );
        let reason = err.to_string();
        {
            let mut state = self.lock_state();
            state.in_flight = state.in_flight.saturating_sub(1);
            state.dead_letters.push(DeadLetter::new(entry, reason));
        }
        self.failed.fetch_add(1, Ordering::Relaxed);
        FailureDisposition::DeadLettered
    }

    fn observe_latency(&self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        let mut avg = self
            .avg_latency_ms
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        *avg = Some(match *avg {
            Some(previous) => previous + LATENCY_SMOOTHING * (sample - previous),
            None => sample,
        });
    }

    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.lock_state().dead_letters.clone()
    }

    /// 把死信重新放回队列，重新获得完整的尝试次数
    pub fn requeue_dead_letter(&self, task_id: &str) -> CapacityResult<String> {
        let mut state = self.lock_state();
        let index = state
            .dead_letters
            .iter()
            .position(|d| d.entry.id == task_id)
            .ok_or_else(|| CapacityError::DeadLetterNotFound {
                queue: self.config.name.clone(),
                task_id: task_id.to_string(),
            })?;

        if state.pending() + state.in_flight >= self.config.capacity {
            return Err(CapacityError::queue_full(
                self.config.name.clone(),
                self.config.capacity,
            ));
        }

        let mut entry = state.dead_letters.remove(index).entry;
        entry.attempts = 0;
        entry.last_error = None;
        entry.max_attempts = self.config.max_attempts;
        let priority = entry.priority;
        state.tier_mut(priority).push_back(Pending {
            entry,
            not_before: None,
        });
        drop(state);

        warn!(queue = %self.config.name, task_id = %task_id, "Dead letter requeued");
        self.notify.notify_one();
        Ok(task_id.to_string())
    }

    pub fn depth(&self) -> usize {
        self.lock_state().pending()
    }

    pub fn in_flight(&self) -> usize {
        self.lock_state().in_flight
    }

    pub fn register_worker(&self, worker_id: &str, counters: Arc<WorkerCounters>) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(worker_id.to_string(), counters);
    }

    pub fn unregister_worker(&self, worker_id: &str) {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(worker_id);
    }

    pub fn assigned_workers(&self) -> usize {
        self.workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// `(attempts, failed_attempts)` 累计值
    pub fn attempt_totals(&self) -> (u64, u64) {
        (
            self.attempts.load(Ordering::Relaxed),
            self.failed_attempts.load(Ordering::Relaxed),
        )
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn status(&self) -> QueueStatus {
        let (depth, urgent_depth, in_flight, dead_letters) = {
            let state = self.lock_state();
            (
                state.pending(),
                state.urgent.len(),
                state.in_flight,
                state.dead_letters.len(),
            )
        };
        let workers: Vec<QueueWorkerStats> = self
            .workers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, counters)| QueueWorkerStats {
                worker_id: id.clone(),
                processed: counters.processed(),
                errors: counters.errors(),
            })
            .collect();

        QueueStatus {
            name: self.config.name.clone(),
            depth,
            urgent_depth,
            in_flight,
            capacity: self.config.capacity,
            assigned_workers: workers.len(),
            processed: self.processed(),
            failed: self.failed(),
            retried: self.retried.load(Ordering::Relaxed),
            dead_letters,
            avg_latency_ms: self
                .avg_latency_ms
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .unwrap_or_default(),
            workers,
        }
    }
}
