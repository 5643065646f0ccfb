use std::collections::{BTreeMap, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use capacity_core::config::ScalingConfig;
use capacity_core::models::{WorkerCounters, WorkerHandle, WorkerState};
use capacity_core::traits::{CancellationSignal, WorkerContext, WorkerRuntime};
use capacity_core::{CapacityError, CapacityResult};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use tokio::sync::{broadcast, mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::restart_guard::RestartGuard;

/// 一次伸缩评估的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalingDecision {
    ScaledUp { worker_id: String },
    ScaledDown { worker_id: String },
    /// 需要伸缩但仍处于冷却期
    Cooldown { remaining: Duration },
    AtMaximum,
    AtMinimum,
    Steady,
}

impl ScalingDecision {
    pub fn is_action(&self) -> bool {
        matches!(
            self,
            ScalingDecision::ScaledUp { .. } | ScalingDecision::ScaledDown { .. }
        )
    }
}

#[derive(Debug)]
struct WorkerExit {
    worker_id: String,
    intentional: bool,
}

struct WorkerSlot {
    seq: u64,
    queue: String,
    created_at: DateTime<Utc>,
    counters: Arc<WorkerCounters>,
    drain_tx: watch::Sender<bool>,
    cancel_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl WorkerSlot {
    fn is_active(&self) -> bool {
        self.counters.state().is_active()
    }
}

struct PoolState {
    workers: BTreeMap<String, WorkerSlot>,
    last_scaling: Option<Instant>,
    restart_guard: RestartGuard,
}

impl PoolState {
    fn active_count(&self) -> usize {
        self.workers.values().filter(|slot| slot.is_active()).count()
    }

    fn publish_active(&self) {
        metrics::gauge!("capacity_workers_active").set(self.active_count() as f64);
    }
}

/// 容量管理器
///
/// Worker的增加、排空和替换都经过同一把池锁，伸缩决策之间不会竞争。
pub struct CapacityManager {
    config: ScalingConfig,
    runtime: Arc<dyn WorkerRuntime>,
    state: Mutex<PoolState>,
    exit_tx: mpsc::UnboundedSender<WorkerExit>,
    exit_rx: Mutex<Option<mpsc::UnboundedReceiver<WorkerExit>>>,
    next_seq: AtomicU64,
    shutting_down: AtomicBool,
}

impl CapacityManager {
    pub fn new(config: ScalingConfig, runtime: Arc<dyn WorkerRuntime>) -> Self {
        let (exit_tx, exit_rx) = mpsc::unbounded_channel();
        let restart_guard =
            RestartGuard::new(config.max_restarts_per_interval, config.restart_interval());
        Self {
            config,
            runtime,
            state: Mutex::new(PoolState {
                workers: BTreeMap::new(),
                last_scaling: None,
                restart_guard,
            }),
            exit_tx,
            exit_rx: Mutex::new(Some(exit_rx)),
            next_seq: AtomicU64::new(0),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.config
    }

    /// 启动 `min_workers` 个Worker
    pub async fn initialize(&self) -> CapacityResult<Vec<String>> {
        let mut state = self.state.lock().await;
        if !state.workers.is_empty() {
            return Err(CapacityError::Internal(
                "capacity manager already initialized".to_string(),
            ));
        }

        let mut ids = Vec::with_capacity(self.config.min_workers);
        for _ in 0..self.config.min_workers {
            let queue = self.pick_queue(&state)?;
            ids.push(self.spawn_worker(&mut state, queue));
        }
        state.publish_active();
        info!(
            "容量管理器初始化完成: workers={}, min={}, max={}",
            ids.len(),
            self.config.min_workers,
            self.config.max_workers
        );
        Ok(ids)
    }

    /// 按负载百分比评估一次伸缩
    ///
    /// 先把活跃Worker补足到下限（不计入伸缩动作，不受冷却限制），
    /// 再决定是否扩容或排空最老的Worker。每个冷却窗口最多一次伸缩动作。
    pub async fn evaluate_scaling(&self, load_percent: f64) -> CapacityResult<ScalingDecision> {
        let mut state = self.state.lock().await;
        self.reconcile(&mut state)?;
        state.publish_active();

        let active = state.active_count();
        if active > self.config.max_workers {
            return Err(self.bound_violation(active));
        }

        let now = Instant::now();
        let remaining = state
            .last_scaling
            .map(|at| self.config.cooldown().saturating_sub(now.saturating_duration_since(at)))
            .unwrap_or(Duration::ZERO);

        if load_percent >= self.config.scale_up_threshold_percent {
            if active >= self.config.max_workers {
                debug!(active, load_percent, "已达到Worker上限，不再扩容");
                return Ok(ScalingDecision::AtMaximum);
            }
            if !remaining.is_zero() {
                return Ok(ScalingDecision::Cooldown { remaining });
            }

            let queue = self.pick_queue(&state)?;
            let worker_id = self.spawn_worker(&mut state, queue);
            state.last_scaling = Some(now);
            state.publish_active();
            info!(
                worker_id = %worker_id,
                load_percent,
                active = active + 1,
                "Scaled up"
            );
            metrics::counter!("capacity_scaling_actions_total", "direction" => "up").increment(1);
            return Ok(ScalingDecision::ScaledUp { worker_id });
        }

        if load_percent <= self.config.scale_down_threshold_percent {
            if active <= self.config.min_workers {
                return Ok(ScalingDecision::AtMinimum);
            }
            if !remaining.is_zero() {
                return Ok(ScalingDecision::Cooldown { remaining });
            }

            let Some(worker_id) = Self::pick_victim(&state) else {
                return Ok(ScalingDecision::Steady);
            };
            if active - 1 < self.config.min_workers {
                return Err(self.bound_violation(active - 1));
            }
            if let Some(slot) = state.workers.get(&worker_id) {
                slot.counters.set_state(WorkerState::Draining);
                let _ = slot.drain_tx.send(true);
            }
            state.last_scaling = Some(now);
            state.publish_active();
            info!(
                worker_id = %worker_id,
                load_percent,
                active = active - 1,
                "Scaled down, worker draining"
            );
            metrics::counter!("capacity_scaling_actions_total", "direction" => "down").increment(1);
            return Ok(ScalingDecision::ScaledDown { worker_id });
        }

        Ok(ScalingDecision::Steady)
    }

    /// 处理Worker退出，返回替换Worker的ID
    ///
    /// 同一个Worker的重复通知会被忽略。
    pub async fn on_worker_exit(
        &self,
        worker_id: &str,
        intentional: bool,
    ) -> CapacityResult<Option<String>> {
        let mut state = self.state.lock().await;
        let Some(slot) = state.workers.remove(worker_id) else {
            debug!(worker_id = %worker_id, "Worker already removed");
            return Ok(None);
        };
        let was_active = slot.is_active();
        slot.counters.set_state(WorkerState::Terminated);
        slot.handle.abort();
        state.publish_active();

        if intentional || !was_active || self.shutting_down.load(Ordering::Acquire) {
            info!(worker_id = %worker_id, queue = %slot.queue, "Worker exited");
            return Ok(None);
        }

        let crashed = CapacityError::WorkerCrashed {
            worker_id: worker_id.to_string(),
        };
        warn!(worker_id = %worker_id, queue = %slot.queue, "{}", crashed);
        metrics::counter!("capacity_worker_crashes_total").increment(1);

        if state.active_count() >= self.config.max_workers {
            return Ok(None);
        }
        if !state.restart_guard.try_acquire(Instant::now()) {
            warn!(
                worker_id = %worker_id,
                max_restarts = self.config.max_restarts_per_interval,
                interval_ms = self.config.restart_interval_ms,
                "Restart budget exhausted, replacement deferred"
            );
            return Ok(None);
        }

        let replacement = self.spawn_worker(&mut state, slot.queue.clone());
        state.publish_active();
        info!(
            crashed = %worker_id,
            replacement = %replacement,
            "Crashed worker replaced"
        );
        Ok(Some(replacement))
    }

    /// 检查活跃Worker的心跳，超时视为崩溃，返回被判定崩溃的Worker
    pub async fn health_check(&self) -> CapacityResult<Vec<String>> {
        let heartbeat_timeout = self.config.heartbeat_timeout();
        let stale: Vec<String> = {
            let state = self.state.lock().await;
            let now = Instant::now();
            state
                .workers
                .iter()
                .filter(|(_, slot)| slot.is_active())
                .filter(|(_, slot)| {
                    now.saturating_duration_since(slot.counters.last_beat()) > heartbeat_timeout
                })
                .map(|(id, slot)| {
                    slot.handle.abort();
                    id.clone()
                })
                .collect()
        };

        for worker_id in &stale {
            warn!(
                worker_id = %worker_id,
                timeout_ms = self.config.heartbeat_timeout_ms,
                "Worker heartbeat timed out"
            );
            self.on_worker_exit(worker_id, false).await?;
        }
        Ok(stale)
    }

    /// 启动Worker退出监听
    pub fn start_exit_listener(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let Some(mut exits) = manager.exit_rx.lock().await.take() else {
                warn!("Worker exit listener already running");
                return;
            };
            loop {
                tokio::select! {
                    exit = exits.recv() => {
                        let Some(exit) = exit else { break };
                        if let Err(e) = manager.on_worker_exit(&exit.worker_id, exit.intentional).await {
                            error!(worker_id = %exit.worker_id, error = %e, "Failed to handle worker exit");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker exit listener stopped");
                        break;
                    }
                }
            }
        })
    }

    /// 启动周期性心跳检查
    pub fn start_health_loop(
        self: &Arc<Self>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(manager.config.health_check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = manager.health_check().await {
                            error!(error = %e, "Worker health check failed");
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Worker health check loop stopped");
                        break;
                    }
                }
            }
        })
    }

    /// 排空所有Worker，超过 `shutdown_timeout_ms` 仍未退出的直接中止
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::Release);
        let mut slots: Vec<WorkerSlot> = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.workers).into_values().collect()
        };
        info!(workers = slots.len(), "Draining all workers");

        for slot in &slots {
            slot.counters.set_state(WorkerState::Draining);
            let _ = slot.drain_tx.send(true);
        }

        let deadline = Instant::now() + self.config.shutdown_timeout();
        let mut aborted = 0;
        for slot in slots.iter_mut() {
            if timeout_at(deadline, &mut slot.handle).await.is_err() {
                let _ = slot.cancel_tx.send(true);
                slot.handle.abort();
                aborted += 1;
            }
            slot.counters.set_state(WorkerState::Terminated);
        }

        if aborted > 0 {
            warn!(aborted, "Workers aborted after shutdown timeout");
        }
        metrics::gauge!("capacity_workers_active").set(0.0);
        info!("All workers stopped");
        aborted
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    pub async fn active_count(&self) -> usize {
        self.state.lock().await.active_count()
    }

    pub async fn worker_count(&self) -> usize {
        self.state.lock().await.workers.len()
    }

    /// 按创建顺序返回Worker快照
    pub async fn workers(&self) -> Vec<WorkerHandle> {
        let state = self.state.lock().await;
        let mut slots: Vec<(&String, &WorkerSlot)> = state.workers.iter().collect();
        slots.sort_by_key(|(_, slot)| slot.seq);
        slots
            .into_iter()
            .map(|(id, slot)| WorkerHandle {
                id: id.clone(),
                queue: slot.queue.clone(),
                state: slot.counters.state(),
                created_at: slot.created_at,
                last_heartbeat: slot.counters.last_beat_at(),
                processed: slot.counters.processed(),
                errors: slot.counters.errors(),
            })
            .collect()
    }

    fn bound_violation(&self, count: usize) -> CapacityError {
        let violation = CapacityError::ScalingBoundViolation {
            count,
            min: self.config.min_workers,
            max: self.config.max_workers,
        };
        error!("{}", violation);
        violation
    }

    /// 受重启额度限制，把活跃Worker补足到下限
    fn reconcile(&self, state: &mut PoolState) -> CapacityResult<()> {
        if self.shutting_down.load(Ordering::Acquire) {
            return Ok(());
        }
        while state.active_count() < self.config.min_workers {
            if !state.restart_guard.try_acquire(Instant::now()) {
                debug!(
                    active = state.active_count(),
                    min = self.config.min_workers,
                    "Below minimum, waiting for restart budget"
                );
                break;
            }
            let queue = self.pick_queue(state)?;
            let worker_id = self.spawn_worker(state, queue);
            info!(worker_id = %worker_id, "Worker pool topped up to minimum");
        }
        Ok(())
    }

    /// 选择 `已分配 / 权重` 最低的队列，相同时积压更深者优先，再按名称
    fn pick_queue(&self, state: &PoolState) -> CapacityResult<String> {
        let mut assigned: HashMap<&str, usize> = HashMap::new();
        for slot in state.workers.values().filter(|slot| slot.is_active()) {
            *assigned.entry(slot.queue.as_str()).or_default() += 1;
        }

        self.runtime
            .queue_loads()
            .into_iter()
            .min_by(|a, b| {
                let ratio = |name: &str, weight: usize| {
                    assigned.get(name).copied().unwrap_or(0) as f64 / weight.max(1) as f64
                };
                ratio(&a.name, a.weight)
                    .total_cmp(&ratio(&b.name, b.weight))
                    .then_with(|| b.depth.cmp(&a.depth))
                    .then_with(|| a.name.cmp(&b.name))
            })
            .map(|load| load.name)
            .ok_or_else(|| CapacityError::config_error("no queues available for workers"))
    }

    /// 最老的、所在队列仍有其他活跃Worker的Worker
    fn pick_victim(state: &PoolState) -> Option<String> {
        let mut per_queue: HashMap<&str, usize> = HashMap::new();
        for slot in state.workers.values().filter(|slot| slot.is_active()) {
            *per_queue.entry(slot.queue.as_str()).or_default() += 1;
        }

        state
            .workers
            .iter()
            .filter(|(_, slot)| slot.is_active())
            .filter(|(_, slot)| per_queue.get(slot.queue.as_str()).copied().unwrap_or(0) > 1)
            .min_by_key(|(_, slot)| slot.seq)
            .map(|(id, _)| id.clone())
    }

    fn spawn_worker(&self, state: &mut PoolState, queue: String) -> String {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed) + 1;
        let worker_id = format!("worker-{seq}");
        let counters = Arc::new(WorkerCounters::new());
        let (drain_tx, drain_rx) = watch::channel(false);
        let (cancel_tx, cancel) = CancellationSignal::channel();

        let context = WorkerContext {
            worker_id: worker_id.clone(),
            queue: queue.clone(),
            counters: counters.clone(),
            drain: drain_rx.clone(),
            cancel,
            heartbeat_interval: self.config.heartbeat_interval(),
        };

        let runtime = self.runtime.clone();
        let exit_tx = self.exit_tx.clone();
        let id = worker_id.clone();
        let handle = tokio::spawn(async move {
            let outcome = AssertUnwindSafe(runtime.run_worker(context))
                .catch_unwind()
                .await;
            let intentional = match outcome {
                Ok(Ok(())) => *drain_rx.borrow(),
                Ok(Err(e)) => {
                    error!(worker_id = %id, error = %e, "Worker loop failed");
                    false
                }
                Err(_) => {
                    error!(worker_id = %id, "Worker loop panicked");
                    false
                }
            };
            // 接收端关闭说明管理器已经释放
            let _ = exit_tx.send(WorkerExit {
                worker_id: id,
                intentional,
            });
        });

        debug!(worker_id = %worker_id, queue = %queue, "Worker spawned");
        state.workers.insert(
            worker_id.clone(),
            WorkerSlot {
                seq,
                queue,
                created_at: Utc::now(),
                counters,
                drain_tx,
                cancel_tx,
                handle,
            },
        );
        worker_id
    }
}
