use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use capacity_core::config::{AppConfig, ConfigValidator};
use capacity_core::models::{
    Alert, DeadLetter, QueryKind, QueryOutcome, StatusSnapshot, TaskPriority,
};
use capacity_core::traits::{
    AlertSink, LoadSampler, MetricSink, NodeProbe, QueryExecutor, TaskHandler, WorkerRuntime,
};
use capacity_core::{CapacityError, CapacityResult};
use capacity_dispatcher::{HandlerRegistry, TaskQueuePool};
use capacity_observability::{deliver_alerts, LogAlertSink, MetricsEngine};
use capacity_router::{NodeHealthEvent, NodeRouter, TcpNodeProbe};
use capacity_worker::{CapacityManager, ProcessLoadSampler, ScalingDecision};
use chrono::Utc;
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::shutdown::ShutdownManager;

/// 协调器构建器
///
/// 未注入的协作者使用生产实现：日志告警通道、TCP节点探测、进程负载采样。
/// 查询执行器没有默认实现，未注入时 `run_query` 返回配置错误。
pub struct CoordinatorBuilder {
    config: AppConfig,
    registry: HandlerRegistry,
    query_executor: Option<Arc<dyn QueryExecutor>>,
    alert_sink: Option<Arc<dyn AlertSink>>,
    load_sampler: Option<Arc<dyn LoadSampler>>,
    node_probe: Option<Arc<dyn NodeProbe>>,
}

impl CoordinatorBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            query_executor: None,
            alert_sink: None,
            load_sampler: None,
            node_probe: None,
        }
    }

    /// 注册任务处理器，队列通过 `handler` 字段引用 `task_type`
    pub fn with_handler(
        mut self,
        task_type: impl Into<String>,
        handler: Arc<dyn TaskHandler>,
    ) -> Self {
        self.registry.register(task_type, handler);
        self
    }

    pub fn with_query_executor(mut self, executor: Arc<dyn QueryExecutor>) -> Self {
        self.query_executor = Some(executor);
        self
    }

    pub fn with_alert_sink(mut self, sink: Arc<dyn AlertSink>) -> Self {
        self.alert_sink = Some(sink);
        self
    }

    pub fn with_load_sampler(mut self, sampler: Arc<dyn LoadSampler>) -> Self {
        self.load_sampler = Some(sampler);
        self
    }

    pub fn with_node_probe(mut self, probe: Arc<dyn NodeProbe>) -> Self {
        self.node_probe = Some(probe);
        self
    }

    /// 校验配置并组装全部组件，不启动任何后台任务
    pub fn build(self) -> CapacityResult<Coordinator> {
        self.config.validate()?;

        let metrics = Arc::new(MetricsEngine::new(self.config.metrics.clone()));
        let metric_sink: Arc<dyn MetricSink> = metrics.clone();

        let pool = Arc::new(
            TaskQueuePool::new(&self.config.queues, &self.registry)?
                .with_metric_sink(Arc::clone(&metric_sink)),
        );
        let router = Arc::new(
            NodeRouter::new(self.config.router.clone()).with_metric_sink(metric_sink),
        );
        let runtime: Arc<dyn WorkerRuntime> = pool.clone();
        let manager = Arc::new(CapacityManager::new(self.config.scaling.clone(), runtime));

        let alert_sink = self
            .alert_sink
            .unwrap_or_else(|| Arc::new(LogAlertSink::default()) as Arc<dyn AlertSink>);
        let load_sampler = self
            .load_sampler
            .unwrap_or_else(|| Arc::new(ProcessLoadSampler::new()) as Arc<dyn LoadSampler>);
        let node_probe = self
            .node_probe
            .unwrap_or_else(|| Arc::new(TcpNodeProbe::new()) as Arc<dyn NodeProbe>);

        info!(
            queues = self.config.queues.len(),
            replicas = self.config.router.replicas.len(),
            min_workers = self.config.scaling.min_workers,
            max_workers = self.config.scaling.max_workers,
            alert_sink = alert_sink.name(),
            "Coordinator assembled"
        );

        Ok(Coordinator {
            config: self.config,
            pool,
            router,
            manager,
            metrics,
            alert_sink,
            load_sampler,
            node_probe,
            query_executor: self.query_executor,
            shutdown: ShutdownManager::new(),
            handles: tokio::sync::Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            attempt_baseline: Mutex::new((0, 0)),
        })
    }
}

/// 组合根：持有队列池、节点路由、容量管理器和指标引擎
///
/// 对外只暴露提交任务、执行查询、记录指标和状态快照，运行期故障
/// （Worker崩溃、节点失效、任务失败）都在内部吸收。
pub struct Coordinator {
    config: AppConfig,
    pool: Arc<TaskQueuePool>,
    router: Arc<NodeRouter>,
    manager: Arc<CapacityManager>,
    metrics: Arc<MetricsEngine>,
    alert_sink: Arc<dyn AlertSink>,
    load_sampler: Arc<dyn LoadSampler>,
    node_probe: Arc<dyn NodeProbe>,
    query_executor: Option<Arc<dyn QueryExecutor>>,
    shutdown: ShutdownManager,
    handles: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    /// 上一次采样时的 `(attempts, failed_attempts)`
    attempt_baseline: Mutex<(u64, u64)>,
}

impl Coordinator {
    pub fn builder(config: AppConfig) -> CoordinatorBuilder {
        CoordinatorBuilder::new(config)
    }

    /// 启动最小数量的Worker以及所有后台循环
    pub async fn start(self: &Arc<Self>) -> CapacityResult<()> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(CapacityError::Internal("coordinator already started".to_string()));
        }

        let workers = self.manager.initialize().await?;
        info!(workers = ?workers, "Initial worker pool started");

        let handles = vec![
            self.manager.start_exit_listener(self.shutdown.subscribe().await),
            self.manager.start_health_loop(self.shutdown.subscribe().await),
            self.router
                .start_health_loop(Arc::clone(&self.node_probe), self.shutdown.subscribe().await),
            self.spawn_scaling_loop(self.shutdown.subscribe().await),
            self.spawn_sampling_loop(self.shutdown.subscribe().await),
            self.spawn_node_event_listener(self.router.subscribe(), self.shutdown.subscribe().await),
        ];
        self.handles.lock().await.extend(handles);

        info!("Coordinator started");
        Ok(())
    }

    /// 提交任务，只在队列不存在或已满时失败
    pub fn submit_work(
        &self,
        queue: &str,
        payload: Value,
        priority: TaskPriority,
    ) -> CapacityResult<String> {
        self.pool.enqueue(queue, payload, priority)
    }

    /// 按查询类型选择节点并交给执行器
    pub async fn run_query(
        &self,
        query: &str,
        params: &[Value],
        kind: QueryKind,
    ) -> CapacityResult<QueryOutcome> {
        let executor = self
            .query_executor
            .as_ref()
            .ok_or_else(|| CapacityError::config_error("no query executor registered"))?;
        self.router
            .run_query(executor.as_ref(), query, params, kind)
            .await
    }

    pub fn record_metric(&self, name: &str, value: f64) {
        self.metrics.record(name, value);
    }

    pub async fn status_snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            workers: self.manager.workers().await,
            queues: self.pool.statuses(),
            nodes: self.router.statuses(),
            metrics: self.metrics.snapshots(),
            alerts: self.metrics.alerts(),
            health: self.metrics.compute_system_health(),
            taken_at: Utc::now(),
        }
    }

    pub fn dead_letters(&self, queue: &str) -> CapacityResult<Vec<DeadLetter>> {
        self.pool.dead_letters(queue)
    }

    pub fn requeue_dead_letter(&self, queue: &str, task_id: &str) -> CapacityResult<String> {
        self.pool.requeue_dead_letter(queue, task_id)
    }

    /// 采样一次负载并做伸缩决策
    ///
    /// 负载取CPU与内存占用中较高的一个。
    pub async fn evaluate_scaling(&self) -> CapacityResult<ScalingDecision> {
        let sample = self.load_sampler.sample()?;
        let load = sample.cpu_percent.max(sample.memory_percent);
        let decision = self.manager.evaluate_scaling(load).await?;
        if decision.is_action() {
            info!(load, decision = ?decision, "Scaling action applied");
        } else {
            debug!(load, decision = ?decision, "Scaling evaluated");
        }
        Ok(decision)
    }

    /// 采集一轮系统指标，检查阈值并投递新告警
    pub async fn sample_metrics(&self) -> Vec<Alert> {
        match self.load_sampler.sample() {
            Ok(sample) => {
                self.metrics.record("cpu", sample.cpu_percent);
                self.metrics.record("memory", sample.memory_percent);
            }
            Err(e) => warn!(error = %e, "Load sampling failed"),
        }

        self.metrics
            .record("queue_depth", self.pool.total_depth() as f64);
        self.metrics
            .record("active_workers", self.manager.active_count().await as f64);
        self.metrics.record("error_rate", self.error_rate_since_last_sample());
        if let Some(latency) = self.router.mean_latency_ms() {
            self.metrics.record("response_time", latency);
        }
        self.metrics
            .record("unhealthy_nodes", self.router.unhealthy_count() as f64);

        let alerts = self.metrics.evaluate_thresholds();
        if !alerts.is_empty() {
            let delivered = deliver_alerts(self.alert_sink.as_ref(), &alerts).await;
            debug!(raised = alerts.len(), delivered, "Alerts forwarded");
        }
        self.metrics.purge_expired_alerts();
        alerts
    }

    /// 两次采样之间失败尝试占全部尝试的百分比
    fn error_rate_since_last_sample(&self) -> f64 {
        let (attempts, failed) = self.pool.attempt_totals();
        let mut baseline = self
            .attempt_baseline
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let delta_attempts = attempts.saturating_sub(baseline.0);
        let delta_failed = failed.saturating_sub(baseline.1);
        *baseline = (attempts, failed);

        if delta_attempts == 0 {
            0.0
        } else {
            delta_failed as f64 / delta_attempts as f64 * 100.0
        }
    }

    fn spawn_scaling_loop(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(coordinator.config.scaling.evaluation_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_ms = coordinator.config.scaling.evaluation_interval_ms,
                "Scaling loop started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match coordinator.evaluate_scaling().await {
                            Ok(_) => {}
                            Err(e) if e.is_fatal() => {
                                error!(error = %e, "伸缩评估出现致命错误，触发关闭");
                                coordinator.shutdown.shutdown().await;
                                break;
                            }
                            Err(e) => warn!(error = %e, "Scaling evaluation failed"),
                        }
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Scaling loop stopped");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_sampling_loop(self: &Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = interval(coordinator.config.metrics.sampling_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        coordinator.sample_metrics().await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Metric sampling loop stopped");
                        break;
                    }
                }
            }
        })
    }

    fn spawn_node_event_listener(
        self: &Arc<Self>,
        mut events: broadcast::Receiver<NodeHealthEvent>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    event = events.recv() => {
                        match event {
                            Ok(NodeHealthEvent::Degraded { node_id, reason }) => {
                                warn!(node_id = %node_id, reason = %reason, "节点降级");
                            }
                            Ok(NodeHealthEvent::Recovered { node_id }) => {
                                info!(node_id = %node_id, "节点恢复");
                            }
                            Err(RecvError::Lagged(skipped)) => {
                                warn!(skipped, "Node health events lagged");
                            }
                            Err(RecvError::Closed) => break,
                        }
                        coordinator
                            .metrics
                            .record("unhealthy_nodes", coordinator.router.unhealthy_count() as f64);
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Node event listener stopped");
                        break;
                    }
                }
            }
        })
    }

    /// 等待关闭信号（外部调用 `shutdown` 或内部致命错误）
    pub async fn wait_for_shutdown(&self) {
        self.shutdown.wait_for_shutdown().await;
    }

    /// 优雅关闭，返回被强制中止的Worker数量
    ///
    /// 先通知所有后台循环退出，再排空Worker，最后在 `shutdown_timeout_ms`
    /// 内等待循环结束，超时的直接中止。
    pub async fn shutdown(&self) -> usize {
        info!("开始关闭协调器");
        self.shutdown.shutdown().await;
        let aborted = self.manager.shutdown().await;

        let handles: Vec<JoinHandle<()>> = self.handles.lock().await.drain(..).collect();
        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        if timeout(self.config.scaling.shutdown_timeout(), join_all(handles))
            .await
            .is_err()
        {
            warn!(
                loops = abort_handles.len(),
                "Background loops did not stop in time, aborting"
            );
            for handle in abort_handles {
                handle.abort();
            }
        }

        info!(aborted_workers = aborted, "协调器已关闭");
        aborted
    }

    pub async fn is_shutdown(&self) -> bool {
        self.shutdown.is_shutdown().await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<TaskQueuePool> {
        &self.pool
    }

    pub fn router(&self) -> &Arc<NodeRouter> {
        &self.router
    }

    pub fn manager(&self) -> &Arc<CapacityManager> {
        &self.manager
    }

    pub fn metrics(&self) -> &Arc<MetricsEngine> {
        &self.metrics
    }
}
