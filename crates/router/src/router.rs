use std::sync::Arc;
use std::time::Instant;

use capacity_core::config::RouterConfig;
use capacity_core::models::{Node, NodeRole, NodeStatus, QueryKind, QueryOutcome};
use capacity_core::traits::{MetricSink, NodeProbe, NoopMetricSink, QueryExecutor};
use capacity_core::{CapacityError, CapacityResult};
use futures::future::join_all;
use serde_json::Value;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::node_state::{HealthTransition, NodeState};
use crate::strategies::{strategy_for, NodeSelectionStrategy};

/// 节点健康变化通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeHealthEvent {
    Degraded { node_id: String, reason: String },
    Recovered { node_id: String },
}

/// 一次节点选择的结果
#[derive(Debug, Clone)]
pub struct NodeSelection {
    pub state: Arc<NodeState>,
    /// 读请求因没有健康只读节点而回退到主节点
    pub degraded: bool,
}

impl NodeSelection {
    pub fn node(&self) -> &Node {
        self.state.node()
    }
}

/// 读写节点路由器
///
/// 写请求始终落到主节点；读请求在健康的只读节点间按策略选择，
/// 没有健康只读节点时降级到主节点，从不向调用方报错。
pub struct NodeRouter {
    config: RouterConfig,
    primary: Arc<NodeState>,
    replicas: Vec<Arc<NodeState>>,
    strategy: Box<dyn NodeSelectionStrategy>,
    events: broadcast::Sender<NodeHealthEvent>,
    metric_sink: Arc<dyn MetricSink>,
}

impl NodeRouter {
    pub fn new(config: RouterConfig) -> Self {
        let strategy = strategy_for(config.policy);
        Self::with_strategy(config, strategy)
    }

    pub fn with_strategy(config: RouterConfig, strategy: Box<dyn NodeSelectionStrategy>) -> Self {
        let primary = Arc::new(NodeState::new(config.primary.to_node(NodeRole::Primary)));
        let replicas = config
            .replicas
            .iter()
            .map(|replica| Arc::new(NodeState::new(replica.to_node(NodeRole::Replica))))
            .collect();
        let (events, _) = broadcast::channel(64);

        info!(
            primary = %config.primary.id,
            replicas = config.replicas.len(),
            strategy = strategy.name(),
            "Node router initialized"
        );

        Self {
            config,
            primary,
            replicas,
            strategy,
            events,
            metric_sink: Arc::new(NoopMetricSink),
        }
    }

    pub fn with_metric_sink(mut self, metric_sink: Arc<dyn MetricSink>) -> Self {
        self.metric_sink = metric_sink;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeHealthEvent> {
        self.events.subscribe()
    }

    pub fn primary(&self) -> &Node {
        self.primary.node()
    }

    /// 为一次查询选择节点
    pub fn select_node(&self, kind: QueryKind) -> NodeSelection {
        if kind == QueryKind::Write {
            return NodeSelection {
                state: self.primary.clone(),
                degraded: false,
            };
        }

        let eligible: Vec<Arc<NodeState>> = self
            .replicas
            .iter()
            .filter(|replica| replica.is_healthy())
            .cloned()
            .collect();

        match self.strategy.select(&eligible) {
            Some(index) => NodeSelection {
                state: eligible[index].clone(),
                degraded: false,
            },
            None => {
                if !self.replicas.is_empty() {
                    warn!(
                        error = %CapacityError::AllNodesUnhealthy,
                        primary = %self.primary.id(),
                        "No healthy replica, routing read to primary"
                    );
                }
                NodeSelection {
                    state: self.primary.clone(),
                    degraded: !self.replicas.is_empty(),
                }
            }
        }
    }

    fn find(&self, node_id: &str) -> Option<&Arc<NodeState>> {
        std::iter::once(&self.primary)
            .chain(self.replicas.iter())
            .find(|state| state.id() == node_id)
    }

    /// 记录查询结果，连续失败达到阈值时立即摘除节点
    pub fn record_outcome(&self, node_id: &str, latency_ms: f64, success: bool) -> CapacityResult<()> {
        let state = self
            .find(node_id)
            .ok_or_else(|| CapacityError::node_not_found(node_id))?;

        let transition = state.record_outcome(
            latency_ms,
            success,
            self.config.failure_threshold,
            self.config.latency_smoothing,
        );
        if transition == Some(HealthTransition::BecameUnhealthy) {
            let reason = format!(
                "{} consecutive query failures",
                self.config.failure_threshold
            );
            warn!(node_id = %node_id, reason = %reason, "Node marked unhealthy");
            self.publish(NodeHealthEvent::Degraded {
                node_id: node_id.to_string(),
                reason,
            });
        }
        Ok(())
    }

    /// 选择节点并通过执行器运行查询
    pub async fn run_query(
        &self,
        executor: &dyn QueryExecutor,
        query: &str,
        params: &[Value],
        kind: QueryKind,
    ) -> CapacityResult<QueryOutcome> {
        let selection = self.select_node(kind);
        let node_id = selection.state.id().to_string();
        let guard = selection.state.acquire();

        let started = Instant::now();
        let result = executor.execute(guard.node(), query, params).await;
        let elapsed = started.elapsed();
        drop(guard);

        let latency_ms = elapsed.as_secs_f64() * 1000.0;
        let success = result.is_ok();
        self.record_outcome(&node_id, latency_ms, success)?;
        self.metric_sink.record("query_latency_ms", latency_ms);

        let outcome = if success { "success" } else { "failure" };
        let kind_label = match kind {
            QueryKind::Read => "read",
            QueryKind::Write => "write",
        };
        metrics::counter!(
            "capacity_queries_total",
            "node" => node_id.clone(),
            "kind" => kind_label,
            "outcome" => outcome
        )
        .increment(1);
        metrics::histogram!("capacity_query_duration_seconds", "node" => node_id.clone())
            .record(elapsed.as_secs_f64());

        match result {
            Ok(value) => {
                debug!(node_id = %node_id, latency_ms, degraded = selection.degraded, "Query completed");
                Ok(QueryOutcome {
                    node_id,
                    value,
                    latency_ms,
                    degraded: selection.degraded,
                })
            }
            Err(e) => {
                warn!(node_id = %node_id, latency_ms, error = %e, "Query failed");
                Err(e)
            }
        }
    }

    /// 对所有节点执行一轮探测
    pub async fn check_health(&self, probe: &dyn NodeProbe) {
        let probe_timeout = self.config.probe_timeout();
        let nodes: Vec<&Arc<NodeState>> =
            std::iter::once(&self.primary).chain(self.replicas.iter()).collect();

        let results = join_all(nodes.iter().map(|state| async move {
            match timeout(probe_timeout, probe.probe(state.node())).await {
                Ok(Ok(())) => Ok(()),
                Ok(Err(e)) => Err(e.to_string()),
                Err(_) => Err(format!("probe timed out after {probe_timeout:?}")),
            }
        }))
        .await;

        for (state, result) in nodes.into_iter().zip(results) {
            match result {
                Ok(()) => {
                    if state.mark_healthy() {
                        info!(node_id = %state.id(), "Node recovered");
                        self.publish(NodeHealthEvent::Recovered {
                            node_id: state.id().to_string(),
                        });
                    }
                }
                Err(reason) => {
                    if state.mark_unhealthy() {
                        warn!(node_id = %state.id(), reason = %reason, "Node health probe failed");
                        self.publish(NodeHealthEvent::Degraded {
                            node_id: state.id().to_string(),
                            reason,
                        });
                    } else {
                        debug!(node_id = %state.id(), reason = %reason, "Node still unhealthy");
                    }
                }
            }
        }
    }

    /// 启动周期性健康检查
    pub fn start_health_loop(
        self: &Arc<Self>,
        probe: Arc<dyn NodeProbe>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let router = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(router.config.health_check_interval());
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            info!(
                interval_ms = router.config.health_check_interval_ms,
                "Node health check loop started"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        router.check_health(probe.as_ref()).await;
                    }
                    _ = shutdown_rx.recv() => {
                        info!("Node health check loop stopped");
                        break;
                    }
                }
            }
        })
    }

    fn publish(&self, event: NodeHealthEvent) {
        // 没有订阅者时发送失败是正常情况
        if self.events.send(event).is_err() {
            debug!("No subscribers for node health events");
        }
    }

    pub fn statuses(&self) -> Vec<NodeStatus> {
        std::iter::once(&self.primary)
            .chain(self.replicas.iter())
            .map(|state| state.status())
            .collect()
    }

    pub fn unhealthy_count(&self) -> usize {
        std::iter::once(&self.primary)
            .chain(self.replicas.iter())
            .filter(|state| !state.is_healthy())
            .count()
    }

    /// 已有查询记录的节点的平均延迟
    pub fn mean_latency_ms(&self) -> Option<f64> {
        let latencies: Vec<f64> = std::iter::once(&self.primary)
            .chain(self.replicas.iter())
            .filter_map(|state| state.avg_latency_ms())
            .collect();
        if latencies.is_empty() {
            None
        } else {
            Some(latencies.iter().sum::<f64>() / latencies.len() as f64)
        }
    }
}
