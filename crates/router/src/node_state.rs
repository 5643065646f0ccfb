use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use capacity_core::models::{Node, NodeHealth, NodeStatus};

/// 健康状态变化
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthTransition {
    BecameUnhealthy,
    BecameHealthy,
}

/// 单个节点的运行时状态
///
/// 计数器全部是原子量，选择节点和记录结果都不需要路由器级别的锁。
#[derive(Debug)]
pub struct NodeState {
    node: Node,
    active_connections: AtomicUsize,
    total_queries: AtomicU64,
    failed_queries: AtomicU64,
    consecutive_failures: AtomicU32,
    healthy: AtomicBool,
    avg_latency_ms: Mutex<Option<f64>>,
}

impl NodeState {
    pub fn new(node: Node) -> Self {
        Self {
            node,
            active_connections: AtomicUsize::new(0),
            total_queries: AtomicU64::new(0),
            failed_queries: AtomicU64::new(0),
            consecutive_failures: AtomicU32::new(0),
            healthy: AtomicBool::new(true),
            avg_latency_ms: Mutex::new(None),
        }
    }

    pub fn node(&self) -> &Node {
        &self.node
    }

    pub fn id(&self) -> &str {
        &self.node.id
    }

    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    pub fn active_connections(&self) -> usize {
        self.active_connections.load(Ordering::Acquire)
    }

    pub fn avg_latency_ms(&self) -> Option<f64> {
        *self.avg_latency_ms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 占用一个连接，守卫释放时归还
    pub fn acquire(self: &Arc<Self>) -> ConnectionGuard {
        self.active_connections.fetch_add(1, Ordering::AcqRel);
        ConnectionGuard { state: self.clone() }
    }

    /// 记录一次查询结果
    ///
    /// 连续失败达到 `failure_threshold` 时立即标记为不健康；成功只清零连续
    /// 失败计数，恢复健康需要通过探测。
    pub fn record_outcome(
        &self,
        latency_ms: f64,
        success: bool,
        failure_threshold: u32,
        smoothing: f64,
    ) -> Option<HealthTransition> {
        self.total_queries.fetch_add(1, Ordering::Relaxed);

        if latency_ms.is_finite() && latency_ms >= 0.0 {
            let mut avg = self.avg_latency_ms.lock().unwrap_or_else(PoisonError::into_inner);
            *avg = Some(match *avg {
                Some(previous) => previous + smoothing * (latency_ms - previous),
                None => latency_ms,
            });
        }

        if success {
            self.consecutive_failures.store(0, Ordering::Release);
            return None;
        }

        self.failed_queries.fetch_add(1, Ordering::Relaxed);
        let failures = self.consecutive_failures.fetch_add(1, Ordering::AcqRel) + 1;
        if failures >= failure_threshold && self.mark_unhealthy() {
            return Some(HealthTransition::BecameUnhealthy);
        }
        None
    }

    /// 返回true表示状态由健康变为不健康
    pub fn mark_unhealthy(&self) -> bool {
        self.healthy.swap(false, Ordering::AcqRel)
    }

    /// 返回true表示状态由不健康变为健康
    pub fn mark_healthy(&self) -> bool {
        self.consecutive_failures.store(0, Ordering::Release);
        !self.healthy.swap(true, Ordering::AcqRel)
    }

    pub fn status(&self) -> NodeStatus {
        NodeStatus {
            id: self.node.id.clone(),
            endpoint: self.node.endpoint.clone(),
            role: self.node.role,
            weight: self.node.weight,
            health: if self.is_healthy() {
                NodeHealth::Healthy
            } else {
                NodeHealth::Unhealthy
            },
            active_connections: self.active_connections(),
            avg_latency_ms: self.avg_latency_ms().unwrap_or_default(),
            total_queries: self.total_queries.load(Ordering::Relaxed),
            failed_queries: self.failed_queries.load(Ordering::Relaxed),
            consecutive_failures: self.consecutive_failures.load(Ordering::Acquire),
        }
    }
}

/// 活跃连接计数守卫
#[derive(Debug)]
pub struct ConnectionGuard {
    state: Arc<NodeState>,
}

impl ConnectionGuard {
    pub fn node(&self) -> &Node {
        self.state.node()
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.state.active_connections.fetch_sub(1, Ordering::AcqRel);
    }
}
