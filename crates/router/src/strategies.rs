use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use capacity_core::models::SelectionPolicy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::node_state::NodeState;

/// 只读节点选择策略
///
/// 候选集合已经过滤为健康的只读节点，且不为空时才会调用。
pub trait NodeSelectionStrategy: Send + Sync {
    /// 返回选中节点在 `candidates` 中的下标
    fn select(&self, candidates: &[Arc<NodeState>]) -> Option<usize>;

    fn name(&self) -> &str;
}

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSelectionStrategy for RoundRobinStrategy {
    fn select(&self, candidates: &[Arc<NodeState>]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        debug!(
            "轮询策略选择节点: {} (索引: {}/{})",
            candidates[index].id(),
            index,
            candidates.len()
        );
        Some(index)
    }

    fn name(&self) -> &str {
        "RoundRobin"
    }
}

/// 最少活跃连接，连接数相同时轮询
pub struct LeastConnectionsStrategy {
    tie_breaker: AtomicUsize,
}

impl LeastConnectionsStrategy {
    pub fn new() -> Self {
        Self {
            tie_breaker: AtomicUsize::new(0),
        }
    }
}

impl Default for LeastConnectionsStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSelectionStrategy for LeastConnectionsStrategy {
    fn select(&self, candidates: &[Arc<NodeState>]) -> Option<usize> {
        let fewest = candidates.iter().map(|c| c.active_connections()).min()?;
        let tied: Vec<usize> = candidates
            .iter()
            .enumerate()
            .filter(|(_, c)| c.active_connections() == fewest)
            .map(|(i, _)| i)
            .collect();
        if tied.is_empty() {
            return None;
        }

        let index = tied[self.tie_breaker.fetch_add(1, Ordering::Relaxed) % tied.len()];
        debug!(
            "最少连接策略选择节点: {} (活跃连接: {})",
            candidates[index].id(),
            fewest
        );
        Some(index)
    }

    fn name(&self) -> &str {
        "LeastConnections"
    }
}

/// 按权重比例随机选择（累积权重抽样）
pub struct WeightedStrategy {
    rng: Mutex<StdRng>,
}

impl WeightedStrategy {
    pub fn new() -> Self {
        Self {
            rng: Mutex::new(StdRng::from_os_rng()),
        }
    }

    /// 固定随机种子，便于复现
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }
}

impl Default for WeightedStrategy {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeSelectionStrategy for WeightedStrategy {
    fn select(&self, candidates: &[Arc<NodeState>]) -> Option<usize> {
        let total: u64 = candidates.iter().map(|c| u64::from(c.node().weight)).sum();
        if total == 0 {
            return None;
        }

        let draw = self
            .rng
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .random_range(0..total);

        let mut cumulative = 0u64;
        for (index, candidate) in candidates.iter().enumerate() {
            cumulative += u64::from(candidate.node().weight);
            if draw < cumulative {
                debug!(
                    "加权策略选择节点: {} (权重: {}/{})",
                    candidate.id(),
                    candidate.node().weight,
                    total
                );
                return Some(index);
            }
        }
        None
    }

    fn name(&self) -> &str {
        "Weighted"
    }
}

/// 根据配置创建策略
pub fn strategy_for(policy: SelectionPolicy) -> Box<dyn NodeSelectionStrategy> {
    match policy {
        SelectionPolicy::RoundRobin => Box::new(RoundRobinStrategy::new()),
        SelectionPolicy::LeastConnections => Box::new(LeastConnectionsStrategy::new()),
        SelectionPolicy::Weighted => Box::new(WeightedStrategy::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use capacity_core::models::{Node, NodeRole};
    use std::collections::HashMap;

    fn replicas(weights: &[u32]) -> Vec<Arc<NodeState>> {
        weights
            .iter()
            .enumerate()
            .map(|(i, weight)| {
                Arc::new(NodeState::new(Node {
                    id: format!("replica-{}", i + 1),
                    endpoint: format!("10.0.0.{}:5432", i + 1),
                    role: NodeRole::Replica,
                    weight: *weight,
                }))
            })
            .collect()
    }

    #[test]
    fn test_round_robin_visits_each_once() {
        let strategy = RoundRobinStrategy::new();
        let candidates = replicas(&[1, 1, 1, 1]);
        let mut seen: Vec<usize> = (0..4)
            .map(|_| strategy.select(&candidates).unwrap())
            .collect();
        seen.sort();
        assert_eq!(seen, vec![0, 1, 2, 3]);
        assert_eq!(strategy.select(&[]), None);
    }

    #[test]
    fn test_least_connections_prefers_idle_node() {
        let strategy = LeastConnectionsStrategy::new();
        let candidates = replicas(&[1, 1, 1]);
        let _busy_a = candidates[0].acquire();
        let _busy_b = candidates[2].acquire();
        for _ in 0..5 {
            assert_eq!(strategy.select(&candidates), Some(1));
        }
    }

    #[test]
    fn test_least_connections_ties_rotate() {
        let strategy = LeastConnectionsStrategy::new();
        let candidates = replicas(&[1, 1]);
        let first = strategy.select(&candidates).unwrap();
        let second = strategy.select(&candidates).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn test_weighted_distribution_follows_weights() {
        let strategy = WeightedStrategy::with_seed(7);
        let candidates = replicas(&[1, 3]);
        let mut counts: HashMap<usize, usize> = HashMap::new();
        for _ in 0..4000 {
            *counts.entry(strategy.select(&candidates).unwrap()).or_default() += 1;
        }
        let heavy = counts[&1] as f64 / 4000.0;
        assert!((0.68..0.82).contains(&heavy), "heavy share was {heavy}");
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(strategy_for(SelectionPolicy::RoundRobin).name(), "RoundRobin");
        assert_eq!(
            strategy_for(SelectionPolicy::LeastConnections).name(),
            "LeastConnections"
        );
        assert_eq!(strategy_for(SelectionPolicy::Weighted).name(), "Weighted");
    }
}
