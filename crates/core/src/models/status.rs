use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{Alert, MetricSnapshot, NodeStatus, SystemHealth, WorkerHandle};

/// 单个Worker在队列上的处理统计
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueWorkerStats {
    pub worker_id: String,
    pub processed: u64,
    pub errors: u64,
}

/// 队列状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueStatus {
    pub name: String,
    pub depth: usize,
    pub urgent_depth: usize,
    pub in_flight: usize,
    pub capacity: usize,
    pub assigned_workers: usize,
    pub processed: u64,
    pub failed: u64,
    pub retried: u64,
    pub dead_letters: usize,
    pub avg_latency_ms: f64,
    pub workers: Vec<QueueWorkerStats>,
}

/// 供外部运维面板读取的只读状态快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub workers: Vec<WorkerHandle>,
    pub queues: Vec<QueueStatus>,
    pub nodes: Vec<NodeStatus>,
    pub metrics: Vec<MetricSnapshot>,
    pub alerts: Vec<Alert>,
    pub health: SystemHealth,
    pub taken_at: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn health_score(&self) -> u8 {
        self.health.score
    }

    pub fn total_queue_depth(&self) -> usize {
        self.queues.iter().map(|q| q.depth).sum()
    }
}
