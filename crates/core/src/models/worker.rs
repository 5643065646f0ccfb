use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

/// Worker生命周期状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    Starting,
    Online,
    Draining,
    Terminated,
}

impl WorkerState {
    fn as_u8(self) -> u8 {
        match self {
            WorkerState::Starting => 0,
            WorkerState::Online => 1,
            WorkerState::Draining => 2,
            WorkerState::Terminated => 3,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => WorkerState::Starting,
            1 => WorkerState::Online,
            2 => WorkerState::Draining,
            _ => WorkerState::Terminated,
        }
    }

    /// 计入 [min, max] 的活跃状态
    pub fn is_active(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Online)
    }
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            WorkerState::Starting => "starting",
            WorkerState::Online => "online",
            WorkerState::Draining => "draining",
            WorkerState::Terminated => "terminated",
        };
        write!(f, "{s}")
    }
}

/// Worker运行时计数器
///
/// 由容量管理器创建，分发循环在执行任务时更新。所有字段都可以在
/// 不持有池锁的情况下并发读写。
#[derive(Debug)]
pub struct WorkerCounters {
    processed: AtomicU64,
    errors: AtomicU64,
    state: AtomicU8,
    heartbeat: Mutex<(Instant, DateTime<Utc>)>,
}

impl WorkerCounters {
    pub fn new() -> Self {
        Self {
            processed: AtomicU64::new(0),
            errors: AtomicU64::new(0),
            state: AtomicU8::new(WorkerState::Starting.as_u8()),
            heartbeat: Mutex::new((Instant::now(), Utc::now())),
        }
    }

    /// 刷新心跳
    pub fn beat(&self) {
        let mut heartbeat = self.heartbeat.lock().unwrap_or_else(PoisonError::into_inner);
        *heartbeat = (Instant::now(), Utc::now());
    }

    pub fn last_beat(&self) -> Instant {
        self.heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .0
    }

    pub fn last_beat_at(&self) -> DateTime<Utc> {
        self.heartbeat
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .1
    }

    pub fn record_success(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: WorkerState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    /// 仅当当前状态为 `from` 时切换到 `to`
    pub fn transition(&self, from: WorkerState, to: WorkerState) -> bool {
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for WorkerCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Worker句柄快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHandle {
    pub id: String,
    pub queue: String,
    pub state: WorkerState,
    pub created_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub processed: u64,
    pub errors: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_start_in_starting_state() {
        let counters = WorkerCounters::new();
        assert_eq!(counters.state(), WorkerState::Starting);
        assert_eq!(counters.processed(), 0);
        assert_eq!(counters.errors(), 0);
    }

    #[test]
    fn test_transition_only_from_expected_state() {
        let counters = WorkerCounters::new();
        assert!(counters.transition(WorkerState::Starting, WorkerState::Online));
        assert!(!counters.transition(WorkerState::Starting, WorkerState::Online));
        assert_eq!(counters.state(), WorkerState::Online);

        counters.set_state(WorkerState::Draining);
        assert!(!counters.state().is_active());
    }

    #[test]
    fn test_record_counts() {
        let counters = WorkerCounters::new();
        counters.record_success();
        counters.record_success();
        counters.record_error();
        assert_eq!(counters.processed(), 2);
        assert_eq!(counters.errors(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_beat_moves_heartbeat_forward() {
        let counters = WorkerCounters::new();
        let first = counters.last_beat();
        tokio::time::advance(std::time::Duration::from_secs(5)).await;
        counters.beat();
        assert!(counters.last_beat() - first >= std::time::Duration::from_secs(5));
    }
}
