use std::collections::VecDeque;
use std::time::Duration;

use tokio::time::Instant;

/// 崩溃重启次数限制
///
/// 滑动窗口内最多允许 `max_restarts` 次重启，超出后拒绝，直到最早的
/// 记录滑出窗口。
#[derive(Debug)]
pub struct RestartGuard {
    max_restarts: usize,
    window: Duration,
    restarts: VecDeque<Instant>,
}

impl RestartGuard {
    pub fn new(max_restarts: usize, window: Duration) -> Self {
        Self {
            max_restarts,
            window,
            restarts: VecDeque::with_capacity(max_restarts),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.restarts.front() {
            if now.saturating_duration_since(*oldest) >= self.window {
                self.restarts.pop_front();
            } else {
                break;
            }
        }
    }

    /// 尝试占用一次重启额度
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.prune(now);
        if self.restarts.len() >= self.max_restarts {
            return false;
        }
        self.restarts.push_back(now);
        true
    }

    /// 窗口内剩余的重启额度
    pub fn remaining(&mut self, now: Instant) -> usize {
        self.prune(now);
        self.max_restarts.saturating_sub(self.restarts.len())
    }
}
