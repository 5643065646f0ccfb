use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use async_trait::async_trait;
use capacity_core::models::{Alert, AlertSeverity};
use capacity_core::traits::AlertSink;
use capacity_core::CapacityResult;
use tokio::time::Instant;
use tracing::{error, info, warn};

/// 告警冷却与历史记录
///
/// 冷却按 (指标, 级别) 独立计时；历史按产生顺序保存，超过保留期或数量
/// 上限时从最旧的开始淘汰。
#[derive(Debug)]
pub struct AlertBook {
    cooldown: Duration,
    retention: Duration,
    max_alerts: usize,
    last_fired: HashMap<(String, AlertSeverity), Instant>,
    history: VecDeque<(Instant, Alert)>,
}

impl AlertBook {
    pub fn new(cooldown: Duration, retention: Duration, max_alerts: usize) -> Self {
        Self {
            cooldown,
            retention,
            max_alerts: max_alerts.max(1),
            last_fired: HashMap::new(),
            history: VecDeque::new(),
        }
    }

    /// 该指标该级别当前是否已过冷却期
    pub fn is_ready(&self, metric: &str, severity: AlertSeverity, now: Instant) -> bool {
        match self.last_fired.get(&(metric.to_string(), severity)) {
            Some(last) => now.duration_since(*last) >= self.cooldown,
            None => true,
        }
    }

    pub fn record(&mut self, alert: Alert, now: Instant) {
        self.last_fired
            .insert((alert.metric.clone(), alert.severity), now);
        self.history.push_back((now, alert));
        while self.history.len() > self.max_alerts {
            self.history.pop_front();
        }
    }

    /// 清理超过保留期的告警，返回清理数量
    pub fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.history.len();
        while let Some((fired_at, _)) = self.history.front() {
            if now.duration_since(*fired_at) < self.retention {
                break;
            }
            self.history.pop_front();
        }

        let cooldown = self.cooldown;
        self.last_fired
            .retain(|_, fired_at| now.duration_since(*fired_at) < cooldown);
        before - self.history.len()
    }

    pub fn all(&self) -> Vec<Alert> {
        self.history.iter().map(|(_, alert)| alert.clone()).collect()
    }

    /// 最近的 `limit` 条告警，按时间先后排列
    pub fn recent(&self, limit: usize) -> Vec<Alert> {
        let skip = self.history.len().saturating_sub(limit);
        self.history
            .iter()
            .skip(skip)
            .map(|(_, alert)| alert.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }
}

/// 把告警推送给通道；投递失败只记录日志
pub async fn deliver_alerts(sink: &dyn AlertSink, alerts: &[Alert]) -> usize {
    let mut delivered = 0;
    for alert in alerts {
        match sink.deliver(alert).await {
            Ok(()) => delivered += 1,
            Err(e) => error!(
                sink = sink.name(),
                alert_id = %alert.id,
                metric = %alert.metric,
                error = %e,
                "Failed to deliver alert"
            ),
        }
    }
    delivered
}

/// 写入日志的告警通道
pub struct LogAlertSink {
    name: String,
}

impl LogAlertSink {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for LogAlertSink {
    fn default() -> Self {
        Self::new("log")
    }
}

#[async_trait]
impl AlertSink for LogAlertSink {
    async fn deliver(&self, alert: &Alert) -> CapacityResult<()> {
        match alert.severity {
            AlertSeverity::Critical => error!(
                channel = %self.name,
                alert_id = %alert.id,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                trend = ?alert.trend,
                "{}",
                alert.message()
            ),
            AlertSeverity::Warning => warn!(
                channel = %self.name,
                alert_id = %alert.id,
                metric = %alert.metric,
                value = alert.value,
                threshold = alert.threshold,
                trend = ?alert.trend,
                "{}",
                alert.message()
            ),
        }
        info!(channel = %self.name, alert_id = %alert.id, "Alert notification sent");
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}
