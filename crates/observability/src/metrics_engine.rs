use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use capacity_core::config::MetricsConfig;
use capacity_core::models::{Alert, AlertSeverity, MetricSnapshot, SystemHealth, Trend};
use capacity_core::traits::MetricSink;
use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::alerting::AlertBook;
use crate::exporter::mirror_gauge;
use crate::health::compute_system_health;
use crate::series::MetricSeries;

/// 指标与告警引擎
///
/// 样本写入是系统里最频繁的操作：注册表只在首次出现新指标时加写锁，
/// 之后每个指标各自持有一把互斥锁，不同指标的写入互不阻塞。
pub struct MetricsEngine {
    config: MetricsConfig,
    series: RwLock<HashMap<String, Arc<Mutex<MetricSeries>>>>,
    alerts: Mutex<AlertBook>,
}

impl MetricsEngine {
    pub fn new(config: MetricsConfig) -> Self {
        let alerts = AlertBook::new(
            config.alert_cooldown(),
            config.alert_retention(),
            config.max_alerts,
        );
        Self {
            config,
            series: RwLock::new(HashMap::new()),
            alerts: Mutex::new(alerts),
        }
    }

    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// 写入一个样本，非有限值直接丢弃
    pub fn record(&self, name: &str, value: f64) {
        if !value.is_finite() {
            debug!(metric = name, value, "Dropping non-finite metric sample");
            return;
        }

        let series = self.series_for(name);
        series
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
        mirror_gauge(name, value);
    }

    fn series_for(&self, name: &str) -> Arc<Mutex<MetricSeries>> {
        if let Some(series) = self
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
        {
            return series.clone();
        }

        let mut registry = self.series.write().unwrap_or_else(PoisonError::into_inner);
        registry
            .entry(name.to_string())
            .or_insert_with(|| {
                Arc::new(Mutex::new(MetricSeries::new(name, self.config.history_size)))
            })
            .clone()
    }

    fn existing(&self, name: &str) -> Option<Arc<Mutex<MetricSeries>>> {
        self.series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn snapshot(&self, name: &str) -> Option<MetricSnapshot> {
        let series = self.existing(name)?;
        let series = series.lock().unwrap_or_else(PoisonError::into_inner);
        if series.is_empty() {
            return None;
        }
        Some(series.snapshot(
            self.config.trend_min_samples,
            self.config.trend_change_percent,
        ))
    }

    /// 所有指标的快照，按名称排序
    pub fn snapshots(&self) -> Vec<MetricSnapshot> {
        let all: Vec<Arc<Mutex<MetricSeries>>> = self
            .series
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();

        let mut snapshots: Vec<MetricSnapshot> = all
            .iter()
            .filter_map(|series| {
                let series = series.lock().unwrap_or_else(PoisonError::into_inner);
                (!series.is_empty()).then(|| {
                    series.snapshot(
                        self.config.trend_min_samples,
                        self.config.trend_change_percent,
                    )
                })
            })
            .collect();
        snapshots.sort_by(|a, b| a.name.cmp(&b.name));
        snapshots
    }

    pub fn classify_trend(&self, name: &str) -> Trend {
        self.existing(name)
            .map(|series| {
                series
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .trend(self.config.trend_min_samples, self.config.trend_change_percent)
            })
            .unwrap_or_default()
    }

    /// 检查所有配置了阈值的指标，返回本轮新产生的告警
    ///
    /// 越线需要最近 `sustain_samples` 个样本都在阈值之上。严重级别越线但仍在
    /// 冷却期时，按警告级别及其自身的冷却期判断。
    pub fn evaluate_thresholds(&self) -> Vec<Alert> {
        let now = Instant::now();
        let sustain = self.config.sustain_samples;
        let mut book = self.alerts.lock().unwrap_or_else(PoisonError::into_inner);
        let mut raised = Vec::new();

        for (metric, threshold) in &self.config.thresholds {
            let Some(series) = self.existing(metric) else {
                continue;
            };
            let (current, critical, warning, trend) = {
                let series = series.lock().unwrap_or_else(PoisonError::into_inner);
                let Some(current) = series.current() else {
                    continue;
                };
                (
                    current,
                    series.sustained_at_or_above(threshold.critical, sustain),
                    series.sustained_at_or_above(threshold.warning, sustain),
                    series.trend(self.config.trend_min_samples, self.config.trend_change_percent),
                )
            };

            let critical_ready = critical && book.is_ready(metric, AlertSeverity::Critical, now);
            let warning_ready = warning && book.is_ready(metric, AlertSeverity::Warning, now);
            let (severity, limit) = if critical_ready {
                (AlertSeverity::Critical, threshold.critical)
            } else if warning_ready {
                (AlertSeverity::Warning, threshold.warning)
            } else {
                if warning {
                    debug!(metric = %metric, value = current, "Alert suppressed by cooldown");
                }
                continue;
            };

            let alert = Alert {
                id: Uuid::new_v4().to_string(),
                metric: metric.clone(),
                severity,
                value: current,
                threshold: limit,
                timestamp: Utc::now(),
                trend,
            };
            warn!(
                alert_id = %alert.id,
                metric = %alert.metric,
                severity = %alert.severity,
                value = alert.value,
                threshold = alert.threshold,
                "ALERT TRIGGERED"
            );
            book.record(alert.clone(), now);
            raised.push(alert);
        }

        raised
    }

    pub fn compute_system_health(&self) -> SystemHealth {
        compute_system_health(&self.snapshots(), &self.config.thresholds)
    }

    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .all()
    }

    pub fn recent_alerts(&self, limit: usize) -> Vec<Alert> {
        self.alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recent(limit)
    }

    pub fn purge_expired_alerts(&self) -> usize {
        let purged = self
            .alerts
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .purge_expired(Instant::now());
        if purged > 0 {
            info!(purged, "Purged expired alerts");
        }
        purged
    }
}

impl MetricSink for MetricsEngine {
    fn record(&self, name: &str, value: f64) {
        MetricsEngine::record(self, name, value);
    }
}
