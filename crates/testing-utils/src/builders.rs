//! Config builders with test-friendly timings
//!
//! Production defaults use second-to-minute intervals; these builders shrink
//! them so loops tick quickly in tests while keeping every value valid.

use capacity_core::config::{
    AppConfig, MetricsConfig, NodeConfig, QueueConfig, RouterConfig, ScalingConfig,
};
use capacity_core::models::SelectionPolicy;

/// Builder for [`ScalingConfig`]
pub struct ScalingConfigBuilder {
    config: ScalingConfig,
}

impl ScalingConfigBuilder {
    pub fn new(min_workers: usize, max_workers: usize) -> Self {
        Self {
            config: ScalingConfig {
                min_workers,
                max_workers,
                scale_up_threshold_percent: 80.0,
                scale_down_threshold_percent: 20.0,
                cooldown_ms: 1_000,
                evaluation_interval_ms: 50,
                health_check_interval_ms: 50,
                heartbeat_timeout_ms: 500,
                heartbeat_interval_ms: 20,
                max_restarts_per_interval: 5,
                restart_interval_ms: 60_000,
                shutdown_timeout_ms: 2_000,
            },
        }
    }

    pub fn with_cooldown_ms(mut self, cooldown_ms: u64) -> Self {
        self.config.cooldown_ms = cooldown_ms;
        self
    }

    pub fn with_thresholds(mut self, up: f64, down: f64) -> Self {
        self.config.scale_up_threshold_percent = up;
        self.config.scale_down_threshold_percent = down;
        self
    }

    pub fn with_restart_guard(mut self, max_restarts: usize, interval_ms: u64) -> Self {
        self.config.max_restarts_per_interval = max_restarts;
        self.config.restart_interval_ms = interval_ms;
        self
    }

    pub fn with_heartbeat(mut self, interval_ms: u64, timeout_ms: u64) -> Self {
        self.config.heartbeat_interval_ms = interval_ms;
        self.config.heartbeat_timeout_ms = timeout_ms;
        self
    }

    pub fn build(self) -> ScalingConfig {
        self.config
    }
}

/// Queue config that retries immediately and polls fast
pub fn fast_queue(name: &str, handler: &str) -> QueueConfig {
    QueueConfig::new(name, handler)
        .with_retry_delay(0, 0)
        .with_idle_backoff(5)
}

/// Router config with one primary and `replicas` replicas named `replica-1..n`
pub fn router_config(replicas: usize, policy: SelectionPolicy) -> RouterConfig {
    RouterConfig {
        primary: NodeConfig::new("primary", "127.0.0.1:5432"),
        replicas: (1..=replicas)
            .map(|i| NodeConfig::new(format!("replica-{i}"), format!("10.0.0.{i}:5432")))
            .collect(),
        policy,
        health_check_interval_ms: 50,
        probe_timeout_ms: 50,
        ..RouterConfig::default()
    }
}

/// Metrics config with a short cooldown and no sustain requirement
pub fn metrics_config() -> MetricsConfig {
    MetricsConfig {
        sampling_interval_ms: 50,
        alert_cooldown_ms: 60_000,
        sustain_samples: 1,
        ..MetricsConfig::default()
    }
}

/// Builder for a complete [`AppConfig`]
pub struct AppConfigBuilder {
    config: AppConfig,
}

impl AppConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig {
                scaling: ScalingConfigBuilder::new(1, 4).build(),
                queues: vec![fast_queue("default", "scripted")],
                router: router_config(2, SelectionPolicy::RoundRobin),
                metrics: metrics_config(),
                ..AppConfig::default()
            },
        }
    }

    pub fn with_scaling(mut self, scaling: ScalingConfig) -> Self {
        self.config.scaling = scaling;
        self
    }

    pub fn with_queues(mut self, queues: Vec<QueueConfig>) -> Self {
        self.config.queues = queues;
        self
    }

    pub fn with_router(mut self, router: RouterConfig) -> Self {
        self.config.router = router;
        self
    }

    pub fn with_metrics(mut self, metrics: MetricsConfig) -> Self {
        self.config.metrics = metrics;
        self
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for AppConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
