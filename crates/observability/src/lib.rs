pub mod alerting;
pub mod exporter;
pub mod health;
pub mod metrics_engine;
pub mod series;

pub use alerting::{deliver_alerts, AlertBook, LogAlertSink};
pub use exporter::{install_prometheus_exporter, mirror_gauge, prometheus_name};
pub use health::{compute_system_health, CRITICAL_SUBSET};
pub use metrics_engine::MetricsEngine;
pub use series::MetricSeries;
