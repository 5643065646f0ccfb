pub mod app_config;
pub mod metrics;
pub mod observability;
pub mod queue;
pub mod router;
pub mod scaling;

pub use app_config::AppConfig;
pub use metrics::{MetricsConfig, ThresholdConfig};
pub use observability::{LogConfig, LogFormat, ObservabilityConfig};
pub use queue::QueueConfig;
pub use router::{NodeConfig, RouterConfig};
pub use scaling::ScalingConfig;
