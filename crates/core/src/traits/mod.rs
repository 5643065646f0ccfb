pub mod alert_sink;
pub mod load_sampler;
pub mod metric_sink;
pub mod node_probe;
pub mod query_executor;
pub mod task_handler;
pub mod worker_runtime;

pub use alert_sink::AlertSink;
pub use load_sampler::{LoadSample, LoadSampler};
pub use metric_sink::{MetricSink, NoopMetricSink};
pub use node_probe::NodeProbe;
pub use query_executor::QueryExecutor;
pub use task_handler::{CancellationSignal, TaskContext, TaskHandler};
pub use worker_runtime::{QueueLoad, WorkerContext, WorkerRuntime};
