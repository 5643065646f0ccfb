pub mod metric;
pub mod node;
pub mod status;
pub mod task;
pub mod worker;

pub use metric::{Alert, AlertSeverity, HealthBand, MetricSnapshot, SystemHealth, Trend};
pub use node::{Node, NodeHealth, NodeRole, NodeStatus, QueryKind, QueryOutcome, SelectionPolicy};
pub use status::{QueueStatus, QueueWorkerStats, StatusSnapshot};
pub use task::{DeadLetter, QueueEntry, TaskPriority};
pub use worker::{WorkerCounters, WorkerHandle, WorkerState};
