pub mod coordinator;
pub mod shutdown;

pub use coordinator::{Coordinator, CoordinatorBuilder};
pub use shutdown::ShutdownManager;
