pub mod config;
pub mod errors;
pub mod logging;
pub mod models;
pub mod traits;

pub use errors::{CapacityError, CapacityResult};
pub use logging::init_logging;
