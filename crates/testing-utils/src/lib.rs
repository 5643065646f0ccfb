//! # Capacity Testing Utils
//!
//! Shared test doubles for the capacity workspace. Every collaborator trait in
//! `capacity-core::traits` has a hand-written fake here so the queue pool,
//! router, metrics engine and capacity manager can be tested without processes,
//! sockets or real load.
//!
//! ```toml
//! [dev-dependencies]
//! capacity-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use helpers::*;
pub use mocks::*;
