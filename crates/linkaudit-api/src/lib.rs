//! # linkaudit API
//!
//! HTTP surface over the per-dataset job schedulers.
//!
//! - **Scans**: request, cancel, reset, status, history and insights
//! - **Executor**: callbacks the batch executor reports progress through
//! - **Cron**: one substrate polling cycle, the target of immediate dispatch

pub mod error;
pub mod executor;
pub mod routes;
pub mod scans;
pub mod server;
pub mod state;

pub use error::ApiError;
pub use routes::create_router;
pub use server::ApiServer;
pub use state::ApiState;
