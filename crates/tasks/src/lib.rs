//! Task management for the observer: critical task spawning, shutdown
//! signalling and the adjustable periodic ticker the watchers run on.

mod manager;
mod shutdown;
pub mod ticker;

pub use manager::{TaskError, TaskExecutor, TaskManager};
pub use shutdown::{ShutdownGuard, ShutdownSignal};
