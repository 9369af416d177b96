//! Storage interfaces for the chain observer.  Implementations live in other
//! crates, e.g. `btcobs-rocksdb`.

pub mod database;
pub mod errors;
pub mod traits;
pub mod types;

#[cfg(feature = "stubs")]
pub mod stubs;

/// Wrapper result type for database operations.
pub type DbResult<T> = anyhow::Result<T, errors::DbError>;

pub use errors::DbError;
