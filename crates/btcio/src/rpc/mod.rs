pub mod client;
pub mod error;
pub mod traits;
pub mod types;

pub use client::BitcoinClient;
pub use error::ClientError;

/// This is an alias for the result type returned by the [`BitcoinClient`].
pub type ClientResult<T> = Result<T, ClientError>;
