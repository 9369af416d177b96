use rockbound::{rocksdb, CodecError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("invalid outbound id '{0}'")]
    InvalidOutboundId(String),

    #[error("rocksdb: {0}")]
    Rocksdb(#[from] rocksdb::Error),

    #[error("transaction error: {0}")]
    TransactionError(String),

    #[error("codec: {0}")]
    Codec(String),

    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for DbError {
    fn from(value: anyhow::Error) -> Self {
        Self::Other(value.to_string())
    }
}

impl From<CodecError> for DbError {
    fn from(value: CodecError) -> Self {
        Self::Codec(value.to_string())
    }
}
