//! Encoding and decoding of scripts, addresses and memos.

use thiserror::Error;

use crate::amount::AmountError;

pub mod inscription;
pub mod memo;
pub mod memo_std;
pub mod script;

pub use script::ScriptKind;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("error decoding script {0}")]
    ScriptHex(String),

    #[error("invalid {0} script: {1}")]
    InvalidScript(ScriptKind, String),

    #[error("error getting address from script {0}: {1}")]
    AddressFromScript(String, String),

    #[error("invalid address {0}: {1}")]
    InvalidAddress(String, String),

    #[error("unsupported receiver address type {0}")]
    UnsupportedReceiver(String),

    #[error("error getting satoshis: {0}")]
    Amount(#[from] AmountError),

    #[error("public key not found")]
    PublicKeyNotFound,

    #[error("OP_CHECKSIG not found")]
    CheckSigNotFound,

    #[error("OP_FALSE not found")]
    FalseNotFound,

    #[error("OP_IF not found")]
    IfNotFound,

    #[error("expecting data push, found {0}")]
    NotDataPush(u8),

    #[error("should contain more data, but script ended")]
    ScriptEnded,

    #[error("malformed inscription script: {0}")]
    Tokenizer(#[from] bitcoin::script::Error),
}

pub type CodecResult<T> = Result<T, CodecError>;
