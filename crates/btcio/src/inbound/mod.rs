//! Deposits to the TSS address.

use thiserror::Error;

use crate::{
    amount::AmountError,
    codec::{memo::MemoError, CodecError},
    rpc::ClientError,
};

pub mod event;
pub mod extractor;

pub use event::{BtcInboundEvent, InboundProcessability};
pub use extractor::{filter_and_parse_incoming_txs, get_btc_event, get_sender_address_by_vin};

#[derive(Debug, Error)]
pub enum InboundError {
    #[error("no input found for inbound: {0}")]
    NoInput(String),

    #[error("error getting memo for inbound: {0}")]
    NoMemo(String),

    #[error("invalid txid {0}")]
    InvalidTxid(String),

    #[error("error getting raw transaction {0}: {1}")]
    PrevTx(String, #[source] ClientError),

    #[error("vout index {1} out of range for tx {0}")]
    PrevOutOfRange(String, u32),

    #[error("error getting btc event for tx {0} in block {1}: {2}")]
    Tx(String, u64, #[source] Box<InboundError>),

    #[error("invalid memo: {0}")]
    Memo(#[from] MemoError),

    #[error("codec: {0}")]
    Codec(#[from] CodecError),

    #[error("amount: {0}")]
    Amount(#[from] AmountError),
}

pub type InboundResult<T> = Result<T, InboundError>;
