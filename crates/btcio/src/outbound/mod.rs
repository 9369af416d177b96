//! Checks that a tx claimed for an outbound nonce really is the TSS outbound
//! the instruction asked for.

use thiserror::Error;

use crate::codec::CodecError;

pub mod verify;

pub use verify::{check_tss_outbound, check_tss_vin, check_tss_vout, check_tss_vout_cancelled};

#[derive(Debug, Error)]
pub enum OutboundError {
    #[error("len(vins) <= 1")]
    TooFewVins,

    #[error("expected 2 witness items, got {0}")]
    WitnessItems(usize),

    #[error("witness pubkey {0} not match TSS pubkey {1}")]
    WitnessPubkey(String, String),

    #[error("no outbound hash known for nonce {0}")]
    PrevNonceUnknown(u64),

    #[error("invalid nonce-mark txid {0} vout {1}, expected txid {2} vout 0")]
    InvalidNonceMarkInput(String, u32, String),

    #[error("invalid number of vouts: {0}")]
    VoutCount(usize),

    #[error("error decoding receiver {0}: {1}")]
    Receiver(String, #[source] CodecError),

    #[error("error decoding vout {0}: {1}")]
    Vout(u32, #[source] CodecError),

    #[error("nonce-mark address {0} not match TSS address {1}")]
    NonceMarkAddress(String, String),

    #[error("nonce-mark amount {0} not match nonce-mark amount {1}")]
    NonceMarkAmount(u64, u64),

    #[error("output address {0} not match params receiver {1}")]
    PaymentAddress(String, String),

    #[error("output amount {0} not match params amount {1}")]
    PaymentAmount(u64, u64),

    #[error("change address {0} not match TSS address {1}")]
    ChangeAddress(String, String),

    #[error("invalid TSS vin in outbound {0} nonce {1}: {2}")]
    InvalidVin(String, u64, #[source] Box<OutboundError>),

    #[error("invalid TSS vout in outbound {0} nonce {1}: {2}")]
    InvalidVout(String, u64, #[source] Box<OutboundError>),

    #[error("invalid TSS vout in cancelled outbound {0} nonce {1}: {2}")]
    InvalidVoutCancelled(String, u64, #[source] Box<OutboundError>),
}

pub type OutboundResult<T> = Result<T, OutboundError>;
