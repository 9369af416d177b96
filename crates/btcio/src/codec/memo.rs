//! Memos attached to inbound txs, either in an `OP_RETURN` output or in a
//! taproot inscription.

use bitcoin::{opcodes::all::OP_RETURN, Network};
use thiserror::Error;
use tracing::*;

use super::{
    memo_std::{hex_address, OpCode, StandardMemo, StdMemoError},
    script::{classify_address, decode_address},
};
use crate::params::DONATION_MESSAGE;

/// Memos shorter than this after `OP_RETURN` need `OP_PUSHDATA1`.
const OP_PUSHDATA1: u8 = 0x4c;
const LEGACY_RECEIVER_LEN: usize = 20;

#[derive(Debug, Error)]
pub enum MemoError {
    #[error("error decoding script hex {0}")]
    ScriptHex(String),

    #[error("memo size mismatch: {0} != {1}")]
    SizeMismatch(usize, usize),

    #[error("script too short: {0}")]
    ScriptTooShort(String),

    #[error("invalid OP_RETURN script: {0}")]
    InvalidOpReturn(String),

    #[error("donation tx")]
    Donation,

    #[error("legacy memo length must be at least {LEGACY_RECEIVER_LEN} bytes")]
    LegacyTooShort,

    #[error("got empty receiver address from memo")]
    EmptyReceiver,

    #[error("standard memo contains improper data: {0}")]
    ImproperStandard(#[source] StdMemoError),

    #[error("invalid standard memo for bitcoin: {0}")]
    InvalidStandard(String),
}

/// Extracts the memo from an `OP_RETURN` output script.
///
/// Returns `None` if the script isn't an `OP_RETURN` at all.  A memo equal to
/// the donation message is reported as [`MemoError::Donation`].
pub fn decode_op_return_memo(script_hex: &str) -> Result<Option<Vec<u8>>, MemoError> {
    let script = hex::decode(script_hex).map_err(|_| MemoError::ScriptHex(script_hex.into()))?;
    if script.len() < 2 || script[0] != OP_RETURN.to_u8() {
        return Ok(None);
    }

    let size = script[1] as usize;
    let memo = if size < OP_PUSHDATA1 as usize {
        if size != script.len() - 2 {
            return Err(MemoError::SizeMismatch(size, script.len() - 2));
        }
        &script[2..]
    } else if size == OP_PUSHDATA1 as usize {
        if script.len() < 3 {
            return Err(MemoError::ScriptTooShort(script_hex.into()));
        }
        let size = script[2] as usize;
        if size != script.len() - 3 {
            return Err(MemoError::SizeMismatch(size, script.len() - 3));
        }
        &script[3..]
    } else {
        return Err(MemoError::InvalidOpReturn(script_hex.into()));
    };

    if memo == DONATION_MESSAGE.as_bytes() {
        return Err(MemoError::Donation);
    }
    Ok(Some(memo.to_vec()))
}

/// A decoded inbound memo.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundMemo {
    /// 20-byte receiver followed by an arbitrary message.
    Legacy {
        receiver: [u8; LEGACY_RECEIVER_LEN],
        message: Vec<u8>,
    },
    Standard(StandardMemo),
}

impl InboundMemo {
    /// `0x`-prefixed hex of the receiving address.
    pub fn receiver(&self) -> String {
        match self {
            InboundMemo::Legacy { receiver, .. } => hex_address(receiver),
            InboundMemo::Standard(m) => hex_address(&m.receiver),
        }
    }

    pub fn is_call(&self) -> bool {
        match self {
            InboundMemo::Legacy { message, .. } => !message.is_empty(),
            InboundMemo::Standard(m) => matches!(m.header.op, OpCode::DepositAndCall | OpCode::Call),
        }
    }

    pub fn is_standard(&self) -> bool {
        matches!(self, InboundMemo::Standard(_))
    }
}

/// Decodes memo bytes, trying the standard layout first and falling back to
/// the legacy one.
///
/// Bytes equal to the donation message decode to `None`.
pub fn decode_memo_bytes(data: &[u8], network: Network) -> Result<Option<InboundMemo>, MemoError> {
    if data == DONATION_MESSAGE.as_bytes() {
        return Ok(None);
    }

    match StandardMemo::decode(data) {
        Ok(memo) => {
            validate_standard_for_bitcoin(&memo, network)?;
            return Ok(Some(InboundMemo::Standard(memo)));
        }
        Err(e) if e.is_header_error() => {
            trace!(err = %e, "not a standard memo, trying legacy");
        }
        Err(e) => return Err(MemoError::ImproperStandard(e)),
    }

    if data.len() < LEGACY_RECEIVER_LEN {
        return Err(MemoError::LegacyTooShort);
    }
    let mut receiver = [0; LEGACY_RECEIVER_LEN];
    receiver.copy_from_slice(&data[..LEGACY_RECEIVER_LEN]);
    if receiver == [0; LEGACY_RECEIVER_LEN] {
        return Err(MemoError::EmptyReceiver);
    }

    Ok(Some(InboundMemo::Legacy {
        receiver,
        message: data[LEGACY_RECEIVER_LEN..].to_vec(),
    }))
}

/// The revert address, when set, has to be one we could refund to.
fn validate_standard_for_bitcoin(memo: &StandardMemo, network: Network) -> Result<(), MemoError> {
    if memo.revert_address.is_empty() {
        return Ok(());
    }
    let addr = decode_address(&memo.revert_address, network).map_err(|e| {
        MemoError::InvalidStandard(format!("invalid revert address in memo: {e}"))
    })?;
    if classify_address(&addr).is_none() {
        return Err(MemoError::InvalidStandard(format!(
            "unsupported revert address in memo: {}",
            memo.revert_address
        )));
    }
    Ok(())
}
