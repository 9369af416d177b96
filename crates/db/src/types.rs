//! Module for database local types

use std::{fmt, str::FromStr};

use borsh::{BorshDeserialize, BorshSerialize};

use crate::DbError;

/// Identifies an outbound by the chain it goes out on and its nonce.  Rendered
/// as `"{chain_id}-{nonce}"`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, BorshSerialize, BorshDeserialize,
)]
pub struct OutboundId {
    pub chain_id: i64,
    pub nonce: u64,
}

impl OutboundId {
    pub fn new(chain_id: i64, nonce: u64) -> Self {
        Self { chain_id, nonce }
    }
}

impl fmt::Display for OutboundId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.chain_id, self.nonce)
    }
}

impl FromStr for OutboundId {
    type Err = DbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || DbError::InvalidOutboundId(s.to_string());
        // chain ids may be negative, so split on the last dash
        let (chain, nonce) = s.rsplit_once('-').ok_or_else(err)?;
        let chain_id = chain.parse().map_err(|_| err())?;
        let nonce = nonce.parse().map_err(|_| err())?;
        Ok(Self { chain_id, nonce })
    }
}

/// Broadcast record for a signed outbound.
#[derive(Debug, Clone, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BroadcastTxEntry {
    /// Hex txid as shown by bitcoind.
    pub tx_hash: String,
}

impl BroadcastTxEntry {
    pub fn new(tx_hash: String) -> Self {
        Self { tx_hash }
    }
}
