//! Detection of outbounds stuck in the mempool.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use bitcoin::{Transaction, Txid};
use thiserror::Error;

use crate::rpc::{traits::Reader, ClientError};

/// Expected time between blocks.
pub const BLOCK_TIME: Duration = Duration::from_secs(10 * 60);

#[derive(Debug, Error)]
pub enum MempoolError {
    #[error("GetBlockCount failed: {0}")]
    BlockCount(#[source] ClientError),

    #[error("GetMempoolEntry failed: {0}")]
    MempoolEntry(#[source] ClientError),
}

pub type MempoolResult<T> = Result<T, MempoolError>;

/// The highest-nonce outbound found stuck in the mempool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LastStuckOutbound {
    pub nonce: u64,
    pub tx: Transaction,
    pub stuck_for: Duration,
}

impl LastStuckOutbound {
    pub fn new(nonce: u64, tx: Transaction, stuck_for: Duration) -> Self {
        Self {
            nonce,
            tx,
            stuck_for,
        }
    }
}

/// Whether `txid` has been pending for longer than `wait_blocks` block times
/// while the chain grew by more than `wait_blocks` blocks.  Also returns how
/// long it has been pending.
///
/// A tx the node doesn't have in its mempool is not stuck.
pub async fn is_tx_stuck_in_mempool(
    client: &impl Reader,
    txid: &Txid,
    wait_blocks: u64,
) -> MempoolResult<(bool, Duration)> {
    let tip = client
        .get_block_count()
        .await
        .map_err(MempoolError::BlockCount)?;

    let entry = match client.get_mempool_entry(txid).await {
        Ok(entry) => entry,
        Err(e) if e.is_tx_not_found() => return Ok((false, Duration::ZERO)),
        Err(e) => return Err(MempoolError::MempoolEntry(e)),
    };

    let entered = UNIX_EPOCH + Duration::from_secs(entry.time.max(0) as u64);
    let pending_for = SystemTime::now()
        .duration_since(entered)
        .unwrap_or(Duration::ZERO);

    let allowed = BLOCK_TIME * wait_blocks as u32;
    let deadline = entry.height.max(0) as u64 + wait_blocks;
    Ok((pending_for > allowed && tip > deadline, pending_for))
}
