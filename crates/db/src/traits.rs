//! Trait definitions for low level database interfaces.

use std::sync::Arc;

use crate::{
    types::{BroadcastTxEntry, OutboundId},
    DbResult,
};

/// Common database interface that we can parameterize the observer over.
pub trait Database {
    type BroadcastDB: BroadcastTxDatabase + Send + Sync;
    type ScanDB: ScanStateDatabase + Send + Sync;

    fn broadcast_db(&self) -> &Arc<Self::BroadcastDB>;
    fn scan_db(&self) -> &Arc<Self::ScanDB>;
}

/// Outbounds this observer has broadcast itself, keyed by outbound id.
pub trait BroadcastTxDatabase {
    /// Records the broadcast tx for an outbound, overwriting any previous
    /// entry.
    fn put_broadcast_tx(&self, id: OutboundId, entry: BroadcastTxEntry) -> DbResult<()>;

    fn get_broadcast_tx(&self, id: OutboundId) -> DbResult<Option<BroadcastTxEntry>>;

    /// All recorded broadcasts for a chain.  Loaded once before the watchers
    /// start.
    fn get_all_broadcast_txs(&self, chain_id: i64) -> DbResult<Vec<(OutboundId, BroadcastTxEntry)>>;
}

/// Inbound scan progress.
pub trait ScanStateDatabase {
    fn put_last_scanned_block(&self, chain_id: i64, height: u64) -> DbResult<()>;

    fn get_last_scanned_block(&self, chain_id: i64) -> DbResult<Option<u64>>;
}
