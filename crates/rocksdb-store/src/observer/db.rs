use std::sync::Arc;

use btcobs_db::{
    errors::DbError,
    traits::{BroadcastTxDatabase, Database, ScanStateDatabase},
    types::{BroadcastTxEntry, OutboundId},
    DbResult,
};
use rockbound::{OptimisticTransactionDB as DB, SchemaDBOperationsExt, TransactionRetry};
use tracing::*;

use super::schemas::{BroadcastTxSchema, LastScannedBlockSchema};
use crate::DbOpsConfig;

#[derive(Debug)]
pub struct ObserverDb {
    db: Arc<DB>,
    ops: DbOpsConfig,
}

impl ObserverDb {
    pub fn new(db: Arc<DB>, ops: DbOpsConfig) -> Self {
        Self { db, ops }
    }
}

impl BroadcastTxDatabase for ObserverDb {
    fn put_broadcast_tx(&self, id: OutboundId, entry: BroadcastTxEntry) -> DbResult<()> {
        self.db
            .with_optimistic_txn(TransactionRetry::Count(self.ops.retry_count), |txn| {
                if let Some(prev) = txn.get::<BroadcastTxSchema>(&id)? {
                    if prev != entry {
                        debug!(%id, prev = %prev.tx_hash, new = %entry.tx_hash, "overwriting broadcast tx");
                    }
                }
                txn.put::<BroadcastTxSchema>(&id, &entry)?;
                Ok::<_, DbError>(())
            })
            .map_err(|e| DbError::TransactionError(e.to_string()))
    }

    fn get_broadcast_tx(&self, id: OutboundId) -> DbResult<Option<BroadcastTxEntry>> {
        Ok(self.db.get::<BroadcastTxSchema>(&id)?)
    }

    fn get_all_broadcast_txs(&self, chain_id: i64) -> DbResult<Vec<(OutboundId, BroadcastTxEntry)>> {
        let mut iterator = self.db.iter::<BroadcastTxSchema>()?;
        iterator.seek_to_first();

        let mut entries = Vec::new();
        for res in iterator {
            let (id, entry) = res?.into_tuple();
            if id.chain_id == chain_id {
                entries.push((id, entry));
            }
        }
        Ok(entries)
    }
}

impl ScanStateDatabase for ObserverDb {
    fn put_last_scanned_block(&self, chain_id: i64, height: u64) -> DbResult<()> {
        Ok(self.db.put::<LastScannedBlockSchema>(&chain_id, &height)?)
    }

    fn get_last_scanned_block(&self, chain_id: i64) -> DbResult<Option<u64>> {
        Ok(self.db.get::<LastScannedBlockSchema>(&chain_id)?)
    }
}

/// Both observer stores are backed by the same [`ObserverDb`].
#[derive(Debug)]
pub struct ObserverDatabase {
    db: Arc<ObserverDb>,
}

impl ObserverDatabase {
    pub fn new(db: Arc<ObserverDb>) -> Self {
        Self { db }
    }
}

impl Database for ObserverDatabase {
    type BroadcastDB = ObserverDb;
    type ScanDB = ObserverDb;

    fn broadcast_db(&self) -> &Arc<Self::BroadcastDB> {
        &self.db
    }

    fn scan_db(&self) -> &Arc<Self::ScanDB> {
        &self.db
    }
}
