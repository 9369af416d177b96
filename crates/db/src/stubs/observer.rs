use std::collections::*;

use parking_lot::Mutex;

use crate::{traits::*, types::*, DbResult};

/// In-memory implementation of the observer storage, for tests.
#[derive(Debug, Default)]
pub struct StubObserverDb {
    broadcasts: Mutex<BTreeMap<OutboundId, BroadcastTxEntry>>,
    scanned: Mutex<HashMap<i64, u64>>,
}

impl StubObserverDb {
    pub fn new() -> Self {
        Self::default()
    }
}

impl BroadcastTxDatabase for StubObserverDb {
    fn put_broadcast_tx(&self, id: OutboundId, entry: BroadcastTxEntry) -> DbResult<()> {
        self.broadcasts.lock().insert(id, entry);
        Ok(())
    }

    fn get_broadcast_tx(&self, id: OutboundId) -> DbResult<Option<BroadcastTxEntry>> {
        Ok(self.broadcasts.lock().get(&id).cloned())
    }

    fn get_all_broadcast_txs(&self, chain_id: i64) -> DbResult<Vec<(OutboundId, BroadcastTxEntry)>> {
        let tbl = self.broadcasts.lock();
        Ok(tbl
            .iter()
            .filter(|(id, _)| id.chain_id == chain_id)
            .map(|(id, e)| (*id, e.clone()))
            .collect())
    }
}

impl ScanStateDatabase for StubObserverDb {
    fn put_last_scanned_block(&self, chain_id: i64, height: u64) -> DbResult<()> {
        self.scanned.lock().insert(chain_id, height);
        Ok(())
    }

    fn get_last_scanned_block(&self, chain_id: i64) -> DbResult<Option<u64>> {
        Ok(self.scanned.lock().get(&chain_id).copied())
    }
}
