use std::sync::Arc;

use super::traits::*;

/// Shim database type that assumes that all the database impls are wrapped in
/// `Arc`s.
#[derive(Debug)]
pub struct CommonDatabase<B, S>
where
    B: BroadcastTxDatabase + Sync + Send + 'static,
    S: ScanStateDatabase + Sync + Send + 'static,
{
    broadcast_db: Arc<B>,
    scan_db: Arc<S>,
}

impl<B, S> CommonDatabase<B, S>
where
    B: BroadcastTxDatabase + Sync + Send + 'static,
    S: ScanStateDatabase + Sync + Send + 'static,
{
    pub fn new(broadcast_db: Arc<B>, scan_db: Arc<S>) -> Self {
        Self {
            broadcast_db,
            scan_db,
        }
    }
}

impl<B, S> Database for CommonDatabase<B, S>
where
    B: BroadcastTxDatabase + Sync + Send + 'static,
    S: ScanStateDatabase + Sync + Send + 'static,
{
    type BroadcastDB = B;
    type ScanDB = S;

    fn broadcast_db(&self) -> &Arc<Self::BroadcastDB> {
        &self.broadcast_db
    }

    fn scan_db(&self) -> &Arc<Self::ScanDB> {
        &self.scan_db
    }
}
