pub mod macros;
pub mod observer;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;

use rockbound::{schema::ColumnFamilyName, Schema};

pub use observer::db::{ObserverDb, ObserverDatabase};
use observer::schemas::{BroadcastTxSchema, LastScannedBlockSchema};

pub const ROCKSDB_NAME: &str = "btcobs";

pub const STORE_COLUMN_FAMILIES: &[ColumnFamilyName] = &[
    BroadcastTxSchema::COLUMN_FAMILY_NAME,
    LastScannedBlockSchema::COLUMN_FAMILY_NAME,
];

/// database operations configuration
#[derive(Clone, Copy, Debug)]
pub struct DbOpsConfig {
    pub retry_count: u16,
}

impl DbOpsConfig {
    pub fn new(retry_count: u16) -> Self {
        Self { retry_count }
    }
}
