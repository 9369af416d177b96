use btcobs_db::types::{BroadcastTxEntry, OutboundId};

use crate::define_table_with_default_codec;

define_table_with_default_codec!(
    /// A table to store the tx broadcast by this observer for each outbound
    (BroadcastTxSchema) OutboundId => BroadcastTxEntry
);

define_table_with_default_codec!(
    /// A table to store the last scanned inbound block per chain
    (LastScannedBlockSchema) i64 => u64
);
