//! Bitcoin chain observer: watches the TSS address for deposits, verifies
//! and votes on outbounds, and keeps the UTXO set outbounds are funded from.

pub mod amount;
pub mod codec;
pub mod compliance;
pub mod core_client;
pub mod fee;
pub mod inbound;
pub mod mempool;
pub mod observer;
pub mod outbound;
pub mod params;
pub mod rpc;
pub mod utxo;

#[cfg(any(test, feature = "test_utils"))]
pub mod test_utils;
