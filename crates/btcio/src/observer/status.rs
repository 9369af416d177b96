use std::time::{SystemTime, UNIX_EPOCH};

use btcobs_db::traits::Database;
use tracing::*;

use super::{Observer, ObserverError, ObserverResult};
use crate::{core_client::CoreClient, rpc::traits::BtcClient};

/// Oldest a tip can be before the node is considered stuck.
const MAX_TIP_AGE_SECS: i64 = 1200;

/// Upper bound on confirmations when listing TSS outputs for the health
/// check.
const MAX_UTXO_CONFIRMATIONS: u64 = 1_000_000;

impl<B, C, D> Observer<B, C, D>
where
    B: BtcClient,
    C: CoreClient,
    D: Database,
{
    /// Checks that the node follows the chain and watches the TSS address.
    pub async fn check_rpc_status(&self) -> ObserverResult<()> {
        let tip = self.btc.get_block_count().await?;
        let hash = self.btc.get_block_hash(tip).await?;
        let header = self.btc.get_block_header_verbose(&hash).await?;

        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or_default();
        let age = now - header.time;
        if age > MAX_TIP_AGE_SECS {
            return Err(ObserverError::StaleTip(tip, age));
        }

        let tss = self.params.tss_address_str();
        let utxos = self
            .btc
            .list_unspent(0, MAX_UTXO_CONFIRMATIONS, &[tss.clone()])
            .await?;
        if utxos.is_empty() {
            return Err(ObserverError::NoTssUtxos(tss));
        }

        info!(%tip, %age, utxos = %utxos.len(), "rpc status ok");
        Ok(())
    }
}
