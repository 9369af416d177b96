use btcobs_db::traits::Database;
use tracing::*;

use super::{Observer, ObserverResult};
use crate::{core_client::CoreClient, rpc::traits::BtcClient};

/// Overwrites `current` with `new` unless `new` is 0.  Returns whether it
/// changed.
fn update_secs(name: &str, current: &mut u64, new: u64) -> bool {
    if new == 0 || new == *current {
        return false;
    }
    info!(ticker = %name, old = %*current, %new, "ticker period changed");
    *current = new;
    true
}

impl<B, C, D> Observer<B, C, D>
where
    B: BtcClient,
    C: CoreClient,
    D: Database,
{
    /// Pulls the watcher periods the core layer sets for this chain.  The
    /// watchers pick them up after their next run.
    pub async fn refresh_tickers(&self) -> ObserverResult<()> {
        let remote = self.core.get_chain_tickers(self.chain_id()).await?;

        let mut state = self.state.lock();
        let t = &mut state.tickers;
        let changed = [
            update_secs("inbound", &mut t.inbound_secs, remote.inbound_secs),
            update_secs("outbound", &mut t.outbound_secs, remote.outbound_secs),
            update_secs("gas_price", &mut t.gas_price_secs, remote.gas_price_secs),
            update_secs("utxos", &mut t.utxo_secs, remote.utxo_secs),
        ];
        if !changed.contains(&true) {
            trace!("ticker periods unchanged");
        }
        Ok(())
    }
}
