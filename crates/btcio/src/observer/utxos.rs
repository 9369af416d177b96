use btcobs_db::traits::Database;
use tracing::*;

use super::{Observer, ObserverResult};
use crate::{
    core_client::CoreClient,
    rpc::traits::BtcClient,
    utxo::{self, filter_spendable, find_nonce_mark, sort_utxos, SelectedUtxos, Unspent, UtxoError},
};

impl<B, C, D> Observer<B, C, D>
where
    B: BtcClient,
    C: CoreClient,
    D: Database,
{
    /// Replaces the UTXO working set with what the node currently lists for
    /// the TSS address.
    pub async fn fetch_utxos(&self) -> ObserverResult<()> {
        let tip = self.btc.get_block_count().await?;
        let tss = self.params.tss_address_str();

        // min conf 0 so our own change can be spent right away
        let listed = self.btc.list_unspent(0, tip, &[tss]).await?;
        let mut utxos = listed
            .into_iter()
            .map(Unspent::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map_err(UtxoError::from)?;
        sort_utxos(&mut utxos);

        let mut state = self.state.lock();
        let spendable = filter_spendable(utxos, |txid| state.is_tss_transaction(txid));
        state.utxos = spendable;
        trace!(count = %state.utxos.len(), "refreshed tss utxos");
        Ok(())
    }

    /// Picks the inputs of the outbound for `nonce` from the working set.
    ///
    /// For `nonce > 0` the nonce-mark of `nonce - 1` must be in the set and
    /// comes first.
    pub async fn select_utxos(
        &self,
        amount_sats: u64,
        max_inputs: u16,
        nonce: u64,
        consolidation_rank: u16,
    ) -> ObserverResult<SelectedUtxos> {
        let prev_txid = match nonce {
            0 => None,
            n => Some(self.get_outbound_hash_by_nonce(n - 1).await?),
        };

        let state = self.state.lock();
        let mark_idx = match &prev_txid {
            Some(txid) => Some(find_nonce_mark(
                &state.utxos,
                &self.params.tss_address_str(),
                nonce - 1,
                txid,
            )?),
            None => None,
        };

        let selected = utxo::select_utxos(
            &state.utxos,
            mark_idx,
            amount_sats,
            max_inputs,
            consolidation_rank,
        )?;
        debug!(
            %nonce,
            inputs = %selected.utxos.len(),
            value_sats = %selected.value_sats,
            consolidated = %selected.consolidated_utxos,
            "selected utxos"
        );
        Ok(selected)
    }
}
