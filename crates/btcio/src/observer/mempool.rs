use std::str::FromStr;

use bitcoin::{Transaction, Txid};
use btcobs_db::traits::Database;
use tracing::*;

use super::{Observer, ObserverError, ObserverResult};
use crate::{
    core_client::CoreClient,
    fee::rpc::get_transaction_fee_and_rate,
    mempool::{is_tx_stuck_in_mempool, LastStuckOutbound},
    rpc::traits::BtcClient,
    utxo::find_nonce_mark,
};

impl<B, C, D> Observer<B, C, D>
where
    B: BtcClient,
    C: CoreClient,
    D: Database,
{
    /// The highest-nonce outbound we believe is still pending, with its
    /// nonce.
    ///
    /// Our own broadcasts inside the core layer's pending range win over the
    /// last included outbound.  The tx must be in the mempool and its
    /// nonce-mark in the UTXO set, otherwise we could be looking at a stale
    /// hash.
    pub async fn get_last_pending_outbound(&self) -> ObserverResult<(Transaction, u64)> {
        let pending = self.pending_nonce();
        if pending == 0 {
            return Err(ObserverError::PendingNonceZero);
        }

        let mut last_nonce = pending - 1;
        let mut last_hash = self.get_included_tx(last_nonce).map(|res| res.txid);

        let range = self
            .core
            .get_pending_nonces(self.chain_id())
            .await
            .map_err(ObserverError::PendingNonces)?;
        for nonce in range.nonce_low..range.nonce_high {
            if nonce < last_nonce {
                continue;
            }
            if let Some(hash) = self.get_broadcast_tx(nonce) {
                last_nonce = nonce;
                last_hash = Some(hash);
            }
        }

        let last_hash = last_hash.ok_or(ObserverError::LastTxNotFound)?;
        let txid =
            Txid::from_str(&last_hash).map_err(|_| ObserverError::InvalidTxid(last_hash.clone()))?;
        match self.btc.get_mempool_entry(&txid).await {
            Ok(_) => {}
            Err(e) if e.is_tx_not_found() => {
                return Err(ObserverError::LastTxNotInMempool(last_hash))
            }
            Err(e) => return Err(e.into()),
        }

        self.fetch_utxos()
            .await
            .map_err(|e| ObserverError::FetchUtxos(Box::new(e)))?;
        {
            let state = self.state.lock();
            find_nonce_mark(
                &state.utxos,
                &self.params.tss_address_str(),
                last_nonce,
                &last_hash,
            )
            .map_err(ObserverError::NonceMark)?;
        }

        let tx = self
            .btc
            .get_raw_transaction(&txid)
            .await
            .map_err(ObserverError::LastTx)?;
        Ok((tx, last_nonce))
    }

    /// Updates the stuck outbound record from the last pending outbound.
    ///
    /// The record is cleared when there is no pending outbound.  Node or core
    /// failures leave it as it is.
    pub async fn refresh_last_stuck_outbound(&self) -> ObserverResult<()> {
        let (tx, nonce) = match self.get_last_pending_outbound().await {
            Ok(last) => last,
            Err(e) if is_no_pending_outbound(&e) => {
                info!(err = %e, "last pending outbound not found");
                self.set_last_stuck_outbound(None);
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        let txid = tx.compute_txid();
        let wait_blocks = self.params.mempool_wait_blocks();
        let (stuck, pending_for) = is_tx_stuck_in_mempool(self.btc.as_ref(), &txid, wait_blocks)
            .await
            .map_err(|e| ObserverError::StuckCheck(txid.to_string(), nonce, e))?;

        if !stuck {
            self.set_last_stuck_outbound(None);
            return Ok(());
        }

        match self.btc.get_raw_transaction_verbose(&txid).await {
            Ok(raw) => match get_transaction_fee_and_rate(self.btc.as_ref(), &raw).await {
                Ok((fee, rate)) => {
                    warn!(%txid, %nonce, %fee, %rate, ?pending_for, "outbound is stuck")
                }
                Err(e) => warn!(%txid, %nonce, err = %e, "cannot compute fee of stuck outbound"),
            },
            Err(e) => warn!(%txid, %nonce, err = %e, "cannot get stuck outbound"),
        }
        self.set_last_stuck_outbound(Some(LastStuckOutbound::new(nonce, tx, pending_for)));
        Ok(())
    }

    fn set_last_stuck_outbound(&self, stuck: Option<LastStuckOutbound>) {
        let mut state = self.state.lock();
        match (&state.last_stuck, &stuck) {
            (Some(prev), None) => {
                info!(nonce = %prev.nonce, "outbound is no longer stuck");
            }
            (Some(prev), Some(cur)) if prev.nonce != cur.nonce => {
                info!(prev = %prev.nonce, cur = %cur.nonce, "stuck outbound changed");
            }
            _ => {}
        }
        state.last_stuck = stuck;
    }
}

fn is_no_pending_outbound(e: &ObserverError) -> bool {
    matches!(
        e,
        ObserverError::PendingNonceZero
            | ObserverError::LastTxNotFound
            | ObserverError::InvalidTxid(_)
            | ObserverError::LastTxNotInMempool(_)
            | ObserverError::NonceMark(_)
    )
}
