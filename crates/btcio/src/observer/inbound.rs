use std::str::FromStr;

use bitcoin::{BlockHash, Txid};
use btcobs_db::traits::{Database, ScanStateDatabase};
use btcobs_rpc_api::InboundVote;
use tracing::*;

use super::{Observer, ObserverError, ObserverResult};
use crate::{
    compliance::log_restricted,
    core_client::CoreClient,
    fee::calc_depositor_fee,
    inbound::{filter_and_parse_incoming_txs, get_btc_event, BtcInboundEvent, InboundProcessability},
    rpc::traits::BtcClient,
};

impl<B, C, D> Observer<B, C, D>
where
    B: BtcClient,
    C: CoreClient,
    D: Database,
{
    /// Scans the block after the last scanned one, if it has enough
    /// confirmations, and votes on the deposits found in it.
    ///
    /// Any failure leaves the block to be scanned again on the next tick.
    pub async fn observe_inbound(&self) -> ObserverResult<()> {
        let tip = self.btc.get_block_count().await?;
        if tip == 0 {
            return Err(ObserverError::NodeNotReady);
        }

        {
            let mut state = self.state.lock();
            if tip < state.last_block {
                return Err(ObserverError::BlockDecreased(tip, state.last_block));
            }
            state.last_block = tip;
        }

        let height = self.last_block_scanned() + 1;
        if !self.params.is_block_confirmed(tip, height) {
            return Ok(());
        }

        let hash = self.btc.get_block_hash(height).await?;
        let block = self.btc.get_block_verbose(&hash).await?;
        info!(%height, txs = %block.tx.len(), %tip, "scanning block for inbounds");

        if block.tx.len() > 1 {
            let depositor_fee = calc_depositor_fee(&block, &self.params);
            let events = filter_and_parse_incoming_txs(
                self.btc.as_ref(),
                &block.tx,
                height,
                &self.params.tss_address_str(),
                self.params.network,
                depositor_fee,
            )
            .await?;

            for event in events {
                let Some(vote) = self.inbound_vote_from_event(event) else {
                    continue;
                };
                let inbound_hash = vote.inbound_hash.clone();
                let ballot = self.core.post_inbound_vote(vote).await?;
                info!(%inbound_hash, %ballot, "posted inbound vote");
            }
        }

        // a failed write leaves the block to be scanned again
        self.db
            .scan_db()
            .put_last_scanned_block(self.chain_id(), height)?;
        self.state.lock().last_block_scanned = height;
        Ok(())
    }

    /// Decodes the memo and screens the event.  `None` when nothing should be
    /// voted.
    fn inbound_vote_from_event(&self, mut event: BtcInboundEvent) -> Option<InboundVote> {
        if let Err(e) = event.decode_memo_bytes(self.params.network) {
            info!(
                txid = %event.tx_hash,
                memo = %hex::encode(&event.memo_bytes),
                err = %e,
                "invalid memo bytes"
            );
            return None;
        }

        match event.processability(self.compliance.as_ref()) {
            InboundProcessability::Good => {}
            InboundProcessability::Donation => {
                info!(txid = %event.tx_hash, value = %event.value_sats, "thank you rich folk for your donation");
                return None;
            }
            InboundProcessability::ComplianceViolation => {
                let receiver = event.memo.as_ref().map(|m| m.receiver()).unwrap_or_default();
                log_restricted(
                    false,
                    self.chain_id(),
                    &event.tx_hash,
                    &event.from_address,
                    &receiver,
                );
                return None;
            }
        }

        event.to_vote(self.chain_id(), self.params.core_chain_id)
    }

    /// Re-checks every inbound the core layer has a tracker for, voting on
    /// each.
    pub async fn process_inbound_trackers(&self) -> ObserverResult<()> {
        let trackers = self.core.get_inbound_trackers(self.chain_id()).await?;

        for tracker in trackers {
            info!(tx_hash = %tracker.tx_hash, "checking inbound tracker");
            let vote = self
                .check_receipt_for_btc_tx_hash(&tracker.tx_hash, true)
                .await?;
            info!(tx_hash = %vote.inbound_hash, "vote submitted for inbound tracker");
        }
        Ok(())
    }

    /// Builds the inbound vote for the deposit `tx_hash`, posting it when
    /// `vote` is set.
    pub async fn check_receipt_for_btc_tx_hash(
        &self,
        tx_hash: &str,
        vote: bool,
    ) -> ObserverResult<InboundVote> {
        let txid =
            Txid::from_str(tx_hash).map_err(|_| ObserverError::InvalidTxid(tx_hash.to_string()))?;
        let tx = self.btc.get_raw_transaction_verbose(&txid).await?;

        let block_hash = tx
            .blockhash
            .as_deref()
            .ok_or_else(|| ObserverError::NotMined(tx_hash.to_string()))?;
        let block_hash = BlockHash::from_str(block_hash)
            .map_err(|_| ObserverError::InvalidBlockHash(block_hash.to_string()))?;
        let block = self.btc.get_block_verbose(&block_hash).await?;

        let height = block.height.max(0) as u64;
        if block.tx.len() <= 1 {
            return Err(ObserverError::EmptyBlock(height));
        }
        if !self.params.is_block_confirmed(self.last_block(), height) {
            return Err(ObserverError::BlockNotConfirmed(height));
        }

        let depositor_fee = calc_depositor_fee(&block, &self.params);
        let event = get_btc_event(
            self.btc.as_ref(),
            &tx,
            &self.params.tss_address_str(),
            height,
            self.params.network,
            depositor_fee,
        )
        .await?
        .ok_or(ObserverError::NoDepositEvent)?;

        let msg = self
            .inbound_vote_from_event(event)
            .ok_or(ObserverError::NoVote)?;
        if !vote {
            return Ok(msg);
        }

        let ballot = self.core.post_inbound_vote(msg.clone()).await?;
        info!(%tx_hash, %ballot, fee = %depositor_fee, "btc deposit detected and reported");
        Ok(msg)
    }
}
