use std::str::FromStr;

use bitcoin::{BlockHash, Txid};
use btcobs_db::{
    traits::{BroadcastTxDatabase, Database},
    types::{BroadcastTxEntry, OutboundId},
};
use btcobs_rpc_api::{Cctx, OutboundStatus, OutboundVote};
use tracing::*;

use super::{Observer, ObserverError, ObserverResult};
use crate::{
    core_client::CoreClient,
    outbound::check_tss_outbound,
    rpc::{traits::BtcClient, types::GetTransaction},
};

impl<B, C, D> Observer<B, C, D>
where
    B: BtcClient,
    C: CoreClient,
    D: Database,
{
    /// Tries the hashes of every outbound tracker until one of them turns
    /// out to be the valid outbound for its nonce.
    ///
    /// Only one hash per nonce can ever be valid: an outbound for nonce `n`
    /// must spend the nonce-mark of `n - 1`, and that output can be spent
    /// once.
    pub async fn process_outbound_trackers(&self) -> ObserverResult<()> {
        let trackers = self.core.get_outbound_trackers(self.chain_id()).await?;

        for tracker in trackers {
            let nonce = tracker.nonce;
            let cctx = match self.core.get_cctx_by_nonce(self.chain_id(), nonce).await {
                Ok(Some(cctx)) => cctx,
                Ok(None) => {
                    error!(%nonce, "no cctx for outbound tracker");
                    continue;
                }
                Err(e) => {
                    error!(%nonce, err = %e, "failed to get cctx for outbound tracker");
                    continue;
                }
            };

            if tracker.hash_list.len() > 1 {
                warn!(%nonce, count = %tracker.hash_list.len(), "got multiple outbound hashes");
            }

            for tx_hash in &tracker.hash_list {
                if self.try_include_outbound(&cctx, tx_hash).await.is_some() {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Records `tx_hash` as the outbound of `cctx` if it is valid and either
    /// mined or in the mempool.
    pub async fn try_include_outbound(&self, cctx: &Cctx, tx_hash: &str) -> Option<GetTransaction> {
        let res = self.check_tx_inclusion(cctx, tx_hash).await?;
        self.set_included_tx(cctx.tss_nonce, res.clone())
            .then_some(res)
    }

    async fn check_tx_inclusion(&self, cctx: &Cctx, tx_hash: &str) -> Option<GetTransaction> {
        let nonce = cctx.tss_nonce;
        let Ok(txid) = Txid::from_str(tx_hash) else {
            warn!(%nonce, %tx_hash, "invalid outbound hash");
            return None;
        };

        let res = match self.btc.get_transaction(&txid).await {
            Ok(res) => res,
            Err(e) => {
                warn!(%nonce, %tx_hash, err = %e, "get_transaction failed");
                return None;
            }
        };
        if res.confirmations < 0 {
            warn!(%nonce, %tx_hash, confirmations = %res.confirmations, "invalid confirmations");
            return None;
        }

        if let Err(e) = self.check_tss_outbound_result(cctx, &txid).await {
            error!(%nonce, %tx_hash, err = %e, "invalid outbound");
            return None;
        }
        Some(res)
    }

    async fn check_tss_outbound_result(&self, cctx: &Cctx, txid: &Txid) -> ObserverResult<()> {
        let nonce = cctx.tss_nonce;
        let raw = self.btc.get_raw_transaction_verbose(txid).await?;

        let prev_txid = if nonce > 0 {
            match self.get_outbound_hash_by_nonce(nonce - 1).await {
                Ok(prev) => Some(prev),
                Err(e) => {
                    debug!(%nonce, err = %e, "no outbound known for previous nonce");
                    None
                }
            }
        } else {
            None
        };

        let restricted = self.is_cctx_restricted(cctx);
        check_tss_outbound(&raw, cctx, &self.params, prev_txid.as_deref(), restricted)?;
        Ok(())
    }

    fn is_cctx_restricted(&self, cctx: &Cctx) -> bool {
        self.compliance
            .contains_restricted_address(&[cctx.sender.clone(), cctx.receiver.clone()])
    }

    /// Hash of the outbound for `nonce`.  Only hashes verified here or
    /// finalized on the core layer are trusted.
    pub async fn get_outbound_hash_by_nonce(&self, nonce: u64) -> ObserverResult<String> {
        if let Some(res) = self.get_included_tx(nonce) {
            return Ok(res.txid);
        }

        let cctx = self
            .core
            .get_cctx_by_nonce(self.chain_id(), nonce)
            .await?
            .ok_or(ObserverError::CctxNotFound(nonce))?;
        let hash = cctx
            .outbound_hash
            .filter(|h| !h.is_empty())
            .ok_or(ObserverError::OutboundHashUnknown(nonce))?;

        let txid = Txid::from_str(&hash).map_err(|_| ObserverError::InvalidTxid(hash.clone()))?;
        match self.btc.get_transaction(&txid).await {
            Ok(res) if res.confirmations > 0 => Ok(hash),
            Ok(_) => Err(ObserverError::OutboundNotIncluded(hash, nonce)),
            Err(e) => {
                debug!(%nonce, %hash, err = %e, "error getting outbound result");
                Err(ObserverError::OutboundNotIncluded(hash, nonce))
            }
        }
    }

    /// Votes on the outbound of `cctx` once it has enough confirmations.
    ///
    /// Returns whether the signer should keep trying to sign it.
    pub async fn vote_outbound_if_confirmed(&self, cctx: &Cctx) -> ObserverResult<bool> {
        let nonce = cctx.tss_nonce;
        let included = self.get_included_tx(nonce);
        let broadcast = self.get_broadcast_tx(nonce);

        let res = match (included, broadcast) {
            (Some(res), _) => res,
            (None, None) => return Ok(true),
            // more than one signing round for nonce 0 could pay twice, as
            // there's no previous nonce-mark to spend
            (None, Some(_)) if nonce == 0 => {
                info!("outbound is nonce 0, waiting for inclusion");
                return Ok(false);
            }
            (None, Some(tx_hash)) => match self.try_include_outbound(cctx, &tx_hash).await {
                Some(res) => res,
                None => return Ok(true),
            },
        };

        let required = self.params.confirmations_threshold(cctx.amount_sats);
        if res.confirmations < required as i64 {
            debug!(
                %nonce,
                confirmations = %res.confirmations,
                %required,
                "outbound not confirmed yet"
            );
            return Ok(false);
        }

        let block_hash = res
            .blockhash
            .as_deref()
            .ok_or_else(|| ObserverError::NotMined(res.txid.clone()))?;
        let block_hash = BlockHash::from_str(block_hash)
            .map_err(|_| ObserverError::InvalidBlockHash(block_hash.to_string()))?;
        let header = self.btc.get_block_header_verbose(&block_hash).await?;

        // cancelled outbounds revert the cctx
        let status = if self.is_cctx_restricted(cctx) {
            OutboundStatus::Failed
        } else {
            OutboundStatus::Success
        };

        let vote = OutboundVote {
            cctx_index: cctx.index.clone(),
            outbound_hash: res.txid.clone(),
            outbound_block_height: header.height.max(0) as u64,
            amount_sats: cctx.amount_sats,
            status,
            chain_id: self.chain_id(),
            nonce,
        };
        match self.core.post_outbound_vote(vote).await {
            Ok(ballot) => info!(%nonce, txid = %res.txid, %ballot, ?status, "posted outbound vote"),
            Err(e) => error!(%nonce, txid = %res.txid, err = %e, "failed to post outbound vote"),
        }
        Ok(false)
    }

    /// Remembers an outbound we broadcast ourselves, so it can be included
    /// even without a tracker.
    pub fn save_broadcast_tx(&self, tx_hash: &str, nonce: u64) {
        self.state
            .lock()
            .broadcast_txs
            .insert(nonce, tx_hash.to_string());

        let id = OutboundId::new(self.chain_id(), nonce);
        match self
            .db
            .broadcast_db()
            .put_broadcast_tx(id, BroadcastTxEntry::new(tx_hash.to_string()))
        {
            Ok(()) => info!(%id, %tx_hash, "saved broadcast tx"),
            Err(e) => error!(%id, %tx_hash, err = %e, "failed to save broadcast tx"),
        }
    }

    /// Moves the pending nonce up to the core layer's lowest pending one,
    /// e.g. after a restart or a missing tracker.
    pub async fn refresh_pending_nonce(&self) {
        let pending = match self.core.get_pending_nonces(self.chain_id()).await {
            Ok(p) => p,
            Err(e) => {
                error!(err = %e, "failed to get pending nonces");
                return;
            }
        };

        let mut state = self.state.lock();
        if pending.nonce_low > state.pending_nonce {
            state.pending_nonce = pending.nonce_low;
            info!(pending_nonce = %pending.nonce_low, "increased pending nonce");
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Network;
    use btcobs_rpc_api::{OutboundTracker, PendingNonces};
    use mockall::predicate::eq;

    use super::*;
    use crate::{
        core_client::{CoreError, MockCoreClient},
        observer::tests::{test_db, test_observer, test_observer_with, wallet_tx},
        rpc::{traits::Reader, types::RawTxVerbose},
        test_utils::{outbound_tx, TestBitcoinClient, TEST_RECEIVER},
    };

    const TX_0: &str = "3dc005eb0c1d393e717070ea84aa13e334a458a4fb7c7f9f98dbf8b231b5ceef";
    const TX_1: &str = "c5d224963832fc0b9a597251c2342a17b25e481a88cc9119008e8f8296652697";
    const TX_1_BAD: &str = "8e6c3c9f0d8b3aef5d9f57e0ba5c9ea1e1c4cb6e0fdc3f2fa2a5cb5c3a2e8f1d";

    fn cctx(nonce: u64, amount_sats: u64) -> Cctx {
        Cctx {
            index: format!("0xcctx{nonce}"),
            sender: "0x2d07a9cbd57dcca3e2cf966c88bc874445b6e3b6".to_string(),
            receiver: TEST_RECEIVER.to_string(),
            receiver_chain_id: 8332,
            amount_sats,
            tss_nonce: nonce,
            outbound_hash: None,
        }
    }

    /// Mines `raw` into a new block and lets the wallet know about it.
    async fn mine(btc: &TestBitcoinClient, mut raw: RawTxVerbose) -> GetTransaction {
        let height = btc.push_block(vec![raw.clone()]);
        let hash = btc.get_block_hash(height).await.unwrap().to_string();
        raw.blockhash = Some(hash.clone());
        btc.add_raw_tx(raw.clone());

        let res = GetTransaction {
            txid: raw.txid.clone(),
            confirmations: 1,
            blockhash: Some(hash),
            ..Default::default()
        };
        btc.set_wallet_tx(res.clone());
        res
    }

    #[tokio::test]
    async fn test_try_include_outbound_chain() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.mine_to(10);
        let params = btc.params();
        mine(&btc, outbound_tx(&params, TX_0, 0, None, 12_000)).await;
        mine(&btc, outbound_tx(&params, TX_1, 1, Some(TX_0), 20_000)).await;
        // spends some other output instead of the nonce-mark of nonce 0
        mine(&btc, outbound_tx(&params, TX_1_BAD, 1, Some(TX_1), 20_000)).await;

        let ob = test_observer(&btc, MockCoreClient::new());

        assert!(ob.try_include_outbound(&cctx(0, 12_000), TX_0).await.is_some());
        assert!(ob.try_include_outbound(&cctx(1, 20_000), TX_1_BAD).await.is_none());
        assert!(ob.try_include_outbound(&cctx(1, 20_000), TX_1).await.is_some());
        assert_eq!(ob.pending_nonce(), 2);
        assert_eq!(ob.get_outbound_hash_by_nonce(1).await.unwrap(), TX_1);

        // wrong amount
        let fresh = test_observer(&btc, MockCoreClient::new());
        assert!(fresh
            .try_include_outbound(&cctx(0, 12_001), TX_0)
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_outbound_hash_from_core() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.mine_to(10);
        mine(&btc, outbound_tx(&btc.params(), TX_0, 0, None, 12_000)).await;

        let mut core = MockCoreClient::new();
        core.expect_get_cctx_by_nonce()
            .with(eq(8332), eq(0))
            .returning(|_, nonce| {
                Ok(Some(Cctx {
                    outbound_hash: Some(TX_0.to_string()),
                    ..cctx(nonce, 12_000)
                }))
            });
        core.expect_get_cctx_by_nonce()
            .with(eq(8332), eq(1))
            .returning(|_, nonce| Ok(Some(cctx(nonce, 12_000))));
        core.expect_get_cctx_by_nonce()
            .with(eq(8332), eq(2))
            .returning(|_, _| Ok(None));
        core.expect_get_cctx_by_nonce()
            .with(eq(8332), eq(3))
            .returning(|_, nonce| {
                Ok(Some(Cctx {
                    outbound_hash: Some(TX_1.to_string()),
                    ..cctx(nonce, 12_000)
                }))
            });

        let ob = test_observer(&btc, core);
        assert_eq!(ob.get_outbound_hash_by_nonce(0).await.unwrap(), TX_0);
        assert!(matches!(
            ob.get_outbound_hash_by_nonce(1).await,
            Err(ObserverError::OutboundHashUnknown(1))
        ));
        assert!(matches!(
            ob.get_outbound_hash_by_nonce(2).await,
            Err(ObserverError::CctxNotFound(2))
        ));
        // unknown to the wallet
        assert!(matches!(
            ob.get_outbound_hash_by_nonce(3).await,
            Err(ObserverError::OutboundNotIncluded(_, 3))
        ));
    }

    #[tokio::test]
    async fn test_process_outbound_trackers() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.mine_to(10);
        mine(&btc, outbound_tx(&btc.params(), TX_0, 0, None, 12_000)).await;

        let mut core = MockCoreClient::new();
        core.expect_get_outbound_trackers().returning(|chain_id| {
            Ok(vec![
                OutboundTracker {
                    chain_id,
                    nonce: 0,
                    hash_list: vec![TX_1.to_string(), TX_0.to_string()],
                },
                OutboundTracker {
                    chain_id,
                    nonce: 5,
                    hash_list: vec![TX_1.to_string()],
                },
            ])
        });
        core.expect_get_cctx_by_nonce()
            .with(eq(8332), eq(0))
            .returning(|_, nonce| Ok(Some(cctx(nonce, 12_000))));
        core.expect_get_cctx_by_nonce()
            .with(eq(8332), eq(5))
            .returning(|_, _| Err(CoreError::Rpc("timeout".into())));

        let ob = test_observer(&btc, core);
        ob.process_outbound_trackers().await.unwrap();
        assert_eq!(ob.get_included_tx(0).unwrap().txid, TX_0);
        assert_eq!(ob.pending_nonce(), 1);
    }

    #[tokio::test]
    async fn test_vote_outbound_if_confirmed() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.mine_to(10);
        let params = btc.params();
        mine(&btc, outbound_tx(&params, TX_0, 0, None, 12_000)).await;
        let res1 = mine(&btc, outbound_tx(&params, TX_1, 1, Some(TX_0), 20_000)).await;

        let mut core = MockCoreClient::new();
        core.expect_post_outbound_vote()
            .withf(|v| {
                v.nonce == 1
                    && v.outbound_hash == TX_1
                    && v.outbound_block_height == 12
                    && v.amount_sats == 20_000
                    && v.status == OutboundStatus::Success
            })
            .times(1)
            .returning(|_| Ok("ballot".to_string()));

        let ob = test_observer(&btc, core);

        // neither broadcast nor included: go sign it
        assert!(ob.vote_outbound_if_confirmed(&cctx(1, 20_000)).await.unwrap());

        // broadcast nonce 0 is never signed twice
        ob.save_broadcast_tx(TX_0, 0);
        assert!(!ob.vote_outbound_if_confirmed(&cctx(0, 12_000)).await.unwrap());

        ob.set_included_tx(0, wallet_tx(TX_0, 2));
        ob.save_broadcast_tx(TX_1, 1);

        // not enough confirmations for a big outbound
        let mut big = cctx(1, 20_000);
        big.amount_sats = 300_000_000;
        ob.set_included_tx(1, res1);
        assert!(!ob.vote_outbound_if_confirmed(&big).await.unwrap());

        assert!(!ob.vote_outbound_if_confirmed(&cctx(1, 20_000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_vote_restricted_outbound_as_failed() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.mine_to(10);
        let params = btc.params();
        let mut raw = outbound_tx(&params, TX_0, 0, None, 12_000);
        // cancelled: nonce-mark and change only
        raw.vout.remove(1);
        raw.vout[1].n = 1;
        mine(&btc, raw).await;

        let mut core = MockCoreClient::new();
        core.expect_post_outbound_vote()
            .withf(|v| v.status == OutboundStatus::Failed)
            .times(1)
            .returning(|_| Ok("ballot".to_string()));

        let ob = test_observer_with(&btc, core, test_db(), &[TEST_RECEIVER]);
        assert!(ob.try_include_outbound(&cctx(0, 12_000), TX_0).await.is_some());
        assert!(!ob.vote_outbound_if_confirmed(&cctx(0, 12_000)).await.unwrap());
    }

    #[tokio::test]
    async fn test_broadcast_outbound_gets_included() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.mine_to(10);
        let params = btc.params();
        mine(&btc, outbound_tx(&params, TX_0, 0, None, 12_000)).await;
        // in the mempool only
        let raw = outbound_tx(&params, TX_1, 1, Some(TX_0), 20_000);
        btc.add_raw_tx(raw);
        btc.set_wallet_tx(wallet_tx(TX_1, 0));

        let db = test_db();
        let ob = test_observer_with(&btc, MockCoreClient::new(), db.clone(), &[]);
        ob.set_included_tx(0, wallet_tx(TX_0, 1));
        ob.save_broadcast_tx(TX_1, 1);
        assert_eq!(
            db.broadcast_db()
                .get_broadcast_tx(OutboundId::new(8332, 1))
                .unwrap()
                .unwrap()
                .tx_hash,
            TX_1
        );

        // included, but waits for a confirmation
        assert!(!ob.vote_outbound_if_confirmed(&cctx(1, 20_000)).await.unwrap());
        assert_eq!(ob.get_included_tx(1).unwrap().confirmations, 0);
        assert_eq!(ob.pending_nonce(), 2);
    }

    #[tokio::test]
    async fn test_refresh_pending_nonce() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        let mut core = MockCoreClient::new();
        let mut seq = mockall::Sequence::new();
        core.expect_get_pending_nonces()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chain_id| {
                Ok(PendingNonces {
                    chain_id,
                    nonce_low: 9,
                    nonce_high: 12,
                })
            });
        core.expect_get_pending_nonces()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|chain_id| {
                Ok(PendingNonces {
                    chain_id,
                    nonce_low: 4,
                    nonce_high: 12,
                })
            });
        core.expect_get_pending_nonces()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_| Err(CoreError::Rpc("down".into())));

        let ob = test_observer(&btc, core);
        ob.refresh_pending_nonce().await;
        assert_eq!(ob.pending_nonce(), 9);
        // never goes back
        ob.refresh_pending_nonce().await;
        assert_eq!(ob.pending_nonce(), 9);
        ob.refresh_pending_nonce().await;
        assert_eq!(ob.pending_nonce(), 9);
    }
}
