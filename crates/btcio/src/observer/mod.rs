//! The chain observer.  Owns the mutable view of the chain the watchers share
//! and wires the stateless parts of the crate to the node, the core layer and
//! storage.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use btcobs_config::TickerConfig;
use btcobs_db::{
    traits::{BroadcastTxDatabase, Database, ScanStateDatabase},
    DbError,
};
use parking_lot::Mutex;
use thiserror::Error;
use tracing::*;

use crate::{
    compliance::ComplianceChecker,
    core_client::{CoreClient, CoreError},
    fee::FeeError,
    inbound::InboundError,
    mempool::{LastStuckOutbound, MempoolError},
    outbound::OutboundError,
    params::{ChainParams, REGTEST_START_BLOCK},
    rpc::{traits::BtcClient, types::GetTransaction, ClientError},
    utxo::{Unspent, UtxoError},
};

mod gas;
mod inbound;
mod mempool;
mod outbound;
mod status;
mod tickers;
mod utxos;
mod workers;

pub use workers::start_observer_workers;

#[derive(Debug, Error)]
pub enum ObserverError {
    #[error("bitcoin rpc: {0}")]
    Client(#[from] ClientError),

    #[error("core: {0}")]
    Core(#[from] CoreError),

    #[error("db: {0}")]
    Db(#[from] DbError),

    #[error("fee: {0}")]
    Fee(#[from] FeeError),

    #[error("{0}")]
    Inbound(#[from] InboundError),

    #[error("{0}")]
    Outbound(#[from] OutboundError),

    #[error("{0}")]
    Utxo(#[from] UtxoError),

    #[error("current block number 0 is too low, bitcoin node not ready")]
    NodeNotReady,

    #[error("block number should not decrease: current {0} last {1}")]
    BlockDecreased(u64, u64),

    #[error("invalid txid {0}")]
    InvalidTxid(String),

    #[error("invalid block hash {0}")]
    InvalidBlockHash(String),

    #[error("tx {0} is not in a block")]
    NotMined(String),

    #[error("block {0} has no transactions")]
    EmptyBlock(u64),

    #[error("block {0} is not confirmed yet")]
    BlockNotConfirmed(u64),

    #[error("no btc deposit event found")]
    NoDepositEvent,

    #[error("no vote built for btc sent to TSS")]
    NoVote,

    #[error("error getting cctx for nonce {0}")]
    CctxNotFound(u64),

    #[error("cannot find outbound txid for nonce {0}")]
    OutboundHashUnknown(u64),

    #[error("outbound txid {0} for nonce {1} is not included")]
    OutboundNotIncluded(String, u64),

    #[error("pending nonce is zero")]
    PendingNonceZero,

    #[error("GetPendingNonces failed: {0}")]
    PendingNonces(#[source] CoreError),

    #[error("last tx not found")]
    LastTxNotFound,

    #[error("last tx {0} is not in mempool")]
    LastTxNotInMempool(String),

    #[error("unable to fetch UTXOs: {0}")]
    FetchUtxos(#[source] Box<ObserverError>),

    #[error("nonce-mark lookup failed: {0}")]
    NonceMark(#[source] UtxoError),

    #[error("GetRawTransaction failed: {0}")]
    LastTx(#[source] ClientError),

    #[error("cannot determine if tx {0} nonce {1} is stuck: {2}")]
    StuckCheck(String, u64, #[source] MempoolError),

    #[error("latest block {0} is {1}s old, RPC down?")]
    StaleTip(u64, i64),

    #[error("TSS address {0} has no utxos, TSS address is not imported?")]
    NoTssUtxos(String),
}

pub type ObserverResult<T> = Result<T, ObserverError>;

/// Everything the watchers mutate.  Only touched through [`Observer`]
/// methods, each holding the lock for as short as it can and never across an
/// await.
#[derive(Debug, Default)]
struct ObserverState {
    /// Chain tip as last seen by the inbound watcher.
    last_block: u64,

    last_block_scanned: u64,

    /// Lowest outbound nonce not known to be included yet.
    pending_nonce: u64,

    /// Spendable TSS outputs, sorted.
    utxos: Vec<Unspent>,

    /// Hashes of verified TSS outbounds.
    tss_outbound_hashes: HashSet<String>,

    included_txs: HashMap<u64, GetTransaction>,

    /// Outbounds we broadcast ourselves, by nonce.
    broadcast_txs: HashMap<u64, String>,

    last_stuck: Option<LastStuckOutbound>,

    /// Current watcher periods.
    tickers: TickerConfig,
}

impl ObserverState {
    /// Whether `txid` was sent by the TSS, so its unconfirmed outputs are
    /// safe to spend.
    fn is_tss_transaction(&self, txid: &str) -> bool {
        self.tss_outbound_hashes.contains(txid) || self.broadcast_txs.values().any(|h| h == txid)
    }
}

pub struct Observer<B, C, D> {
    params: ChainParams,
    btc: Arc<B>,
    core: Arc<C>,
    db: Arc<D>,
    compliance: Arc<dyn ComplianceChecker>,
    state: Mutex<ObserverState>,
}

impl<B, C, D> Observer<B, C, D>
where
    B: BtcClient,
    C: CoreClient,
    D: Database,
{
    pub fn new(
        params: ChainParams,
        btc: Arc<B>,
        core: Arc<C>,
        db: Arc<D>,
        compliance: Arc<dyn ComplianceChecker>,
    ) -> Self {
        Self {
            params,
            btc,
            core,
            db,
            compliance,
            state: Mutex::new(ObserverState::default()),
        }
    }

    /// Sets the watcher periods used until the core layer overrides them.
    pub fn with_tickers(self, tickers: TickerConfig) -> Self {
        self.state.lock().tickers = tickers;
        self
    }

    pub fn params(&self) -> &ChainParams {
        &self.params
    }

    fn chain_id(&self) -> i64 {
        self.params.chain_id
    }

    /// Loads what was persisted by a previous run.  Must be called before the
    /// watchers start.
    pub async fn init(&self) -> ObserverResult<()> {
        self.load_last_block_scanned().await?;
        self.load_broadcast_txs()?;
        Ok(())
    }

    async fn load_last_block_scanned(&self) -> ObserverResult<()> {
        let stored = self
            .db
            .scan_db()
            .get_last_scanned_block(self.chain_id())?;

        let height = match stored {
            Some(height) => height,
            None if self.params.is_regtest() => REGTEST_START_BLOCK,
            None => {
                info!("last scanned block not found in db, scanning from the tip");
                self.btc.get_block_count().await?
            }
        };

        self.state.lock().last_block_scanned = height;
        info!(chain_id = %self.chain_id(), %height, "starting inbound scan");
        Ok(())
    }

    fn load_broadcast_txs(&self) -> ObserverResult<()> {
        let entries = self
            .db
            .broadcast_db()
            .get_all_broadcast_txs(self.chain_id())?;

        let mut state = self.state.lock();
        for (id, entry) in entries {
            state.broadcast_txs.insert(id.nonce, entry.tx_hash);
        }
        debug!(count = %state.broadcast_txs.len(), "loaded broadcast txs");
        Ok(())
    }

    pub fn last_block(&self) -> u64 {
        self.state.lock().last_block
    }

    pub fn last_block_scanned(&self) -> u64 {
        self.state.lock().last_block_scanned
    }

    pub fn pending_nonce(&self) -> u64 {
        self.state.lock().pending_nonce
    }

    pub fn utxo_count(&self) -> usize {
        self.state.lock().utxos.len()
    }

    pub fn get_included_tx(&self, nonce: u64) -> Option<GetTransaction> {
        self.state.lock().included_txs.get(&nonce).cloned()
    }

    pub fn get_broadcast_tx(&self, nonce: u64) -> Option<String> {
        self.state.lock().broadcast_txs.get(&nonce).cloned()
    }

    pub fn last_stuck_outbound(&self) -> Option<LastStuckOutbound> {
        self.state.lock().last_stuck.clone()
    }

    pub fn tickers(&self) -> TickerConfig {
        self.state.lock().tickers.clone()
    }

    /// Records the verified outbound `res` for `nonce`.
    ///
    /// A nonce maps to exactly one hash.  Seeing a second hash for a nonce
    /// drops what was recorded and returns `false`.
    pub fn set_included_tx(&self, nonce: u64, res: GetTransaction) -> bool {
        let mut state = self.state.lock();

        let prior = state.included_txs.get(&nonce).map(|r| r.txid.clone());
        match prior {
            None => {
                state.tss_outbound_hashes.insert(res.txid.clone());
                if nonce >= state.pending_nonce {
                    state.pending_nonce = nonce + 1;
                }
                info!(
                    %nonce,
                    txid = %res.txid,
                    pending_nonce = %state.pending_nonce,
                    "included new bitcoin outbound"
                );
                state.included_txs.insert(nonce, res);
                true
            }
            Some(prior) if prior == res.txid => {
                if let Some(old) = state.included_txs.get(&nonce) {
                    if res.confirmations > old.confirmations {
                        info!(%nonce, txid = %res.txid, confirmations = %res.confirmations, "bitcoin outbound got confirmations");
                    }
                }
                state.included_txs.insert(nonce, res);
                true
            }
            Some(prior) => {
                error!(
                    %nonce,
                    %prior,
                    txid = %res.txid,
                    "multiple outbound hashes for one nonce, dropping the record"
                );
                state.included_txs.remove(&nonce);
                state.tss_outbound_hashes.remove(&prior);
                false
            }
        }
    }
}
