use async_trait::async_trait;
use bitcoin::{BlockHash, Network, Transaction, Txid};

use super::{
    types::{
        EstimateSmartFee, GetBlockHeaderVerbose, GetBlockVerbose, GetMempoolEntry, GetTransaction,
        ListUnspent, RawTxVerbose,
    },
    ClientResult,
};

/// Read-only chain queries.
#[async_trait]
pub trait Reader: Sync + Send + 'static {
    /// Height of the most-work fully-validated chain.
    async fn get_block_count(&self) -> ClientResult<u64>;

    async fn get_block_hash(&self, height: u64) -> ClientResult<BlockHash>;

    async fn get_block_header_verbose(&self, hash: &BlockHash)
        -> ClientResult<GetBlockHeaderVerbose>;

    /// Block with fully decoded transactions (`getblock <hash> 2`).
    async fn get_block_verbose(&self, hash: &BlockHash) -> ClientResult<GetBlockVerbose>;

    /// Needs `txindex=1` on the node for txs not in the wallet or mempool.
    async fn get_raw_transaction(&self, txid: &Txid) -> ClientResult<Transaction>;

    async fn get_raw_transaction_verbose(&self, txid: &Txid) -> ClientResult<RawTxVerbose>;

    async fn get_mempool_entry(&self, txid: &Txid) -> ClientResult<GetMempoolEntry>;

    async fn estimate_smart_fee(&self, conf_target: u16) -> ClientResult<EstimateSmartFee>;

    /// Network the node runs on.
    async fn network(&self) -> ClientResult<Network>;
}

/// Queries answered from the node's wallet, which watches the TSS address.
#[async_trait]
pub trait Wallet: Sync + Send + 'static {
    async fn get_transaction(&self, txid: &Txid) -> ClientResult<GetTransaction>;

    /// Unspent outputs owned by `addresses` with a confirmation count in
    /// `[min_conf, max_conf]`.
    async fn list_unspent(
        &self,
        min_conf: u64,
        max_conf: u64,
        addresses: &[String],
    ) -> ClientResult<Vec<ListUnspent>>;
}

/// Everything the observer needs from a node.
pub trait BtcClient: Reader + Wallet {}

impl<T: Reader + Wallet> BtcClient for T {}
