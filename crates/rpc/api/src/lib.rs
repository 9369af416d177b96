//! Macro trait def for the `observer_` RPC namespace of the core layer, which
//! collects votes from the chain observers and hands out pending work.
use jsonrpsee::{core::RpcResult, proc_macros::rpc};
use serde::{Deserialize, Serialize};

/// Observation of a deposit to the TSS address.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InboundVote {
    pub sender: String,
    pub sender_chain_id: i64,
    pub tx_origin: String,
    /// Receiver on the destination side, decoded from the memo.
    pub receiver: String,
    pub receiver_chain_id: i64,
    pub amount_sats: u64,
    /// Raw memo bytes.
    #[serde(with = "hex::serde")]
    pub message: Vec<u8>,
    pub inbound_hash: String,
    pub inbound_block_height: u64,
    pub is_call: bool,
    pub revert_options: RevertOptions,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct RevertOptions {
    pub revert_address: String,
    pub call_on_revert: bool,
    pub abort_address: String,
    #[serde(with = "hex::serde")]
    pub revert_message: Vec<u8>,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutboundStatus {
    Success,
    Failed,
}

/// Observation of a mined outbound.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutboundVote {
    pub cctx_index: String,
    pub outbound_hash: String,
    pub outbound_block_height: u64,
    pub amount_sats: u64,
    pub status: OutboundStatus,
    pub chain_id: i64,
    pub nonce: u64,
}

/// Fee rate observation, in sat/vB.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct GasPriceVote {
    pub chain_id: i64,
    pub price: u64,
    pub priority_fee: u64,
    pub block_height: u64,
}

/// Half-open range `[nonce_low, nonce_high)` of outbound nonces still pending.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct PendingNonces {
    pub chain_id: i64,
    pub nonce_low: u64,
    pub nonce_high: u64,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct InboundTracker {
    pub chain_id: i64,
    pub tx_hash: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct OutboundTracker {
    pub chain_id: i64,
    pub nonce: u64,
    pub hash_list: Vec<String>,
}

/// Cross-chain transfer instruction as far as the observer cares about it.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct Cctx {
    pub index: String,
    pub sender: String,
    pub receiver: String,
    pub receiver_chain_id: i64,
    pub amount_sats: u64,
    pub tss_nonce: u64,
    /// Outbound hash recorded on the core layer once the outbound is voted.
    pub outbound_hash: Option<String>,
}

/// Watcher periods the core layer sets for a chain, in seconds.  Zero leaves
/// the observer's own setting in place.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Deserialize, Serialize)]
pub struct ChainTickers {
    pub chain_id: i64,
    pub inbound_secs: u64,
    pub outbound_secs: u64,
    pub gas_price_secs: u64,
    pub utxo_secs: u64,
}

#[rpc(client, namespace = "observer")]
pub trait ObserverCoreApi {
    /// Returns the ballot index.
    #[method(name = "postInboundVote")]
    async fn post_inbound_vote(&self, vote: InboundVote) -> RpcResult<String>;

    /// Returns the ballot index.
    #[method(name = "postOutboundVote")]
    async fn post_outbound_vote(&self, vote: OutboundVote) -> RpcResult<String>;

    #[method(name = "postGasPrice")]
    async fn post_gas_price(&self, vote: GasPriceVote) -> RpcResult<String>;

    #[method(name = "getPendingNonces")]
    async fn get_pending_nonces(&self, chain_id: i64) -> RpcResult<PendingNonces>;

    #[method(name = "getInboundTrackers")]
    async fn get_inbound_trackers(&self, chain_id: i64) -> RpcResult<Vec<InboundTracker>>;

    #[method(name = "getOutboundTrackers")]
    async fn get_outbound_trackers(&self, chain_id: i64) -> RpcResult<Vec<OutboundTracker>>;

    #[method(name = "getCctxByNonce")]
    async fn get_cctx_by_nonce(&self, chain_id: i64, nonce: u64) -> RpcResult<Option<Cctx>>;

    #[method(name = "getChainTickers")]
    async fn get_chain_tickers(&self, chain_id: i64) -> RpcResult<ChainTickers>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_inbound_vote_json_shape() {
        let vote = InboundVote {
            sender: "bc1qsender".to_string(),
            sender_chain_id: 8332,
            tx_origin: "bc1qsender".to_string(),
            receiver: "0x2D07A9CBd57DCca3E2cF966C88Bc874445b6E3B6".to_string(),
            receiver_chain_id: 7000,
            amount_sats: 78640,
            message: vec![0xde, 0xad],
            inbound_hash: "00".repeat(32),
            inbound_block_height: 100,
            is_call: false,
            revert_options: RevertOptions::default(),
        };

        let json = serde_json::to_value(&vote).unwrap();
        assert_eq!(json["message"], "dead");
        assert_eq!(json["amount_sats"], 78640);

        let back: InboundVote = serde_json::from_value(json).unwrap();
        assert_eq!(back, vote);
    }

    #[test]
    fn test_outbound_status_lowercase() {
        let s = serde_json::to_string(&OutboundStatus::Failed).unwrap();
        assert_eq!(s, "\"failed\"");
    }
}
