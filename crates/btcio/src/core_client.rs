//! Access to the core layer: votes go out, pending work comes in.

use async_trait::async_trait;
use btcobs_rpc_api::{
    Cctx, ChainTickers, GasPriceVote, InboundTracker, InboundVote, ObserverCoreApiClient,
    OutboundTracker, OutboundVote, PendingNonces,
};
#[cfg(test)]
use mockall::automock;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("core rpc: {0}")]
    Rpc(String),
}

impl From<jsonrpsee::core::client::Error> for CoreError {
    fn from(e: jsonrpsee::core::client::Error) -> Self {
        Self::Rpc(e.to_string())
    }
}

pub type CoreResult<T> = Result<T, CoreError>;

/// What the observer needs from the core layer.
///
/// Every call is scoped to one chain, passed explicitly.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait CoreClient: Send + Sync + 'static {
    /// Returns the ballot index.
    async fn post_inbound_vote(&self, vote: InboundVote) -> CoreResult<String>;

    /// Returns the ballot index.
    async fn post_outbound_vote(&self, vote: OutboundVote) -> CoreResult<String>;

    async fn post_gas_price(&self, vote: GasPriceVote) -> CoreResult<String>;

    async fn get_pending_nonces(&self, chain_id: i64) -> CoreResult<PendingNonces>;

    async fn get_inbound_trackers(&self, chain_id: i64) -> CoreResult<Vec<InboundTracker>>;

    async fn get_outbound_trackers(&self, chain_id: i64) -> CoreResult<Vec<OutboundTracker>>;

    async fn get_cctx_by_nonce(&self, chain_id: i64, nonce: u64) -> CoreResult<Option<Cctx>>;

    async fn get_chain_tickers(&self, chain_id: i64) -> CoreResult<ChainTickers>;
}

/// [`CoreClient`] over a jsonrpsee client of the `observer` namespace.
#[derive(Debug, Clone)]
pub struct CoreRpcClient<T> {
    inner: T,
}

impl<T> CoreRpcClient<T> {
    pub fn new(inner: T) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<T: ObserverCoreApiClient + Send + Sync + 'static> CoreClient for CoreRpcClient<T> {
    async fn post_inbound_vote(&self, vote: InboundVote) -> CoreResult<String> {
        Ok(self.inner.post_inbound_vote(vote).await?)
    }

    async fn post_outbound_vote(&self, vote: OutboundVote) -> CoreResult<String> {
        Ok(self.inner.post_outbound_vote(vote).await?)
    }

    async fn post_gas_price(&self, vote: GasPriceVote) -> CoreResult<String> {
        Ok(self.inner.post_gas_price(vote).await?)
    }

    async fn get_pending_nonces(&self, chain_id: i64) -> CoreResult<PendingNonces> {
        Ok(self.inner.get_pending_nonces(chain_id).await?)
    }

    async fn get_inbound_trackers(&self, chain_id: i64) -> CoreResult<Vec<InboundTracker>> {
        Ok(self.inner.get_inbound_trackers(chain_id).await?)
    }

    async fn get_outbound_trackers(&self, chain_id: i64) -> CoreResult<Vec<OutboundTracker>> {
        Ok(self.inner.get_outbound_trackers(chain_id).await?)
    }

    async fn get_cctx_by_nonce(&self, chain_id: i64, nonce: u64) -> CoreResult<Option<Cctx>> {
        Ok(self.inner.get_cctx_by_nonce(chain_id, nonce).await?)
    }

    async fn get_chain_tickers(&self, chain_id: i64) -> CoreResult<ChainTickers> {
        Ok(self.inner.get_chain_tickers(chain_id).await?)
    }
}
