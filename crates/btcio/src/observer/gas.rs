use btcobs_db::traits::Database;
use btcobs_rpc_api::GasPriceVote;
use tracing::*;

use super::{Observer, ObserverResult};
use crate::{
    core_client::CoreClient,
    fee::rpc::{get_estimated_fee_rate, get_recent_fee_rate},
    rpc::traits::BtcClient,
};

impl<B, C, D> Observer<B, C, D>
where
    B: BtcClient,
    C: CoreClient,
    D: Database,
{
    /// Reports the current fee rate in sat/vB to the core layer.
    pub async fn post_gas_price(&self) -> ObserverResult<()> {
        let price = if self.params.is_regtest() {
            1
        } else if self.params.is_mainnet() {
            get_estimated_fee_rate(self.btc.as_ref(), 1).await?
        } else {
            get_recent_fee_rate(self.btc.as_ref(), self.params.network).await?
        };

        let block_height = self.btc.get_block_count().await?;
        let vote = GasPriceVote {
            chain_id: self.chain_id(),
            price,
            // no EIP-1559 style tip on bitcoin
            priority_fee: 0,
            block_height,
        };
        let ballot = self.core.post_gas_price(vote).await?;
        debug!(%price, %block_height, %ballot, "posted gas price");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::Network;

    use super::*;
    use crate::{
        core_client::MockCoreClient, observer::tests::test_observer,
        rpc::types::EstimateSmartFee, test_utils::TestBitcoinClient,
    };

    fn core_expecting(price: u64, block_height: u64) -> MockCoreClient {
        let mut core = MockCoreClient::new();
        core.expect_post_gas_price()
            .withf(move |v| {
                v.chain_id == 8332
                    && v.price == price
                    && v.priority_fee == 0
                    && v.block_height == block_height
            })
            .times(1)
            .returning(|_| Ok("ballot".to_string()));
        core
    }

    #[tokio::test]
    async fn test_post_gas_price_regtest() {
        let btc = TestBitcoinClient::new(Network::Regtest);
        btc.mine_to(3);
        let ob = test_observer(&btc, core_expecting(1, 3));
        ob.post_gas_price().await.unwrap();
    }

    #[tokio::test]
    async fn test_post_gas_price_mainnet() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.mine_to(5);
        btc.set_smart_fee(EstimateSmartFee {
            feerate: Some(0.001),
            errors: None,
            blocks: 1,
        });
        let ob = test_observer(&btc, core_expecting(100, 5));
        ob.post_gas_price().await.unwrap();
    }

    #[tokio::test]
    async fn test_post_gas_price_testnet_default() {
        // only coinbases in the recent blocks
        let btc = TestBitcoinClient::new(Network::Testnet);
        btc.mine_to(5);
        let ob = test_observer(&btc, core_expecting(10, 5));
        ob.post_gas_price().await.unwrap();
    }

    #[tokio::test]
    async fn test_post_gas_price_bad_estimate() {
        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.set_smart_fee(EstimateSmartFee {
            feerate: None,
            errors: Some(vec!["Insufficient data or no feerate found".to_string()]),
            blocks: 0,
        });
        // nothing posted
        let ob = test_observer(&btc, MockCoreClient::new());
        assert!(ob.post_gas_price().await.is_err());
    }
}
