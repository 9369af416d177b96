//! Fee rates that need a node to compute.

use std::str::FromStr;

use bitcoin::{Network, Txid};
use tracing::*;

use super::{
    calc_block_avg_fee_rate, checked_node_fee_rate, FeeError, FeeResult,
    DEFAULT_TESTNET_FEE_RATE, FEE_RATE_COUNT_BACK_BLOCKS,
};
use crate::rpc::{traits::Reader, types::RawTxVerbose};

/// Highest average fee rate over the last couple of blocks.
///
/// Only meant for testnets, where `estimatesmartfee` is unreliable.  Falls
/// back to a default when recent blocks paid nothing.
pub async fn get_recent_fee_rate(client: &impl Reader, network: Network) -> FeeResult<u64> {
    if network == Network::Bitcoin {
        return Err(FeeError::RecentFeeRateOnMainnet);
    }

    let tip = client.get_block_count().await?;

    let mut highest = 0;
    for height in (0..FEE_RATE_COUNT_BACK_BLOCKS).filter_map(|i| tip.checked_sub(i)) {
        let hash = client.get_block_hash(height).await?;
        let block = client.get_block_verbose(&hash).await?;
        let rate = calc_block_avg_fee_rate(&block, network)?;
        highest = highest.max(rate);
    }

    if highest == 0 {
        highest = DEFAULT_TESTNET_FEE_RATE;
    }
    Ok(highest)
}

/// Fee rate in sat/vB estimated by the node to confirm within `conf_target`
/// blocks.
pub async fn get_estimated_fee_rate(client: &impl Reader, conf_target: u16) -> FeeResult<u64> {
    let res = client
        .estimate_smart_fee(conf_target)
        .await
        .map_err(FeeError::EstimateSmartFee)?;

    if let Some(errs) = res.errors.filter(|e| !e.is_empty()) {
        return Err(FeeError::EstimateErrors(errs.join(", ")));
    }
    let rate = res.feerate.ok_or(FeeError::MissingFeeRate)?;
    checked_node_fee_rate(rate)
}

/// Fee paid by a tx and its rate in sat/vB.
///
/// The inputs' values come from their previous txs, so the node needs a tx
/// index.
pub async fn get_transaction_fee_and_rate(
    client: &impl Reader,
    raw: &RawTxVerbose,
) -> FeeResult<(u64, u64)> {
    if raw.vsize <= 0 {
        return Err(FeeError::NonPositiveVsize(raw.txid.clone(), raw.vsize));
    }

    let mut total_in: u64 = 0;
    for vin in &raw.vin {
        let prev_txid =
            Txid::from_str(&vin.txid).map_err(|_| FeeError::InvalidTxid(vin.txid.clone()))?;
        let prev = client
            .get_raw_transaction(&prev_txid)
            .await
            .map_err(|e| FeeError::PrevTx(vin.txid.clone(), e))?;
        let out = prev
            .output
            .get(vin.vout as usize)
            .ok_or_else(|| FeeError::PrevOutOfRange(vin.txid.clone(), vin.vout))?;
        total_in += out.value.to_sat();
    }

    let txid = Txid::from_str(&raw.txid).map_err(|_| FeeError::InvalidTxid(raw.txid.clone()))?;
    let tx = client.get_raw_transaction(&txid).await?;
    let total_out: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();

    let fee = total_in as i64 - total_out as i64;
    if fee < 0 {
        return Err(FeeError::NegativeFee(fee));
    }
    let fee = fee as u64;
    let rate = fee / raw.vsize as u64;

    trace!(txid = %raw.txid, %fee, %rate, "computed tx fee");
    Ok((fee, rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        rpc::types::{EstimateSmartFee, VinVerbose},
        test_utils::{make_tx, TestBitcoinClient},
    };

    #[tokio::test]
    async fn test_recent_fee_rate_not_on_mainnet() {
        let client = TestBitcoinClient::new(Network::Bitcoin);
        assert!(matches!(
            get_recent_fee_rate(&client, Network::Bitcoin).await,
            Err(FeeError::RecentFeeRateOnMainnet)
        ));
    }

    #[tokio::test]
    async fn test_recent_fee_rate_takes_highest() {
        let client = TestBitcoinClient::new(Network::Testnet);
        // 1000 vB paying 120 and 50 sat/vB
        client.push_fee_block(4_000, 120 * 1_000);
        client.push_fee_block(4_000, 50 * 1_000);
        let rate = get_recent_fee_rate(&client, Network::Testnet).await.unwrap();
        assert_eq!(rate, 120);
    }

    #[tokio::test]
    async fn test_recent_fee_rate_default() {
        let client = TestBitcoinClient::new(Network::Testnet);
        client.push_fee_block(4_000, 0);
        client.push_fee_block(4_000, 0);
        let rate = get_recent_fee_rate(&client, Network::Testnet).await.unwrap();
        assert_eq!(rate, DEFAULT_TESTNET_FEE_RATE);
    }

    #[tokio::test]
    async fn test_estimated_fee_rate() {
        let client = TestBitcoinClient::new(Network::Bitcoin);

        client.set_smart_fee(EstimateSmartFee {
            feerate: Some(0.0001),
            errors: None,
            blocks: 1,
        });
        assert_eq!(get_estimated_fee_rate(&client, 1).await.unwrap(), 10);

        client.set_smart_fee(EstimateSmartFee {
            feerate: None,
            errors: Some(vec!["Insufficient data or no feerate found".to_string()]),
            blocks: 1,
        });
        assert!(matches!(
            get_estimated_fee_rate(&client, 1).await,
            Err(FeeError::EstimateErrors(_))
        ));

        client.set_smart_fee(EstimateSmartFee {
            feerate: None,
            errors: None,
            blocks: 1,
        });
        assert!(matches!(
            get_estimated_fee_rate(&client, 1).await,
            Err(FeeError::MissingFeeRate)
        ));

        client.set_smart_fee(EstimateSmartFee {
            feerate: Some(-0.1),
            errors: None,
            blocks: 1,
        });
        assert!(matches!(
            get_estimated_fee_rate(&client, 1).await,
            Err(FeeError::FeeRateOutOfRange(_))
        ));
    }

    #[tokio::test]
    async fn test_transaction_fee_and_rate() {
        let client = TestBitcoinClient::new(Network::Bitcoin);
        let tss = client.params().tss_address.script_pubkey();

        let prev = make_tx(&[], &[(tss.clone(), 50_000), (tss.clone(), 30_000)]);
        client.add_tx(prev.clone());
        let prev_txid = prev.compute_txid();

        let tx = make_tx(&[(prev_txid, 1)], &[(tss, 28_000)]);
        client.add_tx(tx.clone());

        let raw = RawTxVerbose {
            txid: tx.compute_txid().to_string(),
            vsize: 100,
            vin: vec![VinVerbose {
                txid: prev_txid.to_string(),
                vout: 1,
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(get_transaction_fee_and_rate(&client, &raw).await.unwrap(), (2_000, 20));

        let mut bad = raw.clone();
        bad.vsize = 0;
        assert!(matches!(
            get_transaction_fee_and_rate(&client, &bad).await,
            Err(FeeError::NonPositiveVsize(_, 0))
        ));

        let mut missing = raw;
        missing.vin[0].txid = "11".repeat(32);
        assert!(matches!(
            get_transaction_fee_and_rate(&client, &missing).await,
            Err(FeeError::PrevTx(..))
        ));
    }
}
