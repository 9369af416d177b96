use std::str::FromStr;

use bitcoin::{Network, Txid};
use tracing::*;

use super::{BtcInboundEvent, InboundError, InboundResult};
use crate::{
    amount::get_satoshis,
    codec::{
        inscription::get_inscription_memo,
        memo::{decode_op_return_memo, MemoError},
        script::{decode_script, decode_sender_from_script},
        ScriptKind,
    },
    params::DONATION_MESSAGE,
    rpc::{
        traits::Reader,
        types::{RawTxVerbose, VinVerbose},
    },
};

/// Scans the non-coinbase txs of a block for deposits to `tss_address`.
///
/// Any error aborts the whole block so it gets retried.
pub async fn filter_and_parse_incoming_txs(
    client: &impl Reader,
    txs: &[RawTxVerbose],
    block_number: u64,
    tss_address: &str,
    network: Network,
    depositor_fee: u64,
) -> InboundResult<Vec<BtcInboundEvent>> {
    let mut events = Vec::new();
    for tx in txs.iter().skip(1) {
        let event = get_btc_event(client, tx, tss_address, block_number, network, depositor_fee)
            .await
            .map_err(|e| InboundError::Tx(tx.txid.clone(), block_number, Box::new(e)))?;
        if let Some(event) = event {
            info!(txid = %tx.txid, %block_number, value = event.value_sats, "found inbound");
            events.push(event);
        }
    }
    Ok(events)
}

/// Turns a tx into an inbound event if it pays the TSS in its first output.
///
/// Txs that don't are `Ok(None)`, as are those paying less than the
/// depositor fee.  A deposit without any memo is an error.
pub async fn get_btc_event(
    client: &impl Reader,
    tx: &RawTxVerbose,
    tss_address: &str,
    block_number: u64,
    network: Network,
    depositor_fee: u64,
) -> InboundResult<Option<BtcInboundEvent>> {
    if tx.vout.len() < 2 || tx.vin.is_empty() {
        return Ok(None);
    }

    let vout0 = &tx.vout[0];
    match decode_script(ScriptKind::P2wpkh, &vout0.script_pub_key.hex, network) {
        Ok(addr) if addr.to_string() == tss_address => {}
        Ok(_) => return Ok(None),
        Err(e) => {
            trace!(txid = %tx.txid, %e, "first output doesn't pay a P2WPKH");
            return Ok(None);
        }
    }

    let amount = get_satoshis(vout0.value)?;
    if amount < depositor_fee {
        warn!(txid = %tx.txid, %amount, %depositor_fee, "deposit below depositor fee, ignoring");
        return Ok(None);
    }

    let memo_bytes = match find_memo(tx) {
        Some(m) => m,
        None => return Err(InboundError::NoMemo(tx.txid.clone())),
    };

    let from_address = get_sender_address_by_vin(client, &tx.vin[0], network).await?;

    Ok(Some(BtcInboundEvent {
        from_address,
        to_address: tss_address.to_string(),
        value_sats: amount - depositor_fee,
        depositor_fee_sats: depositor_fee,
        memo_bytes,
        memo: None,
        block_number,
        tx_hash: tx.txid.clone(),
    }))
}

/// Memo in the `OP_RETURN` second output, else in an inscription.
fn find_memo(tx: &RawTxVerbose) -> Option<Vec<u8>> {
    match decode_op_return_memo(&tx.vout[1].script_pub_key.hex) {
        Ok(Some(memo)) => return Some(memo),
        Ok(None) => {}
        Err(MemoError::Donation) => return Some(DONATION_MESSAGE.as_bytes().to_vec()),
        Err(e) => debug!(txid = %tx.txid, %e, "no OP_RETURN memo"),
    }
    get_inscription_memo(&tx.vin)
}

/// Address owning the output spent by `vin`, empty if of no known kind.
pub async fn get_sender_address_by_vin(
    client: &impl Reader,
    vin: &VinVerbose,
    network: Network,
) -> InboundResult<String> {
    let txid = Txid::from_str(&vin.txid).map_err(|_| InboundError::InvalidTxid(vin.txid.clone()))?;
    let prev = client
        .get_raw_transaction(&txid)
        .await
        .map_err(|e| InboundError::PrevTx(vin.txid.clone(), e))?;

    let out = prev
        .output
        .get(vin.vout as usize)
        .ok_or_else(|| InboundError::PrevOutOfRange(vin.txid.clone(), vin.vout))?;
    Ok(decode_sender_from_script(&out.script_pubkey, network)?)
}

#[cfg(test)]
mod tests {
    use bitcoin::{Address, ScriptBuf};

    use super::*;
    use crate::{
        rpc::types::{ScriptPubKey, VoutVerbose},
        test_utils::{make_tx, TestBitcoinClient},
    };

    const SENDER: &str = "bc1q68kxnq52ahz5vd6c8czevsawu0ux9nfrzzrh6e";
    const FEE: u64 = 1_360;
    const MEMO: &str = "2d07a9cbd57dcca3e2cf966c88bc874445b6e3b668656c6c6f207361746f736869";

    fn vout(n: u32, sats: u64, script: ScriptBuf) -> VoutVerbose {
        VoutVerbose {
            value: sats as f64 / 1e8,
            n,
            script_pub_key: ScriptPubKey {
                hex: script.to_hex_string(),
                ..Default::default()
            },
        }
    }

    fn op_return(memo: &[u8]) -> ScriptBuf {
        let push: &bitcoin::script::PushBytes = memo.try_into().unwrap();
        ScriptBuf::new_op_return(push)
    }

    /// Client that knows the tx funding the deposit, paying `SENDER`.
    fn setup() -> (TestBitcoinClient, String, VinVerbose) {
        let client = TestBitcoinClient::new(Network::Bitcoin);
        let sender = Address::from_str(SENDER).unwrap().assume_checked();
        let prev = make_tx(&[], &[(ScriptBuf::new(), 1), (sender.script_pubkey(), 100_000)]);
        let vin = VinVerbose {
            txid: prev.compute_txid().to_string(),
            vout: 1,
            ..Default::default()
        };
        client.add_tx(prev);
        let tss = client.params().tss_address_str();
        (client, tss, vin)
    }

    fn deposit(tss: &str, vin: VinVerbose, sats: u64, memo: ScriptBuf) -> RawTxVerbose {
        let tss = Address::from_str(tss).unwrap().assume_checked();
        RawTxVerbose {
            txid: "c5d224963832fc0b9a597251c2342a17b25e481a88cc9119008e8f8296652697".into(),
            vin: vec![vin],
            vout: vec![vout(0, sats, tss.script_pubkey()), vout(1, 0, memo)],
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_get_btc_event() {
        let (client, tss, vin) = setup();
        let memo = hex::decode(MEMO).unwrap();
        let tx = deposit(&tss, vin, 80_000, op_return(&memo));

        let event = get_btc_event(&client, &tx, &tss, 820_000, Network::Bitcoin, FEE)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.from_address, SENDER);
        assert_eq!(event.to_address, tss);
        assert_eq!(event.value_sats, 80_000 - FEE);
        assert_eq!(event.depositor_fee_sats, FEE);
        assert_eq!(event.memo_bytes, memo);
        assert_eq!(event.block_number, 820_000);
    }

    #[tokio::test]
    async fn test_not_to_tss() {
        let (client, tss, vin) = setup();
        let tx = deposit(SENDER, vin, 80_000, op_return(&hex::decode(MEMO).unwrap()));
        let event = get_btc_event(&client, &tx, &tss, 1, Network::Bitcoin, FEE).await.unwrap();
        assert_eq!(event, None);
    }

    #[tokio::test]
    async fn test_below_fee() {
        let (client, tss, vin) = setup();
        let tx = deposit(&tss, vin, FEE - 1, op_return(&hex::decode(MEMO).unwrap()));
        let event = get_btc_event(&client, &tx, &tss, 1, Network::Bitcoin, FEE).await.unwrap();
        assert_eq!(event, None);
    }

    #[tokio::test]
    async fn test_too_few_outputs() {
        let (client, tss, vin) = setup();
        let mut tx = deposit(&tss, vin, 80_000, ScriptBuf::new());
        tx.vout.truncate(1);
        let event = get_btc_event(&client, &tx, &tss, 1, Network::Bitcoin, FEE).await.unwrap();
        assert_eq!(event, None);
    }

    #[tokio::test]
    async fn test_donation_keeps_memo() {
        let (client, tss, vin) = setup();
        let tx = deposit(&tss, vin, 80_000, op_return(DONATION_MESSAGE.as_bytes()));
        let event = get_btc_event(&client, &tx, &tss, 1, Network::Bitcoin, FEE)
            .await
            .unwrap()
            .unwrap();
        assert!(event.is_donation());
    }

    #[tokio::test]
    async fn test_no_memo() {
        let (client, tss, vin) = setup();
        let tx = deposit(&tss, vin, 80_000, ScriptBuf::new());
        let err = get_btc_event(&client, &tx, &tss, 1, Network::Bitcoin, FEE)
            .await
            .unwrap_err();
        assert!(matches!(err, InboundError::NoMemo(_)));
    }

    #[tokio::test]
    async fn test_unknown_prev_tx() {
        let (client, tss, mut vin) = setup();
        vin.txid = "6e6f71d281146c1fc5c755b35908ee449f26786c84e2ae18f98b268de40b7ec4".into();
        let tx = deposit(&tss, vin, 80_000, op_return(&hex::decode(MEMO).unwrap()));
        let err = get_btc_event(&client, &tx, &tss, 1, Network::Bitcoin, FEE)
            .await
            .unwrap_err();
        assert!(matches!(err, InboundError::PrevTx(..)));
    }

    #[tokio::test]
    async fn test_sender_unknown_script() {
        let (client, _, _) = setup();
        let prev = make_tx(&[], &[(ScriptBuf::from_bytes(vec![0x51]), 1_000)]);
        let vin = VinVerbose {
            txid: prev.compute_txid().to_string(),
            vout: 0,
            ..Default::default()
        };
        client.add_tx(prev);
        let sender = get_sender_address_by_vin(&client, &vin, Network::Bitcoin).await.unwrap();
        assert_eq!(sender, "");

        let vin = VinVerbose { vout: 3, ..vin };
        let err = get_sender_address_by_vin(&client, &vin, Network::Bitcoin).await.unwrap_err();
        assert!(matches!(err, InboundError::PrevOutOfRange(_, 3)));
    }

    #[tokio::test]
    async fn test_filter_skips_coinbase() {
        let (client, tss, vin) = setup();
        let memo = op_return(&hex::decode(MEMO).unwrap());
        // a coinbase-position tx paying the TSS is ignored
        let coinbase = deposit(&tss, vin.clone(), 90_000, memo.clone());
        let other = deposit(SENDER, vin.clone(), 70_000, memo.clone());
        let dep = deposit(&tss, vin, 80_000, memo);

        let events = filter_and_parse_incoming_txs(
            &client,
            &[coinbase, other, dep],
            5,
            &tss,
            Network::Bitcoin,
            FEE,
        )
        .await
        .unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value_sats, 80_000 - FEE);
    }

    #[tokio::test]
    async fn test_filter_aborts_on_error() {
        let (client, tss, vin) = setup();
        let bad = deposit(&tss, vin, 80_000, ScriptBuf::new());
        let err = filter_and_parse_incoming_txs(
            &client,
            &[RawTxVerbose::default(), bad],
            5,
            &tss,
            Network::Bitcoin,
            FEE,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, InboundError::Tx(_, 5, _)));
    }
}
