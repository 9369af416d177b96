//! Response shapes of the `bitcoind` calls the observer makes.
//!
//! Amounts stay in BTC as `f64` here, exactly as the node reports them, and
//! are converted to satoshis with [`crate::amount::get_satoshis`] at the
//! point of use.

use serde::{Deserialize, Serialize};

/// Result of `getblock <hash> 2`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GetBlockVerbose {
    pub hash: String,
    pub height: i64,
    pub time: i64,
    pub weight: i32,
    #[serde(default)]
    pub confirmations: i64,
    pub tx: Vec<RawTxVerbose>,
}

/// Result of `getrawtransaction <txid> true`, also embedded in
/// [`GetBlockVerbose`].
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct RawTxVerbose {
    pub hex: String,
    pub txid: String,
    #[serde(default)]
    pub vsize: i32,
    #[serde(default)]
    pub weight: i32,
    pub vin: Vec<VinVerbose>,
    pub vout: Vec<VoutVerbose>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    #[serde(default)]
    pub confirmations: i64,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct VinVerbose {
    /// Set only on the coinbase input.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub coinbase: Option<String>,
    #[serde(default)]
    pub txid: String,
    #[serde(default)]
    pub vout: u32,
    /// Witness stack, hex encoded items.
    #[serde(default, rename = "txinwitness")]
    pub witness: Vec<String>,
    #[serde(default)]
    pub sequence: u32,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct VoutVerbose {
    /// BTC.
    pub value: f64,
    pub n: u32,
    #[serde(rename = "scriptPubKey")]
    pub script_pub_key: ScriptPubKey,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ScriptPubKey {
    pub hex: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
}

/// Result of `getblockheader <hash> true`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GetBlockHeaderVerbose {
    pub hash: String,
    pub height: i64,
    /// Block timestamp, unix seconds.
    pub time: i64,
    #[serde(default)]
    pub confirmations: i64,
}

/// Result of the wallet call `gettransaction <txid>`.
///
/// Only works for txs touching an address the node watches, which the TSS
/// address must be.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GetTransaction {
    pub txid: String,
    /// Negative when the tx conflicts with the best chain.
    pub confirmations: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockhash: Option<String>,
    /// Position of the tx in its block.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blockindex: Option<i64>,
    #[serde(default)]
    pub hex: String,
}

/// One entry of `listunspent`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct ListUnspent {
    pub txid: String,
    pub vout: u32,
    #[serde(default)]
    pub address: String,
    #[serde(default, rename = "scriptPubKey")]
    pub script_pub_key: String,
    /// BTC.
    pub amount: f64,
    pub confirmations: u64,
    #[serde(default)]
    pub spendable: bool,
}

/// Result of `getmempoolentry <txid>`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct GetMempoolEntry {
    pub vsize: u64,
    #[serde(default)]
    pub weight: u64,
    /// Unix seconds the tx entered the pool.
    pub time: i64,
    /// Chain height when the tx entered the pool.
    pub height: i64,
    pub fees: MempoolFees,
}

#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct MempoolFees {
    /// BTC.
    pub base: f64,
}

/// Result of `estimatesmartfee <target>`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize, Serialize)]
pub struct EstimateSmartFee {
    /// BTC/kvB.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feerate: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub errors: Option<Vec<String>>,
    pub blocks: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_block_verbose() {
        let json = r#"{
            "hash": "000000000000000000019881b7ae81a9bfac866989c8b976b1aff7ace01b85e7",
            "confirmations": 2,
            "height": 835000,
            "time": 1710000000,
            "weight": 3993129,
            "tx": [
                {
                    "txid": "aa",
                    "hex": "00",
                    "vsize": 100,
                    "weight": 400,
                    "vin": [{"coinbase": "03b8bd0c", "sequence": 4294967295}],
                    "vout": [{"value": 6.25, "n": 0, "scriptPubKey": {"hex": "0014", "type": "witness_v0_keyhash", "address": "bc1q"}}]
                },
                {
                    "txid": "bb",
                    "hex": "01",
                    "vsize": 141,
                    "weight": 561,
                    "vin": [{"txid": "cc", "vout": 1, "txinwitness": ["30", "02"], "sequence": 0}],
                    "vout": [{"value": 0.0008, "n": 0, "scriptPubKey": {"hex": "0014", "type": "witness_v0_keyhash"}}]
                }
            ]
        }"#;

        let block: GetBlockVerbose = serde_json::from_str(json).unwrap();
        assert_eq!(block.height, 835000);
        assert_eq!(block.tx.len(), 2);
        assert!(block.tx[0].vin[0].coinbase.is_some());
        assert_eq!(block.tx[1].vin[0].witness, vec!["30", "02"]);
        assert_eq!(block.tx[1].vout[0].script_pub_key.address, None);
    }

    #[test]
    fn test_parse_estimate_smart_fee_errors() {
        let json = r#"{"errors": ["Insufficient data or no feerate found"], "blocks": 2}"#;
        let fee: EstimateSmartFee = serde_json::from_str(json).unwrap();
        assert!(fee.feerate.is_none());
        assert_eq!(fee.errors.unwrap().len(), 1);
    }
}
