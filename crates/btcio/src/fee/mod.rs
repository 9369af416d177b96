//! Transaction size model and the fees derived from it.
//!
//! Sizes are in vbytes, rates in sat/vB and fees in satoshis.

use bitcoin::{Address, Network, Transaction, VarInt};
use thiserror::Error;
use tracing::*;

use crate::{
    amount::{AmountError, SATS_PER_BTC},
    codec::script::{classify_address, ScriptKind},
    params::ChainParams,
    rpc::{types::GetBlockVerbose, ClientError},
};

pub mod rpc;

pub use rpc::{get_estimated_fee_rate, get_recent_fee_rate, get_transaction_fee_and_rate};

const BYTES_PER_INPUT: u64 = 41;
const BYTES_PER_OUTPUT_AVG: u64 = 37;
const BYTES_1ST_WITNESS: u64 = 110;
const BYTES_PER_WITNESS: u64 = 108;
const WITNESS_SCALE_FACTOR: u64 = 4;

/// Size of the smallest outbound: 2 inputs paying a P2WPKH payee.
pub const OUTBOUND_BYTES_MIN: u64 = 239;

/// Size of the largest outbound: 21 inputs paying a P2TR payee.
pub const OUTBOUND_BYTES_MAX: u64 = 1543;

const BYTES_PER_KB: f64 = 1000.0;

pub const DEFAULT_DEPOSITOR_FEE_RATE: u64 = 20;

pub const DEFAULT_TESTNET_FEE_RATE: u64 = 10;

/// Blocks looked back by [`get_recent_fee_rate`].
const FEE_RATE_COUNT_BACK_BLOCKS: u64 = 2;

/// Mainnet height below which the default depositor fee applies.
pub const DYNAMIC_DEPOSITOR_FEE_HEIGHT: i64 = 834_500;

const MAINNET_HALVING_INTERVAL: i64 = 210_000;
const REGTEST_HALVING_INTERVAL: i64 = 150;
const BASE_SUBSIDY_SATS: u64 = 50 * SATS_PER_BTC;

/// Upper bound a node may report for `estimatesmartfee`, in BTC/kvB.
const MAX_FEE_RATE_BTC_PER_KB: f64 = 21_000_000.0;

#[derive(Debug, Error)]
pub enum FeeError {
    #[error("cannot get output size for address type {0}")]
    UnsupportedAddress(String),

    #[error("block has no transactions")]
    NoTransactions,

    #[error("block weight {0} too small")]
    WeightTooSmall(i32),

    #[error("block weight {0} less than coinbase tx weight {1}")]
    WeightBelowCoinbase(i32, i32),

    #[error("invalid block height {0}")]
    InvalidHeight(i64),

    #[error("failed to decode coinbase tx {0}")]
    CoinbaseHex(String),

    #[error("failed to parse coinbase tx {0}")]
    CoinbaseParse(String),

    #[error("first tx {0} is not coinbase tx")]
    NotCoinbase(String),

    #[error("miner earned {0}, less than subsidy {1}")]
    EarnedBelowSubsidy(u64, u64),

    #[error("block {0} has zero vbytes outside the coinbase")]
    ZeroVbytes(i64),

    #[error("invalid fee rate {0}")]
    InvalidFeeRate(f64),

    #[error("GetRecentFeeRate should not be used for mainnet")]
    RecentFeeRateOnMainnet,

    #[error("unable to estimate smart fee: {0}")]
    EstimateSmartFee(#[source] ClientError),

    #[error("fee result contains errors: {0}")]
    EstimateErrors(String),

    #[error("fee rate is nil")]
    MissingFeeRate,

    #[error("fee rate is invalid: {0}")]
    FeeRateOutOfRange(f64),

    #[error("tx {0} has non-positive Vsize: {1}")]
    NonPositiveVsize(String, i32),

    #[error("invalid txid {0}")]
    InvalidTxid(String),

    #[error("failed to get previous tx: {0}")]
    PrevTx(String, #[source] ClientError),

    #[error("vout index {1} out of range for previous tx {0}")]
    PrevOutOfRange(String, u32),

    #[error("got negative fee: {0}")]
    NegativeFee(i64),

    #[error("amount: {0}")]
    Amount(#[from] AmountError),

    #[error("rpc: {0}")]
    Rpc(#[from] ClientError),
}

pub type FeeResult<T> = Result<T, FeeError>;

fn var_int_size(n: u64) -> u64 {
    VarInt(n).size() as u64
}

/// Serialized size of version, locktime and the input and output counts.
pub fn wired_tx_size(num_inputs: u64, num_outputs: u64) -> u64 {
    8 + var_int_size(num_inputs) + var_int_size(num_outputs)
}

impl ScriptKind {
    /// Serialized size of an output paying this kind of script.
    pub fn output_size(&self) -> u64 {
        match self {
            ScriptKind::P2tr => 43,
            ScriptKind::P2wsh => 43,
            ScriptKind::P2wpkh => 31,
            ScriptKind::P2sh => 32,
            ScriptKind::P2pkh => 34,
        }
    }
}

/// Size of an output paying `addr`.  A missing address has size 0.
pub fn output_size_by_address(addr: Option<&Address>) -> FeeResult<u64> {
    let Some(addr) = addr else {
        return Ok(0);
    };
    classify_address(addr)
        .map(|kind| kind.output_size())
        .ok_or_else(|| FeeError::UnsupportedAddress(format!("{:?}", addr.address_type())))
}

/// Estimated vsize of an outbound spending `num_inputs` TSS inputs.
///
/// Besides one output per payee every outbound has a nonce-mark and a change
/// output, both P2WPKH.  The first witness is a bit bigger than the rest.
pub fn estimate_outbound_size(num_inputs: u64, payees: &[Address]) -> FeeResult<u64> {
    if num_inputs == 0 {
        return Ok(0);
    }
    let num_outputs = 2 + payees.len() as u64;

    let bytes_wired = wired_tx_size(num_inputs, num_outputs);
    let bytes_input = num_inputs * BYTES_PER_INPUT;
    let bytes_output = 2 * ScriptKind::P2wpkh.output_size();

    let mut bytes_to_payees = 0;
    for payee in payees {
        bytes_to_payees += output_size_by_address(Some(payee))?;
    }

    let bytes_witness = BYTES_1ST_WITNESS + (num_inputs - 1) * BYTES_PER_WITNESS;

    Ok(bytes_wired
        + bytes_input
        + bytes_output
        + bytes_to_payees
        + bytes_witness / WITNESS_SCALE_FACTOR)
}

/// Size a deposited UTXO adds to the outbound that later spends it (68 vB).
pub const fn outbound_size_depositor() -> u64 {
    BYTES_PER_INPUT + BYTES_PER_WITNESS / WITNESS_SCALE_FACTOR
}

/// Size of a 1-input, 3-output withdrawal (177 vB).  Used as the suggested
/// gas limit.
pub fn outbound_size_withdrawer() -> u64 {
    let bytes_wired = wired_tx_size(1, 3);
    let bytes_output = 2 * ScriptKind::P2wpkh.output_size() + BYTES_PER_OUTPUT_AVG;
    bytes_wired + BYTES_PER_INPUT + bytes_output + BYTES_1ST_WITNESS / WITNESS_SCALE_FACTOR
}

/// Fee charged to a depositor, covering the future cost of spending their
/// UTXO.
pub const fn depositor_fee(sat_per_vbyte: u64) -> u64 {
    sat_per_vbyte * outbound_size_depositor()
}

/// 1360 sats, i.e. 20 sat/vB.
pub const DEFAULT_DEPOSITOR_FEE: u64 = depositor_fee(DEFAULT_DEPOSITOR_FEE_RATE);

/// Converts a node fee rate in BTC/kvB to sat/vB, rounding down.
pub fn fee_rate_to_sat_per_byte(rate: f64) -> FeeResult<u64> {
    if rate.is_nan() || rate <= 0.0 {
        return Err(FeeError::InvalidFeeRate(rate));
    }
    let sat_per_kb = rate * SATS_PER_BTC as f64;
    Ok((sat_per_kb / BYTES_PER_KB) as u64)
}

fn halving_interval(network: Network) -> i64 {
    match network {
        Network::Regtest => REGTEST_HALVING_INTERVAL,
        _ => MAINNET_HALVING_INTERVAL,
    }
}

/// Coinbase subsidy at `height`.
pub fn block_subsidy(height: i64, network: Network) -> u64 {
    let halvings = height / halving_interval(network);
    if halvings >= 64 {
        return 0;
    }
    BASE_SUBSIDY_SATS >> halvings
}

/// Average fee rate paid by the non-coinbase txs of a block.
///
/// A block holding only the coinbase has rate 0.  Inconsistent blocks, like
/// a coinbase earning less than the subsidy, are errors.
pub fn calc_block_avg_fee_rate(block: &GetBlockVerbose, network: Network) -> FeeResult<u64> {
    let Some(coinbase) = block.tx.first() else {
        return Err(FeeError::NoTransactions);
    };
    if block.tx.len() == 1 {
        return Ok(0);
    }

    if (block.weight as i64) < WITNESS_SCALE_FACTOR as i64 {
        return Err(FeeError::WeightTooSmall(block.weight));
    }
    if block.weight < coinbase.weight {
        return Err(FeeError::WeightBelowCoinbase(block.weight, coinbase.weight));
    }
    if block.height <= 0 || block.height > i32::MAX as i64 {
        return Err(FeeError::InvalidHeight(block.height));
    }

    let raw = hex::decode(&coinbase.hex).map_err(|_| FeeError::CoinbaseHex(coinbase.txid.clone()))?;
    let tx: Transaction = bitcoin::consensus::deserialize(&raw)
        .map_err(|_| FeeError::CoinbaseParse(coinbase.txid.clone()))?;
    if !tx.is_coinbase() {
        return Err(FeeError::NotCoinbase(coinbase.txid.clone()));
    }

    let earned: u64 = tx.output.iter().map(|o| o.value.to_sat()).sum();
    let subsidy = block_subsidy(block.height, network);
    if earned < subsidy {
        return Err(FeeError::EarnedBelowSubsidy(earned, subsidy));
    }
    let fees = earned - subsidy;

    let weight: u64 = block
        .tx
        .iter()
        .skip(1)
        .filter(|tx| tx.weight > 0)
        .map(|tx| tx.weight as u64)
        .sum();
    let vbytes = weight / WITNESS_SCALE_FACTOR;
    if vbytes == 0 {
        return Err(FeeError::ZeroVbytes(block.height));
    }

    Ok(fees / vbytes)
}

/// Depositor fee for the deposits found in `block`.
///
/// Falls back to the default rate when the block's average rate can't be
/// computed.
pub fn calc_depositor_fee(block: &GetBlockVerbose, params: &ChainParams) -> u64 {
    if params.is_regtest() {
        return DEFAULT_DEPOSITOR_FEE;
    }
    if params.is_mainnet() && block.height < DYNAMIC_DEPOSITOR_FEE_HEIGHT {
        return DEFAULT_DEPOSITOR_FEE;
    }

    let rate = match calc_block_avg_fee_rate(block, params.network) {
        Ok(rate) => rate,
        Err(e) => {
            error!(height = %block.height, err = %e, "cannot calculate block avg fee rate, using default");
            DEFAULT_DEPOSITOR_FEE_RATE
        }
    };

    let rate = (rate as f64 * params.gas_price_multiplier) as u64;
    depositor_fee(rate)
}

/// Checks a node-reported BTC/kvB rate and converts it to sat/vB.
pub(crate) fn checked_node_fee_rate(rate: f64) -> FeeResult<u64> {
    if rate <= 0.0 || rate >= MAX_FEE_RATE_BTC_PER_KB {
        return Err(FeeError::FeeRateOutOfRange(rate));
    }
    fee_rate_to_sat_per_byte(rate)
}
