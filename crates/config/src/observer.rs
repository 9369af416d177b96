use serde::{Deserialize, Serialize};

/// Outbounds at or above this many sats wait for the big-value confirmation
/// count.
const DEFAULT_BIG_VALUE_SATS: u64 = 200_000_000;

const DEFAULT_BIG_VALUE_CONFIRMATIONS: u64 = 6;

const DEFAULT_CONFIRMATION_COUNT: u64 = 1;

/// Multiplier applied to the average block fee rate for the depositor fee.
const DEFAULT_GAS_PRICE_MULTIPLIER: f64 = 2.0;

const DEFAULT_CORE_CHAIN_ID: i64 = 7000;

/// Configuration of the chain observer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObserverConfig {
    /// Chain id the votes are tagged with.
    pub chain_id: i64,

    /// Chain id of the core layer, where deposits are credited.
    #[serde(default = "default_core_chain_id")]
    pub core_chain_id: i64,

    /// TSS custody address, as a bech32 P2WPKH address.
    pub tss_address: String,

    /// Compressed TSS public key, hex encoded.
    pub tss_pubkey: String,

    /// Confirmations an inbound block or outbound tx needs before voting.
    #[serde(default = "default_confirmation_count")]
    pub confirmation_count: u64,

    #[serde(default = "default_big_value_sats")]
    pub big_value_sats: u64,

    #[serde(default = "default_big_value_confirmations")]
    pub big_value_confirmations: u64,

    #[serde(default = "default_gas_price_multiplier")]
    pub gas_price_multiplier: f64,

    /// Addresses no inbound or outbound may touch.  Inbounds involving one
    /// are never voted, outbounds paying one are voted as failed.
    #[serde(default)]
    pub restricted_addresses: Vec<String>,

    #[serde(default)]
    pub tickers: TickerConfig,
}

fn default_core_chain_id() -> i64 {
    DEFAULT_CORE_CHAIN_ID
}

fn default_confirmation_count() -> u64 {
    DEFAULT_CONFIRMATION_COUNT
}

fn default_big_value_sats() -> u64 {
    DEFAULT_BIG_VALUE_SATS
}

fn default_big_value_confirmations() -> u64 {
    DEFAULT_BIG_VALUE_CONFIRMATIONS
}

fn default_gas_price_multiplier() -> f64 {
    DEFAULT_GAS_PRICE_MULTIPLIER
}

/// Periods of the observer's watchers, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TickerConfig {
    pub inbound_secs: u64,
    pub outbound_secs: u64,
    pub utxo_secs: u64,
    pub gas_price_secs: u64,
    pub inbound_tracker_secs: u64,
    pub rpc_status_secs: u64,
    pub mempool_secs: u64,
    /// How often the periods above are refreshed from the core layer.
    pub chain_params_secs: u64,
}

impl Default for TickerConfig {
    fn default() -> Self {
        Self {
            inbound_secs: 30,
            outbound_secs: 30,
            utxo_secs: 30,
            gas_price_secs: 300,
            inbound_tracker_secs: 60,
            rpc_status_secs: 60,
            mempool_secs: 30,
            chain_params_secs: 60,
        }
    }
}
