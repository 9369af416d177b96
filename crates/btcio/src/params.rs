//! Per-chain parameters, fixed for the lifetime of an observer.

use std::str::FromStr;

use bitcoin::{Address, Network, PublicKey};
use btcobs_config::ObserverConfig;
use thiserror::Error;

/// Offset added to the nonce to get the value of its nonce-mark output.
pub const NONCE_MARK_OFFSET_SATS: u64 = 2_000;

/// Withdrawals below this are never paid out.
pub const DUST_SATS: u64 = 1_000;

/// Memo marking a deposit as a donation to the TSS.
pub const DONATION_MESSAGE: &str = "I am rich!";

/// First block the inbound scanner looks at on a fresh regtest node.
pub const REGTEST_START_BLOCK: u64 = 100;

/// Blocks an outbound may sit in the mempool before it counts as stuck.
const PENDING_TX_WAIT_BLOCKS: u64 = 3;

/// Regtest mines blocks on demand, so allow much longer.
const PENDING_TX_WAIT_BLOCKS_REGTEST: u64 = 30;

/// Value of the nonce-mark output created by the outbound with `nonce`.
pub fn nonce_mark_amount(nonce: u64) -> u64 {
    nonce + NONCE_MARK_OFFSET_SATS
}

#[derive(Debug, Error)]
pub enum ParamsError {
    #[error("invalid tss address {0}: {1}")]
    TssAddress(String, String),

    #[error("invalid tss pubkey {0}: {1}")]
    TssPubkey(String, String),

    #[error("tss pubkey {0} is not compressed")]
    UncompressedPubkey(String),
}

#[derive(Debug, Clone)]
pub struct ChainParams {
    pub chain_id: i64,
    /// Chain id of the core layer, the receiving side of deposits.
    pub core_chain_id: i64,
    pub network: Network,
    pub tss_address: Address,
    /// Compressed pubkey, lowercase hex as it appears in witnesses.
    pub tss_pubkey: String,
    pub confirmation_count: u64,
    pub big_value_sats: u64,
    pub big_value_confirmations: u64,
    pub gas_price_multiplier: f64,
}

impl ChainParams {
    pub fn from_config(config: &ObserverConfig, network: Network) -> Result<Self, ParamsError> {
        let tss_address = Address::from_str(&config.tss_address)
            .and_then(|a| a.require_network(network))
            .map_err(|e| ParamsError::TssAddress(config.tss_address.clone(), e.to_string()))?;

        let pubkey = PublicKey::from_str(&config.tss_pubkey)
            .map_err(|e| ParamsError::TssPubkey(config.tss_pubkey.clone(), e.to_string()))?;
        if !pubkey.compressed {
            return Err(ParamsError::UncompressedPubkey(config.tss_pubkey.clone()));
        }

        Ok(Self {
            chain_id: config.chain_id,
            core_chain_id: config.core_chain_id,
            network,
            tss_address,
            tss_pubkey: pubkey.to_string(),
            confirmation_count: config.confirmation_count,
            big_value_sats: config.big_value_sats,
            big_value_confirmations: config.big_value_confirmations,
            gas_price_multiplier: config.gas_price_multiplier,
        })
    }

    pub fn is_regtest(&self) -> bool {
        self.network == Network::Regtest
    }

    pub fn is_mainnet(&self) -> bool {
        self.network == Network::Bitcoin
    }

    pub fn tss_address_str(&self) -> String {
        self.tss_address.to_string()
    }

    /// Confirmations an outbound of `amount_sats` needs before it's voted on.
    ///
    /// Big outbounds never wait less than the configured count; everything
    /// else never waits longer than a big one would.
    pub fn confirmations_threshold(&self, amount_sats: u64) -> u64 {
        if amount_sats >= self.big_value_sats {
            return self.big_value_confirmations.max(self.confirmation_count);
        }
        self.confirmation_count.min(self.big_value_confirmations)
    }

    pub fn mempool_wait_blocks(&self) -> u64 {
        if self.is_regtest() {
            PENDING_TX_WAIT_BLOCKS_REGTEST
        } else {
            PENDING_TX_WAIT_BLOCKS
        }
    }

    /// Whether a block at `height` has enough confirmations given the tip
    /// `last_block`.
    pub fn is_block_confirmed(&self, last_block: u64, height: u64) -> bool {
        let confs = self.confirmation_count.max(1);
        last_block >= height + confs - 1
    }
}
