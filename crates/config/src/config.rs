use std::path::PathBuf;

use bitcoin::Network;
use serde::{Deserialize, Serialize};

use crate::observer::ObserverConfig;

/// Default value for `datadir` in [`ClientConfig`].
const DEFAULT_DATADIR: &str = "btcobs-data";

/// Default value for `db_retry_count` in [`ClientConfig`].
const DEFAULT_DB_RETRY_COUNT: u16 = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    /// The data directory where database contents reside.
    #[serde(default = "default_datadir")]
    pub datadir: PathBuf,

    /// For optimistic transactions, how many times to retry if a write fails.
    #[serde(default = "default_db_retry_count")]
    pub db_retry_count: u16,

    /// RPC endpoint of the core layer that receives votes and hands out
    /// trackers and pending nonces.
    pub core_rpc_url: String,
}

fn default_datadir() -> PathBuf {
    DEFAULT_DATADIR.into()
}

fn default_db_retry_count() -> u16 {
    DEFAULT_DB_RETRY_COUNT
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BitcoindConfig {
    pub rpc_url: String,
    pub rpc_user: String,
    pub rpc_password: String,
    pub network: Network,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_count: Option<u8>,
    /// Delay between retries, in ms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_interval: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// OpenTelemetry collector endpoint.  Falls back to the env var if unset.
    #[serde(default)]
    pub otlp_url: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub client: ClientConfig,
    pub bitcoind: BitcoindConfig,
    pub observer: ObserverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_config_load() {
        let config_string = r#"
            [client]
            datadir = "/path/to/data/directory"
            db_retry_count = 3
            core_rpc_url = "http://localhost:26657"

            [bitcoind]
            rpc_url = "http://localhost:18443"
            rpc_user = "smoketest"
            rpc_password = "123"
            network = "regtest"

            [observer]
            chain_id = 18444
            tss_address = "bcrt1q7jaj5wvxvadjc2rtc3ltst9xsfwmhy5cn3hw2n"
            tss_pubkey = "02a0be1a9a1f1c1bb1b1b55c6d7a8b9f3a6a0c8c2c4f7e5d0a1b3c5d7e9f1a2b3c"
            confirmation_count = 2

            [observer.tickers]
            inbound_secs = 5
            mempool_secs = 10
        "#;

        let config = toml::from_str::<Config>(config_string);
        assert!(
            config.is_ok(),
            "should be able to load TOML config but got: {:?}",
            config.err()
        );

        let config = config.unwrap();
        assert_eq!(config.bitcoind.network, Network::Regtest);
        assert_eq!(config.client.db_retry_count, 3);
        assert_eq!(config.observer.chain_id, 18444);
        assert_eq!(config.observer.tickers.inbound_secs, 5);
        assert_eq!(config.observer.tickers.mempool_secs, 10);
        // defaults
        assert_eq!(config.observer.big_value_sats, 200_000_000);
        assert_eq!(config.observer.big_value_confirmations, 6);
        assert_eq!(config.observer.tickers.rpc_status_secs, 60);
        assert!(config.logging.otlp_url.is_none());
    }

    #[test]
    fn test_config_defaults_client() {
        let config_string = r#"
            [client]
            core_rpc_url = "http://localhost:26657"

            [bitcoind]
            rpc_url = "http://localhost:8332"
            rpc_user = "u"
            rpc_password = "p"
            network = "bitcoin"
            retry_count = 5

            [observer]
            chain_id = 8332
            tss_address = "bc1qm24wp577nk8aacckv8np465z3dvmu7ry45el6y"
            tss_pubkey = "02a0be1a9a1f1c1bb1b1b55c6d7a8b9f3a6a0c8c2c4f7e5d0a1b3c5d7e9f1a2b3c"

            [logging]
            otlp_url = "http://collector:4317"
        "#;

        let config = toml::from_str::<Config>(config_string).expect("parse config");
        assert_eq!(config.client.datadir, PathBuf::from(DEFAULT_DATADIR));
        assert_eq!(config.client.db_retry_count, DEFAULT_DB_RETRY_COUNT);
        assert_eq!(config.bitcoind.retry_count, Some(5));
        assert_eq!(config.bitcoind.network, Network::Bitcoin);
        assert_eq!(config.observer.confirmation_count, 1);
        assert_eq!(
            config.logging.otlp_url.as_deref(),
            Some("http://collector:4317")
        );
    }
}
