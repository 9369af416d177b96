use std::path::PathBuf;

use argh::FromArgs;
use toml::value::Table;

use crate::errors::{ConfigError, InitError};

#[derive(Debug, Clone, FromArgs)]
#[argh(description = "Bitcoin chain observer")]
pub struct Args {
    #[argh(option, short = 'c', description = "path to configuration")]
    pub config: PathBuf,

    /// Data directory path that will override the path in the config toml.
    #[argh(
        option,
        short = 'd',
        description = "datadir path that will contain databases"
    )]
    pub datadir: Option<PathBuf>,

    /// Bitcoind RPC url that will override the one in the config toml.
    #[argh(option, description = "bitcoind rpc url")]
    pub rpc_url: Option<String>,

    /// Other generic overrides to the config toml.
    /// Will be used, for example, as `-o observer.tickers.inbound_secs=5 -o bitcoind.network=signet`
    #[argh(option, short = 'o', description = "generic config overrides")]
    pub overrides: Vec<String>,
}

impl Args {
    /// Get strings of overrides gathered from args.
    pub fn get_overrides(&self) -> Result<Vec<String>, InitError> {
        let mut overrides = self.overrides.clone();
        overrides.extend_from_slice(&self.get_direct_overrides()?);
        Ok(overrides)
    }

    /// Overrides passed directly as args and not as overrides.
    fn get_direct_overrides(&self) -> Result<Vec<String>, InitError> {
        let mut overrides = Vec::new();
        if let Some(datadir) = &self.datadir {
            let dd = datadir.to_str().ok_or(anyhow::anyhow!(
                "Invalid datadir override path {:?}",
                datadir
            ))?;
            overrides.push(format!("client.datadir={dd}"));
        }
        if let Some(rpc_url) = &self.rpc_url {
            overrides.push(format!("bitcoind.rpc_url={rpc_url}"));
        }

        Ok(overrides)
    }
}

type Override = (String, toml::Value);

/// Splits an override on the first '=' into the key path and its value.
pub fn parse_override(override_str: &str) -> Result<Override, ConfigError> {
    let (key, value_str) = override_str
        .split_once('=')
        .ok_or(ConfigError::InvalidOverride(override_str.to_string()))?;
    Ok((key.to_string(), parse_value(value_str)))
}

/// Sets `value` at the dotted `path` of `table`.  Only the last segment may
/// be missing.
pub fn apply_override(
    path: &str,
    value: toml::Value,
    table: &mut Table,
) -> Result<(), ConfigError> {
    match path.split_once('.') {
        None => {
            table.insert(path.to_string(), value);
            Ok(())
        }
        Some((key, rest)) => {
            if let Some(t) = table.get_mut(key).and_then(|v| v.as_table_mut()) {
                apply_override(rest, value, t)
            } else if table.contains_key(key) {
                Err(ConfigError::TraverseNonTableAt(key.to_string()))
            } else {
                Err(ConfigError::MissingKey(key.to_string()))
            }
        }
    }
}

/// Parses a string into a toml value. First tries as `i64`, then as `bool` and then defaults to
/// `String`.
fn parse_value(str_value: &str) -> toml::Value {
    str_value
        .parse::<i64>()
        .map(toml::Value::Integer)
        .or_else(|_| str_value.parse::<bool>().map(toml::Value::Boolean))
        .unwrap_or_else(|_| toml::Value::String(str_value.to_string()))
}

#[cfg(test)]
mod test {
    use bitcoin::Network;
    use btcobs_config::Config;

    use super::*;

    const CONFIG: &str = r#"
        [client]
        datadir = "/data"
        core_rpc_url = "http://localhost:26657"

        [bitcoind]
        rpc_url = "http://localhost:18443"
        rpc_user = "user"
        rpc_password = "pass"
        network = "regtest"

        [observer]
        chain_id = 18444
        tss_address = "bcrt1q7jaj5wvxvadjc2rtc3ltst9xsfwmhy5cn3hw2n"
        tss_pubkey = "02a0be1a9a1f1c1bb1b1b55c6d7a8b9f3a6a0c8c2c4f7e5d0a1b3c5d7e9f1a2b3c"

        [observer.tickers]
    "#;

    fn args(overrides: &[&str]) -> Args {
        Args {
            config: "config_path".into(),
            datadir: Some("some/data/dir/".into()),
            rpc_url: Some("http://bitcoind:8332".to_string()),
            overrides: overrides.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_apply_override() {
        let mut toml: toml::Value = toml::from_str(CONFIG).unwrap();
        let table = toml.as_table_mut().unwrap();
        let args = args(&[
            "observer.tickers.inbound_secs=5",
            "observer.confirmation_count=3",
            "bitcoind.network=signet",
        ]);

        for o in args.get_overrides().unwrap() {
            let (path, val) = parse_override(&o).unwrap();
            apply_override(&path, val, table).unwrap();
        }

        let config: Config = toml.try_into().unwrap();
        assert_eq!(config.observer.tickers.inbound_secs, 5);
        assert_eq!(config.observer.confirmation_count, 3);
        assert_eq!(config.bitcoind.network, Network::Signet);
        assert_eq!(config.bitcoind.rpc_url, "http://bitcoind:8332");
        assert_eq!(&config.client.datadir.to_string_lossy(), "some/data/dir/");
    }

    #[test]
    fn test_bad_overrides() {
        let mut toml: toml::Value = toml::from_str(CONFIG).unwrap();
        let table = toml.as_table_mut().unwrap();

        assert!(matches!(
            parse_override("observer.chain_id"),
            Err(ConfigError::InvalidOverride(_))
        ));
        assert!(matches!(
            apply_override("observer.chain_id.x", toml::Value::Integer(1), table),
            Err(ConfigError::TraverseNonTableAt(_))
        ));
        assert!(matches!(
            apply_override("nope.x", toml::Value::Integer(1), table),
            Err(ConfigError::MissingKey(_))
        ));
    }
}
