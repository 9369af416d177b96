use std::{fs, sync::Arc};

use anyhow::Context;
use btcobs_btcio::{core_client::CoreRpcClient, rpc::BitcoinClient};
use btcobs_config::Config;
use btcobs_db::database::CommonDatabase;
use btcobs_rocksdb::{DbOpsConfig, ObserverDb};
use format_serde_error::SerdeError;
use jsonrpsee::http_client::{HttpClient, HttpClientBuilder};
use rockbound::{rocksdb, OptimisticTransactionDB};
use tracing::*;

use crate::{
    args::{apply_override, parse_override, Args},
    errors::{ConfigError, InitError},
};

pub type ObserverStore = CommonDatabase<ObserverDb, ObserverDb>;

/// Loads the config file and applies the overrides from `args` on top.
pub fn get_config(args: &Args) -> Result<Config, InitError> {
    let config_str = fs::read_to_string(&args.config)?;
    let mut value = toml::from_str::<toml::Value>(&config_str)
        .map_err(|err| SerdeError::new(config_str.clone(), err))?;

    let table = value
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("config root is not a table"))?;
    for o in args.get_overrides()? {
        let (path, val) = parse_override(&o)?;
        apply_override(&path, val, table)?;
    }

    Ok(value.try_into().map_err(ConfigError::Invalid)?)
}

pub fn open_rocksdb_database(config: &Config) -> anyhow::Result<Arc<OptimisticTransactionDB>> {
    let mut database_dir = config.client.datadir.clone();
    database_dir.push("rocksdb");

    if !database_dir.exists() {
        fs::create_dir_all(&database_dir)?;
    }

    let dbname = btcobs_rocksdb::ROCKSDB_NAME;
    let cfs = btcobs_rocksdb::STORE_COLUMN_FAMILIES;
    let mut opts = rocksdb::Options::default();
    opts.create_if_missing(true);
    opts.create_missing_column_families(true);

    let rbdb = OptimisticTransactionDB::open(
        &database_dir,
        dbname,
        cfs.iter().map(|s| s.to_string()),
        &opts,
    )
    .context("opening database")?;

    Ok(Arc::new(rbdb))
}

pub fn init_observer_database(
    rbdb: Arc<OptimisticTransactionDB>,
    ops_config: DbOpsConfig,
) -> Arc<ObserverStore> {
    let db: Arc<_> = ObserverDb::new(rbdb, ops_config).into();
    CommonDatabase::new(db.clone(), db).into()
}

pub fn create_bitcoin_rpc_client(config: &Config) -> anyhow::Result<Arc<BitcoinClient>> {
    let btc_rpc = BitcoinClient::new(
        config.bitcoind.rpc_url.clone(),
        config.bitcoind.rpc_user.clone(),
        config.bitcoind.rpc_password.clone(),
    )
    .map_err(anyhow::Error::from)?
    .with_retries(config.bitcoind.retry_count, config.bitcoind.retry_interval);

    Ok(btc_rpc.into())
}

pub fn create_core_client(config: &Config) -> anyhow::Result<Arc<CoreRpcClient<HttpClient>>> {
    let url = &config.client.core_rpc_url;
    let client = HttpClientBuilder::default()
        .build(url)
        .with_context(|| format!("creating core rpc client for {url}"))?;
    debug!(%url, "created core rpc client");
    Ok(Arc::new(CoreRpcClient::new(client)))
}

