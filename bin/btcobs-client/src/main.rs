use std::{sync::Arc, time::Duration};

use anyhow::Context;
use btcobs_btcio::{
    compliance::RestrictedAddresses,
    observer::{start_observer_workers, Observer},
    params::ChainParams,
    rpc::traits::Reader,
};
use btcobs_common::{env::parse_env_or, logging};
use btcobs_config::Config;
use btcobs_rocksdb::DbOpsConfig;
use btcobs_tasks::TaskManager;
use tokio::runtime::Handle;
use tracing::*;

use crate::{args::Args, helpers::*};

mod args;
mod errors;
mod helpers;

const SHUTDOWN_TIMEOUT_ENVVAR: &str = "BTCOBS_SHUTDOWN_TIMEOUT_SECS";
const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    if let Err(e) = main_inner(args) {
        eprintln!("FATAL ERROR: {e}");
        return Err(e);
    }

    Ok(())
}

fn main_inner(args: Args) -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("btcobs-rt")
        .build()
        .context("init: build rt")?;

    let config = get_config(&args)?;

    // Init the logging before we do anything else.
    init_logging(runtime.handle(), &config);
    info!(config = ?args.config, network = %config.bitcoind.network, "loaded config");

    let params = ChainParams::from_config(&config.observer, config.bitcoind.network)?;

    let rbdb = open_rocksdb_database(&config)?;
    let ops_config = DbOpsConfig::new(config.client.db_retry_count);
    let database = init_observer_database(rbdb, ops_config);

    let btc = create_bitcoin_rpc_client(&config)?;
    let node_network = runtime.block_on(btc.network())?;
    if node_network != params.network {
        anyhow::bail!(
            "bitcoind is on {node_network}, config expects {}",
            params.network
        );
    }

    let core = create_core_client(&config)?;
    let compliance = Arc::new(RestrictedAddresses::new(
        &config.observer.restricted_addresses,
    ));

    let observer = Observer::new(params, btc, core, database, compliance)
        .with_tickers(config.observer.tickers.clone());
    let observer = Arc::new(observer);
    runtime.block_on(observer.init())?;

    let task_manager = TaskManager::new(runtime.handle().clone());
    let executor = task_manager.executor();

    info!("init finished, starting observer");
    start_observer_workers(observer, &executor);

    task_manager.start_signal_listeners();
    let shutdown_timeout = parse_env_or(SHUTDOWN_TIMEOUT_ENVVAR, DEFAULT_SHUTDOWN_TIMEOUT_SECS);
    task_manager.monitor(Some(Duration::from_secs(shutdown_timeout)))?;

    logging::finalize();
    info!("exiting");
    Ok(())
}

fn init_logging(rt: &Handle, config: &Config) {
    let mut lconfig = logging::LoggerConfig::with_base_name("btcobs-client");

    // The env var wins over the config file.
    let otlp_url = logging::get_otlp_url_from_env().or_else(|| config.logging.otlp_url.clone());
    if let Some(url) = &otlp_url {
        lconfig.set_otlp_url(url.clone());
    }

    {
        // The OTLP exporter needs a runtime context.
        let _g = rt.enter();
        logging::init(lconfig);
    }

    // Have to log this after we start the logging formally.
    if let Some(url) = &otlp_url {
        info!(%url, "using OpenTelemetry tracing output");
    }
}
