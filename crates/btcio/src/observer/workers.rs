//! One periodic task per watch concern, all stopped by the same shutdown
//! signal.

use std::{future::Future, sync::Arc, time::Duration};

use btcobs_config::TickerConfig;
use btcobs_db::traits::Database;
use btcobs_tasks::{
    ticker::{run_periodic, DynamicTicker},
    TaskExecutor,
};
use tracing::*;

use super::{Observer, ObserverError, ObserverResult};
use crate::{core_client::CoreClient, rpc::traits::BtcClient};

/// Spawns the observer's watchers on `executor`.
///
/// The observer must have been initialized with [`Observer::init`] first.
/// Each watcher re-reads its period from [`Observer::tickers`] after every
/// run.
pub fn start_observer_workers<B, C, D>(observer: Arc<Observer<B, C, D>>, executor: &TaskExecutor)
where
    B: BtcClient,
    C: CoreClient,
    D: Database + Send + Sync + 'static,
{
    spawn_watcher(
        executor,
        "btc_inbound",
        &observer,
        |t| t.inbound_secs,
        |ob| async move { ob.observe_inbound().await },
    );

    spawn_watcher(
        executor,
        "btc_outbound",
        &observer,
        |t| t.outbound_secs,
        |ob| async move {
            ob.refresh_pending_nonce().await;
            ob.process_outbound_trackers().await
        },
    );

    spawn_watcher(
        executor,
        "btc_utxos",
        &observer,
        |t| t.utxo_secs,
        |ob| async move { ob.fetch_utxos().await },
    );

    spawn_watcher(
        executor,
        "btc_gas_price",
        &observer,
        |t| t.gas_price_secs,
        |ob| async move { ob.post_gas_price().await },
    );

    spawn_watcher(
        executor,
        "btc_inbound_trackers",
        &observer,
        |t| t.inbound_tracker_secs,
        |ob| async move { ob.process_inbound_trackers().await },
    );

    spawn_watcher(
        executor,
        "btc_rpc_status",
        &observer,
        |t| t.rpc_status_secs,
        |ob| async move { ob.check_rpc_status().await },
    );

    spawn_watcher(
        executor,
        "btc_mempool",
        &observer,
        |t| t.mempool_secs,
        |ob| async move { ob.refresh_last_stuck_outbound().await },
    );

    spawn_watcher(
        executor,
        "btc_chain_params",
        &observer,
        |t| t.chain_params_secs,
        |ob| async move { ob.refresh_tickers().await },
    );

    info!(chain_id = %observer.params().chain_id, "started observer workers");
}

// tokio intervals can't have a zero period
fn period_of(tickers: &TickerConfig, secs: fn(&TickerConfig) -> u64) -> Duration {
    Duration::from_secs(secs(tickers).max(1))
}

fn spawn_watcher<B, C, D, F, Fut>(
    executor: &TaskExecutor,
    name: &'static str,
    observer: &Arc<Observer<B, C, D>>,
    secs: fn(&TickerConfig) -> u64,
    task: F,
) where
    B: BtcClient,
    C: CoreClient,
    D: Database + Send + Sync + 'static,
    F: Fn(Arc<Observer<B, C, D>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ObserverResult<()>> + Send + 'static,
{
    let ticker = DynamicTicker::new(name, period_of(&observer.tickers(), secs));
    let observer = observer.clone();

    executor.spawn_critical_async_with_shutdown(name, move |shutdown| async move {
        run_periodic(ticker, shutdown, || {
            let ob = observer.clone();
            let run = task(ob.clone());
            async move {
                run.await?;
                Ok::<_, ObserverError>(Some(period_of(&ob.tickers(), secs)))
            }
            .instrument(debug_span!("watcher", %name))
        })
        .await;
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use bitcoin::Network;
    use btcobs_rpc_api::{ChainTickers, PendingNonces};
    use btcobs_tasks::TaskManager;

    use super::*;
    use crate::{
        core_client::MockCoreClient, observer::tests::test_observer,
        test_utils::TestBitcoinClient,
    };

    #[test]
    fn test_workers_run_until_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = TaskManager::new(runtime.handle().clone());

        let btc = TestBitcoinClient::new(Network::Bitcoin);
        btc.mine_to(5);

        let gas_posts = Arc::new(AtomicUsize::new(0));
        let posts = gas_posts.clone();
        let mut core = MockCoreClient::new();
        core.expect_post_gas_price().returning(move |_| {
            posts.fetch_add(1, Ordering::SeqCst);
            Ok("ballot".to_string())
        });
        core.expect_get_pending_nonces()
            .returning(|chain_id| Ok(PendingNonces { chain_id, ..Default::default() }));
        core.expect_get_outbound_trackers().returning(|_| Ok(vec![]));
        core.expect_get_inbound_trackers().returning(|_| Ok(vec![]));
        core.expect_get_chain_tickers().returning(|chain_id| {
            Ok(ChainTickers {
                chain_id,
                gas_price_secs: 120,
                ..Default::default()
            })
        });

        let observer = Arc::new(test_observer(&btc, core));
        runtime.block_on(observer.init()).unwrap();

        // failing watchers keep running
        btc.fail("list_unspent");
        start_observer_workers(observer.clone(), &manager.executor());

        let sig = manager.shutdown_signal();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(200));
            sig.send();
        });
        manager
            .monitor(Some(Duration::from_secs(5)))
            .expect("clean shutdown");

        assert_eq!(gas_posts.load(Ordering::SeqCst), 1);
        assert_eq!(observer.last_block(), 5);
        assert_eq!(observer.last_block_scanned(), 5);
        assert_eq!(observer.tickers().gas_price_secs, 120);
        assert_eq!(observer.tickers().inbound_secs, TickerConfig::default().inbound_secs);
    }

    #[test]
    fn test_period_of() {
        let tickers = TickerConfig {
            mempool_secs: 0,
            ..Default::default()
        };
        assert_eq!(period_of(&tickers, |t| t.mempool_secs), Duration::from_secs(1));
        assert_eq!(period_of(&tickers, |t| t.gas_price_secs), Duration::from_secs(300));
    }
}
