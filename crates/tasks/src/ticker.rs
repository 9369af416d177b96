//! Periodic timer whose period can be changed while it runs.

use std::{fmt::Display, future::Future, time::Duration};

use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tracing::*;

use crate::ShutdownGuard;

/// Interval timer for a named watcher.  The period can be adjusted between
/// ticks, e.g. when the chain's block time changes or a config value is
/// reloaded.
#[derive(Debug)]
pub struct DynamicTicker {
    name: &'static str,
    period: Duration,
    interval: Interval,
}

impl DynamicTicker {
    pub fn new(name: &'static str, period: Duration) -> Self {
        Self {
            name,
            period,
            interval: make_interval(period),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits for the next tick.  The first tick completes immediately.
    pub async fn tick(&mut self) {
        self.interval.tick().await;
    }

    /// Updates the period, restarting the interval one new period from now.
    /// Returns whether anything changed.
    pub fn set_interval(&mut self, period: Duration) -> bool {
        if period == self.period || period.is_zero() {
            return false;
        }

        info!(ticker = %self.name, old = ?self.period, new = ?period, "updating ticker interval");
        self.period = period;
        self.interval = time::interval_at(Instant::now() + period, period);
        self.interval
            .set_missed_tick_behavior(MissedTickBehavior::Delay);
        true
    }
}

fn make_interval(period: Duration) -> Interval {
    let mut interval = time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

/// Drives `task` on every tick of `ticker` until shutdown is signalled.
///
/// The task may return a new period which is applied to the ticker.  Errors
/// are logged and the loop keeps going, so a single bad iteration never stops
/// the watcher.  Shutdown is only checked between iterations.
pub async fn run_periodic<F, Fut, E>(mut ticker: DynamicTicker, shutdown: ShutdownGuard, mut task: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<Option<Duration>, E>>,
    E: Display,
{
    info!(ticker = %ticker.name(), period = ?ticker.period(), "starting watcher");

    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => break,
            _ = ticker.tick() => {}
        }

        match task().await {
            Ok(Some(period)) => {
                ticker.set_interval(period);
            }
            Ok(None) => {}
            Err(e) => {
                error!(ticker = %ticker.name(), err = %e, "watcher iteration failed");
            }
        }

        if shutdown.should_shutdown() {
            break;
        }
    }

    info!(ticker = %ticker.name(), "watcher stopped");
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use super::*;
    use crate::TaskManager;

    #[tokio::test]
    async fn test_set_interval() {
        let mut ticker = DynamicTicker::new("test", Duration::from_secs(5));
        assert_eq!(ticker.period(), Duration::from_secs(5));

        assert!(!ticker.set_interval(Duration::from_secs(5)));
        assert!(!ticker.set_interval(Duration::ZERO));
        assert!(ticker.set_interval(Duration::from_millis(10)));
        assert_eq!(ticker.period(), Duration::from_millis(10));

        tokio::time::timeout(Duration::from_secs(1), ticker.tick())
            .await
            .expect("tick");
    }

    #[test]
    fn test_run_periodic_until_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = TaskManager::new(runtime.handle().clone());
        let executor = manager.executor();

        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();

        executor.spawn_critical_async_with_shutdown("ticker-test", |shutdown| async move {
            let ticker = DynamicTicker::new("ticker-test", Duration::from_millis(5));
            run_periodic(ticker, shutdown, || {
                let calls = calls2.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n % 2 == 0 {
                        Err("odd iteration")
                    } else {
                        Ok(Some(Duration::from_millis(3)))
                    }
                }
            })
            .await;
            Ok(())
        });

        let sig = manager.shutdown_signal();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            sig.send();
        });

        manager
            .monitor(Some(Duration::from_secs(5)))
            .expect("clean shutdown");
        assert!(calls.load(Ordering::SeqCst) >= 2);
    }
}
