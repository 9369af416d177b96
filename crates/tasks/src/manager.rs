use std::{
    any::Any,
    future::Future,
    panic,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use futures_util::FutureExt;
use tokio::{runtime::Handle, sync::mpsc};
use tracing::{debug, error, info, warn};

use crate::shutdown::{Shutdown, ShutdownGuard, ShutdownSignal};

/// Failure of a critical task, carrying the task name and the panic payload
/// or returned error as a string, if possible.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("critical task `{0}` panicked{}", fmt_reason(.1))]
    Panicked(String, Option<String>),

    #[error("critical task `{0}` failed: {1}")]
    Failed(String, String),
}

fn fmt_reason(reason: &Option<String>) -> String {
    match reason {
        Some(r) => format!(": `{r}`"),
        None => String::new(),
    }
}

impl TaskError {
    fn from_panic(task_name: &str, error: Box<dyn Any + Send>) -> Self {
        let error = match error.downcast::<String>() {
            Ok(value) => Some(*value),
            Err(error) => error.downcast::<&str>().ok().map(|v| v.to_string()),
        };

        Self::Panicked(task_name.to_string(), error)
    }

    pub fn task_name(&self) -> &str {
        match self {
            Self::Panicked(name, _) | Self::Failed(name, _) => name,
        }
    }
}

/// [`TaskManager`] spawns and tracks long running tasks, watches for task
/// failures and manages graceful shutdown on critical failures and external
/// signals.
pub struct TaskManager {
    /// Handle to the tokio runtime.
    tokio_handle: Handle,
    /// Sender half for reporting failures from tasks
    failed_tasks_tx: mpsc::UnboundedSender<TaskError>,
    /// Receiver half the manager waits on
    failed_tasks_rx: mpsc::UnboundedReceiver<TaskError>,
    /// send shutdown signals to tasks
    shutdown_signal: ShutdownSignal,
    /// pending tasks count
    pending_tasks_counter: Arc<AtomicUsize>,
}

impl TaskManager {
    pub fn new(tokio_handle: Handle) -> Self {
        let (failed_tasks_tx, failed_tasks_rx) = mpsc::unbounded_channel();

        Self {
            tokio_handle,
            failed_tasks_tx,
            failed_tasks_rx,
            shutdown_signal: ShutdownSignal::new(),
            pending_tasks_counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn executor(&self) -> TaskExecutor {
        TaskExecutor {
            tokio_handle: self.tokio_handle.clone(),
            failed_tasks_tx: self.failed_tasks_tx.clone(),
            shutdown_signal: self.shutdown_signal.clone(),
            pending_tasks_counter: self.pending_tasks_counter.clone(),
        }
    }

    /// Get shutdown signal trigger
    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_signal.clone()
    }

    /// waits until any task fails, returns `Err(first_error)`
    /// returns `Ok(())` if shutdown message is received instead
    fn wait_for_task_failure(&mut self, shutdown: Shutdown) -> Result<(), TaskError> {
        self.tokio_handle.block_on(async {
            tokio::select! {
                msg = self.failed_tasks_rx.recv() => {
                    match msg {
                        Some(error) => Err(error),
                        None => Ok(())
                    }
                }
                _ = shutdown.wait_for_shutdown() => {
                    Ok(())
                }
            }
        })
    }

    /// Wait for all tasks holding a [`ShutdownGuard`] to complete, returning
    /// true.  Returns false if they have not completed by `timeout`.
    fn wait_for_graceful_shutdown(self, timeout: Option<Duration>) -> bool {
        let counter = self.pending_tasks_counter.clone();
        let wait = async move {
            while counter.load(Ordering::SeqCst) > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };

        let done = match timeout {
            Some(t) => self
                .tokio_handle
                .block_on(async { tokio::time::timeout(t, wait).await.is_ok() }),
            None => {
                self.tokio_handle.block_on(wait);
                true
            }
        };

        if done {
            debug!("gracefully shut down");
        } else {
            debug!("graceful shutdown timed out");
        }
        done
    }

    /// Add signal listeners and send shutdown
    pub fn start_signal_listeners(&self) {
        let shutdown_signal = self.shutdown_signal();

        self.tokio_handle.spawn(async move {
            wait_for_term_signal().await;
            warn!("got termination signal, initiating shutdown");
            shutdown_signal.send()
        });
    }

    /// Blocks until a task fails or shutdown is requested, then signals all
    /// tasks and waits for them to exit.
    pub fn monitor(mut self, shutdown_timeout: Option<Duration>) -> Result<(), TaskError> {
        let res = self.wait_for_task_failure(self.shutdown_signal.subscribe());

        self.shutdown_signal.send();
        let shutdown_in_time = self.wait_for_graceful_shutdown(shutdown_timeout);

        if !shutdown_in_time {
            info!("shutdown timeout expired; forced shutdown");
        }

        res
    }
}

#[cfg(unix)]
async fn wait_for_term_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(err = %e, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_term_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// A type that can spawn new tasks
#[derive(Debug, Clone)]
pub struct TaskExecutor {
    /// Handle to the tokio runtime.
    tokio_handle: Handle,
    /// Sender half for reporting failures from tasks
    failed_tasks_tx: mpsc::UnboundedSender<TaskError>,
    /// send shutdown signals to tasks
    shutdown_signal: ShutdownSignal,
    /// number of pending tasks
    pending_tasks_counter: Arc<AtomicUsize>,
}

impl TaskExecutor {
    /// Spawns a task that is cancelled outright when shutdown is signalled.
    pub fn spawn_critical_async(
        &self,
        name: &'static str,
        fut: impl Future<Output = anyhow::Result<()>> + Send + 'static,
    ) -> tokio::task::JoinHandle<()> {
        let shutdown = self.shutdown_signal.subscribe();
        let task = self.wrap_critical(name, fut);

        self.tokio_handle.spawn(async move {
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => {}
                _ = task => {}
            }
        })
    }

    /// Spawns a task that gets a [`ShutdownGuard`] and is expected to exit on
    /// its own once shutdown is signalled.
    pub fn spawn_critical_async_with_shutdown<F>(
        &self,
        name: &'static str,
        async_func: impl FnOnce(ShutdownGuard) -> F,
    ) -> tokio::task::JoinHandle<()>
    where
        F: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let shutdown = ShutdownGuard::new(
            self.shutdown_signal.subscribe(),
            self.pending_tasks_counter.clone(),
        );
        let fut = async_func(shutdown);
        self.tokio_handle.spawn(self.wrap_critical(name, fut))
    }

    /// Catches panics and errors from a critical task and reports them to the
    /// manager.
    fn wrap_critical(
        &self,
        name: &'static str,
        fut: impl Future<Output = anyhow::Result<()>> + Send + 'static,
    ) -> impl Future<Output = ()> + Send + 'static {
        let failed_tasks_tx = self.failed_tasks_tx.clone();
        async move {
            let err = match panic::AssertUnwindSafe(fut).catch_unwind().await {
                Ok(Ok(())) => {
                    debug!(task = %name, "critical task exited");
                    return;
                }
                Ok(Err(e)) => TaskError::Failed(name.to_string(), format!("{e:?}")),
                Err(payload) => TaskError::from_panic(name, payload),
            };

            error!("{err}");
            let _ = failed_tasks_tx.send(err);
        }
    }

    pub fn shutdown_signal(&self) -> ShutdownSignal {
        self.shutdown_signal.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_async_panic() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = TaskManager::new(runtime.handle().clone());
        let executor = manager.executor();

        // dont want to print stack trace for expected error while running test
        let original_hook = panic::take_hook();
        panic::set_hook(Box::new(|_| {}));

        executor.spawn_critical_async("panictask", async {
            panic!("intentional panic");
        });

        let err = manager
            .monitor(Some(Duration::from_secs(5)))
            .expect_err("should give error");

        panic::set_hook(original_hook);

        assert_eq!(err.task_name(), "panictask");
        assert!(matches!(err, TaskError::Panicked(_, Some(ref r)) if r == "intentional panic"));
    }

    #[test]
    fn test_critical_async_error() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = TaskManager::new(runtime.handle().clone());
        let executor = manager.executor();

        executor.spawn_critical_async_with_shutdown("failtask", |_shutdown| async {
            anyhow::bail!("rpc is gone")
        });

        let err = manager
            .monitor(Some(Duration::from_secs(5)))
            .expect_err("should give error");

        assert_eq!(err.task_name(), "failtask");
        assert!(err.to_string().contains("rpc is gone"));
    }

    #[test]
    fn test_shutdown() {
        let runtime = tokio::runtime::Runtime::new().unwrap();
        let manager = TaskManager::new(runtime.handle().clone());
        let executor = manager.executor();

        executor.spawn_critical_async("async-task", async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        });

        executor.spawn_critical_async_with_shutdown("async-task-2", |shutdown| async move {
            shutdown.wait_for_shutdown().await;
            Ok(())
        });

        let shutdown_sig = manager.shutdown_signal();

        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            shutdown_sig.send();
        });

        let res = manager.monitor(Some(Duration::from_secs(5)));

        assert!(res.is_ok(), "should exit successfully");
    }
}
