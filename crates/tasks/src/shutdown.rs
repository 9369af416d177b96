use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};

use tokio::sync::{futures::Notified, Notify};

/// Shared cancellation token.  Cloning it yields another handle to the same
/// signal.
#[derive(Debug, Clone)]
pub struct ShutdownSignal(Arc<AtomicBool>, Arc<Notify>);

impl ShutdownSignal {
    pub(crate) fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)), Arc::new(Notify::new()))
    }

    /// Send shutdown signal
    pub fn send(&self) {
        self.0.fetch_or(true, Ordering::SeqCst);
        self.1.notify_waiters();
    }

    pub(crate) fn subscribe(&self) -> Shutdown {
        Shutdown(self.clone())
    }

    pub fn should_shutdown(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    fn notified(&self) -> Notified<'_> {
        self.1.notified()
    }
}

#[derive(Debug, Clone)]
pub(crate) struct Shutdown(ShutdownSignal);

impl Shutdown {
    pub(crate) fn should_shutdown(&self) -> bool {
        self.0.should_shutdown()
    }

    pub(crate) async fn wait_for_shutdown(&self) {
        loop {
            let notified = self.0.notified();
            tokio::pin!(notified);

            // Register before checking the flag so a concurrent `send` can't
            // slip between the check and the await.
            notified.as_mut().enable();
            if self.should_shutdown() {
                return;
            }

            notified.await;
        }
    }
}

/// Handed to every critical task.  Tracks the number of live tasks so the
/// manager can wait for them on shutdown.
#[derive(Debug)]
pub struct ShutdownGuard(Shutdown, Arc<AtomicUsize>);

impl ShutdownGuard {
    pub(crate) fn new(shutdown: Shutdown, counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(shutdown, counter)
    }

    /// Check if shutdown signal has been sent
    pub fn should_shutdown(&self) -> bool {
        self.0.should_shutdown()
    }

    /// Waits until shutdown signal is sent
    pub async fn wait_for_shutdown(&self) {
        self.0.wait_for_shutdown().await
    }
}

impl Clone for ShutdownGuard {
    fn clone(&self) -> Self {
        Self::new(self.0.clone(), self.1.clone())
    }
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.1.fetch_sub(1, Ordering::SeqCst);
    }
}
