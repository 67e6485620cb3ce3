//! Shutdown and stop signalling
//!
//! [`ShutdownSignal`] is used both for process-wide shutdown and for
//! stopping a single background schedule.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Shutdown signal that can be cloned and shared across tasks
#[derive(Clone, Debug)]
pub struct ShutdownSignal {
    sender: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(1);
        Self {
            sender,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        if !self.triggered.swap(true, Ordering::SeqCst) {
            let _ = self.sender.send(());
        }
    }

    pub async fn wait(&self) {
        self.notified().wait().await;
    }

    /// Subscribe now, wait later. Subscribing before checking the flag
    /// means a trigger between the two is never lost.
    pub fn notified(&self) -> ShutdownNotified {
        ShutdownNotified {
            receiver: self.sender.subscribe(),
            triggered: self.triggered.clone(),
        }
    }
}

impl Default for ShutdownSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// A future that resolves when shutdown is triggered
pub struct ShutdownNotified {
    receiver: broadcast::Receiver<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownNotified {
    pub async fn wait(mut self) {
        if self.triggered.load(Ordering::SeqCst) {
            return;
        }
        let _ = self.receiver.recv().await;
    }
}

/// Resolves on SIGTERM or SIGINT.
#[cfg(unix)]
async fn os_shutdown_request() -> std::io::Result<&'static str> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    tokio::select! {
        _ = sigterm.recv() => Ok("SIGTERM"),
        res = tokio::signal::ctrl_c() => res.map(|_| "SIGINT"),
    }
}

#[cfg(not(unix))]
async fn os_shutdown_request() -> std::io::Result<&'static str> {
    tokio::signal::ctrl_c().await.map(|_| "Ctrl+C")
}

/// Owns the process-wide shutdown signal and the cleanup deadline.
pub struct ShutdownCoordinator {
    signal: ShutdownSignal,
    timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(timeout_secs: u64) -> Self {
        Self {
            signal: ShutdownSignal::new(),
            timeout: Duration::from_secs(timeout_secs),
        }
    }

    pub fn signal(&self) -> ShutdownSignal {
        self.signal.clone()
    }

    /// Spawn a task that triggers the signal on the first OS request.
    pub fn spawn_os_listener(&self) {
        let signal = self.signal.clone();
        tokio::spawn(async move {
            match os_shutdown_request().await {
                Ok(name) => {
                    info!(signal = name, "📡 Shutdown requested");
                    signal.trigger();
                }
                Err(e) => error!(error = %e, "Failed to install signal handlers"),
            }
        });
    }

    /// Wait for the signal, then run `cleanup` bounded by the timeout.
    /// Returns `false` when cleanup did not finish in time.
    pub async fn shutdown_with_cleanup<F, Fut>(&self, cleanup: F) -> bool
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = ()>,
    {
        self.signal.wait().await;
        info!(timeout = ?self.timeout, "⏳ Starting graceful shutdown");

        let finished = tokio::time::timeout(self.timeout, cleanup()).await.is_ok();
        if !finished {
            warn!(timeout = ?self.timeout, "⚠️ Graceful shutdown timed out");
        }
        finished
    }
}
