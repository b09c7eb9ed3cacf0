use std::sync::{Arc, OnceLock};

use tokio::{signal, sync::broadcast};

/// Why the server is stopping
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// SIGINT or SIGTERM
    Signal,
    /// Requested from code, e.g. by an embedding application or a test
    Requested,
    /// The shutdown channel closed before any reason was sent
    Closed,
}

/// Fans a single shutdown decision out to every task that subscribes.
#[derive(Clone)]
pub struct GracefulShutdown {
    shutdown_tx: broadcast::Sender<ShutdownReason>,
    reason: Arc<OnceLock<ShutdownReason>>,
}

impl GracefulShutdown {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(4);
        Self {
            shutdown_tx,
            reason: Arc::new(OnceLock::new()),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownReason> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutdown_initiated(&self) -> bool {
        self.reason.get().is_some()
    }

    /// Start shutdown; only the first call has any effect.
    pub fn trigger(&self, reason: ShutdownReason) {
        if self.reason.set(reason).is_ok() {
            tracing::info!("Shutdown initiated: {:?}", reason);
            // No subscribers just means nothing is waiting yet.
            let _ = self.shutdown_tx.send(reason);
        } else {
            tracing::debug!("Shutdown already initiated, ignoring {:?}", reason);
        }
    }

    /// Wait for SIGINT or SIGTERM and trigger shutdown.
    pub async fn run_signal_handler(&self) {
        tokio::select! {
            result = signal::ctrl_c() => {
                if let Err(e) = result {
                    tracing::error!("Failed to listen for Ctrl+C: {}", e);
                    return;
                }
                tracing::info!("Received SIGINT, shutting down");
            }
            _ = wait_for_sigterm() => {
                tracing::info!("Received SIGTERM, shutting down");
            }
        }
        self.trigger(ShutdownReason::Signal);
    }

    /// Resolve once shutdown has been triggered.
    pub async fn wait(&self) -> ShutdownReason {
        let mut receiver = self.subscribe();
        if let Some(reason) = self.reason.get() {
            return *reason;
        }
        receiver.recv().await.unwrap_or(ShutdownReason::Closed)
    }
}

impl Default for GracefulShutdown {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_sigterm() {
    use tokio::signal::unix::{SignalKind, signal};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("Failed to register SIGTERM handler: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_sigterm() {
    std::future::pending::<()>().await;
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn test_trigger_wakes_waiters() {
        let shutdown = GracefulShutdown::new();
        let waiter = tokio::spawn({
            let shutdown = shutdown.clone();
            async move { shutdown.wait().await }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        shutdown.trigger(ShutdownReason::Requested);
        assert!(shutdown.is_shutdown_initiated());
        assert_eq!(waiter.await.unwrap(), ShutdownReason::Requested);
    }

    #[tokio::test]
    async fn test_only_first_trigger_is_sent() {
        let shutdown = GracefulShutdown::new();
        let mut receiver = shutdown.subscribe();

        shutdown.trigger(ShutdownReason::Signal);
        shutdown.trigger(ShutdownReason::Requested);

        assert_eq!(receiver.try_recv().unwrap(), ShutdownReason::Signal);
        assert!(receiver.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_late_waiter_sees_original_reason() {
        let shutdown = GracefulShutdown::new();
        shutdown.trigger(ShutdownReason::Signal);
        shutdown.trigger(ShutdownReason::Requested);

        let reason = tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Signal);
    }

    #[tokio::test]
    async fn test_wait_after_trigger_returns_immediately() {
        let shutdown = GracefulShutdown::new();
        shutdown.trigger(ShutdownReason::Requested);
        let reason = tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .unwrap();
        assert_eq!(reason, ShutdownReason::Requested);
    }
}
