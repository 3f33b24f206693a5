//! Graceful shutdown coordination via `CancellationToken`.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Default time given to background tasks after cancellation.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Owns the process-wide cancellation token for the session and the
/// ingestion service.
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Get a clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token on Ctrl-C or SIGTERM.
    pub fn listen_for_signals(&self) -> JoinHandle<()> {
        let token = self.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                signal = wait_for_signal() => {
                    info!(signal, "received signal, shutting down");
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        })
    }

    /// Cancel, then wait up to `timeout` for `handles` to finish.
    pub async fn graceful_shutdown(&self, handles: Vec<JoinHandle<()>>, timeout: Option<Duration>) {
        let timeout = timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT);

        self.shutdown();
        info!(
            task_count = handles.len(),
            timeout_secs = timeout.as_secs(),
            "waiting for tasks to complete"
        );

        let drain = futures::future::join_all(handles);
        if tokio::time::timeout(timeout, drain).await.is_err() {
            warn!("shutdown timed out after {timeout:?}, some tasks may still be running");
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(unix)]
async fn wait_for_signal() -> &'static str {
    use tokio::signal::unix::{SignalKind, signal};

    let Ok(mut term) = signal(SignalKind::terminate()) else {
        warn!("SIGTERM handler unavailable, listening for ctrl-c only");
        let _ = tokio::signal::ctrl_c().await;
        return "SIGINT";
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT",
        _ = term.recv() => "SIGTERM",
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() -> &'static str {
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_state_not_shutting_down() {
        let coord = ShutdownCoordinator::new();
        assert!(!coord.is_shutting_down());
    }

    #[test]
    fn shutdown_cancels_every_token() {
        let coord = ShutdownCoordinator::default();
        let session = coord.token();
        let ingest = coord.token();
        coord.shutdown();
        coord.shutdown();
        assert!(coord.is_shutting_down());
        assert!(session.is_cancelled());
        assert!(ingest.is_cancelled());
    }

    #[tokio::test]
    async fn signal_listener_exits_on_shutdown() {
        let coord = ShutdownCoordinator::new();
        let listener = coord.listen_for_signals();
        coord.shutdown();
        tokio::time::timeout(Duration::from_secs(1), listener)
            .await
            .expect("listener did not exit")
            .unwrap();
    }

    #[tokio::test]
    async fn graceful_shutdown_awaits_all_tasks() {
        let coord = ShutdownCoordinator::new();
        let token = coord.token();
        let handle = tokio::spawn(async move {
            token.cancelled().await;
        });

        coord.graceful_shutdown(vec![handle], None).await;
        assert!(coord.is_shutting_down());
    }

    #[tokio::test(start_paused = true)]
    async fn graceful_shutdown_times_out() {
        let coord = ShutdownCoordinator::new();
        let handle = tokio::spawn(async {
            tokio::time::sleep(Duration::from_secs(300)).await;
        });

        coord
            .graceful_shutdown(vec![handle], Some(Duration::from_millis(100)))
            .await;
        assert!(coord.is_shutting_down());
    }
}
