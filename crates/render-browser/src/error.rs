//! Browser-specific error types.

use thiserror::Error;

/// Errors from driving the browser.
///
/// Only [`Transport`](Self::Transport) (and failures on the start-up command
/// sequence) end a session. Frame, console and envelope decode problems are
/// logged where they happen and never become a `BrowserError`.
#[derive(Debug, Error)]
pub enum BrowserError {
    /// Failed to launch the Chrome browser process.
    #[error("failed to launch browser: {context}")]
    LaunchFailed {
        /// What went wrong during launch.
        context: String,
    },

    /// Navigation to a URL failed.
    #[error("navigation failed for {url}: {reason}")]
    NavigationFailed {
        /// The URL that failed to load.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// Script evaluation against a ready execution context failed.
    #[error("script evaluation failed: {reason}")]
    Evaluation {
        /// Exception text or protocol error.
        reason: String,
    },

    /// Chrome executable not found on the system.
    #[error("Chrome not found; install Google Chrome or set CHROME_PATH")]
    ChromeNotFound,

    /// A protocol command got no reply in time.
    #[error("timed out after {timeout_ms}ms: {context}")]
    Timeout {
        /// How long we waited.
        timeout_ms: u64,
        /// What we were waiting for.
        context: String,
    },

    /// The browser answered a command with a protocol error.
    #[error("CDP error: {0}")]
    Cdp(String),

    /// The debugging connection or its run loop failed.
    #[error("transport failed: {0}")]
    Transport(String),

    /// `start` was called on a session that already started.
    #[error("session '{task_name}' already started")]
    AlreadyStarted {
        /// Task name of the session.
        task_name: String,
    },
}

impl BrowserError {
    /// Whether this error ends the session's run loop.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
