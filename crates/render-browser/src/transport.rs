//! Seams between the session and the browser.
//!
//! [`BrowserLauncher`] starts a browser and hands back a [`PageTarget`];
//! the CDP implementation lives in [`crate::cdp`]. Tests drive the session
//! through the scripted doubles in [`crate::testing`].

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::chrome::LaunchOptions;
use crate::error::BrowserError;
use crate::types::{DeviceMetrics, ExecutionContext, ScreencastOptions};

/// Debug-log hook the transport calls for every protocol message.
///
/// Same shape as a printf-style logger: a format string plus its
/// interpolation arguments. Each argument may hold one JSON envelope.
pub type DebugCallback = Arc<dyn Fn(&str, &[String]) + Send + Sync>;

/// One controllable page.
#[async_trait]
pub trait PageTarget: Send + Sync {
    /// Override viewport size, scale factor and mobile emulation.
    async fn set_device_metrics(&self, metrics: &DeviceMetrics) -> Result<(), BrowserError>;

    /// Navigate the page to `url`.
    async fn navigate(&self, url: &str) -> Result<(), BrowserError>;

    /// Resolve the handle scripts are evaluated against.
    async fn capture_execution_context(&self) -> Result<ExecutionContext, BrowserError>;

    /// Ask the browser to start sending screencast frames.
    async fn start_screencast(&self, options: &ScreencastOptions) -> Result<(), BrowserError>;

    /// Evaluate `script` in `context`, returning its value.
    async fn evaluate(
        &self,
        context: &ExecutionContext,
        script: &str,
    ) -> Result<Value, BrowserError>;

    /// Acknowledge a screencast frame so the browser keeps sending.
    async fn ack_screencast_frame(&self, session_id: i64) -> Result<(), BrowserError>;

    /// Block until the transport's run loop ends.
    ///
    /// `Ok` when the browser went away cleanly, `Err(Transport)` when the
    /// connection failed.
    async fn wait(&self) -> Result<(), BrowserError>;

    /// Tear the browser down. Idempotent.
    async fn close(&self);
}

/// Starts browsers.
#[async_trait]
pub trait BrowserLauncher: Send + Sync {
    /// Launch a browser with `options`, routing every protocol message
    /// through `on_debug`.
    async fn launch(
        &self,
        options: &LaunchOptions,
        on_debug: DebugCallback,
    ) -> Result<Arc<dyn PageTarget>, BrowserError>;
}
