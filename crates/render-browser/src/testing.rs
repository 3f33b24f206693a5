//! Scripted browser doubles.
//!
//! [`ScriptedLauncher`] hands out a [`ScriptedPage`] that records every
//! command, answers with canned results, and lets a test push protocol
//! messages through the session's debug hook as if the browser sent them.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{Value, json};
use tokio::sync::oneshot;

use crate::chrome::LaunchOptions;
use crate::error::BrowserError;
use crate::transport::{BrowserLauncher, DebugCallback, PageTarget};
use crate::types::{DeviceMetrics, ExecutionContext, ScreencastOptions};

/// Main-frame id reported by [`ScriptedPage`].
pub const SCRIPTED_FRAME_ID: &str = "scripted-main-frame";

/// A command the page received.
#[derive(Clone, Debug, PartialEq)]
pub enum PageCall {
    /// `set_device_metrics`
    SetDeviceMetrics(DeviceMetrics),
    /// `navigate`
    Navigate(String),
    /// `capture_execution_context`
    CaptureExecutionContext,
    /// `start_screencast`
    StartScreencast(ScreencastOptions),
    /// `evaluate`, with the context's frame id
    Evaluate(String),
    /// `ack_screencast_frame`
    AckScreencastFrame(i64),
    /// `close`
    Close,
}

/// In-memory page.
pub struct ScriptedPage {
    calls: Mutex<Vec<PageCall>>,
    scripts: Mutex<Vec<String>>,
    on_debug: Mutex<Option<DebugCallback>>,
    navigation_error: Mutex<Option<String>>,
    fail_evaluations: AtomicBool,
    finish_tx: Mutex<Option<oneshot::Sender<Result<(), BrowserError>>>>,
    finish_rx: Mutex<Option<oneshot::Receiver<Result<(), BrowserError>>>>,
}

impl ScriptedPage {
    /// A page whose run loop lasts until [`finish`](Self::finish) or
    /// [`close`](PageTarget::close).
    pub fn new() -> Arc<Self> {
        let (tx, rx) = oneshot::channel();
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            scripts: Mutex::new(Vec::new()),
            on_debug: Mutex::new(None),
            navigation_error: Mutex::new(None),
            fail_evaluations: AtomicBool::new(false),
            finish_tx: Mutex::new(Some(tx)),
            finish_rx: Mutex::new(Some(rx)),
        })
    }

    /// Every command received so far, in order.
    pub fn calls(&self) -> Vec<PageCall> {
        self.calls.lock().clone()
    }

    /// Number of script evaluations attempted.
    pub fn evaluations(&self) -> usize {
        self.scripts.lock().len()
    }

    /// Scripts passed to `evaluate`.
    pub fn evaluated_scripts(&self) -> Vec<String> {
        self.scripts.lock().clone()
    }

    /// Make `evaluate` fail from now on.
    pub fn fail_evaluations(&self, fail: bool) {
        self.fail_evaluations.store(fail, Ordering::Release);
    }

    /// Make `navigate` fail with `reason`.
    pub fn fail_navigation(&self, reason: &str) {
        *self.navigation_error.lock() = Some(reason.to_string());
    }

    /// Register the hook protocol messages are reported through.
    pub fn set_debug_callback(&self, on_debug: DebugCallback) {
        *self.on_debug.lock() = Some(on_debug);
    }

    /// Deliver one inbound protocol message. Returns `false` when no hook
    /// is registered yet.
    pub fn emit(&self, message: &str) -> bool {
        let Some(on_debug) = self.on_debug.lock().clone() else {
            return false;
        };
        on_debug("<- %s", &[message.to_string()]);
        true
    }

    /// Deliver a `Page.loadEventFired` event.
    pub fn emit_load_event(&self) -> bool {
        self.emit(&json!({"method": "Page.loadEventFired", "params": {"timestamp": 1.0}}).to_string())
    }

    /// Deliver a `Page.screencastFrame` event carrying `data`.
    pub fn emit_frame(&self, data: &str, session_id: i64) -> bool {
        self.emit(
            &json!({
                "method": "Page.screencastFrame",
                "params": {"data": data, "sessionId": session_id},
            })
            .to_string(),
        )
    }

    /// End the run loop with `result`.
    pub fn finish(&self, result: Result<(), BrowserError>) {
        if let Some(tx) = self.finish_tx.lock().take() {
            let _ = tx.send(result);
        }
    }

    fn record(&self, call: PageCall) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl PageTarget for ScriptedPage {
    async fn set_device_metrics(&self, metrics: &DeviceMetrics) -> Result<(), BrowserError> {
        self.record(PageCall::SetDeviceMetrics(metrics.clone()));
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), BrowserError> {
        self.record(PageCall::Navigate(url.to_string()));
        match self.navigation_error.lock().clone() {
            Some(reason) => Err(BrowserError::NavigationFailed {
                url: url.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn capture_execution_context(&self) -> Result<ExecutionContext, BrowserError> {
        self.record(PageCall::CaptureExecutionContext);
        Ok(ExecutionContext::new(SCRIPTED_FRAME_ID))
    }

    async fn start_screencast(&self, options: &ScreencastOptions) -> Result<(), BrowserError> {
        self.record(PageCall::StartScreencast(options.clone()));
        Ok(())
    }

    async fn evaluate(
        &self,
        context: &ExecutionContext,
        script: &str,
    ) -> Result<Value, BrowserError> {
        self.record(PageCall::Evaluate(context.frame_id().to_string()));
        self.scripts.lock().push(script.to_string());
        if self.fail_evaluations.load(Ordering::Acquire) {
            return Err(BrowserError::Evaluation {
                reason: "scripted failure".into(),
            });
        }
        Ok(json!(0))
    }

    async fn ack_screencast_frame(&self, session_id: i64) -> Result<(), BrowserError> {
        self.record(PageCall::AckScreencastFrame(session_id));
        Ok(())
    }

    async fn wait(&self) -> Result<(), BrowserError> {
        let Some(rx) = self.finish_rx.lock().take() else {
            return Ok(());
        };
        // a dropped sender means the page was closed
        rx.await.unwrap_or(Ok(()))
    }

    async fn close(&self) {
        self.record(PageCall::Close);
        let _ = self.finish_tx.lock().take();
    }
}

/// Launcher returning one shared [`ScriptedPage`].
pub struct ScriptedLauncher {
    page: Arc<ScriptedPage>,
    launch_error: Mutex<Option<String>>,
    launched: Mutex<Vec<LaunchOptions>>,
}

impl ScriptedLauncher {
    /// Launcher handing out `page`.
    pub fn new(page: Arc<ScriptedPage>) -> Arc<Self> {
        Arc::new(Self {
            page,
            launch_error: Mutex::new(None),
            launched: Mutex::new(Vec::new()),
        })
    }

    /// Make the next launch fail.
    pub fn fail_launch(&self, context: &str) {
        *self.launch_error.lock() = Some(context.to_string());
    }

    /// Options of every launch attempt.
    pub fn launches(&self) -> Vec<LaunchOptions> {
        self.launched.lock().clone()
    }
}

#[async_trait]
impl BrowserLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        options: &LaunchOptions,
        on_debug: DebugCallback,
    ) -> Result<Arc<dyn PageTarget>, BrowserError> {
        self.launched.lock().push(options.clone());
        if let Some(context) = self.launch_error.lock().take() {
            return Err(BrowserError::LaunchFailed { context });
        }
        self.page.set_debug_callback(on_debug);
        Ok(self.page.clone())
    }
}
