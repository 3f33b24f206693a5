//! Routes protocol envelopes to their handlers.
//!
//! Handlers run synchronously on the transport's delivery path; only the
//! injection retry chain and the frame writer run elsewhere.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::debug;

use crate::capture::{CaptureOutcome, FrameCapture};
use crate::console::ConsoleRelay;
use crate::envelope::{EventKind, ProtocolEnvelope, parse_debug_line};
use crate::inject::{InjectionOutcome, Injector};
use crate::transport::DebugCallback;

/// What the dispatcher did with one envelope.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// An injection retry chain was started.
    Injection(JoinHandle<InjectionOutcome>),
    /// The frame pipeline ran.
    Frame(CaptureOutcome),
    /// The console relay ran; `None` when the event did not decode.
    Console(Option<usize>),
    /// Unrecognized method, logged at debug.
    Ignored,
}

/// The per-session event dispatcher.
pub struct EventDispatcher {
    capture: FrameCapture,
    injector: Injector,
    console: ConsoleRelay,
}

impl EventDispatcher {
    /// Dispatcher wiring the three handlers.
    pub fn new(capture: FrameCapture, injector: Injector, console: ConsoleRelay) -> Self {
        Self {
            capture,
            injector,
            console,
        }
    }

    /// Route one envelope.
    pub fn dispatch(&self, envelope: &ProtocolEnvelope) -> DispatchOutcome {
        match envelope.kind() {
            EventKind::LoadEventFired => {
                DispatchOutcome::Injection(self.injector.on_load_event_fired())
            }
            EventKind::ScreencastFrame => {
                DispatchOutcome::Frame(self.capture.on_screencast_frame(envelope.params_json()))
            }
            EventKind::ConsoleApiCalled => {
                DispatchOutcome::Console(self.console.on_console_api_called(envelope.params_json()))
            }
            EventKind::Other => {
                debug!(method = %envelope.method, "method: {}", envelope.method);
                DispatchOutcome::Ignored
            }
        }
    }

    /// Parse one transport debug line and dispatch every envelope in it.
    pub fn handle_debug_line(&self, format: &str, args: &[String]) -> Vec<DispatchOutcome> {
        parse_debug_line(format, args)
            .iter()
            .map(|envelope| self.dispatch(envelope))
            .collect()
    }

    /// Wrap the dispatcher as the transport's debug hook.
    pub fn into_callback(self: Arc<Self>) -> DebugCallback {
        Arc::new(move |format: &str, args: &[String]| {
            let _ = self.handle_debug_line(format, args);
        })
    }
}
