//! The render session controller.
//!
//! Owns one session's identity and state, launches the browser, wires the
//! dispatcher into the transport's debug hook, issues the start-up command
//! sequence and then waits for the run loop.
//!
//! Lifecycle: `Init -> Starting` when [`RenderSession::start`] is called,
//! `Starting -> Running` once the context is captured, and a single
//! terminal transition to `Done`. A watcher task records cancellation of
//! the parent token as soon as it happens, which stops frame capture.
//! `Done` is entered by `start` only after the page is closed and the frame
//! writer has drained, so [`RenderSession::finished`] resolving means every
//! queued frame is on disk.

use std::sync::Arc;

use render_settings::RenderSettings;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::capture::FrameCapture;
use crate::chrome::LaunchOptions;
use crate::clock::{Clock, SystemClock};
use crate::console::ConsoleRelay;
use crate::dispatch::EventDispatcher;
use crate::error::BrowserError;
use crate::inject::{Injector, RetryPolicy};
use crate::script::injection_script;
use crate::state::SessionState;
use crate::transport::{BrowserLauncher, PageTarget};
use crate::types::{
    DeviceMetrics, DoneReason, Frame, Lifecycle, ScreencastFormat, ScreencastOptions, SessionSpec,
};
use crate::writer::FrameWriter;

/// One browser rendering run.
pub struct RenderSession {
    spec: SessionSpec,
    settings: RenderSettings,
    launcher: Arc<dyn BrowserLauncher>,
    clock: Arc<dyn Clock>,
    state: Arc<SessionState>,
    frames: broadcast::Sender<Frame>,
}

impl RenderSession {
    /// New session in [`Lifecycle::Init`]. Nothing runs until `start`.
    pub fn new(
        spec: SessionSpec,
        settings: RenderSettings,
        launcher: Arc<dyn BrowserLauncher>,
    ) -> Self {
        Self::with_clock(spec, settings, launcher, Arc::new(SystemClock))
    }

    /// Like [`new`](Self::new) with an explicit frame clock.
    pub fn with_clock(
        spec: SessionSpec,
        settings: RenderSettings,
        launcher: Arc<dyn BrowserLauncher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let capacity = usize::try_from(settings.frame_rate).unwrap_or(1).max(1);
        let (frames, _) = broadcast::channel(capacity);
        Self {
            spec,
            settings,
            launcher,
            clock,
            state: Arc::new(SessionState::new()),
            frames,
        }
    }

    /// Session identity.
    pub fn spec(&self) -> &SessionSpec {
        &self.spec
    }

    /// One-line summary for logs.
    pub fn description(&self) -> String {
        self.spec.description()
    }

    /// Shared session state.
    pub fn state(&self) -> &Arc<SessionState> {
        &self.state
    }

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle()
    }

    /// Whether the session finished.
    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    /// The most recent frame.
    pub fn last_frame(&self) -> Option<Frame> {
        self.state.last_frame()
    }

    /// Receive captured frames.
    ///
    /// Holds up to `frameRate` frames; a receiver that falls further
    /// behind loses the oldest ones and sees `RecvError::Lagged`.
    pub fn subscribe_frames(&self) -> broadcast::Receiver<Frame> {
        self.frames.subscribe()
    }

    /// Wait until the session is done and report why.
    ///
    /// Resolves only after `start` closed the page and the frame writer
    /// flushed everything it was given.
    pub async fn finished(&self) -> Option<DoneReason> {
        self.state.wait_done().await
    }

    /// Run the session until the browser run loop ends or `parent` is
    /// cancelled.
    ///
    /// Returns `Err` when launch, the start-up command sequence or the run
    /// loop fails. Cancellation is a normal exit.
    pub async fn start(&self, parent: &CancellationToken) -> Result<(), BrowserError> {
        if !self.state.begin_starting() {
            return Err(BrowserError::AlreadyStarted {
                task_name: self.spec.task_name.clone(),
            });
        }
        info!(task = %self.spec.task_name, "new chrome browser. {}", self.description());

        self.spawn_cancel_watcher(parent);

        let session_token = parent.child_token();
        // not tied to the parent: the writer drains only after the page is closed
        let writer_token = CancellationToken::new();
        let (writer_sink, writer_handle) = match self.settings.frame_dir() {
            Some(dir) => {
                let (sink, handle) = FrameWriter::spawn(
                    dir,
                    &self.spec.task_name,
                    self.settings.capture.writer_queue,
                    writer_token.clone(),
                );
                (Some(sink), Some(handle))
            }
            None => (None, None),
        };

        let mut capture = FrameCapture::new(
            self.spec.task_name.clone(),
            Arc::clone(&self.state),
            Arc::clone(&self.clock),
            self.frames.clone(),
        )
        .with_ack(self.settings.capture.ack_frames);
        if let Some(sink) = writer_sink {
            capture = capture.with_writer(sink);
        }
        let injector = Injector::new(
            &self.spec.task_name,
            Arc::clone(&self.state),
            injection_script(self.settings.inject_noise),
            RetryPolicy::from(&self.settings.injection),
            session_token.clone(),
        );
        let console = ConsoleRelay::new(self.spec.task_name.clone());
        let dispatcher = Arc::new(EventDispatcher::new(capture, injector, console));

        let result = self.run(dispatcher, parent).await;

        self.state.close_frames();
        session_token.cancel();
        writer_token.cancel();
        if let Some(handle) = writer_handle {
            match handle.await {
                Ok(report) => info!(
                    task = %self.spec.task_name,
                    written = report.written,
                    dropped = report.dropped,
                    failed = report.failed,
                    "frame writer finished"
                ),
                Err(e) => warn!(task = %self.spec.task_name, error = %e, "frame writer task failed"),
            }
        }

        let reason = match &result {
            Ok(()) if parent.is_cancelled() => {
                mark_cancelled(&self.state, &self.spec.task_name);
                DoneReason::Cancelled
            }
            Ok(()) => DoneReason::RunLoopEnded,
            Err(e) => {
                error!(task = %self.spec.task_name, error = %e, "chrome run tasks error");
                DoneReason::Failed
            }
        };
        let _ = self.state.mark_done(reason);
        result
    }

    fn spawn_cancel_watcher(&self, parent: &CancellationToken) {
        let parent = parent.clone();
        let state = Arc::clone(&self.state);
        let task = self.spec.task_name.clone();
        let _ = tokio::spawn(async move {
            tokio::select! {
                () = parent.cancelled() => mark_cancelled(&state, &task),
                _ = state.wait_done() => {}
            }
        });
    }

    async fn run(
        &self,
        dispatcher: Arc<EventDispatcher>,
        parent: &CancellationToken,
    ) -> Result<(), BrowserError> {
        let options = LaunchOptions::from_settings(
            &self.settings.browser,
            self.spec.width,
            self.spec.height,
        );
        let page = self.launcher.launch(&options, dispatcher.into_callback()).await?;
        let _ = self.state.attach_page(Arc::clone(&page));

        let outcome = tokio::select! {
            result = self.drive(page.as_ref()) => result,
            () = parent.cancelled() => Ok(()),
        };
        page.close().await;
        outcome
    }

    async fn drive(&self, page: &dyn PageTarget) -> Result<(), BrowserError> {
        page.set_device_metrics(&DeviceMetrics::desktop(self.spec.width, self.spec.height))
            .await?;
        page.navigate(&self.spec.url).await?;
        let context = page.capture_execution_context().await?;
        let _ = self.state.set_execution_context(context);
        if self.state.mark_running() {
            info!(task = %self.spec.task_name, url = %self.spec.url, "session running");
        }

        page.start_screencast(&ScreencastOptions {
            quality: self.settings.jpeg_quality,
            format: ScreencastFormat::Jpeg,
            max_width: self.spec.width,
            max_height: self.spec.height,
            every_nth_frame: 1,
        })
        .await?;

        page.wait().await
    }
}

fn mark_cancelled(state: &SessionState, task: &str) {
    if state.mark_cancelled() {
        info!(task = %task, "task will done");
    }
}
