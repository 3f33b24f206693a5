//! Screencast frame capture.
//!
//! Turns a `Page.screencastFrame` envelope into the session's last frame,
//! then fans the frame out to the consumer channel and the disk writer.

use std::sync::Arc;

use base64::Engine as _;
use bytes::Bytes;
use tokio::sync::broadcast;
use tracing::{debug, error, warn};

use crate::clock::Clock;
use crate::state::SessionState;
use crate::types::{Frame, ScreencastFrameEvent};
use crate::writer::FrameSink;

/// What happened to one screencast envelope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaptureOutcome {
    /// Decoded and recorded.
    Recorded(Frame),
    /// The image payload failed to decode; an empty frame was recorded.
    RecordedEmpty(Frame),
    /// The session already finished; nothing changed.
    SessionDone,
    /// The parameters were not a screencast frame; nothing changed.
    Malformed,
}

/// Frame capture pipeline for one session.
pub struct FrameCapture {
    task_name: String,
    state: Arc<SessionState>,
    clock: Arc<dyn Clock>,
    frames: broadcast::Sender<Frame>,
    writer: Option<FrameSink>,
    ack_frames: bool,
}

impl FrameCapture {
    /// Pipeline recording into `state` and publishing on `frames`.
    pub fn new(
        task_name: impl Into<String>,
        state: Arc<SessionState>,
        clock: Arc<dyn Clock>,
        frames: broadcast::Sender<Frame>,
    ) -> Self {
        Self {
            task_name: task_name.into(),
            state,
            clock,
            frames,
            writer: None,
            ack_frames: false,
        }
    }

    /// Persist every recorded frame through `sink`.
    #[must_use]
    pub fn with_writer(mut self, sink: FrameSink) -> Self {
        self.writer = Some(sink);
        self
    }

    /// Acknowledge frames back to the browser.
    #[must_use]
    pub fn with_ack(mut self, ack_frames: bool) -> Self {
        self.ack_frames = ack_frames;
        self
    }

    /// Handle the parameters of one `Page.screencastFrame` event.
    pub fn on_screencast_frame(&self, params: &str) -> CaptureOutcome {
        if !self.state.accepts_frames() {
            error!(task = %self.task_name, "task is done, discarding screencast frame");
            return CaptureOutcome::SessionDone;
        }

        let event: ScreencastFrameEvent = match serde_json::from_str(params) {
            Ok(event) => event,
            Err(e) => {
                error!(task = %self.task_name, error = %e, "unmarshal screencast frame failed");
                return CaptureOutcome::Malformed;
            }
        };

        let (data, decoded) = match base64::engine::general_purpose::STANDARD.decode(&event.data) {
            Ok(bytes) => (Bytes::from(bytes), true),
            Err(e) => {
                error!(task = %self.task_name, error = %e, "decode screencast frame failed");
                (Bytes::new(), false)
            }
        };

        let frame = self.state.record_frame(data, self.clock.now_ns());
        debug!(
            task = %self.task_name,
            bytes = frame.data().len(),
            timestamp_ns = frame.timestamp_ns(),
            "screencast frame"
        );

        // Err only means nobody is subscribed right now
        let _ = self.frames.send(frame.clone());
        if let Some(writer) = &self.writer {
            let _ = writer.submit(frame.clone());
        }
        if self.ack_frames {
            self.ack(event.session_id);
        }

        if decoded {
            CaptureOutcome::Recorded(frame)
        } else {
            CaptureOutcome::RecordedEmpty(frame)
        }
    }

    fn ack(&self, session_id: i64) {
        let Some(page) = self.state.page() else {
            return;
        };
        let task = self.task_name.clone();
        let _ = tokio::spawn(async move {
            if let Err(e) = page.ack_screencast_frame(session_id).await {
                warn!(task = %task, session_id, error = %e, "screencast frame ack failed");
            }
        });
    }
}
