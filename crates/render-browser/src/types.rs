//! Session and screencast types.

use bytes::Bytes;
use serde::Deserialize;

/// Identity of one render session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSpec {
    /// Task name, used for logging and to partition persisted frames.
    pub task_name: String,
    /// Page to render.
    pub url: String,
    /// Viewport width in CSS pixels.
    pub width: u32,
    /// Viewport height in CSS pixels.
    pub height: u32,
}

impl SessionSpec {
    /// One-line summary used in log messages.
    pub fn description(&self) -> String {
        format!(
            "taskName = {}, url = {}, width = {}, height = {}",
            self.task_name, self.url, self.width, self.height
        )
    }
}

/// One captured screencast image.
///
/// Bytes and timestamp always travel together; readers never observe the
/// bytes of one frame paired with the timestamp of another.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    data: Bytes,
    timestamp_ns: u64,
}

impl Frame {
    /// Build a frame from decoded bytes and its capture time.
    pub fn new(data: impl Into<Bytes>, timestamp_ns: u64) -> Self {
        Self {
            data: data.into(),
            timestamp_ns,
        }
    }

    /// Decoded image bytes. Empty when the payload failed to decode.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Shared handle to the image bytes.
    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    /// Capture time in nanoseconds since the Unix epoch.
    pub fn timestamp_ns(&self) -> u64 {
        self.timestamp_ns
    }

    /// Whether the frame carries no image bytes.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Handle to the page's script execution context.
///
/// Identifies the page's main frame. Evaluation targets that frame's
/// current main world, so the handle survives reloads.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ExecutionContext {
    frame_id: String,
}

impl ExecutionContext {
    /// Context for the given main-frame id.
    pub fn new(frame_id: impl Into<String>) -> Self {
        Self {
            frame_id: frame_id.into(),
        }
    }

    /// The main frame this context belongs to.
    pub fn frame_id(&self) -> &str {
        &self.frame_id
    }
}

/// Device metrics override sent before navigation.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceMetrics {
    /// Viewport width.
    pub width: u32,
    /// Viewport height.
    pub height: u32,
    /// Device scale factor.
    pub device_scale_factor: f64,
    /// Mobile emulation.
    pub mobile: bool,
}

impl DeviceMetrics {
    /// Desktop metrics at scale 1.0.
    pub fn desktop(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            device_scale_factor: 1.0,
            mobile: false,
        }
    }
}

/// Screencast configuration options.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScreencastOptions {
    /// JPEG quality (0-100).
    pub quality: u32,
    /// Image format.
    pub format: ScreencastFormat,
    /// Maximum capture width.
    pub max_width: u32,
    /// Maximum capture height.
    pub max_height: u32,
    /// Capture every Nth frame (1 = every frame).
    pub every_nth_frame: u32,
}

impl Default for ScreencastOptions {
    fn default() -> Self {
        Self {
            quality: 70,
            format: ScreencastFormat::Jpeg,
            max_width: 1280,
            max_height: 720,
            every_nth_frame: 1,
        }
    }
}

/// Screencast image format.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreencastFormat {
    /// JPEG format.
    Jpeg,
    /// PNG format.
    Png,
}

impl ScreencastFormat {
    /// CDP protocol string.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
        }
    }

    /// File extension for persisted frames.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
        }
    }
}

/// Parameters of a `Page.screencastFrame` event.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreencastFrameEvent {
    /// Base64-encoded image.
    pub data: String,
    /// Frame number to acknowledge.
    pub session_id: i64,
    /// Viewport metadata.
    #[serde(default)]
    pub metadata: Option<FrameMetadata>,
}

/// Viewport metadata for a screencast frame.
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FrameMetadata {
    /// Top offset of the page content.
    pub offset_top: f64,
    /// Page scale factor.
    pub page_scale_factor: f64,
    /// Viewport width in device pixels.
    pub device_width: f64,
    /// Viewport height in device pixels.
    pub device_height: f64,
    /// Horizontal scroll offset.
    pub scroll_offset_x: f64,
    /// Vertical scroll offset.
    pub scroll_offset_y: f64,
    /// Capture time in seconds, when the browser reports it.
    pub timestamp: Option<f64>,
}

/// Session lifecycle. Ordered: a session only moves forward.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Lifecycle {
    /// Constructed, `start` not yet called.
    Init,
    /// Browser launching, navigation sequence in flight.
    Starting,
    /// Context captured and screencast requested.
    Running,
    /// Terminal.
    Done,
}

/// Why a session reached [`Lifecycle::Done`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DoneReason {
    /// The parent cancellation scope closed.
    Cancelled,
    /// The browser run loop ended on its own.
    RunLoopEnded,
    /// Start-up or the run loop failed.
    Failed,
}
