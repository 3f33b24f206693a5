//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` so the JSON file keeps
//! the key names the render agent has always used (`injectNoise`,
//! `frameJpgPath`, ...). Every section implements [`Default`] and is marked
//! `#[serde(default)]`, so a partial file only overrides what it names.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings for the render agent.
///
/// ```json
/// {
///   "logLevel": "debug",
///   "injectNoise": true,
///   "frameJpgPath": "/tmp/cap",
///   "browser": { "display": ":2" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RenderSettings {
    /// Log level name (`trace`, `debug`, `info`, `warn`, `error`, `fatal`).
    pub log_level: String,
    /// Embed the noise audio payload instead of the silent one.
    pub inject_noise: bool,
    /// Base directory for per-frame JPEG files. Empty disables persistence.
    pub frame_jpg_path: String,
    /// Screencast JPEG quality (0-100).
    pub jpeg_quality: u32,
    /// Frames per second the consumer is expected to drain; also the
    /// capacity of the frame delivery channel.
    pub frame_rate: u32,
    /// Default viewport width.
    pub video_width: u32,
    /// Default viewport height.
    pub video_height: u32,
    /// Browser process settings.
    pub browser: BrowserSettings,
    /// Script injection retry settings.
    pub injection: InjectionSettings,
    /// Frame capture settings.
    pub capture: CaptureSettings,
    /// Ingestion service settings.
    pub ingest: IngestSettings,
}

impl Default for RenderSettings {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            inject_noise: false,
            frame_jpg_path: String::new(),
            jpeg_quality: 70,
            frame_rate: 10,
            video_width: 1280,
            video_height: 720,
            browser: BrowserSettings::default(),
            injection: InjectionSettings::default(),
            capture: CaptureSettings::default(),
            ingest: IngestSettings::default(),
        }
    }
}

impl RenderSettings {
    /// Whether captured frames are written to disk.
    ///
    /// Derived from [`frame_jpg_path`](Self::frame_jpg_path): persistence is
    /// on exactly when a base directory is configured.
    pub fn save_frame_jpg(&self) -> bool {
        !self.frame_jpg_path.trim().is_empty()
    }

    /// Base directory for persisted frames, if persistence is enabled.
    pub fn frame_dir(&self) -> Option<PathBuf> {
        self.save_frame_jpg()
            .then(|| PathBuf::from(self.frame_jpg_path.trim()))
    }

    /// Serialize as indented JSON (for `--dump-config`).
    pub fn to_pretty_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|e| {
            tracing::error!(error = %e, "failed to serialize settings");
            String::from("{}")
        })
    }
}

/// Browser process settings.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BrowserSettings {
    /// Explicit browser binary. Falls back to `CHROME_PATH`, then known paths.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chrome_path: Option<String>,
    /// Directory of the companion extension loaded at launch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_path: Option<String>,
    /// Extension ID whitelisted for the companion extension.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub extension_id: Option<String>,
    /// X display exported to the browser process (e.g. `:2`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display: Option<String>,
    /// Run without a window. Off by default: the page is rendered on a
    /// (virtual) display so tab capture and audio work.
    pub headless: bool,
}

/// Script injection retry settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct InjectionSettings {
    /// Fixed delay between attempts while the execution context is missing.
    pub retry_interval_ms: u64,
    /// Attempts before a retry chain gives up.
    pub max_attempts: u32,
}

impl Default for InjectionSettings {
    fn default() -> Self {
        Self {
            retry_interval_ms: 100,
            max_attempts: 600,
        }
    }
}

/// Frame capture settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CaptureSettings {
    /// Acknowledge each screencast frame back to the browser.
    pub ack_frames: bool,
    /// Frames buffered for the disk writer before the oldest are dropped.
    pub writer_queue: usize,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            ack_frames: true,
            writer_queue: 64,
        }
    }
}

/// Ingestion service settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IngestSettings {
    /// Run the ingestion service alongside the session.
    pub enabled: bool,
    /// Bind host.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Directory receiving one file per connection.
    pub output_dir: String,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            host: "127.0.0.1".to_string(),
            port: 8080,
            output_dir: ".".to_string(),
        }
    }
}
