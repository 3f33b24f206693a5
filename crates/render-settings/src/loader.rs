//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`RenderSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge its values over defaults
//! 3. Apply `RENDER_*` environment variable overrides (highest priority)
//! 4. Validate ranges
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::errors::{Result, SettingsError};
use crate::types::RenderSettings;

/// Load settings from an optional file path with env var overrides.
///
/// No path yields defaults plus env overrides. A path that cannot be read,
/// including one that does not exist, is an error, as is invalid JSON.
pub fn load_settings(path: Option<&Path>) -> Result<RenderSettings> {
    let defaults = serde_json::to_value(RenderSettings::default())?;

    let merged = match path {
        Some(path) => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        None => defaults,
    };

    let mut settings: RenderSettings = serde_json::from_value(merged)?;
    apply_env_overrides(&mut settings);
    validate(&settings)?;
    Ok(settings)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply `RENDER_*` environment variable overrides.
pub fn apply_env_overrides(settings: &mut RenderSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides read through `lookup` (env access injected for tests).
///
/// Invalid values are ignored with a warning and leave the file/default
/// value in place.
pub fn apply_overrides_from(
    settings: &mut RenderSettings,
    lookup: impl Fn(&str) -> Option<String>,
) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("RENDER_LOG_LEVEL") {
        settings.log_level = v;
    }
    if let Some(v) = string("RENDER_FRAME_JPG_PATH") {
        settings.frame_jpg_path = v;
    }
    if let Some(v) = string("RENDER_INJECT_NOISE") {
        match parse_bool(&v) {
            Some(b) => settings.inject_noise = b,
            None => tracing::warn!(key = "RENDER_INJECT_NOISE", value = %v, "invalid boolean env var, ignoring"),
        }
    }
    if let Some(v) = string("RENDER_JPEG_QUALITY") {
        match parse_u32_range(&v, 0, 100) {
            Some(n) => settings.jpeg_quality = n,
            None => tracing::warn!(key = "RENDER_JPEG_QUALITY", value = %v, "invalid integer env var, ignoring"),
        }
    }
    if let Some(v) = string("RENDER_FRAME_RATE") {
        match parse_u32_range(&v, 1, 120) {
            Some(n) => settings.frame_rate = n,
            None => tracing::warn!(key = "RENDER_FRAME_RATE", value = %v, "invalid integer env var, ignoring"),
        }
    }
    if let Some(v) = string("RENDER_INGEST_PORT") {
        match v.parse::<u16>() {
            Ok(n) => settings.ingest.port = n,
            Err(_) => tracing::warn!(key = "RENDER_INGEST_PORT", value = %v, "invalid port env var, ignoring"),
        }
    }
}

/// Reject values the session cannot run with.
pub fn validate(settings: &RenderSettings) -> Result<()> {
    if settings.jpeg_quality > 100 {
        return Err(SettingsError::InvalidValue(format!(
            "jpegQuality must be 0-100, got {}",
            settings.jpeg_quality
        )));
    }
    if settings.frame_rate == 0 {
        return Err(SettingsError::InvalidValue("frameRate must be at least 1".into()));
    }
    if settings.capture.writer_queue == 0 {
        return Err(SettingsError::InvalidValue(
            "capture.writerQueue must be at least 1".into(),
        ));
    }
    if settings.injection.max_attempts == 0 {
        return Err(SettingsError::InvalidValue(
            "injection.maxAttempts must be at least 1".into(),
        ));
    }
    if settings.video_width == 0 || settings.video_height == 0 {
        return Err(SettingsError::InvalidValue(format!(
            "viewport must be non-zero, got {}x{}",
            settings.video_width, settings.video_height
        )));
    }
    Ok(())
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a string as a `u32` within a range.
pub fn parse_u32_range(val: &str, min: u32, max: u32) -> Option<u32> {
    let n: u32 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}
