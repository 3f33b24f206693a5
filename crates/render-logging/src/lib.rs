//! # render-logging
//!
//! Structured logging for the render agent, built on `tracing`.
//!
//! - [`init_subscriber`] installs the process-wide stderr subscriber
//! - [`filter_directive`] maps the configured level name to a filter
//! - [`test_utils::capture_logs`] records events in memory for assertions

#![deny(unsafe_code)]

pub mod test_utils;

pub use test_utils::{CapturedEvent, CapturedLogs, capture_logs};

/// Map a configured level name to an `EnvFilter` directive.
///
/// Accepts the level names the agent's config files have always used,
/// including `fatal` and `panic`, which have no `tracing` equivalent and
/// map to `error`. Unknown names fall back to `info`.
pub fn filter_directive(level: &str) -> &'static str {
    match level.trim().to_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "warn" | "warning" => "warn",
        "error" | "fatal" | "panic" => "error",
        _ => "info",
    }
}

/// Initialize the global tracing subscriber with stderr output.
///
/// Call once at application startup. Subsequent calls are no-ops.
/// `RUST_LOG`, when set, takes precedence over `level`.
pub fn init_subscriber(level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directive(level)));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    // try_init fails if a global subscriber is already set
    let _ = subscriber.try_init();
}
