//! # render-settings
//!
//! Configuration for the page render agent.
//!
//! Settings are resolved from three layers (in priority order):
//! 1. **Compiled defaults**: [`RenderSettings::default()`]
//! 2. **Settings file**: JSON passed with `-c`, deep-merged over defaults
//! 3. **Environment variables**: `RENDER_*` overrides (highest priority)
//!
//! The resolved value is handed to the session controller by value; nothing
//! in the workspace reads configuration from global state.

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings};
pub use types::*;
