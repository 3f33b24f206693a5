//! # render-ingest
//!
//! WebSocket ingestion endpoint. Each connection to `/` is appended, in
//! arrival order, to its own `<output_dir>/<unix millis>.webm` file.
//!
//! - [`server::IngestServer`] binds, routes and serves until cancelled
//! - [`error::IngestError`] covers bind and serve failures

#![deny(unsafe_code)]

pub mod error;
pub mod server;

pub use error::IngestError;
pub use server::{IngestServer, recording_path};
