//! Ingestion service errors.

use thiserror::Error;

/// Errors starting or running the ingestion service.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// `host:port` we tried to bind.
        addr: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The server loop failed.
    #[error("ingest server failed: {0}")]
    Serve(#[from] std::io::Error),
}
