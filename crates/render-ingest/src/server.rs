//! `IngestServer`: Axum WebSocket endpoint recording each connection.
//!
//! Every connection to `/` gets its own file,
//! `<output_dir>/<connection start, unix millis>.webm`, opened for append.
//! Binary and text messages are written verbatim in arrival order until
//! the peer closes, a read fails, or the service is cancelled.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::get;
use bytes::Bytes;
use render_settings::IngestSettings;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::IngestError;

/// File receiving the stream of a connection started at `started_ms`.
pub fn recording_path(output_dir: &Path, started_ms: i64) -> PathBuf {
    output_dir.join(format!("{started_ms}.webm"))
}

#[derive(Clone)]
struct AppState {
    output_dir: Arc<PathBuf>,
    cancel: CancellationToken,
}

/// The ingestion service.
pub struct IngestServer {
    host: String,
    port: u16,
    output_dir: PathBuf,
}

impl IngestServer {
    /// Service configured from the `ingest` settings section.
    pub fn new(settings: &IngestSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            output_dir: PathBuf::from(&settings.output_dir),
        }
    }

    /// Directory receiving recordings.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Build the router. Connection loops stop when `cancel` fires.
    pub fn router(&self, cancel: CancellationToken) -> Router {
        let state = AppState {
            output_dir: Arc::new(self.output_dir.clone()),
            cancel,
        };
        Router::new().route("/", get(ws_handler)).with_state(state)
    }

    /// Bind the configured address.
    pub async fn bind(&self) -> Result<TcpListener, IngestError> {
        TcpListener::bind((self.host.as_str(), self.port))
            .await
            .map_err(|source| IngestError::Bind {
                addr: format!("{}:{}", self.host, self.port),
                source,
            })
    }

    /// Serve on `listener` until `cancel` fires.
    pub async fn serve(
        &self,
        listener: TcpListener,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        if let Ok(addr) = listener.local_addr() {
            info!(%addr, dir = %self.output_dir.display(), "ingest server listening");
        }
        let app = self.router(cancel.clone());
        axum::serve(listener, app)
            .with_graceful_shutdown(cancel.cancelled_owned())
            .await?;
        info!("ingest server stopped");
        Ok(())
    }

    /// Bind and serve in a background task.
    pub async fn listen(
        self,
        cancel: CancellationToken,
    ) -> Result<(SocketAddr, JoinHandle<Result<(), IngestError>>), IngestError> {
        let listener = self.bind().await?;
        let addr = listener.local_addr()?;
        let handle = tokio::spawn(async move { self.serve(listener, cancel).await });
        Ok((addr, handle))
    }
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| record_stream(socket, state))
}

async fn record_stream(mut socket: WebSocket, state: AppState) {
    let started_ms = chrono::Utc::now().timestamp_millis();
    let path = recording_path(&state.output_dir, started_ms);

    let mut file = match tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .await
    {
        Ok(file) => file,
        Err(e) => {
            error!(path = %path.display(), error = %e, "open recording file failed");
            return;
        }
    };
    info!(path = %path.display(), "recording stream");

    let mut total: u64 = 0;
    loop {
        let received = tokio::select! {
            received = socket.recv() => received,
            () = state.cancel.cancelled() => break,
        };
        let chunk: Bytes = match received {
            None | Some(Ok(Message::Close(_))) => break,
            Some(Err(e)) => {
                warn!(path = %path.display(), error = %e, "read stream failed");
                break;
            }
            Some(Ok(Message::Binary(data))) => data,
            Some(Ok(Message::Text(text))) => Bytes::copy_from_slice(text.as_str().as_bytes()),
            Some(Ok(_)) => continue,
        };

        debug!(bytes = chunk.len(), "recv chunk");
        if let Err(e) = file.write_all(&chunk).await {
            error!(path = %path.display(), error = %e, "write recording failed");
            break;
        }
        total += chunk.len() as u64;
    }

    if let Err(e) = file.flush().await {
        warn!(path = %path.display(), error = %e, "flush recording failed");
    }
    info!(path = %path.display(), bytes = total, "stream closed");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recording_file_named_by_start_millis() {
        assert_eq!(
            recording_path(Path::new("/var/rec"), 1_700_000_000_123),
            PathBuf::from("/var/rec/1700000000123.webm")
        );
    }

    #[test]
    fn configured_from_settings() {
        let settings = IngestSettings {
            output_dir: "/var/rec".into(),
            ..IngestSettings::default()
        };
        let server = IngestServer::new(&settings);
        assert_eq!(server.output_dir(), Path::new("/var/rec"));
        assert_eq!(server.port, 8080);
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let settings = IngestSettings {
            port,
            ..IngestSettings::default()
        };
        let err = IngestServer::new(&settings).bind().await.unwrap_err();
        assert!(matches!(err, IngestError::Bind { .. }));
    }
}
