//! End-to-end tests using a real WebSocket client.

#![allow(missing_docs, unused_results)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use futures::SinkExt;
use render_ingest::IngestServer;
use render_settings::IngestSettings;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

const TIMEOUT: Duration = Duration::from_secs(5);

async fn boot(dir: &Path) -> (String, CancellationToken, tokio::task::JoinHandle<Result<(), render_ingest::IngestError>>) {
    let settings = IngestSettings {
        enabled: true,
        host: "127.0.0.1".into(),
        port: 0,
        output_dir: dir.to_string_lossy().into_owned(),
    };
    let cancel = CancellationToken::new();
    let (addr, handle) = IngestServer::new(&settings)
        .listen(cancel.clone())
        .await
        .unwrap();
    (format!("ws://{addr}/"), cancel, handle)
}

fn recordings(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .unwrap()
        .map(|entry| entry.unwrap().path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "webm"))
        .collect();
    files.sort();
    files
}

/// Poll until `count` recordings exist and hold `total` bytes.
async fn wait_for(dir: &Path, count: usize, total: u64) -> Vec<PathBuf> {
    timeout(TIMEOUT, async {
        loop {
            let files = recordings(dir);
            let size: u64 = files
                .iter()
                .map(|path| std::fs::metadata(path).map(|m| m.len()).unwrap_or(0))
                .sum();
            if files.len() == count && size == total {
                return files;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("recordings did not appear")
}

#[tokio::test]
async fn stream_is_appended_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let (url, cancel, _handle) = boot(dir.path()).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();
    ws.send(Message::binary(vec![0x1a, 0x45, 0xdf, 0xa3])).await.unwrap();
    ws.send(Message::text(String::from("hello"))).await.unwrap();
    ws.send(Message::binary(vec![0x00, 0xff])).await.unwrap();
    ws.close(None).await.unwrap();

    let files = wait_for(dir.path(), 1, 11).await;
    let content = std::fs::read(&files[0]).unwrap();
    assert_eq!(content, b"\x1a\x45\xdf\xa3hello\x00\xff");

    let stem = files[0].file_stem().unwrap().to_string_lossy().into_owned();
    let millis: i64 = stem.parse().unwrap();
    assert!(millis > 1_600_000_000_000);

    cancel.cancel();
}

#[tokio::test]
async fn each_connection_gets_its_own_file() {
    let dir = tempfile::tempdir().unwrap();
    let (url, cancel, _handle) = boot(dir.path()).await;

    let (mut first, _) = connect_async(&url).await.unwrap();
    first.send(Message::binary(vec![1, 2, 3])).await.unwrap();
    first.close(None).await.unwrap();
    wait_for(dir.path(), 1, 3).await;

    tokio::time::sleep(Duration::from_millis(5)).await;

    let (mut second, _) = connect_async(&url).await.unwrap();
    second.send(Message::binary(vec![4, 5])).await.unwrap();
    second.close(None).await.unwrap();

    let files = wait_for(dir.path(), 2, 5).await;
    assert_eq!(std::fs::read(&files[0]).unwrap(), vec![1, 2, 3]);
    assert_eq!(std::fs::read(&files[1]).unwrap(), vec![4, 5]);

    cancel.cancel();
}

#[tokio::test]
async fn empty_stream_leaves_empty_file() {
    let dir = tempfile::tempdir().unwrap();
    let (url, cancel, _handle) = boot(dir.path()).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();
    ws.close(None).await.unwrap();

    let files = wait_for(dir.path(), 1, 0).await;
    assert_eq!(std::fs::metadata(&files[0]).unwrap().len(), 0);

    cancel.cancel();
}

#[tokio::test]
async fn cancel_stops_server_with_open_connection() {
    let dir = tempfile::tempdir().unwrap();
    let (url, cancel, handle) = boot(dir.path()).await;

    let (mut ws, _) = connect_async(&url).await.unwrap();
    ws.send(Message::binary(vec![7; 16])).await.unwrap();
    wait_for(dir.path(), 1, 16).await;

    cancel.cancel();
    let result = timeout(TIMEOUT, handle).await.expect("server did not stop");
    assert!(result.unwrap().is_ok());

    assert!(connect_async(&url).await.is_err());
}
