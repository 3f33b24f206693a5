//! Frame persistence.
//!
//! One writer task per session, fed by a bounded broadcast queue. When the
//! disk falls behind, the oldest queued frames are dropped and the skip is
//! logged; the dispatch path never waits on the filesystem.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::types::{Frame, ScreencastFormat};

/// Where a frame captured at `timestamp_ns` is written.
pub fn frame_path(base: &Path, task_name: &str, timestamp_ns: u64) -> PathBuf {
    base.join(task_name)
        .join(format!("{timestamp_ns}.{}", ScreencastFormat::Jpeg.extension()))
}

/// Where the `repeat`th extra frame sharing `timestamp_ns` is written.
pub fn repeated_frame_path(base: &Path, task_name: &str, timestamp_ns: u64, repeat: u32) -> PathBuf {
    base.join(task_name).join(format!(
        "{timestamp_ns}-{repeat}.{}",
        ScreencastFormat::Jpeg.extension()
    ))
}

/// Counters reported when the writer stops.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WriterReport {
    /// Frames written to disk.
    pub written: u64,
    /// Frames dropped because the queue overflowed.
    pub dropped: u64,
    /// Frames whose write failed.
    pub failed: u64,
}

/// Producer side of the writer queue.
#[derive(Clone, Debug)]
pub struct FrameSink {
    tx: broadcast::Sender<Frame>,
    task_name: Arc<str>,
}

impl FrameSink {
    /// Queue a frame for writing. Never blocks.
    ///
    /// Returns `false`, and logs the loss, when the writer already stopped.
    pub fn submit(&self, frame: Frame) -> bool {
        let timestamp_ns = frame.timestamp_ns();
        if self.tx.send(frame).is_err() {
            warn!(task = %self.task_name, timestamp_ns, "frame writer stopped, frame not persisted");
            return false;
        }
        true
    }
}

/// The per-session frame writer.
pub struct FrameWriter {
    base: PathBuf,
    dir: PathBuf,
    task_name: String,
    rx: broadcast::Receiver<Frame>,
    cancel: CancellationToken,
    dir_ready: bool,
    last_timestamp: Option<u64>,
    repeats: u32,
    report: WriterReport,
}

impl FrameWriter {
    /// Spawn a writer persisting into `<base>/<task_name>/`.
    ///
    /// `capacity` bounds the queue; it is clamped to at least 1. The
    /// writer drains what is queued and stops once `cancel` fires or every
    /// [`FrameSink`] is dropped.
    pub fn spawn(
        base: PathBuf,
        task_name: &str,
        capacity: usize,
        cancel: CancellationToken,
    ) -> (FrameSink, JoinHandle<WriterReport>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        let writer = Self {
            dir: base.join(task_name),
            base,
            task_name: task_name.to_string(),
            rx,
            cancel,
            dir_ready: false,
            last_timestamp: None,
            repeats: 0,
            report: WriterReport::default(),
        };
        let handle = tokio::spawn(writer.run());
        let sink = FrameSink {
            tx,
            task_name: Arc::from(task_name),
        };
        (sink, handle)
    }

    async fn run(mut self) -> WriterReport {
        loop {
            tokio::select! {
                received = self.rx.recv() => match received {
                    Ok(frame) => self.write(&frame).await,
                    Err(RecvError::Lagged(skipped)) => self.lagged(skipped),
                    Err(RecvError::Closed) => break,
                },
                () = self.cancel.cancelled() => {
                    self.drain().await;
                    break;
                }
            }
        }
        debug!(
            task = %self.task_name,
            written = self.report.written,
            dropped = self.report.dropped,
            failed = self.report.failed,
            "frame writer stopped"
        );
        self.report
    }

    async fn drain(&mut self) {
        loop {
            match self.rx.try_recv() {
                Ok(frame) => self.write(&frame).await,
                Err(TryRecvError::Lagged(skipped)) => self.lagged(skipped),
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn lagged(&mut self, skipped: u64) {
        self.report.dropped += skipped;
        warn!(task = %self.task_name, skipped, "frame writer fell behind, dropped oldest frames");
    }

    /// Frames sharing a timestamp get a numeric suffix instead of
    /// overwriting each other.
    fn next_path(&mut self, timestamp_ns: u64) -> PathBuf {
        if self.last_timestamp == Some(timestamp_ns) {
            self.repeats += 1;
            warn!(
                task = %self.task_name,
                timestamp_ns,
                repeat = self.repeats,
                "frame timestamp repeated, writing with suffix"
            );
            return repeated_frame_path(&self.base, &self.task_name, timestamp_ns, self.repeats);
        }
        self.last_timestamp = Some(timestamp_ns);
        self.repeats = 0;
        frame_path(&self.base, &self.task_name, timestamp_ns)
    }

    async fn write(&mut self, frame: &Frame) {
        if !self.dir_ready {
            if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
                error!(task = %self.task_name, dir = %self.dir.display(), error = %e, "mkdir frame dir failed");
                self.report.failed += 1;
                return;
            }
            self.dir_ready = true;
        }

        let path = self.next_path(frame.timestamp_ns());
        match tokio::fs::write(&path, frame.data()).await {
            Ok(()) => self.report.written += 1,
            Err(e) => {
                error!(task = %self.task_name, path = %path.display(), error = %e, "write frame failed");
                self.report.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use render_logging::capture_logs;
    use tracing::Level;

    use super::*;

    #[test]
    fn path_layout() {
        assert_eq!(
            frame_path(Path::new("/tmp/cap"), "abc", 1_700_000_000_000_000_000),
            PathBuf::from("/tmp/cap/abc/1700000000000000000.jpg")
        );
        assert_eq!(
            repeated_frame_path(Path::new("/tmp/cap"), "abc", 5, 2),
            PathBuf::from("/tmp/cap/abc/5-2.jpg")
        );
    }

    #[tokio::test]
    async fn writes_frames_named_by_timestamp() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (sink, handle) = FrameWriter::spawn(dir.path().to_path_buf(), "abc", 8, cancel.clone());

        let _ = sink.submit(Frame::new(vec![0xff, 0xd8, 0xff], 1_700_000_000_000_000_000));
        let _ = sink.submit(Frame::new(Vec::new(), 1_700_000_000_000_000_001));
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.written, 2);
        let first = frame_path(dir.path(), "abc", 1_700_000_000_000_000_000);
        assert_eq!(std::fs::read(first).unwrap(), vec![0xff, 0xd8, 0xff]);
        let second = frame_path(dir.path(), "abc", 1_700_000_000_000_000_001);
        assert!(std::fs::read(second).unwrap().is_empty());
    }

    #[tokio::test]
    async fn repeated_timestamps_do_not_overwrite() {
        let (logs, _guard) = capture_logs();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (sink, handle) = FrameWriter::spawn(dir.path().to_path_buf(), "abc", 8, cancel.clone());

        assert!(sink.submit(Frame::new(vec![1], 100)));
        assert!(sink.submit(Frame::new(vec![2], 100)));
        assert!(sink.submit(Frame::new(vec![3], 100)));
        assert!(sink.submit(Frame::new(vec![4], 101)));
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.written, 4);
        assert_eq!(std::fs::read(frame_path(dir.path(), "abc", 100)).unwrap(), vec![1]);
        assert_eq!(std::fs::read(repeated_frame_path(dir.path(), "abc", 100, 1)).unwrap(), vec![2]);
        assert_eq!(std::fs::read(repeated_frame_path(dir.path(), "abc", 100, 2)).unwrap(), vec![3]);
        assert_eq!(std::fs::read(frame_path(dir.path(), "abc", 101)).unwrap(), vec![4]);
        assert!(logs.has_event(Level::WARN, "frame timestamp repeated"));
    }

    #[tokio::test]
    async fn submit_after_writer_stopped_is_logged() {
        let (logs, _guard) = capture_logs();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (sink, handle) = FrameWriter::spawn(dir.path().to_path_buf(), "abc", 4, cancel.clone());
        cancel.cancel();
        let _ = handle.await.unwrap();

        assert!(!sink.submit(Frame::new(vec![1], 7)));
        assert!(logs.has_event(Level::WARN, "frame not persisted"));
        assert!(!frame_path(dir.path(), "abc", 7).exists());
    }

    #[tokio::test]
    async fn stops_when_sinks_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let (sink, handle) =
            FrameWriter::spawn(dir.path().to_path_buf(), "abc", 4, CancellationToken::new());
        let _ = sink.submit(Frame::new(vec![1], 5));
        drop(sink);
        let report = handle.await.unwrap();
        assert_eq!(report.written, 1);
    }

    #[tokio::test]
    async fn overflow_drops_oldest_and_warns() {
        let (logs, _guard) = capture_logs();
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let (sink, handle) = FrameWriter::spawn(dir.path().to_path_buf(), "abc", 2, cancel.clone());

        // current-thread runtime: the writer cannot run until we yield
        for ts in 1..=5 {
            let _ = sink.submit(Frame::new(vec![u8::try_from(ts).unwrap()], ts));
        }
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.dropped, 3);
        assert_eq!(report.written, 2);
        assert!(!frame_path(dir.path(), "abc", 1).exists());
        assert_eq!(std::fs::read(frame_path(dir.path(), "abc", 5)).unwrap(), vec![5]);
        assert!(logs.has_event(Level::WARN, "dropped oldest frames"));
    }

    #[tokio::test]
    async fn unwritable_base_counts_failures() {
        let (logs, _guard) = capture_logs();
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let cancel = CancellationToken::new();
        let (sink, handle) = FrameWriter::spawn(blocker, "abc", 4, cancel.clone());

        let _ = sink.submit(Frame::new(vec![1], 1));
        cancel.cancel();
        let report = handle.await.unwrap();

        assert_eq!(report.written, 0);
        assert_eq!(report.failed, 1);
        assert!(logs.has_event(Level::ERROR, "mkdir frame dir failed"));
    }
}
