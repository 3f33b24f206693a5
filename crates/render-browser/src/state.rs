//! Shared per-session state.
//!
//! Written from the dispatch path, the injection chains and the session
//! controller concurrently:
//!
//! - execution context and page: `OnceLock`, set once and never replaced.
//!   A reader that observes `Some` also observes everything written before
//!   the `set`.
//! - lifecycle: a `watch` channel. `Done` is entered exactly once through a
//!   compare-and-set inside `send_if_modified`, after teardown finished.
//! - cancellation and frame gate: `AtomicBool`s. Cancellation is recorded
//!   as soon as the owning token fires, so capture stops before `Done`.
//! - last frame: one `RwLock` over bytes and timestamp, so the pair is
//!   updated and read atomically.
//! - injection generation: `AtomicU64`; a retry chain holding an older
//!   value is superseded.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use parking_lot::RwLock;
use tokio::sync::watch;

use crate::transport::PageTarget;
use crate::types::{DoneReason, ExecutionContext, Frame, Lifecycle};

/// State shared by every component of one session.
pub struct SessionState {
    lifecycle: watch::Sender<Lifecycle>,
    done_reason: OnceLock<DoneReason>,
    cancelled: AtomicBool,
    frames_closed: AtomicBool,
    execution_context: OnceLock<ExecutionContext>,
    page: OnceLock<Arc<dyn PageTarget>>,
    last_frame: RwLock<Option<Frame>>,
    injection_generation: AtomicU64,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    /// Fresh state in [`Lifecycle::Init`].
    pub fn new() -> Self {
        let (lifecycle, _) = watch::channel(Lifecycle::Init);
        Self {
            lifecycle,
            done_reason: OnceLock::new(),
            cancelled: AtomicBool::new(false),
            frames_closed: AtomicBool::new(false),
            execution_context: OnceLock::new(),
            page: OnceLock::new(),
            last_frame: RwLock::new(None),
            injection_generation: AtomicU64::new(0),
        }
    }

    // ─── Lifecycle ───────────────────────────────────────────────────────

    /// Current lifecycle state.
    pub fn lifecycle(&self) -> Lifecycle {
        *self.lifecycle.borrow()
    }

    /// Whether the session reached its terminal state.
    pub fn is_done(&self) -> bool {
        self.lifecycle() == Lifecycle::Done
    }

    /// Why the session finished, once it has.
    pub fn done_reason(&self) -> Option<DoneReason> {
        self.done_reason.get().copied()
    }

    /// Record that the owning context was cancelled.
    ///
    /// Returns `true` only for the first call. Does not enter `Done`; the
    /// session controller does that once teardown is complete.
    pub fn mark_cancelled(&self) -> bool {
        !self.cancelled.swap(true, Ordering::AcqRel)
    }

    /// Whether the owning context was cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Stop accepting frames. Called when teardown begins.
    pub fn close_frames(&self) {
        self.frames_closed.store(true, Ordering::Release);
    }

    /// Whether capture should still record incoming frames.
    pub fn accepts_frames(&self) -> bool {
        !self.is_cancelled() && !self.frames_closed.load(Ordering::Acquire) && !self.is_done()
    }

    /// `Init -> Starting`. Returns `false` if the session already left `Init`.
    pub fn begin_starting(&self) -> bool {
        self.advance(Lifecycle::Init, Lifecycle::Starting)
    }

    /// `Starting -> Running`. Returns `false` from any other state.
    pub fn mark_running(&self) -> bool {
        self.advance(Lifecycle::Starting, Lifecycle::Running)
    }

    /// Enter `Done` with `reason`.
    ///
    /// Only the first call wins; later calls return `false` and leave the
    /// recorded reason untouched.
    pub fn mark_done(&self, reason: DoneReason) -> bool {
        self.lifecycle.send_if_modified(|state| {
            if *state == Lifecycle::Done {
                return false;
            }
            *state = Lifecycle::Done;
            let _ = self.done_reason.set(reason);
            true
        })
    }

    fn advance(&self, from: Lifecycle, to: Lifecycle) -> bool {
        self.lifecycle.send_if_modified(|state| {
            if *state != from {
                return false;
            }
            *state = to;
            true
        })
    }

    /// Wait until the lifecycle is at least `target`.
    pub async fn reached(&self, target: Lifecycle) {
        let mut rx = self.lifecycle.subscribe();
        // the sender lives in `self`, so the channel cannot close under us
        let _ = rx.wait_for(|state| *state >= target).await;
    }

    /// Wait for the terminal transition and return its reason.
    pub async fn wait_done(&self) -> Option<DoneReason> {
        self.reached(Lifecycle::Done).await;
        self.done_reason()
    }

    /// Subscribe to lifecycle changes.
    pub fn subscribe(&self) -> watch::Receiver<Lifecycle> {
        self.lifecycle.subscribe()
    }

    // ─── Page and execution context ──────────────────────────────────────

    /// Remember the page the session drives. The first page wins.
    pub fn attach_page(&self, page: Arc<dyn PageTarget>) -> bool {
        self.page.set(page).is_ok()
    }

    /// The attached page, if the browser launched.
    pub fn page(&self) -> Option<Arc<dyn PageTarget>> {
        self.page.get().cloned()
    }

    /// Store the execution context. Never replaces an existing one.
    pub fn set_execution_context(&self, context: ExecutionContext) -> bool {
        self.execution_context.set(context).is_ok()
    }

    /// The captured execution context, if any.
    pub fn execution_context(&self) -> Option<ExecutionContext> {
        self.execution_context.get().cloned()
    }

    // ─── Frames ──────────────────────────────────────────────────────────

    /// Record a decoded frame captured at `now_ns`.
    ///
    /// The stored timestamp never goes backwards: it is the later of
    /// `now_ns` and the previous frame's timestamp.
    pub fn record_frame(&self, data: Bytes, now_ns: u64) -> Frame {
        let mut last = self.last_frame.write();
        let timestamp_ns = last
            .as_ref()
            .map_or(now_ns, |prev| now_ns.max(prev.timestamp_ns()));
        let frame = Frame::new(data, timestamp_ns);
        *last = Some(frame.clone());
        frame
    }

    /// The most recent frame.
    pub fn last_frame(&self) -> Option<Frame> {
        self.last_frame.read().clone()
    }

    // ─── Injection ───────────────────────────────────────────────────────

    /// Start a new injection generation, superseding older chains.
    pub fn next_injection_generation(&self) -> u64 {
        self.injection_generation.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The newest injection generation.
    pub fn injection_generation(&self) -> u64 {
        self.injection_generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn starts_in_init() {
        let state = SessionState::new();
        assert_eq!(state.lifecycle(), Lifecycle::Init);
        assert!(!state.is_done());
        assert!(state.done_reason().is_none());
        assert!(state.last_frame().is_none());
        assert!(state.execution_context().is_none());
    }

    #[test]
    fn lifecycle_moves_forward_only() {
        let state = SessionState::new();
        assert!(!state.mark_running());
        assert!(state.begin_starting());
        assert!(!state.begin_starting());
        assert!(state.mark_running());
        assert_eq!(state.lifecycle(), Lifecycle::Running);
    }

    #[test]
    fn done_is_entered_exactly_once() {
        let state = SessionState::new();
        assert!(state.mark_done(DoneReason::Cancelled));
        assert!(!state.mark_done(DoneReason::Cancelled));
        assert!(!state.mark_done(DoneReason::Failed));
        assert_eq!(state.done_reason(), Some(DoneReason::Cancelled));
        assert!(!state.begin_starting());
    }

    #[test]
    fn done_from_any_state() {
        let state = SessionState::new();
        assert!(state.begin_starting());
        assert!(state.mark_done(DoneReason::Failed));
        assert!(!state.mark_running());
        assert!(state.is_done());
    }

    #[test]
    fn concurrent_done_has_one_winner() {
        let state = Arc::new(SessionState::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let state = Arc::clone(&state);
                std::thread::spawn(move || state.mark_done(DoneReason::Cancelled))
            })
            .collect();
        let winners = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|won| *won)
            .count();
        assert_eq!(winners, 1);
    }

    #[test]
    fn cancellation_is_recorded_once_without_done() {
        let state = SessionState::new();
        assert!(state.accepts_frames());
        assert!(state.mark_cancelled());
        assert!(!state.mark_cancelled());
        assert!(state.is_cancelled());
        assert!(!state.accepts_frames());
        assert!(!state.is_done());
        assert!(state.done_reason().is_none());
    }

    #[test]
    fn closed_or_done_rejects_frames() {
        let closed = SessionState::new();
        closed.close_frames();
        assert!(!closed.accepts_frames());
        assert!(!closed.is_cancelled());

        let done = SessionState::new();
        assert!(done.mark_done(DoneReason::RunLoopEnded));
        assert!(!done.accepts_frames());
    }

    #[test]
    fn timestamps_never_go_backwards() {
        let state = SessionState::new();
        let first = state.record_frame(Bytes::from_static(b"a"), 100);
        let second = state.record_frame(Bytes::from_static(b"b"), 50);
        assert_eq!(first.timestamp_ns(), 100);
        assert_eq!(second.timestamp_ns(), 100);
        assert_eq!(state.last_frame().unwrap().data(), b"b");

        let third = state.record_frame(Bytes::new(), 200);
        assert_eq!(third.timestamp_ns(), 200);
        assert!(state.last_frame().unwrap().is_empty());
    }

    #[test]
    fn execution_context_is_set_once() {
        let state = SessionState::new();
        assert!(state.set_execution_context(ExecutionContext::new("frame-1")));
        assert!(!state.set_execution_context(ExecutionContext::new("frame-2")));
        assert_eq!(state.execution_context().unwrap().frame_id(), "frame-1");
    }

    #[test]
    fn generations_increase() {
        let state = SessionState::new();
        assert_eq!(state.injection_generation(), 0);
        assert_eq!(state.next_injection_generation(), 1);
        assert_eq!(state.next_injection_generation(), 2);
        assert_eq!(state.injection_generation(), 2);
    }

    #[tokio::test]
    async fn wait_done_returns_reason() {
        let state = Arc::new(SessionState::new());
        let waiter = {
            let state = Arc::clone(&state);
            tokio::spawn(async move { state.wait_done().await })
        };
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(state.mark_done(DoneReason::RunLoopEnded));
        assert_eq!(waiter.await.unwrap(), Some(DoneReason::RunLoopEnded));
    }

    #[tokio::test]
    async fn reached_returns_immediately_when_past_target() {
        let state = SessionState::new();
        assert!(state.begin_starting());
        assert!(state.mark_running());
        tokio::time::timeout(Duration::from_secs(1), state.reached(Lifecycle::Starting))
            .await
            .unwrap();
    }
}
