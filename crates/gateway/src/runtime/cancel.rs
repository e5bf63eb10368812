//! Per-turn interruption control.
//!
//! Two levels of interruption share one cancellation token:
//! - **abort** — hard stop: the HTTP stream and the running tool are
//!   cancelled, the partial assistant message is persisted, queued
//!   messages stay queued.
//! - **steer** — the stream stops being read and the running tool is
//!   cancelled; its result records the cancellation, remaining tool calls
//!   are dropped, and queued steer messages restart the turn.
//!
//! A cancellation token cannot be un-cancelled, so the scheduler swaps in
//! a fresh `TurnControl` when it restarts after a steer.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

#[derive(Clone)]
pub struct TurnControl {
    /// Fired on either abort or steer. Handed to tools and stream readers.
    interrupt: CancellationToken,
    aborted: Arc<AtomicBool>,
    steer: Arc<AtomicBool>,
    retrying: Arc<AtomicBool>,
}

impl Default for TurnControl {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnControl {
    pub fn new() -> Self {
        Self {
            interrupt: CancellationToken::new(),
            aborted: Arc::new(AtomicBool::new(false)),
            steer: Arc::new(AtomicBool::new(false)),
            retrying: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hard abort.
    pub fn abort(&self) {
        self.aborted.store(true, Ordering::Release);
        self.interrupt.cancel();
    }

    /// Soft interrupt: finish the current tool as cancelled, drop the
    /// rest, restart with the queued steer messages.
    pub fn request_steer(&self) {
        self.steer.store(true, Ordering::Release);
        self.interrupt.cancel();
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.load(Ordering::Acquire)
    }

    pub fn steer_requested(&self) -> bool {
        self.steer.load(Ordering::Acquire)
    }

    /// Either interruption is pending.
    pub fn interrupted(&self) -> bool {
        self.interrupt.is_cancelled()
    }

    /// The token observed by tools and awaited by stream readers.
    pub fn interrupt_token(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    // ── Retry bookkeeping ───────────────────────────────────────────

    pub fn set_retrying(&self, value: bool) {
        self.retrying.store(value, Ordering::Release);
    }

    /// True while the turn sits in a retry backoff.
    pub fn is_retrying(&self) -> bool {
        self.retrying.load(Ordering::Acquire)
    }
}
