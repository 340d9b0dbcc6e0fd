//! Capture-to-render handoff.
//!
//! `FrameSlot` holds at most one pending frame. A newer frame replaces an
//! undelivered one (drop-oldest), it is not a queue. The lock only guards
//! an `Option` swap; the replaced frame is returned and dropped by the
//! caller after the lock is released.
//!
//! `RedrawSignal` wakes the render thread on demand.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::capture::MagnifiedFrame;

/// Single-slot, most-recent-wins frame handoff.
#[derive(Default)]
pub struct FrameSlot {
    pending: Mutex<Option<MagnifiedFrame>>,
    superseded: AtomicU64,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame`, returning the undelivered frame it replaced.
    pub fn put(&self, frame: MagnifiedFrame) -> Option<MagnifiedFrame> {
        let replaced = self.pending.lock().replace(frame);
        if replaced.is_some() {
            self.superseded.fetch_add(1, Ordering::Relaxed);
        }
        replaced
    }

    /// Take the pending frame, leaving the slot empty.
    pub fn take(&self) -> Option<MagnifiedFrame> {
        self.pending.lock().take()
    }

    /// Drop the pending frame, if any. Returns whether one was held.
    pub fn clear(&self) -> bool {
        let dropped = self.pending.lock().take();
        dropped.is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.lock().is_some()
    }

    /// Frames replaced before the consumer took them.
    pub fn superseded_count(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

/// Why `RedrawSignal::wait` returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Redraw,
    Timeout,
    Shutdown,
}

/// Render-on-demand wakeup: many requesters, one waiter.
#[derive(Default)]
pub struct RedrawSignal {
    requested: Mutex<bool>,
    condvar: Condvar,
    shutdown: AtomicBool,
}

impl RedrawSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ask for one more draw cycle. Requests coalesce.
    pub fn request(&self) {
        *self.requested.lock() = true;
        self.condvar.notify_one();
    }

    /// Wake the waiter for good.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::SeqCst);
        let _guard = self.requested.lock();
        self.condvar.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Block until a redraw is requested, shutdown, or `timeout` elapses.
    /// Consumes the pending request.
    pub fn wait(&self, timeout: Duration) -> Wake {
        let deadline = Instant::now() + timeout;
        let mut requested = self.requested.lock();
        loop {
            if self.is_shutdown() {
                return Wake::Shutdown;
            }
            if *requested {
                *requested = false;
                return Wake::Redraw;
            }
            if self.condvar.wait_until(&mut requested, deadline).timed_out() {
                if self.is_shutdown() {
                    return Wake::Shutdown;
                }
                if *requested {
                    *requested = false;
                    return Wake::Redraw;
                }
                return Wake::Timeout;
            }
        }
    }
}
