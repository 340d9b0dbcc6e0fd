//! Capture engine: pulls platform frames, magnifies them, hands them off.
//!
//! Architecture:
//! - `start` opens a `CaptureStream` and moves it onto a dedicated
//!   `magnifier-capture` thread
//! - Each frame reads a `CaptureParams` snapshot, runs transform and color
//!   filter, then submits to the `FrameSink` (non-blocking, newest wins)
//! - `stop` and out-of-band revocation share one teardown path: the loop
//!   exits, the stream is released, `is_capturing` drops to false

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::Mutex;

use super::filter::apply_filter;
use super::transform::transform_with;
use super::types::{CaptureProvider, CaptureStats, CaptureStream, FrameEvent, FrameSink, SessionToken};
use crate::config::SharedConfig;
use crate::error::{MagnifierError, MagnifierResult};

/// Debug summary cadence, in frames.
const LOG_EVERY_N_FRAMES: u64 = 60;

/// Upper bound on how long `stop` waits for the loop to notice.
const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Called once from the capture thread after a revoked session was torn down.
/// Each `start` claims the registered listener for that run only.
pub type RevocationListener = Box<dyn FnOnce(String) + Send>;

#[derive(Default)]
struct EngineShared {
    stop_signal: AtomicBool,
    is_capturing: AtomicBool,
    processed: AtomicU64,
    skipped: AtomicU64,
    superseded: AtomicU64,
}

impl EngineShared {
    fn reset_stats(&self) {
        self.processed.store(0, Ordering::SeqCst);
        self.skipped.store(0, Ordering::SeqCst);
        self.superseded.store(0, Ordering::SeqCst);
    }
}

/// Owns the capture session and its thread. State machine:
/// `Idle -> Capturing -> Idle` via `stop` or revocation.
pub struct CaptureEngine {
    shared: Arc<EngineShared>,
    thread: Option<JoinHandle<()>>,
    poll_timeout: Duration,
    on_revoked: Mutex<Option<RevocationListener>>,
}

impl Default for CaptureEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureEngine {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(EngineShared::default()),
            thread: None,
            poll_timeout: DEFAULT_POLL_TIMEOUT,
            on_revoked: Mutex::new(None),
        }
    }

    /// Bound on the wait for each frame, and so on `stop` latency.
    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Register the listener for out-of-band loss of the next started session.
    pub fn set_revocation_listener(&self, listener: RevocationListener) {
        *self.on_revoked.lock() = Some(listener);
    }

    pub fn is_capturing(&self) -> bool {
        self.shared.is_capturing.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            processed: self.shared.processed.load(Ordering::SeqCst),
            skipped: self.shared.skipped.load(Ordering::SeqCst),
            superseded: self.shared.superseded.load(Ordering::SeqCst),
        }
    }

    /// Open the session for `token` and start the capture thread.
    ///
    /// Returns the captured surface dimensions.
    pub fn start(
        &mut self,
        provider: &dyn CaptureProvider,
        token: &SessionToken,
        config: SharedConfig,
        sink: Arc<dyn FrameSink>,
    ) -> MagnifierResult<(u32, u32)> {
        if self.is_capturing() {
            log::warn!("[CAPTURE] Already capturing");
            return Err(MagnifierError::AlreadyCapturing);
        }
        // Reap a thread that ended through revocation.
        self.join_thread();

        let mut stream = provider.open(token)?;
        let screen_size = stream.screen_size();
        if screen_size.0 == 0 || screen_size.1 == 0 {
            stream.release();
            return Err(MagnifierError::SessionUnavailable(format!(
                "capture surface for {} has no pixels",
                token
            )));
        }

        self.shared.stop_signal.store(false, Ordering::SeqCst);
        self.shared.reset_stats();
        self.shared.is_capturing.store(true, Ordering::SeqCst);

        let shared = Arc::clone(&self.shared);
        let on_revoked = self.on_revoked.lock().take();
        let poll_timeout = self.poll_timeout;

        let thread = std::thread::Builder::new()
            .name("magnifier-capture".to_string())
            .spawn(move || {
                let revoked = capture_loop(stream.as_mut(), &config, sink.as_ref(), &shared, poll_timeout);
                stream.release();
                shared.is_capturing.store(false, Ordering::SeqCst);

                if let Some(reason) = revoked {
                    log::warn!("[CAPTURE] Session revoked: {}", reason);
                    if let Some(listener) = on_revoked {
                        listener(reason);
                    }
                } else {
                    log::info!("[CAPTURE] Capture thread stopped");
                }
            });

        match thread {
            Ok(handle) => {
                self.thread = Some(handle);
                log::info!(
                    "[CAPTURE] Started {} at {}x{}",
                    token,
                    screen_size.0,
                    screen_size.1
                );
                Ok(screen_size)
            },
            Err(e) => {
                self.shared.is_capturing.store(false, Ordering::SeqCst);
                Err(MagnifierError::Other(format!(
                    "Failed to spawn capture thread: {}",
                    e
                )))
            },
        }
    }

    /// Stop capturing. Idempotent; safe before any `start`.
    pub fn stop(&mut self) {
        self.shared.stop_signal.store(true, Ordering::SeqCst);
        if self.thread.is_some() {
            self.join_thread();
            log::info!("[CAPTURE] Stopped ({:?})", self.stats());
        }
    }

    fn join_thread(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        // A revocation listener calling back into `stop` runs on the capture
        // thread itself; the loop has already exited there.
        if thread.thread().id() == std::thread::current().id() {
            return;
        }
        if thread.join().is_err() {
            log::error!("[CAPTURE] Capture thread panicked");
            self.shared.is_capturing.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Returns the revocation reason if the platform ended the session.
fn capture_loop(
    stream: &mut dyn CaptureStream,
    config: &SharedConfig,
    sink: &dyn FrameSink,
    shared: &EngineShared,
    poll_timeout: Duration,
) -> Option<String> {
    let mut frames_seen: u64 = 0;

    while !shared.stop_signal.load(Ordering::SeqCst) {
        let frame = match stream.next_frame(poll_timeout) {
            FrameEvent::Frame(frame) => frame,
            FrameEvent::Idle => continue,
            FrameEvent::Revoked(reason) => return Some(reason),
        };
        frames_seen += 1;

        let params = config.capture_params();
        let magnified = match transform_with(&frame, &params) {
            Ok(magnified) => magnified,
            Err(e) => {
                let skipped = shared.skipped.fetch_add(1, Ordering::SeqCst) + 1;
                if !e.is_frame_local() || skipped == 1 || skipped % LOG_EVERY_N_FRAMES == 0 {
                    log::warn!("[TRANSFORM] Skipping frame {} ({} skipped): {}", frames_seen, skipped, e);
                }
                continue;
            },
        };
        drop(frame);

        let processed = shared.processed.fetch_add(1, Ordering::SeqCst) + 1;
        let magnified = apply_filter(magnified, params.color_filter).with_sequence(processed);
        let crop = magnified.crop();

        if sink.submit(magnified) {
            shared.superseded.fetch_add(1, Ordering::SeqCst);
        }

        if frames_seen % LOG_EVERY_N_FRAMES == 0 {
            log::debug!(
                "[CAPTURE] Frame {} - Zoom: {}x, Crop: {}x{} at ({}, {}), superseded: {}",
                frames_seen,
                params.zoom_factor,
                crop.width(),
                crop.height(),
                crop.left,
                crop.top,
                shared.superseded.load(Ordering::SeqCst)
            );
        }
    }
    None
}
