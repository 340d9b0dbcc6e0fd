//! Desktop capture provider using xcap.
//!
//! xcap captures a monitor synchronously, so each stream runs a small
//! grabber thread that polls the monitor at a fixed interval and passes
//! images to the capture thread over a bounded crossbeam channel. The
//! monitor handle is created on the grabber thread and never leaves it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use image::RgbaImage;
use xcap::Monitor;

use super::frame::CapturedFrame;
use super::types::{CaptureProvider, CaptureStream, FrameEvent, SessionToken};
use crate::error::{MagnifierError, MagnifierResult};

const DEFAULT_FPS: u32 = 30;
const MAX_CONSECUTIVE_FAILURES: u32 = 3;

enum Grab {
    Image(RgbaImage),
    Revoked(String),
}

/// Capture provider backed by `xcap::Monitor`.
#[derive(Debug, Clone)]
pub struct XcapProvider {
    frame_interval: Duration,
}

impl Default for XcapProvider {
    fn default() -> Self {
        Self::with_fps(DEFAULT_FPS)
    }
}

impl XcapProvider {
    pub fn with_fps(fps: u32) -> Self {
        Self {
            frame_interval: Duration::from_secs_f64(1.0 / fps.max(1) as f64),
        }
    }
}

/// Resolve a token to a monitor id plus its size.
fn find_monitor(token: &SessionToken) -> MagnifierResult<(u32, u32, u32)> {
    let monitors = Monitor::all()
        .map_err(|e| MagnifierError::SessionUnavailable(format!("Failed to get monitors: {}", e)))?;

    let monitor = match token {
        SessionToken::Primary => monitors
            .iter()
            .find(|m| m.is_primary().unwrap_or(false))
            .or_else(|| monitors.first()),
        SessionToken::Monitor(id) => monitors.iter().find(|m| m.id().ok() == Some(*id)),
    }
    .ok_or_else(|| MagnifierError::SessionUnavailable(format!("no monitor for {}", token)))?;

    let id = monitor
        .id()
        .map_err(|e| MagnifierError::SessionUnavailable(format!("monitor id: {}", e)))?;
    let width = monitor.width().unwrap_or(0);
    let height = monitor.height().unwrap_or(0);
    Ok((id, width, height))
}

impl CaptureProvider for XcapProvider {
    fn open(&self, token: &SessionToken) -> MagnifierResult<Box<dyn CaptureStream>> {
        let (monitor_id, width, height) = find_monitor(token)?;
        log::info!(
            "[CAPTURE] Opening xcap monitor {} ({}x{}) at {:?} per frame",
            monitor_id,
            width,
            height,
            self.frame_interval
        );

        let (tx, rx) = crossbeam_channel::bounded(1);
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop = Arc::clone(&stop_signal);
        let interval = self.frame_interval;

        let grabber = std::thread::Builder::new()
            .name("xcap-grabber".to_string())
            .spawn(move || grab_loop(monitor_id, interval, &tx, &stop))
            .map_err(|e| MagnifierError::SessionUnavailable(format!("Failed to spawn grabber: {}", e)))?;

        Ok(Box::new(XcapStream {
            size: (width, height),
            receiver: rx,
            stop_signal,
            grabber: Some(grabber),
        }))
    }
}

fn grab_loop(monitor_id: u32, interval: Duration, tx: &Sender<Grab>, stop: &AtomicBool) {
    let monitor = match Monitor::all()
        .ok()
        .and_then(|all| all.into_iter().find(|m| m.id().ok() == Some(monitor_id)))
    {
        Some(monitor) => monitor,
        None => {
            let _ = tx.send(Grab::Revoked(format!("monitor {} disappeared", monitor_id)));
            return;
        },
    };

    let mut failures = 0u32;
    while !stop.load(Ordering::SeqCst) {
        let started = Instant::now();
        match monitor.capture_image() {
            Ok(image) => {
                failures = 0;
                match tx.try_send(Grab::Image(image)) {
                    // Capture thread still busy: drop this grab, the next is fresher.
                    Ok(()) | Err(TrySendError::Full(_)) => {},
                    Err(TrySendError::Disconnected(_)) => return,
                }
            },
            Err(e) => {
                failures += 1;
                log::warn!(
                    "[CAPTURE] xcap capture failed ({}/{}): {}",
                    failures,
                    MAX_CONSECUTIVE_FAILURES,
                    e
                );
                if failures >= MAX_CONSECUTIVE_FAILURES {
                    // If the slot is full the disconnect reports the loss instead.
                    let _ = tx.try_send(Grab::Revoked(format!("capture failing: {}", e)));
                    return;
                }
            },
        }
        if let Some(rest) = interval.checked_sub(started.elapsed()) {
            std::thread::sleep(rest);
        }
    }
}

struct XcapStream {
    size: (u32, u32),
    receiver: Receiver<Grab>,
    stop_signal: Arc<AtomicBool>,
    grabber: Option<JoinHandle<()>>,
}

impl CaptureStream for XcapStream {
    fn screen_size(&self) -> (u32, u32) {
        self.size
    }

    fn next_frame(&mut self, timeout: Duration) -> FrameEvent {
        match self.receiver.recv_timeout(timeout) {
            Ok(Grab::Image(image)) => FrameEvent::Frame(CapturedFrame::from_rgba_image(image)),
            Ok(Grab::Revoked(reason)) => FrameEvent::Revoked(reason),
            Err(RecvTimeoutError::Timeout) => FrameEvent::Idle,
            Err(RecvTimeoutError::Disconnected) => {
                FrameEvent::Revoked("grabber thread ended".to_string())
            },
        }
    }

    fn release(&mut self) {
        self.stop_signal.store(true, Ordering::SeqCst);
        if let Some(grabber) = self.grabber.take() {
            // Drop any undelivered grab.
            while self.receiver.try_recv().is_ok() {}
            if grabber.join().is_err() {
                log::error!("[CAPTURE] xcap grabber panicked");
            }
            log::debug!("[CAPTURE] xcap stream released");
        }
    }
}

impl Drop for XcapStream {
    fn drop(&mut self) {
        self.release();
    }
}
