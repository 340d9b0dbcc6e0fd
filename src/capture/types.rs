//! Platform capture seam.
//!
//! A `CaptureProvider` turns a consent token into a `CaptureStream`; the
//! engine pulls frames from the stream on its own thread and pushes the
//! magnified result into a `FrameSink`.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::frame::{CapturedFrame, MagnifiedFrame};
use crate::error::{MagnifierError, MagnifierResult};

/// Opaque capture-consent handle obtained outside the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SessionToken {
    /// The primary display.
    Primary,
    /// A specific display by platform id.
    Monitor(u32),
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionToken::Primary => write!(f, "primary"),
            SessionToken::Monitor(id) => write!(f, "monitor:{}", id),
        }
    }
}

impl FromStr for SessionToken {
    type Err = MagnifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("primary") {
            return Ok(SessionToken::Primary);
        }
        let id = s.strip_prefix("monitor:").unwrap_or(s);
        id.parse::<u32>()
            .map(SessionToken::Monitor)
            .map_err(|_| MagnifierError::SessionUnavailable(format!("invalid token '{}'", s)))
    }
}

/// Result of waiting for the next frame.
#[derive(Debug)]
pub enum FrameEvent {
    Frame(CapturedFrame),
    /// Nothing arrived within the timeout.
    Idle,
    /// The platform ended the session out-of-band.
    Revoked(String),
}

/// An open capture session.
pub trait CaptureStream: Send {
    /// Dimensions of the captured surface.
    fn screen_size(&self) -> (u32, u32);

    /// Block up to `timeout` for the next frame.
    fn next_frame(&mut self, timeout: Duration) -> FrameEvent;

    /// Unregister from the platform source. Safe to call more than once.
    fn release(&mut self);
}

/// Opens capture sessions.
pub trait CaptureProvider: Send + Sync {
    /// Fails with `SessionUnavailable` if the token cannot be honored.
    fn open(&self, token: &SessionToken) -> MagnifierResult<Box<dyn CaptureStream>>;
}

/// Non-blocking receiver of magnified frames.
pub trait FrameSink: Send + Sync {
    /// Hand off a frame. Returns `true` if an undelivered frame was
    /// superseded.
    fn submit(&self, frame: MagnifiedFrame) -> bool;
}

/// Frame counters kept by the capture engine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CaptureStats {
    /// Frames transformed and handed off.
    pub processed: u64,
    /// Frames dropped for degenerate crop geometry.
    pub skipped: u64,
    /// Handed-off frames replaced before the renderer took them.
    pub superseded: u64,
}
