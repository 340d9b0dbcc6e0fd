//! Screen capture pipeline: platform frames in, magnified frames out.
//!
//! ```text
//! CaptureStream -> transform (crop + scale) -> apply_filter -> FrameSink
//! ```
//!
//! Everything here runs on the capture thread. Nothing blocks on GPU work;
//! the sink is a single most-recent-wins slot.

pub mod engine;
pub mod filter;
pub mod frame;
pub mod transform;
pub mod types;
pub mod xcap_source;

pub use engine::{CaptureEngine, RevocationListener};
pub use filter::apply_filter;
pub use frame::{CapturedFrame, CropRect, MagnifiedFrame, PixelFormat};
pub use transform::{compute_crop, transform, transform_with};
pub use types::{CaptureProvider, CaptureStats, CaptureStream, FrameEvent, FrameSink, SessionToken};
pub use xcap_source::XcapProvider;
