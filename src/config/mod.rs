//! Magnifier configuration management.
//!
//! ## Architecture
//!
//! - `MagnifierSettings`: user input, deserialized from JSON, validated once.
//! - `MagnifierConfig`: the live in-session record.
//! - `SharedConfig`: `MagnifierConfig` behind `Arc<parking_lot::RwLock>`,
//!   written by the session, read by the capture thread at frame start.
//!
//! Reads and writes are per field. A frame may observe a partially applied
//! batch of UI changes; the next frame sees the rest.

pub mod magnifier;
pub mod settings;

pub use magnifier::{CaptureParams, ColorFilterMode, MagnifierConfig, Shape, SharedConfig};
pub use settings::{MagnifierSettings, ShaderSelection};
