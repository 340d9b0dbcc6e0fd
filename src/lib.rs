//! Live screen magnifier core.
//!
//! A capture engine grabs a region of the screen, zooms and filters it on
//! its own thread, and hands the newest frame to a render thread that
//! draws it through a pixel-art shader onto a square or circular overlay.

pub mod capture;
pub mod config;
pub mod error;
pub mod rendering;
pub mod session;

#[cfg(test)]
mod testing;

pub use capture::{
    apply_filter, transform, CaptureEngine, CaptureProvider, CapturedFrame, MagnifiedFrame,
    SessionToken, XcapProvider,
};
pub use config::{ColorFilterMode, MagnifierConfig, MagnifierSettings, Shape, SharedConfig};
pub use error::{MagnifierError, MagnifierResult};
pub use rendering::{
    BuiltinAssets, DirectoryAssets, LayeredAssets, PngSnapshotSurface, RenderThread, Renderer,
    RendererHandle, ShaderAssetStore, ShaderProgramLoader, WgpuBackend,
};
pub use session::{MagnifierSession, SharedBackendFactory, SurfaceFactory};
