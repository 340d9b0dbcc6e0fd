//! GPU output of the magnifier.
//!
//! Frames produced by the capture engine are handed to a dedicated render
//! thread, drawn through the active shader program onto a square or
//! circular quad, and presented on an overlay surface.
//!
//! ## Components
//! - `assets`: shader asset stores (built-in, directory, layered)
//! - `shader`: WGSL compile/link checks and the program loader
//! - `geometry`: square strip and circle fan vertex data
//! - `handoff`: latest-frame slot and redraw signal
//! - `renderer`: draw policy and the `GpuBackend` seam
//! - `render_thread`: the `magnifier-render` thread
//! - `surface`: where rendered frames are presented
//! - `wgpu_backend`: offscreen wgpu implementation of `GpuBackend`

pub mod assets;
pub mod geometry;
pub mod handoff;
pub mod render_thread;
pub mod renderer;
pub mod shader;
pub mod surface;
pub mod wgpu_backend;


pub use assets::{
    BuiltinAssets, DirectoryAssets, LayeredAssets, ShaderAssetStore, FALLBACK_SHADER_ID,
};
pub use geometry::{Geometry, Topology, Vertex};
pub use handoff::{FrameSlot, RedrawSignal, Wake};
pub use render_thread::{BackendFactory, RenderThread};
pub use renderer::{
    DrawCall, DrawOutcome, GpuBackend, ProgramHandle, Renderer, RendererHandle, ShaderListener,
    TextureHandle,
};
pub use shader::{compile_asset, LinkedShader, ShaderProgramLoader};
pub use surface::{NullSurface, OverlaySurface, PngSnapshotSurface};
pub use wgpu_backend::WgpuBackend;
