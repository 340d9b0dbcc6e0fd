//! Renderer policy and the GPU backend seam.
//!
//! `Renderer` lives on the render thread and owns everything GPU-side
//! through a `GpuBackend`. Other threads talk to it through a
//! `RendererHandle`, which only records pending changes and wakes the
//! render thread.
//!
//! Each `draw_cycle` runs in a fixed order:
//! 1. apply pending shape, shader and blank requests
//! 2. take the pending frame (if any) and upload it
//! 3. draw with the current program, geometry and texture, then present
//!
//! Changes submitted before a cycle starts are therefore always visible
//! in that cycle's draw.

use std::sync::Arc;

use parking_lot::Mutex;

use super::geometry::{Geometry, Topology};
use super::handoff::{FrameSlot, RedrawSignal};
use super::shader::{LinkedShader, ShaderProgramLoader};
use super::surface::OverlaySurface;
use crate::capture::{FrameSink, MagnifiedFrame};
use crate::config::Shape;
use crate::error::MagnifierResult;

/// Log cadence for repeated draw failures.
const LOG_EVERY_N_FAILURES: u64 = 60;

/// Told the loaded shader id after every shader request the render thread
/// applies, whether it succeeded or not. `None` is the fallback program.
pub type ShaderListener = Box<dyn Fn(Option<&str>) + Send + Sync>;

/// Backend-issued program id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProgramHandle(pub u64);

/// Backend-issued texture id with its dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureHandle {
    pub id: u64,
    pub width: u32,
    pub height: u32,
}

/// Everything one draw needs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub program: ProgramHandle,
    pub texture: TextureHandle,
    pub shape: Shape,
    pub topology: Topology,
    pub vertex_count: u32,
    /// Value of the `texture_size` uniform.
    pub texture_size: (u32, u32),
    /// Value of the `output_size` uniform.
    pub output_size: (u32, u32),
}

/// GPU API behind the renderer. Implementations are created on, and only
/// used from, the render thread.
pub trait GpuBackend {
    /// Build a GPU program from a linked shader. Fails with `ShaderLink` or
    /// `GpuError`, leaving no GPU objects behind.
    fn create_program(&mut self, shader: &LinkedShader) -> MagnifierResult<ProgramHandle>;

    /// Free a program created by `create_program`.
    fn release_program(&mut self, program: ProgramHandle);

    /// Replace the vertex data used by subsequent draws.
    fn upload_geometry(&mut self, geometry: &Geometry) -> MagnifierResult<()>;

    /// Upload `frame`, reusing `texture` when its size matches.
    fn upload_frame(
        &mut self,
        texture: Option<TextureHandle>,
        frame: &MagnifiedFrame,
    ) -> MagnifierResult<TextureHandle>;

    /// Issue the draw. Failures are `GpuDraw` and leave the backend usable.
    fn draw(&mut self, call: &DrawCall) -> MagnifierResult<()>;

    /// Clear the render target.
    fn clear(&mut self) -> MagnifierResult<()>;

    /// Hand the last rendered image to `surface`.
    fn present(&mut self, surface: &mut dyn OverlaySurface) -> MagnifierResult<()>;

    /// Free every GPU resource. Safe to call more than once.
    fn release(&mut self);
}

/// Result of one `draw_cycle`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawOutcome {
    /// A frame was drawn and presented.
    Drawn,
    /// Output was blanked and nothing new arrived.
    Cleared,
    /// Nothing to draw, or the draw failed and will be retried.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum ShaderRequest {
    Load(String),
    Fallback,
}

#[derive(Debug, Default)]
struct PendingChanges {
    shape: Option<Shape>,
    shader: Option<ShaderRequest>,
    blank: bool,
}

/// State shared between `RendererHandle`s and the render thread.
#[derive(Default)]
pub struct RendererShared {
    slot: FrameSlot,
    signal: RedrawSignal,
    pending: Mutex<PendingChanges>,
    loaded_shader: Mutex<Option<String>>,
    shader_listener: Mutex<Option<ShaderListener>>,
}

impl RendererShared {
    pub fn slot(&self) -> &FrameSlot {
        &self.slot
    }

    pub fn signal(&self) -> &RedrawSignal {
        &self.signal
    }

    fn publish_shader(&self, id: Option<&str>) {
        *self.loaded_shader.lock() = id.map(str::to_string);
        if let Some(listener) = self.shader_listener.lock().as_ref() {
            listener(id);
        }
    }
}

/// Cross-thread control of a renderer.
#[derive(Clone, Default)]
pub struct RendererHandle {
    shared: Arc<RendererShared>,
}

impl RendererHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(&self) -> &Arc<RendererShared> {
        &self.shared
    }

    /// Switch geometry before the next draw.
    pub fn set_shape(&self, shape: Shape) {
        self.shared.pending.lock().shape = Some(shape);
        self.shared.signal.request();
    }

    /// Load shader `id` on the render thread before the next draw; `None`
    /// reverts to the passthrough program.
    pub fn set_shader(&self, id: Option<&str>) {
        let request = match id.map(str::trim) {
            Some(id) if !id.is_empty() => ShaderRequest::Load(id.to_string()),
            _ => ShaderRequest::Fallback,
        };
        self.shared.pending.lock().shader = Some(request);
        self.shared.signal.request();
    }

    /// Shader id the renderer last reported as loaded.
    pub fn loaded_shader(&self) -> Option<String> {
        self.shared.loaded_shader.lock().clone()
    }

    pub fn on_shader_change(&self, listener: ShaderListener) {
        *self.shared.shader_listener.lock() = Some(listener);
    }

    /// Hand off a frame; returns `true` if it replaced an undelivered one.
    pub fn submit_frame(&self, frame: MagnifiedFrame) -> bool {
        let replaced = self.shared.slot.put(frame);
        self.shared.signal.request();
        replaced.is_some()
    }

    /// Drop any pending frame and clear the output.
    pub fn blank(&self) {
        self.shared.slot.clear();
        self.shared.pending.lock().blank = true;
        self.shared.signal.request();
    }

    pub fn request_redraw(&self) {
        self.shared.signal.request();
    }

    /// End the render loop; the renderer releases its GPU resources on the
    /// way out.
    pub fn shutdown(&self) {
        self.shared.signal.shutdown();
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.signal.is_shutdown()
    }

    pub fn superseded_count(&self) -> u64 {
        self.shared.slot.superseded_count()
    }
}

impl FrameSink for RendererHandle {
    fn submit(&self, frame: MagnifiedFrame) -> bool {
        self.submit_frame(frame)
    }
}

struct ActiveProgram {
    handle: ProgramHandle,
    /// `None` while the fallback program is active.
    shader_id: Option<String>,
}

/// Render-thread side of the magnifier output.
pub struct Renderer {
    backend: Box<dyn GpuBackend>,
    loader: ShaderProgramLoader,
    shared: Arc<RendererShared>,
    surface: Box<dyn OverlaySurface>,
    fallback: ProgramHandle,
    active: ActiveProgram,
    geometry: Geometry,
    texture: Option<TextureHandle>,
    has_content: bool,
    failed_draws: u64,
    released: bool,
}

impl Renderer {
    /// Compile the fallback program and upload the initial (square)
    /// geometry. Fails only if the backend cannot do either.
    pub fn new(
        mut backend: Box<dyn GpuBackend>,
        loader: ShaderProgramLoader,
        handle: &RendererHandle,
        surface: Box<dyn OverlaySurface>,
    ) -> MagnifierResult<Self> {
        let fallback_shader = ShaderProgramLoader::fallback()?;
        let fallback = backend.create_program(&fallback_shader)?;

        let geometry = Geometry::for_shape(Shape::Square);
        if let Err(e) = backend.upload_geometry(&geometry) {
            backend.release_program(fallback);
            backend.release();
            return Err(e);
        }
        log::info!("[RENDERER] Ready with fallback program {:?}", fallback);

        Ok(Self {
            backend,
            loader,
            shared: Arc::clone(handle.shared()),
            surface,
            fallback,
            active: ActiveProgram {
                handle: fallback,
                shader_id: None,
            },
            geometry,
            texture: None,
            has_content: false,
            failed_draws: 0,
            released: false,
        })
    }

    /// Id of the active shader asset; `None` for the fallback.
    pub fn active_shader(&self) -> Option<&str> {
        self.active.shader_id.as_deref()
    }

    pub fn program(&self) -> ProgramHandle {
        self.active.handle
    }

    pub fn fallback_program(&self) -> ProgramHandle {
        self.fallback
    }

    pub fn geometry(&self) -> &Geometry {
        &self.geometry
    }

    /// Dimensions of the frame currently on the GPU.
    pub fn frame_size(&self) -> Option<(u32, u32)> {
        self.texture
            .filter(|_| self.has_content)
            .map(|t| (t.width, t.height))
    }

    pub fn failed_draws(&self) -> u64 {
        self.failed_draws
    }

    fn apply_shape(&mut self, shape: Shape) {
        if shape == self.geometry.shape() {
            return;
        }
        let geometry = Geometry::for_shape(shape);
        match self.backend.upload_geometry(&geometry) {
            Ok(()) => {
                log::debug!(
                    "[RENDERER] Geometry {:?}: {} vertices",
                    shape,
                    geometry.vertex_count()
                );
                self.geometry = geometry;
            },
            Err(e) => log::warn!("[RENDERER] Keeping {:?} geometry: {}", self.geometry.shape(), e),
        }
    }

    fn apply_shader(&mut self, request: ShaderRequest) {
        let id = match request {
            ShaderRequest::Fallback => {
                self.activate(self.fallback, None);
                log::info!("[SHADER] Reverted to fallback program");
                return;
            },
            ShaderRequest::Load(id) => id,
        };

        let created = self
            .loader
            .load(&id)
            .and_then(|linked| self.backend.create_program(&linked).map(|h| (linked.id, h)));
        match created {
            Ok((linked_id, handle)) => self.activate(handle, Some(linked_id)),
            Err(e) => {
                log::warn!(
                    "[SHADER] Failed to load '{}', keeping '{}': {}",
                    id,
                    self.active_shader().unwrap_or("passthrough"),
                    e
                );
                self.shared.publish_shader(self.active.shader_id.as_deref());
            },
        }
    }

    fn activate(&mut self, handle: ProgramHandle, shader_id: Option<String>) {
        let previous = std::mem::replace(&mut self.active, ActiveProgram { handle, shader_id });
        if previous.handle != self.fallback && previous.handle != handle {
            self.backend.release_program(previous.handle);
        }
        self.shared.publish_shader(self.active.shader_id.as_deref());
    }

    /// Run one cycle: apply pending changes, upload the newest frame, draw.
    pub fn draw_cycle(&mut self) -> DrawOutcome {
        if self.released {
            return DrawOutcome::Skipped;
        }

        let changes = std::mem::take(&mut *self.shared.pending.lock());
        if let Some(shape) = changes.shape {
            self.apply_shape(shape);
        }
        if let Some(request) = changes.shader {
            self.apply_shader(request);
        }

        let mut cleared = false;
        if changes.blank {
            if let Err(e) = self.backend.clear() {
                log::warn!("[RENDERER] Clear failed: {}", e);
            }
            self.surface.hide();
            self.has_content = false;
            cleared = true;
        }

        if let Some(frame) = self.shared.slot.take() {
            match self.backend.upload_frame(self.texture, &frame) {
                Ok(texture) => {
                    self.texture = Some(texture);
                    self.has_content = true;
                },
                Err(e) => {
                    log::warn!("[RENDERER] Frame {} upload failed: {}", frame.sequence(), e);
                    return DrawOutcome::Skipped;
                },
            }
        }

        let texture = match self.texture {
            Some(texture) if self.has_content => texture,
            _ => {
                return if cleared {
                    DrawOutcome::Cleared
                } else {
                    DrawOutcome::Skipped
                };
            },
        };

        let call = DrawCall {
            program: self.active.handle,
            texture,
            shape: self.geometry.shape(),
            topology: self.geometry.topology(),
            vertex_count: self.geometry.vertex_count(),
            texture_size: (texture.width, texture.height),
            output_size: (texture.width, texture.height),
        };

        let result = self
            .backend
            .draw(&call)
            .and_then(|()| self.backend.present(self.surface.as_mut()));
        match result {
            Ok(()) => DrawOutcome::Drawn,
            Err(e) => {
                self.failed_draws += 1;
                if self.failed_draws == 1 || self.failed_draws % LOG_EVERY_N_FAILURES == 0 {
                    log::warn!(
                        "[RENDERER] Draw failed ({} total), retrying next frame: {}",
                        self.failed_draws,
                        e
                    );
                }
                DrawOutcome::Skipped
            },
        }
    }

    /// Free the pending frame and all GPU resources. Idempotent.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.shared.slot.clear();
        self.texture = None;
        self.has_content = false;
        if self.active.handle != self.fallback {
            self.backend.release_program(self.active.handle);
        }
        self.backend.release_program(self.fallback);
        self.backend.release();
        self.surface.hide();
        log::info!("[RENDERER] Released GPU resources");
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        self.release();
    }
}
