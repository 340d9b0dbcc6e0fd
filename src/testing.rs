//! Test doubles for the GPU backend, capture provider and overlay surface.

use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::{Rgba, RgbaImage};
use parking_lot::Mutex;

use crate::capture::{
    CaptureProvider, CaptureStream, CapturedFrame, FrameEvent, FrameSink, MagnifiedFrame,
    SessionToken,
};
use crate::config::Shape;
use crate::error::{MagnifierError, MagnifierResult};
use crate::rendering::{
    BackendFactory, DrawCall, Geometry, GpuBackend, LinkedShader, OverlaySurface, ProgramHandle,
    TextureHandle,
};
use crate::session::SharedBackendFactory;

/// Poll `cond` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(2));
    }
    cond()
}

// ============================================================================
// GPU backend
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum BackendEvent {
    CreateProgram(String, ProgramHandle),
    ReleaseProgram(ProgramHandle),
    UploadGeometry(Shape, u32),
    UploadFrame { sequence: u64, texture: u64 },
    Draw(DrawCall),
    Clear,
    Present,
    Release,
}

#[derive(Default)]
pub struct BackendState {
    pub events: Vec<BackendEvent>,
    pub live_programs: HashSet<ProgramHandle>,
    /// Shader ids whose program creation fails.
    pub reject_programs: HashSet<String>,
    /// Number of upcoming draws that fail.
    pub failing_draws: u32,
    pub fail_geometry: bool,
    pub released: bool,
    next_id: u64,
    last_frame: Option<RgbaImage>,
}

impl BackendState {
    pub fn draws(&self) -> Vec<DrawCall> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::Draw(call) => Some(*call),
                _ => None,
            })
            .collect()
    }

    pub fn uploaded_sequences(&self) -> Vec<u64> {
        self.events
            .iter()
            .filter_map(|e| match e {
                BackendEvent::UploadFrame { sequence, .. } => Some(*sequence),
                _ => None,
            })
            .collect()
    }

    pub fn program_for(&self, shader_id: &str) -> Option<ProgramHandle> {
        self.events.iter().rev().find_map(|e| match e {
            BackendEvent::CreateProgram(id, handle) if id == shader_id => Some(*handle),
            _ => None,
        })
    }
}

/// `GpuBackend` that records calls instead of touching a GPU.
pub struct RecordingBackend {
    state: Arc<Mutex<BackendState>>,
}

impl RecordingBackend {
    pub fn new() -> (Self, Arc<Mutex<BackendState>>) {
        let state = Arc::new(Mutex::new(BackendState::default()));
        (
            Self {
                state: Arc::clone(&state),
            },
            state,
        )
    }

    pub fn boxed() -> (Box<dyn GpuBackend>, Arc<Mutex<BackendState>>) {
        let (backend, state) = Self::new();
        (Box::new(backend), state)
    }

    /// Factory building a backend that records into `state`, for use on
    /// the render thread.
    pub fn factory(state: &Arc<Mutex<BackendState>>) -> BackendFactory {
        let state = Arc::clone(state);
        Box::new(move || -> MagnifierResult<Box<dyn GpuBackend>> { Ok(Self::with_state(state)) })
    }

    /// Reusable factory for sessions, one backend per start.
    pub fn shared_factory(state: &Arc<Mutex<BackendState>>) -> SharedBackendFactory {
        let state = Arc::clone(state);
        Arc::new(move || -> MagnifierResult<Box<dyn GpuBackend>> {
            Ok(Self::with_state(Arc::clone(&state)))
        })
    }

    pub fn with_state(state: Arc<Mutex<BackendState>>) -> Box<dyn GpuBackend> {
        Box::new(Self { state })
    }
}

impl GpuBackend for RecordingBackend {
    fn create_program(&mut self, shader: &LinkedShader) -> MagnifierResult<ProgramHandle> {
        let mut state = self.state.lock();
        if state.reject_programs.contains(&shader.id) {
            return Err(MagnifierError::ShaderLink(format!("{} rejected", shader.id)));
        }
        state.next_id += 1;
        let handle = ProgramHandle(state.next_id);
        state.live_programs.insert(handle);
        state
            .events
            .push(BackendEvent::CreateProgram(shader.id.clone(), handle));
        Ok(handle)
    }

    fn release_program(&mut self, program: ProgramHandle) {
        let mut state = self.state.lock();
        state.live_programs.remove(&program);
        state.events.push(BackendEvent::ReleaseProgram(program));
    }

    fn upload_geometry(&mut self, geometry: &Geometry) -> MagnifierResult<()> {
        let mut state = self.state.lock();
        if state.fail_geometry {
            return Err(MagnifierError::GpuError("geometry upload failed".into()));
        }
        state.events.push(BackendEvent::UploadGeometry(
            geometry.shape(),
            geometry.vertex_count(),
        ));
        Ok(())
    }

    fn upload_frame(
        &mut self,
        texture: Option<TextureHandle>,
        frame: &MagnifiedFrame,
    ) -> MagnifierResult<TextureHandle> {
        let mut state = self.state.lock();
        let texture = match texture {
            Some(t) if (t.width, t.height) == (frame.width(), frame.height()) => t,
            _ => {
                state.next_id += 1;
                TextureHandle {
                    id: state.next_id,
                    width: frame.width(),
                    height: frame.height(),
                }
            },
        };
        state.events.push(BackendEvent::UploadFrame {
            sequence: frame.sequence(),
            texture: texture.id,
        });
        state.last_frame = Some(frame.image().clone());
        Ok(texture)
    }

    fn draw(&mut self, call: &DrawCall) -> MagnifierResult<()> {
        let mut state = self.state.lock();
        if state.failing_draws > 0 {
            state.failing_draws -= 1;
            return Err(MagnifierError::GpuDraw("injected failure".into()));
        }
        state.events.push(BackendEvent::Draw(*call));
        Ok(())
    }

    fn clear(&mut self) -> MagnifierResult<()> {
        let mut state = self.state.lock();
        state.last_frame = None;
        state.events.push(BackendEvent::Clear);
        Ok(())
    }

    fn present(&mut self, surface: &mut dyn OverlaySurface) -> MagnifierResult<()> {
        let image = {
            let mut state = self.state.lock();
            state.events.push(BackendEvent::Present);
            state.last_frame.clone()
        };
        match image {
            Some(image) => surface.present(&image),
            None => Ok(()),
        }
    }

    fn release(&mut self) {
        let mut state = self.state.lock();
        if !state.released {
            state.released = true;
            state.events.push(BackendEvent::Release);
        }
    }
}

// ============================================================================
// Overlay surface
// ============================================================================

#[derive(Default)]
pub struct SurfaceLog {
    pub presented: Vec<RgbaImage>,
    pub hides: u32,
    pub visible: bool,
}

/// `OverlaySurface` that keeps every presented frame.
pub struct RecordingSurface {
    log: Arc<Mutex<SurfaceLog>>,
}

impl RecordingSurface {
    pub fn boxed() -> (Box<dyn OverlaySurface>, Arc<Mutex<SurfaceLog>>) {
        let log = Arc::new(Mutex::new(SurfaceLog::default()));
        (Self::with_log(Arc::clone(&log)), log)
    }

    pub fn with_log(log: Arc<Mutex<SurfaceLog>>) -> Box<dyn OverlaySurface> {
        Box::new(Self { log })
    }
}

impl OverlaySurface for RecordingSurface {
    fn present(&mut self, frame: &RgbaImage) -> MagnifierResult<()> {
        let mut log = self.log.lock();
        log.presented.push(frame.clone());
        log.visible = true;
        Ok(())
    }

    fn hide(&mut self) {
        let mut log = self.log.lock();
        log.hides += 1;
        log.visible = false;
    }
}

// ============================================================================
// Capture
// ============================================================================

/// Solid color of scripted frames.
pub const SCRIPTED_COLOR: [u8; 4] = [10, 20, 30, 255];

enum ScriptStep {
    Frame,
    Revoke(String),
}

/// `CaptureProvider` replaying a script of frames and revocations.
///
/// Accepts `Primary`, `Monitor(0)` and monitors added with `with_monitor`;
/// everything else is unavailable.
pub struct ScriptedProvider {
    size: (u32, u32),
    monitors: Vec<(u32, (u32, u32))>,
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    released: Arc<AtomicBool>,
}

impl ScriptedProvider {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            size: (width, height),
            monitors: Vec::new(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            released: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Another display sharing the same frame script.
    pub fn with_monitor(mut self, id: u32, width: u32, height: u32) -> Self {
        self.monitors.push((id, (width, height)));
        self
    }

    pub fn with_frames(self, count: usize) -> Self {
        self.push_frames(count);
        self
    }

    pub fn push_frames(&self, count: usize) {
        let mut script = self.script.lock();
        for _ in 0..count {
            script.push_back(ScriptStep::Frame);
        }
    }

    pub fn push_revocation(&self, reason: &str) {
        self.script
            .lock()
            .push_back(ScriptStep::Revoke(reason.to_string()));
    }

    pub fn was_released(&self) -> bool {
        self.released.load(Ordering::SeqCst)
    }
}

impl CaptureProvider for ScriptedProvider {
    fn open(&self, token: &SessionToken) -> MagnifierResult<Box<dyn CaptureStream>> {
        let size = match token {
            SessionToken::Primary | SessionToken::Monitor(0) => self.size,
            SessionToken::Monitor(id) => match self.monitors.iter().find(|(m, _)| m == id) {
                Some((_, size)) => *size,
                None => {
                    return Err(MagnifierError::SessionUnavailable(format!(
                        "no display for {}",
                        token
                    )))
                },
            },
        };
        self.released.store(false, Ordering::SeqCst);
        Ok(Box::new(ScriptedStream {
            size,
            script: Arc::clone(&self.script),
            released: Arc::clone(&self.released),
        }))
    }
}

struct ScriptedStream {
    size: (u32, u32),
    script: Arc<Mutex<VecDeque<ScriptStep>>>,
    released: Arc<AtomicBool>,
}

impl CaptureStream for ScriptedStream {
    fn screen_size(&self) -> (u32, u32) {
        self.size
    }

    fn next_frame(&mut self, timeout: Duration) -> FrameEvent {
        let step = self.script.lock().pop_front();
        match step {
            Some(ScriptStep::Frame) => FrameEvent::Frame(CapturedFrame::from_rgba_image(
                RgbaImage::from_pixel(self.size.0, self.size.1, Rgba(SCRIPTED_COLOR)),
            )),
            Some(ScriptStep::Revoke(reason)) => FrameEvent::Revoked(reason),
            None => {
                std::thread::sleep(timeout.min(Duration::from_millis(5)));
                FrameEvent::Idle
            },
        }
    }

    fn release(&mut self) {
        self.released.store(true, Ordering::SeqCst);
    }
}

/// `FrameSink` that keeps everything it receives.
#[derive(Default)]
pub struct CollectingSink {
    frames: Mutex<Vec<MagnifiedFrame>>,
}

impl CollectingSink {
    pub fn len(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn take_all(&self) -> Vec<MagnifiedFrame> {
        std::mem::take(&mut *self.frames.lock())
    }
}

impl FrameSink for CollectingSink {
    fn submit(&self, frame: MagnifiedFrame) -> bool {
        self.frames.lock().push(frame);
        false
    }
}
