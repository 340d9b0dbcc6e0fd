//! Magnifier session: one capture engine, one render thread, one config.
//!
//! The session is the entry point for a UI. It owns the `SharedConfig`
//! written by setters, starts the render thread before capture so the
//! first frame has somewhere to go, and tears both down on `stop`.
//!
//! Shape and shader changes are forwarded to the renderer immediately;
//! region, zoom and filter changes are picked up by the capture thread at
//! the next frame. While rendering, `active_shader` in the config follows
//! what the render thread actually loaded.
//!
//! An out-of-band revocation takes the same path as `stop`: capture ends,
//! the overlay is blanked and the render thread releases its GPU resources.

use std::sync::Arc;

use crate::capture::{CaptureEngine, CaptureProvider, CaptureStats, FrameSink, SessionToken};
use crate::config::{ColorFilterMode, MagnifierConfig, MagnifierSettings, Shape, SharedConfig};
use crate::error::{MagnifierError, MagnifierResult};
use crate::rendering::{
    GpuBackend, NullSurface, OverlaySurface, RenderThread, RendererHandle, ShaderAssetStore,
    ShaderProgramLoader, WgpuBackend,
};

/// Builds a GPU backend for each session start. Runs on the render thread.
pub type SharedBackendFactory =
    Arc<dyn Fn() -> MagnifierResult<Box<dyn GpuBackend>> + Send + Sync>;

/// Builds the overlay surface for each session start.
pub type SurfaceFactory = Arc<dyn Fn() -> Box<dyn OverlaySurface> + Send + Sync>;

pub struct MagnifierSession {
    config: SharedConfig,
    provider: Arc<dyn CaptureProvider>,
    shaders: Arc<dyn ShaderAssetStore>,
    backend_factory: SharedBackendFactory,
    surface_factory: SurfaceFactory,
    engine: CaptureEngine,
    renderer: Option<RenderThread>,
}

impl MagnifierSession {
    /// Validate `settings` and build an idle session. Defaults to the wgpu
    /// backend and a surface that discards output.
    pub fn new(
        settings: &MagnifierSettings,
        provider: Arc<dyn CaptureProvider>,
        shaders: Arc<dyn ShaderAssetStore>,
    ) -> MagnifierResult<Self> {
        Ok(Self {
            config: SharedConfig::from_settings(settings)?,
            provider,
            shaders,
            backend_factory: Arc::new(|| {
                WgpuBackend::new().map(|backend| Box::new(backend) as Box<dyn GpuBackend>)
            }),
            surface_factory: Arc::new(|| Box::new(NullSurface) as Box<dyn OverlaySurface>),
            engine: CaptureEngine::new(),
            renderer: None,
        })
    }

    pub fn with_backend(mut self, factory: SharedBackendFactory) -> Self {
        self.backend_factory = factory;
        self
    }

    pub fn with_surface(mut self, factory: SurfaceFactory) -> Self {
        self.surface_factory = factory;
        self
    }

    pub fn with_engine(mut self, engine: CaptureEngine) -> Self {
        self.engine = engine;
        self
    }

    /// Start capturing `token` and rendering to the overlay.
    ///
    /// Returns the capture surface dimensions. Fails with
    /// `AlreadyCapturing`, `SessionUnavailable` or a GPU setup error, in
    /// which case nothing is left running.
    pub fn start(&mut self, token: &SessionToken) -> MagnifierResult<(u32, u32)> {
        if self.engine.is_capturing() {
            return Err(MagnifierError::AlreadyCapturing);
        }
        // A render thread left over from a revoked session.
        self.shutdown_renderer();
        self.config.reset_screen_size();

        let handle = RendererHandle::new();
        let loaded_config = self.config.clone();
        handle.on_shader_change(Box::new(move |id: Option<&str>| {
            loaded_config.set_active_shader(id.map(str::to_string));
        }));
        handle.set_shape(self.config.shape());
        handle.set_shader(self.config.active_shader().as_deref());

        let backend_factory = Arc::clone(&self.backend_factory);
        let mut renderer = RenderThread::spawn(
            Box::new(move || backend_factory()),
            ShaderProgramLoader::new(Arc::clone(&self.shaders)),
            (self.surface_factory)(),
            handle.clone(),
        )?;

        let revoked_handle = handle.clone();
        self.engine.set_revocation_listener(Box::new(move |reason| {
            log::warn!("[SESSION] Capture revoked ({}), releasing renderer", reason);
            revoked_handle.blank();
            revoked_handle.shutdown();
        }));

        let sink: Arc<dyn FrameSink> = Arc::new(handle);
        let screen_size =
            match self
                .engine
                .start(self.provider.as_ref(), token, self.config.clone(), sink)
            {
                Ok(size) => size,
                Err(e) => {
                    renderer.shutdown();
                    return Err(e);
                },
            };

        self.config.set_screen_size(screen_size.0, screen_size.1);
        self.renderer = Some(renderer);
        log::info!("[SESSION] Started on {}", token);
        Ok(screen_size)
    }

    /// Stop capture, then the render thread. Idempotent.
    pub fn stop(&mut self) {
        self.engine.stop();
        if self.shutdown_renderer() {
            log::info!("[SESSION] Stopped");
        }
    }

    fn shutdown_renderer(&mut self) -> bool {
        match self.renderer.take() {
            Some(mut renderer) => {
                renderer.shutdown();
                true
            },
            None => false,
        }
    }

    fn renderer_handle(&self) -> Option<&RendererHandle> {
        self.renderer.as_ref().map(RenderThread::handle)
    }

    pub fn set_shape(&self, shape: Shape) {
        self.config.set_shape(shape);
        if let Some(handle) = self.renderer_handle() {
            handle.set_shape(shape);
        }
    }

    /// Select shader asset `id`; `None` selects the passthrough program.
    /// A shader that fails to load leaves the current one in place, and
    /// the config keeps reporting it.
    ///
    /// Without a live renderer the id is stored for the next `start`.
    pub fn set_shader(&self, id: Option<&str>) {
        let id = id.map(str::trim).filter(|id| !id.is_empty());
        match self.renderer_handle() {
            Some(handle) if !handle.is_shut_down() => handle.set_shader(id),
            _ => self.config.set_active_shader(id.map(str::to_string)),
        }
    }

    pub fn set_region_position(&self, x: i32, y: i32) {
        self.config.set_region_position(x, y);
    }

    pub fn move_region(&self, dx: i32, dy: i32) -> (i32, i32) {
        self.config.move_region(dx, dy)
    }

    pub fn set_region_size(&self, size: u32) -> MagnifierResult<()> {
        self.config.set_region_size(size)
    }

    pub fn set_output_size(&self, size: u32) -> MagnifierResult<()> {
        self.config.set_output_size(size)
    }

    pub fn set_zoom(&self, zoom: f32) -> f32 {
        self.config.set_zoom(zoom)
    }

    pub fn zoom_in(&self) -> f32 {
        self.config.zoom_in()
    }

    pub fn zoom_out(&self) -> f32 {
        self.config.zoom_out()
    }

    pub fn set_zoom_bounds(&self, min_zoom: f32, max_zoom: f32) -> MagnifierResult<f32> {
        self.config.set_zoom_bounds(min_zoom, max_zoom)
    }

    pub fn set_color_filter(&self, mode: ColorFilterMode) {
        self.config.set_color_filter(mode);
    }

    pub fn is_capturing(&self) -> bool {
        self.engine.is_capturing()
    }

    pub fn current_zoom(&self) -> f32 {
        self.config.zoom()
    }

    pub fn current_shape(&self) -> Shape {
        self.config.shape()
    }

    pub fn config(&self) -> MagnifierConfig {
        self.config.snapshot()
    }

    pub fn capture_stats(&self) -> CaptureStats {
        self.engine.stats()
    }

    /// Frames drawn by the current render thread.
    pub fn frames_drawn(&self) -> u64 {
        self.renderer.as_ref().map_or(0, RenderThread::frames_drawn)
    }
}

impl Drop for MagnifierSession {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rendering::{BuiltinAssets, Topology};
    use crate::testing::{
        wait_until, BackendState, RecordingBackend, RecordingSurface, ScriptedProvider,
        SurfaceLog, SCRIPTED_COLOR,
    };
    use image::Rgba;
    use parking_lot::Mutex;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(3);

    struct Fixture {
        session: MagnifierSession,
        provider: Arc<ScriptedProvider>,
        backend: Arc<Mutex<BackendState>>,
        surface: Arc<Mutex<SurfaceLog>>,
    }

    fn settings() -> MagnifierSettings {
        MagnifierSettings {
            region_x: 40,
            region_y: 40,
            region_size: 20,
            output_size: 40,
            zoom: 2.0,
            ..Default::default()
        }
    }

    fn fixture(settings: MagnifierSettings) -> Fixture {
        let provider = Arc::new(ScriptedProvider::new(100, 100));
        let backend = Arc::new(Mutex::new(BackendState::default()));
        let surface = Arc::new(Mutex::new(SurfaceLog::default()));

        let surface_log = Arc::clone(&surface);
        let surface_factory: SurfaceFactory =
            Arc::new(move || RecordingSurface::with_log(Arc::clone(&surface_log)));

        let session = MagnifierSession::new(
            &settings,
            Arc::clone(&provider) as Arc<dyn CaptureProvider>,
            Arc::new(BuiltinAssets),
        )
        .unwrap()
        .with_backend(RecordingBackend::shared_factory(&backend))
        .with_surface(surface_factory)
        .with_engine(CaptureEngine::new().with_poll_timeout(Duration::from_millis(10)));

        Fixture {
            session,
            provider,
            backend,
            surface,
        }
    }

    #[test]
    fn invalid_settings_rejected() {
        let bad = MagnifierSettings {
            min_zoom: 5.0,
            max_zoom: 2.0,
            ..Default::default()
        };
        let result = MagnifierSession::new(
            &bad,
            Arc::new(ScriptedProvider::new(10, 10)),
            Arc::new(BuiltinAssets),
        );
        assert!(matches!(result, Err(MagnifierError::Config { .. })));
    }

    #[test]
    fn frames_reach_the_overlay() {
        let mut f = fixture(settings());
        f.provider.push_frames(3);

        assert_eq!(f.session.start(&SessionToken::Primary).unwrap(), (100, 100));
        assert!(f.session.is_capturing());
        assert_eq!(f.session.config().screen_width, 100);

        assert!(wait_until(WAIT, || !f.surface.lock().presented.is_empty()));
        {
            let surface = f.surface.lock();
            let image = surface.presented.last().unwrap();
            assert_eq!(image.dimensions(), (40, 40));
            assert_eq!(image.get_pixel(20, 20), &Rgba(SCRIPTED_COLOR));
        }
        assert!(f.backend.lock().program_for("2xbr").is_some());

        f.session.stop();
        assert!(!f.session.is_capturing());
        assert!(f.provider.was_released());
        let state = f.backend.lock();
        assert!(state.released);
        assert!(state.live_programs.is_empty());
    }

    #[test]
    fn second_start_is_rejected() {
        let mut f = fixture(settings());
        f.session.start(&SessionToken::Primary).unwrap();
        assert!(matches!(
            f.session.start(&SessionToken::Primary),
            Err(MagnifierError::AlreadyCapturing)
        ));
        f.session.stop();
    }

    #[test]
    fn unavailable_token_leaves_nothing_running() {
        let mut f = fixture(settings());
        let result = f.session.start(&SessionToken::Monitor(7));
        assert!(matches!(result, Err(MagnifierError::SessionUnavailable(_))));
        assert!(!f.session.is_capturing());
        assert!(f.backend.lock().released);
    }

    #[test]
    fn gpu_failure_is_reported_from_start() {
        let f = fixture(settings());
        let mut session =
            f.session
                .with_backend(Arc::new(|| -> MagnifierResult<Box<dyn GpuBackend>> {
                    Err(MagnifierError::GpuError("no adapter".into()))
                }));
        assert!(matches!(
            session.start(&SessionToken::Primary),
            Err(MagnifierError::GpuError(_))
        ));
        assert!(!session.is_capturing());
    }

    #[test]
    fn shape_change_reaches_renderer() {
        let mut f = fixture(settings());
        f.session.start(&SessionToken::Primary).unwrap();

        f.session.set_shape(Shape::Circle);
        f.provider.push_frames(2);
        assert!(wait_until(WAIT, || {
            f.backend
                .lock()
                .draws()
                .iter()
                .any(|call| call.topology == Topology::TriangleFan)
        }));
        assert_eq!(f.session.current_shape(), Shape::Circle);
        f.session.stop();
    }

    #[test]
    fn shader_selection_reaches_renderer() {
        let mut f = fixture(settings());
        f.session.start(&SessionToken::Primary).unwrap();

        f.session.set_shader(Some("scanlines"));
        f.provider.push_frames(1);
        assert!(wait_until(WAIT, || f.backend.lock().program_for("scanlines").is_some()));
        assert!(wait_until(WAIT, || {
            f.session.config().active_shader.as_deref() == Some("scanlines")
        }));

        f.session.set_shader(None);
        assert!(wait_until(WAIT, || f.session.config().active_shader.is_none()));
        f.session.stop();

        // Stored for the next start while stopped.
        f.session.set_shader(Some("sharp-bilinear"));
        assert_eq!(f.session.config().active_shader.as_deref(), Some("sharp-bilinear"));
    }

    #[test]
    fn failed_shader_load_keeps_reporting_loaded_shader() {
        let mut f = fixture(settings());
        f.provider.push_frames(1);
        f.session.start(&SessionToken::Primary).unwrap();
        assert!(wait_until(WAIT, || !f.backend.lock().draws().is_empty()));
        assert_eq!(f.session.config().active_shader.as_deref(), Some("2xbr"));

        f.session.set_shader(Some("does-not-exist"));
        let before = f.backend.lock().draws().len();
        f.provider.push_frames(1);
        assert!(wait_until(WAIT, || f.backend.lock().draws().len() > before));

        assert_eq!(f.session.config().active_shader.as_deref(), Some("2xbr"));
        let xbr = f.backend.lock().program_for("2xbr");
        assert_eq!(f.backend.lock().draws().last().map(|call| call.program), xbr);
        f.session.stop();
    }

    #[test]
    fn color_filter_applies_to_next_frames() {
        let mut f = fixture(settings());
        f.session.set_color_filter(ColorFilterMode::Inverse);
        f.provider.push_frames(2);
        f.session.start(&SessionToken::Primary).unwrap();

        assert!(wait_until(WAIT, || !f.surface.lock().presented.is_empty()));
        let expected = Rgba([
            255 - SCRIPTED_COLOR[0],
            255 - SCRIPTED_COLOR[1],
            255 - SCRIPTED_COLOR[2],
            SCRIPTED_COLOR[3],
        ]);
        assert_eq!(f.surface.lock().presented[0].get_pixel(0, 0), &expected);
        f.session.stop();
    }

    #[test]
    fn zoom_setters_clamp() {
        let f = fixture(settings());
        assert_eq!(f.session.set_zoom(100.0), 10.0);
        assert_eq!(f.session.zoom_out(), 9.5);
        assert_eq!(f.session.set_zoom(0.1), 1.5);
        assert_eq!(f.session.zoom_in(), 2.0);
        assert_eq!(f.session.set_zoom_bounds(3.0, 4.0).unwrap(), 3.0);
        assert!(f.session.set_zoom_bounds(4.0, 4.0).is_err());
        assert_eq!(f.session.current_zoom(), 3.0);
    }

    #[test]
    fn region_setters_update_config() {
        let f = fixture(settings());
        f.session.set_region_position(5, 6);
        assert_eq!(f.session.move_region(-10, 4), (-5, 10));
        f.session.set_region_size(64).unwrap();
        f.session.set_output_size(128).unwrap();
        assert!(f.session.set_region_size(0).is_err());

        let config = f.session.config();
        assert_eq!((config.region_x, config.region_y), (-5, 10));
        assert_eq!(config.region_size, 64);
        assert_eq!(config.output_size, 128);
    }

    #[test]
    fn revocation_releases_renderer_and_allows_restart() {
        let mut f = fixture(settings());
        f.provider.push_frames(1);
        f.session.start(&SessionToken::Primary).unwrap();
        assert!(wait_until(WAIT, || f.surface.lock().visible));

        f.provider.push_revocation("display disconnected");
        assert!(wait_until(WAIT, || !f.session.is_capturing()));
        assert!(wait_until(WAIT, || f.backend.lock().released));
        assert!(f.backend.lock().live_programs.is_empty());
        assert!(f.surface.lock().hides >= 1);
        assert!(!f.surface.lock().visible);
        assert!(f.provider.was_released());

        // Selections made while revoked wait for the restart.
        f.session.set_shader(Some("scanlines"));
        assert_eq!(f.session.config().active_shader.as_deref(), Some("scanlines"));

        f.provider.push_frames(1);
        f.session.start(&SessionToken::Primary).unwrap();
        assert!(f.session.is_capturing());
        assert!(wait_until(WAIT, || f.backend.lock().program_for("scanlines").is_some()));
        f.session.stop();
    }

    #[test]
    fn restart_on_another_monitor_reports_its_size() {
        let provider = Arc::new(ScriptedProvider::new(100, 100).with_monitor(2, 320, 200));
        let backend = Arc::new(Mutex::new(BackendState::default()));
        let mut session = MagnifierSession::new(
            &settings(),
            Arc::clone(&provider) as Arc<dyn CaptureProvider>,
            Arc::new(BuiltinAssets),
        )
        .unwrap()
        .with_backend(RecordingBackend::shared_factory(&backend))
        .with_engine(CaptureEngine::new().with_poll_timeout(Duration::from_millis(10)));

        assert_eq!(session.start(&SessionToken::Primary).unwrap(), (100, 100));
        session.stop();

        assert_eq!(session.start(&SessionToken::Monitor(2)).unwrap(), (320, 200));
        let config = session.config();
        assert_eq!((config.screen_width, config.screen_height), (320, 200));
        session.stop();
    }

    #[test]
    fn stop_is_idempotent() {
        let mut f = fixture(settings());
        f.session.stop();
        f.session.start(&SessionToken::Primary).unwrap();
        f.session.stop();
        f.session.stop();
        assert!(!f.session.is_capturing());
        assert_eq!(f.session.frames_drawn(), 0);
    }
}
