//! Dedicated render thread.
//!
//! The GPU backend is built inside the thread by a factory closure, so
//! device, textures and programs never cross threads. The loop sleeps on
//! the redraw signal and runs one `draw_cycle` per wakeup.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use super::renderer::{DrawOutcome, GpuBackend, Renderer, RendererHandle};
use super::shader::ShaderProgramLoader;
use super::surface::OverlaySurface;
use crate::error::{MagnifierError, MagnifierResult};

/// Builds the backend on the render thread.
pub type BackendFactory = Box<dyn FnOnce() -> MagnifierResult<Box<dyn GpuBackend>> + Send>;

/// Wakeup interval while idle, so shutdown is noticed without a request.
const IDLE_WAIT: Duration = Duration::from_millis(250);

#[derive(Default)]
struct RenderCounters {
    drawn: AtomicU64,
    skipped: AtomicU64,
}

/// Owns the `magnifier-render` thread.
pub struct RenderThread {
    handle: RendererHandle,
    counters: Arc<RenderCounters>,
    thread: Option<JoinHandle<()>>,
}

impl RenderThread {
    /// Start the thread and wait until the backend and fallback program are
    /// ready. Backend failures are returned here.
    pub fn spawn(
        factory: BackendFactory,
        loader: ShaderProgramLoader,
        surface: Box<dyn OverlaySurface>,
        handle: RendererHandle,
    ) -> MagnifierResult<Self> {
        let (ready_tx, ready_rx) = crossbeam_channel::bounded::<MagnifierResult<()>>(1);
        let counters = Arc::new(RenderCounters::default());
        let thread_counters = Arc::clone(&counters);
        let thread_handle = handle.clone();

        let thread = std::thread::Builder::new()
            .name("magnifier-render".to_string())
            .spawn(move || {
                let renderer = factory()
                    .and_then(|backend| Renderer::new(backend, loader, &thread_handle, surface));
                let mut renderer = match renderer {
                    Ok(renderer) => {
                        let _ = ready_tx.send(Ok(()));
                        renderer
                    },
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    },
                };
                render_loop(&mut renderer, &thread_handle, &thread_counters);
                renderer.release();
                log::info!("[RENDERER] Render loop exiting");
            })
            .map_err(|e| MagnifierError::GpuError(format!("Failed to spawn render thread: {}", e)))?;

        let ready = ready_rx
            .recv()
            .unwrap_or_else(|_| Err(MagnifierError::GpuError("render thread exited during setup".into())));
        if let Err(e) = ready {
            let _ = thread.join();
            return Err(e);
        }

        log::info!("[RENDERER] Render thread started");
        Ok(Self {
            handle,
            counters,
            thread: Some(thread),
        })
    }

    pub fn handle(&self) -> &RendererHandle {
        &self.handle
    }

    pub fn frames_drawn(&self) -> u64 {
        self.counters.drawn.load(Ordering::SeqCst)
    }

    pub fn cycles_skipped(&self) -> u64 {
        self.counters.skipped.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        self.thread.as_ref().is_some_and(|t| !t.is_finished())
    }

    /// Stop the loop and wait for GPU teardown. Idempotent.
    pub fn shutdown(&mut self) {
        self.handle.shutdown();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                log::error!("[RENDERER] Render thread panicked");
            }
            // Frames submitted after the loop exited.
            self.handle.shared().slot().clear();
            log::info!(
                "[RENDERER] Render thread stopped ({} drawn, {} skipped)",
                self.frames_drawn(),
                self.cycles_skipped()
            );
        }
    }
}

impl Drop for RenderThread {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn render_loop(renderer: &mut Renderer, handle: &RendererHandle, counters: &RenderCounters) {
    use super::handoff::Wake;

    loop {
        match handle.shared().signal().wait(IDLE_WAIT) {
            Wake::Shutdown => break,
            Wake::Timeout => continue,
            Wake::Redraw => match renderer.draw_cycle() {
                DrawOutcome::Drawn => {
                    counters.drawn.fetch_add(1, Ordering::SeqCst);
                },
                DrawOutcome::Skipped => {
                    counters.skipped.fetch_add(1, Ordering::SeqCst);
                },
                DrawOutcome::Cleared => {},
            },
        }
    }
}
