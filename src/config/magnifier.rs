//! Live magnifier state shared between the UI, capture and render threads.
//!
//! Writers replace individual scalar fields through `SharedConfig` setters.
//! Readers take a copy at frame start, so a frame may see a region update
//! without the zoom update that accompanied it. One frame of slightly stale
//! geometry is the accepted worst case.

use std::str::FromStr;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::settings::MagnifierSettings;
use crate::error::{MagnifierError, MagnifierResult};

/// Shape of the capture region and the magnified output.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum Shape {
    #[default]
    Square,
    Circle,
}

impl FromStr for Shape {
    type Err = MagnifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "square" => Ok(Shape::Square),
            "circle" => Ok(Shape::Circle),
            other => Err(MagnifierError::config("shape", format!("unknown shape '{}'", other))),
        }
    }
}

/// Color filter applied to each magnified frame before it is rendered.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum ColorFilterMode {
    #[default]
    Normal,
    Inverse,
    Monochrome,
}

impl FromStr for ColorFilterMode {
    type Err = MagnifierError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "normal" | "none" => Ok(ColorFilterMode::Normal),
            "inverse" | "invert" => Ok(ColorFilterMode::Inverse),
            "monochrome" | "grayscale" => Ok(ColorFilterMode::Monochrome),
            other => Err(MagnifierError::config(
                "colorFilter",
                format!("unknown filter '{}'", other),
            )),
        }
    }
}

/// In-session magnifier configuration.
///
/// Created with defaults at session start, screen size filled in once the
/// capture surface is known, everything else taken from user settings.
#[derive(Debug, Clone, PartialEq)]
pub struct MagnifierConfig {
    pub shape: Shape,
    /// Top-left of the capture region in screen pixels. May be negative
    /// while the region is dragged past an edge.
    pub region_x: i32,
    pub region_y: i32,
    /// Side length (square) or diameter (circle) of the capture region.
    pub region_size: u32,
    /// Side length of the magnified output window.
    pub output_size: u32,
    pub zoom_factor: f32,
    pub min_zoom: f32,
    pub max_zoom: f32,
    pub zoom_step: f32,
    pub color_filter: ColorFilterMode,
    /// Currently loaded shader asset, `None` for the passthrough program.
    pub active_shader: Option<String>,
    pub screen_width: u32,
    pub screen_height: u32,
}

impl Default for MagnifierConfig {
    fn default() -> Self {
        Self {
            shape: Shape::Square,
            region_x: 0,
            region_y: 0,
            region_size: 0,
            output_size: 0,
            zoom_factor: 1.0,
            min_zoom: 1.0,
            max_zoom: 10.0,
            zoom_step: 0.5,
            color_filter: ColorFilterMode::Normal,
            active_shader: None,
            screen_width: 0,
            screen_height: 0,
        }
    }
}

impl MagnifierConfig {
    /// Build a session config from user settings, rejecting invalid ones.
    pub fn from_settings(settings: &MagnifierSettings) -> MagnifierResult<Self> {
        settings.validate()?;
        let mut config = Self {
            shape: settings.shape,
            region_x: settings.region_x,
            region_y: settings.region_y,
            region_size: settings.region_size,
            output_size: settings.output_size,
            zoom_factor: settings.zoom,
            min_zoom: settings.min_zoom,
            max_zoom: settings.max_zoom,
            zoom_step: settings.zoom_step,
            color_filter: settings.color_filter,
            active_shader: settings.shader.as_id().map(str::to_string),
            screen_width: 0,
            screen_height: 0,
        };
        config.zoom_factor = config.clamp_zoom(config.zoom_factor);
        Ok(config)
    }

    /// Clamp a zoom value into `[min_zoom, max_zoom]`.
    pub fn clamp_zoom(&self, zoom: f32) -> f32 {
        zoom.clamp(self.min_zoom, self.max_zoom)
    }

    /// The subset of fields the capture thread reads per frame.
    pub fn capture_params(&self) -> CaptureParams {
        CaptureParams {
            region_x: self.region_x,
            region_y: self.region_y,
            region_size: self.region_size,
            output_size: self.output_size,
            zoom_factor: self.zoom_factor,
            color_filter: self.color_filter,
        }
    }
}

/// Per-frame snapshot used by the capture thread. `Copy`, so taking it
/// under the read lock never allocates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CaptureParams {
    pub region_x: i32,
    pub region_y: i32,
    pub region_size: u32,
    pub output_size: u32,
    pub zoom_factor: f32,
    pub color_filter: ColorFilterMode,
}

/// Shared handle to the session configuration.
///
/// The session owns the only writer; capture and UI code hold clones for
/// reading. Setters replace single fields, so no compare-and-swap is needed.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<MagnifierConfig>>,
}

impl SharedConfig {
    pub fn new(config: MagnifierConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    pub fn from_settings(settings: &MagnifierSettings) -> MagnifierResult<Self> {
        MagnifierConfig::from_settings(settings).map(Self::new)
    }

    /// Copy of the whole record.
    pub fn snapshot(&self) -> MagnifierConfig {
        self.inner.read().clone()
    }

    /// Copy of the per-frame capture fields.
    pub fn capture_params(&self) -> CaptureParams {
        self.inner.read().capture_params()
    }

    pub fn shape(&self) -> Shape {
        self.inner.read().shape
    }

    pub fn zoom(&self) -> f32 {
        self.inner.read().zoom_factor
    }

    pub fn screen_size(&self) -> (u32, u32) {
        let config = self.inner.read();
        (config.screen_width, config.screen_height)
    }

    pub fn active_shader(&self) -> Option<String> {
        self.inner.read().active_shader.clone()
    }

    pub fn set_shape(&self, shape: Shape) {
        log::debug!("[CONFIG] set_shape({:?})", shape);
        self.inner.write().shape = shape;
    }

    pub fn set_region_position(&self, x: i32, y: i32) {
        let mut config = self.inner.write();
        config.region_x = x;
        config.region_y = y;
    }

    /// Apply a drag delta to the region position.
    pub fn move_region(&self, dx: i32, dy: i32) -> (i32, i32) {
        let mut config = self.inner.write();
        config.region_x = config.region_x.saturating_add(dx);
        config.region_y = config.region_y.saturating_add(dy);
        (config.region_x, config.region_y)
    }

    pub fn set_region_size(&self, size: u32) -> MagnifierResult<()> {
        if size == 0 {
            return Err(MagnifierError::config("regionSize", "must be greater than 0"));
        }
        log::debug!("[CONFIG] set_region_size({})", size);
        self.inner.write().region_size = size;
        Ok(())
    }

    pub fn set_output_size(&self, size: u32) -> MagnifierResult<()> {
        if size == 0 {
            return Err(MagnifierError::config("outputSize", "must be greater than 0"));
        }
        log::debug!("[CONFIG] set_output_size({})", size);
        self.inner.write().output_size = size;
        Ok(())
    }

    /// Set the zoom factor, clamped into the configured bounds.
    /// Returns the value actually stored. Non-finite input is ignored.
    pub fn set_zoom(&self, zoom: f32) -> f32 {
        let mut config = self.inner.write();
        if zoom.is_finite() {
            config.zoom_factor = config.clamp_zoom(zoom);
        } else {
            log::warn!("[CONFIG] Ignoring non-finite zoom {}", zoom);
        }
        config.zoom_factor
    }

    /// Increase zoom by the configured step.
    pub fn zoom_in(&self) -> f32 {
        let mut config = self.inner.write();
        config.zoom_factor = config.clamp_zoom(config.zoom_factor + config.zoom_step);
        config.zoom_factor
    }

    /// Decrease zoom by the configured step.
    pub fn zoom_out(&self) -> f32 {
        let mut config = self.inner.write();
        config.zoom_factor = config.clamp_zoom(config.zoom_factor - config.zoom_step);
        config.zoom_factor
    }

    /// Replace the zoom bounds and re-clamp the current zoom.
    pub fn set_zoom_bounds(&self, min_zoom: f32, max_zoom: f32) -> MagnifierResult<f32> {
        validate_zoom_bounds(min_zoom, max_zoom)?;
        let mut config = self.inner.write();
        config.min_zoom = min_zoom;
        config.max_zoom = max_zoom;
        config.zoom_factor = config.clamp_zoom(config.zoom_factor);
        Ok(config.zoom_factor)
    }

    pub fn set_color_filter(&self, mode: ColorFilterMode) {
        log::debug!("[CONFIG] set_color_filter({:?})", mode);
        self.inner.write().color_filter = mode;
    }

    pub fn set_active_shader(&self, shader: Option<String>) {
        self.inner.write().active_shader = shader;
    }

    /// Record the capture surface dimensions. They are fixed for the rest
    /// of the session: a second call with different values is ignored.
    pub fn set_screen_size(&self, width: u32, height: u32) -> bool {
        let mut config = self.inner.write();
        if config.screen_width == 0 && config.screen_height == 0 {
            config.screen_width = width;
            config.screen_height = height;
            log::info!("[CONFIG] Screen size {}x{}", width, height);
            true
        } else if (config.screen_width, config.screen_height) == (width, height) {
            true
        } else {
            log::warn!(
                "[CONFIG] Screen size already set to {}x{}, ignoring {}x{}",
                config.screen_width,
                config.screen_height,
                width,
                height
            );
            false
        }
    }

    /// Forget the capture surface dimensions so the next session can
    /// record its own.
    pub(crate) fn reset_screen_size(&self) {
        let mut config = self.inner.write();
        config.screen_width = 0;
        config.screen_height = 0;
    }
}

pub(crate) fn validate_zoom_bounds(min_zoom: f32, max_zoom: f32) -> MagnifierResult<()> {
    if !min_zoom.is_finite() || !max_zoom.is_finite() {
        return Err(MagnifierError::config("zoomBounds", "bounds must be finite"));
    }
    if min_zoom <= 0.0 {
        return Err(MagnifierError::config("minZoom", "must be greater than 0"));
    }
    if min_zoom >= max_zoom {
        return Err(MagnifierError::config(
            "zoomBounds",
            format!("minZoom {} must be below maxZoom {}", min_zoom, max_zoom),
        ));
    }
    Ok(())
}
