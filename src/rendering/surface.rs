//! Overlay surface seam: where rendered frames end up.
//!
//! How a window is floated above other applications is outside this crate;
//! the renderer only needs to hand over pixels and to hide the output.

use std::path::PathBuf;

use image::RgbaImage;

use crate::error::MagnifierResult;

/// Presentation target for rendered frames. Owned by the render thread.
pub trait OverlaySurface: Send {
    /// Show `frame` (output-size RGBA).
    fn present(&mut self, frame: &RgbaImage) -> MagnifierResult<()>;

    /// Stop showing anything until the next `present`.
    fn hide(&mut self);
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSurface;

impl OverlaySurface for NullSurface {
    fn present(&mut self, _frame: &RgbaImage) -> MagnifierResult<()> {
        Ok(())
    }

    fn hide(&mut self) {}
}

/// Writes every presented frame to one PNG file, replacing the previous
/// one. Hiding deletes the file so stale output never lingers, unless the
/// surface was built with `keep_last_frame`.
#[derive(Debug)]
pub struct PngSnapshotSurface {
    path: PathBuf,
    presented: u64,
    keep_on_hide: bool,
}

impl PngSnapshotSurface {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            presented: 0,
            keep_on_hide: false,
        }
    }

    /// Leave the last frame on disk when hidden.
    pub fn keep_last_frame(mut self) -> Self {
        self.keep_on_hide = true;
        self
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }
}

impl OverlaySurface for PngSnapshotSurface {
    fn present(&mut self, frame: &RgbaImage) -> MagnifierResult<()> {
        // Write beside the target, then rename, so readers never see half a PNG.
        let tmp = self.path.with_extension("png.tmp");
        frame.save_with_format(&tmp, image::ImageFormat::Png)?;
        std::fs::rename(&tmp, &self.path)?;
        self.presented += 1;
        if self.presented == 1 {
            log::info!("[RENDERER] First frame written to {}", self.path.display());
        }
        Ok(())
    }

    fn hide(&mut self) {
        if self.keep_on_hide {
            return;
        }
        match std::fs::remove_file(&self.path) {
            Ok(()) => log::debug!("[RENDERER] Snapshot {} removed", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
            Err(e) => log::warn!("[RENDERER] Failed to remove {}: {}", self.path.display(), e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn snapshot_written_and_hidden() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.png");
        let mut surface = PngSnapshotSurface::new(&path);

        surface
            .present(&RgbaImage::from_pixel(4, 4, Rgba([1, 2, 3, 255])))
            .unwrap();
        surface
            .present(&RgbaImage::from_pixel(4, 4, Rgba([9, 8, 7, 255])))
            .unwrap();
        assert_eq!(surface.presented(), 2);

        let written = image::open(&path).unwrap().to_rgba8();
        assert_eq!(written.get_pixel(0, 0), &Rgba([9, 8, 7, 255]));

        surface.hide();
        assert!(!path.exists());
        // Hiding twice is harmless
        surface.hide();
    }

    #[test]
    fn kept_snapshot_survives_hide() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kept.png");
        let mut surface = PngSnapshotSurface::new(&path).keep_last_frame();

        surface
            .present(&RgbaImage::from_pixel(2, 2, Rgba([5, 5, 5, 255])))
            .unwrap();
        surface.hide();
        assert!(path.exists());
    }
}
