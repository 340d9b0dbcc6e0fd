//! Frame types moving through the capture pipeline.

use image::RgbaImage;

use crate::error::{MagnifierError, MagnifierResult};

/// Byte order of a captured pixel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormat {
    Rgba8,
    Bgra8,
}

impl PixelFormat {
    pub const BYTES_PER_PIXEL: usize = 4;

    /// Read one pixel as RGBA.
    #[inline]
    pub fn to_rgba(self, px: &[u8]) -> [u8; 4] {
        match self {
            PixelFormat::Rgba8 => [px[0], px[1], px[2], px[3]],
            PixelFormat::Bgra8 => [px[2], px[1], px[0], px[3]],
        }
    }
}

/// Raw frame as delivered by the platform capture source.
///
/// Lives for one capture callback and is never shared across threads.
/// Rows may carry trailing padding: `stride >= width * 4`.
#[derive(Debug, Clone)]
pub struct CapturedFrame {
    width: u32,
    height: u32,
    stride: usize,
    format: PixelFormat,
    data: Vec<u8>,
}

impl CapturedFrame {
    pub fn new(
        width: u32,
        height: u32,
        stride: usize,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> MagnifierResult<Self> {
        let row_bytes = width as usize * PixelFormat::BYTES_PER_PIXEL;
        if stride < row_bytes {
            return Err(MagnifierError::Other(format!(
                "Frame stride {} is smaller than row size {}",
                stride, row_bytes
            )));
        }
        // Last row may omit its padding.
        let required = if height == 0 {
            0
        } else {
            stride * (height as usize - 1) + row_bytes
        };
        if data.len() < required {
            return Err(MagnifierError::Other(format!(
                "Frame buffer too small: {} bytes for {}x{} (stride {})",
                data.len(),
                width,
                height,
                stride
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            format,
            data,
        })
    }

    /// Wrap a tightly packed RGBA image without copying.
    pub fn from_rgba_image(image: RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            stride: width as usize * PixelFormat::BYTES_PER_PIXEL,
            format: PixelFormat::Rgba8,
            data: image.into_raw(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Bytes of row `y`, padding excluded.
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize * PixelFormat::BYTES_PER_PIXEL]
    }

    /// Pixel at (x, y) as RGBA.
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = x as usize * PixelFormat::BYTES_PER_PIXEL;
        self.format.to_rgba(&self.row(y)[offset..offset + 4])
    }
}

/// Source rectangle of a magnified frame, in captured-frame pixels.
/// `right` and `bottom` are exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CropRect {
    pub left: i32,
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
}

impl CropRect {
    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }

    pub fn center(&self) -> (i32, i32) {
        ((self.left + self.right) / 2, (self.top + self.bottom) / 2)
    }
}

/// Magnified, filtered frame ready for the renderer.
///
/// Always `output_size x output_size`. Ownership moves from the capture
/// thread to the render thread through the handoff slot.
#[derive(Debug, Clone)]
pub struct MagnifiedFrame {
    image: RgbaImage,
    crop: CropRect,
    sequence: u64,
}

impl MagnifiedFrame {
    pub fn new(image: RgbaImage, crop: CropRect) -> Self {
        Self {
            image,
            crop,
            sequence: 0,
        }
    }

    /// Tag the frame with its capture order.
    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn crop(&self) -> CropRect {
        self.crop
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn image_mut(&mut self) -> &mut RgbaImage {
        &mut self.image
    }

    pub fn into_image(self) -> RgbaImage {
        self.image
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_buffers() {
        assert!(CapturedFrame::new(4, 4, 16, PixelFormat::Rgba8, vec![0; 63]).is_err());
        assert!(CapturedFrame::new(4, 4, 12, PixelFormat::Rgba8, vec![0; 64]).is_err());
        assert!(CapturedFrame::new(4, 4, 16, PixelFormat::Rgba8, vec![0; 64]).is_ok());
    }

    #[test]
    fn last_row_padding_is_optional() {
        // 2x2 frame with 4 bytes of padding per row, last row unpadded
        let frame = CapturedFrame::new(2, 2, 12, PixelFormat::Rgba8, vec![0; 20]);
        assert!(frame.is_ok());
    }

    #[test]
    fn bgra_pixels_are_swizzled() {
        let mut data = vec![0u8; 2 * 12];
        data[12..16].copy_from_slice(&[10, 20, 30, 255]);
        let frame = CapturedFrame::new(2, 2, 12, PixelFormat::Bgra8, data).unwrap();
        assert_eq!(frame.pixel(0, 1), [30, 20, 10, 255]);
        assert_eq!(frame.row(1).len(), 8);
    }

    #[test]
    fn crop_rect_geometry() {
        let rect = CropRect {
            left: 375,
            top: 375,
            right: 625,
            bottom: 625,
        };
        assert_eq!(rect.width(), 250);
        assert_eq!(rect.center(), (500, 500));
    }
}
