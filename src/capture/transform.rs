//! Crop-and-scale from a full captured frame to a magnified frame.
//!
//! The crop is a square of side `output / zoom` centered on the region of
//! interest. Each edge is clamped to the frame on its own, so near a screen
//! edge the crop shrinks and the scale stretches it back to a square output.

use image::imageops::{self, FilterType};
use image::RgbaImage;

use super::frame::{CapturedFrame, CropRect, MagnifiedFrame, PixelFormat};
use crate::config::CaptureParams;
use crate::error::{MagnifierError, MagnifierResult};

/// Crop side length before clamping: `trunc(output / zoom)`.
pub fn crop_side(output_size: u32, zoom: f32) -> MagnifierResult<i64> {
    if !zoom.is_finite() || zoom <= 0.0 {
        return Err(MagnifierError::invalid_region(format!(
            "zoom factor {} is not positive",
            zoom
        )));
    }
    if output_size == 0 {
        return Err(MagnifierError::invalid_region("output size is 0"));
    }
    let side = (output_size as f64 / zoom as f64).trunc();
    // Float-to-int casts saturate; cap well inside i64 so edge math cannot overflow.
    let side = side.min(i32::MAX as f64) as i64;
    if side <= 0 {
        return Err(MagnifierError::invalid_region(format!(
            "crop side is 0 for output {} at zoom {}",
            output_size, zoom
        )));
    }
    Ok(side)
}

/// Compute the clamped crop rectangle for a frame of `frame_width x frame_height`.
pub fn compute_crop(
    frame_width: u32,
    frame_height: u32,
    region_position: (i32, i32),
    region_size: u32,
    output_size: u32,
    zoom: f32,
) -> MagnifierResult<CropRect> {
    if region_size == 0 {
        return Err(MagnifierError::invalid_region("region size is 0"));
    }
    let side = crop_side(output_size, zoom)?;

    let half_region = region_size as i64 / 2;
    let center_x = region_position.0 as i64 + half_region;
    let center_y = region_position.1 as i64 + half_region;

    let left = center_x - side / 2;
    let top = center_y - side / 2;
    let right = left + side;
    let bottom = top + side;

    let w = frame_width as i64;
    let h = frame_height as i64;
    let rect = CropRect {
        left: left.clamp(0, w) as i32,
        top: top.clamp(0, h) as i32,
        right: right.clamp(0, w) as i32,
        bottom: bottom.clamp(0, h) as i32,
    };

    if rect.width() <= 0 || rect.height() <= 0 {
        return Err(MagnifierError::invalid_region(format!(
            "crop {}x{} at ({}, {}) lies outside the {}x{} frame",
            rect.width(),
            rect.height(),
            left,
            top,
            frame_width,
            frame_height
        )));
    }
    Ok(rect)
}

/// Copy the crop rectangle out of the frame as tightly packed RGBA.
fn copy_region(frame: &CapturedFrame, rect: CropRect) -> MagnifierResult<RgbaImage> {
    let width = rect.width() as u32;
    let height = rect.height() as u32;
    let bpp = PixelFormat::BYTES_PER_PIXEL;
    let start = rect.left as usize * bpp;
    let end = rect.right as usize * bpp;

    let mut buf = Vec::with_capacity(width as usize * height as usize * bpp);
    for y in rect.top as u32..rect.bottom as u32 {
        let src = &frame.row(y)[start..end];
        match frame.format() {
            PixelFormat::Rgba8 => buf.extend_from_slice(src),
            PixelFormat::Bgra8 => {
                for px in src.chunks_exact(bpp) {
                    buf.extend_from_slice(&PixelFormat::Bgra8.to_rgba(px));
                }
            },
        }
    }

    RgbaImage::from_raw(width, height, buf)
        .ok_or_else(|| MagnifierError::Other("Crop buffer size mismatch".to_string()))
}

/// Crop the region of interest out of `frame` and scale it to
/// `output_size x output_size` with bilinear filtering.
///
/// `frame` is not modified. The intermediate crop buffer is dropped before
/// returning.
pub fn transform(
    frame: &CapturedFrame,
    region_position: (i32, i32),
    region_size: u32,
    output_size: u32,
    zoom: f32,
) -> MagnifierResult<MagnifiedFrame> {
    let rect = compute_crop(
        frame.width(),
        frame.height(),
        region_position,
        region_size,
        output_size,
        zoom,
    )?;

    let cropped = copy_region(frame, rect)?;
    let scaled = if cropped.dimensions() == (output_size, output_size) {
        cropped
    } else {
        let scaled = imageops::resize(&cropped, output_size, output_size, FilterType::Triangle);
        drop(cropped);
        scaled
    };

    Ok(MagnifiedFrame::new(scaled, rect))
}

/// `transform` driven by a config snapshot.
pub fn transform_with(frame: &CapturedFrame, params: &CaptureParams) -> MagnifierResult<MagnifiedFrame> {
    transform(
        frame,
        (params.region_x, params.region_y),
        params.region_size,
        params.output_size,
        params.zoom_factor,
    )
}
