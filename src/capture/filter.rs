//! Per-pixel color filters applied between transform and handoff.

use super::frame::MagnifiedFrame;
use crate::config::ColorFilterMode;

// Rec. 709 luma weights
const LUMA_R: f32 = 0.2126;
const LUMA_G: f32 = 0.7152;
const LUMA_B: f32 = 0.0722;

/// Apply `mode` to `frame` in place. Dimensions, format and alpha are kept.
pub fn apply_filter(mut frame: MagnifiedFrame, mode: ColorFilterMode) -> MagnifiedFrame {
    match mode {
        ColorFilterMode::Normal => {},
        ColorFilterMode::Inverse => {
            for px in frame.image_mut().pixels_mut() {
                px[0] = 255 - px[0];
                px[1] = 255 - px[1];
                px[2] = 255 - px[2];
            }
        },
        ColorFilterMode::Monochrome => {
            for px in frame.image_mut().pixels_mut() {
                let y = luma(px[0], px[1], px[2]);
                px[0] = y;
                px[1] = y;
                px[2] = y;
            }
        },
    }
    frame
}

#[inline]
fn luma(r: u8, g: u8, b: u8) -> u8 {
    let y = LUMA_R * r as f32 + LUMA_G * g as f32 + LUMA_B * b as f32;
    y.round().clamp(0.0, 255.0) as u8
}
