//! Enhancement stage
//!
//! Post-compositing sharpness and colour boost. Both operations are the
//! usual "enhancer" formulation: build a degenerate version of the image and
//! extrapolate away from it by a factor, so 1.0 is the identity.
//!
//! - sharpness: degenerate = 3×3 smooth (`[1 1 1; 1 5 1; 1 1 1] / 13`),
//!   border pixels copied unchanged
//! - colour: degenerate = ITU-R 601 luma greyscale
//!
//! Alpha is never modified.

use crate::config::EnhancementConfig;
use image::{Rgba, RgbaImage};

/// Sharpness then saturation, as configured
#[must_use]
pub fn enhance(image: &RgbaImage, config: &EnhancementConfig) -> RgbaImage {
    if !config.enabled {
        return image.clone();
    }
    let sharpened = sharpen(image, config.sharpness);
    saturate(&sharpened, config.saturation)
}

/// Sharpen by `factor` over baseline (1.0 = unchanged)
#[must_use]
pub fn sharpen(image: &RgbaImage, factor: f32) -> RgbaImage {
    let smoothed = smooth(image);
    let mut output = image.clone();
    for (out, degenerate) in output.pixels_mut().zip(smoothed.pixels()) {
        for channel in 0..3 {
            out[channel] = blend_channel(degenerate[channel], out[channel], factor);
        }
    }
    output
}

/// Scale colour saturation by `factor` (1.0 = unchanged, 0.0 = greyscale)
#[must_use]
pub fn saturate(image: &RgbaImage, factor: f32) -> RgbaImage {
    let mut output = image.clone();
    for pixel in output.pixels_mut() {
        let grey = luma(pixel);
        for channel in 0..3 {
            pixel[channel] = blend_channel(grey, pixel[channel], factor);
        }
    }
    output
}

fn smooth(image: &RgbaImage) -> RgbaImage {
    const KERNEL: [[u32; 3]; 3] = [[1, 1, 1], [1, 5, 1], [1, 1, 1]];
    const DIVISOR: u32 = 13;

    let (width, height) = image.dimensions();
    let mut output = image.clone();
    if width < 3 || height < 3 {
        return output;
    }

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let mut sums = [0u32; 3];
            for (ky, row) in KERNEL.iter().enumerate() {
                for (kx, weight) in row.iter().enumerate() {
                    #[allow(clippy::cast_possible_truncation)]
                    let source = image.get_pixel(x + kx as u32 - 1, y + ky as u32 - 1);
                    for (sum, value) in sums.iter_mut().zip(source.0.iter()) {
                        *sum += weight * u32::from(*value);
                    }
                }
            }
            let alpha = image.get_pixel(x, y)[3];
            #[allow(clippy::cast_possible_truncation)]
            let smoothed = sums.map(|sum| ((sum + DIVISOR / 2) / DIVISOR) as u8);
            output.put_pixel(x, y, Rgba([smoothed[0], smoothed[1], smoothed[2], alpha]));
        }
    }

    output
}

#[allow(clippy::cast_possible_truncation)]
fn luma(pixel: &Rgba<u8>) -> u8 {
    let weighted = 299 * u32::from(pixel[0]) + 587 * u32::from(pixel[1]) + 114 * u32::from(pixel[2]);
    ((weighted + 500) / 1000) as u8
}

/// `degenerate + factor * (original - degenerate)`, clamped to u8
#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn blend_channel(degenerate: u8, original: u8, factor: f32) -> u8 {
    let degenerate = f32::from(degenerate);
    let value = degenerate + factor * (f32::from(original) - degenerate);
    value.clamp(0.0, 255.0) as u8
}
