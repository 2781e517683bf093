//! Composition engine
//!
//! Scales a cutout uniformly to the requested width or height, centers it
//! on a copy of the template canvas and alpha-composites it there.

use crate::error::{CompositorError, Result};
use crate::types::{CompositionRequest, SizingInstruction, SizingMode};
use image::imageops::{self, FilterType};
use image::RgbaImage;

/// Target size of a `(width, height)` cutout under `sizing`
///
/// The requested side is taken as is, the other side follows the aspect
/// ratio and is rounded to the nearest pixel (never below 1).
///
/// # Errors
/// `InvalidCutout` when either cutout side is 0.
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
pub fn scaled_dimensions(cutout: (u32, u32), sizing: SizingInstruction) -> Result<(u32, u32)> {
    let (ow, oh) = cutout;
    if ow == 0 || oh == 0 {
        return Err(CompositorError::InvalidCutout {
            width: ow,
            height: oh,
        });
    }

    let dimension = sizing.dimension.get();
    let follow = |num: u32, den: u32| -> u32 {
        let exact = f64::from(num) * f64::from(dimension) / f64::from(den);
        exact.round().clamp(1.0, f64::from(u32::MAX)) as u32
    };

    Ok(match sizing.mode {
        SizingMode::ByWidth => (dimension, follow(oh, ow)),
        SizingMode::ByHeight => (follow(ow, oh), dimension),
    })
}

/// Side limit of [`compose`], matching the default dimension limit
pub const DEFAULT_MAX_SCALED_SIDE: u32 = 8192;

/// Top-left position that centers `placed` on `canvas` (floor division)
///
/// Negative values mean the cutout overhangs the canvas and is clipped.
#[must_use]
pub fn center_offset(canvas: (u32, u32), placed: (u32, u32)) -> (i64, i64) {
    let x = (i64::from(canvas.0) - i64::from(placed.0)).div_euclid(2);
    let y = (i64::from(canvas.1) - i64::from(placed.1)).div_euclid(2);
    (x, y)
}

/// Composite `cutout` centered on a fresh copy of `canvas`
///
/// The cutout is always resampled (Lanczos3), even when the size is
/// unchanged. Canvas pixels outside the cutout footprint are untouched.
///
/// # Examples
/// ```rust
/// use bgremove_compositor::compose::compose;
/// use bgremove_compositor::{SizingInstruction, SizingMode};
/// use image::{Rgba, RgbaImage};
/// use std::num::NonZeroU32;
///
/// let cutout = RgbaImage::from_pixel(20, 10, Rgba([255, 0, 0, 255]));
/// let canvas = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
/// let sizing = SizingInstruction::new(SizingMode::ByWidth, NonZeroU32::new(40).unwrap());
///
/// let composite = compose(&cutout, &canvas, sizing)?;
/// assert_eq!(composite.dimensions(), (100, 100));
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn compose(
    cutout: &RgbaImage,
    canvas: &RgbaImage,
    sizing: SizingInstruction,
) -> Result<RgbaImage> {
    compose_within(cutout, canvas, sizing, DEFAULT_MAX_SCALED_SIDE)
}

/// [`compose`] with an explicit limit on either side of the scaled cutout
///
/// The derived side can grow far beyond the requested one for very thin
/// cutouts; anything above `max_side` fails with `CutoutTooLarge` before
/// the resize allocates.
pub fn compose_within(
    cutout: &RgbaImage,
    canvas: &RgbaImage,
    sizing: SizingInstruction,
    max_side: u32,
) -> Result<RgbaImage> {
    let (new_width, new_height) = scaled_dimensions(cutout.dimensions(), sizing)?;
    if new_width > max_side || new_height > max_side {
        return Err(CompositorError::CutoutTooLarge {
            width: new_width,
            height: new_height,
            max: max_side,
        });
    }
    let resized = imageops::resize(cutout, new_width, new_height, FilterType::Lanczos3);

    let (x, y) = center_offset(canvas.dimensions(), (new_width, new_height));
    let mut composite = canvas.clone();
    imageops::overlay(&mut composite, &resized, x, y);

    Ok(composite)
}

/// [`compose`] over a bundled request
pub fn compose_request(request: &CompositionRequest) -> Result<RgbaImage> {
    compose(&request.cutout, &request.canvas, request.sizing)
}
