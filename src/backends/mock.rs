//! Model-free matting backend
//!
//! Keys out every pixel close to the average colour of the four image
//! corners. Good enough for studio shots on a plain backdrop, and fully
//! deterministic, which makes it the backend of choice for tests and dry
//! runs without a model file.

use crate::error::{CompositorError, Result};
use crate::matting::BackgroundRemover;
use crate::services::ImageIOService;
use image::{Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Default per-channel distance under which a pixel counts as background
pub const DEFAULT_TOLERANCE: u8 = 24;

/// Corner-colour keying remover
#[derive(Debug)]
pub struct MockRemover {
    tolerance: u8,
    should_fail: bool,
    calls: AtomicUsize,
}

impl MockRemover {
    #[must_use]
    pub fn new() -> Self {
        Self::with_tolerance(DEFAULT_TOLERANCE)
    }

    #[must_use]
    pub fn with_tolerance(tolerance: u8) -> Self {
        Self {
            tolerance,
            should_fail: false,
            calls: AtomicUsize::new(0),
        }
    }

    /// Remover that rejects every photo with `MattingFailed`
    #[must_use]
    pub fn new_failing() -> Self {
        Self {
            should_fail: true,
            ..Self::new()
        }
    }

    /// Number of `remove_background` calls so far
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn backdrop_colour(image: &RgbaImage) -> [u8; 3] {
        let (w, h) = image.dimensions();
        let corners = [(0, 0), (w - 1, 0), (0, h - 1), (w - 1, h - 1)];
        let mut sums = [0u32; 3];
        for (x, y) in corners {
            let pixel = image.get_pixel(x, y);
            for (sum, channel) in sums.iter_mut().zip(pixel.0.iter()) {
                *sum += u32::from(*channel);
            }
        }
        #[allow(clippy::cast_possible_truncation)]
        sums.map(|sum| (sum / 4) as u8)
    }
}

impl Default for MockRemover {
    fn default() -> Self {
        Self::new()
    }
}

impl BackgroundRemover for MockRemover {
    fn remove_background(&self, raw_image: &[u8]) -> Result<RgbaImage> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        if self.should_fail {
            return Err(CompositorError::matting("Mock remover configured to fail"));
        }

        let mut image = ImageIOService::load_from_bytes(raw_image)
            .map_err(|e| CompositorError::matting(format!("Cannot decode photo: {}", e)))?
            .to_rgba8();

        if image.width() == 0 || image.height() == 0 {
            return Ok(image);
        }

        let backdrop = Self::backdrop_colour(&image);
        for pixel in image.pixels_mut() {
            let is_backdrop = pixel
                .0
                .iter()
                .zip(backdrop.iter())
                .all(|(channel, reference)| channel.abs_diff(*reference) <= self.tolerance);
            if is_backdrop {
                *pixel = Rgba([0, 0, 0, 0]);
            }
        }

        Ok(image)
    }

    fn name(&self) -> &str {
        "mock"
    }
}
