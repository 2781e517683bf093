//! Model input preprocessing
//!
//! Turns a decoded photo into the normalized NCHW tensor a salient-object
//! segmentation model expects: RGB conversion, aspect-preserving resize into
//! a square canvas, center padding, per-channel normalization.

use crate::error::{CompositorError, Result};
use image::{DynamicImage, ImageBuffer, RgbImage};
use ndarray::Array4;

/// Model input geometry and normalization constants
#[derive(Debug, Clone, PartialEq)]
pub struct PreprocessingConfig {
    /// Side of the square model input
    pub target_size: u32,
    pub normalization_mean: [f32; 3],
    pub normalization_std: [f32; 3],
}

impl PreprocessingConfig {
    /// ImageNet statistics used by ISNet-style models
    #[must_use]
    pub fn imagenet(target_size: u32) -> Self {
        Self {
            target_size,
            normalization_mean: [0.485, 0.456, 0.406],
            normalization_std: [0.229, 0.224, 0.225],
        }
    }
}

impl Default for PreprocessingConfig {
    fn default() -> Self {
        Self::imagenet(1024)
    }
}

/// Padding color for the letterbox area (RGB)
#[derive(Debug, Clone)]
pub struct PreprocessingOptions {
    pub padding_color: [u8; 3],
}

impl Default for PreprocessingOptions {
    fn default() -> Self {
        Self {
            padding_color: [255, 255, 255],
        }
    }
}

/// Scale and placement of the original image inside the square model input
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxGeometry {
    pub scale: f32,
    pub scaled_width: u32,
    pub scaled_height: u32,
    pub offset_x: u32,
    pub offset_y: u32,
}

impl LetterboxGeometry {
    /// Geometry of fitting `(width, height)` into a `target_size` square
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn fit(original_dimensions: (u32, u32), target_size: u32) -> Result<Self> {
        let (orig_width, orig_height) = original_dimensions;
        if orig_width == 0 || orig_height == 0 || target_size == 0 {
            return Err(CompositorError::matting(format!(
                "Cannot preprocess a {}x{} image into a {}px model input",
                orig_width, orig_height, target_size
            )));
        }

        let target_size_f32 = target_size as f32;
        let scale = (target_size_f32 / orig_width as f32).min(target_size_f32 / orig_height as f32);

        let scaled_width = ((orig_width as f32 * scale).round() as u32).clamp(1, target_size);
        let scaled_height = ((orig_height as f32 * scale).round() as u32).clamp(1, target_size);

        Ok(Self {
            scale,
            scaled_width,
            scaled_height,
            offset_x: (target_size - scaled_width) / 2,
            offset_y: (target_size - scaled_height) / 2,
        })
    }
}

/// Image preprocessing for model inference
pub struct ImagePreprocessor;

impl ImagePreprocessor {
    /// Preprocess an image into a `[1, 3, target, target]` tensor
    ///
    /// Returns the tensor together with the letterbox geometry needed to map
    /// the model output back onto the original pixels.
    pub fn preprocess_image(
        image: &DynamicImage,
        config: &PreprocessingConfig,
        options: &PreprocessingOptions,
    ) -> Result<(Array4<f32>, LetterboxGeometry)> {
        let target_size = config.target_size;
        let rgb_image = image.to_rgb8();
        let geometry = LetterboxGeometry::fit(rgb_image.dimensions(), target_size)?;

        let resized = image::imageops::resize(
            &rgb_image,
            geometry.scaled_width,
            geometry.scaled_height,
            image::imageops::FilterType::Triangle,
        );

        let padding = options.padding_color;
        let mut canvas = ImageBuffer::from_pixel(target_size, target_size, image::Rgb(padding));
        image::imageops::replace(
            &mut canvas,
            &resized,
            i64::from(geometry.offset_x),
            i64::from(geometry.offset_y),
        );

        let side = usize::try_from(target_size).map_err(|_| {
            CompositorError::internal("Target size too large for tensor allocation")
        })?;

        Ok((Self::canvas_to_tensor(&canvas, config, side), geometry))
    }

    /// Convert canvas to normalized tensor
    fn canvas_to_tensor(canvas: &RgbImage, config: &PreprocessingConfig, side: usize) -> Array4<f32> {
        let mut tensor = Array4::<f32>::zeros((1, 3, side, side));

        #[allow(clippy::indexing_slicing)]
        // Tensor dimensions match the canvas
        for (y, row) in canvas.rows().enumerate() {
            for (x, pixel) in row.enumerate() {
                for channel in 0..3 {
                    tensor[[0, channel, y, x]] = (f32::from(pixel[channel]) / 255.0
                        - config.normalization_mean[channel])
                        / config.normalization_std[channel];
                }
            }
        }

        tensor
    }
}
