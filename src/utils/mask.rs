//! Segmentation mask post-processing
//!
//! Maps a `[1, 1, H, W]` model output back through the letterbox transform
//! onto the original photo and turns it into an alpha matte.

use crate::error::{CompositorError, Result};
use crate::utils::preprocessing::LetterboxGeometry;
use image::{DynamicImage, ImageBuffer, RgbaImage};
use ndarray::Array4;

/// Per-pixel foreground probability of the original photo (0-255)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentationMask {
    pub data: Vec<u8>,
    pub dimensions: (u32, u32),
}

impl SegmentationMask {
    #[must_use]
    pub fn new(data: Vec<u8>, dimensions: (u32, u32)) -> Self {
        Self { data, dimensions }
    }

    /// Map a model output tensor onto the original image coordinates
    pub fn from_tensor(
        tensor: &Array4<f32>,
        original_dimensions: (u32, u32),
        geometry: &LetterboxGeometry,
    ) -> Result<Self> {
        let shape = tensor.shape();
        if shape.first() != Some(&1) || shape.get(1) != Some(&1) {
            return Err(CompositorError::matting(format!(
                "Invalid output tensor shape {:?}, expected [1, 1, H, W]",
                shape
            )));
        }

        let (orig_width, orig_height) = original_dimensions;
        let mut data = Vec::with_capacity(orig_width as usize * orig_height as usize);

        for y in 0..orig_height {
            for x in 0..orig_width {
                let value = Self::tensor_value_at(tensor, x, y, geometry);
                #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
                data.push((value.clamp(0.0, 1.0) * 255.0) as u8);
            }
        }

        Ok(Self::new(data, original_dimensions))
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn tensor_value_at(tensor: &Array4<f32>, x: u32, y: u32, geometry: &LetterboxGeometry) -> f32 {
        let scaled_x = (x as f32 * geometry.scale).round() as usize;
        let scaled_y = (y as f32 * geometry.scale).round() as usize;

        tensor
            .get([
                0,
                0,
                scaled_y + geometry.offset_y as usize,
                scaled_x + geometry.offset_x as usize,
            ])
            .copied()
            .unwrap_or(0.0)
    }

    /// Use the mask as the alpha channel of `image`
    ///
    /// Pixels with a zero mask value become fully transparent black.
    pub fn apply_to_image(&self, image: &DynamicImage) -> Result<RgbaImage> {
        let rgba_image = image.to_rgba8();
        if rgba_image.dimensions() != self.dimensions {
            return Err(CompositorError::matting(format!(
                "Mask is {}x{} but image is {}x{}",
                self.dimensions.0,
                self.dimensions.1,
                rgba_image.width(),
                rgba_image.height()
            )));
        }

        let width = rgba_image.width();
        let result = ImageBuffer::from_fn(rgba_image.width(), rgba_image.height(), |x, y| {
            let pixel = rgba_image.get_pixel(x, y);
            let alpha = self
                .data
                .get((y * width + x) as usize)
                .copied()
                .unwrap_or(0);
            if alpha > 0 {
                image::Rgba([pixel[0], pixel[1], pixel[2], alpha])
            } else {
                image::Rgba([0, 0, 0, 0])
            }
        });

        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn test_mask_from_tensor_maps_letterbox() {
        // 4x2 photo into an 8x8 input: scale 2, content rows 2..6
        let geometry = LetterboxGeometry::fit((4, 2), 8).unwrap();
        assert_eq!(geometry.offset_y, 2);

        let mut tensor = Array4::<f32>::zeros((1, 1, 8, 8));
        for x in 0..8 {
            tensor[[0, 0, 2, x]] = 1.0;
        }

        let mask = SegmentationMask::from_tensor(&tensor, (4, 2), &geometry).unwrap();
        assert_eq!(mask.data, vec![255, 255, 255, 255, 0, 0, 0, 0]);
    }

    #[test]
    fn test_invalid_tensor_shape() {
        let geometry = LetterboxGeometry::fit((4, 4), 4).unwrap();
        let tensor = Array4::<f32>::zeros((1, 3, 4, 4));
        assert!(SegmentationMask::from_tensor(&tensor, (4, 4), &geometry).is_err());
    }

    #[test]
    fn test_apply_to_image() {
        let image = DynamicImage::ImageRgba8(RgbaImage::from_pixel(2, 1, Rgba([9, 8, 7, 255])));
        let mask = SegmentationMask::new(vec![128, 0], (2, 1));

        let cutout = mask.apply_to_image(&image).unwrap();
        assert_eq!(cutout.get_pixel(0, 0), &Rgba([9, 8, 7, 128]));
        assert_eq!(cutout.get_pixel(1, 0), &Rgba([0, 0, 0, 0]));

        let wrong = SegmentationMask::new(vec![0; 4], (2, 2));
        assert!(wrong.apply_to_image(&image).is_err());
    }
}
