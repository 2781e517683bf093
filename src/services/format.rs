//! Output format handling service
//!
//! Converts composited RGBA images into the bytes of the configured output
//! format, keeping encoding concerns out of the batch processor.

use crate::{config::OutputFormat, error::Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, ImageBuffer, RgbaImage};
use std::io::Cursor;

/// Service for handling output format conversions
pub struct OutputFormatHandler;

impl OutputFormatHandler {
    /// Convert an RGBA image to the pixel layout of the output format
    ///
    /// JPEG has no alpha channel, so alpha is dropped.
    #[must_use]
    pub fn convert_format(rgba_image: RgbaImage, format: OutputFormat) -> DynamicImage {
        match format {
            OutputFormat::Png | OutputFormat::WebP => DynamicImage::ImageRgba8(rgba_image),
            OutputFormat::Jpeg => {
                let (width, height) = rgba_image.dimensions();
                let mut rgb_image = ImageBuffer::new(width, height);

                for (x, y, pixel) in rgba_image.enumerate_pixels() {
                    rgb_image.put_pixel(x, y, image::Rgb([pixel[0], pixel[1], pixel[2]]));
                }

                DynamicImage::ImageRgb8(rgb_image)
            },
        }
    }

    /// Encode an RGBA image into bytes of the given format
    ///
    /// # Examples
    /// ```rust
    /// use bgremove_compositor::{services::OutputFormatHandler, OutputFormat};
    /// use image::RgbaImage;
    ///
    /// let image = RgbaImage::new(4, 4);
    /// let bytes = OutputFormatHandler::encode(&image, OutputFormat::Png, 90)?;
    /// assert!(!bytes.is_empty());
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn encode(image: &RgbaImage, format: OutputFormat, jpeg_quality: u8) -> Result<Vec<u8>> {
        let converted = Self::convert_format(image.clone(), format);
        let mut buffer = Vec::new();

        match format {
            OutputFormat::Jpeg => {
                let encoder = JpegEncoder::new_with_quality(&mut buffer, jpeg_quality.min(100));
                converted.write_with_encoder(encoder)?;
            },
            OutputFormat::Png | OutputFormat::WebP => {
                converted.write_to(&mut Cursor::new(&mut buffer), format.image_format())?;
            },
        }

        Ok(buffer)
    }

    /// Check if a format supports transparency (alpha channel)
    #[must_use]
    pub fn supports_transparency(format: OutputFormat) -> bool {
        match format {
            OutputFormat::Png | OutputFormat::WebP => true,
            OutputFormat::Jpeg => false,
        }
    }

    /// Warn about formats that flatten transparent template regions
    pub fn validate_for_compositing(format: OutputFormat) {
        if !Self::supports_transparency(format) {
            log::warn!(
                "Output format {:?} does not support transparency. Transparent template regions will be flattened.",
                format
            );
        }
    }
}
