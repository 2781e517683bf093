//! Image I/O operations service
//!
//! This module separates decoding and file operations from the compositing
//! pipeline, making the pipeline testable with in-memory images only.

use crate::error::{CompositorError, Result};
use image::DynamicImage;
use std::path::Path;

/// Service for handling image input/output operations
pub struct ImageIOService;

impl ImageIOService {
    /// Load an image from a file path
    ///
    /// Extension-based format detection is tried first, then content-based
    /// detection for files with a misleading or missing extension.
    ///
    /// # Examples
    /// ```rust,no_run
    /// use bgremove_compositor::services::ImageIOService;
    ///
    /// let image = ImageIOService::load_image("templates/template1.png")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn load_image<P: AsRef<Path>>(path: P) -> Result<DynamicImage> {
        let path_ref = path.as_ref();

        if !path_ref.exists() {
            return Err(CompositorError::file_io_error(
                "read image file",
                path_ref,
                &std::io::Error::new(std::io::ErrorKind::NotFound, "file does not exist"),
            ));
        }

        match image::open(path_ref) {
            Ok(img) => Ok(img),
            Err(e) => {
                log::debug!(
                    "Extension-based loading failed for {}: {}. Attempting content-based detection.",
                    path_ref.display(),
                    e
                );

                let data = std::fs::read(path_ref).map_err(|io_err| {
                    CompositorError::file_io_error("read image data", path_ref, &io_err)
                })?;

                image::load_from_memory(&data).map_err(CompositorError::from)
            },
        }
    }

    /// Decode an image from bytes
    pub fn load_from_bytes(bytes: &[u8]) -> Result<DynamicImage> {
        if bytes.is_empty() {
            return Err(CompositorError::Image(image::ImageError::IoError(
                std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "empty image data"),
            )));
        }
        image::load_from_memory(bytes).map_err(CompositorError::from)
    }

    /// Whether the bytes start with a recognizable image signature
    #[must_use]
    pub fn looks_like_image(bytes: &[u8]) -> bool {
        image::guess_format(bytes).is_ok()
    }

    /// Write encoded bytes to a file, creating parent directories
    pub fn save_bytes<P: AsRef<Path>>(bytes: &[u8], path: P) -> Result<()> {
        let path_ref = path.as_ref();

        if let Some(parent) = path_ref.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    CompositorError::file_io_error("create output directory", parent, &e)
                })?;
            }
        }

        std::fs::write(path_ref, bytes)
            .map_err(|e| CompositorError::file_io_error("write output file", path_ref, &e))
    }

    /// Check if a file path has a supported image extension
    pub fn is_supported_format<P: AsRef<Path>>(path: P) -> bool {
        path.as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .map(str::to_lowercase)
            .is_some_and(|ext| {
                matches!(
                    ext.as_str(),
                    "jpg" | "jpeg" | "png" | "webp" | "tiff" | "tif"
                )
            })
    }
}
