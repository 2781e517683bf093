//! Background-removal adapter
//!
//! The compositing pipeline only sees [`BackgroundRemover`]: raw photo bytes
//! in, RGBA cutout out. Which engine sits behind it is a configuration
//! choice made by [`create_remover`].

use crate::backends::MockRemover;
use crate::config::{CompositorConfig, MattingBackend};
use crate::error::Result;
use image::RgbaImage;
use std::sync::Arc;

/// Capability that strips the background of a photo
///
/// Implementations are called from blocking worker threads and may be
/// shared between sessions, so they must be `Send + Sync`.
pub trait BackgroundRemover: Send + Sync {
    /// Return the photo with the background made transparent
    ///
    /// # Errors
    /// `MattingFailed` for undecodable input or a model error.
    fn remove_background(&self, raw_image: &[u8]) -> Result<RgbaImage>;

    /// Short backend name for logs
    fn name(&self) -> &str;
}

/// Build the remover selected in the configuration
///
/// # Errors
/// - `InvalidConfig` when the Tract backend is requested but not compiled in
/// - model loading errors from the Tract backend
pub fn create_remover(config: &CompositorConfig) -> Result<Arc<dyn BackgroundRemover>> {
    match config.matting_backend {
        MattingBackend::Mock => Ok(Arc::new(MockRemover::new())),
        #[cfg(feature = "tract")]
        MattingBackend::Tract => {
            let remover = crate::backends::TractRemover::from_file(
                config.resolved_model_path(),
                config.model_input_size,
            )?;
            Ok(Arc::new(remover))
        },
        #[cfg(not(feature = "tract"))]
        MattingBackend::Tract => Err(crate::error::CompositorError::invalid_config(
            "Tract backend is not available. Rebuild with --features tract or use the mock backend.",
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_mock_remover() {
        let config = CompositorConfig::builder()
            .matting_backend(MattingBackend::Mock)
            .build()
            .unwrap();
        let remover = create_remover(&config).unwrap();
        assert_eq!(remover.name(), "mock");
    }

    #[test]
    fn test_create_tract_remover_without_model_fails() {
        let config = CompositorConfig::builder()
            .matting_backend(MattingBackend::Tract)
            .model_path("/nonexistent/model.onnx")
            .build()
            .unwrap();
        assert!(create_remover(&config).is_err());
    }
}
