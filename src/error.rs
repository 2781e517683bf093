//! Error types for compositing operations

use thiserror::Error;

/// Result type alias for compositing operations
pub type Result<T> = std::result::Result<T, CompositorError>;

/// Comprehensive error types for the compositing workflow
#[derive(Error, Debug)]
pub enum CompositorError {
    /// Template id is unknown or its backing asset is missing
    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    /// A batch was requested before any dimension was supplied
    #[error("Dimension not set: send 'width <pixels>' or 'height <pixels>' first")]
    DimensionNotSet,

    /// Dimension text did not match `width <n>` or `height <n>`
    #[error("Could not parse dimension '{input}': {reason}")]
    DimensionParseError { input: String, reason: String },

    /// Inbound item is not an image
    #[error("Unsupported payload: {0}")]
    UnsupportedPayload(String),

    /// Cutout has a zero width or height
    #[error("Invalid cutout: {width}x{height}")]
    InvalidCutout { width: u32, height: u32 },

    /// Scaled cutout would exceed the allowed side length
    #[error("Scaled cutout {width}x{height} exceeds the maximum of {max} pixels per side")]
    CutoutTooLarge { width: u32, height: u32, max: u32 },

    /// Background removal failed for one image
    #[error("Background removal failed: {0}")]
    MattingFailed(String),

    /// Staged image handle is unknown or already released
    #[error("Staging error: {0}")]
    Staging(String),

    /// Input/output errors (file not found, permission denied, etc.)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Image decoding or encoding errors
    #[error("Image processing error: {0}")]
    Image(#[from] image::ImageError),

    /// Invalid configuration or parameters
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl CompositorError {
    /// Create a new template not found error
    pub fn template_not_found<S: Into<String>>(template_id: S) -> Self {
        Self::TemplateNotFound(template_id.into())
    }

    /// Create a new dimension parse error
    pub fn dimension_parse<I: Into<String>, R: Into<String>>(input: I, reason: R) -> Self {
        Self::DimensionParseError {
            input: input.into(),
            reason: reason.into(),
        }
    }

    /// Create a new unsupported payload error
    pub fn unsupported_payload<S: Into<String>>(kind: S) -> Self {
        Self::UnsupportedPayload(kind.into())
    }

    /// Create a new matting error
    pub fn matting<S: Into<String>>(msg: S) -> Self {
        Self::MattingFailed(msg.into())
    }

    /// Create a new staging error
    pub fn staging<S: Into<String>>(msg: S) -> Self {
        Self::Staging(msg.into())
    }

    /// Create a new invalid configuration error
    pub fn invalid_config<S: Into<String>>(msg: S) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Create a new internal error
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Create file I/O error with operation context
    pub fn file_io_error<P: AsRef<std::path::Path>>(
        operation: &str,
        path: P,
        error: &std::io::Error,
    ) -> Self {
        let path_display = path.as_ref().display();
        Self::Io(std::io::Error::new(
            error.kind(),
            format!("Failed to {} '{}': {}", operation, path_display, error),
        ))
    }

    /// Create configuration error with valid ranges
    pub fn config_value_error<T: std::fmt::Display>(
        parameter: &str,
        value: T,
        valid_range: &str,
        recommended: Option<T>,
    ) -> Self {
        let recommendation = match recommended {
            Some(rec) => format!(" Recommended: {}", rec),
            None => String::new(),
        };

        Self::InvalidConfig(format!(
            "Invalid {}: {} (valid range: {}).{}",
            parameter, value, valid_range, recommendation
        ))
    }

    /// Whether the user can fix the condition and retry without losing data
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::TemplateNotFound(_) | Self::Internal(_))
    }

    /// Whether the error belongs to a single image of a batch
    #[must_use]
    pub fn is_per_image(&self) -> bool {
        matches!(
            self,
            Self::InvalidCutout { .. }
                | Self::CutoutTooLarge { .. }
                | Self::MattingFailed(_)
                | Self::Staging(_)
                | Self::Image(_)
                | Self::Io(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_error_creation() {
        let err = CompositorError::template_not_found("nonexistent");
        assert!(matches!(err, CompositorError::TemplateNotFound(_)));

        let err = CompositorError::unsupported_payload("sticker");
        assert!(matches!(err, CompositorError::UnsupportedPayload(_)));
    }

    #[test]
    fn test_error_display() {
        let err = CompositorError::template_not_found("7");
        assert_eq!(err.to_string(), "Template not found: 7");

        let err = CompositorError::InvalidCutout {
            width: 0,
            height: 12,
        };
        assert_eq!(err.to_string(), "Invalid cutout: 0x12");

        let err = CompositorError::dimension_parse("sideways 5", "unknown keyword 'sideways'");
        assert!(err.to_string().contains("sideways 5"));
        assert!(err.to_string().contains("unknown keyword"));
    }

    #[test]
    fn test_error_classification() {
        assert!(!CompositorError::template_not_found("x").is_recoverable());
        assert!(CompositorError::DimensionNotSet.is_recoverable());
        assert!(CompositorError::matting("bad input").is_per_image());
        assert!(!CompositorError::DimensionNotSet.is_per_image());
    }

    #[test]
    fn test_enhanced_error_context() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err = CompositorError::file_io_error(
            "read template",
            Path::new("/templates/template1.png"),
            &io_error,
        );
        let error_string = err.to_string();
        assert!(error_string.contains("read template"));
        assert!(error_string.contains("/templates/template1.png"));

        let err = CompositorError::config_value_error("JPEG quality", 150, "0-100", Some(90));
        let error_string = err.to_string();
        assert!(error_string.contains("150"));
        assert!(error_string.contains("Recommended: 90"));
    }
}
