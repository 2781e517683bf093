//! Configuration types for compositing operations

use crate::error::{CompositorError, Result};
use crate::types::{SizingMode, TemplateId};
use image::ImageFormat;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Output image format options
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// PNG with alpha channel transparency
    #[default]
    Png,
    /// JPEG (no transparency, alpha is dropped)
    Jpeg,
    /// WebP with alpha channel transparency (lossless)
    WebP,
}

impl OutputFormat {
    /// File extension without the dot
    #[must_use]
    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
        }
    }

    /// Matching `image` crate format
    #[must_use]
    pub fn image_format(self) -> ImageFormat {
        match self {
            Self::Png => ImageFormat::Png,
            Self::Jpeg => ImageFormat::Jpeg,
            Self::WebP => ImageFormat::WebP,
        }
    }

    /// MIME type for outbound replies
    #[must_use]
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
        }
    }
}

impl std::fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Matting backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MattingBackend {
    /// ONNX model executed with Tract (pure Rust)
    #[default]
    Tract,
    /// Model-free matte keyed on the corner colour, for tests and dry runs
    Mock,
}

impl std::fmt::Display for MattingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tract => write!(f, "tract"),
            Self::Mock => write!(f, "mock"),
        }
    }
}

/// Post-compositing enhancement factors
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnhancementConfig {
    /// Run the enhancement stage at all
    pub enabled: bool,
    /// Sharpness multiplier over baseline (1.0 = unchanged)
    pub sharpness: f32,
    /// Saturation multiplier over baseline (1.0 = unchanged)
    pub saturation: f32,
}

impl Default for EnhancementConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sharpness: 2.0,
            saturation: 1.2,
        }
    }
}

/// Eviction policy of the session store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionPolicy {
    /// Maximum number of live sessions before least-recently-used eviction
    pub capacity: usize,
    /// Idle time after which a session is dropped (seconds)
    pub idle_ttl_secs: u64,
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            idle_ttl_secs: 24 * 60 * 60,
        }
    }
}

impl SessionPolicy {
    #[must_use]
    pub fn idle_ttl(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.idle_ttl_secs)
    }
}

/// Top-level configuration of the compositing service
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompositorConfig {
    /// Directory relative template paths are resolved against
    pub templates_dir: PathBuf,

    /// Template id to canvas file
    pub templates: BTreeMap<String, PathBuf>,

    /// Template a fresh session starts with
    pub default_template: String,

    /// Sizing mode a fresh session starts with
    pub default_sizing_mode: SizingMode,

    /// Largest dimension a user may request (pixels)
    pub max_dimension: u32,

    /// Output format of the composited images
    pub output_format: OutputFormat,

    /// JPEG quality (0-100, only used for JPEG output)
    pub jpeg_quality: u8,

    /// Enhancement stage settings
    pub enhancement: EnhancementConfig,

    /// Session store eviction policy
    pub sessions: SessionPolicy,

    /// Matting backend used for background removal
    pub matting_backend: MattingBackend,

    /// ONNX model used by the Tract backend (None = default data dir location)
    pub model_path: Option<PathBuf>,

    /// Square input size expected by the model
    pub model_input_size: u32,

    /// Idle time after which a per-session event worker exits (seconds)
    pub worker_idle_secs: u64,
}

impl Default for CompositorConfig {
    fn default() -> Self {
        let mut templates = BTreeMap::new();
        templates.insert("1".to_string(), PathBuf::from("template1.png"));
        templates.insert("2".to_string(), PathBuf::from("template2.png"));

        Self {
            templates_dir: PathBuf::from("templates"),
            templates,
            default_template: "1".to_string(),
            default_sizing_mode: SizingMode::ByWidth,
            max_dimension: 8192,
            output_format: OutputFormat::Png,
            jpeg_quality: 90,
            enhancement: EnhancementConfig::default(),
            sessions: SessionPolicy::default(),
            matting_backend: MattingBackend::default(),
            model_path: None,
            model_input_size: 1024,
            worker_idle_secs: 300,
        }
    }
}

impl CompositorConfig {
    /// Create a new configuration builder
    ///
    /// # Examples
    ///
    /// ```rust
    /// use bgremove_compositor::{CompositorConfig, OutputFormat, SizingMode};
    ///
    /// let config = CompositorConfig::builder()
    ///     .output_format(OutputFormat::Jpeg)
    ///     .default_sizing_mode(SizingMode::ByHeight)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(config.jpeg_quality, 90);
    /// ```
    #[must_use]
    pub fn builder() -> CompositorConfigBuilder {
        CompositorConfigBuilder::default()
    }

    /// Load a configuration from a JSON file
    ///
    /// Missing fields take their default values.
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = std::fs::read_to_string(path)
            .map_err(|e| CompositorError::file_io_error("read config file", path, &e))?;
        let config: Self = serde_json::from_str(&data).map_err(|e| {
            CompositorError::invalid_config(format!(
                "Failed to parse config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as pretty-printed JSON
    pub fn to_json_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let data = serde_json::to_string_pretty(self)
            .map_err(|e| CompositorError::internal(format!("Failed to serialize config: {}", e)))?;
        std::fs::write(path, data)
            .map_err(|e| CompositorError::file_io_error("write config file", path, &e))
    }

    /// Validate all configuration parameters
    ///
    /// # Validation Rules
    ///
    /// - JPEG quality: 0-100 (inclusive)
    /// - `max_dimension`: at least 1
    /// - Enhancement factors: finite and non-negative
    /// - Session capacity: at least 1
    /// - The default template must be one of the configured templates
    pub fn validate(&self) -> Result<()> {
        if self.jpeg_quality > 100 {
            return Err(CompositorError::config_value_error(
                "JPEG quality",
                self.jpeg_quality,
                "0-100",
                Some(90),
            ));
        }

        if self.max_dimension == 0 {
            return Err(CompositorError::config_value_error(
                "max dimension",
                self.max_dimension,
                "1-65535",
                Some(8192),
            ));
        }

        for (name, factor) in [
            ("sharpness", self.enhancement.sharpness),
            ("saturation", self.enhancement.saturation),
        ] {
            if !factor.is_finite() || factor < 0.0 {
                return Err(CompositorError::invalid_config(format!(
                    "Enhancement {} factor must be a finite non-negative number, got {}",
                    name, factor
                )));
            }
        }

        if self.sessions.capacity == 0 {
            return Err(CompositorError::invalid_config(
                "Session capacity must be at least 1",
            ));
        }

        if self.model_input_size == 0 {
            return Err(CompositorError::invalid_config(
                "Model input size must be at least 1",
            ));
        }

        if !self.templates.contains_key(&self.default_template) {
            return Err(CompositorError::invalid_config(format!(
                "Default template '{}' is not among the configured templates",
                self.default_template
            )));
        }

        Ok(())
    }

    /// Default template as a typed id
    #[must_use]
    pub fn default_template_id(&self) -> TemplateId {
        TemplateId::new(self.default_template.clone())
    }

    /// Absolute or templates-dir-relative path of every configured template
    #[must_use]
    pub fn template_paths(&self) -> Vec<(TemplateId, PathBuf)> {
        self.templates
            .iter()
            .map(|(id, path)| {
                let resolved = if path.is_absolute() {
                    path.clone()
                } else {
                    self.templates_dir.join(path)
                };
                (TemplateId::new(id.clone()), resolved)
            })
            .collect()
    }

    /// Model location, falling back to the per-user data directory
    #[must_use]
    pub fn resolved_model_path(&self) -> PathBuf {
        self.model_path.clone().unwrap_or_else(default_model_path)
    }
}

/// Default location of the matting model
///
/// - Linux: `~/.local/share/bgremove-compositor/models/isnet-general.onnx`
/// - macOS: `~/Library/Application Support/bgremove-compositor/models/isnet-general.onnx`
#[must_use]
pub fn default_model_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("bgremove-compositor")
        .join("models")
        .join("isnet-general.onnx")
}

/// Builder for `CompositorConfig`
#[derive(Debug, Default)]
pub struct CompositorConfigBuilder {
    config: CompositorConfig,
}

impl CompositorConfigBuilder {
    /// Set the templates directory
    #[must_use]
    pub fn templates_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.config.templates_dir = dir.into();
        self
    }

    /// Register a template, replacing any template with the same id
    #[must_use]
    pub fn template<S: Into<String>, P: Into<PathBuf>>(mut self, id: S, path: P) -> Self {
        self.config.templates.insert(id.into(), path.into());
        self
    }

    /// Drop all configured templates (including the built-in ones)
    #[must_use]
    pub fn clear_templates(mut self) -> Self {
        self.config.templates.clear();
        self
    }

    /// Set the template new sessions start with
    #[must_use]
    pub fn default_template<S: Into<String>>(mut self, id: S) -> Self {
        self.config.default_template = id.into();
        self
    }

    /// Set the sizing mode new sessions start with
    #[must_use]
    pub fn default_sizing_mode(mut self, mode: SizingMode) -> Self {
        self.config.default_sizing_mode = mode;
        self
    }

    /// Set the largest dimension a user may request
    #[must_use]
    pub fn max_dimension(mut self, max: u32) -> Self {
        self.config.max_dimension = max;
        self
    }

    /// Set output format
    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    /// Set JPEG quality (0-100, checked by `build`)
    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    /// Set enhancement settings
    #[must_use]
    pub fn enhancement(mut self, enhancement: EnhancementConfig) -> Self {
        self.config.enhancement = enhancement;
        self
    }

    /// Set the session store policy
    #[must_use]
    pub fn sessions(mut self, policy: SessionPolicy) -> Self {
        self.config.sessions = policy;
        self
    }

    /// Set the matting backend
    #[must_use]
    pub fn matting_backend(mut self, backend: MattingBackend) -> Self {
        self.config.matting_backend = backend;
        self
    }

    /// Set the ONNX model path
    #[must_use]
    pub fn model_path<P: Into<PathBuf>>(mut self, path: P) -> Self {
        self.config.model_path = Some(path.into());
        self
    }

    /// Set the model input size
    #[must_use]
    pub fn model_input_size(mut self, size: u32) -> Self {
        self.config.model_input_size = size;
        self
    }

    /// Set the idle time after which a per-session worker exits
    #[must_use]
    pub fn worker_idle_secs(mut self, secs: u64) -> Self {
        self.config.worker_idle_secs = secs;
        self
    }

    /// Build the configuration
    pub fn build(self) -> Result<CompositorConfig> {
        self.config.validate()?;
        Ok(self.config)
    }
}
