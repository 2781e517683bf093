//! Core types shared by the session store, the pipeline and the dispatcher

use crate::config::OutputFormat;
use crate::error::CompositorError;
use image::RgbaImage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::Arc;

/// Stable identifier of a user session (a chat id, a user id, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionKey(String);

impl SessionKey {
    #[must_use]
    pub fn new<S: Into<String>>(key: S) -> Self {
        Self(key.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionKey {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for SessionKey {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<i64> for SessionKey {
    fn from(value: i64) -> Self {
        Self(value.to_string())
    }
}

/// Identifier of a template canvas
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TemplateId(String);

impl TemplateId {
    #[must_use]
    pub fn new<S: Into<String>>(id: S) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TemplateId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Which side of the cutout the requested dimension applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SizingMode {
    /// Dimension is the new width, height follows the aspect ratio
    #[default]
    #[serde(alias = "width")]
    ByWidth,
    /// Dimension is the new height, width follows the aspect ratio
    #[serde(alias = "height")]
    ByHeight,
}

impl SizingMode {
    /// Keyword users type in front of the dimension
    #[must_use]
    pub fn keyword(self) -> &'static str {
        match self {
            Self::ByWidth => "width",
            Self::ByHeight => "height",
        }
    }
}

impl fmt::Display for SizingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// A complete sizing choice: mode plus positive dimension in pixels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SizingInstruction {
    pub mode: SizingMode,
    pub dimension: NonZeroU32,
}

impl SizingInstruction {
    #[must_use]
    pub fn new(mode: SizingMode, dimension: NonZeroU32) -> Self {
        Self { mode, dimension }
    }
}

impl fmt::Display for SizingInstruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}px", self.mode, self.dimension)
    }
}

/// Opaque handle to one staged user photo
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageRef(uuid::Uuid);

impl ImageRef {
    #[must_use]
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for ImageRef {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transient input of the composition engine
#[derive(Debug, Clone)]
pub struct CompositionRequest {
    pub cutout: RgbaImage,
    pub canvas: Arc<RgbaImage>,
    pub sizing: SizingInstruction,
}

/// Per-stage timings of one composited image (milliseconds)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingTimings {
    pub load_ms: u64,
    pub matting_ms: u64,
    pub compose_ms: u64,
    pub enhance_ms: u64,
    pub encode_ms: u64,
    pub total_ms: u64,
}

/// Finished image of one queue position
#[derive(Debug, Clone)]
pub struct CompositionResult {
    /// 1-based position of the image in the drained queue
    pub index: usize,
    /// Encoded image bytes
    pub bytes: Vec<u8>,
    pub format: OutputFormat,
    pub dimensions: (u32, u32),
    pub timings: ProcessingTimings,
}

impl CompositionResult {
    /// Suggested file name for the outbound reply
    #[must_use]
    pub fn file_name(&self) -> String {
        format!("result_{}.{}", self.index, self.format.extension())
    }
}

/// Result or error of one queue position
#[derive(Debug)]
pub struct ImageOutcome {
    pub index: usize,
    pub result: std::result::Result<CompositionResult, CompositorError>,
}

impl ImageOutcome {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }
}

/// Everything a batch run produced, in queue order
#[derive(Debug)]
pub struct BatchReport {
    pub session_key: SessionKey,
    pub template_id: TemplateId,
    pub sizing: Option<SizingInstruction>,
    pub outcomes: Vec<ImageOutcome>,
    pub started_at: chrono::DateTime<chrono::Utc>,
    pub total_ms: u64,
}

impl BatchReport {
    /// Report for a run that found nothing queued
    #[must_use]
    pub fn empty(session_key: SessionKey, template_id: TemplateId) -> Self {
        Self {
            session_key,
            template_id,
            sizing: None,
            outcomes: Vec::new(),
            started_at: chrono::Utc::now(),
            total_ms: 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    #[must_use]
    pub fn success_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_success()).count()
    }

    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.outcomes.len() - self.success_count()
    }

    /// Indices of the images that failed
    #[must_use]
    pub fn failed_indices(&self) -> Vec<usize> {
        self.outcomes
            .iter()
            .filter(|o| !o.is_success())
            .map(|o| o.index)
            .collect()
    }
}
