//! Shared image utilities for the matting backends

pub mod mask;
pub mod preprocessing;

pub use mask::SegmentationMask;
pub use preprocessing::{
    ImagePreprocessor, LetterboxGeometry, PreprocessingConfig, PreprocessingOptions,
};
