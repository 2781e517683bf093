//! Matting backend implementations
//!
//! - Tract backend (pure Rust ONNX inference, feature `tract`)
//! - Mock backend (model-free corner-colour keying)

pub mod mock;

#[cfg(feature = "tract")]
pub mod tract;

pub use self::mock::MockRemover;

#[cfg(feature = "tract")]
pub use self::tract::TractRemover;
