#![allow(clippy::too_many_lines)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::uninlined_format_args)]
#![allow(clippy::unused_async)]

//! # bgremove-compositor
//!
//! Per-session photo compositing: users send photos, pick a template and a
//! target size, and receive each photo with its background removed, scaled,
//! centered on the template canvas and enhanced.
//!
//! ## Workflow
//!
//! 1. Photos arrive and are staged in memory, queued per session
//! 2. The user selects a template and sends `width <n>` or `height <n>`
//! 3. The batch processor takes the queue and, per image, removes the
//!    background, scales the cutout, composites it at the canvas center,
//!    sharpens and saturates the result and encodes it
//! 4. One reply per image, in queue order; failures of one image never
//!    affect the others
//!
//! ## Features
//!
//! - **Session store**: bounded, LRU plus idle-TTL eviction, explicit keys
//! - **Template registry**: id to canvas, loaded lazily and cached
//! - **Matting backends**: Tract (pure Rust ONNX) and a model-free mock
//! - **Transport-neutral core**: [`dispatcher::Dispatcher`] consumes
//!   [`dispatcher::InboundEvent`]s; [`dispatcher::EventRouter`] fans a stream
//!   out to per-session workers
//! - **CLI**: one-shot batches and an interactive session (feature `cli`)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use bgremove_compositor::{
//!     dispatcher::{Dispatcher, InboundEvent, InboundPayload},
//!     CompositorConfig, MattingBackend, SessionKey,
//! };
//!
//! # async fn example(photo: Vec<u8>) -> anyhow::Result<()> {
//! let config = CompositorConfig::builder()
//!     .templates_dir("templates")
//!     .matting_backend(MattingBackend::Mock)
//!     .build()?;
//! let dispatcher = Dispatcher::from_config(&config)?;
//! let chat = SessionKey::new("chat-42");
//!
//! dispatcher
//!     .handle(InboundEvent::ImageArrived(chat.clone(), InboundPayload::Photo(photo)))
//!     .await;
//! let replies = dispatcher
//!     .handle(InboundEvent::from_text(chat, "width 1200"))
//!     .await;
//! println!("{} replies", replies.len());
//! # Ok(())
//! # }
//! ```
//!
//! ### Feature Flags
//!
//! - `tract` (default): Tract matting backend
//! - `cli` (default): command-line interface and tracing setup
//! - `webp-support` (default): WebP encoding
//! - `tracing-json`: JSON log output for the CLI

pub mod backends;
#[cfg(feature = "cli")]
pub mod cli;
pub mod compose;
pub mod config;
pub mod dispatcher;
pub mod enhance;
pub mod error;
pub mod matting;
pub mod processor;
pub mod services;
pub mod session;
pub mod staging;
pub mod templates;
#[cfg(feature = "cli")]
pub mod tracing_config;
pub mod types;
pub mod utils;

// Public API exports
pub use backends::*;
pub use compose::{
    center_offset, compose, compose_request, compose_within, scaled_dimensions,
    DEFAULT_MAX_SCALED_SIDE,
};
pub use config::{
    CompositorConfig, CompositorConfigBuilder, EnhancementConfig, MattingBackend, OutputFormat,
    SessionPolicy,
};
pub use dispatcher::{Dispatcher, EventRouter, InboundEvent, InboundPayload, OutboundReply, Outbox};
pub use enhance::enhance;
pub use error::{CompositorError, Result};
pub use matting::{create_remover, BackgroundRemover};
pub use processor::{CompositingProcessor, ProcessorConfig, ProcessorConfigBuilder};
pub use services::{
    ConsoleProgressReporter, ImageIOService, NoOpProgressReporter, OutputFormatHandler,
    ProcessingStage, ProgressReporter, ProgressUpdate,
};
pub use session::{Session, SessionStore};
pub use staging::{ImageStore, InMemoryImageStore, StagedImage};
pub use templates::TemplateRegistry;
pub use types::{
    BatchReport, CompositionRequest, CompositionResult, ImageOutcome, ImageRef,
    ProcessingTimings, SessionKey, SizingInstruction, SizingMode, TemplateId,
};
pub use utils::{ImagePreprocessor, PreprocessingConfig, PreprocessingOptions, SegmentationMask};

#[cfg(feature = "cli")]
pub use tracing_config::{events, init_cli_tracing, spans, TracingConfig, TracingFormat};
