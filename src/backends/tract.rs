//! Tract backend for salient-object segmentation models
//!
//! Runs an ISNet-style ONNX model with Tract, a pure Rust inference engine,
//! and turns its mask into the alpha channel of the photo.
//!
//! Pipeline per photo: decode → letterbox + normalize to `[1, 3, S, S]` →
//! inference → `[1, 1, S, S]` mask mapped back onto the original pixels →
//! mask applied as alpha.

use crate::error::{CompositorError, Result};
use crate::matting::BackgroundRemover;
use crate::services::ImageIOService;
use crate::utils::{ImagePreprocessor, PreprocessingConfig, PreprocessingOptions, SegmentationMask};
use image::RgbaImage;
use instant::Instant;
use ndarray::Array4;
use std::path::Path;
use std::sync::{Mutex, PoisonError};
use tract_onnx::prelude::*;

/// Type alias for the complex Tract model type to reduce complexity warnings
type TractModel = RunnableModel<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// Background remover backed by an ONNX model executed with Tract
pub struct TractRemover {
    model: Mutex<TractModel>,
    preprocessing: PreprocessingConfig,
    model_name: String,
}

impl std::fmt::Debug for TractRemover {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TractRemover")
            .field("model_name", &self.model_name)
            .field("preprocessing", &self.preprocessing)
            .finish_non_exhaustive()
    }
}

impl TractRemover {
    /// Load and optimize a model from disk
    ///
    /// # Errors
    /// - `Io` when the model file cannot be read
    /// - `MattingFailed` when the file is not a loadable ONNX model
    pub fn from_file<P: AsRef<Path>>(path: P, target_size: u32) -> Result<Self> {
        let path = path.as_ref();
        let model_data = std::fs::read(path)
            .map_err(|e| CompositorError::file_io_error("read ONNX model", path, &e))?;
        let model_name = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .unwrap_or("onnx-model")
            .to_string();

        Self::from_bytes(&model_data, target_size, model_name)
    }

    /// Load and optimize a model from memory
    pub fn from_bytes(model_data: &[u8], target_size: u32, model_name: String) -> Result<Self> {
        let model_load_start = Instant::now();

        log::info!("🚀 Initializing Tract backend");
        #[allow(clippy::cast_precision_loss)]
        let size_mb = model_data.len() as f64 / (1024.0 * 1024.0);
        log::info!("🧠 Model: {} ({:.2} MB)", model_name, size_mb);

        let model = onnx()
            .model_for_read(&mut std::io::Cursor::new(model_data))
            .map_err(|e| CompositorError::matting(format!("Failed to load ONNX model: {e}")))?
            .into_optimized()
            .map_err(|e| CompositorError::matting(format!("Failed to optimize model: {e}")))?
            .into_runnable()
            .map_err(|e| {
                CompositorError::matting(format!("Failed to create runnable model: {e}"))
            })?;

        log::info!(
            "✅ Tract backend initialized in {}ms",
            model_load_start.elapsed().as_millis()
        );

        Ok(Self {
            model: Mutex::new(model),
            preprocessing: PreprocessingConfig::imagenet(target_size),
            model_name,
        })
    }

    fn infer(&self, input: &Array4<f32>) -> Result<Array4<f32>> {
        let inference_start = Instant::now();
        log::debug!("🔮 Running Tract inference on {:?}", input.shape());

        let data = input
            .as_slice()
            .ok_or_else(|| CompositorError::internal("Input tensor is not contiguous"))?;
        let input_tensor = Tensor::from_shape::<f32>(input.shape(), data)
            .map_err(|e| CompositorError::matting(format!("Failed to build input tensor: {e}")))?;

        let outputs = {
            let model = self.model.lock().unwrap_or_else(PoisonError::into_inner);
            model
                .run(tvec![input_tensor.into()])
                .map_err(|e| CompositorError::matting(format!("Tract inference failed: {e}")))?
        };

        let output_tensor = outputs
            .into_iter()
            .next()
            .ok_or_else(|| CompositorError::matting("No output tensor found"))?
            .into_arc_tensor();

        let shape = output_tensor.shape().to_vec();
        let [batch, channels, height, width] = shape[..] else {
            return Err(CompositorError::matting(format!(
                "Expected 4D output tensor, got {}D",
                shape.len()
            )));
        };

        let values = output_tensor
            .as_slice::<f32>()
            .map_err(|e| CompositorError::matting(format!("Failed to read output tensor: {e}")))?
            .to_vec();

        let output = Array4::from_shape_vec((batch, channels, height, width), values)
            .map_err(|e| CompositorError::matting(format!("Failed to reshape output tensor: {e}")))?;

        log::debug!(
            "✅ Tract inference completed in {}ms",
            inference_start.elapsed().as_millis()
        );
        Ok(output)
    }
}

impl BackgroundRemover for TractRemover {
    fn remove_background(&self, raw_image: &[u8]) -> Result<RgbaImage> {
        let image = ImageIOService::load_from_bytes(raw_image)
            .map_err(|e| CompositorError::matting(format!("Cannot decode photo: {}", e)))?;
        let original_dimensions = (image.width(), image.height());

        let (input, geometry) = ImagePreprocessor::preprocess_image(
            &image,
            &self.preprocessing,
            &PreprocessingOptions::default(),
        )?;
        let output = self.infer(&input)?;

        let mask = SegmentationMask::from_tensor(&output, original_dimensions, &geometry)?;
        mask.apply_to_image(&image)
    }

    fn name(&self) -> &str {
        "tract"
    }
}
