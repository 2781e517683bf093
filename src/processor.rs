//! Batch processor
//!
//! Runs the compositing pipeline over everything a session has queued:
//! background removal → composition → enhancement → encoding, one image at
//! a time, each image isolated from the failures of the others.

use crate::compose::{compose_within, DEFAULT_MAX_SCALED_SIDE};
use crate::config::{CompositorConfig, EnhancementConfig, OutputFormat};
use crate::enhance::enhance;
use crate::error::{CompositorError, Result};
use crate::matting::{create_remover, BackgroundRemover};
use crate::services::{
    NoOpProgressReporter, OutputFormatHandler, ProcessingStage, ProgressReporter, ProgressUpdate,
};
use crate::session::SessionStore;
use crate::staging::{release_on_eviction, ImageStore, InMemoryImageStore, StagedImage};
use crate::templates::TemplateRegistry;
use crate::types::{
    BatchReport, CompositionResult, ImageOutcome, ProcessingTimings, SessionKey,
    SizingInstruction,
};
use image::RgbaImage;
use instant::Instant;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Settings of the per-image pipeline
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorConfig {
    /// Output format of the composited images
    pub output_format: OutputFormat,
    /// JPEG quality (0-100)
    pub jpeg_quality: u8,
    /// Post-compositing enhancement
    pub enhancement: EnhancementConfig,
    /// Largest side a scaled cutout may have
    pub max_dimension: u32,
    /// Enable verbose progress reporting
    pub verbose_progress: bool,
}

impl ProcessorConfig {
    /// Create a new processor configuration builder
    #[must_use]
    pub fn builder() -> ProcessorConfigBuilder {
        ProcessorConfigBuilder::new()
    }

    /// Pipeline settings of a service configuration
    #[must_use]
    pub fn from_compositor_config(config: &CompositorConfig) -> Self {
        Self {
            output_format: config.output_format,
            jpeg_quality: config.jpeg_quality,
            enhancement: config.enhancement,
            max_dimension: config.max_dimension,
            verbose_progress: false,
        }
    }
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            output_format: OutputFormat::Png,
            jpeg_quality: 90,
            enhancement: EnhancementConfig::default(),
            max_dimension: DEFAULT_MAX_SCALED_SIDE,
            verbose_progress: false,
        }
    }
}

/// Builder for `ProcessorConfig`
pub struct ProcessorConfigBuilder {
    config: ProcessorConfig,
}

impl ProcessorConfigBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: ProcessorConfig::default(),
        }
    }

    #[must_use]
    pub fn output_format(mut self, format: OutputFormat) -> Self {
        self.config.output_format = format;
        self
    }

    #[must_use]
    pub fn jpeg_quality(mut self, quality: u8) -> Self {
        self.config.jpeg_quality = quality;
        self
    }

    #[must_use]
    pub fn enhancement(mut self, enhancement: EnhancementConfig) -> Self {
        self.config.enhancement = enhancement;
        self
    }

    #[must_use]
    pub fn max_dimension(mut self, max: u32) -> Self {
        self.config.max_dimension = max;
        self
    }

    #[must_use]
    pub fn verbose_progress(mut self, verbose: bool) -> Self {
        self.config.verbose_progress = verbose;
        self
    }

    /// Build the processor configuration
    ///
    /// # Errors
    ///
    /// Returns `InvalidConfig` for:
    /// - JPEG quality above 100
    /// - A zero `max_dimension`
    /// - Negative or non-finite enhancement factors
    pub fn build(self) -> Result<ProcessorConfig> {
        if self.config.jpeg_quality > 100 {
            return Err(CompositorError::invalid_config("JPEG quality must be 0-100"));
        }
        if self.config.max_dimension == 0 {
            return Err(CompositorError::invalid_config("max_dimension must be at least 1"));
        }
        let enhancement = &self.config.enhancement;
        for factor in [enhancement.sharpness, enhancement.saturation] {
            if !factor.is_finite() || factor < 0.0 {
                return Err(CompositorError::invalid_config(format!(
                    "Enhancement factors must be finite and non-negative, got {}",
                    factor
                )));
            }
        }

        Ok(self.config)
    }
}

impl Default for ProcessorConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Orchestrates batch runs over the session store
pub struct CompositingProcessor {
    config: ProcessorConfig,
    sessions: Arc<SessionStore>,
    templates: Arc<TemplateRegistry>,
    remover: Arc<dyn BackgroundRemover>,
    images: Arc<dyn ImageStore>,
    progress: Arc<dyn ProgressReporter>,
}

impl CompositingProcessor {
    /// Create a processor over existing collaborators
    #[must_use]
    pub fn new(
        config: ProcessorConfig,
        sessions: Arc<SessionStore>,
        templates: Arc<TemplateRegistry>,
        remover: Arc<dyn BackgroundRemover>,
        images: Arc<dyn ImageStore>,
    ) -> Self {
        Self {
            config,
            sessions,
            templates,
            remover,
            images,
            progress: Arc::new(NoOpProgressReporter),
        }
    }

    /// Wire up a complete processor from a service configuration
    ///
    /// Evicted sessions release their staged images.
    ///
    /// # Errors
    /// Invalid configuration or a matting backend that fails to load.
    pub fn from_config(config: &CompositorConfig) -> Result<Self> {
        config.validate()?;

        let images: Arc<dyn ImageStore> = Arc::new(InMemoryImageStore::new());
        let sessions = Arc::new(
            SessionStore::from_config(config)
                .with_eviction_listener(release_on_eviction(Arc::clone(&images))),
        );
        let templates = Arc::new(TemplateRegistry::from_config(config));
        let remover = create_remover(config)?;

        info!(
            backend = remover.name(),
            templates = templates.len(),
            format = %config.output_format,
            "compositing processor ready"
        );

        Ok(Self::new(
            ProcessorConfig::from_compositor_config(config),
            sessions,
            templates,
            remover,
            images,
        ))
    }

    /// Report progress of every image to `reporter`
    #[must_use]
    pub fn with_progress_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.progress = reporter;
        self
    }

    #[must_use]
    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    #[must_use]
    pub fn templates(&self) -> &Arc<TemplateRegistry> {
        &self.templates
    }

    #[must_use]
    pub fn images(&self) -> &Arc<dyn ImageStore> {
        &self.images
    }

    /// Name of the matting backend in use
    #[must_use]
    pub fn remover_name(&self) -> &str {
        self.remover.name()
    }

    /// Process everything queued for `key`
    ///
    /// Batch runs of one session never overlap; a second call waits for the
    /// first. Images queued after the run starts belong to the next run.
    ///
    /// # Errors
    /// - `TemplateNotFound` when the selected template cannot be resolved
    /// - `DimensionNotSet` when no dimension has been supplied
    ///
    /// In both cases the queue is left untouched. Per-image failures are not
    /// errors of the batch; they are recorded in the report.
    #[instrument(skip(self), fields(session = %key))]
    pub async fn process_batch(&self, key: &SessionKey) -> Result<BatchReport> {
        let guard = self.sessions.batch_guard(key);
        let _running = guard.lock_owned().await;

        let session = self.sessions.get_or_create(key);
        let template_id = session.selected_template.clone();
        let canvas = self.templates.resolve(&template_id)?;
        let sizing = session.sizing().ok_or(CompositorError::DimensionNotSet)?;

        let queued = self.sessions.drain_queue(key);
        let mut report = BatchReport::empty(key.clone(), template_id);
        report.sizing = Some(sizing);
        if queued.is_empty() {
            info!("nothing queued");
            return Ok(report);
        }

        let batch_start = Instant::now();
        let total = queued.len();
        info!(
            images = total,
            template = %report.template_id,
            sizing = %sizing,
            "batch started"
        );
        self.progress.report_batch_started(total);

        // Guard every drained image now so a dropped batch still releases them.
        let staged_images: Vec<StagedImage> = queued
            .into_iter()
            .map(|image_ref| StagedImage::new(Arc::clone(&self.images), image_ref))
            .collect();

        for (position, staged) in staged_images.into_iter().enumerate() {
            let index = position + 1;
            let job = ImageJob {
                index,
                total,
                canvas: Arc::clone(&canvas),
                sizing,
                config: self.config.clone(),
                remover: Arc::clone(&self.remover),
                progress: Arc::clone(&self.progress),
            };
            let span = tracing::Span::current();

            let result = tokio::task::spawn_blocking(move || span.in_scope(|| job.run(&staged)))
                .await
                .unwrap_or_else(|e| {
                    Err(CompositorError::internal(format!(
                        "image worker terminated: {}",
                        e
                    )))
                });

            match &result {
                Ok(composed) => info!(
                    index,
                    width = composed.dimensions.0,
                    height = composed.dimensions.1,
                    ms = composed.timings.total_ms,
                    "image composited"
                ),
                Err(e) => warn!(index, error = %e, "image failed"),
            }
            report.outcomes.push(ImageOutcome { index, result });
        }

        report.total_ms = batch_start.elapsed().as_millis() as u64;
        info!(
            succeeded = report.success_count(),
            failed = report.failure_count(),
            ms = report.total_ms,
            "batch finished"
        );
        Ok(report)
    }
}

/// Everything one blocking worker needs for one image
struct ImageJob {
    index: usize,
    total: usize,
    canvas: Arc<RgbaImage>,
    sizing: SizingInstruction,
    config: ProcessorConfig,
    remover: Arc<dyn BackgroundRemover>,
    progress: Arc<dyn ProgressReporter>,
}

impl ImageJob {
    fn run(&self, staged: &StagedImage) -> Result<CompositionResult> {
        let mut stage = ProcessingStage::ImageLoading;
        let result = self.execute(staged, &mut stage);
        if let Err(e) = &result {
            self.progress.report_error(self.index, stage, &e.to_string());
        }
        result
    }

    fn execute(
        &self,
        staged: &StagedImage,
        stage: &mut ProcessingStage,
    ) -> Result<CompositionResult> {
        let start = Instant::now();
        let mut timings = ProcessingTimings::default();

        self.enter(stage, ProcessingStage::ImageLoading, start);
        let bytes = staged.bytes()?;
        timings.load_ms = start.elapsed().as_millis() as u64;

        self.enter(stage, ProcessingStage::BackgroundRemoval, start);
        let step = Instant::now();
        let cutout = self.remover.remove_background(&bytes)?;
        drop(bytes);
        timings.matting_ms = step.elapsed().as_millis() as u64;

        self.enter(stage, ProcessingStage::Composition, start);
        let step = Instant::now();
        let composite =
            compose_within(&cutout, &self.canvas, self.sizing, self.config.max_dimension)?;
        drop(cutout);
        timings.compose_ms = step.elapsed().as_millis() as u64;

        self.enter(stage, ProcessingStage::Enhancement, start);
        let step = Instant::now();
        let enhanced = enhance(&composite, &self.config.enhancement);
        timings.enhance_ms = step.elapsed().as_millis() as u64;

        self.enter(stage, ProcessingStage::Encoding, start);
        let step = Instant::now();
        let bytes =
            OutputFormatHandler::encode(&enhanced, self.config.output_format, self.config.jpeg_quality)?;
        timings.encode_ms = step.elapsed().as_millis() as u64;
        timings.total_ms = start.elapsed().as_millis() as u64;

        *stage = ProcessingStage::Completed;
        self.progress.report_completion(self.index, &timings);

        Ok(CompositionResult {
            index: self.index,
            bytes,
            format: self.config.output_format,
            dimensions: enhanced.dimensions(),
            timings,
        })
    }

    fn enter(&self, current: &mut ProcessingStage, next: ProcessingStage, start: Instant) {
        *current = next;
        self.progress
            .report_progress(ProgressUpdate::new(self.index, self.total, next, start));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::MockRemover;
    use crate::types::{SizingMode, TemplateId};
    use image::{DynamicImage, ImageFormat, Rgba};
    use std::num::NonZeroU32;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        events: Mutex<Vec<String>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:{:?}", update.index, update.stage));
        }

        fn report_completion(&self, index: usize, _timings: &ProcessingTimings) {
            self.events.lock().unwrap().push(format!("{}:done", index));
        }

        fn report_error(&self, index: usize, stage: ProcessingStage, _error: &str) {
            self.events
                .lock()
                .unwrap()
                .push(format!("{}:failed@{:?}", index, stage));
        }
    }

    fn photo() -> Vec<u8> {
        let mut image = RgbaImage::from_pixel(20, 10, Rgba([255, 255, 255, 255]));
        for x in 5..15 {
            for y in 2..8 {
                image.put_pixel(x, y, Rgba([200, 30, 30, 255]));
            }
        }
        let mut bytes = Vec::new();
        DynamicImage::ImageRgba8(image)
            .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    fn processor() -> CompositingProcessor {
        let sessions = Arc::new(SessionStore::new(
            TemplateId::from("1"),
            SizingMode::ByWidth,
            16,
            None,
        ));
        let templates = Arc::new(TemplateRegistry::new());
        templates.register_image(
            TemplateId::from("1"),
            RgbaImage::from_pixel(64, 64, Rgba([0, 0, 255, 255])),
        );
        CompositingProcessor::new(
            ProcessorConfig::default(),
            sessions,
            templates,
            Arc::new(MockRemover::new()),
            Arc::new(InMemoryImageStore::new()),
        )
    }

    #[test]
    fn test_processor_config_builder() {
        let config = ProcessorConfig::builder()
            .output_format(OutputFormat::Jpeg)
            .jpeg_quality(75)
            .verbose_progress(true)
            .build()
            .unwrap();
        assert_eq!(config.output_format, OutputFormat::Jpeg);
        assert_eq!(config.jpeg_quality, 75);

        assert!(ProcessorConfig::builder().jpeg_quality(101).build().is_err());
        assert!(ProcessorConfig::builder()
            .enhancement(EnhancementConfig {
                enabled: true,
                sharpness: -1.0,
                saturation: 1.0,
            })
            .build()
            .is_err());
    }

    #[tokio::test]
    async fn test_batch_composites_and_releases() {
        let processor = processor();
        let key = SessionKey::from("42");
        let image_ref = processor.images().stage(photo());
        processor.sessions().enqueue_image(&key, image_ref);
        processor
            .sessions()
            .set_sizing(&key, SizingMode::ByWidth, NonZeroU32::new(32).unwrap());

        let report = processor.process_batch(&key).await.unwrap();

        assert_eq!(report.outcomes.len(), 1);
        let result = report.outcomes[0].result.as_ref().unwrap();
        assert_eq!(result.index, 1);
        assert_eq!(result.dimensions, (64, 64));
        assert_eq!(result.file_name(), "result_1.png");
        assert_eq!(processor.images().staged_count(), 0);
        assert!(processor.sessions().get_or_create(&key).queued_images.is_empty());
    }

    #[tokio::test]
    async fn test_dimension_not_set_keeps_queue() {
        let processor = processor();
        let key = SessionKey::from("7");
        processor
            .sessions()
            .enqueue_image(&key, processor.images().stage(photo()));

        let err = processor.process_batch(&key).await.unwrap_err();
        assert!(matches!(err, CompositorError::DimensionNotSet));
        assert_eq!(processor.sessions().get_or_create(&key).queued_images.len(), 1);
        assert_eq!(processor.images().staged_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_queue_yields_empty_report() {
        let processor = processor();
        let key = SessionKey::from("empty");
        processor
            .sessions()
            .set_sizing(&key, SizingMode::ByHeight, NonZeroU32::new(10).unwrap());

        let report = processor.process_batch(&key).await.unwrap();
        assert!(report.is_empty());
    }

    #[tokio::test]
    async fn test_progress_reports_stages_and_failures() {
        let reporter = Arc::new(RecordingReporter::default());
        let processor = processor().with_progress_reporter(reporter.clone());
        let key = SessionKey::from("progress");

        processor
            .sessions()
            .enqueue_image(&key, processor.images().stage(photo()));
        processor
            .sessions()
            .enqueue_image(&key, processor.images().stage(b"garbage".to_vec()));
        processor
            .sessions()
            .set_sizing(&key, SizingMode::ByWidth, NonZeroU32::new(16).unwrap());

        let report = processor.process_batch(&key).await.unwrap();
        assert_eq!(report.failed_indices(), vec![2]);

        let events = reporter.events.lock().unwrap().clone();
        assert!(events.contains(&"1:Encoding".to_string()));
        assert!(events.contains(&"1:done".to_string()));
        assert!(events.contains(&"2:failed@BackgroundRemoval".to_string()));
        assert!(!events.contains(&"2:Composition".to_string()));
    }
}
