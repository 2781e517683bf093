//! Progress reporting service
//!
//! This module separates progress reporting concerns from the batch
//! processor, allowing different frontends to implement their own progress
//! handling (console logs, progress bars, chat "typing" indicators).

use crate::types::ProcessingTimings;
use instant::Instant;

/// Stages one queued image goes through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessingStage {
    /// Loading staged bytes
    ImageLoading,
    /// Running the matting backend
    BackgroundRemoval,
    /// Resizing and placing the cutout onto the template
    Composition,
    /// Sharpening and saturating the composite
    Enhancement,
    /// Encoding to the output format
    Encoding,
    /// Image finished
    Completed,
}

impl ProcessingStage {
    /// Get a human-readable description of the processing stage
    #[must_use]
    pub fn description(&self) -> &'static str {
        match self {
            ProcessingStage::ImageLoading => "Loading image",
            ProcessingStage::BackgroundRemoval => "Removing background",
            ProcessingStage::Composition => "Placing cutout on template",
            ProcessingStage::Enhancement => "Enhancing composite",
            ProcessingStage::Encoding => "Encoding result",
            ProcessingStage::Completed => "Processing completed",
        }
    }

    /// Get the typical progress percentage for this stage
    #[must_use]
    pub fn progress_percentage(&self) -> u8 {
        match self {
            ProcessingStage::ImageLoading => 5,
            ProcessingStage::BackgroundRemoval => 70,
            ProcessingStage::Composition => 85,
            ProcessingStage::Enhancement => 92,
            ProcessingStage::Encoding => 98,
            ProcessingStage::Completed => 100,
        }
    }
}

/// Progress update for one image of a batch
#[derive(Debug, Clone)]
pub struct ProgressUpdate {
    /// 1-based queue position of the image
    pub index: usize,
    /// Number of images in the batch
    pub total: usize,
    pub stage: ProcessingStage,
    /// Progress percentage of the current image (0-100)
    pub progress: u8,
    pub description: String,
    /// Elapsed time since the image started (milliseconds)
    pub elapsed_ms: u64,
}

impl ProgressUpdate {
    /// Create a new progress update
    #[must_use]
    pub fn new(index: usize, total: usize, stage: ProcessingStage, start_time: Instant) -> Self {
        Self {
            index,
            total,
            progress: stage.progress_percentage(),
            description: stage.description().to_string(),
            elapsed_ms: start_time.elapsed().as_millis() as u64,
            stage,
        }
    }
}

/// Trait for reporting progress during batch processing
///
/// Reporters are called from blocking worker threads and must be cheap.
pub trait ProgressReporter: Send + Sync {
    /// A batch with `total` images is starting
    fn report_batch_started(&self, total: usize) {
        drop(total);
    }

    /// Report a progress update
    fn report_progress(&self, update: ProgressUpdate);

    /// Report that one image finished with the given timings
    fn report_completion(&self, index: usize, timings: &ProcessingTimings);

    /// Report that one image failed at the given stage
    fn report_error(&self, index: usize, stage: ProcessingStage, error: &str);
}

/// No-op progress reporter that discards all progress updates
pub struct NoOpProgressReporter;

impl ProgressReporter for NoOpProgressReporter {
    fn report_progress(&self, _update: ProgressUpdate) {}

    fn report_completion(&self, _index: usize, _timings: &ProcessingTimings) {}

    fn report_error(&self, _index: usize, _stage: ProcessingStage, _error: &str) {}
}

/// Console progress reporter that logs progress
pub struct ConsoleProgressReporter {
    verbose: bool,
}

impl ConsoleProgressReporter {
    #[must_use]
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }
}

impl ProgressReporter for ConsoleProgressReporter {
    fn report_batch_started(&self, total: usize) {
        log::info!("📦 Processing {} queued image(s)", total);
    }

    fn report_progress(&self, update: ProgressUpdate) {
        if self.verbose {
            log::info!(
                "[{}/{}] [{}%] {} ({}ms elapsed)",
                update.index,
                update.total,
                update.progress,
                update.description,
                update.elapsed_ms
            );
        } else {
            log::debug!(
                "[{}/{}] {}",
                update.index,
                update.total,
                update.description
            );
        }
    }

    fn report_completion(&self, index: usize, timings: &ProcessingTimings) {
        log::info!("✅ Image {} completed in {}ms", index, timings.total_ms);

        if self.verbose {
            log::info!("  📊 Detailed timings:");
            log::info!("    • Load: {}ms", timings.load_ms);
            log::info!("    • Background removal: {}ms", timings.matting_ms);
            log::info!("    • Composition: {}ms", timings.compose_ms);
            log::info!("    • Enhancement: {}ms", timings.enhance_ms);
            log::info!("    • Encoding: {}ms", timings.encode_ms);
        }
    }

    fn report_error(&self, index: usize, stage: ProcessingStage, error: &str) {
        log::error!(
            "❌ Image {} failed during {}: {}",
            index,
            stage.description(),
            error
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingReporter {
        stages: Mutex<Vec<(usize, ProcessingStage)>>,
    }

    impl ProgressReporter for RecordingReporter {
        fn report_progress(&self, update: ProgressUpdate) {
            self.stages.lock().unwrap().push((update.index, update.stage));
        }

        fn report_completion(&self, index: usize, _timings: &ProcessingTimings) {
            self.stages
                .lock()
                .unwrap()
                .push((index, ProcessingStage::Completed));
        }

        fn report_error(&self, _index: usize, _stage: ProcessingStage, _error: &str) {}
    }

    #[test]
    fn test_stage_percentages_are_monotonic() {
        let stages = [
            ProcessingStage::ImageLoading,
            ProcessingStage::BackgroundRemoval,
            ProcessingStage::Composition,
            ProcessingStage::Enhancement,
            ProcessingStage::Encoding,
            ProcessingStage::Completed,
        ];
        for pair in stages.windows(2) {
            assert!(pair[0].progress_percentage() < pair[1].progress_percentage());
        }
    }

    #[test]
    fn test_progress_update_creation() {
        let update = ProgressUpdate::new(2, 3, ProcessingStage::Composition, Instant::now());
        assert_eq!(update.index, 2);
        assert_eq!(update.total, 3);
        assert_eq!(update.progress, 85);
        assert_eq!(update.description, "Placing cutout on template");
    }

    #[test]
    fn test_trait_object_safety() {
        let reporter: Box<dyn ProgressReporter> = Box::new(RecordingReporter::default());
        reporter.report_batch_started(1);
        reporter.report_progress(ProgressUpdate::new(
            1,
            1,
            ProcessingStage::ImageLoading,
            Instant::now(),
        ));
        reporter.report_completion(1, &ProcessingTimings::default());

        let noop: Box<dyn ProgressReporter> = Box::new(NoOpProgressReporter);
        noop.report_error(1, ProcessingStage::Encoding, "boom");

        let console: Box<dyn ProgressReporter> = Box::new(ConsoleProgressReporter::new(true));
        console.report_completion(1, &ProcessingTimings::default());
    }
}
