//! Compositor CLI
//!
//! Two ways to drive the same core: a one-shot batch over files given on the
//! command line, and an interactive session where stdin lines are treated as
//! chat messages (commands, sizes, or paths of photos to send).

use super::config::CliConfigBuilder;
use crate::{
    config::CompositorConfig,
    dispatcher::{Dispatcher, EventRouter, InboundEvent, InboundPayload, OutboundReply, Outbox},
    error::Result as CompositorResult,
    processor::CompositingProcessor,
    services::{
        ConsoleProgressReporter, ImageIOService, ProcessingStage, ProgressReporter, ProgressUpdate,
    },
    tracing_config::{events, init_cli_tracing, spans, TracingFormat},
    types::{BatchReport, ProcessingTimings, SessionKey, TemplateId},
};
use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn, Instrument};

/// Remove photo backgrounds and place the cutouts on template canvases
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "bgremove-compositor")]
#[allow(clippy::struct_excessive_bools)]
pub struct Cli {
    /// Photos to composite, in order (one-shot mode)
    #[arg(value_name = "INPUT", required_unless_present_any = &["interactive", "save_config"])]
    pub input: Vec<PathBuf>,

    /// Template id to composite onto
    #[arg(short, long, value_name = "ID")]
    pub template: Option<String>,

    /// Scale each cutout to this width in pixels
    #[arg(long, value_name = "PIXELS", conflicts_with = "height")]
    pub width: Option<u32>,

    /// Scale each cutout to this height in pixels
    #[arg(long, value_name = "PIXELS")]
    pub height: Option<u32>,

    /// JSON configuration file (flags override its values)
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory relative template paths are resolved against
    #[arg(long, value_name = "DIR")]
    pub templates_dir: Option<PathBuf>,

    /// Register an extra template, as ID=PATH (repeatable)
    #[arg(long = "template-file", value_name = "ID=PATH")]
    pub template_files: Vec<String>,

    /// Matting backend
    #[arg(short, long, value_enum)]
    pub backend: Option<CliBackend>,

    /// ONNX segmentation model (tract backend)
    #[arg(short, long, value_name = "MODEL")]
    pub model: Option<PathBuf>,

    /// Output directory for composited images
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub output: PathBuf,

    /// Output format
    #[arg(short, long, value_enum)]
    pub format: Option<CliOutputFormat>,

    /// JPEG quality (0-100)
    #[arg(long, value_name = "QUALITY")]
    pub jpeg_quality: Option<u8>,

    /// Skip the sharpness and colour boost
    #[arg(long)]
    pub no_enhance: bool,

    /// Read commands, sizes and photo paths from stdin
    #[arg(short, long)]
    pub interactive: bool,

    /// Session key used in interactive mode
    #[arg(long, value_name = "KEY", default_value = "local")]
    pub session: String,

    /// Report per-stage progress through the log instead of a progress bar
    #[arg(long)]
    pub progress: bool,

    /// Write the effective configuration to FILE and exit
    #[arg(long, value_name = "FILE")]
    pub save_config: Option<PathBuf>,

    /// Log output format
    #[arg(long, value_enum, default_value_t = CliLogFormat::Console)]
    pub log_format: CliLogFormat,

    /// Enable verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliOutputFormat {
    Png,
    Jpeg,
    Webp,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
pub enum CliBackend {
    Tract,
    Mock,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum CliLogFormat {
    Console,
    Compact,
    #[cfg(feature = "tracing-json")]
    Json,
}

impl From<CliLogFormat> for TracingFormat {
    fn from(format: CliLogFormat) -> Self {
        match format {
            CliLogFormat::Console => Self::Console,
            CliLogFormat::Compact => Self::Compact,
            #[cfg(feature = "tracing-json")]
            CliLogFormat::Json => Self::Json,
        }
    }
}

pub async fn main() -> Result<()> {
    let cli = Cli::parse();

    let run_id = uuid::Uuid::new_v4().to_string();
    init_cli_tracing(cli.verbose, cli.log_format.into(), &run_id)
        .context("Failed to initialize tracing")?;

    let config = CliConfigBuilder::from_cli(&cli).context("Failed to build configuration")?;

    if let Some(path) = &cli.save_config {
        config
            .to_json_file(path)
            .with_context(|| format!("Failed to write configuration to {}", path.display()))?;
        info!("💾 Configuration written to {}", path.display());
        return Ok(());
    }

    let span = spans::run(&run_id, &config.matting_backend.to_string());
    async move {
        if cli.interactive {
            run_interactive(&cli, &config).await
        } else {
            run_batch(&cli, &config).await
        }
    }
    .instrument(span)
    .await
}

/// Composite every input file in one batch
async fn run_batch(cli: &Cli, config: &CompositorConfig) -> Result<()> {
    let sizing = CliConfigBuilder::sizing(cli, config)?.ok_or_else(|| {
        anyhow::anyhow!("A target size is required: pass --width <PIXELS> or --height <PIXELS>")
    })?;
    let inputs = collect_inputs(&cli.input)?;
    if inputs.is_empty() {
        events::warning_with_recommendation(
            "No supported image files in the inputs",
            "pass .png, .jpg, .webp or .tiff files",
        );
        return Ok(());
    }

    let reporter: Arc<dyn ProgressReporter> = if cli.progress {
        Arc::new(ConsoleProgressReporter::new(cli.verbose > 0))
    } else {
        Arc::new(BarProgressReporter::new())
    };
    let processor = CompositingProcessor::from_config(config)
        .context("Failed to create compositing processor")?
        .with_progress_reporter(reporter);

    let key = SessionKey::new(cli.session.as_str());
    let template = cli
        .template
        .as_deref()
        .map_or_else(|| config.default_template_id(), TemplateId::new);
    processor.sessions().set_template(&key, template);
    processor
        .sessions()
        .set_sizing(&key, sizing.mode, sizing.dimension);

    for path in &inputs {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let queued = processor
            .sessions()
            .enqueue_image(&key, processor.images().stage(bytes));
        debug!("queued {} as image {}", path.display(), queued);
    }

    info!(
        "Compositing {} image(s) onto template {} at {}",
        inputs.len(),
        processor.sessions().get_or_create(&key).selected_template,
        sizing
    );
    let start = Instant::now();
    let report = processor
        .process_batch(&key)
        .await
        .context("Batch could not start")?;
    events::performance_metric("batch", start.elapsed().as_millis() as u64);

    let written = write_report(&report, &inputs, &cli.output)?;
    summarize(&report, written, start.elapsed());

    if report.success_count() == 0 {
        anyhow::bail!("None of the {} image(s) could be composited", report.outcomes.len());
    }
    Ok(())
}

fn collect_inputs(inputs: &[PathBuf]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::with_capacity(inputs.len());
    for path in inputs {
        if !path.is_file() {
            anyhow::bail!(
                "Input path does not exist or is not a file: {}",
                path.display()
            );
        }
        if ImageIOService::is_supported_format(path) {
            files.push(path.clone());
        } else {
            warn!("Skipping unsupported file: {}", path.display());
        }
    }
    Ok(files)
}

/// Write each successful result next to the others, named after its input
fn write_report(report: &BatchReport, inputs: &[PathBuf], output_dir: &Path) -> Result<usize> {
    let mut written = 0;
    for outcome in &report.outcomes {
        let input = inputs.get(outcome.index - 1);
        match &outcome.result {
            Ok(result) => {
                let file_name = input
                    .and_then(|path| path.file_stem())
                    .and_then(|stem| stem.to_str())
                    .map_or_else(
                        || result.file_name(),
                        |stem| format!("{}_composited.{}", stem, result.format.extension()),
                    );
                let path = output_dir.join(file_name);
                let _entered = spans::result_output(&path, result.format.extension()).entered();
                ImageIOService::save_bytes(&result.bytes, &path)
                    .with_context(|| format!("Failed to save {}", path.display()))?;
                info!("✅ {} → {}", display_input(input), path.display());
                written += 1;
            },
            Err(e) => events::error_with_context(
                e,
                &format!("image {} ({})", outcome.index, display_input(input)),
            ),
        }
    }
    Ok(written)
}

fn display_input(input: Option<&PathBuf>) -> String {
    input.map_or_else(|| "?".to_string(), |path| path.display().to_string())
}

fn summarize(report: &BatchReport, written: usize, elapsed: Duration) {
    info!("📊 Batch summary:");
    info!("  ├─ Images composited: {}", written);
    info!("  ├─ Images failed: {}", report.failure_count());
    info!("  ├─ Total time: {:.2}s", elapsed.as_secs_f64());
    info!(
        "  └─ Average per image: {:.2}s",
        if report.outcomes.is_empty() {
            0.0
        } else {
            elapsed.as_secs_f64() / report.outcomes.len() as f64
        }
    );
    if report.failure_count() > 0 {
        warn!(
            "Some images failed: {:?}. Composited: {}",
            report.failed_indices(),
            written
        );
    }
}

/// Progress bar over the images of one batch
struct BarProgressReporter {
    bar: ProgressBar,
}

impl BarProgressReporter {
    fn new() -> Self {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}",
            )
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
        );
        Self { bar }
    }
}

impl ProgressReporter for BarProgressReporter {
    fn report_batch_started(&self, total: usize) {
        self.bar.set_length(total as u64);
        self.bar.set_position(0);
    }

    fn report_progress(&self, update: ProgressUpdate) {
        self.bar
            .set_message(format!("image {}: {}", update.index, update.description));
    }

    fn report_completion(&self, index: usize, timings: &ProcessingTimings) {
        self.bar.inc(1);
        self.bar
            .set_message(format!("image {} done in {}ms", index, timings.total_ms));
        if self.bar.position() >= self.bar.length().unwrap_or(0) {
            self.bar.finish_with_message("Completed!");
        }
    }

    fn report_error(&self, index: usize, stage: ProcessingStage, error: &str) {
        self.bar.inc(1);
        self.bar.println(format!(
            "❌ image {} failed during {}: {}",
            index,
            stage.description(),
            error
        ));
        if self.bar.position() >= self.bar.length().unwrap_or(0) {
            self.bar.finish_with_message("Completed with errors");
        }
    }
}

/// Drive a single chat-like session from stdin
async fn run_interactive(cli: &Cli, config: &CompositorConfig) -> Result<()> {
    let processor = CompositingProcessor::from_config(config)
        .context("Failed to create compositing processor")?
        .with_progress_reporter(Arc::new(ConsoleProgressReporter::new(cli.verbose > 0)));
    let dispatcher = Arc::new(Dispatcher::new(Arc::new(processor), config.max_dimension));
    let router = EventRouter::new(dispatcher)
        .with_idle_timeout(Duration::from_secs(config.worker_idle_secs));
    let outbox: Arc<dyn Outbox> = Arc::new(ConsoleOutbox::new(cli.output.clone()));

    let key = SessionKey::new(cli.session.as_str());
    let (sender, inbox) = mpsc::channel(64);
    let routing = tokio::spawn(router.run(inbox, outbox).instrument(tracing::Span::current()));

    if let Some(sizing) = CliConfigBuilder::sizing(cli, config)? {
        let text = format!("{} {}", sizing.mode, sizing.dimension);
        sender
            .send(InboundEvent::SetDimension(key.clone(), text))
            .await
            .context("Event router stopped")?;
    }
    if let Some(template) = &cli.template {
        sender
            .send(InboundEvent::SelectTemplate(key.clone(), TemplateId::new(template.as_str())))
            .await
            .context("Event router stopped")?;
    }
    sender
        .send(InboundEvent::Start(key.clone()))
        .await
        .context("Event router stopped")?;

    let span = spans::interactive_session(key.as_str());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines
        .next_line()
        .instrument(span.clone())
        .await
        .context("Failed to read stdin")?
    {
        if line.trim().is_empty() {
            continue;
        }
        let event = line_to_event(&key, &line).await?;
        debug!(parent: &span, "inbound event: {:?}", event_kind(&event));
        sender.send(event).await.context("Event router stopped")?;
    }

    drop(sender);
    routing.await.context("Event router panicked")?;
    events::progress("Session closed", "👋");
    Ok(())
}

/// A line naming an existing file is a photo; anything else is text
async fn line_to_event(key: &SessionKey, line: &str) -> Result<InboundEvent> {
    let candidate = Path::new(line.trim());
    if candidate.is_file() {
        let bytes = tokio::fs::read(candidate)
            .await
            .with_context(|| format!("Failed to read {}", candidate.display()))?;
        let payload = if ImageIOService::looks_like_image(&bytes) {
            InboundPayload::Photo(bytes)
        } else {
            InboundPayload::Other(format!("file {}", candidate.display()))
        };
        return Ok(InboundEvent::ImageArrived(key.clone(), payload));
    }
    Ok(InboundEvent::from_text(key.clone(), line))
}

fn event_kind(event: &InboundEvent) -> &'static str {
    match event {
        InboundEvent::Start(_) => "start",
        InboundEvent::ListTemplates(_) => "list_templates",
        InboundEvent::SelectTemplate(..) => "select_template",
        InboundEvent::SetSizingMode(..) => "set_sizing_mode",
        InboundEvent::ImageArrived(..) => "image_arrived",
        InboundEvent::SetDimension(..) => "set_dimension",
        InboundEvent::RunBatch(_) => "run_batch",
    }
}

/// Prints text replies and writes photo replies to the output directory
struct ConsoleOutbox {
    output_dir: PathBuf,
    delivered: AtomicUsize,
}

impl ConsoleOutbox {
    fn new(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            delivered: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Outbox for ConsoleOutbox {
    async fn deliver(&self, key: &SessionKey, reply: OutboundReply) -> CompositorResult<()> {
        match reply {
            OutboundReply::Text(text) => println!("{}", text),
            OutboundReply::TemplateMenu(ids) => {
                println!("🖼️  Choose a template:");
                for id in ids {
                    println!("  /template {}", id);
                }
            },
            OutboundReply::Photo {
                file_name, bytes, ..
            } => {
                // Batches restart at result_1, so prefix a running number.
                let sequence = self.delivered.fetch_add(1, Ordering::Relaxed) + 1;
                let path = self
                    .output_dir
                    .join(format!("{}_{:04}_{}", key, sequence, file_name));
                ImageIOService::save_bytes(&bytes, &path)?;
                println!("🖼️  Saved {}", path.display());
            },
        }
        Ok(())
    }
}
