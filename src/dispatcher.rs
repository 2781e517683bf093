//! Inbound event handling
//!
//! [`Dispatcher`] turns transport-neutral [`InboundEvent`]s into session
//! mutations, batch runs and [`OutboundReply`]s. [`EventRouter`] feeds a
//! stream of events to per-session workers so that one session's events are
//! handled in arrival order while different sessions proceed in parallel.

use crate::config::{CompositorConfig, OutputFormat};
use crate::error::{CompositorError, Result};
use crate::processor::CompositingProcessor;
use crate::types::{BatchReport, SessionKey, SizingInstruction, SizingMode, TemplateId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Content of an inbound message that may carry an image
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundPayload {
    /// Compressed photo
    Photo(Vec<u8>),
    /// File attachment with its declared MIME type
    Document { mime_type: String, bytes: Vec<u8> },
    /// Plain text
    Text(String),
    /// Anything else (stickers, voice notes, ...), by kind
    Other(String),
}

impl InboundPayload {
    /// Image bytes, or `UnsupportedPayload` for anything that is not an image
    pub fn into_image_bytes(self) -> Result<Vec<u8>> {
        match self {
            Self::Photo(bytes) => Ok(bytes),
            Self::Document { mime_type, bytes } if mime_type.starts_with("image/") => Ok(bytes),
            Self::Document { mime_type, .. } => Err(CompositorError::unsupported_payload(format!(
                "document of type {}",
                mime_type
            ))),
            Self::Text(_) => Err(CompositorError::unsupported_payload("text message")),
            Self::Other(kind) => Err(CompositorError::unsupported_payload(kind)),
        }
    }
}

/// Events consumed by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundEvent {
    Start(SessionKey),
    ListTemplates(SessionKey),
    SelectTemplate(SessionKey, TemplateId),
    SetSizingMode(SessionKey, SizingMode),
    ImageArrived(SessionKey, InboundPayload),
    SetDimension(SessionKey, String),
    RunBatch(SessionKey),
}

impl InboundEvent {
    #[must_use]
    pub fn session_key(&self) -> &SessionKey {
        match self {
            Self::Start(key)
            | Self::ListTemplates(key)
            | Self::SelectTemplate(key, _)
            | Self::SetSizingMode(key, _)
            | Self::ImageArrived(key, _)
            | Self::SetDimension(key, _)
            | Self::RunBatch(key) => key,
        }
    }

    /// Interpret a line of user text
    ///
    /// Commands: `/start`, `/template` (menu), `/template <id>` or
    /// `template_<id>` (selection), `/width`, `/height`, `done`. Anything
    /// else is dimension text.
    #[must_use]
    pub fn from_text(key: SessionKey, text: &str) -> Self {
        let trimmed = text.trim();
        let mut tokens = trimmed.split_whitespace();
        let command = tokens.next().unwrap_or_default().to_lowercase();
        let argument = tokens.next();

        match (command.as_str(), argument) {
            ("/start", _) => Self::Start(key),
            ("/template", None) => Self::ListTemplates(key),
            ("/template", Some(id)) => Self::SelectTemplate(key, TemplateId::new(id)),
            ("/width", None) => Self::SetSizingMode(key, SizingMode::ByWidth),
            ("/height", None) => Self::SetSizingMode(key, SizingMode::ByHeight),
            ("done" | "/done", None) => Self::RunBatch(key),
            _ => match trimmed.strip_prefix("template_") {
                Some(id) if !id.is_empty() => Self::SelectTemplate(key, TemplateId::new(id)),
                _ => Self::SetDimension(key, trimmed.to_string()),
            },
        }
    }
}

/// Effects for the transport to render
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundReply {
    Text(String),
    /// Template choices, rendered as buttons or a list
    TemplateMenu(Vec<TemplateId>),
    /// One composited image
    Photo {
        index: usize,
        file_name: String,
        bytes: Vec<u8>,
        format: OutputFormat,
    },
}

impl OutboundReply {
    fn text<S: Into<String>>(text: S) -> Self {
        Self::Text(text.into())
    }
}

/// Parse `width <n>` or `height <n>`
///
/// The keyword is case-insensitive; `n` must be a positive integer no larger
/// than `max_dimension`.
///
/// # Examples
/// ```rust
/// use bgremove_compositor::dispatcher::parse_dimension;
/// use bgremove_compositor::SizingMode;
///
/// let sizing = parse_dimension("Width 1000", 8192)?;
/// assert_eq!(sizing.mode, SizingMode::ByWidth);
/// assert_eq!(sizing.dimension.get(), 1000);
/// assert!(parse_dimension("sideways 5", 8192).is_err());
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn parse_dimension(text: &str, max_dimension: u32) -> Result<SizingInstruction> {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let [keyword, value] = tokens[..] else {
        return Err(CompositorError::dimension_parse(
            text,
            "expected 'width <pixels>' or 'height <pixels>'",
        ));
    };

    let mode = match keyword.to_lowercase().as_str() {
        "width" => SizingMode::ByWidth,
        "height" => SizingMode::ByHeight,
        other => {
            return Err(CompositorError::dimension_parse(
                text,
                format!("unknown keyword '{}'", other),
            ))
        },
    };

    let dimension = value
        .parse::<u32>()
        .ok()
        .and_then(NonZeroU32::new)
        .ok_or_else(|| {
            CompositorError::dimension_parse(
                text,
                format!("'{}' is not a positive whole number", value),
            )
        })?;

    if dimension.get() > max_dimension {
        return Err(CompositorError::dimension_parse(
            text,
            format!("{} exceeds the maximum of {} pixels", dimension, max_dimension),
        ));
    }

    Ok(SizingInstruction::new(mode, dimension))
}

/// User-facing text for an error
#[must_use]
pub fn user_message(error: &CompositorError) -> String {
    match error {
        CompositorError::TemplateNotFound(id) => {
            format!("❌ Template not found: {}. Use /template to choose another.", id)
        },
        CompositorError::DimensionNotSet => {
            "📏 Send 'width <pixels>' or 'height <pixels>' first.".to_string()
        },
        CompositorError::DimensionParseError { reason, .. } => format!(
            "⚠️ Could not read the size: {}. Send 'width <pixels>' or 'height <pixels>'.",
            reason
        ),
        CompositorError::UnsupportedPayload(kind) => {
            format!("⚠️ That is not an image ({}). Please send a photo.", kind)
        },
        other => format!("❌ {}", other),
    }
}

/// Applies inbound events to the session store and runs batches
pub struct Dispatcher {
    processor: Arc<CompositingProcessor>,
    max_dimension: u32,
}

impl Dispatcher {
    #[must_use]
    pub fn new(processor: Arc<CompositingProcessor>, max_dimension: u32) -> Self {
        Self {
            processor,
            max_dimension,
        }
    }

    /// Dispatcher over a fully wired processor
    pub fn from_config(config: &CompositorConfig) -> Result<Self> {
        let processor = CompositingProcessor::from_config(config)?;
        Ok(Self::new(Arc::new(processor), config.max_dimension))
    }

    #[must_use]
    pub fn processor(&self) -> &Arc<CompositingProcessor> {
        &self.processor
    }

    /// Handle one event and return the replies for its session
    #[instrument(skip_all, fields(session = %event.session_key()))]
    pub async fn handle(&self, event: InboundEvent) -> Vec<OutboundReply> {
        let sessions = self.processor.sessions();

        match event {
            InboundEvent::Start(key) => {
                sessions.get_or_create(&key);
                vec![OutboundReply::text(
                    "👋 Send me one or more images.\n\nUse /template to choose a template first.",
                )]
            },
            InboundEvent::ListTemplates(_) => {
                vec![OutboundReply::TemplateMenu(self.processor.templates().ids())]
            },
            InboundEvent::SelectTemplate(key, template_id) => {
                if !self.processor.templates().contains(&template_id) {
                    warn!(template = %template_id, "selected template is not registered");
                }
                let reply = format!("✅ Template {} selected.", template_id);
                sessions.set_template(&key, template_id);
                vec![OutboundReply::Text(reply)]
            },
            InboundEvent::SetSizingMode(key, mode) => {
                sessions.set_sizing_mode(&key, mode);
                let session = sessions.get_or_create(&key);
                let reply = match session.sizing() {
                    Some(sizing) => format!("📏 Scaling mode set to: {} ({}px)", mode, sizing.dimension),
                    None => format!("📏 Scaling mode set to: {}", mode),
                };
                vec![OutboundReply::Text(reply)]
            },
            InboundEvent::ImageArrived(key, payload) => self.image_arrived(&key, payload),
            InboundEvent::SetDimension(key, text) => self.set_dimension(&key, &text).await,
            InboundEvent::RunBatch(key) => {
                if sessions.get_or_create(&key).queued_images.is_empty() {
                    return vec![OutboundReply::text("📭 No images queued. Send a photo first.")];
                }
                self.run_batch(&key).await
            },
        }
    }

    fn image_arrived(&self, key: &SessionKey, payload: InboundPayload) -> Vec<OutboundReply> {
        let bytes = match payload.into_image_bytes() {
            Ok(bytes) => bytes,
            Err(e) => {
                debug!(error = %e, "rejected inbound payload");
                return vec![OutboundReply::Text(user_message(&e))];
            },
        };

        let sessions = self.processor.sessions();
        let image_ref = self.processor.images().stage(bytes);
        let queued = sessions.enqueue_image(key, image_ref);
        sessions.set_awaiting_dimension(key, true);

        let session = sessions.get_or_create(key);
        let hint = match session.sizing() {
            Some(sizing) => format!(", or 'done' to use {}", sizing),
            None => String::new(),
        };
        vec![OutboundReply::Text(format!(
            "📥 Image {} queued. Send 'width <pixels>' or 'height <pixels>'{}.",
            queued, hint
        ))]
    }

    async fn set_dimension(&self, key: &SessionKey, text: &str) -> Vec<OutboundReply> {
        let sizing = match parse_dimension(text, self.max_dimension) {
            Ok(sizing) => sizing,
            Err(e) => {
                debug!(error = %e, "dimension text rejected");
                return vec![OutboundReply::Text(user_message(&e))];
            },
        };

        let sessions = self.processor.sessions();
        sessions.set_sizing(key, sizing.mode, sizing.dimension);
        let mut replies = vec![OutboundReply::Text(format!("📏 Size set to {}.", sizing))];

        if !sessions.get_or_create(key).queued_images.is_empty() {
            replies.extend(self.run_batch(key).await);
        }
        replies
    }

    async fn run_batch(&self, key: &SessionKey) -> Vec<OutboundReply> {
        match self.processor.process_batch(key).await {
            Ok(report) => Self::render_report(report),
            Err(e) => {
                info!(error = %e, "batch not started");
                vec![OutboundReply::Text(user_message(&e))]
            },
        }
    }

    /// One reply per image, in queue order, plus a summary on partial failure
    fn render_report(report: BatchReport) -> Vec<OutboundReply> {
        let total = report.outcomes.len();
        let failed = report.failure_count();

        let mut replies: Vec<OutboundReply> = report
            .outcomes
            .into_iter()
            .map(|outcome| match outcome.result {
                Ok(result) => OutboundReply::Photo {
                    index: outcome.index,
                    file_name: result.file_name(),
                    bytes: result.bytes,
                    format: result.format,
                },
                Err(e) => OutboundReply::Text(format!(
                    "❌ Image {} could not be processed: {}",
                    outcome.index, e
                )),
            })
            .collect();

        if failed > 0 {
            replies.push(OutboundReply::Text(format!(
                "⚠️ {} of {} images processed.",
                total - failed,
                total
            )));
        }
        replies
    }
}

/// Delivery side of a transport
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn deliver(&self, key: &SessionKey, reply: OutboundReply) -> Result<()>;
}

struct Worker {
    sender: mpsc::UnboundedSender<InboundEvent>,
    handle: JoinHandle<()>,
}

/// Routes an event stream to one worker task per session
///
/// Forwarding to a session worker never waits, so a session stuck in a long
/// batch cannot hold up events of other sessions. Backpressure applies only
/// at the bounded inbox.
pub struct EventRouter {
    dispatcher: Arc<Dispatcher>,
    idle_timeout: Duration,
}

impl EventRouter {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            dispatcher,
            idle_timeout: Duration::from_secs(300),
        }
    }

    /// Idle time after which a session worker exits (respawned on demand)
    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    /// Consume `inbox` until it closes, then wait for every worker to finish
    pub async fn run(self, mut inbox: mpsc::Receiver<InboundEvent>, outbox: Arc<dyn Outbox>) {
        let mut workers: HashMap<SessionKey, Worker> = HashMap::new();

        while let Some(event) = inbox.recv().await {
            workers.retain(|_, worker| !worker.handle.is_finished());

            let key = event.session_key().clone();
            let mut pending = event;
            loop {
                let Some(sender) = workers.get(&key).map(|worker| worker.sender.clone()) else {
                    let worker = self.spawn_worker(&key, None, &outbox);
                    workers.insert(key.clone(), worker);
                    continue;
                };

                match sender.send(pending) {
                    Ok(()) => break,
                    // Worker went idle and closed its queue; hand over.
                    Err(mpsc::error::SendError(returned)) => {
                        pending = returned;
                        let previous = workers.remove(&key).map(|worker| worker.handle);
                        let worker = self.spawn_worker(&key, previous, &outbox);
                        workers.insert(key.clone(), worker);
                    },
                }
            }
        }

        info!(workers = workers.len(), "inbox closed, draining session workers");
        let handles: Vec<JoinHandle<()>> = workers.into_values().map(|worker| worker.handle).collect();
        for result in futures::future::join_all(handles).await {
            if let Err(e) = result {
                warn!(error = %e, "session worker failed");
            }
        }
    }

    fn spawn_worker(
        &self,
        key: &SessionKey,
        previous: Option<JoinHandle<()>>,
        outbox: &Arc<dyn Outbox>,
    ) -> Worker {
        let (sender, receiver) = mpsc::unbounded_channel();
        let handle = tokio::spawn(session_worker(
            key.clone(),
            receiver,
            previous,
            Arc::clone(&self.dispatcher),
            Arc::clone(outbox),
            self.idle_timeout,
        ));
        debug!(session = %key, "session worker spawned");
        Worker { sender, handle }
    }
}

async fn session_worker(
    key: SessionKey,
    mut receiver: mpsc::UnboundedReceiver<InboundEvent>,
    previous: Option<JoinHandle<()>>,
    dispatcher: Arc<Dispatcher>,
    outbox: Arc<dyn Outbox>,
    idle_timeout: Duration,
) {
    // Events of the retiring worker come first.
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            warn!(session = %key, error = %e, "previous session worker failed");
        }
    }

    loop {
        match tokio::time::timeout(idle_timeout, receiver.recv()).await {
            Ok(Some(event)) => handle_and_deliver(&key, event, &dispatcher, outbox.as_ref()).await,
            Ok(None) => break,
            Err(_) => {
                receiver.close();
                while let Ok(event) = receiver.try_recv() {
                    handle_and_deliver(&key, event, &dispatcher, outbox.as_ref()).await;
                }
                debug!(session = %key, "session worker idle, exiting");
                break;
            },
        }
    }
}

async fn handle_and_deliver(
    key: &SessionKey,
    event: InboundEvent,
    dispatcher: &Dispatcher,
    outbox: &dyn Outbox,
) {
    for reply in dispatcher.handle(event).await {
        if let Err(e) = outbox.deliver(key, reply).await {
            warn!(session = %key, error = %e, "reply delivery failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> SessionKey {
        SessionKey::from("chat")
    }

    #[test]
    fn test_parse_dimension() {
        let sizing = parse_dimension("width 1000", 8192).unwrap();
        assert_eq!((sizing.mode, sizing.dimension.get()), (SizingMode::ByWidth, 1000));

        let sizing = parse_dimension("  HEIGHT   800 ", 8192).unwrap();
        assert_eq!((sizing.mode, sizing.dimension.get()), (SizingMode::ByHeight, 800));
    }

    #[test]
    fn test_parse_dimension_rejects() {
        for text in [
            "sideways 5",
            "width",
            "width 0",
            "width -3",
            "width 12.5",
            "width 10 px",
            "",
            "width 9000",
        ] {
            let err = parse_dimension(text, 8192).unwrap_err();
            assert!(
                matches!(err, CompositorError::DimensionParseError { .. }),
                "{:?}",
                text
            );
        }
    }

    #[test]
    fn test_from_text_commands() {
        assert_eq!(InboundEvent::from_text(key(), "/start"), InboundEvent::Start(key()));
        assert_eq!(
            InboundEvent::from_text(key(), "/template"),
            InboundEvent::ListTemplates(key())
        );
        assert_eq!(
            InboundEvent::from_text(key(), "/template 2"),
            InboundEvent::SelectTemplate(key(), TemplateId::from("2"))
        );
        assert_eq!(
            InboundEvent::from_text(key(), "template_1"),
            InboundEvent::SelectTemplate(key(), TemplateId::from("1"))
        );
        assert_eq!(
            InboundEvent::from_text(key(), "/height"),
            InboundEvent::SetSizingMode(key(), SizingMode::ByHeight)
        );
        assert_eq!(InboundEvent::from_text(key(), "Done"), InboundEvent::RunBatch(key()));
        assert_eq!(
            InboundEvent::from_text(key(), "width 1200"),
            InboundEvent::SetDimension(key(), "width 1200".to_string())
        );
    }

    #[test]
    fn test_payload_classification() {
        assert!(InboundPayload::Photo(vec![1]).into_image_bytes().is_ok());
        assert!(InboundPayload::Document {
            mime_type: "image/png".to_string(),
            bytes: vec![1],
        }
        .into_image_bytes()
        .is_ok());

        for payload in [
            InboundPayload::Document {
                mime_type: "application/pdf".to_string(),
                bytes: vec![1],
            },
            InboundPayload::Text("hello".to_string()),
            InboundPayload::Other("sticker".to_string()),
        ] {
            assert!(matches!(
                payload.into_image_bytes(),
                Err(CompositorError::UnsupportedPayload(_))
            ));
        }
    }

    #[test]
    fn test_user_messages_name_the_condition() {
        assert!(user_message(&CompositorError::template_not_found("9")).contains("Template not found"));
        assert!(user_message(&CompositorError::DimensionNotSet).contains("width <pixels>"));
        assert!(user_message(&CompositorError::dimension_parse("x", "unknown keyword 'x'"))
            .contains("unknown keyword"));
    }
}
