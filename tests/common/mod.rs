//! Shared fixtures for the integration tests

#![allow(dead_code)]

use bgremove_compositor::{
    backends::MockRemover,
    dispatcher::{Dispatcher, OutboundReply, Outbox},
    error::Result,
    matting::BackgroundRemover,
    processor::{CompositingProcessor, ProcessorConfig},
    session::SessionStore,
    staging::InMemoryImageStore,
    templates::TemplateRegistry,
    types::{SessionKey, SizingMode, TemplateId},
};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

pub const CANVAS_SIZE: u32 = 64;
pub const CANVAS_COLOR: Rgba<u8> = Rgba([0, 0, 255, 255]);

/// PNG of a red rectangle on a white backdrop
pub fn photo_png(width: u32, height: u32) -> Vec<u8> {
    let image = RgbaImage::from_fn(width, height, |x, y| {
        let inside = x >= width / 4 && x < width * 3 / 4 && y >= height / 5 && y < height * 4 / 5;
        if inside {
            Rgba([200, 30, 30, 255])
        } else {
            Rgba([255, 255, 255, 255])
        }
    });
    encode_png(&image)
}

pub fn encode_png(image: &RgbaImage) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgba8(image.clone())
        .write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode test image");
    bytes
}

pub fn decode(bytes: &[u8]) -> RgbaImage {
    image::load_from_memory(bytes)
        .expect("decode result image")
        .to_rgba8()
}

pub fn canvas() -> RgbaImage {
    RgbaImage::from_pixel(CANVAS_SIZE, CANVAS_SIZE, CANVAS_COLOR)
}

/// Processor over in-memory collaborators with template "1" registered
pub fn processor_with(remover: Arc<dyn BackgroundRemover>) -> CompositingProcessor {
    let sessions = Arc::new(SessionStore::new(
        TemplateId::from("1"),
        SizingMode::ByWidth,
        64,
        None,
    ));
    let templates = Arc::new(TemplateRegistry::new());
    templates.register_image(TemplateId::from("1"), canvas());
    CompositingProcessor::new(
        ProcessorConfig::default(),
        sessions,
        templates,
        remover,
        Arc::new(InMemoryImageStore::new()),
    )
}

pub fn processor() -> CompositingProcessor {
    processor_with(Arc::new(MockRemover::new()))
}

pub fn dispatcher_with(remover: Arc<dyn BackgroundRemover>) -> Dispatcher {
    Dispatcher::new(Arc::new(processor_with(remover)), 8192)
}

pub fn dispatcher() -> Dispatcher {
    dispatcher_with(Arc::new(MockRemover::new()))
}

pub fn texts(replies: &[OutboundReply]) -> Vec<&str> {
    replies
        .iter()
        .filter_map(|reply| match reply {
            OutboundReply::Text(text) => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

pub fn photo_indices(replies: &[OutboundReply]) -> Vec<usize> {
    replies
        .iter()
        .filter_map(|reply| match reply {
            OutboundReply::Photo { index, .. } => Some(*index),
            _ => None,
        })
        .collect()
}

/// Mock remover that parks every call until the gate opens
#[derive(Default)]
pub struct GatedRemover {
    inner: MockRemover,
    open: Mutex<bool>,
    opened: Condvar,
    started: AtomicUsize,
}

impl GatedRemover {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }

    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }

    /// Poll until at least `count` calls are parked at the gate
    pub async fn wait_for_started(&self, count: usize) {
        for _ in 0..500 {
            if self.started() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("only {} of {} removals started", self.started(), count);
    }
}

impl BackgroundRemover for GatedRemover {
    fn remove_background(&self, image_bytes: &[u8]) -> Result<RgbaImage> {
        self.started.fetch_add(1, Ordering::SeqCst);
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.opened.wait(open).unwrap();
        }
        drop(open);
        self.inner.remove_background(image_bytes)
    }

    fn name(&self) -> &str {
        "gated-mock"
    }
}

/// Outbox that records every delivery in order
#[derive(Default)]
pub struct RecordingOutbox {
    pub delivered: Mutex<Vec<(SessionKey, OutboundReply)>>,
}

impl RecordingOutbox {
    pub fn for_session(&self, key: &SessionKey) -> Vec<OutboundReply> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(session, _)| session == key)
            .map(|(_, reply)| reply.clone())
            .collect()
    }
}

#[async_trait::async_trait]
impl Outbox for RecordingOutbox {
    async fn deliver(&self, key: &SessionKey, reply: OutboundReply) -> Result<()> {
        self.delivered.lock().unwrap().push((key.clone(), reply));
        Ok(())
    }
}
