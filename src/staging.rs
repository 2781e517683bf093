//! In-memory staging of user photos
//!
//! Inbound photo bytes are parked here until the batch that consumes them.
//! A queued image is only an [`ImageRef`]; the bytes are released exactly
//! once, by the [`StagedImage`] guard the batch processor holds while it
//! works on that image, on success and failure alike.

use crate::error::{CompositorError, Result};
use crate::session::EvictionListener;
use crate::types::ImageRef;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Storage behind [`ImageRef`] handles
pub trait ImageStore: Send + Sync {
    /// Park bytes and return a fresh handle
    fn stage(&self, bytes: Vec<u8>) -> ImageRef;

    /// Bytes of a staged image
    ///
    /// # Errors
    /// `Staging` when the handle is unknown or already released.
    fn load(&self, image_ref: &ImageRef) -> Result<Arc<[u8]>>;

    /// Drop the bytes; returns whether the handle was still staged
    fn release(&self, image_ref: &ImageRef) -> bool;

    /// Number of staged images
    fn staged_count(&self) -> usize;
}

/// Process-local [`ImageStore`]
#[derive(Debug, Default)]
pub struct InMemoryImageStore {
    images: Mutex<HashMap<ImageRef, Arc<[u8]>>>,
}

impl InMemoryImageStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contains(&self, image_ref: &ImageRef) -> bool {
        self.lock().contains_key(image_ref)
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ImageRef, Arc<[u8]>>> {
        self.images.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ImageStore for InMemoryImageStore {
    fn stage(&self, bytes: Vec<u8>) -> ImageRef {
        let image_ref = ImageRef::new();
        log::trace!("staging {} bytes as {}", bytes.len(), image_ref);
        self.lock().insert(image_ref, Arc::from(bytes));
        image_ref
    }

    fn load(&self, image_ref: &ImageRef) -> Result<Arc<[u8]>> {
        self.lock().get(image_ref).cloned().ok_or_else(|| {
            CompositorError::staging(format!("image {} is not staged", image_ref))
        })
    }

    fn release(&self, image_ref: &ImageRef) -> bool {
        self.lock().remove(image_ref).is_some()
    }

    fn staged_count(&self) -> usize {
        self.lock().len()
    }
}

/// Scoped ownership of one staged image; releases it on drop
pub struct StagedImage {
    store: Arc<dyn ImageStore>,
    image_ref: ImageRef,
}

impl StagedImage {
    #[must_use]
    pub fn new(store: Arc<dyn ImageStore>, image_ref: ImageRef) -> Self {
        Self { store, image_ref }
    }

    #[must_use]
    pub fn image_ref(&self) -> ImageRef {
        self.image_ref
    }

    pub fn bytes(&self) -> Result<Arc<[u8]>> {
        self.store.load(&self.image_ref)
    }
}

impl Drop for StagedImage {
    fn drop(&mut self) {
        if !self.store.release(&self.image_ref) {
            log::debug!("staged image {} was already released", self.image_ref);
        }
    }
}

/// Eviction listener that releases the queued images of evicted sessions
#[must_use]
pub fn release_on_eviction(store: Arc<dyn ImageStore>) -> EvictionListener {
    Arc::new(move |session| {
        let released = session
            .queued_images
            .iter()
            .filter(|image_ref| store.release(image_ref))
            .count();
        if released > 0 {
            log::info!(
                "released {} staged image(s) of evicted session {}",
                released,
                session.key
            );
        }
    })
}
