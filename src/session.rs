//! Process-wide session store
//!
//! Holds the per-session compositing state (selected template, sizing choice,
//! queued images) keyed by [`SessionKey`]. Sessions are created lazily with
//! default values on first access and are evicted by a capacity-bounded LRU
//! policy plus an idle TTL. A session whose batch guard is held is never
//! evicted.
//!
//! Every operation is a short synchronous critical section; no lock is held
//! across an `.await` or across background removal.

use crate::config::{CompositorConfig, SessionPolicy};
use crate::types::{ImageRef, SessionKey, SizingInstruction, SizingMode, TemplateId};
use chrono::{DateTime, Utc};
use instant::{Duration, Instant};
use lru::LruCache;
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::{debug, warn};

/// Callback receiving sessions dropped by the eviction policy
pub type EvictionListener = Arc<dyn Fn(Session) + Send + Sync>;

/// Compositing state of one user session
#[derive(Debug, Clone, PartialEq)]
pub struct Session {
    pub key: SessionKey,
    pub selected_template: TemplateId,
    pub sizing_mode: SizingMode,
    pub pending_dimension: Option<NonZeroU32>,
    pub awaiting_dimension: bool,
    /// Insertion order is processing order
    pub queued_images: Vec<ImageRef>,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
}

impl Session {
    fn new(key: SessionKey, template: TemplateId, sizing_mode: SizingMode) -> Self {
        let now = Utc::now();
        Self {
            key,
            selected_template: template,
            sizing_mode,
            pending_dimension: None,
            awaiting_dimension: false,
            queued_images: Vec::new(),
            created_at: now,
            last_active: now,
        }
    }

    /// Current sizing choice, if a dimension has been supplied
    #[must_use]
    pub fn sizing(&self) -> Option<SizingInstruction> {
        self.pending_dimension
            .map(|dimension| SizingInstruction::new(self.sizing_mode, dimension))
    }

    /// Both requirements of a batch run are met
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.pending_dimension.is_some() && !self.queued_images.is_empty()
    }
}

struct SessionEntry {
    session: Session,
    last_access: Instant,
    batch_lock: Arc<tokio::sync::Mutex<()>>,
}

impl SessionEntry {
    fn new(session: Session) -> Self {
        Self {
            session,
            last_access: Instant::now(),
            batch_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    /// A batch holds (or waits for) this session's guard
    fn is_busy(&self) -> bool {
        Arc::strong_count(&self.batch_lock) > 1
    }
}

/// Session store with LRU + idle TTL eviction
pub struct SessionStore {
    sessions: Mutex<LruCache<SessionKey, SessionEntry>>,
    default_template: TemplateId,
    default_sizing_mode: SizingMode,
    capacity: usize,
    idle_ttl: Option<Duration>,
    eviction_listener: Option<EvictionListener>,
}

impl SessionStore {
    /// Create a store; `idle_ttl` of `None` disables time-based eviction
    #[must_use]
    pub fn new(
        default_template: TemplateId,
        default_sizing_mode: SizingMode,
        capacity: usize,
        idle_ttl: Option<Duration>,
    ) -> Self {
        Self {
            // Capacity is enforced here so busy sessions can be skipped.
            sessions: Mutex::new(LruCache::unbounded()),
            default_template,
            default_sizing_mode,
            capacity: capacity.max(1),
            idle_ttl,
            eviction_listener: None,
        }
    }

    /// Create a store from the service configuration
    #[must_use]
    pub fn from_config(config: &CompositorConfig) -> Self {
        Self::with_policy(
            config.default_template_id(),
            config.default_sizing_mode,
            config.sessions,
        )
    }

    /// Create a store from an eviction policy; a TTL of 0 seconds disables expiry
    #[must_use]
    pub fn with_policy(
        default_template: TemplateId,
        default_sizing_mode: SizingMode,
        policy: SessionPolicy,
    ) -> Self {
        let ttl = (policy.idle_ttl_secs > 0).then(|| policy.idle_ttl());
        Self::new(default_template, default_sizing_mode, policy.capacity, ttl)
    }

    /// Register a callback for evicted sessions (e.g. to release staged images)
    #[must_use]
    pub fn with_eviction_listener(mut self, listener: EvictionListener) -> Self {
        self.eviction_listener = Some(listener);
        self
    }

    /// Snapshot of the session, creating it with defaults if needed
    pub fn get_or_create(&self, key: &SessionKey) -> Session {
        self.with_entry(key, |entry| entry.session.clone())
    }

    /// Record the template for the next batch
    pub fn set_template(&self, key: &SessionKey, template_id: TemplateId) {
        self.with_entry(key, |entry| entry.session.selected_template = template_id);
    }

    /// Append an image to the queue, returning the new queue length
    pub fn enqueue_image(&self, key: &SessionKey, image_ref: ImageRef) -> usize {
        self.with_entry(key, |entry| {
            entry.session.queued_images.push(image_ref);
            entry.session.queued_images.len()
        })
    }

    /// Record a complete sizing choice and stop waiting for one
    pub fn set_sizing(&self, key: &SessionKey, mode: SizingMode, dimension: NonZeroU32) {
        self.with_entry(key, |entry| {
            entry.session.sizing_mode = mode;
            entry.session.pending_dimension = Some(dimension);
            entry.session.awaiting_dimension = false;
        });
    }

    /// Change only the sizing mode, keeping any supplied dimension
    pub fn set_sizing_mode(&self, key: &SessionKey, mode: SizingMode) {
        self.with_entry(key, |entry| entry.session.sizing_mode = mode);
    }

    /// Mark whether the session is waiting for dimension text
    pub fn set_awaiting_dimension(&self, key: &SessionKey, awaiting: bool) {
        self.with_entry(key, |entry| entry.session.awaiting_dimension = awaiting);
    }

    /// Atomically take the whole queue, leaving it empty
    pub fn drain_queue(&self, key: &SessionKey) -> Vec<ImageRef> {
        self.with_entry(key, |entry| std::mem::take(&mut entry.session.queued_images))
    }

    /// Guard serializing batch runs of one session
    ///
    /// Hold the locked guard for the whole batch; the session cannot be
    /// evicted while the guard (or a waiter on it) is alive.
    pub fn batch_guard(&self, key: &SessionKey) -> Arc<tokio::sync::Mutex<()>> {
        self.with_entry(key, |entry| Arc::clone(&entry.batch_lock))
    }

    /// Whether a session exists, without creating or touching it
    pub fn contains(&self, key: &SessionKey) -> bool {
        self.lock().contains(key)
    }

    /// Number of live sessions
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every idle session older than the TTL, returning how many went
    pub fn evict_expired(&self) -> usize {
        let evicted = {
            let mut sessions = self.lock();
            Self::sweep_expired(&mut sessions, self.idle_ttl)
        };
        let count = evicted.len();
        self.notify_evicted(evicted);
        count
    }

    fn lock(&self) -> MutexGuard<'_, LruCache<SessionKey, SessionEntry>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn fresh_session(&self, key: &SessionKey) -> Session {
        Session::new(
            key.clone(),
            self.default_template.clone(),
            self.default_sizing_mode,
        )
    }

    fn with_entry<R>(&self, key: &SessionKey, f: impl FnOnce(&mut SessionEntry) -> R) -> R {
        let (result, evicted) = {
            let mut sessions = self.lock();
            let mut evicted = Vec::new();

            let expired = sessions
                .peek(key)
                .is_some_and(|entry| self.is_expired(entry));
            if expired {
                debug!(session = %key, "Session expired, starting fresh");
                if let Some(old) = sessions.pop(key) {
                    evicted.push(old.session);
                }
            }

            if !sessions.contains(key) {
                evicted.extend(Self::sweep_expired(&mut sessions, self.idle_ttl));
                if sessions.len() >= self.capacity {
                    match Self::evict_least_recent(&mut sessions) {
                        Some(session) => evicted.push(session),
                        None => warn!(
                            capacity = self.capacity,
                            "All sessions busy, exceeding session capacity"
                        ),
                    }
                }
            }

            let entry = sessions
                .get_or_insert_mut(key.clone(), || SessionEntry::new(self.fresh_session(key)));
            entry.last_access = Instant::now();
            entry.session.last_active = Utc::now();
            (f(entry), evicted)
        };

        self.notify_evicted(evicted);
        result
    }

    fn is_expired(&self, entry: &SessionEntry) -> bool {
        self.idle_ttl
            .is_some_and(|ttl| !entry.is_busy() && entry.last_access.elapsed() >= ttl)
    }

    fn sweep_expired(
        sessions: &mut LruCache<SessionKey, SessionEntry>,
        idle_ttl: Option<Duration>,
    ) -> Vec<Session> {
        let Some(ttl) = idle_ttl else {
            return Vec::new();
        };

        let expired: Vec<SessionKey> = sessions
            .iter()
            .filter(|(_, entry)| !entry.is_busy() && entry.last_access.elapsed() >= ttl)
            .map(|(key, _)| key.clone())
            .collect();

        expired
            .into_iter()
            .filter_map(|key| sessions.pop(&key).map(|entry| entry.session))
            .collect()
    }

    /// Pop the least recently used session that no batch is holding
    fn evict_least_recent(sessions: &mut LruCache<SessionKey, SessionEntry>) -> Option<Session> {
        let victim = sessions
            .iter()
            .rev()
            .find(|(_, entry)| !entry.is_busy())
            .map(|(key, _)| key.clone())?;

        debug!(session = %victim, "Evicting least recently used session");
        sessions.pop(&victim).map(|entry| entry.session)
    }

    fn notify_evicted(&self, evicted: Vec<Session>) {
        if evicted.is_empty() {
            return;
        }
        if let Some(listener) = &self.eviction_listener {
            for session in evicted {
                listener(session);
            }
        }
    }
}
