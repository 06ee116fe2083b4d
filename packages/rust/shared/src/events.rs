//! Progress events and the per-orchestrator observer surface.
//!
//! There is deliberately no global emitter: each orchestrator owns an
//! [`EventBus`], so tests can run isolated instances side by side. Delivery
//! is synchronous and in emission order; nothing is queued, and listeners
//! registered after an emission never see it.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::types::CrawlStatus;

// ---------------------------------------------------------------------------
// ProgressEvent
// ---------------------------------------------------------------------------

/// Fire-and-forget progress notification emitted during a crawl run.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    /// The orchestrator state machine moved to a new state.
    StatusChanged { status: CrawlStatus },
    /// Discovery produced a candidate list of this size.
    LinksDiscovered { count: usize },
    /// A batch is about to be crawled. Indices are zero-based.
    BatchStarted {
        index: usize,
        total: usize,
        size: usize,
    },
    /// An address resolved successfully.
    UrlCrawled { address: String },
    /// An address was dropped without being attempted.
    UrlSkipped { address: String, reason: String },
    /// An address resolved as failed.
    UrlFailed { address: String, error: String },
    /// The run reached a successful terminal state.
    CrawlCompleted {
        total: usize,
        completed: usize,
        failed: usize,
    },
    /// The run reached a failed or cancelled terminal state.
    CrawlError { message: String },
}

/// Event discriminant used for filtered subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    StatusChanged,
    LinksDiscovered,
    BatchStarted,
    UrlCrawled,
    UrlSkipped,
    UrlFailed,
    CrawlCompleted,
    CrawlError,
}

impl ProgressEvent {
    /// The discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::StatusChanged { .. } => EventKind::StatusChanged,
            Self::LinksDiscovered { .. } => EventKind::LinksDiscovered,
            Self::BatchStarted { .. } => EventKind::BatchStarted,
            Self::UrlCrawled { .. } => EventKind::UrlCrawled,
            Self::UrlSkipped { .. } => EventKind::UrlSkipped,
            Self::UrlFailed { .. } => EventKind::UrlFailed,
            Self::CrawlCompleted { .. } => EventKind::CrawlCompleted,
            Self::CrawlError { .. } => EventKind::CrawlError,
        }
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Handle returned by [`EventBus::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

type Callback = Box<dyn Fn(&ProgressEvent) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    /// `None` subscribes to every event.
    kind: Option<EventKind>,
    callback: Callback,
}

/// Synchronous publish/subscribe surface over [`ProgressEvent`].
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Subscribe `callback` to events of `kind`.
    pub fn on(
        &self,
        kind: EventKind,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(Some(kind), Box::new(callback))
    }

    /// Subscribe `callback` to every event.
    pub fn on_any(
        &self,
        callback: impl Fn(&ProgressEvent) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.subscribe(None, Box::new(callback))
    }

    /// Remove a subscription. Returns `false` when the id is unknown.
    pub fn off(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscribers.lock().expect("event bus poisoned");
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() < before
    }

    /// Deliver `event` to matching subscribers, in registration order.
    pub fn emit(&self, event: ProgressEvent) {
        let subs = self.subscribers.lock().expect("event bus poisoned");
        for sub in subs.iter() {
            if sub.kind.is_none() || sub.kind == Some(event.kind()) {
                (sub.callback)(&event);
            }
        }
    }

    fn subscribe(&self, kind: Option<EventKind>, callback: Callback) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers
            .lock()
            .expect("event bus poisoned")
            .push(Subscriber { id, kind, callback });
        id
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self.subscribers.lock().map(|s| s.len()).unwrap_or(0);
        f.debug_struct("EventBus").field("subscribers", &count).finish()
    }
}
