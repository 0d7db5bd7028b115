//! Live event fan-out for the packing-station monitors.
//!
//! One [`MonitorBus`] serves every monitor screen. Each subscriber owns a
//! bounded queue; `publish` never waits on any of them:
//! - a full queue drops the event for that subscriber only;
//! - a closed queue (client gone) is pruned from the registry.
//!
//! Events carry an `evento` tag, an `hora` wall-clock stamp and the
//! kind-specific fields the monitor page renders.

use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures_util::Stream;
use pck_session::OrderNumber;
use serde::Serialize;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

/// Per-subscriber queue capacity.
pub const SUBSCRIBER_QUEUE: usize = 256;

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "evento", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    Connected,
    Loaded {
        #[serde(rename = "pedido")]
        order: OrderNumber,
    },
    Scan {
        #[serde(rename = "produto")]
        product: String,
        #[serde(rename = "bipado")]
        scanned: u32,
        total: u32,
    },
    Finalized {
        #[serde(rename = "pedido")]
        order: OrderNumber,
    },
    FinalizedTimeout {
        #[serde(rename = "pedido")]
        order: OrderNumber,
        #[serde(rename = "aviso")]
        warning: String,
    },
    FinalizedAsync {
        #[serde(rename = "pedido")]
        order: OrderNumber,
        #[serde(rename = "aviso")]
        warning: String,
    },
}

/// An event as delivered to subscribers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct MonitorEvent {
    #[serde(flatten)]
    pub kind: EventKind,
    /// Local wall-clock time, `HH:MM:SS`.
    pub hora: String,
}

impl MonitorEvent {
    pub fn now(kind: EventKind) -> Self {
        Self {
            kind,
            hora: chrono::Local::now().format("%H:%M:%S").to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Debug, Default)]
struct Registry {
    next_id: AtomicU64,
    subscribers: Mutex<Vec<(SubscriberId, mpsc::Sender<MonitorEvent>)>>,
}

/// Cloneable handle to the shared subscriber registry.
#[derive(Debug, Clone, Default)]
pub struct MonitorBus {
    registry: Arc<Registry>,
}

impl MonitorBus {
    pub fn new() -> Self {
        Self::default()
    }

    fn subscribers(&self) -> MutexGuard<'_, Vec<(SubscriberId, mpsc::Sender<MonitorEvent>)>> {
        self.registry
            .subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Register a subscriber. Its first event is always `CONNECTED`.
    pub fn subscribe(&self) -> Subscription {
        let id = SubscriberId(self.registry.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE);

        // Queue is empty and we own the receiver, so this cannot fail.
        let _ = tx.try_send(MonitorEvent::now(EventKind::Connected));

        self.subscribers().push((id, tx));
        debug!(subscriber = id.0, "monitor subscribed");
        Subscription { id, events: rx }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut subs = self.subscribers();
        let before = subs.len();
        subs.retain(|(sid, _)| *sid != id);
        let removed = subs.len() != before;
        if removed {
            debug!(subscriber = id.0, "monitor unsubscribed");
        }
        removed
    }

    /// Deliver `kind` to every subscriber. Returns how many accepted it.
    pub fn publish(&self, kind: EventKind) -> usize {
        let event = MonitorEvent::now(kind);
        let targets: Vec<_> = self.subscribers().clone();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in &targets {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    debug!(subscriber = id.0, "monitor queue full, event dropped");
                }
                Err(TrySendError::Closed(_)) => closed.push(*id),
            }
        }

        if !closed.is_empty() {
            self.subscribers().retain(|(id, _)| !closed.contains(id));
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// Receiving side of one subscriber.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    events: mpsc::Receiver<MonitorEvent>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    pub async fn recv(&mut self) -> Option<MonitorEvent> {
        self.events.recv().await
    }

    pub fn try_recv(&mut self) -> Option<MonitorEvent> {
        self.events.try_recv().ok()
    }

    /// Turn into a stream that unsubscribes from `bus` when dropped.
    pub fn into_stream(self, bus: MonitorBus) -> EventStream {
        EventStream {
            inner: ReceiverStream::new(self.events),
            _guard: Unsubscribe { bus, id: self.id },
        }
    }
}

#[derive(Debug)]
struct Unsubscribe {
    bus: MonitorBus,
    id: SubscriberId,
}

impl Drop for Unsubscribe {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// Event stream of one subscriber (see [`Subscription::into_stream`]).
#[derive(Debug)]
pub struct EventStream {
    inner: ReceiverStream<MonitorEvent>,
    _guard: Unsubscribe,
}

impl Stream for EventStream {
    type Item = MonitorEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}
