use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, Weak};
use std::thread;

use aegis_ipc::{Event, EventKind};

type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

struct Registration {
    id: u64,
    /// `None` receives every kind
    kind: Option<EventKind>,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: AtomicU64,
    entries: Mutex<Vec<Registration>>,
}

impl Registry {
    fn insert(&self, kind: Option<EventKind>, handler: Handler) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.entries
            .lock()
            .expect("bus registry lock poisoned")
            .push(Registration { id, kind, handler });
        id
    }

    fn remove(&self, id: u64) {
        self.entries
            .lock()
            .expect("bus registry lock poisoned")
            .retain(|r| r.id != id);
    }

    /// Handlers for `kind`, in subscription order.
    fn handlers_for(&self, kind: EventKind) -> Vec<Handler> {
        self.entries
            .lock()
            .expect("bus registry lock poisoned")
            .iter()
            .filter(|r| r.kind.is_none_or(|k| k == kind))
            .map(|r| Arc::clone(&r.handler))
            .collect()
    }
}

enum Message {
    Event(Event),
    Barrier(std_mpsc::Sender<()>),
}

/// Publish/subscribe bus with a single delivery thread.
///
/// `publish` may be called from any thread and never blocks on handlers.
/// Handlers run one at a time on the delivery thread, in subscription
/// order, outside the registry lock. The queue is unbounded.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Registry>,
    tx: std_mpsc::Sender<Message>,
}

impl EventBus {
    pub fn new() -> Self {
        let registry = Arc::new(Registry::default());
        let (tx, rx) = std_mpsc::channel::<Message>();

        let delivery_registry = Arc::clone(&registry);
        let spawned = thread::Builder::new()
            .name("aegis-bus".to_string())
            .spawn(move || {
                for message in rx {
                    match message {
                        Message::Event(event) => deliver(&delivery_registry, &event),
                        Message::Barrier(done) => {
                            let _ = done.send(());
                        }
                    }
                }
                tracing::debug!("Event bus delivery thread exiting");
            });
        if let Err(e) = spawned {
            tracing::error!("Failed to spawn event bus delivery thread: {}", e);
        }

        Self { registry, tx }
    }

    pub fn publish(&self, event: Event) {
        tracing::trace!("Publishing {}", event.kind());
        if self.tx.send(Message::Event(event)).is_err() {
            tracing::debug!("Event bus delivery thread is gone, dropping event");
        }
    }

    /// Register `handler` for one kind of event.
    #[must_use = "dropping the subscription unsubscribes the handler"]
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.registry.insert(Some(kind), Arc::new(handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Register `handler` for every kind of event.
    #[must_use = "dropping the subscription unsubscribes the handler"]
    pub fn subscribe_all<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let id = self.registry.insert(None, Arc::new(handler));
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Block until every event published before this call has been
    /// delivered. Must not be called from a handler.
    pub fn flush(&self) {
        let (done_tx, done_rx) = std_mpsc::channel();
        if self.tx.send(Message::Barrier(done_tx)).is_ok() {
            let _ = done_rx.recv();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(registry: &Registry, event: &Event) {
    for handler in registry.handlers_for(event.kind()) {
        if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
            tracing::error!("Event handler panicked while handling {}", event.kind());
        }
    }
}

/// Handle returned by `subscribe`. Dropping it unsubscribes.
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Keep the handler registered for the lifetime of the bus.
    pub fn detach(self) {
        std::mem::forget(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
