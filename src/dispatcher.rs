//! Listener registry and synchronous fan-out of inbox events.
//!
//! Every registration gets an opaque [`ListenerId`] and is removed only via
//! the [`ListenerHandle`] returned when it was added, so two listeners for
//! the same event type never shadow each other.

use crate::{events::Event, monitoring};
use std::{
    collections::BTreeMap,
    fmt,
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
};
use tracing::{debug, error, warn};

/// Callback invoked for each matching event.
pub type Listener = Arc<dyn Fn(&Event) -> anyhow::Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventFilter {
    /// Receives every event.
    Any,
    /// Receives events whose wire tag equals this string.
    Type(String),
}

impl EventFilter {
    fn matches(&self, event: &Event) -> bool {
        match self {
            EventFilter::Any => true,
            EventFilter::Type(event_type) => event_type == event.event_type(),
        }
    }
}

struct Registration {
    filter: EventFilter,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    // Ids are handed out monotonically, so key order is registration order.
    listeners: BTreeMap<ListenerId, Registration>,
    closed: bool,
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of a single [`EventDispatcher::dispatch`] call.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DispatchReport {
    pub delivered: usize,
    pub failed: usize,
}

#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registry = lock(&self.registry);
        f.debug_struct("EventDispatcher")
            .field("listeners", &registry.listeners.len())
            .field("closed", &registry.closed)
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for events tagged `event_type`.
    pub fn add_event_listener<F>(&self, event_type: impl Into<String>, handler: F) -> ListenerHandle
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventFilter::Type(event_type.into()), Arc::new(handler))
    }

    /// Register `handler` for every event regardless of its tag.
    pub fn add_wildcard_listener<F>(&self, handler: F) -> ListenerHandle
    where
        F: Fn(&Event) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        self.register(EventFilter::Any, Arc::new(handler))
    }

    pub fn register(&self, filter: EventFilter, listener: Listener) -> ListenerHandle {
        let mut registry = lock(&self.registry);
        registry.next_id += 1;
        let id = ListenerId(registry.next_id);

        // A closed dispatcher hands out inert handles.
        if !registry.closed {
            debug!(%id, ?filter, "Registered listener");
            registry
                .listeners
                .insert(id, Registration { filter, listener });
        }

        ListenerHandle {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Deliver `event` to every matching listener in registration order.
    ///
    /// The matching set is snapshotted up front so handlers may add or remove
    /// listeners while running. A listener removed mid-dispatch is skipped;
    /// one added mid-dispatch first sees the next event.
    pub fn dispatch(&self, event: &Event) -> DispatchReport {
        let snapshot: Vec<(ListenerId, Listener)> = {
            let registry = lock(&self.registry);
            if registry.closed {
                return DispatchReport::default();
            }
            registry
                .listeners
                .iter()
                .filter(|(_, reg)| reg.filter.matches(event))
                .map(|(id, reg)| (*id, Arc::clone(&reg.listener)))
                .collect()
        };

        let mut report = DispatchReport::default();
        for (id, listener) in snapshot {
            if !lock(&self.registry).listeners.contains_key(&id) {
                continue;
            }

            match panic::catch_unwind(AssertUnwindSafe(|| listener(event))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    report.failed += 1;
                    warn!(%id, event_type = event.event_type(), "Listener failed: {:#}", e);
                }
                Err(panic) => {
                    report.failed += 1;
                    error!(
                        %id,
                        event_type = event.event_type(),
                        "Listener panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        monitoring::EVENTS_DISPATCHED_COUNTER.increment(report.delivered as u64);
        monitoring::LISTENER_FAILURE_COUNTER.increment(report.failed as u64);
        report
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.registry).listeners.len()
    }

    pub fn is_closed(&self) -> bool {
        lock(&self.registry).closed
    }

    /// Drop every registration; later dispatches deliver nothing.
    pub fn close(&self) {
        let mut registry = lock(&self.registry);
        registry.closed = true;
        registry.listeners.clear();
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        msg
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg
    } else {
        "non-string panic payload"
    }
}

/// Capability that removes exactly one registration.
#[derive(Debug, Clone)]
pub struct ListenerHandle {
    id: ListenerId,
    registry: Weak<Mutex<Registry>>,
}

impl ListenerHandle {
    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Remove the registration. Returns `true` only for the call that
    /// actually removed it; later calls are no-ops.
    pub fn unsubscribe(&self) -> bool {
        let Some(registry) = self.registry.upgrade() else {
            return false;
        };
        let removed = lock(&registry).listeners.remove(&self.id).is_some();
        if removed {
            debug!(id = %self.id, "Removed listener");
        }
        removed
    }

    pub fn is_active(&self) -> bool {
        self.registry
            .upgrade()
            .is_some_and(|registry| lock(&registry).listeners.contains_key(&self.id))
    }
}
