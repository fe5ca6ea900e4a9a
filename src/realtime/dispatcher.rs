//! Typed publish/subscribe registry for sync events.
//!
//! Handlers are kept per [`EventKind`] in registration order. Dispatch
//! snapshots the handler list and runs it outside the registry lock, so a
//! handler may subscribe or unsubscribe without deadlocking. A handler that
//! returns an error or panics is reported and skipped; the remaining handlers
//! still run.

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex};

use tracing::error;

use super::events::{Event, EventKind, SyncEvent};
use crate::error::SyncError;

/// Error type a handler may return.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Result type returned by handlers.
pub type HandlerResult = std::result::Result<(), HandlerError>;

type RawHandler = Arc<dyn Fn(&SyncEvent) -> HandlerResult + Send + Sync>;

/// Handle identifying one registration, used to unsubscribe or replace it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Subscription {
    kind: EventKind,
    id: u64,
}

impl Subscription {
    /// Kind the registration listens for.
    pub fn kind(&self) -> EventKind {
        self.kind
    }
}

/// Outcome of one dispatch.
#[derive(Debug, Default)]
pub struct DispatchReport {
    /// Handlers that ran to completion.
    pub delivered: usize,
    /// Failures from handlers that errored or panicked.
    pub failures: Vec<SyncError>,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: BTreeMap<EventKind, Vec<(u64, RawHandler)>>,
}

/// Listener registry shared between the connection manager and consumers.
///
/// Cloning yields another handle to the same registry.
#[derive(Clone, Default)]
pub struct EventDispatcher {
    registry: Arc<Mutex<Registry>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("handlers", &self.total_handlers())
            .finish()
    }
}

impl EventDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry> {
        match self.registry.lock() {
            Ok(r) => r,
            Err(p) => p.into_inner(),
        }
    }

    /// Register a handler for `kind`, receiving the untyped event.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
    where
        F: Fn(&SyncEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        registry.next_id += 1;
        let id = registry.next_id;
        registry
            .handlers
            .entry(kind)
            .or_default()
            .push((id, Arc::new(handler)));
        Subscription { kind, id }
    }

    /// Register a handler that receives the payload type of `E`.
    ///
    /// ```
    /// use homesync::realtime::dispatcher::EventDispatcher;
    /// use homesync::realtime::events::on;
    ///
    /// let dispatcher = EventDispatcher::new();
    /// let sub = dispatcher.on::<on::TaskDeleted, _>(|deletion| {
    ///     println!("task {} removed", deletion.task_id);
    ///     Ok(())
    /// });
    /// dispatcher.unsubscribe(sub);
    /// ```
    pub fn on<E, F>(&self, handler: F) -> Subscription
    where
        E: Event,
        F: Fn(&E::Payload) -> HandlerResult + Send + Sync + 'static,
    {
        self.subscribe(E::KIND, typed::<E, F>(handler))
    }

    /// Remove exactly one registration. Returns `false` if it was not found.
    pub fn unsubscribe(&self, subscription: Subscription) -> bool {
        let mut registry = self.lock();
        let Some(list) = registry.handlers.get_mut(&subscription.kind) else {
            return false;
        };
        match list.iter().position(|(id, _)| *id == subscription.id) {
            Some(index) => {
                list.remove(index);
                true
            }
            None => false,
        }
    }

    /// Swap the handler behind an existing registration, keeping its
    /// position in the invocation order.
    ///
    /// Returns `false` if the registration no longer exists.
    pub fn replace<F>(&self, subscription: Subscription, handler: F) -> bool
    where
        F: Fn(&SyncEvent) -> HandlerResult + Send + Sync + 'static,
    {
        let mut registry = self.lock();
        let slot = registry
            .handlers
            .get_mut(&subscription.kind)
            .and_then(|list| list.iter_mut().find(|(id, _)| *id == subscription.id));
        match slot {
            Some((_, existing)) => {
                *existing = Arc::new(handler);
                true
            }
            None => false,
        }
    }

    /// Typed variant of [`replace`](Self::replace).
    pub fn replace_on<E, F>(&self, subscription: Subscription, handler: F) -> bool
    where
        E: Event,
        F: Fn(&E::Payload) -> HandlerResult + Send + Sync + 'static,
    {
        subscription.kind == E::KIND && self.replace(subscription, typed::<E, F>(handler))
    }

    /// Number of handlers registered for `kind`.
    pub fn handler_count(&self, kind: EventKind) -> usize {
        self.lock().handlers.get(&kind).map_or(0, Vec::len)
    }

    fn total_handlers(&self) -> usize {
        self.lock().handlers.values().map(Vec::len).sum()
    }

    /// Invoke every handler registered for the event's kind, in order.
    pub fn dispatch(&self, event: &SyncEvent) -> DispatchReport {
        let kind = event.kind();
        let handlers: Vec<RawHandler> = self
            .lock()
            .handlers
            .get(&kind)
            .map(|list| list.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        let mut report = DispatchReport::default();
        for handler in handlers {
            let outcome = catch_unwind(AssertUnwindSafe(|| handler(event)));
            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };
            error!(%kind, %message, "event handler failed");
            report
                .failures
                .push(SyncError::HandlerFailure { kind, message });
        }
        report
    }
}

fn typed<E, F>(handler: F) -> impl Fn(&SyncEvent) -> HandlerResult + Send + Sync + 'static
where
    E: Event,
    F: Fn(&E::Payload) -> HandlerResult + Send + Sync + 'static,
{
    move |event: &SyncEvent| match E::payload(event) {
        Some(payload) => handler(payload),
        None => Ok(()),
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {s}")
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {s}")
    } else {
        "panicked".to_owned()
    }
}
