//! In-process event bus.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tracing::{debug, info, warn};

use crate::bus::{BusError, DispatchReport, EventBus};
use crate::{Event, EventEnvelope, EventHandler};

type Handlers<M> = HashMap<&'static str, Vec<Arc<dyn EventHandler<M>>>>;

/// In-memory pub/sub router keyed by event type tag.
///
/// - No IO / no async: handlers run on the publishing thread
/// - Subscription order is dispatch order (per event type)
/// - At-least-once upstream (subscribers must be idempotent)
pub struct InMemoryEventBus<M: Event> {
    handlers: RwLock<Handlers<M>>,
    running: AtomicBool,
}

impl<M: Event> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of handlers registered for a type tag.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers
            .read()
            .map(|h| h.get(event_type).map_or(0, Vec::len))
            .unwrap_or(0)
    }

    fn dispatch_one(&self, handlers: &Handlers<M>, envelope: &EventEnvelope<M>) -> DispatchReport {
        let event_type = envelope.event_type();
        let mut report = DispatchReport::default();

        let Some(subscribers) = handlers.get(event_type) else {
            debug!(event_type, event_id = %envelope.event_id(), "no handler registered");
            report.unhandled += 1;
            return report;
        };

        for handler in subscribers {
            match handler.handle(envelope) {
                Ok(()) => report.delivered += 1,
                Err(err) => {
                    report.failed += 1;
                    warn!(
                        handler = handler.name(),
                        event_type,
                        event_id = %envelope.event_id(),
                        tenant_id = %envelope.tenant_id(),
                        error = %err,
                        "event handler failed"
                    );
                }
            }
        }

        report
    }
}

impl<M: Event> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }
}

impl<M: Event> core::fmt::Debug for InMemoryEventBus<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("InMemoryEventBus")
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl<M: Event> EventBus<M> for InMemoryEventBus<M> {
    fn subscribe(&self, handler: Arc<dyn EventHandler<M>>) -> Result<(), BusError> {
        let mut handlers = self.handlers.write().map_err(|_| BusError::Poisoned)?;
        for event_type in handler.event_types() {
            handlers
                .entry(*event_type)
                .or_default()
                .push(Arc::clone(&handler));
        }
        debug!(handler = handler.name(), event_types = ?handler.event_types(), "handler subscribed");
        Ok(())
    }

    fn publish(&self, events: &[EventEnvelope<M>]) -> Result<DispatchReport, BusError> {
        if !self.is_running() {
            return Err(BusError::NotRunning);
        }
        let handlers = self.handlers.read().map_err(|_| BusError::Poisoned)?;

        let mut report = DispatchReport::default();
        for envelope in events {
            report.merge(self.dispatch_one(&handlers, envelope));
        }
        Ok(report)
    }

    fn start(&self) -> Result<(), BusError> {
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("event bus started");
        }
        Ok(())
    }

    fn stop(&self) -> Result<(), BusError> {
        if self.running.swap(false, Ordering::SeqCst) {
            info!("event bus stopped");
        }
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}
