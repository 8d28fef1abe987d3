//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is a **type-keyed router**: handlers declare the event type tags they
//! consume, and `publish` looks the tag up and calls each registered handler in
//! subscription order, synchronously.
//!
//! - **Handler isolation**: a failing handler is logged and skipped; the other
//!   handlers still run and `publish` still succeeds.
//! - **Transport errors only**: `publish` fails only when the bus itself cannot
//!   dispatch (not started, stopped, poisoned). Callers such as the outbox
//!   processor treat that as retryable.
//! - **No persistence**: the outbox is the source of truth, not the bus.

use std::sync::Arc;

use crate::{Event, EventEnvelope, EventHandler};

/// Bus-level (transport) failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Publish attempted before `start` or after `stop`.
    #[error("event bus is not running")]
    NotRunning,
    /// Internal lock poisoning.
    #[error("event bus state poisoned")]
    Poisoned,
}

/// Outcome of one `publish` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Successful handler invocations.
    pub delivered: usize,
    /// Handler invocations that returned an error (logged, not escalated).
    pub failed: usize,
    /// Events no handler was registered for.
    pub unhandled: usize,
}

impl DispatchReport {
    pub fn merge(&mut self, other: DispatchReport) {
        self.delivered += other.delivered;
        self.failed += other.failed;
        self.unhandled += other.unhandled;
    }
}

/// Event bus interface consumed by application services and the outbox processor.
pub trait EventBus<M: Event>: Send + Sync {
    /// Register a handler for every event type it declares.
    fn subscribe(&self, handler: Arc<dyn EventHandler<M>>) -> Result<(), BusError>;

    /// Dispatch each envelope to every handler registered for its type.
    fn publish(&self, events: &[EventEnvelope<M>]) -> Result<DispatchReport, BusError>;

    fn start(&self) -> Result<(), BusError>;

    fn stop(&self) -> Result<(), BusError>;

    fn is_running(&self) -> bool;
}

impl<M: Event, B: EventBus<M> + ?Sized> EventBus<M> for Arc<B> {
    fn subscribe(&self, handler: Arc<dyn EventHandler<M>>) -> Result<(), BusError> {
        (**self).subscribe(handler)
    }

    fn publish(&self, events: &[EventEnvelope<M>]) -> Result<DispatchReport, BusError> {
        (**self).publish(events)
    }

    fn start(&self) -> Result<(), BusError> {
        (**self).start()
    }

    fn stop(&self) -> Result<(), BusError> {
        (**self).stop()
    }

    fn is_running(&self) -> bool {
        (**self).is_running()
    }
}
