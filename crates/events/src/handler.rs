use crate::{Event, EventEnvelope};

/// A subscriber that reacts to events of the types it declares.
///
/// Delivery is at-least-once: the same envelope (same `event_id`) may arrive
/// more than once, so `handle` must be idempotent.
///
/// Errors are reported back to the bus, which logs them and keeps dispatching;
/// they never fail the publish call.
pub trait EventHandler<M: Event>: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Event type tags this handler consumes.
    fn event_types(&self) -> &'static [&'static str];

    fn handle(&self, envelope: &EventEnvelope<M>) -> anyhow::Result<()>;
}

impl<M: Event, H: EventHandler<M> + ?Sized> EventHandler<M> for std::sync::Arc<H> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn event_types(&self) -> &'static [&'static str] {
        (**self).event_types()
    }

    fn handle(&self, envelope: &EventEnvelope<M>) -> anyhow::Result<()> {
        (**self).handle(envelope)
    }
}
