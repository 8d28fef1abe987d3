//! Domain events, envelopes and the in-process event bus.
//!
//! Everything here is pure mechanics: no storage, no IO. Durable delivery is the
//! outbox's job (see `tradeflow-infra`); the bus only routes already-decoded
//! events to the handlers that declared interest in their type tag.

pub mod bus;
pub mod envelope;
pub mod event;
pub mod handler;
pub mod in_memory_bus;

pub use bus::{BusError, DispatchReport, EventBus};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use handler::EventHandler;
pub use in_memory_bus::InMemoryEventBus;
