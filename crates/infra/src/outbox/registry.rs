//! Event-type registry: turns outbox rows back into typed bus messages.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use tradeflow_events::{Event, EventEnvelope};
use tradeflow_inventory::InventoryEvent;
use tradeflow_purchasing::{PurchaseOrderEvent, PurchaseReturnEvent};
use tradeflow_sales::{SalesOrderEvent, SalesReturnEvent};

use super::entry::OutboxEntry;
use super::error::OutboxError;

/// Message type carried on the pipeline bus: every event family the
/// cross-context handlers consume.
#[derive(Debug, Clone, PartialEq)]
pub enum TradeEvent {
    SalesOrder(SalesOrderEvent),
    SalesReturn(SalesReturnEvent),
    PurchaseOrder(PurchaseOrderEvent),
    PurchaseReturn(PurchaseReturnEvent),
    Inventory(InventoryEvent),
}

impl Event for TradeEvent {
    fn event_type(&self) -> &'static str {
        match self {
            TradeEvent::SalesOrder(e) => e.event_type(),
            TradeEvent::SalesReturn(e) => e.event_type(),
            TradeEvent::PurchaseOrder(e) => e.event_type(),
            TradeEvent::PurchaseReturn(e) => e.event_type(),
            TradeEvent::Inventory(e) => e.event_type(),
        }
    }

    fn version(&self) -> u32 {
        match self {
            TradeEvent::SalesOrder(e) => e.version(),
            TradeEvent::SalesReturn(e) => e.version(),
            TradeEvent::PurchaseOrder(e) => e.version(),
            TradeEvent::PurchaseReturn(e) => e.version(),
            TradeEvent::Inventory(e) => e.version(),
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            TradeEvent::SalesOrder(e) => e.occurred_at(),
            TradeEvent::SalesReturn(e) => e.occurred_at(),
            TradeEvent::PurchaseOrder(e) => e.occurred_at(),
            TradeEvent::PurchaseReturn(e) => e.occurred_at(),
            TradeEvent::Inventory(e) => e.occurred_at(),
        }
    }
}

impl From<SalesOrderEvent> for TradeEvent {
    fn from(value: SalesOrderEvent) -> Self {
        TradeEvent::SalesOrder(value)
    }
}

impl From<SalesReturnEvent> for TradeEvent {
    fn from(value: SalesReturnEvent) -> Self {
        TradeEvent::SalesReturn(value)
    }
}

impl From<PurchaseOrderEvent> for TradeEvent {
    fn from(value: PurchaseOrderEvent) -> Self {
        TradeEvent::PurchaseOrder(value)
    }
}

impl From<PurchaseReturnEvent> for TradeEvent {
    fn from(value: PurchaseReturnEvent) -> Self {
        TradeEvent::PurchaseReturn(value)
    }
}

impl From<InventoryEvent> for TradeEvent {
    fn from(value: InventoryEvent) -> Self {
        TradeEvent::Inventory(value)
    }
}

type Decoder<M> = dyn Fn(&JsonValue) -> Result<M, String> + Send + Sync;

/// Maps stored event-type tags to payload decoders.
///
/// Payloads are the serde JSON form of the emitting aggregate's event enum;
/// one decoder serves every tag of that enum.
pub struct EventRegistry<M> {
    decoders: HashMap<&'static str, Arc<Decoder<M>>>,
}

impl<M: Event> EventRegistry<M> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register an event family under each of its tags.
    pub fn register_family<E>(&mut self, event_types: &'static [&'static str], wrap: fn(E) -> M)
    where
        E: DeserializeOwned + 'static,
    {
        let decoder: Arc<Decoder<M>> = Arc::new(move |payload: &JsonValue| {
            E::deserialize(payload)
                .map(wrap)
                .map_err(|e| e.to_string())
        });
        for event_type in event_types {
            self.decoders.insert(*event_type, Arc::clone(&decoder));
        }
    }

    pub fn is_registered(&self, event_type: &str) -> bool {
        self.decoders.contains_key(event_type)
    }

    /// Registered tags, sorted.
    pub fn event_types(&self) -> Vec<&'static str> {
        let mut types: Vec<_> = self.decoders.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Rebuild the envelope for an outbox row.
    ///
    /// The decoded payload must carry the same tag as the row; a mismatch is a
    /// decode error, not a silent reroute.
    pub fn decode(&self, entry: &OutboxEntry) -> Result<EventEnvelope<M>, OutboxError> {
        let decoder = self
            .decoders
            .get(entry.event_type.as_str())
            .ok_or_else(|| OutboxError::UnknownEventType(entry.event_type.clone()))?;

        let event = decoder(&entry.payload).map_err(|message| OutboxError::Decode {
            event_type: entry.event_type.clone(),
            message,
        })?;

        if event.event_type() != entry.event_type {
            return Err(OutboxError::Decode {
                event_type: entry.event_type.clone(),
                message: format!("payload carries '{}'", event.event_type()),
            });
        }

        Ok(EventEnvelope::new(
            entry.event_id,
            entry.tenant_id,
            entry.aggregate_id,
            entry.aggregate_type.clone(),
            entry.sequence_number,
            event,
        ))
    }
}

impl<M: Event> Default for EventRegistry<M> {
    fn default() -> Self {
        Self::new()
    }
}

impl<M> core::fmt::Debug for EventRegistry<M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("EventRegistry")
            .field("event_types", &self.decoders.len())
            .finish()
    }
}

impl EventRegistry<TradeEvent> {
    /// Registry for every family the pipeline emits.
    pub fn trade() -> Self {
        let mut registry = Self::new();
        registry.register_family(SalesOrderEvent::EVENT_TYPES, TradeEvent::SalesOrder);
        registry.register_family(SalesReturnEvent::EVENT_TYPES, TradeEvent::SalesReturn);
        registry.register_family(PurchaseOrderEvent::EVENT_TYPES, TradeEvent::PurchaseOrder);
        registry.register_family(PurchaseReturnEvent::EVENT_TYPES, TradeEvent::PurchaseReturn);
        registry.register_family(InventoryEvent::EVENT_TYPES, TradeEvent::Inventory);
        registry
    }
}
