//! Inventory application service used by the cross-context handlers and the
//! lock sweeper.
//!
//! Every mutation is load -> execute -> save through the outbox publisher, so
//! the inventory's own events (locks, deductions, threshold alerts) travel the
//! same outbox as everything else.

use chrono::Utc;
use thiserror::Error;
use tracing::debug;

use tradeflow_core::{AggregateId, DomainError, PendingEvents, ProductId, TenantId, WarehouseId};
use tradeflow_inventory::{
    CreateItem, InventoryCommand, InventoryEvent, InventoryItem, InventoryItemId,
};

use crate::outbox::OutboxPublisher;
use crate::persistence::{
    AggregateReader, PersistenceError, StoredAggregate, UnitOfWork, load_aggregate,
};

/// Attempts per command before a version conflict is surfaced.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Error)]
pub enum InventoryServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

/// Result of a successful command: the saved item and the events it emitted
/// (empty when the command was a no-op, e.g. a replayed reference).
#[derive(Debug, Clone)]
pub struct Applied {
    pub item: InventoryItem,
    pub events: Vec<InventoryEvent>,
}

impl Applied {
    pub fn changed(&self) -> bool {
        !self.events.is_empty()
    }
}

/// Inventory commands against the persistence layer.
#[derive(Debug, Clone)]
pub struct InventoryService<D> {
    db: D,
    publisher: OutboxPublisher,
    max_attempts: u32,
}

impl<D> InventoryService<D>
where
    D: UnitOfWork + AggregateReader,
{
    pub fn new(db: D, publisher: OutboxPublisher) -> Self {
        Self {
            db,
            publisher,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn database(&self) -> &D {
        &self.db
    }

    /// Item for `warehouse` + `product`, if one exists.
    pub fn find(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        product_id: ProductId,
    ) -> Result<Option<InventoryItem>, InventoryServiceError> {
        let key = InventoryItem::lookup_key(warehouse_id, product_id);
        let item = self
            .db
            .find_by_key(tenant_id, InventoryItem::AGGREGATE_TYPE, &key)?
            .map(|row| InventoryItem::from_row(&row))
            .transpose()?;
        Ok(item)
    }

    pub fn get(
        &self,
        tenant_id: TenantId,
        item_id: InventoryItemId,
    ) -> Result<Option<InventoryItem>, InventoryServiceError> {
        Ok(load_aggregate(&self.db, tenant_id, item_id.0)?)
    }

    /// Run a command on the item for `warehouse` + `product`, creating the
    /// item first when it does not exist yet.
    pub fn execute_or_create<F>(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        build: F,
    ) -> Result<Applied, InventoryServiceError>
    where
        F: Fn(&InventoryItem) -> InventoryCommand,
    {
        self.retrying(&build, || {
            match self.find(tenant_id, warehouse_id, product_id)? {
                Some(item) => Ok(Some(item)),
                None => {
                    let id = InventoryItemId(AggregateId::new());
                    let mut item = InventoryItem::empty(id);
                    item.execute(&InventoryCommand::CreateItem(CreateItem {
                        tenant_id,
                        item_id: id,
                        warehouse_id,
                        product_id,
                        occurred_at: Utc::now(),
                    }))?;
                    Ok(Some(item))
                }
            }
        })?
        .ok_or_else(|| {
            InventoryServiceError::Persistence(PersistenceError::NotFound(
                InventoryItem::lookup_key(warehouse_id, product_id),
            ))
        })
    }

    /// Run a command on an existing item; `Ok(None)` when there is no item
    /// for `warehouse` + `product`.
    pub fn execute_existing<F>(
        &self,
        tenant_id: TenantId,
        warehouse_id: WarehouseId,
        product_id: ProductId,
        build: F,
    ) -> Result<Option<Applied>, InventoryServiceError>
    where
        F: Fn(&InventoryItem) -> InventoryCommand,
    {
        self.retrying(&build, || self.find(tenant_id, warehouse_id, product_id))
    }

    /// Run a command on an item by id; `Ok(None)` when it does not exist.
    pub fn execute_on<F>(
        &self,
        tenant_id: TenantId,
        item_id: InventoryItemId,
        build: F,
    ) -> Result<Option<Applied>, InventoryServiceError>
    where
        F: Fn(&InventoryItem) -> InventoryCommand,
    {
        self.retrying(&build, || self.get(tenant_id, item_id))
    }

    /// Load, decide, save; reload and decide again on a version conflict.
    fn retrying<F, L>(&self, build: &F, load: L) -> Result<Option<Applied>, InventoryServiceError>
    where
        F: Fn(&InventoryItem) -> InventoryCommand,
        L: Fn() -> Result<Option<InventoryItem>, InventoryServiceError>,
    {
        let mut attempt = 1;
        loop {
            let Some(mut item) = load()? else {
                return Ok(None);
            };

            let command = build(&item);
            item.execute(&command)?;
            let events = item.pending_events().to_vec();

            match self.publisher.save(&self.db, &mut item) {
                Ok(_) => return Ok(Some(Applied { item, events })),
                Err(PersistenceError::Conflict(reason)) if attempt < self.max_attempts => {
                    debug!(
                        item_id = %item.aggregate_id(),
                        attempt,
                        reason = %reason,
                        "inventory item modified concurrently, retrying"
                    );
                    attempt += 1;
                }
                Err(err) => return Err(err.into()),
            }
        }
    }
}
