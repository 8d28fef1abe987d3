//! Cross-context event handlers: sales and purchasing events drive inventory.
//!
//! Every mutation carries a correlation key so redelivery of the same
//! envelope is a no-op:
//! - locks: `lock:{source_type}:{source_id}:{line_no}`
//! - stock movements: `{event_id}:{line_no}`

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use rust_decimal::Decimal;
use tracing::{debug, warn};

use tradeflow_core::round_quantity;
use tradeflow_events::{BusError, EventBus, EventEnvelope, EventHandler};
use tradeflow_inventory::{
    BatchInfo, DecreaseStock, DeductStock, IncreaseStock, InventoryCommand, InventoryEvent,
    LockStock, ReleaseLock, SourceType, StockSource, movement_reference,
};
use tradeflow_purchasing::{PurchaseOrderEvent, PurchaseReturnEvent};
use tradeflow_sales::{SalesOrderEvent, SalesReturnEvent};

use crate::inventory_service::{Applied, InventoryService, InventoryServiceError};
use crate::outbox::TradeEvent;
use crate::persistence::{AggregateReader, UnitOfWork};

/// Per-line outcomes of one event.
#[derive(Debug, Default)]
struct LineFailures {
    lines: usize,
    failures: Vec<String>,
}

impl LineFailures {
    fn record(&mut self, line_no: u32, outcome: Result<Option<Applied>, InventoryServiceError>) {
        self.lines += 1;
        match outcome {
            Ok(Some(_)) => {}
            Ok(None) => self
                .failures
                .push(format!("line {line_no}: no stock record")),
            Err(err) => self.failures.push(format!("line {line_no}: {err}")),
        }
    }

    fn into_result(self, action: &str, document: &str) -> anyhow::Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        anyhow::bail!(
            "{} of {} items failed to {action} for {document}: {}",
            self.failures.len(),
            self.lines,
            self.failures.join("; ")
        )
    }
}

/// `OrderConfirmed` -> lock the ordered base quantity per line.
pub struct OrderConfirmedHandler<D> {
    inventory: Arc<InventoryService<D>>,
    lock_ttl: chrono::Duration,
}

impl<D> OrderConfirmedHandler<D> {
    pub fn new(inventory: Arc<InventoryService<D>>, lock_ttl: chrono::Duration) -> Self {
        Self {
            inventory,
            lock_ttl,
        }
    }
}

impl<D> EventHandler<TradeEvent> for OrderConfirmedHandler<D>
where
    D: UnitOfWork + AggregateReader,
{
    fn name(&self) -> &'static str {
        "inventory.lock_on_order_confirmed"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[SalesOrderEvent::CONFIRMED]
    }

    fn handle(&self, envelope: &EventEnvelope<TradeEvent>) -> anyhow::Result<()> {
        let TradeEvent::SalesOrder(SalesOrderEvent::OrderConfirmed(event)) = envelope.payload()
        else {
            return Ok(());
        };
        let Some(warehouse_id) = event.warehouse_id else {
            warn!(order_id = %event.order_id, "confirmed order has no warehouse, nothing locked");
            return Ok(());
        };

        // Expiry is anchored on the confirmation time so a redelivery builds
        // the same lock.
        let expires_at = event.occurred_at + self.lock_ttl;
        let mut outcome = LineFailures::default();

        for item in &event.items {
            let source = StockSource::new(SourceType::SalesOrder, event.order_id.0, item.line_no);
            let result = self.inventory.execute_existing(
                event.tenant_id,
                warehouse_id,
                item.product_id,
                |_| {
                    InventoryCommand::LockStock(LockStock {
                        tenant_id: event.tenant_id,
                        reference: source.lock_reference(),
                        quantity: item.base_quantity,
                        source,
                        expires_at,
                        occurred_at: event.occurred_at,
                    })
                },
            );
            outcome.record(item.line_no, result);
        }

        debug!(order_id = %event.order_id, lines = event.items.len(), "order stock locked");
        outcome.into_result("lock", &event.order_number)
    }
}

/// `OrderShipped` -> deduct each line, consuming its lock.
pub struct OrderShippedHandler<D> {
    inventory: Arc<InventoryService<D>>,
}

impl<D> OrderShippedHandler<D> {
    pub fn new(inventory: Arc<InventoryService<D>>) -> Self {
        Self { inventory }
    }
}

impl<D> EventHandler<TradeEvent> for OrderShippedHandler<D>
where
    D: UnitOfWork + AggregateReader,
{
    fn name(&self) -> &'static str {
        "inventory.deduct_on_order_shipped"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[SalesOrderEvent::SHIPPED]
    }

    fn handle(&self, envelope: &EventEnvelope<TradeEvent>) -> anyhow::Result<()> {
        let TradeEvent::SalesOrder(SalesOrderEvent::OrderShipped(event)) = envelope.payload()
        else {
            return Ok(());
        };
        let mut outcome = LineFailures::default();

        for item in &event.items {
            let source = StockSource::new(SourceType::SalesOrder, event.order_id.0, item.line_no);
            let result = self.inventory.execute_existing(
                event.tenant_id,
                event.warehouse_id,
                item.product_id,
                |_| {
                    InventoryCommand::DeductStock(DeductStock {
                        tenant_id: event.tenant_id,
                        lock_reference: source.lock_reference(),
                        reference: movement_reference(envelope.event_id(), item.line_no),
                        quantity: item.base_quantity,
                        source,
                        occurred_at: event.occurred_at,
                    })
                },
            );
            outcome.record(item.line_no, result);
        }

        outcome.into_result("deduct", &event.order_number)
    }
}

/// `OrderCancelled` after confirmation -> release the order's locks.
pub struct OrderCancelledHandler<D> {
    inventory: Arc<InventoryService<D>>,
}

impl<D> OrderCancelledHandler<D> {
    pub fn new(inventory: Arc<InventoryService<D>>) -> Self {
        Self { inventory }
    }
}

impl<D> EventHandler<TradeEvent> for OrderCancelledHandler<D>
where
    D: UnitOfWork + AggregateReader,
{
    fn name(&self) -> &'static str {
        "inventory.unlock_on_order_cancelled"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[SalesOrderEvent::CANCELLED]
    }

    fn handle(&self, envelope: &EventEnvelope<TradeEvent>) -> anyhow::Result<()> {
        let TradeEvent::SalesOrder(SalesOrderEvent::OrderCancelled(event)) = envelope.payload()
        else {
            return Ok(());
        };
        if !event.was_confirmed {
            return Ok(());
        }
        let Some(warehouse_id) = event.warehouse_id else {
            return Ok(());
        };

        let mut failures = Vec::new();
        for item in &event.items {
            let source = StockSource::new(SourceType::SalesOrder, event.order_id.0, item.line_no);
            // A missing item or lock means there is nothing left to release.
            if let Err(err) = self.inventory.execute_existing(
                event.tenant_id,
                warehouse_id,
                item.product_id,
                |_| {
                    InventoryCommand::UnlockStock(ReleaseLock {
                        tenant_id: event.tenant_id,
                        reference: source.lock_reference(),
                        occurred_at: event.occurred_at,
                    })
                },
            ) {
                failures.push(format!("line {}: {err}", item.line_no));
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            anyhow::bail!(
                "failed to release locks for {}: {}",
                event.order_number,
                failures.join("; ")
            )
        }
    }
}

/// `GoodsReceived` -> increase stock (creating the item on first receipt).
pub struct GoodsReceivedHandler<D> {
    inventory: Arc<InventoryService<D>>,
}

impl<D> GoodsReceivedHandler<D> {
    pub fn new(inventory: Arc<InventoryService<D>>) -> Self {
        Self { inventory }
    }
}

impl<D> EventHandler<TradeEvent> for GoodsReceivedHandler<D>
where
    D: UnitOfWork + AggregateReader,
{
    fn name(&self) -> &'static str {
        "inventory.increase_on_goods_received"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[PurchaseOrderEvent::GOODS_RECEIVED]
    }

    fn handle(&self, envelope: &EventEnvelope<TradeEvent>) -> anyhow::Result<()> {
        let TradeEvent::PurchaseOrder(PurchaseOrderEvent::GoodsReceived(event)) =
            envelope.payload()
        else {
            return Ok(());
        };
        let mut outcome = LineFailures::default();

        for line in &event.lines {
            let result = self
                .inventory
                .execute_or_create(event.tenant_id, event.warehouse_id, line.product_id, |_| {
                    InventoryCommand::IncreaseStock(IncreaseStock {
                        tenant_id: event.tenant_id,
                        reference: movement_reference(envelope.event_id(), line.line_no),
                        quantity: line.base_quantity,
                        unit_cost: line.base_unit_cost,
                        batch: line.batch_number.clone().map(|batch_number| BatchInfo {
                            batch_number,
                            expiry_date: line.expiry_date,
                        }),
                        source: StockSource::new(
                            SourceType::PurchaseOrder,
                            event.order_id.0,
                            line.line_no,
                        ),
                        occurred_at: event.occurred_at,
                    })
                })
                .map(Some);
            outcome.record(line.line_no, result);
        }

        outcome.into_result("receive", &event.order_number)
    }
}

/// Sales `ReturnCompleted` -> restore the returned quantity.
pub struct SalesReturnCompletedHandler<D> {
    inventory: Arc<InventoryService<D>>,
}

impl<D> SalesReturnCompletedHandler<D> {
    pub fn new(inventory: Arc<InventoryService<D>>) -> Self {
        Self { inventory }
    }
}

impl<D> EventHandler<TradeEvent> for SalesReturnCompletedHandler<D>
where
    D: UnitOfWork + AggregateReader,
{
    fn name(&self) -> &'static str {
        "inventory.restore_on_sales_return"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[SalesReturnEvent::COMPLETED]
    }

    fn handle(&self, envelope: &EventEnvelope<TradeEvent>) -> anyhow::Result<()> {
        let TradeEvent::SalesReturn(SalesReturnEvent::Completed(event)) = envelope.payload()
        else {
            return Ok(());
        };
        let mut outcome = LineFailures::default();

        for item in &event.items {
            let result = self
                .inventory
                .execute_or_create(event.tenant_id, event.warehouse_id, item.product_id, |stock| {
                    // Restocked units keep the item's valuation; a brand-new
                    // item falls back to the sale price per base unit.
                    let unit_cost = if stock.unit_cost() > Decimal::ZERO {
                        stock.unit_cost()
                    } else if item.conversion.rate > Decimal::ZERO {
                        round_quantity(item.unit_price / item.conversion.rate)
                    } else {
                        item.unit_price
                    };
                    InventoryCommand::IncreaseStock(IncreaseStock {
                        tenant_id: event.tenant_id,
                        reference: movement_reference(envelope.event_id(), item.line_no),
                        quantity: item.base_quantity,
                        unit_cost,
                        batch: None,
                        source: StockSource::new(
                            SourceType::SalesReturn,
                            event.return_id.0,
                            item.line_no,
                        ),
                        occurred_at: event.occurred_at,
                    })
                })
                .map(Some);
            outcome.record(item.line_no, result);
        }

        outcome.into_result("restore", &event.return_number)
    }
}

/// Purchase `ReturnShipped` -> the goods left the warehouse.
pub struct PurchaseReturnShippedHandler<D> {
    inventory: Arc<InventoryService<D>>,
}

impl<D> PurchaseReturnShippedHandler<D> {
    pub fn new(inventory: Arc<InventoryService<D>>) -> Self {
        Self { inventory }
    }
}

impl<D> EventHandler<TradeEvent> for PurchaseReturnShippedHandler<D>
where
    D: UnitOfWork + AggregateReader,
{
    fn name(&self) -> &'static str {
        "inventory.deduct_on_purchase_return"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[PurchaseReturnEvent::SHIPPED]
    }

    fn handle(&self, envelope: &EventEnvelope<TradeEvent>) -> anyhow::Result<()> {
        let TradeEvent::PurchaseReturn(PurchaseReturnEvent::Shipped(event)) = envelope.payload()
        else {
            return Ok(());
        };
        let mut outcome = LineFailures::default();

        for item in &event.items {
            let result = self.inventory.execute_existing(
                event.tenant_id,
                event.warehouse_id,
                item.product_id,
                |_| {
                    InventoryCommand::DecreaseStock(DecreaseStock {
                        tenant_id: event.tenant_id,
                        reference: movement_reference(envelope.event_id(), item.line_no),
                        quantity: item.base_quantity,
                        source: StockSource::new(
                            SourceType::PurchaseReturn,
                            event.return_id.0,
                            item.line_no,
                        ),
                        reason: format!("purchase return {}", event.return_number),
                        occurred_at: event.occurred_at,
                    })
                },
            );
            outcome.record(item.line_no, result);
        }

        outcome.into_result("return", &event.return_number)
    }
}

/// Logs low-stock alerts. Never mutates inventory.
#[derive(Debug, Default)]
pub struct StockThresholdHandler {
    alerts: AtomicUsize,
}

impl StockThresholdHandler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts seen so far (redeliveries included).
    pub fn alerts(&self) -> usize {
        self.alerts.load(Ordering::Relaxed)
    }
}

impl EventHandler<TradeEvent> for StockThresholdHandler {
    fn name(&self) -> &'static str {
        "inventory.threshold_alert"
    }

    fn event_types(&self) -> &'static [&'static str] {
        &[InventoryEvent::BELOW_THRESHOLD]
    }

    fn handle(&self, envelope: &EventEnvelope<TradeEvent>) -> anyhow::Result<()> {
        if let TradeEvent::Inventory(InventoryEvent::StockBelowThreshold(alert)) =
            envelope.payload()
        {
            self.alerts.fetch_add(1, Ordering::Relaxed);
            warn!(
                tenant_id = %alert.tenant_id,
                warehouse_id = %alert.warehouse_id,
                product_id = %alert.product_id,
                total_quantity = %alert.total_quantity,
                min_quantity = %alert.min_quantity,
                "stock below minimum"
            );
        }
        Ok(())
    }
}

/// Subscribe every inventory-side handler on `bus`.
///
/// Returns the threshold handler so callers can observe alerts.
pub fn register_inventory_handlers<D, B>(
    bus: &B,
    inventory: Arc<InventoryService<D>>,
    lock_ttl: chrono::Duration,
) -> Result<Arc<StockThresholdHandler>, BusError>
where
    D: UnitOfWork + AggregateReader + 'static,
    B: EventBus<TradeEvent> + ?Sized,
{
    bus.subscribe(Arc::new(OrderConfirmedHandler::new(
        Arc::clone(&inventory),
        lock_ttl,
    )))?;
    bus.subscribe(Arc::new(OrderShippedHandler::new(Arc::clone(&inventory))))?;
    bus.subscribe(Arc::new(OrderCancelledHandler::new(Arc::clone(&inventory))))?;
    bus.subscribe(Arc::new(GoodsReceivedHandler::new(Arc::clone(&inventory))))?;
    bus.subscribe(Arc::new(SalesReturnCompletedHandler::new(Arc::clone(
        &inventory,
    ))))?;
    bus.subscribe(Arc::new(PurchaseReturnShippedHandler::new(inventory)))?;

    let thresholds = Arc::new(StockThresholdHandler::new());
    bus.subscribe(Arc::clone(&thresholds) as Arc<dyn EventHandler<TradeEvent>>)?;
    Ok(thresholds)
}
