use std::collections::VecDeque;

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tradeflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, PendingEvents, ProductId, TenantId,
    WarehouseId, round_quantity,
};
use tradeflow_events::Event;

use crate::lock::StockLock;
use crate::references::ReferenceWindow;

/// Inventory item identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct InventoryItemId(pub AggregateId);

impl InventoryItemId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for InventoryItemId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Kind of business document that caused a stock movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SourceType {
    SalesOrder,
    PurchaseOrder,
    SalesReturn,
    PurchaseReturn,
    StockTaking,
}

impl SourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceType::SalesOrder => "SALES_ORDER",
            SourceType::PurchaseOrder => "PURCHASE_ORDER",
            SourceType::SalesReturn => "SALES_RETURN",
            SourceType::PurchaseReturn => "PURCHASE_RETURN",
            SourceType::StockTaking => "STOCK_TAKING",
        }
    }
}

impl core::fmt::Display for SourceType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The document line a movement belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StockSource {
    pub source_type: SourceType,
    pub source_id: Uuid,
    pub line_no: u32,
}

impl StockSource {
    pub fn new(source_type: SourceType, source_id: impl Into<Uuid>, line_no: u32) -> Self {
        Self {
            source_type,
            source_id: source_id.into(),
            line_no,
        }
    }

    /// Correlation key of the lock held for this source line.
    pub fn lock_reference(&self) -> String {
        format!("lock:{}:{}:{}", self.source_type, self.source_id, self.line_no)
    }
}

/// Correlation key of a movement caused by one line of one event.
pub fn movement_reference(event_id: Uuid, line_no: u32) -> String {
    format!("{event_id}:{line_no}")
}

/// Reference remembered once a shipment has consumed the lock `lock_reference`.
pub fn deducted_marker(lock_reference: &str) -> String {
    format!("{lock_reference}:deducted")
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchInfo {
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
}

/// Receipt batch kept for traceability.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBatch {
    pub batch_number: String,
    pub expiry_date: Option<NaiveDate>,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub received_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MovementKind {
    Increase,
    Decrease,
    Lock,
    Deduct,
    Adjust,
}

/// Ledger row. `reference` is unique per item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub reference: String,
    pub kind: MovementKind,
    pub quantity: Decimal,
    pub source: Option<StockSource>,
    pub occurred_at: DateTime<Utc>,
}

/// Aggregate root: InventoryItem.
///
/// One item per (tenant, warehouse, product). Quantities are in the product's
/// base unit.
///
/// State stays bounded: only active locks are held, `movements` keeps the
/// latest [`Self::MOVEMENT_HISTORY`] rows, and idempotency is checked against
/// the latest [`Self::REFERENCE_WINDOW`] references. The full history is the
/// item's event stream in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryItem {
    id: InventoryItemId,
    tenant_id: Option<TenantId>,
    warehouse_id: Option<WarehouseId>,
    product_id: Option<ProductId>,
    available_quantity: Decimal,
    locked_quantity: Decimal,
    unit_cost: Decimal,
    min_quantity: Decimal,
    max_quantity: Decimal,
    batches: Vec<StockBatch>,
    locks: Vec<StockLock>,
    movements: VecDeque<StockMovement>,
    #[serde(default)]
    references: ReferenceWindow,
    version: u64,
    created: bool,
    #[serde(skip)]
    pending: Vec<InventoryEvent>,
}

impl InventoryItem {
    pub const AGGREGATE_TYPE: &'static str = "inventory_item";

    /// Default lifetime of a stock lock.
    pub const DEFAULT_LOCK_TTL_MINUTES: i64 = 30;

    /// References remembered for idempotency. A redelivery older than this
    /// many newer references on the same item would apply again.
    pub const REFERENCE_WINDOW: usize = 4096;

    /// Movement rows kept in state.
    pub const MOVEMENT_HISTORY: usize = 100;

    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InventoryItemId) -> Self {
        Self {
            id,
            tenant_id: None,
            warehouse_id: None,
            product_id: None,
            available_quantity: Decimal::ZERO,
            locked_quantity: Decimal::ZERO,
            unit_cost: Decimal::ZERO,
            min_quantity: Decimal::ZERO,
            max_quantity: Decimal::ZERO,
            batches: Vec::new(),
            locks: Vec::new(),
            movements: VecDeque::new(),
            references: ReferenceWindow::default(),
            version: 0,
            created: false,
            pending: Vec::new(),
        }
    }

    /// Secondary key used to find the item for a warehouse/product pair.
    pub fn lookup_key(warehouse_id: WarehouseId, product_id: ProductId) -> String {
        format!("{warehouse_id}:{product_id}")
    }

    pub fn id_typed(&self) -> InventoryItemId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn product_id(&self) -> Option<ProductId> {
        self.product_id
    }

    pub fn available_quantity(&self) -> Decimal {
        self.available_quantity
    }

    pub fn locked_quantity(&self) -> Decimal {
        self.locked_quantity
    }

    pub fn total_quantity(&self) -> Decimal {
        self.available_quantity + self.locked_quantity
    }

    /// Moving weighted average cost per base unit.
    pub fn unit_cost(&self) -> Decimal {
        self.unit_cost
    }

    pub fn min_quantity(&self) -> Decimal {
        self.min_quantity
    }

    pub fn max_quantity(&self) -> Decimal {
        self.max_quantity
    }

    pub fn batches(&self) -> &[StockBatch] {
        &self.batches
    }

    /// Active locks.
    pub fn locks(&self) -> &[StockLock] {
        &self.locks
    }

    /// Most recent movements, oldest first.
    pub fn movements(&self) -> impl ExactSizeIterator<Item = &StockMovement> {
        self.movements.iter()
    }

    pub fn references(&self) -> &ReferenceWindow {
        &self.references
    }

    pub fn lock(&self, reference: &str) -> Option<&StockLock> {
        self.locks.iter().find(|l| l.reference == reference)
    }

    /// Whether a command carrying `reference` was already applied.
    pub fn has_reference(&self, reference: &str) -> bool {
        self.references.contains(reference)
    }

    /// Whether a shipment consumed the lock `lock_reference`.
    pub fn is_lock_deducted(&self, lock_reference: &str) -> bool {
        self.references.contains(&deducted_marker(lock_reference))
    }

    pub fn is_below_minimum(&self) -> bool {
        self.min_quantity > Decimal::ZERO && self.total_quantity() < self.min_quantity
    }

    pub fn is_above_maximum(&self) -> bool {
        self.max_quantity > Decimal::ZERO && self.total_quantity() > self.max_quantity
    }

    pub fn active_locks(&self) -> impl Iterator<Item = &StockLock> {
        self.locks.iter()
    }

    /// Active locks whose expiry is at or before `now`.
    pub fn expired_locks(&self, now: DateTime<Utc>) -> impl Iterator<Item = &StockLock> {
        self.active_locks().filter(move |l| l.is_expired_at(now))
    }

    /// Earliest expiry among active locks (what the sweeper indexes on).
    pub fn next_lock_expiry(&self) -> Option<DateTime<Utc>> {
        self.active_locks().map(|l| l.expires_at).min()
    }

    fn remove_lock(&mut self, reference: &str) {
        self.locks.retain(|l| l.reference != reference);
    }

    fn record(&mut self, reference: &str, kind: MovementKind, quantity: Decimal, source: Option<StockSource>, at: DateTime<Utc>) {
        self.references.remember(reference, Self::REFERENCE_WINDOW);
        self.movements.push_back(StockMovement {
            reference: reference.to_string(),
            kind,
            quantity,
            source,
            occurred_at: at,
        });
        while self.movements.len() > Self::MOVEMENT_HISTORY {
            self.movements.pop_front();
        }
    }
}

impl AggregateRoot for InventoryItem {
    type Id = InventoryItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateItem {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IncreaseStock (receipt or restore).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncreaseStock {
    pub tenant_id: TenantId,
    pub reference: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub batch: Option<BatchInfo>,
    pub source: StockSource,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DecreaseStock (direct decrease, no lock involved).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecreaseStock {
    pub tenant_id: TenantId,
    pub reference: String,
    pub quantity: Decimal,
    pub source: StockSource,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: LockStock. `reference` identifies the lock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockStock {
    pub tenant_id: TenantId,
    pub reference: String,
    pub quantity: Decimal,
    pub source: StockSource,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UnlockStock / ExpireLock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseLock {
    pub tenant_id: TenantId,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: DeductStock.
///
/// Consumes the active lock `lock_reference`. When the lock is gone (never
/// taken, unlocked, or expired) the quantity comes straight out of available
/// stock instead. `reference` keys the movement for idempotency.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeductStock {
    pub tenant_id: TenantId,
    pub lock_reference: String,
    pub reference: String,
    pub quantity: Decimal,
    pub source: StockSource,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock (stock taking).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub tenant_id: TenantId,
    pub actual_quantity: Decimal,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetThresholds {
    pub tenant_id: TenantId,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryCommand {
    CreateItem(CreateItem),
    IncreaseStock(IncreaseStock),
    DecreaseStock(DecreaseStock),
    LockStock(LockStock),
    UnlockStock(ReleaseLock),
    ExpireLock(ReleaseLock),
    DeductStock(DeductStock),
    AdjustStock(AdjustStock),
    SetThresholds(SetThresholds),
}

/// Event: ItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCreated {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockIncreased {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    /// Weighted average cost after this receipt.
    pub new_unit_cost: Decimal,
    pub batch: Option<BatchInfo>,
    pub source: StockSource,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDecreased {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    pub quantity: Decimal,
    pub source: StockSource,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLocked {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    pub quantity: Decimal,
    pub source: StockSource,
    pub expires_at: DateTime<Utc>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockUnlocked / LockExpired.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockReleased {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockDeducted {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub reference: String,
    /// The lock consumed, if one was still active.
    pub lock_reference: Option<String>,
    pub quantity: Decimal,
    pub source: StockSource,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub old_quantity: Decimal,
    pub new_quantity: Decimal,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThresholdsSet {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub min_quantity: Decimal,
    pub max_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Emitted alongside a decrease that leaves total stock under the minimum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBelowThreshold {
    pub tenant_id: TenantId,
    pub item_id: InventoryItemId,
    pub warehouse_id: WarehouseId,
    pub product_id: ProductId,
    pub total_quantity: Decimal,
    pub min_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryEvent {
    ItemCreated(ItemCreated),
    StockIncreased(StockIncreased),
    StockDecreased(StockDecreased),
    StockLocked(StockLocked),
    StockUnlocked(LockReleased),
    LockExpired(LockReleased),
    StockDeducted(StockDeducted),
    StockAdjusted(StockAdjusted),
    ThresholdsSet(ThresholdsSet),
    StockBelowThreshold(StockBelowThreshold),
}

impl InventoryEvent {
    pub const ITEM_CREATED: &'static str = "inventory.item.created";
    pub const STOCK_INCREASED: &'static str = "inventory.stock.increased";
    pub const STOCK_DECREASED: &'static str = "inventory.stock.decreased";
    pub const STOCK_LOCKED: &'static str = "inventory.stock.locked";
    pub const STOCK_UNLOCKED: &'static str = "inventory.stock.unlocked";
    pub const LOCK_EXPIRED: &'static str = "inventory.stock.lock_expired";
    pub const STOCK_DEDUCTED: &'static str = "inventory.stock.deducted";
    pub const STOCK_ADJUSTED: &'static str = "inventory.stock.adjusted";
    pub const THRESHOLDS_SET: &'static str = "inventory.item.thresholds_set";
    pub const BELOW_THRESHOLD: &'static str = "inventory.stock.below_threshold";

    pub const EVENT_TYPES: &'static [&'static str] = &[
        Self::ITEM_CREATED,
        Self::STOCK_INCREASED,
        Self::STOCK_DECREASED,
        Self::STOCK_LOCKED,
        Self::STOCK_UNLOCKED,
        Self::LOCK_EXPIRED,
        Self::STOCK_DEDUCTED,
        Self::STOCK_ADJUSTED,
        Self::THRESHOLDS_SET,
        Self::BELOW_THRESHOLD,
    ];
}

impl Event for InventoryEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryEvent::ItemCreated(_) => Self::ITEM_CREATED,
            InventoryEvent::StockIncreased(_) => Self::STOCK_INCREASED,
            InventoryEvent::StockDecreased(_) => Self::STOCK_DECREASED,
            InventoryEvent::StockLocked(_) => Self::STOCK_LOCKED,
            InventoryEvent::StockUnlocked(_) => Self::STOCK_UNLOCKED,
            InventoryEvent::LockExpired(_) => Self::LOCK_EXPIRED,
            InventoryEvent::StockDeducted(_) => Self::STOCK_DEDUCTED,
            InventoryEvent::StockAdjusted(_) => Self::STOCK_ADJUSTED,
            InventoryEvent::ThresholdsSet(_) => Self::THRESHOLDS_SET,
            InventoryEvent::StockBelowThreshold(_) => Self::BELOW_THRESHOLD,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryEvent::ItemCreated(e) => e.occurred_at,
            InventoryEvent::StockIncreased(e) => e.occurred_at,
            InventoryEvent::StockDecreased(e) => e.occurred_at,
            InventoryEvent::StockLocked(e) => e.occurred_at,
            InventoryEvent::StockUnlocked(e) => e.occurred_at,
            InventoryEvent::LockExpired(e) => e.occurred_at,
            InventoryEvent::StockDeducted(e) => e.occurred_at,
            InventoryEvent::StockAdjusted(e) => e.occurred_at,
            InventoryEvent::ThresholdsSet(e) => e.occurred_at,
            InventoryEvent::StockBelowThreshold(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryItem {
    type Command = InventoryCommand;
    type Event = InventoryEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryEvent::ItemCreated(e) => {
                self.id = e.item_id;
                self.tenant_id = Some(e.tenant_id);
                self.warehouse_id = Some(e.warehouse_id);
                self.product_id = Some(e.product_id);
                self.created = true;
            }
            InventoryEvent::StockIncreased(e) => {
                self.available_quantity += e.quantity;
                self.unit_cost = e.new_unit_cost;
                if let Some(batch) = &e.batch {
                    self.batches.push(StockBatch {
                        batch_number: batch.batch_number.clone(),
                        expiry_date: batch.expiry_date,
                        quantity: e.quantity,
                        unit_cost: e.unit_cost,
                        received_at: e.occurred_at,
                    });
                }
                self.record(&e.reference, MovementKind::Increase, e.quantity, Some(e.source), e.occurred_at);
            }
            InventoryEvent::StockDecreased(e) => {
                self.available_quantity -= e.quantity;
                self.record(&e.reference, MovementKind::Decrease, e.quantity, Some(e.source), e.occurred_at);
            }
            InventoryEvent::StockLocked(e) => {
                self.available_quantity -= e.quantity;
                self.locked_quantity += e.quantity;
                self.locks.push(StockLock::new(
                    e.reference.clone(),
                    e.quantity,
                    e.source,
                    e.expires_at,
                    e.occurred_at,
                ));
                self.record(&e.reference, MovementKind::Lock, e.quantity, Some(e.source), e.occurred_at);
            }
            InventoryEvent::StockUnlocked(e) | InventoryEvent::LockExpired(e) => {
                self.remove_lock(&e.reference);
                self.locked_quantity -= e.quantity;
                self.available_quantity += e.quantity;
            }
            InventoryEvent::StockDeducted(e) => {
                match &e.lock_reference {
                    Some(lock_reference) => {
                        self.remove_lock(lock_reference);
                        self.references
                            .remember(&deducted_marker(lock_reference), Self::REFERENCE_WINDOW);
                        self.locked_quantity -= e.quantity;
                    }
                    None => self.available_quantity -= e.quantity,
                }
                self.record(&e.reference, MovementKind::Deduct, e.quantity, Some(e.source), e.occurred_at);
            }
            InventoryEvent::StockAdjusted(e) => {
                self.available_quantity = e.new_quantity;
                let reference = format!("adjust:{}", self.version + 1);
                self.record(&reference, MovementKind::Adjust, e.new_quantity - e.old_quantity, None, e.occurred_at);
            }
            InventoryEvent::ThresholdsSet(e) => {
                self.min_quantity = e.min_quantity;
                self.max_quantity = e.max_quantity;
            }
            InventoryEvent::StockBelowThreshold(_) => {}
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryCommand::CreateItem(cmd) => self.handle_create(cmd),
            InventoryCommand::IncreaseStock(cmd) => self.handle_increase(cmd),
            InventoryCommand::DecreaseStock(cmd) => self.handle_decrease(cmd),
            InventoryCommand::LockStock(cmd) => self.handle_lock(cmd),
            InventoryCommand::UnlockStock(cmd) => self.handle_release(cmd, false),
            InventoryCommand::ExpireLock(cmd) => self.handle_release(cmd, true),
            InventoryCommand::DeductStock(cmd) => self.handle_deduct(cmd),
            InventoryCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            InventoryCommand::SetThresholds(cmd) => self.handle_thresholds(cmd),
        }
    }
}

impl PendingEvents for InventoryItem {
    fn pending_events(&self) -> &[InventoryEvent] {
        &self.pending
    }

    fn push_pending(&mut self, event: InventoryEvent) {
        self.pending.push(event);
    }

    fn mark_persisted(&mut self) {
        self.pending.clear();
    }
}

impl InventoryItem {
    fn ensure_created(&self, tenant_id: TenantId) -> Result<TenantId, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("TENANT_MISMATCH", "tenant mismatch"));
        }
        Ok(tenant_id)
    }

    fn positive(quantity: Decimal) -> Result<Decimal, DomainError> {
        if quantity <= Decimal::ZERO {
            return Err(DomainError::validation("INVALID_QUANTITY", "quantity must be positive"));
        }
        Ok(round_quantity(quantity))
    }

    fn ensure_available(&self, quantity: Decimal) -> Result<(), DomainError> {
        if self.available_quantity < quantity {
            return Err(DomainError::invariant(
                "INSUFFICIENT_STOCK",
                format!(
                    "insufficient available stock: requested {quantity}, available {}",
                    self.available_quantity
                ),
            ));
        }
        Ok(())
    }

    /// Threshold alert for a state whose total quantity drops by `delta`.
    fn threshold_alert(&self, delta: Decimal, at: DateTime<Utc>) -> Option<InventoryEvent> {
        let total = self.total_quantity() - delta;
        if self.min_quantity <= Decimal::ZERO || total >= self.min_quantity {
            return None;
        }
        let (warehouse_id, product_id) = (self.warehouse_id?, self.product_id?);
        Some(InventoryEvent::StockBelowThreshold(StockBelowThreshold {
            tenant_id: self.tenant_id?,
            item_id: self.id,
            warehouse_id,
            product_id,
            total_quantity: total,
            min_quantity: self.min_quantity,
            occurred_at: at,
        }))
    }

    fn handle_create(&self, cmd: &CreateItem) -> Result<Vec<InventoryEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("item already exists"));
        }
        Ok(vec![InventoryEvent::ItemCreated(ItemCreated {
            tenant_id: cmd.tenant_id,
            item_id: cmd.item_id,
            warehouse_id: cmd.warehouse_id,
            product_id: cmd.product_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_increase(&self, cmd: &IncreaseStock) -> Result<Vec<InventoryEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if self.has_reference(&cmd.reference) {
            return Ok(Vec::new());
        }
        let quantity = Self::positive(cmd.quantity)?;
        if cmd.unit_cost < Decimal::ZERO {
            return Err(DomainError::validation("INVALID_COST", "unit cost cannot be negative"));
        }

        // new = (old_qty * old_cost + qty * cost) / (old_qty + qty)
        let old_quantity = self.total_quantity();
        let new_unit_cost = if old_quantity <= Decimal::ZERO {
            cmd.unit_cost
        } else {
            let value = old_quantity * self.unit_cost + quantity * cmd.unit_cost;
            round_quantity(value / (old_quantity + quantity))
        };

        Ok(vec![InventoryEvent::StockIncreased(StockIncreased {
            tenant_id,
            item_id: self.id,
            reference: cmd.reference.clone(),
            quantity,
            unit_cost: cmd.unit_cost,
            new_unit_cost,
            batch: cmd.batch.clone().filter(|b| !b.batch_number.trim().is_empty()),
            source: cmd.source,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_decrease(&self, cmd: &DecreaseStock) -> Result<Vec<InventoryEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if self.has_reference(&cmd.reference) {
            return Ok(Vec::new());
        }
        let quantity = Self::positive(cmd.quantity)?;
        self.ensure_available(quantity)?;

        let mut events = vec![InventoryEvent::StockDecreased(StockDecreased {
            tenant_id,
            item_id: self.id,
            reference: cmd.reference.clone(),
            quantity,
            source: cmd.source,
            reason: cmd.reason.clone(),
            occurred_at: cmd.occurred_at,
        })];
        events.extend(self.threshold_alert(quantity, cmd.occurred_at));
        Ok(events)
    }

    fn handle_lock(&self, cmd: &LockStock) -> Result<Vec<InventoryEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if self.lock(&cmd.reference).is_some() || self.has_reference(&cmd.reference) {
            return Ok(Vec::new());
        }
        let quantity = Self::positive(cmd.quantity)?;
        self.ensure_available(quantity)?;
        if cmd.expires_at <= cmd.occurred_at {
            return Err(DomainError::validation(
                "INVALID_EXPIRY",
                "lock expiry must be in the future",
            ));
        }

        Ok(vec![InventoryEvent::StockLocked(StockLocked {
            tenant_id,
            item_id: self.id,
            reference: cmd.reference.clone(),
            quantity,
            source: cmd.source,
            expires_at: cmd.expires_at,
            occurred_at: cmd.occurred_at,
        })])
    }

    /// Shared by unlock and expiry: releasing removes the lock, so whichever
    /// path comes second is a no-op.
    fn handle_release(&self, cmd: &ReleaseLock, expire: bool) -> Result<Vec<InventoryEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        let Some(lock) = self.lock(&cmd.reference) else {
            return Ok(Vec::new());
        };
        if expire && !lock.is_expired_at(cmd.occurred_at) {
            return Ok(Vec::new());
        }

        let released = LockReleased {
            tenant_id,
            item_id: self.id,
            reference: lock.reference.clone(),
            quantity: lock.quantity,
            occurred_at: cmd.occurred_at,
        };
        Ok(vec![if expire {
            InventoryEvent::LockExpired(released)
        } else {
            InventoryEvent::StockUnlocked(released)
        }])
    }

    fn handle_deduct(&self, cmd: &DeductStock) -> Result<Vec<InventoryEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if self.has_reference(&cmd.reference) {
            return Ok(Vec::new());
        }
        if self.is_lock_deducted(&cmd.lock_reference) {
            return Ok(Vec::new());
        }

        let (lock_reference, quantity) = match self.lock(&cmd.lock_reference) {
            Some(lock) => (Some(lock.reference.clone()), lock.quantity),
            None => {
                let quantity = Self::positive(cmd.quantity)?;
                self.ensure_available(quantity)?;
                (None, quantity)
            }
        };

        let mut events = vec![InventoryEvent::StockDeducted(StockDeducted {
            tenant_id,
            item_id: self.id,
            reference: cmd.reference.clone(),
            lock_reference,
            quantity,
            source: cmd.source,
            occurred_at: cmd.occurred_at,
        })];
        events.extend(self.threshold_alert(quantity, cmd.occurred_at));
        Ok(events)
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<InventoryEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if cmd.actual_quantity < Decimal::ZERO {
            return Err(DomainError::validation(
                "INVALID_QUANTITY",
                "actual quantity cannot be negative",
            ));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "adjustment reason is required"));
        }
        if self.locked_quantity > Decimal::ZERO {
            return Err(DomainError::invariant(
                "HAS_LOCKED_STOCK",
                "cannot adjust stock while there are outstanding locks",
            ));
        }

        let new_quantity = round_quantity(cmd.actual_quantity);
        let mut events = vec![InventoryEvent::StockAdjusted(StockAdjusted {
            tenant_id,
            item_id: self.id,
            old_quantity: self.available_quantity,
            new_quantity,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })];
        events.extend(self.threshold_alert(self.available_quantity - new_quantity, cmd.occurred_at));
        Ok(events)
    }

    fn handle_thresholds(&self, cmd: &SetThresholds) -> Result<Vec<InventoryEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if cmd.min_quantity < Decimal::ZERO || cmd.max_quantity < Decimal::ZERO {
            return Err(DomainError::validation(
                "INVALID_QUANTITY",
                "thresholds cannot be negative",
            ));
        }
        if cmd.max_quantity > Decimal::ZERO && cmd.min_quantity > cmd.max_quantity {
            return Err(DomainError::validation(
                "INVALID_THRESHOLD",
                "minimum cannot exceed maximum",
            ));
        }

        Ok(vec![InventoryEvent::ThresholdsSet(ThresholdsSet {
            tenant_id,
            item_id: self.id,
            min_quantity: cmd.min_quantity,
            max_quantity: cmd.max_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }
}
