use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradeflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LineAmounts, PartyId, PendingEvents,
    ProductId, TenantId, UnitConversion, WarehouseId, round_money, round_quantity,
    validate_document_number, validate_line, validate_party_name,
};
use tradeflow_events::Event;

/// Purchase order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseOrderId(pub AggregateId);

impl PurchaseOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Purchase order lifecycle.
///
/// Receiving may happen in several rounds: `PARTIAL_RECEIVED` loops on itself
/// until every line is fully received, then moves to `COMPLETED`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseOrderStatus {
    Draft,
    Confirmed,
    PartialReceived,
    Completed,
    Cancelled,
}

impl PurchaseOrderStatus {
    pub fn can_transition_to(self, target: PurchaseOrderStatus) -> bool {
        use PurchaseOrderStatus::*;
        matches!(
            (self, target),
            (Draft, Confirmed)
                | (Draft, Cancelled)
                | (Confirmed, PartialReceived)
                | (Confirmed, Completed)
                | (Confirmed, Cancelled)
                | (PartialReceived, PartialReceived)
                | (PartialReceived, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, PurchaseOrderStatus::Completed | PurchaseOrderStatus::Cancelled)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_code: String,
    pub conversion: UnitConversion,
    pub quantity: Decimal,
    pub base_quantity: Decimal,
    pub unit_cost: Decimal,
    pub amount: Decimal,
    pub received_quantity: Decimal,
}

impl PurchaseOrderItem {
    pub fn remaining_quantity(&self) -> Decimal {
        (self.quantity - self.received_quantity).max(Decimal::ZERO)
    }

    pub fn is_fully_received(&self) -> bool {
        self.received_quantity >= self.quantity
    }

    fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self.base_quantity = self.conversion.to_base(quantity);
        self.amount = round_money(quantity * self.unit_cost);
        self
    }

    fn with_cost(mut self, unit_cost: Decimal) -> Self {
        self.unit_cost = unit_cost;
        self.amount = round_money(self.quantity * unit_cost);
        self
    }
}

/// One line of a receipt as it lands in the warehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedLine {
    pub line_no: u32,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub base_quantity: Decimal,
    /// Effective cost per transaction unit (override or ordered cost).
    pub unit_cost: Decimal,
    /// Cost per base (inventory) unit.
    pub base_unit_cost: Decimal,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

/// Aggregate root: PurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrder {
    id: PurchaseOrderId,
    tenant_id: Option<TenantId>,
    order_number: String,
    supplier_id: Option<PartyId>,
    supplier_name: String,
    warehouse_id: Option<WarehouseId>,
    items: Vec<PurchaseOrderItem>,
    amounts: LineAmounts,
    status: PurchaseOrderStatus,
    cancel_reason: Option<String>,
    confirmed_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    #[serde(skip)]
    pending: Vec<PurchaseOrderEvent>,
}

impl PurchaseOrder {
    pub const AGGREGATE_TYPE: &'static str = "purchase_order";

    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: PurchaseOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            order_number: String::new(),
            supplier_id: None,
            supplier_name: String::new(),
            warehouse_id: None,
            items: Vec::new(),
            amounts: LineAmounts::default(),
            status: PurchaseOrderStatus::Draft,
            cancel_reason: None,
            confirmed_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
            pending: Vec::new(),
        }
    }

    pub fn id_typed(&self) -> PurchaseOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn supplier_id(&self) -> Option<PartyId> {
        self.supplier_id
    }

    pub fn supplier_name(&self) -> &str {
        &self.supplier_name
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn status(&self) -> PurchaseOrderStatus {
        self.status
    }

    pub fn items(&self) -> &[PurchaseOrderItem] {
        &self.items
    }

    pub fn total_amount(&self) -> Decimal {
        self.amounts.total
    }

    pub fn payable_amount(&self) -> Decimal {
        self.amounts.payable
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn is_fully_received(&self) -> bool {
        !self.items.is_empty() && self.items.iter().all(PurchaseOrderItem::is_fully_received)
    }

    fn recalculate(&mut self) {
        self.amounts = LineAmounts::compute(self.items.iter().map(|i| i.amount), self.amounts.discount);
    }
}

impl AggregateRoot for PurchaseOrder {
    type Id = PurchaseOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreatePurchaseOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseOrder {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: PartyId,
    pub supplier_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem (only allowed in Draft).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_code: String,
    pub conversion: UnitConversion,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItemQuantity {
    pub tenant_id: TenantId,
    pub line_no: u32,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItemCost {
    pub tenant_id: TenantId,
    pub line_no: u32,
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub tenant_id: TenantId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyDiscount {
    pub tenant_id: TenantId,
    pub discount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetWarehouse {
    pub tenant_id: TenantId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmOrder {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

/// A line of a receive request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveLine {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_cost: Option<Decimal>,
    pub batch_number: Option<String>,
    pub expiry_date: Option<NaiveDate>,
}

impl ReceiveLine {
    pub fn new(product_id: ProductId, quantity: Decimal) -> Self {
        Self {
            product_id,
            quantity,
            unit_cost: None,
            batch_number: None,
            expiry_date: None,
        }
    }
}

/// Command: ReceiveGoods.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveGoods {
    pub tenant_id: TenantId,
    pub lines: Vec<ReceiveLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderCommand {
    CreatePurchaseOrder(CreatePurchaseOrder),
    AddItem(AddItem),
    UpdateItemQuantity(UpdateItemQuantity),
    UpdateItemCost(UpdateItemCost),
    RemoveItem(RemoveItem),
    ApplyDiscount(ApplyDiscount),
    SetWarehouse(SetWarehouse),
    ConfirmOrder(ConfirmOrder),
    ReceiveGoods(ReceiveGoods),
    CancelOrder(CancelOrder),
}

/// Event: PurchaseOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: PartyId,
    pub supplier_name: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub item: PurchaseOrderItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChanged {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub item: PurchaseOrderItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountApplied {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub discount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSet {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: PartyId,
    pub payable_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: GoodsReceived.
///
/// Carries what physically arrived in this round; inventory consumers raise
/// on-hand stock from `lines`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsReceived {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: PartyId,
    pub warehouse_id: WarehouseId,
    pub lines: Vec<ReceivedLine>,
    pub is_fully_received: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: PurchaseOrderId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseOrderEvent {
    PurchaseOrderCreated(PurchaseOrderCreated),
    ItemAdded(ItemAdded),
    ItemChanged(ItemChanged),
    ItemRemoved(ItemRemoved),
    DiscountApplied(DiscountApplied),
    WarehouseSet(WarehouseSet),
    OrderConfirmed(OrderConfirmed),
    GoodsReceived(GoodsReceived),
    OrderCancelled(OrderCancelled),
}

impl PurchaseOrderEvent {
    pub const CREATED: &'static str = "purchasing.order.created";
    pub const ITEM_ADDED: &'static str = "purchasing.order.item_added";
    pub const ITEM_CHANGED: &'static str = "purchasing.order.item_changed";
    pub const ITEM_REMOVED: &'static str = "purchasing.order.item_removed";
    pub const DISCOUNT_APPLIED: &'static str = "purchasing.order.discount_applied";
    pub const WAREHOUSE_SET: &'static str = "purchasing.order.warehouse_set";
    pub const CONFIRMED: &'static str = "purchasing.order.confirmed";
    pub const GOODS_RECEIVED: &'static str = "purchasing.order.goods_received";
    pub const CANCELLED: &'static str = "purchasing.order.cancelled";

    pub const EVENT_TYPES: &'static [&'static str] = &[
        Self::CREATED,
        Self::ITEM_ADDED,
        Self::ITEM_CHANGED,
        Self::ITEM_REMOVED,
        Self::DISCOUNT_APPLIED,
        Self::WAREHOUSE_SET,
        Self::CONFIRMED,
        Self::GOODS_RECEIVED,
        Self::CANCELLED,
    ];
}

impl Event for PurchaseOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(_) => Self::CREATED,
            PurchaseOrderEvent::ItemAdded(_) => Self::ITEM_ADDED,
            PurchaseOrderEvent::ItemChanged(_) => Self::ITEM_CHANGED,
            PurchaseOrderEvent::ItemRemoved(_) => Self::ITEM_REMOVED,
            PurchaseOrderEvent::DiscountApplied(_) => Self::DISCOUNT_APPLIED,
            PurchaseOrderEvent::WarehouseSet(_) => Self::WAREHOUSE_SET,
            PurchaseOrderEvent::OrderConfirmed(_) => Self::CONFIRMED,
            PurchaseOrderEvent::GoodsReceived(_) => Self::GOODS_RECEIVED,
            PurchaseOrderEvent::OrderCancelled(_) => Self::CANCELLED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => e.occurred_at,
            PurchaseOrderEvent::ItemAdded(e) => e.occurred_at,
            PurchaseOrderEvent::ItemChanged(e) => e.occurred_at,
            PurchaseOrderEvent::ItemRemoved(e) => e.occurred_at,
            PurchaseOrderEvent::DiscountApplied(e) => e.occurred_at,
            PurchaseOrderEvent::WarehouseSet(e) => e.occurred_at,
            PurchaseOrderEvent::OrderConfirmed(e) => e.occurred_at,
            PurchaseOrderEvent::GoodsReceived(e) => e.occurred_at,
            PurchaseOrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseOrder {
    type Command = PurchaseOrderCommand;
    type Event = PurchaseOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseOrderEvent::PurchaseOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.order_number = e.order_number.clone();
                self.supplier_id = Some(e.supplier_id);
                self.supplier_name = e.supplier_name.clone();
                self.status = PurchaseOrderStatus::Draft;
                self.items.clear();
                self.created = true;
            }
            PurchaseOrderEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
                self.recalculate();
            }
            PurchaseOrderEvent::ItemChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.line_no == e.item.line_no) {
                    *item = e.item.clone();
                }
                self.recalculate();
            }
            PurchaseOrderEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.line_no != e.line_no);
                self.recalculate();
            }
            PurchaseOrderEvent::DiscountApplied(e) => {
                self.amounts.discount = e.discount;
                self.recalculate();
            }
            PurchaseOrderEvent::WarehouseSet(e) => self.warehouse_id = Some(e.warehouse_id),
            PurchaseOrderEvent::OrderConfirmed(e) => {
                self.status = PurchaseOrderStatus::Confirmed;
                self.confirmed_at = Some(e.occurred_at);
            }
            PurchaseOrderEvent::GoodsReceived(e) => {
                for line in &e.lines {
                    if let Some(item) = self.items.iter_mut().find(|i| i.line_no == line.line_no) {
                        item.received_quantity += line.quantity;
                    }
                }
                if e.is_fully_received {
                    self.status = PurchaseOrderStatus::Completed;
                    self.completed_at = Some(e.occurred_at);
                } else {
                    self.status = PurchaseOrderStatus::PartialReceived;
                }
            }
            PurchaseOrderEvent::OrderCancelled(e) => {
                self.status = PurchaseOrderStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
                self.cancelled_at = Some(e.occurred_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseOrderCommand::CreatePurchaseOrder(cmd) => self.handle_create(cmd),
            PurchaseOrderCommand::AddItem(cmd) => self.handle_add_item(cmd),
            PurchaseOrderCommand::UpdateItemQuantity(cmd) => self.handle_update_quantity(cmd),
            PurchaseOrderCommand::UpdateItemCost(cmd) => self.handle_update_cost(cmd),
            PurchaseOrderCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            PurchaseOrderCommand::ApplyDiscount(cmd) => self.handle_apply_discount(cmd),
            PurchaseOrderCommand::SetWarehouse(cmd) => self.handle_set_warehouse(cmd),
            PurchaseOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            PurchaseOrderCommand::ReceiveGoods(cmd) => self.handle_receive(cmd),
            PurchaseOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PendingEvents for PurchaseOrder {
    fn pending_events(&self) -> &[PurchaseOrderEvent] {
        &self.pending
    }

    fn push_pending(&mut self, event: PurchaseOrderEvent) {
        self.pending.push(event);
    }

    fn mark_persisted(&mut self) {
        self.pending.clear();
    }
}

impl PurchaseOrder {
    fn ensure_created(&self, tenant_id: TenantId) -> Result<TenantId, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("TENANT_MISMATCH", "tenant mismatch"));
        }
        Ok(tenant_id)
    }

    fn ensure_transition(&self, target: PurchaseOrderStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::transition(self.status, target));
        }
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        if self.status != PurchaseOrderStatus::Draft {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                "cannot modify purchase order once confirmed",
            ));
        }
        Ok(())
    }

    fn existing_item(&self, line_no: u32) -> Result<&PurchaseOrderItem, DomainError> {
        self.items
            .iter()
            .find(|i| i.line_no == line_no)
            .ok_or_else(|| DomainError::validation("ITEM_NOT_FOUND", format!("line {line_no} not found")))
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseOrder,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase order already exists"));
        }
        validate_document_number(&cmd.order_number, "INVALID_ORDER_NUMBER")?;
        validate_party_name(&cmd.supplier_name, "INVALID_SUPPLIER")?;

        Ok(vec![PurchaseOrderEvent::PurchaseOrderCreated(
            PurchaseOrderCreated {
                tenant_id: cmd.tenant_id,
                order_id: cmd.order_id,
                order_number: cmd.order_number.trim().to_string(),
                supplier_id: cmd.supplier_id,
                supplier_name: cmd.supplier_name.trim().to_string(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        validate_line(&cmd.product_name, cmd.quantity, cmd.unit_cost)?;
        if self.items.iter().any(|i| i.product_id == cmd.product_id) {
            return Err(DomainError::validation(
                "DUPLICATE_PRODUCT",
                "product already exists in order, update quantity instead",
            ));
        }

        let line_no = self.items.iter().map(|i| i.line_no).max().unwrap_or(0) + 1;
        let item = PurchaseOrderItem {
            line_no,
            product_id: cmd.product_id,
            product_name: cmd.product_name.clone(),
            product_code: cmd.product_code.clone(),
            conversion: cmd.conversion.clone(),
            quantity: Decimal::ZERO,
            base_quantity: Decimal::ZERO,
            unit_cost: cmd.unit_cost,
            amount: Decimal::ZERO,
            received_quantity: Decimal::ZERO,
        }
        .with_quantity(cmd.quantity);

        Ok(vec![PurchaseOrderEvent::ItemAdded(ItemAdded {
            tenant_id,
            order_id: self.id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_quantity(
        &self,
        cmd: &UpdateItemQuantity,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("INVALID_QUANTITY", "quantity must be positive"));
        }
        let item = self.existing_item(cmd.line_no)?.clone().with_quantity(cmd.quantity);

        Ok(vec![PurchaseOrderEvent::ItemChanged(ItemChanged {
            tenant_id,
            order_id: self.id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_cost(
        &self,
        cmd: &UpdateItemCost,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        if cmd.unit_cost < Decimal::ZERO {
            return Err(DomainError::validation("INVALID_COST", "unit cost cannot be negative"));
        }
        let item = self.existing_item(cmd.line_no)?.clone().with_cost(cmd.unit_cost);

        Ok(vec![PurchaseOrderEvent::ItemChanged(ItemChanged {
            tenant_id,
            order_id: self.id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        self.existing_item(cmd.line_no)?;

        Ok(vec![PurchaseOrderEvent::ItemRemoved(ItemRemoved {
            tenant_id,
            order_id: self.id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_discount(
        &self,
        cmd: &ApplyDiscount,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        if cmd.discount < Decimal::ZERO || cmd.discount > self.amounts.total {
            return Err(DomainError::validation(
                "INVALID_DISCOUNT",
                "discount must be between zero and the total amount",
            ));
        }

        Ok(vec![PurchaseOrderEvent::DiscountApplied(DiscountApplied {
            tenant_id,
            order_id: self.id,
            discount: round_money(cmd.discount),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_warehouse(
        &self,
        cmd: &SetWarehouse,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if !matches!(
            self.status,
            PurchaseOrderStatus::Draft | PurchaseOrderStatus::Confirmed
        ) {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                format!("cannot set warehouse for a {:?} order", self.status),
            ));
        }

        Ok(vec![PurchaseOrderEvent::WarehouseSet(WarehouseSet {
            tenant_id,
            order_id: self.id,
            warehouse_id: cmd.warehouse_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &ConfirmOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(PurchaseOrderStatus::Confirmed)?;
        if self.items.is_empty() {
            return Err(DomainError::validation(
                "NO_ITEMS",
                "cannot confirm purchase order without items",
            ));
        }
        if self.amounts.payable <= Decimal::ZERO {
            return Err(DomainError::validation(
                "INVALID_AMOUNT",
                "order payable amount must be positive",
            ));
        }
        let supplier_id = self.supplier_id.ok_or_else(DomainError::not_found)?;

        Ok(vec![PurchaseOrderEvent::OrderConfirmed(OrderConfirmed {
            tenant_id,
            order_id: self.id,
            order_number: self.order_number.clone(),
            supplier_id,
            payable_amount: self.amounts.payable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(
        &self,
        cmd: &ReceiveGoods,
    ) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        // COMPLETED is reachable from exactly the states that accept a receipt.
        self.ensure_transition(PurchaseOrderStatus::Completed)?;
        let warehouse_id = self.warehouse_id.ok_or_else(|| {
            DomainError::validation("NO_WAREHOUSE", "warehouse must be set before receiving")
        })?;
        if cmd.lines.is_empty() {
            return Err(DomainError::validation("NO_ITEMS", "nothing to receive"));
        }

        let mut received = Vec::with_capacity(cmd.lines.len());
        let mut after: Vec<(u32, Decimal)> = self
            .items
            .iter()
            .map(|i| (i.line_no, i.received_quantity))
            .collect();

        for line in &cmd.lines {
            if line.quantity <= Decimal::ZERO {
                return Err(DomainError::validation(
                    "INVALID_QUANTITY",
                    "received quantity must be positive",
                ));
            }
            if line.unit_cost.is_some_and(|c| c < Decimal::ZERO) {
                return Err(DomainError::validation("INVALID_COST", "unit cost cannot be negative"));
            }
            let item = self
                .items
                .iter()
                .find(|i| i.product_id == line.product_id)
                .ok_or_else(|| {
                    DomainError::validation(
                        "ITEM_NOT_FOUND",
                        format!("product {} is not on this order", line.product_id),
                    )
                })?;

            let slot = after
                .iter_mut()
                .find(|(line_no, _)| *line_no == item.line_no)
                .ok_or_else(DomainError::not_found)?;
            if slot.1 + line.quantity > item.quantity {
                return Err(DomainError::quantity_exceeded(format!(
                    "receiving {} of line {} exceeds remaining {}",
                    line.quantity,
                    item.line_no,
                    item.quantity - slot.1
                )));
            }
            slot.1 += line.quantity;

            let unit_cost = line.unit_cost.unwrap_or(item.unit_cost);
            received.push(ReceivedLine {
                line_no: item.line_no,
                product_id: item.product_id,
                quantity: line.quantity,
                base_quantity: item.conversion.to_base(line.quantity),
                unit_cost,
                base_unit_cost: round_quantity(unit_cost / item.conversion.rate),
                batch_number: line.batch_number.clone().filter(|b| !b.trim().is_empty()),
                expiry_date: line.expiry_date,
            });
        }

        let is_fully_received = self
            .items
            .iter()
            .all(|i| after.iter().any(|(no, qty)| *no == i.line_no && *qty >= i.quantity));
        let supplier_id = self.supplier_id.ok_or_else(DomainError::not_found)?;

        Ok(vec![PurchaseOrderEvent::GoodsReceived(GoodsReceived {
            tenant_id,
            order_id: self.id,
            order_number: self.order_number.clone(),
            supplier_id,
            warehouse_id,
            lines: received,
            is_fully_received,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<PurchaseOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(PurchaseOrderStatus::Cancelled)?;
        if self.items.iter().any(|i| i.received_quantity > Decimal::ZERO) {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                "cannot cancel an order with received goods",
            ));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "cancel reason is required"));
        }

        Ok(vec![PurchaseOrderEvent::OrderCancelled(OrderCancelled {
            tenant_id,
            order_id: self.id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }
}
