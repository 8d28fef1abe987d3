use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradeflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LineAmounts, PartyId, PendingEvents,
    ProductId, TenantId, UnitConversion, WarehouseId, round_money, validate_document_number,
    validate_line, validate_party_name,
};
use tradeflow_events::Event;

/// Sales order identifier (tenant-scoped via `tenant_id` fields in events/commands).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesOrderId(pub AggregateId);

impl SalesOrderId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesOrderId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Sales order status lifecycle.
///
/// `DRAFT → {CONFIRMED, CANCELLED}`, `CONFIRMED → {SHIPPED, CANCELLED}`,
/// `SHIPPED → {COMPLETED}`; `COMPLETED` and `CANCELLED` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesOrderStatus {
    Draft,
    Confirmed,
    Shipped,
    Completed,
    Cancelled,
}

impl SalesOrderStatus {
    pub fn can_transition_to(self, target: SalesOrderStatus) -> bool {
        use SalesOrderStatus::*;
        matches!(
            (self, target),
            (Draft, Confirmed) | (Draft, Cancelled) | (Confirmed, Shipped) | (Confirmed, Cancelled)
                | (Shipped, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, SalesOrderStatus::Completed | SalesOrderStatus::Cancelled)
    }
}

/// Order line. `line_no` identifies the line within the order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderItem {
    pub line_no: u32,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_code: String,
    pub conversion: UnitConversion,
    pub quantity: Decimal,
    pub base_quantity: Decimal,
    pub unit_price: Decimal,
    pub amount: Decimal,
}

impl SalesOrderItem {
    fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.quantity = quantity;
        self.base_quantity = self.conversion.to_base(quantity);
        self.amount = round_money(quantity * self.unit_price);
        self
    }

    fn with_price(mut self, unit_price: Decimal) -> Self {
        self.unit_price = unit_price;
        self.amount = round_money(self.quantity * unit_price);
        self
    }
}

/// Aggregate root: SalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrder {
    id: SalesOrderId,
    tenant_id: Option<TenantId>,
    order_number: String,
    customer_id: Option<PartyId>,
    customer_name: String,
    warehouse_id: Option<WarehouseId>,
    items: Vec<SalesOrderItem>,
    amounts: LineAmounts,
    status: SalesOrderStatus,
    cancel_reason: Option<String>,
    created_at: Option<DateTime<Utc>>,
    confirmed_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    #[serde(skip)]
    pending: Vec<SalesOrderEvent>,
}

impl SalesOrder {
    pub const AGGREGATE_TYPE: &'static str = "sales_order";

    /// Create an empty, not-yet-created aggregate instance.
    pub fn empty(id: SalesOrderId) -> Self {
        Self {
            id,
            tenant_id: None,
            order_number: String::new(),
            customer_id: None,
            customer_name: String::new(),
            warehouse_id: None,
            items: Vec::new(),
            amounts: LineAmounts::default(),
            status: SalesOrderStatus::Draft,
            cancel_reason: None,
            created_at: None,
            confirmed_at: None,
            shipped_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
            pending: Vec::new(),
        }
    }

    pub fn id_typed(&self) -> SalesOrderId {
        self.id
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn order_number(&self) -> &str {
        &self.order_number
    }

    pub fn customer_id(&self) -> Option<PartyId> {
        self.customer_id
    }

    pub fn customer_name(&self) -> &str {
        &self.customer_name
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn status(&self) -> SalesOrderStatus {
        self.status
    }

    pub fn items(&self) -> &[SalesOrderItem] {
        &self.items
    }

    pub fn item(&self, line_no: u32) -> Option<&SalesOrderItem> {
        self.items.iter().find(|i| i.line_no == line_no)
    }

    pub fn total_amount(&self) -> Decimal {
        self.amounts.total
    }

    pub fn discount_amount(&self) -> Decimal {
        self.amounts.discount
    }

    pub fn payable_amount(&self) -> Decimal {
        self.amounts.payable
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn confirmed_at(&self) -> Option<DateTime<Utc>> {
        self.confirmed_at
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn cancelled_at(&self) -> Option<DateTime<Utc>> {
        self.cancelled_at
    }

    pub fn is_modifiable(&self) -> bool {
        matches!(self.status, SalesOrderStatus::Draft)
    }

    fn recalculate(&mut self) {
        self.amounts = LineAmounts::compute(self.items.iter().map(|i| i.amount), self.amounts.discount);
    }
}

impl AggregateRoot for SalesOrder {
    type Id = SalesOrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateSalesOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesOrder {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub customer_id: PartyId,
    pub customer_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddItem {
    pub tenant_id: TenantId,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_code: String,
    pub conversion: UnitConversion,
    pub quantity: Decimal,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateItemQuantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItemQuantity {
    pub tenant_id: TenantId,
    pub line_no: u32,
    pub quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateItemPrice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateItemPrice {
    pub tenant_id: TenantId,
    pub line_no: u32,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub tenant_id: TenantId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ApplyDiscount.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplyDiscount {
    pub tenant_id: TenantId,
    pub discount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetWarehouse.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetWarehouse {
    pub tenant_id: TenantId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmOrder / ShipOrder / CompleteOrder (no payload).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transition {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub tenant_id: TenantId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderCommand {
    CreateSalesOrder(CreateSalesOrder),
    AddItem(AddItem),
    UpdateItemQuantity(UpdateItemQuantity),
    UpdateItemPrice(UpdateItemPrice),
    RemoveItem(RemoveItem),
    ApplyDiscount(ApplyDiscount),
    SetWarehouse(SetWarehouse),
    ConfirmOrder(Transition),
    ShipOrder(Transition),
    CompleteOrder(Transition),
    CancelOrder(CancelOrder),
}

/// Event: SalesOrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesOrderCreated {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub customer_id: PartyId,
    pub customer_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemAdded (carries the computed line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemAdded {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub item: SalesOrderItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemChanged (quantity or price update; carries the recomputed line).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemChanged {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub item: SalesOrderItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemRemoved {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

/// Event: DiscountApplied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscountApplied {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub discount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: WarehouseSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarehouseSet {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderConfirmed {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub customer_id: PartyId,
    pub warehouse_id: Option<WarehouseId>,
    pub items: Vec<SalesOrderItem>,
    pub total_amount: Decimal,
    pub payable_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderShipped {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub warehouse_id: WarehouseId,
    pub items: Vec<SalesOrderItem>,
    pub payable_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub payable_amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCancelled.
///
/// `was_confirmed` tells consumers that stock was locked for this order and
/// must be released.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCancelled {
    pub tenant_id: TenantId,
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub warehouse_id: Option<WarehouseId>,
    pub items: Vec<SalesOrderItem>,
    pub reason: String,
    pub was_confirmed: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesOrderEvent {
    SalesOrderCreated(SalesOrderCreated),
    ItemAdded(ItemAdded),
    ItemChanged(ItemChanged),
    ItemRemoved(ItemRemoved),
    DiscountApplied(DiscountApplied),
    WarehouseSet(WarehouseSet),
    OrderConfirmed(OrderConfirmed),
    OrderShipped(OrderShipped),
    OrderCompleted(OrderCompleted),
    OrderCancelled(OrderCancelled),
}

impl SalesOrderEvent {
    pub const CREATED: &'static str = "sales.order.created";
    pub const ITEM_ADDED: &'static str = "sales.order.item_added";
    pub const ITEM_CHANGED: &'static str = "sales.order.item_changed";
    pub const ITEM_REMOVED: &'static str = "sales.order.item_removed";
    pub const DISCOUNT_APPLIED: &'static str = "sales.order.discount_applied";
    pub const WAREHOUSE_SET: &'static str = "sales.order.warehouse_set";
    pub const CONFIRMED: &'static str = "sales.order.confirmed";
    pub const SHIPPED: &'static str = "sales.order.shipped";
    pub const COMPLETED: &'static str = "sales.order.completed";
    pub const CANCELLED: &'static str = "sales.order.cancelled";

    /// Every tag this enum can carry.
    pub const EVENT_TYPES: &'static [&'static str] = &[
        Self::CREATED,
        Self::ITEM_ADDED,
        Self::ITEM_CHANGED,
        Self::ITEM_REMOVED,
        Self::DISCOUNT_APPLIED,
        Self::WAREHOUSE_SET,
        Self::CONFIRMED,
        Self::SHIPPED,
        Self::COMPLETED,
        Self::CANCELLED,
    ];
}

impl Event for SalesOrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesOrderEvent::SalesOrderCreated(_) => Self::CREATED,
            SalesOrderEvent::ItemAdded(_) => Self::ITEM_ADDED,
            SalesOrderEvent::ItemChanged(_) => Self::ITEM_CHANGED,
            SalesOrderEvent::ItemRemoved(_) => Self::ITEM_REMOVED,
            SalesOrderEvent::DiscountApplied(_) => Self::DISCOUNT_APPLIED,
            SalesOrderEvent::WarehouseSet(_) => Self::WAREHOUSE_SET,
            SalesOrderEvent::OrderConfirmed(_) => Self::CONFIRMED,
            SalesOrderEvent::OrderShipped(_) => Self::SHIPPED,
            SalesOrderEvent::OrderCompleted(_) => Self::COMPLETED,
            SalesOrderEvent::OrderCancelled(_) => Self::CANCELLED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesOrderEvent::SalesOrderCreated(e) => e.occurred_at,
            SalesOrderEvent::ItemAdded(e) => e.occurred_at,
            SalesOrderEvent::ItemChanged(e) => e.occurred_at,
            SalesOrderEvent::ItemRemoved(e) => e.occurred_at,
            SalesOrderEvent::DiscountApplied(e) => e.occurred_at,
            SalesOrderEvent::WarehouseSet(e) => e.occurred_at,
            SalesOrderEvent::OrderConfirmed(e) => e.occurred_at,
            SalesOrderEvent::OrderShipped(e) => e.occurred_at,
            SalesOrderEvent::OrderCompleted(e) => e.occurred_at,
            SalesOrderEvent::OrderCancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesOrder {
    type Command = SalesOrderCommand;
    type Event = SalesOrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesOrderEvent::SalesOrderCreated(e) => {
                self.id = e.order_id;
                self.tenant_id = Some(e.tenant_id);
                self.order_number = e.order_number.clone();
                self.customer_id = Some(e.customer_id);
                self.customer_name = e.customer_name.clone();
                self.status = SalesOrderStatus::Draft;
                self.items.clear();
                self.amounts = LineAmounts::default();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
            SalesOrderEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
                self.recalculate();
            }
            SalesOrderEvent::ItemChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.line_no == e.item.line_no) {
                    *item = e.item.clone();
                }
                self.recalculate();
            }
            SalesOrderEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.line_no != e.line_no);
                self.recalculate();
            }
            SalesOrderEvent::DiscountApplied(e) => {
                self.amounts.discount = e.discount;
                self.recalculate();
            }
            SalesOrderEvent::WarehouseSet(e) => {
                self.warehouse_id = Some(e.warehouse_id);
            }
            SalesOrderEvent::OrderConfirmed(e) => {
                self.status = SalesOrderStatus::Confirmed;
                self.confirmed_at = Some(e.occurred_at);
            }
            SalesOrderEvent::OrderShipped(e) => {
                self.status = SalesOrderStatus::Shipped;
                self.shipped_at = Some(e.occurred_at);
            }
            SalesOrderEvent::OrderCompleted(e) => {
                self.status = SalesOrderStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
            SalesOrderEvent::OrderCancelled(e) => {
                self.status = SalesOrderStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
                self.cancelled_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesOrderCommand::CreateSalesOrder(cmd) => self.handle_create(cmd),
            SalesOrderCommand::AddItem(cmd) => self.handle_add_item(cmd),
            SalesOrderCommand::UpdateItemQuantity(cmd) => self.handle_update_quantity(cmd),
            SalesOrderCommand::UpdateItemPrice(cmd) => self.handle_update_price(cmd),
            SalesOrderCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            SalesOrderCommand::ApplyDiscount(cmd) => self.handle_apply_discount(cmd),
            SalesOrderCommand::SetWarehouse(cmd) => self.handle_set_warehouse(cmd),
            SalesOrderCommand::ConfirmOrder(cmd) => self.handle_confirm(cmd),
            SalesOrderCommand::ShipOrder(cmd) => self.handle_ship(cmd),
            SalesOrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
            SalesOrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PendingEvents for SalesOrder {
    fn pending_events(&self) -> &[SalesOrderEvent] {
        &self.pending
    }

    fn push_pending(&mut self, event: SalesOrderEvent) {
        self.pending.push(event);
    }

    fn mark_persisted(&mut self) {
        self.pending.clear();
    }
}

impl SalesOrder {
    fn ensure_created(&self, tenant_id: TenantId) -> Result<TenantId, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("TENANT_MISMATCH", "tenant mismatch"));
        }
        Ok(tenant_id)
    }

    fn ensure_transition(&self, target: SalesOrderStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::transition(self.status, target));
        }
        Ok(())
    }

    fn ensure_draft(&self, action: &str) -> Result<(), DomainError> {
        if !self.is_modifiable() {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                format!("cannot {action} on a {:?} order", self.status),
            ));
        }
        Ok(())
    }

    fn existing_item(&self, line_no: u32) -> Result<&SalesOrderItem, DomainError> {
        self.item(line_no)
            .ok_or_else(|| DomainError::validation("ITEM_NOT_FOUND", format!("line {line_no} not found")))
    }

    fn handle_create(&self, cmd: &CreateSalesOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales order already exists"));
        }
        validate_document_number(&cmd.order_number, "INVALID_ORDER_NUMBER")?;
        validate_party_name(&cmd.customer_name, "INVALID_CUSTOMER")?;

        Ok(vec![SalesOrderEvent::SalesOrderCreated(SalesOrderCreated {
            tenant_id: cmd.tenant_id,
            order_id: cmd.order_id,
            order_number: cmd.order_number.trim().to_string(),
            customer_id: cmd.customer_id,
            customer_name: cmd.customer_name.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddItem) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft("add items")?;
        validate_line(&cmd.product_name, cmd.quantity, cmd.unit_price)?;

        if self.items.iter().any(|i| i.product_id == cmd.product_id) {
            return Err(DomainError::validation(
                "DUPLICATE_PRODUCT",
                "product already exists in order, update quantity instead",
            ));
        }

        let line_no = self.items.iter().map(|i| i.line_no).max().unwrap_or(0) + 1;
        let item = SalesOrderItem {
            line_no,
            product_id: cmd.product_id,
            product_name: cmd.product_name.clone(),
            product_code: cmd.product_code.clone(),
            conversion: cmd.conversion.clone(),
            quantity: Decimal::ZERO,
            base_quantity: Decimal::ZERO,
            unit_price: cmd.unit_price,
            amount: Decimal::ZERO,
        }
        .with_quantity(cmd.quantity);

        Ok(vec![SalesOrderEvent::ItemAdded(ItemAdded {
            tenant_id,
            order_id: self.id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_quantity(
        &self,
        cmd: &UpdateItemQuantity,
    ) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft("update items")?;
        if cmd.quantity <= Decimal::ZERO {
            return Err(DomainError::validation("INVALID_QUANTITY", "quantity must be positive"));
        }
        let item = self.existing_item(cmd.line_no)?.clone().with_quantity(cmd.quantity);

        Ok(vec![SalesOrderEvent::ItemChanged(ItemChanged {
            tenant_id,
            order_id: self.id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_price(&self, cmd: &UpdateItemPrice) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft("update items")?;
        if cmd.unit_price < Decimal::ZERO {
            return Err(DomainError::validation("INVALID_PRICE", "unit price cannot be negative"));
        }
        let item = self.existing_item(cmd.line_no)?.clone().with_price(cmd.unit_price);

        Ok(vec![SalesOrderEvent::ItemChanged(ItemChanged {
            tenant_id,
            order_id: self.id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveItem) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft("remove items")?;
        self.existing_item(cmd.line_no)?;

        Ok(vec![SalesOrderEvent::ItemRemoved(ItemRemoved {
            tenant_id,
            order_id: self.id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_apply_discount(&self, cmd: &ApplyDiscount) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft("apply a discount")?;
        if cmd.discount < Decimal::ZERO {
            return Err(DomainError::validation("INVALID_DISCOUNT", "discount cannot be negative"));
        }
        if cmd.discount > self.amounts.total {
            return Err(DomainError::validation(
                "INVALID_DISCOUNT",
                "discount cannot exceed total amount",
            ));
        }

        Ok(vec![SalesOrderEvent::DiscountApplied(DiscountApplied {
            tenant_id,
            order_id: self.id,
            discount: round_money(cmd.discount),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_warehouse(&self, cmd: &SetWarehouse) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if !matches!(self.status, SalesOrderStatus::Draft | SalesOrderStatus::Confirmed) {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                format!("cannot set warehouse for a {:?} order", self.status),
            ));
        }

        Ok(vec![SalesOrderEvent::WarehouseSet(WarehouseSet {
            tenant_id,
            order_id: self.id,
            warehouse_id: cmd.warehouse_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm(&self, cmd: &Transition) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesOrderStatus::Confirmed)?;
        if self.items.is_empty() {
            return Err(DomainError::validation("NO_ITEMS", "cannot confirm order without items"));
        }
        let customer_id = self.customer_id.ok_or_else(DomainError::not_found)?;
        if self.amounts.payable <= Decimal::ZERO {
            return Err(DomainError::validation(
                "INVALID_AMOUNT",
                "order payable amount must be positive",
            ));
        }

        Ok(vec![SalesOrderEvent::OrderConfirmed(OrderConfirmed {
            tenant_id,
            order_id: self.id,
            order_number: self.order_number.clone(),
            customer_id,
            warehouse_id: self.warehouse_id,
            items: self.items.clone(),
            total_amount: self.amounts.total,
            payable_amount: self.amounts.payable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &Transition) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesOrderStatus::Shipped)?;
        let warehouse_id = self.warehouse_id.ok_or_else(|| {
            DomainError::validation("NO_WAREHOUSE", "warehouse must be set before shipping")
        })?;

        Ok(vec![SalesOrderEvent::OrderShipped(OrderShipped {
            tenant_id,
            order_id: self.id,
            order_number: self.order_number.clone(),
            warehouse_id,
            items: self.items.clone(),
            payable_amount: self.amounts.payable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &Transition) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesOrderStatus::Completed)?;

        Ok(vec![SalesOrderEvent::OrderCompleted(OrderCompleted {
            tenant_id,
            order_id: self.id,
            order_number: self.order_number.clone(),
            payable_amount: self.amounts.payable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<SalesOrderEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesOrderStatus::Cancelled)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "cancel reason is required"));
        }

        Ok(vec![SalesOrderEvent::OrderCancelled(OrderCancelled {
            tenant_id,
            order_id: self.id,
            order_number: self.order_number.clone(),
            warehouse_id: self.warehouse_id,
            items: self.items.clone(),
            reason: cmd.reason.trim().to_string(),
            was_confirmed: self.status == SalesOrderStatus::Confirmed,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn test_tenant_id() -> TenantId {
        TenantId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_order(tenant_id: TenantId) -> SalesOrder {
        let order_id = SalesOrderId::new(AggregateId::new());
        let mut order = SalesOrder::empty(order_id);
        order
            .execute(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id,
                order_id,
                order_number: "SO-2024-00001".to_string(),
                customer_id: PartyId::new(),
                customer_name: "Test Customer".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order
    }

    fn add_item(tenant_id: TenantId, quantity: Decimal, unit_price: Decimal) -> SalesOrderCommand {
        SalesOrderCommand::AddItem(AddItem {
            tenant_id,
            product_id: ProductId::new(),
            product_name: "Product A".to_string(),
            product_code: "PROD-A".to_string(),
            conversion: UnitConversion::base("pcs"),
            quantity,
            unit_price,
            occurred_at: test_time(),
        })
    }

    fn transition(tenant_id: TenantId) -> Transition {
        Transition {
            tenant_id,
            occurred_at: test_time(),
        }
    }

    fn confirmed_order(tenant_id: TenantId) -> SalesOrder {
        let mut order = created_order(tenant_id);
        order.execute(&add_item(tenant_id, dec!(10), dec!(100))).unwrap();
        order
            .execute(&SalesOrderCommand::ConfirmOrder(transition(tenant_id)))
            .unwrap();
        order
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        use SalesOrderStatus::*;
        assert!(Draft.can_transition_to(Confirmed));
        assert!(Draft.can_transition_to(Cancelled));
        assert!(Confirmed.can_transition_to(Shipped));
        assert!(Confirmed.can_transition_to(Cancelled));
        assert!(Shipped.can_transition_to(Completed));
        assert!(!Shipped.can_transition_to(Cancelled));
        assert!(!Draft.can_transition_to(Shipped));
        assert!(Completed.is_terminal() && Cancelled.is_terminal());
    }

    #[test]
    fn create_sales_order_emits_created_event() {
        let tenant_id = test_tenant_id();
        let order = created_order(tenant_id);

        assert_eq!(order.version(), 1);
        assert_eq!(order.status(), SalesOrderStatus::Draft);
        match &order.pending_events()[0] {
            SalesOrderEvent::SalesOrderCreated(e) => {
                assert_eq!(e.tenant_id, tenant_id);
                assert_eq!(e.order_number, "SO-2024-00001");
            }
            _ => panic!("Expected SalesOrderCreated event"),
        }
    }

    #[test]
    fn create_rejects_overlong_order_number() {
        let order_id = SalesOrderId::new(AggregateId::new());
        let order = SalesOrder::empty(order_id);
        let err = order
            .handle(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id: test_tenant_id(),
                order_id,
                order_number: "X".repeat(51),
                customer_id: PartyId::new(),
                customer_name: "C".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_ORDER_NUMBER");
    }

    #[test]
    fn add_item_computes_amount_and_base_quantity() {
        let tenant_id = test_tenant_id();
        let mut order = created_order(tenant_id);
        order
            .execute(&SalesOrderCommand::AddItem(AddItem {
                tenant_id,
                product_id: ProductId::new(),
                product_name: "Boxed".to_string(),
                product_code: "BX".to_string(),
                conversion: UnitConversion::new("box", "pcs", dec!(12)).unwrap(),
                quantity: dec!(2.5),
                unit_price: dec!(19.99),
                occurred_at: test_time(),
            }))
            .unwrap();

        let item = &order.items()[0];
        assert_eq!(item.line_no, 1);
        assert_eq!(item.base_quantity, dec!(30));
        assert_eq!(item.amount, dec!(49.98));
        assert_eq!(order.total_amount(), dec!(49.98));
    }

    #[test]
    fn duplicate_product_is_rejected() {
        let tenant_id = test_tenant_id();
        let mut order = created_order(tenant_id);
        let cmd = add_item(tenant_id, dec!(1), dec!(5));
        order.execute(&cmd).unwrap();

        let err = order.execute(&cmd).unwrap_err();
        assert_eq!(err.code(), "DUPLICATE_PRODUCT");
        assert_eq!(order.items().len(), 1);
    }

    #[test]
    fn totals_follow_item_changes_and_clamp_discount() {
        let tenant_id = test_tenant_id();
        let mut order = created_order(tenant_id);
        order.execute(&add_item(tenant_id, dec!(2), dec!(50))).unwrap();
        order.execute(&add_item(tenant_id, dec!(1), dec!(30))).unwrap();
        order
            .execute(&SalesOrderCommand::ApplyDiscount(ApplyDiscount {
                tenant_id,
                discount: dec!(100),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(order.payable_amount(), dec!(30));

        order
            .execute(&SalesOrderCommand::RemoveItem(RemoveItem {
                tenant_id,
                line_no: 1,
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(order.total_amount(), dec!(30));
        assert_eq!(order.discount_amount(), dec!(30));
        assert_eq!(order.payable_amount(), Decimal::ZERO);

        order
            .execute(&SalesOrderCommand::UpdateItemQuantity(UpdateItemQuantity {
                tenant_id,
                line_no: 2,
                quantity: dec!(4),
                occurred_at: test_time(),
            }))
            .unwrap();
        assert_eq!(order.total_amount(), dec!(120));
        assert_eq!(order.payable_amount(), dec!(90));
    }

    #[test]
    fn discount_above_total_is_rejected() {
        let tenant_id = test_tenant_id();
        let mut order = created_order(tenant_id);
        order.execute(&add_item(tenant_id, dec!(1), dec!(10))).unwrap();
        let err = order
            .execute(&SalesOrderCommand::ApplyDiscount(ApplyDiscount {
                tenant_id,
                discount: dec!(11),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_DISCOUNT");
    }

    #[test]
    fn confirm_requires_items_and_positive_payable() {
        let tenant_id = test_tenant_id();
        let mut order = created_order(tenant_id);
        let err = order
            .execute(&SalesOrderCommand::ConfirmOrder(transition(tenant_id)))
            .unwrap_err();
        assert_eq!(err.code(), "NO_ITEMS");

        order.execute(&add_item(tenant_id, dec!(1), Decimal::ZERO)).unwrap();
        let err = order
            .execute(&SalesOrderCommand::ConfirmOrder(transition(tenant_id)))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_AMOUNT");
    }

    #[test]
    fn confirm_then_ship_then_complete() {
        let tenant_id = test_tenant_id();
        let mut order = created_order(tenant_id);
        order.execute(&add_item(tenant_id, dec!(10), dec!(100))).unwrap();
        order.mark_persisted();

        order
            .execute(&SalesOrderCommand::ConfirmOrder(transition(tenant_id)))
            .unwrap();
        assert_eq!(order.pending_events().len(), 1);
        match &order.pending_events()[0] {
            SalesOrderEvent::OrderConfirmed(e) => {
                assert_eq!(e.payable_amount, dec!(1000));
                assert_eq!(e.items.len(), 1);
            }
            _ => panic!("Expected OrderConfirmed event"),
        }

        let err = order
            .execute(&SalesOrderCommand::ShipOrder(transition(tenant_id)))
            .unwrap_err();
        assert_eq!(err.code(), "NO_WAREHOUSE");

        let warehouse_id = WarehouseId::new();
        order
            .execute(&SalesOrderCommand::SetWarehouse(SetWarehouse {
                tenant_id,
                warehouse_id,
                occurred_at: test_time(),
            }))
            .unwrap();
        order
            .execute(&SalesOrderCommand::ShipOrder(transition(tenant_id)))
            .unwrap();
        assert!(order.shipped_at().is_some());

        order
            .execute(&SalesOrderCommand::CompleteOrder(transition(tenant_id)))
            .unwrap();
        assert_eq!(order.status(), SalesOrderStatus::Completed);
        assert!(order.status().is_terminal());
    }

    #[test]
    fn cannot_modify_confirmed_order() {
        let tenant_id = test_tenant_id();
        let mut order = confirmed_order(tenant_id);

        let err = order.execute(&add_item(tenant_id, dec!(1), dec!(1))).unwrap_err();
        assert_eq!(err.code(), "INVALID_STATE");
        assert_eq!(order.items().len(), 1);
    }

    #[test]
    fn cancel_confirmed_order_flags_lock_release() {
        let tenant_id = test_tenant_id();
        let mut order = confirmed_order(tenant_id);

        order
            .execute(&SalesOrderCommand::CancelOrder(CancelOrder {
                tenant_id,
                reason: "customer request".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap();

        match order.pending_events().last() {
            Some(SalesOrderEvent::OrderCancelled(e)) => assert!(e.was_confirmed),
            _ => panic!("Expected OrderCancelled event"),
        }
        assert_eq!(order.cancel_reason(), Some("customer request"));
    }

    #[test]
    fn cancel_requires_reason_and_is_rejected_after_shipping() {
        let tenant_id = test_tenant_id();
        let mut order = confirmed_order(tenant_id);
        let err = order
            .execute(&SalesOrderCommand::CancelOrder(CancelOrder {
                tenant_id,
                reason: "  ".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(err.code(), "INVALID_REASON");

        order
            .execute(&SalesOrderCommand::SetWarehouse(SetWarehouse {
                tenant_id,
                warehouse_id: WarehouseId::new(),
                occurred_at: test_time(),
            }))
            .unwrap();
        order
            .execute(&SalesOrderCommand::ShipOrder(transition(tenant_id)))
            .unwrap();

        let err = order
            .execute(&SalesOrderCommand::CancelOrder(CancelOrder {
                tenant_id,
                reason: "too late".to_string(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn rejected_transition_leaves_order_unchanged() {
        let tenant_id = test_tenant_id();
        let mut order = created_order(tenant_id);
        order.execute(&add_item(tenant_id, dec!(3), dec!(7))).unwrap();
        let before = order.clone();

        assert!(order
            .execute(&SalesOrderCommand::CompleteOrder(transition(tenant_id)))
            .is_err());
        assert_eq!(order, before);
    }

    #[test]
    fn commands_from_another_tenant_are_rejected() {
        let mut order = created_order(test_tenant_id());
        let err = order
            .execute(&add_item(test_tenant_id(), dec!(1), dec!(1)))
            .unwrap_err();
        assert_eq!(err.code(), "TENANT_MISMATCH");
    }

    #[test]
    fn state_survives_serialization_without_pending_events() {
        let tenant_id = test_tenant_id();
        let order = confirmed_order(tenant_id);
        let json = serde_json::to_value(&order).unwrap();
        let restored: SalesOrder = serde_json::from_value(json).unwrap();

        assert_eq!(restored.status(), SalesOrderStatus::Confirmed);
        assert_eq!(restored.version(), order.version());
        assert!(restored.pending_events().is_empty());
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        fn command_for(kind: u8, tenant_id: TenantId) -> SalesOrderCommand {
            match kind % 4 {
                0 => SalesOrderCommand::ConfirmOrder(transition(tenant_id)),
                1 => SalesOrderCommand::ShipOrder(transition(tenant_id)),
                2 => SalesOrderCommand::CompleteOrder(transition(tenant_id)),
                _ => SalesOrderCommand::CancelOrder(CancelOrder {
                    tenant_id,
                    reason: "r".to_string(),
                    occurred_at: test_time(),
                }),
            }
        }

        proptest! {
            /// Property: any command sequence either applies or leaves the order untouched.
            #[test]
            fn rejected_commands_never_mutate(kinds in proptest::collection::vec(0u8..4, 1..12)) {
                let tenant_id = test_tenant_id();
                let mut order = created_order(tenant_id);
                order.execute(&add_item(tenant_id, dec!(1), dec!(10))).unwrap();

                for kind in kinds {
                    let before = order.clone();
                    let cmd = command_for(kind, tenant_id);
                    match order.execute(&cmd) {
                        Ok(n) => {
                            prop_assert_eq!(n, 1);
                            prop_assert_eq!(order.version(), before.version() + 1);
                            prop_assert!(before.status().can_transition_to(order.status()));
                        }
                        Err(_) => prop_assert_eq!(&order, &before),
                    }
                }
            }
        }
    }
}
