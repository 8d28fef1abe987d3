//! Sales returns: goods coming back from a customer against a shipped order.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradeflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LineAmounts, PartyId, PendingEvents,
    ProductId, TenantId, UnitConversion, WarehouseId, round_money, validate_document_number,
    validate_line, validate_party_name,
};
use tradeflow_events::Event;

use crate::order::{SalesOrder, SalesOrderId, SalesOrderItem, SalesOrderStatus};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SalesReturnId(pub AggregateId);

impl SalesReturnId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for SalesReturnId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SalesReturnStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Receiving,
    Completed,
    Cancelled,
}

impl SalesReturnStatus {
    pub fn can_transition_to(self, target: SalesReturnStatus) -> bool {
        use SalesReturnStatus::*;
        matches!(
            (self, target),
            (Draft, Pending)
                | (Draft, Cancelled)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Receiving)
                | (Approved, Cancelled)
                | (Receiving, Completed)
                | (Receiving, Cancelled)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SalesReturnStatus::Completed | SalesReturnStatus::Rejected | SalesReturnStatus::Cancelled
        )
    }
}

/// Returned line, tied to the original order line it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReturnItem {
    pub line_no: u32,
    pub order_line_no: u32,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_code: String,
    pub conversion: UnitConversion,
    pub original_quantity: Decimal,
    pub return_quantity: Decimal,
    pub base_quantity: Decimal,
    pub received_quantity: Decimal,
    pub unit_price: Decimal,
    pub refund_amount: Decimal,
}

impl SalesReturnItem {
    fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.return_quantity = quantity;
        self.base_quantity = self.conversion.to_base(quantity);
        self.refund_amount = round_money(quantity * self.unit_price);
        self
    }
}

/// Aggregate root: SalesReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReturn {
    id: SalesReturnId,
    tenant_id: Option<TenantId>,
    return_number: String,
    order_id: Option<SalesOrderId>,
    order_number: String,
    customer_id: Option<PartyId>,
    customer_name: String,
    warehouse_id: Option<WarehouseId>,
    reason: String,
    items: Vec<SalesReturnItem>,
    amounts: LineAmounts,
    status: SalesReturnStatus,
    approval_note: Option<String>,
    reject_reason: Option<String>,
    cancel_reason: Option<String>,
    submitted_at: Option<DateTime<Utc>>,
    approved_at: Option<DateTime<Utc>>,
    received_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    #[serde(skip)]
    pending: Vec<SalesReturnEvent>,
}

impl SalesReturn {
    pub const AGGREGATE_TYPE: &'static str = "sales_return";

    pub fn empty(id: SalesReturnId) -> Self {
        Self {
            id,
            tenant_id: None,
            return_number: String::new(),
            order_id: None,
            order_number: String::new(),
            customer_id: None,
            customer_name: String::new(),
            warehouse_id: None,
            reason: String::new(),
            items: Vec::new(),
            amounts: LineAmounts::default(),
            status: SalesReturnStatus::Draft,
            approval_note: None,
            reject_reason: None,
            cancel_reason: None,
            submitted_at: None,
            approved_at: None,
            received_at: None,
            completed_at: None,
            cancelled_at: None,
            version: 0,
            created: false,
            pending: Vec::new(),
        }
    }

    pub fn tenant_id(&self) -> Option<TenantId> {
        self.tenant_id
    }

    pub fn return_number(&self) -> &str {
        &self.return_number
    }

    pub fn order_id(&self) -> Option<SalesOrderId> {
        self.order_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn status(&self) -> SalesReturnStatus {
        self.status
    }

    pub fn items(&self) -> &[SalesReturnItem] {
        &self.items
    }

    pub fn total_refund(&self) -> Decimal {
        self.amounts.payable
    }

    pub fn approval_note(&self) -> Option<&str> {
        self.approval_note.as_deref()
    }

    pub fn reject_reason(&self) -> Option<&str> {
        self.reject_reason.as_deref()
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    fn recalculate(&mut self) {
        self.amounts =
            LineAmounts::compute(self.items.iter().map(|i| i.refund_amount), Decimal::ZERO);
    }
}

impl AggregateRoot for SalesReturn {
    type Id = SalesReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSalesReturn {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub return_number: String,
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub customer_id: PartyId,
    pub customer_name: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl CreateSalesReturn {
    /// Build the create command from a shipped or completed order.
    pub fn from_order(
        order: &SalesOrder,
        return_id: SalesReturnId,
        return_number: impl Into<String>,
        reason: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !matches!(
            order.status(),
            SalesOrderStatus::Shipped | SalesOrderStatus::Completed
        ) {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                "returns can only be created from shipped or completed orders",
            ));
        }
        let tenant_id = order.tenant_id().ok_or_else(DomainError::not_found)?;
        let customer_id = order.customer_id().ok_or_else(DomainError::not_found)?;

        Ok(Self {
            tenant_id,
            return_id,
            return_number: return_number.into(),
            order_id: order.id_typed(),
            order_number: order.order_number().to_string(),
            customer_id,
            customer_name: order.customer_name().to_string(),
            reason: reason.into(),
            occurred_at,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddReturnItem {
    pub tenant_id: TenantId,
    pub order_line_no: u32,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_code: String,
    pub conversion: UnitConversion,
    pub original_quantity: Decimal,
    pub return_quantity: Decimal,
    pub unit_price: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl AddReturnItem {
    pub fn from_order_item(
        tenant_id: TenantId,
        item: &SalesOrderItem,
        return_quantity: Decimal,
        occurred_at: DateTime<Utc>,
    ) -> Self {
        Self {
            tenant_id,
            order_line_no: item.line_no,
            product_id: item.product_id,
            product_name: item.product_name.clone(),
            product_code: item.product_code.clone(),
            conversion: item.conversion.clone(),
            original_quantity: item.quantity,
            return_quantity,
            unit_price: item.unit_price,
            occurred_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateReturnQuantity {
    pub tenant_id: TenantId,
    pub line_no: u32,
    pub return_quantity: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveReturnItem {
    pub tenant_id: TenantId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetReturnWarehouse {
    pub tenant_id: TenantId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

/// Command payload for Submit / Receive / Complete.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnTransition {
    pub tenant_id: TenantId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApproveReturn {
    pub tenant_id: TenantId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

/// Command payload for Reject / Cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnWithReason {
    pub tenant_id: TenantId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesReturnCommand {
    Create(CreateSalesReturn),
    AddItem(AddReturnItem),
    UpdateItemQuantity(UpdateReturnQuantity),
    RemoveItem(RemoveReturnItem),
    SetWarehouse(SetReturnWarehouse),
    Submit(ReturnTransition),
    Approve(ApproveReturn),
    Reject(ReturnWithReason),
    Receive(ReturnTransition),
    Complete(ReturnTransition),
    Cancel(ReturnWithReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalesReturnCreated {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub return_number: String,
    pub order_id: SalesOrderId,
    pub order_number: String,
    pub customer_id: PartyId,
    pub customer_name: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItemAdded {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub item: SalesReturnItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItemChanged {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub item: SalesReturnItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItemRemoved {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnWarehouseSet {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnSubmitted {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub total_refund: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnApproved {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRejected {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnReceived {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

/// Goods are back on the shelf; consumers restore stock from `items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCompleted {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub return_number: String,
    pub order_id: SalesOrderId,
    pub warehouse_id: WarehouseId,
    pub items: Vec<SalesReturnItem>,
    pub total_refund: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCancelled {
    pub tenant_id: TenantId,
    pub return_id: SalesReturnId,
    pub reason: String,
    pub was_approved: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SalesReturnEvent {
    Created(SalesReturnCreated),
    ItemAdded(ReturnItemAdded),
    ItemChanged(ReturnItemChanged),
    ItemRemoved(ReturnItemRemoved),
    WarehouseSet(ReturnWarehouseSet),
    Submitted(ReturnSubmitted),
    Approved(ReturnApproved),
    Rejected(ReturnRejected),
    Received(ReturnReceived),
    Completed(ReturnCompleted),
    Cancelled(ReturnCancelled),
}

impl SalesReturnEvent {
    pub const CREATED: &'static str = "sales.return.created";
    pub const ITEM_ADDED: &'static str = "sales.return.item_added";
    pub const ITEM_CHANGED: &'static str = "sales.return.item_changed";
    pub const ITEM_REMOVED: &'static str = "sales.return.item_removed";
    pub const WAREHOUSE_SET: &'static str = "sales.return.warehouse_set";
    pub const SUBMITTED: &'static str = "sales.return.submitted";
    pub const APPROVED: &'static str = "sales.return.approved";
    pub const REJECTED: &'static str = "sales.return.rejected";
    pub const RECEIVED: &'static str = "sales.return.received";
    pub const COMPLETED: &'static str = "sales.return.completed";
    pub const CANCELLED: &'static str = "sales.return.cancelled";

    pub const EVENT_TYPES: &'static [&'static str] = &[
        Self::CREATED,
        Self::ITEM_ADDED,
        Self::ITEM_CHANGED,
        Self::ITEM_REMOVED,
        Self::WAREHOUSE_SET,
        Self::SUBMITTED,
        Self::APPROVED,
        Self::REJECTED,
        Self::RECEIVED,
        Self::COMPLETED,
        Self::CANCELLED,
    ];
}

impl Event for SalesReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            SalesReturnEvent::Created(_) => Self::CREATED,
            SalesReturnEvent::ItemAdded(_) => Self::ITEM_ADDED,
            SalesReturnEvent::ItemChanged(_) => Self::ITEM_CHANGED,
            SalesReturnEvent::ItemRemoved(_) => Self::ITEM_REMOVED,
            SalesReturnEvent::WarehouseSet(_) => Self::WAREHOUSE_SET,
            SalesReturnEvent::Submitted(_) => Self::SUBMITTED,
            SalesReturnEvent::Approved(_) => Self::APPROVED,
            SalesReturnEvent::Rejected(_) => Self::REJECTED,
            SalesReturnEvent::Received(_) => Self::RECEIVED,
            SalesReturnEvent::Completed(_) => Self::COMPLETED,
            SalesReturnEvent::Cancelled(_) => Self::CANCELLED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SalesReturnEvent::Created(e) => e.occurred_at,
            SalesReturnEvent::ItemAdded(e) => e.occurred_at,
            SalesReturnEvent::ItemChanged(e) => e.occurred_at,
            SalesReturnEvent::ItemRemoved(e) => e.occurred_at,
            SalesReturnEvent::WarehouseSet(e) => e.occurred_at,
            SalesReturnEvent::Submitted(e) => e.occurred_at,
            SalesReturnEvent::Approved(e) => e.occurred_at,
            SalesReturnEvent::Rejected(e) => e.occurred_at,
            SalesReturnEvent::Received(e) => e.occurred_at,
            SalesReturnEvent::Completed(e) => e.occurred_at,
            SalesReturnEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for SalesReturn {
    type Command = SalesReturnCommand;
    type Event = SalesReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            SalesReturnEvent::Created(e) => {
                self.id = e.return_id;
                self.tenant_id = Some(e.tenant_id);
                self.return_number = e.return_number.clone();
                self.order_id = Some(e.order_id);
                self.order_number = e.order_number.clone();
                self.customer_id = Some(e.customer_id);
                self.customer_name = e.customer_name.clone();
                self.reason = e.reason.clone();
                self.status = SalesReturnStatus::Draft;
                self.created = true;
            }
            SalesReturnEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
                self.recalculate();
            }
            SalesReturnEvent::ItemChanged(e) => {
                if let Some(item) = self.items.iter_mut().find(|i| i.line_no == e.item.line_no) {
                    *item = e.item.clone();
                }
                self.recalculate();
            }
            SalesReturnEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.line_no != e.line_no);
                self.recalculate();
            }
            SalesReturnEvent::WarehouseSet(e) => self.warehouse_id = Some(e.warehouse_id),
            SalesReturnEvent::Submitted(e) => {
                self.status = SalesReturnStatus::Pending;
                self.submitted_at = Some(e.occurred_at);
            }
            SalesReturnEvent::Approved(e) => {
                self.status = SalesReturnStatus::Approved;
                self.approval_note = e.note.clone();
                self.approved_at = Some(e.occurred_at);
            }
            SalesReturnEvent::Rejected(e) => {
                self.status = SalesReturnStatus::Rejected;
                self.reject_reason = Some(e.reason.clone());
            }
            SalesReturnEvent::Received(e) => {
                self.status = SalesReturnStatus::Receiving;
                for item in &mut self.items {
                    item.received_quantity = item.return_quantity;
                }
                self.received_at = Some(e.occurred_at);
            }
            SalesReturnEvent::Completed(e) => {
                self.status = SalesReturnStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
            SalesReturnEvent::Cancelled(e) => {
                self.status = SalesReturnStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
                self.cancelled_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            SalesReturnCommand::Create(cmd) => self.handle_create(cmd),
            SalesReturnCommand::AddItem(cmd) => self.handle_add_item(cmd),
            SalesReturnCommand::UpdateItemQuantity(cmd) => self.handle_update_quantity(cmd),
            SalesReturnCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            SalesReturnCommand::SetWarehouse(cmd) => self.handle_set_warehouse(cmd),
            SalesReturnCommand::Submit(cmd) => self.handle_submit(cmd),
            SalesReturnCommand::Approve(cmd) => self.handle_approve(cmd),
            SalesReturnCommand::Reject(cmd) => self.handle_reject(cmd),
            SalesReturnCommand::Receive(cmd) => self.handle_receive(cmd),
            SalesReturnCommand::Complete(cmd) => self.handle_complete(cmd),
            SalesReturnCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PendingEvents for SalesReturn {
    fn pending_events(&self) -> &[SalesReturnEvent] {
        &self.pending
    }

    fn push_pending(&mut self, event: SalesReturnEvent) {
        self.pending.push(event);
    }

    fn mark_persisted(&mut self) {
        self.pending.clear();
    }
}

impl SalesReturn {
    fn ensure_created(&self, tenant_id: TenantId) -> Result<TenantId, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("TENANT_MISMATCH", "tenant mismatch"));
        }
        Ok(tenant_id)
    }

    fn ensure_transition(&self, target: SalesReturnStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::transition(self.status, target));
        }
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        if self.status != SalesReturnStatus::Draft {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                format!("cannot modify items of a {:?} return", self.status),
            ));
        }
        Ok(())
    }

    fn require_warehouse(&self) -> Result<WarehouseId, DomainError> {
        self.warehouse_id
            .ok_or_else(|| DomainError::validation("NO_WAREHOUSE", "warehouse must be set"))
    }

    fn check_return_quantity(original: Decimal, quantity: Decimal) -> Result<(), DomainError> {
        if quantity > original {
            return Err(DomainError::quantity_exceeded(format!(
                "return quantity {quantity} exceeds original quantity {original}"
            )));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateSalesReturn) -> Result<Vec<SalesReturnEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("sales return already exists"));
        }
        validate_document_number(&cmd.return_number, "INVALID_RETURN_NUMBER")?;
        validate_party_name(&cmd.customer_name, "INVALID_CUSTOMER")?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "return reason is required"));
        }

        Ok(vec![SalesReturnEvent::Created(SalesReturnCreated {
            tenant_id: cmd.tenant_id,
            return_id: cmd.return_id,
            return_number: cmd.return_number.trim().to_string(),
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            customer_id: cmd.customer_id,
            customer_name: cmd.customer_name.trim().to_string(),
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddReturnItem) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        validate_line(&cmd.product_name, cmd.return_quantity, cmd.unit_price)?;
        Self::check_return_quantity(cmd.original_quantity, cmd.return_quantity)?;
        if self.items.iter().any(|i| i.product_id == cmd.product_id) {
            return Err(DomainError::validation(
                "DUPLICATE_PRODUCT",
                "product already exists in return",
            ));
        }

        let line_no = self.items.iter().map(|i| i.line_no).max().unwrap_or(0) + 1;
        let item = SalesReturnItem {
            line_no,
            order_line_no: cmd.order_line_no,
            product_id: cmd.product_id,
            product_name: cmd.product_name.clone(),
            product_code: cmd.product_code.clone(),
            conversion: cmd.conversion.clone(),
            original_quantity: cmd.original_quantity,
            return_quantity: Decimal::ZERO,
            base_quantity: Decimal::ZERO,
            received_quantity: Decimal::ZERO,
            unit_price: cmd.unit_price,
            refund_amount: Decimal::ZERO,
        }
        .with_quantity(cmd.return_quantity);

        Ok(vec![SalesReturnEvent::ItemAdded(ReturnItemAdded {
            tenant_id,
            return_id: self.id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_quantity(
        &self,
        cmd: &UpdateReturnQuantity,
    ) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        if cmd.return_quantity <= Decimal::ZERO {
            return Err(DomainError::validation("INVALID_QUANTITY", "quantity must be positive"));
        }
        let item = self
            .items
            .iter()
            .find(|i| i.line_no == cmd.line_no)
            .ok_or_else(|| DomainError::validation("ITEM_NOT_FOUND", "return line not found"))?;
        Self::check_return_quantity(item.original_quantity, cmd.return_quantity)?;

        Ok(vec![SalesReturnEvent::ItemChanged(ReturnItemChanged {
            tenant_id,
            return_id: self.id,
            item: item.clone().with_quantity(cmd.return_quantity),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(&self, cmd: &RemoveReturnItem) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        if !self.items.iter().any(|i| i.line_no == cmd.line_no) {
            return Err(DomainError::validation("ITEM_NOT_FOUND", "return line not found"));
        }

        Ok(vec![SalesReturnEvent::ItemRemoved(ReturnItemRemoved {
            tenant_id,
            return_id: self.id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_warehouse(
        &self,
        cmd: &SetReturnWarehouse,
    ) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if !matches!(
            self.status,
            SalesReturnStatus::Draft | SalesReturnStatus::Pending | SalesReturnStatus::Approved
        ) {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                format!("cannot set warehouse for a {:?} return", self.status),
            ));
        }

        Ok(vec![SalesReturnEvent::WarehouseSet(ReturnWarehouseSet {
            tenant_id,
            return_id: self.id,
            warehouse_id: cmd.warehouse_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &ReturnTransition) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesReturnStatus::Pending)?;
        if self.items.is_empty() {
            return Err(DomainError::validation("NO_ITEMS", "cannot submit return without items"));
        }
        if self.amounts.payable <= Decimal::ZERO {
            return Err(DomainError::validation("INVALID_AMOUNT", "refund amount must be positive"));
        }

        Ok(vec![SalesReturnEvent::Submitted(ReturnSubmitted {
            tenant_id,
            return_id: self.id,
            total_refund: self.amounts.payable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveReturn) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesReturnStatus::Approved)?;

        Ok(vec![SalesReturnEvent::Approved(ReturnApproved {
            tenant_id,
            return_id: self.id,
            note: cmd.note.clone().filter(|n| !n.trim().is_empty()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &ReturnWithReason) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesReturnStatus::Rejected)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "reject reason is required"));
        }

        Ok(vec![SalesReturnEvent::Rejected(ReturnRejected {
            tenant_id,
            return_id: self.id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_receive(&self, cmd: &ReturnTransition) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesReturnStatus::Receiving)?;
        let warehouse_id = self.require_warehouse()?;

        Ok(vec![SalesReturnEvent::Received(ReturnReceived {
            tenant_id,
            return_id: self.id,
            warehouse_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &ReturnTransition) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesReturnStatus::Completed)?;
        let warehouse_id = self.require_warehouse()?;
        let order_id = self.order_id.ok_or_else(DomainError::not_found)?;

        Ok(vec![SalesReturnEvent::Completed(ReturnCompleted {
            tenant_id,
            return_id: self.id,
            return_number: self.return_number.clone(),
            order_id,
            warehouse_id,
            items: self.items.clone(),
            total_refund: self.amounts.payable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &ReturnWithReason) -> Result<Vec<SalesReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(SalesReturnStatus::Cancelled)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "cancel reason is required"));
        }

        Ok(vec![SalesReturnEvent::Cancelled(ReturnCancelled {
            tenant_id,
            return_id: self.id,
            reason: cmd.reason.trim().to_string(),
            was_approved: matches!(
                self.status,
                SalesReturnStatus::Approved | SalesReturnStatus::Receiving
            ),
            occurred_at: cmd.occurred_at,
        })])
    }
}
