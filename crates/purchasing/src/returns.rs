//! Purchase returns: received goods sent back to the supplier.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tradeflow_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, LineAmounts, PartyId, PendingEvents,
    ProductId, TenantId, UnitConversion, WarehouseId, round_money, validate_document_number,
    validate_line, validate_party_name,
};
use tradeflow_events::Event;

use crate::order::{PurchaseOrder, PurchaseOrderId, PurchaseOrderItem, PurchaseOrderStatus};

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PurchaseReturnId(pub AggregateId);

impl PurchaseReturnId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PurchaseReturnId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PurchaseReturnStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Shipped,
    Completed,
    Cancelled,
}

impl PurchaseReturnStatus {
    pub fn can_transition_to(self, target: PurchaseReturnStatus) -> bool {
        use PurchaseReturnStatus::*;
        matches!(
            (self, target),
            (Draft, Pending)
                | (Draft, Cancelled)
                | (Pending, Approved)
                | (Pending, Rejected)
                | (Pending, Cancelled)
                | (Approved, Shipped)
                | (Approved, Cancelled)
                | (Shipped, Completed)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            PurchaseReturnStatus::Completed
                | PurchaseReturnStatus::Rejected
                | PurchaseReturnStatus::Cancelled
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReturnItem {
    pub line_no: u32,
    pub order_line_no: u32,
    pub product_id: ProductId,
    pub product_name: String,
    pub product_code: String,
    pub conversion: UnitConversion,
    pub received_quantity: Decimal,
    pub return_quantity: Decimal,
    pub base_quantity: Decimal,
    pub shipped_quantity: Decimal,
    pub unit_cost: Decimal,
    pub refund_amount: Decimal,
}

impl PurchaseReturnItem {
    fn with_quantity(mut self, quantity: Decimal) -> Self {
        self.return_quantity = quantity;
        self.base_quantity = self.conversion.to_base(quantity);
        self.refund_amount = round_money(quantity * self.unit_cost);
        self
    }
}

/// Aggregate root: PurchaseReturn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReturn {
    id: PurchaseReturnId,
    tenant_id: Option<TenantId>,
    return_number: String,
    order_id: Option<PurchaseOrderId>,
    order_number: String,
    supplier_id: Option<PartyId>,
    supplier_name: String,
    warehouse_id: Option<WarehouseId>,
    reason: String,
    items: Vec<PurchaseReturnItem>,
    amounts: LineAmounts,
    status: PurchaseReturnStatus,
    approval_note: Option<String>,
    reject_reason: Option<String>,
    cancel_reason: Option<String>,
    tracking_number: Option<String>,
    approved_at: Option<DateTime<Utc>>,
    shipped_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
    #[serde(skip)]
    pending: Vec<PurchaseReturnEvent>,
}

impl PurchaseReturn {
    pub const AGGREGATE_TYPE: &'static str = "purchase_return";

    pub fn empty(id: PurchaseReturnId) -> Self {
        Self {
            id,
            tenant_id: None,
            return_number: String::new(),
            order_id: None,
            order_number: String::new(),
            supplier_id: None,
            supplier_name: String::new(),
            warehouse_id: None,
            reason: String::new(),
            items: Vec::new(),
            amounts: LineAmounts::default(),
            status: PurchaseReturnStatus::Draft,
            approval_note: None,
            reject_reason: None,
            cancel_reason: None,
            tracking_number: None,
            approved_at: None,
            shipped_at: None,
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

    pub fn order_id(&self) -> Option<PurchaseOrderId> {
        self.order_id
    }

    pub fn warehouse_id(&self) -> Option<WarehouseId> {
        self.warehouse_id
    }

    pub fn status(&self) -> PurchaseReturnStatus {
        self.status
    }

    pub fn items(&self) -> &[PurchaseReturnItem] {
        &self.items
    }

    pub fn total_refund(&self) -> Decimal {
        self.amounts.payable
    }

    pub fn tracking_number(&self) -> Option<&str> {
        self.tracking_number.as_deref()
    }

    pub fn shipped_at(&self) -> Option<DateTime<Utc>> {
        self.shipped_at
    }

    fn recalculate(&mut self) {
        self.amounts =
            LineAmounts::compute(self.items.iter().map(|i| i.refund_amount), Decimal::ZERO);
    }
}

impl AggregateRoot for PurchaseReturn {
    type Id = PurchaseReturnId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePurchaseReturn {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub return_number: String,
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: PartyId,
    pub supplier_name: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

impl CreatePurchaseReturn {
    /// Build the create command from an order that has received goods.
    pub fn from_order(
        order: &PurchaseOrder,
        return_id: PurchaseReturnId,
        return_number: impl Into<String>,
        reason: impl Into<String>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if !matches!(
            order.status(),
            PurchaseOrderStatus::PartialReceived | PurchaseOrderStatus::Completed
        ) {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                "returns can only be created from received purchase orders",
            ));
        }
        let tenant_id = order.tenant_id().ok_or_else(DomainError::not_found)?;
        let supplier_id = order.supplier_id().ok_or_else(DomainError::not_found)?;

        Ok(Self {
            tenant_id,
            return_id,
            return_number: return_number.into(),
            order_id: order.id_typed(),
            order_number: order.order_number().to_string(),
            supplier_id,
            supplier_name: order.supplier_name().to_string(),
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
    pub received_quantity: Decimal,
    pub return_quantity: Decimal,
    pub unit_cost: Decimal,
    pub occurred_at: DateTime<Utc>,
}

impl AddReturnItem {
    pub fn from_order_item(
        tenant_id: TenantId,
        item: &PurchaseOrderItem,
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
            received_quantity: item.received_quantity,
            return_quantity,
            unit_cost: item.unit_cost,
            occurred_at,
        }
    }
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

/// Command payload for Submit / Complete.
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipReturn {
    pub tenant_id: TenantId,
    pub tracking_number: Option<String>,
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
pub enum PurchaseReturnCommand {
    Create(CreatePurchaseReturn),
    AddItem(AddReturnItem),
    RemoveItem(RemoveReturnItem),
    SetWarehouse(SetReturnWarehouse),
    Submit(ReturnTransition),
    Approve(ApproveReturn),
    Reject(ReturnWithReason),
    Ship(ShipReturn),
    Complete(ReturnTransition),
    Cancel(ReturnWithReason),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurchaseReturnCreated {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub return_number: String,
    pub order_id: PurchaseOrderId,
    pub order_number: String,
    pub supplier_id: PartyId,
    pub supplier_name: String,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItemAdded {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub item: PurchaseReturnItem,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnItemRemoved {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub line_no: u32,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnWarehouseSet {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub warehouse_id: WarehouseId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnSubmitted {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub total_refund: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnApproved {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub note: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnRejected {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub reason: String,
    pub occurred_at: DateTime<Utc>,
}

/// Goods left the warehouse; consumers deduct stock from `items`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnShipped {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub return_number: String,
    pub order_id: PurchaseOrderId,
    pub warehouse_id: WarehouseId,
    pub items: Vec<PurchaseReturnItem>,
    pub tracking_number: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCompleted {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub total_refund: Decimal,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnCancelled {
    pub tenant_id: TenantId,
    pub return_id: PurchaseReturnId,
    pub reason: String,
    pub was_approved: bool,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PurchaseReturnEvent {
    Created(PurchaseReturnCreated),
    ItemAdded(ReturnItemAdded),
    ItemRemoved(ReturnItemRemoved),
    WarehouseSet(ReturnWarehouseSet),
    Submitted(ReturnSubmitted),
    Approved(ReturnApproved),
    Rejected(ReturnRejected),
    Shipped(ReturnShipped),
    Completed(ReturnCompleted),
    Cancelled(ReturnCancelled),
}

impl PurchaseReturnEvent {
    pub const CREATED: &'static str = "purchasing.return.created";
    pub const ITEM_ADDED: &'static str = "purchasing.return.item_added";
    pub const ITEM_REMOVED: &'static str = "purchasing.return.item_removed";
    pub const WAREHOUSE_SET: &'static str = "purchasing.return.warehouse_set";
    pub const SUBMITTED: &'static str = "purchasing.return.submitted";
    pub const APPROVED: &'static str = "purchasing.return.approved";
    pub const REJECTED: &'static str = "purchasing.return.rejected";
    pub const SHIPPED: &'static str = "purchasing.return.shipped";
    pub const COMPLETED: &'static str = "purchasing.return.completed";
    pub const CANCELLED: &'static str = "purchasing.return.cancelled";

    pub const EVENT_TYPES: &'static [&'static str] = &[
        Self::CREATED,
        Self::ITEM_ADDED,
        Self::ITEM_REMOVED,
        Self::WAREHOUSE_SET,
        Self::SUBMITTED,
        Self::APPROVED,
        Self::REJECTED,
        Self::SHIPPED,
        Self::COMPLETED,
        Self::CANCELLED,
    ];
}

impl Event for PurchaseReturnEvent {
    fn event_type(&self) -> &'static str {
        match self {
            PurchaseReturnEvent::Created(_) => Self::CREATED,
            PurchaseReturnEvent::ItemAdded(_) => Self::ITEM_ADDED,
            PurchaseReturnEvent::ItemRemoved(_) => Self::ITEM_REMOVED,
            PurchaseReturnEvent::WarehouseSet(_) => Self::WAREHOUSE_SET,
            PurchaseReturnEvent::Submitted(_) => Self::SUBMITTED,
            PurchaseReturnEvent::Approved(_) => Self::APPROVED,
            PurchaseReturnEvent::Rejected(_) => Self::REJECTED,
            PurchaseReturnEvent::Shipped(_) => Self::SHIPPED,
            PurchaseReturnEvent::Completed(_) => Self::COMPLETED,
            PurchaseReturnEvent::Cancelled(_) => Self::CANCELLED,
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            PurchaseReturnEvent::Created(e) => e.occurred_at,
            PurchaseReturnEvent::ItemAdded(e) => e.occurred_at,
            PurchaseReturnEvent::ItemRemoved(e) => e.occurred_at,
            PurchaseReturnEvent::WarehouseSet(e) => e.occurred_at,
            PurchaseReturnEvent::Submitted(e) => e.occurred_at,
            PurchaseReturnEvent::Approved(e) => e.occurred_at,
            PurchaseReturnEvent::Rejected(e) => e.occurred_at,
            PurchaseReturnEvent::Shipped(e) => e.occurred_at,
            PurchaseReturnEvent::Completed(e) => e.occurred_at,
            PurchaseReturnEvent::Cancelled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PurchaseReturn {
    type Command = PurchaseReturnCommand;
    type Event = PurchaseReturnEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            PurchaseReturnEvent::Created(e) => {
                self.id = e.return_id;
                self.tenant_id = Some(e.tenant_id);
                self.return_number = e.return_number.clone();
                self.order_id = Some(e.order_id);
                self.order_number = e.order_number.clone();
                self.supplier_id = Some(e.supplier_id);
                self.supplier_name = e.supplier_name.clone();
                self.reason = e.reason.clone();
                self.status = PurchaseReturnStatus::Draft;
                self.created = true;
            }
            PurchaseReturnEvent::ItemAdded(e) => {
                self.items.push(e.item.clone());
                self.recalculate();
            }
            PurchaseReturnEvent::ItemRemoved(e) => {
                self.items.retain(|i| i.line_no != e.line_no);
                self.recalculate();
            }
            PurchaseReturnEvent::WarehouseSet(e) => self.warehouse_id = Some(e.warehouse_id),
            PurchaseReturnEvent::Submitted(_) => self.status = PurchaseReturnStatus::Pending,
            PurchaseReturnEvent::Approved(e) => {
                self.status = PurchaseReturnStatus::Approved;
                self.approval_note = e.note.clone();
                self.approved_at = Some(e.occurred_at);
            }
            PurchaseReturnEvent::Rejected(e) => {
                self.status = PurchaseReturnStatus::Rejected;
                self.reject_reason = Some(e.reason.clone());
            }
            PurchaseReturnEvent::Shipped(e) => {
                self.status = PurchaseReturnStatus::Shipped;
                for item in &mut self.items {
                    item.shipped_quantity = item.return_quantity;
                }
                self.tracking_number = e.tracking_number.clone();
                self.shipped_at = Some(e.occurred_at);
            }
            PurchaseReturnEvent::Completed(e) => {
                self.status = PurchaseReturnStatus::Completed;
                self.completed_at = Some(e.occurred_at);
            }
            PurchaseReturnEvent::Cancelled(e) => {
                self.status = PurchaseReturnStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
                self.cancelled_at = Some(e.occurred_at);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            PurchaseReturnCommand::Create(cmd) => self.handle_create(cmd),
            PurchaseReturnCommand::AddItem(cmd) => self.handle_add_item(cmd),
            PurchaseReturnCommand::RemoveItem(cmd) => self.handle_remove_item(cmd),
            PurchaseReturnCommand::SetWarehouse(cmd) => self.handle_set_warehouse(cmd),
            PurchaseReturnCommand::Submit(cmd) => self.handle_submit(cmd),
            PurchaseReturnCommand::Approve(cmd) => self.handle_approve(cmd),
            PurchaseReturnCommand::Reject(cmd) => self.handle_reject(cmd),
            PurchaseReturnCommand::Ship(cmd) => self.handle_ship(cmd),
            PurchaseReturnCommand::Complete(cmd) => self.handle_complete(cmd),
            PurchaseReturnCommand::Cancel(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl PendingEvents for PurchaseReturn {
    fn pending_events(&self) -> &[PurchaseReturnEvent] {
        &self.pending
    }

    fn push_pending(&mut self, event: PurchaseReturnEvent) {
        self.pending.push(event);
    }

    fn mark_persisted(&mut self) {
        self.pending.clear();
    }
}

impl PurchaseReturn {
    fn ensure_created(&self, tenant_id: TenantId) -> Result<TenantId, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        if self.tenant_id != Some(tenant_id) {
            return Err(DomainError::invariant("TENANT_MISMATCH", "tenant mismatch"));
        }
        Ok(tenant_id)
    }

    fn ensure_transition(&self, target: PurchaseReturnStatus) -> Result<(), DomainError> {
        if !self.status.can_transition_to(target) {
            return Err(DomainError::transition(self.status, target));
        }
        Ok(())
    }

    fn ensure_draft(&self) -> Result<(), DomainError> {
        if self.status != PurchaseReturnStatus::Draft {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                format!("cannot modify items of a {:?} return", self.status),
            ));
        }
        Ok(())
    }

    fn handle_create(
        &self,
        cmd: &CreatePurchaseReturn,
    ) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("purchase return already exists"));
        }
        validate_document_number(&cmd.return_number, "INVALID_RETURN_NUMBER")?;
        validate_party_name(&cmd.supplier_name, "INVALID_SUPPLIER")?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "return reason is required"));
        }

        Ok(vec![PurchaseReturnEvent::Created(PurchaseReturnCreated {
            tenant_id: cmd.tenant_id,
            return_id: cmd.return_id,
            return_number: cmd.return_number.trim().to_string(),
            order_id: cmd.order_id,
            order_number: cmd.order_number.clone(),
            supplier_id: cmd.supplier_id,
            supplier_name: cmd.supplier_name.trim().to_string(),
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_item(&self, cmd: &AddReturnItem) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        validate_line(&cmd.product_name, cmd.return_quantity, cmd.unit_cost)?;
        if cmd.return_quantity > cmd.received_quantity {
            return Err(DomainError::quantity_exceeded(format!(
                "return quantity {} exceeds received quantity {}",
                cmd.return_quantity, cmd.received_quantity
            )));
        }
        if self.items.iter().any(|i| i.product_id == cmd.product_id) {
            return Err(DomainError::validation(
                "DUPLICATE_PRODUCT",
                "product already exists in return",
            ));
        }

        let line_no = self.items.iter().map(|i| i.line_no).max().unwrap_or(0) + 1;
        let item = PurchaseReturnItem {
            line_no,
            order_line_no: cmd.order_line_no,
            product_id: cmd.product_id,
            product_name: cmd.product_name.clone(),
            product_code: cmd.product_code.clone(),
            conversion: cmd.conversion.clone(),
            received_quantity: cmd.received_quantity,
            return_quantity: Decimal::ZERO,
            base_quantity: Decimal::ZERO,
            shipped_quantity: Decimal::ZERO,
            unit_cost: cmd.unit_cost,
            refund_amount: Decimal::ZERO,
        }
        .with_quantity(cmd.return_quantity);

        Ok(vec![PurchaseReturnEvent::ItemAdded(ReturnItemAdded {
            tenant_id,
            return_id: self.id,
            item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_item(
        &self,
        cmd: &RemoveReturnItem,
    ) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_draft()?;
        if !self.items.iter().any(|i| i.line_no == cmd.line_no) {
            return Err(DomainError::validation("ITEM_NOT_FOUND", "return line not found"));
        }

        Ok(vec![PurchaseReturnEvent::ItemRemoved(ReturnItemRemoved {
            tenant_id,
            return_id: self.id,
            line_no: cmd.line_no,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_warehouse(
        &self,
        cmd: &SetReturnWarehouse,
    ) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        if !matches!(
            self.status,
            PurchaseReturnStatus::Draft | PurchaseReturnStatus::Pending | PurchaseReturnStatus::Approved
        ) {
            return Err(DomainError::invariant(
                "INVALID_STATE",
                format!("cannot set warehouse for a {:?} return", self.status),
            ));
        }

        Ok(vec![PurchaseReturnEvent::WarehouseSet(ReturnWarehouseSet {
            tenant_id,
            return_id: self.id,
            warehouse_id: cmd.warehouse_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_submit(&self, cmd: &ReturnTransition) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(PurchaseReturnStatus::Pending)?;
        if self.items.is_empty() {
            return Err(DomainError::validation("NO_ITEMS", "cannot submit return without items"));
        }
        if self.amounts.payable <= Decimal::ZERO {
            return Err(DomainError::validation("INVALID_AMOUNT", "refund amount must be positive"));
        }

        Ok(vec![PurchaseReturnEvent::Submitted(ReturnSubmitted {
            tenant_id,
            return_id: self.id,
            total_refund: self.amounts.payable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_approve(&self, cmd: &ApproveReturn) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(PurchaseReturnStatus::Approved)?;

        Ok(vec![PurchaseReturnEvent::Approved(ReturnApproved {
            tenant_id,
            return_id: self.id,
            note: cmd.note.clone().filter(|n| !n.trim().is_empty()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reject(&self, cmd: &ReturnWithReason) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(PurchaseReturnStatus::Rejected)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "reject reason is required"));
        }

        Ok(vec![PurchaseReturnEvent::Rejected(ReturnRejected {
            tenant_id,
            return_id: self.id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_ship(&self, cmd: &ShipReturn) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(PurchaseReturnStatus::Shipped)?;
        let warehouse_id = self.warehouse_id.ok_or_else(|| {
            DomainError::validation("NO_WAREHOUSE", "warehouse must be set before shipping")
        })?;
        let order_id = self.order_id.ok_or_else(DomainError::not_found)?;

        let items = self
            .items
            .iter()
            .cloned()
            .map(|mut item| {
                item.shipped_quantity = item.return_quantity;
                item
            })
            .collect();

        Ok(vec![PurchaseReturnEvent::Shipped(ReturnShipped {
            tenant_id,
            return_id: self.id,
            return_number: self.return_number.clone(),
            order_id,
            warehouse_id,
            items,
            tracking_number: cmd.tracking_number.clone().filter(|t| !t.trim().is_empty()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(
        &self,
        cmd: &ReturnTransition,
    ) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(PurchaseReturnStatus::Completed)?;

        Ok(vec![PurchaseReturnEvent::Completed(ReturnCompleted {
            tenant_id,
            return_id: self.id,
            total_refund: self.amounts.payable,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &ReturnWithReason) -> Result<Vec<PurchaseReturnEvent>, DomainError> {
        let tenant_id = self.ensure_created(cmd.tenant_id)?;
        self.ensure_transition(PurchaseReturnStatus::Cancelled)?;
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("INVALID_REASON", "cancel reason is required"));
        }

        Ok(vec![PurchaseReturnEvent::Cancelled(ReturnCancelled {
            tenant_id,
            return_id: self.id,
            reason: cmd.reason.trim().to_string(),
            was_approved: self.status == PurchaseReturnStatus::Approved,
            occurred_at: cmd.occurred_at,
        })])
    }
}
