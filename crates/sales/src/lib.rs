//! Sales domain module (event-sourced).
//!
//! This crate contains business rules for sales orders and sales returns,
//! implemented purely as deterministic domain logic (no IO, no storage).
//! Emitted events stay buffered on the aggregate until the outbox publisher
//! persists them.

pub mod order;
pub mod returns;

pub use order::{
    AddItem, ApplyDiscount, CancelOrder, CreateSalesOrder, ItemAdded, ItemChanged, ItemRemoved,
    OrderCancelled, OrderCompleted, OrderConfirmed, OrderShipped, RemoveItem, SalesOrder,
    SalesOrderCommand, SalesOrderCreated, SalesOrderEvent, SalesOrderId, SalesOrderItem,
    SalesOrderStatus, SetWarehouse, Transition, UpdateItemPrice, UpdateItemQuantity,
};
pub use returns::{
    AddReturnItem, ApproveReturn, CreateSalesReturn, RemoveReturnItem, ReturnCancelled,
    ReturnCompleted, ReturnTransition, ReturnWithReason, SalesReturn, SalesReturnCommand,
    SalesReturnEvent, SalesReturnId, SalesReturnItem, SalesReturnStatus, SetReturnWarehouse,
    UpdateReturnQuantity,
};
