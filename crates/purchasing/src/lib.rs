//! Purchasing domain module (purchase orders and purchase returns, event-sourced).
//!
//! This crate contains business rules for purchasing, implemented purely as
//! deterministic domain logic (no IO, no storage).

pub mod order;
pub mod returns;

pub use order::{
    AddItem, ApplyDiscount, CancelOrder, ConfirmOrder, CreatePurchaseOrder, GoodsReceived,
    OrderCancelled, OrderConfirmed, PurchaseOrder, PurchaseOrderCommand, PurchaseOrderCreated,
    PurchaseOrderEvent, PurchaseOrderId, PurchaseOrderItem, PurchaseOrderStatus, ReceiveGoods,
    ReceiveLine, ReceivedLine, RemoveItem, SetWarehouse, UpdateItemCost, UpdateItemQuantity,
};
pub use returns::{
    AddReturnItem, ApproveReturn, CreatePurchaseReturn, PurchaseReturn, PurchaseReturnCommand,
    PurchaseReturnEvent, PurchaseReturnId, PurchaseReturnItem, PurchaseReturnStatus,
    RemoveReturnItem, ReturnShipped, ReturnTransition, ReturnWithReason, SetReturnWarehouse,
    ShipReturn,
};
