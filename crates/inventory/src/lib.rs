//! Inventory domain module.
//!
//! Stock per (warehouse, product) with locks held for open sales orders.
//! Pure decision logic: no IO, no storage.

pub mod item;
pub mod lock;
pub mod references;

pub use item::{
    AdjustStock, BatchInfo, CreateItem, DecreaseStock, DeductStock, IncreaseStock,
    InventoryCommand, InventoryEvent, InventoryItem, InventoryItemId, ItemCreated, LockReleased,
    LockStock, MovementKind, ReleaseLock, SetThresholds, SourceType, StockAdjusted, StockBatch,
    StockBelowThreshold, StockDecreased, StockDeducted, StockIncreased, StockLocked,
    StockMovement, StockSource, ThresholdsSet, deducted_marker, movement_reference,
};
pub use lock::StockLock;
pub use references::ReferenceWindow;
