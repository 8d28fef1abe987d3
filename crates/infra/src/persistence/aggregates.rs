//! Row mapping for the domain aggregates.

use chrono::{DateTime, Utc};

use tradeflow_core::{AggregateId, AggregateRoot, TenantId};
use tradeflow_inventory::InventoryItem;
use tradeflow_purchasing::{PurchaseOrder, PurchaseReturn};
use tradeflow_sales::{SalesOrder, SalesReturn};

use super::StoredAggregate;

impl StoredAggregate for SalesOrder {
    const AGGREGATE_TYPE: &'static str = SalesOrder::AGGREGATE_TYPE;

    fn aggregate_id(&self) -> AggregateId {
        self.id().0
    }

    fn owner(&self) -> Option<TenantId> {
        self.tenant_id()
    }
}

impl StoredAggregate for SalesReturn {
    const AGGREGATE_TYPE: &'static str = SalesReturn::AGGREGATE_TYPE;

    fn aggregate_id(&self) -> AggregateId {
        self.id().0
    }

    fn owner(&self) -> Option<TenantId> {
        self.tenant_id()
    }
}

impl StoredAggregate for PurchaseOrder {
    const AGGREGATE_TYPE: &'static str = PurchaseOrder::AGGREGATE_TYPE;

    fn aggregate_id(&self) -> AggregateId {
        self.id().0
    }

    fn owner(&self) -> Option<TenantId> {
        self.tenant_id()
    }
}

impl StoredAggregate for PurchaseReturn {
    const AGGREGATE_TYPE: &'static str = PurchaseReturn::AGGREGATE_TYPE;

    fn aggregate_id(&self) -> AggregateId {
        self.id().0
    }

    fn owner(&self) -> Option<TenantId> {
        self.tenant_id()
    }
}

/// Inventory items are found by `warehouse:product` and surface their
/// earliest active lock expiry so the sweeper can query due rows.
impl StoredAggregate for InventoryItem {
    const AGGREGATE_TYPE: &'static str = InventoryItem::AGGREGATE_TYPE;

    fn aggregate_id(&self) -> AggregateId {
        self.id().0
    }

    fn owner(&self) -> Option<TenantId> {
        self.tenant_id()
    }

    fn secondary_key(&self) -> Option<String> {
        Some(InventoryItem::lookup_key(self.warehouse_id()?, self.product_id()?))
    }

    fn due_at(&self) -> Option<DateTime<Utc>> {
        self.next_lock_expiry()
    }
}
