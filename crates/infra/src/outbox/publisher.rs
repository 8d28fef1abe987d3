//! Writes aggregate state and its pending events in one transaction.

use chrono::{DateTime, Utc};
use tracing::debug;
use uuid::Uuid;

use tradeflow_core::{ExpectedVersion, PendingEvents};
use tradeflow_events::Event;

use crate::persistence::{PersistenceError, StoredAggregate, Transaction, UnitOfWork};

use super::entry::OutboxEntry;

/// Default delivery budget for new outbox rows.
pub const DEFAULT_MAX_RETRIES: u32 = 5;

/// Transactional outbox publisher.
///
/// Each pending event becomes one PENDING row: a fresh `event_id`, the event
/// tag, the producing aggregate and the version the event brought it to.
#[derive(Debug, Clone, Copy)]
pub struct OutboxPublisher {
    max_retries: u32,
}

impl Default for OutboxPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

impl OutboxPublisher {
    /// `max_retries` is at least 1.
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries: max_retries.max(1),
        }
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Outbox rows for the aggregate's pending events, in emission order.
    pub fn entries_for<A: StoredAggregate>(
        &self,
        aggregate: &A,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxEntry>, PersistenceError> {
        let tenant_id = aggregate.owner().ok_or_else(|| {
            PersistenceError::Serialization(format!(
                "{} {} has no tenant",
                A::AGGREGATE_TYPE,
                aggregate.aggregate_id()
            ))
        })?;
        let base = aggregate.persisted_version();

        aggregate
            .pending_events()
            .iter()
            .enumerate()
            .map(|(i, event)| -> Result<OutboxEntry, PersistenceError> {
                Ok(OutboxEntry::new(
                    tenant_id,
                    Uuid::now_v7(),
                    event.event_type(),
                    aggregate.aggregate_id(),
                    A::AGGREGATE_TYPE,
                    base + i as u64 + 1,
                    serde_json::to_value(event)?,
                    self.max_retries,
                    now,
                ))
            })
            .collect()
    }

    /// Stage the aggregate row and its outbox rows on an open transaction.
    ///
    /// The row is written under a compare-and-swap against the version the
    /// aggregate was loaded at. Returns the number of rows staged.
    pub fn stage<A, T>(
        &self,
        tx: &mut T,
        aggregate: &A,
        now: DateTime<Utc>,
    ) -> Result<usize, PersistenceError>
    where
        A: StoredAggregate,
        T: Transaction,
    {
        let entries = self.entries_for(aggregate, now)?;
        tx.save_aggregate(
            aggregate.to_row()?,
            ExpectedVersion::Exact(aggregate.persisted_version()),
        )?;
        tx.insert_outbox(&entries)?;
        Ok(entries.len())
    }

    /// Persist the aggregate and its pending events atomically, then clear
    /// the pending buffer.
    ///
    /// Nothing is written when no events are pending. On error the buffer is
    /// kept and nothing was committed.
    pub fn save<A, U>(&self, uow: &U, aggregate: &mut A) -> Result<usize, PersistenceError>
    where
        A: StoredAggregate,
        U: UnitOfWork + ?Sized,
    {
        if aggregate.pending_events().is_empty() {
            return Ok(0);
        }

        let mut tx = uow.begin()?;
        let count = self.stage(&mut tx, aggregate, Utc::now())?;
        tx.commit()?;
        aggregate.mark_persisted();

        debug!(
            aggregate_type = A::AGGREGATE_TYPE,
            aggregate_id = %aggregate.aggregate_id(),
            version = aggregate.version(),
            events = count,
            "aggregate saved with outbox rows"
        );
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{OutboxRepository, OutboxStatus};
    use crate::persistence::{InMemoryDatabase, load_aggregate};
    use tradeflow_core::{AggregateId, AggregateRoot, PartyId, TenantId};
    use tradeflow_sales::{CreateSalesOrder, SalesOrder, SalesOrderCommand, SalesOrderEvent, SalesOrderId};

    fn created_order(tenant_id: TenantId) -> SalesOrder {
        let id = SalesOrderId(AggregateId::new());
        let mut order = SalesOrder::empty(id);
        order
            .execute(&SalesOrderCommand::CreateSalesOrder(CreateSalesOrder {
                tenant_id,
                order_id: id,
                order_number: "SO-0001".to_string(),
                customer_id: PartyId::new(),
                customer_name: "Acme".to_string(),
                occurred_at: Utc::now(),
            }))
            .unwrap();
        order
    }

    #[test]
    fn save_writes_state_and_outbox_together() {
        let db = InMemoryDatabase::new();
        let tenant = TenantId::new();
        let mut order = created_order(tenant);

        let written = OutboxPublisher::default().save(&db, &mut order).unwrap();
        assert_eq!(written, 1);
        assert!(order.pending_events().is_empty());

        let entries = db.outbox_entries().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, SalesOrderEvent::CREATED);
        assert_eq!(entries[0].status, OutboxStatus::Pending);
        assert_eq!(entries[0].sequence_number, 1);
        assert_eq!(entries[0].max_retries, DEFAULT_MAX_RETRIES);

        let loaded: SalesOrder = load_aggregate(&db, tenant, order.id().0).unwrap().unwrap();
        assert_eq!(loaded.version(), 1);
    }

    #[test]
    fn zero_budget_still_allows_one_attempt() {
        let db = InMemoryDatabase::new();
        let mut order = created_order(TenantId::new());
        let publisher = OutboxPublisher::new(0);
        assert_eq!(publisher.max_retries(), 1);

        publisher.save(&db, &mut order).unwrap();
        assert_eq!(db.outbox_entries().unwrap()[0].max_retries, 1);
    }

    #[test]
    fn nothing_pending_writes_nothing() {
        let db = InMemoryDatabase::new();
        let mut order = created_order(TenantId::new());
        OutboxPublisher::default().save(&db, &mut order).unwrap();

        assert_eq!(OutboxPublisher::default().save(&db, &mut order).unwrap(), 0);
        assert_eq!(db.outbox_entries().unwrap().len(), 1);
    }

    #[test]
    fn stale_copy_commits_nothing() {
        let db = InMemoryDatabase::new();
        let tenant = TenantId::new();
        let mut order = created_order(tenant);
        let publisher = OutboxPublisher::new(3);
        publisher.save(&db, &mut order).unwrap();

        let mut first: SalesOrder = load_aggregate(&db, tenant, order.id().0).unwrap().unwrap();
        let mut second = first.clone();
        let cancel = SalesOrderCommand::CancelOrder(tradeflow_sales::CancelOrder {
            tenant_id: tenant,
            reason: "duplicate".to_string(),
            occurred_at: Utc::now(),
        });
        first.execute(&cancel).unwrap();
        second.execute(&cancel).unwrap();

        publisher.save(&db, &mut first).unwrap();
        let err = publisher.save(&db, &mut second).unwrap_err();

        assert!(matches!(err, PersistenceError::Conflict(_)));
        assert_eq!(second.pending_events().len(), 1);
        let (dead, _) = db.list_dead(0, 10).unwrap();
        assert!(dead.is_empty());
        assert_eq!(db.outbox_entries().unwrap().len(), 2);
    }
}
