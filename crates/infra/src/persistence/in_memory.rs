use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use tradeflow_core::{AggregateId, ExpectedVersion, TenantId};

use crate::outbox::{OutboxEntry, OutboxId, OutboxRepository, OutboxStatus};

use super::{AggregateReader, AggregateRow, PersistenceError, Transaction, UnitOfWork};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RowKey {
    tenant_id: TenantId,
    aggregate_type: String,
    aggregate_id: AggregateId,
}

impl RowKey {
    fn of(row: &AggregateRow) -> Self {
        Self {
            tenant_id: row.tenant_id,
            aggregate_type: row.aggregate_type.clone(),
            aggregate_id: row.aggregate_id,
        }
    }
}

#[derive(Debug, Default)]
struct Tables {
    aggregates: HashMap<RowKey, AggregateRow>,
    /// Insertion order is emission order.
    outbox: Vec<OutboxEntry>,
}

/// In-memory database: aggregate table plus outbox table behind one lock.
///
/// Intended for tests/dev. Every mutation happens under the write lock, which
/// gives the same all-or-nothing and conditional-update behavior the Postgres
/// backend gets from transactions.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDatabase {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Tables>, PersistenceError> {
        self.tables
            .read()
            .map_err(|_| PersistenceError::Storage("lock poisoned".to_string()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Tables>, PersistenceError> {
        self.tables
            .write()
            .map_err(|_| PersistenceError::Storage("lock poisoned".to_string()))
    }

    /// Snapshot of every outbox row in insertion order.
    pub fn outbox_entries(&self) -> Result<Vec<OutboxEntry>, PersistenceError> {
        Ok(self.read()?.outbox.clone())
    }

    pub fn aggregate_count(&self) -> Result<usize, PersistenceError> {
        Ok(self.read()?.aggregates.len())
    }
}

/// Staged writes, applied under one write lock on commit.
#[derive(Debug)]
pub struct InMemoryTransaction {
    tables: Arc<RwLock<Tables>>,
    aggregates: Vec<(AggregateRow, ExpectedVersion)>,
    outbox: Vec<OutboxEntry>,
}

impl Transaction for InMemoryTransaction {
    fn save_aggregate(
        &mut self,
        row: AggregateRow,
        expected: ExpectedVersion,
    ) -> Result<(), PersistenceError> {
        self.aggregates.push((row, expected));
        Ok(())
    }

    fn insert_outbox(&mut self, entries: &[OutboxEntry]) -> Result<(), PersistenceError> {
        self.outbox.extend_from_slice(entries);
        Ok(())
    }

    fn commit(self) -> Result<(), PersistenceError> {
        let mut tables = self
            .tables
            .write()
            .map_err(|_| PersistenceError::Storage("lock poisoned".to_string()))?;

        // Validate everything first so a failure leaves no partial write.
        for (row, expected) in &self.aggregates {
            let key = RowKey::of(row);
            let current = tables.aggregates.get(&key).map_or(0, |r| r.version);
            if !expected.matches(current) {
                return Err(PersistenceError::Conflict(format!(
                    "{} {}: expected {expected:?}, found {current}",
                    row.aggregate_type, row.aggregate_id
                )));
            }

            if let Some(lookup_key) = &row.lookup_key {
                let taken = tables.aggregates.values().any(|other| {
                    other.tenant_id == row.tenant_id
                        && other.aggregate_type == row.aggregate_type
                        && other.aggregate_id != row.aggregate_id
                        && other.lookup_key.as_deref() == Some(lookup_key.as_str())
                });
                if taken {
                    return Err(PersistenceError::Conflict(format!(
                        "{} with key '{lookup_key}' already exists",
                        row.aggregate_type
                    )));
                }
            }
        }

        for entry in &self.outbox {
            if tables.outbox.iter().any(|e| e.id == entry.id) {
                return Err(PersistenceError::Conflict(format!(
                    "outbox entry {} already exists",
                    entry.id
                )));
            }
        }

        for (row, _) in self.aggregates {
            tables.aggregates.insert(RowKey::of(&row), row);
        }
        tables.outbox.extend(self.outbox);
        Ok(())
    }
}

impl UnitOfWork for InMemoryDatabase {
    type Tx = InMemoryTransaction;

    fn begin(&self) -> Result<Self::Tx, PersistenceError> {
        Ok(InMemoryTransaction {
            tables: Arc::clone(&self.tables),
            aggregates: Vec::new(),
            outbox: Vec::new(),
        })
    }
}

impl AggregateReader for InMemoryDatabase {
    fn load(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRow>, PersistenceError> {
        let key = RowKey {
            tenant_id,
            aggregate_type: aggregate_type.to_string(),
            aggregate_id,
        };
        Ok(self.read()?.aggregates.get(&key).cloned())
    }

    fn find_by_key(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        lookup_key: &str,
    ) -> Result<Option<AggregateRow>, PersistenceError> {
        Ok(self
            .read()?
            .aggregates
            .values()
            .find(|r| {
                r.tenant_id == tenant_id
                    && r.aggregate_type == aggregate_type
                    && r.lookup_key.as_deref() == Some(lookup_key)
            })
            .cloned())
    }

    fn find_due(
        &self,
        aggregate_type: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AggregateRow>, PersistenceError> {
        let tables = self.read()?;
        let mut due: Vec<_> = tables
            .aggregates
            .values()
            .filter(|r| r.aggregate_type == aggregate_type && r.due_at.is_some_and(|at| at <= now))
            .cloned()
            .collect();
        due.sort_by_key(|r| r.due_at);
        due.truncate(limit);
        Ok(due)
    }
}

impl OutboxRepository for InMemoryDatabase {
    fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        processing_timeout: chrono::Duration,
    ) -> Result<Vec<OutboxEntry>, PersistenceError> {
        let mut tables = self.write()?;

        // Stable sort keeps insertion order among rows created together.
        let mut candidates: Vec<usize> = tables
            .outbox
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_claimable(now, processing_timeout))
            .map(|(idx, _)| idx)
            .collect();
        candidates.sort_by_key(|&idx| tables.outbox[idx].created_at);
        candidates.truncate(limit);

        let mut claimed = Vec::with_capacity(candidates.len());
        for idx in candidates {
            let entry = &mut tables.outbox[idx];
            entry.mark_processing(now);
            claimed.push(entry.clone());
        }
        Ok(claimed)
    }

    fn record_outcome(&self, entry: &OutboxEntry) -> Result<bool, PersistenceError> {
        let mut tables = self.write()?;
        let Some(stored) = tables.outbox.iter_mut().find(|e| e.id == entry.id) else {
            return Err(PersistenceError::NotFound(format!("outbox entry {}", entry.id)));
        };

        if entry.claim_id.is_none()
            || stored.status != OutboxStatus::Processing
            || stored.claim_id != entry.claim_id
        {
            return Ok(false);
        }

        stored.status = entry.status;
        stored.retry_count = entry.retry_count;
        stored.last_error = entry.last_error.clone();
        stored.next_retry_at = entry.next_retry_at;
        stored.processed_at = entry.processed_at;
        stored.updated_at = entry.updated_at;
        stored.claim_id = None;
        Ok(true)
    }

    fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, PersistenceError> {
        Ok(self.read()?.outbox.iter().find(|e| e.id == id).cloned())
    }

    fn list_dead(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<OutboxEntry>, u64), PersistenceError> {
        let tables = self.read()?;
        let mut dead: Vec<_> = tables
            .outbox
            .iter()
            .filter(|e| e.status == OutboxStatus::Dead)
            .cloned()
            .collect();
        let total = dead.len() as u64;

        dead.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok((dead.into_iter().skip(offset).take(limit).collect(), total))
    }

    fn reset_dead(
        &self,
        id: OutboxId,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, PersistenceError> {
        let mut tables = self.write()?;
        let Some(entry) = tables.outbox.iter_mut().find(|e| e.id == id) else {
            return Ok(None);
        };
        Ok(entry.reset_for_retry(now).ok().map(|()| entry.clone()))
    }

    fn reset_all_dead(&self, now: DateTime<Utc>) -> Result<u64, PersistenceError> {
        let mut tables = self.write()?;
        let mut count = 0;
        for entry in tables.outbox.iter_mut() {
            if entry.reset_for_retry(now).is_ok() {
                count += 1;
            }
        }
        Ok(count)
    }

    fn count_by_status(&self) -> Result<Vec<(OutboxStatus, u64)>, PersistenceError> {
        let tables = self.read()?;
        let mut counts: HashMap<OutboxStatus, u64> = HashMap::new();
        for entry in &tables.outbox {
            *counts.entry(entry.status).or_default() += 1;
        }
        Ok(counts.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use uuid::Uuid;

    fn test_tenant() -> TenantId {
        TenantId::new()
    }

    fn row(tenant_id: TenantId, id: AggregateId, key: Option<&str>, version: u64) -> AggregateRow {
        AggregateRow {
            tenant_id,
            aggregate_type: "inventory_item".to_string(),
            aggregate_id: id,
            lookup_key: key.map(str::to_string),
            due_at: None,
            version,
            state: json!({ "version": version }),
        }
    }

    fn entry(tenant_id: TenantId, aggregate_id: AggregateId, seq: u64, now: DateTime<Utc>) -> OutboxEntry {
        OutboxEntry::new(
            tenant_id,
            Uuid::now_v7(),
            "inventory.stock.locked",
            aggregate_id,
            "inventory_item",
            seq,
            json!({}),
            3,
            now,
        )
    }

    #[test]
    fn commit_writes_rows_and_outbox_together() {
        let db = InMemoryDatabase::new();
        let tenant = test_tenant();
        let id = AggregateId::new();
        let now = Utc::now();

        let mut tx = db.begin().unwrap();
        tx.save_aggregate(row(tenant, id, None, 1), ExpectedVersion::Exact(0))
            .unwrap();
        tx.insert_outbox(&[entry(tenant, id, 1, now)]).unwrap();
        tx.commit().unwrap();

        assert_eq!(db.load(tenant, "inventory_item", id).unwrap().unwrap().version, 1);
        assert_eq!(db.outbox_entries().unwrap().len(), 1);
    }

    #[test]
    fn stale_version_rejects_the_whole_transaction() {
        let db = InMemoryDatabase::new();
        let tenant = test_tenant();
        let id = AggregateId::new();
        let now = Utc::now();

        let mut tx = db.begin().unwrap();
        tx.save_aggregate(row(tenant, id, None, 1), ExpectedVersion::Exact(0))
            .unwrap();
        tx.commit().unwrap();

        let mut stale = db.begin().unwrap();
        stale
            .save_aggregate(row(tenant, id, None, 2), ExpectedVersion::Exact(0))
            .unwrap();
        stale.insert_outbox(&[entry(tenant, id, 2, now)]).unwrap();
        let err = stale.commit().unwrap_err();

        assert!(matches!(err, PersistenceError::Conflict(_)));
        assert_eq!(db.load(tenant, "inventory_item", id).unwrap().unwrap().version, 1);
        assert!(db.outbox_entries().unwrap().is_empty());
    }

    #[test]
    fn lookup_key_is_unique_per_tenant() {
        let db = InMemoryDatabase::new();
        let tenant = test_tenant();

        let mut tx = db.begin().unwrap();
        tx.save_aggregate(row(tenant, AggregateId::new(), Some("w:p"), 1), ExpectedVersion::Exact(0))
            .unwrap();
        tx.commit().unwrap();

        let mut tx = db.begin().unwrap();
        tx.save_aggregate(row(tenant, AggregateId::new(), Some("w:p"), 1), ExpectedVersion::Exact(0))
            .unwrap();
        assert!(matches!(tx.commit(), Err(PersistenceError::Conflict(_))));

        let mut other_tenant = db.begin().unwrap();
        other_tenant
            .save_aggregate(row(test_tenant(), AggregateId::new(), Some("w:p"), 1), ExpectedVersion::Exact(0))
            .unwrap();
        other_tenant.commit().unwrap();

        assert!(db.find_by_key(tenant, "inventory_item", "w:p").unwrap().is_some());
    }

    #[test]
    fn claim_is_exclusive_until_timeout() {
        let db = InMemoryDatabase::new();
        let tenant = test_tenant();
        let id = AggregateId::new();
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(30);

        let mut tx = db.begin().unwrap();
        tx.insert_outbox(&[entry(tenant, id, 1, now), entry(tenant, id, 2, now)])
            .unwrap();
        tx.commit().unwrap();

        let first = db.claim_batch(10, now, timeout).unwrap();
        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);
        assert!(db.claim_batch(10, now, timeout).unwrap().is_empty());

        let later = now + chrono::Duration::seconds(31);
        let reclaimed = db.claim_batch(1, later, timeout).unwrap();
        assert_eq!(reclaimed.len(), 1);

        // The first claim on that row is stale now.
        let mut stale = first[0].clone();
        stale.mark_sent(now);
        assert!(!db.record_outcome(&stale).unwrap());

        let mut current = reclaimed[0].clone();
        current.mark_sent(later);
        assert!(db.record_outcome(&current).unwrap());
        assert_eq!(db.get(current.id).unwrap().unwrap().claim_id, None);
        assert!(!db.record_outcome(&current).unwrap());
    }

    #[test]
    fn reclaim_at_the_same_instant_gets_a_new_token() {
        let db = InMemoryDatabase::new();
        let tenant = test_tenant();
        let now = Utc::now();
        let no_timeout = chrono::Duration::zero();

        let mut tx = db.begin().unwrap();
        tx.insert_outbox(&[entry(tenant, AggregateId::new(), 1, now)]).unwrap();
        tx.commit().unwrap();

        let first = db.claim_batch(1, now, no_timeout).unwrap().remove(0);
        let second = db.claim_batch(1, now, no_timeout).unwrap().remove(0);
        assert_eq!(first.updated_at, second.updated_at);
        assert_ne!(first.claim_id, second.claim_id);

        let mut stale = first;
        stale.mark_sent(now);
        assert!(!db.record_outcome(&stale).unwrap());

        let mut current = second;
        current.mark_failed("boom", &crate::outbox::RetryPolicy::default(), now);
        assert!(db.record_outcome(&current).unwrap());
        assert_eq!(db.get(current.id).unwrap().unwrap().status, OutboxStatus::Failed);
    }
}
