//! Operator surface over the outbox: inspect and resurrect dead rows.

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use super::entry::{OutboxEntry, OutboxId, OutboxStatus};
use super::error::OutboxError;
use super::repository::OutboxRepository;

/// Largest page the dead-letter listing serves.
pub const MAX_PAGE_SIZE: usize = 100;

/// One page of dead rows, newest first.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterPage {
    pub entries: Vec<OutboxEntry>,
    pub total: u64,
    pub page: usize,
    pub page_size: usize,
    pub total_pages: u64,
}

/// Row counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct OutboxStats {
    pub pending: u64,
    pub processing: u64,
    pub sent: u64,
    pub failed: u64,
    pub dead: u64,
    pub total: u64,
}

impl OutboxStats {
    pub fn count(&self, status: OutboxStatus) -> u64 {
        match status {
            OutboxStatus::Pending => self.pending,
            OutboxStatus::Processing => self.processing,
            OutboxStatus::Sent => self.sent,
            OutboxStatus::Failed => self.failed,
            OutboxStatus::Dead => self.dead,
        }
    }
}

/// Outbox administration.
///
/// Not tenant scoped: operators see every tenant's rows.
#[derive(Debug, Clone)]
pub struct OutboxAdmin<R> {
    repository: R,
}

impl<R: OutboxRepository> OutboxAdmin<R> {
    pub fn new(repository: R) -> Self {
        Self { repository }
    }

    /// Dead rows, paginated. `page` is 1-based.
    pub fn list_dead(&self, page: usize, page_size: usize) -> Result<DeadLetterPage, OutboxError> {
        if page == 0 {
            return Err(OutboxError::InvalidPage("page starts at 1".to_string()));
        }
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(OutboxError::InvalidPage(format!(
                "page size must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"
            )));
        }

        let offset = (page - 1).saturating_mul(page_size);
        let (entries, total) = self.repository.list_dead(offset, page_size)?;

        Ok(DeadLetterPage {
            entries,
            total,
            page,
            page_size,
            total_pages: total.div_ceil(page_size as u64),
        })
    }

    pub fn get(&self, id: OutboxId) -> Result<OutboxEntry, OutboxError> {
        self.repository
            .get(id)?
            .ok_or(OutboxError::NotFound(id))
    }

    /// Move one DEAD row back to PENDING with a fresh retry budget.
    ///
    /// Fails without touching the row when it is missing or not DEAD.
    pub fn retry(&self, id: OutboxId) -> Result<OutboxEntry, OutboxError> {
        if let Some(entry) = self.repository.reset_dead(id, Utc::now())? {
            info!(outbox_id = %id, event_type = %entry.event_type, "dead outbox entry requeued");
            return Ok(entry);
        }

        // Distinguish "missing" from "not dead" for the caller.
        match self.repository.get(id)? {
            None => Err(OutboxError::NotFound(id)),
            Some(entry) => Err(OutboxError::NotDead {
                id,
                status: entry.status,
            }),
        }
    }

    /// Requeue every DEAD row. Returns how many were reset.
    pub fn retry_all(&self) -> Result<u64, OutboxError> {
        let count = self.repository.reset_all_dead(Utc::now())?;
        info!(count, "dead outbox entries requeued");
        Ok(count)
    }

    pub fn stats(&self) -> Result<OutboxStats, OutboxError> {
        let mut stats = OutboxStats::default();
        for (status, count) in self.repository.count_by_status()? {
            match status {
                OutboxStatus::Pending => stats.pending += count,
                OutboxStatus::Processing => stats.processing += count,
                OutboxStatus::Sent => stats.sent += count,
                OutboxStatus::Failed => stats.failed += count,
                OutboxStatus::Dead => stats.dead += count,
            }
            stats.total += count;
        }
        Ok(stats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{InMemoryDatabase, Transaction, UnitOfWork};
    use chrono::DateTime;
    use serde_json::json;
    use tradeflow_core::{AggregateId, TenantId};
    use uuid::Uuid;

    fn entry(status: OutboxStatus, updated_at: DateTime<Utc>) -> OutboxEntry {
        let mut entry = OutboxEntry::new(
            TenantId::new(),
            Uuid::now_v7(),
            "sales.order.confirmed",
            AggregateId::new(),
            "sales_order",
            1,
            json!({}),
            3,
            updated_at,
        );
        entry.status = status;
        if status == OutboxStatus::Dead {
            entry.retry_count = 3;
            entry.last_error = Some("bus down".to_string());
        }
        entry
    }

    fn admin_with(entries: &[OutboxEntry]) -> (InMemoryDatabase, OutboxAdmin<InMemoryDatabase>) {
        let db = InMemoryDatabase::new();
        let mut tx = db.begin().unwrap();
        tx.insert_outbox(entries).unwrap();
        tx.commit().unwrap();
        (db.clone(), OutboxAdmin::new(db))
    }

    #[test]
    fn list_dead_paginates_newest_first() {
        let base = Utc::now();
        let entries: Vec<_> = (0..5)
            .map(|i| entry(OutboxStatus::Dead, base + chrono::Duration::seconds(i)))
            .chain(std::iter::once(entry(OutboxStatus::Pending, base)))
            .collect();
        let (_, admin) = admin_with(&entries);

        let first = admin.list_dead(1, 2).unwrap();
        assert_eq!(first.total, 5);
        assert_eq!(first.total_pages, 3);
        assert_eq!(first.entries.len(), 2);
        assert_eq!(first.entries[0].id, entries[4].id);
        assert_eq!(first.entries[1].id, entries[3].id);

        let last = admin.list_dead(3, 2).unwrap();
        assert_eq!(last.entries.len(), 1);
        assert_eq!(last.entries[0].id, entries[0].id);

        assert!(admin.list_dead(4, 2).unwrap().entries.is_empty());
    }

    #[test]
    fn invalid_pages_are_rejected() {
        let (_, admin) = admin_with(&[]);
        assert!(matches!(admin.list_dead(0, 10), Err(OutboxError::InvalidPage(_))));
        assert!(matches!(admin.list_dead(1, 0), Err(OutboxError::InvalidPage(_))));
        assert!(matches!(admin.list_dead(1, 101), Err(OutboxError::InvalidPage(_))));
        assert!(admin.list_dead(1, 100).is_ok());
    }

    #[test]
    fn retry_requeues_dead_entry() {
        let dead = entry(OutboxStatus::Dead, Utc::now());
        let (db, admin) = admin_with(std::slice::from_ref(&dead));

        let requeued = admin.retry(dead.id).unwrap();

        assert_eq!(requeued.status, OutboxStatus::Pending);
        assert_eq!(requeued.retry_count, 0);
        assert!(requeued.last_error.is_none());
        assert_eq!(db.get(dead.id).unwrap().unwrap().status, OutboxStatus::Pending);
    }

    #[test]
    fn retry_of_live_entry_fails_without_mutation() {
        let pending = entry(OutboxStatus::Pending, Utc::now());
        let (db, admin) = admin_with(std::slice::from_ref(&pending));

        let err = admin.retry(pending.id).unwrap_err();

        assert!(matches!(
            err,
            OutboxError::NotDead { status: OutboxStatus::Pending, .. }
        ));
        assert_eq!(db.get(pending.id).unwrap().unwrap(), pending);
        assert!(matches!(admin.retry(OutboxId::new()), Err(OutboxError::NotFound(_))));
        assert!(matches!(admin.get(OutboxId::new()), Err(OutboxError::NotFound(_))));
    }

    #[test]
    fn retry_all_and_stats() {
        let now = Utc::now();
        let (_, admin) = admin_with(&[
            entry(OutboxStatus::Dead, now),
            entry(OutboxStatus::Dead, now),
            entry(OutboxStatus::Sent, now),
            entry(OutboxStatus::Failed, now),
            entry(OutboxStatus::Pending, now),
        ]);

        let before = admin.stats().unwrap();
        assert_eq!(before.dead, 2);
        assert_eq!(before.total, 5);
        assert_eq!(
            before.pending + before.processing + before.sent + before.failed + before.dead,
            before.total
        );

        assert_eq!(admin.retry_all().unwrap(), 2);
        assert_eq!(admin.retry_all().unwrap(), 0);

        let after = admin.stats().unwrap();
        assert_eq!(after.count(OutboxStatus::Dead), 0);
        assert_eq!(after.count(OutboxStatus::Pending), 3);
        assert_eq!(after.total, 5);
    }
}
