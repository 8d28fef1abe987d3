use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::persistence::PersistenceError;

use super::entry::{OutboxEntry, OutboxId, OutboxStatus};

/// Outbox storage operations used by the processor and the operator surface.
///
/// Every state change is a conditional update on the stored status, so
/// several processors (possibly in different processes) can share one table.
/// Rows are inserted through [`crate::persistence::Transaction::insert_outbox`].
pub trait OutboxRepository: Send + Sync {
    /// Move up to `limit` claimable rows to PROCESSING in one conditional
    /// update and return them in emission order.
    ///
    /// Claimable: PENDING, FAILED with `next_retry_at <= now`, or PROCESSING
    /// whose claim is older than `processing_timeout`.
    fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        processing_timeout: chrono::Duration,
    ) -> Result<Vec<OutboxEntry>, PersistenceError>;

    /// Persist the outcome of a claimed row and clear its claim.
    ///
    /// Applies only while the stored row is still PROCESSING under
    /// `entry.claim_id`; returns `false` when the claim was lost.
    fn record_outcome(&self, entry: &OutboxEntry) -> Result<bool, PersistenceError>;

    fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, PersistenceError>;

    /// DEAD rows, most recently updated first, plus the total DEAD count.
    fn list_dead(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<OutboxEntry>, u64), PersistenceError>;

    /// DEAD -> PENDING for one row. `None` when the row is missing or not DEAD.
    fn reset_dead(
        &self,
        id: OutboxId,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, PersistenceError>;

    /// DEAD -> PENDING for every dead row, atomically. Returns the count reset.
    fn reset_all_dead(&self, now: DateTime<Utc>) -> Result<u64, PersistenceError>;

    fn count_by_status(&self) -> Result<Vec<(OutboxStatus, u64)>, PersistenceError>;
}

impl<R: OutboxRepository + ?Sized> OutboxRepository for Arc<R> {
    fn claim_batch(
        &self,
        limit: usize,
        now: DateTime<Utc>,
        processing_timeout: chrono::Duration,
    ) -> Result<Vec<OutboxEntry>, PersistenceError> {
        (**self).claim_batch(limit, now, processing_timeout)
    }

    fn record_outcome(&self, entry: &OutboxEntry) -> Result<bool, PersistenceError> {
        (**self).record_outcome(entry)
    }

    fn get(&self, id: OutboxId) -> Result<Option<OutboxEntry>, PersistenceError> {
        (**self).get(id)
    }

    fn list_dead(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<OutboxEntry>, u64), PersistenceError> {
        (**self).list_dead(offset, limit)
    }

    fn reset_dead(
        &self,
        id: OutboxId,
        now: DateTime<Utc>,
    ) -> Result<Option<OutboxEntry>, PersistenceError> {
        (**self).reset_dead(id, now)
    }

    fn reset_all_dead(&self, now: DateTime<Utc>) -> Result<u64, PersistenceError> {
        (**self).reset_all_dead(now)
    }

    fn count_by_status(&self) -> Result<Vec<(OutboxStatus, u64)>, PersistenceError> {
        (**self).count_by_status()
    }
}
