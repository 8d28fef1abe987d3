//! Persistence boundary.
//!
//! Aggregates are stored as one JSON state row each, guarded by a version
//! compare-and-swap. The outbox rows for the events that produced that state
//! are written in the same [`Transaction`], so either both land or neither
//! does.
//!
//! Backends:
//! - [`InMemoryDatabase`]: tests/dev
//! - [`PostgresDatabase`]: sqlx + Postgres

pub mod aggregates;
pub mod in_memory;
pub mod postgres;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use tradeflow_core::{AggregateId, DomainError, ExpectedVersion, PendingEvents, TenantId};

use crate::outbox::OutboxEntry;

pub use in_memory::{InMemoryDatabase, InMemoryTransaction};
pub use postgres::{PostgresConfig, PostgresDatabase, PostgresTransaction};

/// Stored aggregate state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateRow {
    pub tenant_id: TenantId,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    /// Secondary key, unique per (tenant, aggregate type).
    pub lookup_key: Option<String>,
    /// When a background task next has work on this aggregate.
    pub due_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub state: JsonValue,
}

/// Persistence operation error.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// Version mismatch or unique-key collision; the caller may reload and retry.
    #[error("modified concurrently: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<serde_json::Error> for PersistenceError {
    fn from(value: serde_json::Error) -> Self {
        PersistenceError::Serialization(value.to_string())
    }
}

/// Atomic multi-row write. Dropping a transaction without `commit` discards it.
pub trait Transaction {
    /// Insert or update an aggregate row if the stored version matches `expected`.
    fn save_aggregate(
        &mut self,
        row: AggregateRow,
        expected: ExpectedVersion,
    ) -> Result<(), PersistenceError>;

    fn insert_outbox(&mut self, entries: &[OutboxEntry]) -> Result<(), PersistenceError>;

    fn commit(self) -> Result<(), PersistenceError>;
}

/// Source of transactions.
pub trait UnitOfWork: Send + Sync {
    type Tx: Transaction;

    fn begin(&self) -> Result<Self::Tx, PersistenceError>;
}

/// Read side of the aggregate table.
pub trait AggregateReader: Send + Sync {
    fn load(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRow>, PersistenceError>;

    fn find_by_key(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        lookup_key: &str,
    ) -> Result<Option<AggregateRow>, PersistenceError>;

    /// Rows of `aggregate_type` (all tenants) with `due_at <= now`, earliest first.
    fn find_due(
        &self,
        aggregate_type: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AggregateRow>, PersistenceError>;
}

impl<U: UnitOfWork + ?Sized> UnitOfWork for Arc<U> {
    type Tx = U::Tx;

    fn begin(&self) -> Result<Self::Tx, PersistenceError> {
        (**self).begin()
    }
}

impl<R: AggregateReader + ?Sized> AggregateReader for Arc<R> {
    fn load(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        aggregate_id: AggregateId,
    ) -> Result<Option<AggregateRow>, PersistenceError> {
        (**self).load(tenant_id, aggregate_type, aggregate_id)
    }

    fn find_by_key(
        &self,
        tenant_id: TenantId,
        aggregate_type: &str,
        lookup_key: &str,
    ) -> Result<Option<AggregateRow>, PersistenceError> {
        (**self).find_by_key(tenant_id, aggregate_type, lookup_key)
    }

    fn find_due(
        &self,
        aggregate_type: &str,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<AggregateRow>, PersistenceError> {
        (**self).find_due(aggregate_type, now, limit)
    }
}

/// Aggregates that persist as a JSON state row.
pub trait StoredAggregate:
    PendingEvents<Event: tradeflow_events::Event + Serialize, Error = DomainError>
    + Serialize
    + DeserializeOwned
{
    const AGGREGATE_TYPE: &'static str;

    fn aggregate_id(&self) -> AggregateId;

    fn owner(&self) -> Option<TenantId>;

    fn secondary_key(&self) -> Option<String> {
        None
    }

    fn due_at(&self) -> Option<DateTime<Utc>> {
        None
    }

    fn to_row(&self) -> Result<AggregateRow, PersistenceError> {
        let tenant_id = self.owner().ok_or_else(|| {
            PersistenceError::Serialization(format!(
                "{} {} has no tenant",
                Self::AGGREGATE_TYPE,
                self.aggregate_id()
            ))
        })?;

        Ok(AggregateRow {
            tenant_id,
            aggregate_type: Self::AGGREGATE_TYPE.to_string(),
            aggregate_id: self.aggregate_id(),
            lookup_key: self.secondary_key(),
            due_at: self.due_at(),
            version: self.version(),
            state: serde_json::to_value(self)?,
        })
    }

    fn from_row(row: &AggregateRow) -> Result<Self, PersistenceError> {
        if row.aggregate_type != Self::AGGREGATE_TYPE {
            return Err(PersistenceError::Serialization(format!(
                "row {} is a '{}', expected '{}'",
                row.aggregate_id,
                row.aggregate_type,
                Self::AGGREGATE_TYPE
            )));
        }
        Ok(serde_json::from_value(row.state.clone())?)
    }
}

/// Load an aggregate by id.
pub fn load_aggregate<A, R>(
    reader: &R,
    tenant_id: TenantId,
    aggregate_id: AggregateId,
) -> Result<Option<A>, PersistenceError>
where
    A: StoredAggregate,
    R: AggregateReader + ?Sized,
{
    reader
        .load(tenant_id, A::AGGREGATE_TYPE, aggregate_id)?
        .map(|row| A::from_row(&row))
        .transpose()
}
