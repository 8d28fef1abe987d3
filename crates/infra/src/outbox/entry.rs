//! Outbox row and its delivery state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use tradeflow_core::{AggregateId, TenantId};

use super::error::OutboxError;
use super::retry::RetryPolicy;

/// Unique outbox entry identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OutboxId(pub Uuid);

impl OutboxId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for OutboxId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for OutboxId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Delivery status.
///
/// ```text
/// PENDING -> PROCESSING -> SENT
///            PROCESSING -> FAILED -> PROCESSING
///            PROCESSING -> DEAD            (retry_count >= max_retries)
/// DEAD -> PENDING                          (operator retry only)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutboxStatus {
    Pending,
    Processing,
    Sent,
    Failed,
    Dead,
}

impl OutboxStatus {
    pub const ALL: [OutboxStatus; 5] = [
        OutboxStatus::Pending,
        OutboxStatus::Processing,
        OutboxStatus::Sent,
        OutboxStatus::Failed,
        OutboxStatus::Dead,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            OutboxStatus::Pending => "PENDING",
            OutboxStatus::Processing => "PROCESSING",
            OutboxStatus::Sent => "SENT",
            OutboxStatus::Failed => "FAILED",
            OutboxStatus::Dead => "DEAD",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|s| s.as_str() == value)
    }

    /// Only an operator retry moves a row out of these.
    pub fn is_terminal(self) -> bool {
        matches!(self, OutboxStatus::Sent | OutboxStatus::Dead)
    }
}

impl std::fmt::Display for OutboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One durable row per emitted domain event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutboxEntry {
    pub id: OutboxId,
    pub tenant_id: TenantId,
    pub event_id: Uuid,
    pub event_type: String,
    pub aggregate_id: AggregateId,
    pub aggregate_type: String,
    /// Aggregate version reached by this event.
    pub sequence_number: u64,
    pub status: OutboxStatus,
    pub retry_count: u32,
    pub max_retries: u32,
    pub last_error: Option<String>,
    pub next_retry_at: Option<DateTime<Utc>>,
    pub processed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Token of the claim that moved the row to PROCESSING. An outcome is
    /// only written under the same token.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub claim_id: Option<Uuid>,
    #[serde(skip_serializing_if = "JsonValue::is_null", default)]
    pub payload: JsonValue,
}

impl OutboxEntry {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tenant_id: TenantId,
        event_id: Uuid,
        event_type: impl Into<String>,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        sequence_number: u64,
        payload: JsonValue,
        max_retries: u32,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: OutboxId::new(),
            tenant_id,
            event_id,
            event_type: event_type.into(),
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            sequence_number,
            status: OutboxStatus::Pending,
            retry_count: 0,
            max_retries: max_retries.max(1),
            last_error: None,
            next_retry_at: None,
            processed_at: None,
            created_at: now,
            updated_at: now,
            claim_id: None,
            payload,
        }
    }

    /// Whether a claim at `now` may pick this row up.
    ///
    /// A PROCESSING row is only reclaimable once its claim is older than
    /// `processing_timeout` (the processor that held it is presumed dead).
    pub fn is_claimable(&self, now: DateTime<Utc>, processing_timeout: chrono::Duration) -> bool {
        match self.status {
            OutboxStatus::Pending => true,
            OutboxStatus::Failed => self.next_retry_at.is_none_or(|at| at <= now),
            OutboxStatus::Processing => self.updated_at <= now - processing_timeout,
            OutboxStatus::Sent | OutboxStatus::Dead => false,
        }
    }

    /// Claim the row under a fresh token.
    pub fn mark_processing(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Processing;
        self.claim_id = Some(Uuid::now_v7());
        self.updated_at = now;
    }

    pub fn mark_sent(&mut self, now: DateTime<Utc>) {
        self.status = OutboxStatus::Sent;
        self.processed_at = Some(now);
        self.next_retry_at = None;
        self.updated_at = now;
    }

    /// Record a failed delivery attempt.
    ///
    /// The row goes DEAD exactly when `retry_count` reaches `max_retries`;
    /// until then it is FAILED with a backoff deadline.
    pub fn mark_failed(&mut self, error: impl Into<String>, policy: &RetryPolicy, now: DateTime<Utc>) {
        self.retry_count += 1;
        self.last_error = Some(error.into());
        self.updated_at = now;

        if self.retry_count >= self.max_retries {
            self.status = OutboxStatus::Dead;
            self.next_retry_at = None;
        } else {
            self.status = OutboxStatus::Failed;
            self.next_retry_at = Some(now + policy.delay_for_attempt(self.retry_count));
        }
    }

    /// Operator retry: DEAD -> PENDING with a fresh retry budget.
    pub fn reset_for_retry(&mut self, now: DateTime<Utc>) -> Result<(), OutboxError> {
        if self.status != OutboxStatus::Dead {
            return Err(OutboxError::NotDead {
                id: self.id,
                status: self.status,
            });
        }
        self.status = OutboxStatus::Pending;
        self.retry_count = 0;
        self.last_error = None;
        self.next_retry_at = None;
        self.claim_id = None;
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn test_entry(max_retries: u32) -> OutboxEntry {
        OutboxEntry::new(
            TenantId::new(),
            Uuid::now_v7(),
            "sales.order.confirmed",
            AggregateId::new(),
            "sales_order",
            1,
            serde_json::json!({}),
            max_retries,
            Utc::now(),
        )
    }

    #[test]
    fn retry_count_grows_until_dead_at_threshold() {
        let policy = RetryPolicy::linear(Duration::from_secs(1), Duration::from_secs(60));
        let mut entry = test_entry(3);
        let now = Utc::now();

        entry.mark_processing(now);
        entry.mark_failed("boom", &policy, now);
        assert_eq!(entry.status, OutboxStatus::Failed);
        assert_eq!(entry.retry_count, 1);
        assert_eq!(entry.next_retry_at, Some(now + chrono::Duration::seconds(1)));

        entry.mark_processing(now);
        entry.mark_failed("boom", &policy, now);
        assert_eq!(entry.status, OutboxStatus::Failed);
        assert_eq!(entry.next_retry_at, Some(now + chrono::Duration::seconds(2)));

        entry.mark_processing(now);
        entry.mark_failed("boom again", &policy, now);
        assert_eq!(entry.status, OutboxStatus::Dead);
        assert_eq!(entry.retry_count, 3);
        assert_eq!(entry.next_retry_at, None);
        assert_eq!(entry.last_error.as_deref(), Some("boom again"));
    }

    #[test]
    fn every_claim_gets_its_own_token() {
        let now = Utc::now();
        let mut entry = test_entry(1);
        assert_eq!(entry.claim_id, None);

        entry.mark_processing(now);
        let first = entry.claim_id;
        entry.mark_processing(now);
        assert!(first.is_some());
        assert_ne!(entry.claim_id, first);

        entry.mark_failed("boom", &RetryPolicy::default(), now);
        assert_eq!(entry.status, OutboxStatus::Dead);
        entry.reset_for_retry(now).unwrap();
        assert_eq!(entry.claim_id, None);
    }

    #[test]
    fn zero_budget_dies_after_exactly_one_attempt() {
        let now = Utc::now();
        let mut entry = test_entry(0);
        assert_eq!(entry.max_retries, 1);

        entry.mark_processing(now);
        entry.mark_failed("boom", &RetryPolicy::default(), now);
        assert_eq!(entry.status, OutboxStatus::Dead);
        assert_eq!(entry.retry_count, entry.max_retries);
    }

    #[test]
    fn claimability_follows_status_and_deadlines() {
        let now = Utc::now();
        let timeout = chrono::Duration::seconds(30);
        let mut entry = test_entry(5);
        assert!(entry.is_claimable(now, timeout));

        entry.mark_processing(now);
        assert!(!entry.is_claimable(now, timeout));
        assert!(entry.is_claimable(now + chrono::Duration::seconds(31), timeout));

        entry.mark_failed("x", &RetryPolicy::fixed(Duration::from_secs(10)), now);
        assert!(!entry.is_claimable(now, timeout));
        assert!(entry.is_claimable(now + chrono::Duration::seconds(10), timeout));

        entry.mark_sent(now);
        assert!(!entry.is_claimable(now + chrono::Duration::days(1), timeout));
    }

    #[test]
    fn reset_requires_dead() {
        let now = Utc::now();
        let mut entry = test_entry(1);
        let before = entry.clone();

        let err = entry.reset_for_retry(now).unwrap_err();
        assert!(matches!(err, OutboxError::NotDead { status: OutboxStatus::Pending, .. }));
        assert_eq!(entry, before);

        entry.mark_failed("x", &RetryPolicy::default(), now);
        assert_eq!(entry.status, OutboxStatus::Dead);
        entry.reset_for_retry(now).unwrap();
        assert_eq!(entry.status, OutboxStatus::Pending);
        assert_eq!(entry.retry_count, 0);
        assert_eq!(entry.last_error, None);
    }

    #[test]
    fn wire_shape_uses_camel_case_and_upper_status() {
        let entry = test_entry(5);
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["status"], "PENDING");
        assert_eq!(json["retryCount"], 0);
        assert_eq!(json["maxRetries"], 5);
        assert!(json.get("lastError").is_some());
        assert!(json.get("claimId").is_none());
        assert_eq!(OutboxStatus::parse("DEAD"), Some(OutboxStatus::Dead));
    }
}
