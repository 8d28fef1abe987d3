//! Outbox processor: claim, decode, publish, record the outcome.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use tradeflow_events::{Event, EventBus};

use crate::persistence::PersistenceError;
use crate::workers::PeriodicTask;

use super::entry::{OutboxEntry, OutboxStatus};
use super::registry::EventRegistry;
use super::repository::OutboxRepository;
use super::retry::{BackoffStrategy, RetryPolicy};

/// Outbox processor configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboxProcessorConfig {
    /// Name for logging and the worker thread.
    pub name: String,
    /// Maximum rows claimed per run.
    pub batch_size: usize,
    /// Sleep between runs.
    pub poll_interval: Duration,
    /// Delivery budget stamped on new rows.
    pub max_retries: u32,
    /// Backoff base.
    pub retry_delay: Duration,
    /// Backoff cap.
    pub max_retry_delay: Duration,
    pub backoff: BackoffStrategy,
    /// Age after which a PROCESSING claim is considered abandoned.
    pub processing_timeout: Duration,
}

impl Default for OutboxProcessorConfig {
    fn default() -> Self {
        Self {
            name: "outbox-processor".to_string(),
            batch_size: 100,
            poll_interval: Duration::from_secs(5),
            max_retries: 5,
            retry_delay: Duration::from_secs(1),
            max_retry_delay: Duration::from_secs(300),
            backoff: BackoffStrategy::Linear,
            processing_timeout: Duration::from_secs(30),
        }
    }
}

impl OutboxProcessorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// At least one delivery attempt is always made.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries.max(1);
        self
    }

    pub fn with_retry_delay(mut self, base: Duration, max: Duration) -> Self {
        self.retry_delay = base;
        self.max_retry_delay = max;
        self
    }

    pub fn with_backoff(mut self, backoff: BackoffStrategy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_processing_timeout(mut self, timeout: Duration) -> Self {
        self.processing_timeout = timeout;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            base_delay: self.retry_delay,
            max_delay: self.max_retry_delay,
            strategy: self.backoff,
        }
    }

    fn processing_timeout_chrono(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.processing_timeout)
            .unwrap_or_else(|_| chrono::Duration::days(365))
    }
}

/// Cumulative processor counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProcessorStats {
    pub runs: u64,
    pub claimed: u64,
    pub sent: u64,
    pub failed: u64,
    pub dead_lettered: u64,
    pub claim_errors: u64,
}

/// Outcome of a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchReport {
    pub claimed: usize,
    pub sent: usize,
    /// Rows moved to FAILED (will be retried).
    pub failed: usize,
    /// Rows moved to DEAD.
    pub dead: usize,
    /// Outcomes not recorded because another processor took the row over.
    pub lost: usize,
}

/// Delivers outbox rows to the event bus.
///
/// At-least-once: a row is marked SENT only after the bus accepted it, so a
/// crash in between redelivers. Handlers must be idempotent.
pub struct OutboxProcessor<R, B, M: Event> {
    repository: R,
    bus: B,
    registry: Arc<EventRegistry<M>>,
    config: OutboxProcessorConfig,
    stats: Mutex<ProcessorStats>,
}

impl<R, B, M> OutboxProcessor<R, B, M>
where
    R: OutboxRepository,
    B: EventBus<M>,
    M: Event,
{
    pub fn new(
        repository: R,
        bus: B,
        registry: Arc<EventRegistry<M>>,
        config: OutboxProcessorConfig,
    ) -> Self {
        Self {
            repository,
            bus,
            registry,
            config,
            stats: Mutex::new(ProcessorStats::default()),
        }
    }

    pub fn config(&self) -> &OutboxProcessorConfig {
        &self.config
    }

    pub fn stats(&self) -> ProcessorStats {
        self.stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Claim up to `batch_size` rows and deliver each one.
    ///
    /// Only a failed claim aborts the run. A row that fails to decode or
    /// publish is marked FAILED (or DEAD) and the batch carries on.
    pub fn process_batch(&self, now: DateTime<Utc>) -> Result<BatchReport, PersistenceError> {
        let claimed = match self.repository.claim_batch(
            self.config.batch_size,
            now,
            self.config.processing_timeout_chrono(),
        ) {
            Ok(claimed) => claimed,
            Err(err) => {
                self.update_stats(|s| {
                    s.runs += 1;
                    s.claim_errors += 1;
                });
                error!(processor = %self.config.name, error = %err, "outbox claim failed");
                return Err(err);
            }
        };

        let mut report = BatchReport {
            claimed: claimed.len(),
            ..BatchReport::default()
        };
        let policy = self.config.retry_policy();

        for mut entry in claimed {
            self.deliver(&mut entry, &policy, now);

            match self.repository.record_outcome(&entry) {
                Ok(true) => match entry.status {
                    OutboxStatus::Sent => report.sent += 1,
                    OutboxStatus::Failed => report.failed += 1,
                    OutboxStatus::Dead => report.dead += 1,
                    OutboxStatus::Pending | OutboxStatus::Processing => {}
                },
                Ok(false) => {
                    report.lost += 1;
                    warn!(
                        outbox_id = %entry.id,
                        event_type = %entry.event_type,
                        "claim lost before outcome was recorded"
                    );
                }
                Err(err) => {
                    // Row stays PROCESSING and is reclaimed after the timeout.
                    report.lost += 1;
                    error!(outbox_id = %entry.id, error = %err, "failed to record outbox outcome");
                }
            }
        }

        self.update_stats(|s| {
            s.runs += 1;
            s.claimed += report.claimed as u64;
            s.sent += report.sent as u64;
            s.failed += report.failed as u64;
            s.dead_lettered += report.dead as u64;
        });

        if report.claimed > 0 {
            info!(
                processor = %self.config.name,
                claimed = report.claimed,
                sent = report.sent,
                failed = report.failed,
                dead = report.dead,
                "outbox batch processed"
            );
        }
        Ok(report)
    }

    fn deliver(&self, entry: &mut OutboxEntry, policy: &RetryPolicy, now: DateTime<Utc>) {
        let outcome = self
            .registry
            .decode(entry)
            .map_err(|e| e.to_string())
            .and_then(|envelope| {
                self.bus
                    .publish(std::slice::from_ref(&envelope))
                    .map_err(|e| e.to_string())
            });

        match outcome {
            Ok(dispatch) => {
                entry.mark_sent(now);
                debug!(
                    outbox_id = %entry.id,
                    event_type = %entry.event_type,
                    delivered = dispatch.delivered,
                    handler_failures = dispatch.failed,
                    "outbox entry sent"
                );
            }
            Err(reason) => {
                entry.mark_failed(reason.clone(), policy, now);
                if entry.status == OutboxStatus::Dead {
                    error!(
                        outbox_id = %entry.id,
                        event_type = %entry.event_type,
                        retry_count = entry.retry_count,
                        error = %reason,
                        "outbox entry dead-lettered"
                    );
                } else {
                    warn!(
                        outbox_id = %entry.id,
                        event_type = %entry.event_type,
                        retry_count = entry.retry_count,
                        next_retry_at = ?entry.next_retry_at,
                        error = %reason,
                        "outbox delivery failed, will retry"
                    );
                }
            }
        }
    }

    fn update_stats(&self, f: impl FnOnce(&mut ProcessorStats)) {
        let mut stats = self
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&mut stats);
    }
}

impl<R, B, M> PeriodicTask for OutboxProcessor<R, B, M>
where
    R: OutboxRepository + 'static,
    B: EventBus<M> + 'static,
    M: Event,
{
    fn name(&self) -> &str {
        &self.config.name
    }

    fn interval(&self) -> Duration {
        self.config.poll_interval
    }

    fn run_once(&self) -> anyhow::Result<()> {
        self.process_batch(Utc::now())?;
        Ok(())
    }
}

impl<R, B, M: Event> core::fmt::Debug for OutboxProcessor<R, B, M> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("OutboxProcessor")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbox::{OutboxEntry, TradeEvent};
    use crate::persistence::{InMemoryDatabase, Transaction, UnitOfWork};
    use tradeflow_core::{AggregateId, TenantId};
    use tradeflow_events::InMemoryEventBus;
    use tradeflow_sales::{OrderCancelled, SalesOrderEvent, SalesOrderId};
    use uuid::Uuid;

    fn test_tenant() -> TenantId {
        TenantId::new()
    }

    fn cancelled_entry(event_type: &str, max_retries: u32, now: DateTime<Utc>) -> OutboxEntry {
        let tenant_id = test_tenant();
        let event = SalesOrderEvent::OrderCancelled(OrderCancelled {
            tenant_id,
            order_id: SalesOrderId(AggregateId::new()),
            order_number: "SO-0001".to_string(),
            warehouse_id: None,
            items: vec![],
            reason: "test".to_string(),
            was_confirmed: false,
            occurred_at: now,
        });
        OutboxEntry::new(
            tenant_id,
            Uuid::now_v7(),
            event_type,
            AggregateId::new(),
            "sales_order",
            1,
            serde_json::to_value(&event).unwrap(),
            max_retries,
            now,
        )
    }

    fn seed(db: &InMemoryDatabase, entries: &[OutboxEntry]) {
        let mut tx = db.begin().unwrap();
        tx.insert_outbox(entries).unwrap();
        tx.commit().unwrap();
    }

    fn processor(
        db: &InMemoryDatabase,
        bus: Arc<InMemoryEventBus<TradeEvent>>,
    ) -> OutboxProcessor<InMemoryDatabase, Arc<InMemoryEventBus<TradeEvent>>, TradeEvent> {
        OutboxProcessor::new(
            db.clone(),
            bus,
            Arc::new(EventRegistry::trade()),
            OutboxProcessorConfig::default().with_retry_delay(Duration::ZERO, Duration::ZERO),
        )
    }

    #[test]
    fn sends_decodable_rows() {
        let db = InMemoryDatabase::new();
        let bus = Arc::new(InMemoryEventBus::new());
        bus.start().unwrap();
        let now = Utc::now();
        seed(&db, &[cancelled_entry(SalesOrderEvent::CANCELLED, 3, now)]);

        let report = processor(&db, bus).process_batch(now).unwrap();

        assert_eq!(report.claimed, 1);
        assert_eq!(report.sent, 1);
        let stored = &db.outbox_entries().unwrap()[0];
        assert_eq!(stored.status, OutboxStatus::Sent);
        assert!(stored.processed_at.is_some());
    }

    #[test]
    fn one_bad_row_does_not_block_the_batch() {
        let db = InMemoryDatabase::new();
        let bus = Arc::new(InMemoryEventBus::new());
        bus.start().unwrap();
        let now = Utc::now();
        seed(
            &db,
            &[
                cancelled_entry("sales.order.unknown", 3, now),
                cancelled_entry(SalesOrderEvent::CANCELLED, 3, now),
            ],
        );

        let report = processor(&db, bus).process_batch(now).unwrap();

        assert_eq!(report.sent, 1);
        assert_eq!(report.failed, 1);
        let entries = db.outbox_entries().unwrap();
        assert_eq!(entries[0].status, OutboxStatus::Failed);
        assert_eq!(entries[0].retry_count, 1);
        assert!(entries[0].last_error.as_deref().unwrap().contains("sales.order.unknown"));
        assert_eq!(entries[1].status, OutboxStatus::Sent);
    }

    #[test]
    fn stopped_bus_exhausts_retries_into_dead() {
        let db = InMemoryDatabase::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let now = Utc::now();
        seed(&db, &[cancelled_entry(SalesOrderEvent::CANCELLED, 2, now)]);
        let p = processor(&db, bus);

        let first = p.process_batch(now).unwrap();
        assert_eq!(first.failed, 1);
        let second = p.process_batch(now).unwrap();
        assert_eq!(second.dead, 1);
        let third = p.process_batch(now).unwrap();
        assert_eq!(third.claimed, 0);

        let entry = &db.outbox_entries().unwrap()[0];
        assert_eq!(entry.status, OutboxStatus::Dead);
        assert_eq!(entry.retry_count, 2);
        assert!(entry.next_retry_at.is_none());

        let stats = p.stats();
        assert_eq!(stats.runs, 3);
        assert_eq!(stats.claimed, 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.dead_lettered, 1);
    }

    #[test]
    fn failed_row_waits_for_backoff() {
        let db = InMemoryDatabase::new();
        let bus = Arc::new(InMemoryEventBus::new());
        let now = Utc::now();
        seed(&db, &[cancelled_entry(SalesOrderEvent::CANCELLED, 5, now)]);
        let p = OutboxProcessor::new(
            db.clone(),
            Arc::clone(&bus),
            Arc::new(EventRegistry::trade()),
            OutboxProcessorConfig::default()
                .with_retry_delay(Duration::from_secs(10), Duration::from_secs(60)),
        );

        p.process_batch(now).unwrap();
        bus.start().unwrap();

        assert_eq!(p.process_batch(now).unwrap().claimed, 0);
        let later = now + chrono::Duration::seconds(11);
        assert_eq!(p.process_batch(later).unwrap().sent, 1);
    }

    #[test]
    fn config_builders_apply() {
        let config = OutboxProcessorConfig::default()
            .with_name("primary")
            .with_batch_size(0)
            .with_max_retries(7)
            .with_backoff(BackoffStrategy::Exponential)
            .with_processing_timeout(Duration::from_secs(90));

        assert_eq!(config.name, "primary");
        assert_eq!(config.batch_size, 1);
        assert_eq!(config.max_retries, 7);
        assert_eq!(OutboxProcessorConfig::default().with_max_retries(0).max_retries, 1);
        assert_eq!(config.retry_policy().strategy, BackoffStrategy::Exponential);
        assert_eq!(config.processing_timeout, Duration::from_secs(90));
    }
}
