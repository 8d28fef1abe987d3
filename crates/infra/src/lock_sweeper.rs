//! Expires stock locks whose deadline has passed.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use tradeflow_inventory::{InventoryCommand, InventoryItem, ReleaseLock};

use crate::inventory_service::{InventoryService, InventoryServiceError};
use crate::persistence::{AggregateReader, StoredAggregate, UnitOfWork};
use crate::workers::PeriodicTask;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockSweeperConfig {
    pub name: String,
    pub interval: Duration,
    /// Maximum items inspected per sweep.
    pub batch_size: usize,
}

impl Default for LockSweeperConfig {
    fn default() -> Self {
        Self {
            name: "lock-sweeper".to_string(),
            interval: Duration::from_secs(60),
            batch_size: 100,
        }
    }
}

impl LockSweeperConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }
}

/// Counters for one sweep (or, from [`LockSweeper::totals`], all sweeps).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepStats {
    /// Expired active locks found.
    pub found: usize,
    /// Locks this sweep expired.
    pub released: usize,
    /// Locks another path released first.
    pub skipped: usize,
    /// Releases that errored; retried next sweep.
    pub failed: usize,
}

impl SweepStats {
    fn add(&mut self, other: SweepStats) {
        self.found += other.found;
        self.released += other.released;
        self.skipped += other.skipped;
        self.failed += other.failed;
    }
}

/// Periodic lock expiry.
///
/// Uses the same conditional release as an order cancellation: a lock is
/// released once, by whichever path gets there first.
pub struct LockSweeper<D> {
    inventory: Arc<InventoryService<D>>,
    config: LockSweeperConfig,
    totals: Mutex<SweepStats>,
}

impl<D> LockSweeper<D>
where
    D: UnitOfWork + AggregateReader,
{
    pub fn new(inventory: Arc<InventoryService<D>>, config: LockSweeperConfig) -> Self {
        Self {
            inventory,
            config,
            totals: Mutex::new(SweepStats::default()),
        }
    }

    pub fn totals(&self) -> SweepStats {
        *self
            .totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Expire every active lock due at `now` on up to `batch_size` items.
    ///
    /// Only the lookup of due items can fail the sweep; per-lock failures are
    /// counted and left for the next run.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<SweepStats, InventoryServiceError> {
        let rows = self.inventory.database().find_due(
            InventoryItem::AGGREGATE_TYPE,
            now,
            self.config.batch_size,
        )?;

        let mut stats = SweepStats::default();
        for row in rows {
            let item = match InventoryItem::from_row(&row) {
                Ok(item) => item,
                Err(err) => {
                    stats.failed += 1;
                    error!(item_id = %row.aggregate_id, error = %err, "unreadable inventory row");
                    continue;
                }
            };

            let tenant_id = row.tenant_id;
            let due: Vec<String> = item
                .expired_locks(now)
                .map(|lock| lock.reference.clone())
                .collect();
            stats.found += due.len();

            for reference in due {
                let result = self.inventory.execute_on(tenant_id, item.id_typed(), |_| {
                    InventoryCommand::ExpireLock(ReleaseLock {
                        tenant_id,
                        reference: reference.clone(),
                        occurred_at: now,
                    })
                });
                match result {
                    Ok(Some(applied)) if applied.changed() => stats.released += 1,
                    Ok(_) => stats.skipped += 1,
                    Err(err) => {
                        stats.failed += 1;
                        warn!(
                            item_id = %item.id_typed().0,
                            lock_reference = %reference,
                            error = %err,
                            "failed to expire stock lock"
                        );
                    }
                }
            }
        }

        self.totals
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .add(stats);

        if stats.found > 0 {
            info!(
                found = stats.found,
                released = stats.released,
                skipped = stats.skipped,
                failed = stats.failed,
                "lock sweep finished"
            );
        }
        Ok(stats)
    }
}

impl<D> PeriodicTask for LockSweeper<D>
where
    D: UnitOfWork + AggregateReader + 'static,
{
    fn name(&self) -> &str {
        &self.config.name
    }

    fn interval(&self) -> Duration {
        self.config.interval
    }

    fn run_once(&self) -> anyhow::Result<()> {
        self.sweep(Utc::now())?;
        Ok(())
    }
}
