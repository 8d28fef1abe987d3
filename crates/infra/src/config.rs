//! Pipeline configuration loaded from environment variables.

use std::time::Duration;

use thiserror::Error;

use tradeflow_inventory::InventoryItem;

use crate::lock_sweeper::LockSweeperConfig;
use crate::outbox::OutboxProcessorConfig;
use crate::persistence::PostgresConfig;

pub const DATABASE_URL: &str = "DATABASE_URL";
pub const DATABASE_MAX_CONNECTIONS: &str = "DATABASE_MAX_CONNECTIONS";
pub const DATABASE_ACQUIRE_TIMEOUT_MS: &str = "DATABASE_ACQUIRE_TIMEOUT_MS";
pub const DATABASE_STATEMENT_TIMEOUT_MS: &str = "DATABASE_STATEMENT_TIMEOUT_MS";
pub const OUTBOX_BATCH_SIZE: &str = "OUTBOX_BATCH_SIZE";
pub const OUTBOX_POLL_INTERVAL_MS: &str = "OUTBOX_POLL_INTERVAL_MS";
pub const OUTBOX_MAX_RETRIES: &str = "OUTBOX_MAX_RETRIES";
pub const OUTBOX_RETRY_DELAY_MS: &str = "OUTBOX_RETRY_DELAY_MS";
pub const OUTBOX_MAX_RETRY_DELAY_MS: &str = "OUTBOX_MAX_RETRY_DELAY_MS";
pub const OUTBOX_PROCESSING_TIMEOUT_MS: &str = "OUTBOX_PROCESSING_TIMEOUT_MS";
pub const LOCK_SWEEP_INTERVAL_MS: &str = "LOCK_SWEEP_INTERVAL_MS";
pub const LOCK_SWEEP_BATCH_SIZE: &str = "LOCK_SWEEP_BATCH_SIZE";
pub const STOCK_LOCK_TTL_MINUTES: &str = "STOCK_LOCK_TTL_MINUTES";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: '{value}' ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Everything the worker needs to assemble the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    /// Postgres connection string; `None` runs on the in-memory backend.
    pub database_url: Option<String>,
    pub postgres: PostgresConfig,
    pub outbox: OutboxProcessorConfig,
    pub sweeper: LockSweeperConfig,
    /// How long a confirmed order holds its stock before the sweeper may
    /// expire the lock.
    pub lock_ttl: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            postgres: PostgresConfig::default(),
            outbox: OutboxProcessorConfig::default(),
            sweeper: LockSweeperConfig::default(),
            lock_ttl: Duration::from_secs(InventoryItem::DEFAULT_LOCK_TTL_MINUTES as u64 * 60),
        }
    }
}

impl PipelineConfig {
    /// Read from the process environment. Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Read through `lookup` (key -> value).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self {
            database_url: lookup(DATABASE_URL).filter(|url| !url.trim().is_empty()),
            ..Self::default()
        };

        if let Some(n) = parse::<usize>(&lookup, DATABASE_MAX_CONNECTIONS)? {
            let n = positive(DATABASE_MAX_CONNECTIONS, n)?;
            config.postgres = config
                .postgres
                .with_max_connections(u32::try_from(n).unwrap_or(u32::MAX));
        }
        if let Some(d) = nonzero_millis(&lookup, DATABASE_ACQUIRE_TIMEOUT_MS)? {
            config.postgres = config.postgres.with_acquire_timeout(d);
        }
        // Zero would disable the server-side timeout.
        if let Some(d) = nonzero_millis(&lookup, DATABASE_STATEMENT_TIMEOUT_MS)? {
            config.postgres = config.postgres.with_statement_timeout(d);
        }

        if let Some(n) = parse::<usize>(&lookup, OUTBOX_BATCH_SIZE)? {
            config.outbox = config.outbox.with_batch_size(positive(OUTBOX_BATCH_SIZE, n)?);
        }
        if let Some(d) = millis(&lookup, OUTBOX_POLL_INTERVAL_MS)? {
            config.outbox = config.outbox.with_poll_interval(d);
        }
        if let Some(n) = parse::<u32>(&lookup, OUTBOX_MAX_RETRIES)? {
            config.outbox = config.outbox.with_max_retries(n);
        }
        let base = millis(&lookup, OUTBOX_RETRY_DELAY_MS)?.unwrap_or(config.outbox.retry_delay);
        let max = millis(&lookup, OUTBOX_MAX_RETRY_DELAY_MS)?
            .unwrap_or(config.outbox.max_retry_delay);
        config.outbox = config.outbox.with_retry_delay(base, max);
        if let Some(d) = millis(&lookup, OUTBOX_PROCESSING_TIMEOUT_MS)? {
            config.outbox = config.outbox.with_processing_timeout(d);
        }

        if let Some(d) = millis(&lookup, LOCK_SWEEP_INTERVAL_MS)? {
            config.sweeper = config.sweeper.with_interval(d);
        }
        if let Some(n) = parse::<usize>(&lookup, LOCK_SWEEP_BATCH_SIZE)? {
            config.sweeper = config
                .sweeper
                .with_batch_size(positive(LOCK_SWEEP_BATCH_SIZE, n)?);
        }
        if let Some(minutes) = parse::<usize>(&lookup, STOCK_LOCK_TTL_MINUTES)? {
            let minutes = positive(STOCK_LOCK_TTL_MINUTES, minutes)?;
            config.lock_ttl = Duration::from_secs(minutes as u64 * 60);
        }

        Ok(config)
    }

    pub fn with_database_url(mut self, url: impl Into<String>) -> Self {
        self.database_url = Some(url.into());
        self
    }

    pub fn with_postgres(mut self, postgres: PostgresConfig) -> Self {
        self.postgres = postgres;
        self
    }

    pub fn with_outbox(mut self, outbox: OutboxProcessorConfig) -> Self {
        self.outbox = outbox;
        self
    }

    pub fn with_sweeper(mut self, sweeper: LockSweeperConfig) -> Self {
        self.sweeper = sweeper;
        self
    }

    pub fn with_lock_ttl(mut self, lock_ttl: Duration) -> Self {
        self.lock_ttl = lock_ttl;
        self
    }
}

fn parse<T>(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    let Some(raw) = lookup(key) else {
        return Ok(None);
    };
    raw.trim()
        .parse::<T>()
        .map(Some)
        .map_err(|e| ConfigError::Invalid {
            key,
            value: raw.clone(),
            reason: e.to_string(),
        })
}

fn millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(lookup, key)?.map(Duration::from_millis))
}

fn nonzero_millis(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
) -> Result<Option<Duration>, ConfigError> {
    match parse::<u64>(lookup, key)? {
        Some(0) => Err(ConfigError::Invalid {
            key,
            value: "0".to_string(),
            reason: "must be at least 1".to_string(),
        }),
        other => Ok(other.map(Duration::from_millis)),
    }
}

fn positive(key: &'static str, n: usize) -> Result<usize, ConfigError> {
    if n == 0 {
        return Err(ConfigError::Invalid {
            key,
            value: n.to_string(),
            reason: "must be at least 1".to_string(),
        });
    }
    Ok(n)
}
