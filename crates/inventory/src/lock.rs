use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::item::StockSource;

/// Stock reserved for one source document line.
///
/// An item only holds its active locks. Unlock, expiry and deduction each
/// remove the lock, so whichever arrives second finds nothing to release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockLock {
    pub reference: String,
    pub quantity: Decimal,
    pub source: StockSource,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl StockLock {
    pub fn new(
        reference: String,
        quantity: Decimal,
        source: StockSource,
        expires_at: DateTime<Utc>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            reference,
            quantity,
            source,
            expires_at,
            created_at,
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}
