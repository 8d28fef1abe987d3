use thiserror::Error;

use crate::persistence::PersistenceError;

use super::entry::{OutboxId, OutboxStatus};

/// Outbox error (decode failures and operator-facing errors).
#[derive(Debug, Error)]
pub enum OutboxError {
    #[error("outbox entry not found: {0}")]
    NotFound(OutboxId),

    /// Operator retry on an entry that is not dead-lettered.
    #[error("outbox entry {id} is {status}, not DEAD")]
    NotDead { id: OutboxId, status: OutboxStatus },

    #[error("invalid page request: {0}")]
    InvalidPage(String),

    #[error("failed to decode {event_type}: {message}")]
    Decode { event_type: String, message: String },

    #[error("no decoder registered for event type '{0}'")]
    UnknownEventType(String),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}
