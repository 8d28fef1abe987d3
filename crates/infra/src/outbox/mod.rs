//! Transactional outbox.
//!
//! Events emitted by an aggregate are written as outbox rows in the same
//! transaction as the aggregate state ([`OutboxPublisher`]). The
//! [`OutboxProcessor`] later claims those rows, decodes them through the
//! [`EventRegistry`] and hands them to the event bus, retrying with backoff
//! and dead-lettering after `max_retries` attempts. [`OutboxAdmin`] is the
//! operator surface over dead rows.
//!
//! Row lifecycle:
//!
//! ```text
//! PENDING -> PROCESSING -> SENT
//!                 |
//!                 +-> FAILED -> PROCESSING -> ...
//!                 +-> DEAD   -> PENDING (operator retry)
//! ```

pub mod admin;
pub mod entry;
pub mod error;
pub mod processor;
pub mod publisher;
pub mod registry;
pub mod repository;
pub mod retry;

pub use admin::{DeadLetterPage, MAX_PAGE_SIZE, OutboxAdmin, OutboxStats};
pub use entry::{OutboxEntry, OutboxId, OutboxStatus};
pub use error::OutboxError;
pub use processor::{BatchReport, OutboxProcessor, OutboxProcessorConfig, ProcessorStats};
pub use publisher::OutboxPublisher;
pub use registry::{EventRegistry, TradeEvent};
pub use repository::OutboxRepository;
pub use retry::{BackoffStrategy, RetryPolicy};
