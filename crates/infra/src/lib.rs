//! Infrastructure layer: persistence, the transactional outbox, cross-context
//! handlers, background tasks and pipeline wiring.

pub mod config;
pub mod handlers;
pub mod inventory_service;
pub mod lock_sweeper;
pub mod outbox;
pub mod persistence;
pub mod pipeline;
pub mod workers;

#[cfg(test)]
mod integration_tests;

pub use config::{ConfigError, PipelineConfig};
pub use pipeline::{Pipeline, PipelineError, RunningPipeline, TradeBus};
