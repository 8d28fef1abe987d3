//! Aggregate root traits and optimistic concurrency primitives.

use crate::error::{DomainError, DomainResult};

/// Aggregate root marker + minimal interface.
pub trait AggregateRoot {
    /// Strongly-typed aggregate identifier.
    type Id: Clone + Eq + core::hash::Hash + core::fmt::Debug;

    /// Returns the aggregate identifier.
    fn id(&self) -> &Self::Id;

    /// Monotonically increasing version of the aggregate's state.
    ///
    /// Every applied event bumps the version by one, so the version also counts
    /// the transitions the aggregate went through.
    fn version(&self) -> u64;
}

/// Optimistic concurrency expectation for an aggregate.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ExpectedVersion {
    /// Skip version checking.
    Any,
    /// Require the stored aggregate to be at an exact version (0 = not stored yet).
    Exact(u64),
}

impl ExpectedVersion {
    pub fn matches(self, actual: u64) -> bool {
        match self {
            ExpectedVersion::Any => true,
            ExpectedVersion::Exact(v) => v == actual,
        }
    }

    pub fn check(self, actual: u64) -> DomainResult<()> {
        if self.matches(actual) {
            Ok(())
        } else {
            Err(DomainError::conflict(format!(
                "optimistic concurrency check failed (expected: {self:?}, actual: {actual})"
            )))
        }
    }
}

/// Aggregate execution semantics (pure, deterministic).
///
/// - **Decision logic**: `handle(&self, cmd)` validates and returns events.
/// - **State mutation**: `apply(&mut self, event)` evolves state.
///
/// Because `handle` never mutates, a rejected command leaves status, version and
/// items exactly as they were.
pub trait Aggregate: AggregateRoot {
    type Command: Clone + core::fmt::Debug;
    type Event: Clone + core::fmt::Debug;
    type Error: core::fmt::Debug;

    /// Evolve in-memory state from a single event (+1 version).
    fn apply(&mut self, event: &Self::Event);

    /// Decide which events to emit given the current state and a command.
    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error>;
}

/// Aggregates that buffer emitted events until the caller persists them.
///
/// The buffer is only cleared through [`PendingEvents::mark_persisted`], which
/// the persistence layer calls after a successful commit.
pub trait PendingEvents: Aggregate {
    fn pending_events(&self) -> &[Self::Event];

    fn push_pending(&mut self, event: Self::Event);

    fn mark_persisted(&mut self);

    /// Version the aggregate had in storage before the pending events.
    fn persisted_version(&self) -> u64 {
        self.version()
            .saturating_sub(self.pending_events().len() as u64)
    }

    /// Decide, apply and buffer in one step.
    fn execute(&mut self, command: &Self::Command) -> Result<usize, Self::Error> {
        let events = self.handle(command)?;
        let count = events.len();
        for event in events {
            self.apply(&event);
            self.push_pending(event);
        }
        Ok(count)
    }
}
