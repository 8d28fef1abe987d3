//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Keep this focused on deterministic, business/domain failures (validation,
/// invariants, conflicts). Infrastructure concerns belong elsewhere.
///
/// Every variant maps to a stable code via [`DomainError::code`] so callers can
/// tell which rule rejected the request without parsing the message.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// A value failed validation (e.g. malformed input).
    #[error("validation failed ({code}): {message}")]
    Validation { code: &'static str, message: String },

    /// A domain invariant was violated.
    #[error("invariant violated ({code}): {message}")]
    InvariantViolation { code: &'static str, message: String },

    /// The current status does not permit the requested transition.
    #[error("invalid transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },

    /// A quantity-consuming operation would exceed what remains.
    #[error("quantity exceeded: {0}")]
    QuantityExceeded(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A requested resource was not found (domain-level).
    #[error("not found")]
    NotFound,

    /// A conflict occurred (e.g. stale version / optimistic concurrency).
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(code: &'static str, msg: impl Into<String>) -> Self {
        Self::Validation {
            code,
            message: msg.into(),
        }
    }

    pub fn invariant(code: &'static str, msg: impl Into<String>) -> Self {
        Self::InvariantViolation {
            code,
            message: msg.into(),
        }
    }

    pub fn transition(from: impl core::fmt::Debug, to: impl core::fmt::Debug) -> Self {
        Self::InvalidTransition {
            from: format!("{from:?}"),
            to: format!("{to:?}"),
        }
    }

    pub fn quantity_exceeded(msg: impl Into<String>) -> Self {
        Self::QuantityExceeded(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found() -> Self {
        Self::NotFound
    }

    /// Stable, machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::Validation { code, .. } => code,
            DomainError::InvariantViolation { code, .. } => code,
            DomainError::InvalidTransition { .. } => "INVALID_STATE",
            DomainError::QuantityExceeded(_) => "QUANTITY_EXCEEDED",
            DomainError::InvalidId(_) => "INVALID_ID",
            DomainError::NotFound => "NOT_FOUND",
            DomainError::Conflict(_) => "CONFLICT",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    enum Status {
        Draft,
        Shipped,
    }

    #[test]
    fn codes_identify_the_failed_rule() {
        assert_eq!(DomainError::validation("NO_ITEMS", "empty").code(), "NO_ITEMS");
        assert_eq!(DomainError::transition(Status::Draft, Status::Shipped).code(), "INVALID_STATE");
        assert_eq!(DomainError::quantity_exceeded("x").code(), "QUANTITY_EXCEEDED");
        assert_eq!(DomainError::conflict("stale").code(), "CONFLICT");
    }

    #[test]
    fn transition_message_names_both_states() {
        let err = DomainError::transition(Status::Draft, Status::Shipped);
        assert_eq!(err.to_string(), "invalid transition from Draft to Shipped");
    }
}
