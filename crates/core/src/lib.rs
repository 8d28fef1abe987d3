//! `tradeflow-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod aggregate;
pub mod document;
pub mod error;
pub mod id;
pub mod value_object;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion, PendingEvents};
pub use document::{
    MAX_DOCUMENT_NUMBER_LEN, validate_document_number, validate_line, validate_party_name,
};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, PartyId, ProductId, TenantId, UserId, WarehouseId};
pub use value_object::{LineAmounts, UnitConversion, ValueObject, round_money, round_quantity};
