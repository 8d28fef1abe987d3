//! Value objects: equality by value, not identity.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Marker trait for value objects.
///
/// Value objects are **immutable** and **compared by value**; to "modify" one,
/// build a new one.
pub trait ValueObject: Clone + PartialEq + core::fmt::Debug {}

/// Round a monetary amount to 2 decimal places (half away from zero).
pub fn round_money(amount: Decimal) -> Decimal {
    amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}

/// Round a quantity to 4 decimal places (half away from zero).
pub fn round_quantity(quantity: Decimal) -> Decimal {
    quantity.round_dp_with_strategy(4, RoundingStrategy::MidpointAwayFromZero)
}

/// Transaction unit → base (inventory) unit conversion.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitConversion {
    pub unit: String,
    pub base_unit: String,
    pub rate: Decimal,
}

impl UnitConversion {
    pub fn new(
        unit: impl Into<String>,
        base_unit: impl Into<String>,
        rate: Decimal,
    ) -> DomainResult<Self> {
        let unit = unit.into();
        let base_unit = base_unit.into();
        if unit.trim().is_empty() {
            return Err(DomainError::validation("INVALID_UNIT", "unit cannot be empty"));
        }
        if base_unit.trim().is_empty() {
            return Err(DomainError::validation(
                "INVALID_BASE_UNIT",
                "base unit cannot be empty",
            ));
        }
        if rate <= Decimal::ZERO {
            return Err(DomainError::validation(
                "INVALID_CONVERSION_RATE",
                "conversion rate must be positive",
            ));
        }
        Ok(Self {
            unit,
            base_unit,
            rate,
        })
    }

    /// Identity conversion (unit == base unit).
    pub fn base(unit: impl Into<String>) -> Self {
        let unit = unit.into();
        Self {
            base_unit: unit.clone(),
            unit,
            rate: Decimal::ONE,
        }
    }

    pub fn to_base(&self, quantity: Decimal) -> Decimal {
        round_quantity(quantity * self.rate)
    }
}

impl ValueObject for UnitConversion {}

/// Header totals derived from line amounts.
///
/// Invariant: `payable = total - discount >= 0`; the discount is clamped to the
/// total whenever lines shrink underneath it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct LineAmounts {
    pub total: Decimal,
    pub discount: Decimal,
    pub payable: Decimal,
}

impl LineAmounts {
    pub fn compute(amounts: impl IntoIterator<Item = Decimal>, discount: Decimal) -> Self {
        let total = round_money(amounts.into_iter().sum());
        let discount = discount.max(Decimal::ZERO).min(total);
        Self {
            total,
            discount,
            payable: total - discount,
        }
    }
}

impl ValueObject for LineAmounts {}
