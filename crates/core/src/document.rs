//! Shared validation for order/return documents and their lines.

use rust_decimal::Decimal;

use crate::error::{DomainError, DomainResult};

/// Maximum length of a document number (order or return number).
pub const MAX_DOCUMENT_NUMBER_LEN: usize = 50;

/// Non-empty and at most [`MAX_DOCUMENT_NUMBER_LEN`] characters after trimming.
pub fn validate_document_number(number: &str, code: &'static str) -> DomainResult<()> {
    let number = number.trim();
    if number.is_empty() {
        return Err(DomainError::validation(code, "document number cannot be empty"));
    }
    if number.chars().count() > MAX_DOCUMENT_NUMBER_LEN {
        return Err(DomainError::validation(
            code,
            format!("document number cannot exceed {MAX_DOCUMENT_NUMBER_LEN} characters"),
        ));
    }
    Ok(())
}

pub fn validate_party_name(name: &str, code: &'static str) -> DomainResult<()> {
    if name.trim().is_empty() {
        return Err(DomainError::validation(code, "name cannot be empty"));
    }
    Ok(())
}

/// A line needs a product name, a positive quantity and a non-negative price.
pub fn validate_line(product_name: &str, quantity: Decimal, unit_price: Decimal) -> DomainResult<()> {
    if product_name.trim().is_empty() {
        return Err(DomainError::validation(
            "INVALID_PRODUCT_NAME",
            "product name cannot be empty",
        ));
    }
    if quantity <= Decimal::ZERO {
        return Err(DomainError::validation("INVALID_QUANTITY", "quantity must be positive"));
    }
    if unit_price < Decimal::ZERO {
        return Err(DomainError::validation("INVALID_PRICE", "unit price cannot be negative"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn document_number_length_is_bounded() {
        assert!(validate_document_number(&"A".repeat(50), "INVALID_NUMBER").is_ok());
        let err = validate_document_number(&"A".repeat(51), "INVALID_NUMBER").unwrap_err();
        assert_eq!(err.code(), "INVALID_NUMBER");
        assert!(validate_document_number("   ", "INVALID_NUMBER").is_err());
    }

    #[test]
    fn line_rules() {
        assert!(validate_line("Widget", dec!(1), Decimal::ZERO).is_ok());
        assert_eq!(
            validate_line(" ", dec!(1), dec!(1)).unwrap_err().code(),
            "INVALID_PRODUCT_NAME"
        );
        assert_eq!(
            validate_line("Widget", Decimal::ZERO, dec!(1)).unwrap_err().code(),
            "INVALID_QUANTITY"
        );
        assert_eq!(
            validate_line("Widget", dec!(1), dec!(-0.01)).unwrap_err().code(),
            "INVALID_PRICE"
        );
    }
}
