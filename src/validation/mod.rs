use bigdecimal::BigDecimal;
use std::fmt;

use crate::domain::split::CURRENCY_SCALE;

pub const CURRENCY_CODE_LEN: usize = 3;
pub const PAYMENT_REFERENCE_MAX_LEN: usize = 255;
pub const DONATION_NUMBER_LEN: usize = 21;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

impl std::error::Error for ValidationError {}

pub type ValidationResult = Result<(), ValidationError>;

pub fn sanitize_string(value: &str) -> String {
    value
        .chars()
        .filter(|ch| !ch.is_control())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn validate_required(field: &'static str, value: &str) -> ValidationResult {
    if value.trim().is_empty() {
        return Err(ValidationError::new(field, "must not be empty"));
    }

    Ok(())
}

pub fn validate_max_len(field: &'static str, value: &str, max_len: usize) -> ValidationResult {
    if value.len() > max_len {
        return Err(ValidationError::new(
            field,
            format!("must be at most {} characters", max_len),
        ));
    }

    Ok(())
}

/// ISO 4217 style: three uppercase ASCII letters.
pub fn validate_currency_code(currency: &str) -> ValidationResult {
    validate_required("currency", currency)?;

    if currency.len() != CURRENCY_CODE_LEN || !currency.chars().all(|ch| ch.is_ascii_uppercase()) {
        return Err(ValidationError::new(
            "currency",
            "must be three uppercase letters",
        ));
    }

    Ok(())
}

pub fn validate_positive_amount(amount: &BigDecimal) -> ValidationResult {
    if amount <= &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must be greater than zero"));
    }

    Ok(())
}

pub fn validate_non_negative_amount(amount: &BigDecimal) -> ValidationResult {
    if amount < &BigDecimal::from(0) {
        return Err(ValidationError::new("amount", "must not be negative"));
    }

    Ok(())
}

/// Money must be expressible in whole minor units.
pub fn validate_minor_units(amount: &BigDecimal) -> ValidationResult {
    if amount.with_scale(CURRENCY_SCALE) != *amount {
        return Err(ValidationError::new(
            "amount",
            format!("must have at most {} decimal places", CURRENCY_SCALE),
        ));
    }

    Ok(())
}

pub fn validate_payment_reference(reference: &str) -> ValidationResult {
    validate_required("payment_reference", reference)?;
    validate_max_len("payment_reference", reference, PAYMENT_REFERENCE_MAX_LEN)?;

    if reference.chars().any(|ch| ch.is_whitespace() || ch.is_control()) {
        return Err(ValidationError::new(
            "payment_reference",
            "must not contain whitespace",
        ));
    }

    Ok(())
}

/// `DON-YYYYMMDD-XXXXXXXX` with an uppercase hex suffix.
pub fn validate_donation_number(donation_number: &str) -> ValidationResult {
    let malformed = || ValidationError::new("donation_number", "must look like DON-YYYYMMDD-XXXXXXXX");

    if donation_number.len() != DONATION_NUMBER_LEN {
        return Err(malformed());
    }

    let mut parts = donation_number.split('-');
    let (Some("DON"), Some(date), Some(suffix), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(malformed());
    };

    if date.len() != 8 || !date.chars().all(|ch| ch.is_ascii_digit()) {
        return Err(malformed());
    }
    if suffix.len() != 8 || !suffix.chars().all(|ch| ch.is_ascii_digit() || ('A'..='F').contains(&ch)) {
        return Err(malformed());
    }

    Ok(())
}
