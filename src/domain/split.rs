//! Commission split between an organization and a beneficiary.
//!
//! Pure and deterministic: the same inputs always produce the same amounts, which is
//! what lets a replayed settlement reconcile exactly against an existing ledger entry.

use bigdecimal::BigDecimal;
use serde::Serialize;
use thiserror::Error;

/// Minor-unit precision of every settled amount.
pub const CURRENCY_SCALE: i64 = 2;
pub const MAX_CUT_PERCENTAGE: i64 = 30;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SplitError {
    #[error("base amount must not be negative, got {0}")]
    NegativeBase(BigDecimal),

    #[error("base amount {0} has more precision than the currency allows")]
    SubMinorUnit(BigDecimal),

    #[error("cut percentage must be between 0 and 30, got {0}")]
    PercentageOutOfRange(BigDecimal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Split {
    pub organization_amount: BigDecimal,
    pub beneficiary_amount: BigDecimal,
}

/// Splits `base_amount` so that the organization receives `cut_percentage` percent,
/// rounded half-up to cents, and the beneficiary receives the exact remainder.
pub fn split(base_amount: &BigDecimal, cut_percentage: &BigDecimal) -> Result<Split, SplitError> {
    let zero = BigDecimal::from(0);

    if base_amount < &zero {
        return Err(SplitError::NegativeBase(base_amount.clone()));
    }
    if &base_amount.with_scale(CURRENCY_SCALE) != base_amount {
        return Err(SplitError::SubMinorUnit(base_amount.clone()));
    }
    validate_cut_percentage(cut_percentage)?;

    let base = base_amount.with_scale(CURRENCY_SCALE);
    if cut_percentage == &zero {
        return Ok(Split {
            organization_amount: zero.with_scale(CURRENCY_SCALE),
            beneficiary_amount: base,
        });
    }

    let raw = &base * cut_percentage / BigDecimal::from(100);
    let organization_amount = round_half_up(&raw);
    let beneficiary_amount = (&base - &organization_amount).with_scale(CURRENCY_SCALE);

    Ok(Split {
        organization_amount,
        beneficiary_amount,
    })
}

pub fn validate_cut_percentage(cut_percentage: &BigDecimal) -> Result<(), SplitError> {
    if cut_percentage < &BigDecimal::from(0) || cut_percentage > &BigDecimal::from(MAX_CUT_PERCENTAGE) {
        return Err(SplitError::PercentageOutOfRange(cut_percentage.clone()));
    }
    Ok(())
}

// Only called with non-negative values, where truncation is a floor.
fn round_half_up(value: &BigDecimal) -> BigDecimal {
    let half_minor_unit = BigDecimal::from(5) / BigDecimal::from(1000);
    (value + half_minor_unit).with_scale(CURRENCY_SCALE)
}
