//! Organization wallets and their append-only ledger.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Credit,
    Debit,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Credit => "credit",
            Direction::Debit => "debit",
        }
    }

    /// Ledger amounts are signed: credits positive, debits negative.
    pub fn signed(&self, amount: &BigDecimal) -> BigDecimal {
        match self {
            Direction::Credit => amount.clone(),
            Direction::Debit => -amount.clone(),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "credit" => Ok(Direction::Credit),
            "debit" => Ok(Direction::Debit),
            other => Err(format!("unknown ledger direction '{}'", other)),
        }
    }
}

/// Kind of business event a ledger entry originates from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceKind {
    Donation,
    Withdrawal,
    Adjustment,
}

impl ReferenceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReferenceKind::Donation => "donation",
            ReferenceKind::Withdrawal => "withdrawal",
            ReferenceKind::Adjustment => "adjustment",
        }
    }
}

impl fmt::Display for ReferenceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReferenceKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "donation" => Ok(ReferenceKind::Donation),
            "withdrawal" => Ok(ReferenceKind::Withdrawal),
            "adjustment" => Ok(ReferenceKind::Adjustment),
            other => Err(format!("unknown reference kind '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub current_balance: BigDecimal,
    pub total_earnings: BigDecimal,
    pub total_withdrawn: BigDecimal,
    pub currency: String,
    pub last_transaction_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    pub fn empty(organization_id: Uuid, currency: &str) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            organization_id,
            current_balance: BigDecimal::from(0),
            total_earnings: BigDecimal::from(0),
            total_withdrawn: BigDecimal::from(0),
            currency: currency.to_string(),
            last_transaction_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_balanced(&self) -> bool {
        self.current_balance == &self.total_earnings - &self.total_withdrawn
            && self.current_balance >= BigDecimal::from(0)
    }
}

/// Immutable ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    pub id: Uuid,
    pub wallet_id: Uuid,
    pub organization_id: Uuid,
    pub amount: BigDecimal,
    pub direction: Direction,
    pub reference_id: String,
    pub reference_kind: ReferenceKind,
    pub description: String,
    pub status: String,
    pub created_at: DateTime<Utc>,
}

/// Entry to append; `amount` is the unsigned magnitude.
#[derive(Debug, Clone, PartialEq)]
pub struct NewLedgerEntry {
    pub wallet_id: Uuid,
    pub organization_id: Uuid,
    pub amount: BigDecimal,
    pub direction: Direction,
    pub reference_id: String,
    pub reference_kind: ReferenceKind,
    pub description: String,
}

impl NewLedgerEntry {
    pub fn into_transaction(self) -> WalletTransaction {
        WalletTransaction {
            id: Uuid::new_v4(),
            wallet_id: self.wallet_id,
            organization_id: self.organization_id,
            amount: self.direction.signed(&self.amount),
            direction: self.direction,
            reference_id: self.reference_id,
            reference_kind: self.reference_kind,
            description: self.description,
            status: "completed".to_string(),
            created_at: Utc::now(),
        }
    }
}

/// Balance figures of one wallet next to the sum of its ledger entries.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WalletAudit {
    pub wallet_id: Uuid,
    pub organization_id: Uuid,
    pub current_balance: BigDecimal,
    pub total_earnings: BigDecimal,
    pub total_withdrawn: BigDecimal,
    pub ledger_sum: BigDecimal,
}

impl WalletAudit {
    pub fn is_consistent(&self) -> bool {
        self.current_balance == self.ledger_sum
            && self.current_balance == &self.total_earnings - &self.total_withdrawn
            && self.current_balance >= BigDecimal::from(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signed_amounts() {
        let amount = BigDecimal::from(40);
        assert_eq!(Direction::Credit.signed(&amount), BigDecimal::from(40));
        assert_eq!(Direction::Debit.signed(&amount), BigDecimal::from(-40));
    }

    #[test]
    fn test_new_entry_stores_signed_amount() {
        let entry = NewLedgerEntry {
            wallet_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            amount: BigDecimal::from(15),
            direction: Direction::Debit,
            reference_id: "wd-1".to_string(),
            reference_kind: ReferenceKind::Withdrawal,
            description: "payout".to_string(),
        }
        .into_transaction();
        assert_eq!(entry.amount, BigDecimal::from(-15));
        assert_eq!(entry.status, "completed");
    }

    #[test]
    fn test_audit_detects_drift() {
        let mut audit = WalletAudit {
            wallet_id: Uuid::new_v4(),
            organization_id: Uuid::new_v4(),
            current_balance: BigDecimal::from(25),
            total_earnings: BigDecimal::from(30),
            total_withdrawn: BigDecimal::from(5),
            ledger_sum: BigDecimal::from(25),
        };
        assert!(audit.is_consistent());

        audit.ledger_sum = BigDecimal::from(20);
        assert!(!audit.is_consistent());
    }

    #[test]
    fn test_enum_text_representations() {
        assert_eq!("credit".parse::<Direction>().unwrap(), Direction::Credit);
        assert_eq!("donation".parse::<ReferenceKind>().unwrap(), ReferenceKind::Donation);
        assert!("Credit".parse::<Direction>().is_err());
    }
}
