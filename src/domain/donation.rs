//! Donation domain entity and its lifecycle.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationStatus {
    Pending,
    Completed,
    Cancelled,
    Failed,
}

impl DonationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationStatus::Pending => "pending",
            DonationStatus::Completed => "completed",
            DonationStatus::Cancelled => "cancelled",
            DonationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        match self {
            DonationStatus::Pending => false,
            DonationStatus::Completed | DonationStatus::Cancelled | DonationStatus::Failed => true,
        }
    }

    /// Only Pending donations move, and only into a terminal state.
    pub fn can_transition_to(&self, target: DonationStatus) -> bool {
        match (self, target) {
            (DonationStatus::Pending, DonationStatus::Pending) => false,
            (DonationStatus::Pending, _) => true,
            (DonationStatus::Completed, _)
            | (DonationStatus::Cancelled, _)
            | (DonationStatus::Failed, _) => false,
        }
    }
}

impl fmt::Display for DonationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DonationStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DonationStatus::Pending),
            "completed" => Ok(DonationStatus::Completed),
            "cancelled" => Ok(DonationStatus::Cancelled),
            "failed" => Ok(DonationStatus::Failed),
            other => Err(format!("unknown donation status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DonationKind {
    Monetary,
    Food,
    Clothing,
    Medical,
    Other,
}

impl DonationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DonationKind::Monetary => "monetary",
            DonationKind::Food => "food",
            DonationKind::Clothing => "clothing",
            DonationKind::Medical => "medical",
            DonationKind::Other => "other",
        }
    }

    pub fn is_monetary(&self) -> bool {
        matches!(self, DonationKind::Monetary)
    }
}

impl fmt::Display for DonationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DonationKind {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "monetary" => Ok(DonationKind::Monetary),
            "food" => Ok(DonationKind::Food),
            "clothing" => Ok(DonationKind::Clothing),
            "medical" => Ok(DonationKind::Medical),
            "other" => Ok(DonationKind::Other),
            other => Err(format!("unknown donation kind '{}'", other)),
        }
    }
}

/// Domain entity representing a donation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donation {
    pub id: Uuid,
    pub donation_number: String,
    pub donor_id: Uuid,
    pub beneficiary_id: Uuid,
    pub organization_id: Uuid,
    pub kind: DonationKind,
    pub amount: BigDecimal,
    pub gross_amount: Option<BigDecimal>,
    pub fee_amount: Option<BigDecimal>,
    pub net_amount: Option<BigDecimal>,
    pub organization_amount: Option<BigDecimal>,
    pub beneficiary_amount: Option<BigDecimal>,
    pub currency: String,
    pub status: DonationStatus,
    pub payment_reference: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Donation {
    pub fn new(
        donor_id: Uuid,
        beneficiary_id: Uuid,
        organization_id: Uuid,
        kind: DonationKind,
        amount: BigDecimal,
        currency: String,
        payment_reference: Option<String>,
    ) -> Self {
        let now = Utc::now();
        let id = Uuid::new_v4();
        Self {
            id,
            donation_number: donation_number_for(id, now),
            donor_id,
            beneficiary_id,
            organization_id,
            kind,
            amount,
            gross_amount: None,
            fee_amount: None,
            net_amount: None,
            organization_amount: None,
            beneficiary_amount: None,
            currency,
            status: DonationStatus::Pending,
            payment_reference,
            completed_at: None,
            cancelled_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == DonationStatus::Completed
    }

    /// Organization share still owed to the ledger, if any.
    pub fn creditable_amount(&self) -> Option<&BigDecimal> {
        match (self.status, &self.organization_amount) {
            (DonationStatus::Completed, Some(amount)) if amount > &BigDecimal::from(0) => Some(amount),
            _ => None,
        }
    }
}

/// `DON-YYYYMMDD-XXXXXXXX`, derived from the primary key so it is unique with it.
pub fn donation_number_for(id: Uuid, created_at: DateTime<Utc>) -> String {
    let simple = id.simple().to_string().to_uppercase();
    format!("DON-{}-{}", created_at.format("%Y%m%d"), &simple[..8])
}

/// Amounts and metadata persisted when a donation completes.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRecord {
    pub organization_id: Uuid,
    pub payment_reference: String,
    pub gross_amount: Option<BigDecimal>,
    pub fee_amount: Option<BigDecimal>,
    pub net_amount: Option<BigDecimal>,
    pub organization_amount: Option<BigDecimal>,
    pub beneficiary_amount: Option<BigDecimal>,
    pub completed_at: DateTime<Utc>,
}

/// Result of a conditional status change.
#[derive(Debug, Clone, PartialEq)]
pub enum TransitionOutcome {
    /// This call moved the donation out of Pending.
    Applied(Donation),
    /// The donation had already left Pending; carries its current state.
    Stale(Donation),
}
