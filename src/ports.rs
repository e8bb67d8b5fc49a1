//! Storage and collaborator seams used by the settlement services.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    Beneficiary, CompletionRecord, Direction, Donation, DonationStatus, Donor, NewLedgerEntry,
    Organization, PaymentConfirmation, ReferenceKind, TransitionOutcome, Wallet, WalletAudit,
    WalletTransaction,
};

#[derive(Error, Debug)]
pub enum RepositoryError {
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("conflict: {0}")]
    Conflict(String),

    /// A guard condition (balance, status) rejected the write.
    #[error("rejected: {0}")]
    Rejected(String),

    #[error("corrupt row: {0}")]
    Corrupt(String),

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => RepositoryError::NotFound("row not found".to_string()),
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                RepositoryError::Conflict(db_err.message().to_string())
            }
            other => RepositoryError::Database(other),
        }
    }
}

pub type RepositoryResult<T> = Result<T, RepositoryError>;

/// Keyset position in the scan of donations owed a wallet credit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreditCursor {
    pub completed_at: DateTime<Utc>,
    pub donation_id: Uuid,
}

impl CreditCursor {
    pub fn after(donation: &Donation) -> Self {
        Self {
            completed_at: donation.completed_at.unwrap_or(donation.updated_at),
            donation_id: donation.id,
        }
    }
}

/// Donations and the parties they resolve to.
#[async_trait]
pub trait DonationRepository: Send + Sync {
    async fn insert_organization(&self, organization: &Organization) -> RepositoryResult<Organization>;
    async fn insert_beneficiary(&self, beneficiary: &Beneficiary) -> RepositoryResult<Beneficiary>;
    async fn insert_donor(&self, donor: &Donor) -> RepositoryResult<Donor>;

    async fn find_organization(&self, id: Uuid) -> RepositoryResult<Option<Organization>>;
    /// Soft-deleted beneficiaries are not returned.
    async fn find_beneficiary(&self, id: Uuid) -> RepositoryResult<Option<Beneficiary>>;
    async fn find_donor(&self, id: Uuid) -> RepositoryResult<Option<Donor>>;
    async fn delete_beneficiary(&self, id: Uuid) -> RepositoryResult<()>;

    async fn insert_donation(&self, donation: &Donation) -> RepositoryResult<Donation>;
    async fn find_by_number(&self, donation_number: &str) -> RepositoryResult<Option<Donation>>;
    async fn find_by_payment_reference(&self, reference: &str) -> RepositoryResult<Option<Donation>>;

    /// Completes a Pending donation and bumps the donor's `total_donated` by
    /// `donor_increment` and the beneficiary's `total_received` by the beneficiary
    /// share, all in one atomic unit. A donation no longer Pending yields `Stale`.
    async fn complete(
        &self,
        donation_id: Uuid,
        record: &CompletionRecord,
        donor_increment: &BigDecimal,
    ) -> RepositoryResult<TransitionOutcome>;

    /// Moves a Pending donation to Cancelled or Failed.
    async fn close(
        &self,
        donation_id: Uuid,
        status: DonationStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<TransitionOutcome>;

    /// Completed donations with a positive organization share and no matching
    /// Credit ledger entry, ordered by `(completed_at, id)` and starting strictly
    /// after `after` when given.
    async fn pending_credits(&self, after: Option<CreditCursor>, limit: i64) -> RepositoryResult<Vec<Donation>>;
}

/// Durable wallets and ledger entries.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Atomic create-if-absent.
    async fn get_or_create_wallet(&self, organization_id: Uuid, currency: &str) -> RepositoryResult<Wallet>;
    async fn find_wallet(&self, organization_id: Uuid) -> RepositoryResult<Option<Wallet>>;

    async fn find_entry(
        &self,
        reference_id: &str,
        reference_kind: ReferenceKind,
        direction: Direction,
    ) -> RepositoryResult<Option<WalletTransaction>>;

    /// Inserts the entry and applies it to the wallet balance as one unit.
    /// Fails with `Conflict` when an entry for the same reference and direction
    /// exists, and with `Rejected` when a debit would overdraw the wallet.
    async fn append(&self, entry: NewLedgerEntry) -> RepositoryResult<(Wallet, WalletTransaction)>;

    async fn list_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WalletTransaction>>;

    async fn audit_wallets(&self) -> RepositoryResult<Vec<WalletAudit>>;
}

#[derive(Error, Debug)]
pub enum PaymentSourceError {
    #[error("payment {0} is unknown to the gateway")]
    UnknownPayment(String),

    #[error("payment gateway request failed: {0}")]
    Request(String),

    #[error("invalid response from payment gateway: {0}")]
    InvalidResponse(String),

    #[error("payment gateway circuit breaker open")]
    CircuitOpen,

    #[error("payment gateway timed out")]
    Timeout,
}

/// External authority on whether a payment went through.
#[async_trait]
pub trait PaymentConfirmationSource: Send + Sync {
    async fn fetch_confirmation(&self, payment_reference: &str) -> Result<PaymentConfirmation, PaymentSourceError>;
}
