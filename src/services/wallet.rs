use bigdecimal::BigDecimal;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{Direction, Donation, NewLedgerEntry, ReferenceKind, Wallet, WalletTransaction};
use crate::ports::{LedgerStore, RepositoryError};

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("wallet for organization {0} not found")]
    WalletNotFound(Uuid),

    #[error("wallet currency {wallet} does not match {requested}")]
    CurrencyMismatch { wallet: String, requested: String },

    #[error("insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("ledger write failed: {0}")]
    WriteFailure(#[from] RepositoryError),
}

/// What a credit or debit call did to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum LedgerOutcome {
    /// Non-positive amount; nothing to record.
    Skipped,
    Applied {
        wallet: Wallet,
        entry: WalletTransaction,
    },
    /// An entry for this reference already exists; the balance was left alone.
    AlreadyApplied { entry: WalletTransaction },
}

impl LedgerOutcome {
    pub fn entry(&self) -> Option<&WalletTransaction> {
        match self {
            LedgerOutcome::Skipped => None,
            LedgerOutcome::Applied { entry, .. } | LedgerOutcome::AlreadyApplied { entry } => Some(entry),
        }
    }
}

/// Sole writer of wallets and ledger entries.
#[derive(Clone)]
pub struct WalletService {
    store: Arc<dyn LedgerStore>,
}

impl WalletService {
    pub fn new(store: Arc<dyn LedgerStore>) -> Self {
        Self { store }
    }

    /// Credits `amount` to the organization's wallet at most once per
    /// `(reference_id, reference_kind)`, however many times it is called.
    pub async fn credit(
        &self,
        organization_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
        reference_id: &str,
        reference_kind: ReferenceKind,
        description: &str,
    ) -> Result<LedgerOutcome, LedgerError> {
        self.record(
            organization_id,
            amount,
            currency,
            Direction::Credit,
            reference_id,
            reference_kind,
            description,
        )
        .await
    }

    /// Debits `amount`, refusing to take the balance below zero.
    pub async fn debit(
        &self,
        organization_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
        reference_id: &str,
        reference_kind: ReferenceKind,
        description: &str,
    ) -> Result<LedgerOutcome, LedgerError> {
        self.record(
            organization_id,
            amount,
            currency,
            Direction::Debit,
            reference_id,
            reference_kind,
            description,
        )
        .await
    }

    /// Credits a completed donation's organization share, keyed by the donation id.
    pub async fn credit_donation(&self, donation: &Donation) -> Result<LedgerOutcome, LedgerError> {
        let Some(amount) = donation.creditable_amount() else {
            return Ok(LedgerOutcome::Skipped);
        };

        self.credit(
            donation.organization_id,
            amount,
            &donation.currency,
            &donation.id.to_string(),
            ReferenceKind::Donation,
            &format!("Commission from donation {}", donation.donation_number),
        )
        .await
    }

    /// Fails when the organization already holds a wallet in another currency.
    /// An organization without a wallet accepts any currency.
    pub async fn ensure_currency(&self, organization_id: Uuid, currency: &str) -> Result<(), LedgerError> {
        match self.store.find_wallet(organization_id).await? {
            Some(wallet) if wallet.currency != currency => Err(LedgerError::CurrencyMismatch {
                wallet: wallet.currency,
                requested: currency.to_string(),
            }),
            _ => Ok(()),
        }
    }

    pub async fn wallet(&self, organization_id: Uuid) -> Result<Wallet, LedgerError> {
        self.store
            .find_wallet(organization_id)
            .await?
            .ok_or(LedgerError::WalletNotFound(organization_id))
    }

    pub async fn transactions(
        &self,
        organization_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletTransaction>, LedgerError> {
        let wallet = self.wallet(organization_id).await?;
        Ok(self.store.list_entries(wallet.id, limit, offset).await?)
    }

    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        organization_id: Uuid,
        amount: &BigDecimal,
        currency: &str,
        direction: Direction,
        reference_id: &str,
        reference_kind: ReferenceKind,
        description: &str,
    ) -> Result<LedgerOutcome, LedgerError> {
        if amount <= &BigDecimal::from(0) {
            tracing::debug!(
                organization_id = %organization_id,
                reference_id,
                %direction,
                "Skipping non-positive ledger amount {}",
                amount
            );
            return Ok(LedgerOutcome::Skipped);
        }

        let wallet = self.store.get_or_create_wallet(organization_id, currency).await?;
        if wallet.currency != currency {
            return Err(LedgerError::CurrencyMismatch {
                wallet: wallet.currency,
                requested: currency.to_string(),
            });
        }

        if let Some(entry) = self.store.find_entry(reference_id, reference_kind, direction).await? {
            tracing::info!(
                organization_id = %organization_id,
                reference_id,
                reference_kind = %reference_kind,
                %direction,
                "Ledger entry already recorded, skipping"
            );
            return Ok(LedgerOutcome::AlreadyApplied { entry });
        }

        let entry = NewLedgerEntry {
            wallet_id: wallet.id,
            organization_id,
            amount: amount.clone(),
            direction,
            reference_id: reference_id.to_string(),
            reference_kind,
            description: description.to_string(),
        };

        match self.store.append(entry).await {
            Ok((wallet, entry)) => {
                tracing::info!(
                    organization_id = %organization_id,
                    wallet_id = %wallet.id,
                    reference_id,
                    %direction,
                    amount = %amount,
                    balance = %wallet.current_balance,
                    "Ledger entry recorded"
                );
                Ok(LedgerOutcome::Applied { wallet, entry })
            }
            // Lost a race with a concurrent writer for the same reference.
            Err(RepositoryError::Conflict(_)) => {
                match self.store.find_entry(reference_id, reference_kind, direction).await? {
                    Some(entry) => Ok(LedgerOutcome::AlreadyApplied { entry }),
                    None => Err(LedgerError::WriteFailure(RepositoryError::Conflict(format!(
                        "conflicting {} entry for {} vanished",
                        direction, reference_id
                    )))),
                }
            }
            Err(RepositoryError::Rejected(reason)) => Err(LedgerError::InsufficientFunds(reason)),
            Err(e) => Err(LedgerError::WriteFailure(e)),
        }
    }
}
