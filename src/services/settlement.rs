//! Donation settlement: turns a confirmed payment into a completed donation, its
//! commission split, the organization's wallet credit and outbound notifications.
//!
//! Idempotency rests on the store, not on in-process locks: the payment reference is
//! unique across donations, completion is a conditional update out of Pending, and
//! ledger entries are unique per reference.

use bigdecimal::BigDecimal;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

use crate::domain::{
    split, Beneficiary, CompletionRecord, Donation, DonationKind, DonationStatus, Organization,
    PaymentConfirmation, PaymentStatus, SplitError, TransitionOutcome,
};
use crate::ports::{DonationRepository, PaymentConfirmationSource, PaymentSourceError, RepositoryError};
use crate::services::notifier::{Notification, NotificationQueue};
use crate::services::wallet::{LedgerError, LedgerOutcome, WalletService};
use crate::validation::{self, ValidationError};

#[derive(Error, Debug)]
pub enum SettlementError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid split: {0}")]
    InvalidSplit(#[from] SplitError),

    #[error("payment cannot be settled: {reason}")]
    NotSettleable {
        reason: String,
        /// Set when the payment source reported a non-succeeded status.
        payment_status: Option<PaymentStatus>,
    },

    #[error("cannot move donation from {from} to {to}")]
    InvalidTransition { from: DonationStatus, to: DonationStatus },

    #[error("payment currency {payment} does not match donation currency {donation}")]
    CurrencyMismatch { donation: String, payment: String },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("payment source unavailable: {0}")]
    PaymentSourceUnavailable(String),

    #[error("repository error: {0}")]
    Repository(RepositoryError),
}

impl From<RepositoryError> for SettlementError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::NotFound(what) => SettlementError::NotFound(what),
            RepositoryError::Conflict(what) => SettlementError::Conflict(what),
            other => SettlementError::Repository(other),
        }
    }
}

impl From<ValidationError> for SettlementError {
    fn from(err: ValidationError) -> Self {
        SettlementError::Validation(err.to_string())
    }
}

/// What happened to the organization's wallet during settlement.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum LedgerStatus {
    Credited { entry_id: Uuid },
    AlreadyCredited { entry_id: Uuid },
    NotRequired,
    /// The donation is completed but the credit must be re-driven by reconciliation.
    Failed { reason: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt {
    pub donation: Donation,
    pub already_settled: bool,
    pub ledger: LedgerStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewDonation {
    pub donor_id: Uuid,
    pub beneficiary_id: Uuid,
    pub kind: DonationKind,
    pub amount: BigDecimal,
    pub currency: String,
    #[serde(default)]
    pub payment_reference: Option<String>,
}

struct Parties {
    beneficiary: Beneficiary,
    organization: Organization,
}

pub struct SettlementService {
    donations: Arc<dyn DonationRepository>,
    wallets: WalletService,
    payments: Arc<dyn PaymentConfirmationSource>,
    notifications: NotificationQueue,
    payment_timeout: Duration,
}

impl SettlementService {
    pub fn new(
        donations: Arc<dyn DonationRepository>,
        wallets: WalletService,
        payments: Arc<dyn PaymentConfirmationSource>,
        notifications: NotificationQueue,
        payment_timeout: Duration,
    ) -> Self {
        Self {
            donations,
            wallets,
            payments,
            notifications,
            payment_timeout,
        }
    }

    pub async fn find(&self, donation_number: &str) -> Result<Donation, SettlementError> {
        validation::validate_donation_number(donation_number)?;
        self.donations
            .find_by_number(donation_number)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("donation {}", donation_number)))
    }

    /// Creates a Pending donation on behalf of a donor.
    pub async fn create_donation(&self, request: NewDonation) -> Result<Donation, SettlementError> {
        validation::validate_currency_code(&request.currency)?;
        if request.kind.is_monetary() {
            validation::validate_positive_amount(&request.amount)?;
            validation::validate_minor_units(&request.amount)?;
        } else {
            validation::validate_non_negative_amount(&request.amount)?;
        }
        if let Some(reference) = &request.payment_reference {
            validation::validate_payment_reference(reference)?;
        }

        let beneficiary = self
            .donations
            .find_beneficiary(request.beneficiary_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("beneficiary {}", request.beneficiary_id)))?;
        let donor = self
            .donations
            .find_donor(request.donor_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("donor {}", request.donor_id)))?;
        if request.kind.is_monetary() && beneficiary.organization_cut_percentage > BigDecimal::from(0) {
            self.ensure_wallet_currency(beneficiary.organization_id, &request.currency)
                .await?;
        }

        let donation = Donation::new(
            donor.id,
            beneficiary.id,
            beneficiary.organization_id,
            request.kind,
            request.amount,
            request.currency,
            request.payment_reference,
        );
        let saved = self.donations.insert_donation(&donation).await?;

        tracing::info!(
            donation_id = %saved.id,
            donation_number = %saved.donation_number,
            organization_id = %saved.organization_id,
            kind = %saved.kind,
            "Donation created"
        );
        Ok(saved)
    }

    /// Settles a donation against a payment confirmation. Safe to call any number of
    /// times, concurrently, with the same confirmation.
    #[tracing::instrument(skip(self, confirmation), fields(reference_id = %confirmation.reference_id))]
    pub async fn settle(
        &self,
        donation_number: &str,
        confirmation: &PaymentConfirmation,
    ) -> Result<SettlementReceipt, SettlementError> {
        if !confirmation.is_settleable() {
            return Err(SettlementError::NotSettleable {
                reason: format!(
                    "payment status is {} with reference '{}'",
                    confirmation.status, confirmation.reference_id
                ),
                payment_status: (confirmation.status != PaymentStatus::Succeeded).then_some(confirmation.status),
            });
        }
        let reference = confirmation.reference_id.trim();

        if let Some(existing) = self.donations.find_by_payment_reference(reference).await? {
            if existing.donation_number != donation_number {
                return Err(SettlementError::Conflict(format!(
                    "payment reference {} belongs to donation {}",
                    reference, existing.donation_number
                )));
            }
            if existing.is_completed() {
                return Ok(self.already_settled(existing).await);
            }
        }

        let donation = self.find(donation_number).await?;
        match donation.status {
            DonationStatus::Pending => {}
            DonationStatus::Completed | DonationStatus::Cancelled | DonationStatus::Failed => {
                return self.resolve_stale(donation, reference).await;
            }
        }
        if let Some(expected) = donation.payment_reference.as_deref() {
            if expected != reference {
                return Err(SettlementError::Conflict(format!(
                    "donation {} expects payment {}",
                    donation.donation_number, expected
                )));
            }
        }
        if !donation.kind.is_monetary() {
            return Err(SettlementError::Validation(format!(
                "{} donations are not settled by payment",
                donation.kind
            )));
        }
        if confirmation.currency != donation.currency {
            return Err(SettlementError::CurrencyMismatch {
                donation: donation.currency,
                payment: confirmation.currency.clone(),
            });
        }

        let parties = self.resolve_parties(&donation).await?;

        validation::validate_minor_units(&confirmation.gross_amount)?;
        if let Some(fee) = &confirmation.fee_amount {
            validation::validate_non_negative_amount(fee)?;
            validation::validate_minor_units(fee)?;
            if let Some(net) = &confirmation.net_amount {
                if &(&confirmation.gross_amount - fee) != net {
                    return Err(SettlementError::Validation(format!(
                        "gross amount {} minus fee {} does not equal net amount {}",
                        confirmation.gross_amount, fee, net
                    )));
                }
            }
        }
        let base = confirmation.settlement_base();
        if base > &confirmation.gross_amount {
            return Err(SettlementError::Validation(format!(
                "net amount {} exceeds gross amount {}",
                base, confirmation.gross_amount
            )));
        }
        let shares = split(base, &parties.beneficiary.organization_cut_percentage)?;
        // A share the wallet cannot hold must stop the donation before it completes.
        if shares.organization_amount > BigDecimal::from(0) {
            self.ensure_wallet_currency(parties.organization.id, &donation.currency)
                .await?;
        }

        let record = CompletionRecord {
            organization_id: parties.organization.id,
            payment_reference: reference.to_string(),
            gross_amount: Some(confirmation.gross_amount.clone()),
            fee_amount: confirmation.fee_amount.clone(),
            net_amount: Some(base.clone()),
            organization_amount: Some(shares.organization_amount),
            beneficiary_amount: Some(shares.beneficiary_amount),
            completed_at: Utc::now(),
        };

        self.commit(&donation, record, &confirmation.gross_amount, &parties).await
    }

    /// Asks the payment source about `payment_reference` and settles on success.
    /// A slow or unreachable source leaves the donation untouched.
    pub async fn confirm_and_settle(
        &self,
        donation_number: &str,
        payment_reference: &str,
    ) -> Result<SettlementReceipt, SettlementError> {
        validation::validate_donation_number(donation_number)?;
        validation::validate_payment_reference(payment_reference)?;

        let lookup = self.payments.fetch_confirmation(payment_reference);
        let confirmation = match tokio::time::timeout(self.payment_timeout, lookup).await {
            Ok(Ok(confirmation)) => confirmation,
            Ok(Err(PaymentSourceError::UnknownPayment(reference))) => {
                return Err(SettlementError::NotSettleable {
                    reason: format!("payment {} is unknown to the payment source", reference),
                    payment_status: None,
                });
            }
            Ok(Err(e)) => {
                tracing::warn!(donation_number, payment_reference, "Payment source error: {}", e);
                return Err(SettlementError::PaymentSourceUnavailable(e.to_string()));
            }
            Err(_) => {
                tracing::warn!(
                    donation_number,
                    payment_reference,
                    "Payment source did not answer within {:?}",
                    self.payment_timeout
                );
                return Err(SettlementError::PaymentSourceUnavailable(format!(
                    "no confirmation within {:?}",
                    self.payment_timeout
                )));
            }
        };

        if confirmation.reference_id != payment_reference {
            return Err(SettlementError::NotSettleable {
                reason: format!(
                    "payment source answered for {} instead of {}",
                    confirmation.reference_id, payment_reference
                ),
                payment_status: None,
            });
        }

        self.settle(donation_number, &confirmation).await
    }

    /// Administrative status change. Manual completion of a monetary donation splits
    /// the requested gross amount, since no processor fee breakdown exists.
    pub async fn update_status(
        &self,
        donation_number: &str,
        target: DonationStatus,
    ) -> Result<SettlementReceipt, SettlementError> {
        let donation = self.find(donation_number).await?;

        if donation.status == DonationStatus::Completed && target == DonationStatus::Completed {
            return Ok(self.already_settled(donation).await);
        }
        if !donation.status.can_transition_to(target) {
            return Err(SettlementError::InvalidTransition {
                from: donation.status,
                to: target,
            });
        }

        match target {
            DonationStatus::Pending => Err(SettlementError::InvalidTransition {
                from: donation.status,
                to: target,
            }),
            DonationStatus::Cancelled | DonationStatus::Failed => self.close(donation, target).await,
            DonationStatus::Completed if donation.kind.is_monetary() => {
                let confirmation = PaymentConfirmation {
                    status: PaymentStatus::Succeeded,
                    reference_id: payment_reference_for(&donation),
                    gross_amount: donation.amount.clone(),
                    fee_amount: None,
                    net_amount: None,
                    currency: donation.currency.clone(),
                };
                tracing::info!(
                    donation_id = %donation.id,
                    amount = %donation.amount,
                    "Completing donation manually from its gross amount"
                );
                self.settle(donation_number, &confirmation).await
            }
            DonationStatus::Completed => {
                let parties = self.resolve_parties(&donation).await?;
                let record = CompletionRecord {
                    organization_id: parties.organization.id,
                    payment_reference: payment_reference_for(&donation),
                    gross_amount: None,
                    fee_amount: None,
                    net_amount: None,
                    organization_amount: None,
                    beneficiary_amount: None,
                    completed_at: Utc::now(),
                };
                self.commit(&donation, record, &BigDecimal::from(0), &parties).await
            }
        }
    }

    async fn close(&self, donation: Donation, target: DonationStatus) -> Result<SettlementReceipt, SettlementError> {
        match self.donations.close(donation.id, target, Utc::now()).await? {
            TransitionOutcome::Applied(closed) => {
                tracing::info!(donation_id = %closed.id, status = %closed.status, "Donation closed");
                Ok(SettlementReceipt {
                    donation: closed,
                    already_settled: false,
                    ledger: LedgerStatus::NotRequired,
                })
            }
            TransitionOutcome::Stale(current) => Err(SettlementError::InvalidTransition {
                from: current.status,
                to: target,
            }),
        }
    }

    async fn commit(
        &self,
        donation: &Donation,
        record: CompletionRecord,
        donor_increment: &BigDecimal,
        parties: &Parties,
    ) -> Result<SettlementReceipt, SettlementError> {
        let completed = match self.donations.complete(donation.id, &record, donor_increment).await? {
            TransitionOutcome::Applied(completed) => completed,
            // Another settlement got there first.
            TransitionOutcome::Stale(current) => {
                return self.resolve_stale(current, &record.payment_reference).await;
            }
        };

        tracing::info!(
            donation_id = %completed.id,
            organization_id = %completed.organization_id,
            reference_id = %record.payment_reference,
            organization_amount = ?completed.organization_amount,
            beneficiary_amount = ?completed.beneficiary_amount,
            "Donation settled"
        );

        let ledger = self.credit(&completed).await;
        self.notify(&completed, parties);

        Ok(SettlementReceipt {
            donation: completed,
            already_settled: false,
            ledger,
        })
    }

    async fn resolve_stale(&self, current: Donation, reference: &str) -> Result<SettlementReceipt, SettlementError> {
        match current.status {
            DonationStatus::Completed if current.payment_reference.as_deref() == Some(reference) => {
                Ok(self.already_settled(current).await)
            }
            DonationStatus::Completed => Err(SettlementError::Conflict(format!(
                "donation {} was settled by another payment",
                current.donation_number
            ))),
            DonationStatus::Pending | DonationStatus::Cancelled | DonationStatus::Failed => {
                Err(SettlementError::InvalidTransition {
                    from: current.status,
                    to: DonationStatus::Completed,
                })
            }
        }
    }

    /// Returns a completed donation unchanged. The ledger credit is re-driven, which
    /// is a no-op unless an earlier attempt failed.
    async fn already_settled(&self, donation: Donation) -> SettlementReceipt {
        tracing::info!(donation_id = %donation.id, "Donation already settled");
        let ledger = self.credit(&donation).await;
        SettlementReceipt {
            donation,
            already_settled: true,
            ledger,
        }
    }

    async fn credit(&self, donation: &Donation) -> LedgerStatus {
        match self.wallets.credit_donation(donation).await {
            Ok(LedgerOutcome::Applied { entry, .. }) => LedgerStatus::Credited { entry_id: entry.id },
            Ok(LedgerOutcome::AlreadyApplied { entry }) => LedgerStatus::AlreadyCredited { entry_id: entry.id },
            Ok(LedgerOutcome::Skipped) => LedgerStatus::NotRequired,
            Err(e) => {
                tracing::error!(
                    donation_id = %donation.id,
                    organization_id = %donation.organization_id,
                    amount = ?donation.organization_amount,
                    reconciliation_required = true,
                    "Wallet credit failed after settlement: {}",
                    e
                );
                LedgerStatus::Failed { reason: e.to_string() }
            }
        }
    }

    async fn ensure_wallet_currency(&self, organization_id: Uuid, currency: &str) -> Result<(), SettlementError> {
        match self.wallets.ensure_currency(organization_id, currency).await {
            Ok(()) => Ok(()),
            Err(LedgerError::WriteFailure(e)) => Err(e.into()),
            Err(e) => Err(SettlementError::Validation(e.to_string())),
        }
    }

    async fn resolve_parties(&self, donation: &Donation) -> Result<Parties, SettlementError> {
        let beneficiary = self
            .donations
            .find_beneficiary(donation.beneficiary_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("beneficiary {}", donation.beneficiary_id)))?;
        let organization = self
            .donations
            .find_organization(beneficiary.organization_id)
            .await?
            .ok_or_else(|| SettlementError::NotFound(format!("organization {}", beneficiary.organization_id)))?;
        if self.donations.find_donor(donation.donor_id).await?.is_none() {
            return Err(SettlementError::NotFound(format!("donor {}", donation.donor_id)));
        }

        Ok(Parties {
            beneficiary,
            organization,
        })
    }

    fn notify(&self, donation: &Donation, parties: &Parties) {
        let (beneficiary_body, organization_body) = match (&donation.beneficiary_amount, &donation.organization_amount) {
            (Some(beneficiary_amount), Some(organization_amount)) => (
                format!(
                    "You received {} {} from donation {}",
                    beneficiary_amount, donation.currency, donation.donation_number
                ),
                format!(
                    "Donation {} completed, organization share {} {}",
                    donation.donation_number, organization_amount, donation.currency
                ),
            ),
            _ => (
                format!("Your {} donation {} has been delivered", donation.kind, donation.donation_number),
                format!("{} donation {} completed", donation.kind, donation.donation_number),
            ),
        };

        let notifications = [
            Notification::donation(
                parties.beneficiary.user_id,
                "Donation received",
                beneficiary_body,
                donation.id,
                donation.beneficiary_amount.clone(),
                &donation.currency,
            ),
            Notification::donation(
                parties.organization.owner_user_id,
                "Donation completed",
                organization_body,
                donation.id,
                donation.organization_amount.clone(),
                &donation.currency,
            ),
        ];

        for notification in notifications {
            if let Err(e) = self.notifications.publish(notification) {
                tracing::warn!(donation_id = %donation.id, "Failed to enqueue notification: {}", e);
            }
        }
    }
}

fn payment_reference_for(donation: &Donation) -> String {
    donation
        .payment_reference
        .clone()
        .unwrap_or_else(|| format!("manual-{}", donation.donation_number))
}
