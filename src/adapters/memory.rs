//! In-process implementation of the donation repository and ledger store.
//!
//! All state sits behind one async mutex, so each trait call is atomic with respect to
//! every other call, mirroring the single-statement and single-transaction guarantees
//! of the Postgres adapters. Uniqueness rules are enforced the same way.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::domain::{
    Beneficiary, CompletionRecord, Direction, Donation, DonationStatus, Donor, NewLedgerEntry,
    Organization, ReferenceKind, TransitionOutcome, Wallet, WalletAudit, WalletTransaction,
};
use crate::ports::{CreditCursor, DonationRepository, LedgerStore, RepositoryError, RepositoryResult};

#[derive(Default)]
struct State {
    organizations: HashMap<Uuid, Organization>,
    beneficiaries: HashMap<Uuid, Beneficiary>,
    donors: HashMap<Uuid, Donor>,
    donations: HashMap<Uuid, Donation>,
    wallets: HashMap<Uuid, Wallet>,
    entries: Vec<WalletTransaction>,
}

impl State {
    fn reference_taken(&self, reference: &str, except: Uuid) -> bool {
        self.donations
            .values()
            .any(|d| d.id != except && d.payment_reference.as_deref() == Some(reference))
    }

    fn has_credit_for(&self, donation_id: Uuid) -> bool {
        let reference_id = donation_id.to_string();
        self.entries.iter().any(|e| {
            e.reference_id == reference_id
                && e.reference_kind == ReferenceKind::Donation
                && e.direction == Direction::Credit
        })
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ledger entries across all wallets.
    pub async fn entry_count(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    /// Removes a ledger entry behind the store's back, for exercising audits.
    #[doc(hidden)]
    pub async fn tamper_remove_entry(&self, entry_id: Uuid) {
        self.state.lock().await.entries.retain(|e| e.id != entry_id);
    }
}

#[async_trait]
impl DonationRepository for InMemoryStore {
    async fn insert_organization(&self, organization: &Organization) -> RepositoryResult<Organization> {
        let mut state = self.state.lock().await;
        if state.organizations.contains_key(&organization.id) {
            return Err(RepositoryError::Conflict(format!("organization {}", organization.id)));
        }
        state.organizations.insert(organization.id, organization.clone());
        Ok(organization.clone())
    }

    async fn insert_beneficiary(&self, beneficiary: &Beneficiary) -> RepositoryResult<Beneficiary> {
        let mut state = self.state.lock().await;
        if !state.organizations.contains_key(&beneficiary.organization_id) {
            return Err(RepositoryError::NotFound(format!(
                "organization {}",
                beneficiary.organization_id
            )));
        }
        state.beneficiaries.insert(beneficiary.id, beneficiary.clone());
        Ok(beneficiary.clone())
    }

    async fn insert_donor(&self, donor: &Donor) -> RepositoryResult<Donor> {
        let mut state = self.state.lock().await;
        state.donors.insert(donor.id, donor.clone());
        Ok(donor.clone())
    }

    async fn find_organization(&self, id: Uuid) -> RepositoryResult<Option<Organization>> {
        Ok(self.state.lock().await.organizations.get(&id).cloned())
    }

    async fn find_beneficiary(&self, id: Uuid) -> RepositoryResult<Option<Beneficiary>> {
        Ok(self
            .state
            .lock()
            .await
            .beneficiaries
            .get(&id)
            .filter(|b| b.deleted_at.is_none())
            .cloned())
    }

    async fn find_donor(&self, id: Uuid) -> RepositoryResult<Option<Donor>> {
        Ok(self.state.lock().await.donors.get(&id).cloned())
    }

    async fn delete_beneficiary(&self, id: Uuid) -> RepositoryResult<()> {
        let mut state = self.state.lock().await;
        match state.beneficiaries.get_mut(&id) {
            Some(beneficiary) => {
                beneficiary.deleted_at.get_or_insert_with(Utc::now);
                Ok(())
            }
            None => Err(RepositoryError::NotFound(format!("beneficiary {}", id))),
        }
    }

    async fn insert_donation(&self, donation: &Donation) -> RepositoryResult<Donation> {
        let mut state = self.state.lock().await;
        if state
            .donations
            .values()
            .any(|d| d.donation_number == donation.donation_number)
        {
            return Err(RepositoryError::Conflict(format!(
                "donation number {}",
                donation.donation_number
            )));
        }
        if let Some(reference) = &donation.payment_reference {
            if state.reference_taken(reference, donation.id) {
                return Err(RepositoryError::Conflict(format!("payment reference {}", reference)));
            }
        }
        state.donations.insert(donation.id, donation.clone());
        Ok(donation.clone())
    }

    async fn find_by_number(&self, donation_number: &str) -> RepositoryResult<Option<Donation>> {
        Ok(self
            .state
            .lock()
            .await
            .donations
            .values()
            .find(|d| d.donation_number == donation_number)
            .cloned())
    }

    async fn find_by_payment_reference(&self, reference: &str) -> RepositoryResult<Option<Donation>> {
        Ok(self
            .state
            .lock()
            .await
            .donations
            .values()
            .find(|d| d.payment_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn complete(
        &self,
        donation_id: Uuid,
        record: &CompletionRecord,
        donor_increment: &BigDecimal,
    ) -> RepositoryResult<TransitionOutcome> {
        let mut state = self.state.lock().await;
        let current = state
            .donations
            .get(&donation_id)
            .cloned()
            .ok_or_else(|| RepositoryError::NotFound(format!("donation {}", donation_id)))?;

        if current.status != DonationStatus::Pending {
            return Ok(TransitionOutcome::Stale(current));
        }
        if state.reference_taken(&record.payment_reference, donation_id) {
            return Err(RepositoryError::Conflict(format!(
                "payment reference {}",
                record.payment_reference
            )));
        }
        if !state.donors.contains_key(&current.donor_id) {
            return Err(RepositoryError::NotFound(format!("donor {}", current.donor_id)));
        }
        if !state
            .beneficiaries
            .get(&current.beneficiary_id)
            .is_some_and(|b| b.deleted_at.is_none())
        {
            return Err(RepositoryError::NotFound(format!("beneficiary {}", current.beneficiary_id)));
        }

        let mut updated = current;
        updated.status = DonationStatus::Completed;
        updated.organization_id = record.organization_id;
        updated.payment_reference = Some(record.payment_reference.clone());
        updated.gross_amount = record.gross_amount.clone();
        updated.fee_amount = record.fee_amount.clone();
        updated.net_amount = record.net_amount.clone();
        updated.organization_amount = record.organization_amount.clone();
        updated.beneficiary_amount = record.beneficiary_amount.clone();
        updated.completed_at = Some(record.completed_at);
        updated.updated_at = record.completed_at;

        if let Some(donor) = state.donors.get_mut(&updated.donor_id) {
            donor.total_donated = &donor.total_donated + donor_increment;
        }
        if let (Some(beneficiary), Some(share)) = (
            state.beneficiaries.get_mut(&updated.beneficiary_id),
            record.beneficiary_amount.as_ref(),
        ) {
            beneficiary.total_received = &beneficiary.total_received + share;
        }
        state.donations.insert(donation_id, updated.clone());

        Ok(TransitionOutcome::Applied(updated))
    }

    async fn close(
        &self,
        donation_id: Uuid,
        status: DonationStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<TransitionOutcome> {
        let mut state = self.state.lock().await;
        let donation = state
            .donations
            .get_mut(&donation_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("donation {}", donation_id)))?;

        if donation.status != DonationStatus::Pending {
            return Ok(TransitionOutcome::Stale(donation.clone()));
        }
        match status {
            DonationStatus::Cancelled => donation.cancelled_at = Some(at),
            DonationStatus::Failed => donation.failed_at = Some(at),
            DonationStatus::Pending | DonationStatus::Completed => {
                return Err(RepositoryError::Rejected(format!(
                    "{} is not a closing status",
                    status
                )))
            }
        }
        donation.status = status;
        donation.updated_at = at;

        Ok(TransitionOutcome::Applied(donation.clone()))
    }

    async fn pending_credits(&self, after: Option<CreditCursor>, limit: i64) -> RepositoryResult<Vec<Donation>> {
        let state = self.state.lock().await;
        let mut owed: Vec<Donation> = state
            .donations
            .values()
            .filter(|d| d.creditable_amount().is_some() && !state.has_credit_for(d.id))
            .filter(|d| match after {
                Some(cursor) => {
                    let position = CreditCursor::after(d);
                    (position.completed_at, position.donation_id) > (cursor.completed_at, cursor.donation_id)
                }
                None => true,
            })
            .cloned()
            .collect();
        owed.sort_by_key(|d| {
            let position = CreditCursor::after(d);
            (position.completed_at, position.donation_id)
        });
        owed.truncate(limit.max(0) as usize);
        Ok(owed)
    }
}

#[async_trait]
impl LedgerStore for InMemoryStore {
    async fn get_or_create_wallet(&self, organization_id: Uuid, currency: &str) -> RepositoryResult<Wallet> {
        let mut state = self.state.lock().await;
        let wallet = state
            .wallets
            .entry(organization_id)
            .or_insert_with(|| Wallet::empty(organization_id, currency));
        Ok(wallet.clone())
    }

    async fn find_wallet(&self, organization_id: Uuid) -> RepositoryResult<Option<Wallet>> {
        Ok(self.state.lock().await.wallets.get(&organization_id).cloned())
    }

    async fn find_entry(
        &self,
        reference_id: &str,
        reference_kind: ReferenceKind,
        direction: Direction,
    ) -> RepositoryResult<Option<WalletTransaction>> {
        Ok(self
            .state
            .lock()
            .await
            .entries
            .iter()
            .find(|e| {
                e.reference_id == reference_id
                    && e.reference_kind == reference_kind
                    && e.direction == direction
            })
            .cloned())
    }

    async fn append(&self, entry: NewLedgerEntry) -> RepositoryResult<(Wallet, WalletTransaction)> {
        let mut state = self.state.lock().await;

        let duplicate = state.entries.iter().any(|e| {
            e.reference_id == entry.reference_id
                && e.reference_kind == entry.reference_kind
                && e.direction == entry.direction
        });
        if duplicate {
            return Err(RepositoryError::Conflict(format!(
                "{} {} entry for {} already exists",
                entry.reference_kind, entry.direction, entry.reference_id
            )));
        }

        let now = Utc::now();
        let wallet = state
            .wallets
            .get_mut(&entry.organization_id)
            .filter(|w| w.id == entry.wallet_id)
            .ok_or_else(|| RepositoryError::NotFound(format!("wallet {}", entry.wallet_id)))?;

        match entry.direction {
            Direction::Credit => {
                wallet.current_balance = &wallet.current_balance + &entry.amount;
                wallet.total_earnings = &wallet.total_earnings + &entry.amount;
            }
            Direction::Debit => {
                if wallet.current_balance < entry.amount {
                    return Err(RepositoryError::Rejected(format!(
                        "debit of {} exceeds balance {}",
                        entry.amount, wallet.current_balance
                    )));
                }
                wallet.current_balance = &wallet.current_balance - &entry.amount;
                wallet.total_withdrawn = &wallet.total_withdrawn + &entry.amount;
            }
        }
        wallet.last_transaction_at = Some(now);
        wallet.updated_at = now;
        let wallet = wallet.clone();

        let transaction = entry.into_transaction();
        state.entries.push(transaction.clone());

        Ok((wallet, transaction))
    }

    async fn list_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WalletTransaction>> {
        let state = self.state.lock().await;
        Ok(state
            .entries
            .iter()
            .rev()
            .filter(|e| e.wallet_id == wallet_id)
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn audit_wallets(&self) -> RepositoryResult<Vec<WalletAudit>> {
        let state = self.state.lock().await;
        Ok(state
            .wallets
            .values()
            .map(|wallet| {
                let ledger_sum = state
                    .entries
                    .iter()
                    .filter(|e| e.wallet_id == wallet.id)
                    .fold(BigDecimal::from(0), |acc, e| acc + &e.amount);
                WalletAudit {
                    wallet_id: wallet.id,
                    organization_id: wallet.organization_id,
                    current_balance: wallet.current_balance.clone(),
                    total_earnings: wallet.total_earnings.clone(),
                    total_withdrawn: wallet.total_withdrawn.clone(),
                    ledger_sum,
                }
            })
            .collect())
    }
}
