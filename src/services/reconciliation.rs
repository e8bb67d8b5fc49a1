use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tracing::{debug, error, info, warn};

use crate::domain::WalletAudit;
use crate::ports::{CreditCursor, DonationRepository, LedgerStore, RepositoryError};
use crate::services::wallet::{LedgerOutcome, WalletService};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ReconciliationReport {
    pub scanned: usize,
    pub repaired: usize,
    pub already_applied: usize,
    pub failed: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct AuditReport {
    pub wallets_checked: usize,
    pub discrepancies: Vec<WalletAudit>,
}

impl AuditReport {
    pub fn is_clean(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

/// Finds completed donations whose organization credit never reached the ledger
/// and re-drives them, and checks wallet balances against their entries.
///
/// Passes page through the backlog oldest first and resume where the previous full
/// page ended, so donations whose credit keeps failing cannot hold back newer ones.
#[derive(Clone)]
pub struct ReconciliationService {
    donations: Arc<dyn DonationRepository>,
    ledger: Arc<dyn LedgerStore>,
    wallets: WalletService,
    cursor: Arc<Mutex<Option<CreditCursor>>>,
}

impl ReconciliationService {
    pub fn new(donations: Arc<dyn DonationRepository>, ledger: Arc<dyn LedgerStore>) -> Self {
        let wallets = WalletService::new(ledger.clone());
        Self {
            donations,
            ledger,
            wallets,
            cursor: Arc::new(Mutex::new(None)),
        }
    }

    pub async fn run_once(&self, limit: i64) -> Result<ReconciliationReport, RepositoryError> {
        let mut cursor = self.cursor.lock().await;
        let candidates = self.donations.pending_credits(*cursor, limit).await?;
        // A short page means the end of the backlog; the next pass starts over.
        *cursor = if (candidates.len() as i64) < limit {
            None
        } else {
            candidates.last().map(CreditCursor::after)
        };
        if cursor.is_some() {
            debug!("Reconciliation page full, next pass resumes after it");
        }
        let mut report = ReconciliationReport {
            scanned: candidates.len(),
            ..Default::default()
        };

        for donation in &candidates {
            match self.wallets.credit_donation(donation).await {
                Ok(LedgerOutcome::Applied { entry, .. }) => {
                    info!(
                        donation_id = %donation.id,
                        organization_id = %donation.organization_id,
                        entry_id = %entry.id,
                        "Reconciled missing wallet credit"
                    );
                    report.repaired += 1;
                }
                Ok(LedgerOutcome::AlreadyApplied { .. }) | Ok(LedgerOutcome::Skipped) => {
                    report.already_applied += 1;
                }
                Err(e) => {
                    error!(
                        donation_id = %donation.id,
                        organization_id = %donation.organization_id,
                        reconciliation_required = true,
                        "Reconciliation credit failed: {}",
                        e
                    );
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    pub async fn audit_wallets(&self) -> Result<AuditReport, RepositoryError> {
        let audits = self.ledger.audit_wallets().await?;
        let wallets_checked = audits.len();
        let discrepancies: Vec<WalletAudit> = audits.into_iter().filter(|a| !a.is_consistent()).collect();

        for audit in &discrepancies {
            warn!(
                wallet_id = %audit.wallet_id,
                organization_id = %audit.organization_id,
                balance = %audit.current_balance,
                earnings = %audit.total_earnings,
                withdrawn = %audit.total_withdrawn,
                ledger_sum = %audit.ledger_sum,
                "Wallet balance does not match its ledger"
            );
        }

        Ok(AuditReport {
            wallets_checked,
            discrepancies,
        })
    }
}

/// Background loop re-driving missing credits every `interval`.
pub async fn run_reconciler(service: ReconciliationService, interval: Duration, batch_size: i64) {
    info!(interval_secs = interval.as_secs(), "Reconciler started");

    loop {
        match service.run_once(batch_size).await {
            Ok(report) if report.scanned > 0 => info!(
                scanned = report.scanned,
                repaired = report.repaired,
                failed = report.failed,
                "Reconciliation pass finished"
            ),
            Ok(_) => debug!("Reconciliation pass found nothing to repair"),
            Err(e) => error!("Reconciliation pass failed: {}", e),
        }

        sleep(interval).await;
    }
}
