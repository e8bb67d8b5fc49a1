use bigdecimal::BigDecimal;
use donation_settlement::{
    adapters::{PostgresDonationRepository, PostgresLedgerStore},
    domain::{Beneficiary, DonationKind, DonationStatus, Donor, Organization, ReferenceKind},
    payments::PaymentGatewayClient,
    ports::{DonationRepository, LedgerStore},
    services::{LedgerError, LedgerOutcome, NewDonation, NotificationQueue, ReconciliationService, SettlementService, WalletService},
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

fn dec(value: &str) -> BigDecimal {
    BigDecimal::from_str(value).unwrap()
}

async fn pool() -> Option<PgPool> {
    let database_url = match std::env::var("DATABASE_URL") {
        Ok(v) => v,
        Err(_) => {
            println!("Skipping Postgres test: DATABASE_URL not set");
            return None;
        }
    };

    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&database_url)
        .await
        .expect("Failed to connect to DATABASE_URL");
    donation_settlement::db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    Some(pool)
}

async fn seed(repository: &PostgresDonationRepository) -> (Organization, Beneficiary, Donor) {
    let organization = Organization {
        id: Uuid::new_v4(),
        name: format!("Org {}", Uuid::new_v4()),
        owner_user_id: Uuid::new_v4(),
        default_commission_percentage: dec("15"),
    };
    repository.insert_organization(&organization).await.unwrap();
    let beneficiary = Beneficiary::register(Uuid::new_v4(), &organization, None).unwrap();
    repository.insert_beneficiary(&beneficiary).await.unwrap();
    let donor = Donor::new(Uuid::new_v4());
    repository.insert_donor(&donor).await.unwrap();
    (organization, beneficiary, donor)
}

#[tokio::test]
async fn test_concurrent_credits_apply_once() {
    let Some(pool) = pool().await else { return };
    let repository = PostgresDonationRepository::new(pool.clone());
    let (organization, _, _) = seed(&repository).await;
    let wallets = WalletService::new(Arc::new(PostgresLedgerStore::new(pool.clone())));
    let reference = Uuid::new_v4().to_string();
    let organization_id = organization.id;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let wallets = wallets.clone();
        let reference = reference.clone();
        handles.push(tokio::spawn(async move {
            wallets
                .credit(
                    organization_id,
                    &dec("12.50"),
                    "USD",
                    &reference,
                    ReferenceKind::Donation,
                    "Commission",
                )
                .await
        }));
    }

    let mut applied = 0;
    for handle in handles {
        if let LedgerOutcome::Applied { .. } = handle.await.unwrap().unwrap() {
            applied += 1;
        }
    }
    assert_eq!(applied, 1);

    let wallet = wallets.wallet(organization.id).await.unwrap();
    assert_eq!(wallet.current_balance, dec("12.50"));
    assert_eq!(wallet.total_earnings, dec("12.50"));
    assert_eq!(wallets.transactions(organization.id, 50, 0).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_overdraft_is_rejected_and_wallet_untouched() {
    let Some(pool) = pool().await else { return };
    let repository = PostgresDonationRepository::new(pool.clone());
    let (organization, _, _) = seed(&repository).await;
    let ledger = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let wallets = WalletService::new(ledger.clone());

    wallets
        .credit(organization.id, &dec("5.00"), "USD", "seed", ReferenceKind::Adjustment, "Seed")
        .await
        .unwrap();
    let result = wallets
        .debit(organization.id, &dec("7.00"), "USD", "payout-1", ReferenceKind::Withdrawal, "Payout")
        .await;
    assert!(matches!(result, Err(LedgerError::InsufficientFunds(_))));

    let wallet = wallets.wallet(organization.id).await.unwrap();
    assert_eq!(wallet.current_balance, dec("5.00"));
    assert_eq!(wallet.total_withdrawn, dec("0"));

    let audit = ledger.audit_wallets().await.unwrap();
    let mine = audit.iter().find(|a| a.organization_id == organization.id).unwrap();
    assert!(mine.is_consistent());
}

#[tokio::test]
async fn test_manual_completion_settles_and_reconciles() {
    let Some(pool) = pool().await else { return };
    let repository = Arc::new(PostgresDonationRepository::new(pool.clone()));
    let ledger = Arc::new(PostgresLedgerStore::new(pool.clone()));
    let (organization, beneficiary, donor) = seed(&repository).await;

    let (queue, _notifications) = NotificationQueue::bounded(8);
    let settlements = SettlementService::new(
        repository.clone(),
        WalletService::new(ledger.clone()),
        Arc::new(PaymentGatewayClient::new(
            "http://127.0.0.1:9".to_string(),
            Duration::from_millis(200),
        )),
        queue,
        Duration::from_millis(200),
    );

    let donation = settlements
        .create_donation(NewDonation {
            donor_id: donor.id,
            beneficiary_id: beneficiary.id,
            kind: DonationKind::Monetary,
            amount: dec("40.00"),
            currency: "USD".to_string(),
            payment_reference: None,
        })
        .await
        .unwrap();

    let receipt = settlements
        .update_status(&donation.donation_number, DonationStatus::Completed)
        .await
        .unwrap();
    assert_eq!(receipt.donation.status, DonationStatus::Completed);
    assert_eq!(receipt.donation.organization_amount, Some(dec("6.00")));
    assert_eq!(receipt.donation.beneficiary_amount, Some(dec("34.00")));

    let again = settlements
        .update_status(&donation.donation_number, DonationStatus::Completed)
        .await
        .unwrap();
    assert!(again.already_settled);

    let stored_donor = repository.find_donor(donor.id).await.unwrap().unwrap();
    assert_eq!(stored_donor.total_donated, dec("40.00"));

    let reconciliation = ReconciliationService::new(repository.clone(), ledger.clone());
    let pending = repository.pending_credits(None, 1000).await.unwrap();
    assert!(pending.iter().all(|d| d.id != donation.id));
    reconciliation.run_once(10).await.unwrap();

    let wallet = ledger.find_wallet(organization.id).await.unwrap().unwrap();
    assert_eq!(wallet.current_balance, dec("6.00"));
}
