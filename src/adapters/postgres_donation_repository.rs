//! Postgres implementation of DonationRepository.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{
    Beneficiary, CompletionRecord, Donation, DonationStatus, Donor, Organization, TransitionOutcome,
};
use crate::ports::{CreditCursor, DonationRepository, RepositoryError, RepositoryResult};

const DONATION_COLUMNS: &str = r#"
    id, donation_number, donor_id, beneficiary_id, organization_id, kind, amount,
    gross_amount, fee_amount, net_amount, organization_amount, beneficiary_amount,
    currency, status, payment_reference, completed_at, cancelled_at, failed_at,
    created_at, updated_at
"#;

/// Postgres-backed donation repository.
#[derive(Clone)]
pub struct PostgresDonationRepository {
    pool: PgPool,
}

impl PostgresDonationRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_by_id(&self, id: Uuid) -> RepositoryResult<Donation> {
        let row = sqlx::query_as::<_, DonationRow>(&format!(
            "SELECT {} FROM donations WHERE id = $1 AND deleted_at IS NULL",
            DONATION_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| RepositoryError::NotFound(format!("donation {}", id)))?
            .into_domain()
    }
}

#[async_trait]
impl DonationRepository for PostgresDonationRepository {
    async fn insert_organization(&self, organization: &Organization) -> RepositoryResult<Organization> {
        sqlx::query(
            r#"
            INSERT INTO organizations (id, name, owner_user_id, default_commission_percentage)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(organization.id)
        .bind(&organization.name)
        .bind(organization.owner_user_id)
        .bind(&organization.default_commission_percentage)
        .execute(&self.pool)
        .await?;

        Ok(organization.clone())
    }

    async fn insert_beneficiary(&self, beneficiary: &Beneficiary) -> RepositoryResult<Beneficiary> {
        sqlx::query(
            r#"
            INSERT INTO beneficiaries (id, user_id, organization_id, organization_cut_percentage, total_received)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(beneficiary.id)
        .bind(beneficiary.user_id)
        .bind(beneficiary.organization_id)
        .bind(&beneficiary.organization_cut_percentage)
        .bind(&beneficiary.total_received)
        .execute(&self.pool)
        .await?;

        Ok(beneficiary.clone())
    }

    async fn insert_donor(&self, donor: &Donor) -> RepositoryResult<Donor> {
        sqlx::query("INSERT INTO donors (id, user_id, total_donated) VALUES ($1, $2, $3)")
            .bind(donor.id)
            .bind(donor.user_id)
            .bind(&donor.total_donated)
            .execute(&self.pool)
            .await?;

        Ok(donor.clone())
    }

    async fn find_organization(&self, id: Uuid) -> RepositoryResult<Option<Organization>> {
        let row = sqlx::query_as::<_, (Uuid, String, Uuid, BigDecimal)>(
            "SELECT id, name, owner_user_id, default_commission_percentage FROM organizations WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, name, owner_user_id, default_commission_percentage)| Organization {
            id,
            name,
            owner_user_id,
            default_commission_percentage,
        }))
    }

    async fn find_beneficiary(&self, id: Uuid) -> RepositoryResult<Option<Beneficiary>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, Uuid, BigDecimal, BigDecimal, Option<DateTime<Utc>>)>(
            r#"
            SELECT id, user_id, organization_id, organization_cut_percentage, total_received, deleted_at
            FROM beneficiaries
            WHERE id = $1 AND deleted_at IS NULL
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(
            |(id, user_id, organization_id, organization_cut_percentage, total_received, deleted_at)| {
                Beneficiary {
                    id,
                    user_id,
                    organization_id,
                    organization_cut_percentage,
                    total_received,
                    deleted_at,
                }
            },
        ))
    }

    async fn find_donor(&self, id: Uuid) -> RepositoryResult<Option<Donor>> {
        let row = sqlx::query_as::<_, (Uuid, Uuid, BigDecimal)>(
            "SELECT id, user_id, total_donated FROM donors WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(id, user_id, total_donated)| Donor {
            id,
            user_id,
            total_donated,
        }))
    }

    async fn delete_beneficiary(&self, id: Uuid) -> RepositoryResult<()> {
        let result = sqlx::query(
            "UPDATE beneficiaries SET deleted_at = COALESCE(deleted_at, NOW()), updated_at = NOW() WHERE id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(RepositoryError::NotFound(format!("beneficiary {}", id)));
        }
        Ok(())
    }

    async fn insert_donation(&self, donation: &Donation) -> RepositoryResult<Donation> {
        let row = sqlx::query_as::<_, DonationRow>(&format!(
            r#"
            INSERT INTO donations (
                id, donation_number, donor_id, beneficiary_id, organization_id, kind, amount,
                currency, status, payment_reference, created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING {}
            "#,
            DONATION_COLUMNS
        ))
        .bind(donation.id)
        .bind(&donation.donation_number)
        .bind(donation.donor_id)
        .bind(donation.beneficiary_id)
        .bind(donation.organization_id)
        .bind(donation.kind.as_str())
        .bind(&donation.amount)
        .bind(&donation.currency)
        .bind(donation.status.as_str())
        .bind(&donation.payment_reference)
        .bind(donation.created_at)
        .bind(donation.updated_at)
        .fetch_one(&self.pool)
        .await?;

        row.into_domain()
    }

    async fn find_by_number(&self, donation_number: &str) -> RepositoryResult<Option<Donation>> {
        let row = sqlx::query_as::<_, DonationRow>(&format!(
            "SELECT {} FROM donations WHERE donation_number = $1 AND deleted_at IS NULL",
            DONATION_COLUMNS
        ))
        .bind(donation_number)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DonationRow::into_domain).transpose()
    }

    async fn find_by_payment_reference(&self, reference: &str) -> RepositoryResult<Option<Donation>> {
        let row = sqlx::query_as::<_, DonationRow>(&format!(
            "SELECT {} FROM donations WHERE payment_reference = $1 AND deleted_at IS NULL",
            DONATION_COLUMNS
        ))
        .bind(reference)
        .fetch_optional(&self.pool)
        .await?;

        row.map(DonationRow::into_domain).transpose()
    }

    async fn complete(
        &self,
        donation_id: Uuid,
        record: &CompletionRecord,
        donor_increment: &BigDecimal,
    ) -> RepositoryResult<TransitionOutcome> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query_as::<_, DonationRow>(&format!(
            r#"
            UPDATE donations
            SET status = 'completed',
                organization_id = $2,
                payment_reference = $3,
                gross_amount = $4,
                fee_amount = $5,
                net_amount = $6,
                organization_amount = $7,
                beneficiary_amount = $8,
                completed_at = $9,
                updated_at = $9
            WHERE id = $1 AND status = 'pending' AND deleted_at IS NULL
            RETURNING {}
            "#,
            DONATION_COLUMNS
        ))
        .bind(donation_id)
        .bind(record.organization_id)
        .bind(&record.payment_reference)
        .bind(&record.gross_amount)
        .bind(&record.fee_amount)
        .bind(&record.net_amount)
        .bind(&record.organization_amount)
        .bind(&record.beneficiary_amount)
        .bind(record.completed_at)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            tx.rollback().await?;
            return Ok(TransitionOutcome::Stale(self.find_by_id(donation_id).await?));
        };
        let donation = row.into_domain()?;

        let donor = sqlx::query(
            "UPDATE donors SET total_donated = total_donated + $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(donation.donor_id)
        .bind(donor_increment)
        .execute(&mut *tx)
        .await?;
        if donor.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(RepositoryError::NotFound(format!("donor {}", donation.donor_id)));
        }

        if let Some(share) = &record.beneficiary_amount {
            let beneficiary = sqlx::query(
                r#"
                UPDATE beneficiaries
                SET total_received = total_received + $2, updated_at = NOW()
                WHERE id = $1 AND deleted_at IS NULL
                "#,
            )
            .bind(donation.beneficiary_id)
            .bind(share)
            .execute(&mut *tx)
            .await?;
            if beneficiary.rows_affected() == 0 {
                tx.rollback().await?;
                return Err(RepositoryError::NotFound(format!(
                    "beneficiary {}",
                    donation.beneficiary_id
                )));
            }
        }

        tx.commit().await?;
        Ok(TransitionOutcome::Applied(donation))
    }

    async fn close(
        &self,
        donation_id: Uuid,
        status: DonationStatus,
        at: DateTime<Utc>,
    ) -> RepositoryResult<TransitionOutcome> {
        let timestamp_column = match status {
            DonationStatus::Cancelled => "cancelled_at",
            DonationStatus::Failed => "failed_at",
            DonationStatus::Pending | DonationStatus::Completed => {
                return Err(RepositoryError::Rejected(format!(
                    "{} is not a closing status",
                    status
                )))
            }
        };

        let row = sqlx::query_as::<_, DonationRow>(&format!(
            r#"
            UPDATE donations
            SET status = $2, {} = $3, updated_at = $3
            WHERE id = $1 AND status = 'pending' AND deleted_at IS NULL
            RETURNING {}
            "#,
            timestamp_column, DONATION_COLUMNS
        ))
        .bind(donation_id)
        .bind(status.as_str())
        .bind(at)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(TransitionOutcome::Applied(row.into_domain()?)),
            None => Ok(TransitionOutcome::Stale(self.find_by_id(donation_id).await?)),
        }
    }

    async fn pending_credits(&self, after: Option<CreditCursor>, limit: i64) -> RepositoryResult<Vec<Donation>> {
        let rows = sqlx::query_as::<_, DonationRow>(&format!(
            r#"
            SELECT {}
            FROM donations d
            WHERE d.status = 'completed'
              AND d.deleted_at IS NULL
              AND d.organization_amount > 0
              AND NOT EXISTS (
                  SELECT 1 FROM wallet_transactions wt
                  WHERE wt.reference_id = d.id::text
                    AND wt.reference_kind = 'donation'
                    AND wt.direction = 'credit'
              )
              AND ($1::timestamptz IS NULL OR (d.completed_at, d.id) > ($1, $2))
            ORDER BY d.completed_at ASC, d.id ASC
            LIMIT $3
            "#,
            DONATION_COLUMNS
        ))
        .bind(after.map(|c| c.completed_at))
        .bind(after.map(|c| c.donation_id))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(DonationRow::into_domain).collect()
    }
}

/// Internal row type for SQLx. Not exposed outside the adapter.
#[derive(Debug, sqlx::FromRow)]
struct DonationRow {
    id: Uuid,
    donation_number: String,
    donor_id: Uuid,
    beneficiary_id: Uuid,
    organization_id: Uuid,
    kind: String,
    amount: BigDecimal,
    gross_amount: Option<BigDecimal>,
    fee_amount: Option<BigDecimal>,
    net_amount: Option<BigDecimal>,
    organization_amount: Option<BigDecimal>,
    beneficiary_amount: Option<BigDecimal>,
    currency: String,
    status: String,
    payment_reference: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    cancelled_at: Option<DateTime<Utc>>,
    failed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl DonationRow {
    fn into_domain(self) -> RepositoryResult<Donation> {
        Ok(Donation {
            id: self.id,
            donation_number: self.donation_number,
            donor_id: self.donor_id,
            beneficiary_id: self.beneficiary_id,
            organization_id: self.organization_id,
            kind: self.kind.parse().map_err(RepositoryError::Corrupt)?,
            amount: self.amount,
            gross_amount: self.gross_amount,
            fee_amount: self.fee_amount,
            net_amount: self.net_amount,
            organization_amount: self.organization_amount,
            beneficiary_amount: self.beneficiary_amount,
            currency: self.currency,
            status: self.status.parse().map_err(RepositoryError::Corrupt)?,
            payment_reference: self.payment_reference,
            completed_at: self.completed_at,
            cancelled_at: self.cancelled_at,
            failed_at: self.failed_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
