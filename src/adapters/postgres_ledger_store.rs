//! Postgres implementation of LedgerStore.
//!
//! Entry insert and balance update share one database transaction. Balances are
//! changed with in-place SQL increments so concurrent credits to the same wallet
//! serialize on the row lock instead of overwriting each other.

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::domain::{Direction, NewLedgerEntry, ReferenceKind, Wallet, WalletAudit, WalletTransaction};
use crate::ports::{LedgerStore, RepositoryError, RepositoryResult};

const WALLET_COLUMNS: &str = r#"
    id, organization_id, current_balance, total_earnings, total_withdrawn, currency,
    last_transaction_at, created_at, updated_at
"#;

const ENTRY_COLUMNS: &str = r#"
    id, wallet_id, organization_id, amount, direction, reference_id, reference_kind,
    description, status, created_at
"#;

#[derive(Clone)]
pub struct PostgresLedgerStore {
    pool: PgPool,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LedgerStore for PostgresLedgerStore {
    async fn get_or_create_wallet(&self, organization_id: Uuid, currency: &str) -> RepositoryResult<Wallet> {
        sqlx::query(
            r#"
            INSERT INTO wallets (id, organization_id, currency)
            VALUES ($1, $2, $3)
            ON CONFLICT (organization_id) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(organization_id)
        .bind(currency)
        .execute(&self.pool)
        .await?;

        self.find_wallet(organization_id)
            .await?
            .ok_or_else(|| RepositoryError::NotFound(format!("wallet for organization {}", organization_id)))
    }

    async fn find_wallet(&self, organization_id: Uuid) -> RepositoryResult<Option<Wallet>> {
        let row = sqlx::query_as::<_, WalletRow>(&format!(
            "SELECT {} FROM wallets WHERE organization_id = $1",
            WALLET_COLUMNS
        ))
        .bind(organization_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(WalletRow::into_domain))
    }

    async fn find_entry(
        &self,
        reference_id: &str,
        reference_kind: ReferenceKind,
        direction: Direction,
    ) -> RepositoryResult<Option<WalletTransaction>> {
        let row = sqlx::query_as::<_, EntryRow>(&format!(
            r#"
            SELECT {} FROM wallet_transactions
            WHERE reference_id = $1 AND reference_kind = $2 AND direction = $3
            "#,
            ENTRY_COLUMNS
        ))
        .bind(reference_id)
        .bind(reference_kind.as_str())
        .bind(direction.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(EntryRow::into_domain).transpose()
    }

    async fn append(&self, entry: NewLedgerEntry) -> RepositoryResult<(Wallet, WalletTransaction)> {
        let mut tx = self.pool.begin().await?;

        let magnitude = entry.amount.clone();
        let pending = entry.into_transaction();

        // A concurrent insert for the same reference surfaces here as a unique
        // violation and is mapped to `Conflict`; dropping `tx` rolls back.
        let inserted = sqlx::query_as::<_, EntryRow>(&format!(
            r#"
            INSERT INTO wallet_transactions (
                id, wallet_id, organization_id, amount, direction, reference_id,
                reference_kind, description, status, created_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            RETURNING {}
            "#,
            ENTRY_COLUMNS
        ))
        .bind(pending.id)
        .bind(pending.wallet_id)
        .bind(pending.organization_id)
        .bind(&pending.amount)
        .bind(pending.direction.as_str())
        .bind(&pending.reference_id)
        .bind(pending.reference_kind.as_str())
        .bind(&pending.description)
        .bind(&pending.status)
        .bind(pending.created_at)
        .fetch_one(&mut *tx)
        .await?;

        let balance_update = match pending.direction {
            Direction::Credit => format!(
                r#"
                UPDATE wallets
                SET current_balance = current_balance + $2,
                    total_earnings = total_earnings + $2,
                    last_transaction_at = $3,
                    updated_at = $3
                WHERE id = $1
                RETURNING {}
                "#,
                WALLET_COLUMNS
            ),
            Direction::Debit => format!(
                r#"
                UPDATE wallets
                SET current_balance = current_balance - $2,
                    total_withdrawn = total_withdrawn + $2,
                    last_transaction_at = $3,
                    updated_at = $3
                WHERE id = $1 AND current_balance >= $2
                RETURNING {}
                "#,
                WALLET_COLUMNS
            ),
        };

        let wallet = sqlx::query_as::<_, WalletRow>(&balance_update)
            .bind(pending.wallet_id)
            .bind(&magnitude)
            .bind(pending.created_at)
            .fetch_optional(&mut *tx)
            .await?;

        let Some(wallet) = wallet else {
            tx.rollback().await?;
            return Err(match pending.direction {
                Direction::Debit => RepositoryError::Rejected(format!(
                    "debit of {} exceeds balance of wallet {}",
                    magnitude, pending.wallet_id
                )),
                Direction::Credit => RepositoryError::NotFound(format!("wallet {}", pending.wallet_id)),
            });
        };

        tx.commit().await?;
        Ok((wallet.into_domain(), inserted.into_domain()?))
    }

    async fn list_entries(
        &self,
        wallet_id: Uuid,
        limit: i64,
        offset: i64,
    ) -> RepositoryResult<Vec<WalletTransaction>> {
        let rows = sqlx::query_as::<_, EntryRow>(&format!(
            r#"
            SELECT {} FROM wallet_transactions
            WHERE wallet_id = $1
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            ENTRY_COLUMNS
        ))
        .bind(wallet_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(EntryRow::into_domain).collect()
    }

    async fn audit_wallets(&self) -> RepositoryResult<Vec<WalletAudit>> {
        let rows = sqlx::query_as::<_, (Uuid, Uuid, BigDecimal, BigDecimal, BigDecimal, BigDecimal)>(
            r#"
            SELECT w.id, w.organization_id, w.current_balance, w.total_earnings, w.total_withdrawn,
                   COALESCE(SUM(wt.amount), 0)::NUMERIC AS ledger_sum
            FROM wallets w
            LEFT JOIN wallet_transactions wt ON wt.wallet_id = w.id
            GROUP BY w.id
            ORDER BY w.created_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(
                |(wallet_id, organization_id, current_balance, total_earnings, total_withdrawn, ledger_sum)| {
                    WalletAudit {
                        wallet_id,
                        organization_id,
                        current_balance,
                        total_earnings,
                        total_withdrawn,
                        ledger_sum,
                    }
                },
            )
            .collect())
    }
}

#[derive(Debug, sqlx::FromRow)]
struct WalletRow {
    id: Uuid,
    organization_id: Uuid,
    current_balance: BigDecimal,
    total_earnings: BigDecimal,
    total_withdrawn: BigDecimal,
    currency: String,
    last_transaction_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl WalletRow {
    fn into_domain(self) -> Wallet {
        Wallet {
            id: self.id,
            organization_id: self.organization_id,
            current_balance: self.current_balance,
            total_earnings: self.total_earnings,
            total_withdrawn: self.total_withdrawn,
            currency: self.currency,
            last_transaction_at: self.last_transaction_at,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EntryRow {
    id: Uuid,
    wallet_id: Uuid,
    organization_id: Uuid,
    amount: BigDecimal,
    direction: String,
    reference_id: String,
    reference_kind: String,
    description: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl EntryRow {
    fn into_domain(self) -> RepositoryResult<WalletTransaction> {
        Ok(WalletTransaction {
            id: self.id,
            wallet_id: self.wallet_id,
            organization_id: self.organization_id,
            amount: self.amount,
            direction: self.direction.parse().map_err(RepositoryError::Corrupt)?,
            reference_id: self.reference_id,
            reference_kind: self.reference_kind.parse().map_err(RepositoryError::Corrupt)?,
            description: self.description,
            status: self.status,
            created_at: self.created_at,
        })
    }
}
