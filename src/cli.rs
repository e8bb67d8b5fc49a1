use clap::{Parser, Subcommand};
use sqlx::PgPool;
use std::sync::Arc;

use crate::adapters::{PostgresDonationRepository, PostgresLedgerStore};
use crate::config::Config;
use crate::services::ReconciliationService;

#[derive(Parser)]
#[command(name = "donation-settlement")]
#[command(about = "Donation settlement and organization wallet ledger", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Database management commands
    #[command(subcommand)]
    Db(DbCommands),

    /// Configuration validation
    Config,

    /// Credit completed donations whose wallet entry is missing
    Reconcile {
        /// Maximum number of donations to repair in this run
        #[arg(short, long, default_value_t = 100)]
        limit: i64,
    },

    /// Check every wallet balance against its ledger
    Audit,
}

#[derive(Subcommand)]
pub enum DbCommands {
    /// Run database migrations
    Migrate,
}

pub async fn handle_db_migrate(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;

    tracing::info!("Running database migrations...");
    crate::db::run_migrations(&pool).await?;

    tracing::info!("Database migrations completed");
    println!("✓ Database migrations completed");

    Ok(())
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    println!("  Server Port: {}", config.server_port);
    println!("  Database URL: {}", mask_password(&config.database_url));
    println!("  Payment Gateway URL: {}", config.payment_gateway_url);
    println!("  Payment Timeout: {}s", config.payment_timeout_secs);
    println!(
        "  Notification Webhook: {}",
        config.notification_webhook_url.as_deref().unwrap_or("(log only)")
    );
    match config.reconciliation_interval() {
        Some(interval) => println!("  Reconciliation Interval: {}s", interval.as_secs()),
        None => println!("  Reconciliation Interval: disabled"),
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

fn reconciliation_service(pool: PgPool) -> ReconciliationService {
    ReconciliationService::new(
        Arc::new(PostgresDonationRepository::new(pool.clone())),
        Arc::new(PostgresLedgerStore::new(pool)),
    )
}

pub async fn handle_reconcile(config: &Config, limit: i64) -> anyhow::Result<()> {
    if limit <= 0 {
        anyhow::bail!("--limit must be greater than 0");
    }

    let pool = crate::db::create_pool(config).await?;
    let report = reconciliation_service(pool).run_once(limit).await?;

    println!("Reconciliation:");
    println!("  Scanned:         {}", report.scanned);
    println!("  Repaired:        {}", report.repaired);
    println!("  Already applied: {}", report.already_applied);
    println!("  Failed:          {}", report.failed);

    if report.failed > 0 {
        anyhow::bail!("{} donation credit(s) could not be applied", report.failed);
    }

    println!("✓ Reconciliation completed");
    Ok(())
}

pub async fn handle_audit(config: &Config) -> anyhow::Result<()> {
    let pool = crate::db::create_pool(config).await?;
    let report = reconciliation_service(pool).audit_wallets().await?;

    println!("Checked {} wallet(s)", report.wallets_checked);
    for audit in &report.discrepancies {
        println!(
            "  ✗ wallet {} (organization {}): balance {} earnings {} withdrawn {} ledger {}",
            audit.wallet_id,
            audit.organization_id,
            audit.current_balance,
            audit.total_earnings,
            audit.total_withdrawn,
            audit.ledger_sum
        );
    }

    if !report.is_clean() {
        anyhow::bail!("{} wallet(s) out of balance", report.discrepancies.len());
    }

    println!("✓ All wallets balance against their ledgers");
    Ok(())
}

fn mask_password(url: &str) -> String {
    if let Some(at_pos) = url.rfind('@') {
        if let Some(colon_pos) = url[..at_pos].rfind(':') {
            if let Some(slash_pos) = url[..colon_pos].rfind("//") {
                let prefix = &url[..slash_pos + 2];
                let user_start = slash_pos + 2;
                let user = &url[user_start..colon_pos];
                let suffix = &url[at_pos..];
                return format!("{}{}:****{}", prefix, user, suffix);
            }
        }
    }
    url.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://settle:hunter2@db:5432/donations"),
            "postgres://settle:****@db:5432/donations"
        );
        assert_eq!(mask_password("postgres://db/donations"), "postgres://db/donations");
    }

    #[test]
    fn test_reconcile_limit_parses() {
        let cli = Cli::try_parse_from(["donation-settlement", "reconcile", "--limit", "25"]).unwrap();
        assert!(matches!(cli.command, Some(Commands::Reconcile { limit: 25 })));

        let cli = Cli::try_parse_from(["donation-settlement"]).unwrap();
        assert!(cli.command.is_none());
    }
}
