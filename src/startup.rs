use crate::config::Config;
use crate::payments::PaymentGatewayClient;
use crate::ports::PaymentSourceError;
use anyhow::{Context, Result};
use sqlx::PgPool;

pub struct ValidationReport {
    pub environment: bool,
    pub database: bool,
    pub payment_gateway: bool,
    pub errors: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.environment && self.database && self.payment_gateway
    }

    pub fn print(&self) {
        println!("\n=== Startup Validation Report ===");
        println!("Environment Variables: {}", status(self.environment));
        println!("Database Connectivity: {}", status(self.database));
        println!("Payment Gateway:       {}", status(self.payment_gateway));

        if !self.errors.is_empty() {
            println!("\nErrors:");
            for error in &self.errors {
                println!("  ❌ {}", error);
            }
        }

        println!("\nOverall Status: {}", if self.is_valid() { "✅ PASS" } else { "❌ FAIL" });
        println!("=================================\n");
    }
}

fn status(ok: bool) -> &'static str {
    if ok { "✅ OK" } else { "❌ FAIL" }
}

pub async fn validate_environment(config: &Config, pool: &PgPool) -> Result<ValidationReport> {
    let mut report = ValidationReport {
        environment: true,
        database: true,
        payment_gateway: true,
        errors: Vec::new(),
    };

    if let Err(e) = validate_env_vars(config) {
        report.environment = false;
        report.errors.push(format!("Environment: {}", e));
    }

    if let Err(e) = validate_database(pool).await {
        report.database = false;
        report.errors.push(format!("Database: {}", e));
    }

    if let Err(e) = validate_payment_gateway(config).await {
        report.payment_gateway = false;
        report.errors.push(format!("Payment gateway: {}", e));
    }

    Ok(report)
}

fn validate_env_vars(config: &Config) -> Result<()> {
    if config.database_url.is_empty() {
        anyhow::bail!("DATABASE_URL is empty");
    }
    if config.payment_webhook_secret.trim().is_empty() {
        anyhow::bail!("PAYMENT_WEBHOOK_SECRET is empty");
    }
    if config.server_port == 0 {
        anyhow::bail!("SERVER_PORT must be greater than 0");
    }
    if config.notification_queue_capacity == 0 {
        anyhow::bail!("NOTIFICATION_QUEUE_CAPACITY must be greater than 0");
    }
    if config.reconciliation_batch_size <= 0 {
        anyhow::bail!("RECONCILIATION_BATCH_SIZE must be greater than 0");
    }

    url::Url::parse(&config.payment_gateway_url).context("PAYMENT_GATEWAY_URL is not a valid URL")?;
    if let Some(webhook_url) = &config.notification_webhook_url {
        url::Url::parse(webhook_url).context("NOTIFICATION_WEBHOOK_URL is not a valid URL")?;
    }

    Ok(())
}

async fn validate_database(pool: &PgPool) -> Result<()> {
    sqlx::query("SELECT 1")
        .fetch_one(pool)
        .await
        .context("Failed to connect to database")?;

    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations")
        .fetch_one(pool)
        .await
        .context("Failed to check migrations table")?;

    if applied == 0 {
        anyhow::bail!("No migrations applied");
    }

    Ok(())
}

async fn validate_payment_gateway(config: &Config) -> Result<()> {
    let client = PaymentGatewayClient::new(config.payment_gateway_url.clone(), config.payment_timeout());

    match client.get_payment("startup-probe").await {
        Ok(_) | Err(PaymentSourceError::UnknownPayment(_)) => Ok(()),
        Err(e) => Err(anyhow::anyhow!(e).context("Payment gateway is not answering")),
    }
}
