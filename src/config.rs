use anyhow::Context;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pretty" | "text" => Ok(LogFormat::Pretty),
            "json" => Ok(LogFormat::Json),
            other => anyhow::bail!("LOG_FORMAT must be 'pretty' or 'json', got '{}'", other),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server_port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub payment_gateway_url: String,
    pub payment_webhook_secret: String,
    pub payment_timeout_secs: u64,
    pub notification_webhook_url: Option<String>,
    pub notification_signing_secret: Option<String>,
    pub notification_queue_capacity: usize,
    /// Zero disables the background reconciler.
    pub reconciliation_interval_secs: u64,
    pub reconciliation_batch_size: i64,
    pub log_format: LogFormat,
    pub log_request_body: bool,
    /// Comma-separated list; unset allows no cross-origin callers.
    pub cors_allowed_origins: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenv().ok(); // Load .env file if present

        Ok(Config {
            server_port: parse_or("SERVER_PORT", 3000)?,
            database_url: env::var("DATABASE_URL").context("DATABASE_URL must be set")?,
            database_max_connections: parse_or("DATABASE_MAX_CONNECTIONS", 5)?,
            payment_gateway_url: env::var("PAYMENT_GATEWAY_URL").context("PAYMENT_GATEWAY_URL must be set")?,
            payment_webhook_secret: env::var("PAYMENT_WEBHOOK_SECRET")
                .context("PAYMENT_WEBHOOK_SECRET must be set")?,
            payment_timeout_secs: parse_or("PAYMENT_TIMEOUT_SECS", 10)?,
            notification_webhook_url: optional("NOTIFICATION_WEBHOOK_URL"),
            notification_signing_secret: optional("NOTIFICATION_SIGNING_SECRET"),
            notification_queue_capacity: parse_or("NOTIFICATION_QUEUE_CAPACITY", 1024)?,
            reconciliation_interval_secs: parse_or("RECONCILIATION_INTERVAL_SECS", 300)?,
            reconciliation_batch_size: parse_or("RECONCILIATION_BATCH_SIZE", 100)?,
            log_format: parse_or("LOG_FORMAT", LogFormat::Pretty)?,
            log_request_body: parse_or("LOG_REQUEST_BODY", false)?,
            cors_allowed_origins: optional("CORS_ALLOWED_ORIGINS"),
        })
    }

    pub fn payment_timeout(&self) -> Duration {
        Duration::from_secs(self.payment_timeout_secs)
    }

    pub fn reconciliation_interval(&self) -> Option<Duration> {
        (self.reconciliation_interval_secs > 0).then(|| Duration::from_secs(self.reconciliation_interval_secs))
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_or<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("{} is invalid: {}", key, e)),
        _ => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!("json".parse::<LogFormat>().unwrap(), LogFormat::Json);
        assert_eq!("Pretty".parse::<LogFormat>().unwrap(), LogFormat::Pretty);
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_parse_or_falls_back_on_missing_key() {
        let value: u64 = parse_or("DONATION_SETTLEMENT_TEST_UNSET_KEY", 42).unwrap();
        assert_eq!(value, 42);
    }

    #[test]
    fn test_reconciliation_can_be_disabled() {
        let mut config = Config {
            server_port: 3000,
            database_url: "postgres://localhost/donations".to_string(),
            database_max_connections: 5,
            payment_gateway_url: "http://localhost:9000".to_string(),
            payment_webhook_secret: "secret".to_string(),
            payment_timeout_secs: 10,
            notification_webhook_url: None,
            notification_signing_secret: None,
            notification_queue_capacity: 1024,
            reconciliation_interval_secs: 0,
            reconciliation_batch_size: 100,
            log_format: LogFormat::Pretty,
            log_request_body: false,
            cors_allowed_origins: None,
        };
        assert!(config.reconciliation_interval().is_none());

        config.reconciliation_interval_secs = 60;
        assert_eq!(config.reconciliation_interval(), Some(Duration::from_secs(60)));
        assert_eq!(config.payment_timeout(), Duration::from_secs(10));
    }
}
