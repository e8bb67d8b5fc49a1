use async_trait::async_trait;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::timeout;

use crate::payments::PaymentGatewayClient;
use crate::ports::PaymentSourceError;

const PROBE_REFERENCE: &str = "health-check-probe";

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: HashMap<String, DependencyStatus>,
}

impl HealthResponse {
    pub fn is_unhealthy(&self) -> bool {
        self.status == "unhealthy"
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DependencyStatus {
    Healthy { status: String, latency_ms: u64 },
    Unhealthy { status: String, error: String },
}

impl DependencyStatus {
    fn healthy(start: Instant) -> Self {
        DependencyStatus::Healthy {
            status: "healthy".to_string(),
            latency_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn unhealthy(error: impl ToString) -> Self {
        DependencyStatus::Unhealthy {
            status: "unhealthy".to_string(),
            error: error.to_string(),
        }
    }
}

#[async_trait]
pub trait DependencyChecker: Send + Sync {
    async fn check(&self) -> DependencyStatus;
}

pub struct PostgresChecker {
    pool: sqlx::PgPool,
}

impl PostgresChecker {
    pub fn new(pool: sqlx::PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DependencyChecker for PostgresChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match sqlx::query("SELECT 1").execute(&self.pool).await {
            Ok(_) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

/// Looks up a reference the gateway will not know; a 404 proves it is answering.
pub struct PaymentGatewayChecker {
    client: PaymentGatewayClient,
}

impl PaymentGatewayChecker {
    pub fn new(client: PaymentGatewayClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl DependencyChecker for PaymentGatewayChecker {
    async fn check(&self) -> DependencyStatus {
        let start = Instant::now();
        match self.client.get_payment(PROBE_REFERENCE).await {
            Ok(_) | Err(PaymentSourceError::UnknownPayment(_)) => DependencyStatus::healthy(start),
            Err(e) => DependencyStatus::unhealthy(e),
        }
    }
}

#[derive(Clone)]
struct Dependency {
    name: &'static str,
    critical: bool,
    checker: Arc<dyn DependencyChecker>,
}

/// The set of dependencies reported by `/health`.
#[derive(Clone, Default)]
pub struct HealthChecks {
    dependencies: Vec<Dependency>,
}

impl HealthChecks {
    pub fn new() -> Self {
        Self::default()
    }

    /// A failing critical dependency makes the service unhealthy; any other failure
    /// only degrades it.
    pub fn with(mut self, name: &'static str, critical: bool, checker: Arc<dyn DependencyChecker>) -> Self {
        self.dependencies.push(Dependency { name, critical, checker });
        self
    }
}

pub async fn check_health(checks: &HealthChecks, start_time: Instant) -> HealthResponse {
    let timeout_duration = Duration::from_secs(5);

    let results = join_all(
        checks
            .dependencies
            .iter()
            .map(|dep| timeout(timeout_duration, dep.checker.check())),
    )
    .await;

    let mut dependencies = HashMap::new();
    let mut critical = Vec::new();
    for (dep, result) in checks.dependencies.iter().zip(results) {
        if dep.critical {
            critical.push(dep.name);
        }
        dependencies.insert(
            dep.name.to_string(),
            result.unwrap_or_else(|_| DependencyStatus::unhealthy("timeout")),
        );
    }

    let overall_status = determine_overall_status(&dependencies, &critical);

    HealthResponse {
        status: overall_status,
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: start_time.elapsed().as_secs(),
        dependencies,
    }
}

fn determine_overall_status(dependencies: &HashMap<String, DependencyStatus>, critical_deps: &[&str]) -> String {
    let mut has_critical_failure = false;
    let mut has_non_critical_failure = false;

    for (name, status) in dependencies {
        if matches!(status, DependencyStatus::Unhealthy { .. }) {
            if critical_deps.contains(&name.as_str()) {
                has_critical_failure = true;
            } else {
                has_non_critical_failure = true;
            }
        }
    }

    if has_critical_failure {
        "unhealthy".to_string()
    } else if has_non_critical_failure {
        "degraded".to_string()
    } else {
        "healthy".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(bool);

    #[async_trait]
    impl DependencyChecker for Fixed {
        async fn check(&self) -> DependencyStatus {
            if self.0 {
                DependencyStatus::healthy(Instant::now())
            } else {
                DependencyStatus::unhealthy("down")
            }
        }
    }

    #[tokio::test]
    async fn test_all_healthy() {
        let checks = HealthChecks::new()
            .with("postgres", true, Arc::new(Fixed(true)))
            .with("payment_gateway", false, Arc::new(Fixed(true)));

        let response = check_health(&checks, Instant::now()).await;
        assert_eq!(response.status, "healthy");
        assert_eq!(response.dependencies.len(), 2);
    }

    #[tokio::test]
    async fn test_non_critical_failure_degrades() {
        let checks = HealthChecks::new()
            .with("postgres", true, Arc::new(Fixed(true)))
            .with("payment_gateway", false, Arc::new(Fixed(false)));

        let response = check_health(&checks, Instant::now()).await;
        assert_eq!(response.status, "degraded");
        assert!(!response.is_unhealthy());
    }

    #[tokio::test]
    async fn test_critical_failure_is_unhealthy() {
        let checks = HealthChecks::new()
            .with("postgres", true, Arc::new(Fixed(false)))
            .with("payment_gateway", false, Arc::new(Fixed(true)));

        let response = check_health(&checks, Instant::now()).await;
        assert!(response.is_unhealthy());
    }

    #[tokio::test]
    async fn test_gateway_404_counts_as_healthy() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/payments/health-check-probe")
            .with_status(404)
            .create_async()
            .await;

        let client = PaymentGatewayClient::new(server.url(), Duration::from_secs(2));
        let status = PaymentGatewayChecker::new(client).check().await;
        assert!(matches!(status, DependencyStatus::Healthy { .. }));
    }

    #[tokio::test]
    async fn test_gateway_5xx_is_unhealthy() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/payments/health-check-probe")
            .with_status(500)
            .create_async()
            .await;

        let client = PaymentGatewayClient::new(server.url(), Duration::from_secs(2));
        let status = PaymentGatewayChecker::new(client).check().await;
        assert!(matches!(status, DependencyStatus::Unhealthy { .. }));
    }
}
