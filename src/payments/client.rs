use async_trait::async_trait;
use failsafe::futures::CircuitBreaker as FuturesCircuitBreaker;
use failsafe::{backoff, failure_policy, Config, Error as FailsafeError, StateMachine};
use reqwest::{Client, StatusCode};
use std::time::Duration;

use crate::domain::PaymentConfirmation;
use crate::ports::{PaymentConfirmationSource, PaymentSourceError};

type GatewayBreaker = StateMachine<failure_policy::ConsecutiveFailures<backoff::EqualJittered>, ()>;

/// HTTP client for the payment gateway's confirmation endpoint.
#[derive(Clone)]
pub struct PaymentGatewayClient {
    client: Client,
    base_url: String,
    circuit_breaker: GatewayBreaker,
}

impl PaymentGatewayClient {
    pub fn new(base_url: String, request_timeout: Duration) -> Self {
        Self::with_circuit_breaker(base_url, request_timeout, 3, 60)
    }

    /// Creates a client whose breaker opens after `failure_threshold` consecutive
    /// failures and stays open for between one and two `reset_timeout_secs`.
    pub fn with_circuit_breaker(
        base_url: String,
        request_timeout: Duration,
        failure_threshold: u32,
        reset_timeout_secs: u64,
    ) -> Self {
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .unwrap_or_default();

        let backoff = backoff::equal_jittered(
            Duration::from_secs(reset_timeout_secs),
            Duration::from_secs(reset_timeout_secs * 2),
        );
        let policy = failure_policy::consecutive_failures(failure_threshold, backoff);
        let circuit_breaker = Config::new().failure_policy(policy).build();

        PaymentGatewayClient {
            client,
            base_url,
            circuit_breaker,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn circuit_state(&self) -> String {
        if self.circuit_breaker.is_call_permitted() {
            "closed".to_string()
        } else {
            "open".to_string()
        }
    }

    /// `GET {base}/payments/{reference}`. An unknown payment does not count
    /// against the circuit breaker.
    pub async fn get_payment(&self, payment_reference: &str) -> Result<PaymentConfirmation, PaymentSourceError> {
        let url = format!(
            "{}/payments/{}",
            self.base_url.trim_end_matches('/'),
            payment_reference
        );
        let client = self.client.clone();
        let reference = payment_reference.to_string();

        let result = self
            .circuit_breaker
            .call_with(
                |e: &PaymentSourceError| !matches!(e, PaymentSourceError::UnknownPayment(_)),
                async move {
                    let response = client.get(&url).send().await.map_err(|e| {
                        if e.is_timeout() {
                            PaymentSourceError::Timeout
                        } else {
                            PaymentSourceError::Request(e.to_string())
                        }
                    })?;

                    match response.status() {
                        StatusCode::NOT_FOUND => return Err(PaymentSourceError::UnknownPayment(reference)),
                        status if !status.is_success() => {
                            return Err(PaymentSourceError::Request(format!("gateway answered {}", status)));
                        }
                        _ => {}
                    }

                    response
                        .json::<PaymentConfirmation>()
                        .await
                        .map_err(|e| PaymentSourceError::InvalidResponse(e.to_string()))
                },
            )
            .await;

        match result {
            Ok(confirmation) => Ok(confirmation),
            Err(FailsafeError::Rejected) => {
                tracing::warn!(payment_reference, "Payment gateway circuit breaker is open");
                Err(PaymentSourceError::CircuitOpen)
            }
            Err(FailsafeError::Inner(e)) => Err(e),
        }
    }
}

#[async_trait]
impl PaymentConfirmationSource for PaymentGatewayClient {
    async fn fetch_confirmation(&self, payment_reference: &str) -> Result<PaymentConfirmation, PaymentSourceError> {
        self.get_payment(payment_reference).await
    }
}
