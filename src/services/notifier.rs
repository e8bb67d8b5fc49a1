//! Outbound donation notifications.
//!
//! Settlement publishes onto a bounded queue and never waits on delivery. A separate
//! worker drains the queue into a [`NotificationDispatcher`].

use async_trait::async_trait;
use bigdecimal::BigDecimal;
use hmac::{Hmac, Mac};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc::{self, error::TrySendError};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Error, Debug)]
pub enum NotificationError {
    #[error("notification queue is full")]
    QueueFull,

    #[error("notification queue is closed")]
    QueueClosed,

    #[error("notification delivery failed: {0}")]
    Delivery(String),

    #[error("notification endpoint rejected delivery with status {0}")]
    Rejected(u16),

    #[error("invalid signing secret")]
    InvalidSecret,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationData {
    #[serde(rename = "type")]
    pub kind: String,
    pub donation_id: Uuid,
    pub amount: Option<BigDecimal>,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub recipient_user_id: Uuid,
    pub title: String,
    pub body: String,
    pub data: NotificationData,
}

impl Notification {
    pub fn donation(
        recipient_user_id: Uuid,
        title: impl Into<String>,
        body: impl Into<String>,
        donation_id: Uuid,
        amount: Option<BigDecimal>,
        currency: &str,
    ) -> Self {
        Self {
            recipient_user_id,
            title: title.into(),
            body: body.into(),
            data: NotificationData {
                kind: "donation".to_string(),
                donation_id,
                amount,
                currency: currency.to_string(),
            },
        }
    }
}

/// Producer half of the outbound queue.
#[derive(Clone)]
pub struct NotificationQueue {
    sender: mpsc::Sender<Notification>,
}

impl NotificationQueue {
    pub fn bounded(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        (Self { sender }, receiver)
    }

    /// Enqueues without waiting. A full or closed queue is reported, never awaited.
    pub fn publish(&self, notification: Notification) -> Result<(), NotificationError> {
        self.sender.try_send(notification).map_err(|e| match e {
            TrySendError::Full(_) => NotificationError::QueueFull,
            TrySendError::Closed(_) => NotificationError::QueueClosed,
        })
    }
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError>;
}

/// Drains the queue until every producer is dropped.
pub async fn run_notification_worker(
    mut receiver: mpsc::Receiver<Notification>,
    dispatcher: Arc<dyn NotificationDispatcher>,
) {
    tracing::info!("Notification worker started");
    while let Some(notification) = receiver.recv().await {
        if let Err(e) = dispatcher.dispatch(&notification).await {
            tracing::warn!(
                recipient_user_id = %notification.recipient_user_id,
                donation_id = %notification.data.donation_id,
                "Notification delivery failed: {}",
                e
            );
        }
    }
    tracing::info!("Notification worker stopped");
}

/// Writes notifications to the log. Used when no webhook is configured.
pub struct LogDispatcher;

#[async_trait]
impl NotificationDispatcher for LogDispatcher {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError> {
        tracing::info!(
            recipient_user_id = %notification.recipient_user_id,
            donation_id = %notification.data.donation_id,
            title = %notification.title,
            "Notification: {}",
            notification.body
        );
        Ok(())
    }
}

/// POSTs notifications as JSON, signing the body with HMAC-SHA256 when a secret is set.
pub struct WebhookDispatcher {
    client: Client,
    url: String,
    signing_secret: Option<String>,
    max_attempts: u32,
    retry_delay: Duration,
}

impl WebhookDispatcher {
    pub fn new(url: String, signing_secret: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();

        Self {
            client,
            url,
            signing_secret,
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
        }
    }

    pub fn with_retry(mut self, max_attempts: u32, retry_delay: Duration) -> Self {
        self.max_attempts = max_attempts.max(1);
        self.retry_delay = retry_delay;
        self
    }

    pub fn sign(secret: &str, body: &[u8]) -> Result<String, NotificationError> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| NotificationError::InvalidSecret)?;
        mac.update(body);
        Ok(hex::encode(mac.finalize().into_bytes()))
    }
}

#[async_trait]
impl NotificationDispatcher for WebhookDispatcher {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotificationError> {
        let body = serde_json::to_vec(notification).map_err(|e| NotificationError::Delivery(e.to_string()))?;
        let signature = match &self.signing_secret {
            Some(secret) => Some(Self::sign(secret, &body)?),
            None => None,
        };

        let mut attempt = 0;
        loop {
            attempt += 1;
            let mut request = self
                .client
                .post(&self.url)
                .header("Content-Type", "application/json")
                .body(body.clone());
            if let Some(signature) = &signature {
                request = request.header(SIGNATURE_HEADER, signature);
            }

            let error = match request.send().await {
                Ok(response) if response.status().is_success() => return Ok(()),
                Ok(response) if response.status().is_server_error() => {
                    NotificationError::Rejected(response.status().as_u16())
                }
                Ok(response) => return Err(NotificationError::Rejected(response.status().as_u16())),
                Err(e) => NotificationError::Delivery(e.to_string()),
            };

            if attempt >= self.max_attempts {
                return Err(error);
            }
            tracing::debug!(attempt, "Retrying notification delivery: {}", error);
            tokio::time::sleep(self.retry_delay).await;
        }
    }
}
