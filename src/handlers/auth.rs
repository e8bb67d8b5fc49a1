use axum::{
    async_trait,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

pub const PAYMENT_SIGNATURE_HEADER: &str = "X-Payment-Signature";
const MAX_CALLBACK_BODY: usize = 64 * 1024;

/// Extractor that verifies the `X-Payment-Signature` header against the raw
/// request body using HMAC-SHA256 and the payment webhook secret.
pub struct VerifiedWebhook {
    pub body: Vec<u8>,
}

impl VerifiedWebhook {
    /// Constant-time comparison of the hex signature against the body's MAC.
    fn verify_signature(secret: &str, body: &[u8], signature_header: &str) -> Result<(), AuthError> {
        let expected_signature =
            hex::decode(signature_header.trim()).map_err(|_| AuthError::InvalidSignatureFormat)?;

        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).map_err(|_| AuthError::InvalidSecret)?;
        mac.update(body);

        mac.verify_slice(&expected_signature)
            .map_err(|_| AuthError::SignatureMismatch)?;

        Ok(())
    }
}

#[async_trait]
impl FromRequest<crate::AppState> for VerifiedWebhook {
    type Rejection = AuthError;

    async fn from_request(req: Request, state: &crate::AppState) -> Result<Self, Self::Rejection> {
        let signature = req
            .headers()
            .get(PAYMENT_SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or(AuthError::MissingSignature)?;

        let body_bytes = axum::body::to_bytes(req.into_body(), MAX_CALLBACK_BODY)
            .await
            .map_err(|_| AuthError::BodyReadError)?
            .to_vec();

        Self::verify_signature(&state.webhook_secret, &body_bytes, &signature)?;

        Ok(VerifiedWebhook { body: body_bytes })
    }
}

#[derive(Debug)]
pub enum AuthError {
    MissingSignature,
    InvalidSignatureFormat,
    InvalidSecret,
    SignatureMismatch,
    BodyReadError,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AuthError::MissingSignature => (StatusCode::UNAUTHORIZED, "Missing X-Payment-Signature header"),
            AuthError::InvalidSignatureFormat => (StatusCode::UNAUTHORIZED, "Invalid signature format"),
            AuthError::InvalidSecret => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Invalid webhook secret configuration",
            ),
            AuthError::SignatureMismatch => (StatusCode::UNAUTHORIZED, "Signature verification failed"),
            AuthError::BodyReadError => (StatusCode::BAD_REQUEST, "Failed to read request body"),
        };

        tracing::warn!("Payment callback authentication failed: {:?}", self);
        let body = Json(json!({
            "error": message,
            "status": status.as_u16(),
        }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"donation_number":"DON-1","payment_reference":"pi_1"}"#;
        let signature = sign("whsec", body);
        assert!(VerifiedWebhook::verify_signature("whsec", body, &signature).is_ok());
    }

    #[test]
    fn test_signature_from_other_secret_is_rejected() {
        let body = b"{}";
        let signature = sign("other", body);
        assert!(matches!(
            VerifiedWebhook::verify_signature("whsec", body, &signature),
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_tampered_body_is_rejected() {
        let signature = sign("whsec", br#"{"amount":"1.00"}"#);
        assert!(matches!(
            VerifiedWebhook::verify_signature("whsec", br#"{"amount":"9.00"}"#, &signature),
            Err(AuthError::SignatureMismatch)
        ));
    }

    #[test]
    fn test_non_hex_signature_is_rejected() {
        assert!(matches!(
            VerifiedWebhook::verify_signature("whsec", b"{}", "not-hex"),
            Err(AuthError::InvalidSignatureFormat)
        ));
    }
}
