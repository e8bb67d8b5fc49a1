use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use serde::{Deserialize, Serialize};

use crate::domain::PaymentStatus;
use crate::error::AppError;
use crate::handlers::auth::VerifiedWebhook;
use crate::services::SettlementError;
use crate::AppState;

#[derive(Debug, Deserialize, Serialize)]
pub struct CallbackPayload {
    pub donation_number: String,
    pub payment_reference: String,
}

#[derive(Debug, Serialize)]
pub struct CallbackAccepted {
    pub donation_number: String,
    pub payment_status: PaymentStatus,
    pub message: String,
}

/// Payment processor notification. The signature is checked before the body is
/// parsed; the payment itself is re-confirmed with the gateway before settling.
pub async fn callback(
    State(state): State<AppState>,
    webhook: VerifiedWebhook,
) -> Result<axum::response::Response, AppError> {
    let payload: CallbackPayload = serde_json::from_slice(&webhook.body)
        .map_err(|e| AppError::BadRequest(format!("invalid callback payload: {}", e)))?;

    tracing::info!(
        donation_number = %payload.donation_number,
        reference_id = %payload.payment_reference,
        "Payment callback received"
    );

    match state
        .settlements
        .confirm_and_settle(&payload.donation_number, &payload.payment_reference)
        .await
    {
        Ok(receipt) => Ok((StatusCode::OK, Json(receipt)).into_response()),
        Err(SettlementError::NotSettleable {
            reason,
            payment_status: Some(payment_status),
        }) => {
            tracing::info!(
                donation_number = %payload.donation_number,
                payment_status = %payment_status,
                "Payment not settleable yet"
            );
            let accepted = CallbackAccepted {
                donation_number: payload.donation_number,
                payment_status,
                message: reason,
            };
            Ok((StatusCode::ACCEPTED, Json(accepted)).into_response())
        }
        Err(e) => Err(e.into()),
    }
}
