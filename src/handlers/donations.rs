use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde::Deserialize;

use crate::domain::DonationStatus;
use crate::error::AppError;
use crate::services::NewDonation;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: DonationStatus,
}

pub async fn create_donation(
    State(state): State<AppState>,
    Json(request): Json<NewDonation>,
) -> Result<impl IntoResponse, AppError> {
    let donation = state.settlements.create_donation(request).await?;
    Ok((StatusCode::CREATED, Json(donation)))
}

pub async fn get_donation(
    State(state): State<AppState>,
    Path(donation_number): Path<String>,
) -> Result<impl IntoResponse, AppError> {
    let donation = state.settlements.find(&donation_number).await?;
    Ok(Json(donation))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(donation_number): Path<String>,
    Json(update): Json<StatusUpdate>,
) -> Result<impl IntoResponse, AppError> {
    tracing::info!(
        donation_number = %donation_number,
        status = %update.status,
        "Administrative status update"
    );
    let receipt = state.settlements.update_status(&donation_number, update.status).await?;
    Ok(Json(receipt))
}
