pub mod auth;
pub mod donations;
pub mod wallets;
pub mod webhook;

use crate::health::check_health;
use crate::AppState;
use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

/// Returns 503 when a critical dependency is down, 200 otherwise.
pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    let response = check_health(&state.health, state.start_time).await;

    let status_code = if response.is_unhealthy() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };

    (status_code, Json(response))
}
