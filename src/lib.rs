pub mod adapters;
pub mod cli;
pub mod config;
pub mod db;
pub mod domain;
pub mod error;
pub mod handlers;
pub mod health;
pub mod middleware;
pub mod payments;
pub mod ports;
pub mod services;
pub mod startup;
pub mod utils;
pub mod validation;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Instant;
use tower_http::cors::{AllowOrigin, CorsLayer};

use crate::health::HealthChecks;
use crate::middleware::request_logger::{request_logger_middleware, RequestLogConfig};
use crate::services::{SettlementService, WalletService};

#[derive(Clone)]
pub struct AppState {
    pub settlements: Arc<SettlementService>,
    pub wallets: WalletService,
    pub webhook_secret: String,
    pub health: HealthChecks,
    pub start_time: Instant,
    pub request_log: RequestLogConfig,
    pub cors_allowed_origins: Option<String>,
}

pub fn create_app(state: AppState) -> Router {
    let cors = cors_layer(state.cors_allowed_origins.as_deref());
    let request_log = state.request_log;

    Router::new()
        .route("/health", get(handlers::health))
        .route("/donations", post(handlers::donations::create_donation))
        .route("/donations/:donation_number", get(handlers::donations::get_donation))
        .route(
            "/donations/:donation_number/status",
            post(handlers::donations::update_status),
        )
        .route("/payments/callback", post(handlers::webhook::callback))
        .route("/organizations/:id/wallet", get(handlers::wallets::get_wallet))
        .route(
            "/organizations/:id/wallet/transactions",
            get(handlers::wallets::list_transactions),
        )
        .layer(axum::middleware::from_fn_with_state(
            request_log,
            request_logger_middleware,
        ))
        .layer(cors)
        .with_state(state)
}

fn cors_layer(allowed_origins: Option<&str>) -> CorsLayer {
    let origins: Vec<HeaderValue> = allowed_origins
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|origin| !origin.is_empty())
        .filter_map(|origin| match HeaderValue::from_str(origin) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
}
