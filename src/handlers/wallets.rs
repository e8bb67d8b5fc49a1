use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    Json,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::AppState;

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Debug, Deserialize)]
pub struct Pagination {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl Pagination {
    fn bounds(&self) -> (i64, i64) {
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE);
        let offset = self.offset.unwrap_or(0).max(0);
        (limit, offset)
    }
}

pub async fn get_wallet(
    State(state): State<AppState>,
    Path(organization_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let wallet = state.wallets.wallet(organization_id).await?;
    Ok(Json(wallet))
}

/// Ledger entries, newest first.
pub async fn list_transactions(
    State(state): State<AppState>,
    Path(organization_id): Path<Uuid>,
    Query(pagination): Query<Pagination>,
) -> Result<impl IntoResponse, AppError> {
    let (limit, offset) = pagination.bounds();
    let entries = state.wallets.transactions(organization_id, limit, offset).await?;
    Ok(Json(entries))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pagination_bounds() {
        let p = Pagination { limit: None, offset: None };
        assert_eq!(p.bounds(), (20, 0));

        let p = Pagination {
            limit: Some(10_000),
            offset: Some(-5),
        };
        assert_eq!(p.bounds(), (100, 0));

        let p = Pagination {
            limit: Some(0),
            offset: Some(40),
        };
        assert_eq!(p.bounds(), (1, 40));
    }
}
