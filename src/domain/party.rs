//! Organizations, beneficiaries and donors as seen by settlement.

use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::split::{validate_cut_percentage, SplitError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Organization {
    pub id: Uuid,
    pub name: String,
    pub owner_user_id: Uuid,
    pub default_commission_percentage: BigDecimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Beneficiary {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    /// Snapshot taken at registration; never re-read from the organization.
    pub organization_cut_percentage: BigDecimal,
    pub total_received: BigDecimal,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Beneficiary {
    /// Registers a beneficiary under `organization`, copying the organization's default
    /// commission unless an explicit percentage is given.
    pub fn register(
        user_id: Uuid,
        organization: &Organization,
        explicit_cut_percentage: Option<BigDecimal>,
    ) -> Result<Self, SplitError> {
        let organization_cut_percentage = explicit_cut_percentage
            .unwrap_or_else(|| organization.default_commission_percentage.clone());
        validate_cut_percentage(&organization_cut_percentage)?;

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            organization_id: organization.id,
            organization_cut_percentage,
            total_received: BigDecimal::from(0),
            deleted_at: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Donor {
    pub id: Uuid,
    pub user_id: Uuid,
    pub total_donated: BigDecimal,
}

impl Donor {
    pub fn new(user_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            total_donated: BigDecimal::from(0),
        }
    }
}
