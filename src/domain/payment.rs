//! What the payment confirmation source reports about a payment.

use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Succeeded,
    Pending,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Succeeded => "succeeded",
            PaymentStatus::Pending => "pending",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub status: PaymentStatus,
    pub reference_id: String,
    pub gross_amount: BigDecimal,
    #[serde(default)]
    pub fee_amount: Option<BigDecimal>,
    #[serde(default)]
    pub net_amount: Option<BigDecimal>,
    pub currency: String,
}

impl PaymentConfirmation {
    /// Base for the commission split: net when the processor reported a fee
    /// breakdown, gross otherwise.
    pub fn settlement_base(&self) -> &BigDecimal {
        self.net_amount.as_ref().unwrap_or(&self.gross_amount)
    }

    pub fn is_settleable(&self) -> bool {
        self.status == PaymentStatus::Succeeded && !self.reference_id.trim().is_empty()
    }
}
