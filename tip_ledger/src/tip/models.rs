//! Direct tip data models.

use crate::ledger::{Amount, LedgerError, TokenId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Tip ID type
pub type TipId = i64;

/// Tip state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TipStatus {
    Pending,
    Completed,
    Refunded,
    Failed,
}

impl TipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipStatus::Pending => "pending",
            TipStatus::Completed => "completed",
            TipStatus::Refunded => "refunded",
            TipStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TipStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TipStatus::Pending),
            "completed" => Ok(TipStatus::Completed),
            "refunded" => Ok(TipStatus::Refunded),
            "failed" => Ok(TipStatus::Failed),
            other => Err(LedgerError::Corrupt {
                field: "tip.status",
                value: other.to_string(),
            }),
        }
    }
}

/// Direct gift from one user to another
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tip {
    pub id: TipId,
    pub from_user_id: UserId,
    pub to_user_id: UserId,
    pub token_id: TokenId,
    pub principal_atomic: Amount,
    /// Non-refundable service fee kept by the house
    pub fee_atomic: Amount,
    /// Refundable tax kept by the house unless the tip is reversed
    pub tax_atomic: Amount,
    pub note: Option<String>,
    pub context_id: Option<String>,
    pub status: TipStatus,
    pub created_at: DateTime<Utc>,
    pub refunded_at: Option<DateTime<Utc>>,
}
