//! Refund receipts.

use crate::ledger::{Amount, TokenId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What was refunded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefundKind {
    Tip,
    GroupTip,
}

/// Result of a refund call
///
/// Repeated calls return the same amounts with `already_refunded` set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub kind: RefundKind,
    pub entity_id: i64,
    /// Original payer, credited with the refund
    pub user_id: UserId,
    pub token_id: TokenId,
    pub principal: Amount,
    pub tax: Amount,
    pub refunded_at: DateTime<Utc>,
    pub already_refunded: bool,
}

impl RefundReceipt {
    /// Total credited back to the payer
    pub fn amount(&self) -> Amount {
        self.principal + self.tax
    }
}
