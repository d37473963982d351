//! Group tip (pooled gift) data models.

use crate::ledger::{Amount, LedgerError, TokenId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Group tip ID type
pub type GroupTipId = i64;

/// Group tip lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupTipStatus {
    Active,
    Finalized,
    Refunded,
    /// Posting failed after creation; funds returned to the creator
    Failed,
}

impl GroupTipStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupTipStatus::Active => "active",
            GroupTipStatus::Finalized => "finalized",
            GroupTipStatus::Refunded => "refunded",
            GroupTipStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, GroupTipStatus::Active)
    }
}

impl std::fmt::Display for GroupTipStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupTipStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(GroupTipStatus::Active),
            "finalized" => Ok(GroupTipStatus::Finalized),
            "refunded" => Ok(GroupTipStatus::Refunded),
            "failed" => Ok(GroupTipStatus::Failed),
            other => Err(LedgerError::Corrupt {
                field: "group_tip.status",
                value: other.to_string(),
            }),
        }
    }
}

/// Claim state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimStatus {
    Pending,
    Claimed,
    Refunded,
}

impl ClaimStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClaimStatus::Pending => "pending",
            ClaimStatus::Claimed => "claimed",
            ClaimStatus::Refunded => "refunded",
        }
    }
}

impl FromStr for ClaimStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ClaimStatus::Pending),
            "claimed" => Ok(ClaimStatus::Claimed),
            "refunded" => Ok(ClaimStatus::Refunded),
            other => Err(LedgerError::Corrupt {
                field: "group_tip_claim.status",
                value: other.to_string(),
            }),
        }
    }
}

/// Pooled gift
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTip {
    pub id: GroupTipId,
    pub creator_id: UserId,
    pub token_id: TokenId,
    /// Principal split among claimants, atomic units
    pub total_atomic: Amount,
    /// Refundable tax collected on top of the principal, atomic units
    pub tax_atomic: Amount,
    pub duration_seconds: i64,
    pub expires_at: DateTime<Utc>,
    pub status: GroupTipStatus,
    pub context_id: Option<String>,
    pub message_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

impl GroupTip {
    /// Principal plus tax, the amount held in escrow while active
    pub fn escrowed(&self) -> Amount {
        self.total_atomic + self.tax_atomic
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// A user's claim on a group tip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTipClaim {
    pub id: i64,
    pub group_tip_id: GroupTipId,
    pub user_id: UserId,
    pub status: ClaimStatus,
    pub payout_atomic: Option<Amount>,
    pub created_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
}

/// Share credited to one claimant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimPayout {
    pub user_id: UserId,
    pub amount: Amount,
}

/// Terminal resolution of a group tip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTipOutcome {
    pub group_tip_id: GroupTipId,
    pub creator_id: UserId,
    pub token_id: TokenId,
    pub status: GroupTipStatus,
    /// Shares in claim order; empty unless finalized
    pub payouts: Vec<ClaimPayout>,
    /// Principal plus tax returned to the creator, if refunded
    pub refunded: Option<Amount>,
    /// True when another caller had already resolved the tip
    pub already_terminal: bool,
}

/// Result of a claim attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClaimOutcome {
    /// Claim recorded; the share is paid at finalize
    Claimed(GroupTipClaim),
    /// The tip had expired; it was (or already had been) resolved
    Expired(GroupTipOutcome),
}
