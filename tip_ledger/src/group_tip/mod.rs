//! Pooled gifts ("group tips").
//!
//! This module implements:
//! - Creation with principal and tax held in escrow, then announcement
//! - Claims under a shared row lock, unique per user
//! - Exactly-once finalize: even split in claim order, or refund with no claims
//!
//! A claim racing the expiry timer is either included in the split or told the
//! tip expired; finalize's exclusive lock cannot interleave with a claim.

pub mod manager;
pub mod models;
pub mod split;

pub use manager::{GroupTipManager, LockMode};
pub(crate) use manager::lock_group_tip;
pub use models::{
    ClaimOutcome, ClaimPayout, ClaimStatus, GroupTip, GroupTipClaim, GroupTipId, GroupTipOutcome,
    GroupTipStatus,
};
pub use split::split_evenly;
