//! Two-player wagers ("matches").
//!
//! This module provides:
//! - The DRAFT → OFFERED → LOCKED → SETTLED state machine, with CANCELED and
//!   EXPIRED exits for unjoined offers
//! - The fixed three-way beats relation and rake/payout arithmetic
//! - Settlement of a join inside a single row-locked transaction

pub mod manager;
pub mod models;
pub mod rules;

pub use manager::MatchManager;
pub use models::{Match, MatchId, MatchMove, MatchResult, MatchStatus};
pub use rules::{Payout, compute_payout, resolve};
