//! Win/loss/tie counters and streaks.
//!
//! Counters move inside the settlement transaction; streaks are advanced after
//! commit by [`StreakRecorder`] and may lag if that step fails.

pub mod manager;
pub mod models;

pub use manager::{StatsManager, StreakRecorder};
pub use models::{MatchOutcome, PlayerStats, next_streak};
