//! Player statistics models.

use crate::ledger::UserId;
use serde::{Deserialize, Serialize};

/// Per-player match record
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerStats {
    pub user_id: UserId,
    pub wins: i64,
    pub losses: i64,
    pub ties: i64,
    /// Positive for a win streak, negative for a losing streak
    pub current_streak: i64,
    pub best_streak: i64,
}

/// One player's result in a settled match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchOutcome {
    Win,
    Loss,
    Tie,
}

/// Streak after `outcome`, returned as (current, best)
pub fn next_streak(current: i64, best: i64, outcome: MatchOutcome) -> (i64, i64) {
    let current = match outcome {
        MatchOutcome::Win if current > 0 => current + 1,
        MatchOutcome::Win => 1,
        MatchOutcome::Loss if current < 0 => current - 1,
        MatchOutcome::Loss => -1,
        MatchOutcome::Tie => current,
    };
    (current, best.max(current))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_win_streak_grows() {
        assert_eq!(next_streak(0, 0, MatchOutcome::Win), (1, 1));
        assert_eq!(next_streak(2, 2, MatchOutcome::Win), (3, 3));
        assert_eq!(next_streak(-3, 4, MatchOutcome::Win), (1, 4));
    }

    #[test]
    fn test_loss_resets_win_streak() {
        assert_eq!(next_streak(5, 5, MatchOutcome::Loss), (-1, 5));
        assert_eq!(next_streak(-1, 5, MatchOutcome::Loss), (-2, 5));
    }

    #[test]
    fn test_tie_keeps_streak() {
        assert_eq!(next_streak(3, 4, MatchOutcome::Tie), (3, 4));
    }
}
