//! Match (two-player wager) data models.

use crate::ledger::{Amount, LedgerError, TokenId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Match ID type
pub type MatchId = i64;

/// Match lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchStatus {
    /// Created, wager escrowed, no move locked yet
    Draft,
    /// Challenger's move locked, waiting for an opponent
    Offered,
    /// Opponent joined; only visible inside the settlement transaction
    Locked,
    Settled,
    Canceled,
    Expired,
}

impl MatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchStatus::Draft => "draft",
            MatchStatus::Offered => "offered",
            MatchStatus::Locked => "locked",
            MatchStatus::Settled => "settled",
            MatchStatus::Canceled => "canceled",
            MatchStatus::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MatchStatus::Settled | MatchStatus::Canceled | MatchStatus::Expired
        )
    }
}

impl std::fmt::Display for MatchStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(MatchStatus::Draft),
            "offered" => Ok(MatchStatus::Offered),
            "locked" => Ok(MatchStatus::Locked),
            "settled" => Ok(MatchStatus::Settled),
            "canceled" => Ok(MatchStatus::Canceled),
            "expired" => Ok(MatchStatus::Expired),
            other => Err(LedgerError::Corrupt {
                field: "match.status",
                value: other.to_string(),
            }),
        }
    }
}

/// A move in the three-way game
///
/// Pebble beats Penguin, Penguin beats Fish, Fish beats Pebble.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMove {
    Penguin,
    Pebble,
    Fish,
}

impl MatchMove {
    pub const ALL: [MatchMove; 3] = [MatchMove::Penguin, MatchMove::Pebble, MatchMove::Fish];

    /// The one move this move defeats
    pub fn beats(&self) -> MatchMove {
        match self {
            MatchMove::Pebble => MatchMove::Penguin,
            MatchMove::Penguin => MatchMove::Fish,
            MatchMove::Fish => MatchMove::Pebble,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMove::Penguin => "penguin",
            MatchMove::Pebble => "pebble",
            MatchMove::Fish => "fish",
        }
    }
}

impl std::fmt::Display for MatchMove {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMove {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "penguin" | "🐧" => Ok(MatchMove::Penguin),
            "pebble" | "🪨" => Ok(MatchMove::Pebble),
            "fish" | "🐟" => Ok(MatchMove::Fish),
            _ => Err(LedgerError::InvalidMove(s.trim().to_string())),
        }
    }
}

/// Outcome of a settled match
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchResult {
    ChallengerWins,
    JoinerWins,
    Tie,
}

impl MatchResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchResult::ChallengerWins => "challenger_wins",
            MatchResult::JoinerWins => "joiner_wins",
            MatchResult::Tie => "tie",
        }
    }
}

impl FromStr for MatchResult {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "challenger_wins" => Ok(MatchResult::ChallengerWins),
            "joiner_wins" => Ok(MatchResult::JoinerWins),
            "tie" => Ok(MatchResult::Tie),
            other => Err(LedgerError::Corrupt {
                field: "match.result",
                value: other.to_string(),
            }),
        }
    }
}

/// Match model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub status: MatchStatus,
    pub token_id: TokenId,
    pub wager_atomic: Amount,
    pub challenger_id: UserId,
    pub challenger_move: Option<MatchMove>,
    pub joiner_id: Option<UserId>,
    pub joiner_move: Option<MatchMove>,
    pub offer_deadline: Option<DateTime<Utc>>,
    pub result: Option<MatchResult>,
    pub rake_atomic: Option<Amount>,
    pub payout_atomic: Option<Amount>,
    pub winner_user_id: Option<UserId>,
    pub context_id: Option<String>,
    pub message_ref: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

impl Match {
    /// Loser of a decisive match
    pub fn loser_user_id(&self) -> Option<UserId> {
        match self.result? {
            MatchResult::ChallengerWins => self.joiner_id,
            MatchResult::JoinerWins => Some(self.challenger_id),
            MatchResult::Tie => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_each_move_beats_exactly_one_other() {
        for mv in MatchMove::ALL {
            let beaten: Vec<_> = MatchMove::ALL
                .iter()
                .filter(|other| mv.beats() == **other)
                .collect();
            assert_eq!(beaten.len(), 1);
            assert_ne!(mv.beats(), mv);

            let beaten_by: Vec<_> = MatchMove::ALL
                .iter()
                .filter(|other| other.beats() == mv)
                .collect();
            assert_eq!(beaten_by.len(), 1);
        }
    }

    #[test]
    fn test_pebble_beats_penguin() {
        assert_eq!(MatchMove::Pebble.beats(), MatchMove::Penguin);
    }

    #[test]
    fn test_move_parsing() {
        assert_eq!("Penguin".parse::<MatchMove>().unwrap(), MatchMove::Penguin);
        assert_eq!(" FISH ".parse::<MatchMove>().unwrap(), MatchMove::Fish);
        assert_eq!("🪨".parse::<MatchMove>().unwrap(), MatchMove::Pebble);
        assert!("scissors".parse::<MatchMove>().is_err());
    }

    #[test]
    fn test_unknown_move_is_a_user_error() {
        let err = "Rock".parse::<MatchMove>().unwrap_err();
        assert!(matches!(err, LedgerError::InvalidMove(ref v) if v == "Rock"));
        assert_ne!(err.client_message(), "Internal server error");
        assert!(err.client_message().contains("penguin, pebble or fish"));
    }

    #[test]
    fn test_status_round_trip_and_terminality() {
        for status in [
            MatchStatus::Draft,
            MatchStatus::Offered,
            MatchStatus::Locked,
            MatchStatus::Settled,
            MatchStatus::Canceled,
            MatchStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<MatchStatus>().unwrap(), status);
        }
        assert!(!MatchStatus::Offered.is_terminal());
        assert!(MatchStatus::Expired.is_terminal());
    }
}
