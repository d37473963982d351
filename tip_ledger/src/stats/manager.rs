//! Player statistics persistence.

use super::models::{MatchOutcome, PlayerStats, next_streak};
use crate::game::{Match, MatchResult};
use crate::ledger::{LedgerResult, UserId};
use crate::notify::{NotifyError, SettlementListener};
use async_trait::async_trait;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::sync::Arc;

/// Player statistics manager
#[derive(Clone)]
pub struct StatsManager {
    pool: Arc<PgPool>,
}

impl StatsManager {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Bump one counter inside the settlement transaction
    pub async fn increment_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        outcome: MatchOutcome,
    ) -> LedgerResult<()> {
        let (wins, losses, ties) = match outcome {
            MatchOutcome::Win => (1i64, 0i64, 0i64),
            MatchOutcome::Loss => (0, 1, 0),
            MatchOutcome::Tie => (0, 0, 1),
        };

        sqlx::query(
            "INSERT INTO player_stats (user_id, wins, losses, ties, updated_at)
             VALUES ($1, $2, $3, $4, NOW())
             ON CONFLICT (user_id) DO UPDATE SET
                wins = player_stats.wins + EXCLUDED.wins,
                losses = player_stats.losses + EXCLUDED.losses,
                ties = player_stats.ties + EXCLUDED.ties,
                updated_at = NOW()",
        )
        .bind(user_id)
        .bind(wins)
        .bind(losses)
        .bind(ties)
        .execute(&mut **tx)
        .await?;

        Ok(())
    }

    /// Get a player's record (all zero if they never played)
    pub async fn get_stats(&self, user_id: UserId) -> LedgerResult<PlayerStats> {
        let row = sqlx::query(
            "SELECT user_id, wins, losses, ties, current_streak, best_streak
             FROM player_stats WHERE user_id = $1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(match row {
            Some(row) => PlayerStats {
                user_id: row.get("user_id"),
                wins: row.get("wins"),
                losses: row.get("losses"),
                ties: row.get("ties"),
                current_streak: row.get("current_streak"),
                best_streak: row.get("best_streak"),
            },
            None => PlayerStats {
                user_id,
                ..Default::default()
            },
        })
    }

    /// Advance a player's streak after a settled match
    pub async fn apply_streak(&self, user_id: UserId, outcome: MatchOutcome) -> LedgerResult<()> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            "INSERT INTO player_stats (user_id, updated_at)
             VALUES ($1, NOW())
             ON CONFLICT (user_id) DO UPDATE SET updated_at = NOW()
             RETURNING current_streak, best_streak",
        )
        .bind(user_id)
        .fetch_one(&mut *tx)
        .await?;

        let (current, best) = next_streak(
            row.get("current_streak"),
            row.get("best_streak"),
            outcome,
        );

        sqlx::query(
            "UPDATE player_stats SET current_streak = $1, best_streak = $2 WHERE user_id = $3",
        )
        .bind(current)
        .bind(best)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }
}

/// Updates streaks once a match settlement has committed
#[derive(Clone)]
pub struct StreakRecorder {
    stats: StatsManager,
}

impl StreakRecorder {
    pub fn new(stats: StatsManager) -> Self {
        Self { stats }
    }
}

fn to_notify(e: crate::ledger::LedgerError) -> NotifyError {
    match e {
        crate::ledger::LedgerError::Database(e) => NotifyError::Database(e),
        other => NotifyError::Delivery(other.to_string()),
    }
}

#[async_trait]
impl SettlementListener for StreakRecorder {
    async fn match_settled(&self, settled: &Match) -> Result<(), NotifyError> {
        let Some(joiner) = settled.joiner_id else {
            return Ok(());
        };

        let outcomes = match settled.result {
            Some(MatchResult::ChallengerWins) => [
                (settled.challenger_id, MatchOutcome::Win),
                (joiner, MatchOutcome::Loss),
            ],
            Some(MatchResult::JoinerWins) => [
                (settled.challenger_id, MatchOutcome::Loss),
                (joiner, MatchOutcome::Win),
            ],
            Some(MatchResult::Tie) => [
                (settled.challenger_id, MatchOutcome::Tie),
                (joiner, MatchOutcome::Tie),
            ],
            None => return Ok(()),
        };

        for (user_id, outcome) in outcomes {
            self.stats
                .apply_streak(user_id, outcome)
                .await
                .map_err(to_notify)?;
        }
        Ok(())
    }
}
