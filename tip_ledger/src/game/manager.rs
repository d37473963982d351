//! Match settlement: the two-player wager state machine.
#![allow(clippy::needless_raw_string_hashes)]

use super::{
    models::{Match, MatchId, MatchMove, MatchResult, MatchStatus},
    rules::{compute_payout, resolve},
};
use crate::ledger::{
    Amount, EscrowKey, LedgerContext, LedgerError, LedgerManager, LedgerResult, TransactionType,
    UserId, ensure_atomic,
};
use crate::stats::{MatchOutcome, StatsManager};
use crate::token::Token;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{Postgres, Row, Transaction, postgres::PgRow};

const MATCH_COLUMNS: &str = "id, status, token_id, wager_atomic, challenger_id, challenger_move, \
     joiner_id, joiner_move, offer_deadline, result, rake_atomic, payout_atomic, winner_user_id, \
     context_id, message_ref, created_at, settled_at";

/// Match manager
#[derive(Clone)]
pub struct MatchManager {
    ledger: LedgerManager,
    stats: StatsManager,
    house_fee_bps: u32,
    offer_ttl: Duration,
}

impl MatchManager {
    /// Create a new match manager
    ///
    /// # Arguments
    ///
    /// * `ledger` - Balance ledger
    /// * `stats` - Counter bookkeeping, written inside the settlement transaction
    /// * `house_fee_bps` - Rake on the pot of a decisive match
    /// * `offer_ttl` - How long an offer stays joinable
    pub fn new(
        ledger: LedgerManager,
        stats: StatsManager,
        house_fee_bps: u32,
        offer_ttl: Duration,
    ) -> Self {
        Self {
            ledger,
            stats,
            house_fee_bps,
            offer_ttl,
        }
    }

    /// Create a match in DRAFT, moving the challenger's wager into escrow
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientFunds` - Challenger cannot cover the wager
    /// * `LedgerError::InactiveToken` - Token is disabled
    pub async fn create_match(
        &self,
        challenger: UserId,
        token: &Token,
        wager: Amount,
        context_id: Option<String>,
    ) -> LedgerResult<Match> {
        if !token.is_active {
            return Err(LedgerError::InactiveToken(token.symbol.clone()));
        }
        let wager = ensure_atomic(wager)?;

        let mut tx = self.ledger.begin().await?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO matches (status, token_id, wager_atomic, challenger_id, context_id)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {MATCH_COLUMNS}
            "#
        ))
        .bind(MatchStatus::Draft.as_str())
        .bind(token.id)
        .bind(wager)
        .bind(challenger)
        .bind(&context_id)
        .fetch_one(&mut *tx)
        .await?;
        let created = match_from_row(&row)?;

        self.hold_wager_in_tx(&mut tx, &created, challenger).await?;
        tx.commit().await?;

        log::info!(
            "Match {} created by {challenger} for {}",
            created.id,
            token.format_atomic(wager)
        );
        Ok(created)
    }

    /// Lock the challenger's move and open the match for an opponent
    ///
    /// # Errors
    ///
    /// * `LedgerError::NotParticipant` - Caller is not the challenger
    /// * `LedgerError::InvalidState` - Match is not in DRAFT
    pub async fn offer_match(
        &self,
        match_id: MatchId,
        challenger: UserId,
        challenger_move: MatchMove,
    ) -> LedgerResult<Match> {
        let mut tx = self.ledger.begin().await?;
        let current = lock_match(&mut tx, match_id).await?;

        if current.challenger_id != challenger {
            return Err(LedgerError::NotParticipant {
                entity: "match",
                id: match_id,
            });
        }
        if current.status != MatchStatus::Draft {
            return Err(invalid_state(&current, "draft"));
        }

        let deadline = Utc::now() + self.offer_ttl;
        let row = sqlx::query(&format!(
            r#"
            UPDATE matches
            SET status = $1, challenger_move = $2, offer_deadline = $3
            WHERE id = $4
            RETURNING {MATCH_COLUMNS}
            "#
        ))
        .bind(MatchStatus::Offered.as_str())
        .bind(challenger_move.as_str())
        .bind(deadline)
        .bind(match_id)
        .fetch_one(&mut *tx)
        .await?;
        let offered = match_from_row(&row)?;

        tx.commit().await?;

        log::info!("Match {match_id} offered until {deadline}");
        Ok(offered)
    }

    /// Join an offered match and settle it, all in one transaction
    ///
    /// The row lock taken here serializes concurrent joiners: the first one
    /// settles the match, everyone after sees a terminal status.
    ///
    /// # Errors
    ///
    /// * `LedgerError::NotAvailable` - Match is not OFFERED or the offer expired
    /// * `LedgerError::SelfPlay` - Joiner is the challenger
    /// * `LedgerError::InsufficientFunds` - Joiner cannot cover the wager
    pub async fn join_match(
        &self,
        match_id: MatchId,
        joiner: UserId,
        joiner_move: MatchMove,
    ) -> LedgerResult<Match> {
        let mut tx = self.ledger.begin().await?;
        let current = lock_match(&mut tx, match_id).await?;

        if current.status != MatchStatus::Offered {
            return Err(LedgerError::NotAvailable(match_id));
        }
        match current.offer_deadline {
            Some(deadline) if Utc::now() < deadline => {}
            _ => return Err(LedgerError::NotAvailable(match_id)),
        }
        if current.challenger_id == joiner {
            return Err(LedgerError::SelfPlay);
        }
        let challenger_move = current.challenger_move.ok_or(LedgerError::Corrupt {
            field: "match.challenger_move",
            value: format!("missing on offered match {match_id}"),
        })?;

        sqlx::query(
            "UPDATE matches SET status = $1, joiner_id = $2, joiner_move = $3 WHERE id = $4",
        )
        .bind(MatchStatus::Locked.as_str())
        .bind(joiner)
        .bind(joiner_move.as_str())
        .bind(match_id)
        .execute(&mut *tx)
        .await?;

        self.hold_wager_in_tx(&mut tx, &current, joiner).await?;

        let result = resolve(challenger_move, joiner_move);
        let settled = match result {
            MatchResult::Tie => self.settle_tie_in_tx(&mut tx, &current, joiner).await?,
            decisive => {
                self.settle_decisive_in_tx(&mut tx, &current, joiner, decisive)
                    .await?
            }
        };

        tx.commit().await?;

        log::info!(
            "Match {match_id} settled: {} ({challenger_move} vs {joiner_move})",
            result.as_str()
        );
        Ok(settled)
    }

    /// Cancel a DRAFT or OFFERED match and refund the challenger
    ///
    /// # Errors
    ///
    /// * `LedgerError::NotParticipant` - Caller is not the challenger
    /// * `LedgerError::InvalidState` - Match already settled, canceled or expired
    pub async fn cancel_match(&self, match_id: MatchId, challenger: UserId) -> LedgerResult<Match> {
        let mut tx = self.ledger.begin().await?;
        let current = lock_match(&mut tx, match_id).await?;

        if current.challenger_id != challenger {
            return Err(LedgerError::NotParticipant {
                entity: "match",
                id: match_id,
            });
        }
        if !matches!(current.status, MatchStatus::Draft | MatchStatus::Offered) {
            return Err(invalid_state(&current, "draft or offered"));
        }

        let canceled = self
            .close_in_tx(&mut tx, &current, MatchStatus::Canceled)
            .await?;
        tx.commit().await?;

        log::info!("Match {match_id} canceled by challenger");
        Ok(canceled)
    }

    /// Expire an offer whose deadline passed
    ///
    /// Idempotent: terminal matches and offers still within their deadline are
    /// returned unchanged. The flag is true only for the call that expired it.
    pub async fn expire_match(&self, match_id: MatchId) -> LedgerResult<(Match, bool)> {
        let mut tx = self.ledger.begin().await?;
        let current = lock_match(&mut tx, match_id).await?;

        let overdue = match current.offer_deadline {
            Some(deadline) => Utc::now() >= deadline,
            None => false,
        };
        if current.status != MatchStatus::Offered || !overdue {
            return Ok((current, false));
        }

        let expired = self
            .close_in_tx(&mut tx, &current, MatchStatus::Expired)
            .await?;
        tx.commit().await?;

        log::info!("Match {match_id} expired without an opponent");
        Ok((expired, true))
    }

    /// Get a match by id
    pub async fn get_match(&self, match_id: MatchId) -> LedgerResult<Match> {
        let row = sqlx::query(&format!(
            "SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1"
        ))
        .bind(match_id)
        .fetch_optional(self.ledger.pool())
        .await?
        .ok_or(LedgerError::NotFound {
            entity: "match",
            id: match_id,
        })?;

        match_from_row(&row)
    }

    /// Attach the chat message showing this match
    pub async fn set_message_ref(&self, match_id: MatchId, message_ref: &str) -> LedgerResult<()> {
        sqlx::query("UPDATE matches SET message_ref = $1 WHERE id = $2")
            .bind(message_ref)
            .bind(match_id)
            .execute(self.ledger.pool())
            .await?;
        Ok(())
    }

    /// Offers still open, with their deadlines
    pub async fn open_offers(&self) -> LedgerResult<Vec<(MatchId, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT id, offer_deadline FROM matches
             WHERE status = $1 AND offer_deadline IS NOT NULL
             ORDER BY offer_deadline",
        )
        .bind(MatchStatus::Offered.as_str())
        .fetch_all(self.ledger.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("offer_deadline")))
            .collect())
    }

    /// Offers whose deadline passed at `now`
    pub async fn overdue_offers(&self, now: DateTime<Utc>) -> LedgerResult<Vec<MatchId>> {
        let rows = sqlx::query(
            "SELECT id FROM matches
             WHERE status = $1 AND offer_deadline <= $2
             ORDER BY offer_deadline",
        )
        .bind(MatchStatus::Offered.as_str())
        .bind(now)
        .fetch_all(self.ledger.pool())
        .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }

    async fn hold_wager_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        wager_match: &Match,
        user_id: UserId,
    ) -> LedgerResult<()> {
        let ctx = match_context(wager_match);
        self.ledger
            .debit_in_tx(
                tx,
                user_id,
                wager_match.token_id,
                wager_match.wager_atomic,
                TransactionType::MatchWager,
                &ctx,
            )
            .await?;
        self.ledger
            .escrow_hold_in_tx(
                tx,
                EscrowKey::Match(wager_match.id),
                wager_match.token_id,
                wager_match.wager_atomic,
            )
            .await?;
        Ok(())
    }

    async fn refund_wager_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        wager_match: &Match,
        user_id: UserId,
    ) -> LedgerResult<()> {
        self.ledger
            .escrow_release_in_tx(
                tx,
                EscrowKey::Match(wager_match.id),
                wager_match.token_id,
                wager_match.wager_atomic,
            )
            .await?;
        self.ledger
            .credit_in_tx(
                tx,
                user_id,
                wager_match.token_id,
                wager_match.wager_atomic,
                TransactionType::MatchRefund,
                &match_context(wager_match),
            )
            .await?;
        Ok(())
    }

    async fn settle_tie_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        current: &Match,
        joiner: UserId,
    ) -> LedgerResult<Match> {
        for user_id in [current.challenger_id, joiner] {
            self.refund_wager_in_tx(tx, current, user_id).await?;
            self.stats
                .increment_in_tx(tx, user_id, MatchOutcome::Tie)
                .await?;
        }

        self.write_settlement(tx, current.id, MatchResult::Tie, Decimal::ZERO, Decimal::ZERO, None)
            .await
    }

    async fn settle_decisive_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        current: &Match,
        joiner: UserId,
        result: MatchResult,
    ) -> LedgerResult<Match> {
        let (winner, loser) = match result {
            MatchResult::ChallengerWins => (current.challenger_id, joiner),
            _ => (joiner, current.challenger_id),
        };
        let payout = compute_payout(current.wager_atomic, self.house_fee_bps)?;

        self.ledger
            .escrow_release_in_tx(tx, EscrowKey::Match(current.id), current.token_id, payout.pot)
            .await?;

        if payout.payout > Decimal::ZERO {
            let ctx = match_context(current).with_counterparty(loser);
            self.ledger
                .credit_in_tx(
                    tx,
                    winner,
                    current.token_id,
                    payout.payout,
                    TransactionType::MatchPayout,
                    &ctx,
                )
                .await?;
        }
        self.ledger
            .collect_house_in_tx(
                tx,
                current.token_id,
                payout.rake,
                TransactionType::Rake,
                &match_context(current),
            )
            .await?;

        self.stats
            .increment_in_tx(tx, winner, MatchOutcome::Win)
            .await?;
        self.stats
            .increment_in_tx(tx, loser, MatchOutcome::Loss)
            .await?;

        self.write_settlement(tx, current.id, result, payout.rake, payout.payout, Some(winner))
            .await
    }

    async fn write_settlement(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        match_id: MatchId,
        result: MatchResult,
        rake: Amount,
        payout: Amount,
        winner: Option<UserId>,
    ) -> LedgerResult<Match> {
        let row = sqlx::query(&format!(
            r#"
            UPDATE matches
            SET status = $1, result = $2, rake_atomic = $3, payout_atomic = $4,
                winner_user_id = $5, settled_at = NOW()
            WHERE id = $6
            RETURNING {MATCH_COLUMNS}
            "#
        ))
        .bind(MatchStatus::Settled.as_str())
        .bind(result.as_str())
        .bind(rake)
        .bind(payout)
        .bind(winner)
        .bind(match_id)
        .fetch_one(&mut **tx)
        .await?;

        match_from_row(&row)
    }

    async fn close_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        current: &Match,
        status: MatchStatus,
    ) -> LedgerResult<Match> {
        self.refund_wager_in_tx(tx, current, current.challenger_id)
            .await?;

        let row = sqlx::query(&format!(
            "UPDATE matches SET status = $1, settled_at = NOW() WHERE id = $2
             RETURNING {MATCH_COLUMNS}"
        ))
        .bind(status.as_str())
        .bind(current.id)
        .fetch_one(&mut **tx)
        .await?;

        match_from_row(&row)
    }
}

fn match_context(m: &Match) -> LedgerContext {
    LedgerContext::new()
        .in_context(m.context_id.clone())
        .with_metadata(serde_json::json!({ "match_id": m.id }))
}

fn invalid_state(m: &Match, expected: &'static str) -> LedgerError {
    LedgerError::InvalidState {
        entity: "match",
        id: m.id,
        expected,
        actual: m.status.to_string(),
    }
}

async fn lock_match(tx: &mut Transaction<'_, Postgres>, match_id: MatchId) -> LedgerResult<Match> {
    let row = sqlx::query(&format!(
        "SELECT {MATCH_COLUMNS} FROM matches WHERE id = $1 FOR UPDATE"
    ))
    .bind(match_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(LedgerError::NotFound {
        entity: "match",
        id: match_id,
    })?;

    match_from_row(&row)
}

fn parse_opt<T: std::str::FromStr<Err = LedgerError>>(
    value: Option<String>,
) -> LedgerResult<Option<T>> {
    value.map(|v| v.parse()).transpose()
}

/// A stored move that no longer parses is corruption, not bad input
fn parse_stored_move(value: Option<String>) -> LedgerResult<Option<MatchMove>> {
    value
        .map(|v| {
            v.parse().map_err(|_| LedgerError::Corrupt {
                field: "matches.move",
                value: v,
            })
        })
        .transpose()
}

fn match_from_row(row: &PgRow) -> LedgerResult<Match> {
    Ok(Match {
        id: row.get("id"),
        status: row.get::<String, _>("status").parse()?,
        token_id: row.get("token_id"),
        wager_atomic: row.get("wager_atomic"),
        challenger_id: row.get("challenger_id"),
        challenger_move: parse_stored_move(row.get("challenger_move"))?,
        joiner_id: row.get("joiner_id"),
        joiner_move: parse_stored_move(row.get("joiner_move"))?,
        offer_deadline: row.get("offer_deadline"),
        result: parse_opt(row.get("result"))?,
        rake_atomic: row.get("rake_atomic"),
        payout_atomic: row.get("payout_atomic"),
        winner_user_id: row.get("winner_user_id"),
        context_id: row.get("context_id"),
        message_ref: row.get("message_ref"),
        created_at: row.get("created_at"),
        settled_at: row.get("settled_at"),
    })
}
