//! Group tip lifecycle: create, claim, finalize-or-refund.
#![allow(clippy::needless_raw_string_hashes)]

use super::{
    models::{
        ClaimOutcome, ClaimPayout, ClaimStatus, GroupTip, GroupTipClaim, GroupTipId,
        GroupTipOutcome, GroupTipStatus,
    },
    split::split_evenly,
};
use crate::ledger::{
    Amount, EscrowKey, LedgerContext, LedgerError, LedgerManager, LedgerResult, TransactionType,
    UserId, bps_share, ensure_atomic, is_unique_violation,
};
use crate::notify::Announcer;
use crate::refund::RefundEngine;
use crate::token::Token;
use chrono::{DateTime, Duration, Utc};
use sqlx::{Postgres, Row, Transaction, postgres::PgRow};
use std::sync::Arc;

const GROUP_TIP_COLUMNS: &str = "id, creator_id, token_id, total_atomic, tax_atomic, \
     duration_seconds, expires_at, status, context_id, message_ref, created_at, finalized_at, \
     refunded_at";

const CLAIM_COLUMNS: &str =
    "id, group_tip_id, user_id, status, payout_atomic, created_at, claimed_at, refunded_at";

/// Row lock taken on a group tip
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// `FOR SHARE`: claims, which may run concurrently with each other
    Shared,
    /// `FOR UPDATE`: finalize and refund, which exclude every claim
    Exclusive,
}

/// Group tip manager
#[derive(Clone)]
pub struct GroupTipManager {
    ledger: LedgerManager,
    refunds: RefundEngine,
    announcer: Arc<dyn Announcer>,
    tax_bps: u32,
    min_duration_secs: i64,
    max_duration_secs: i64,
}

impl GroupTipManager {
    /// Create a new group tip manager
    ///
    /// # Arguments
    ///
    /// * `ledger` - Balance ledger
    /// * `refunds` - Refund engine used for zero-claim and failed-posting refunds
    /// * `announcer` - Posts new group tips to chat
    /// * `tax_bps` - Default refundable tax; a token's `tip_fee_bps` overrides it
    /// * `min_duration_secs` / `max_duration_secs` - Allowed claim window
    pub fn new(
        ledger: LedgerManager,
        refunds: RefundEngine,
        announcer: Arc<dyn Announcer>,
        tax_bps: u32,
        min_duration_secs: i64,
        max_duration_secs: i64,
    ) -> Self {
        Self {
            ledger,
            refunds,
            announcer,
            tax_bps,
            min_duration_secs,
            max_duration_secs,
        }
    }

    /// Create a group tip and announce it
    ///
    /// Principal and tax leave the creator's balance and sit in escrow until the
    /// tip resolves. If the announcement fails the tip is refunded with status
    /// FAILED before returning.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidDuration` - Duration outside the configured bounds
    /// * `LedgerError::InsufficientFunds` - Creator cannot cover principal and tax
    /// * `LedgerError::PostingFailure` - Announcement failed; funds were returned
    pub async fn create_group_tip(
        &self,
        creator: UserId,
        token: &Token,
        total: Amount,
        duration_seconds: i64,
        context_id: Option<String>,
    ) -> LedgerResult<GroupTip> {
        if !token.is_active {
            return Err(LedgerError::InactiveToken(token.symbol.clone()));
        }
        if duration_seconds < self.min_duration_secs || duration_seconds > self.max_duration_secs {
            return Err(LedgerError::InvalidDuration {
                seconds: duration_seconds,
                min: self.min_duration_secs,
                max: self.max_duration_secs,
            });
        }
        let total = ensure_atomic(total)?;
        let tax = bps_share(total, token.tip_fee_bps.unwrap_or(self.tax_bps))?;
        let expires_at = Utc::now() + Duration::seconds(duration_seconds);

        let mut tx = self.ledger.begin().await?;
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO group_tips
                (creator_id, token_id, total_atomic, tax_atomic, duration_seconds, expires_at,
                 status, context_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            RETURNING {GROUP_TIP_COLUMNS}
            "#
        ))
        .bind(creator)
        .bind(token.id)
        .bind(total)
        .bind(tax)
        .bind(duration_seconds)
        .bind(expires_at)
        .bind(GroupTipStatus::Active.as_str())
        .bind(&context_id)
        .fetch_one(&mut *tx)
        .await?;
        let created = group_tip_from_row(&row)?;

        let ctx = LedgerContext::new()
            .in_context(context_id)
            .with_metadata(serde_json::json!({
                "group_tip_id": created.id,
                "principal": total,
                "tax": tax,
            }));
        self.ledger
            .debit_in_tx(
                &mut tx,
                creator,
                token.id,
                created.escrowed(),
                TransactionType::GroupTipCreate,
                &ctx,
            )
            .await?;
        self.ledger
            .escrow_hold_in_tx(
                &mut tx,
                EscrowKey::GroupTip(created.id),
                token.id,
                created.escrowed(),
            )
            .await?;
        tx.commit().await?;

        log::info!(
            "Group tip {} created by {creator}: {} for {duration_seconds}s",
            created.id,
            token.format_atomic(total)
        );

        match self.announcer.announce_group_tip(&created, token).await {
            Ok(message_ref) => {
                sqlx::query("UPDATE group_tips SET message_ref = $1 WHERE id = $2")
                    .bind(&message_ref)
                    .bind(created.id)
                    .execute(self.ledger.pool())
                    .await?;
                Ok(GroupTip {
                    message_ref: Some(message_ref),
                    ..created
                })
            }
            Err(e) => {
                log::warn!("Announcing group tip {} failed: {e}", created.id);
                if let Err(refund_err) = self.refunds.compensate_group_tip(created.id).await {
                    // Left ACTIVE; the expiry sweep resolves it
                    log::error!(
                        "Compensating group tip {} failed: {refund_err}",
                        created.id
                    );
                }
                Err(LedgerError::PostingFailure {
                    group_tip_id: created.id,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Claim a share of a group tip
    ///
    /// A claim that finds the tip expired or already resolved records nothing,
    /// drives finalize and reports [`ClaimOutcome::Expired`].
    ///
    /// # Errors
    ///
    /// * `LedgerError::SelfClaim` - Creator tried to claim
    /// * `LedgerError::AlreadyClaimed` - User already holds a claim
    pub async fn claim_group_tip(
        &self,
        group_tip_id: GroupTipId,
        user_id: UserId,
    ) -> LedgerResult<ClaimOutcome> {
        let mut tx = self.ledger.begin().await?;
        let group_tip = lock_group_tip(&mut tx, group_tip_id, LockMode::Shared).await?;

        if group_tip.status != GroupTipStatus::Active || group_tip.is_expired_at(Utc::now()) {
            tx.rollback().await?;
            let outcome = self.finalize_group_tip(group_tip_id).await?;
            return Ok(ClaimOutcome::Expired(outcome));
        }
        if group_tip.creator_id == user_id {
            return Err(LedgerError::SelfClaim);
        }

        let inserted = sqlx::query(&format!(
            r#"
            INSERT INTO group_tip_claims (group_tip_id, user_id, status)
            VALUES ($1, $2, $3)
            RETURNING {CLAIM_COLUMNS}
            "#
        ))
        .bind(group_tip_id)
        .bind(user_id)
        .bind(ClaimStatus::Pending.as_str())
        .fetch_one(&mut *tx)
        .await;

        let row = match inserted {
            Ok(row) => row,
            Err(e) if is_unique_violation(&e) => {
                return Err(LedgerError::AlreadyClaimed(group_tip_id));
            }
            Err(e) => return Err(e.into()),
        };
        let claim = claim_from_row(&row)?;
        tx.commit().await?;

        log::debug!("User {user_id} claimed group tip {group_tip_id}");
        Ok(ClaimOutcome::Claimed(claim))
    }

    /// Resolve a group tip exactly once
    ///
    /// With no pending claims the creator is refunded (REFUNDED). Otherwise the
    /// principal is split in claim order and the tax goes to the house
    /// (FINALIZED). Calls after the first return the recorded outcome with
    /// `already_terminal` set.
    pub async fn finalize_group_tip(&self, group_tip_id: GroupTipId) -> LedgerResult<GroupTipOutcome> {
        let mut tx = self.ledger.begin().await?;
        let group_tip = lock_group_tip(&mut tx, group_tip_id, LockMode::Exclusive).await?;

        if group_tip.status.is_terminal() {
            tx.rollback().await?;
            return self.recorded_outcome(&group_tip, true).await;
        }

        let claims = pending_claims(&mut tx, group_tip_id).await?;
        let outcome = if claims.is_empty() {
            let receipt = self
                .refunds
                .refund_group_tip_locked_in_tx(&mut tx, &group_tip, GroupTipStatus::Refunded)
                .await?;
            GroupTipOutcome {
                group_tip_id,
                creator_id: group_tip.creator_id,
                token_id: group_tip.token_id,
                status: GroupTipStatus::Refunded,
                payouts: Vec::new(),
                refunded: Some(receipt.amount()),
                already_terminal: false,
            }
        } else {
            self.pay_out_in_tx(&mut tx, &group_tip, &claims).await?
        };
        tx.commit().await?;

        log::info!(
            "Group tip {group_tip_id} {} with {} claim(s)",
            outcome.status,
            outcome.payouts.len()
        );
        Ok(outcome)
    }

    async fn pay_out_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        group_tip: &GroupTip,
        claims: &[GroupTipClaim],
    ) -> LedgerResult<GroupTipOutcome> {
        let key = EscrowKey::GroupTip(group_tip.id);
        self.ledger
            .escrow_release_in_tx(tx, key, group_tip.token_id, group_tip.escrowed())
            .await?;

        let shares = split_evenly(group_tip.total_atomic, claims.len())?;
        let mut payouts = Vec::with_capacity(claims.len());
        for (claim, share) in claims.iter().zip(shares) {
            if !share.is_zero() {
                let ctx = LedgerContext::new()
                    .in_context(group_tip.context_id.clone())
                    .with_counterparty(group_tip.creator_id)
                    .with_metadata(serde_json::json!({ "group_tip_id": group_tip.id }));
                self.ledger
                    .credit_in_tx(
                        tx,
                        claim.user_id,
                        group_tip.token_id,
                        share,
                        TransactionType::GroupTipPayout,
                        &ctx,
                    )
                    .await?;
            }

            sqlx::query(
                "UPDATE group_tip_claims
                 SET status = $1, payout_atomic = $2, claimed_at = NOW()
                 WHERE id = $3",
            )
            .bind(ClaimStatus::Claimed.as_str())
            .bind(share)
            .bind(claim.id)
            .execute(&mut **tx)
            .await?;

            payouts.push(ClaimPayout {
                user_id: claim.user_id,
                amount: share,
            });
        }

        let ctx = LedgerContext::new()
            .in_context(group_tip.context_id.clone())
            .with_metadata(serde_json::json!({ "group_tip_id": group_tip.id }));
        self.ledger
            .collect_house_in_tx(tx, group_tip.token_id, group_tip.tax_atomic, TransactionType::Fee, &ctx)
            .await?;

        sqlx::query("UPDATE group_tips SET status = $1, finalized_at = NOW() WHERE id = $2")
            .bind(GroupTipStatus::Finalized.as_str())
            .bind(group_tip.id)
            .execute(&mut **tx)
            .await?;

        Ok(GroupTipOutcome {
            group_tip_id: group_tip.id,
            creator_id: group_tip.creator_id,
            token_id: group_tip.token_id,
            status: GroupTipStatus::Finalized,
            payouts,
            refunded: None,
            already_terminal: false,
        })
    }

    /// Outcome of an already-resolved group tip, rebuilt from stored rows
    async fn recorded_outcome(
        &self,
        group_tip: &GroupTip,
        already_terminal: bool,
    ) -> LedgerResult<GroupTipOutcome> {
        let payouts = match group_tip.status {
            GroupTipStatus::Finalized => claimed_payouts(&self.get_claims(group_tip.id).await?)?,
            _ => Vec::new(),
        };
        let refunded = group_tip.refunded_at.map(|_| group_tip.escrowed());

        Ok(GroupTipOutcome {
            group_tip_id: group_tip.id,
            creator_id: group_tip.creator_id,
            token_id: group_tip.token_id,
            status: group_tip.status,
            payouts,
            refunded,
            already_terminal,
        })
    }

    /// Get a group tip by id
    pub async fn get_group_tip(&self, group_tip_id: GroupTipId) -> LedgerResult<GroupTip> {
        let row = sqlx::query(&format!(
            "SELECT {GROUP_TIP_COLUMNS} FROM group_tips WHERE id = $1"
        ))
        .bind(group_tip_id)
        .fetch_optional(self.ledger.pool())
        .await?
        .ok_or(LedgerError::NotFound {
            entity: "group tip",
            id: group_tip_id,
        })?;

        group_tip_from_row(&row)
    }

    /// All claims of a group tip in claim order
    pub async fn get_claims(&self, group_tip_id: GroupTipId) -> LedgerResult<Vec<GroupTipClaim>> {
        let rows = sqlx::query(&format!(
            "SELECT {CLAIM_COLUMNS} FROM group_tip_claims WHERE group_tip_id = $1 ORDER BY id"
        ))
        .bind(group_tip_id)
        .fetch_all(self.ledger.pool())
        .await?;

        rows.iter().map(claim_from_row).collect()
    }

    /// Active group tips with their expiry
    pub async fn active_group_tips(&self) -> LedgerResult<Vec<(GroupTipId, DateTime<Utc>)>> {
        let rows = sqlx::query(
            "SELECT id, expires_at FROM group_tips WHERE status = $1 ORDER BY expires_at",
        )
        .bind(GroupTipStatus::Active.as_str())
        .fetch_all(self.ledger.pool())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get("id"), row.get("expires_at")))
            .collect())
    }

    /// Active group tips whose expiry passed at `now`
    pub async fn overdue_group_tips(&self, now: DateTime<Utc>) -> LedgerResult<Vec<GroupTipId>> {
        let rows = sqlx::query(
            "SELECT id FROM group_tips WHERE status = $1 AND expires_at <= $2 ORDER BY expires_at",
        )
        .bind(GroupTipStatus::Active.as_str())
        .bind(now)
        .fetch_all(self.ledger.pool())
        .await?;

        Ok(rows.into_iter().map(|row| row.get("id")).collect())
    }
}

/// Lock a group tip row for the rest of the transaction
pub(crate) async fn lock_group_tip(
    tx: &mut Transaction<'_, Postgres>,
    group_tip_id: GroupTipId,
    mode: LockMode,
) -> LedgerResult<GroupTip> {
    let lock = match mode {
        LockMode::Shared => "FOR SHARE",
        LockMode::Exclusive => "FOR UPDATE",
    };
    let row = sqlx::query(&format!(
        "SELECT {GROUP_TIP_COLUMNS} FROM group_tips WHERE id = $1 {lock}"
    ))
    .bind(group_tip_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(LedgerError::NotFound {
        entity: "group tip",
        id: group_tip_id,
    })?;

    group_tip_from_row(&row)
}

async fn pending_claims(
    tx: &mut Transaction<'_, Postgres>,
    group_tip_id: GroupTipId,
) -> LedgerResult<Vec<GroupTipClaim>> {
    let rows = sqlx::query(&format!(
        "SELECT {CLAIM_COLUMNS} FROM group_tip_claims
         WHERE group_tip_id = $1 AND status = $2
         ORDER BY id"
    ))
    .bind(group_tip_id)
    .bind(ClaimStatus::Pending.as_str())
    .fetch_all(&mut **tx)
    .await?;

    rows.iter().map(claim_from_row).collect()
}

/// Stored payouts of the claimed rows, in claim order
///
/// A claimed row always carries its payout; a missing one is corruption.
fn claimed_payouts(claims: &[GroupTipClaim]) -> LedgerResult<Vec<ClaimPayout>> {
    claims
        .iter()
        .filter(|c| c.status == ClaimStatus::Claimed)
        .map(|c| {
            let amount = c.payout_atomic.ok_or_else(|| LedgerError::Corrupt {
                field: "group_tip_claims.payout_atomic",
                value: format!("NULL for claim {}", c.id),
            })?;
            Ok(ClaimPayout {
                user_id: c.user_id,
                amount,
            })
        })
        .collect()
}

fn group_tip_from_row(row: &PgRow) -> LedgerResult<GroupTip> {
    Ok(GroupTip {
        id: row.get("id"),
        creator_id: row.get("creator_id"),
        token_id: row.get("token_id"),
        total_atomic: row.get("total_atomic"),
        tax_atomic: row.get("tax_atomic"),
        duration_seconds: row.get("duration_seconds"),
        expires_at: row.get("expires_at"),
        status: row.get::<String, _>("status").parse()?,
        context_id: row.get("context_id"),
        message_ref: row.get("message_ref"),
        created_at: row.get("created_at"),
        finalized_at: row.get("finalized_at"),
        refunded_at: row.get("refunded_at"),
    })
}

fn claim_from_row(row: &PgRow) -> LedgerResult<GroupTipClaim> {
    Ok(GroupTipClaim {
        id: row.get("id"),
        group_tip_id: row.get("group_tip_id"),
        user_id: row.get("user_id"),
        status: row.get::<String, _>("status").parse()?,
        payout_atomic: row.get("payout_atomic"),
        created_at: row.get("created_at"),
        claimed_at: row.get("claimed_at"),
        refunded_at: row.get("refunded_at"),
    })
}
