//! Idempotent compensating transactions.
//!
//! Every refund locks its entity row, checks `refunded_at`, and either returns
//! the recorded receipt or performs the whole reversal in the same transaction.
//! Concurrent callers queue on the row lock; exactly one of them credits.

use super::models::{RefundKind, RefundReceipt};
use crate::group_tip::{ClaimStatus, GroupTip, GroupTipId, GroupTipStatus, LockMode, lock_group_tip};
use crate::ledger::{
    EscrowKey, LedgerContext, LedgerError, LedgerManager, LedgerResult, TransactionType,
};
use crate::tip::{Tip, TipId, TipStatus, lock_tip};
use chrono::{DateTime, Utc};
use sqlx::{Postgres, Row, Transaction};

/// Refund engine
#[derive(Clone)]
pub struct RefundEngine {
    ledger: LedgerManager,
}

impl RefundEngine {
    pub fn new(ledger: LedgerManager) -> Self {
        Self { ledger }
    }

    /// Reverse a completed tip: principal back from the recipient, tax back from the house
    ///
    /// The service fee is not returned.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientFunds` - Recipient already spent the principal
    /// * `LedgerError::InvalidState` - Tip is not COMPLETED
    pub async fn refund_tip(&self, tip_id: TipId) -> LedgerResult<RefundReceipt> {
        let mut tx = self.ledger.begin().await?;
        let tip = lock_tip(&mut tx, tip_id).await?;

        if let Some(refunded_at) = tip.refunded_at {
            log::debug!("Tip {tip_id} already refunded");
            return Ok(tip_receipt(&tip, refunded_at, true));
        }
        if tip.status != TipStatus::Completed {
            return Err(LedgerError::InvalidState {
                entity: "tip",
                id: tip_id,
                expected: "completed",
                actual: tip.status.to_string(),
            });
        }

        let ctx = LedgerContext::new()
            .in_context(tip.context_id.clone())
            .with_counterparty(tip.to_user_id)
            .with_metadata(serde_json::json!({
                "tip_id": tip.id,
                "principal": tip.principal_atomic,
                "tax": tip.tax_atomic,
            }));
        self.ledger
            .collect_in_tx(
                &mut tx,
                tip.token_id,
                &[
                    (tip.to_user_id, tip.principal_atomic),
                    (self.ledger.house_account(), tip.tax_atomic),
                ],
                tip.from_user_id,
                TransactionType::TipRefund,
                &ctx,
            )
            .await?;

        let row = sqlx::query(
            "UPDATE tips SET status = $1, refunded_at = NOW() WHERE id = $2 RETURNING refunded_at",
        )
        .bind(TipStatus::Refunded.as_str())
        .bind(tip_id)
        .fetch_one(&mut *tx)
        .await?;
        let refunded_at: DateTime<Utc> = row.get("refunded_at");

        tx.commit().await?;

        log::info!(
            "Tip {tip_id} refunded: {} returned to user {}",
            tip.principal_atomic + tip.tax_atomic,
            tip.from_user_id
        );
        Ok(tip_receipt(&tip, refunded_at, false))
    }

    /// Return an active group tip's principal and tax to its creator
    ///
    /// # Errors
    ///
    /// * `LedgerError::InvalidState` - Group tip was already finalized
    pub async fn refund_group_tip(&self, group_tip_id: GroupTipId) -> LedgerResult<RefundReceipt> {
        self.refund_group_tip_as(group_tip_id, GroupTipStatus::Refunded)
            .await
    }

    /// Undo a group tip whose announcement failed; terminal status FAILED
    pub async fn compensate_group_tip(
        &self,
        group_tip_id: GroupTipId,
    ) -> LedgerResult<RefundReceipt> {
        self.refund_group_tip_as(group_tip_id, GroupTipStatus::Failed)
            .await
    }

    async fn refund_group_tip_as(
        &self,
        group_tip_id: GroupTipId,
        terminal: GroupTipStatus,
    ) -> LedgerResult<RefundReceipt> {
        let mut tx = self.ledger.begin().await?;
        let group_tip = lock_group_tip(&mut tx, group_tip_id, LockMode::Exclusive).await?;
        let receipt = self
            .refund_group_tip_locked_in_tx(&mut tx, &group_tip, terminal)
            .await?;
        tx.commit().await?;
        Ok(receipt)
    }

    /// Refund a group tip whose row the caller already locked `FOR UPDATE`
    pub(crate) async fn refund_group_tip_locked_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        group_tip: &GroupTip,
        terminal: GroupTipStatus,
    ) -> LedgerResult<RefundReceipt> {
        if let Some(refunded_at) = group_tip.refunded_at {
            log::debug!("Group tip {} already refunded", group_tip.id);
            return Ok(group_tip_receipt(group_tip, refunded_at, true));
        }
        if group_tip.status != GroupTipStatus::Active {
            return Err(LedgerError::InvalidState {
                entity: "group tip",
                id: group_tip.id,
                expected: "active",
                actual: group_tip.status.to_string(),
            });
        }

        let escrowed = group_tip.escrowed();
        self.ledger
            .escrow_release_in_tx(
                tx,
                EscrowKey::GroupTip(group_tip.id),
                group_tip.token_id,
                escrowed,
            )
            .await?;

        let ctx = LedgerContext::new()
            .in_context(group_tip.context_id.clone())
            .with_metadata(serde_json::json!({
                "group_tip_id": group_tip.id,
                "principal": group_tip.total_atomic,
                "tax": group_tip.tax_atomic,
                "status": terminal.as_str(),
            }));
        self.ledger
            .credit_in_tx(
                tx,
                group_tip.creator_id,
                group_tip.token_id,
                escrowed,
                TransactionType::GroupTipRefund,
                &ctx,
            )
            .await?;

        sqlx::query(
            "UPDATE group_tip_claims SET status = $1, refunded_at = NOW()
             WHERE group_tip_id = $2 AND status = $3",
        )
        .bind(ClaimStatus::Refunded.as_str())
        .bind(group_tip.id)
        .bind(ClaimStatus::Pending.as_str())
        .execute(&mut **tx)
        .await?;

        let row = sqlx::query(
            "UPDATE group_tips SET status = $1, refunded_at = NOW()
             WHERE id = $2
             RETURNING refunded_at",
        )
        .bind(terminal.as_str())
        .bind(group_tip.id)
        .fetch_one(&mut **tx)
        .await?;
        let refunded_at: DateTime<Utc> = row.get("refunded_at");

        log::info!(
            "Group tip {} {terminal}: {escrowed} returned to user {}",
            group_tip.id,
            group_tip.creator_id
        );
        Ok(group_tip_receipt(group_tip, refunded_at, false))
    }
}

fn tip_receipt(tip: &Tip, refunded_at: DateTime<Utc>, already_refunded: bool) -> RefundReceipt {
    RefundReceipt {
        kind: RefundKind::Tip,
        entity_id: tip.id,
        user_id: tip.from_user_id,
        token_id: tip.token_id,
        principal: tip.principal_atomic,
        tax: tip.tax_atomic,
        refunded_at,
        already_refunded,
    }
}

fn group_tip_receipt(
    group_tip: &GroupTip,
    refunded_at: DateTime<Utc>,
    already_refunded: bool,
) -> RefundReceipt {
    RefundReceipt {
        kind: RefundKind::GroupTip,
        entity_id: group_tip.id,
        user_id: group_tip.creator_id,
        token_id: group_tip.token_id,
        principal: group_tip.total_atomic,
        tax: group_tip.tax_atomic,
        refunded_at,
        already_refunded,
    }
}
