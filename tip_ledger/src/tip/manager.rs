//! Direct tip manager.
#![allow(clippy::needless_raw_string_hashes)]

use super::models::{Tip, TipId, TipStatus};
use crate::ledger::{
    Amount, LedgerContext, LedgerError, LedgerManager, LedgerResult, TransactionType, UserId,
    bps_share, ensure_atomic,
};
use crate::token::Token;
use sqlx::{Postgres, Row, Transaction, postgres::PgRow};

const TIP_COLUMNS: &str = "id, from_user_id, to_user_id, token_id, principal_atomic, fee_atomic, \
     tax_atomic, note, context_id, status, created_at, refunded_at";

/// Direct tip manager
#[derive(Clone)]
pub struct TipManager {
    ledger: LedgerManager,
    tip_tax_bps: u32,
}

impl TipManager {
    /// Create a new tip manager
    ///
    /// # Arguments
    ///
    /// * `ledger` - Balance ledger
    /// * `tip_tax_bps` - Refundable tax charged on top of every tip
    pub fn new(ledger: LedgerManager, tip_tax_bps: u32) -> Self {
        Self {
            ledger,
            tip_tax_bps,
        }
    }

    /// Send a tip from one user to another
    ///
    /// The sender pays principal + fee + tax. The fee (per-token `tip_fee_bps`)
    /// and the tax both go to the house; only the tax comes back on refund.
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientFunds` - Sender cannot cover principal, fee and tax
    /// * `LedgerError::SelfTransfer` - Sender and recipient are the same user
    /// * `LedgerError::InactiveToken` - Token is disabled
    pub async fn send_tip(
        &self,
        from_user: UserId,
        to_user: UserId,
        token: &Token,
        amount: Amount,
        note: Option<String>,
        context_id: Option<String>,
    ) -> LedgerResult<Tip> {
        if !token.is_active {
            return Err(LedgerError::InactiveToken(token.symbol.clone()));
        }
        let amount = ensure_atomic(amount)?;
        let fee = bps_share(amount, token.tip_fee_bps.unwrap_or(0))?;
        let tax = bps_share(amount, self.tip_tax_bps)?;

        let mut ctx = LedgerContext::new()
            .in_context(context_id.clone())
            .with_fee(fee + tax)
            .with_metadata(serde_json::json!({ "fee": fee, "tax": tax }));
        if let Some(note) = &note {
            ctx = ctx.with_note(note.clone());
        }

        let mut tx = self.ledger.begin().await?;
        self.ledger
            .transfer_in_tx(
                &mut tx,
                from_user,
                to_user,
                token.id,
                amount,
                TransactionType::Tip,
                &ctx,
            )
            .await?;

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO tips
                (from_user_id, to_user_id, token_id, principal_atomic, fee_atomic, tax_atomic,
                 note, context_id, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {TIP_COLUMNS}
            "#
        ))
        .bind(from_user)
        .bind(to_user)
        .bind(token.id)
        .bind(amount)
        .bind(fee)
        .bind(tax)
        .bind(&note)
        .bind(&context_id)
        .bind(TipStatus::Completed.as_str())
        .fetch_one(&mut *tx)
        .await?;
        let tip = tip_from_row(&row)?;

        tx.commit().await?;

        log::info!(
            "Tip {}: {from_user} -> {to_user} {} (fee {fee}, tax {tax})",
            tip.id,
            token.format_atomic(amount)
        );
        Ok(tip)
    }

    /// Get a tip by id
    pub async fn get_tip(&self, tip_id: TipId) -> LedgerResult<Tip> {
        let row = sqlx::query(&format!("SELECT {TIP_COLUMNS} FROM tips WHERE id = $1"))
            .bind(tip_id)
            .fetch_optional(self.ledger.pool())
            .await?
            .ok_or(LedgerError::NotFound {
                entity: "tip",
                id: tip_id,
            })?;

        tip_from_row(&row)
    }

    /// Tips sent or received by a user, newest first
    pub async fn list_tips(&self, user_id: UserId, limit: i64) -> LedgerResult<Vec<Tip>> {
        let rows = sqlx::query(&format!(
            "SELECT {TIP_COLUMNS} FROM tips
             WHERE from_user_id = $1 OR to_user_id = $1
             ORDER BY id DESC
             LIMIT $2"
        ))
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.ledger.pool())
        .await?;

        rows.iter().map(tip_from_row).collect()
    }
}

/// Lock a tip row for the rest of the transaction
pub(crate) async fn lock_tip(tx: &mut Transaction<'_, Postgres>, tip_id: TipId) -> LedgerResult<Tip> {
    let row = sqlx::query(&format!(
        "SELECT {TIP_COLUMNS} FROM tips WHERE id = $1 FOR UPDATE"
    ))
    .bind(tip_id)
    .fetch_optional(&mut **tx)
    .await?
    .ok_or(LedgerError::NotFound {
        entity: "tip",
        id: tip_id,
    })?;

    tip_from_row(&row)
}

fn tip_from_row(row: &PgRow) -> LedgerResult<Tip> {
    Ok(Tip {
        id: row.get("id"),
        from_user_id: row.get("from_user_id"),
        to_user_id: row.get("to_user_id"),
        token_id: row.get("token_id"),
        principal_atomic: row.get("principal_atomic"),
        fee_atomic: row.get("fee_atomic"),
        tax_atomic: row.get("tax_atomic"),
        note: row.get("note"),
        context_id: row.get("context_id"),
        status: row.get::<String, _>("status").parse()?,
        created_at: row.get("created_at"),
        refunded_at: row.get("refunded_at"),
    })
}
