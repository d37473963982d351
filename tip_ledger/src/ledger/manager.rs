//! Balance ledger: atomic debit/credit/transfer primitives over per-(user, token) rows.
#![allow(clippy::needless_raw_string_hashes)]

use super::{
    errors::{LedgerError, LedgerResult, is_unique_violation},
    models::{
        Amount, ConservationReport, DepositKey, DepositReceipt, EscrowKey, LedgerContext,
        LedgerTransaction, TokenId, TransactionType, TransferReceipt, UserBalance, UserId,
        ensure_atomic,
    },
    policy::{WithdrawalLimits, WithdrawalPolicy},
};
use crate::token::Token;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};
use std::sync::Arc;

/// Ledger manager
///
/// Every public mutation has a `*_in_tx` twin taking an open transaction, so
/// composite operations can run several ledger steps in one unit of work.
#[derive(Clone)]
pub struct LedgerManager {
    pool: Arc<PgPool>,
    house_account: UserId,
    withdrawal_limits: WithdrawalLimits,
}

impl LedgerManager {
    /// Create a new ledger manager
    ///
    /// # Arguments
    ///
    /// * `pool` - Database connection pool
    /// * `house_account` - User id credited with fees, taxes and rake
    /// * `withdrawal_limits` - Default withdrawal limits in human units
    pub fn new(
        pool: Arc<PgPool>,
        house_account: UserId,
        withdrawal_limits: WithdrawalLimits,
    ) -> Self {
        Self {
            pool,
            house_account,
            withdrawal_limits,
        }
    }

    pub fn pool(&self) -> &PgPool {
        self.pool.as_ref()
    }

    pub fn house_account(&self) -> UserId {
        self.house_account
    }

    /// Start a unit of work
    pub async fn begin(&self) -> LedgerResult<Transaction<'static, Postgres>> {
        Ok(self.pool.begin().await?)
    }

    /// Get a user's balance in one token (zero if the row does not exist yet)
    pub async fn get_balance(&self, user_id: UserId, token_id: TokenId) -> LedgerResult<Amount> {
        let row = sqlx::query("SELECT amount FROM user_balances WHERE user_id = $1 AND token_id = $2")
            .bind(user_id)
            .bind(token_id)
            .fetch_optional(self.pool.as_ref())
            .await?;

        Ok(row.map(|r| r.get("amount")).unwrap_or(Decimal::ZERO))
    }

    /// Get all balance rows of a user
    pub async fn get_balances(&self, user_id: UserId) -> LedgerResult<Vec<UserBalance>> {
        let rows = sqlx::query(
            r#"
            SELECT user_id, token_id, amount, updated_at
            FROM user_balances
            WHERE user_id = $1
            ORDER BY token_id
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool.as_ref())
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| UserBalance {
                user_id: row.get("user_id"),
                token_id: row.get("token_id"),
                amount: row.get("amount"),
                updated_at: row.get("updated_at"),
            })
            .collect())
    }

    /// Debit a user
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientFunds` - Post-debit balance would be negative
    /// * `LedgerError::InvalidAmount` - Amount not a positive whole number
    pub async fn debit(
        &self,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: LedgerContext,
    ) -> LedgerResult<Amount> {
        let mut tx = self.pool.begin().await?;
        let balance = self
            .debit_in_tx(&mut tx, user_id, token_id, amount, reason, &ctx)
            .await?;
        tx.commit().await?;

        log::debug!("Debited {amount} of token {token_id} from user {user_id} ({reason})");
        Ok(balance)
    }

    /// Credit a user
    pub async fn credit(
        &self,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: LedgerContext,
    ) -> LedgerResult<Amount> {
        let mut tx = self.pool.begin().await?;
        let balance = self
            .credit_in_tx(&mut tx, user_id, token_id, amount, reason, &ctx)
            .await?;
        tx.commit().await?;

        log::debug!("Credited {amount} of token {token_id} to user {user_id} ({reason})");
        Ok(balance)
    }

    /// Move `amount` from one user to another, charging `ctx.fee` to the sender
    ///
    /// The fee is credited to the house account. Both legs commit or neither does.
    pub async fn transfer(
        &self,
        from_user: UserId,
        to_user: UserId,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: LedgerContext,
    ) -> LedgerResult<TransferReceipt> {
        let mut tx = self.pool.begin().await?;
        let receipt = self
            .transfer_in_tx(&mut tx, from_user, to_user, token_id, amount, reason, &ctx)
            .await?;
        tx.commit().await?;

        log::info!(
            "Transfer {} of token {token_id}: {from_user} -> {to_user} (fee {})",
            receipt.amount,
            receipt.fee
        );
        Ok(receipt)
    }

    /// Debit inside an open transaction and append one ledger row
    pub async fn debit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: &LedgerContext,
    ) -> LedgerResult<Amount> {
        let amount = ensure_atomic(amount)?;
        let balance = self.take(tx, user_id, token_id, amount).await?;
        self.record(tx, reason, user_id, token_id, amount, Decimal::ZERO, ctx)
            .await?;
        Ok(balance)
    }

    /// Credit inside an open transaction and append one ledger row
    pub async fn credit_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: &LedgerContext,
    ) -> LedgerResult<Amount> {
        let amount = ensure_atomic(amount)?;
        let balance = self.give(tx, user_id, token_id, amount).await?;
        self.record(tx, reason, user_id, token_id, amount, Decimal::ZERO, ctx)
            .await?;
        Ok(balance)
    }

    /// Transfer inside an open transaction; one ledger row describes both legs
    #[allow(clippy::too_many_arguments)]
    pub async fn transfer_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        from_user: UserId,
        to_user: UserId,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: &LedgerContext,
    ) -> LedgerResult<TransferReceipt> {
        if from_user == to_user {
            return Err(LedgerError::SelfTransfer);
        }
        let amount = ensure_atomic(amount)?;
        let fee = ctx.fee;
        if fee < Decimal::ZERO || !fee.fract().is_zero() {
            return Err(LedgerError::InvalidAmount(format!("invalid fee {fee}")));
        }
        let total = amount
            .checked_add(fee)
            .ok_or(LedgerError::BalanceOverflow)?;

        let from_balance = self.take(tx, from_user, token_id, total).await?;
        let to_balance = self.give(tx, to_user, token_id, amount).await?;
        if fee > Decimal::ZERO {
            self.give(tx, self.house_account, token_id, fee).await?;
        }

        let ctx = LedgerContext {
            counterparty: Some(to_user),
            ..ctx.clone()
        };
        let transaction_id = self
            .record(tx, reason, from_user, token_id, amount, fee, &ctx)
            .await?;

        Ok(TransferReceipt {
            transaction_id,
            from_balance,
            to_balance,
            amount,
            fee,
        })
    }

    /// Credit the house account inside an open transaction
    pub async fn collect_house_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_id: TokenId,
        amount: Amount,
        reason: TransactionType,
        ctx: &LedgerContext,
    ) -> LedgerResult<()> {
        if amount <= Decimal::ZERO {
            return Ok(());
        }
        let ctx = LedgerContext {
            counterparty: None,
            ..ctx.clone()
        };
        self.credit_in_tx(tx, self.house_account, token_id, amount, reason, &ctx)
            .await?;
        Ok(())
    }

    /// Debit several users and credit their sum to one user, as one ledger row
    ///
    /// Used to reverse a completed transfer whose proceeds were split between the
    /// receiver and the house. Any debit short of funds rolls back the whole move.
    pub async fn collect_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        token_id: TokenId,
        debits: &[(UserId, Amount)],
        credit_to: UserId,
        reason: TransactionType,
        ctx: &LedgerContext,
    ) -> LedgerResult<Amount> {
        let mut total = Decimal::ZERO;
        for &(user_id, amount) in debits {
            if amount.is_zero() {
                continue;
            }
            let amount = ensure_atomic(amount)?;
            self.take(tx, user_id, token_id, amount).await?;
            total = total
                .checked_add(amount)
                .ok_or(LedgerError::BalanceOverflow)?;
        }
        let total = ensure_atomic(total)?;

        let balance = self.give(tx, credit_to, token_id, total).await?;
        self.record(tx, reason, credit_to, token_id, total, Decimal::ZERO, ctx)
            .await?;
        Ok(balance)
    }

    /// Move funds into an escrow account (no ledger row: the debit that funded it has one)
    pub async fn escrow_hold_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: EscrowKey,
        token_id: TokenId,
        amount: Amount,
    ) -> LedgerResult<Amount> {
        let amount = ensure_atomic(amount)?;
        let row = sqlx::query(
            "INSERT INTO escrow_balances (escrow_key, token_id, amount, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (escrow_key, token_id)
             DO UPDATE SET
                amount = escrow_balances.amount + EXCLUDED.amount,
                updated_at = NOW()
             RETURNING amount",
        )
        .bind(key.to_string())
        .bind(token_id)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("amount"))
    }

    /// Release funds from an escrow account
    ///
    /// The caller credits the released amount to its destination.
    pub async fn escrow_release_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: EscrowKey,
        token_id: TokenId,
        amount: Amount,
    ) -> LedgerResult<Amount> {
        if amount.is_zero() {
            return self.escrow_balance_in_tx(tx, key, token_id).await;
        }
        let amount = ensure_atomic(amount)?;
        let row = sqlx::query(
            "UPDATE escrow_balances
             SET amount = amount - $1, updated_at = NOW()
             WHERE escrow_key = $2 AND token_id = $3 AND amount >= $1
             RETURNING amount",
        )
        .bind(amount)
        .bind(key.to_string())
        .bind(token_id)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(row.get("amount")),
            None => {
                let held = self.escrow_balance_in_tx(tx, key, token_id).await?;
                log::error!("Escrow {key} holds {held} of token {token_id}, cannot release {amount}");
                Err(LedgerError::Corrupt {
                    field: "escrow",
                    value: format!("{key} holds {held}, release of {amount} requested"),
                })
            }
        }
    }

    async fn escrow_balance_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        key: EscrowKey,
        token_id: TokenId,
    ) -> LedgerResult<Amount> {
        let row = sqlx::query(
            "SELECT amount FROM escrow_balances WHERE escrow_key = $1 AND token_id = $2",
        )
        .bind(key.to_string())
        .bind(token_id)
        .fetch_optional(&mut **tx)
        .await?;

        Ok(row.map(|r| r.get("amount")).unwrap_or(Decimal::ZERO))
    }

    /// Amount currently held in an escrow account
    pub async fn escrow_balance(&self, key: EscrowKey, token_id: TokenId) -> LedgerResult<Amount> {
        let row = sqlx::query(
            "SELECT amount FROM escrow_balances WHERE escrow_key = $1 AND token_id = $2",
        )
        .bind(key.to_string())
        .bind(token_id)
        .fetch_optional(self.pool.as_ref())
        .await?;

        Ok(row.map(|r| r.get("amount")).unwrap_or(Decimal::ZERO))
    }

    /// Credit a watcher-verified deposit exactly once
    ///
    /// A repeated key, sequential or concurrent, returns `duplicate: true`
    /// without crediting.
    pub async fn credit_deposit(
        &self,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        key: &DepositKey,
    ) -> LedgerResult<DepositReceipt> {
        let idempotency_key = key.as_key();
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT id FROM ledger_transactions WHERE idempotency_key = $1")
            .bind(&idempotency_key)
            .fetch_optional(&mut *tx)
            .await?;

        if existing.is_some() {
            drop(tx);
            log::info!("Ignoring duplicate deposit {idempotency_key}");
            return self.duplicate_deposit(user_id, token_id).await;
        }

        let ctx = LedgerContext::new()
            .with_idempotency_key(idempotency_key.clone())
            .with_metadata(serde_json::json!({
                "source_tx": key.source_tx,
                "payer": key.payer,
            }));

        let credited = async {
            let amount = ensure_atomic(amount)?;
            let balance = self.give(&mut tx, user_id, token_id, amount).await?;
            let id = self
                .record(
                    &mut tx,
                    TransactionType::Deposit,
                    user_id,
                    token_id,
                    amount,
                    Decimal::ZERO,
                    &ctx,
                )
                .await?;
            Ok::<_, LedgerError>((balance, id))
        }
        .await;

        match credited {
            Ok((balance, id)) => {
                tx.commit().await?;
                log::info!("Deposit {idempotency_key} credited {amount} to user {user_id}");
                Ok(DepositReceipt {
                    duplicate: false,
                    balance,
                    transaction_id: Some(id),
                })
            }
            Err(LedgerError::Database(e)) if is_unique_violation(&e) => {
                drop(tx);
                log::info!("Concurrent duplicate deposit {idempotency_key} rejected");
                self.duplicate_deposit(user_id, token_id).await
            }
            Err(e) => Err(e),
        }
    }

    async fn duplicate_deposit(
        &self,
        user_id: UserId,
        token_id: TokenId,
    ) -> LedgerResult<DepositReceipt> {
        Ok(DepositReceipt {
            duplicate: true,
            balance: self.get_balance(user_id, token_id).await?,
            transaction_id: None,
        })
    }

    /// Sum of a user's withdrawals in a token since `since`
    pub async fn withdrawn_since(
        &self,
        user_id: UserId,
        token_id: TokenId,
        since: DateTime<Utc>,
    ) -> LedgerResult<Amount> {
        let row = sqlx::query(
            "SELECT COALESCE(SUM(amount), 0) AS total
             FROM ledger_transactions
             WHERE user_id = $1 AND token_id = $2 AND tx_type = $3 AND created_at >= $4",
        )
        .bind(user_id)
        .bind(token_id)
        .bind(TransactionType::Withdraw.as_str())
        .bind(since)
        .fetch_one(self.pool.as_ref())
        .await?;

        Ok(row.get("total"))
    }

    /// Evaluate the withdrawal policy for `token` against the last 24 hours
    pub async fn check_withdrawal(
        &self,
        user_id: UserId,
        token: &Token,
        amount: Amount,
    ) -> LedgerResult<()> {
        let amount = ensure_atomic(amount)?;
        let policy = WithdrawalPolicy::for_token(&self.withdrawal_limits, token)?;
        let withdrawn = self
            .withdrawn_since(user_id, token.id, Utc::now() - Duration::hours(24))
            .await?;
        policy.evaluate(amount, withdrawn)
    }

    /// Debit a policy-approved withdrawal exactly once per idempotency key
    ///
    /// # Errors
    ///
    /// * `LedgerError::InsufficientFunds` - Not enough balance
    /// * `LedgerError::DuplicateTransaction` - Idempotency key already used
    pub async fn withdraw(
        &self,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        idempotency_key: String,
        destination: &str,
    ) -> LedgerResult<Amount> {
        let ctx = LedgerContext::new()
            .with_idempotency_key(idempotency_key.clone())
            .with_metadata(serde_json::json!({ "destination": destination }));
        match self
            .debit(user_id, token_id, amount, TransactionType::Withdraw, ctx)
            .await
        {
            Err(LedgerError::Database(e)) if is_unique_violation(&e) => {
                Err(LedgerError::DuplicateTransaction(idempotency_key))
            }
            other => other,
        }
    }

    /// Conservation check for one token
    pub async fn audit_token(&self, token_id: TokenId) -> LedgerResult<ConservationReport> {
        let row = sqlx::query(
            r#"
            SELECT
                (SELECT COALESCE(SUM(amount), 0) FROM user_balances WHERE token_id = $1) AS balances,
                (SELECT COALESCE(SUM(amount), 0) FROM escrow_balances WHERE token_id = $1) AS escrow,
                (SELECT COALESCE(SUM(amount), 0) FROM ledger_transactions
                    WHERE token_id = $1 AND tx_type = $2) AS deposits,
                (SELECT COALESCE(SUM(amount), 0) FROM ledger_transactions
                    WHERE token_id = $1 AND tx_type = $3) AS withdrawals
            "#,
        )
        .bind(token_id)
        .bind(TransactionType::Deposit.as_str())
        .bind(TransactionType::Withdraw.as_str())
        .fetch_one(self.pool.as_ref())
        .await?;

        let report = ConservationReport {
            token_id,
            total_balances: row.get("balances"),
            total_escrow: row.get("escrow"),
            total_deposits: row.get("deposits"),
            total_withdrawals: row.get("withdrawals"),
        };

        if !report.is_balanced() {
            log::error!("Conservation check failed for token {token_id}: {report:?}");
        }
        Ok(report)
    }

    /// Get ledger transactions for a user, newest first
    pub async fn get_transactions(
        &self,
        user_id: UserId,
        limit: i64,
    ) -> LedgerResult<Vec<LedgerTransaction>> {
        let rows = sqlx::query(
            r#"
            SELECT id, tx_type, user_id, counterparty_user_id, token_id, amount, fee,
                   context_id, metadata, idempotency_key, created_at
            FROM ledger_transactions
            WHERE user_id = $1
            ORDER BY id DESC
            LIMIT $2
            "#,
        )
        .bind(user_id)
        .bind(limit)
        .fetch_all(self.pool.as_ref())
        .await?;

        rows.iter().map(transaction_from_row).collect()
    }

    /// Atomically subtract from a balance row, failing instead of going negative
    async fn take(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
    ) -> LedgerResult<Amount> {
        // Check and write in one statement so concurrent debits serialize on the row lock
        let row = sqlx::query(
            "UPDATE user_balances
             SET amount = amount - $1, updated_at = NOW()
             WHERE user_id = $2 AND token_id = $3 AND amount >= $1
             RETURNING amount",
        )
        .bind(amount)
        .bind(user_id)
        .bind(token_id)
        .fetch_optional(&mut **tx)
        .await?;

        match row {
            Some(row) => Ok(row.get("amount")),
            None => {
                let available = sqlx::query(
                    "SELECT amount FROM user_balances WHERE user_id = $1 AND token_id = $2",
                )
                .bind(user_id)
                .bind(token_id)
                .fetch_optional(&mut **tx)
                .await?
                .map(|r| r.get("amount"))
                .unwrap_or(Decimal::ZERO);

                Err(LedgerError::InsufficientFunds {
                    user_id,
                    token_id,
                    available,
                    required: amount,
                })
            }
        }
    }

    /// Atomically add to a balance row, creating it on first credit
    async fn give(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
    ) -> LedgerResult<Amount> {
        let row = sqlx::query(
            "INSERT INTO user_balances (user_id, token_id, amount, updated_at)
             VALUES ($1, $2, $3, NOW())
             ON CONFLICT (user_id, token_id)
             DO UPDATE SET
                amount = user_balances.amount + EXCLUDED.amount,
                updated_at = NOW()
             RETURNING amount",
        )
        .bind(user_id)
        .bind(token_id)
        .bind(amount)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("amount"))
    }

    /// Append one row to the transaction log
    #[allow(clippy::too_many_arguments)]
    async fn record(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        tx_type: TransactionType,
        user_id: UserId,
        token_id: TokenId,
        amount: Amount,
        fee: Amount,
        ctx: &LedgerContext,
    ) -> LedgerResult<i64> {
        let row = sqlx::query(
            r#"
            INSERT INTO ledger_transactions
                (tx_type, user_id, counterparty_user_id, token_id, amount, fee, context_id, metadata, idempotency_key)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING id
            "#,
        )
        .bind(tx_type.as_str())
        .bind(user_id)
        .bind(ctx.counterparty)
        .bind(token_id)
        .bind(amount)
        .bind(fee)
        .bind(&ctx.context_id)
        .bind(ctx.metadata_json())
        .bind(&ctx.idempotency_key)
        .fetch_one(&mut **tx)
        .await?;

        Ok(row.get("id"))
    }
}

fn transaction_from_row(row: &PgRow) -> LedgerResult<LedgerTransaction> {
    Ok(LedgerTransaction {
        id: row.get("id"),
        tx_type: row.get::<String, _>("tx_type").parse()?,
        user_id: row.get("user_id"),
        counterparty_user_id: row.get("counterparty_user_id"),
        token_id: row.get("token_id"),
        amount: row.get("amount"),
        fee: row.get("fee"),
        context_id: row.get("context_id"),
        metadata: row.get("metadata"),
        idempotency_key: row.get("idempotency_key"),
        created_at: row.get("created_at"),
    })
}
