//! Repository trait definitions for testability and dependency injection.
//!
//! Token reference data sits behind a trait so the registry can be loaded from
//! PostgreSQL in production and from fixtures in tests.

use async_trait::async_trait;
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::ledger::{LedgerError, LedgerResult, TokenId};
use crate::token::{MAX_DECIMALS, NewToken, Token};

/// Trait for token repository operations
#[async_trait]
pub trait TokenRepository: Send + Sync {
    /// List every token, active or not
    async fn list_tokens(&self) -> LedgerResult<Vec<Token>>;

    /// Find token by id
    async fn find_by_id(&self, token_id: TokenId) -> LedgerResult<Option<Token>>;

    /// Register a new token (admin tooling and tests)
    async fn insert_token(&self, token: &NewToken) -> LedgerResult<Token>;

    /// Enable or disable a token
    async fn set_active(&self, token_id: TokenId, active: bool) -> LedgerResult<()>;
}

/// Default PostgreSQL implementation of `TokenRepository`
pub struct PgTokenRepository {
    pool: PgPool,
}

impl PgTokenRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

const TOKEN_COLUMNS: &str = "id, contract_address, symbol, decimals, is_active, tip_fee_bps, \
                             min_withdraw, max_withdraw, daily_withdraw_cap";

fn token_from_row(row: &PgRow) -> Token {
    Token {
        id: row.get("id"),
        contract_address: row.get("contract_address"),
        symbol: row.get("symbol"),
        decimals: row.get::<i16, _>("decimals") as u32,
        is_active: row.get("is_active"),
        tip_fee_bps: row.get::<Option<i32>, _>("tip_fee_bps").map(|bps| bps as u32),
        min_withdraw: row.get("min_withdraw"),
        max_withdraw: row.get("max_withdraw"),
        daily_withdraw_cap: row.get("daily_withdraw_cap"),
    }
}

#[async_trait]
impl TokenRepository for PgTokenRepository {
    async fn list_tokens(&self) -> LedgerResult<Vec<Token>> {
        let rows = sqlx::query(&format!("SELECT {TOKEN_COLUMNS} FROM tokens ORDER BY id"))
            .fetch_all(&self.pool)
            .await?;

        Ok(rows.iter().map(token_from_row).collect())
    }

    async fn find_by_id(&self, token_id: TokenId) -> LedgerResult<Option<Token>> {
        let row = sqlx::query(&format!("SELECT {TOKEN_COLUMNS} FROM tokens WHERE id = $1"))
            .bind(token_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(token_from_row))
    }

    async fn insert_token(&self, token: &NewToken) -> LedgerResult<Token> {
        if token.decimals > MAX_DECIMALS {
            return Err(LedgerError::InvalidAmount(format!(
                "{} decimals exceeds the supported maximum of {MAX_DECIMALS}",
                token.decimals
            )));
        }

        let row = sqlx::query(&format!(
            "INSERT INTO tokens (contract_address, symbol, decimals, tip_fee_bps, \
                                 min_withdraw, max_withdraw, daily_withdraw_cap)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING {TOKEN_COLUMNS}"
        ))
        .bind(&token.contract_address)
        .bind(&token.symbol)
        .bind(token.decimals as i16)
        .bind(token.tip_fee_bps.map(|bps| bps as i32))
        .bind(token.min_withdraw)
        .bind(token.max_withdraw)
        .bind(token.daily_withdraw_cap)
        .fetch_one(&self.pool)
        .await?;

        Ok(token_from_row(&row))
    }

    async fn set_active(&self, token_id: TokenId, active: bool) -> LedgerResult<()> {
        let result = sqlx::query("UPDATE tokens SET is_active = $1 WHERE id = $2")
            .bind(active)
            .bind(token_id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(LedgerError::NotFound {
                entity: "token",
                id: token_id,
            });
        }
        Ok(())
    }
}
