//! Shared fixtures for database-backed integration tests.
//!
//! Every test seeds its own token and block of user ids, so tests never see
//! each other's balances and can share one database. The database named by
//! `DATABASE_URL` must be reachable; setup panics otherwise.

#![allow(dead_code)]

use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::PgPool;
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use tip_ledger::db::DatabaseConfig;
use tip_ledger::group_tip::GroupTip;
use tip_ledger::ledger::DepositKey;
use tip_ledger::notify::{Announcer, MessageRef, NoopAnnouncer, NoopListener, NotifyError};
use tip_ledger::token::NewToken;
use tip_ledger::{
    Database, EngineConfig, PgTokenRepository, SettlementEngine, Token, TokenRegistry,
    TokenRepository, UserId,
};

static SEQUENCE: AtomicI64 = AtomicI64::new(0);

/// Strictly increasing within a process, and across runs via the clock
pub fn unique() -> i64 {
    let micros = chrono::Utc::now().timestamp_micros();
    micros % 100_000_000_000_000 + SEQUENCE.fetch_add(1, Ordering::SeqCst)
}

/// Announcer that always fails, to exercise posting compensation
pub struct FailingAnnouncer;

#[async_trait]
impl Announcer for FailingAnnouncer {
    async fn announce_group_tip(
        &self,
        _group_tip: &GroupTip,
        _token: &Token,
    ) -> Result<MessageRef, NotifyError> {
        Err(NotifyError::Delivery("channel unavailable".to_string()))
    }
}

pub struct Harness {
    pub pool: Arc<PgPool>,
    pub engine: SettlementEngine,
    pub token: Token,
    pub house: UserId,
    user_base: UserId,
}

impl Harness {
    /// The n-th test user (1..=9)
    pub fn user(&self, n: i64) -> UserId {
        self.user_base + n
    }

    /// `human` whole tokens in atomic units
    pub fn tokens(&self, human: i64) -> Decimal {
        self.token
            .to_atomic(Decimal::from(human))
            .expect("valid amount")
    }

    /// Credit a user through an idempotent deposit
    pub async fn fund(&self, user_id: UserId, amount: Decimal) {
        let key = DepositKey::new(
            format!("0xfund{}", unique()),
            format!("user{user_id}"),
            amount,
        );
        let receipt = self
            .engine
            .credit_deposit(user_id, self.token.id, amount, &key)
            .await
            .expect("funding deposit");
        assert!(!receipt.duplicate);
    }

    pub async fn balance(&self, user_id: UserId) -> Decimal {
        self.engine
            .get_balance(user_id, self.token.id)
            .await
            .expect("balance read")
    }

    /// Assert balances + escrow == deposits - withdrawals for this token
    pub async fn assert_conserved(&self) {
        let report = self
            .engine
            .audit_token(self.token.id)
            .await
            .expect("audit");
        assert!(report.is_balanced(), "conservation violated: {report:?}");
    }
}

pub async fn setup() -> Harness {
    setup_with(|_| {}, |_| {}, Arc::new(NoopAnnouncer)).await
}

/// Connect, migrate and seed a fresh 6-decimal token
///
/// Defaults: 2% rake, no taxes, group tips of 1s to 1h.
pub async fn setup_with(
    configure: impl FnOnce(&mut EngineConfig),
    configure_token: impl FnOnce(&mut NewToken),
    announcer: Arc<dyn Announcer>,
) -> Harness {
    let database_url = std::env::var("DATABASE_URL")
        .unwrap_or_else(|_| tip_ledger::db::config::DEFAULT_DATABASE_URL.to_string());

    let db = Database::new(&DatabaseConfig::with_url(database_url))
        .await
        .expect("Failed to connect to test database (set DATABASE_URL)");
    db.migrate().await.expect("migrations");

    let n = unique();
    let mut new_token = NewToken {
        contract_address: format!("0xtest{n}"),
        symbol: format!("T{n}"),
        decimals: 6,
        ..NewToken::default()
    };
    configure_token(&mut new_token);
    let token = PgTokenRepository::new(db.pool().clone())
        .insert_token(&new_token)
        .await
        .expect("seed token");

    let user_base = n * 10;
    let mut config = EngineConfig {
        house_account: user_base,
        house_fee_bps: 200,
        group_tip_min_duration_secs: 1,
        group_tip_max_duration_secs: 3_600,
        ..EngineConfig::default()
    };
    configure(&mut config);

    let pool = db.shared_pool();
    let engine = SettlementEngine::new(
        Arc::clone(&pool),
        TokenRegistry::from_tokens(vec![token.clone()]),
        config.clone(),
        announcer,
        Arc::new(NoopListener),
    );

    Harness {
        pool,
        engine,
        token,
        house: config.house_account,
        user_base,
    }
}
