//! # Tip Ledger
//!
//! A multi-token custodial ledger and settlement engine for a chat-bot economy.
//!
//! Users hold balances in several fungible tokens, tip each other directly or
//! through pooled "group tips", and wager against each other in a three-way
//! game. Every value-moving operation is one PostgreSQL transaction, so
//! balances never go negative, each effect happens exactly once, and refunds
//! are idempotent.
//!
//! ## Core Modules
//!
//! - [`ledger`]: Balance primitives, escrow, deposits, withdrawals, audit
//! - [`token`]: Token registry and unit conversion
//! - [`tip`]: Direct tips
//! - [`game`]: Two-player wager state machine
//! - [`group_tip`]: Pooled gift lifecycle and claim-race handling
//! - [`refund`]: Idempotent compensating transactions
//! - [`stats`]: Win/loss/tie counters and streaks
//! - [`notify`]: Announcer and post-commit listener seams
//! - [`scheduler`]: Per-entity expiry timers
//! - [`engine`]: The facade wiring all of the above
//!
//! ## Example
//!
//! ```no_run
//! use tip_ledger::{Database, EngineConfig, PgTokenRepository, SettlementEngine, TokenRegistry};
//! use tip_ledger::game::MatchMove;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&Default::default()).await?;
//!     db.migrate().await?;
//!
//!     let registry = TokenRegistry::load(&PgTokenRepository::new(db.pool().clone())).await?;
//!     let engine = SettlementEngine::headless(
//!         db.shared_pool(),
//!         registry,
//!         EngineConfig::from_env()?,
//!     );
//!
//!     let pengu = engine.token_by_symbol("PENGU")?.clone();
//!     let wager = pengu.parse_amount("10")?;
//!     let created = engine.create_match(1, pengu.id, wager, None).await?;
//!     engine.offer_match(created.id, 1, MatchMove::Penguin).await?;
//!     let settled = engine.join_match(created.id, 2, MatchMove::Pebble).await?;
//!     println!("Winner: {:?}", settled.winner_user_id);
//!     Ok(())
//! }
//! ```

/// Engine configuration loaded from the environment.
pub mod config;
/// Database pool, migrations and repositories.
pub mod db;
/// Settlement engine facade.
pub mod engine;
pub mod game;
pub mod group_tip;
pub mod ledger;
pub mod notify;
pub mod refund;
pub mod scheduler;
pub mod stats;
pub mod tip;
pub mod token;

pub use config::{ConfigError, EngineConfig};
pub use db::{Database, DatabaseConfig, PgTokenRepository, TokenRepository};
pub use engine::{RecoveryReport, SettlementEngine};
pub use ledger::{Amount, LedgerError, LedgerResult, TokenId, UserId};
pub use token::{Token, TokenRegistry};
