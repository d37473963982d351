//! Balance ledger with escrow, idempotent deposits and an append-only transaction log.
//!
//! This module implements:
//! - Atomic debit/credit/transfer over per-(user, token) balance rows
//! - Transaction-scoped variants for composite settlement operations
//! - Escrow accounts holding open wagers and active group tips
//! - Idempotency keys to de-duplicate watcher deposits and withdrawals
//! - Withdrawal policy checks and a conservation audit
//!
//! ## Example
//!
//! ```no_run
//! use tip_ledger::db::Database;
//! use tip_ledger::ledger::{LedgerContext, LedgerManager, TransactionType, WithdrawalLimits};
//! use rust_decimal::Decimal;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let db = Database::new(&Default::default()).await?;
//!     let ledger = LedgerManager::new(db.shared_pool(), 0, WithdrawalLimits::default());
//!
//!     let receipt = ledger
//!         .transfer(1, 2, 1, Decimal::from(5_000_000), TransactionType::Transfer, LedgerContext::new())
//!         .await?;
//!     println!("Sender balance after transfer: {}", receipt.from_balance);
//!
//!     Ok(())
//! }
//! ```

pub mod errors;
pub mod manager;
pub mod models;
pub mod policy;

pub(crate) use errors::is_unique_violation;
pub use errors::{LedgerError, LedgerResult};
pub use manager::LedgerManager;
pub use models::{
    Amount, BPS_DENOMINATOR, ConservationReport, DepositKey, DepositReceipt, EscrowKey,
    LedgerContext, LedgerTransaction, TokenId, TransactionType, TransferReceipt, UserBalance,
    UserId, atomic_units, bps_share, ensure_atomic, from_atomic_units,
};
pub use policy::{WithdrawalLimits, WithdrawalPolicy};
