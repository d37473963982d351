//! Ledger and settlement error types.

use super::models::{Amount, TokenId, UserId};
use thiserror::Error;

/// Errors raised by the ledger, the settlement state machines and the refund engine
#[derive(Debug, Error)]
pub enum LedgerError {
    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration error
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Post-debit balance would be negative
    #[error("Insufficient funds for user {user_id} in token {token_id}: available {available}, required {required}")]
    InsufficientFunds {
        user_id: UserId,
        token_id: TokenId,
        available: Amount,
        required: Amount,
    },

    /// Amount is not a positive whole number of atomic units
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Move name outside penguin, pebble and fish
    #[error("Unknown move '{0}': choose penguin, pebble or fish")]
    InvalidMove(String),

    /// Balance arithmetic overflowed
    #[error("Balance overflow")]
    BalanceOverflow,

    /// Sender and receiver are the same user
    #[error("Cannot transfer to yourself")]
    SelfTransfer,

    /// Token id or symbol not in the registry
    #[error("Unknown token: {0}")]
    UnknownToken(String),

    /// Token exists but is disabled
    #[error("Token {0} is not active")]
    InactiveToken(String),

    /// Entity id does not exist
    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    /// Operation attempted on an entity not in the required state
    #[error("{entity} {id} is {actual}, expected {expected}")]
    InvalidState {
        entity: &'static str,
        id: i64,
        expected: &'static str,
        actual: String,
    },

    /// Caller is not the participant allowed to perform the operation
    #[error("User is not a participant of {entity} {id}")]
    NotParticipant { entity: &'static str, id: i64 },

    /// Match can no longer be joined
    #[error("Match {0} is no longer available")]
    NotAvailable(i64),

    /// Challenger tried to join their own match
    #[error("Cannot join your own match")]
    SelfPlay,

    /// Creator tried to claim their own group tip
    #[error("Cannot claim your own group tip")]
    SelfClaim,

    /// User already holds a claim on this group tip
    #[error("Group tip {0} already claimed by this user")]
    AlreadyClaimed(i64),

    /// Entity was already refunded
    #[error("{entity} {id} was already refunded")]
    AlreadyRefunded { entity: &'static str, id: i64 },

    /// Idempotency key already used
    #[error("Duplicate transaction: {0}")]
    DuplicateTransaction(String),

    /// Group tip duration outside the configured bounds
    #[error("Invalid duration: {seconds}s (allowed {min}s to {max}s)")]
    InvalidDuration { seconds: i64, min: i64, max: i64 },

    /// Announcing a group tip failed after funds were committed
    #[error("Posting group tip {group_tip_id} failed: {reason}")]
    PostingFailure { group_tip_id: i64, reason: String },

    /// Withdrawal below the per-transaction minimum
    #[error("Withdrawal below minimum of {min}")]
    WithdrawalBelowMinimum { min: Amount },

    /// Withdrawal above the per-transaction maximum
    #[error("Withdrawal above maximum of {max}")]
    WithdrawalAboveMaximum { max: Amount },

    /// Withdrawal would exceed the daily cap
    #[error("Daily withdrawal limit exceeded: {withdrawn_today} already withdrawn, cap {cap}")]
    DailyLimitExceeded { withdrawn_today: Amount, cap: Amount },

    /// Stored value could not be decoded into a domain type
    #[error("Corrupt {field} value: {value}")]
    Corrupt { field: &'static str, value: String },
}

impl LedgerError {
    /// Get a client-safe error message that doesn't leak sensitive information
    ///
    /// Database errors are sanitized, and user ids are not echoed back.
    pub fn client_message(&self) -> String {
        match self {
            LedgerError::Database(_) | LedgerError::Migration(_) | LedgerError::Corrupt { .. } => {
                "Internal server error".to_string()
            }
            LedgerError::InsufficientFunds { .. } => "Insufficient balance".to_string(),
            LedgerError::AlreadyClaimed(_) => "You already claimed this group tip".to_string(),
            LedgerError::NotAvailable(_) => "This match is no longer available".to_string(),
            LedgerError::PostingFailure { .. } => {
                "Could not post the group tip; your funds were returned".to_string()
            }
            _ => self.to_string(),
        }
    }

    /// True for errors that signal an expected race rather than a fault
    pub fn is_expected_race(&self) -> bool {
        matches!(
            self,
            LedgerError::AlreadyClaimed(_)
                | LedgerError::AlreadyRefunded { .. }
                | LedgerError::NotAvailable(_)
        )
    }
}

/// Result type for ledger operations
pub type LedgerResult<T> = Result<T, LedgerError>;

/// True if the database rejected a write because of a unique constraint
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}
