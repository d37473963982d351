//! Ledger data models.

use super::errors::{LedgerError, LedgerResult};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Chat-platform user id
pub type UserId = i64;

/// Token id
pub type TokenId = i64;

/// Integer amount in a token's smallest unit
pub type Amount = Decimal;

/// Basis points denominator
pub const BPS_DENOMINATOR: u32 = 10_000;

/// Validate that `amount` is a strictly positive whole number of atomic units
pub fn ensure_atomic(amount: Amount) -> LedgerResult<Amount> {
    if amount <= Decimal::ZERO {
        return Err(LedgerError::InvalidAmount(format!(
            "{amount} must be greater than zero"
        )));
    }
    if !amount.fract().is_zero() {
        return Err(LedgerError::InvalidAmount(format!(
            "{amount} is not a whole number of atomic units"
        )));
    }
    Ok(amount.trunc())
}

/// Non-negative whole amount as an integer count of atomic units
pub fn atomic_units(amount: Amount) -> LedgerResult<u128> {
    if amount.is_sign_negative() || !amount.fract().is_zero() {
        return Err(LedgerError::InvalidAmount(format!(
            "{amount} is not a non-negative whole number of atomic units"
        )));
    }
    amount.to_u128().ok_or(LedgerError::BalanceOverflow)
}

/// Inverse of [`atomic_units`]
pub fn from_atomic_units(units: u128) -> LedgerResult<Amount> {
    Decimal::from_u128(units).ok_or(LedgerError::BalanceOverflow)
}

/// `floor(amount * bps / 10000)`, computed exactly in integer arithmetic
pub fn bps_share(amount: Amount, bps: u32) -> LedgerResult<Amount> {
    let scaled = atomic_units(amount)?
        .checked_mul(u128::from(bps))
        .ok_or(LedgerError::BalanceOverflow)?;
    from_atomic_units(scaled / u128::from(BPS_DENOMINATOR))
}

/// Per-(user, token) balance row
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserBalance {
    pub user_id: UserId,
    pub token_id: TokenId,
    pub amount: Amount,
    pub updated_at: DateTime<Utc>,
}

/// Kind of a ledger transaction row
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
    Tip,
    TipRefund,
    GroupTipCreate,
    GroupTipPayout,
    GroupTipRefund,
    MatchWager,
    MatchPayout,
    MatchRefund,
    Rake,
    Fee,
    Adjustment,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "deposit",
            TransactionType::Withdraw => "withdraw",
            TransactionType::Transfer => "transfer",
            TransactionType::Tip => "tip",
            TransactionType::TipRefund => "tip_refund",
            TransactionType::GroupTipCreate => "group_tip_create",
            TransactionType::GroupTipPayout => "group_tip_payout",
            TransactionType::GroupTipRefund => "group_tip_refund",
            TransactionType::MatchWager => "match_wager",
            TransactionType::MatchPayout => "match_payout",
            TransactionType::MatchRefund => "match_refund",
            TransactionType::Rake => "rake",
            TransactionType::Fee => "fee",
            TransactionType::Adjustment => "adjustment",
        }
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "deposit" => TransactionType::Deposit,
            "withdraw" => TransactionType::Withdraw,
            "transfer" => TransactionType::Transfer,
            "tip" => TransactionType::Tip,
            "tip_refund" => TransactionType::TipRefund,
            "group_tip_create" => TransactionType::GroupTipCreate,
            "group_tip_payout" => TransactionType::GroupTipPayout,
            "group_tip_refund" => TransactionType::GroupTipRefund,
            "match_wager" => TransactionType::MatchWager,
            "match_payout" => TransactionType::MatchPayout,
            "match_refund" => TransactionType::MatchRefund,
            "rake" => TransactionType::Rake,
            "fee" => TransactionType::Fee,
            "adjustment" => TransactionType::Adjustment,
            other => {
                return Err(LedgerError::Corrupt {
                    field: "tx_type",
                    value: other.to_string(),
                });
            }
        })
    }
}

/// Append-only ledger transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: i64,
    pub tx_type: TransactionType,
    pub user_id: UserId,
    pub counterparty_user_id: Option<UserId>,
    pub token_id: TokenId,
    pub amount: Amount,
    pub fee: Amount,
    pub context_id: Option<String>,
    pub metadata: serde_json::Value,
    pub idempotency_key: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Caller-supplied context attached to a ledger mutation
#[derive(Debug, Clone, Default)]
pub struct LedgerContext {
    /// Guild / channel the request came from
    pub context_id: Option<String>,
    /// Other party of the effect, if any
    pub counterparty: Option<UserId>,
    /// Fee charged on top of the principal (transfers only)
    pub fee: Amount,
    /// Free-form note stored in metadata
    pub note: Option<String>,
    /// Extra structured metadata
    pub metadata: Option<serde_json::Value>,
    /// Unique key that makes the mutation exactly-once
    pub idempotency_key: Option<String>,
}

impl LedgerContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn in_context(mut self, context_id: Option<String>) -> Self {
        self.context_id = context_id;
        self
    }

    pub fn with_counterparty(mut self, user_id: UserId) -> Self {
        self.counterparty = Some(user_id);
        self
    }

    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = fee;
        self
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Metadata JSON stored on the transaction row
    pub(crate) fn metadata_json(&self) -> serde_json::Value {
        let mut value = self
            .metadata
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));
        if let (Some(note), Some(map)) = (&self.note, value.as_object_mut()) {
            map.insert("note".to_string(), serde_json::Value::String(note.clone()));
        }
        value
    }
}

/// Result of a successful transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransferReceipt {
    pub transaction_id: i64,
    pub from_balance: Amount,
    pub to_balance: Amount,
    pub amount: Amount,
    pub fee: Amount,
}

/// Idempotency key of a watcher-verified deposit
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepositKey {
    pub source_tx: String,
    pub payer: String,
    pub amount: Amount,
}

impl DepositKey {
    pub fn new(source_tx: impl Into<String>, payer: impl Into<String>, amount: Amount) -> Self {
        Self {
            source_tx: source_tx.into(),
            payer: payer.into(),
            amount,
        }
    }

    /// Stable key string; transaction hashes and addresses compare case-insensitively
    pub fn as_key(&self) -> String {
        format!(
            "deposit:{}:{}:{}",
            self.source_tx.to_lowercase(),
            self.payer.to_lowercase(),
            self.amount.normalize()
        )
    }
}

/// Result of a deposit credit request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepositReceipt {
    /// True when the key was seen before and nothing was credited
    pub duplicate: bool,
    pub balance: Amount,
    pub transaction_id: Option<i64>,
}

/// Escrow account held by the engine for an open entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EscrowKey {
    Match(i64),
    GroupTip(i64),
}

impl std::fmt::Display for EscrowKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EscrowKey::Match(id) => write!(f, "match:{id}"),
            EscrowKey::GroupTip(id) => write!(f, "group_tip:{id}"),
        }
    }
}

/// Conservation check for one token
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConservationReport {
    pub token_id: TokenId,
    pub total_balances: Amount,
    pub total_escrow: Amount,
    pub total_deposits: Amount,
    pub total_withdrawals: Amount,
}

impl ConservationReport {
    /// balances + escrow == deposits - withdrawals
    pub fn is_balanced(&self) -> bool {
        self.total_balances + self.total_escrow == self.total_deposits - self.total_withdrawals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_ensure_atomic_rejects_zero_and_fractions() {
        assert!(ensure_atomic(dec!(0)).is_err());
        assert!(ensure_atomic(dec!(-5)).is_err());
        assert!(ensure_atomic(dec!(1.5)).is_err());
        assert_eq!(ensure_atomic(dec!(7.000)).unwrap(), dec!(7));
    }

    #[test]
    fn test_bps_share_floors() {
        assert_eq!(bps_share(dec!(20), 200).unwrap(), dec!(0));
        assert_eq!(bps_share(dec!(20000000), 200).unwrap(), dec!(400000));
        assert_eq!(bps_share(dec!(999), 100).unwrap(), dec!(9));
        assert_eq!(bps_share(dec!(1000), 0).unwrap(), dec!(0));
    }

    #[test]
    fn test_bps_share_is_exact_near_decimal_max() {
        let max = Decimal::MAX;
        assert_eq!(bps_share(max, BPS_DENOMINATOR).unwrap(), max);
        assert_eq!(bps_share(max, 0).unwrap(), dec!(0));

        // 79228162514264337593543950335 * 200 / 10000, floored
        let expected = Decimal::from_u128(1_584_563_250_285_286_751_870_879_006).unwrap();
        assert_eq!(bps_share(max, 200).unwrap(), expected);
        assert!(bps_share(max, 200).unwrap() <= max);
    }

    #[test]
    fn test_bps_share_rejects_bad_input() {
        assert!(matches!(
            bps_share(dec!(-1), 200),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            bps_share(dec!(1.5), 200),
            Err(LedgerError::InvalidAmount(_))
        ));
        assert!(matches!(
            bps_share(Decimal::MAX, 20_000),
            Err(LedgerError::BalanceOverflow)
        ));
    }

    #[test]
    fn test_transaction_type_round_trips_through_str() {
        for ty in [
            TransactionType::Deposit,
            TransactionType::GroupTipPayout,
            TransactionType::Rake,
        ] {
            assert_eq!(ty.as_str().parse::<TransactionType>().unwrap(), ty);
        }
        assert!("bogus".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_deposit_key_is_case_insensitive() {
        let a = DepositKey::new("0xABC", "0xDEF", dec!(100));
        let b = DepositKey::new("0xabc", "0xdef", dec!(100.0));
        assert_eq!(a.as_key(), b.as_key());
    }

    #[test]
    fn test_metadata_json_includes_note() {
        let ctx = LedgerContext::new().with_note("gg");
        assert_eq!(ctx.metadata_json()["note"], "gg");
    }

    #[test]
    fn test_escrow_key_display() {
        assert_eq!(EscrowKey::Match(3).to_string(), "match:3");
        assert_eq!(EscrowKey::GroupTip(9).to_string(), "group_tip:9");
    }
}
