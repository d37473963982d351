//! Token reference data.

use crate::ledger::{Amount, LedgerError, LedgerResult, TokenId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Highest supported precision; keeps 10^decimals inside `Decimal` range
pub const MAX_DECIMALS: u32 = 24;

/// A fungible token the ledger tracks
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: TokenId,
    pub contract_address: String,
    pub symbol: String,
    pub decimals: u32,
    pub is_active: bool,
    /// Tip fee override in basis points
    pub tip_fee_bps: Option<u32>,
    /// Per-transaction withdrawal minimum, atomic units
    pub min_withdraw: Option<Amount>,
    /// Per-transaction withdrawal maximum, atomic units
    pub max_withdraw: Option<Amount>,
    /// Daily withdrawal cap, atomic units
    pub daily_withdraw_cap: Option<Amount>,
}

/// Token definition used when seeding the registry
#[derive(Debug, Clone, Default)]
pub struct NewToken {
    pub contract_address: String,
    pub symbol: String,
    pub decimals: u32,
    pub tip_fee_bps: Option<u32>,
    pub min_withdraw: Option<Amount>,
    pub max_withdraw: Option<Amount>,
    pub daily_withdraw_cap: Option<Amount>,
}

impl Token {
    /// 10^decimals
    pub fn unit(&self) -> Decimal {
        Decimal::from_i128_with_scale(10i128.pow(self.decimals.min(MAX_DECIMALS)), 0)
    }

    /// Convert a human amount ("1.25") into atomic units
    ///
    /// Rejects amounts with more fractional digits than the token supports.
    pub fn to_atomic(&self, human: Decimal) -> LedgerResult<Amount> {
        let human = human.normalize();
        if human.scale() > self.decimals {
            return Err(LedgerError::InvalidAmount(format!(
                "{human} has more than {} decimal places for {}",
                self.decimals, self.symbol
            )));
        }
        human
            .checked_mul(self.unit())
            .map(|atomic| atomic.trunc())
            .ok_or(LedgerError::BalanceOverflow)
    }

    /// Parse and convert a user-typed amount
    pub fn parse_amount(&self, input: &str) -> LedgerResult<Amount> {
        let human: Decimal = input
            .trim()
            .parse()
            .map_err(|_| LedgerError::InvalidAmount(format!("'{input}' is not a number")))?;
        self.to_atomic(human)
    }

    /// Render atomic units in human form, without trailing zeros
    pub fn format_atomic(&self, atomic: Amount) -> String {
        match atomic.checked_div(self.unit()) {
            Some(human) => format!("{} {}", human.normalize(), self.symbol),
            None => format!("{atomic} atomic {}", self.symbol),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn pengu() -> Token {
        Token {
            id: 1,
            contract_address: "0xpengu".to_string(),
            symbol: "PENGU".to_string(),
            decimals: 6,
            is_active: true,
            tip_fee_bps: None,
            min_withdraw: None,
            max_withdraw: None,
            daily_withdraw_cap: None,
        }
    }

    #[test]
    fn test_to_atomic() {
        let token = pengu();
        assert_eq!(token.to_atomic(dec!(10)).unwrap(), dec!(10000000));
        assert_eq!(token.to_atomic(dec!(1.25)).unwrap(), dec!(1250000));
        assert_eq!(token.to_atomic(dec!(0.000001)).unwrap(), dec!(1));
    }

    #[test]
    fn test_to_atomic_rejects_excess_precision() {
        let token = pengu();
        assert!(matches!(
            token.to_atomic(dec!(0.0000001)),
            Err(LedgerError::InvalidAmount(_))
        ));
        // Trailing zeros are not extra precision
        assert!(token.to_atomic(dec!(1.1000000)).is_ok());
    }

    #[test]
    fn test_format_atomic() {
        let token = pengu();
        assert_eq!(token.format_atomic(dec!(10400000)), "10.4 PENGU");
        assert_eq!(token.format_atomic(dec!(1)), "0.000001 PENGU");
        assert_eq!(token.format_atomic(dec!(0)), "0 PENGU");
    }

    #[test]
    fn test_parse_amount() {
        let token = pengu();
        assert_eq!(token.parse_amount(" 2.5 ").unwrap(), dec!(2500000));
        assert!(token.parse_amount("lots").is_err());
    }

    #[test]
    fn test_eighteen_decimal_token() {
        let token = Token {
            decimals: 18,
            symbol: "ETH".to_string(),
            ..pengu()
        };
        assert_eq!(
            token.to_atomic(dec!(1.5)).unwrap(),
            dec!(1500000000000000000)
        );
        assert_eq!(token.format_atomic(dec!(1500000000000000000)), "1.5 ETH");
    }
}
