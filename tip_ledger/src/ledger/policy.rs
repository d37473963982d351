//! Withdrawal policy evaluated before a withdrawal debit.

use super::errors::{LedgerError, LedgerResult};
use super::models::Amount;
use crate::token::Token;
use rust_decimal::Decimal;

/// Default withdrawal limits in human units, applied to tokens without overrides
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WithdrawalLimits {
    pub min: Option<Decimal>,
    pub max: Option<Decimal>,
    pub daily_cap: Option<Decimal>,
}

/// Effective per-token withdrawal policy in atomic units
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WithdrawalPolicy {
    pub min: Option<Amount>,
    pub max: Option<Amount>,
    pub daily_cap: Option<Amount>,
}

impl WithdrawalPolicy {
    /// Token overrides win; otherwise the defaults are converted with the token's precision
    pub fn for_token(defaults: &WithdrawalLimits, token: &Token) -> LedgerResult<Self> {
        let convert = |human: Option<Decimal>| -> LedgerResult<Option<Amount>> {
            human.map(|h| token.to_atomic(h)).transpose()
        };

        Ok(Self {
            min: match token.min_withdraw {
                Some(min) => Some(min),
                None => convert(defaults.min)?,
            },
            max: match token.max_withdraw {
                Some(max) => Some(max),
                None => convert(defaults.max)?,
            },
            daily_cap: match token.daily_withdraw_cap {
                Some(cap) => Some(cap),
                None => convert(defaults.daily_cap)?,
            },
        })
    }

    /// Check a withdrawal of `amount` given what was already withdrawn today
    pub fn evaluate(&self, amount: Amount, withdrawn_today: Amount) -> LedgerResult<()> {
        match self.min {
            Some(min) if amount < min => return Err(LedgerError::WithdrawalBelowMinimum { min }),
            _ => {}
        }
        match self.max {
            Some(max) if amount > max => return Err(LedgerError::WithdrawalAboveMaximum { max }),
            _ => {}
        }
        match self.daily_cap {
            Some(cap) if withdrawn_today + amount > cap => {
                return Err(LedgerError::DailyLimitExceeded {
                    withdrawn_today,
                    cap,
                });
            }
            _ => {}
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn token() -> Token {
        Token {
            id: 1,
            contract_address: "0xpengu".to_string(),
            symbol: "PENGU".to_string(),
            decimals: 2,
            is_active: true,
            tip_fee_bps: None,
            min_withdraw: None,
            max_withdraw: Some(dec!(50000)),
            daily_withdraw_cap: None,
        }
    }

    #[test]
    fn test_token_override_beats_default() {
        let defaults = WithdrawalLimits {
            min: Some(dec!(1)),
            max: Some(dec!(100)),
            daily_cap: Some(dec!(1000)),
        };
        let policy = WithdrawalPolicy::for_token(&defaults, &token()).unwrap();
        assert_eq!(policy.min, Some(dec!(100)));
        assert_eq!(policy.max, Some(dec!(50000)));
        assert_eq!(policy.daily_cap, Some(dec!(100000)));
    }

    #[test]
    fn test_evaluate() {
        let policy = WithdrawalPolicy {
            min: Some(dec!(10)),
            max: Some(dec!(100)),
            daily_cap: Some(dec!(150)),
        };
        assert!(policy.evaluate(dec!(50), dec!(0)).is_ok());
        assert!(matches!(
            policy.evaluate(dec!(5), dec!(0)),
            Err(LedgerError::WithdrawalBelowMinimum { .. })
        ));
        assert!(matches!(
            policy.evaluate(dec!(101), dec!(0)),
            Err(LedgerError::WithdrawalAboveMaximum { .. })
        ));
        assert!(matches!(
            policy.evaluate(dec!(60), dec!(100)),
            Err(LedgerError::DailyLimitExceeded { .. })
        ));
        assert!(policy.evaluate(dec!(50), dec!(100)).is_ok());
    }

    #[test]
    fn test_no_limits() {
        let policy = WithdrawalPolicy::default();
        assert!(policy.evaluate(dec!(1000000000), dec!(1000000000)).is_ok());
    }
}
