//! Outcome and payout rules for a match.

use super::models::{MatchMove, MatchResult};
use crate::ledger::{Amount, LedgerError, LedgerResult, bps_share};
use rust_decimal::Decimal;

/// Resolve the fixed beats relation; equal moves tie
pub fn resolve(challenger: MatchMove, joiner: MatchMove) -> MatchResult {
    if challenger == joiner {
        MatchResult::Tie
    } else if challenger.beats() == joiner {
        MatchResult::ChallengerWins
    } else {
        MatchResult::JoinerWins
    }
}

/// Money movement of a decisive match
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Payout {
    pub pot: Amount,
    pub rake: Amount,
    pub payout: Amount,
}

/// pot = 2 x wager, rake = floor(pot x bps / 10000), payout = pot - rake
pub fn compute_payout(wager: Amount, house_fee_bps: u32) -> LedgerResult<Payout> {
    let pot = wager
        .checked_mul(Decimal::TWO)
        .ok_or(LedgerError::BalanceOverflow)?;
    let rake = bps_share(pot, house_fee_bps)?;
    Ok(Payout {
        pot,
        rake,
        payout: pot - rake,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal::prelude::FromPrimitive;
    use rust_decimal_macros::dec;

    #[test]
    fn test_resolve() {
        assert_eq!(
            resolve(MatchMove::Penguin, MatchMove::Pebble),
            MatchResult::JoinerWins
        );
        assert_eq!(
            resolve(MatchMove::Penguin, MatchMove::Fish),
            MatchResult::ChallengerWins
        );
        assert_eq!(
            resolve(MatchMove::Fish, MatchMove::Pebble),
            MatchResult::ChallengerWins
        );
        assert_eq!(resolve(MatchMove::Fish, MatchMove::Fish), MatchResult::Tie);
    }

    #[test]
    fn test_resolve_is_antisymmetric() {
        for a in MatchMove::ALL {
            for b in MatchMove::ALL {
                let forward = resolve(a, b);
                let backward = resolve(b, a);
                match forward {
                    MatchResult::Tie => assert_eq!(backward, MatchResult::Tie),
                    MatchResult::ChallengerWins => {
                        assert_eq!(backward, MatchResult::JoinerWins)
                    }
                    MatchResult::JoinerWins => {
                        assert_eq!(backward, MatchResult::ChallengerWins)
                    }
                }
            }
        }
    }

    #[test]
    fn test_ten_pengu_wager_with_two_percent_fee() {
        // 10 PENGU at 6 decimals
        let payout = compute_payout(dec!(10000000), 200).unwrap();
        assert_eq!(payout.pot, dec!(20000000));
        assert_eq!(payout.rake, dec!(400000));
        assert_eq!(payout.payout, dec!(19600000));
    }

    #[test]
    fn test_rake_rounds_down() {
        let payout = compute_payout(dec!(10), 200).unwrap();
        assert_eq!(payout.pot, dec!(20));
        assert_eq!(payout.rake, dec!(0));
        assert_eq!(payout.payout, dec!(20));
    }

    #[test]
    fn test_huge_wager_settles_exactly() {
        let wager = Decimal::from_u128(30_000_000_000_000_000_000_000_000_000).unwrap();
        let payout = compute_payout(wager, 200).unwrap();
        assert_eq!(
            payout.pot,
            Decimal::from_u128(60_000_000_000_000_000_000_000_000_000).unwrap()
        );
        assert_eq!(
            payout.rake,
            Decimal::from_u128(1_200_000_000_000_000_000_000_000_000).unwrap()
        );
        assert_eq!(payout.payout + payout.rake, payout.pot);
    }

    #[test]
    fn test_pot_beyond_decimal_range_is_rejected() {
        assert!(matches!(
            compute_payout(Decimal::MAX, 200),
            Err(LedgerError::BalanceOverflow)
        ));
    }

    proptest! {
        #[test]
        fn prop_payout_plus_rake_is_pot(wager in 1u64..1_000_000_000_000u64, bps in 0u32..=10_000u32) {
            let payout = compute_payout(Decimal::from(wager), bps).unwrap();
            prop_assert_eq!(payout.payout + payout.rake, payout.pot);
            prop_assert!(payout.rake >= Decimal::ZERO);
            prop_assert!(payout.rake <= payout.pot);
            prop_assert!(payout.rake.fract().is_zero());
        }

        #[test]
        fn prop_rake_is_exact_across_decimal_range(
            wager in 1u128..39_614_081_257_132_168_796_771_975_167u128,
            bps in 0u32..=10_000u32,
        ) {
            let payout = compute_payout(Decimal::from_u128(wager).unwrap(), bps).unwrap();
            let expected = wager * 2 * u128::from(bps) / 10_000;
            prop_assert_eq!(payout.rake, Decimal::from_u128(expected).unwrap());
            prop_assert_eq!(payout.payout + payout.rake, payout.pot);
        }
    }
}
