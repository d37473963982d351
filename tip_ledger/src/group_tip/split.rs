//! Even split of a pooled gift among claimants.

use crate::ledger::{Amount, LedgerResult, atomic_units, from_atomic_units};

/// Split `total` atomic units among `claimants`, in claim order
///
/// Everyone gets `floor(total / claimants)`; the first claimant also gets the
/// remainder. Returns an empty vector when there are no claimants.
pub fn split_evenly(total: Amount, claimants: usize) -> LedgerResult<Vec<Amount>> {
    if claimants == 0 {
        return Ok(Vec::new());
    }
    let units = atomic_units(total)?;
    let count = claimants as u128;
    let share = from_atomic_units(units / count)?;
    let first = from_atomic_units(units / count + units % count)?;

    let mut shares = vec![share; claimants];
    shares[0] = first;
    Ok(shares)
}
