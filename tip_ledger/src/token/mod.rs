//! Token registry: static reference data for every token the ledger tracks.
//!
//! Amounts are always stored in atomic units; [`Token::to_atomic`] and
//! [`Token::format_atomic`] are the only conversion points to human units.

pub mod models;
pub mod registry;

pub use models::{MAX_DECIMALS, NewToken, Token};
pub use registry::TokenRegistry;
