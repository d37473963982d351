//! Direct tips between two users.
//!
//! A tip is a ledger transfer plus a `tips` row recording principal, fee and
//! tax, so the Refund Engine can reverse it exactly once.

pub mod manager;
pub mod models;

pub(crate) use manager::lock_tip;
pub use manager::TipManager;
pub use models::{Tip, TipId, TipStatus};
