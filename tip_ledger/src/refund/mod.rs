//! Refund engine for tips and group tips.

pub mod engine;
pub mod models;

pub use engine::RefundEngine;
pub use models::{RefundKind, RefundReceipt};
