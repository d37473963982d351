//! Structured logging configuration.
//!
//! The library logs through the `log` facade; the subscriber installed here
//! bridges those records into `tracing` alongside the daemon's own events.

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info,sqlx=warn";

/// Initialize structured logging
///
/// Log levels are configurable via the `RUST_LOG` env var.
pub fn init() {
    tracing_subscriber::registry()
        .with(env_filter())
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true),
        )
        .init();

    tracing::info!("Structured logging initialized");
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log a settlement event with structured fields
pub fn log_settlement(kind: &str, entity_id: i64, token_id: i64, detail: &str) {
    tracing::info!(
        settlement = kind,
        entity_id = entity_id,
        token_id = token_id,
        "SETTLEMENT: {}",
        detail
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_parses() {
        assert!(EnvFilter::try_new(DEFAULT_FILTER).is_ok());
    }

    #[test]
    fn test_log_settlement() {
        // Just ensure it doesn't panic without a subscriber
        log_settlement("match", 1, 1, "challenger_wins");
    }
}
