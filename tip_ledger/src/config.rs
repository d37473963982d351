//! Engine configuration management.
//!
//! Consolidates the environment variable reads for fees, taxes, timers and
//! withdrawal defaults, and validates them once at startup.

use crate::ledger::{BPS_DENOMINATOR, UserId, WithdrawalLimits};
use chrono::Duration;
use rust_decimal::Decimal;

/// Settlement engine configuration
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Account receiving fees, taxes and rake
    pub house_account: UserId,
    /// House cut of a decisive match pot, in basis points
    pub house_fee_bps: u32,
    /// Refundable tax charged on direct tips, in basis points
    pub tip_tax_bps: u32,
    /// Refundable tax charged on group tips, in basis points
    pub group_tip_tax_bps: u32,
    /// Shortest allowed group tip duration
    pub group_tip_min_duration_secs: i64,
    /// Longest allowed group tip duration
    pub group_tip_max_duration_secs: i64,
    /// How long an offered match stays open
    pub match_offer_ttl_secs: i64,
    /// Interval of the backstop expiry sweep
    pub sweep_interval_secs: u64,
    /// Default withdrawal limits in human units
    pub withdrawal_limits: WithdrawalLimits,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            house_account: 0,
            house_fee_bps: 200,
            tip_tax_bps: 0,
            group_tip_tax_bps: 0,
            group_tip_min_duration_secs: 30,
            group_tip_max_duration_secs: 86_400,
            match_offer_ttl_secs: 300,
            sweep_interval_secs: 30,
            withdrawal_limits: WithdrawalLimits::default(),
        }
    }
}

impl EngineConfig {
    /// Load configuration from environment variables, falling back to defaults
    ///
    /// Variables: `HOUSE_ACCOUNT_ID`, `MATCH_HOUSE_FEE_BPS`, `TIP_TAX_BPS`,
    /// `GROUP_TIP_TAX_BPS`, `GROUP_TIP_MIN_DURATION_SECS`,
    /// `GROUP_TIP_MAX_DURATION_SECS`, `MATCH_OFFER_TTL_SECS`,
    /// `EXPIRY_SWEEP_INTERVAL_SECS`, `WITHDRAW_MIN`, `WITHDRAW_MAX`,
    /// `WITHDRAW_DAILY_CAP`.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            house_account: parse_env_or("HOUSE_ACCOUNT_ID", defaults.house_account),
            house_fee_bps: parse_env_or("MATCH_HOUSE_FEE_BPS", defaults.house_fee_bps),
            tip_tax_bps: parse_env_or("TIP_TAX_BPS", defaults.tip_tax_bps),
            group_tip_tax_bps: parse_env_or("GROUP_TIP_TAX_BPS", defaults.group_tip_tax_bps),
            group_tip_min_duration_secs: parse_env_or(
                "GROUP_TIP_MIN_DURATION_SECS",
                defaults.group_tip_min_duration_secs,
            ),
            group_tip_max_duration_secs: parse_env_or(
                "GROUP_TIP_MAX_DURATION_SECS",
                defaults.group_tip_max_duration_secs,
            ),
            match_offer_ttl_secs: parse_env_or("MATCH_OFFER_TTL_SECS", defaults.match_offer_ttl_secs),
            sweep_interval_secs: parse_env_or(
                "EXPIRY_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            ),
            withdrawal_limits: WithdrawalLimits {
                min: parse_decimal_env("WITHDRAW_MIN")?,
                max: parse_decimal_env("WITHDRAW_MAX")?,
                daily_cap: parse_decimal_env("WITHDRAW_DAILY_CAP")?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (var, bps) in [
            ("MATCH_HOUSE_FEE_BPS", self.house_fee_bps),
            ("TIP_TAX_BPS", self.tip_tax_bps),
            ("GROUP_TIP_TAX_BPS", self.group_tip_tax_bps),
        ] {
            if bps > BPS_DENOMINATOR {
                return Err(ConfigError::Invalid {
                    var: var.to_string(),
                    reason: format!("Must be at most {BPS_DENOMINATOR} basis points"),
                });
            }
        }

        if self.group_tip_min_duration_secs <= 0 {
            return Err(ConfigError::Invalid {
                var: "GROUP_TIP_MIN_DURATION_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.group_tip_max_duration_secs < self.group_tip_min_duration_secs {
            return Err(ConfigError::Invalid {
                var: "GROUP_TIP_MAX_DURATION_SECS".to_string(),
                reason: format!(
                    "Must be at least the minimum duration ({})",
                    self.group_tip_min_duration_secs
                ),
            });
        }

        if self.match_offer_ttl_secs <= 0 {
            return Err(ConfigError::Invalid {
                var: "MATCH_OFFER_TTL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if self.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                var: "EXPIRY_SWEEP_INTERVAL_SECS".to_string(),
                reason: "Must be greater than 0".to_string(),
            });
        }

        if let (Some(min), Some(max)) = (self.withdrawal_limits.min, self.withdrawal_limits.max) {
            if min > max {
                return Err(ConfigError::Invalid {
                    var: "WITHDRAW_MIN".to_string(),
                    reason: format!("Must not exceed WITHDRAW_MAX ({max})"),
                });
            }
        }

        Ok(())
    }

    pub fn match_offer_ttl(&self) -> Duration {
        Duration::seconds(self.match_offer_ttl_secs)
    }

    pub fn sweep_interval(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.sweep_interval_secs)
    }
}

/// Configuration error types
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration for {var}: {reason}")]
    Invalid { var: String, reason: String },
}

/// Helper to parse environment variable with default fallback
pub(crate) fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Optional non-negative decimal; a present but malformed value is an error
fn parse_decimal_env(key: &str) -> Result<Option<Decimal>, ConfigError> {
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => {
            let value: Decimal = raw.trim().parse().map_err(|_| ConfigError::Invalid {
                var: key.to_string(),
                reason: format!("'{raw}' is not a decimal number"),
            })?;
            if value.is_sign_negative() {
                return Err(ConfigError::Invalid {
                    var: key.to_string(),
                    reason: "Must not be negative".to_string(),
                });
            }
            Ok(Some(value))
        }
        _ => Ok(None),
    }
}
