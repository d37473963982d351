//! Daemon configuration management.
//!
//! Consolidates the environment reads of the database pool and the engine and
//! validates them once at startup.

use tip_ledger::{ConfigError, DatabaseConfig, EngineConfig};

/// Complete daemon configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Database configuration
    pub database: DatabaseConfig,
    /// Fees, taxes, timers and withdrawal defaults
    pub engine: EngineConfig,
    /// Apply embedded migrations before starting
    pub run_migrations: bool,
}

impl ServerConfig {
    /// Load configuration from environment variables
    ///
    /// # Arguments
    ///
    /// * `database_url_override` - Optional database URL override (from CLI args)
    ///
    /// # Errors
    ///
    /// Returns error if a present variable cannot be parsed
    pub fn from_env(database_url_override: Option<String>) -> Result<Self, ConfigError> {
        let mut database = DatabaseConfig::from_env();
        if let Some(url) = database_url_override {
            database.database_url = url;
        }

        Ok(ServerConfig {
            database,
            engine: EngineConfig::from_env()?,
            run_migrations: parse_env_or("RUN_MIGRATIONS", true),
        })
    }

    /// Validate configuration after loading
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.database.validate()?;
        self.engine.validate()
    }
}

/// Helper to parse environment variable with default fallback
fn parse_env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ServerConfig {
        ServerConfig {
            database: DatabaseConfig::with_url("postgres://localhost/test"),
            engine: EngineConfig::default(),
            run_migrations: true,
        }
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_pool_bounds() {
        let mut config = config();
        config.database.min_connections = 50;
        config.database.max_connections = 10;

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref var, .. } if var == "DB_MIN_CONNECTIONS"));
    }

    #[test]
    fn test_config_validation_delegates_to_engine() {
        let mut config = config();
        config.engine.house_fee_bps = 20_000;

        assert!(config.validate().is_err());
    }
}
