//! # Ledger Configuration
//!
//! Store location, pool sizing and the accepted currency set.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TESORO_DB_PATH=/var/lib/tesoro/ledger.db                           │
//! │     TESORO_MAX_CONNECTIONS=8                                           │
//! │     TESORO_BUSY_TIMEOUT_SECS=10                                        │
//! │     TESORO_CURRENCIES=PEN,USD                                          │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/tesoro/tesoro.toml (Linux)                               │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! [database]
//! path = "/var/lib/tesoro/ledger.db"
//! max_connections = 5
//! busy_timeout_secs = 5
//!
//! [ledger]
//! currencies = ["PEN", "USD"]
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tesoro_core::types::Currency;
use tracing::{debug, info, warn};

use crate::error::{DbError, DbResult};
use crate::pool::DbConfig;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file. Defaults to the platform data directory.
    #[serde(default)]
    pub path: Option<PathBuf>,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// How long a writer waits for another writer's lock.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,

    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
}

fn default_max_connections() -> u32 {
    5
}
fn default_min_connections() -> u32 {
    1
}
fn default_connect_timeout() -> u64 {
    30
}
fn default_busy_timeout() -> u64 {
    5
}
fn default_idle_timeout() -> u64 {
    600
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: None,
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            connect_timeout_secs: default_connect_timeout(),
            busy_timeout_secs: default_busy_timeout(),
            idle_timeout_secs: default_idle_timeout(),
        }
    }
}

// =============================================================================
// Ledger Settings
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// Accepted currency codes. Empty accepts any well-formed code.
    #[serde(default)]
    pub currencies: Vec<String>,
}

// =============================================================================
// Ledger Configuration
// =============================================================================

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub ledger: LedgerSettings,
}

impl LedgerConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (tesoro.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading ledger config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| DbError::Config(format!("{}: {}", path.display(), e)))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;

        Ok(config)
    }

    pub fn from_toml(contents: &str) -> DbResult<Self> {
        toml::from_str(contents).map_err(|e| DbError::Config(e.to_string()))
    }

    /// Applies `TESORO_*` overrides from `lookup`.
    ///
    /// Unparseable numbers are ignored with a warning.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("TESORO_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = Some(PathBuf::from(path));
        }

        if let Some(value) = lookup("TESORO_MAX_CONNECTIONS") {
            match value.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %value, "Ignoring invalid TESORO_MAX_CONNECTIONS"),
            }
        }

        if let Some(value) = lookup("TESORO_BUSY_TIMEOUT_SECS") {
            match value.parse::<u64>() {
                Ok(n) => self.database.busy_timeout_secs = n,
                Err(_) => warn!(value = %value, "Ignoring invalid TESORO_BUSY_TIMEOUT_SECS"),
            }
        }

        if let Some(value) = lookup("TESORO_CURRENCIES") {
            self.ledger.currencies = value
                .split(',')
                .map(str::trim)
                .filter(|code| !code.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.database.max_connections == 0 {
            return Err(DbError::Config("max_connections must be greater than 0".into()));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(DbError::Config(
                "min_connections must not exceed max_connections".into(),
            ));
        }
        self.accepted_currencies()?;
        Ok(())
    }

    /// Parsed accepted currency set.
    pub fn accepted_currencies(&self) -> DbResult<Vec<Currency>> {
        self.ledger
            .currencies
            .iter()
            .map(|code| Currency::new(code).map_err(|e| DbError::Config(e.to_string())))
            .collect()
    }

    /// Database file, falling back to the platform data directory.
    pub fn database_path(&self) -> DbResult<PathBuf> {
        self.database
            .path
            .clone()
            .or_else(Self::default_database_path)
            .ok_or_else(|| DbError::Config("No database path available".into()))
    }

    /// Builds the pool configuration.
    pub fn db_config(&self) -> DbResult<DbConfig> {
        Ok(DbConfig::new(self.database_path()?)
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .connect_timeout(Duration::from_secs(self.database.connect_timeout_secs))
            .busy_timeout(Duration::from_secs(self.database.busy_timeout_secs))
            .idle_timeout(Duration::from_secs(self.database.idle_timeout_secs))
            .accepted_currencies(self.accepted_currencies()?))
    }

    fn project_dirs() -> Option<directories::ProjectDirs> {
        directories::ProjectDirs::from("com", "tesoro", "tesoro")
    }

    fn default_config_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.config_dir().join("tesoro.toml"))
    }

    fn default_database_path() -> Option<PathBuf> {
        Self::project_dirs().map(|dirs| dirs.data_dir().join("tesoro.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = LedgerConfig::default();
        assert_eq!(config.database.max_connections, 5);
        assert_eq!(config.database.busy_timeout_secs, 5);
        assert!(config.ledger.currencies.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_sections() {
        let config = LedgerConfig::from_toml(
            r#"
            [database]
            path = "/tmp/ledger.db"
            max_connections = 3

            [ledger]
            currencies = ["PEN", "USD"]
            "#,
        )
        .unwrap();

        assert_eq!(config.database.path, Some(PathBuf::from("/tmp/ledger.db")));
        assert_eq!(config.database.max_connections, 3);
        assert_eq!(config.database.busy_timeout_secs, 5);
        assert_eq!(config.accepted_currencies().unwrap().len(), 2);
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("TESORO_DB_PATH", "/data/t.db"),
            ("TESORO_MAX_CONNECTIONS", "8"),
            ("TESORO_BUSY_TIMEOUT_SECS", "nope"),
            ("TESORO_CURRENCIES", "PEN, USD,"),
        ]);
        let mut config = LedgerConfig::default();
        config.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.database.path, Some(PathBuf::from("/data/t.db")));
        assert_eq!(config.database.max_connections, 8);
        assert_eq!(config.database.busy_timeout_secs, 5);
        assert_eq!(config.ledger.currencies, vec!["PEN", "USD"]);
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = LedgerConfig::default();
        config.ledger.currencies = vec!["soles".to_string()];
        assert!(matches!(config.validate(), Err(DbError::Config(_))));

        let mut config = LedgerConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_db_config_from_settings() {
        let mut config = LedgerConfig::default();
        config.database.path = Some(PathBuf::from("/tmp/x.db"));
        config.database.busy_timeout_secs = 9;
        let db = config.db_config().unwrap();
        assert_eq!(db.database_path, PathBuf::from("/tmp/x.db"));
        assert_eq!(db.busy_timeout, Duration::from_secs(9));
    }
}
