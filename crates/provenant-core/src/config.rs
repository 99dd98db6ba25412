// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration loading from environment variables.

use std::time::Duration;

/// Provenant daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite connection URL or path
    pub database_url: String,
    /// Delay between daemon ticks
    pub tick_interval: Duration,
    /// How many times a busy/locked query is retried before giving up
    pub max_query_retries: u32,
    /// Return the first resume error from a tick instead of only recording it
    pub print_exceptions: bool,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `PROVENANT_DATABASE_URL`: SQLite connection string
    ///
    /// Optional (with defaults):
    /// - `PROVENANT_TICK_INTERVAL_MS`: Daemon tick interval (default: 1000)
    /// - `PROVENANT_MAX_QUERY_RETRIES`: Retries for busy queries (default: 3)
    /// - `PROVENANT_PRINT_EXCEPTIONS`: Surface resume errors (default: false)
    pub fn from_env() -> Result<Self, ConfigError> {
        let database_url = std::env::var("PROVENANT_DATABASE_URL")
            .map_err(|_| ConfigError::Missing("PROVENANT_DATABASE_URL"))?;

        let tick_interval_ms: u64 = std::env::var("PROVENANT_TICK_INTERVAL_MS")
            .unwrap_or_else(|_| "1000".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "PROVENANT_TICK_INTERVAL_MS",
                    "must be a non-negative integer",
                )
            })?;

        let max_query_retries: u32 = std::env::var("PROVENANT_MAX_QUERY_RETRIES")
            .unwrap_or_else(|_| "3".to_string())
            .parse()
            .map_err(|_| {
                ConfigError::Invalid(
                    "PROVENANT_MAX_QUERY_RETRIES",
                    "must be a non-negative integer",
                )
            })?;

        let print_exceptions = match std::env::var("PROVENANT_PRINT_EXCEPTIONS") {
            Ok(value) => match value.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" => true,
                "0" | "false" | "no" | "" => false,
                _ => {
                    return Err(ConfigError::Invalid(
                        "PROVENANT_PRINT_EXCEPTIONS",
                        "must be true or false",
                    ));
                }
            },
            Err(_) => false,
        };

        Ok(Self {
            database_url,
            tick_interval: Duration::from_millis(tick_interval_ms),
            max_query_retries,
            print_exceptions,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    /// An environment variable has an invalid value.
    #[error("invalid value for {0}: {1}")]
    Invalid(&'static str, &'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;

    // Mutex to serialize tests that modify environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to set env vars for a test and restore them after
    struct EnvGuard {
        vars: Vec<(String, Option<String>)>,
    }

    impl EnvGuard {
        fn new() -> Self {
            Self { vars: Vec::new() }
        }

        fn set(&mut self, key: &str, value: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::set_var(key, value) };
        }

        fn remove(&mut self, key: &str) {
            let old = env::var(key).ok();
            self.vars.push((key.to_string(), old));
            // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
            unsafe { env::remove_var(key) };
        }
    }

    impl Drop for EnvGuard {
        fn drop(&mut self) {
            for (key, value) in self.vars.drain(..).rev() {
                // SAFETY: Tests are serialized via ENV_MUTEX, so no concurrent access
                unsafe {
                    match value {
                        Some(v) => env::set_var(&key, v),
                        None => env::remove_var(&key),
                    }
                }
            }
        }
    }

    fn clear_optional(guard: &mut EnvGuard) {
        guard.remove("PROVENANT_TICK_INTERVAL_MS");
        guard.remove("PROVENANT_MAX_QUERY_RETRIES");
        guard.remove("PROVENANT_PRINT_EXCEPTIONS");
    }

    #[test]
    fn test_config_from_env_with_defaults() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("PROVENANT_DATABASE_URL", "sqlite::memory:");
        clear_optional(&mut guard);

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite::memory:");
        assert_eq!(config.tick_interval, Duration::from_millis(1000));
        assert_eq!(config.max_query_retries, 3);
        assert!(!config.print_exceptions);
    }

    #[test]
    fn test_config_from_env_all_custom() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("PROVENANT_DATABASE_URL", "sqlite:.data/provenance.db");
        guard.set("PROVENANT_TICK_INTERVAL_MS", "250");
        guard.set("PROVENANT_MAX_QUERY_RETRIES", "7");
        guard.set("PROVENANT_PRINT_EXCEPTIONS", "TRUE");

        let config = Config::from_env().unwrap();

        assert_eq!(config.database_url, "sqlite:.data/provenance.db");
        assert_eq!(config.tick_interval, Duration::from_millis(250));
        assert_eq!(config.max_query_retries, 7);
        assert!(config.print_exceptions);
    }

    #[test]
    fn test_config_missing_database_url() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.remove("PROVENANT_DATABASE_URL");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(err, ConfigError::Missing("PROVENANT_DATABASE_URL")));
        assert!(err.to_string().contains("PROVENANT_DATABASE_URL"));
    }

    #[test]
    fn test_config_invalid_tick_interval() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("PROVENANT_DATABASE_URL", "sqlite::memory:");
        clear_optional(&mut guard);
        guard.set("PROVENANT_TICK_INTERVAL_MS", "-5");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("PROVENANT_TICK_INTERVAL_MS", _)
        ));
    }

    #[test]
    fn test_config_invalid_print_exceptions() {
        let _lock = ENV_MUTEX.lock().unwrap();
        let mut guard = EnvGuard::new();

        guard.set("PROVENANT_DATABASE_URL", "sqlite::memory:");
        clear_optional(&mut guard);
        guard.set("PROVENANT_PRINT_EXCEPTIONS", "sometimes");

        let err = Config::from_env().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid("PROVENANT_PRINT_EXCEPTIONS", _)
        ));
    }

    #[test]
    fn test_config_error_display() {
        let missing = ConfigError::Missing("MY_VAR");
        assert_eq!(
            missing.to_string(),
            "missing required environment variable: MY_VAR"
        );

        let invalid = ConfigError::Invalid("MY_VAR", "must be a number");
        assert_eq!(
            invalid.to_string(),
            "invalid value for MY_VAR: must be a number"
        );
    }
}
