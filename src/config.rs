//! Aggregate configuration, loadable from the environment.

use std::{env, num::NonZeroU32, path::PathBuf, str::FromStr};

use serde::Deserialize;
use thiserror::Error;

use crate::{
    engine::queue::QueueConfig,
    persist::{PersistResult, sqlite::SqliteOperationStore},
    runtime::coordinator::CoordinatorConfig,
};

/// Every tunable of the sync queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// SQLite database file; in-memory when unset.
    pub db_path: Option<PathBuf>,
    /// Drain and retry behavior.
    pub queue: QueueConfig,
    /// Trigger timing.
    pub coordinator: CoordinatorConfig,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable held an unparsable or out-of-range value.
    #[error("invalid value for {var}: {value:?}")]
    InvalidValue {
        /// Variable name.
        var: &'static str,
        /// Raw value found.
        value: String,
    },
}

impl SyncConfig {
    /// Loads configuration from `SYNCQUEUE_*` environment variables.
    ///
    /// Unset variables keep their defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|var| env::var(var).ok())
    }

    /// Loads configuration through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        config.db_path = lookup("SYNCQUEUE_DB_PATH")
            .filter(|v| !v.is_empty())
            .map(PathBuf::from);
        if let Some(v) = parse_var::<_, NonZeroU32>(&lookup, "SYNCQUEUE_MAX_RETRIES")? {
            config.queue.max_retries = v.get();
        }
        if let Some(v) = parse_var(&lookup, "SYNCQUEUE_APPLY_TIMEOUT_MS")? {
            config.queue.apply_timeout_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "SYNCQUEUE_MAX_ERROR_HISTORY")? {
            config.queue.max_error_history = v;
        }
        if let Some(v) = parse_var(&lookup, "SYNCQUEUE_STARTUP_DELAY_MS")? {
            config.coordinator.startup_delay_ms = v;
        }
        if let Some(v) = parse_var(&lookup, "SYNCQUEUE_RETRY_INTERVAL_MS")? {
            config.coordinator.retry_interval_ms = v;
        }

        Ok(config)
    }

    /// Opens the configured SQLite store.
    pub fn open_store(&self) -> PersistResult<SqliteOperationStore> {
        match &self.db_path {
            Some(path) => SqliteOperationStore::open(path),
            None => SqliteOperationStore::open_in_memory(),
        }
    }
}

fn parse_var<F, T>(lookup: &F, var: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    let Some(value) = lookup(var) else {
        return Ok(None);
    };
    value
        .trim()
        .parse()
        .map(Some)
        .map_err(|_| ConfigError::InvalidValue { var, value })
}
