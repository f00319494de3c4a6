//! services/backend/src/config.rs
//!
//! Defines the service configuration and its loading logic.
//!
//! All configuration is loaded from environment variables at startup. The `.env`
//! file is used for local development.

use std::path::PathBuf;
use std::str::FromStr;

use notenest_core::Policy;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing the environment variable {0}")]
    MissingVar(String),
    #[error("Invalid value for the environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub log_level: Level,
    pub blob_root: PathBuf,
    pub openai_api_key: Option<String>,
    pub flashcard_model: String,
    pub in_query_limit: usize,
    pub flag_hide_threshold: i64,
    pub activity_retention_days: i64,
    pub max_conflict_retries: u32,
}

fn parse_var<T>(name: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| ConfigError::InvalidValue(name.to_string(), e.to_string())),
        Err(_) => Ok(default),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// It will look for a `.env` file in the current directory for development,
    /// but this is skipped in test environments to ensure tests are hermetic.
    pub fn from_env() -> Result<Self, ConfigError> {
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| ConfigError::MissingVar("DATABASE_URL".to_string()))?;

        let log_level_str = std::env::var("RUST_LOG").unwrap_or_else(|_| "INFO".to_string());
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let blob_root = std::env::var("BLOB_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./blobs"));

        let openai_api_key = std::env::var("OPENAI_API_KEY").ok();
        let flashcard_model =
            std::env::var("FLASHCARD_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        let in_query_limit = parse_var("IN_QUERY_LIMIT", 10usize)?;
        if in_query_limit == 0 {
            return Err(ConfigError::InvalidValue(
                "IN_QUERY_LIMIT".to_string(),
                "must be at least 1".to_string(),
            ));
        }
        let flag_hide_threshold = parse_var("FLAG_HIDE_THRESHOLD", 7i64)?;
        if flag_hide_threshold < 1 {
            return Err(ConfigError::InvalidValue(
                "FLAG_HIDE_THRESHOLD".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        Ok(Self {
            database_url,
            log_level,
            blob_root,
            openai_api_key,
            flashcard_model,
            in_query_limit,
            flag_hide_threshold,
            activity_retention_days: parse_var("ACTIVITY_RETENTION_DAYS", 365i64)?,
            max_conflict_retries: parse_var("MAX_CONFLICT_RETRIES", 3u32)?,
        })
    }

    /// The core policy with the environment overrides applied.
    pub fn to_policy(&self) -> Policy {
        Policy {
            in_query_batch_size: self.in_query_limit,
            flag_hide_threshold: self.flag_hide_threshold,
            max_conflict_retries: self.max_conflict_retries,
            activity_retention: chrono::Duration::days(self.activity_retention_days),
            ..Policy::default()
        }
    }
}
