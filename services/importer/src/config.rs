//! Environment configuration (`.env` is loaded by `main` through dotenvy)

use anyhow::{Context, Result};

use crate::normalize::DEFAULT_MAX_KEY_LEN;

pub const DEFAULT_BATCH_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct Config {
    /// Optional so dry runs work without a database
    pub db_url: Option<String>,
    pub db_max_connections: u32,
    pub batch_size: usize,
    pub max_key_len: usize,
    pub log_json: bool,
}

/// Numeric env var with a default; unparseable or zero values fall back too
fn env_number<T>(name: &str, default: T) -> T
where
    T: std::str::FromStr + PartialEq + Default,
{
    std::env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .filter(|v| *v != T::default())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            db_url: std::env::var("DB_URL").ok().filter(|v| !v.trim().is_empty()),
            db_max_connections: env_number("DB_MAX_CONNECTIONS", 5),
            batch_size: env_number("IMPORT_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            max_key_len: env_number("IMPORT_MAX_KEY_LEN", DEFAULT_MAX_KEY_LEN),
            log_json: std::env::var("LOG_FORMAT")
                .map(|v| v.eq_ignore_ascii_case("json"))
                .unwrap_or(false),
        }
    }

    pub fn require_db_url(&self) -> Result<&str> {
        self.db_url.as_deref().context("DB_URL env var missing")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_url: None,
            db_max_connections: 5,
            batch_size: DEFAULT_BATCH_SIZE,
            max_key_len: DEFAULT_MAX_KEY_LEN,
            log_json: false,
        }
    }
}
