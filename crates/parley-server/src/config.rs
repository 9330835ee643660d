//! Server configuration loaded from environment variables.
//!
//! Every setting has a default so the server starts with zero
//! configuration for local development.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use parley_api::Settings;
use parley_db::DbOptions;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Env: `PARLEY_HOST`. Default: `0.0.0.0`
    pub host: String,

    /// Env: `PARLEY_PORT`. Default: `3000`
    pub port: u16,

    /// Env: `PARLEY_DB_PATH`. Default: `parley.db`
    pub db_path: PathBuf,

    /// Read-only connections in the pool.
    /// Env: `PARLEY_READER_POOL_SIZE`. Default: `4`
    pub reader_pool_size: usize,

    /// How long SQLite waits on a lock before reporting busy.
    /// Env: `PARLEY_BUSY_TIMEOUT_MS`. Default: `2000`
    pub busy_timeout: Duration,

    /// Upper bound on one store operation per request.
    /// Env: `PARLEY_REQUEST_TIMEOUT_MS`. Default: `5000`
    pub request_timeout: Duration,

    /// Env: `PARLEY_EMAIL_DOMAIN`. Default: `parley.local`
    pub email_domain: String,

    /// Env: `PARLEY_DEFAULT_AVATAR_URL`
    pub default_avatar_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let db = DbOptions::default();
        let settings = Settings::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            db_path: PathBuf::from("parley.db"),
            reader_pool_size: db.reader_pool_size,
            busy_timeout: db.busy_timeout,
            request_timeout: settings.request_timeout,
            email_domain: settings.email_domain,
            default_avatar_url: settings.default_avatar_url,
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(host) = std::env::var("PARLEY_HOST") {
            config.host = host;
        }
        if let Some(port) = parse_var("PARLEY_PORT") {
            config.port = port;
        }
        if let Ok(path) = std::env::var("PARLEY_DB_PATH") {
            config.db_path = PathBuf::from(path);
        }
        if let Some(size) = parse_var("PARLEY_READER_POOL_SIZE") {
            config.reader_pool_size = size;
        }
        if let Some(ms) = parse_var("PARLEY_BUSY_TIMEOUT_MS") {
            config.busy_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var("PARLEY_REQUEST_TIMEOUT_MS") {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Ok(domain) = std::env::var("PARLEY_EMAIL_DOMAIN") {
            config.email_domain = domain;
        }
        if let Ok(url) = std::env::var("PARLEY_DEFAULT_AVATAR_URL") {
            config.default_avatar_url = url;
        }

        config
    }

    pub fn db_options(&self) -> DbOptions {
        DbOptions {
            reader_pool_size: self.reader_pool_size,
            busy_timeout: self.busy_timeout,
        }
    }

    pub fn settings(&self) -> Settings {
        Settings {
            email_domain: self.email_domain.clone(),
            default_avatar_url: self.default_avatar_url.clone(),
            request_timeout: self.request_timeout,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Option<T> {
    let raw = std::env::var(name).ok()?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::warn!(var = name, value = %raw, "Invalid value, using default");
            None
        }
    }
}
