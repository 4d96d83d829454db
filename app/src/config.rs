//! Configuration management for the gather client.
//!
//! Loaded from environment variables (the binary reads `.env` first) with
//! defaults for everything but the backend coordinates.

use crate::notice::NoticeDurations;
use gather_supabase::SupabaseConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required key is not set
    #[error("{0} is not set")]
    Missing(&'static str),

    /// A key is set to something unusable
    #[error("{key}={value:?} is invalid: {reason}")]
    Invalid {
        /// Variable name
        key: &'static str,
        /// Raw value
        value: String,
        /// What is wrong with it
        reason: String,
    },
}

/// Backend coordinates
#[derive(Clone, PartialEq, Eq)]
pub struct BackendConfig {
    /// Project URL (`SUPABASE_URL`)
    pub url: Option<String>,
    /// Public anon key (`SUPABASE_ANON_KEY`)
    pub anon_key: Option<String>,
    /// Request timeout (`GATHER_REQUEST_TIMEOUT_SECS`, default: 10)
    pub request_timeout: Duration,
    /// Realtime heartbeat interval (`GATHER_REALTIME_HEARTBEAT_SECS`, default: 30)
    pub heartbeat_interval: Duration,
}

impl fmt::Debug for BackendConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendConfig")
            .field("url", &self.url)
            .field("anon_key", &self.anon_key.as_ref().map(|_| "<redacted>"))
            .field("request_timeout", &self.request_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

/// Sign-in credentials used at start
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// `GATHER_EMAIL`
    pub email: String,
    /// `GATHER_PASSWORD`
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Application configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Backend coordinates and timeouts
    pub backend: BackendConfig,
    /// Notice lifetimes (`GATHER_NOTICE_SUCCESS_MS`, `GATHER_NOTICE_ERROR_MS`)
    pub notices: NoticeDurations,
    /// Optional sign-in at start
    pub credentials: Option<Credentials>,
    /// Log filter (`GATHER_LOG`, default: `gather=info`)
    pub log: String,
}

impl Config {
    /// Load configuration from the process environment
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for malformed numbers.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] for malformed numbers.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let text = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let backend = BackendConfig {
            url: text("SUPABASE_URL"),
            anon_key: text("SUPABASE_ANON_KEY"),
            request_timeout: Duration::from_secs(number(
                "GATHER_REQUEST_TIMEOUT_SECS",
                text("GATHER_REQUEST_TIMEOUT_SECS"),
                10,
            )?),
            heartbeat_interval: Duration::from_secs(number(
                "GATHER_REALTIME_HEARTBEAT_SECS",
                text("GATHER_REALTIME_HEARTBEAT_SECS"),
                30,
            )?),
        };

        let notices = NoticeDurations {
            success: Duration::from_millis(number(
                "GATHER_NOTICE_SUCCESS_MS",
                text("GATHER_NOTICE_SUCCESS_MS"),
                3000,
            )?),
            error: Duration::from_millis(number(
                "GATHER_NOTICE_ERROR_MS",
                text("GATHER_NOTICE_ERROR_MS"),
                4000,
            )?),
        };

        let credentials = match (text("GATHER_EMAIL"), lookup("GATHER_PASSWORD")) {
            (Some(email), Some(password)) => Some(Credentials { email, password }),
            _ => None,
        };

        Ok(Self {
            backend,
            notices,
            credentials,
            log: text("GATHER_LOG").unwrap_or_else(|| "gather=info".to_string()),
        })
    }

    /// Settings for the Supabase client
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Missing`] when the URL or the anon key is not
    /// set.
    pub fn supabase(&self) -> Result<SupabaseConfig, ConfigError> {
        let url = self
            .backend
            .url
            .clone()
            .ok_or(ConfigError::Missing("SUPABASE_URL"))?;
        let anon_key = self
            .backend
            .anon_key
            .clone()
            .ok_or(ConfigError::Missing("SUPABASE_ANON_KEY"))?;

        let mut config = SupabaseConfig::new(url, anon_key);
        config.request_timeout = self.backend.request_timeout;
        config.heartbeat_interval = self.backend.heartbeat_interval;
        Ok(config)
    }
}

fn number<T: FromStr>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError>
where
    T::Err: fmt::Display,
{
    match value {
        None => Ok(default),
        Some(value) => value.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
            value,
        }),
    }
}
