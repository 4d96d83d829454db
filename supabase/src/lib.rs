//! # Gather Supabase
//!
//! Production [`DataClient`] and [`AuthProvider`] backed by a Supabase
//! project:
//!
//! - PostgREST (`/rest/v1`) for selects and mutations
//! - GoTrue (`/auth/v1`) for password sign-in, sign-up and sign-out
//! - Realtime (`/realtime/v1/websocket`) for change feeds
//!
//! The access token obtained at sign-in is shared by every clone of the
//! client and used for REST calls and realtime joins alike. Without a session
//! requests go out with the anon key, so row-level security sees an anonymous
//! caller.
//!
//! # Example
//!
//! ```ignore
//! use gather_supabase::{SupabaseClient, SupabaseConfig};
//!
//! let client = SupabaseClient::new(SupabaseConfig::new(
//!     "https://xyz.supabase.co",
//!     std::env::var("SUPABASE_ANON_KEY")?,
//! ))?;
//! client.sign_in("ada@example.com".into(), "secret".into()).await?;
//! ```
//!
//! [`DataClient`]: gather_core::remote::DataClient
//! [`AuthProvider`]: gather_core::auth::AuthProvider

use gather_core::auth::AuthIdentity;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use url::Url;

mod auth;
pub mod error;
mod realtime;
mod rest;

pub use error::SupabaseError;

/// Connection settings for a Supabase project
#[derive(Clone, PartialEq, Eq)]
pub struct SupabaseConfig {
    /// Project URL, e.g. `https://xyz.supabase.co`
    pub url: String,
    /// Public anon key
    pub anon_key: String,
    /// Timeout for each HTTP request
    pub request_timeout: Duration,
    /// Interval between realtime heartbeats
    pub heartbeat_interval: Duration,
}

impl SupabaseConfig {
    /// Settings with default timeouts (10 s requests, 30 s heartbeats)
    #[must_use]
    pub fn new(url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            anon_key: anon_key.into(),
            request_timeout: Duration::from_secs(10),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

impl std::fmt::Debug for SupabaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseConfig")
            .field("url", &self.url)
            .field("anon_key", &"<redacted>")
            .field("request_timeout", &self.request_timeout)
            .field("heartbeat_interval", &self.heartbeat_interval)
            .finish()
    }
}

/// Supabase client
///
/// Cheap to clone; clones share the HTTP connection pool and the session.
#[derive(Clone)]
pub struct SupabaseClient {
    http: reqwest::Client,
    base: Url,
    anon_key: String,
    heartbeat_interval: Duration,
    request_timeout: Duration,
    session: Arc<RwLock<Option<AuthIdentity>>>,
}

impl SupabaseClient {
    /// Create a client for the given project
    ///
    /// # Errors
    ///
    /// Returns [`SupabaseError::InvalidUrl`] if the project URL is not an
    /// absolute http(s) URL, or [`SupabaseError::Client`] if the HTTP client
    /// cannot be built.
    pub fn new(config: SupabaseConfig) -> Result<Self, SupabaseError> {
        let base = Url::parse(&config.url).map_err(|e| SupabaseError::InvalidUrl(e.to_string()))?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(SupabaseError::InvalidUrl(format!(
                "unsupported scheme: {}",
                base.scheme()
            )));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SupabaseError::Client(e.to_string()))?;

        Ok(Self {
            http,
            base,
            anon_key: config.anon_key,
            heartbeat_interval: config.heartbeat_interval,
            request_timeout: config.request_timeout,
            session: Arc::new(RwLock::new(None)),
        })
    }

    /// Currently signed-in identity, if any
    #[must_use]
    pub fn identity(&self) -> Option<AuthIdentity> {
        self.session
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    fn set_identity(&self, identity: Option<AuthIdentity>) {
        *self.session.write().unwrap_or_else(PoisonError::into_inner) = identity;
    }

    /// Bearer token for requests: the session token, else the anon key
    fn bearer(&self) -> String {
        self.identity()
            .and_then(|identity| identity.access_token)
            .unwrap_or_else(|| self.anon_key.clone())
    }

    /// `{base}/{path}` with the project URL's own path preserved
    fn endpoint(&self, path: &str) -> Result<Url, SupabaseError> {
        let mut base = self.base.clone();
        if !base.path().ends_with('/') {
            let with_slash = format!("{}/", base.path());
            base.set_path(&with_slash);
        }
        base.join(path)
            .map_err(|e| SupabaseError::InvalidUrl(e.to_string()))
    }

    /// Realtime websocket URL (`ws`/`wss` variant of the project URL)
    fn realtime_url(&self) -> Result<Url, SupabaseError> {
        let mut url = self.endpoint("realtime/v1/websocket")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|()| SupabaseError::InvalidUrl(format!("cannot use {scheme} scheme")))?;
        url.query_pairs_mut()
            .append_pair("apikey", &self.anon_key)
            .append_pair("vsn", "1.0.0");
        Ok(url)
    }
}

impl std::fmt::Debug for SupabaseClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SupabaseClient")
            .field("base", &self.base.as_str())
            .field("signed_in", &self.identity().is_some())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn realtime_url_switches_scheme_and_carries_key() {
        let client =
            SupabaseClient::new(SupabaseConfig::new("https://xyz.supabase.co", "anon")).unwrap();
        assert_eq!(
            client.realtime_url().unwrap().as_str(),
            "wss://xyz.supabase.co/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );

        let local = SupabaseClient::new(SupabaseConfig::new("http://localhost:54321", "k")).unwrap();
        assert!(local.realtime_url().unwrap().as_str().starts_with("ws://localhost:54321/"));
    }

    #[test]
    fn endpoint_keeps_base_path() {
        let client = SupabaseClient::new(SupabaseConfig::new("http://proxy.local/supa", "k")).unwrap();
        assert_eq!(
            client.endpoint("rest/v1/events").unwrap().as_str(),
            "http://proxy.local/supa/rest/v1/events"
        );
    }

    #[test]
    fn rejects_non_http_urls() {
        assert!(matches!(
            SupabaseClient::new(SupabaseConfig::new("ftp://x", "k")),
            Err(SupabaseError::InvalidUrl(_))
        ));
        assert!(matches!(
            SupabaseClient::new(SupabaseConfig::new("not a url", "k")),
            Err(SupabaseError::InvalidUrl(_))
        ));
    }

    #[test]
    fn bearer_falls_back_to_anon_key() {
        let client = SupabaseClient::new(SupabaseConfig::new("http://localhost", "anon")).unwrap();
        assert_eq!(client.bearer(), "anon");

        client.set_identity(Some(AuthIdentity {
            user_id: "u1".to_string(),
            email: "a@example.com".to_string(),
            access_token: Some("jwt".to_string()),
        }));
        assert_eq!(client.bearer(), "jwt");
    }

    #[test]
    fn debug_hides_anon_key() {
        let config = SupabaseConfig::new("http://localhost", "super-secret");
        assert!(!format!("{config:?}").contains("super-secret"));
    }
}
