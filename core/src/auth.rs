//! Authentication provider abstraction.
//!
//! Password sign-in, sign-up and sign-out against the hosted backend's auth
//! service. The provider owns the credentials; a [`DataClient`] built on the
//! same connection acts as whoever is signed in.
//!
//! [`DataClient`]: crate::remote::DataClient

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// The signed-in account as reported by the auth service
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthIdentity {
    /// Account id; also the primary key of the profile row
    pub user_id: String,
    /// Account email
    pub email: String,
    /// Bearer token for data requests, when the provider issues one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

impl fmt::Debug for AuthIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthIdentity")
            .field("user_id", &self.user_id)
            .field("email", &self.email)
            .field("access_token", &self.access_token.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// Account creation request
#[derive(Clone, Serialize)]
pub struct SignUpRequest {
    /// Email address
    pub email: String,
    /// Password
    pub password: String,
    /// Profile fields stored with the account (e.g. `full_name`, `role`)
    pub metadata: Value,
}

impl fmt::Debug for SignUpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignUpRequest")
            .field("email", &self.email)
            .field("password", &"<redacted>")
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Errors reported by an auth provider
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// Unknown email or wrong password
    #[error("Invalid login credentials")]
    InvalidCredentials,

    /// Sign-up for an address that already has an account
    #[error("User already registered")]
    AlreadyRegistered,

    /// Sign-up succeeded but the address must be confirmed before signing in
    #[error("Confirm your email address ({0}) before signing in")]
    ConfirmationPending(String),

    /// The request was rejected before reaching the account store
    #[error("{0}")]
    Rejected(String),

    /// The request never produced a response
    #[error("Auth request failed: {0}")]
    Transport(String),
}

/// Boxed future returned by [`AuthProvider`] methods
pub type AuthFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, AuthError>> + Send + 'a>>;

/// Trait for auth provider implementations.
pub trait AuthProvider: Send + Sync {
    /// The account currently signed in, if any
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the provider cannot be reached.
    fn current(&self) -> AuthFuture<'_, Option<AuthIdentity>>;

    /// Sign in with email and password
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::InvalidCredentials`] for unknown accounts or wrong
    /// passwords.
    fn sign_in(&self, email: String, password: String) -> AuthFuture<'_, AuthIdentity>;

    /// Create an account and sign in as it
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::AlreadyRegistered`] for taken addresses and
    /// [`AuthError::ConfirmationPending`] when the provider requires email
    /// confirmation first.
    fn sign_up(&self, request: SignUpRequest) -> AuthFuture<'_, AuthIdentity>;

    /// End the current session; a no-op when nobody is signed in
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] when the provider cannot be reached.
    fn sign_out(&self) -> AuthFuture<'_, ()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_redacts_secrets() {
        let identity = AuthIdentity {
            user_id: "u1".to_string(),
            email: "ada@example.com".to_string(),
            access_token: Some("secret-token".to_string()),
        };
        let request = SignUpRequest {
            email: "ada@example.com".to_string(),
            password: "hunter22".to_string(),
            metadata: serde_json::json!({ "full_name": "Ada" }),
        };

        assert!(!format!("{identity:?}").contains("secret-token"));
        assert!(!format!("{request:?}").contains("hunter22"));
    }
}
