//! Error taxonomy of the data-sync views.

use gather_core::auth::AuthError;
use gather_core::remote::RemoteError;
use gather_runtime::error::StoreError;
use thiserror::Error;

/// Errors reported by views and the session
///
/// Every variant carries the user-facing message; none of them is fatal and
/// none is retried.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SyncError {
    /// An operation that needs a signed-in user was attempted anonymously
    ///
    /// Raised locally, before any remote call.
    #[error("{0}")]
    Unauthenticated(String),

    /// The remote data client or auth service rejected the request
    #[error("{0}")]
    Remote(String),

    /// Local input checks failed
    #[error("{0}")]
    Validation(String),

    /// The view has been closed or did not answer in time
    #[error("{0}")]
    Unavailable(String),
}

impl SyncError {
    /// `Not authenticated` with a specific message
    #[must_use]
    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::Unauthenticated(message.into())
    }

    /// Validation failure with a specific message
    #[must_use]
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}

impl From<RemoteError> for SyncError {
    fn from(err: RemoteError) -> Self {
        Self::Remote(err.to_string())
    }
}

impl From<AuthError> for SyncError {
    fn from(err: AuthError) -> Self {
        Self::Remote(err.to_string())
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        Self::Unavailable(err.to_string())
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        Self::Remote(format!("Unexpected response shape: {err}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_are_passed_through() {
        assert_eq!(
            SyncError::unauthenticated("Please sign in to comment").to_string(),
            "Please sign in to comment"
        );
        assert_eq!(
            SyncError::from(RemoteError::PermissionDenied("nope".to_string())).to_string(),
            "Permission denied: nope"
        );
        assert_eq!(
            SyncError::from(AuthError::InvalidCredentials).to_string(),
            "Invalid login credentials"
        );
    }
}
