//! Supabase error types and their mapping onto the client-facing errors.

use gather_core::auth::AuthError;
use gather_core::remote::RemoteError;
use serde::Deserialize;
use thiserror::Error;

/// Error body returned by PostgREST
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct PostgrestErrorBody {
    /// Postgres or PostgREST error code (`PGRST116`, `23505`, ...)
    #[serde(default)]
    pub code: Option<String>,
    /// Human readable message
    #[serde(default)]
    pub message: Option<String>,
    /// Extra detail
    #[serde(default)]
    pub details: Option<String>,
    /// Hint from the database
    #[serde(default)]
    pub hint: Option<String>,
}

/// Error body returned by GoTrue
///
/// GoTrue has used several shapes over time; every field is optional.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GoTrueErrorBody {
    /// Legacy error code (`invalid_grant`)
    #[serde(default)]
    pub error: Option<String>,
    /// Legacy description
    #[serde(default)]
    pub error_description: Option<String>,
    /// Current error code (`invalid_credentials`, `user_already_exists`)
    #[serde(default)]
    pub error_code: Option<String>,
    /// Message
    #[serde(default, alias = "message")]
    pub msg: Option<String>,
}

impl GoTrueErrorBody {
    fn text(&self) -> String {
        self.msg
            .clone()
            .or_else(|| self.error_description.clone())
            .or_else(|| self.error.clone())
            .unwrap_or_else(|| "Authentication failed".to_string())
    }
}

/// Errors from the Supabase client
#[derive(Error, Debug)]
pub enum SupabaseError {
    /// The project URL could not be parsed
    #[error("Invalid Supabase URL: {0}")]
    InvalidUrl(String),

    /// The request was refused before it was sent
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Client(String),

    /// Network failure or timeout
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body did not match the expected shape
    #[error("Decode error: {0}")]
    Decode(String),

    /// PostgREST rejected the request
    #[error("PostgREST error ({status}): {body:?}")]
    Postgrest {
        /// HTTP status
        status: u16,
        /// Parsed body
        body: PostgrestErrorBody,
    },

    /// GoTrue rejected the request
    #[error("GoTrue error ({status}): {body:?}")]
    GoTrue {
        /// HTTP status
        status: u16,
        /// Parsed body
        body: GoTrueErrorBody,
    },

    /// Realtime channel failure
    #[error("Realtime error: {0}")]
    Realtime(String),
}

impl From<reqwest::Error> for SupabaseError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SupabaseError::Decode(err.to_string())
        } else {
            SupabaseError::Transport(err.to_string())
        }
    }
}

impl From<SupabaseError> for RemoteError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::Postgrest { status, body } => postgrest_to_remote(status, body),
            SupabaseError::GoTrue { status, body } => match status {
                401 => RemoteError::Unauthorized(body.text()),
                403 => RemoteError::PermissionDenied(body.text()),
                _ => {
                    let message = body.text();
                    RemoteError::Api {
                        status,
                        code: body.error_code.or(body.error),
                        message,
                    }
                },
            },
            SupabaseError::Decode(message) => RemoteError::Decode(message),
            SupabaseError::Realtime(message) => RemoteError::Subscription(message),
            SupabaseError::InvalidUrl(message) | SupabaseError::InvalidRequest(message) => {
                RemoteError::InvalidRequest(message)
            },
            SupabaseError::Client(message) | SupabaseError::Transport(message) => {
                RemoteError::Transport(message)
            },
        }
    }
}

fn postgrest_to_remote(status: u16, body: PostgrestErrorBody) -> RemoteError {
    let message = body
        .message
        .clone()
        .unwrap_or_else(|| format!("Request failed with status {status}"));

    match (body.code.as_deref(), status) {
        (Some("PGRST116"), _) | (_, 404) => RemoteError::NotFound(message),
        (Some("42501"), _) | (_, 403) => RemoteError::PermissionDenied(message),
        (_, 401) => RemoteError::Unauthorized(message),
        (Some("23505"), _) => RemoteError::Conflict(message),
        _ => RemoteError::Api {
            status,
            code: body.code,
            message,
        },
    }
}

impl From<SupabaseError> for AuthError {
    fn from(err: SupabaseError) -> Self {
        match err {
            SupabaseError::GoTrue { status, body } => {
                let code = body.error_code.as_deref().or(body.error.as_deref());
                let text = body.text();
                if matches!(code, Some("invalid_grant" | "invalid_credentials")) && status == 400 {
                    AuthError::InvalidCredentials
                } else if matches!(code, Some("user_already_exists"))
                    || text.contains("already registered")
                {
                    AuthError::AlreadyRegistered
                } else {
                    AuthError::Rejected(text)
                }
            },
            SupabaseError::Transport(message) | SupabaseError::Client(message) => {
                AuthError::Transport(message)
            },
            other => AuthError::Rejected(other.to_string()),
        }
    }
}
