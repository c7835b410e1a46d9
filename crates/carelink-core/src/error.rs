//! Error types for the carelink core.
//!
//! Strongly-typed errors for each concern: configuration validation, credential
//! inspection, and credential acquisition from the token endpoint.
//!
//! None of these abort the process. The connection manager turns every
//! acquisition error into either a scheduled retry or a toast.

use thiserror::Error;

/// Invalid manager or client configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Media URL was provided but is blank.
    #[error("media URL is empty")]
    EmptyMediaUrl,

    /// Media URL does not use a websocket or http(s) scheme.
    #[error("media URL has unsupported scheme: {0}")]
    UnsupportedMediaScheme(String),

    /// A required token request field is empty.
    #[error("token request field `{0}` is empty")]
    EmptyIdentityField(&'static str),

    /// Backoff base exceeds its ceiling.
    #[error("backoff base {base_ms}ms exceeds ceiling {ceiling_ms}ms")]
    BackoffOrder {
        /// Base delay in milliseconds
        base_ms: u128,
        /// Ceiling in milliseconds
        ceiling_ms: u128,
    },

    /// Unknown connection mode name.
    #[error("unknown connection mode: {0}")]
    UnknownMode(String),
}

/// A credential could not be inspected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CredentialError {
    /// Token does not have a payload segment.
    #[error("credential is not a dot-separated signed token")]
    Malformed,

    /// Payload segment is not base64url.
    #[error("credential payload is not valid base64url: {0}")]
    Encoding(String),

    /// Payload is not a JSON object.
    #[error("credential payload is not a JSON object: {0}")]
    Payload(String),

    /// No participant identity anywhere in the payload or its metadata.
    #[error("credential missing participant identity")]
    MissingIdentity,
}

/// Credential acquisition failed.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenError {
    /// Token endpoint answered 401; the identity session needs a refresh.
    #[error("token endpoint rejected the session (401)")]
    Unauthorized,

    /// Token endpoint answered with another non-success status.
    #[error("token server responded with status {status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Error text from the response body
        message: String,
    },

    /// Request never produced a response.
    #[error("token request failed: {0}")]
    Transport(String),

    /// Response body did not contain a token.
    #[error("invalid token response: {0}")]
    InvalidResponse(String),

    /// Token was returned but failed inspection.
    #[error("invalid credential: {0}")]
    Credential(#[from] CredentialError),
}

impl TokenError {
    /// Returns true if this error is handled by refreshing the identity
    /// session rather than by backoff.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, Self::Unauthorized)
    }

    /// Returns true if the same request may succeed later without any change
    /// on the client side.
    ///
    /// Server errors and transport failures are transient. Client errors
    /// (4xx) and bad credentials usually are not, though the manager still
    /// spends its retry budget on them.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Transport(_) => true,
            Self::Status { status, .. } => *status >= 500 || *status == 429,
            Self::Unauthorized | Self::InvalidResponse(_) | Self::Credential(_) => false,
        }
    }
}
