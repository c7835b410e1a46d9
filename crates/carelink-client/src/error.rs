//! Client error types.

use carelink_core::ConfigError;
use thiserror::Error;

/// Identity backend failures.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// Nothing to refresh or sign out of.
    #[error("no active session")]
    NoSession,

    /// Session exists but carries no refresh token.
    #[error("session has no refresh token")]
    NoRefreshToken,

    /// Request never produced a response.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Backend answered with a non-success status.
    #[error("identity backend error ({status}): {message}")]
    Backend {
        /// HTTP status code
        status: u16,
        /// Error text from the response body
        message: String,
    },
}

/// Errors from the [`Session`](crate::Session) handle.
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration rejected at spawn time.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// The driver task is gone (shut down or panicked).
    #[error("session driver has stopped")]
    Closed,
}
