//! Connection manager configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{backoff::BackoffPolicy, error::ConfigError};

/// Time the media transport is given to release resources before connection
/// details are cleared.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// Identity payload posted to the token endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    /// Participant email, also used to derive the room name server-side.
    pub user_email: String,
    /// Display name; becomes the participant identity.
    pub full_name: String,
    /// Stable user identifier.
    pub user_id: String,
}

impl Default for TokenRequest {
    fn default() -> Self {
        Self {
            user_email: "test@example.com".to_string(),
            full_name: "Test User".to_string(),
            user_id: "test-user-123".to_string(),
        }
    }
}

impl TokenRequest {
    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("userEmail", &self.user_email),
            ("fullName", &self.full_name),
            ("userId", &self.user_id),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::EmptyIdentityField(name));
            }
        }
        Ok(())
    }
}

/// Connection manager configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManagerConfig {
    /// Media server URL. `None` makes every connect fail with a
    /// configuration toast.
    pub media_url: Option<String>,
    /// Identity payload for the token endpoint
    pub token_request: TokenRequest,
    /// Retry schedule
    pub backoff: BackoffPolicy,
    /// Delay between `disconnect()` and clearing the details
    pub settle_delay: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            media_url: None,
            token_request: TokenRequest::default(),
            backoff: BackoffPolicy::default(),
            settle_delay: DEFAULT_SETTLE_DELAY,
        }
    }
}

impl ManagerConfig {
    /// Default configuration pointing at `media_url`.
    pub fn with_media_url(media_url: impl Into<String>) -> Self {
        Self { media_url: Some(media_url.into()), ..Self::default() }
    }

    /// Check the configuration for values the manager cannot work with.
    ///
    /// A missing media URL is allowed here; it is reported to the user on
    /// each connect attempt instead.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(url) = &self.media_url {
            let url = url.trim();
            if url.is_empty() {
                return Err(ConfigError::EmptyMediaUrl);
            }
            let scheme = url.split_once("://").map_or("", |(scheme, _)| scheme);
            if !matches!(scheme, "ws" | "wss" | "http" | "https") {
                return Err(ConfigError::UnsupportedMediaScheme(scheme.to_string()));
            }
        }

        self.token_request.validate()?;

        if self.backoff.base > self.backoff.ceiling {
            return Err(ConfigError::BackoffOrder {
                base_ms: self.backoff.base.as_millis(),
                ceiling_ms: self.backoff.ceiling.as_millis(),
            });
        }

        Ok(())
    }
}
