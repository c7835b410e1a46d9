//! Observable connection state.
//!
//! [`ConnectionDetails`] is the view model read by whatever renders the media
//! session: the URL and credential to hand to the media transport, and whether
//! the transport should currently be connected.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Where the media URL and credential come from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    /// Hosted token service.
    Cloud,
    /// Operator-supplied URL, token from the local endpoint.
    #[default]
    Manual,
    /// URL taken from the environment.
    Env,
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cloud => f.write_str("cloud"),
            Self::Manual => f.write_str("manual"),
            Self::Env => f.write_str("env"),
        }
    }
}

impl FromStr for ConnectionMode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cloud" => Ok(Self::Cloud),
            "manual" => Ok(Self::Manual),
            "env" => Ok(Self::Env),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

/// Lifecycle phase of the connection manager.
///
/// ```text
///            connect              credential
/// ┌──────┐ ─────────> ┌───────────┐ ─────────> ┌───────────┐
/// │ Idle │            │ Acquiring │            │ Connected │
/// └──────┘ <───────── └───────────┘            └───────────┘
///    ^     exhausted    │ ^     │ ^                  │
///    │                  v │     v │                  │ disconnect
///    │          ┌───────────┐ ┌────────────┐         v
///    │          │ RetryWait │ │ Refreshing │ ┌───────────────┐
///    │          └───────────┘ └────────────┘ │ Disconnecting │
///    │                                       └───────────────┘
///    └──────────────────── settle ────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConnectionPhase {
    /// Nothing in progress.
    #[default]
    Idle,
    /// Credential request in flight.
    Acquiring,
    /// Identity session refresh in flight after a 401.
    Refreshing,
    /// Waiting out a backoff delay before the next request.
    RetryWait,
    /// Credential held, transport should connect.
    Connected,
    /// Teardown settling.
    Disconnecting,
}

impl ConnectionPhase {
    /// Any sub-state of credential acquisition.
    pub fn is_acquiring(self) -> bool {
        matches!(self, Self::Acquiring | Self::Refreshing | Self::RetryWait)
    }
}

/// Connection data exposed to the view layer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionDetails {
    /// Media server URL.
    pub media_url: String,
    /// Signed media credential.
    pub credential: String,
    /// Mode the credential was acquired in.
    pub mode: ConnectionMode,
    /// Whether the media transport should be connected.
    pub should_connect: bool,
    /// Teardown in progress.
    pub is_disconnecting: bool,
}

impl ConnectionDetails {
    /// `should_connect` implies a non-empty URL and credential and no
    /// teardown in progress.
    pub fn is_consistent(&self) -> bool {
        !self.should_connect
            || (!self.media_url.is_empty()
                && !self.credential.is_empty()
                && !self.is_disconnecting)
    }

    /// Whether a credential is currently held.
    pub fn has_credential(&self) -> bool {
        !self.credential.is_empty()
    }
}
