//! Network reachability and identity-session validity.
//!
//! [`StatusMonitor`] is the observer the connection manager composes with. It
//! turns browser-style online/offline signals and periodic identity-session
//! checks into toasts, refresh requests and two flags (`online`,
//! `session_valid`) for the view layer.
//!
//! Session checks follow a fixed policy:
//!
//! - no session, or the backend reported an error: invalid
//! - already expired: refresh; valid only if the refresh succeeds
//! - expiring within [`SESSION_REFRESH_WINDOW`]: refresh; a failed refresh
//!   leaves validity unchanged since the session still works for now
//! - otherwise: valid

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::toast::Toast;

/// How often the driver should check the identity session.
pub const SESSION_CHECK_INTERVAL: Duration = Duration::from_secs(30);

/// Sessions expiring sooner than this are refreshed proactively.
pub const SESSION_REFRESH_WINDOW: Duration = Duration::from_secs(5 * 60);

/// Identity session as reported by the identity backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    /// Bearer token for authenticated requests.
    pub access_token: String,
    /// Token used to obtain a new session.
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default)]
    pub expires_at: Option<u64>,
}

/// Classification of an identity session at a point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStatus {
    /// No session.
    Missing,
    /// Past its expiry.
    Expired,
    /// Inside the refresh window.
    ExpiringSoon {
        /// Time left before expiry
        remaining: Duration,
    },
    /// Usable; no expiry or expiry far enough away.
    Valid,
}

impl SessionStatus {
    /// Classify `session` at `now_secs` (Unix seconds).
    pub fn evaluate(session: Option<&SessionInfo>, now_secs: u64) -> Self {
        let Some(session) = session else {
            return Self::Missing;
        };
        let Some(expires_at) = session.expires_at else {
            return Self::Valid;
        };

        if expires_at < now_secs {
            return Self::Expired;
        }

        let remaining = Duration::from_secs(expires_at - now_secs);
        if remaining < SESSION_REFRESH_WINDOW {
            Self::ExpiringSoon { remaining }
        } else {
            Self::Valid
        }
    }

    /// Whether this status calls for a refresh.
    pub fn needs_refresh(self) -> bool {
        matches!(self, Self::Expired | Self::ExpiringSoon { .. })
    }
}

/// Notifications from the media transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaEvent {
    /// Transport joined the room.
    Connected {
        /// Room name, if the transport reports it
        room: Option<String>,
    },
    /// Transport left the room.
    Disconnected {
        /// Reason reported by the transport
        reason: Option<String>,
    },
    /// Transport failure.
    Error {
        /// Description from the transport
        message: String,
    },
}

/// Events fed into the status monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusEvent {
    /// Network became reachable.
    Online,
    /// Network became unreachable.
    Offline,
    /// Identity session lookup finished.
    SessionChecked {
        /// Current session, or the backend's error
        result: Result<Option<SessionInfo>, String>,
        /// Wall clock at the time of the check
        now_secs: u64,
    },
    /// Refresh requested by this monitor finished.
    RefreshCompleted {
        /// Failure reason, if any
        result: Result<(), String>,
    },
    /// Media transport notification.
    Media(MediaEvent),
}

/// Actions returned by the status monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusAction {
    /// Surface a notification.
    Toast(Toast),
    /// Refresh the identity session and feed back `RefreshCompleted`.
    RefreshSession,
}

/// Network and identity-session observer.
#[derive(Debug, Clone)]
pub struct StatusMonitor {
    online: bool,
    session_valid: bool,
    /// Status that triggered the refresh currently in flight
    pending_refresh: Option<SessionStatus>,
}

impl Default for StatusMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusMonitor {
    /// Online with a valid session until told otherwise.
    pub fn new() -> Self {
        Self { online: true, session_valid: true, pending_refresh: None }
    }

    /// Last known reachability.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// Last known identity-session validity.
    pub fn session_valid(&self) -> bool {
        self.session_valid
    }

    /// Process an event and return actions.
    pub fn handle(&mut self, event: StatusEvent) -> Vec<StatusAction> {
        match event {
            StatusEvent::Online => self.set_online(true),
            StatusEvent::Offline => self.set_online(false),
            StatusEvent::SessionChecked { result, now_secs } => {
                self.handle_session_checked(result, now_secs)
            },
            StatusEvent::RefreshCompleted { result } => {
                self.handle_refresh_completed(result);
                Vec::new()
            },
            StatusEvent::Media(event) => Self::handle_media(event),
        }
    }

    fn set_online(&mut self, online: bool) -> Vec<StatusAction> {
        if self.online == online {
            return Vec::new();
        }
        self.online = online;

        if online {
            tracing::info!("network back online");
            vec![StatusAction::Toast(Toast::success("Back online"))]
        } else {
            tracing::warn!("network connection lost");
            vec![StatusAction::Toast(Toast::error("Network connection lost"))]
        }
    }

    fn handle_session_checked(
        &mut self,
        result: Result<Option<SessionInfo>, String>,
        now_secs: u64,
    ) -> Vec<StatusAction> {
        let session = match result {
            Ok(session) => session,
            Err(message) => {
                tracing::error!(%message, "session check failed");
                self.session_valid = false;
                return vec![StatusAction::Toast(Toast::error(format!(
                    "Session error: {message}"
                )))];
            },
        };

        let status = SessionStatus::evaluate(session.as_ref(), now_secs);
        tracing::debug!(?status, "session checked");

        match status {
            SessionStatus::Missing => {
                self.session_valid = false;
                Vec::new()
            },
            SessionStatus::Valid => {
                self.session_valid = true;
                Vec::new()
            },
            SessionStatus::Expired | SessionStatus::ExpiringSoon { .. } => {
                if self.pending_refresh.is_some() {
                    return Vec::new();
                }
                self.pending_refresh = Some(status);
                vec![StatusAction::RefreshSession]
            },
        }
    }

    fn handle_refresh_completed(&mut self, result: Result<(), String>) {
        let Some(status) = self.pending_refresh.take() else {
            tracing::debug!("refresh result without pending refresh");
            return;
        };

        match (status, result) {
            (_, Ok(())) => {
                tracing::info!("session refreshed");
                self.session_valid = true;
            },
            (SessionStatus::Expired, Err(reason)) => {
                tracing::warn!(%reason, "expired session could not be refreshed");
                self.session_valid = false;
            },
            (_, Err(reason)) => {
                tracing::warn!(%reason, "proactive session refresh failed");
            },
        }
    }

    fn handle_media(event: MediaEvent) -> Vec<StatusAction> {
        match event {
            MediaEvent::Connected { room } => {
                tracing::info!(room = room.as_deref().unwrap_or("<unknown>"), "media connected");
                Vec::new()
            },
            MediaEvent::Disconnected { reason } => {
                let reason = reason.as_deref().unwrap_or("<none>");
                tracing::info!(reason, "media disconnected");
                Vec::new()
            },
            MediaEvent::Error { message } => {
                tracing::error!(%message, "media transport error");
                let toast = Toast::error(format!("Media connection error: {message}"));
                vec![StatusAction::Toast(toast)]
            },
        }
    }
}
