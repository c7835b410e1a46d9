//! Connection lifecycle state machine.
//!
//! Owns everything needed to join and leave a media session: acquiring a
//! short-lived credential, retrying with backoff, refreshing the identity
//! session once on a 401, and the delayed teardown on disconnect.
//!
//! Uses the action pattern: [`ConnectionManager::handle`] takes an event and
//! returns actions for the driver to execute. The manager performs no I/O and
//! never reads a clock; delays are expressed as [`ConnectionAction::Schedule`]
//! and come back as [`ConnectionEvent::TimerFired`].
//!
//! # Generations
//!
//! Every acquisition and every teardown gets a new generation number. Fetch
//! results, refresh results and timers carry the generation they were issued
//! for, and anything tagged with an older generation is dropped. This is what
//! makes `disconnect()` cancel an in-flight acquisition and what keeps a
//! superseded timer from mutating state.

use std::time::Duration;

use crate::{
    backoff::RetryState,
    config::{ManagerConfig, TokenRequest},
    credential,
    error::TokenError,
    state::{ConnectionDetails, ConnectionMode, ConnectionPhase},
    toast::Toast,
};

/// Shown when connecting while the network is down.
pub const OFFLINE_MESSAGE: &str = "No internet connection. Please check your network.";

/// Shown when no media URL is configured.
pub const MISSING_URL_MESSAGE: &str =
    "Missing media server URL configuration. Please check environment variables.";

/// Shown when the identity session cannot be refreshed after a 401.
pub const SESSION_EXPIRED_MESSAGE: &str = "Session expired. Please sign in again.";

/// Shown when the retry budget is exhausted.
pub const RETRIES_EXHAUSTED_MESSAGE: &str =
    "Failed to connect after multiple attempts. Please try again later.";

/// Which deferred step a timer belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerKind {
    /// Backoff before the next credential request.
    Retry,
    /// Teardown settle delay.
    Settle,
}

/// A timer requested by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Timer {
    /// What the timer is for
    pub kind: TimerKind,
    /// Generation the timer was scheduled in
    pub generation: u64,
}

/// Events fed into the connection manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// Caller wants to join the media session.
    Connect {
        /// Credential source
        mode: ConnectionMode,
    },

    /// Caller wants to leave the media session.
    Disconnect,

    /// Network reachability changed.
    NetworkChanged {
        /// Whether the network is reachable
        online: bool,
    },

    /// Credential request finished.
    CredentialFetched {
        /// Generation the request was issued in
        generation: u64,
        /// Signed credential or the failure
        result: Result<String, TokenError>,
    },

    /// Identity session refresh finished.
    SessionRefreshed {
        /// Generation the refresh was issued in
        generation: u64,
        /// Failure reason, if any
        result: Result<(), String>,
    },

    /// A scheduled timer elapsed.
    TimerFired(Timer),

    /// Owner is going away; ignore everything from now on.
    Shutdown,
}

/// Actions returned by the connection manager.
///
/// The driver executes these:
/// - `FetchCredential`: POST the request to the token endpoint and feed back
///   `CredentialFetched` with the same generation
/// - `RefreshSession`: refresh the identity session and feed back
///   `SessionRefreshed`
/// - `SignOut`: end the identity session (no result expected)
/// - `Schedule`: feed back `TimerFired` after `delay`, replacing any pending
///   timer of the same kind
/// - `Toast`: show the notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Request a credential.
    FetchCredential {
        /// Generation to tag the result with
        generation: u64,
        /// Body for the token endpoint
        request: TokenRequest,
    },

    /// Refresh the identity session.
    RefreshSession {
        /// Generation to tag the result with
        generation: u64,
    },

    /// Sign the user out of the identity backend.
    SignOut,

    /// Start a timer.
    Schedule {
        /// Timer to fire
        timer: Timer,
        /// Delay before firing
        delay: Duration,
    },

    /// Surface a notification.
    Toast(Toast),
}

/// Connection lifecycle state machine.
///
/// Pure state machine: no I/O, no clock. Feed events through
/// [`handle`](Self::handle) and execute the returned actions.
#[derive(Debug, Clone)]
pub struct ConnectionManager {
    config: ManagerConfig,
    phase: ConnectionPhase,
    details: ConnectionDetails,
    retry: RetryState,
    /// Mode requested by the acquisition in progress
    pending_mode: ConnectionMode,
    /// Current generation; stale completions are compared against it
    generation: u64,
    /// The current acquisition already spent its one session refresh
    refreshed: bool,
    online: bool,
    live: bool,
}

impl ConnectionManager {
    /// Create an idle manager. The network is assumed reachable until told
    /// otherwise.
    pub fn new(config: ManagerConfig) -> Self {
        let retry = RetryState::new(config.backoff.max_attempts);
        Self {
            config,
            phase: ConnectionPhase::Idle,
            details: ConnectionDetails::default(),
            retry,
            pending_mode: ConnectionMode::default(),
            generation: 0,
            refreshed: false,
            online: true,
            live: true,
        }
    }

    /// Current lifecycle phase.
    pub fn phase(&self) -> ConnectionPhase {
        self.phase
    }

    /// Connection details for the view layer.
    pub fn details(&self) -> &ConnectionDetails {
        &self.details
    }

    /// Whether the media transport should be connected.
    pub fn should_connect(&self) -> bool {
        self.details.should_connect && !self.details.is_disconnecting
    }

    /// Retries spent by the current acquisition.
    pub fn retry_count(&self) -> u32 {
        self.retry.attempt_count()
    }

    /// Current generation.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Last known network reachability.
    pub fn is_online(&self) -> bool {
        self.online
    }

    /// False once [`ConnectionEvent::Shutdown`] has been handled.
    pub fn is_live(&self) -> bool {
        self.live
    }

    /// Configuration in use.
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// Start joining the media session.
    pub fn connect(&mut self, mode: ConnectionMode) -> Vec<ConnectionAction> {
        self.handle(ConnectionEvent::Connect { mode })
    }

    /// Start leaving the media session.
    pub fn disconnect(&mut self) -> Vec<ConnectionAction> {
        self.handle(ConnectionEvent::Disconnect)
    }

    /// Process an event and return resulting actions.
    pub fn handle(&mut self, event: ConnectionEvent) -> Vec<ConnectionAction> {
        if !self.live {
            tracing::debug!(?event, "connection manager shut down, ignoring event");
            return Vec::new();
        }

        let actions = match event {
            ConnectionEvent::Connect { mode } => self.handle_connect(mode),
            ConnectionEvent::Disconnect => self.handle_disconnect(),
            ConnectionEvent::NetworkChanged { online } => {
                self.online = online;
                Vec::new()
            },
            ConnectionEvent::CredentialFetched { generation, result } => {
                self.handle_credential(generation, result)
            },
            ConnectionEvent::SessionRefreshed { generation, result } => {
                self.handle_refreshed(generation, result)
            },
            ConnectionEvent::TimerFired(timer) => self.handle_timer(timer),
            ConnectionEvent::Shutdown => {
                self.live = false;
                Vec::new()
            },
        };

        debug_assert!(self.details.is_consistent(), "inconsistent details: {:?}", self.details);
        actions
    }

    fn handle_connect(&mut self, mode: ConnectionMode) -> Vec<ConnectionAction> {
        if self.details.is_disconnecting || self.details.should_connect {
            tracing::debug!(
                disconnecting = self.details.is_disconnecting,
                should_connect = self.details.should_connect,
                "connect blocked"
            );
            return Vec::new();
        }

        if self.phase != ConnectionPhase::Idle {
            tracing::debug!(phase = ?self.phase, "connection attempt already in progress");
            return Vec::new();
        }

        self.generation += 1;
        self.pending_mode = mode;
        self.refreshed = false;
        self.retry.reset();

        tracing::info!(%mode, generation = self.generation, "connecting");
        self.begin_fetch()
    }

    /// Issue a credential request for the current generation, or abort to
    /// idle if the request cannot be made.
    fn begin_fetch(&mut self) -> Vec<ConnectionAction> {
        if !self.online {
            tracing::warn!("cannot connect while offline");
            self.phase = ConnectionPhase::Idle;
            return vec![ConnectionAction::Toast(Toast::error(OFFLINE_MESSAGE))];
        }

        if self.media_url().is_none() {
            tracing::error!("no media URL configured");
            self.phase = ConnectionPhase::Idle;
            return vec![ConnectionAction::Toast(Toast::error(MISSING_URL_MESSAGE))];
        }

        self.phase = ConnectionPhase::Acquiring;
        tracing::debug!(
            generation = self.generation,
            attempt = self.retry.attempt_count(),
            "requesting credential"
        );
        vec![ConnectionAction::FetchCredential {
            generation: self.generation,
            request: self.config.token_request.clone(),
        }]
    }

    fn handle_credential(
        &mut self,
        generation: u64,
        result: Result<String, TokenError>,
    ) -> Vec<ConnectionAction> {
        if generation != self.generation || self.phase != ConnectionPhase::Acquiring {
            tracing::debug!(generation, current = self.generation, "dropping stale credential");
            return Vec::new();
        }

        match result {
            Ok(token) => self.accept_credential(token),
            Err(error) if error.is_unauthorized() && !self.refreshed => {
                tracing::info!("token endpoint returned 401, refreshing session");
                self.refreshed = true;
                self.phase = ConnectionPhase::Refreshing;
                vec![ConnectionAction::RefreshSession { generation: self.generation }]
            },
            Err(error) => self.fail_attempt(&error),
        }
    }

    fn accept_credential(&mut self, token: String) -> Vec<ConnectionAction> {
        let claims = match credential::inspect(&token) {
            Ok(claims) => claims,
            Err(e) => return self.fail_attempt(&TokenError::Credential(e)),
        };

        let Some(media_url) = self.media_url().map(str::to_string) else {
            self.phase = ConnectionPhase::Idle;
            return vec![ConnectionAction::Toast(Toast::error(MISSING_URL_MESSAGE))];
        };

        tracing::info!(
            participant = %claims.identity,
            room = claims.room.as_deref().unwrap_or("<unspecified>"),
            mode = %self.pending_mode,
            "credential accepted"
        );

        self.details = ConnectionDetails {
            media_url,
            credential: token,
            mode: self.pending_mode,
            should_connect: true,
            is_disconnecting: false,
        };
        self.retry.reset();
        self.phase = ConnectionPhase::Connected;
        Vec::new()
    }

    fn fail_attempt(&mut self, error: &TokenError) -> Vec<ConnectionAction> {
        let attempt = self.retry.attempt_count();
        let transient = error.is_transient();
        let max_attempts = self.retry.max_attempts();
        tracing::warn!(%error, attempt, max_attempts, transient, "credential fetch failed");

        if !self.retry.can_retry() {
            tracing::error!(attempts = attempt, "giving up on credential acquisition");
            self.phase = ConnectionPhase::Idle;
            return vec![ConnectionAction::Toast(Toast::error(RETRIES_EXHAUSTED_MESSAGE))];
        }

        let delay = self.config.backoff.delay(attempt);
        self.phase = ConnectionPhase::RetryWait;
        vec![
            ConnectionAction::Toast(Toast::info(format!(
                "Connection failed. Retrying in {} seconds...",
                format_secs(delay)
            ))),
            ConnectionAction::Schedule {
                timer: Timer { kind: TimerKind::Retry, generation: self.generation },
                delay,
            },
        ]
    }

    fn handle_refreshed(
        &mut self,
        generation: u64,
        result: Result<(), String>,
    ) -> Vec<ConnectionAction> {
        if generation != self.generation || self.phase != ConnectionPhase::Refreshing {
            tracing::debug!(generation, current = self.generation, "dropping stale refresh");
            return Vec::new();
        }

        match result {
            Ok(()) => {
                tracing::info!("session refreshed, retrying credential request");
                self.begin_fetch()
            },
            Err(reason) => {
                tracing::warn!(%reason, "session refresh failed, signing out");
                self.phase = ConnectionPhase::Idle;
                vec![
                    ConnectionAction::Toast(Toast::error(SESSION_EXPIRED_MESSAGE)),
                    ConnectionAction::SignOut,
                ]
            },
        }
    }

    fn handle_disconnect(&mut self) -> Vec<ConnectionAction> {
        if self.phase == ConnectionPhase::Disconnecting {
            tracing::debug!("already disconnecting");
            return Vec::new();
        }

        tracing::info!(
            should_connect = self.details.should_connect,
            phase = ?self.phase,
            "disconnecting"
        );

        self.generation += 1;
        self.details.should_connect = false;
        self.details.is_disconnecting = true;
        self.phase = ConnectionPhase::Disconnecting;

        vec![ConnectionAction::Schedule {
            timer: Timer { kind: TimerKind::Settle, generation: self.generation },
            delay: self.config.settle_delay,
        }]
    }

    fn handle_timer(&mut self, timer: Timer) -> Vec<ConnectionAction> {
        if timer.generation != self.generation {
            tracing::debug!(?timer, current = self.generation, "dropping stale timer");
            return Vec::new();
        }

        match (timer.kind, self.phase) {
            (TimerKind::Retry, ConnectionPhase::RetryWait) => {
                self.retry.record_retry();
                self.begin_fetch()
            },
            (TimerKind::Settle, ConnectionPhase::Disconnecting) => {
                tracing::debug!("teardown settled");
                self.details = ConnectionDetails::default();
                self.retry.reset();
                self.refreshed = false;
                self.phase = ConnectionPhase::Idle;
                Vec::new()
            },
            (kind, phase) => {
                tracing::debug!(?kind, ?phase, "timer does not apply to current phase");
                Vec::new()
            },
        }
    }

    fn media_url(&self) -> Option<&str> {
        self.config.media_url.as_deref().map(str::trim).filter(|url| !url.is_empty())
    }
}

/// Seconds with up to three decimals and no trailing zeros: `1`, `0.5`.
fn format_secs(delay: Duration) -> String {
    let millis = delay.as_millis();
    if millis % 1000 == 0 {
        (millis / 1000).to_string()
    } else {
        let text = format!("{:.3}", delay.as_secs_f64());
        text.trim_end_matches('0').to_string()
    }
}
