//! Carelink session runner.
//!
//! Acquires a media credential the way the app does and keeps the session
//! alive until interrupted, logging every state change.
//!
//! # Usage
//!
//! ```bash
//! # Fixed bearer token, stay connected until Ctrl-C
//! carelink --media-url wss://media.example.com \
//!     --token-url https://app.example.com --access-token "$TOKEN"
//!
//! # Refreshable session against a GoTrue auth server, print the credential
//! # and exit
//! CARELINK_AUTH_URL=https://project.supabase.co/auth/v1 \
//! CARELINK_AUTH_API_KEY=anon-key \
//!     carelink --access-token "$TOKEN" --refresh-token "$REFRESH" --once
//! ```

use std::{sync::Arc, time::Duration};

use carelink_client::{
    Collaborators, GoTrueIdentity, HttpTokenService, IdentityProvider, LogToasts, Session,
    SessionSnapshot, StaticIdentity, SystemEnv,
};
use carelink_core::{ConnectionMode, ConnectionPhase, ManagerConfig, SessionInfo, TokenRequest};
use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// How long to wait for teardown to settle before shutting down anyway.
const SETTLE_TIMEOUT: Duration = Duration::from_secs(5);

/// Carelink media session runner
#[derive(Parser, Debug)]
#[command(name = "carelink")]
#[command(about = "Join a carelink media session from the command line")]
#[command(version)]
struct Args {
    /// Media server URL (ws, wss, http or https)
    #[arg(long, env = "CARELINK_MEDIA_URL")]
    media_url: Option<String>,

    /// Base URL of the app serving /api/token
    #[arg(long, env = "CARELINK_TOKEN_URL", default_value = "http://localhost:3000")]
    token_url: String,

    /// Identity session access token, sent as the bearer token
    #[arg(long, env = "CARELINK_ACCESS_TOKEN")]
    access_token: Option<String>,

    /// Identity session refresh token (requires --auth-url)
    #[arg(long, env = "CARELINK_REFRESH_TOKEN")]
    refresh_token: Option<String>,

    /// Access token expiry, seconds since the Unix epoch
    #[arg(long, env = "CARELINK_EXPIRES_AT")]
    expires_at: Option<u64>,

    /// GoTrue-compatible auth server for session refresh
    #[arg(long, env = "CARELINK_AUTH_URL", requires = "auth_api_key")]
    auth_url: Option<String>,

    /// API key for the auth server
    #[arg(long, env = "CARELINK_AUTH_API_KEY")]
    auth_api_key: Option<String>,

    /// Participant email sent to the token endpoint
    #[arg(long, env = "CARELINK_USER_EMAIL", default_value = "test@example.com")]
    user_email: String,

    /// Participant display name sent to the token endpoint
    #[arg(long, env = "CARELINK_FULL_NAME", default_value = "Test User")]
    full_name: String,

    /// Participant id sent to the token endpoint
    #[arg(long, env = "CARELINK_USER_ID", default_value = "test-user-123")]
    user_id: String,

    /// Credential source (cloud, manual, env)
    #[arg(long, env = "CARELINK_MODE", default_value = "manual")]
    mode: ConnectionMode,

    /// Print the credential and exit instead of staying connected
    #[arg(long)]
    once: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

impl Args {
    fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            media_url: self.media_url.clone(),
            token_request: TokenRequest {
                user_email: self.user_email.clone(),
                full_name: self.full_name.clone(),
                user_id: self.user_id.clone(),
            },
            ..ManagerConfig::default()
        }
    }

    fn identity(&self) -> Arc<dyn IdentityProvider> {
        let session = self.access_token.as_ref().map(|access_token| SessionInfo {
            access_token: access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            expires_at: self.expires_at,
        });

        match (&self.auth_url, &self.auth_api_key) {
            (Some(url), Some(key)) => Arc::new(GoTrueIdentity::new(url, key.clone(), session)),
            _ => match session {
                Some(session) => Arc::new(StaticIdentity::new(session.access_token)),
                None => {
                    tracing::warn!("no access token; credential requests are unauthenticated");
                    Arc::new(StaticIdentity::anonymous())
                },
            },
        }
    }
}

fn log_snapshot(snapshot: &SessionSnapshot) {
    tracing::info!(
        phase = ?snapshot.phase,
        should_connect = snapshot.details.should_connect,
        disconnecting = snapshot.details.is_disconnecting,
        retry_count = snapshot.retry_count,
        generation = snapshot.generation,
        online = snapshot.online,
        session_valid = snapshot.session_valid,
        "session state"
    );
}

/// Where a `--once` run stands after a published snapshot.
#[derive(Debug, PartialEq, Eq)]
enum OnceOutcome {
    Pending,
    Connected(String),
    Failed,
}

/// `started_at` is the snapshot generation observed before connecting. Any
/// later generation that is no longer acquiring and not connected means the
/// attempt ended without a credential, even if the intermediate phases were
/// never observed.
fn once_outcome(snapshot: &SessionSnapshot, started_at: u64) -> OnceOutcome {
    if snapshot.details.should_connect {
        return OnceOutcome::Connected(snapshot.details.credential.clone());
    }
    if snapshot.generation > started_at && !snapshot.phase.is_acquiring() {
        return OnceOutcome::Failed;
    }
    OnceOutcome::Pending
}

#[allow(clippy::print_stdout)]
fn print_credential(credential: &str) {
    println!("{credential}");
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    tracing::info!("Carelink session runner starting");
    tracing::info!("Token endpoint: {}", args.token_url);

    let collaborators = Collaborators {
        tokens: Arc::new(HttpTokenService::new(&args.token_url)),
        identity: args.identity(),
        toasts: Arc::new(LogToasts),
    };
    let session = Session::spawn(args.manager_config(), collaborators, SystemEnv::new())?;
    let mut updates = session.subscribe();
    let started_at = updates.borrow_and_update().generation;

    if args.media_url.is_none() {
        tracing::warn!("no media URL configured; connect attempts will be refused");
    }
    session.connect(args.mode)?;

    let mut outcome = Ok(());
    loop {
        tokio::select! {
            changed = updates.changed() => {
                if changed.is_err() {
                    break;
                }
                let snapshot = updates.borrow_and_update().clone();
                log_snapshot(&snapshot);

                if !args.once {
                    continue;
                }
                match once_outcome(&snapshot, started_at) {
                    OnceOutcome::Pending => {},
                    OnceOutcome::Connected(credential) => {
                        print_credential(&credential);
                        break;
                    },
                    OnceOutcome::Failed => {
                        outcome = Err("could not acquire a media credential".into());
                        break;
                    },
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("interrupted");
                break;
            },
        }
    }

    session.disconnect()?;
    let settled = tokio::time::timeout(
        SETTLE_TIMEOUT,
        updates.wait_for(|s| s.phase == ConnectionPhase::Idle && !s.details.is_disconnecting),
    )
    .await
    .is_ok();
    if !settled {
        tracing::warn!("teardown did not settle in time");
    }

    session.shutdown().await;
    tracing::info!("Carelink session runner stopped");

    outcome
}

#[cfg(test)]
mod tests {
    use carelink_core::ConnectionDetails;

    use super::*;

    fn snapshot(phase: ConnectionPhase, generation: u64) -> SessionSnapshot {
        SessionSnapshot { phase, generation, online: true, ..SessionSnapshot::default() }
    }

    #[test]
    fn aborted_connect_fails_once_mode() {
        // Missing URL: the phase never leaves Idle, only the generation moves.
        assert_eq!(once_outcome(&snapshot(ConnectionPhase::Idle, 1), 0), OnceOutcome::Failed);
    }

    #[test]
    fn idle_before_connect_is_pending() {
        assert_eq!(once_outcome(&snapshot(ConnectionPhase::Idle, 0), 0), OnceOutcome::Pending);
    }

    #[test]
    fn acquisition_in_progress_is_pending() {
        for phase in
            [ConnectionPhase::Acquiring, ConnectionPhase::Refreshing, ConnectionPhase::RetryWait]
        {
            assert_eq!(once_outcome(&snapshot(phase, 1), 0), OnceOutcome::Pending);
        }
    }

    #[test]
    fn credential_is_reported() {
        let connected = SessionSnapshot {
            details: ConnectionDetails {
                media_url: "wss://media.test".into(),
                credential: "a.b.c".into(),
                should_connect: true,
                ..ConnectionDetails::default()
            },
            ..snapshot(ConnectionPhase::Connected, 1)
        };

        assert_eq!(once_outcome(&connected, 0), OnceOutcome::Connected("a.b.c".into()));
    }
}
