//! End-to-end session tests on a paused tokio clock.
//!
//! Collaborators are in-memory fakes that count calls, so every test can
//! assert exactly how many credential requests, refreshes and sign-outs the
//! driver issued and how much virtual time passed.

#![allow(clippy::unwrap_used)]

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use carelink_client::{
    ChannelToasts, Collaborators, IdentityError, IdentityProvider, Session, SessionError,
    SessionSnapshot, SystemEnv, TokenService,
};
use carelink_core::{
    ConnectionMode, ConnectionPhase, ManagerConfig, MediaEvent, SessionInfo, Toast, ToastKind,
    TokenError, TokenRequest,
    connection::{OFFLINE_MESSAGE, RETRIES_EXHAUSTED_MESSAGE, SESSION_EXPIRED_MESSAGE},
};
use tokio::{sync::mpsc, time::Instant};

const MEDIA_URL: &str = "wss://media.test";

fn valid_token() -> String {
    let payload = URL_SAFE_NO_PAD.encode(br#"{"identity":"Test User","video":{"room":"r1"}}"#);
    format!("e30.{payload}.sig")
}

struct ScriptedTokens {
    calls: AtomicUsize,
    bearers: Mutex<Vec<Option<String>>>,
    script: Mutex<VecDeque<Result<String, TokenError>>>,
    fallback: Result<String, TokenError>,
    latency: Duration,
}

impl ScriptedTokens {
    fn new(fallback: Result<String, TokenError>) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            bearers: Mutex::new(Vec::new()),
            script: Mutex::new(VecDeque::new()),
            fallback,
            latency: Duration::ZERO,
        }
    }

    fn ok() -> Self {
        Self::new(Ok(valid_token()))
    }

    fn first_returning(self, first: Result<String, TokenError>) -> Self {
        self.script.lock().unwrap().push_back(first);
        self
    }

    fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TokenService for ScriptedTokens {
    async fn fetch_token(
        &self,
        _request: &TokenRequest,
        bearer: Option<&str>,
    ) -> Result<String, TokenError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.bearers.lock().unwrap().push(bearer.map(str::to_string));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}

struct FakeIdentity {
    refresh_ok: bool,
    expires_at: Option<u64>,
    refresh_latency: Duration,
    refreshes: AtomicUsize,
    sign_outs: AtomicUsize,
}

impl FakeIdentity {
    fn new(refresh_ok: bool) -> Self {
        Self {
            refresh_ok,
            expires_at: None,
            refresh_latency: Duration::ZERO,
            refreshes: AtomicUsize::new(0),
            sign_outs: AtomicUsize::new(0),
        }
    }

    /// Session whose expiry is long past, so every check asks for a refresh.
    fn expired(mut self) -> Self {
        self.expires_at = Some(1);
        self
    }

    fn with_refresh_latency(mut self, latency: Duration) -> Self {
        self.refresh_latency = latency;
        self
    }

    fn session(&self) -> SessionInfo {
        SessionInfo {
            access_token: "access".into(),
            refresh_token: Some("refresh".into()),
            expires_at: self.expires_at,
        }
    }

    fn refreshes(&self) -> usize {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for FakeIdentity {
    async fn get_session(&self) -> Result<Option<SessionInfo>, IdentityError> {
        Ok(Some(self.session()))
    }

    async fn refresh_session(&self) -> Result<SessionInfo, IdentityError> {
        self.refreshes.fetch_add(1, Ordering::SeqCst);
        if !self.refresh_latency.is_zero() {
            tokio::time::sleep(self.refresh_latency).await;
        }
        if self.refresh_ok {
            Ok(self.session())
        } else {
            Err(IdentityError::Backend { status: 400, message: "invalid_grant".into() })
        }
    }

    async fn sign_out(&self) -> Result<(), IdentityError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct Harness {
    session: Session,
    tokens: Arc<ScriptedTokens>,
    identity: Arc<FakeIdentity>,
    toasts: mpsc::UnboundedReceiver<Toast>,
}

impl Harness {
    fn start(config: ManagerConfig, tokens: ScriptedTokens, identity: FakeIdentity) -> Self {
        let tokens = Arc::new(tokens);
        let identity = Arc::new(identity);
        let (sink, toasts) = ChannelToasts::channel();
        let collaborators = Collaborators {
            tokens: tokens.clone(),
            identity: identity.clone(),
            toasts: Arc::new(sink),
        };
        let session = Session::spawn(config, collaborators, SystemEnv::new()).unwrap();
        Self { session, tokens, identity, toasts }
    }

    fn new(tokens: ScriptedTokens) -> Self {
        Self::start(ManagerConfig::with_media_url(MEDIA_URL), tokens, FakeIdentity::new(true))
    }

    async fn wait_for(&self, predicate: impl FnMut(&SessionSnapshot) -> bool) -> SessionSnapshot {
        let mut rx = self.session.subscribe();
        let snapshot = rx.wait_for(predicate).await.unwrap().clone();
        snapshot
    }

    async fn next_error_toast(&mut self) -> (Vec<Toast>, Toast) {
        let mut before = Vec::new();
        loop {
            let toast = self.toasts.recv().await.unwrap();
            if toast.is_error() {
                return (before, toast);
            }
            before.push(toast);
        }
    }
}

#[tokio::test(start_paused = true)]
async fn connect_publishes_details() {
    let harness = Harness::new(ScriptedTokens::ok());
    harness.session.connect(ConnectionMode::Manual).unwrap();

    let snapshot = harness.wait_for(|s| s.details.should_connect).await;

    assert_eq!(snapshot.phase, ConnectionPhase::Connected);
    assert_eq!(snapshot.retry_count, 0);
    assert_eq!(snapshot.details.media_url, MEDIA_URL);
    assert_eq!(snapshot.details.credential, valid_token());
    assert_eq!(snapshot.details.mode, ConnectionMode::Manual);
    assert_eq!(harness.tokens.calls(), 1);
    assert_eq!(harness.tokens.bearers.lock().unwrap()[0].as_deref(), Some("access"));
}

#[tokio::test(start_paused = true)]
async fn overlapping_connects_issue_one_request() {
    let harness = Harness::new(ScriptedTokens::ok().with_latency(Duration::from_secs(2)));
    harness.session.connect(ConnectionMode::Cloud).unwrap();
    harness.session.connect(ConnectionMode::Cloud).unwrap();
    harness.session.connect(ConnectionMode::Env).unwrap();

    let snapshot = harness.wait_for(|s| s.details.should_connect).await;

    assert_eq!(snapshot.details.mode, ConnectionMode::Cloud);
    assert_eq!(harness.tokens.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn connect_while_connected_is_a_no_op() {
    let harness = Harness::new(ScriptedTokens::ok());
    harness.session.connect(ConnectionMode::Manual).unwrap();
    harness.wait_for(|s| s.details.should_connect).await;

    harness.session.connect(ConnectionMode::Manual).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(harness.tokens.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn server_errors_exhaust_retries_with_backoff() {
    let failure = Err(TokenError::Status { status: 500, message: "boom".into() });
    let mut harness = Harness::new(ScriptedTokens::new(failure));
    let start = Instant::now();
    harness.session.connect(ConnectionMode::Manual).unwrap();

    let (infos, error) = harness.next_error_toast().await;
    let elapsed = start.elapsed();

    let messages: Vec<_> = infos.iter().map(|t| t.message.as_str()).collect();
    assert_eq!(messages, vec![
        "Connection failed. Retrying in 1 seconds...",
        "Connection failed. Retrying in 2 seconds...",
        "Connection failed. Retrying in 4 seconds...",
        "Connection failed. Retrying in 8 seconds...",
        "Connection failed. Retrying in 16 seconds...",
    ]);
    assert!(infos.iter().all(|t| t.kind == ToastKind::Info));
    assert_eq!(error.message, RETRIES_EXHAUSTED_MESSAGE);
    assert_eq!(harness.tokens.calls(), 6);
    assert!(elapsed >= Duration::from_secs(31), "elapsed {elapsed:?}");
    assert!(elapsed < Duration::from_secs(32), "elapsed {elapsed:?}");

    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(harness.tokens.calls(), 6);
    assert!(!harness.session.details().should_connect);
}

#[tokio::test(start_paused = true)]
async fn retry_budget_resets_on_fresh_connect() {
    let failure = Err(TokenError::Transport("connection refused".into()));
    let mut harness = Harness::new(ScriptedTokens::new(failure));
    harness.session.connect(ConnectionMode::Manual).unwrap();
    harness.next_error_toast().await;

    harness.session.connect(ConnectionMode::Manual).unwrap();
    let (infos, _) = harness.next_error_toast().await;

    assert_eq!(infos.len(), 5);
    assert_eq!(harness.tokens.calls(), 12);
}

#[tokio::test(start_paused = true)]
async fn unauthorized_refreshes_once_then_connects() {
    let tokens = ScriptedTokens::ok().first_returning(Err(TokenError::Unauthorized));
    let harness = Harness::new(tokens);
    harness.session.connect(ConnectionMode::Manual).unwrap();

    harness.wait_for(|s| s.details.should_connect).await;

    assert_eq!(harness.identity.refreshes(), 1);
    assert_eq!(harness.tokens.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn repeated_unauthorized_refreshes_only_once() {
    let mut harness = Harness::new(ScriptedTokens::new(Err(TokenError::Unauthorized)));
    harness.session.connect(ConnectionMode::Manual).unwrap();

    let (_, error) = harness.next_error_toast().await;

    assert_eq!(error.message, RETRIES_EXHAUSTED_MESSAGE);
    assert_eq!(harness.identity.refreshes(), 1);
    assert_eq!(harness.identity.sign_outs.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn failed_refresh_signs_out() {
    let tokens = ScriptedTokens::new(Err(TokenError::Unauthorized));
    let mut harness =
        Harness::start(ManagerConfig::with_media_url(MEDIA_URL), tokens, FakeIdentity::new(false));
    harness.session.connect(ConnectionMode::Manual).unwrap();

    let (_, error) = harness.next_error_toast().await;
    assert_eq!(error.message, SESSION_EXPIRED_MESSAGE);

    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(harness.identity.sign_outs.load(Ordering::SeqCst), 1);
    assert_eq!(harness.tokens.calls(), 1);
    assert_eq!(harness.session.snapshot().phase, ConnectionPhase::Idle);
}

#[tokio::test(start_paused = true)]
async fn disconnect_clears_details_after_settle_delay() {
    let harness = Harness::new(ScriptedTokens::ok());
    harness.session.connect(ConnectionMode::Manual).unwrap();
    harness.wait_for(|s| s.details.should_connect).await;

    let start = Instant::now();
    harness.session.disconnect().unwrap();

    let tearing_down = harness.wait_for(|s| s.details.is_disconnecting).await;
    assert!(!tearing_down.details.should_connect);
    assert!(start.elapsed() < Duration::from_millis(500));

    let settled = harness.wait_for(|s| !s.details.is_disconnecting).await;
    assert!(start.elapsed() >= Duration::from_millis(500));
    assert_eq!(settled.phase, ConnectionPhase::Idle);
    assert!(settled.details.credential.is_empty());
    assert_eq!(settled.retry_count, 0);
}

#[tokio::test(start_paused = true)]
async fn disconnect_cancels_pending_acquisition() {
    let harness = Harness::new(ScriptedTokens::ok().with_latency(Duration::from_secs(3)));
    harness.session.connect(ConnectionMode::Manual).unwrap();
    harness.wait_for(|s| s.phase == ConnectionPhase::Acquiring).await;

    harness.session.disconnect().unwrap();
    harness.wait_for(|s| s.phase == ConnectionPhase::Idle).await;
    tokio::time::sleep(Duration::from_secs(5)).await;

    let snapshot = harness.session.snapshot();
    assert!(!snapshot.details.should_connect);
    assert!(snapshot.details.credential.is_empty());
}

#[tokio::test(start_paused = true)]
async fn shutdown_freezes_published_state() {
    let harness = Harness::new(ScriptedTokens::ok());
    harness.session.connect(ConnectionMode::Manual).unwrap();
    harness.wait_for(|s| s.details.should_connect).await;
    harness.session.disconnect().unwrap();
    harness.wait_for(|s| s.details.is_disconnecting).await;

    harness.session.shutdown().await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    assert!(harness.session.snapshot().details.is_disconnecting);
    assert!(matches!(harness.session.connect(ConnectionMode::Manual), Err(SessionError::Closed)));
    harness.session.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn offline_connect_is_refused() {
    let mut harness = Harness::new(ScriptedTokens::ok());
    harness.session.set_online(false).unwrap();
    harness.session.connect(ConnectionMode::Manual).unwrap();

    let (_, lost) = harness.next_error_toast().await;
    assert_eq!(lost.message, "Network connection lost");
    let (_, refused) = harness.next_error_toast().await;
    assert_eq!(refused.message, OFFLINE_MESSAGE);
    assert_eq!(harness.tokens.calls(), 0);

    harness.session.set_online(true).unwrap();
    let back = harness.toasts.recv().await.unwrap();
    assert_eq!(back, Toast::success("Back online"));
    assert!(harness.session.snapshot().online);
}

#[tokio::test(start_paused = true)]
async fn missing_media_url_is_reported() {
    let mut harness =
        Harness::start(ManagerConfig::default(), ScriptedTokens::ok(), FakeIdentity::new(true));
    harness.session.connect(ConnectionMode::Env).unwrap();

    let (_, error) = harness.next_error_toast().await;

    assert!(error.message.starts_with("Missing media server URL"));
    assert_eq!(harness.tokens.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn aborted_connect_is_visible_to_subscribers() {
    let harness =
        Harness::start(ManagerConfig::default(), ScriptedTokens::ok(), FakeIdentity::new(true));
    let mut updates = harness.session.subscribe();
    let before = updates.borrow_and_update().generation;

    harness.session.connect(ConnectionMode::Manual).unwrap();
    tokio::time::timeout(Duration::from_secs(1), updates.changed()).await.unwrap().unwrap();

    let snapshot = updates.borrow().clone();
    assert!(snapshot.generation > before);
    assert_eq!(snapshot.phase, ConnectionPhase::Idle);
    assert!(!snapshot.details.should_connect);
}

#[tokio::test(start_paused = true)]
async fn expired_session_is_checked_every_thirty_seconds() {
    let identity = FakeIdentity::new(false).expired();
    let harness =
        Harness::start(ManagerConfig::with_media_url(MEDIA_URL), ScriptedTokens::ok(), identity);

    harness.wait_for(|s| !s.session_valid).await;
    assert_eq!(harness.identity.refreshes(), 1);

    // Checks at 0, 30, 60 and 90 seconds.
    tokio::time::sleep(Duration::from_secs(95)).await;

    assert_eq!(harness.identity.refreshes(), 4);
    assert!(!harness.session.snapshot().session_valid);
    assert_eq!(harness.tokens.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn refreshed_session_is_reported_valid() {
    let identity = FakeIdentity::new(true).expired();
    let harness =
        Harness::start(ManagerConfig::with_media_url(MEDIA_URL), ScriptedTokens::ok(), identity);

    tokio::time::sleep(Duration::from_secs(1)).await;

    assert_eq!(harness.identity.refreshes(), 1);
    assert!(harness.session.snapshot().session_valid);
}

#[tokio::test(start_paused = true)]
async fn media_error_is_toasted() {
    let mut harness = Harness::new(ScriptedTokens::ok());
    harness
        .session
        .report_media(MediaEvent::Connected { room: Some("r1".into()) })
        .unwrap();
    harness.session.report_media(MediaEvent::Error { message: "ice failed".into() }).unwrap();

    let (before, error) = harness.next_error_toast().await;

    assert!(before.is_empty());
    assert_eq!(error.message, "Media connection error: ice failed");
}

#[tokio::test(start_paused = true)]
async fn concurrent_refresh_requests_share_one_call() {
    let identity = FakeIdentity::new(true).expired().with_refresh_latency(Duration::from_secs(2));
    let tokens = ScriptedTokens::ok().first_returning(Err(TokenError::Unauthorized));
    let harness = Harness::start(ManagerConfig::with_media_url(MEDIA_URL), tokens, identity);
    harness.session.connect(ConnectionMode::Manual).unwrap();

    let snapshot = harness.wait_for(|s| s.details.should_connect).await;

    assert_eq!(snapshot.phase, ConnectionPhase::Connected);
    assert_eq!(harness.identity.refreshes(), 1);
    assert_eq!(harness.identity.sign_outs.load(Ordering::SeqCst), 0);
    assert_eq!(harness.tokens.calls(), 2);
    assert!(snapshot.session_valid);
}

#[tokio::test]
async fn invalid_config_is_rejected_at_spawn() {
    let (sink, _rx) = ChannelToasts::channel();
    let collaborators = Collaborators {
        tokens: Arc::new(ScriptedTokens::ok()),
        identity: Arc::new(FakeIdentity::new(true)),
        toasts: Arc::new(sink),
    };

    let result =
        Session::spawn(ManagerConfig::with_media_url("  "), collaborators, SystemEnv::new());

    assert!(matches!(result, Err(SessionError::Config(_))));
}
