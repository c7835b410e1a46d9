//! Session handle and driver task.
//!
//! [`Session::spawn`] starts one driver task that owns a
//! [`ConnectionManager`], a [`StatusMonitor`] and a [`Scheduler`]. The
//! returned handle is cheap to clone; every call on it is a message to the
//! driver, and the driver publishes a [`SessionSnapshot`] on a watch channel
//! after each step.
//!
//! The driver processes caller commands, collaborator completions and timer
//! firings one at a time in arrival order. Collaborator calls run as
//! scheduler tasks whose results come back as events, so the state machines
//! never block on I/O.
//!
//! Both the connection manager (after a 401) and the status monitor (for an
//! expiring session) may ask for an identity refresh. At most one
//! `refresh_session` call is in flight at a time; a second request joins it
//! and receives the same result. Backends that rotate refresh tokens reject
//! the second of two concurrent refreshes, which would otherwise sign the
//! user out.

use std::sync::Arc;

use carelink_core::{
    ConnectionAction, ConnectionDetails, ConnectionEvent, ConnectionManager, ConnectionMode,
    ConnectionPhase, ManagerConfig, MediaEvent, StatusAction, StatusEvent, StatusMonitor,
    TimerKind, env::Environment, status::SESSION_CHECK_INTERVAL,
};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    error::SessionError, identity::IdentityProvider, scheduler::Scheduler, toast::ToastSink,
    token::TokenService,
};

/// External services the driver calls out to.
#[derive(Clone)]
pub struct Collaborators {
    /// Media credential endpoint
    pub tokens: Arc<dyn TokenService>,
    /// Identity backend
    pub identity: Arc<dyn IdentityProvider>,
    /// Notification sink
    pub toasts: Arc<dyn ToastSink>,
}

/// Point-in-time view of the session for the UI and the media transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// What the media transport should do
    pub details: ConnectionDetails,
    /// Lifecycle phase
    pub phase: ConnectionPhase,
    /// Retries spent by the current acquisition
    pub retry_count: u32,
    /// Last known network reachability
    pub online: bool,
    /// Last known identity-session validity
    pub session_valid: bool,
    /// Advances each time a connect request starts an acquisition, including
    /// one that aborts straight back to idle
    pub generation: u64,
}

enum Command {
    Connect(ConnectionMode),
    Disconnect,
    SetOnline(bool),
    Media(MediaEvent),
    Shutdown(oneshot::Sender<()>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum TimerKey {
    Connection(TimerKind),
    SessionCheck,
}

#[derive(Debug)]
enum DriverEvent {
    Connection(ConnectionEvent),
    Status(StatusEvent),
    SessionCheckDue,
    RefreshCompleted(Result<(), String>),
    SignedOut,
}

/// Who is waiting on the in-flight identity refresh.
#[derive(Debug, Clone, Copy)]
enum RefreshWaiter {
    Connection { generation: u64 },
    Monitor,
}

enum Step {
    Command(Command),
    Event(DriverEvent),
    Closed,
}

/// Handle to a running session driver.
#[derive(Clone)]
pub struct Session {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<SessionSnapshot>,
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session").field("state", &*self.state.borrow()).finish_non_exhaustive()
    }
}

impl Session {
    /// Validate `config` and start the driver task.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<E: Environment>(
        config: ManagerConfig,
        collaborators: Collaborators,
        env: E,
    ) -> Result<Self, SessionError> {
        config.validate()?;

        let manager = ConnectionManager::new(config);
        let monitor = StatusMonitor::new();
        let initial = SessionSnapshot {
            details: manager.details().clone(),
            phase: manager.phase(),
            retry_count: manager.retry_count(),
            online: monitor.is_online(),
            session_valid: monitor.session_valid(),
            generation: manager.generation(),
        };

        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(initial);

        let driver = Driver {
            scheduler: Scheduler::new(env.clone()),
            env,
            manager,
            monitor,
            collaborators,
            refresh_waiters: Vec::new(),
            refresh_started: None,
            state: state_tx,
        };
        tokio::spawn(driver.run(commands_rx));

        Ok(Self { commands: commands_tx, state: state_rx })
    }

    /// Start joining the media session.
    pub fn connect(&self, mode: ConnectionMode) -> Result<(), SessionError> {
        self.send(Command::Connect(mode))
    }

    /// Start leaving the media session.
    pub fn disconnect(&self) -> Result<(), SessionError> {
        self.send(Command::Disconnect)
    }

    /// Report a network reachability change.
    pub fn set_online(&self, online: bool) -> Result<(), SessionError> {
        self.send(Command::SetOnline(online))
    }

    /// Forward a media transport notification.
    pub fn report_media(&self, event: MediaEvent) -> Result<(), SessionError> {
        self.send(Command::Media(event))
    }

    /// Latest published state.
    pub fn snapshot(&self) -> SessionSnapshot {
        self.state.borrow().clone()
    }

    /// Latest connection details.
    pub fn details(&self) -> ConnectionDetails {
        self.state.borrow().details.clone()
    }

    /// Retries spent by the current acquisition.
    pub fn retry_count(&self) -> u32 {
        self.state.borrow().retry_count
    }

    /// Receiver that observes every published state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionSnapshot> {
        self.state.clone()
    }

    /// Stop the driver and abort pending work. Later state changes are never
    /// published; returns once the driver has stopped. Idempotent.
    pub async fn shutdown(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.commands.send(Command::Shutdown(ack_tx)).is_err() {
            return;
        }
        // Err means the driver exited first, which is the same outcome.
        let _ = ack_rx.await;
    }

    fn send(&self, command: Command) -> Result<(), SessionError> {
        self.commands.send(command).map_err(|_| SessionError::Closed)
    }
}

struct Driver<E: Environment> {
    env: E,
    manager: ConnectionManager,
    monitor: StatusMonitor,
    collaborators: Collaborators,
    scheduler: Scheduler<E, TimerKey, DriverEvent>,
    /// Non-empty while a refresh is in flight
    refresh_waiters: Vec<RefreshWaiter>,
    refresh_started: Option<E::Instant>,
    state: watch::Sender<SessionSnapshot>,
}

impl<E: Environment> Driver<E> {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<Command>) {
        tracing::debug!("session driver started");
        self.scheduler.schedule(
            TimerKey::SessionCheck,
            std::time::Duration::ZERO,
            DriverEvent::SessionCheckDue,
        );

        loop {
            let step = tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => Step::Command(command),
                    None => Step::Closed,
                },
                Some(event) = self.scheduler.next(), if !self.scheduler.is_empty() => {
                    Step::Event(event)
                },
            };

            match step {
                Step::Command(Command::Shutdown(ack)) => {
                    self.stop();
                    let _ = ack.send(());
                    break;
                },
                Step::Command(command) => self.handle_command(command),
                Step::Event(event) => self.handle_event(event),
                Step::Closed => {
                    tracing::debug!("all session handles dropped");
                    self.stop();
                    break;
                },
            }

            self.publish();
        }

        tracing::debug!("session driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(mode) => self.dispatch(ConnectionEvent::Connect { mode }),
            Command::Disconnect => self.dispatch(ConnectionEvent::Disconnect),
            Command::SetOnline(online) => {
                self.dispatch(ConnectionEvent::NetworkChanged { online });
                let event = if online { StatusEvent::Online } else { StatusEvent::Offline };
                self.dispatch_status(event);
            },
            Command::Media(event) => self.dispatch_status(StatusEvent::Media(event)),
            Command::Shutdown(_) => {},
        }
    }

    fn handle_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Connection(event) => self.dispatch(event),
            DriverEvent::Status(event) => self.dispatch_status(event),
            DriverEvent::SessionCheckDue => self.check_session(),
            DriverEvent::RefreshCompleted(result) => self.finish_refresh(&result),
            DriverEvent::SignedOut => {},
        }
    }

    fn dispatch(&mut self, event: ConnectionEvent) {
        for action in self.manager.handle(event) {
            self.execute(action);
        }
    }

    fn dispatch_status(&mut self, event: StatusEvent) {
        for action in self.monitor.handle(event) {
            match action {
                StatusAction::Toast(toast) => self.collaborators.toasts.show(toast),
                StatusAction::RefreshSession => self.request_refresh(RefreshWaiter::Monitor),
            }
        }
    }

    fn execute(&mut self, action: ConnectionAction) {
        match action {
            ConnectionAction::FetchCredential { generation, request } => {
                let tokens = Arc::clone(&self.collaborators.tokens);
                let identity = Arc::clone(&self.collaborators.identity);
                self.scheduler.spawn(async move {
                    let bearer = match identity.get_session().await {
                        Ok(session) => session.map(|s| s.access_token),
                        Err(err) => {
                            tracing::warn!(error = %err, "session lookup failed, no bearer");
                            None
                        },
                    };
                    let result = tokens.fetch_token(&request, bearer.as_deref()).await;
                    let event = ConnectionEvent::CredentialFetched { generation, result };
                    DriverEvent::Connection(event)
                });
            },
            ConnectionAction::RefreshSession { generation } => {
                self.request_refresh(RefreshWaiter::Connection { generation });
            },
            ConnectionAction::SignOut => {
                let identity = Arc::clone(&self.collaborators.identity);
                self.scheduler.spawn(async move {
                    if let Err(err) = identity.sign_out().await {
                        tracing::warn!(error = %err, "sign out failed");
                    }
                    DriverEvent::SignedOut
                });
            },
            ConnectionAction::Schedule { timer, delay } => {
                self.scheduler.schedule(
                    TimerKey::Connection(timer.kind),
                    delay,
                    DriverEvent::Connection(ConnectionEvent::TimerFired(timer)),
                );
            },
            ConnectionAction::Toast(toast) => self.collaborators.toasts.show(toast),
        }
    }

    fn request_refresh(&mut self, waiter: RefreshWaiter) {
        let joining = !self.refresh_waiters.is_empty();
        self.refresh_waiters.push(waiter);
        if joining {
            tracing::debug!(?waiter, "joining in-flight session refresh");
            return;
        }

        self.refresh_started = Some(self.env.now());
        let identity = Arc::clone(&self.collaborators.identity);
        self.scheduler.spawn(async move {
            let result = identity.refresh_session().await;
            DriverEvent::RefreshCompleted(result.map(|_| ()).map_err(|e| e.to_string()))
        });
    }

    fn finish_refresh(&mut self, result: &Result<(), String>) {
        if let Some(started) = self.refresh_started.take() {
            let elapsed = self.env.now() - started;
            tracing::debug!(?elapsed, ok = result.is_ok(), "session refresh finished");
        }

        for waiter in std::mem::take(&mut self.refresh_waiters) {
            let result = result.clone();
            match waiter {
                RefreshWaiter::Connection { generation } => {
                    self.dispatch(ConnectionEvent::SessionRefreshed { generation, result });
                },
                RefreshWaiter::Monitor => {
                    self.dispatch_status(StatusEvent::RefreshCompleted { result });
                },
            }
        }
    }

    fn check_session(&mut self) {
        let identity = Arc::clone(&self.collaborators.identity);
        let env = self.env.clone();
        self.scheduler.spawn(async move {
            let result = identity.get_session().await.map_err(|e| e.to_string());
            DriverEvent::Status(StatusEvent::SessionChecked {
                result,
                now_secs: env.wall_clock_secs(),
            })
        });
        self.scheduler.schedule(
            TimerKey::SessionCheck,
            SESSION_CHECK_INTERVAL,
            DriverEvent::SessionCheckDue,
        );
    }

    fn stop(&mut self) {
        tracing::debug!(pending = self.scheduler.len(), "cancelling pending work");
        self.manager.handle(ConnectionEvent::Shutdown);
        self.scheduler.cancel_all();
        self.refresh_waiters.clear();
    }

    fn publish(&self) {
        let next = SessionSnapshot {
            details: self.manager.details().clone(),
            phase: self.manager.phase(),
            retry_count: self.manager.retry_count(),
            online: self.monitor.is_online(),
            session_valid: self.monitor.session_valid(),
            generation: self.manager.generation(),
        };
        self.state.send_if_modified(|current| {
            if *current == next {
                return false;
            }
            *current = next;
            true
        });
    }
}
