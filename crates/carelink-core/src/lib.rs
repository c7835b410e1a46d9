//! Carelink core
//!
//! Pure state machines for joining and leaving a real-time media session:
//! credential acquisition with bounded retries, the connect/disconnect
//! lifecycle, and network/identity-session status tracking.
//!
//! # Architecture
//!
//! Everything here is Sans-IO. State machines receive events, mutate their
//! state and return actions for a driver to execute (fetch a credential,
//! schedule a timer, show a toast). Time and sleeping are reached only through
//! the [`env::Environment`] trait, so the same logic runs against the system
//! clock in production and a virtual clock in tests.
//!
//! # Components
//!
//! - [`ConnectionManager`]: connection lifecycle state machine
//! - [`BackoffPolicy`] / [`next_delay`]: retry delay schedule
//! - [`credential`]: unverified inspection of signed media credentials
//! - [`StatusMonitor`]: network reachability and identity-session validity
//! - [`Toast`]: user-visible notifications produced by the state machines

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod backoff;
pub mod config;
pub mod connection;
pub mod credential;
pub mod env;
pub mod error;
pub mod state;
pub mod status;
pub mod toast;

pub use backoff::{BackoffPolicy, RetryState, next_delay};
pub use config::{ManagerConfig, TokenRequest};
pub use connection::{ConnectionAction, ConnectionEvent, ConnectionManager, Timer, TimerKind};
pub use credential::CredentialClaims;
pub use error::{ConfigError, CredentialError, TokenError};
pub use state::{ConnectionDetails, ConnectionMode, ConnectionPhase};
pub use status::{
    MediaEvent, SessionInfo, SessionStatus, StatusAction, StatusEvent, StatusMonitor,
};
pub use toast::{Toast, ToastKind};
