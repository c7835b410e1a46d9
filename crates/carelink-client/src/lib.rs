//! Carelink client runtime.
//!
//! Runs [`carelink_core`]'s state machines against real collaborators: an
//! HTTP token endpoint, an identity backend, a toast sink and the tokio
//! clock.
//!
//! # Architecture
//!
//! [`Session::spawn`] starts a single driver task. The driver feeds caller
//! commands, collaborator results and timer firings into the core
//! [`ConnectionManager`](carelink_core::ConnectionManager) and
//! [`StatusMonitor`](carelink_core::StatusMonitor), executes the actions they
//! return, and publishes a [`SessionSnapshot`] for the UI and media transport.
//!
//! # Components
//!
//! - [`Session`]: cloneable handle to the driver
//! - [`Scheduler`]: keyed timers and background tasks, aborted together on
//!   shutdown
//! - [`TokenService`] / [`HttpTokenService`]: media credential endpoint
//! - [`IdentityProvider`] / [`GoTrueIdentity`] / [`StaticIdentity`]: identity
//!   session backend
//! - [`ToastSink`] / [`ChannelToasts`] / [`LogToasts`]: notification output
//! - [`SystemEnv`]: production environment (tokio clock, system wall clock)

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod error;
mod identity;
pub mod scheduler;
mod session;
mod system_env;
mod toast;
mod token;

pub use error::{IdentityError, SessionError};
pub use identity::{GoTrueIdentity, IdentityProvider, StaticIdentity};
pub use scheduler::Scheduler;
pub use session::{Collaborators, Session, SessionSnapshot};
pub use system_env::SystemEnv;
pub use toast::{ChannelToasts, LogToasts, ToastSink};
pub use token::{HttpTokenService, TokenService};
