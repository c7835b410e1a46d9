//! Production Environment implementation.
//!
//! `SystemEnv` drives the core state machines with the tokio clock and the
//! system wall clock.
//!
//! The monotonic clock is `tokio::time::Instant` rather than
//! `std::time::Instant` so that a paused tokio runtime (tests) pauses
//! `now()` together with `sleep()`.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use carelink_core::env::Environment;

/// Production environment using the tokio clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Create a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    fn wall_clock_secs(&self) -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).map_or(0, |elapsed| elapsed.as_secs())
    }
}
