//! Environment abstraction for deterministic testing.
//!
//! Decouples lifecycle logic from system resources (monotonic time, wall
//! clock, sleeping). Enables deterministic simulation with a paused tokio
//! clock and production use with real system resources.

use std::time::Duration;

/// Abstract environment providing time and async sleeping.
///
/// Implementations MUST guarantee:
///
/// - `now()` never goes backwards
/// - `sleep()` completes no earlier than the requested duration on the
///   environment's own clock
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production uses the runtime's monotonic clock; tests may substitute a
    /// virtual one.
    type Instant: Copy + Ord + Send + Sync + std::ops::Sub<Output = Duration>;

    /// Current time (monotonic).
    ///
    /// # Invariants
    ///
    /// - Subsequent calls must return times >= previous calls.
    fn now(&self) -> Self::Instant;

    /// Sleeps for the specified duration.
    ///
    /// This is the ONLY async method in the trait, and it should only be used
    /// by driver code (not lifecycle logic).
    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send;

    /// Seconds since the Unix epoch.
    ///
    /// Identity sessions carry absolute expiry timestamps, so session checks
    /// need wall-clock time in addition to the monotonic clock.
    fn wall_clock_secs(&self) -> u64;
}
