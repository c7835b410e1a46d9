//! Timer and task queue for the session driver.
//!
//! Everything the driver waits on (collaborator calls and timers) lives in
//! one [`JoinSet`], so the driver has a single stream of completions to
//! select on and a single place to abort on shutdown. Timers are keyed:
//! scheduling a key that is already pending aborts the earlier timer.

use std::{collections::HashMap, future::Future, hash::Hash, time::Duration};

use carelink_core::env::Environment;
use tokio::task::{AbortHandle, JoinSet};

/// Keyed timers and background tasks producing `T`.
pub struct Scheduler<E: Environment, K, T> {
    env: E,
    tasks: JoinSet<T>,
    timers: HashMap<K, AbortHandle>,
}

impl<E, K, T> Scheduler<E, K, T>
where
    E: Environment,
    K: Eq + Hash,
    T: Send + 'static,
{
    /// Empty scheduler sleeping on `env`'s clock.
    pub fn new(env: E) -> Self {
        Self { env, tasks: JoinSet::new(), timers: HashMap::new() }
    }

    /// Yield `event` after `delay`, replacing any pending timer under `key`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn schedule(&mut self, key: K, delay: Duration, event: T) {
        if let Some(previous) = self.timers.remove(&key) {
            previous.abort();
        }

        let env = self.env.clone();
        let handle = self.tasks.spawn(async move {
            env.sleep(delay).await;
            event
        });
        self.timers.insert(key, handle);
    }

    /// Run `task` and yield its output.
    pub fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = T> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Next completed timer or task. Returns `None` once nothing is pending.
    ///
    /// Cancel safe: a completion is only removed from the set when it is
    /// returned.
    pub async fn next(&mut self) -> Option<T> {
        loop {
            match self.tasks.join_next().await? {
                Ok(event) => return Some(event),
                Err(err) if err.is_cancelled() => {},
                Err(err) => tracing::error!(error = %err, "scheduled task panicked"),
            }
        }
    }

    /// Abort every pending timer and task.
    pub fn cancel_all(&mut self) {
        self.timers.clear();
        self.tasks.abort_all();
    }

    /// True when no timer or task is pending.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of pending timers and tasks, including aborted ones not yet
    /// reaped.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }
}
