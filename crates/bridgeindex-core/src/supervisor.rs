//! Restart-with-backoff supervision for long-running producers and consumers.
//!
//! Every producer and consumer runs as its own tokio task under
//! [`supervise`]. A clean return is re-run after `normal_period`; an error is
//! logged and re-run after a delay that doubles per consecutive failure,
//! bounded by `[min_abnormal, max_abnormal]`. A returned error never stops
//! the others; a panic does, through [`TaskSet::join`].

use std::future::Future;
use std::time::Duration;

use futures::future::{join_all, select_all};
use serde::{Deserialize, Serialize};
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;

use crate::error::IndexerError;
use crate::retry::{millis, RetryConfig, RetryPolicy};

/// Delays used between runs of a supervised task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Pause after a run that returned `Ok`.
    #[serde(default = "default_normal_period", with = "millis")]
    pub normal_period: Duration,
    /// First pause after a failed run.
    #[serde(default = "default_min_abnormal", with = "millis")]
    pub min_abnormal: Duration,
    /// Upper bound on the pause after repeated failures.
    #[serde(default = "default_max_abnormal", with = "millis")]
    pub max_abnormal: Duration,
}

fn default_normal_period() -> Duration { Duration::from_secs(5) }
fn default_min_abnormal() -> Duration { Duration::from_secs(1) }
fn default_max_abnormal() -> Duration { Duration::from_secs(60) }

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            normal_period: default_normal_period(),
            min_abnormal: default_min_abnormal(),
            max_abnormal: default_max_abnormal(),
        }
    }
}

impl BackoffConfig {
    fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: u32::MAX,
            initial_backoff: self.min_abnormal,
            max_backoff: self.max_abnormal,
            multiplier: 2.0,
            jitter_fraction: 0.0,
        })
    }
}

/// Run `task` repeatedly until `shutdown` is cancelled.
///
/// An in-flight run is dropped on cancellation. Tasks only move their cursor
/// after publishing, so a dropped run is replayed on the next start.
pub async fn supervise<F, Fut>(
    name: &str,
    shutdown: CancellationToken,
    config: &BackoffConfig,
    mut task: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), IndexerError>>,
{
    let policy = config.policy();
    let mut failures = 0u32;
    tracing::info!(task = name, "Starting supervised task");

    loop {
        let result = tokio::select! {
            _ = shutdown.cancelled() => break,
            r = task() => r,
        };

        let delay = match result {
            Ok(()) => {
                failures = 0;
                config.normal_period
            }
            Err(e) => {
                failures = failures.saturating_add(1);
                let delay = policy.backoff(failures);
                tracing::error!(
                    task = name,
                    failures,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Supervised task failed"
                );
                delay
            }
        };

        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(delay) => {}
        }
    }

    tracing::info!(task = name, "Supervised task stopped");
}

/// Spawn [`supervise`] on the runtime.
pub fn spawn_supervised<F, Fut>(
    name: impl Into<String>,
    shutdown: CancellationToken,
    config: BackoffConfig,
    task: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), IndexerError>> + Send,
{
    let name = name.into();
    tokio::spawn(async move { supervise(&name, shutdown, &config, task).await })
}

/// The supervised tasks of one process.
#[derive(Default)]
pub struct TaskSet {
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// [`spawn_supervised`] and track the task under `name`.
    pub fn spawn<F, Fut>(&mut self, name: impl Into<String>, shutdown: CancellationToken, config: BackoffConfig, task: F)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), IndexerError>> + Send,
    {
        let name = name.into();
        let handle = spawn_supervised(name.clone(), shutdown, config, task);
        self.tasks.push((name, handle));
    }

    /// Wait for `shutdown`, then for every task to stop.
    ///
    /// A supervised task only ends on shutdown, so one ending earlier has
    /// panicked. That cancels `shutdown` for the rest and is returned as an
    /// error once they have stopped.
    pub async fn join(mut self, shutdown: &CancellationToken) -> Result<(), IndexerError> {
        let mut result = Ok(());
        if !self.tasks.is_empty() {
            let exited = tokio::select! {
                _ = shutdown.cancelled() => None,
                exited = first_exit(&mut self.tasks) => Some(exited),
            };
            if let Some((index, outcome)) = exited {
                let (name, _) = self.tasks.swap_remove(index);
                if let Some(reason) = abnormal_exit(outcome, shutdown) {
                    tracing::error!(task = %name, reason = %reason, "Supervised task died, stopping every task");
                    result = Err(IndexerError::Other(format!("task {name} {reason}")));
                }
                shutdown.cancel();
            }
        }

        let (names, handles): (Vec<_>, Vec<_>) = self.tasks.into_iter().unzip();
        for (name, outcome) in names.into_iter().zip(join_all(handles).await) {
            if let Some(reason) = abnormal_exit(outcome, shutdown) {
                tracing::error!(task = %name, reason = %reason, "Supervised task died during shutdown");
            }
        }
        result
    }
}

async fn first_exit(tasks: &mut [(String, JoinHandle<()>)]) -> (usize, Result<(), JoinError>) {
    let (outcome, index, _) = select_all(tasks.iter_mut().map(|(_, handle)| handle)).await;
    (index, outcome)
}

fn abnormal_exit(outcome: Result<(), JoinError>, shutdown: &CancellationToken) -> Option<String> {
    match outcome {
        Ok(()) if shutdown.is_cancelled() => None,
        Ok(()) => Some("exited before shutdown".to_string()),
        Err(e) if e.is_panic() => Some("panicked".to_string()),
        Err(e) => Some(format!("failed: {e}")),
    }
}
