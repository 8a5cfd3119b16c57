//! Polling a batch job until it reaches a terminal state.
//!
//! The monitor never changes job state itself. It polls at a fixed interval with no overall
//! timeout, retries transient failures after the same interval, and turns the terminal state
//! into either the finished job or a `JobFailed`/`JobCancelled` error.
//!
//! Waiting between polls goes through the [`Sleeper`] trait so tests can drive many poll cycles
//! without real delay.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use metrics::counter;
use tokio_util::sync::CancellationToken;

use crate::config::MonitorConfig;
use crate::domain::job::{BatchJob, JobState};
use crate::error::{Result, TranslateBatchError};
use crate::remote::BatchService;

/// Source of delay between polls.
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Sleeps on the tokio timer.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Polls jobs on a [`BatchService`] until they finish.
///
/// One monitor can watch any number of jobs concurrently; it holds no per-job state.
pub struct JobMonitor<S, C = TokioSleeper> {
    service: Arc<S>,
    sleeper: C,
    config: MonitorConfig,
}

impl<S: BatchService> JobMonitor<S> {
    pub fn new(service: Arc<S>, config: MonitorConfig) -> Self {
        Self::with_sleeper(service, config, TokioSleeper)
    }
}

impl<S: BatchService, C: Sleeper> JobMonitor<S, C> {
    pub fn with_sleeper(service: Arc<S>, config: MonitorConfig, sleeper: C) -> Self {
        Self {
            service,
            sleeper,
            config,
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.poll_interval_ms)
    }

    /// Fetch the job's current state once.
    pub async fn poll_once(&self, name: &str) -> Result<BatchJob> {
        self.service.get_batch(name).await
    }

    /// Poll until the job is terminal.
    ///
    /// Returns the job on `Succeeded`, `JobFailed` or `JobCancelled` for the other terminal
    /// states. Non-transient service errors (e.g. the job no longer exists) are returned as-is.
    pub async fn wait_until_terminal(&self, name: &str) -> Result<BatchJob> {
        self.run(name, None).await
    }

    /// Like [`wait_until_terminal`](Self::wait_until_terminal), but returns
    /// [`TranslateBatchError::Shutdown`] once `token` is cancelled.
    pub async fn wait_until_terminal_with_cancel(
        &self,
        name: &str,
        token: &CancellationToken,
    ) -> Result<BatchJob> {
        self.run(name, Some(token)).await
    }

    #[tracing::instrument(skip(self, name, token), fields(job = %name))]
    async fn run(&self, name: &str, token: Option<&CancellationToken>) -> Result<BatchJob> {
        let interval = self.poll_interval();
        let mut last_state: Option<JobState> = None;
        let mut polls: u64 = 0;

        loop {
            if token.is_some_and(CancellationToken::is_cancelled) {
                tracing::info!(polls, "Poll loop cancelled");
                return Err(TranslateBatchError::Shutdown);
            }

            polls += 1;
            match self.service.get_batch(name).await {
                Ok(job) => {
                    if last_state != Some(job.state) {
                        tracing::info!(state = %job.state, polls, "Job state changed");
                        last_state = Some(job.state);
                    }
                    if job.is_terminal() {
                        return finish(job);
                    }
                }
                Err(e) if e.is_transient() => {
                    counter!("translate_batch_poll_errors_total").increment(1);
                    tracing::warn!(
                        error = %e,
                        retry_in_ms = self.config.poll_interval_ms,
                        "Transient error while polling job, will retry"
                    );
                }
                Err(e) => {
                    tracing::error!(error = %e, kind = e.kind(), "Polling job failed");
                    return Err(e);
                }
            }

            match token {
                Some(token) => {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => {
                            tracing::info!(polls, "Poll loop cancelled");
                            return Err(TranslateBatchError::Shutdown);
                        }
                        _ = self.sleeper.sleep(interval) => {}
                    }
                }
                None => self.sleeper.sleep(interval).await,
            }
        }
    }
}

fn finish(job: BatchJob) -> Result<BatchJob> {
    counter!("translate_batch_jobs_finished_total", "state" => job.state.as_str()).increment(1);
    match job.state {
        JobState::Failed => {
            let message = job.error_message();
            tracing::error!(error = %message, "Job failed");
            Err(TranslateBatchError::JobFailed {
                name: job.name,
                message,
            })
        }
        JobState::Cancelled => {
            let message = job.error_message();
            tracing::warn!(error = %message, "Job was cancelled");
            Err(TranslateBatchError::JobCancelled {
                name: job.name,
                message,
            })
        }
        _ => {
            tracing::info!("Job succeeded");
            Ok(job)
        }
    }
}
