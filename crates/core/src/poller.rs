//! Job poller.
//!
//! Polls daemon jobs at a fixed interval until they reach a terminal state.
//! A job's result is only read once its status is terminal.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{sleep, Instant};
use tracing::{debug, info};

use crate::config::PollingConfig;
use crate::core_client::{CoreApi, CoreError, JobId, JobResult, JobStatus};
use crate::metrics;

#[derive(Debug, Error)]
pub enum PollError {
    #[error("job {job_id} still {last_status} after the poll timeout")]
    Timeout { job_id: JobId, last_status: JobStatus },

    #[error("job {job_id} finished as {status} without a result")]
    MissingResult { job_id: JobId, status: JobStatus },

    /// Transport and remote errors are not retried.
    #[error(transparent)]
    Core(#[from] CoreError),
}

/// Polling cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    pub interval: Duration,
    /// `None` polls until the job finishes.
    pub timeout: Option<Duration>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(1),
            timeout: None,
        }
    }
}

impl From<&PollingConfig> for PollConfig {
    fn from(config: &PollingConfig) -> Self {
        Self {
            interval: Duration::from_millis(config.interval_ms),
            timeout: config.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// A job seen in a terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobOutcome {
    pub job_id: JobId,
    pub status: JobStatus,
    pub result: JobResult,
}

impl JobOutcome {
    pub fn is_successful(&self) -> bool {
        self.status == JobStatus::Successful
    }
}

pub struct JobPoller {
    core: Arc<dyn CoreApi>,
    config: PollConfig,
}

impl JobPoller {
    pub fn new(core: Arc<dyn CoreApi>, config: PollConfig) -> Self {
        Self { core, config }
    }

    pub fn config(&self) -> &PollConfig {
        &self.config
    }

    /// Wait for `job_id` to finish and return its result payload.
    pub async fn await_job(&self, job_id: JobId) -> Result<JobResult, PollError> {
        Ok(self.await_job_outcome(job_id).await?.result)
    }

    /// Wait for `job_id` to finish and return its terminal status and result.
    pub async fn await_job_outcome(&self, job_id: JobId) -> Result<JobOutcome, PollError> {
        let started = Instant::now();
        let mut polls: u32 = 0;

        loop {
            let job = self.core.get_job(job_id).await?;
            polls += 1;
            metrics::JOB_POLLS.inc();

            if job.status.is_terminal() {
                let result = job.result.ok_or(PollError::MissingResult {
                    job_id,
                    status: job.status,
                })?;
                let elapsed = started.elapsed();
                metrics::JOBS_AWAITED
                    .with_label_values(&[job.status.as_str()])
                    .inc();
                metrics::JOB_WAIT_DURATION
                    .with_label_values(&[job.status.as_str()])
                    .observe(elapsed.as_secs_f64());
                debug!(
                    job_id,
                    status = %job.status,
                    polls,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "job finished"
                );
                return Ok(JobOutcome {
                    job_id,
                    status: job.status,
                    result,
                });
            }

            if let Some(timeout) = self.config.timeout {
                if started.elapsed() >= timeout {
                    metrics::JOB_TIMEOUTS.inc();
                    return Err(PollError::Timeout {
                        job_id,
                        last_status: job.status,
                    });
                }
            }

            sleep(self.config.interval).await;
        }
    }

    /// Ids of every job that has not reached a terminal state.
    pub async fn list_ongoing_job_ids(&self) -> Result<BTreeSet<JobId>, PollError> {
        let jobs = self.core.get_jobs().await?;
        Ok(jobs
            .into_iter()
            .filter(|job| !job.status.is_terminal())
            .map(|job| job.id)
            .collect())
    }

    /// Wait until the daemon reports no ongoing jobs at all.
    ///
    /// Returns the outcome of every job that was waited on, in the order
    /// they were observed to finish.
    pub async fn await_all_ongoing(&self) -> Result<Vec<JobOutcome>, PollError> {
        let mut outcomes = Vec::new();
        loop {
            let ongoing = self.list_ongoing_job_ids().await?;
            if ongoing.is_empty() {
                break;
            }
            info!(count = ongoing.len(), "waiting for ongoing jobs");
            for job_id in ongoing {
                outcomes.push(self.await_job_outcome(job_id).await?);
            }
        }
        Ok(outcomes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockCore;

    fn fast() -> PollConfig {
        PollConfig {
            interval: Duration::from_millis(1),
            timeout: None,
        }
    }

    #[test]
    fn test_poll_config_from_polling_config() {
        let config = PollConfig::from(&PollingConfig {
            interval_ms: 250,
            timeout_secs: Some(30),
        });
        assert_eq!(config.interval, Duration::from_millis(250));
        assert_eq!(config.timeout, Some(Duration::from_secs(30)));
        assert_eq!(PollConfig::default().interval, Duration::from_secs(1));
        assert!(PollConfig::default().timeout.is_none());
    }

    #[tokio::test]
    async fn test_await_job_returns_only_when_terminal() {
        let core = Arc::new(MockCore::new());
        core.set_job_script(vec![
            JobStatus::Pending,
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Running,
            JobStatus::Successful,
        ])
        .await;
        let job_id = core.submit_job(JobResult::ok("done")).await;

        let poller = JobPoller::new(core.clone(), fast());
        let result = poller.await_job(job_id).await.unwrap();

        assert_eq!(result, JobResult::ok("done"));
        assert_eq!(core.job_status(job_id).await, Some(JobStatus::Successful));
        assert_eq!(core.observed_statuses(job_id).await.last(), Some(&JobStatus::Successful));
        assert_eq!(core.get_job_calls(job_id).await, 5);
    }

    #[tokio::test]
    async fn test_failed_job_result_is_returned() {
        let core = Arc::new(MockCore::new());
        core.fail_next_job(JobResult::new(-1, "port already in use")).await;
        let job_id = core.submit_job(JobResult::ok("unused")).await;

        let poller = JobPoller::new(core, fast());
        let outcome = poller.await_job_outcome(job_id).await.unwrap();

        assert_eq!(outcome.status, JobStatus::Failed);
        assert!(!outcome.is_successful());
        assert_eq!(outcome.result.code, -1);
    }

    #[tokio::test]
    async fn test_timeout_reports_last_status() {
        let core = Arc::new(MockCore::new());
        core.set_job_script(vec![JobStatus::Running; 1000]).await;
        let job_id = core.submit_job(JobResult::ok("")).await;

        let poller = JobPoller::new(
            core,
            PollConfig {
                interval: Duration::from_millis(1),
                timeout: Some(Duration::from_millis(20)),
            },
        );
        let err = poller.await_job(job_id).await.unwrap_err();
        assert!(matches!(
            err,
            PollError::Timeout {
                last_status: JobStatus::Running,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_transport_error_surfaces_immediately() {
        let core = Arc::new(MockCore::new());
        let job_id = core.submit_job(JobResult::ok("")).await;
        core.set_next_error(CoreError::Transport("connection reset".to_string()))
            .await;

        let poller = JobPoller::new(core.clone(), fast());
        let err = poller.await_job(job_id).await.unwrap_err();
        assert!(matches!(err, PollError::Core(CoreError::Transport(_))));
        assert_eq!(core.get_job_calls(job_id).await, 0);
    }

    #[tokio::test]
    async fn test_unknown_job_is_remote_error() {
        let core = Arc::new(MockCore::new());
        let poller = JobPoller::new(core, fast());
        assert!(matches!(
            poller.await_job(404).await,
            Err(PollError::Core(CoreError::Remote { status: 404, .. }))
        ));
    }

    #[tokio::test]
    async fn test_ongoing_ids_never_grow_without_new_jobs() {
        let core = Arc::new(MockCore::new());
        core.set_job_script(vec![
            JobStatus::Queued,
            JobStatus::Running,
            JobStatus::Running,
            JobStatus::Successful,
        ])
        .await;
        for _ in 0..3 {
            core.submit_job(JobResult::ok("")).await;
        }

        let poller = JobPoller::new(core, fast());
        let mut previous = poller.list_ongoing_job_ids().await.unwrap();
        assert_eq!(previous.len(), 3);
        for _ in 0..6 {
            let current = poller.list_ongoing_job_ids().await.unwrap();
            assert!(current.is_subset(&previous));
            previous = current;
        }
        assert!(previous.is_empty());
    }

    #[tokio::test]
    async fn test_await_all_ongoing_drains_jobs() {
        let core = Arc::new(MockCore::new());
        for _ in 0..4 {
            core.submit_job(JobResult::ok("")).await;
        }

        let poller = JobPoller::new(core.clone(), fast());
        let outcomes = poller.await_all_ongoing().await.unwrap();
        assert_eq!(outcomes.len(), 4);
        assert!(outcomes.iter().all(JobOutcome::is_successful));
        assert!(poller.list_ongoing_job_ids().await.unwrap().is_empty());
    }
}
