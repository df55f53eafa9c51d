//! Types for workflow scenarios.

use std::fmt::Write as _;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use crate::config::ScenarioConfig;
use crate::core_client::{AppKey, CoreError, JobId, JobResult};
use crate::marketplace::MarketplaceError;
use crate::poller::{JobOutcome, PollError};
use crate::tickets::TicketError;
use crate::verify::AssertionFailure;

/// Why a scenario stopped.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// A post-condition did not hold.
    #[error("assertion failed: {0}")]
    Assertion(#[from] AssertionFailure),

    #[error("core error: {0}")]
    Core(#[from] CoreError),

    #[error("poll error: {0}")]
    Poll(#[from] PollError),

    #[error("ticket error: {0}")]
    Ticket(#[from] TicketError),

    #[error("marketplace error: {0}")]
    Marketplace(#[from] MarketplaceError),

    /// An app's HTTP endpoint could not be reached.
    #[error("probe of {url} failed: {reason}")]
    Probe { url: String, reason: String },
}

impl ScenarioError {
    /// Assertion failures are test results; everything else is infrastructure.
    pub fn is_assertion(&self) -> bool {
        matches!(self, ScenarioError::Assertion(_))
    }
}

/// Result of [`crate::workflow::Workflow::install_set`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallReport {
    pub job_ids: Vec<JobId>,
    pub tickets_before: usize,
    pub tickets_after: usize,
}

impl InstallReport {
    pub fn tickets_consumed(&self) -> usize {
        self.tickets_before.saturating_sub(self.tickets_after)
    }
}

/// What happened when starting an instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// Create did not succeed, so start was skipped.
    NotAttempted,
    /// The daemon answered without a job.
    AlreadyRunning,
    Started(JobOutcome),
}

/// Per-app result of create-and-start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceStart {
    pub app: AppKey,
    pub create: JobOutcome,
    /// Set when create finished with code 0.
    pub instance_id: Option<String>,
    pub start: StartOutcome,
}

impl InstanceStart {
    /// A create job counts only when it succeeded with code 0.
    pub fn create_succeeded(create: &JobOutcome) -> bool {
        create.is_successful() && create.result.code == 0
    }

    /// Non-zero create codes are left to the caller to judge.
    pub fn create_code(&self) -> i32 {
        self.create.result.code
    }

    pub fn is_running(&self) -> bool {
        match &self.start {
            StartOutcome::AlreadyRunning => true,
            StartOutcome::Started(outcome) => outcome.is_successful(),
            StartOutcome::NotAttempted => false,
        }
    }
}

/// Result of [`crate::workflow::Workflow::create_and_start`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartReport {
    pub instances: Vec<InstanceStart>,
}

impl StartReport {
    pub fn instance_ids(&self) -> Vec<String> {
        self.instances
            .iter()
            .filter_map(|i| i.instance_id.clone())
            .collect()
    }

    /// Apps whose create job failed, was cancelled, or finished with a
    /// non-zero code.
    pub fn failed_creates(&self) -> Vec<(&AppKey, &JobResult)> {
        self.instances
            .iter()
            .filter(|i| !InstanceStart::create_succeeded(&i.create))
            .map(|i| (&i.app, &i.create.result))
            .collect()
    }
}

/// Result of [`crate::workflow::Workflow::uninstall_set`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UninstallReport {
    /// Job ids the daemon handed out; empty when it tracks no uninstall jobs.
    pub job_ids: Vec<JobId>,
    pub apps_before: usize,
    pub apps_after: usize,
}

/// Result of [`crate::workflow::Workflow::export_import_cycle`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub install: InstallReport,
    pub export_id: String,
    pub archive_bytes: usize,
    pub uninstall: UninstallReport,
    /// `None` when the import completed without a job.
    pub import_job: Option<JobId>,
}

/// An app's HTTP endpoint to check after start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppProbe {
    pub name: String,
    pub url: String,
}

impl AppProbe {
    pub fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
        }
    }

    /// One probe per user app that publishes a port.
    pub fn for_user_apps(scenarios: &ScenarioConfig) -> Vec<Self> {
        scenarios
            .user_apps
            .iter()
            .filter_map(|app| {
                app.port.map(|port| {
                    Self::new(&app.name, format!("http://{}:{}", scenarios.probe_host, port))
                })
            })
            .collect()
    }
}

/// Pass/fail of one scenario in a run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioRecord {
    pub name: String,
    pub passed: bool,
    /// Failure context; `None` when passed.
    pub error: Option<String>,
    /// Whether the failure was an assertion rather than infrastructure.
    pub assertion: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScenarioRecord {
    pub fn duration_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

/// Every scenario of a run, in execution order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub records: Vec<ScenarioRecord>,
}

impl RunSummary {
    pub fn push(&mut self, record: ScenarioRecord) {
        self.records.push(record);
    }

    pub fn all_passed(&self) -> bool {
        self.records.iter().all(|r| r.passed)
    }

    pub fn failed(&self) -> usize {
        self.records.iter().filter(|r| !r.passed).count()
    }

    /// One `PASS`/`FAIL` line per scenario.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for record in &self.records {
            let verdict = if record.passed { "PASS" } else { "FAIL" };
            let _ = write!(out, "{} {} ({} ms)", verdict, record.name, record.duration_ms());
            if let Some(error) = &record.error {
                let _ = write!(out, ": {}", error);
            }
            out.push('\n');
        }
        let _ = writeln!(
            out,
            "{} passed, {} failed",
            self.records.len() - self.failed(),
            self.failed()
        );
        out
    }
}
