//! Types for core daemon operations.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::marketplace::Session;

/// Identifier of a job tracked by the daemon.
pub type JobId = u32;

/// Errors that can occur while talking to the core daemon.
#[derive(Debug, Error)]
pub enum CoreError {
    /// The daemon answered with a non-2xx status.
    #[error("remote error: HTTP {status}: {body}")]
    Remote { status: u16, body: String },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("failed to decode response: {0}")]
    Decode(String),

    /// The daemon reported a job status outside the known set.
    #[error("job {job_id} has unrecognized status {status:?}")]
    UnknownJobStatus { job_id: JobId, status: String },

    #[error("HTTP client setup failed: {0}")]
    Client(String),
}

/// Identifies an installable application.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AppKey {
    /// Reverse-domain name, e.g. `org.mosquitto.broker`.
    pub name: String,
    pub version: String,
}

impl AppKey {
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }
}

impl fmt::Display for AppKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.version)
    }
}

/// Status of an installed app as reported by the daemon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AppStatus {
    NotInstalled,
    ManifestDownloaded,
    TokenAcquired,
    ImageDownloaded,
    Installed,
    Removed,
    Purged,
    Orphaned,
    Unknown,
    /// A state this harness does not know about.
    Other(String),
}

impl AppStatus {
    pub fn as_str(&self) -> &str {
        match self {
            AppStatus::NotInstalled => "not installed",
            AppStatus::ManifestDownloaded => "manifest downloaded",
            AppStatus::TokenAcquired => "token acquired",
            AppStatus::ImageDownloaded => "image downloaded",
            AppStatus::Installed => "installed",
            AppStatus::Removed => "removed",
            AppStatus::Purged => "purged",
            AppStatus::Orphaned => "orphaned",
            AppStatus::Unknown => "unknown",
            AppStatus::Other(s) => s,
        }
    }
}

impl From<String> for AppStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "not installed" => AppStatus::NotInstalled,
            "manifest downloaded" => AppStatus::ManifestDownloaded,
            "token acquired" => AppStatus::TokenAcquired,
            "image downloaded" => AppStatus::ImageDownloaded,
            "installed" => AppStatus::Installed,
            "removed" => AppStatus::Removed,
            "purged" => AppStatus::Purged,
            "orphaned" => AppStatus::Orphaned,
            "unknown" => AppStatus::Unknown,
            _ => AppStatus::Other(s),
        }
    }
}

impl From<AppStatus> for String {
    fn from(status: AppStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for AppStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of an app instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InstanceStatus {
    NotCreated,
    Requested,
    ResourcesReady,
    Created,
    Stopped,
    Running,
    Orphaned,
    Unknown,
    Other(String),
}

impl InstanceStatus {
    pub fn as_str(&self) -> &str {
        match self {
            InstanceStatus::NotCreated => "not created",
            InstanceStatus::Requested => "requested",
            InstanceStatus::ResourcesReady => "resources ready",
            InstanceStatus::Created => "created",
            InstanceStatus::Stopped => "stopped",
            InstanceStatus::Running => "running",
            InstanceStatus::Orphaned => "orphaned",
            InstanceStatus::Unknown => "unknown",
            InstanceStatus::Other(s) => s,
        }
    }
}

impl From<String> for InstanceStatus {
    fn from(s: String) -> Self {
        match s.as_str() {
            "not created" => InstanceStatus::NotCreated,
            "requested" => InstanceStatus::Requested,
            "resources ready" => InstanceStatus::ResourcesReady,
            "created" => InstanceStatus::Created,
            "stopped" => InstanceStatus::Stopped,
            "running" => InstanceStatus::Running,
            "orphaned" => InstanceStatus::Orphaned,
            "unknown" => InstanceStatus::Unknown,
            _ => InstanceStatus::Other(s),
        }
    }
}

impl From<InstanceStatus> for String {
    fn from(status: InstanceStatus) -> Self {
        status.as_str().to_string()
    }
}

impl fmt::Display for InstanceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An installed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct App {
    #[serde(rename = "appKey")]
    pub app_key: AppKey,
    pub status: AppStatus,
}

/// A created instance of an installed app.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instance {
    #[serde(rename = "instanceId")]
    pub instance_id: String,
    #[serde(rename = "instanceName", default)]
    pub instance_name: String,
    #[serde(rename = "appKey")]
    pub app_key: AppKey,
    pub status: InstanceStatus,
}

/// Status of a daemon job.
///
/// The set is closed: a status string outside it is a decode error rather
/// than being treated as either running or finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Cancelled,
    Successful,
    Failed,
}

impl JobStatus {
    /// Parse the daemon's status string.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(JobStatus::Pending),
            "queued" => Some(JobStatus::Queued),
            "running" => Some(JobStatus::Running),
            "cancelled" => Some(JobStatus::Cancelled),
            "successful" => Some(JobStatus::Successful),
            "failed" => Some(JobStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Queued => "queued",
            JobStatus::Running => "running",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Successful => "successful",
            JobStatus::Failed => "failed",
        }
    }

    /// Terminal states are absorbing; no further transitions occur.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Cancelled | JobStatus::Successful | JobStatus::Failed
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result payload of a finished job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobResult {
    pub code: i32,
    /// Instance id for create-instance jobs, export id for export jobs.
    #[serde(default)]
    pub message: String,
}

impl JobResult {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn ok(message: impl Into<String>) -> Self {
        Self::new(0, message)
    }
}

impl fmt::Display for JobResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "code {}: {:?}", self.code, self.message)
    }
}

/// A job as seen by the harness.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Job {
    pub id: JobId,
    pub status: JobStatus,
    pub description: Option<String>,
    /// Only meaningful once `status` is terminal.
    pub result: Option<JobResult>,
}

/// What the import endpoint answered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportOutcome {
    /// No job was created; the import finished synchronously.
    Completed,
    Job(JobId),
}

/// Operations the harness drives on the core daemon.
///
/// Long-running operations return the id of the job the daemon created for
/// them; use [`crate::poller::JobPoller`] to wait for it.
#[async_trait]
pub trait CoreApi: Send + Sync {
    /// Name of this backend, used in logs.
    fn name(&self) -> &str;

    /// Installed core version, e.g. `4.0.0-snowhare-abc1234`.
    async fn version(&self) -> Result<String, CoreError>;

    /// Forward the marketplace session to the daemon.
    async fn marketplace_login(&self, session: &Session) -> Result<(), CoreError>;

    async fn list_apps(&self) -> Result<Vec<App>, CoreError>;

    async fn list_instances(&self) -> Result<Vec<Instance>, CoreError>;

    async fn install(&self, app: &AppKey, license_key: &str) -> Result<JobId, CoreError>;

    async fn create_instance(&self, app: &AppKey, instance_name: &str)
        -> Result<JobId, CoreError>;

    /// Returns `None` when the instance is already running.
    async fn start_instance(&self, instance_id: &str) -> Result<Option<JobId>, CoreError>;

    /// Returns `None` when the daemon does not hand out a job id for the removal.
    async fn uninstall(&self, app: &AppKey) -> Result<Option<JobId>, CoreError>;

    async fn export(&self, apps: &[AppKey], instance_ids: &[String]) -> Result<JobId, CoreError>;

    async fn download_export(&self, export_id: &str) -> Result<Vec<u8>, CoreError>;

    async fn import_archive(
        &self,
        file_name: &str,
        archive: Vec<u8>,
    ) -> Result<ImportOutcome, CoreError>;

    async fn get_jobs(&self) -> Result<Vec<Job>, CoreError>;

    async fn get_job(&self, job_id: JobId) -> Result<Job, CoreError>;
}
