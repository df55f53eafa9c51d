//! Mock core daemon for testing.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::core_client::{
    App, AppKey, AppStatus, CoreApi, CoreError, ImportOutcome, Instance, InstanceStatus, Job,
    JobId, JobResult, JobStatus,
};
use crate::marketplace::Session;

use super::MockMarketplace;

/// What a job does to the daemon state once it is observed as successful.
#[derive(Debug, Clone)]
enum Effect {
    /// Install, activating the license key if one is tracked.
    Install(AppKey, Option<String>),
    Uninstall(AppKey),
    CreateInstance(Instance),
    StartInstance(String),
    Import(Vec<AppKey>),
    None,
}

#[derive(Debug, Clone)]
struct MockJob {
    description: String,
    script: Vec<JobStatus>,
    cursor: usize,
    result: JobResult,
    effect: Effect,
    applied: bool,
    observed: Vec<JobStatus>,
    get_job_calls: usize,
}

impl MockJob {
    fn current(&self) -> JobStatus {
        self.script[self.cursor]
    }

    fn to_job(&self, id: JobId) -> Job {
        let status = self.current();
        Job {
            id,
            status,
            description: Some(self.description.clone()),
            result: status.is_terminal().then(|| self.result.clone()),
        }
    }
}

#[derive(Debug, Default)]
struct DaemonState {
    apps: Vec<App>,
    instances: Vec<Instance>,
    jobs: HashMap<JobId, MockJob>,
    exports: HashMap<String, Vec<u8>>,
    next_job_id: JobId,
    next_instance: u32,
    next_export: u32,
    /// License keys of installs that succeeded, not yet activated.
    activations: Vec<String>,
}

impl DaemonState {
    fn install(&mut self, key: &AppKey) {
        match self.apps.iter_mut().find(|a| &a.app_key == key) {
            Some(app) => app.status = AppStatus::Installed,
            None => self.apps.push(App {
                app_key: key.clone(),
                status: AppStatus::Installed,
            }),
        }
    }

    fn uninstall(&mut self, key: &AppKey) {
        self.apps.retain(|a| &a.app_key != key);
        self.instances.retain(|i| &i.app_key != key);
    }

    fn apply(&mut self, effect: Effect) {
        match effect {
            Effect::Install(key, license_key) => {
                self.install(&key);
                self.activations.extend(license_key);
            }
            Effect::Uninstall(key) => self.uninstall(&key),
            Effect::CreateInstance(instance) => self.instances.push(instance),
            Effect::StartInstance(id) => {
                if let Some(instance) = self.instances.iter_mut().find(|i| i.instance_id == id) {
                    instance.status = InstanceStatus::Running;
                }
            }
            Effect::Import(keys) => {
                for key in &keys {
                    self.install(key);
                }
            }
            Effect::None => {}
        }
    }

    /// Report the job's current status, then move it one step along its script.
    fn observe(&mut self, job_id: JobId) -> Option<Job> {
        let job = self.jobs.get_mut(&job_id)?;
        let seen = job.to_job(job_id);
        job.observed.push(seen.status);
        if job.cursor + 1 < job.script.len() {
            job.cursor += 1;
        }

        let effect = if seen.status == JobStatus::Successful && !job.applied {
            job.applied = true;
            Some(job.effect.clone())
        } else {
            None
        };
        if let Some(effect) = effect {
            self.apply(effect);
        }
        Some(seen)
    }
}

/// Mock implementation of the CoreApi trait.
///
/// An in-memory daemon whose jobs advance one status per observation,
/// following a configurable script (`queued`, `running`, `successful` by
/// default). A job's effect on apps and instances lands the first time it
/// is observed as successful.
///
/// # Example
///
/// ```rust,ignore
/// let core = MockCore::new();
/// let job_id = core.install(&AppKey::new("org.mosquitto.broker", "2.0.15-openssl"), "LIC-0001").await?;
///
/// // Not installed until the job is polled to completion
/// assert!(core.list_apps().await?.is_empty());
/// JobPoller::new(Arc::new(core), PollConfig::default()).await_job(job_id).await?;
/// ```
#[derive(Debug)]
pub struct MockCore {
    state: Arc<RwLock<DaemonState>>,
    script: Arc<RwLock<Vec<JobStatus>>>,
    /// If set, the next submitted job ends `failed` with this result.
    next_failure: Arc<RwLock<Option<JobResult>>>,
    /// If set, the next start job ends `failed` with this result.
    next_start_failure: Arc<RwLock<Option<JobResult>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<CoreError>>>,
    logins: Arc<RwLock<Vec<Session>>>,
    installs: Arc<RwLock<Vec<(AppKey, String)>>>,
    version: Arc<RwLock<String>>,
    uninstall_tracked: Arc<RwLock<bool>>,
    import_sync: Arc<RwLock<bool>>,
    create_running: Arc<RwLock<bool>>,
    marketplace: Option<Arc<MockMarketplace>>,
}

impl Default for MockCore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockCore {
    pub fn new() -> Self {
        Self {
            state: Arc::new(RwLock::new(DaemonState {
                next_job_id: 1,
                ..DaemonState::default()
            })),
            script: Arc::new(RwLock::new(vec![
                JobStatus::Queued,
                JobStatus::Running,
                JobStatus::Successful,
            ])),
            next_failure: Arc::new(RwLock::new(None)),
            next_start_failure: Arc::new(RwLock::new(None)),
            next_error: Arc::new(RwLock::new(None)),
            logins: Arc::new(RwLock::new(Vec::new())),
            installs: Arc::new(RwLock::new(Vec::new())),
            version: Arc::new(RwLock::new("4.0.0-snowhare-abc1234".to_string())),
            uninstall_tracked: Arc::new(RwLock::new(true)),
            import_sync: Arc::new(RwLock::new(false)),
            create_running: Arc::new(RwLock::new(false)),
            marketplace: None,
        }
    }

    /// Installs check their license key against `marketplace` and consume it
    /// when the job succeeds; an unknown or used key fails the install job.
    pub fn with_marketplace(marketplace: Arc<MockMarketplace>) -> Self {
        Self {
            marketplace: Some(marketplace),
            ..Self::new()
        }
    }

    /// Status sequence for jobs submitted from now on. The last entry repeats.
    pub async fn set_job_script(&self, script: Vec<JobStatus>) {
        if !script.is_empty() {
            *self.script.write().await = script;
        }
    }

    /// Submit a job with no effect on daemon state.
    pub async fn submit_job(&self, result: JobResult) -> JobId {
        self.submit("Test job", result, Effect::None).await
    }

    pub async fn fail_next_job(&self, result: JobResult) {
        *self.next_failure.write().await = Some(result);
    }

    pub async fn fail_next_start(&self, result: JobResult) {
        *self.next_start_failure.write().await = Some(result);
    }

    pub async fn set_next_error(&self, error: CoreError) {
        *self.next_error.write().await = Some(error);
    }

    /// Put an app in place without a job, e.g. a preinstalled system app.
    pub async fn install_directly(&self, key: &AppKey) {
        self.state.write().await.install(key);
    }

    /// Add an instance without a job. Returns its id.
    pub async fn add_instance(&self, key: &AppKey, status: InstanceStatus) -> String {
        let mut state = self.state.write().await;
        let instance = Self::new_instance(&mut state, key, &format!("{}0", key.name), status);
        let id = instance.instance_id.clone();
        state.instances.push(instance);
        id
    }

    pub async fn set_version(&self, version: &str) {
        *self.version.write().await = version.to_string();
    }

    /// When false, uninstall removes the app at once and returns no job id.
    pub async fn set_uninstall_tracked(&self, tracked: bool) {
        *self.uninstall_tracked.write().await = tracked;
    }

    /// When true, imports complete without creating a job.
    pub async fn set_import_sync(&self, sync: bool) {
        *self.import_sync.write().await = sync;
    }

    /// When true, created instances come up running, as with apps the
    /// daemon autostarts.
    pub async fn set_create_running(&self, running: bool) {
        *self.create_running.write().await = running;
    }

    pub async fn logins(&self) -> Vec<Session> {
        self.logins.read().await.clone()
    }

    /// Every install request with the license key it carried.
    pub async fn recorded_installs(&self) -> Vec<(AppKey, String)> {
        self.installs.read().await.clone()
    }

    /// Current status of a job without advancing it.
    pub async fn job_status(&self, job_id: JobId) -> Option<JobStatus> {
        self.state.read().await.jobs.get(&job_id).map(MockJob::current)
    }

    /// Every status a job has been reported with, in order.
    pub async fn observed_statuses(&self, job_id: JobId) -> Vec<JobStatus> {
        self.state
            .read()
            .await
            .jobs
            .get(&job_id)
            .map(|j| j.observed.clone())
            .unwrap_or_default()
    }

    /// Number of `get_job` calls that answered for this job.
    pub async fn get_job_calls(&self, job_id: JobId) -> usize {
        self.state
            .read()
            .await
            .jobs
            .get(&job_id)
            .map(|j| j.get_job_calls)
            .unwrap_or(0)
    }

    fn new_instance(
        state: &mut DaemonState,
        key: &AppKey,
        name: &str,
        status: InstanceStatus,
    ) -> Instance {
        state.next_instance += 1;
        Instance {
            instance_id: format!("inst-{}", state.next_instance),
            instance_name: name.to_string(),
            app_key: key.clone(),
            status,
        }
    }

    /// Consume the tickets of installs that finished since the last call.
    async fn flush_activations(&self) {
        let keys = std::mem::take(&mut self.state.write().await.activations);
        if let Some(marketplace) = &self.marketplace {
            for key in keys {
                marketplace.activate(&key).await;
            }
        }
    }

    async fn take_error(&self) -> Result<(), CoreError> {
        match self.next_error.write().await.take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    async fn submit(&self, description: &str, result: JobResult, effect: Effect) -> JobId {
        let mut script = self.script.read().await.clone();
        let (result, effect) = match self.next_failure.write().await.take() {
            Some(failure) => {
                if let Some(last) = script.last_mut() {
                    *last = JobStatus::Failed;
                }
                (failure, Effect::None)
            }
            None => (result, effect),
        };
        self.insert_job(description, script, result, effect).await
    }

    async fn submit_failed(&self, description: &str, result: JobResult) -> JobId {
        let mut script = self.script.read().await.clone();
        if let Some(last) = script.last_mut() {
            *last = JobStatus::Failed;
        }
        self.insert_job(description, script, result, Effect::None).await
    }

    async fn insert_job(
        &self,
        description: &str,
        script: Vec<JobStatus>,
        result: JobResult,
        effect: Effect,
    ) -> JobId {
        let mut state = self.state.write().await;
        let id = state.next_job_id;
        state.next_job_id += 1;
        state.jobs.insert(
            id,
            MockJob {
                description: description.to_string(),
                script,
                cursor: 0,
                result,
                effect,
                applied: false,
                observed: Vec::new(),
                get_job_calls: 0,
            },
        );
        id
    }
}

fn not_found(what: impl std::fmt::Display) -> CoreError {
    CoreError::Remote {
        status: 404,
        body: format!("{} not found", what),
    }
}

#[async_trait]
impl CoreApi for MockCore {
    fn name(&self) -> &str {
        "mock"
    }

    async fn version(&self) -> Result<String, CoreError> {
        self.take_error().await?;
        Ok(self.version.read().await.clone())
    }

    async fn marketplace_login(&self, session: &Session) -> Result<(), CoreError> {
        self.take_error().await?;
        self.logins.write().await.push(session.clone());
        Ok(())
    }

    async fn list_apps(&self) -> Result<Vec<App>, CoreError> {
        self.take_error().await?;
        Ok(self.state.read().await.apps.clone())
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, CoreError> {
        self.take_error().await?;
        Ok(self.state.read().await.instances.clone())
    }

    async fn install(&self, app: &AppKey, license_key: &str) -> Result<JobId, CoreError> {
        self.take_error().await?;
        self.installs
            .write()
            .await
            .push((app.clone(), license_key.to_string()));

        let description = format!("Installing {}", app);
        let license = match &self.marketplace {
            Some(marketplace) if !marketplace.is_unused(license_key).await => {
                let result = JobResult::new(-1, "Could not activate license");
                return Ok(self.submit_failed(&description, result).await);
            }
            Some(_) => Some(license_key.to_string()),
            None => None,
        };
        Ok(self
            .submit(
                &description,
                JobResult::ok(""),
                Effect::Install(app.clone(), license),
            )
            .await)
    }

    async fn create_instance(&self, app: &AppKey, instance_name: &str) -> Result<JobId, CoreError> {
        self.take_error().await?;
        let description = format!("Creating instance of {}", app);
        let initial = if *self.create_running.read().await {
            InstanceStatus::Running
        } else {
            InstanceStatus::Created
        };

        let instance = {
            let mut state = self.state.write().await;
            if !state.apps.iter().any(|a| &a.app_key == app) {
                None
            } else {
                Some(Self::new_instance(
                    &mut state,
                    app,
                    instance_name,
                    initial,
                ))
            }
        };

        match instance {
            Some(instance) => {
                let result = JobResult::ok(instance.instance_id.clone());
                Ok(self
                    .submit(&description, result, Effect::CreateInstance(instance))
                    .await)
            }
            None => {
                let result = JobResult::new(-1, format!("App {} is not installed", app));
                Ok(self.submit_failed(&description, result).await)
            }
        }
    }

    async fn start_instance(&self, instance_id: &str) -> Result<Option<JobId>, CoreError> {
        self.take_error().await?;
        let status = self
            .state
            .read()
            .await
            .instances
            .iter()
            .find(|i| i.instance_id == instance_id)
            .map(|i| i.status.clone())
            .ok_or_else(|| not_found(format!("instance {}", instance_id)))?;

        if status == InstanceStatus::Running {
            return Ok(None);
        }
        let description = format!("Starting instance {}", instance_id);
        let failure = self.next_start_failure.write().await.take();
        if let Some(result) = failure {
            return Ok(Some(self.submit_failed(&description, result).await));
        }
        let job_id = self
            .submit(
                &description,
                JobResult::ok(""),
                Effect::StartInstance(instance_id.to_string()),
            )
            .await;
        Ok(Some(job_id))
    }

    async fn uninstall(&self, app: &AppKey) -> Result<Option<JobId>, CoreError> {
        self.take_error().await?;
        if !self.state.read().await.apps.iter().any(|a| &a.app_key == app) {
            return Err(not_found(format!("app {}", app)));
        }

        if !*self.uninstall_tracked.read().await {
            self.state.write().await.uninstall(app);
            return Ok(None);
        }
        let job_id = self
            .submit(
                &format!("Uninstalling {}", app),
                JobResult::ok(""),
                Effect::Uninstall(app.clone()),
            )
            .await;
        Ok(Some(job_id))
    }

    async fn export(&self, apps: &[AppKey], instance_ids: &[String]) -> Result<JobId, CoreError> {
        self.take_error().await?;
        let archive = serde_json::to_vec(apps).map_err(|e| CoreError::Decode(e.to_string()))?;

        let export_id = {
            let mut state = self.state.write().await;
            if let Some(missing) = apps
                .iter()
                .find(|key| !state.apps.iter().any(|a| &a.app_key == *key))
            {
                return Err(not_found(format!("app {}", missing)));
            }
            if let Some(missing) = instance_ids
                .iter()
                .find(|id| !state.instances.iter().any(|i| &i.instance_id == *id))
            {
                return Err(not_found(format!("instance {}", missing)));
            }
            state.next_export += 1;
            let export_id = format!("export-{}", state.next_export);
            state.exports.insert(export_id.clone(), archive);
            export_id
        };

        Ok(self
            .submit("Exporting apps", JobResult::ok(export_id), Effect::None)
            .await)
    }

    async fn download_export(&self, export_id: &str) -> Result<Vec<u8>, CoreError> {
        self.take_error().await?;
        self.state
            .read()
            .await
            .exports
            .get(export_id)
            .cloned()
            .ok_or_else(|| not_found(format!("export {}", export_id)))
    }

    async fn import_archive(
        &self,
        _file_name: &str,
        archive: Vec<u8>,
    ) -> Result<ImportOutcome, CoreError> {
        self.take_error().await?;
        let keys: Vec<AppKey> =
            serde_json::from_slice(&archive).map_err(|e| CoreError::Remote {
                status: 400,
                body: format!("invalid archive: {}", e),
            })?;

        if *self.import_sync.read().await {
            self.state.write().await.apply(Effect::Import(keys));
            return Ok(ImportOutcome::Completed);
        }
        let job_id = self
            .submit("Importing apps", JobResult::ok(""), Effect::Import(keys))
            .await;
        Ok(ImportOutcome::Job(job_id))
    }

    async fn get_jobs(&self) -> Result<Vec<Job>, CoreError> {
        self.take_error().await?;
        let jobs = {
            let mut state = self.state.write().await;
            let mut ids: Vec<JobId> = state.jobs.keys().copied().collect();
            ids.sort_unstable();
            ids.into_iter()
                .filter_map(|id| state.observe(id))
                .collect()
        };
        self.flush_activations().await;
        Ok(jobs)
    }

    async fn get_job(&self, job_id: JobId) -> Result<Job, CoreError> {
        self.take_error().await?;
        let job = {
            let mut state = self.state.write().await;
            let job = state
                .observe(job_id)
                .ok_or_else(|| not_found(format!("job {}", job_id)))?;
            if let Some(tracked) = state.jobs.get_mut(&job_id) {
                tracked.get_job_calls += 1;
            }
            job
        };
        self.flush_activations().await;
        Ok(job)
    }
}
