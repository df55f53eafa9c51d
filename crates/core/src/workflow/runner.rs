//! Scenario implementations.
//!
//! Every scenario issues one request at a time and waits for the jobs it
//! started before checking post-conditions.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, error, info, warn};

use crate::config::AssertionConfig;
use crate::core_client::{AppKey, CoreApi, ImportOutcome, InstanceStatus, JobId};
use crate::marketplace::{Marketplace, Session};
use crate::metrics;
use crate::poller::{JobOutcome, JobPoller, PollConfig};
use crate::tickets::TicketLedger;
use crate::verify;

use super::types::{
    AppProbe, CycleReport, InstallReport, InstanceStart, RunSummary, ScenarioError,
    ScenarioRecord, StartOutcome, StartReport, UninstallReport,
};

/// Drives the daemon through multi-step scenarios for one marketplace session.
pub struct Workflow {
    session: Session,
    marketplace: Arc<dyn Marketplace>,
    core: Arc<dyn CoreApi>,
    tickets: TicketLedger,
    poller: JobPoller,
    assertions: AssertionConfig,
    probe: reqwest::Client,
}

/// Probe timeout until [`Workflow::with_probe_timeout`] sets one.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

fn probe_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .unwrap_or_default()
}

impl Workflow {
    pub fn new(
        session: Session,
        marketplace: Arc<dyn Marketplace>,
        core: Arc<dyn CoreApi>,
        poll: PollConfig,
        assertions: AssertionConfig,
    ) -> Self {
        Self {
            session,
            tickets: TicketLedger::new(marketplace.clone()),
            poller: JobPoller::new(core.clone(), poll),
            marketplace,
            core,
            assertions,
            probe: probe_client(DEFAULT_PROBE_TIMEOUT),
        }
    }

    /// Bound each app reachability request to `timeout`.
    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe = probe_client(timeout);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn tickets(&self) -> &TicketLedger {
        &self.tickets
    }

    pub fn poller(&self) -> &JobPoller {
        &self.poller
    }

    /// Compare the published core release with the installed one.
    pub async fn check_version(&self) -> Result<(), ScenarioError> {
        let published = self.marketplace.latest_core_version().await?;
        let installed = self.core.version().await?;
        info!(%published, %installed, mode = ?self.assertions.version, "checking core version");
        verify::assert_version(&published, &installed, self.assertions.version)?;
        Ok(())
    }

    /// A freshly set up daemon lists exactly the system apps, each installed
    /// once with a single running instance.
    pub async fn check_system_apps(&self, system_apps: &[String]) -> Result<(), ScenarioError> {
        let apps = self.core.list_apps().await?;
        let instances = self.core.list_instances().await?;

        verify::assert_app_count(&apps, system_apps.len())?;
        for name in system_apps {
            verify::assert_app_name_installed_once(&apps, name)?;
            verify::assert_single_running_instance(&instances, name)?;
        }
        Ok(())
    }

    /// Hand the marketplace session to the daemon.
    pub async fn forward_login(&self) -> Result<(), ScenarioError> {
        self.core.marketplace_login(&self.session).await?;
        info!(user = %self.session.user_login, "forwarded marketplace login");
        Ok(())
    }

    /// Install every app with its own ticket and check that exactly (or at
    /// least) that many tickets were consumed.
    pub async fn install_set(&self, apps: &[AppKey]) -> Result<InstallReport, ScenarioError> {
        let tickets_before = self.tickets.count_unused(&self.session).await?;
        verify::assert_enough_tickets(tickets_before, apps.len())?;

        let mut job_ids = Vec::with_capacity(apps.len());
        for (offset, app) in apps.iter().enumerate() {
            let license_key = self.tickets.ticket_key_at(&self.session, offset).await?;
            let job_id = self.core.install(app, &license_key).await?;
            info!(app = %app, job_id, "install requested");
            job_ids.push(job_id);
        }

        self.settle_jobs("install", &job_ids).await?;

        let installed = self.core.list_apps().await?;
        verify::assert_apps_present(&installed, apps)?;
        for app in apps {
            verify::assert_app_installed_once(&installed, app)?;
        }

        let tickets_after = self.tickets.count_unused(&self.session).await?;
        if tickets_after + apps.len() < tickets_before {
            warn!(
                tickets_before,
                tickets_after,
                batch = apps.len(),
                "more tickets consumed than installs issued"
            );
        }
        verify::assert_ticket_delta(tickets_before, tickets_after, apps.len(), self.assertions.tickets)?;

        Ok(InstallReport {
            job_ids,
            tickets_before,
            tickets_after,
        })
    }

    /// Create an instance of each app and start it.
    ///
    /// A create job that does not finish with code 0 is recorded in the
    /// report and its start is skipped. A start job that does not succeed,
    /// or leaves the instance not running, fails the scenario.
    pub async fn create_and_start(&self, apps: &[AppKey]) -> Result<StartReport, ScenarioError> {
        let mut report = StartReport::default();

        for app in apps {
            let instance_name = format!("{}0", app.name);
            let job_id = self.core.create_instance(app, &instance_name).await?;
            let create = self.poller.await_job_outcome(job_id).await?;

            if !InstanceStart::create_succeeded(&create) {
                warn!(
                    app = %app,
                    status = %create.status,
                    code = create.result.code,
                    message = %create.result.message,
                    "instance creation did not succeed"
                );
                report.instances.push(InstanceStart {
                    app: app.clone(),
                    create,
                    instance_id: None,
                    start: StartOutcome::NotAttempted,
                });
                continue;
            }

            let instance_id = create.result.message.clone();
            let start = match self.core.start_instance(&instance_id).await? {
                None => {
                    debug!(%instance_id, "instance already running");
                    StartOutcome::AlreadyRunning
                }
                Some(start_job) => {
                    let outcome = self.poller.await_job_outcome(start_job).await?;
                    verify::assert_job_successful("start instance", &outcome)?;
                    StartOutcome::Started(outcome)
                }
            };

            let instances = self.core.list_instances().await?;
            verify::assert_instance_status(&instances, &instance_id, &InstanceStatus::Running)?;
            info!(app = %app, %instance_id, "instance running");

            report.instances.push(InstanceStart {
                app: app.clone(),
                create,
                instance_id: Some(instance_id),
                start,
            });
        }

        Ok(report)
    }

    /// Uninstall every app and check the app list shrank by exactly that many.
    pub async fn uninstall_set(&self, apps: &[AppKey]) -> Result<UninstallReport, ScenarioError> {
        let before = self.core.list_apps().await?;

        let mut job_ids = Vec::new();
        for app in apps {
            match self.core.uninstall(app).await? {
                Some(job_id) => {
                    info!(app = %app, job_id, "uninstall requested");
                    job_ids.push(job_id);
                }
                None => info!(app = %app, "uninstall requested without job"),
            }
        }

        self.settle_jobs("uninstall", &job_ids).await?;

        let after = self.core.list_apps().await?;
        verify::assert_app_count_shrank(&before, &after, apps.len())?;
        verify::assert_apps_absent(&after, apps)?;

        Ok(UninstallReport {
            job_ids,
            apps_before: before.len(),
            apps_after: after.len(),
        })
    }

    /// Install, export, uninstall, then import the archive and check every
    /// app is back.
    pub async fn export_import_cycle(
        &self,
        apps: &[AppKey],
        instance_ids: &[String],
    ) -> Result<CycleReport, ScenarioError> {
        let install = self.install_set(apps).await?;

        let export_job = self.core.export(apps, instance_ids).await?;
        let export = self.poller.await_job_outcome(export_job).await?;
        verify::assert_job_successful("export", &export)?;
        verify::assert_result_code("export", &export.result, 0)?;

        let export_id = export.result.message;
        let archive = self.core.download_export(&export_id).await?;
        let archive_bytes = archive.len();
        info!(%export_id, archive_bytes, "export downloaded");

        let uninstall = self.uninstall_set(apps).await?;

        let import_job = match self
            .core
            .import_archive(&format!("{}.tar.gz", export_id), archive)
            .await?
        {
            ImportOutcome::Completed => {
                debug!(%export_id, "import finished without a job");
                None
            }
            ImportOutcome::Job(job_id) => {
                let outcome = self.poller.await_job_outcome(job_id).await?;
                verify::assert_job_successful("import", &outcome)?;
                Some(job_id)
            }
        };
        self.poller.await_all_ongoing().await?;

        let restored = self.core.list_apps().await?;
        verify::assert_apps_present(&restored, apps)?;
        for app in apps {
            verify::assert_app_installed_once(&restored, app)?;
        }

        Ok(CycleReport {
            install,
            export_id,
            archive_bytes,
            uninstall,
            import_job,
        })
    }

    /// Wait `settle`, then expect a 2xx answer from every app's endpoint.
    pub async fn open_apps(&self, probes: &[AppProbe], settle: Duration) -> Result<(), ScenarioError> {
        tokio::time::sleep(settle).await;

        for probe in probes {
            let response = self
                .probe
                .get(&probe.url)
                .send()
                .await
                .map_err(|e| ScenarioError::Probe {
                    url: probe.url.clone(),
                    reason: e.to_string(),
                })?;
            let status = response.status();
            if !status.is_success() {
                return Err(verify::AssertionFailure::new(
                    format!("HTTP status of {}", probe.name),
                    "2xx",
                    status.as_u16(),
                )
                .into());
            }
            debug!(app = %probe.name, status = status.as_u16(), "app reachable");
        }
        Ok(())
    }

    /// Bulk-wait for everything ongoing, then require each of `job_ids` to
    /// have succeeded.
    async fn settle_jobs(&self, what: &str, job_ids: &[JobId]) -> Result<Vec<JobOutcome>, ScenarioError> {
        self.poller.await_all_ongoing().await?;

        let mut outcomes = Vec::with_capacity(job_ids.len());
        for &job_id in job_ids {
            let outcome = self.poller.await_job_outcome(job_id).await?;
            verify::assert_job_successful(what, &outcome)?;
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }
}

/// Run one scenario, record its verdict in `summary` and return its value
/// when it passed.
pub async fn run_scenario<T, F>(summary: &mut RunSummary, name: &str, scenario: F) -> Option<T>
where
    F: Future<Output = Result<T, ScenarioError>>,
{
    info!(scenario = name, "scenario started");
    let started_at = Utc::now();
    let result = scenario.await;
    let finished_at = Utc::now();

    let (value, error, assertion) = match result {
        Ok(value) => {
            info!(scenario = name, "scenario passed");
            (Some(value), None, false)
        }
        Err(e) => {
            error!(scenario = name, error = %e, "scenario failed");
            let assertion = e.is_assertion();
            (None, Some(e.to_string()), assertion)
        }
    };

    let verdict = if error.is_none() { "pass" } else { "fail" };
    metrics::SCENARIOS.with_label_values(&[name, verdict]).inc();

    summary.push(ScenarioRecord {
        name: name.to_string(),
        passed: error.is_none(),
        error,
        assertion,
        started_at,
        finished_at,
    });
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_client::{CoreError, JobResult};
    use crate::testing::{fixtures, MockCore, MockMarketplace};

    async fn setup(tickets: usize) -> (Workflow, Arc<MockCore>, Arc<MockMarketplace>) {
        let marketplace = Arc::new(MockMarketplace::new());
        marketplace
            .add_user(fixtures::USERNAME, fixtures::PASSWORD, fixtures::USER_LOGIN)
            .await;
        marketplace.add_tickets(tickets).await;
        let session = marketplace
            .authenticate(fixtures::USERNAME, fixtures::PASSWORD)
            .await
            .unwrap();
        let core = Arc::new(MockCore::with_marketplace(marketplace.clone()));
        let workflow = Workflow::new(
            session,
            marketplace.clone(),
            core.clone(),
            PollConfig {
                interval: Duration::from_millis(1),
                timeout: Some(Duration::from_secs(5)),
            },
            AssertionConfig::default(),
        );
        (workflow, core, marketplace)
    }

    #[tokio::test]
    async fn test_install_set_uses_distinct_tickets() {
        let (workflow, core, _marketplace) = setup(5).await;
        let apps = fixtures::user_apps();

        let report = workflow.install_set(&apps).await.unwrap();
        assert_eq!(report.job_ids.len(), 4);
        assert_eq!(report.tickets_consumed(), 4);

        let mut keys: Vec<String> = core
            .recorded_installs()
            .await
            .into_iter()
            .map(|(_, key)| key)
            .collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), 4);
    }

    #[tokio::test]
    async fn test_install_set_needs_tickets() {
        let (workflow, core, _marketplace) = setup(2).await;
        let err = workflow.install_set(&fixtures::user_apps()).await.unwrap_err();
        assert!(err.is_assertion());
        assert!(core.recorded_installs().await.is_empty());
    }

    #[tokio::test]
    async fn test_failed_install_job_is_assertion_with_result() {
        let (workflow, core, _marketplace) = setup(1).await;
        core.fail_next_job(JobResult::new(-1, "Could not pull image")).await;

        let err = workflow.install_set(&[fixtures::mosquitto()]).await.unwrap_err();
        match err {
            ScenarioError::Assertion(failure) => {
                assert!(failure.actual.contains("failed"));
                assert!(failure.actual.contains("Could not pull image"));
            }
            other => panic!("expected assertion failure, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_create_failure_is_surfaced_not_fatal() {
        let (workflow, core, _marketplace) = setup(0).await;
        let grafana = AppKey::new("com.grafana.grafana-oss", "9.3.1");
        core.install_directly(&grafana).await;

        // Influx is not installed, so its create job fails
        let influx = AppKey::new("com.influxdata.influxdb", "2.5.1");
        let report = workflow
            .create_and_start(&[influx.clone(), grafana.clone()])
            .await
            .unwrap();

        assert_eq!(report.failed_creates().len(), 1);
        assert_eq!(report.failed_creates()[0].0, &influx);
        assert_eq!(report.instances[0].start, StartOutcome::NotAttempted);
        assert!(report.instances[1].is_running());
    }

    #[tokio::test]
    async fn test_check_system_apps_counts_exactly() {
        let (workflow, core, _marketplace) = setup(0).await;
        fixtures::preinstall_system_apps(&core).await;
        let system_apps = fixtures::system_app_names();
        workflow.check_system_apps(&system_apps).await.unwrap();

        core.install_directly(&fixtures::mosquitto()).await;
        let err = workflow.check_system_apps(&system_apps).await.unwrap_err();
        assert!(err.is_assertion());
    }

    #[tokio::test]
    async fn test_forward_login_passes_session() {
        let (workflow, core, _marketplace) = setup(0).await;
        workflow.forward_login().await.unwrap();
        assert_eq!(core.logins().await, vec![workflow.session().clone()]);
    }

    #[tokio::test]
    async fn test_infrastructure_error_is_not_assertion() {
        let (workflow, core, _marketplace) = setup(1).await;
        core.set_next_error(CoreError::Transport("connection refused".to_string()))
            .await;
        let err = workflow.forward_login().await.unwrap_err();
        assert!(!err.is_assertion());
    }

    #[tokio::test]
    async fn test_run_scenario_records_verdicts() {
        let mut summary = RunSummary::default();

        let value = run_scenario(&mut summary, "passes", async { Ok::<_, ScenarioError>(7) }).await;
        assert_eq!(value, Some(7));

        let value = run_scenario(&mut summary, "fails", async {
            Err::<(), _>(ScenarioError::from(verify::AssertionFailure::new("x", 1, 2)))
        })
        .await;
        assert_eq!(value, None);

        assert_eq!(summary.records.len(), 2);
        assert!(summary.records[0].passed);
        assert!(!summary.records[1].passed);
        assert!(summary.records[1].assertion);
        assert_eq!(summary.failed(), 1);
    }
}
