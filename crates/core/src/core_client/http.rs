//! HTTP client for the core daemon's REST API.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, multipart, Client, RequestBuilder, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::{CoreConfig, InstallPayloadShape, WebappConfig};
use crate::marketplace::Session;
use crate::metrics;

use super::{
    App, AppKey, CoreApi, CoreError, ImportOutcome, Instance, Job, JobId, JobResult, JobStatus,
};

const SERVICE: &str = "core";

/// Core daemon client.
///
/// The import endpoint lives on the web app origin, everything else on the
/// daemon's own base URL.
pub struct HttpCoreClient {
    client: Client,
    config: CoreConfig,
    webapp_url: String,
}

impl HttpCoreClient {
    pub fn new(config: CoreConfig, webapp: &WebappConfig) -> Result<Self, CoreError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| CoreError::Client(e.to_string()))?;

        Ok(Self {
            client,
            config,
            webapp_url: webapp.url.trim_end_matches('/').to_string(),
        })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url(), endpoint)
    }

    /// Send a request; non-2xx answers become `CoreError::Remote`.
    async fn execute(&self, operation: &str, request: RequestBuilder) -> Result<Response, CoreError> {
        let started = Instant::now();
        let result = request.send().await;
        let elapsed = started.elapsed().as_secs_f64();

        let response = match result {
            Ok(response) => response,
            Err(e) => {
                metrics::record_request(SERVICE, operation, false, elapsed);
                return Err(if e.is_timeout() {
                    CoreError::Transport(format!("{} timed out", operation))
                } else {
                    CoreError::Transport(e.to_string())
                });
            }
        };

        let status = response.status();
        metrics::record_request(SERVICE, operation, status.is_success(), elapsed);
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(operation, status = status.as_u16(), "core request failed");
            return Err(CoreError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        debug!(operation, status = status.as_u16(), "core request ok");
        Ok(response)
    }

    async fn text(&self, operation: &str, request: RequestBuilder) -> Result<String, CoreError> {
        self.execute(operation, request)
            .await?
            .text()
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(
        &self,
        operation: &str,
        endpoint: &str,
    ) -> Result<T, CoreError> {
        let body = self.text(operation, self.client.get(self.url(endpoint))).await?;
        serde_json::from_str(&body)
            .map_err(|e| CoreError::Decode(format!("{}: {}", operation, e)))
    }

    /// POST a compact JSON body and return the raw response text.
    async fn post_json<T: Serialize>(
        &self,
        operation: &str,
        endpoint: &str,
        payload: &T,
    ) -> Result<String, CoreError> {
        // serde_json emits no whitespace after separators, which the daemon requires
        let body = serde_json::to_string(payload).map_err(|e| CoreError::Decode(e.to_string()))?;
        let request = self
            .client
            .post(self.url(endpoint))
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        self.text(operation, request).await
    }

    fn install_payload(&self, app: &AppKey, license_key: &str) -> Value {
        match self.config.install_payload {
            InstallPayloadShape::Nested => serde_json::json!({
                "appKey": { "name": app.name, "version": app.version },
                "licenseKey": license_key,
            }),
            InstallPayloadShape::Flat => serde_json::json!({
                "app": app.name,
                "version": app.version,
                "licenseKey": license_key,
            }),
        }
    }
}

/// Job as the daemon serializes it.
#[derive(Debug, Deserialize)]
struct WireJob {
    #[serde(alias = "jobId")]
    id: JobId,
    status: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    result: Option<JobResult>,
}

impl WireJob {
    fn into_job(self) -> Result<Job, CoreError> {
        let status =
            JobStatus::parse(&self.status).ok_or_else(|| CoreError::UnknownJobStatus {
                job_id: self.id,
                status: self.status.clone(),
            })?;
        Ok(Job {
            id: self.id,
            status,
            description: self.description,
            result: self.result,
        })
    }
}

#[derive(Debug, Serialize)]
struct CreateInstanceRequest<'a> {
    #[serde(rename = "appKey")]
    app_key: &'a AppKey,
    #[serde(rename = "instanceName")]
    instance_name: &'a str,
}

#[derive(Debug, Serialize)]
struct ExportRequest<'a> {
    apps: &'a [AppKey],
    instances: &'a [String],
}

#[derive(Debug, Serialize)]
struct LoginRequest<'a> {
    token: &'a str,
    user: &'a str,
}

#[derive(Debug, Deserialize)]
struct VersionResponse {
    core: String,
}

/// Pull the `jobId` out of an accepted-operation response.
///
/// An empty body, `null`, or an object without `jobId` yields `None`.
fn extract_job_id(body: &str) -> Result<Option<JobId>, CoreError> {
    if body.trim().is_empty() {
        return Ok(None);
    }
    let value: Value = serde_json::from_str(body)
        .map_err(|e| CoreError::Decode(format!("Failed to parse job reference: {}", e)))?;
    match value {
        Value::Null => Ok(None),
        Value::Object(map) => match map.get("jobId") {
            None | Some(Value::Null) => Ok(None),
            Some(id) => id
                .as_u64()
                .and_then(|id| JobId::try_from(id).ok())
                .map(Some)
                .ok_or_else(|| CoreError::Decode(format!("invalid jobId: {}", id))),
        },
        other => Err(CoreError::Decode(format!(
            "unexpected job reference: {}",
            other
        ))),
    }
}

fn require_job_id(operation: &str, body: &str) -> Result<JobId, CoreError> {
    extract_job_id(body)?
        .ok_or_else(|| CoreError::Decode(format!("{} response carries no jobId", operation)))
}

/// Some daemon versions wrap a single job in a one-element list.
fn normalize_job_envelope(value: Value) -> Result<WireJob, CoreError> {
    let object = match value {
        Value::Array(mut items) => {
            if items.len() != 1 {
                return Err(CoreError::Decode(format!(
                    "expected a single job, got a list of {}",
                    items.len()
                )));
            }
            items.remove(0)
        }
        other => other,
    };
    serde_json::from_value(object).map_err(|e| CoreError::Decode(format!("job: {}", e)))
}

#[async_trait]
impl CoreApi for HttpCoreClient {
    fn name(&self) -> &str {
        "http"
    }

    async fn version(&self) -> Result<String, CoreError> {
        let response: VersionResponse = self.get_json("version", "/v2/system/version").await?;
        Ok(response.core)
    }

    async fn marketplace_login(&self, session: &Session) -> Result<(), CoreError> {
        let payload = LoginRequest {
            token: &session.token,
            user: &session.user_login,
        };
        self.post_json("marketplace_login", "/v2/marketplace/login", &payload)
            .await?;
        Ok(())
    }

    async fn list_apps(&self) -> Result<Vec<App>, CoreError> {
        self.get_json("list_apps", "/v2/apps").await
    }

    async fn list_instances(&self) -> Result<Vec<Instance>, CoreError> {
        self.get_json("list_instances", "/v2/instances").await
    }

    async fn install(&self, app: &AppKey, license_key: &str) -> Result<JobId, CoreError> {
        let payload = self.install_payload(app, license_key);
        let body = self.post_json("install", "/v2/apps/install", &payload).await?;
        require_job_id("install", &body)
    }

    async fn create_instance(
        &self,
        app: &AppKey,
        instance_name: &str,
    ) -> Result<JobId, CoreError> {
        let payload = CreateInstanceRequest {
            app_key: app,
            instance_name,
        };
        let body = self
            .post_json("create_instance", "/v2/instances/create", &payload)
            .await?;
        require_job_id("create_instance", &body)
    }

    async fn start_instance(&self, instance_id: &str) -> Result<Option<JobId>, CoreError> {
        let endpoint = format!("/v2/instances/{}/start", urlencoding::encode(instance_id));
        let body = self
            .text("start_instance", self.client.post(self.url(&endpoint)))
            .await?;
        extract_job_id(&body)
    }

    async fn uninstall(&self, app: &AppKey) -> Result<Option<JobId>, CoreError> {
        let endpoint = format!(
            "/v2/apps/{}?version={}",
            urlencoding::encode(&app.name),
            urlencoding::encode(&app.version)
        );
        let body = self
            .text("uninstall", self.client.delete(self.url(&endpoint)))
            .await?;
        extract_job_id(&body)
    }

    async fn export(&self, apps: &[AppKey], instance_ids: &[String]) -> Result<JobId, CoreError> {
        let payload = ExportRequest {
            apps,
            instances: instance_ids,
        };
        let body = self.post_json("export", "/v2/exports/create", &payload).await?;
        require_job_id("export", &body)
    }

    async fn download_export(&self, export_id: &str) -> Result<Vec<u8>, CoreError> {
        let endpoint = format!("/v2/exports/{}", urlencoding::encode(export_id));
        let response = self
            .execute("download_export", self.client.get(self.url(&endpoint)))
            .await?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| CoreError::Transport(e.to_string()))?;
        debug!(export_id, size = bytes.len(), "downloaded export archive");
        Ok(bytes.to_vec())
    }

    async fn import_archive(
        &self,
        file_name: &str,
        archive: Vec<u8>,
    ) -> Result<ImportOutcome, CoreError> {
        let url = format!("{}/api/v3/imports", self.webapp_url);
        let part = multipart::Part::bytes(archive)
            .file_name(file_name.to_string())
            .mime_str("application/gzip")
            .map_err(|e| CoreError::Client(e.to_string()))?;
        let form = multipart::Form::new().part("upload_file", part);

        let body = self
            .text("import_archive", self.client.post(&url).multipart(form))
            .await?;
        // Not every import answer is JSON; anything without a jobId means done.
        match extract_job_id(&body) {
            Ok(Some(job_id)) => Ok(ImportOutcome::Job(job_id)),
            Ok(None) => Ok(ImportOutcome::Completed),
            Err(_) => {
                debug!(body = %body.chars().take(200).collect::<String>(), "non-JSON import response");
                Ok(ImportOutcome::Completed)
            }
        }
    }

    async fn get_jobs(&self) -> Result<Vec<Job>, CoreError> {
        let jobs: Vec<WireJob> = self.get_json("get_jobs", "/v2/jobs").await?;
        jobs.into_iter().map(WireJob::into_job).collect()
    }

    async fn get_job(&self, job_id: JobId) -> Result<Job, CoreError> {
        let endpoint = format!("/v2/jobs/{}", job_id);
        let value: Value = self.get_json("get_job", &endpoint).await?;
        normalize_job_envelope(value)?.into_job()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(shape: InstallPayloadShape) -> HttpCoreClient {
        let config = CoreConfig {
            install_payload: shape,
            ..CoreConfig::default()
        };
        HttpCoreClient::new(config, &WebappConfig::default()).unwrap()
    }

    #[test]
    fn test_extract_job_id() {
        assert_eq!(extract_job_id(r#"{"jobId":17}"#).unwrap(), Some(17));
        assert_eq!(extract_job_id("").unwrap(), None);
        assert_eq!(extract_job_id("  \n").unwrap(), None);
        assert_eq!(extract_job_id("null").unwrap(), None);
        assert_eq!(extract_job_id(r#"{"additionalInfo":"OK"}"#).unwrap(), None);
        assert!(extract_job_id(r#"{"jobId":"x"}"#).is_err());
        assert!(extract_job_id("[1,2]").is_err());
    }

    #[test]
    fn test_require_job_id() {
        assert_eq!(require_job_id("install", r#"{"jobId":3}"#).unwrap(), 3);
        let err = require_job_id("install", "{}").unwrap_err();
        assert!(err.to_string().contains("install response carries no jobId"));
    }

    #[test]
    fn test_normalize_list_wrapped_job() {
        let wrapped = serde_json::json!([
            {"id": 4, "status": "running", "description": "Installing", "result": {"code": 0, "message": ""}}
        ]);
        let job = normalize_job_envelope(wrapped).unwrap().into_job().unwrap();
        assert_eq!(job.id, 4);
        assert_eq!(job.status, JobStatus::Running);

        let plain = serde_json::json!({"jobId": 5, "status": "successful", "result": {"code": 0, "message": "done"}});
        let job = normalize_job_envelope(plain).unwrap().into_job().unwrap();
        assert_eq!(job.id, 5);
        assert_eq!(job.result, Some(JobResult::ok("done")));
    }

    #[test]
    fn test_normalize_rejects_empty_list() {
        assert!(normalize_job_envelope(serde_json::json!([])).is_err());
    }

    #[test]
    fn test_unknown_job_status_is_an_error() {
        let wire = WireJob {
            id: 9,
            status: "unknown".to_string(),
            description: None,
            result: None,
        };
        assert!(matches!(
            wire.into_job(),
            Err(CoreError::UnknownJobStatus { job_id: 9, .. })
        ));
    }

    #[test]
    fn test_install_payload_shapes() {
        let app = AppKey::new("org.mosquitto.broker", "2.0.15-openssl");

        let nested = client(InstallPayloadShape::Nested).install_payload(&app, "KEY-1");
        assert_eq!(
            serde_json::to_string(&nested).unwrap(),
            r#"{"appKey":{"name":"org.mosquitto.broker","version":"2.0.15-openssl"},"licenseKey":"KEY-1"}"#
        );

        let flat = client(InstallPayloadShape::Flat).install_payload(&app, "KEY-1");
        assert_eq!(flat["app"], "org.mosquitto.broker");
        assert_eq!(flat["version"], "2.0.15-openssl");
        assert_eq!(flat["licenseKey"], "KEY-1");
    }

    #[test]
    fn test_export_request_is_compact() {
        let apps = vec![AppKey::new("com.influxdata.influxdb", "2.5.1")];
        let body = serde_json::to_string(&ExportRequest {
            apps: &apps,
            instances: &[],
        })
        .unwrap();
        assert_eq!(
            body,
            r#"{"apps":[{"name":"com.influxdata.influxdb","version":"2.5.1"}],"instances":[]}"#
        );
    }

    #[test]
    fn test_base_url_trims_trailing_slash() {
        let config = CoreConfig {
            url: "http://localhost:8951/".to_string(),
            ..CoreConfig::default()
        };
        let client = HttpCoreClient::new(config, &WebappConfig::default()).unwrap();
        assert_eq!(client.url("/v2/apps"), "http://localhost:8951/v2/apps");
    }
}
