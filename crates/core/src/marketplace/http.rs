//! HTTP marketplace client.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use reqwest::{header::CONTENT_TYPE, multipart, Client, RequestBuilder, Response};
use tracing::{debug, warn};

use crate::config::MarketplaceConfig;
use crate::metrics;

use super::types::{AuthenticateRequest, AuthenticateResponse, LicensesResponse};
use super::{AuthError, Marketplace, MarketplaceError, Session, Ticket};

const SERVICE: &str = "marketplace";

/// Marketplace client over its public HTTP API.
pub struct HttpMarketplace {
    client: Client,
    config: MarketplaceConfig,
}

impl HttpMarketplace {
    pub fn new(config: MarketplaceConfig) -> Result<Self, MarketplaceError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs as u64))
            .build()
            .map_err(|e| MarketplaceError::Client(e.to_string()))?;

        Ok(Self { client, config })
    }

    /// Get the base URL without trailing slash.
    fn base_url(&self) -> &str {
        self.config.url.trim_end_matches('/')
    }

    /// Send a request and record it, without judging the status code.
    async fn send(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<Response, reqwest::Error> {
        let started = Instant::now();
        let result = request.send().await;
        let success = matches!(&result, Ok(r) if r.status().is_success());
        metrics::record_request(SERVICE, operation, success, started.elapsed().as_secs_f64());
        result
    }

    /// Send a request and turn non-2xx answers into `MarketplaceError::Remote`.
    async fn execute(
        &self,
        operation: &str,
        request: RequestBuilder,
    ) -> Result<Response, MarketplaceError> {
        let response = self
            .send(operation, request)
            .await
            .map_err(|e| MarketplaceError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(operation, status = status.as_u16(), "marketplace request failed");
            return Err(MarketplaceError::Remote {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl Marketplace for HttpMarketplace {
    async fn authenticate(&self, username: &str, password: &str) -> Result<Session, AuthError> {
        let url = format!("{}/api/access/authenticate", self.base_url());
        let body = serde_json::to_string(&AuthenticateRequest {
            username,
            password,
            issue_jwt: true,
        })
        .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;

        let request = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json")
            .body(body);
        let response = self
            .send("authenticate", request)
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| AuthError::Transport(e.to_string()))?;

        if !status.is_success() {
            return Err(AuthError::Rejected {
                status: status.as_u16(),
                body: text.chars().take(200).collect(),
            });
        }

        let parsed: AuthenticateResponse = serde_json::from_str(&text)
            .map_err(|e| AuthError::MalformedResponse(e.to_string()))?;
        let session = parsed.into_session()?;
        debug!(user = %session.user_login, "marketplace authentication successful");
        Ok(session)
    }

    async fn licenses(&self, session: &Session) -> Result<Vec<Ticket>, MarketplaceError> {
        let url = format!("{}/api/license/get-current-user-licenses", self.base_url());
        let form = multipart::Form::new().text("aam-jwt", session.token.clone());

        let response = self
            .execute("licenses", self.client.post(&url).multipart(form))
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| MarketplaceError::Transport(e.to_string()))?;
        let parsed: LicensesResponse = serde_json::from_str(&text)
            .map_err(|e| MarketplaceError::Decode(format!("Failed to parse licenses: {}", e)))?;

        debug!(count = parsed.response.licenses.len(), "fetched licenses");
        Ok(parsed.response.licenses)
    }

    async fn latest_core_version(&self) -> Result<String, MarketplaceError> {
        let url = format!("{}/dl/latest_flecs_amd64", self.base_url());
        let response = self
            .execute("latest_core_version", self.client.get(&url))
            .await?;
        let text = response
            .text()
            .await
            .map_err(|e| MarketplaceError::Transport(e.to_string()))?;
        Ok(text.trim().to_string())
    }
}
