//! HTTP client for the externally-hosted crawl backend.

use std::time::Duration;

use tracing::{debug, info, instrument};

use siteharvest_shared::{BackendConfig, HarvestError, Result, credential};

use crate::poller::poll_until_done;
use crate::response::{CrawlRequestBody, CrawlResponse, RemoteResult, TaskStatusResponse};

/// User-Agent string for backend requests.
const USER_AGENT: &str = concat!("siteharvest/", env!("CARGO_PKG_VERSION"));

/// Client for `POST /crawl`, `GET /task/{id}`, and `GET /health`.
///
/// Crawl calls get a long timeout to accommodate heavy pages; poll and
/// health calls use a short one. Both timeouts come from [`BackendConfig`].
#[derive(Debug)]
pub struct BackendClient {
    crawl_client: reqwest::Client,
    probe_client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    poll_max_attempts: u32,
    poll_interval: Duration,
}

impl BackendClient {
    /// Build a client from config. Fails with `NotConfigured` when the base
    /// address is missing. The credential is optional — a locally-hosted
    /// backend runs open.
    pub fn new(config: &BackendConfig) -> Result<Self> {
        if config.base_url.trim().is_empty() {
            return Err(HarvestError::NotConfigured(
                "crawl backend address not set".into(),
            ));
        }

        let crawl_client = build_client(config.crawl_timeout_secs)?;
        let probe_client = build_client(config.probe_timeout_secs)?;

        Ok(Self {
            crawl_client,
            probe_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: credential(&config.api_key_env),
            poll_max_attempts: config.poll_max_attempts,
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// Crawl `urls` in one backend call, transparently polling when the
    /// backend replies with an asynchronous task handle instead of results.
    #[instrument(skip_all, fields(urls = urls.len()))]
    pub async fn crawl_urls(
        &self,
        urls: &[String],
        crawler_config: serde_json::Value,
    ) -> Result<Vec<RemoteResult>> {
        let body = CrawlRequestBody {
            urls: urls.to_vec(),
            browser_config: serde_json::json!({ "headless": true }),
            crawler_config,
        };

        let url = format!("{}/crawl", self.base_url);
        let mut request = self.crawl_client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Network(format!("{url}: HTTP {status}")));
        }

        let parsed: CrawlResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: invalid response body: {e}")))?;

        if let Some(results) = parsed.results {
            debug!(results = results.len(), "backend replied synchronously");
            return Ok(results);
        }

        if let Some(task_id) = parsed.task_id {
            info!(%task_id, "backend replied with async task, polling");
            return poll_until_done(
                &task_id,
                self.poll_max_attempts,
                self.poll_interval,
                || self.probe_task(&task_id),
            )
            .await;
        }

        Err(HarvestError::validation(
            "crawl response carried neither results nor a task id",
        ))
    }

    /// One `GET /task/{task_id}` probe.
    async fn probe_task(&self, task_id: &str) -> Result<TaskStatusResponse> {
        let url = format!("{}/task/{task_id}", self.base_url);
        let mut request = self.probe_client.get(&url);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(HarvestError::Network(format!("{url}: HTTP {status}")));
        }

        response
            .json()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: invalid response body: {e}")))
    }

    /// Liveness probe. Any non-5xx, non-timeout reply counts as healthy,
    /// whatever the body says.
    pub async fn health(&self) -> Result<()> {
        let url = format!("{}/health", self.base_url);
        let response = self
            .probe_client
            .get(&url)
            .send()
            .await
            .map_err(|e| HarvestError::Network(format!("{url}: {e}")))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(HarvestError::Network(format!("{url}: HTTP {status}")));
        }
        Ok(())
    }

    /// The configured backend base address.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))
}
