//! The crawl orchestrator: single entry point, mode selection, the
//! discovery-strategy chain, batch delegation, per-page persistence, and the
//! final run summary.
//!
//! Each orchestrator owns its own event bus and is constructed per session,
//! so isolated instances can run side by side in tests. Cancellation is a
//! token checked at phase boundaries; a call already in flight finishes
//! naturally and its result is discarded.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use siteharvest_backend::{BackendClient, RemoteResult, raw_variant, resolve_content};
use siteharvest_discovery::filter_and_prioritize;
use siteharvest_embedding::EmbeddingClient;
use siteharvest_scheduler::{BatchConfig, crawl_in_batches};
use siteharvest_shared::{
    CrawlMode, CrawlRequest, CrawlStatus, CrawlSummary, CrawlerConfig, EventBus, HarvestError,
    PageRecord, PageStatus, ProgressEvent, Result, RunId,
};
use siteharvest_storage::Storage;

use crate::strategy::DiscoveryStrategy;

/// Root of one crawl session.
pub struct Orchestrator {
    backend: BackendClient,
    embedder: Option<EmbeddingClient>,
    storage: Arc<Storage>,
    events: EventBus,
    config: CrawlerConfig,
}

impl Orchestrator {
    /// Build an orchestrator. Pass `None` for the embedder to persist pages
    /// without vectors.
    pub fn new(
        backend: BackendClient,
        embedder: Option<EmbeddingClient>,
        storage: Arc<Storage>,
        config: CrawlerConfig,
    ) -> Self {
        Self {
            backend,
            embedder,
            storage,
            events: EventBus::new(),
            config,
        }
    }

    /// The observer surface for this session. Subscribe before calling
    /// [`crawl`](Self::crawl); events are not buffered.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Run one crawl. Per-URL and per-batch failures are absorbed into the
    /// records; only whole-strategy exhaustion returns an `Err`. Cancellation
    /// yields an `Ok` summary with [`CrawlStatus::Cancelled`].
    #[instrument(skip_all, fields(seed = %request.seed_address, mode = ?request.mode))]
    pub async fn crawl(
        &self,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> Result<CrawlSummary> {
        let started = Instant::now();
        let run_id = RunId::new();
        let seed = request.seed_address.to_string();

        info!(%run_id, "starting crawl run");
        self.storage.insert_crawl_run(&run_id, &seed).await?;

        let outcome = match request.mode {
            CrawlMode::SinglePage => self.crawl_single(request, cancel).await,
            CrawlMode::SmartSite => self.crawl_site(request, cancel).await,
        };

        match outcome {
            Ok((records, status)) => {
                let summary = CrawlSummary::from_records(
                    run_id,
                    seed.as_str(),
                    status,
                    &records,
                    started.elapsed(),
                );
                self.emit_terminal(&summary);
                self.record_run_stats(&summary).await;
                info!(
                    status = %summary.status,
                    total = summary.total_pages,
                    completed = summary.completed,
                    elapsed_ms = summary.elapsed_ms,
                    "crawl run finished"
                );
                Ok(summary)
            }
            Err(e) => {
                self.events.emit(ProgressEvent::StatusChanged {
                    status: CrawlStatus::Failed,
                });
                self.events.emit(ProgressEvent::CrawlError {
                    message: e.to_string(),
                });
                let stats = json!({ "status": "failed", "error": e.to_string() });
                if let Err(store_err) = self
                    .storage
                    .finish_crawl_run(&run_id, &stats.to_string())
                    .await
                {
                    warn!(error = %store_err, "failed to record run failure");
                }
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // Single-page mode
    // -----------------------------------------------------------------------

    async fn crawl_single(
        &self,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> Result<(Vec<PageRecord>, CrawlStatus)> {
        if cancel.is_cancelled() {
            return Ok((Vec::new(), CrawlStatus::Cancelled));
        }

        self.events.emit(ProgressEvent::StatusChanged {
            status: CrawlStatus::Crawling,
        });

        let address = request.seed_address.to_string();
        let record = match self
            .backend
            .crawl_urls(&[address.clone()], self.base_crawler_config())
            .await
        {
            Ok(results) => match results.into_iter().next() {
                Some(result) => self.build_record(&address, 0, result),
                None => PageRecord::failed(&address, 0, "backend returned no result"),
            },
            Err(e) => PageRecord::failed(&address, 0, e.to_string()),
        };

        let record = self.embed_if_possible(record).await;
        self.persist(&record).await;
        self.emit_resolution(&record);

        let status = if record.status == PageStatus::Completed {
            CrawlStatus::Completed
        } else {
            CrawlStatus::Failed
        };
        Ok((vec![record], status))
    }

    // -----------------------------------------------------------------------
    // Smart-site mode
    // -----------------------------------------------------------------------

    async fn crawl_site(
        &self,
        request: &CrawlRequest,
        cancel: &CancellationToken,
    ) -> Result<(Vec<PageRecord>, CrawlStatus)> {
        let seed = &request.seed_address;

        // --- Discovery ---
        if cancel.is_cancelled() {
            return Ok((Vec::new(), CrawlStatus::Cancelled));
        }
        self.events.emit(ProgressEvent::StatusChanged {
            status: CrawlStatus::Discovering,
        });

        let mut failures: Vec<(&'static str, String)> = Vec::new();
        let mut links = None;

        for strategy in DiscoveryStrategy::chain_for(&self.config.strategy) {
            if cancel.is_cancelled() {
                return Ok((Vec::new(), CrawlStatus::Cancelled));
            }
            match strategy.discover(&self.backend, seed, &self.config).await {
                Ok(found) => {
                    info!(strategy = strategy.name(), links = found.len(), "discovery succeeded");
                    links = Some(found);
                    break;
                }
                Err(e) => {
                    warn!(strategy = strategy.name(), error = %e, "discovery strategy failed");
                    failures.push((strategy.name(), e.to_string()));
                }
            }
        }

        let Some(links) = links else {
            let cause = |name: &str| {
                failures
                    .iter()
                    .find(|(n, _)| *n == name)
                    .map(|(_, e)| e.clone())
                    .unwrap_or_else(|| "not attempted".into())
            };
            return Err(HarvestError::StrategyExhausted {
                native: cause("native"),
                manual: cause("manual"),
            });
        };

        self.events.emit(ProgressEvent::LinksDiscovered { count: links.len() });

        let prioritized = self.prioritized_list(seed, &links);
        debug!(candidates = prioritized.len(), "prioritized crawl list built");

        // --- Batch crawl ---
        if cancel.is_cancelled() {
            return Ok((Vec::new(), CrawlStatus::Cancelled));
        }
        self.events.emit(ProgressEvent::StatusChanged {
            status: CrawlStatus::Crawling,
        });

        let sequence_of: HashMap<String, u32> = prioritized
            .iter()
            .enumerate()
            .map(|(i, address)| (address.clone(), i as u32))
            .collect();

        let batch_config = BatchConfig::from(&self.config);
        let records = crawl_in_batches(&prioritized, &batch_config, &self.events, cancel, |batch| {
            self.crawl_batch(batch, &sequence_of)
        })
        .await;

        // Failed records synthesized by the scheduler (batch exhaustion,
        // missing addresses) have not been stored yet; the keyed upsert makes
        // re-persisting the others harmless.
        for record in records.iter().filter(|r| r.status == PageStatus::Failed) {
            self.persist(record).await;
        }

        let status = if cancel.is_cancelled() {
            CrawlStatus::Cancelled
        } else if records.iter().any(|r| r.status == PageStatus::Completed) {
            CrawlStatus::Completed
        } else {
            CrawlStatus::Failed
        };
        Ok((records, status))
    }

    /// Seed first, then the filtered/prioritized links, capped at
    /// `max_pages` total.
    fn prioritized_list(&self, seed: &url::Url, links: &[String]) -> Vec<String> {
        let max = self.config.max_pages.max(1);
        let seed_address = filter_and_prioritize(&[seed.to_string()], seed, 1)
            .pop()
            .unwrap_or_else(|| seed.to_string());

        let mut list = Vec::with_capacity(max);
        list.push(seed_address.clone());
        for address in filter_and_prioritize(links, seed, max) {
            if list.len() == max {
                break;
            }
            if address != seed_address {
                list.push(address);
            }
        }
        list
    }

    /// Crawl one batch through the backend, persisting each record as it is
    /// produced. Addresses the backend did not answer for are left to the
    /// scheduler to account for.
    async fn crawl_batch(
        &self,
        batch: Vec<String>,
        sequence_of: &HashMap<String, u32>,
    ) -> Result<Vec<PageRecord>> {
        let results = self
            .backend
            .crawl_urls(&batch, self.base_crawler_config())
            .await?;

        let mut by_address: HashMap<String, RemoteResult> = results
            .into_iter()
            .map(|result| (result.url.clone(), result))
            .collect();

        let mut records = Vec::with_capacity(batch.len());
        for address in &batch {
            let Some(result) = by_address.remove(address) else {
                continue;
            };
            let sequence = sequence_of.get(address).copied().unwrap_or(0);
            let record = self.build_record(address, sequence, result);
            let record = self.embed_if_possible(record).await;
            self.persist(&record).await;
            records.push(record);
        }
        Ok(records)
    }

    // -----------------------------------------------------------------------
    // Record construction
    // -----------------------------------------------------------------------

    /// Turn a backend result into a page record via the content-field
    /// hierarchy.
    fn build_record(&self, address: &str, sequence: u32, result: RemoteResult) -> PageRecord {
        if !result.success {
            return PageRecord::failed(
                address,
                sequence,
                result
                    .error_message
                    .unwrap_or_else(|| "backend reported failure".into()),
            );
        }

        match resolve_content(&result) {
            Some((field, content)) => {
                debug!(address, field, "content resolved");
                PageRecord::completed(
                    address,
                    sequence,
                    content,
                    raw_variant(&result),
                    result.internal_links(),
                    result.title(),
                )
            }
            None => PageRecord::failed(address, sequence, "no extractable content in response"),
        }
    }

    /// Attach an embedding when an embedder is configured. Embedding failure
    /// degrades to a record without a vector rather than losing the page.
    async fn embed_if_possible(&self, record: PageRecord) -> PageRecord {
        let Some(embedder) = &self.embedder else {
            return record;
        };
        if record.status != PageStatus::Completed {
            return record;
        }

        match embedder.embed(&record.content).await {
            Ok(vector) => record.with_embedding(vector),
            Err(e) => {
                warn!(address = %record.address, error = %e, "embedding failed, persisting without vector");
                record
            }
        }
    }

    /// Write a record through the persistence adapter. Storage failures are
    /// absorbed and logged; the crawl itself carries on.
    async fn persist(&self, record: &PageRecord) {
        if let Err(e) = self.storage.upsert_record(record).await {
            warn!(address = %record.address, error = %e, "failed to persist record");
        }
    }

    fn emit_resolution(&self, record: &PageRecord) {
        match record.status {
            PageStatus::Completed => self.events.emit(ProgressEvent::UrlCrawled {
                address: record.address.clone(),
            }),
            PageStatus::Failed => self.events.emit(ProgressEvent::UrlFailed {
                address: record.address.clone(),
                error: record.error.clone().unwrap_or_default(),
            }),
        }
    }

    fn emit_terminal(&self, summary: &CrawlSummary) {
        self.events.emit(ProgressEvent::StatusChanged {
            status: summary.status,
        });
        match summary.status {
            CrawlStatus::Completed => self.events.emit(ProgressEvent::CrawlCompleted {
                total: summary.total_pages,
                completed: summary.completed,
                failed: summary.failed,
            }),
            CrawlStatus::Failed => self.events.emit(ProgressEvent::CrawlError {
                message: "no pages crawled successfully".into(),
            }),
            // Cancellation is the terminal event itself, not an error.
            _ => {}
        }
    }

    async fn record_run_stats(&self, summary: &CrawlSummary) {
        let stats = json!({
            "status": summary.status,
            "total": summary.total_pages,
            "completed": summary.completed,
            "failed": summary.failed,
        });
        if let Err(e) = self
            .storage
            .finish_crawl_run(&summary.run_id, &stats.to_string())
            .await
        {
            warn!(error = %e, "failed to record run stats");
        }
    }

    fn base_crawler_config(&self) -> serde_json::Value {
        json!({
            "cache_mode": "bypass",
            "semaphore_count": self.config.concurrency,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use url::Url;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    use siteharvest_shared::BackendConfig;

    /// Scripted crawl backend: answers the native discovery probe with a
    /// fixed link set (or an error), the manual seed fetch with HTML, and
    /// batch calls by echoing a result per requested address.
    struct BackendStub {
        /// Links reported by the native combined call; `None` makes the
        /// native strategy fail with HTTP 500.
        native_links: Option<Vec<String>>,
        /// Links embedded in the seed HTML for manual discovery.
        seed_html_links: Vec<String>,
        /// Counts /crawl calls carrying more than one address.
        batch_calls: Arc<AtomicUsize>,
        /// Cancelled while answering the given (1-based) batch call.
        cancel_on_batch: Option<(usize, CancellationToken)>,
    }

    impl BackendStub {
        fn new(native_links: Option<Vec<String>>, seed_html_links: Vec<String>) -> Self {
            Self {
                native_links,
                seed_html_links,
                batch_calls: Arc::new(AtomicUsize::new(0)),
                cancel_on_batch: None,
            }
        }

        fn seed_html(&self) -> String {
            let anchors: String = self
                .seed_html_links
                .iter()
                .map(|l| format!("<a href=\"{l}\">link</a>"))
                .collect();
            format!("<html><body>{anchors}</body></html>")
        }
    }

    impl Respond for BackendStub {
        fn respond(&self, request: &Request) -> ResponseTemplate {
            let body: serde_json::Value =
                serde_json::from_slice(&request.body).expect("crawl body is JSON");
            let urls: Vec<String> = body["urls"]
                .as_array()
                .expect("urls array")
                .iter()
                .map(|u| u.as_str().unwrap().to_string())
                .collect();
            let native_probe = body["crawler_config"]["include_links"]
                .as_bool()
                .unwrap_or(false);

            if native_probe {
                return match &self.native_links {
                    Some(links) => ResponseTemplate::new(200).set_body_json(json!({
                        "results": [{
                            "url": urls[0],
                            "markdown": "# Seed",
                            "links": { "internal": links }
                        }]
                    })),
                    None => ResponseTemplate::new(500).set_body_string("deep crawl unsupported"),
                };
            }

            if urls.len() == 1 && !self.seed_html_links.is_empty() {
                // Manual discovery seed fetch.
                return ResponseTemplate::new(200).set_body_json(json!({
                    "results": [{ "url": urls[0], "html": self.seed_html() }]
                }));
            }

            let call = self.batch_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, token)) = &self.cancel_on_batch {
                if call == *at {
                    token.cancel();
                }
            }

            let results: Vec<serde_json::Value> = urls
                .iter()
                .map(|u| {
                    json!({
                        "url": u,
                        "markdown": format!("content of {u}"),
                        "html": format!("<html><body><p>{u}</p></body></html>"),
                    })
                })
                .collect();
            ResponseTemplate::new(200).set_body_json(json!({ "results": results }))
        }
    }

    async fn test_storage() -> Arc<Storage> {
        let tmp = std::env::temp_dir().join(format!("sh_core_test_{}.db", Uuid::now_v7()));
        Arc::new(Storage::open(&tmp).await.expect("open test db"))
    }

    fn test_backend(server: &MockServer) -> BackendClient {
        BackendClient::new(&BackendConfig {
            base_url: server.uri(),
            api_key_env: "SH_CORE_TEST_KEY_UNSET".into(),
            crawl_timeout_secs: 5,
            probe_timeout_secs: 2,
            poll_max_attempts: 3,
            poll_interval_ms: 10,
        })
        .expect("backend client")
    }

    fn test_config(max_pages: usize, batch_size: usize) -> CrawlerConfig {
        CrawlerConfig {
            max_depth: 2,
            max_pages,
            strategy: "auto".into(),
            batch_size,
            cool_off: std::time::Duration::from_millis(1),
            max_retries: 2,
            concurrency: 2,
        }
    }

    fn collect_events(orchestrator: &Orchestrator) -> Arc<Mutex<Vec<ProgressEvent>>> {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        orchestrator.events().on_any(move |event| {
            sink.lock().unwrap().push(event.clone());
        });
        seen
    }

    fn batch_started_sizes(events: &[ProgressEvent]) -> Vec<usize> {
        events
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::BatchStarted { size, .. } => Some(*size),
                _ => None,
            })
            .collect()
    }

    fn site_links(n: usize) -> Vec<String> {
        (0..n)
            .map(|i| format!("https://site.test/docs/page-{i}"))
            .collect()
    }

    #[tokio::test]
    async fn single_page_produces_one_completed_record() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "url": "https://site.test/a", "markdown": "hello" }]
            })))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let orchestrator = Orchestrator::new(
            test_backend(&server),
            None,
            storage.clone(),
            test_config(10, 5),
        );

        let request = CrawlRequest::single_page(Url::parse("https://site.test/a").unwrap());
        let summary = orchestrator
            .crawl(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, CrawlStatus::Completed);
        assert_eq!(summary.total_pages, 1);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.success_rate, 1.0);

        let stored = storage
            .get_record("https://site.test/a", 0)
            .await
            .unwrap()
            .expect("record persisted");
        assert_eq!(stored.content, "hello");
        assert_eq!(stored.status, PageStatus::Completed);
    }

    #[tokio::test]
    async fn single_page_failure_is_recorded_not_raised() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let orchestrator = Orchestrator::new(
            test_backend(&server),
            None,
            storage.clone(),
            test_config(10, 5),
        );

        let request = CrawlRequest::single_page(Url::parse("https://site.test/a").unwrap());
        let summary = orchestrator
            .crawl(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, CrawlStatus::Failed);
        assert_eq!(summary.failed, 1);
        let stored = storage
            .get_record("https://site.test/a", 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, PageStatus::Failed);
        assert!(stored.error.is_some());
    }

    #[tokio::test]
    async fn smart_site_caps_pages_and_batches() {
        // 12 discovered links, max_pages 10, batch_size 5 → exactly 10
        // prioritized addresses crawled in two batches of five.
        let server = MockServer::start().await;
        let stub = BackendStub::new(Some(site_links(12)), vec![]);
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(stub)
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let orchestrator = Orchestrator::new(
            test_backend(&server),
            None,
            storage.clone(),
            test_config(10, 5),
        );
        let events = collect_events(&orchestrator);

        let request = CrawlRequest::smart_site(Url::parse("https://site.test/").unwrap());
        let summary = orchestrator
            .crawl(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, CrawlStatus::Completed);
        assert_eq!(summary.total_pages, 10);
        assert_eq!(summary.completed, 10);
        assert_eq!(summary.success_rate, 1.0);
        assert_eq!(summary.first_address.as_deref(), Some("https://site.test/"));

        let events = events.lock().unwrap();
        assert_eq!(batch_started_sizes(&events), vec![5, 5]);
        assert_eq!(storage.count_records().await.unwrap(), 10);
    }

    #[tokio::test]
    async fn native_failure_falls_back_to_manual() {
        let server = MockServer::start().await;
        let stub = BackendStub::new(None, site_links(4));
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(stub)
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let orchestrator = Orchestrator::new(
            test_backend(&server),
            None,
            storage.clone(),
            test_config(10, 5),
        );
        let events = collect_events(&orchestrator);

        let request = CrawlRequest::smart_site(Url::parse("https://site.test/").unwrap());
        let summary = orchestrator
            .crawl(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, CrawlStatus::Completed);
        assert_eq!(summary.total_pages, 5); // seed + 4 manual links

        let events = events.lock().unwrap();
        let discovered = events
            .iter()
            .any(|e| matches!(e, ProgressEvent::LinksDiscovered { count: 4 }));
        assert!(discovered, "manual discovery should report 4 links");
    }

    #[tokio::test]
    async fn both_strategies_failing_is_strategy_exhausted() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let orchestrator =
            Orchestrator::new(test_backend(&server), None, storage, test_config(10, 5));
        let events = collect_events(&orchestrator);

        let request = CrawlRequest::smart_site(Url::parse("https://site.test/").unwrap());
        let err = orchestrator
            .crawl(&request, &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            HarvestError::StrategyExhausted { native, manual } => {
                assert!(native.contains("HTTP 500"));
                assert!(manual.contains("HTTP 500"));
            }
            other => panic!("expected StrategyExhausted, got {other}"),
        }

        let events = events.lock().unwrap();
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::StatusChanged {
                status: CrawlStatus::Failed
            }
        )));
        assert!(events
            .iter()
            .any(|e| matches!(e, ProgressEvent::CrawlError { .. })));
    }

    #[tokio::test]
    async fn cancellation_mid_run_stops_later_batches() {
        let server = MockServer::start().await;
        let cancel = CancellationToken::new();
        let mut stub = BackendStub::new(Some(site_links(8)), vec![]);
        stub.cancel_on_batch = Some((2, cancel.clone()));
        let batch_calls = stub.batch_calls.clone();
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(stub)
            .mount(&server)
            .await;

        let storage = test_storage().await;
        let orchestrator = Orchestrator::new(
            test_backend(&server),
            None,
            storage.clone(),
            test_config(9, 3),
        );
        let events = collect_events(&orchestrator);

        let request = CrawlRequest::smart_site(Url::parse("https://site.test/").unwrap());
        let summary = orchestrator.crawl(&request, &cancel).await.unwrap();

        // Cancelled during the second batch: it finishes but is discarded,
        // and the third batch never starts.
        assert_eq!(summary.status, CrawlStatus::Cancelled);
        assert_eq!(summary.total_pages, 3);
        assert_eq!(batch_calls.load(Ordering::SeqCst), 2);

        let events = events.lock().unwrap();
        assert_eq!(batch_started_sizes(&events), vec![3, 3]);
        assert!(events.iter().any(|e| matches!(
            e,
            ProgressEvent::StatusChanged {
                status: CrawlStatus::Cancelled
            }
        )));

        // First batch's records reached storage before cancellation.
        for record in storage.list_records().await.unwrap().iter().take(3) {
            assert_eq!(record.status, PageStatus::Completed);
        }
        assert!(storage.count_records().await.unwrap() >= 3);
    }

    #[tokio::test]
    async fn embedding_outage_still_persists_content() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "url": "https://site.test/a", "markdown": "page body" }]
            })))
            .mount(&server)
            .await;
        // Embedding backend is down.
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        unsafe { std::env::set_var("SH_CORE_EMBED_KEY", "secret") };
        let embedder = EmbeddingClient::new(&siteharvest_shared::EmbeddingConfig {
            endpoint: format!("{}/embed", server.uri()),
            api_key_env: "SH_CORE_EMBED_KEY".into(),
            model: "test-model".into(),
        })
        .unwrap();

        let storage = test_storage().await;
        let orchestrator = Orchestrator::new(
            test_backend(&server),
            Some(embedder),
            storage.clone(),
            test_config(10, 5),
        );

        let request = CrawlRequest::single_page(Url::parse("https://site.test/a").unwrap());
        let summary = orchestrator
            .crawl(&request, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.status, CrawlStatus::Completed);
        let stored = storage
            .get_record("https://site.test/a", 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.content, "page body");
        assert!(stored.embedding.is_none());
    }

    #[tokio::test]
    async fn embedding_success_attaches_vector() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [{ "url": "https://site.test/a", "markdown": "page body" }]
            })))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": [{ "embedding": [0.25, 0.75] }]
            })))
            .mount(&server)
            .await;

        unsafe { std::env::set_var("SH_CORE_EMBED_KEY_OK", "secret") };
        let embedder = EmbeddingClient::new(&siteharvest_shared::EmbeddingConfig {
            endpoint: format!("{}/embed", server.uri()),
            api_key_env: "SH_CORE_EMBED_KEY_OK".into(),
            model: "test-model".into(),
        })
        .unwrap();

        let storage = test_storage().await;
        let orchestrator = Orchestrator::new(
            test_backend(&server),
            Some(embedder),
            storage.clone(),
            test_config(10, 5),
        );

        let request = CrawlRequest::single_page(Url::parse("https://site.test/a").unwrap());
        orchestrator
            .crawl(&request, &CancellationToken::new())
            .await
            .unwrap();

        let stored = storage
            .get_record("https://site.test/a", 0)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.embedding, Some(vec![0.25, 0.75]));
    }

    #[tokio::test]
    async fn pre_cancelled_token_short_circuits() {
        let server = MockServer::start().await;
        let storage = test_storage().await;
        let orchestrator =
            Orchestrator::new(test_backend(&server), None, storage, test_config(10, 5));

        let cancel = CancellationToken::new();
        cancel.cancel();

        let request = CrawlRequest::smart_site(Url::parse("https://site.test/").unwrap());
        let summary = orchestrator.crawl(&request, &cancel).await.unwrap();

        assert_eq!(summary.status, CrawlStatus::Cancelled);
        assert_eq!(summary.total_pages, 0);
        // No requests ever left the orchestrator.
        assert!(server.received_requests().await.unwrap().is_empty());
    }
}
