//! Smart-site discovery strategies.
//!
//! The fallback chain is an explicit ordered list of named strategies with a
//! single signature, tried in sequence with errors accumulated — no nested
//! try/catch, and each strategy is testable in isolation. There is no
//! same-origin scraping shortcut after the network strategies: the browser's
//! cross-origin restrictions make one impossible, so the chain ends here.

use serde_json::json;
use tracing::{debug, info};
use url::Url;

use siteharvest_backend::{BackendClient, raw_variant};
use siteharvest_shared::{CrawlerConfig, HarvestError, Result};

/// One way of turning a seed address into candidate links.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiscoveryStrategy {
    /// Ask the backend to fetch the seed page and report its internal links
    /// in the same call.
    NativeDeepCrawl,
    /// Fetch the seed page alone and extract links from its HTML ourselves.
    ManualDiscovery,
}

impl DiscoveryStrategy {
    /// Strategy name for logs and error accumulation.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NativeDeepCrawl => "native",
            Self::ManualDiscovery => "manual",
        }
    }

    /// The chain to attempt for a strategy tag, in order.
    pub fn chain_for(tag: &str) -> Vec<DiscoveryStrategy> {
        match tag {
            "native" => vec![Self::NativeDeepCrawl],
            "manual" => vec![Self::ManualDiscovery],
            _ => vec![Self::NativeDeepCrawl, Self::ManualDiscovery],
        }
    }

    /// Run this strategy, returning the raw links found on the seed page.
    pub async fn discover(
        &self,
        backend: &BackendClient,
        seed: &Url,
        config: &CrawlerConfig,
    ) -> Result<Vec<String>> {
        match self {
            Self::NativeDeepCrawl => native_deep_crawl(backend, seed, config).await,
            Self::ManualDiscovery => manual_discovery(backend, seed, config).await,
        }
    }
}

/// Strategy (a): one backend call for the seed, links reported by the backend.
async fn native_deep_crawl(
    backend: &BackendClient,
    seed: &Url,
    config: &CrawlerConfig,
) -> Result<Vec<String>> {
    let crawler_config = json!({
        "cache_mode": "bypass",
        "include_links": true,
        "max_depth": config.max_depth,
        "semaphore_count": config.concurrency,
    });

    let results = backend.crawl_urls(&[seed.to_string()], crawler_config).await?;
    let first = results
        .first()
        .ok_or_else(|| HarvestError::validation("backend returned no result for the seed"))?;

    if !first.success {
        return Err(HarvestError::Network(
            first
                .error_message
                .clone()
                .unwrap_or_else(|| "backend reported seed crawl failure".into()),
        ));
    }

    let links = first.internal_links();
    if links.is_empty() {
        // Backend variants without link reporting reply without the field;
        // treat that as "combined call unsupported" and fall through.
        return Err(HarvestError::validation(
            "backend reported no internal links for the seed",
        ));
    }

    info!(links = links.len(), "native deep crawl discovered links");
    Ok(links)
}

/// Strategy (b): fetch the seed alone, extract links from its HTML.
async fn manual_discovery(
    backend: &BackendClient,
    seed: &Url,
    config: &CrawlerConfig,
) -> Result<Vec<String>> {
    let crawler_config = json!({
        "cache_mode": "bypass",
        "semaphore_count": config.concurrency,
    });

    let results = backend.crawl_urls(&[seed.to_string()], crawler_config).await?;
    let first = results
        .first()
        .ok_or_else(|| HarvestError::validation("backend returned no result for the seed"))?;

    if !first.success {
        return Err(HarvestError::Network(
            first
                .error_message
                .clone()
                .unwrap_or_else(|| "backend reported seed crawl failure".into()),
        ));
    }

    let html = raw_variant(first)
        .ok_or_else(|| HarvestError::validation("seed page carried no HTML to extract from"))?;

    let links = siteharvest_discovery::extract_links(&html, seed);
    debug!(links = links.len(), "manual discovery extracted links");
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use siteharvest_shared::BackendConfig;

    fn backend(server: &MockServer) -> BackendClient {
        BackendClient::new(&BackendConfig {
            base_url: server.uri(),
            api_key_env: "SH_STRATEGY_TEST_KEY_UNSET".into(),
            crawl_timeout_secs: 5,
            probe_timeout_secs: 2,
            poll_max_attempts: 3,
            poll_interval_ms: 10,
        })
        .unwrap()
    }

    fn crawler_config() -> CrawlerConfig {
        CrawlerConfig {
            max_depth: 2,
            max_pages: 10,
            strategy: "auto".into(),
            batch_size: 5,
            cool_off: std::time::Duration::from_millis(1),
            max_retries: 1,
            concurrency: 2,
        }
    }

    #[test]
    fn chain_order_matches_tag() {
        assert_eq!(
            DiscoveryStrategy::chain_for("auto"),
            vec![
                DiscoveryStrategy::NativeDeepCrawl,
                DiscoveryStrategy::ManualDiscovery
            ]
        );
        assert_eq!(
            DiscoveryStrategy::chain_for("native"),
            vec![DiscoveryStrategy::NativeDeepCrawl]
        );
        assert_eq!(
            DiscoveryStrategy::chain_for("manual"),
            vec![DiscoveryStrategy::ManualDiscovery]
        );
    }

    #[tokio::test]
    async fn native_returns_backend_reported_links() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .and(body_string_contains("include_links"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "url": "https://example.com/",
                    "markdown": "# Seed",
                    "links": { "internal": ["https://example.com/a", "https://example.com/b"] }
                }]
            })))
            .mount(&server)
            .await;

        let seed = Url::parse("https://example.com/").unwrap();
        let links = DiscoveryStrategy::NativeDeepCrawl
            .discover(&backend(&server), &seed, &crawler_config())
            .await
            .unwrap();

        assert_eq!(links, vec!["https://example.com/a", "https://example.com/b"]);
    }

    #[tokio::test]
    async fn native_without_links_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{ "url": "https://example.com/", "markdown": "# Seed" }]
            })))
            .mount(&server)
            .await;

        let seed = Url::parse("https://example.com/").unwrap();
        let err = DiscoveryStrategy::NativeDeepCrawl
            .discover(&backend(&server), &seed, &crawler_config())
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Validation { .. }));
    }

    #[tokio::test]
    async fn manual_extracts_links_from_seed_html() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{
                    "url": "https://example.com/",
                    "html": "<html><body><a href=\"/guide\">Guide</a><a href=\"/api\">API</a></body></html>"
                }]
            })))
            .mount(&server)
            .await;

        let seed = Url::parse("https://example.com/").unwrap();
        let links = DiscoveryStrategy::ManualDiscovery
            .discover(&backend(&server), &seed, &crawler_config())
            .await
            .unwrap();

        assert_eq!(
            links,
            vec!["https://example.com/guide", "https://example.com/api"]
        );
    }

    #[tokio::test]
    async fn manual_without_html_is_an_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/crawl"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [{ "url": "https://example.com/", "markdown": "# Only markdown" }]
            })))
            .mount(&server)
            .await;

        let seed = Url::parse("https://example.com/").unwrap();
        let err = DiscoveryStrategy::ManualDiscovery
            .discover(&backend(&server), &seed, &crawler_config())
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::Validation { .. }));
    }
}
