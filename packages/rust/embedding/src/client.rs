//! Remote embedding client with chunk-and-average handling for oversized
//! documents.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use siteharvest_shared::{EmbeddingConfig, HarvestError, Result, credential};

use crate::chunker::{chunk_text, estimate_tokens, truncate_to_estimate};

/// Chunking bound for a single embedding request.
pub const SOFT_TOKEN_LIMIT: usize = 4500;

/// Safety ceiling; a lone chunk estimating above this is truncated before
/// the remote call.
pub const HARD_TOKEN_CEILING: usize = 7000;

/// Timeout for one embedding request.
const REQUEST_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

// ---------------------------------------------------------------------------
// EmbeddingClient
// ---------------------------------------------------------------------------

/// Client for the remote embedding backend. All vectors from one deployment
/// share dimensionality, which the averaging step relies on.
#[derive(Debug)]
pub struct EmbeddingClient {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    model: String,
}

impl EmbeddingClient {
    /// Build a client from config. Fails with `NotConfigured` when the
    /// endpoint or credential is missing.
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if config.endpoint.is_empty() {
            return Err(HarvestError::NotConfigured(
                "embedding endpoint not set".into(),
            ));
        }
        let api_key = credential(&config.api_key_env).ok_or_else(|| {
            HarvestError::NotConfigured(format!(
                "embedding credential missing; set the {} environment variable",
                config.api_key_env
            ))
        })?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(|e| HarvestError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            api_key,
            model: config.model.clone(),
        })
    }

    /// Embed `text`, chunking when oversized and returning the component-wise
    /// arithmetic mean of the per-chunk vectors. Any remote failure fails the
    /// whole operation; no partial mean is returned.
    #[instrument(skip_all, fields(len = text.len()))]
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let chunks = chunk_text(text, SOFT_TOKEN_LIMIT);

        match chunks.len() {
            0 => Err(HarvestError::Embedding("cannot embed empty text".into())),
            1 => {
                let mut piece = chunks.into_iter().next().expect("checked length");
                if estimate_tokens(&piece) > HARD_TOKEN_CEILING {
                    warn!(
                        estimate = estimate_tokens(&piece),
                        ceiling = HARD_TOKEN_CEILING,
                        "truncating oversized chunk before embedding"
                    );
                    piece = truncate_to_estimate(&piece, HARD_TOKEN_CEILING);
                }
                self.request_embedding(&piece).await
            }
            n => {
                debug!(chunks = n, "averaging chunk embeddings");
                let mut vectors = Vec::with_capacity(n);
                for chunk in &chunks {
                    vectors.push(self.request_embedding(chunk).await?);
                }
                average_vectors(&vectors)
            }
        }
    }

    /// Embed each text in order. Fails on the first failure.
    pub async fn embed_many(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut vectors = Vec::with_capacity(texts.len());
        for text in texts {
            vectors.push(self.embed(text).await?);
        }
        Ok(vectors)
    }

    async fn request_embedding(&self, text: &str) -> Result<Vec<f32>> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: text,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&request)
            .send()
            .await
            .map_err(|e| HarvestError::Embedding(format!("request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(HarvestError::Embedding(format!(
                "backend returned HTTP {status}: {body}"
            )));
        }

        let parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| HarvestError::Embedding(format!("invalid response body: {e}")))?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| HarvestError::Embedding("response carried no embedding".into()))
    }
}

/// Component-wise arithmetic mean over vectors of one dimensionality.
pub fn average_vectors(vectors: &[Vec<f32>]) -> Result<Vec<f32>> {
    let Some(first) = vectors.first() else {
        return Err(HarvestError::Embedding("no vectors to average".into()));
    };
    let dim = first.len();
    if vectors.iter().any(|v| v.len() != dim) {
        return Err(HarvestError::Embedding(
            "chunk vectors differ in dimensionality".into(),
        ));
    }

    let mut mean = vec![0.0f32; dim];
    for vector in vectors {
        for (slot, component) in mean.iter_mut().zip(vector) {
            *slot += component;
        }
    }
    let count = vectors.len() as f32;
    for slot in &mut mean {
        *slot /= count;
    }
    Ok(mean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_config(endpoint: String, key_env: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            endpoint,
            api_key_env: key_env.into(),
            model: "test-model".into(),
        }
    }

    fn embedding_body(vector: &[f32]) -> serde_json::Value {
        serde_json::json!({ "data": [{ "embedding": vector }] })
    }

    #[test]
    fn missing_endpoint_is_not_configured() {
        let config = test_config(String::new(), "SH_EMBED_TEST_KEY_A");
        let err = EmbeddingClient::new(&config).unwrap_err();
        assert!(matches!(err, HarvestError::NotConfigured(_)));
    }

    #[test]
    fn missing_credential_is_not_configured() {
        let config = test_config(
            "http://localhost:9/embed".into(),
            "SH_EMBED_TEST_KEY_UNSET_B",
        );
        let err = EmbeddingClient::new(&config).unwrap_err();
        assert!(matches!(err, HarvestError::NotConfigured(_)));
    }

    #[test]
    fn average_is_component_wise_mean() {
        let mean = average_vectors(&[vec![1.0, 0.0, 3.0], vec![0.0, 2.0, 1.0]]).unwrap();
        assert_eq!(mean, vec![0.5, 1.0, 2.0]);
    }

    #[test]
    fn average_rejects_mismatched_dimensions() {
        let err = average_vectors(&[vec![1.0, 0.0], vec![1.0]]).unwrap_err();
        assert!(matches!(err, HarvestError::Embedding(_)));
    }

    #[tokio::test]
    async fn embeds_short_text_with_one_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.1, 0.2])))
            .expect(1)
            .mount(&server)
            .await;

        unsafe { std::env::set_var("SH_EMBED_TEST_KEY_C", "secret") };
        let config = test_config(format!("{}/embed", server.uri()), "SH_EMBED_TEST_KEY_C");
        let client = EmbeddingClient::new(&config).unwrap();

        let vector = client.embed("a short document").await.unwrap();
        assert_eq!(vector, vec![0.1, 0.2]);
    }

    #[tokio::test]
    async fn oversized_text_averages_chunk_vectors() {
        let server = MockServer::start().await;

        // Two distinguishable paragraphs, each above half the soft limit so
        // they land in separate chunks.
        let filler = "lorem ipsum dolor sit amet consectetur ".repeat(400);
        let text = format!("alphaalpha {filler}\n\nbetabeta {filler}");
        assert!(chunk_text(&text, SOFT_TOKEN_LIMIT).len() > 1);

        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_string_contains("alphaalpha"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[1.0, 0.0])))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .and(body_string_contains("betabeta"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.0, 1.0])))
            .mount(&server)
            .await;

        unsafe { std::env::set_var("SH_EMBED_TEST_KEY_D", "secret") };
        let config = test_config(format!("{}/embed", server.uri()), "SH_EMBED_TEST_KEY_D");
        let client = EmbeddingClient::new(&config).unwrap();

        let vector = client.embed(&text).await.unwrap();
        assert_eq!(vector, vec![0.5, 0.5]);
    }

    #[tokio::test]
    async fn embed_many_maps_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(200).set_body_json(embedding_body(&[0.5])))
            .expect(2)
            .mount(&server)
            .await;

        unsafe { std::env::set_var("SH_EMBED_TEST_KEY_G", "secret") };
        let config = test_config(format!("{}/embed", server.uri()), "SH_EMBED_TEST_KEY_G");
        let client = EmbeddingClient::new(&config).unwrap();

        let vectors = client
            .embed_many(&["first".into(), "second".into()])
            .await
            .unwrap();
        assert_eq!(vectors, vec![vec![0.5], vec![0.5]]);
    }

    #[tokio::test]
    async fn remote_failure_fails_the_whole_operation() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/embed"))
            .respond_with(ResponseTemplate::new(500).set_body_string("backend down"))
            .mount(&server)
            .await;

        unsafe { std::env::set_var("SH_EMBED_TEST_KEY_E", "secret") };
        let config = test_config(format!("{}/embed", server.uri()), "SH_EMBED_TEST_KEY_E");
        let client = EmbeddingClient::new(&config).unwrap();

        let err = client.embed("some text").await.unwrap_err();
        assert!(matches!(err, HarvestError::Embedding(_)));
    }

    #[tokio::test]
    async fn empty_text_is_an_embedding_error() {
        unsafe { std::env::set_var("SH_EMBED_TEST_KEY_F", "secret") };
        let config = test_config("http://localhost:9/embed".into(), "SH_EMBED_TEST_KEY_F");
        let client = EmbeddingClient::new(&config).unwrap();

        let err = client.embed("   ").await.unwrap_err();
        assert!(matches!(err, HarvestError::Embedding(_)));
    }
}
