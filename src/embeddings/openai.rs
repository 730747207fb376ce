use crate::embeddings::Embedder;
use crate::error::{HarnessError, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Maximum inputs per request accepted by the embeddings endpoint
const MAX_BATCH_SIZE: usize = 2048;

/// Request structure for OpenAI embeddings API
#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<usize>,
}

/// Response structure from OpenAI embeddings API
#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

/// Individual embedding data in API response
#[derive(Deserialize)]
struct EmbeddingData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

/// Failed request, with whether a retry may succeed (429 and 5xx)
struct RequestFailure {
    message: String,
    retryable: bool,
}

/// OpenAI embeddings client
///
/// Splits large inputs into batches, retries rate limits and server errors
/// with exponential backoff, and enforces a per-request timeout.
pub struct OpenAIEmbedder {
    client: Client,
    api_key: String,
    model: String,
    base_url: String,
    batch_size: usize,
    max_retries: usize,
    dimensions: Option<usize>,
}

impl OpenAIEmbedder {
    /// Create a new OpenAI embedder
    ///
    /// # Arguments
    ///
    /// * `api_key` - OpenAI API key
    /// * `model` - Model name (e.g., "text-embedding-3-small")
    /// * `batch_size` - Maximum number of texts per API request (capped at 2048)
    /// * `timeout` - Per-request timeout
    pub fn new(api_key: String, model: String, batch_size: usize, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| HarnessError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            api_key,
            model,
            base_url: DEFAULT_BASE_URL.to_string(),
            batch_size: batch_size.clamp(1, MAX_BATCH_SIZE),
            max_retries: 3,
            dimensions: None,
        })
    }

    /// Point the client at a compatible endpoint (proxy, local gateway).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_max_retries(mut self, max_retries: usize) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Request `dimensions` outputs from the model and reject responses whose
    /// vectors have any other length.
    pub fn with_dimensions(mut self, dimensions: Option<usize>) -> Self {
        self.dimensions = dimensions;
        self
    }

    /// Make a single API request
    async fn request(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, RequestFailure> {
        let request = EmbeddingRequest {
            model: &self.model,
            input: texts,
            dimensions: self.dimensions,
        };

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| RequestFailure {
                message: format!("Network error: {}", e),
                retryable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();

        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unable to read error response".to_string());

            return Err(RequestFailure {
                message: format!("OpenAI API error {}: {}", status, body),
                retryable: status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error(),
            });
        }

        let mut result: EmbeddingResponse = response.json().await.map_err(|e| RequestFailure {
            message: format!("Failed to parse response: {}", e),
            retryable: false,
        })?;

        result.data.sort_by_key(|d| d.index);
        Ok(result.data.into_iter().map(|d| d.embedding).collect())
    }

    /// One batch with retry and response validation
    async fn embed_chunk(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let start = std::time::Instant::now();
        let mut attempt = 0;
        let mut delay = Duration::from_secs(1);

        let embeddings = loop {
            match self.request(texts).await {
                Ok(embeddings) => break embeddings,
                Err(failure) if failure.retryable && attempt < self.max_retries => {
                    log::warn!(
                        "Retry {}/{} after error: {}",
                        attempt + 1,
                        self.max_retries,
                        failure.message
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(failure) => return Err(HarnessError::EmbeddingUnavailable(failure.message)),
            }
        };

        log::debug!(
            "Embedding API call for {} texts took {:?} (attempt {})",
            texts.len(),
            start.elapsed(),
            attempt + 1
        );

        if embeddings.len() != texts.len() {
            return Err(HarnessError::EmbeddingUnavailable(format!(
                "expected {} embeddings, got {}",
                texts.len(),
                embeddings.len()
            )));
        }
        if let Some(expected) = self.dimensions {
            if let Some(bad) = embeddings.iter().find(|e| e.len() != expected) {
                return Err(HarnessError::EmbeddingUnavailable(format!(
                    "Unexpected embedding dimension: expected {}, got {}",
                    expected,
                    bad.len()
                )));
            }
        }

        Ok(embeddings)
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(self.batch_size) {
            all_embeddings.extend(self.embed_chunk(chunk).await?);
        }
        Ok(all_embeddings)
    }
}
