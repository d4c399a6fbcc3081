//! Client for OpenAI/Voyage compatible `/embeddings` endpoints.
//!
//! Voyage distinguishes `input_type: "document"` for indexing from
//! `input_type: "query"` for searching; OpenAI ignores the distinction and
//! the field is omitted for it.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;
use trawl_core::{EmbeddingConfig, TrawlError};

use super::{check_batch, EmbedKind, Embedder};

const VOYAGE_BASE_URL: &str = "https://api.voyageai.com/v1";
const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const BATCH_DELAY_MS: u64 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Provider {
    Voyage,
    OpenAi,
}

impl Provider {
    fn parse(name: &str) -> Result<Self, TrawlError> {
        match name {
            "voyage" => Ok(Provider::Voyage),
            "openai" => Ok(Provider::OpenAi),
            other => Err(TrawlError::Config(format!(
                "'{other}' is not an HTTP embedding provider"
            ))),
        }
    }

    fn base_url(self) -> &'static str {
        match self {
            Provider::Voyage => VOYAGE_BASE_URL,
            Provider::OpenAi => OPENAI_BASE_URL,
        }
    }

    fn key_var(self) -> &'static str {
        match self {
            Provider::Voyage => "VOYAGE_API_KEY",
            Provider::OpenAi => "OPENAI_API_KEY",
        }
    }
}

/// HTTP embedding client.
///
/// # Examples
///
/// ```
/// use trawl_index::embedding::{Embedder, HttpEmbedder};
///
/// let client = HttpEmbedder::new("test-key");
/// assert_eq!(client.model(), "voyage-code-3");
/// ```
pub struct HttpEmbedder {
    client: reqwest::Client,
    provider: Provider,
    api_key: String,
    base_url: String,
    model: String,
    batch_size: usize,
}

impl std::fmt::Debug for HttpEmbedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpEmbedder")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    input_type: Option<&'static str>,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDataItem>,
}

#[derive(Deserialize)]
struct EmbedDataItem {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

impl HttpEmbedder {
    /// A Voyage client with default settings and the given API key.
    pub fn new(api_key: &str) -> Self {
        let defaults = EmbeddingConfig::default();
        Self {
            client: reqwest::Client::new(),
            provider: Provider::Voyage,
            api_key: api_key.to_string(),
            base_url: VOYAGE_BASE_URL.to_string(),
            model: defaults.model,
            batch_size: defaults.batch_size,
        }
    }

    /// Build a client from an [`EmbeddingConfig`].
    ///
    /// The API key comes from the config, then `TRAWL_EMBEDDING_API_KEY`,
    /// then the provider's own variable (`VOYAGE_API_KEY` or `OPENAI_API_KEY`).
    ///
    /// # Errors
    ///
    /// Returns [`TrawlError::Config`] if no API key is available.
    pub fn with_config(config: &EmbeddingConfig) -> Result<Self, TrawlError> {
        let provider = Provider::parse(&config.provider)?;
        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var("TRAWL_EMBEDDING_API_KEY").ok())
            .or_else(|| std::env::var(provider.key_var()).ok())
            .ok_or_else(|| {
                TrawlError::Config(format!(
                    "embedding API key not found: set embedding.api_key in .trawl.toml or {}",
                    provider.key_var()
                ))
            })?;

        Ok(Self {
            client: reqwest::Client::new(),
            provider,
            api_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| provider.base_url().to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config.model.clone(),
            batch_size: config.batch_size.max(1),
        })
    }

    fn build_request<'a>(&'a self, texts: &'a [String], kind: EmbedKind) -> EmbedRequest<'a> {
        EmbedRequest {
            model: &self.model,
            input: texts,
            input_type: match self.provider {
                Provider::Voyage => Some(kind.as_str()),
                Provider::OpenAi => None,
            },
        }
    }

    async fn embed_chunk(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, TrawlError> {
        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&self.build_request(texts, kind))
            .send()
            .await
            .map_err(|e| TrawlError::EmbedderUnavailable(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "unable to read response body".into());
            return Err(TrawlError::EmbedderUnavailable(format!(
                "embedding API returned {status}: {body}"
            )));
        }

        let parsed: EmbedResponse = response.json().await.map_err(|e| {
            TrawlError::EmbedderUnavailable(format!("failed to parse response: {e}"))
        })?;
        check_batch(into_ordered(parsed), texts.len())
    }
}

/// Vectors in request order, honouring `index` when the API supplies it.
fn into_ordered(response: EmbedResponse) -> Vec<Vec<f32>> {
    let mut items = response.data;
    if items.iter().all(|item| item.index.is_some()) {
        items.sort_by_key(|item| item.index);
    }
    items.into_iter().map(|item| item.embedding).collect()
}

#[async_trait]
impl Embedder for HttpEmbedder {
    async fn embed(
        &self,
        texts: &[String],
        kind: EmbedKind,
    ) -> Result<Vec<Vec<f32>>, TrawlError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut all = Vec::with_capacity(texts.len());
        for (i, batch) in texts.chunks(self.batch_size).enumerate() {
            if i > 0 {
                tokio::time::sleep(tokio::time::Duration::from_millis(BATCH_DELAY_MS)).await;
            }
            debug!(batch = i, size = batch.len(), model = %self.model, "embedding batch");
            all.extend(self.embed_chunk(batch, kind).await?);
        }
        Ok(all)
    }

    fn model(&self) -> &str {
        &self.model
    }
}
