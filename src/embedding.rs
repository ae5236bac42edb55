//! Embedding provider abstraction and implementations.
//!
//! Defines the [`Embedder`] trait and concrete implementations:
//! - **[`DisabledProvider`]**: always unavailable; used when embeddings are not configured.
//! - **[`OllamaProvider`]**: calls a local Ollama instance's `/api/embed` endpoint.
//! - **[`OpenAIProvider`]**: calls the OpenAI embeddings API.
//!
//! Every network call is bounded by `embedding.timeout_secs`. A connection
//! failure or timeout is [`EmbedError::Unavailable`]; a reachable provider
//! that returns an error or a malformed vector is [`EmbedError::Provider`].
//!
//! # Retry Strategy
//!
//! With `embedding.max_retries > 0`, HTTP 429, 5xx, and network errors are
//! retried with exponential backoff (1s, 2s, 4s, ... capped at 32s). Other 4xx
//! responses fail immediately. The default is no retry.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::config::EmbeddingConfig;
use crate::error::StoreError;

const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";
const DEFAULT_OLLAMA_MODEL: &str = "nomic-embed-text";
const DEFAULT_OPENAI_URL: &str = "https://api.openai.com/v1";

#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("embedding provider is disabled")]
    Disabled,

    #[error("embedding provider unavailable: {0}")]
    Unavailable(String),

    #[error("embedding provider error: {0}")]
    Provider(String),
}

impl From<EmbedError> for StoreError {
    fn from(e: EmbedError) -> Self {
        match e {
            EmbedError::Disabled => {
                StoreError::ProviderUnavailable("embedding provider is disabled".to_string())
            }
            EmbedError::Unavailable(msg) => StoreError::ProviderUnavailable(msg),
            EmbedError::Provider(msg) => StoreError::Provider(msg),
        }
    }
}

/// A text-to-vector service.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Returns the model identifier (e.g. `"nomic-embed-text"`).
    fn model_name(&self) -> &str;
    /// Returns the embedding vector dimensionality.
    fn dims(&self) -> usize;
    /// Cheap reachability probe, bounded by the configured timeout.
    async fn is_available(&self) -> bool;
    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError>;
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl Embedder for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn is_available(&self) -> bool {
        false
    }
    async fn embed(&self, _text: &str) -> Result<Vec<f64>, EmbedError> {
        Err(EmbedError::Disabled)
    }
}

// ============ Ollama Provider ============

/// Calls `POST /api/embed` on the configured Ollama URL (default: `http://localhost:11434`).
pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        Ok(Self {
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_MODEL.to_string()),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.max_retries,
            client: build_client(config)?,
        })
    }
}

#[async_trait]
impl Embedder for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn is_available(&self) -> bool {
        match self.client.get(format!("{}/api/tags", self.url)).send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        }
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": text,
        });
        let request = self.client.post(format!("{}/api/embed", self.url)).json(&body);
        let json = send_with_retry(request, self.max_retries, "Ollama").await?;
        let vector = parse_ollama_response(&json)?;
        check_dims(vector, self.dims)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<f64>, EmbedError> {
    let first = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .and_then(|e| e.first())
        .ok_or_else(|| {
            EmbedError::Provider("Invalid Ollama response: missing embeddings array".to_string())
        })?;
    parse_vector(first, "Ollama")
}

// ============ OpenAI Provider ============

/// Calls `POST /v1/embeddings`. Requires `OPENAI_API_KEY` at call time.
pub struct OpenAIProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    client: reqwest::Client,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbedError> {
        let model = config.model.clone().ok_or_else(|| {
            EmbedError::Provider("embedding.model required for OpenAI provider".to_string())
        })?;
        Ok(Self {
            model,
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            max_retries: config.max_retries,
            client: build_client(config)?,
        })
    }

    fn api_key() -> Result<String, EmbedError> {
        std::env::var("OPENAI_API_KEY")
            .map_err(|_| EmbedError::Unavailable("OPENAI_API_KEY not set".to_string()))
    }
}

#[async_trait]
impl Embedder for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn is_available(&self) -> bool {
        Self::api_key().is_ok()
    }

    async fn embed(&self, text: &str) -> Result<Vec<f64>, EmbedError> {
        let api_key = Self::api_key()?;
        let body = serde_json::json!({
            "model": self.model,
            "input": [text],
        });
        let request = self
            .client
            .post(format!("{}/embeddings", self.url))
            .header("Authorization", format!("Bearer {}", api_key))
            .json(&body);
        let json = send_with_retry(request, self.max_retries, "OpenAI").await?;
        let vector = parse_openai_response(&json)?;
        check_dims(vector, self.dims)
    }
}

fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<f64>, EmbedError> {
    let first = json
        .get("data")
        .and_then(|d| d.as_array())
        .and_then(|d| d.first())
        .and_then(|item| item.get("embedding"))
        .ok_or_else(|| {
            EmbedError::Provider("Invalid OpenAI response: missing data[0].embedding".to_string())
        })?;
    parse_vector(first, "OpenAI")
}

// ============ Shared plumbing ============

fn build_client(config: &EmbeddingConfig) -> Result<reqwest::Client, EmbedError> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .connect_timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| EmbedError::Provider(format!("failed to build HTTP client: {}", e)))
}

async fn send_with_retry(
    request: reqwest::RequestBuilder,
    max_retries: u32,
    provider: &str,
) -> Result<serde_json::Value, EmbedError> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let Some(req) = request.try_clone() else {
            return Err(EmbedError::Provider("request body is not retryable".to_string()));
        };

        match req.send().await {
            Ok(response) => {
                let status = response.status();

                if status.is_success() {
                    return response.json().await.map_err(|e| {
                        EmbedError::Provider(format!("{} returned invalid JSON: {}", provider, e))
                    });
                }

                let body_text = response.text().await.unwrap_or_default();
                let err = EmbedError::Provider(format!(
                    "{} API error {}: {}",
                    provider, status, body_text
                ));
                // Rate limited or server error: retry
                if status.as_u16() == 429 || status.is_server_error() {
                    last_err = Some(err);
                    continue;
                }
                return Err(err);
            }
            Err(e) => {
                last_err = Some(EmbedError::Unavailable(format!(
                    "{} connection error: {}",
                    provider, e
                )));
            }
        }
    }

    Err(last_err.unwrap_or_else(|| {
        EmbedError::Unavailable(format!("{} embedding failed after retries", provider))
    }))
}

fn parse_vector(value: &serde_json::Value, provider: &str) -> Result<Vec<f64>, EmbedError> {
    value
        .as_array()
        .ok_or_else(|| {
            EmbedError::Provider(format!("Invalid {} response: embedding is not an array", provider))
        })?
        .iter()
        .map(|v| {
            v.as_f64().ok_or_else(|| {
                EmbedError::Provider(format!("Invalid {} response: non-numeric component", provider))
            })
        })
        .collect()
}

fn check_dims(vector: Vec<f64>, dims: usize) -> Result<Vec<f64>, EmbedError> {
    if vector.len() != dims {
        return Err(EmbedError::Provider(format!(
            "provider returned {} dimensions, expected {}",
            vector.len(),
            dims
        )));
    }
    Ok(vector)
}

/// Create the appropriate [`Embedder`] based on configuration.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledProvider`] |
/// | `"ollama"` | [`OllamaProvider`] |
/// | `"openai"` | [`OpenAIProvider`] |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn Embedder>, EmbedError> {
    match config.provider.as_str() {
        "disabled" => Ok(Box::new(DisabledProvider)),
        "ollama" => Ok(Box::new(OllamaProvider::new(config)?)),
        "openai" => Ok(Box::new(OpenAIProvider::new(config)?)),
        other => Err(EmbedError::Provider(format!(
            "Unknown embedding provider: {}",
            other
        ))),
    }
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, vectors of different lengths, or when
/// either vector is all zeros.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot / (norm_a.sqrt() * norm_b.sqrt())
}
