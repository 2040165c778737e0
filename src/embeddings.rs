//! Embedding Client
//!
//! HTTP client for an OpenAI-compatible embeddings endpoint. The turn text
//! is embedded before logging so the message log doubles as a similarity
//! index. Includes an availability probe and an LRU cache for query
//! embeddings to avoid re-embedding repeated text.

use anyhow::{Context, Result};
use moka::future::Cache;
use serde::Deserialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

/// Embedding client configuration
#[derive(Debug, Clone)]
pub struct EmbeddingConfig {
    /// API base URL (e.g. `https://api.openai.com/v1`)
    pub api_base: String,
    /// Bearer token, if the endpoint requires one
    pub api_key: Option<String>,
    /// Embedding model name
    pub model: String,
    /// Request timeout
    pub timeout: Duration,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            api_base: std::env::var("OPENAI_API_BASE")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
            model: std::env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Embedding generator with query caching
pub struct EmbeddingClient {
    config: EmbeddingConfig,
    client: reqwest::Client,
    available: AtomicBool,
    /// LRU cache for query embeddings (1000 entries, 1 hour TTL)
    cache: Cache<String, Vec<f32>>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

impl EmbeddingClient {
    pub fn new(config: EmbeddingConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .context("Failed to create HTTP client")?;

        let cache = Cache::builder()
            .max_capacity(1000)
            .time_to_live(Duration::from_secs(3600))
            .build();

        Ok(Self {
            config,
            client,
            available: AtomicBool::new(true),
            cache,
        })
    }

    /// Probe the endpoint and cache the result
    pub async fn check_availability(&self) -> bool {
        let url = format!("{}/models", self.config.api_base);
        let mut request = self.client.get(&url).timeout(Duration::from_secs(2));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let available = match request.send().await {
            Ok(resp) => resp.status().is_success(),
            Err(_) => false,
        };
        self.available.store(available, Ordering::Relaxed);
        available
    }

    /// Cached availability (fast, non-blocking)
    pub fn is_available(&self) -> bool {
        self.available.load(Ordering::Relaxed)
    }

    /// Generate an embedding for text (with caching)
    pub async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let cache_key = text.trim().to_string();

        if let Some(cached) = self.cache.get(&cache_key).await {
            return Ok(cached);
        }

        let embedding = self.embed_uncached(text).await?;
        self.cache.insert(cache_key, embedding.clone()).await;

        Ok(embedding)
    }

    /// Generate an embedding without caching
    pub async fn embed_uncached(&self, text: &str) -> Result<Vec<f32>> {
        if !self.is_available() {
            anyhow::bail!("Embedding service unavailable");
        }

        let url = format!("{}/embeddings", self.config.api_base);

        let mut request = self.client.post(&url).json(&serde_json::json!({
            "model": self.config.model,
            "input": text,
        }));
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .context("Failed to send embedding request")?;

        if !response.status().is_success() {
            let status = response.status();
            self.available.store(false, Ordering::Relaxed);
            anyhow::bail!("Embedding request failed: {}", status);
        }

        let result: EmbeddingResponse = response
            .json()
            .await
            .context("Failed to parse embedding response")?;

        result
            .data
            .into_iter()
            .next()
            .map(|d| d.embedding)
            .ok_or_else(|| anyhow::anyhow!("Embedding response contained no data"))
    }

    /// Cosine similarity between two vectors
    pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
        if a.len() != b.len() || a.is_empty() {
            return 0.0;
        }

        let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
        let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

        if norm_a == 0.0 || norm_b == 0.0 {
            return 0.0;
        }

        dot / (norm_a * norm_b)
    }
}

/// Serialize embedding to bytes for SQLite BLOB storage
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|f| f.to_le_bytes()).collect()
}

/// Deserialize embedding from bytes
pub fn embedding_from_bytes(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks(4)
        .map(|chunk| {
            let arr: [u8; 4] = chunk.try_into().unwrap_or([0; 4]);
            f32::from_le_bytes(arr)
        })
        .collect()
}
