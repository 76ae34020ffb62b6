//! Dense (OpenAI) embedder. A process-wide singleton behind
//! an `Arc`; concurrency is capped locally (10 in-flight requests) and
//! the caller is expected to sit the whole thing behind a pod-wide rate
//! limiter (`weave-ratelimit::SourceRateLimiter`, scoped to `openai`).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use tokio::sync::Semaphore;
use tracing::warn;

use crate::error::{EmbedError, Result};

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const MAX_TEXTS_PER_REQUEST: usize = 2048;
const MAX_TOKENS_PER_REQUEST: usize = 300_000;
/// OpenAI's own per-input token ceiling; a single text over this cannot
/// be embedded at all and gets the zero-vector fallback.
const MAX_TOKENS_PER_TEXT: usize = 8191;
const MAX_INFLIGHT_REQUESTS: usize = 10;
/// Embedding requests use long timeouts; batches can be large.
const REQUEST_TIMEOUT_SECS: u64 = 20 * 60;

/// Picks the OpenAI model (and, for non-native dimensions, the
/// Matryoshka-truncation `dimensions` param) for a collection's configured
/// `vector_size`.
fn model_for_vector_size(vector_size: u32) -> Result<(&'static str, Option<u32>)> {
    match vector_size {
        1536 => Ok(("text-embedding-3-small", None)),
        3072 => Ok(("text-embedding-3-large", None)),
        n if n > 0 && n < 3072 => Ok(("text-embedding-3-large", Some(n))),
        other => Err(EmbedError::UnsupportedVectorSize(other)),
    }
}

pub struct DenseEmbedder {
    client: reqwest::Client,
    api_key: String,
    tokenizer: CoreBPE,
    semaphore: Arc<Semaphore>,
}

impl DenseEmbedder {
    pub fn new(api_key: impl Into<String>) -> Result<Self> {
        let tokenizer = tiktoken_rs::cl100k_base().map_err(|e| EmbedError::Inference(e.to_string()))?;
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;
        Ok(Self {
            client,
            api_key: api_key.into(),
            tokenizer,
            semaphore: Arc::new(Semaphore::new(MAX_INFLIGHT_REQUESTS)),
        })
    }

    fn token_count(&self, text: &str) -> usize {
        self.tokenizer.encode_with_special_tokens(text).len()
    }

    /// Embeds `texts` for a collection of the given `vector_size`.
    /// Fails fast on any empty text;
    /// a single over-limit text is swapped for a zero-vector instead of
    /// failing the whole batch.
    pub async fn embed_batch(&self, texts: &[String], vector_size: u32) -> Result<Vec<Vec<f32>>> {
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbedError::EmptyText);
        }
        let (model, dimensions) = model_for_vector_size(vector_size)?;

        let mut embeddable_indices = Vec::new();
        let mut results = vec![Vec::new(); texts.len()];
        for (i, text) in texts.iter().enumerate() {
            if self.token_count(text) > MAX_TOKENS_PER_TEXT {
                warn!(index = i, "text exceeds per-text token limit, using zero-vector fallback");
                results[i] = zero_vector(dimensions.unwrap_or(native_dim(model)));
            } else {
                embeddable_indices.push(i);
            }
        }

        for batch in self.split_batches(texts, &embeddable_indices) {
            let batch_texts: Vec<String> = batch.iter().map(|&i| texts[i].clone()).collect();
            match self.call_api(model, dimensions, &batch_texts).await {
                Ok(vectors) => {
                    for (idx, vector) in batch.iter().zip(vectors) {
                        results[*idx] = vector;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "embedding request failed, falling back to zero-vectors for this batch");
                    for &idx in &batch {
                        results[idx] = zero_vector(dimensions.unwrap_or(native_dim(model)));
                    }
                }
            }
        }
        Ok(results)
    }

    /// Greedily groups `indices` into sub-batches respecting both the
    /// per-request text-count and token-count ceilings.
    fn split_batches(&self, texts: &[String], indices: &[usize]) -> Vec<Vec<usize>> {
        let mut batches = Vec::new();
        let mut current = Vec::new();
        let mut current_tokens = 0usize;
        for &i in indices {
            let tokens = self.token_count(&texts[i]);
            let would_overflow_tokens = current_tokens + tokens > MAX_TOKENS_PER_REQUEST && !current.is_empty();
            let would_overflow_count = current.len() >= MAX_TEXTS_PER_REQUEST;
            if would_overflow_tokens || would_overflow_count {
                batches.push(std::mem::take(&mut current));
                current_tokens = 0;
            }
            current.push(i);
            current_tokens += tokens;
        }
        if !current.is_empty() {
            batches.push(current);
        }
        batches
    }

    async fn call_api(&self, model: &str, dimensions: Option<u32>, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let _permit = self.semaphore.acquire().await.expect("semaphore never closed");
        let request = EmbeddingRequest {
            model,
            input: texts,
            dimensions,
        };
        let resp = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(EmbedError::Api { status: status.as_u16(), body });
        }
        let parsed: EmbeddingResponse = resp.json().await?;
        let mut by_index: Vec<(usize, Vec<f32>)> = parsed.data.into_iter().map(|d| (d.index, d.embedding)).collect();
        by_index.sort_by_key(|(i, _)| *i);
        Ok(by_index.into_iter().map(|(_, v)| v).collect())
    }
}

fn native_dim(model: &str) -> u32 {
    match model {
        "text-embedding-3-small" => 1536,
        "text-embedding-3-large" => 3072,
        _ => 1536,
    }
}

fn zero_vector(dim: u32) -> Vec<f32> {
    vec![0.0; dim as usize]
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    dimensions: Option<u32>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    index: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_dimension_needs_no_truncation() {
        assert_eq!(model_for_vector_size(1536).unwrap(), ("text-embedding-3-small", None));
        assert_eq!(model_for_vector_size(3072).unwrap(), ("text-embedding-3-large", None));
    }

    #[test]
    fn non_native_dimension_requests_matryoshka_truncation() {
        assert_eq!(model_for_vector_size(1024).unwrap(), ("text-embedding-3-large", Some(1024)));
    }

    #[test]
    fn vector_size_above_large_native_dim_is_rejected() {
        assert!(model_for_vector_size(4096).is_err());
    }
}
