//! Semantic (embedding-similarity) chunker.
//!
//! Stage 1 splits text into sentences and groups them wherever
//! consecutive-sentence similarity, from a small local embedding model,
//! stays above threshold; stage 1.5 re-counts tokens with the downstream
//! embedding tokenizer; stage 2 is a hard safety net that re-splits any
//! chunk still over the token ceiling.
//!
//! Models are process-wide singletons, lazily initialized behind a
//! one-shot primitive — here a `tokio::sync::OnceCell<TextEmbedding>`.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use tiktoken_rs::CoreBPE;
use tokio::sync::OnceCell;
use tracing::warn;

use crate::error::{ChunkError, Result};
use crate::sentence::split_sentences;
use crate::Chunk;

/// Hard ceiling enforced by stage 2, independent of any chunker's own
/// tokenizer: every chunk the embedder receives must fit.
pub const MAX_TOKENS_PER_CHUNK: usize = 8192;
/// Overlap applied by the stage-2 safety-net resplit.
pub const SAFETY_NET_OVERLAP_TOKENS: usize = 128;

#[derive(Debug, Clone)]
pub struct SemanticChunkerConfig {
    /// How many neighboring similarity scores to average before deciding
    /// a boundary — trades precision for robustness to a single noisy
    /// sentence pair.
    pub similarity_window: usize,
    /// Consecutive-sentence similarity below this ends the current chunk.
    pub threshold: f32,
    pub min_chunk_sentences: usize,
    pub min_chunk_chars: usize,
    /// Lightweight moving-average smoothing over the similarity series —
    /// stands in for the original's Savitzky-Golay smoothing pass; both
    /// exist only to damp single-sentence similarity spikes before
    /// boundary decisions.
    pub smoothing: bool,
    /// Merge any resulting chunk under `min_chunk_sentences`/
    /// `min_chunk_chars` into a neighbor rather than emitting a sliver.
    pub skip_window_merge: bool,
}

impl Default for SemanticChunkerConfig {
    fn default() -> Self {
        Self {
            similarity_window: 3,
            threshold: 0.62,
            min_chunk_sentences: 2,
            min_chunk_chars: 200,
            smoothing: true,
            skip_window_merge: true,
        }
    }
}

pub struct SemanticChunker {
    model: OnceCell<TextEmbedding>,
    tokenizer: CoreBPE,
    config: SemanticChunkerConfig,
}

impl SemanticChunker {
    pub fn new(config: SemanticChunkerConfig) -> Result<Self> {
        let tokenizer = tiktoken_rs::cl100k_base().map_err(|e| ChunkError::ModelLoad(e.to_string()))?;
        Ok(Self {
            model: OnceCell::new(),
            tokenizer,
            config,
        })
    }

    async fn model(&self) -> Result<&TextEmbedding> {
        self.model
            .get_or_try_init(|| async {
                // Model2Vec-class local similarity model; fastembed's
                // small BGE model is the closest equivalent already in
                // the workspace's embedding stack.
                TextEmbedding::try_new(InitOptions::new(EmbeddingModel::BGESmallENV15))
                    .map_err(|e| ChunkError::ModelLoad(e.to_string()))
            })
            .await
    }

    pub fn token_count(&self, text: &str) -> usize {
        self.tokenizer.encode_with_special_tokens(text).len()
    }

    /// Chunks a batch of texts, one inner `Vec<Chunk>` per input text, in
    /// order.
    pub async fn chunk_batch(&self, texts: &[String]) -> Result<Vec<Vec<Chunk>>> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.chunk_one(text).await?);
        }
        Ok(out)
    }

    pub async fn chunk_one(&self, text: &str) -> Result<Vec<Chunk>> {
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let spans = split_sentences(text);
        if spans.len() <= 1 {
            return self.safety_net(vec![Chunk {
                text: text.to_string(),
                start_index: 0,
                end_index: text.len(),
                token_count: self.token_count(text),
            }]);
        }

        let sentences: Vec<&str> = spans.iter().map(|(s, e)| &text[*s..*e]).collect();
        let embeddings = self
            .model()
            .await?
            .embed(sentences.iter().map(|s| s.to_string()).collect(), None)
            .map_err(|e| ChunkError::Inference(e.to_string()))?;

        let mut similarities: Vec<f32> = (0..embeddings.len() - 1)
            .map(|i| cosine_similarity(&embeddings[i], &embeddings[i + 1]))
            .collect();
        if self.config.smoothing {
            similarities = moving_average(&similarities, self.config.similarity_window);
        }

        let mut groups: Vec<(usize, usize)> = Vec::new(); // (first_sentence_idx, last_sentence_idx) inclusive
        let mut group_start = 0usize;
        for i in 0..similarities.len() {
            let group_chars: usize = spans[group_start..=i].iter().map(|(s, e)| e - s).sum();
            let group_sentences = i - group_start + 1;
            let below_threshold = similarities[i] < self.config.threshold;
            if below_threshold && group_sentences >= self.config.min_chunk_sentences && group_chars >= self.config.min_chunk_chars {
                groups.push((group_start, i));
                group_start = i + 1;
            }
        }
        groups.push((group_start, spans.len() - 1));

        if self.config.skip_window_merge {
            groups = merge_undersized_groups(groups, &spans, self.config.min_chunk_sentences, self.config.min_chunk_chars);
        }

        let chunks: Vec<Chunk> = groups
            .into_iter()
            .map(|(first, last)| {
                let start_index = spans[first].0;
                let end_index = spans[last].1;
                let chunk_text = text[start_index..end_index].to_string();
                let token_count = self.token_count(&chunk_text);
                Chunk { text: chunk_text, start_index, end_index, token_count }
            })
            .collect();

        self.safety_net(chunks)
    }

    /// Stage 2: re-splits any chunk still over `MAX_TOKENS_PER_CHUNK`
    /// using a sentence-based split with `SAFETY_NET_OVERLAP_TOKENS`
    /// overlap. Violating the post-condition after this pass is a
    /// programming bug, not a data problem.
    fn safety_net(&self, chunks: Vec<Chunk>) -> Result<Vec<Chunk>> {
        let mut out = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if chunk.token_count <= MAX_TOKENS_PER_CHUNK {
                out.push(chunk);
                continue;
            }
            warn!(token_count = chunk.token_count, "chunk exceeded safety-net ceiling, re-splitting");
            out.extend(self.resplit_with_overlap(&chunk));
        }
        for chunk in &out {
            if chunk.text.is_empty() || chunk.token_count > MAX_TOKENS_PER_CHUNK {
                return Err(ChunkError::InvariantViolated(format!(
                    "chunk of {} tokens survived the safety net",
                    chunk.token_count
                )));
            }
        }
        Ok(out)
    }

    fn resplit_with_overlap(&self, chunk: &Chunk) -> Vec<Chunk> {
        let tokens = self.tokenizer.encode_with_special_tokens(&chunk.text);
        let mut out = Vec::new();
        let mut pos = 0usize;
        while pos < tokens.len() {
            let end = (pos + MAX_TOKENS_PER_CHUNK).min(tokens.len());
            let window = &tokens[pos..end];
            let text = self.tokenizer.decode(window.to_vec()).unwrap_or_default();
            if !text.is_empty() {
                out.push(Chunk {
                    token_count: window.len(),
                    start_index: chunk.start_index,
                    end_index: chunk.end_index,
                    text,
                });
            }
            if end == tokens.len() {
                break;
            }
            pos = end.saturating_sub(SAFETY_NET_OVERLAP_TOKENS);
        }
        out
    }
}

fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}

fn moving_average(values: &[f32], window: usize) -> Vec<f32> {
    if window <= 1 || values.is_empty() {
        return values.to_vec();
    }
    let half = window / 2;
    (0..values.len())
        .map(|i| {
            let start = i.saturating_sub(half);
            let end = (i + half + 1).min(values.len());
            let slice = &values[start..end];
            slice.iter().sum::<f32>() / slice.len() as f32
        })
        .collect()
}

fn merge_undersized_groups(
    groups: Vec<(usize, usize)>,
    spans: &[(usize, usize)],
    min_sentences: usize,
    min_chars: usize,
) -> Vec<(usize, usize)> {
    let mut merged: Vec<(usize, usize)> = Vec::with_capacity(groups.len());
    for group in groups {
        let sentences = group.1 - group.0 + 1;
        let chars: usize = spans[group.0..=group.1].iter().map(|(s, e)| e - s).sum();
        if sentences < min_sentences && chars < min_chars {
            if let Some(last) = merged.last_mut() {
                last.1 = group.1;
                continue;
            }
        }
        merged.push(group);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn moving_average_smooths_a_spike() {
        let values = vec![0.9, 0.9, 0.1, 0.9, 0.9];
        let smoothed = moving_average(&values, 3);
        assert!(smoothed[2] > 0.1);
    }

    #[test]
    fn cosine_similarity_of_identical_vectors_is_one() {
        let v = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn merge_undersized_groups_folds_trailing_sliver_into_prior_group() {
        let spans = vec![(0, 100), (100, 110)];
        let groups = vec![(0usize, 0usize), (1usize, 1usize)];
        let merged = merge_undersized_groups(groups, &spans, 2, 50);
        assert_eq!(merged, vec![(0, 1)]);
    }
}
