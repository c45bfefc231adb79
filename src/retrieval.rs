//! Similarity retrieval over a report's embedded chunks, and bounded context assembly.

use std::cmp::Ordering;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::ai::EmbeddingClient;
use crate::error::{PipelineError, PipelineResult};
use crate::models::DocumentChunk;
use crate::store::PipelineStore;

/// Rough characters-per-token ratio used to turn a token budget into a character budget.
pub const CHARS_PER_TOKEN: usize = 4;
pub const DEFAULT_CANDIDATES: usize = 10;

const CONTEXT_SEPARATOR: &str = "\n---\n";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RetrievedChunk {
    pub chunk_id: Uuid,
    pub content: String,
    pub file_id: Option<Uuid>,
    pub page_number: Option<i32>,
    pub source_type: Option<String>,
    pub similarity: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RetrievedContext {
    pub text: String,
    /// Chunks that made it into `text`, in order.
    pub sources: Vec<RetrievedChunk>,
}

impl RetrievedContext {
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// `None` when the vectors cannot be compared.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Option<f32> {
    if a.is_empty() || a.len() != b.len() {
        return None;
    }

    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        Some(0.0)
    } else {
        Some(dot / (norm_a * norm_b))
    }
}

/// Scores one stored chunk against `query`; `None` when it has no comparable embedding.
pub fn score_chunk(query: &[f32], chunk: DocumentChunk) -> Option<RetrievedChunk> {
    let similarity = cosine_similarity(query, chunk.embedding.as_ref()?.as_slice())?;
    Some(RetrievedChunk {
        chunk_id: chunk.id,
        content: chunk.content,
        file_id: chunk.file_id,
        page_number: chunk.page_number,
        source_type: chunk.source_type,
        similarity,
    })
}

/// Highest similarity first; equal scores fall back to ascending chunk id.
pub fn rank_chunks(query: &[f32], chunks: Vec<DocumentChunk>, top_k: usize) -> Vec<RetrievedChunk> {
    let mut scored: Vec<RetrievedChunk> = chunks
        .into_iter()
        .filter_map(|chunk| score_chunk(query, chunk))
        .collect();

    scored.sort_by(|a, b| match b.similarity.total_cmp(&a.similarity) {
        Ordering::Equal => a.chunk_id.cmp(&b.chunk_id),
        other => other,
    });
    scored.truncate(top_k);
    scored
}

/// Greedily takes chunks in order until the next one would push the content past
/// `max_chars`. Chunks are never cut.
pub fn assemble_context(chunks: Vec<RetrievedChunk>, max_chars: usize) -> RetrievedContext {
    let mut parts = Vec::new();
    let mut sources = Vec::new();
    let mut used = 0usize;

    for chunk in chunks {
        let len = chunk.content.chars().count();
        if used + len > max_chars {
            break;
        }
        used += len;
        parts.push(format!(
            "[File ID: {}, Page: {}]\n{}\n",
            chunk
                .file_id
                .map_or_else(|| "N/A".to_string(), |id| id.to_string()),
            chunk
                .page_number
                .map_or_else(|| "N/A".to_string(), |page| page.to_string()),
            chunk.content
        ));
        sources.push(chunk);
    }

    RetrievedContext {
        text: parts.join(CONTEXT_SEPARATOR),
        sources,
    }
}

/// Supplies reference passages to the draft generator.
#[async_trait]
pub trait ContextProvider: Send + Sync + 'static {
    async fn build_context(
        &self,
        query: &str,
        report_id: Uuid,
        max_tokens: usize,
    ) -> PipelineResult<RetrievedContext>;
}

pub struct Retriever {
    store: Arc<dyn PipelineStore>,
    embedder: Arc<dyn EmbeddingClient>,
    candidates: usize,
}

impl Retriever {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        embedder: Arc<dyn EmbeddingClient>,
        candidates: usize,
    ) -> Self {
        Self {
            store,
            embedder,
            candidates: candidates.max(1),
        }
    }

    /// Top `top_k` chunks of `report_id` by similarity to `query`.
    pub async fn retrieve(
        &self,
        query: &str,
        report_id: Uuid,
        top_k: usize,
    ) -> PipelineResult<Vec<RetrievedChunk>> {
        if top_k == 0 || !self.store.has_embedded_chunks(report_id).await? {
            return Ok(Vec::new());
        }

        let query_embedding = self
            .embedder
            .embed(query)
            .await
            .map_err(|err| PipelineError::service("retrieval", err))?;

        let ranked = self
            .store
            .nearest_chunks(report_id, query_embedding, top_k)
            .await?;
        tracing::debug!(%report_id, results = ranked.len(), "retrieved chunks");
        Ok(ranked)
    }
}

#[async_trait]
impl ContextProvider for Retriever {
    async fn build_context(
        &self,
        query: &str,
        report_id: Uuid,
        max_tokens: usize,
    ) -> PipelineResult<RetrievedContext> {
        let chunks = self.retrieve(query, report_id, self.candidates).await?;
        Ok(assemble_context(
            chunks,
            max_tokens.saturating_mul(CHARS_PER_TOKEN),
        ))
    }
}
