//! Chunking and embedding of extracted text into `document_chunks`.

use std::sync::Arc;

use pgvector::Vector;
use uuid::Uuid;

use crate::ai::EmbeddingClient;
use crate::config::PipelineSettings;
use crate::error::{PipelineError, PipelineResult};
use crate::extract::Extraction;
use crate::models::NewDocumentChunk;
use crate::store::PipelineStore;

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

fn is_break(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

/// Splits `text` into overlapping windows of at most `chunk_size` characters.
///
/// A window that does not reach the end of the text is cut after its last sentence
/// terminator or newline when that lies past half the window. The next window starts
/// `overlap` characters before the previous end, but always strictly after the previous
/// start, so the walk terminates for any `overlap`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    if len == 0 || chunk_size == 0 {
        return Vec::new();
    }

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < len {
        let mut end = (start + chunk_size).min(len);
        if end < len {
            if let Some(pos) = chars[start..end].iter().rposition(|c| is_break(*c)) {
                if pos * 2 > chunk_size {
                    end = start + pos + 1;
                }
            }
        }

        let chunk: String = chars[start..end].iter().collect();
        let chunk = chunk.trim();
        if !chunk.is_empty() {
            chunks.push(chunk.to_string());
        }

        if end >= len {
            break;
        }
        start = end.saturating_sub(overlap).max(start + 1);
    }
    chunks
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlannedChunk {
    pub content: String,
    pub page: Option<u32>,
}

pub struct Indexer {
    store: Arc<dyn PipelineStore>,
    embedder: Arc<dyn EmbeddingClient>,
    chunk_size: usize,
    overlap: usize,
}

impl Indexer {
    pub fn new(
        store: Arc<dyn PipelineStore>,
        embedder: Arc<dyn EmbeddingClient>,
        settings: &PipelineSettings,
    ) -> Self {
        Self {
            store,
            embedder,
            chunk_size: settings.chunk_size,
            overlap: settings.chunk_overlap,
        }
    }

    /// Paged extractions are chunked page by page so every chunk keeps its page number.
    pub fn plan_chunks(&self, extraction: &Extraction) -> Vec<PlannedChunk> {
        let paged = extraction.units.iter().any(|unit| unit.page.is_some());
        if paged {
            extraction
                .units
                .iter()
                .flat_map(|unit| {
                    chunk_text(&unit.text, self.chunk_size, self.overlap)
                        .into_iter()
                        .map(move |content| PlannedChunk {
                            content,
                            page: unit.page,
                        })
                })
                .collect()
        } else {
            chunk_text(&extraction.full_text, self.chunk_size, self.overlap)
                .into_iter()
                .map(|content| PlannedChunk {
                    content,
                    page: None,
                })
                .collect()
        }
    }

    /// Chunks, embeds and stores one file's text. Returns the number of stored chunks.
    ///
    /// Files that already have chunks are skipped. An embedding failure aborts before
    /// anything is written, so no unembedded chunk is ever stored.
    pub async fn index_file(
        &self,
        report_id: Uuid,
        file_id: Uuid,
        extraction: &Extraction,
    ) -> PipelineResult<usize> {
        if !extraction.has_text() {
            return Ok(0);
        }
        if self.store.file_has_chunks(file_id).await? {
            tracing::debug!(%file_id, "file already indexed");
            return Ok(0);
        }

        let planned = self.plan_chunks(extraction);
        let source_type = extraction.format.map(|format| format.as_str().to_string());

        let mut rows = Vec::with_capacity(planned.len());
        for (index, chunk) in planned.into_iter().enumerate() {
            let embedding = self
                .embedder
                .embed(&chunk.content)
                .await
                .map_err(|err| PipelineError::service("embedding", err))?;
            rows.push(NewDocumentChunk {
                id: Uuid::new_v4(),
                report_id,
                file_id: Some(file_id),
                content: chunk.content,
                chunk_index: index as i32,
                source_type: source_type.clone(),
                page_number: chunk.page.map(|page| page as i32),
                embedding: Some(Vector::from(embedding)),
            });
        }

        let stored = self.store.insert_chunks(rows).await?;
        tracing::debug!(%file_id, chunks = stored, "indexed file");
        Ok(stored)
    }
}
