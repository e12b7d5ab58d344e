use std::sync::Arc;

use asis_core::config::Settings;
use asis_core::error::AppError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::chunking::chunk_document;
use super::document::{load_document, UploadedFile};
use super::model::EmbeddedChunk;
use crate::embeddings::Embedder;
use crate::retrieve::{IndexBuilder, VectorIndex};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub embedding_model: String,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub upload_max_bytes: u64,
}

impl IngestSettings {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            embedding_model: s.embedding_model.clone(),
            chunk_size: s.chunk_size,
            chunk_overlap: s.chunk_overlap,
            upload_max_bytes: s.upload_max_bytes,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IngestSummary {
    pub source_id: String,
    pub chunk_count: usize,
    pub page_count: usize,
}

pub struct IngestedDocument {
    pub summary: IngestSummary,
    pub index: Box<dyn VectorIndex>,
}

/// Upload -> pages -> chunks -> vectors -> index.
pub struct Ingestor {
    embedder: Arc<dyn Embedder>,
    builder: Arc<dyn IndexBuilder>,
    settings: IngestSettings,
}

impl Ingestor {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        builder: Arc<dyn IndexBuilder>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            embedder,
            builder,
            settings,
        }
    }

    pub fn ingest(
        &self,
        upload: &UploadedFile,
        cancel: &CancellationToken,
    ) -> Result<IngestedDocument, AppError> {
        let doc = load_document(upload, self.settings.upload_max_bytes)?;
        let chunks = chunk_document(&doc, self.settings.chunk_size, self.settings.chunk_overlap)?;
        if chunks.is_empty() {
            return Err(AppError::new("INGEST_EMPTY_DOCUMENT", "Document produced no chunks")
                .with_details(format!("source_id={}", doc.source_id)));
        }
        debug!(source_id = %doc.source_id, chunks = chunks.len(), "document chunked");

        let mut embedded = Vec::with_capacity(chunks.len());
        for chunk in chunks {
            if cancel.is_cancelled() {
                return Err(crate::llm::cancelled());
            }
            let vector = self
                .embedder
                .embed(&self.settings.embedding_model, &chunk.text)
                .map_err(|e| {
                    AppError::new("INGEST_EMBEDDING_FAILED", "Failed to embed document chunk")
                        .with_details(format!("chunk_id={}; cause={}", chunk.chunk_id, e))
                        .with_retryable(e.retryable)
                })?;
            embedded.push(EmbeddedChunk { chunk, vector });
        }

        let chunk_count = embedded.len();
        let index = self.builder.build(embedded).map_err(|e| {
            if e.is("INGEST_INDEX_FAILED") {
                e
            } else {
                AppError::new("INGEST_INDEX_FAILED", "Failed to build the vector index")
                    .with_details(e.to_string())
                    .with_retryable(e.retryable)
            }
        })?;

        let summary = IngestSummary {
            source_id: doc.source_id,
            chunk_count,
            page_count: doc.pages.len(),
        };
        info!(
            source_id = %summary.source_id,
            pages = summary.page_count,
            chunks = summary.chunk_count,
            "document ingested"
        );
        Ok(IngestedDocument { summary, index })
    }
}
