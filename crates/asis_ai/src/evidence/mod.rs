pub mod chunking;
pub mod document;
pub mod ingest;
pub mod model;

pub use document::{load_document, UploadedFile};
pub use ingest::{IngestSettings, IngestSummary, IngestedDocument, Ingestor};
pub use model::{Chunk, Document, DocumentKind, DocumentPage, EmbeddedChunk, PagePosition};
