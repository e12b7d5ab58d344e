use asis_core::error::AppError;

/// Maps text to a fixed-length vector. Indexing and querying must use the same model.
pub trait Embedder: Send + Sync {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError>;
}

pub mod ollama_embed;

pub use ollama_embed::OllamaEmbedder;
