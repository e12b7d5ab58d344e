use std::time::Duration;

use asis_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Embedder;
use crate::ollama::{call_error, OllamaClient};

const MAX_EMBED_CHARS: usize = 12_000;

#[derive(Debug, Clone)]
pub struct OllamaEmbedder {
    client: OllamaClient,
}

impl OllamaEmbedder {
    pub fn new(client: OllamaClient) -> Self {
        Self { client }
    }
}

#[derive(Debug, Clone, Serialize)]
struct EmbeddingsRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, Deserialize)]
struct EmbeddingsResponse {
    embedding: Vec<f32>,
}

impl Embedder for OllamaEmbedder {
    fn embed(&self, model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        // Keep requests bounded. Chunking enforces reasonable sizes, but guard anyway.
        let prompt = match input.char_indices().nth(MAX_EMBED_CHARS) {
            Some((idx, _)) => &input[..idx],
            None => input,
        };

        let url = format!("{}/api/embeddings", self.client.base_url());
        let req = EmbeddingsRequest { model, prompt };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new("AI_EMBEDDINGS_FAILED", "Failed to encode embeddings request")
                .with_details(e.to_string())
        })?;
        let resp = ureq::post(&url)
            .timeout(Duration::from_secs(30))
            .send_json(body)
            .map_err(|e| {
                call_error("AI_EMBEDDINGS_FAILED", "Failed to call embeddings endpoint", e)
            })?;

        let v: EmbeddingsResponse = resp.into_json().map_err(|e| {
            AppError::new("AI_EMBEDDINGS_FAILED", "Failed to decode embeddings response")
                .with_details(e.to_string())
        })?;
        if v.embedding.is_empty() {
            return Err(AppError::new(
                "AI_EMBEDDINGS_FAILED",
                "Embeddings response was empty",
            ));
        }
        Ok(v.embedding)
    }
}
