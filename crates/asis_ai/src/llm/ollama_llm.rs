use std::io::{BufRead, BufReader};
use std::time::Duration;

use asis_core::error::AppError;
use serde::{Deserialize, Serialize};

use super::Llm;
use crate::ollama::{call_error, OllamaClient};

#[derive(Debug, Clone)]
pub struct OllamaLlm {
    client: OllamaClient,
    timeout: Duration,
}

impl OllamaLlm {
    pub fn new(client: OllamaClient) -> Self {
        Self {
            client,
            timeout: Duration::from_secs(120),
        }
    }

    fn post(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        stream: bool,
    ) -> Result<ureq::Response, AppError> {
        let url = format!("{}/api/generate", self.client.base_url());
        let req = GenerateRequest {
            model,
            prompt,
            stream,
            options: GenerateOptions { temperature },
        };
        let body = serde_json::to_value(req).map_err(|e| {
            AppError::new("AI_LLM_FAILED", "Failed to encode generate request")
                .with_details(e.to_string())
        })?;
        ureq::post(&url)
            .timeout(self.timeout)
            .send_json(body)
            .map_err(|e| call_error("AI_LLM_FAILED", "Failed to call generate endpoint", e))
    }
}

#[derive(Debug, Clone, Serialize)]
struct GenerateOptions {
    temperature: f32,
}

#[derive(Debug, Clone, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Debug, Clone, Deserialize)]
struct GenerateResponse {
    response: String,
}

/// One NDJSON line of a streamed generate response.
#[derive(Debug, Clone, Deserialize)]
struct GenerateStreamLine {
    #[serde(default)]
    response: String,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    error: Option<String>,
}

impl Llm for OllamaLlm {
    fn generate(&self, model: &str, prompt: &str, temperature: f32) -> Result<String, AppError> {
        let resp = self.post(model, prompt, temperature, false)?;
        let v: GenerateResponse = resp.into_json().map_err(|e| {
            AppError::new("AI_LLM_FAILED", "Failed to decode generate response")
                .with_details(e.to_string())
                .with_retryable(true)
        })?;
        if v.response.trim().is_empty() {
            return Err(
                AppError::new("AI_LLM_FAILED", "Generate response was empty").with_retryable(true)
            );
        }
        Ok(v.response)
    }

    fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        sink: &mut dyn FnMut(&str),
    ) -> Result<String, AppError> {
        let resp = self.post(model, prompt, temperature, true)?;
        let reader = BufReader::new(resp.into_reader());
        let mut out = String::new();
        for line in reader.lines() {
            let line = line.map_err(|e| {
                AppError::new("AI_LLM_FAILED", "Generate stream was interrupted")
                    .with_details(e.to_string())
                    .with_retryable(true)
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let chunk: GenerateStreamLine = serde_json::from_str(&line).map_err(|e| {
                AppError::new("AI_LLM_FAILED", "Failed to decode generate stream line")
                    .with_details(format!("line={line}; err={e}"))
            })?;
            if let Some(err) = chunk.error {
                return Err(AppError::new("AI_LLM_FAILED", "Model reported an error mid-stream")
                    .with_details(err));
            }
            if !chunk.response.is_empty() {
                sink(&chunk.response);
                out.push_str(&chunk.response);
            }
            if chunk.done {
                break;
            }
        }
        if out.trim().is_empty() {
            return Err(
                AppError::new("AI_LLM_FAILED", "Generate stream was empty").with_retryable(true)
            );
        }
        Ok(out)
    }
}
