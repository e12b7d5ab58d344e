use std::time::Duration;

use asis_core::error::AppError;

#[derive(Debug, Clone)]
pub struct OllamaClient {
    base_url: String,
}

impl OllamaClient {
    /// Create a client for Ollama. This is strictly limited to the loopback host.
    pub fn new(base_url: &str) -> Result<Self, AppError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        // Binding constraint: local-only via 127.0.0.1 or localhost, optional numeric port.
        let rest = base_url
            .strip_prefix("http://127.0.0.1")
            .or_else(|| base_url.strip_prefix("http://localhost"));
        let ok = match rest {
            Some("") => true,
            Some(r) => match r.strip_prefix(':') {
                Some(port) => port.parse::<u16>().map(|p| p != 0).unwrap_or(false),
                None => false,
            },
            None => false,
        };
        if !ok {
            return Err(AppError::new(
                "AI_REMOTE_NOT_ALLOWED",
                "Ollama base URL must be local (127.0.0.1 or localhost)",
            )
            .with_details(format!("base_url={base_url}")));
        }

        Ok(Self { base_url })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn health_check(&self) -> Result<(), AppError> {
        let url = format!("{}/api/tags", self.base_url);
        let resp = ureq::get(&url).timeout(Duration::from_millis(800)).call();

        match resp {
            Ok(r) if r.status() == 200 => Ok(()),
            Ok(r) => Err(
                AppError::new("AI_OLLAMA_UNHEALTHY", "Ollama health check failed")
                    .with_details(format!("status={}", r.status())),
            ),
            Err(e) => Err(AppError::new("AI_OLLAMA_UNREACHABLE", "Failed to reach local Ollama")
                .with_details(e.to_string())
                .with_retryable(true)),
        }
    }
}

/// Rate limits, timeouts, 5xx and transport failures are transient; other statuses are not.
pub(crate) fn call_error(code: &str, message: &str, err: ureq::Error) -> AppError {
    match err {
        ureq::Error::Status(status, _) => AppError::new(code, message)
            .with_details(format!("status={status}"))
            .with_retryable(status == 408 || status == 429 || status >= 500),
        ureq::Error::Transport(t) => AppError::new(code, message)
            .with_details(t.to_string())
            .with_retryable(true),
    }
}
