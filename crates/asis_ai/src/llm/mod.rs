use std::time::{Duration, Instant};

use asis_core::error::AppError;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Text generation collaborator. `AppError::retryable` separates transient from permanent failures.
pub trait Llm: Send + Sync {
    fn generate(&self, model: &str, prompt: &str, temperature: f32) -> Result<String, AppError>;

    /// Pushes tokens to `sink` as they arrive and returns the full text.
    /// Providers without streaming emit the whole answer as one token.
    fn generate_stream(
        &self,
        model: &str,
        prompt: &str,
        temperature: f32,
        sink: &mut dyn FnMut(&str),
    ) -> Result<String, AppError> {
        let out = self.generate(model, prompt, temperature)?;
        sink(&out);
        Ok(out)
    }
}

pub mod ollama_llm;

pub use ollama_llm::OllamaLlm;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    /// Exponential: base, 2*base, 4*base, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(1u32 << attempt.min(16))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(500),
        }
    }
}

pub struct GenerationCall<'a> {
    pub model: &'a str,
    pub prompt: &'a str,
    pub temperature: f32,
}

/// Calls the model with bounded retries on transient failures.
///
/// A streaming call is only retried while no token has reached `sink`.
/// Exhaustion and permanent failures both surface as `AI_GENERATION_UNAVAILABLE`.
pub fn generate_with_retry(
    llm: &dyn Llm,
    call: &GenerationCall<'_>,
    policy: RetryPolicy,
    cancel: &CancellationToken,
    mut sink: Option<&mut dyn FnMut(&str)>,
) -> Result<String, AppError> {
    let attempts = policy.max_attempts.max(1);
    let mut last: Option<AppError> = None;

    for attempt in 0..attempts {
        if cancel.is_cancelled() {
            return Err(cancelled());
        }

        let mut emitted = false;
        let result = match sink.as_deref_mut() {
            Some(s) => {
                let mut tracked = |t: &str| {
                    emitted = true;
                    s(t)
                };
                llm.generate_stream(call.model, call.prompt, call.temperature, &mut tracked)
            }
            None => llm.generate(call.model, call.prompt, call.temperature),
        };

        let err = match result {
            Ok(text) => return Ok(text),
            Err(e) => e,
        };

        if !err.retryable || emitted {
            return Err(unavailable(&err, attempt + 1).with_retryable(err.retryable && !emitted));
        }

        warn!(
            attempt = attempt + 1,
            max_attempts = attempts,
            code = %err.code,
            "generation failed, will retry"
        );
        last = Some(err);
        if attempt + 1 < attempts && !sleep_unless_cancelled(policy.delay_for(attempt), cancel) {
            return Err(cancelled());
        }
    }

    let last = last.unwrap_or_else(|| AppError::new("AI_LLM_FAILED", "Generation failed"));
    Err(unavailable(&last, attempts).with_retryable(true))
}

fn unavailable(cause: &AppError, attempts: u32) -> AppError {
    AppError::new("AI_GENERATION_UNAVAILABLE", "Language model unavailable").with_details(format!(
        "attempts={attempts}; cause={}; details={}",
        cause,
        cause.details.as_deref().unwrap_or("")
    ))
}

pub(crate) fn cancelled() -> AppError {
    AppError::new("SESSION_CANCELLED", "Session was closed while the request was running")
}

/// Returns false when cancelled before the delay elapsed.
fn sleep_unless_cancelled(delay: Duration, cancel: &CancellationToken) -> bool {
    let deadline = Instant::now() + delay;
    loop {
        if cancel.is_cancelled() {
            return false;
        }
        let now = Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep((deadline - now).min(Duration::from_millis(25)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Flaky {
        fail_times: u32,
        retryable: bool,
        calls: AtomicU32,
    }

    impl Llm for Flaky {
        fn generate(&self, _model: &str, _prompt: &str, _t: f32) -> Result<String, AppError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_times {
                Err(AppError::new("AI_LLM_FAILED", "boom").with_retryable(self.retryable))
            } else {
                Ok("ok".to_string())
            }
        }
    }

    struct StreamThenFail;

    impl Llm for StreamThenFail {
        fn generate(&self, _m: &str, _p: &str, _t: f32) -> Result<String, AppError> {
            Ok("unused".to_string())
        }

        fn generate_stream(
            &self,
            _m: &str,
            _p: &str,
            _t: f32,
            sink: &mut dyn FnMut(&str),
        ) -> Result<String, AppError> {
            sink("partial");
            Err(AppError::new("AI_LLM_FAILED", "stream dropped").with_retryable(true))
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        }
    }

    fn call() -> GenerationCall<'static> {
        GenerationCall {
            model: "m",
            prompt: "p",
            temperature: 0.0,
        }
    }

    #[test]
    fn retries_transient_failures_until_success() {
        let llm = Flaky { fail_times: 2, retryable: true, calls: AtomicU32::new(0) };
        let out = generate_with_retry(&llm, &call(), fast(), &CancellationToken::new(), None).expect("ok");
        assert_eq!(out, "ok");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn exhaustion_is_generation_unavailable() {
        let llm = Flaky { fail_times: 10, retryable: true, calls: AtomicU32::new(0) };
        let err = generate_with_retry(&llm, &call(), fast(), &CancellationToken::new(), None).unwrap_err();
        assert_eq!(err.code, "AI_GENERATION_UNAVAILABLE");
        assert!(err.retryable);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn permanent_failure_fails_fast() {
        let llm = Flaky { fail_times: 10, retryable: false, calls: AtomicU32::new(0) };
        let err = generate_with_retry(&llm, &call(), fast(), &CancellationToken::new(), None).unwrap_err();
        assert_eq!(err.code, "AI_GENERATION_UNAVAILABLE");
        assert!(!err.retryable);
        assert_eq!(llm.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn streaming_is_not_retried_after_first_token() {
        let mut seen = Vec::new();
        let mut sink = |t: &str| seen.push(t.to_string());
        let err = generate_with_retry(&StreamThenFail, &call(), fast(), &CancellationToken::new(), Some(&mut sink))
            .unwrap_err();
        assert_eq!(err.code, "AI_GENERATION_UNAVAILABLE");
        assert_eq!(seen, vec!["partial".to_string()]);
    }

    #[test]
    fn cancelled_token_stops_before_calling() {
        let llm = Flaky { fail_times: 0, retryable: true, calls: AtomicU32::new(0) };
        let token = CancellationToken::new();
        token.cancel();
        let err = generate_with_retry(&llm, &call(), fast(), &token, None).unwrap_err();
        assert_eq!(err.code, "SESSION_CANCELLED");
        assert_eq!(llm.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn backoff_doubles() {
        let p = RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(500) };
        assert_eq!(p.delay_for(0), Duration::from_millis(500));
        assert_eq!(p.delay_for(1), Duration::from_millis(1000));
        assert_eq!(p.delay_for(2), Duration::from_millis(2000));
    }
}
