use std::sync::Arc;

use asis_core::error::AppError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::prompts;
use crate::llm::{generate_with_retry, GenerationCall, Llm, RetryPolicy};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Intent {
    Yes,
    No,
    Ambiguous,
}

/// Reads the first word of a model reply. Anything unrecognized is ambiguous.
pub fn parse_intent(reply: &str) -> Intent {
    let first = reply
        .split_whitespace()
        .next()
        .map(|w| w.trim_matches(|c: char| !c.is_alphanumeric()).to_uppercase())
        .unwrap_or_default();
    match first.as_str() {
        "SI" | "SÍ" | "YES" => Intent::Yes,
        "NO" => Intent::No,
        _ => Intent::Ambiguous,
    }
}

pub struct IntentClassifier {
    llm: Arc<dyn Llm>,
    model: String,
    temperature: f32,
}

impl IntentClassifier {
    pub fn new(llm: Arc<dyn Llm>, model: impl Into<String>, temperature: f32) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
        }
    }

    /// `goal` names what the user is being asked to confirm, e.g. "calcular su IMC".
    /// Model failures degrade to `Ambiguous`; only cancellation is an error.
    pub fn classify(
        &self,
        goal: &str,
        message: &str,
        cancel: &CancellationToken,
    ) -> Result<Intent, AppError> {
        let prompt = prompts::intent_prompt(goal, message);
        let call = GenerationCall {
            model: &self.model,
            prompt: &prompt,
            temperature: self.temperature,
        };
        let once = RetryPolicy {
            max_attempts: 1,
            ..RetryPolicy::default()
        };
        match generate_with_retry(self.llm.as_ref(), &call, once, cancel, None) {
            Ok(reply) => Ok(parse_intent(&reply)),
            Err(e) if e.is("SESSION_CANCELLED") => Err(e),
            Err(e) => {
                warn!(code = %e.code, "intent classification failed, treating as ambiguous");
                Ok(Intent::Ambiguous)
            }
        }
    }
}
