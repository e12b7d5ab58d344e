use std::collections::BTreeSet;
use std::sync::Arc;

use asis_core::clock::now_rfc3339_utc;
use asis_core::config::Settings;
use asis_core::error::AppError;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::embeddings::Embedder;
use crate::evidence::PagePosition;
use crate::guardrails::validate_question;
use crate::llm::{generate_with_retry, GenerationCall, Llm, RetryPolicy};
use crate::memory::{ConversationMemory, ConversationTurn};
use crate::retrieve::{snippet_first_chars, ScoredChunk, VectorIndex};

mod prompts;

pub use prompts::{NO_CONTEXT_MARKER, NO_CONTEXT_NOTICE};

const EXCERPT_CHARS: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct AnswerSettings {
    pub chat_model: String,
    pub embedding_model: String,
    pub top_k: usize,
    pub context_budget_chars: usize,
    pub temperature: f32,
    pub retry: RetryPolicy,
}

impl AnswerSettings {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            chat_model: s.chat_model.clone(),
            embedding_model: s.embedding_model.clone(),
            top_k: s.top_k,
            context_budget_chars: s.context_budget_chars,
            temperature: s.qa_temperature,
            retry: RetryPolicy {
                max_attempts: s.max_generation_attempts,
                base_delay: s.retry_base_delay(),
            },
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerSource {
    pub id: String,
    /// `source_<n>`, n being the position in `AnswerResult::sources`.
    pub label: String,
    pub excerpt: String,
    pub page: PagePosition,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnswerResult {
    /// Model output, verbatim, after `NO_CONTEXT_NOTICE` when nothing was retrieved.
    pub text: String,
    pub sources: Vec<AnswerSource>,
}

impl AnswerResult {
    pub fn sources_footer(&self) -> String {
        if self.sources.is_empty() {
            return "No se encontraron fuentes".to_string();
        }
        let names: Vec<String> = self
            .sources
            .iter()
            .map(|s| format!("{} ({})", s.label, s.page.label()))
            .collect();
        format!("Fuentes: {}", names.join(", "))
    }

    /// Text for the chat transport. Memory keeps the verbatim answer.
    pub fn render_with_footer(&self) -> String {
        format!("{}\n{}", self.text.trim_end(), self.sources_footer())
    }
}

/// A computed turn that has not been recorded yet.
#[derive(Debug, Clone, PartialEq)]
pub struct AnsweredTurn {
    pub result: AnswerResult,
    pub turn: ConversationTurn,
}

/// Retrieval + memory + generation for one question.
pub struct RetrievalAnswerer {
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn Llm>,
    settings: AnswerSettings,
}

impl RetrievalAnswerer {
    pub fn new(embedder: Arc<dyn Embedder>, llm: Arc<dyn Llm>, settings: AnswerSettings) -> Self {
        Self {
            embedder,
            llm,
            settings,
        }
    }

    /// Computes the answer without touching `memory`.
    pub fn answer(
        &self,
        index: &dyn VectorIndex,
        memory: &ConversationMemory,
        question: &str,
        cancel: &CancellationToken,
        mut sink: Option<&mut dyn FnMut(&str)>,
    ) -> Result<AnsweredTurn, AppError> {
        let question = validate_question(question)?;

        let query = self.standalone_question(memory, question, cancel)?;
        let hits = self.retrieve(index, &query)?;
        let sources = dedup_sources(&hits);

        let context_blocks = build_context_blocks(&sources, &hits);
        // Only the history is trimmed to fit.
        let template = prompts::answer_prompt(&context_blocks, "", question);
        let history_budget = self
            .settings
            .context_budget_chars
            .saturating_sub(template.chars().count());
        let transcript = memory.render_transcript(history_budget);
        let prompt = prompts::answer_prompt(&context_blocks, &transcript, question);
        let prompt_chars = prompt.chars().count();
        if prompt_chars > self.settings.context_budget_chars {
            warn!(
                prompt_chars,
                budget = self.settings.context_budget_chars,
                "excerpts and question alone exceed the context budget"
            );
        }
        debug!(
            prompt_chars,
            history_turns = memory.render(history_budget).len(),
            sources = sources.len(),
            "answer prompt assembled"
        );

        let call = GenerationCall {
            model: &self.settings.chat_model,
            prompt: &prompt,
            temperature: self.settings.temperature,
        };
        let notice = sources.is_empty().then(|| format!("{NO_CONTEXT_NOTICE}\n"));
        if let Some(n) = notice.as_deref() {
            cancel_check(cancel)?;
            if let Some(s) = sink.as_deref_mut() {
                s(n);
            }
        }
        let generated =
            generate_with_retry(self.llm.as_ref(), &call, self.settings.retry, cancel, sink)?;
        let text = match notice {
            Some(n) => format!("{n}{generated}"),
            None => generated,
        };

        let turn = ConversationTurn {
            question: question.to_string(),
            answer: text.clone(),
            cited_chunk_ids: sources.iter().map(|s| s.id.clone()).collect(),
            asked_at: now_rfc3339_utc()?,
        };
        Ok(AnsweredTurn {
            result: AnswerResult { text, sources },
            turn,
        })
    }

    /// Answers and records the turn. Memory is untouched on failure or cancellation.
    pub fn answer_and_record(
        &self,
        index: &dyn VectorIndex,
        memory: &mut ConversationMemory,
        question: &str,
        cancel: &CancellationToken,
        sink: Option<&mut dyn FnMut(&str)>,
    ) -> Result<AnswerResult, AppError> {
        let answered = self.answer(index, memory, question, cancel, sink)?;
        cancel_check(cancel)?;
        memory.append(answered.turn);
        Ok(answered.result)
    }

    fn standalone_question(
        &self,
        memory: &ConversationMemory,
        question: &str,
        cancel: &CancellationToken,
    ) -> Result<String, AppError> {
        if memory.is_empty() {
            return Ok(question.to_string());
        }
        let template = prompts::condense_question_prompt("", question);
        let history_budget = self
            .settings
            .context_budget_chars
            .saturating_sub(template.chars().count());
        let transcript = memory.render_transcript(history_budget);
        let prompt = prompts::condense_question_prompt(&transcript, question);
        let call = GenerationCall {
            model: &self.settings.chat_model,
            prompt: &prompt,
            temperature: self.settings.temperature,
        };
        let single = RetryPolicy {
            max_attempts: 1,
            ..self.settings.retry
        };
        match generate_with_retry(self.llm.as_ref(), &call, single, cancel, None) {
            Ok(out) => {
                let condensed = out.trim();
                if condensed.is_empty() {
                    Ok(question.to_string())
                } else {
                    Ok(condensed.to_string())
                }
            }
            Err(e) if e.is("SESSION_CANCELLED") => Err(e),
            Err(e) => {
                warn!(code = %e.code, "question reformulation failed, using raw question");
                Ok(question.to_string())
            }
        }
    }

    fn retrieve(&self, index: &dyn VectorIndex, query: &str) -> Result<Vec<ScoredChunk>, AppError> {
        if index.is_empty() {
            return Ok(Vec::new());
        }
        let vector = self
            .embedder
            .embed(&self.settings.embedding_model, query)
            .map_err(|e| retrieval_error("Failed to embed the question", &e))?;
        if vector.len() != index.dims() {
            return Err(AppError::new(
                "AI_RETRIEVAL_FAILED",
                "Query embedding dims do not match index dims",
            )
            .with_details(format!("index_dims={}; query_dims={}", index.dims(), vector.len())));
        }
        let hits = index
            .query(&vector, self.settings.top_k)
            .map_err(|e| retrieval_error("Index query failed", &e))?;
        for h in &hits {
            debug!(chunk_id = %h.chunk.chunk_id, score = h.score, "retrieved chunk");
        }
        Ok(hits)
    }
}

fn cancel_check(cancel: &CancellationToken) -> Result<(), AppError> {
    if cancel.is_cancelled() {
        return Err(crate::llm::cancelled());
    }
    Ok(())
}

fn retrieval_error(message: &str, cause: &AppError) -> AppError {
    AppError::new("AI_RETRIEVAL_FAILED", message)
        .with_details(format!("cause={cause}"))
        .with_retryable(cause.retryable)
}

fn dedup_sources(hits: &[ScoredChunk]) -> Vec<AnswerSource> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for h in hits {
        if !seen.insert(h.chunk.chunk_id.clone()) {
            continue;
        }
        out.push(AnswerSource {
            id: h.chunk.chunk_id.clone(),
            label: format!("source_{}", out.len()),
            excerpt: snippet_first_chars(&h.chunk.text, EXCERPT_CHARS),
            page: h.chunk.page,
        });
    }
    out
}

fn build_context_blocks(sources: &[AnswerSource], hits: &[ScoredChunk]) -> String {
    if sources.is_empty() {
        return NO_CONTEXT_MARKER.to_string();
    }
    let mut blocks: Vec<String> = Vec::new();
    for s in sources {
        let Some(hit) = hits.iter().find(|h| h.chunk.chunk_id == s.id) else {
            continue;
        };
        blocks.push(format!("[[{}]] ({})\n{}", s.label, s.page.label(), hit.chunk.text.trim()));
    }
    blocks.join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evidence::Chunk;
    use pretty_assertions::assert_eq;

    fn hit(id: &str, page: PagePosition) -> ScoredChunk {
        ScoredChunk {
            chunk: Chunk {
                chunk_id: id.to_string(),
                source_id: "doc.pdf".to_string(),
                sequence_index: 0,
                page,
                char_range: [0, 4],
                text: format!("text {id}"),
            },
            score: 1.0,
        }
    }

    #[test]
    fn sources_are_deduplicated_in_first_seen_order() {
        let hits = vec![
            hit("b", PagePosition::Page(3)),
            hit("a", PagePosition::Unknown),
            hit("b", PagePosition::Page(3)),
        ];
        let sources = dedup_sources(&hits);
        let ids: Vec<&str> = sources.iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
        assert_eq!(sources[1].label, "source_1");
    }

    #[test]
    fn footer_lists_labels_and_pages() {
        let r = AnswerResult {
            text: "Respuesta".to_string(),
            sources: dedup_sources(&[hit("b", PagePosition::Page(3)), hit("a", PagePosition::Unknown)]),
        };
        assert_eq!(
            r.render_with_footer(),
            "Respuesta\nFuentes: source_0 (Página 3), source_1 (Página desconocida)"
        );
        let empty = AnswerResult {
            text: "Respuesta".to_string(),
            sources: Vec::new(),
        };
        assert_eq!(empty.render_with_footer(), "Respuesta\nNo se encontraron fuentes");
    }

    #[test]
    fn context_blocks_fall_back_to_marker() {
        assert_eq!(build_context_blocks(&[], &[]), NO_CONTEXT_MARKER);
        let hits = vec![hit("a", PagePosition::Page(0))];
        let blocks = build_context_blocks(&dedup_sources(&hits), &hits);
        assert_eq!(blocks, "[[source_0]] (Página 0)\ntext a");
    }
}
