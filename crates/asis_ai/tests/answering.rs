use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use asis_ai::answer::{AnswerSettings, RetrievalAnswerer, NO_CONTEXT_MARKER, NO_CONTEXT_NOTICE};
use asis_ai::embeddings::Embedder;
use asis_ai::evidence::{Chunk, PagePosition};
use asis_ai::llm::{Llm, RetryPolicy};
use asis_ai::memory::{ConversationMemory, ConversationTurn};
use asis_ai::retrieve::{MemoryIndex, ScoredChunk, VectorIndex};
use asis_core::error::AppError;
use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

#[derive(Default)]
struct ScriptedLlm {
    replies: Mutex<VecDeque<Result<String, AppError>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    fn new(replies: Vec<Result<String, AppError>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("lock").clone()
    }
}

impl Llm for ScriptedLlm {
    fn generate(&self, _model: &str, prompt: &str, _temperature: f32) -> Result<String, AppError> {
        self.prompts.lock().expect("lock").push(prompt.to_string());
        self.replies
            .lock()
            .expect("lock")
            .pop_front()
            .unwrap_or_else(|| Err(AppError::new("AI_LLM_FAILED", "script exhausted")))
    }
}

struct AlwaysDown {
    calls: AtomicU32,
}

impl Llm for AlwaysDown {
    fn generate(&self, _model: &str, _prompt: &str, _temperature: f32) -> Result<String, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(AppError::new("AI_LLM_FAILED", "503").with_retryable(true))
    }
}

struct TwoTokenLlm;

impl Llm for TwoTokenLlm {
    fn generate(&self, _model: &str, _prompt: &str, _temperature: f32) -> Result<String, AppError> {
        Ok("Hola mundo".to_string())
    }

    fn generate_stream(
        &self,
        _model: &str,
        _prompt: &str,
        _temperature: f32,
        sink: &mut dyn FnMut(&str),
    ) -> Result<String, AppError> {
        sink("Hola");
        sink(" mundo");
        Ok("Hola mundo".to_string())
    }
}

#[derive(Default)]
struct RecordingEmbedder {
    inputs: Mutex<Vec<String>>,
    fail: bool,
}

impl Embedder for RecordingEmbedder {
    fn embed(&self, _model: &str, input: &str) -> Result<Vec<f32>, AppError> {
        self.inputs.lock().expect("lock").push(input.to_string());
        if self.fail {
            return Err(AppError::new("AI_EMBEDDINGS_FAILED", "down").with_retryable(true));
        }
        Ok(vec![1.0, 0.0])
    }
}

/// Returns a fixed hit list, duplicates included.
struct FixedIndex {
    hits: Vec<ScoredChunk>,
}

impl VectorIndex for FixedIndex {
    fn dims(&self) -> usize {
        2
    }

    fn len(&self) -> usize {
        self.hits.len()
    }

    fn query(&self, _vector: &[f32], k: usize) -> Result<Vec<ScoredChunk>, AppError> {
        Ok(self.hits.iter().take(k).cloned().collect())
    }
}

fn hit(id: &str, seq: u32, page: u32, text: &str) -> ScoredChunk {
    ScoredChunk {
        chunk: Chunk {
            chunk_id: id.to_string(),
            source_id: "manual.pdf".to_string(),
            sequence_index: seq,
            page: PagePosition::Page(page),
            char_range: [0, text.chars().count() as u32],
            text: text.to_string(),
        },
        score: 0.9,
    }
}

fn fixed_index() -> FixedIndex {
    FixedIndex {
        hits: vec![
            hit("c1", 1, 3, "El IMC relaciona peso y altura."),
            hit("c2", 2, 4, "Un IMC normal está entre 18.5 y 25."),
            hit("c1", 1, 3, "El IMC relaciona peso y altura."),
        ],
    }
}

fn settings(budget: usize) -> AnswerSettings {
    AnswerSettings {
        chat_model: "chat".to_string(),
        embedding_model: "embed".to_string(),
        top_k: 4,
        context_budget_chars: budget,
        temperature: 0.0,
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
        },
    }
}

fn turn(q: &str, a: &str) -> ConversationTurn {
    ConversationTurn {
        question: q.to_string(),
        answer: a.to_string(),
        cited_chunk_ids: Vec::new(),
        asked_at: "2024-01-01T00:00:00Z".to_string(),
    }
}

#[test]
fn empty_index_still_answers_with_no_context_marker() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok("42".to_string())]));
    let embedder = Arc::new(RecordingEmbedder::default());
    let answerer = RetrievalAnswerer::new(embedder.clone(), llm.clone(), settings(12_000));
    let index = MemoryIndex::build(Vec::new()).expect("index");
    let mut memory = ConversationMemory::new();

    let result = answerer
        .answer_and_record(&index, &mut memory, "What is X?", &CancellationToken::new(), None)
        .expect("answer");

    assert!(result.sources.is_empty());
    // The notice does not depend on what the model says.
    assert_eq!(result.text, format!("{NO_CONTEXT_NOTICE}\n42"));
    assert_eq!(memory.turns()[0].answer, result.text);
    assert_eq!(memory.len(), 1);
    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains(NO_CONTEXT_MARKER));
    assert!(embedder.inputs.lock().expect("lock").is_empty());
}

#[test]
fn sources_are_the_retrieved_chunks_without_duplicates() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok("Relaciona peso y altura [[source_0]].".to_string())]));
    let answerer = RetrievalAnswerer::new(Arc::new(RecordingEmbedder::default()), llm.clone(), settings(12_000));
    let mut memory = ConversationMemory::new();

    let result = answerer
        .answer_and_record(&fixed_index(), &mut memory, "¿Qué es el IMC?", &CancellationToken::new(), None)
        .expect("answer");

    let ids: Vec<&str> = result.sources.iter().map(|s| s.id.as_str()).collect();
    assert_eq!(ids, vec!["c1", "c2"]);
    let labels: Vec<&str> = result.sources.iter().map(|s| s.label.as_str()).collect();
    assert_eq!(labels, vec!["source_0", "source_1"]);
    assert_eq!(result.sources[1].page, PagePosition::Page(4));

    // Answer text is stored verbatim; the footer is only for rendering.
    assert_eq!(result.text, "Relaciona peso y altura [[source_0]].");
    assert_eq!(
        result.render_with_footer(),
        "Relaciona peso y altura [[source_0]].\nFuentes: source_0 (Página 3), source_1 (Página 4)"
    );
    assert_eq!(memory.turns()[0].answer, result.text);
    assert_eq!(memory.turns()[0].cited_chunk_ids, vec!["c1".to_string(), "c2".to_string()]);

    let prompt = &llm.prompts()[0];
    assert!(prompt.contains("[[source_0]] (Página 3)"));
    assert!(prompt.contains("[[source_1]] (Página 4)"));
    assert!(!prompt.contains("[[source_2]]"));
}

#[test]
fn exhausted_generation_leaves_memory_unchanged() {
    let llm = Arc::new(AlwaysDown { calls: AtomicU32::new(0) });
    let answerer = RetrievalAnswerer::new(Arc::new(RecordingEmbedder::default()), llm.clone(), settings(12_000));
    let mut memory = ConversationMemory::new();
    memory.append(turn("Hola", "Hola, ¿en qué te ayudo?"));

    let err = answerer
        .answer_and_record(&fixed_index(), &mut memory, "¿Qué es el IMC?", &CancellationToken::new(), None)
        .unwrap_err();

    assert_eq!(err.code, "AI_GENERATION_UNAVAILABLE");
    assert!(err.retryable);
    assert_eq!(memory.len(), 1);
    // One reformulation attempt, then three answer attempts.
    assert_eq!(llm.calls.load(Ordering::SeqCst), 4);
}

#[test]
fn reformulation_failure_falls_back_to_raw_question() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Err(AppError::new("AI_LLM_FAILED", "bad request")),
        Ok("Es un índice.".to_string()),
    ]));
    let embedder = Arc::new(RecordingEmbedder::default());
    let answerer = RetrievalAnswerer::new(embedder.clone(), llm, settings(12_000));
    let mut memory = ConversationMemory::new();
    memory.append(turn("¿De qué trata el documento?", "Del IMC."));

    answerer
        .answer_and_record(&fixed_index(), &mut memory, "¿y eso qué es?", &CancellationToken::new(), None)
        .expect("answer");

    assert_eq!(memory.len(), 2);
    assert_eq!(*embedder.inputs.lock().expect("lock"), vec!["¿y eso qué es?".to_string()]);
}

#[test]
fn reformulated_question_drives_retrieval() {
    let llm = Arc::new(ScriptedLlm::new(vec![
        Ok("¿Qué es el IMC?".to_string()),
        Ok("Es un índice.".to_string()),
    ]));
    let embedder = Arc::new(RecordingEmbedder::default());
    let answerer = RetrievalAnswerer::new(embedder.clone(), llm.clone(), settings(12_000));
    let mut memory = ConversationMemory::new();
    memory.append(turn("¿De qué trata el documento?", "Del IMC."));

    answerer
        .answer_and_record(&fixed_index(), &mut memory, "¿y eso qué es?", &CancellationToken::new(), None)
        .expect("answer");

    assert_eq!(*embedder.inputs.lock().expect("lock"), vec!["¿Qué es el IMC?".to_string()]);
    let prompts = llm.prompts();
    assert!(prompts[0].contains("Usuario: ¿De qué trata el documento?"));
    assert!(prompts[1].contains("Pregunta: ¿y eso qué es?"));
    // The recorded turn keeps what the user actually asked.
    assert_eq!(memory.turns()[1].question, "¿y eso qué es?");
}

#[test]
fn embedding_failure_is_a_retrieval_error() {
    let llm = Arc::new(ScriptedLlm::new(Vec::new()));
    let embedder = Arc::new(RecordingEmbedder {
        inputs: Mutex::new(Vec::new()),
        fail: true,
    });
    let answerer = RetrievalAnswerer::new(embedder, llm.clone(), settings(12_000));
    let mut memory = ConversationMemory::new();

    let err = answerer
        .answer_and_record(&fixed_index(), &mut memory, "¿Qué es el IMC?", &CancellationToken::new(), None)
        .unwrap_err();

    assert_eq!(err.code, "AI_RETRIEVAL_FAILED");
    assert!(err.retryable);
    assert!(memory.is_empty());
    assert!(llm.prompts().is_empty());
}

#[test]
fn history_is_truncated_from_the_oldest_turn() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok("q".to_string()), Ok("a".to_string())]));
    let answerer = RetrievalAnswerer::new(Arc::new(RecordingEmbedder::default()), llm.clone(), settings(700));
    let index = MemoryIndex::build(Vec::new()).expect("index");
    let mut memory = ConversationMemory::new();
    memory.append(turn(&"x".repeat(300), "respuesta antigua"));
    memory.append(turn("pregunta reciente", "respuesta reciente"));

    answerer
        .answer_and_record(&index, &mut memory, "¿algo más?", &CancellationToken::new(), None)
        .expect("answer");

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("pregunta reciente"));
    assert!(!prompts[1].contains("respuesta antigua"));
    assert!(prompts[1].chars().count() <= 700);
}

#[test]
fn long_history_keeps_the_whole_prompt_within_budget() {
    let budget = 3000;
    let llm = Arc::new(ScriptedLlm::new(vec![Ok("¿Qué es el IMC?".to_string()), Ok("Un índice.".to_string())]));
    let answerer = RetrievalAnswerer::new(Arc::new(RecordingEmbedder::default()), llm.clone(), settings(budget));
    let index = FixedIndex {
        hits: (0..4u32)
            .map(|i| hit(&format!("c{i}"), i, i + 1, &"a".repeat(400)))
            .collect(),
    };
    let mut memory = ConversationMemory::new();
    for i in 0..100 {
        memory.append(turn(&format!("pregunta {i}"), &format!("respuesta {i}")));
    }

    answerer
        .answer_and_record(&index, &mut memory, "¿y eso?", &CancellationToken::new(), None)
        .expect("answer");

    let prompts = llm.prompts();
    assert_eq!(prompts.len(), 2);
    for p in &prompts {
        assert!(p.chars().count() <= budget, "prompt has {} chars", p.chars().count());
    }
    let answer_prompt = &prompts[1];
    assert!(answer_prompt.contains("[[source_3]]"));
    assert!(answer_prompt.contains("Usuario: pregunta 99\n"));
    assert!(!answer_prompt.contains("Usuario: pregunta 0\n"));
}

#[test]
fn streaming_pushes_tokens_and_returns_full_text() {
    let answerer = RetrievalAnswerer::new(Arc::new(RecordingEmbedder::default()), Arc::new(TwoTokenLlm), settings(12_000));
    let mut memory = ConversationMemory::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut sink = |t: &str| tokens.push(t.to_string());

    let result = answerer
        .answer_and_record(&fixed_index(), &mut memory, "¿Qué es el IMC?", &CancellationToken::new(), Some(&mut sink))
        .expect("answer");

    assert_eq!(result.text, "Hola mundo");
    assert_eq!(tokens, vec!["Hola".to_string(), " mundo".to_string()]);
    assert_eq!(memory.len(), 1);
}

#[test]
fn streamed_answer_without_context_starts_with_the_notice() {
    let answerer = RetrievalAnswerer::new(Arc::new(RecordingEmbedder::default()), Arc::new(TwoTokenLlm), settings(12_000));
    let index = MemoryIndex::build(Vec::new()).expect("index");
    let mut memory = ConversationMemory::new();
    let mut tokens: Vec<String> = Vec::new();
    let mut sink = |t: &str| tokens.push(t.to_string());

    let result = answerer
        .answer_and_record(&index, &mut memory, "¿Qué es X?", &CancellationToken::new(), Some(&mut sink))
        .expect("answer");

    assert!(result.text.starts_with(NO_CONTEXT_NOTICE));
    assert_eq!(tokens.concat(), result.text);
    assert_eq!(memory.turns()[0].answer, result.text);
}

#[test]
fn cancelled_and_blank_questions_record_nothing() {
    let llm = Arc::new(ScriptedLlm::new(vec![Ok("unused".to_string())]));
    let answerer = RetrievalAnswerer::new(Arc::new(RecordingEmbedder::default()), llm.clone(), settings(12_000));
    let mut memory = ConversationMemory::new();

    let token = CancellationToken::new();
    token.cancel();
    let err = answerer
        .answer_and_record(&fixed_index(), &mut memory, "¿Qué es el IMC?", &token, None)
        .unwrap_err();
    assert_eq!(err.code, "SESSION_CANCELLED");

    let err = answerer
        .answer_and_record(&fixed_index(), &mut memory, "   ", &CancellationToken::new(), None)
        .unwrap_err();
    assert_eq!(err.code, "AI_QUESTION_EMPTY");

    assert!(memory.is_empty());
    assert!(llm.prompts().is_empty());
}
