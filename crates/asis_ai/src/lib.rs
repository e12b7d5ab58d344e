pub mod answer;
pub mod embeddings;
pub mod evidence;
pub mod guardrails;
pub mod intake;
pub mod llm;
pub mod memory;
pub mod ollama;
pub mod retrieve;
pub mod service;
pub mod session;

pub use answer::{AnswerResult, AnswerSource, RetrievalAnswerer};
pub use service::ChatService;
pub use session::SessionStore;
