use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use asis_core::config::Settings;
use asis_core::error::AppError;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::answer::{AnswerResult, AnswerSettings, RetrievalAnswerer};
use crate::embeddings::{Embedder, OllamaEmbedder};
use crate::evidence::{IngestSettings, IngestSummary, Ingestor, UploadedFile};
use crate::intake::{BmiDialogue, BmiSettings};
use crate::llm::{cancelled, Llm, OllamaLlm};
use crate::ollama::OllamaClient;
use crate::retrieve::{IndexBuilder, MemoryIndexBuilder};
use crate::session::{SessionDocument, SessionStore};

/// The only surface a chat transport talks to.
pub struct ChatService {
    store: Arc<SessionStore>,
    ingestor: Arc<Ingestor>,
    answerer: Arc<RetrievalAnswerer>,
    bmi: Arc<BmiDialogue>,
    upload_wait: Duration,
}

impl ChatService {
    pub fn new(
        settings: &Settings,
        store: Arc<SessionStore>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn Llm>,
        index_builder: Arc<dyn IndexBuilder>,
    ) -> Self {
        let ingestor = Ingestor::new(
            embedder.clone(),
            index_builder,
            IngestSettings::from_settings(settings),
        );
        let answerer =
            RetrievalAnswerer::new(embedder, llm.clone(), AnswerSettings::from_settings(settings));
        let bmi = BmiDialogue::new(llm, BmiSettings::from_settings(settings));
        Self {
            store,
            ingestor: Arc::new(ingestor),
            answerer: Arc::new(answerer),
            bmi: Arc::new(bmi),
            upload_wait: settings.upload_wait_timeout(),
        }
    }

    /// Local Ollama for both models, in-memory index.
    pub fn with_ollama(settings: &Settings, store: Arc<SessionStore>) -> Result<Self, AppError> {
        settings.validate()?;
        let client = OllamaClient::new(&settings.ollama_base_url)?;
        let embedder: Arc<dyn Embedder> = Arc::new(OllamaEmbedder::new(client.clone()));
        let llm: Arc<dyn Llm> = Arc::new(OllamaLlm::new(client));
        Ok(Self::new(settings, store, embedder, llm, Arc::new(MemoryIndexBuilder)))
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub async fn start_session(&self) -> Result<String, AppError> {
        Ok(self.store.create().await?.id().to_string())
    }

    pub async fn close_session(&self, session_id: &str) -> bool {
        self.store.close(session_id).await
    }

    /// Ingests `file` as the session's document, replacing any previous one.
    /// On failure the session keeps its previous document and memory.
    pub async fn upload_document(
        &self,
        session_id: &str,
        file: UploadedFile,
    ) -> Result<IngestSummary, AppError> {
        let handle = self.store.get_or_create(session_id).await?;
        let mut guard = handle.try_begin()?;
        let cancel = handle.cancel_token();

        let ingestor = self.ingestor.clone();
        let task_cancel = cancel.clone();
        let ingested = run_blocking(cancel, move || ingestor.ingest(&file, &task_cancel)).await?;

        let summary = ingested.summary.clone();
        guard.replace_document(SessionDocument {
            summary: ingested.summary,
            index: Arc::from(ingested.index),
        });
        handle.touch();
        info!(
            session_id = %session_id,
            source_id = %summary.source_id,
            chunks = summary.chunk_count,
            "session document ready"
        );
        Ok(summary)
    }

    pub async fn ask(&self, session_id: &str, question: &str) -> Result<AnswerResult, AppError> {
        self.ask_inner(session_id, question, None).await
    }

    /// Like `ask`, pushing tokens to `tokens` as they are generated.
    pub async fn ask_streaming(
        &self,
        session_id: &str,
        question: &str,
        tokens: UnboundedSender<String>,
    ) -> Result<AnswerResult, AppError> {
        self.ask_inner(session_id, question, Some(tokens)).await
    }

    async fn ask_inner(
        &self,
        session_id: &str,
        question: &str,
        tokens: Option<UnboundedSender<String>>,
    ) -> Result<AnswerResult, AppError> {
        let handle = self.store.get(session_id).await?;
        let mut guard = handle.try_begin()?;
        if guard.document.is_none() {
            return Err(not_ready(session_id));
        }
        let cancel = handle.cancel_token();

        let answerer = self.answerer.clone();
        let question = question.to_string();
        let task_cancel = cancel.clone();
        let not_ready_err = not_ready(session_id);
        let result = run_blocking(cancel, move || {
            let state = &mut *guard;
            let Some(doc) = state.document.as_ref() else {
                return Err(not_ready_err);
            };
            let index = doc.index.as_ref();
            match tokens {
                Some(tx) => {
                    let mut sink = move |t: &str| {
                        // A dropped receiver only means nobody is watching the stream.
                        let _ = tx.send(t.to_string());
                    };
                    answerer.answer_and_record(
                        index,
                        &mut state.memory,
                        &question,
                        &task_cancel,
                        Some(&mut sink),
                    )
                }
                None => {
                    answerer.answer_and_record(index, &mut state.memory, &question, &task_cancel, None)
                }
            }
        })
        .await;

        match &result {
            Ok(r) => info!(session_id = %session_id, sources = r.sources.len(), "answer produced"),
            Err(e) => warn!(session_id = %session_id, code = %e.code, "answer failed"),
        }
        handle.touch();
        result
    }

    pub fn bmi_greeting(&self) -> &'static str {
        self.bmi.greeting()
    }

    pub async fn bmi_message(&self, session_id: &str, text: &str) -> Result<String, AppError> {
        let handle = self.store.get_or_create(session_id).await?;
        let mut guard = handle.try_begin()?;
        let cancel = handle.cancel_token();

        let bmi = self.bmi.clone();
        let text = text.to_string();
        let task_cancel = cancel.clone();
        let reply =
            run_blocking(cancel, move || bmi.handle(&mut guard.bmi, &text, &task_cancel)).await?;
        handle.touch();
        Ok(reply.text)
    }

    pub async fn sweep_idle(&self) -> usize {
        self.store.sweep_idle().await
    }

    pub fn spawn_idle_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        let store = self.store.clone();
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            loop {
                tick.tick().await;
                let removed = store.sweep_idle().await;
                if removed > 0 {
                    info!(removed, "idle sessions swept");
                }
            }
        })
    }

    /// Bounds the wait for the transport to hand over a file.
    pub async fn await_upload<F>(&self, upload: F) -> Result<UploadedFile, AppError>
    where
        F: Future<Output = Result<UploadedFile, AppError>>,
    {
        match tokio::time::timeout(self.upload_wait, upload).await {
            Ok(res) => res,
            Err(_) => Err(AppError::new("INGEST_UPLOAD_TIMEOUT", "No file was uploaded in time")
                .with_details(format!("waited_secs={}", self.upload_wait.as_secs()))
                .with_retryable(true)),
        }
    }
}

fn not_ready(session_id: &str) -> AppError {
    AppError::new("SESSION_NOT_READY", "Session has no document yet")
        .with_details(format!("session_id={session_id}"))
}

/// Runs blocking model work off the runtime; the session's token wins the race on close.
async fn run_blocking<T, F>(cancel: CancellationToken, work: F) -> Result<T, AppError>
where
    F: FnOnce() -> Result<T, AppError> + Send + 'static,
    T: Send + 'static,
{
    let task = tokio::task::spawn_blocking(work);
    tokio::select! {
        _ = cancel.cancelled() => Err(cancelled()),
        joined = task => joined.map_err(|e| {
            AppError::new("SESSION_TASK_FAILED", "Background task failed").with_details(e.to_string())
        })?,
    }
}
