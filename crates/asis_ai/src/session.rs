use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use asis_core::config::Settings;
use asis_core::error::AppError;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::evidence::IngestSummary;
use crate::intake::BmiStage;
use crate::memory::ConversationMemory;
use crate::retrieve::VectorIndex;

pub struct SessionDocument {
    pub summary: IngestSummary,
    pub index: Arc<dyn VectorIndex>,
}

/// Everything one session owns. Never shared with another session.
#[derive(Default)]
pub struct SessionState {
    pub document: Option<SessionDocument>,
    pub memory: ConversationMemory,
    pub bmi: BmiStage,
}

impl SessionState {
    /// Replaces the document. Old turns cite chunks that no longer exist, so memory goes too.
    pub fn replace_document(&mut self, document: SessionDocument) {
        self.document = Some(document);
        self.memory.clear();
    }
}

pub struct SessionHandle {
    id: String,
    state: Arc<Mutex<SessionState>>,
    cancel: CancellationToken,
    epoch: Instant,
    last_active_ms: AtomicU64,
}

impl SessionHandle {
    fn new(id: String) -> Self {
        Self {
            id,
            state: Arc::new(Mutex::new(SessionState::default())),
            cancel: CancellationToken::new(),
            epoch: Instant::now(),
            last_active_ms: AtomicU64::new(0),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn touch(&self) {
        let ms = u64::try_from(self.epoch.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.last_active_ms.store(ms, Ordering::Relaxed);
    }

    pub fn idle_for(&self) -> Duration {
        let last = Duration::from_millis(self.last_active_ms.load(Ordering::Relaxed));
        self.epoch.elapsed().saturating_sub(last)
    }

    /// Claims the session for one operation. A second concurrent operation is rejected, not queued.
    pub fn try_begin(&self) -> Result<OwnedMutexGuard<SessionState>, AppError> {
        if self.is_closed() {
            return Err(AppError::new("SESSION_CANCELLED", "Session is closed")
                .with_details(format!("session_id={}", self.id)));
        }
        let guard = self.state.clone().try_lock_owned().map_err(|_| {
            AppError::new("SESSION_BUSY", "Session is already handling a message")
                .with_details(format!("session_id={}", self.id))
                .with_retryable(true)
        })?;
        self.touch();
        Ok(guard)
    }

    fn is_busy(&self) -> bool {
        self.state.try_lock().is_err()
    }

    fn close(&self) {
        self.cancel.cancel();
    }
}

/// Process-wide map of live sessions.
pub struct SessionStore {
    sessions: RwLock<HashMap<String, Arc<SessionHandle>>>,
    max_sessions: usize,
    idle_timeout: Option<Duration>,
}

impl SessionStore {
    pub fn new(max_sessions: usize, idle_timeout: Option<Duration>) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            max_sessions,
            idle_timeout,
        }
    }

    pub fn from_settings(s: &Settings) -> Self {
        Self::new(s.max_sessions, s.session_idle_timeout())
    }

    pub async fn create(&self) -> Result<Arc<SessionHandle>, AppError> {
        let mut map = self.sessions.write().await;
        if map.len() >= self.max_sessions {
            return Err(AppError::new("SESSION_LIMIT_REACHED", "Too many live sessions")
                .with_details(format!("max_sessions={}", self.max_sessions))
                .with_retryable(true));
        }
        let id = Uuid::new_v4().to_string();
        let handle = Arc::new(SessionHandle::new(id.clone()));
        handle.touch();
        map.insert(id.clone(), handle.clone());
        info!(session_id = %id, live = map.len(), "session created");
        Ok(handle)
    }

    /// Looks up `id`, creating it under that id when unknown.
    pub async fn get_or_create(&self, id: &str) -> Result<Arc<SessionHandle>, AppError> {
        if let Some(h) = self.sessions.read().await.get(id) {
            return Ok(h.clone());
        }
        let mut map = self.sessions.write().await;
        if let Some(h) = map.get(id) {
            return Ok(h.clone());
        }
        if map.len() >= self.max_sessions {
            return Err(AppError::new("SESSION_LIMIT_REACHED", "Too many live sessions")
                .with_details(format!("max_sessions={}", self.max_sessions))
                .with_retryable(true));
        }
        let handle = Arc::new(SessionHandle::new(id.to_string()));
        handle.touch();
        map.insert(id.to_string(), handle.clone());
        info!(session_id = %id, live = map.len(), "session created");
        Ok(handle)
    }

    pub async fn get(&self, id: &str) -> Result<Arc<SessionHandle>, AppError> {
        self.sessions
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| {
                AppError::new("SESSION_NOT_FOUND", "Unknown session")
                    .with_details(format!("session_id={id}"))
            })
    }

    /// Removes the session and cancels anything still running for it.
    pub async fn close(&self, id: &str) -> bool {
        let removed = self.sessions.write().await.remove(id);
        match removed {
            Some(h) => {
                h.close();
                info!(session_id = %id, "session closed");
                true
            }
            None => false,
        }
    }

    /// Removes sessions idle past the timeout. Sessions mid-operation are kept.
    pub async fn sweep_idle(&self) -> usize {
        let Some(timeout) = self.idle_timeout else {
            return 0;
        };
        let mut map = self.sessions.write().await;
        let expired: Vec<String> = map
            .values()
            .filter(|h| !h.is_busy() && h.idle_for() >= timeout)
            .map(|h| h.id.clone())
            .collect();
        for id in &expired {
            if let Some(h) = map.remove(id) {
                h.close();
                info!(session_id = %id, "session expired");
            }
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
