//! In-memory chat sessions.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use uuid::Uuid;

use super::errors::AgentError;
use crate::inference::Message;
use crate::TokioMutex;

/// One session's history. A turn holds the lock from start to finish, so
/// turns on the same session run one after another.
pub type SessionHandle = Arc<TokioMutex<Vec<Message>>>;

/// Conversation history per session id. Nothing is persisted.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new, empty session and return its id.
    pub fn create(&self) -> String {
        let id = Uuid::new_v4().to_string();
        self.lock().insert(id.clone(), SessionHandle::default());
        tracing::info!(session_id = %id, "session started");
        id
    }

    pub fn contains(&self, session_id: &str) -> bool {
        self.lock().contains_key(session_id)
    }

    pub fn session(&self, session_id: &str) -> Result<SessionHandle, AgentError> {
        self.lock()
            .get(session_id)
            .cloned()
            .ok_or_else(|| AgentError::SessionNotFound {
                session_id: session_id.to_string(),
            })
    }

    /// A copy of the session's history. Waits for a running turn to finish.
    pub async fn history(&self, session_id: &str) -> Result<Vec<Message>, AgentError> {
        let session = self.session(session_id)?;
        let history = session.lock().await.clone();
        Ok(history)
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, SessionHandle>> {
        // A poisoned map is still structurally valid
        self.sessions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
