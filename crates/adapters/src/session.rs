// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session store interface and the in-memory implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dd_core::{PipelineError, Session, SessionId};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Mutation applied to a session under the store's lock.
pub type SessionMutator = Box<dyn FnOnce(&mut Session) + Send>;

/// The session store collaborator.
///
/// Drydock never creates or expires sessions on its own; it looks them up
/// during admission and records operation metadata back onto them.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &SessionId) -> Result<Session, PipelineError>;

    async fn update(&self, id: &SessionId, mutate: SessionMutator) -> Result<(), PipelineError>;

    async fn list(&self) -> Result<Vec<Session>, PipelineError>;

    async fn delete(&self, id: &SessionId) -> Result<(), PipelineError>;
}

/// Process-local session store backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<SessionId, Session>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed or replace a session record.
    pub fn insert(&self, session: Session) {
        tracing::debug!(session = %session.id, "session stored");
        self.sessions.lock().insert(session.id.clone(), session);
    }

    /// Convenience constructor for a session valid for `ttl` from `now`.
    pub fn create(
        &self,
        id: impl Into<SessionId>,
        workspace_dir: impl Into<PathBuf>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Session {
        let expires_at = chrono::TimeDelta::from_std(ttl)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let session = Session {
            id: id.into(),
            workspace_dir: workspace_dir.into(),
            created_at: now,
            expires_at,
            metadata: HashMap::new(),
        };
        self.insert(session.clone());
        session
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &SessionId) -> Result<Session, PipelineError> {
        self.sessions
            .lock()
            .get(id)
            .cloned()
            .ok_or_else(|| PipelineError::not_found("session", id.as_str()))
    }

    async fn update(&self, id: &SessionId, mutate: SessionMutator) -> Result<(), PipelineError> {
        let mut sessions = self.sessions.lock();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| PipelineError::not_found("session", id.as_str()))?;
        mutate(session);
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Session>, PipelineError> {
        Ok(self.sessions.lock().values().cloned().collect())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), PipelineError> {
        tracing::debug!(session = %id, "session deleted");
        self.sessions
            .lock()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| PipelineError::not_found("session", id.as_str()))
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
