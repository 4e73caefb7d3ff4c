//! Session manager: tracks active agent sessions and enforces that a given
//! context (a channel or a workflow stage/pulse) has at most one of them
//! running at a time (spec.md §4.6).
//!
//! Grounded on krusty-core's single-assistant-at-a-time loop state, widened
//! here into a registry keyed by context since this crate runs many
//! short-lived sessions concurrently across different workflows and
//! channels. The two in-memory indices use `dashmap::DashMap` per this
//! crate's ambient-stack choice (ADR in SPEC_FULL.md §3), since both are
//! read and written from concurrently running agent runners without a
//! natural single owner to hold a `Mutex` for.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::Notify;

use crate::data::{AgentRole, ContextType, Session, SessionStatus};
use crate::storage::Repositories;

/// A cooperative cancellation token. The agent runner polls
/// `is_cancelled()` between stream chunks and tool calls; `cancel()` flips
/// the flag and wakes anything parked on `cancelled()`.
#[derive(Clone)]
pub struct CancellationHandle {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancellationHandle {
    pub fn new() -> Self {
        Self { flag: Arc::new(AtomicBool::new(false)), notify: Arc::new(Notify::new()) }
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolves once `cancel()` has been called, or immediately if it
    /// already has been.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

impl Default for CancellationHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// An in-memory handle to a running session, alongside its persisted row.
#[derive(Clone)]
pub struct ActiveSession {
    pub session: Session,
    pub cancellation: CancellationHandle,
}

/// Tracks active sessions by id and by context key, enforcing the
/// at-most-one-active-session-per-context invariant.
pub struct SessionManager {
    repositories: Arc<Repositories>,
    sessions: DashMap<String, ActiveSession>,
    context_index: DashMap<String, String>,
}

impl SessionManager {
    pub fn new(repositories: Arc<Repositories>) -> Self {
        Self { repositories, sessions: DashMap::new(), context_index: DashMap::new() }
    }

    /// Start a new session for `(context_type, context_id)`, stopping any
    /// session already active for that context first. Persists the new
    /// session row before making it visible in the in-memory indices.
    pub async fn start_session(
        &self,
        context_type: ContextType,
        context_id: impl Into<String>,
        agent_role: AgentRole,
        pulse_id: Option<String>,
    ) -> Result<Session> {
        let context_id = context_id.into();
        let context_key = format!("{}:{}", context_type.as_str(), context_id);

        if let Some(existing_id) = self.context_index.get(&context_key).map(|e| e.clone()) {
            self.stop_session(&existing_id).await?;
        }

        let mut session = Session::new(context_type, context_id, agent_role);
        if let Some(pulse_id) = pulse_id {
            session = session.with_pulse(pulse_id);
        }

        self.repositories.sessions.create(&session)?;

        let active = ActiveSession { session: session.clone(), cancellation: CancellationHandle::new() };
        self.context_index.insert(context_key, session.id.clone());
        self.sessions.insert(session.id.clone(), active);

        Ok(session)
    }

    /// Idempotent: stopping a session with no active entry (already
    /// stopped, or never started) is a no-op rather than an error.
    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Completed).await
    }

    /// A session completed its run normally (the agent runner's own
    /// fire-and-forget end-of-run path), distinct from an explicit
    /// caller-initiated `stop_session`.
    pub async fn complete_session(&self, session_id: &str) -> Result<()> {
        self.finish_session(session_id, SessionStatus::Completed).await
    }

    pub async fn error_session(&self, session_id: &str, reason: &str) -> Result<()> {
        tracing::warn!(session_id, reason, "session errored");
        self.finish_session(session_id, SessionStatus::Error).await
    }

    async fn finish_session(&self, session_id: &str, status: SessionStatus) -> Result<()> {
        let Some((_, active)) = self.sessions.remove(session_id) else {
            return Ok(());
        };

        active.cancellation.cancel();

        let context_key = active.session.context_key();
        self.context_index.remove_if(&context_key, |_, v| v.as_str() == session_id);

        self.repositories.sessions.update_status(session_id, status)?;
        Ok(())
    }

    pub fn get_session_by_context(&self, context_type: ContextType, context_id: &str) -> Option<ActiveSession> {
        let context_key = format!("{}:{}", context_type.as_str(), context_id);
        let session_id = self.context_index.get(&context_key)?.clone();
        self.sessions.get(&session_id).map(|e| e.clone())
    }

    pub fn has_active_session(&self, context_type: ContextType, context_id: &str) -> bool {
        self.get_session_by_context(context_type, context_id).is_some()
    }

    pub fn get_active_sessions(&self) -> Vec<ActiveSession> {
        self.sessions.iter().map(|e| e.value().clone()).collect()
    }

    pub fn get_active_session_count(&self) -> usize {
        self.sessions.len()
    }

    pub fn cancellation_for(&self, session_id: &str) -> Option<CancellationHandle> {
        self.sessions.get(session_id).map(|e| e.cancellation.clone())
    }

    /// Rehydrate a session that is marked active in storage but missing from
    /// the in-memory index, e.g. after a process restart. Looks up the
    /// active session straight from storage by context rather than through
    /// `context_index`, since both in-memory indices start empty on a fresh
    /// process and must never gate a restore backed by persisted status.
    /// Returns `None` if no active session is recorded for the context
    /// either in memory or in storage.
    pub async fn get_or_restore_session(&self, context_type: ContextType, context_id: &str) -> Result<Option<ActiveSession>> {
        if let Some(active) = self.get_session_by_context(context_type, context_id) {
            return Ok(Some(active));
        }

        let Some(session) = self.repositories.sessions.get_active_by_context(context_type, context_id)? else {
            return Ok(None);
        };

        let context_key = format!("{}:{}", context_type.as_str(), context_id);
        let active = ActiveSession { session: session.clone(), cancellation: CancellationHandle::new() };
        self.context_index.insert(context_key, session.id.clone());
        self.sessions.insert(session.id.clone(), active.clone());
        Ok(Some(active))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Database;

    fn manager() -> SessionManager {
        SessionManager::new(Arc::new(Repositories::new(Database::open_in_memory().unwrap())))
    }

    #[tokio::test]
    async fn starting_a_second_session_for_the_same_context_stops_the_first() {
        let manager = manager();
        let first = manager.start_session(ContextType::Workflow, "wf-1", AgentRole::Scoping, None).await.unwrap();
        assert!(manager.has_active_session(ContextType::Workflow, "wf-1"));

        let second = manager.start_session(ContextType::Workflow, "wf-1", AgentRole::Research, None).await.unwrap();

        assert!(manager.sessions.get(&first.id).is_none());
        let active = manager.get_session_by_context(ContextType::Workflow, "wf-1").unwrap();
        assert_eq!(active.session.id, second.id);
        assert_eq!(manager.get_active_session_count(), 1);
    }

    #[tokio::test]
    async fn stop_session_is_idempotent() {
        let manager = manager();
        let session = manager.start_session(ContextType::Channel, "chan-1", AgentRole::Discussion, None).await.unwrap();
        manager.stop_session(&session.id).await.unwrap();
        manager.stop_session(&session.id).await.unwrap();
        assert!(!manager.has_active_session(ContextType::Channel, "chan-1"));
    }

    #[tokio::test]
    async fn stopping_a_session_cancels_its_handle() {
        let manager = manager();
        let session = manager.start_session(ContextType::Workflow, "wf-1", AgentRole::Scoping, None).await.unwrap();
        let cancellation = manager.cancellation_for(&session.id).unwrap();
        assert!(!cancellation.is_cancelled());

        manager.stop_session(&session.id).await.unwrap();
        assert!(cancellation.is_cancelled());
    }

    #[tokio::test]
    async fn error_session_persists_error_status() {
        let manager = manager();
        let session = manager.start_session(ContextType::Workflow, "wf-1", AgentRole::Execution, None).await.unwrap();
        manager.error_session(&session.id, "llm exploded").await.unwrap();

        let persisted = manager.repositories.sessions.get_by_id(&session.id).unwrap().unwrap();
        assert_eq!(persisted.status, SessionStatus::Error);
    }

    #[tokio::test]
    async fn get_or_restore_returns_none_for_an_unknown_context() {
        let manager = manager();
        let restored = manager.get_or_restore_session(ContextType::Workflow, "wf-unknown").await.unwrap();
        assert!(restored.is_none());
    }

    #[tokio::test]
    async fn get_or_restore_rehydrates_after_a_simulated_process_restart() {
        let repositories = Arc::new(Repositories::new(Database::open_in_memory().unwrap()));
        let before_restart = SessionManager::new(repositories.clone());
        let session = before_restart
            .start_session(ContextType::Workflow, "wf-1", AgentRole::Execution, None)
            .await
            .unwrap();

        // A fresh manager over the same storage has empty in-memory indices,
        // standing in for a new process picking back up persisted state.
        let after_restart = SessionManager::new(repositories);
        assert!(after_restart.get_session_by_context(ContextType::Workflow, "wf-1").is_none());

        let restored = after_restart
            .get_or_restore_session(ContextType::Workflow, "wf-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(restored.session.id, session.id);

        // Reinserted into both in-memory indices, not just returned once.
        assert!(after_restart.has_active_session(ContextType::Workflow, "wf-1"));
        assert!(after_restart.cancellation_for(&session.id).is_some());
    }
}
