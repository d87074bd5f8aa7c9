//! # Session Context Manager
//!
//! Loads the conversation context of one query: the resolved session, its
//! history and the user's long-term memory facts.
//!
//! Rules:
//!
//! - history is only ever read by `session_id`, so turns of another session
//!   cannot leak into the prompt;
//! - without a `session_id` the user's most recent session is used and the
//!   degraded resolution is logged;
//! - a `session_id` owned by another user resolves to a fresh session;
//! - memory facts are withheld when the history is empty, and only facts
//!   belonging to the requesting user are returned.

use std::sync::Arc;

use verity_core::{
    error::StoreError,
    ports::ConversationStore,
    types::{MemoryFact, SessionId, Turn},
};

/// How the session of a query was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionResolution {
    /// The caller supplied the session id.
    Explicit,
    /// Degraded: no id supplied, the user's most recent session was used.
    MostRecent,
    /// A new id was minted: no id and no prior session, or the supplied id
    /// belongs to another user.
    Fresh,
}

#[derive(Debug, Clone)]
pub struct SessionContext {
    pub session_id: SessionId,
    pub resolution: SessionResolution,
    pub history: Vec<Turn>,
    pub memory_facts: Vec<MemoryFact>,
}

pub struct SessionContextManager {
    store: Arc<dyn ConversationStore>,
}

impl std::fmt::Debug for SessionContextManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionContextManager").finish_non_exhaustive()
    }
}

impl SessionContextManager {
    #[must_use]
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Resolve the session and load its context. `caller_history` is used
    /// only when storage holds nothing for the resolved session.
    pub async fn load(
        &self,
        session_id: Option<&str>,
        user_id: &str,
        caller_history: &[Turn],
    ) -> Result<SessionContext, StoreError> {
        let (session_id, resolution) = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
            Some(id) => match self.store.session_owner(&id.to_string()).await? {
                Some(owner) if owner != user_id => {
                    tracing::warn!(
                        user_id,
                        session_id = %id,
                        "session belongs to another user, starting a fresh session"
                    );
                    (uuid::Uuid::new_v4().to_string(), SessionResolution::Fresh)
                }
                _ => (id.to_string(), SessionResolution::Explicit),
            },
            None => match self.store.latest_session(user_id).await? {
                Some(id) => {
                    tracing::warn!(
                        user_id,
                        session_id = %id,
                        "no session id supplied, falling back to most recent session"
                    );
                    (id, SessionResolution::MostRecent)
                }
                None => (uuid::Uuid::new_v4().to_string(), SessionResolution::Fresh),
            },
        };

        let mut history = match resolution {
            SessionResolution::Fresh => Vec::new(),
            _ => self.store.get_history(&session_id).await?,
        };
        if history.is_empty() && !caller_history.is_empty() {
            tracing::debug!(turns = caller_history.len(), "using caller-supplied history");
            history = caller_history.to_vec();
        }

        let memory_facts = if history.is_empty() {
            Vec::new()
        } else {
            self.store
                .get_memory_facts(user_id)
                .await?
                .into_iter()
                .filter(|fact| fact.user_id == user_id)
                .collect()
        };

        Ok(SessionContext { session_id, resolution, history, memory_facts })
    }

    /// Persist the user turn and the assistant reply of a completed query.
    pub async fn record_exchange(
        &self,
        session_id: &SessionId,
        user_id: &str,
        user_turn: Turn,
        assistant_turn: Turn,
    ) -> Result<(), StoreError> {
        self.store.append_turn(session_id, user_id, user_turn).await?;
        self.store.append_turn(session_id, user_id, assistant_turn).await
    }
}
