//! In-memory conversation store implementing [`ConversationStore`] via `scc::HashMap`.
//!
//! Sessions are keyed by id and owned by the user who created them; appends
//! from another user are rejected. Turns are append-only.

use chrono::Utc;
use verity_core::{
    error::StoreError,
    ports::ConversationStore,
    types::{MemoryFact, Session, SessionId, Turn, UserId},
};

/// Thread-safe, in-memory conversation store backed by [`scc::HashMap`].
///
/// Suitable for single-process / CLI usage where persistence across
/// restarts is not required.
#[derive(Debug, Default)]
pub struct InMemoryConversationStore {
    sessions: scc::HashMap<SessionId, Session>,
    latest: scc::HashMap<UserId, SessionId>,
    facts: scc::HashMap<UserId, Vec<MemoryFact>>,
}

impl InMemoryConversationStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a long-term fact, replacing an earlier fact with the same key.
    pub async fn remember(&self, fact: MemoryFact) {
        match self.facts.entry_async(fact.user_id.clone()).await {
            scc::hash_map::Entry::Occupied(mut occ) => {
                let facts = occ.get_mut();
                facts.retain(|f| f.key != fact.key);
                facts.push(fact);
            }
            scc::hash_map::Entry::Vacant(vac) => {
                let _ = vac.insert_entry(vec![fact]);
            }
        }
    }

    /// Snapshot of a whole session, if it exists.
    pub async fn session(&self, session_id: &SessionId) -> Option<Session> {
        self.sessions.read_async(session_id, |_k, v| v.clone()).await
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get_history(&self, session_id: &SessionId) -> Result<Vec<Turn>, StoreError> {
        Ok(self.sessions.read_async(session_id, |_k, v| v.history.clone()).await.unwrap_or_default())
    }

    async fn session_owner(&self, session_id: &SessionId) -> Result<Option<UserId>, StoreError> {
        Ok(self.sessions.read_async(session_id, |_k, v| v.user_id.clone()).await)
    }

    async fn latest_session(&self, user_id: &str) -> Result<Option<SessionId>, StoreError> {
        Ok(self.latest.read_async(user_id, |_k, v| v.clone()).await)
    }

    async fn get_memory_facts(&self, user_id: &str) -> Result<Vec<MemoryFact>, StoreError> {
        Ok(self.facts.read_async(user_id, |_k, v| v.clone()).await.unwrap_or_default())
    }

    async fn append_turn(
        &self,
        session_id: &SessionId,
        user_id: &str,
        turn: Turn,
    ) -> Result<(), StoreError> {
        match self.sessions.entry_async(session_id.clone()).await {
            scc::hash_map::Entry::Occupied(mut occ) => {
                let session = occ.get_mut();
                if session.user_id != user_id {
                    return Err(StoreError::Backend(format!(
                        "session '{session_id}' belongs to another user"
                    )));
                }
                session.history.push(turn);
            }
            scc::hash_map::Entry::Vacant(vac) => {
                let _ = vac.insert_entry(Session {
                    session_id: session_id.clone(),
                    user_id: user_id.to_string(),
                    history: vec![turn],
                    created_at: Utc::now(),
                });
            }
        }

        match self.latest.entry_async(user_id.to_string()).await {
            scc::hash_map::Entry::Occupied(mut occ) => {
                occ.get_mut().clone_from(session_id);
            }
            scc::hash_map::Entry::Vacant(vac) => {
                let _ = vac.insert_entry(session_id.clone());
            }
        }
        Ok(())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn fact(user: &str, key: &str, value: &str) -> MemoryFact {
        MemoryFact { user_id: user.into(), key: key.into(), value: value.into(), confidence: 0.8 }
    }

    #[tokio::test]
    async fn missing_session_has_empty_history() {
        let store = InMemoryConversationStore::new();
        let history = store.get_history(&"nonexistent".to_string()).await;
        assert!(history.is_ok_and(|h| h.is_empty()));
    }

    #[tokio::test]
    async fn history_is_scoped_to_the_session() {
        let store = InMemoryConversationStore::new();
        store.append_turn(&"A".into(), "alice", Turn::user("budget 400 million")).await.unwrap();
        store.append_turn(&"B".into(), "alice", Turn::user("another project")).await.unwrap();
        store.append_turn(&"A".into(), "alice", Turn::assistant("noted", vec![])).await.unwrap();

        let a = store.get_history(&"A".into()).await.unwrap();
        assert_eq!(a.len(), 2);
        assert!(a.iter().all(|t| t.content != "another project"));
    }

    #[tokio::test]
    async fn latest_session_tracks_last_append() {
        let store = InMemoryConversationStore::new();
        store.append_turn(&"A".into(), "alice", Turn::user("one")).await.unwrap();
        store.append_turn(&"B".into(), "alice", Turn::user("two")).await.unwrap();
        assert_eq!(store.latest_session("alice").await.unwrap().as_deref(), Some("B"));

        store.append_turn(&"A".into(), "alice", Turn::user("three")).await.unwrap();
        assert_eq!(store.latest_session("alice").await.unwrap().as_deref(), Some("A"));
        assert!(store.latest_session("bob").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn foreign_user_cannot_append() {
        let store = InMemoryConversationStore::new();
        store.append_turn(&"A".into(), "alice", Turn::user("mine")).await.unwrap();
        let result = store.append_turn(&"A".into(), "mallory", Turn::user("intrusion")).await;
        assert!(matches!(result, Err(StoreError::Backend(_))));
        assert_eq!(store.session(&"A".into()).await.map(|s| s.history.len()), Some(1));
    }

    #[tokio::test]
    async fn session_owner_is_the_first_writer() {
        let store = InMemoryConversationStore::new();
        store.append_turn(&"A".into(), "alice", Turn::user("mine")).await.unwrap();
        let _ = store.append_turn(&"A".into(), "mallory", Turn::user("intrusion")).await;
        assert_eq!(store.session_owner(&"A".into()).await.unwrap().as_deref(), Some("alice"));
        assert!(store.session_owner(&"B".into()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn remember_replaces_facts_by_key() {
        let store = InMemoryConversationStore::new();
        store.remember(fact("alice", "company", "Acme")).await;
        store.remember(fact("alice", "company", "Globex")).await;
        store.remember(fact("bob", "company", "Initech")).await;

        let facts = store.get_memory_facts("alice").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].value, "Globex");
    }

    #[tokio::test]
    async fn arc_dyn_conversation_store_works() {
        let store: Arc<dyn ConversationStore> = Arc::new(InMemoryConversationStore::new());
        store.append_turn(&"s".into(), "u", Turn::user("hello")).await.unwrap();
        assert_eq!(store.get_history(&"s".into()).await.unwrap().len(), 1);
    }
}
