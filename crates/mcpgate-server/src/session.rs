//! Per-session state keyed by session id: per-credential session cap and
//! TTL eviction (spec.md §3, §4.2).

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use mcpgate_core::{GateError, GateResult};
use std::sync::Arc;
use uuid::Uuid;

/// TTL refreshed on every access (spec.md §3 `Session`).
const SESSION_TTL: chrono::Duration = chrono::Duration::hours(24);
/// Per-api-key cap; creating a session beyond this evicts the oldest by
/// `last_accessed` (spec.md §3 invariant, §8 testable property).
pub const MAX_SESSIONS_PER_API_KEY: usize = 5;
/// Global cap across all credentials; oldest-by-creation evicted on overflow.
pub const MAX_SESSIONS: usize = 10_000;

/// A live MCP session (spec.md §3 `Session`).
#[derive(Debug, Clone)]
pub struct SessionRecord {
    pub session_id: String,
    /// The credential fingerprint first bound to this session. Append-only:
    /// see [`SessionStore::update`] for the soft-binding rule.
    pub api_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    pub initialized: bool,
    pub protocol_version: Option<String>,
}

impl SessionRecord {
    fn new(session_id: String, api_key: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id,
            api_key,
            created_at: now,
            last_accessed: now,
            initialized: false,
            protocol_version: None,
        }
    }

    fn is_expired(&self) -> bool {
        Utc::now() - self.last_accessed > SESSION_TTL
    }
}

/// Patch applied by [`SessionStore::update`]; `None` fields are left as-is.
#[derive(Debug, Clone, Default)]
pub struct SessionPatch {
    pub initialized: Option<bool>,
    pub protocol_version: Option<String>,
}

/// Mint a fresh session id (spec.md §3: "UUID, server-chosen at `initialize`").
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// The C2 contract (spec.md §4.2). In-memory is the only backend the core
/// requires; KV/file session backends are out of scope for this crate (the
/// credential/token backends in `mcpgate-auth` already cover durable state).
pub struct SessionStore {
    sessions: DashMap<String, SessionRecord>,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionStore {
    pub fn new() -> Self {
        Self {
            sessions: DashMap::new(),
        }
    }

    /// Enforces the per-api-key cap by pre-deleting the oldest session for
    /// that key, then the global cap by pre-deleting the oldest session
    /// overall.
    pub fn create(&self, session_id: String, api_key: Option<String>) -> SessionRecord {
        if let Some(key) = &api_key {
            while self.count_by_api_key(key) >= MAX_SESSIONS_PER_API_KEY {
                if !self.delete_oldest_by_api_key(key) {
                    break;
                }
            }
        }
        if self.sessions.len() >= MAX_SESSIONS {
            self.delete_oldest_overall();
        }
        let record = SessionRecord::new(session_id.clone(), api_key);
        self.sessions.insert(session_id, record.clone());
        record
    }

    /// Touches `last_accessed`. Lazily evicts the entry if expired.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        let mut entry = self.sessions.get_mut(session_id)?;
        if entry.is_expired() {
            drop(entry);
            self.sessions.remove(session_id);
            return None;
        }
        entry.last_accessed = Utc::now();
        Some(entry.clone())
    }

    /// Soft-binds `api_key`: if the session has none yet, this call sets it.
    /// A session that already has a binding never has it overwritten here —
    /// callers that observe a mismatching fingerprint log a warning and
    /// serve the request anyway (spec.md §3 append-only invariant).
    pub fn bind_api_key_if_unset(&self, session_id: &str, api_key: &str) {
        if let Some(mut entry) = self.sessions.get_mut(session_id)
            && entry.api_key.is_none()
        {
            entry.api_key = Some(api_key.to_string());
        }
    }

    pub fn update(&self, session_id: &str, patch: SessionPatch) -> GateResult<SessionRecord> {
        let mut entry = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| GateError::session(format!("no such session: {session_id}")))?;
        if let Some(initialized) = patch.initialized {
            entry.initialized = initialized;
        }
        if let Some(version) = patch.protocol_version {
            entry.protocol_version = Some(version);
        }
        entry.last_accessed = Utc::now();
        Ok(entry.clone())
    }

    pub fn delete(&self, session_id: &str) -> bool {
        self.sessions.remove(session_id).is_some()
    }

    pub fn get_by_api_key(&self, api_key: &str) -> Vec<SessionRecord> {
        self.sessions
            .iter()
            .filter(|e| e.api_key.as_deref() == Some(api_key))
            .map(|e| e.clone())
            .collect()
    }

    pub fn count_by_api_key(&self, api_key: &str) -> usize {
        self.sessions
            .iter()
            .filter(|e| e.api_key.as_deref() == Some(api_key))
            .count()
    }

    /// Deletes the oldest-by-`last_accessed` session for the given key.
    /// Returns whether a session was actually evicted.
    pub fn delete_oldest_by_api_key(&self, api_key: &str) -> bool {
        let oldest = self
            .sessions
            .iter()
            .filter(|e| e.api_key.as_deref() == Some(api_key))
            .min_by_key(|e| e.last_accessed)
            .map(|e| e.session_id.clone());
        match oldest {
            Some(id) => self.sessions.remove(&id).is_some(),
            None => false,
        }
    }

    fn delete_oldest_overall(&self) {
        let oldest = self
            .sessions
            .iter()
            .min_by_key(|e| e.created_at)
            .map(|e| e.session_id.clone());
        if let Some(id) = oldest {
            self.sessions.remove(&id);
        }
    }

    /// Background sweep (spec.md §5: every 60 s) removing expired sessions.
    pub fn sweep_expired(&self) -> usize {
        let expired: Vec<String> = self
            .sessions
            .iter()
            .filter(|e| e.is_expired())
            .map(|e| e.session_id.clone())
            .collect();
        for id in &expired {
            self.sessions.remove(id);
        }
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

/// Spawns the 60 s sweep task described in spec.md §5. The returned handle
/// aborts the task on drop, which is how graceful shutdown cancels it.
pub fn spawn_sweeper(store: Arc<SessionStore>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            let evicted = store.sweep_expired();
            if evicted > 0 {
                tracing::debug!(evicted, "session sweep evicted expired sessions");
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_enforces_per_api_key_cap() {
        let store = SessionStore::new();
        let mut ids = Vec::new();
        for _ in 0..MAX_SESSIONS_PER_API_KEY {
            let id = new_session_id();
            store.create(id.clone(), Some("key-1".into()));
            ids.push(id);
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        assert_eq!(store.count_by_api_key("key-1"), MAX_SESSIONS_PER_API_KEY);

        store.create(new_session_id(), Some("key-1".into()));
        assert_eq!(store.count_by_api_key("key-1"), MAX_SESSIONS_PER_API_KEY);
        assert!(store.get(&ids[0]).is_none(), "oldest session should have been evicted");
    }

    #[test]
    fn get_touches_last_accessed() {
        let store = SessionStore::new();
        let id = new_session_id();
        let created = store.create(id.clone(), None);
        std::thread::sleep(std::time::Duration::from_millis(2));
        let fetched = store.get(&id).unwrap();
        assert!(fetched.last_accessed > created.last_accessed);
    }

    #[test]
    fn unknown_session_returns_none() {
        let store = SessionStore::new();
        assert!(store.get("nope").is_none());
    }

    #[test]
    fn binding_is_append_only() {
        let store = SessionStore::new();
        let id = new_session_id();
        store.create(id.clone(), Some("first".into()));
        store.bind_api_key_if_unset(&id, "second");
        assert_eq!(store.get(&id).unwrap().api_key.as_deref(), Some("first"));
    }

    #[test]
    fn update_merges_fields() {
        let store = SessionStore::new();
        let id = new_session_id();
        store.create(id.clone(), None);
        let updated = store
            .update(
                &id,
                SessionPatch {
                    initialized: Some(true),
                    protocol_version: Some("2025-06-18".into()),
                },
            )
            .unwrap();
        assert!(updated.initialized);
        assert_eq!(updated.protocol_version.as_deref(), Some("2025-06-18"));
    }

    #[test]
    fn update_unknown_session_is_session_error() {
        let store = SessionStore::new();
        let err = store.update("nope", SessionPatch::default()).unwrap_err();
        assert_eq!(err.kind(), mcpgate_core::ErrorKind::Session);
    }
}
