use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::proxy::codec;

/// Per-tab browsing state.
///
/// Read-only after creation apart from the access timestamp.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: i64,
    last_accessed: AtomicI64,
    /// Scripts injected after the client agent, in order
    scripts: Vec<String>,
}

impl Session {
    fn new(id: String, scripts: Vec<String>) -> Self {
        let now = chrono::Utc::now().timestamp();
        Self {
            id,
            created_at: now,
            last_accessed: AtomicI64::new(now),
            scripts,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> i64 {
        self.created_at
    }

    pub fn last_accessed(&self) -> i64 {
        self.last_accessed.load(Ordering::Relaxed)
    }

    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    /// Path on the proxy origin that the session's cookies are bound to.
    pub fn cookie_scope(&self) -> String {
        format!("{}/{}", codec::PROXY_PATH, self.id)
    }

    fn touch(&self, now: i64) {
        self.last_accessed.store(now, Ordering::Relaxed);
    }

    fn is_expired(&self, now: i64, ttl: i64) -> bool {
        now - self.last_accessed() > ttl
    }
}

/// Process-wide session table.
///
/// Sessions idle for longer than the TTL (including sessions never used
/// after creation) are treated as gone and removed by [`cleanup_expired`].
///
/// [`cleanup_expired`]: SessionRegistry::cleanup_expired
pub struct SessionRegistry {
    sessions: DashMap<String, Arc<Session>>,
    /// Inactivity timeout (seconds)
    session_ttl: i64,
}

impl SessionRegistry {
    pub fn new(session_ttl_minutes: i64) -> Self {
        Self {
            sessions: DashMap::new(),
            session_ttl: session_ttl_minutes * 60,
        }
    }

    /// Allocate a fresh session and return its id.
    pub fn create_session(&self, scripts: Vec<String>) -> String {
        loop {
            let id = uuid::Uuid::new_v4().simple().to_string();
            if let Entry::Vacant(slot) = self.sessions.entry(id.clone()) {
                slot.insert(Arc::new(Session::new(id.clone(), scripts)));
                tracing::info!("session created: {}", id);
                return id;
            }
        }
    }

    /// Look up a live session, recording the access.
    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        let now = chrono::Utc::now().timestamp();
        let session = self.sessions.get(id)?.value().clone();
        if session.is_expired(now, self.session_ttl) {
            return None;
        }
        session.touch(now);
        Some(session)
    }

    /// Remove a session. Unknown ids are ignored.
    pub fn destroy(&self, id: &str) {
        if self.sessions.remove(id).is_some() {
            tracing::info!("session destroyed: {}", id);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Evict idle sessions, returning how many were removed.
    pub fn cleanup_expired(&self) -> usize {
        let now = chrono::Utc::now().timestamp();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| !session.is_expired(now, self.session_ttl));
        let removed = before.saturating_sub(self.sessions.len());
        if removed > 0 {
            tracing::info!("evicted {} idle session(s)", removed);
        }
        removed
    }
}
