//! Server-side chat sessions.
//!
//! A session holds the conversation history and, per namespace, the phase
//! of the turn currently in flight. Sessions are identified by a UUID v4
//! carried in the `docchat_session` cookie, and are dropped after
//! `session.idle_ttl_secs` without a request.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use docchat_core::{Namespace, Turn};
use serde::Serialize;

use crate::config::SessionConfig;

pub const SESSION_COOKIE: &str = "docchat_session";

/// Where a session's work in one namespace currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Idle,
    Ingesting,
    Retrieving,
    Answering,
}

#[derive(Debug, Clone)]
struct Session {
    history: Vec<Turn>,
    phases: HashMap<Namespace, Phase>,
    created_at: DateTime<Utc>,
    last_seen: DateTime<Utc>,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            history: Vec::new(),
            phases: HashMap::new(),
            created_at: now,
            last_seen: now,
        }
    }
}

/// Read-only view of a session for the API.
#[derive(Debug, Clone, Serialize)]
pub struct SessionInfo {
    pub created_at: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Phase per namespace; namespaces never touched are `idle`.
    pub phases: BTreeMap<&'static str, Phase>,
}

/// In-memory sessions with an idle timeout and a cap on their number.
///
/// Expired sessions are dropped whenever a session is resolved or created.
/// When the cap is reached the least recently seen session is evicted.
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Session>>,
    max_history_turns: usize,
    idle_ttl: Duration,
    max_sessions: usize,
}

impl SessionStore {
    pub fn new(max_history_turns: usize) -> Self {
        let defaults = SessionConfig::default();
        Self {
            sessions: Mutex::new(HashMap::new()),
            max_history_turns,
            idle_ttl: Duration::from_secs(defaults.idle_ttl_secs),
            max_sessions: defaults.max_sessions,
        }
    }

    pub fn from_config(config: &SessionConfig) -> Self {
        Self::new(config.max_history_turns)
            .with_limits(Duration::from_secs(config.idle_ttl_secs), config.max_sessions)
    }

    pub fn with_limits(mut self, idle_ttl: Duration, max_sessions: usize) -> Self {
        self.idle_ttl = idle_ttl;
        self.max_sessions = max_sessions.max(1);
        self
    }

    /// Create a fresh session and return its id.
    pub fn create(&self) -> String {
        let now = Utc::now();
        let id = uuid::Uuid::new_v4().to_string();

        let mut sessions = self.lock();
        self.evict_idle(&mut sessions, now);
        while sessions.len() >= self.max_sessions {
            let oldest = sessions
                .iter()
                .min_by_key(|(_, s)| s.last_seen)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(oldest) => {
                    sessions.remove(&oldest);
                    tracing::debug!(session = %oldest, "session evicted, store full");
                }
                None => break,
            }
        }
        sessions.insert(id.clone(), Session::new(now));
        tracing::debug!(session = %id, live = sessions.len(), "session created");
        id
    }

    /// Return `id` if it names a live session, otherwise create a new one.
    /// The flag is `true` when a session was created.
    pub fn resolve(&self, id: Option<&str>) -> (String, bool) {
        let now = Utc::now();
        if let Some(id) = id {
            let mut sessions = self.lock();
            self.evict_idle(&mut sessions, now);
            if let Some(session) = sessions.get_mut(id) {
                session.last_seen = now;
                return (id.to_string(), false);
            }
        }
        (self.create(), true)
    }

    pub fn history(&self, id: &str) -> Vec<Turn> {
        self.lock()
            .get(id)
            .map(|s| s.history.clone())
            .unwrap_or_default()
    }

    pub fn info(&self, id: &str) -> Option<SessionInfo> {
        let sessions = self.lock();
        let session = sessions.get(id)?;
        Some(SessionInfo {
            created_at: session.created_at,
            last_seen: session.last_seen,
            phases: Namespace::ALL
                .into_iter()
                .map(|ns| (ns.as_str(), session.phases.get(&ns).copied().unwrap_or(Phase::Idle)))
                .collect(),
        })
    }

    /// Record a completed exchange, trimming the oldest turns past the cap.
    pub fn append_exchange(&self, id: &str, question: &str, answer: &str) {
        let now = Utc::now();
        let mut sessions = self.lock();
        let session = sessions
            .entry(id.to_string())
            .or_insert_with(|| Session::new(now));
        session.last_seen = now;
        session.history.push(Turn::user(question));
        session.history.push(Turn::assistant(answer));
        if session.history.len() > self.max_history_turns {
            let excess = session.history.len() - self.max_history_turns;
            session.history.drain(..excess);
        }
    }

    pub fn phase(&self, id: &str, namespace: Namespace) -> Phase {
        self.lock()
            .get(id)
            .and_then(|s| s.phases.get(&namespace).copied())
            .unwrap_or(Phase::Idle)
    }

    pub fn set_phase(&self, id: &str, namespace: Namespace, phase: Phase) {
        let mut sessions = self.lock();
        if let Some(session) = sessions.get_mut(id) {
            session.phases.insert(namespace, phase);
        }
    }

    /// Drop sessions idle for longer than the TTL, as of `now`.
    fn evict_idle(&self, sessions: &mut HashMap<String, Session>, now: DateTime<Utc>) {
        let before = sessions.len();
        sessions.retain(|_, s| {
            // A session with a turn in flight is never idle.
            s.phases.values().any(|p| *p != Phase::Idle)
                || (now - s.last_seen)
                    .to_std()
                    .map_or(true, |idle| idle <= self.idle_ttl)
        });
        let evicted = before - sessions.len();
        if evicted > 0 {
            tracing::debug!(evicted, "idle sessions dropped");
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(|p| p.into_inner())
    }
}

/// Resets a session's phase to [`Phase::Idle`] when dropped.
///
/// Held for the duration of a turn so the phase returns to idle whether
/// the turn succeeds, fails, or is abandoned.
pub struct PhaseGuard {
    store: Arc<SessionStore>,
    session: Option<String>,
    namespace: Namespace,
}

impl PhaseGuard {
    pub fn enter(
        store: Arc<SessionStore>,
        session: Option<&str>,
        namespace: Namespace,
        phase: Phase,
    ) -> Self {
        if let Some(id) = session {
            store.set_phase(id, namespace, phase);
        }
        Self {
            store,
            session: session.map(str::to_string),
            namespace,
        }
    }

    pub fn advance(&self, phase: Phase) {
        if let Some(id) = self.session.as_deref() {
            self.store.set_phase(id, self.namespace, phase);
        }
    }
}

impl Drop for PhaseGuard {
    fn drop(&mut self) {
        if let Some(id) = self.session.as_deref() {
            self.store.set_phase(id, self.namespace, Phase::Idle);
        }
    }
}

/// Extract the session id from a `Cookie` header value.
pub fn session_from_cookie(header: &str) -> Option<String> {
    header
        .split(';')
        .filter_map(|pair| pair.split_once('='))
        .find(|(name, _)| name.trim() == SESSION_COOKIE)
        .map(|(_, value)| value.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub fn session_cookie(id: &str) -> String {
    format!("{}={}; Path=/; HttpOnly; SameSite=Lax", SESSION_COOKIE, id)
}
