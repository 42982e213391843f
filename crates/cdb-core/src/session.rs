use std::{
    collections::HashMap,
    sync::atomic::{AtomicU64, Ordering},
};

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use crate::domain::{CanonicalRef, ChatId, CommenterSet};

/// Where a chat is in the compare flow.
///
/// `None` means the store holds no session for the key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SessionState {
    None,
    AwaitingMain,
    AwaitingOthers,
}

impl SessionState {
    pub fn label(self) -> &'static str {
        match self {
            SessionState::None => "idle",
            SessionState::AwaitingMain => "waiting for the main post",
            SessionState::AwaitingOthers => "collecting comparison posts",
        }
    }
}

/// A post together with every account that replied to it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CollectedPost {
    pub post: CanonicalRef,
    pub commenters: CommenterSet,
}

/// Comparison entries pair the post with its commenters, so the two can never
/// drift out of alignment.
pub type Comparison = CollectedPost;

#[derive(Clone, Debug)]
pub struct Session {
    /// Unique per store; a collection started under another generation is stale.
    pub generation: u64,
    pub started_at: DateTime<Utc>,
    pub main: Option<CollectedPost>,
    pub comparisons: Vec<Comparison>,
}

impl Session {
    pub fn new(generation: u64) -> Self {
        Self {
            generation,
            started_at: Utc::now(),
            main: None,
            comparisons: Vec::new(),
        }
    }

    pub fn state(&self) -> SessionState {
        if self.main.is_none() {
            SessionState::AwaitingMain
        } else {
            SessionState::AwaitingOthers
        }
    }

    pub fn is_complete(&self) -> bool {
        self.main.is_some() && !self.comparisons.is_empty()
    }

    fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            generation: self.generation,
            state: self.state(),
            started_at: self.started_at,
            main_post: self.main.as_ref().map(|m| m.post.clone()),
            main_commenters: self.main.as_ref().map(|m| m.commenters.len()),
            comparisons: self.comparisons.len(),
        }
    }
}

/// Read-only view of a session, safe to hold across suspension points.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub generation: u64,
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
    pub main_post: Option<CanonicalRef>,
    pub main_commenters: Option<usize>,
    pub comparisons: usize,
}

/// One session per chat. The lock is never held across upstream calls.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<ChatId, Session>>,
    next_generation: AtomicU64,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a fresh session, discarding whatever the key held before.
    pub async fn start(&self, key: ChatId) -> u64 {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let mut sessions = self.sessions.lock().await;
        if let Some(prev) = sessions.insert(key, Session::new(generation)) {
            tracing::debug!(
                chat_id = key.0,
                previous = prev.generation,
                discarded_comparisons = prev.comparisons.len(),
                "session superseded"
            );
        }
        generation
    }

    pub async fn state(&self, key: ChatId) -> SessionState {
        self.sessions
            .lock()
            .await
            .get(&key)
            .map(Session::state)
            .unwrap_or(SessionState::None)
    }

    pub async fn snapshot(&self, key: ChatId) -> Option<SessionSnapshot> {
        self.sessions.lock().await.get(&key).map(Session::snapshot)
    }

    pub async fn get(&self, key: ChatId) -> Option<Session> {
        self.sessions.lock().await.get(&key).cloned()
    }

    /// Record the main post. Returns `false` if the session was superseded,
    /// removed, or already has a main post.
    pub async fn set_main(&self, key: ChatId, generation: u64, main: CollectedPost) -> bool {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&key) {
            Some(s) if s.generation == generation && s.main.is_none() => {
                s.main = Some(main);
                true
            }
            _ => false,
        }
    }

    /// Append a comparison. Returns the new comparison count, or `None` if the
    /// session is stale or not ready for comparisons.
    pub async fn add_comparison(
        &self,
        key: ChatId,
        generation: u64,
        comparison: Comparison,
    ) -> Option<usize> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get_mut(&key) {
            Some(s) if s.generation == generation && s.main.is_some() => {
                s.comparisons.push(comparison);
                Some(s.comparisons.len())
            }
            _ => None,
        }
    }

    /// Remove and return the session if it has everything a report needs.
    pub async fn take_complete(&self, key: ChatId) -> Option<Session> {
        let mut sessions = self.sessions.lock().await;
        if !sessions.get(&key).is_some_and(Session::is_complete) {
            return None;
        }
        sessions.remove(&key)
    }

    pub async fn remove(&self, key: ChatId) -> Option<Session> {
        self.sessions.lock().await.remove(&key)
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}
