use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use weft_core::ids::{ConversationId, TabId};

/// One connected browser-tab worker. Created on registration, removed on
/// disconnect or heartbeat timeout.
#[derive(Clone, Debug)]
pub struct WorkerSession {
    pub tab_id: TabId,
    pub conversations: BTreeSet<ConversationId>,
    /// True until the tab touches its first conversation; never flips back.
    pub fresh: bool,
    pub last_heartbeat: Instant,
}

#[derive(Default)]
struct RegistryInner {
    sessions: BTreeMap<TabId, WorkerSession>,
    /// Conversation id → owning tab, last-write-wins. A routing hint, not a
    /// correctness guarantee.
    affinity: BTreeMap<ConversationId, TabId>,
}

/// Session registry and worker selector. All mutation goes through one lock;
/// liveness sweeps and inbound registration race concurrently.
pub struct WorkerRegistry {
    inner: Mutex<RegistryInner>,
    heartbeat_timeout: Duration,
}

impl WorkerRegistry {
    pub fn new(heartbeat_timeout: Duration) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            heartbeat_timeout,
        }
    }

    /// Register a worker. Re-registering an existing tab only refreshes its
    /// heartbeat; accumulated conversation state is kept.
    pub fn register(&self, tab_id: TabId) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get_mut(&tab_id) {
            session.last_heartbeat = Instant::now();
            return;
        }
        inner.sessions.insert(
            tab_id.clone(),
            WorkerSession {
                tab_id,
                conversations: BTreeSet::new(),
                fresh: true,
                last_heartbeat: Instant::now(),
            },
        );
    }

    /// Refresh a worker's heartbeat. Any decoded frame counts.
    pub fn touch(&self, tab_id: &TabId) -> bool {
        let mut inner = self.inner.lock();
        match inner.sessions.get_mut(tab_id) {
            Some(session) => {
                session.last_heartbeat = Instant::now();
                true
            }
            None => false,
        }
    }

    /// Record that a tab now serves `conversation`. Clears the fresh flag and
    /// writes the affinity entry last-write-wins.
    pub fn set_active(&self, tab_id: &TabId, conversation: ConversationId) -> bool {
        let mut inner = self.inner.lock();
        let Some(session) = inner.sessions.get_mut(tab_id) else {
            return false;
        };
        session.fresh = false;
        session.last_heartbeat = Instant::now();
        session.conversations.insert(conversation.clone());
        inner.affinity.insert(conversation, tab_id.clone());
        true
    }

    /// Remove a worker on disconnect, cascading its affinity entries.
    pub fn remove(&self, tab_id: &TabId) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.sessions.remove(tab_id).is_some();
        if removed {
            inner.affinity.retain(|_, owner| owner != tab_id);
        }
        removed
    }

    /// Evict every session whose last heartbeat predates the timeout, along
    /// with its affinity entries. Idempotent for a fixed `now`. The caller
    /// must fail any in-flight request bound to a returned tab.
    pub fn evict_stale(&self, now: Instant) -> Vec<TabId> {
        let mut inner = self.inner.lock();
        let stale: Vec<TabId> = inner
            .sessions
            .iter()
            .filter(|(_, s)| now.saturating_duration_since(s.last_heartbeat) >= self.heartbeat_timeout)
            .map(|(tab, _)| tab.clone())
            .collect();
        for tab in &stale {
            inner.sessions.remove(tab);
        }
        if !stale.is_empty() {
            inner.affinity.retain(|_, owner| !stale.contains(owner));
            tracing::info!(evicted = stale.len(), "evicted stale workers");
        }
        stale
    }

    /// Pick the worker for a new completion request:
    /// affinity entry if live, then any fresh worker, then any worker.
    pub fn select(&self, preferred: Option<&ConversationId>) -> Option<TabId> {
        let inner = self.inner.lock();
        if let Some(conversation) = preferred {
            if let Some(owner) = inner.affinity.get(conversation) {
                if inner.sessions.contains_key(owner) {
                    return Some(owner.clone());
                }
            }
        }
        if let Some((tab, _)) = inner.sessions.iter().find(|(_, s)| s.fresh) {
            return Some(tab.clone());
        }
        inner.sessions.keys().next().cloned()
    }

    pub fn count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    pub fn is_live(&self, tab_id: &TabId) -> bool {
        self.inner.lock().sessions.contains_key(tab_id)
    }

    /// Snapshot of one session, for diagnostics.
    pub fn session(&self, tab_id: &TabId) -> Option<WorkerSession> {
        self.inner.lock().sessions.get(tab_id).cloned()
    }
}
