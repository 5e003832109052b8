use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use tokio::sync::broadcast;

use crate::activity::ActivityTracker;
use crate::allocator::DisplayResources;
use crate::pipeline::ProcessSet;

/// Validate a session identifier as produced by the manager: 32 lowercase
/// hex characters. Everything embedding an id in a filesystem path goes
/// through this first.
pub fn validate_session_id(id: &str) -> Result<(), String> {
    if id.len() != 32 {
        return Err(format!("session id has wrong length ({}, expected 32)", id.len()));
    }
    if !id.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b)) {
        return Err("session id contains non-hex characters".to_string());
    }
    Ok(())
}

/// One isolated desktop session: its allocated resources, workspace, process
/// handles, and timestamps.
///
/// Clones share the underlying process set and activity tracker, so a record
/// handed out by [`SessionRegistry::get`] stays coherent with the registry's
/// copy. The registry is the only writer of the mapping itself.
#[derive(Clone)]
pub struct SessionRecord {
    /// Opaque random token; possession of the id is the only access control.
    pub session_id: String,
    pub resources: DisplayResources,
    /// Directory exclusively owned by this session, removed at teardown.
    pub workspace: PathBuf,
    /// The five pipeline process handles. `None` once teardown has taken
    /// them.
    pub processes: Arc<Mutex<Option<ProcessSet>>>,
    pub created_at: SystemTime,
    pub activity: ActivityTracker,
    /// Claim flag: the teardown path that swaps this to `true` wins; any
    /// later claimant observes the session as already gone. Keeps teardown
    /// at-most-once while the registry entry is removed last.
    pub tearing_down: Arc<AtomicBool>,
}

impl SessionRecord {
    pub fn new(
        session_id: String,
        resources: DisplayResources,
        workspace: PathBuf,
        processes: ProcessSet,
    ) -> Self {
        let created_at = SystemTime::now();
        Self {
            session_id,
            resources,
            workspace,
            processes: Arc::new(Mutex::new(Some(processes))),
            created_at,
            activity: ActivityTracker::starting_at(created_at),
            tearing_down: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Atomically claim this record for teardown. Returns `true` exactly
    /// once.
    pub fn claim_teardown(&self) -> bool {
        !self.tearing_down.swap(true, Ordering::AcqRel)
    }
}

impl std::fmt::Debug for SessionRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionRecord")
            .field("session_id", &self.session_id)
            .field("resources", &self.resources)
            .field("workspace", &self.workspace)
            .finish_non_exhaustive()
    }
}

/// Session lifecycle events.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    Created { session_id: String },
    Destroyed { session_id: String },
}

/// The in-memory source of truth for live sessions, keyed by session id.
///
/// All mutations go through the write lock, so a concurrent `get` or
/// `snapshot` never observes a half-inserted or half-removed record. State
/// is process-lifetime only; nothing survives a restart.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<RwLock<HashMap<String, SessionRecord>>>,
    events_tx: broadcast::Sender<SessionEvent>,
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (events_tx, _) = broadcast::channel(64);
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            events_tx,
        }
    }

    /// Insert a fully-constructed record and emit a `Created` event.
    ///
    /// Ids come from a v4 UUID, so a key collision would mean the random
    /// source is broken; the previous record, if any, is returned rather
    /// than silently dropped.
    pub fn insert(&self, record: SessionRecord) -> Option<SessionRecord> {
        let session_id = record.session_id.clone();
        let previous = self.inner.write().insert(session_id.clone(), record);
        let _ = self.events_tx.send(SessionEvent::Created { session_id });
        previous
    }

    /// Look up a session by id, returning a clone if present.
    pub fn get(&self, session_id: &str) -> Option<SessionRecord> {
        self.inner.read().get(session_id).cloned()
    }

    /// Remove a session by id, emitting a `Destroyed` event if it existed.
    pub fn remove(&self, session_id: &str) -> Option<SessionRecord> {
        let removed = self.inner.write().remove(session_id);
        if removed.is_some() {
            let _ = self.events_tx.send(SessionEvent::Destroyed {
                session_id: session_id.to_string(),
            });
        }
        removed
    }

    /// A point-in-time copy of all records, for the reaper's scan.
    pub fn snapshot(&self) -> Vec<SessionRecord> {
        self.inner.read().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove every record atomically, for server shutdown. Emits a
    /// `Destroyed` event per record and returns them for teardown.
    pub fn drain(&self) -> Vec<SessionRecord> {
        let drained: Vec<SessionRecord> = {
            let mut inner = self.inner.write();
            inner.drain().map(|(_, record)| record).collect()
        };
        for record in &drained {
            let _ = self.events_tx.send(SessionEvent::Destroyed {
                session_id: record.session_id.clone(),
            });
        }
        drained
    }

    /// Subscribe to session lifecycle events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }
}
