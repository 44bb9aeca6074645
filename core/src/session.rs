//! Per-session committed state.
//!
//! Each session's state is an immutable `SessionState` behind an `Arc`.
//! Readers clone the `Arc` and keep a consistent snapshot for as long as they
//! need it. Writers go through `compare_and_commit`, which swaps in a new
//! state only if the version they started from is still current.

use crate::error::{CommitError, SessionError, StaleStateError};
use crate::executor::ToolOutput;
use crate::ids::{CommandId, SessionId, StateVersion};
use crate::mesh::{MeshModel, ModelFormat};
use crate::topo::SelectionSet;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use tracing::info;

/// One accepted command.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommitRecord {
    pub version: StateVersion,
    pub command_id: CommandId,
    pub tool: String,
    pub result: ToolOutput,
    pub committed_at: DateTime<Utc>,
}

struct LogEntry {
    record: CommitRecord,
    previous: Option<Arc<LogEntry>>,
}

/// Append-only commit history shared between state versions.
///
/// Each version's log points at the previous version's entries instead of
/// copying them, so cloning a state and recording one more commit costs the
/// same no matter how long the session has run.
#[derive(Clone, Default)]
pub struct CommitLog {
    last: Option<Arc<LogEntry>>,
    len: usize,
}

impl CommitLog {
    pub fn push(&mut self, record: CommitRecord) {
        let previous = self.last.take();
        self.last = Some(Arc::new(LogEntry { record, previous }));
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn last(&self) -> Option<&CommitRecord> {
        self.last.as_deref().map(|entry| &entry.record)
    }

    /// Newest record first.
    pub fn iter_rev(&self) -> impl Iterator<Item = &CommitRecord> {
        std::iter::successors(self.last.as_deref(), |entry| entry.previous.as_deref()).map(|entry| &entry.record)
    }

    /// Oldest record first.
    pub fn iter(&self) -> impl Iterator<Item = &CommitRecord> {
        let mut records: Vec<&CommitRecord> = self.iter_rev().collect();
        records.reverse();
        records.into_iter()
    }

    /// Record at position `index`, oldest first.
    pub fn get(&self, index: usize) -> Option<&CommitRecord> {
        let back = self.len.checked_sub(index + 1)?;
        self.iter_rev().nth(back)
    }
}

impl fmt::Debug for CommitLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.iter()).finish()
    }
}

// Unlinks the chain one entry at a time; a recursive drop of a long history
// would overflow the stack.
impl Drop for CommitLog {
    fn drop(&mut self) {
        let mut next = self.last.take();
        while let Some(entry) = next {
            match Arc::try_unwrap(entry) {
                Ok(mut entry) => next = entry.previous.take(),
                Err(_) => break,
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub version: StateVersion,
    pub model: Arc<MeshModel>,
    pub selections: SelectionSet,
    /// Ordered by version, one record per commit.
    pub history: CommitLog,
    pub loaded_at: DateTime<Utc>,
}

impl SessionState {
    fn fresh(session_id: SessionId, model: MeshModel) -> Self {
        Self {
            session_id,
            version: 0,
            model: Arc::new(model),
            selections: SelectionSet::new(),
            history: CommitLog::default(),
            loaded_at: Utc::now(),
        }
    }

    pub fn info(&self) -> SessionInfo {
        SessionInfo {
            session_id: self.session_id,
            name: self.model.name().to_owned(),
            format: self.model.format(),
            version: self.version,
            vertex_count: self.model.vertex_count(),
            face_count: self.model.face_count(),
            selections: self.selections.len(),
            commits: self.history.len(),
            loaded_at: self.loaded_at,
        }
    }
}

/// Read-only view handed to tools.
pub type SessionSnapshot = Arc<SessionState>;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub session_id: SessionId,
    pub name: String,
    pub format: ModelFormat,
    pub version: StateVersion,
    pub vertex_count: usize,
    pub face_count: usize,
    pub selections: usize,
    pub commits: usize,
    pub loaded_at: DateTime<Utc>,
}

type Slot = Arc<Mutex<SessionSnapshot>>;

#[derive(Default)]
pub struct SessionStateStore {
    sessions: RwLock<HashMap<SessionId, Slot>>,
}

impl SessionStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a new session at version 0.
    pub fn load(&self, model: MeshModel) -> SessionSnapshot {
        let id = SessionId::new();
        let snapshot = Arc::new(SessionState::fresh(id, model));
        self.sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(Mutex::new(snapshot.clone())));
        info!("Session {} loaded '{}'", id, snapshot.model.name());
        snapshot
    }

    /// Opens a session under a caller-chosen id.
    pub fn insert(&self, id: SessionId, model: MeshModel) -> Result<SessionSnapshot, SessionError> {
        let mut sessions = self.sessions.write().unwrap_or_else(PoisonError::into_inner);
        if sessions.contains_key(&id) {
            return Err(SessionError::AlreadyExists(id));
        }
        let snapshot = Arc::new(SessionState::fresh(id, model));
        sessions.insert(id, Arc::new(Mutex::new(snapshot.clone())));
        info!("Session {} loaded '{}'", id, snapshot.model.name());
        Ok(snapshot)
    }

    pub fn unload(&self, id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        let slot = self
            .sessions
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)
            .ok_or(SessionError::NotFound(*id))?;
        let last = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        info!("Session {} unloaded at version {}", id, last.version);
        Ok(last)
    }

    fn slot(&self, id: &SessionId) -> Result<Slot, SessionError> {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or(SessionError::NotFound(*id))
    }

    /// Current committed snapshot: model, version and selections together.
    pub fn get(&self, id: &SessionId) -> Result<SessionSnapshot, SessionError> {
        let slot = self.slot(id)?;
        let snapshot = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        Ok(snapshot)
    }

    pub fn version(&self, id: &SessionId) -> Result<StateVersion, SessionError> {
        self.get(id).map(|s| s.version)
    }

    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// All sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let slots: Vec<Slot> = self
            .sessions
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut infos: Vec<SessionInfo> = slots
            .iter()
            .map(|slot| slot.lock().unwrap_or_else(PoisonError::into_inner).info())
            .collect();
        infos.sort_by(|a, b| {
            a.loaded_at
                .cmp(&b.loaded_at)
                .then_with(|| a.session_id.0.cmp(&b.session_id.0))
        });
        infos
    }

    /// Applies `mutation` if the session is still at `expected`.
    ///
    /// The mutation receives the current state and the version the new state
    /// will carry (`expected + 1`). On mismatch nothing is applied and the
    /// current version is reported. Holding the session's lock across the
    /// check and the swap makes the pair atomic for concurrent callers.
    pub fn compare_and_commit<F>(
        &self,
        id: &SessionId,
        expected: StateVersion,
        mutation: F,
    ) -> Result<StateVersion, CommitError>
    where
        F: FnOnce(&SessionState, StateVersion) -> SessionState,
    {
        self.commit_with(id, expected, |state, version| (mutation(state, version), ()))
            .map(|(version, ())| version)
    }

    /// `compare_and_commit` for mutations that also produce a value.
    pub fn commit_with<F, R>(
        &self,
        id: &SessionId,
        expected: StateVersion,
        mutation: F,
    ) -> Result<(StateVersion, R), CommitError>
    where
        F: FnOnce(&SessionState, StateVersion) -> (SessionState, R),
    {
        let slot = self.slot(id)?;
        let mut current = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if current.version != expected {
            return Err(StaleStateError {
                expected,
                current: current.version,
            }
            .into());
        }
        let next_version = expected + 1;
        let (mut next, produced) = mutation(&current, next_version);
        next.version = next_version;
        next.session_id = current.session_id;
        *current = Arc::new(next);
        Ok((next_version, produced))
    }
}
