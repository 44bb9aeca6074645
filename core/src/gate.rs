//! Commit admission.
//!
//! Execution runs in parallel; commits do not. Each session has one commit
//! lane. Completed mutations are queued on it and drained one at a time in
//! `(base version, submission time, command id)` order, each through the
//! store's compare-and-commit. A command commits only if its base version is
//! still the session's version when its turn comes.

use crate::error::{CommitError, SessionError, StaleStateError};
use crate::executor::{MutationDelta, ToolOutput};
use crate::ids::{CommandId, SessionId, StateVersion};
use crate::session::{CommitRecord, SessionStateStore};
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;
use tracing::{debug, info};

/// A completed mutation waiting for its commit turn.
#[derive(Debug, Clone)]
pub struct PendingCommit {
    pub session_id: SessionId,
    pub command_id: CommandId,
    pub tool: String,
    pub base_version: StateVersion,
    pub submitted_at: DateTime<Utc>,
    pub delta: MutationDelta,
}

impl PendingCommit {
    fn order_key(&self) -> (StateVersion, DateTime<Utc>, &CommandId) {
        (self.base_version, self.submitted_at, &self.command_id)
    }
}

#[derive(Debug, Clone)]
pub enum CommitOutcome {
    Committed { version: StateVersion, result: ToolOutput },
    Stale(StaleStateError),
    SessionClosed(SessionError),
}

struct Queued {
    pending: PendingCommit,
    reply: oneshot::Sender<CommitOutcome>,
}

impl PartialEq for Queued {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Queued {}

impl PartialOrd for Queued {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Queued {
    // BinaryHeap pops the greatest, so the earliest key must compare greatest.
    fn cmp(&self, other: &Self) -> Ordering {
        other.pending.order_key().cmp(&self.pending.order_key())
    }
}

#[derive(Default)]
struct CommitLane {
    queue: Mutex<BinaryHeap<Queued>>,
    drain: Mutex<()>,
}

impl CommitLane {
    fn push(&self, pending: PendingCommit) -> oneshot::Receiver<CommitOutcome> {
        let (reply, rx) = oneshot::channel();
        self.queue
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Queued { pending, reply });
        rx
    }

    /// Commits everything queued. Only one drainer runs per lane; a caller
    /// that has to wait finds its own item already handled.
    fn drain(&self, store: &SessionStateStore) {
        let _turn = self.drain.lock().unwrap_or_else(PoisonError::into_inner);
        loop {
            let next = self.queue.lock().unwrap_or_else(PoisonError::into_inner).pop();
            let Some(Queued { pending, reply }) = next else {
                break;
            };
            let _ = reply.send(commit_one(store, pending));
        }
    }
}

fn commit_one(store: &SessionStateStore, pending: PendingCommit) -> CommitOutcome {
    let PendingCommit {
        session_id,
        command_id,
        tool,
        base_version,
        delta,
        ..
    } = pending;

    let committed = store.commit_with(&session_id, base_version, |state, version| {
        let (mut next, result) = delta.apply(state, version);
        next.history.push(CommitRecord {
            version,
            command_id: command_id.clone(),
            tool: tool.clone(),
            result: result.clone(),
            committed_at: Utc::now(),
        });
        (next, result)
    });

    match committed {
        Ok((version, result)) => {
            info!("Committed {} ({}) on session {} at version {}", command_id, tool, session_id, version);
            CommitOutcome::Committed { version, result }
        }
        Err(CommitError::Stale(stale)) => {
            debug!(
                "Stale commit {} on session {}: based on {}, session at {}",
                command_id, session_id, stale.expected, stale.current
            );
            CommitOutcome::Stale(stale)
        }
        Err(CommitError::Session(err)) => CommitOutcome::SessionClosed(err),
    }
}

pub struct ConcurrencyGate {
    store: Arc<SessionStateStore>,
    lanes: Mutex<HashMap<SessionId, Arc<CommitLane>>>,
}

impl ConcurrencyGate {
    pub fn new(store: Arc<SessionStateStore>) -> Self {
        Self {
            store,
            lanes: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<SessionStateStore> {
        &self.store
    }

    fn lane(&self, session: &SessionId) -> Arc<CommitLane> {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entry(*session)
            .or_default()
            .clone()
    }

    /// Drops the lane of an unloaded session.
    pub fn forget(&self, session: &SessionId) {
        self.lanes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(session);
    }

    /// Cheap check before execution: is `base` still current?
    pub fn precheck(&self, session: &SessionId, base: StateVersion) -> Result<(), CommitError> {
        let current = self.store.version(session)?;
        if current != base {
            return Err(StaleStateError { expected: base, current }.into());
        }
        Ok(())
    }

    /// Queues one completed mutation and waits for its verdict.
    pub fn submit(&self, pending: PendingCommit) -> CommitOutcome {
        let session = pending.session_id;
        let lane = self.lane(&session);
        let mut rx = lane.push(pending);
        lane.drain(&self.store);
        rx.try_recv()
            .unwrap_or_else(|_| CommitOutcome::SessionClosed(SessionError::NotFound(session)))
    }

    /// Queues several completed mutations at once, so they are ordered against
    /// each other by the tie-break rule before any of them commits. Outcomes are
    /// returned in input order.
    pub fn submit_batch(&self, batch: Vec<PendingCommit>) -> Vec<CommitOutcome> {
        let mut waiting = Vec::with_capacity(batch.len());
        let mut lanes: Vec<(SessionId, Arc<CommitLane>)> = Vec::new();
        for pending in batch {
            let session = pending.session_id;
            let lane = self.lane(&session);
            waiting.push((session, lane.push(pending)));
            if !lanes.iter().any(|(s, _)| *s == session) {
                lanes.push((session, lane));
            }
        }
        for (_, lane) in &lanes {
            lane.drain(&self.store);
        }
        waiting
            .into_iter()
            .map(|(session, mut rx)| {
                rx.try_recv()
                    .unwrap_or_else(|_| CommitOutcome::SessionClosed(SessionError::NotFound(session)))
            })
            .collect()
    }
}
