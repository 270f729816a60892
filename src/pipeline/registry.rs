//! Run registry - mid-flight and final snapshots for status queries

use parking_lot::RwLock;
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use super::run::RunStatus;
use super::state::StateRecord;

/// Record and status of one run at some point in time
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunSnapshot {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub record: StateRecord,
}

impl RunSnapshot {
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}

#[derive(Debug, Default)]
pub struct RunRegistry {
    runs: RwLock<HashMap<Uuid, RunSnapshot>>,
    latest: RwLock<Option<Uuid>>,
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the stored snapshot for a run
    pub fn publish(&self, snapshot: RunSnapshot) {
        let id = snapshot.run_id;
        self.runs.write().insert(id, snapshot);
        *self.latest.write() = Some(id);
    }

    pub fn snapshot(&self, run_id: Uuid) -> Option<RunSnapshot> {
        self.runs.read().get(&run_id).cloned()
    }

    /// Snapshot of the most recently updated run
    pub fn latest(&self) -> Option<RunSnapshot> {
        let id = (*self.latest.read())?;
        self.snapshot(id)
    }

    pub fn len(&self) -> usize {
        self.runs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.read().is_empty()
    }

    /// Drop finished runs, keeping in-flight ones. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let mut runs = self.runs.write();
        let before = runs.len();
        runs.retain(|_, snapshot| !snapshot.is_terminal());
        let removed = before - runs.len();

        let mut latest = self.latest.write();
        if latest.is_some_and(|id| !runs.contains_key(&id)) {
            *latest = None;
        }
        removed
    }
}
