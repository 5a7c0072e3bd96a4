use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use serde::Serialize;

use super::accumulator::WorkerResult;
use super::ids::RunId;
use super::summary::RunSummary;

/// A finished run with its per-worker results.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HistoryEntry {
    pub summary: RunSummary,
    pub results: Vec<WorkerResult>,
}

#[derive(Default)]
struct HistoryInner {
    entries: Vec<Arc<HistoryEntry>>,
    by_run: HashMap<RunId, usize>,
}

/// Append-only, in-memory run history. Lost on restart.
#[derive(Default)]
pub struct HistoryStore {
    inner: Mutex<HistoryInner>,
}

impl HistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: HistoryEntry) -> Arc<HistoryEntry> {
        let entry = Arc::new(entry);
        let mut inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let index = inner.entries.len();
        inner.by_run.insert(entry.summary.run_id, index);
        inner.entries.push(Arc::clone(&entry));
        entry
    }

    #[must_use]
    pub fn list(&self) -> Vec<Arc<HistoryEntry>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .clone()
    }

    #[must_use]
    pub fn get(&self, run_id: &RunId) -> Option<Arc<HistoryEntry>> {
        let inner = self.inner.lock().unwrap_or_else(PoisonError::into_inner);
        let index = *inner.by_run.get(run_id)?;
        inner.entries.get(index).cloned()
    }

    #[must_use]
    pub fn latest(&self) -> Option<Arc<HistoryEntry>> {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .last()
            .cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
