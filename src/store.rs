//! Per-run result storage.

use std::collections::HashMap;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::warn;

use crate::model::TaskResult;

/// Terminal results for a single run, exactly one per task id. The first
/// write for an id wins; later writes are ignored and logged. Dropped with
/// the run; callers keep the snapshot returned in the report.
#[derive(Debug, Default)]
pub struct ResultStore {
    results: DashMap<String, TaskResult>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a terminal result. Returns false if the task already had one,
    /// leaving the stored value untouched.
    pub fn record(&self, result: TaskResult) -> bool {
        match self.results.entry(result.task_id.clone()) {
            Entry::Occupied(_) => {
                warn!(task_id = %result.task_id, "duplicate result insert ignored");
                false
            }
            Entry::Vacant(slot) => {
                slot.insert(result);
                true
            }
        }
    }

    pub fn get(&self, task_id: &str) -> Option<TaskResult> {
        self.results.get(task_id).map(|entry| entry.clone())
    }

    pub fn contains(&self, task_id: &str) -> bool {
        self.results.contains_key(task_id)
    }

    pub fn len(&self) -> usize {
        self.results.len()
    }

    pub fn is_empty(&self) -> bool {
        self.results.is_empty()
    }

    /// Owned copy of everything recorded so far.
    pub fn snapshot(&self) -> HashMap<String, TaskResult> {
        self.results
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect()
    }
}
