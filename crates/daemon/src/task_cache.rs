//! Grow-only cache of task ids known to exist.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::supervisor::Supervisor;

/// Task ids confirmed by the store.
///
/// Entries are never evicted, even if the task is deleted later.
#[derive(Debug, Default)]
pub struct TaskCache {
    known: HashSet<String>,
}

impl TaskCache {
    pub fn contains(&self, task_id: &str) -> bool {
        self.known.contains(task_id)
    }

    pub fn insert(&mut self, task_id: &str) {
        self.known.insert(task_id.to_string());
    }

    pub fn len(&self) -> usize {
        self.known.len()
    }

    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }
}

impl Supervisor {
    /// Whether `task_id` names an existing task.
    ///
    /// Always true when task filtering is disabled. Otherwise cached
    /// positives answer without touching the store; negative answers are not
    /// cached, and a failed lookup counts as invalid.
    pub async fn is_valid_task(&self, task_id: &str) -> bool {
        if !self.config().filter_invalid_tasks {
            return true;
        }
        let cached = self.shared().tasks.contains(task_id);
        if cached {
            return true;
        }

        let exists = self.timed(self.store().task_exists(task_id)).await;
        match exists {
            Ok(true) => {
                self.shared().tasks.insert(task_id);
                true
            }
            Ok(false) => {
                debug!(task_id, "unknown task");
                false
            }
            Err(e) => {
                warn!(task_id, error = %e, "task lookup failed, treating task as invalid");
                false
            }
        }
    }
}
