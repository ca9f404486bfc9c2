//! Read-side lookups over a user's code snapshots on a task.
//!
//! Only records carrying a `codeState` take part. Errors are handed to the
//! caller as-is; nothing here retries.

use actionlog_core::model::EpochMs;
use actionlog_core::{ActionFilter, ActionRecord, Sort, StoreError};
use thiserror::Error;

use crate::supervisor::Supervisor;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("No database connection")]
    Unavailable,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl Supervisor {
    /// Earliest snapshot of `user_id` on `task_id`.
    pub async fn get_first(
        &self,
        task_id: &str,
        user_id: &str,
    ) -> Result<Option<ActionRecord>, LookupError> {
        self.lookup(ActionFilter::snapshots(task_id, user_id), Sort::TimestampAsc)
            .await
    }

    /// Latest snapshot of `user_id` on `task_id`.
    pub async fn get_last(
        &self,
        task_id: &str,
        user_id: &str,
    ) -> Result<Option<ActionRecord>, LookupError> {
        self.lookup(ActionFilter::snapshots(task_id, user_id), Sort::TimestampDesc)
            .await
    }

    /// First snapshot strictly after `timestamp`.
    pub async fn get_next(
        &self,
        task_id: &str,
        user_id: &str,
        timestamp: EpochMs,
    ) -> Result<Option<ActionRecord>, LookupError> {
        let filter = ActionFilter::snapshots(task_id, user_id).after(timestamp);
        self.lookup(filter, Sort::TimestampAsc).await
    }

    /// Last snapshot strictly before `timestamp`.
    pub async fn get_previous(
        &self,
        task_id: &str,
        user_id: &str,
        timestamp: EpochMs,
    ) -> Result<Option<ActionRecord>, LookupError> {
        let filter = ActionFilter::snapshots(task_id, user_id).before(timestamp);
        self.lookup(filter, Sort::TimestampDesc).await
    }

    async fn lookup(
        &self,
        filter: ActionFilter,
        sort: Sort,
    ) -> Result<Option<ActionRecord>, LookupError> {
        if !self.connection_ready() {
            return Err(LookupError::Unavailable);
        }
        Ok(self.timed(self.store().find_one(&filter, sort)).await?)
    }
}
