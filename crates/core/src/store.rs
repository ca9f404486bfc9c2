//! Document store abstraction consumed by the daemon.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::{ActionRecord, EpochMs};

/// Errors surfaced by a [`DocumentStore`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("write failed: {0}")]
    Write(String),
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),
    #[error("connection closed: {0}")]
    Closed(String),
}

/// Kind of change reported by a change notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Insert,
    Update,
    Delete,
}

/// A change that happened in a watched collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub collection: String,
    pub operation: OperationType,
}

/// Stream of change notifications; ends when the underlying connection does.
pub type ChangeStream = BoxStream<'static, Result<ChangeEvent, StoreError>>;

/// Selects action records.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActionFilter {
    pub task_id: Option<String>,
    pub user_id: Option<String>,
    /// Only records whose `codeState` is present and non-null.
    pub with_code_state: bool,
    /// Strictly greater than.
    pub after: Option<EpochMs>,
    /// Strictly less than.
    pub before: Option<EpochMs>,
}

impl ActionFilter {
    /// Every action record.
    pub fn all() -> Self {
        Self::default()
    }

    /// Records of one user on one task that carry a code snapshot.
    pub fn snapshots(task_id: &str, user_id: &str) -> Self {
        Self {
            task_id: Some(task_id.to_string()),
            user_id: Some(user_id.to_string()),
            with_code_state: true,
            ..Self::default()
        }
    }

    pub fn after(mut self, ts: EpochMs) -> Self {
        self.after = Some(ts);
        self
    }

    pub fn before(mut self, ts: EpochMs) -> Self {
        self.before = Some(ts);
        self
    }

    /// Whether `record` satisfies the filter.
    pub fn matches(&self, record: &ActionRecord) -> bool {
        if self.task_id.as_deref().is_some_and(|t| t != record.task_id) {
            return false;
        }
        if self.user_id.as_deref().is_some_and(|u| u != record.user_id) {
            return false;
        }
        if self.with_code_state && record.code_state.is_none() {
            return false;
        }
        if self.after.is_some_and(|ts| record.timestamp <= ts) {
            return false;
        }
        if self.before.is_some_and(|ts| record.timestamp >= ts) {
            return false;
        }
        true
    }
}

/// Result ordering for store queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sort {
    TimestampAsc,
    TimestampDesc,
    LogIdDesc,
}

impl Sort {
    pub fn compare(self, a: &ActionRecord, b: &ActionRecord) -> std::cmp::Ordering {
        match self {
            Sort::TimestampAsc => a.timestamp.cmp(&b.timestamp),
            Sort::TimestampDesc => b.timestamp.cmp(&a.timestamp),
            Sort::LogIdDesc => b.log_id.cmp(&a.log_id),
        }
    }
}

/// Client of the document database holding action records and tasks.
///
/// Every method is a suspension point; none of them carries its own timeout.
#[async_trait]
pub trait DocumentStore: Send + Sync + 'static {
    /// Opens (or re-opens) the connection.
    async fn connect(&self) -> Result<(), StoreError>;

    /// Resolves once the current connection errors or closes.
    async fn closed(&self) -> StoreError;

    /// First record matching `filter` under `sort`.
    async fn find_one(
        &self,
        filter: &ActionFilter,
        sort: Sort,
    ) -> Result<Option<ActionRecord>, StoreError> {
        Ok(self.find(filter, sort, 1).await?.into_iter().next())
    }

    /// Up to `limit` records matching `filter`, ordered by `sort`.
    async fn find(
        &self,
        filter: &ActionFilter,
        sort: Sort,
        limit: usize,
    ) -> Result<Vec<ActionRecord>, StoreError>;

    /// Whether a task with this id exists.
    async fn task_exists(&self, task_id: &str) -> Result<bool, StoreError>;

    /// Inserts a new action record and returns what was stored.
    async fn create(&self, record: &ActionRecord) -> Result<ActionRecord, StoreError>;

    /// Subscribes to change notifications of the store.
    async fn watch(&self) -> Result<ChangeStream, StoreError>;
}
