//! Write buffer and the persistence path for submitted actions.

use std::collections::VecDeque;

use actionlog_core::ActionDraft;
use futures::future::join_all;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::supervisor::{ConnectionState, Supervisor};

/// Actions waiting to be persisted, oldest first.
///
/// Volatile: the contents are lost when the process exits.
#[derive(Debug, Default)]
pub struct WriteBuffer {
    pending: VecDeque<ActionDraft>,
}

impl WriteBuffer {
    pub fn push(&mut self, draft: ActionDraft) {
        self.pending.push_back(draft);
    }

    pub fn extend(&mut self, drafts: impl IntoIterator<Item = ActionDraft>) {
        self.pending.extend(drafts);
    }

    /// Empties the buffer, handing its contents to the caller.
    pub fn take_all(&mut self) -> Vec<ActionDraft> {
        self.pending.drain(..).collect()
    }

    pub fn snapshot(&self) -> Vec<ActionDraft> {
        self.pending.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Synchronous rejection of a submitted batch.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubmitError {
    /// The batch was not a sequence; nothing was queued.
    #[error("Invalid actions.")]
    InvalidInput,
    /// The batch was buffered and will be written after reconnecting.
    #[error("No database connection")]
    Unavailable,
}

impl Supervisor {
    /// Accepts a batch of actions for persistence.
    ///
    /// While disconnected the whole batch is buffered, a reconnect is started
    /// and [`SubmitError::Unavailable`] is returned. While connected the
    /// buffer is drained first, then every action of the batch is written
    /// independently; per-action outcomes are only logged.
    pub async fn submit(&self, batch: Value) -> Result<(), SubmitError> {
        let Value::Array(items) = batch else {
            warn!("rejected batch that is not a sequence of actions");
            return Err(SubmitError::InvalidInput);
        };
        let drafts: Vec<ActionDraft> = items.into_iter().map(ActionDraft).collect();

        {
            let mut shared = self.shared();
            if shared.state != ConnectionState::Connected {
                let count = drafts.len();
                shared.buffer.extend(drafts);
                let buffered = shared.buffer.len();
                drop(shared);
                warn!(count, buffered, "no database connection, batch buffered");
                self.spawn_connect();
                return Err(SubmitError::Unavailable);
            }
        }

        self.drain().await;
        self.persist_all(drafts).await;
        Ok(())
    }

    /// Attempts every buffered action once.
    ///
    /// The buffer is emptied up front, so concurrent drains never write the
    /// same draft twice. Failed writes land back in the buffer.
    pub async fn drain(&self) {
        let pending = self.shared().buffer.take_all();
        if pending.is_empty() {
            return;
        }
        info!(count = pending.len(), "draining write buffer");
        self.persist_all(pending).await;
    }

    async fn persist_all(&self, drafts: Vec<ActionDraft>) {
        join_all(drafts.into_iter().map(|draft| self.persist(draft))).await;
    }

    async fn persist(&self, draft: ActionDraft) {
        let task_id = draft.task_id().unwrap_or_default().to_string();
        let kind = draft.kind().unwrap_or_default().to_string();

        if draft.task_id().is_some() && !self.is_valid_task(&task_id).await {
            warn!(%task_id, %kind, "dropping action for unknown task");
            return;
        }

        let mut record = match draft.validate() {
            Ok(record) => record,
            Err(e) => {
                warn!(%task_id, %kind, error = %e, "dropping invalid action");
                return;
            }
        };

        record.log_id = {
            let mut shared = self.shared();
            if !shared.recovered {
                debug!(%task_id, %kind, "log ids not recovered yet, action held back");
                shared.buffer.push(draft);
                return;
            }
            shared.log_ids.assign()
        };

        let written = self.timed(self.store().create(&record)).await;
        let mut shared = self.shared();
        shared.log_ids.settle(record.log_id);
        match written {
            Ok(saved) => {
                info!(task_id = %saved.task_id, kind = %saved.kind, log_id = saved.log_id, "action saved");
            }
            Err(e) => {
                warn!(%task_id, %kind, log_id = record.log_id, error = %e, "action write failed, requeued");
                shared.buffer.push(draft);
            }
        }
    }
}
