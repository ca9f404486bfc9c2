use serde::{Deserialize, Serialize};

use crate::model::EpochMs;

/// Response to a batch submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubmitResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Query string of the first/last lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotQuery {
    pub task_id: String,
    pub user_id: String,
}

/// Query string of the next/previous lookups.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PivotQuery {
    pub task_id: String,
    pub user_id: String,
    /// Exclusive bound.
    pub timestamp: EpochMs,
}
