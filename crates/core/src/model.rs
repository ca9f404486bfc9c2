use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Name of the collection action records are written to.
pub const ACTION_COLLECTION: &str = "action";

/// Name of the collection parent tasks live in.
pub const TASK_COLLECTION: &str = "task";

/// Server-assigned sequence number of a persisted action.
pub type LogId = i64;

/// Unix epoch milliseconds.
pub type EpochMs = i64;

/// One persisted unit of user activity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionRecord {
    /// Parent task the action belongs to.
    pub task_id: String,
    /// User who produced the action.
    pub user_id: String,
    /// When the producer observed the action.
    pub timestamp: EpochMs,
    /// Producer-defined action kind (e.g. `edit`, `run`, `submit`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Optional snapshot of the user's code at `timestamp`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code_state: Option<Value>,
    /// Assigned when the record is persisted.
    #[serde(default)]
    pub log_id: LogId,
}

/// A producer-supplied action that has not been validated yet.
///
/// The write buffer holds drafts rather than records: schema validation and
/// log-id stamping both happen at persistence time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionDraft(pub Value);

impl ActionDraft {
    /// `taskId` as sent by the producer, if it is a string.
    pub fn task_id(&self) -> Option<&str> {
        self.0.get("taskId").and_then(Value::as_str)
    }

    /// `type` as sent by the producer, if it is a string.
    pub fn kind(&self) -> Option<&str> {
        self.0.get("type").and_then(Value::as_str)
    }

    /// Checks the draft against the action schema.
    ///
    /// The returned record has no log id yet (`0`); it is assigned right
    /// before the record is written.
    pub fn validate(&self) -> Result<ActionRecord, ValidationError> {
        let obj = self.0.as_object().ok_or(ValidationError::NotAnObject)?;

        let task_id = required_str(obj, "taskId")?;
        let user_id = required_str(obj, "userId")?;
        let kind = required_str(obj, "type")?;
        let timestamp = match obj.get("timestamp") {
            None | Some(Value::Null) => return Err(ValidationError::Missing("timestamp")),
            Some(v) => v
                .as_i64()
                .filter(|ts| *ts >= 0)
                .ok_or(ValidationError::WrongType {
                    field: "timestamp",
                    expected: "non-negative integer",
                })?,
        };
        let code_state = obj.get("codeState").filter(|v| !v.is_null()).cloned();

        Ok(ActionRecord {
            task_id,
            user_id,
            timestamp,
            kind,
            code_state,
            log_id: 0,
        })
    }
}

impl From<Value> for ActionDraft {
    fn from(value: Value) -> Self {
        Self(value)
    }
}

fn required_str(
    obj: &serde_json::Map<String, Value>,
    field: &'static str,
) -> Result<String, ValidationError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(ValidationError::Missing(field)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(ValidationError::Empty(field)),
        Some(Value::String(s)) => Ok(s.clone()),
        Some(_) => Err(ValidationError::WrongType {
            field,
            expected: "string",
        }),
    }
}

/// Why a draft was rejected by schema validation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("action is not an object")]
    NotAnObject,
    #[error("`{0}` is required")]
    Missing(&'static str),
    #[error("`{0}` must not be empty")]
    Empty(&'static str),
    #[error("`{field}` must be a {expected}")]
    WrongType {
        field: &'static str,
        expected: &'static str,
    },
}
