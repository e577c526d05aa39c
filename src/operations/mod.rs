pub mod status;
pub mod worker;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use status::StatusManager;
pub use worker::Worker;

use crate::error::ErrorDetail;

/// Lifecycle of one async operation: `Running` is entered exactly once,
/// at creation; every terminal state is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, OperationStatus::Running)
    }
}

impl fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationStatus::Running => "Running",
            OperationStatus::Succeeded => "Succeeded",
            OperationStatus::Failed => "Failed",
            OperationStatus::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OperationKind {
    Put,
    Delete,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperationKind::Put => f.write_str("put"),
            OperationKind::Delete => f.write_str("delete"),
        }
    }
}

/// Record of one long-running mutation, keyed by operation ID and indexed
/// by resource ID for single-flight enforcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AsyncOperation {
    pub id: Uuid,
    pub resource_id: String,
    pub kind: OperationKind,
    pub status: OperationStatus,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDetail>,
    /// Redeliveries observed so far (first delivery is zero).
    #[serde(default)]
    pub retry_count: u32,
    /// Cancellation intent; the owning worker observes it at its next
    /// checkpoint.
    #[serde(default)]
    pub cancel_requested: bool,
    pub api_version: String,
}

/// Body of a queue message: the operation plus enough context to resume
/// deploy work after a crash.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationMessage {
    pub operation_id: Uuid,
    pub resource_id: String,
    pub kind: OperationKind,
    pub api_version: String,
}

/// Store key of an operation record.
pub fn operation_key(id: Uuid) -> String {
    format!("operations/{id}")
}

/// Store key of the per-resource single-flight index entry.
pub fn index_key(resource_index_key: &str) -> String {
    format!("operations/index{resource_index_key}")
}

/// Index payload: which operation currently owns the resource.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OperationClaim {
    pub operation_id: Uuid,
}
