pub mod memory;
pub mod sqlite;

use std::fmt;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Opaque version token bound 1:1 to one stored revision.
///
/// Issued by the store on every successful write; callers never invent or
/// predict one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ETag(String);

impl ETag {
    pub(crate) fn issue() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ETag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ETag {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Conditional-write semantics, mirroring `If-Match`/`If-None-Match`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteCondition {
    /// Succeeds only if no object currently exists (create path).
    IfNoneMatchAny,
    /// Succeeds if an object exists, regardless of its token.
    IfMatchAny,
    /// Succeeds only if the stored token is identical.
    IfMatch(ETag),
    /// Unconditional write. Reserved for internal corrective writes;
    /// never used for a user-facing mutation.
    Unconditional,
}

/// One stored revision: the payload plus the token it was written under.
#[derive(Debug, Clone)]
pub struct StoredObject {
    pub id: String,
    pub etag: ETag,
    pub data: serde_json::Value,
}

impl StoredObject {
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        serde_json::from_value(self.data.clone())
            .map_err(|e| Error::Internal(anyhow::anyhow!("decoding stored object {}: {e}", self.id)))
    }
}

/// Key-value persistence with per-key version tokens and compare-and-swap
/// writes. The store is the sole ordering authority for concurrent writers
/// on the same key: exactly one of two racing conditional writes succeeds.
#[async_trait]
pub trait StorageClient: Send + Sync {
    async fn get(&self, id: &str) -> Result<StoredObject>;

    /// Conditionally write; returns the freshly issued token.
    async fn save(&self, id: &str, data: &serde_json::Value, condition: WriteCondition)
        -> Result<ETag>;

    async fn delete(&self, id: &str, condition: WriteCondition) -> Result<()>;

    /// All objects whose id starts with `prefix`, ordered by id.
    async fn list_prefix(&self, prefix: &str) -> Result<Vec<StoredObject>>;
}

/// Evaluate a write condition against the currently stored token.
/// Shared by every backend so semantics cannot drift.
pub(crate) fn check_condition(
    id: &str,
    current: Option<&ETag>,
    condition: &WriteCondition,
) -> Result<()> {
    match (condition, current) {
        (WriteCondition::Unconditional, _) => Ok(()),
        (WriteCondition::IfNoneMatchAny, None) => Ok(()),
        (WriteCondition::IfNoneMatchAny, Some(_)) => Err(Error::PreconditionFailed(format!(
            "{id} already exists"
        ))),
        (WriteCondition::IfMatchAny, Some(_)) => Ok(()),
        (WriteCondition::IfMatchAny, None) => Err(Error::PreconditionFailed(format!(
            "{id} does not exist"
        ))),
        (WriteCondition::IfMatch(expected), Some(stored)) if expected == stored => Ok(()),
        (WriteCondition::IfMatch(_), Some(_)) => Err(Error::PreconditionFailed(format!(
            "{id} was modified by another writer"
        ))),
        (WriteCondition::IfMatch(_), None) => Err(Error::PreconditionFailed(format!(
            "{id} does not exist"
        ))),
    }
}

/// Read and decode a stored object in one step.
pub async fn get_as<T: DeserializeOwned>(store: &dyn StorageClient, id: &str) -> Result<(T, ETag)> {
    let obj = store.get(id).await?;
    let decoded = obj.decode()?;
    Ok((decoded, obj.etag))
}
