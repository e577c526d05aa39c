pub mod controller;

pub use controller::ResourceController;

use crate::api::ApiVersion;
use crate::model::{CallerIdentity, ResourceId};
use crate::operations::AsyncOperation;
use crate::store::ETag;

/// Concurrency precondition of one request, mirroring
/// `If-Match`/`If-None-Match` semantics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Precondition {
    /// No precondition: a plain upsert. The store's compare-and-swap
    /// still guards against lost updates between read and write.
    #[default]
    None,
    /// The resource must exist, any revision.
    IfMatchAny,
    /// The resource must be at exactly this revision.
    IfMatch(ETag),
    /// The resource must not exist (create-only).
    IfNoneMatchAny,
}

/// Everything the pipeline needs to know about one inbound request,
/// normally derived from URL, headers, and authentication by the (out of
/// scope) HTTP frontend.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub resource_id: ResourceId,
    pub api_version: ApiVersion,
    pub precondition: Precondition,
    pub caller: CallerIdentity,
}

impl RequestContext {
    pub fn new(resource_id: ResourceId, api_version: ApiVersion, caller: CallerIdentity) -> Self {
        Self {
            resource_id,
            api_version,
            precondition: Precondition::None,
            caller,
        }
    }

    pub fn with_precondition(mut self, precondition: Precondition) -> Self {
        self.precondition = precondition;
        self
    }
}

/// Result of an upsert: finished synchronously, or accepted for
/// asynchronous processing (202-equivalent).
#[derive(Debug)]
pub enum UpsertOutcome {
    Completed {
        body: serde_json::Value,
        etag: ETag,
    },
    Accepted {
        operation: AsyncOperation,
    },
}

/// Result of a delete. Deleting an absent resource is idempotent
/// success, never an error.
#[derive(Debug)]
pub enum DeleteOutcome {
    Deleted,
    AlreadyGone,
    Accepted { operation: AsyncOperation },
}
