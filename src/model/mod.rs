pub mod id;
pub mod kinds;

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use id::ResourceId;
pub use kinds::ResourceKindProperties;

use crate::render::{OutputResource, SecretValueReference};

/// Client-visible lifecycle status of a logical resource.
/// Transitions happen only through the controller pipeline and the
/// status manager's terminal reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProvisioningState {
    Creating,
    Updating,
    Deleting,
    Succeeded,
    Failed,
    Canceled,
}

impl ProvisioningState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProvisioningState::Succeeded | ProvisioningState::Failed | ProvisioningState::Canceled
        )
    }
}

impl fmt::Display for ProvisioningState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProvisioningState::Creating => "Creating",
            ProvisioningState::Updating => "Updating",
            ProvisioningState::Deleting => "Deleting",
            ProvisioningState::Succeeded => "Succeeded",
            ProvisioningState::Failed => "Failed",
            ProvisioningState::Canceled => "Canceled",
        };
        f.write_str(s)
    }
}

/// Identity of the caller of one mutation request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    pub principal: String,
}

impl CallerIdentity {
    pub fn new(principal: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
        }
    }
}

/// Audit fields stamped by the pipeline on each accepted write.
/// Renderers and workers never touch these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemData {
    pub created_at: DateTime<Utc>,
    pub created_by: String,
    pub last_modified_at: DateTime<Utc>,
    pub last_modified_by: String,
}

impl SystemData {
    /// Carry creation fields forward from the existing envelope (if any)
    /// and stamp last-modified from the current caller.
    pub fn merge(existing: Option<&SystemData>, caller: &CallerIdentity) -> Self {
        let now = Utc::now();
        match existing {
            Some(prev) => Self {
                created_at: prev.created_at,
                created_by: prev.created_by.clone(),
                last_modified_at: now,
                last_modified_by: caller.principal.clone(),
            },
            None => Self {
                created_at: now,
                created_by: caller.principal.clone(),
                last_modified_at: now,
                last_modified_by: caller.principal.clone(),
            },
        }
    }
}

/// Persisted result of the last successful deploy: the output-resource
/// records, the resolved non-secret computed values, and secret value
/// *references*. Resolved secret material is never persisted.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceOutput {
    pub resources: Vec<OutputResource>,
    #[serde(default)]
    pub computed_values: BTreeMap<String, serde_json::Value>,
    #[serde(default)]
    pub secrets: BTreeMap<String, SecretValueReference>,
}

/// One logical resource as recorded in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceEnvelope {
    pub id: ResourceId,
    pub name: String,
    /// Provider-qualified type, e.g. `Rudder.Resources/caches`.
    pub resource_type: String,
    pub location: String,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub system_data: SystemData,
    pub provisioning_state: ProvisioningState,
    /// API version of the request that first created this resource.
    pub created_api_version: String,
    pub properties: ResourceKindProperties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<ResourceOutput>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_data_merge_preserves_creation_fields() {
        let alice = CallerIdentity::new("alice");
        let bob = CallerIdentity::new("bob");

        let created = SystemData::merge(None, &alice);
        assert_eq!(created.created_by, "alice");
        assert_eq!(created.last_modified_by, "alice");

        let updated = SystemData::merge(Some(&created), &bob);
        assert_eq!(updated.created_by, "alice");
        assert_eq!(updated.created_at, created.created_at);
        assert_eq!(updated.last_modified_by, "bob");
        assert!(updated.last_modified_at >= created.created_at);
    }

    #[test]
    fn terminal_states() {
        assert!(ProvisioningState::Succeeded.is_terminal());
        assert!(ProvisioningState::Failed.is_terminal());
        assert!(ProvisioningState::Canceled.is_terminal());
        assert!(!ProvisioningState::Creating.is_terminal());
        assert!(!ProvisioningState::Deleting.is_terminal());
    }
}
