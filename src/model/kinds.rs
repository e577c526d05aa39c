use serde::{Deserialize, Serialize};

/// Provider namespace for the built-in logical resource kinds.
pub const NAMESPACE: &str = "Rudder.Resources";

pub const DATA_STORE_TYPE: &str = "Rudder.Resources/dataStores";
pub const CACHE_TYPE: &str = "Rudder.Resources/caches";
pub const SERVICE_TYPE: &str = "Rudder.Resources/services";

/// Typed, kind-specific payload of a [`super::ResourceEnvelope`].
///
/// This is the internal data model; wire representations live in
/// `crate::api` and are converted at the boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ResourceKindProperties {
    DataStore(DataStoreProperties),
    Cache(CacheProperties),
    Service(ServiceProperties),
}

impl ResourceKindProperties {
    pub fn qualified_type(&self) -> &'static str {
        match self {
            ResourceKindProperties::DataStore(_) => DATA_STORE_TYPE,
            ResourceKindProperties::Cache(_) => CACHE_TYPE,
            ResourceKindProperties::Service(_) => SERVICE_TYPE,
        }
    }

    /// Resource IDs of other logical resources this resource consumes.
    /// The pipeline resolves these to rendered outputs before rendering.
    pub fn referenced_resources(&self) -> Vec<&str> {
        match self {
            ResourceKindProperties::Service(p) => p
                .data_store
                .iter()
                .chain(p.cache.iter())
                .map(|s| s.as_str())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// A logical relational database. Unmanaged mode binds to an existing
/// external server+database via `resource`; managed mode provisions both.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataStoreProperties {
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default)]
    pub managed: bool,
    /// External server+database resource ID when unmanaged.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_name: Option<String>,
    /// Introduced in api-version 2024-06-01; absent for older clients.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_connections: Option<u32>,
}

/// A logical cache.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheProperties {
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(default)]
    pub managed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
    /// Introduced in api-version 2024-06-01.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tls: Option<bool>,
}

/// Binds an application service to the dataStores/caches it consumes.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceProperties {
    pub environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<String>,
    /// Introduced in api-version 2024-06-01.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub env_prefix: Option<String>,
}
