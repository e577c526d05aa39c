//! Wire format for api-version 2024-06-01.
//!
//! Adds `dataStores.maxConnections`, `caches.tls`, and
//! `services.envPrefix` over 2024-01-01.

use serde::{Deserialize, Serialize};

use super::{conversion_error, parse_wire_envelope, ApiVersion, NewResource};
use crate::error::{Error, Result};
use crate::model::kinds::{
    self, CacheProperties, DataStoreProperties, ResourceKindProperties, ServiceProperties,
};
use crate::model::ResourceEnvelope;

const VERSION: ApiVersion = ApiVersion::V2024_06_01;

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DataStoreResourceProperties {
    environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    application: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    managed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    database_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_connections: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CacheResourceProperties {
    environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    application: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    managed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    host: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    port: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tls: Option<bool>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ServiceResourceProperties {
    environment: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    application: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    data_store: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cache: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    env_prefix: Option<String>,
}

pub(super) fn to_internal(resource_type: &str, body: &serde_json::Value) -> Result<NewResource> {
    let (envelope, properties) = parse_wire_envelope(body)?;

    let properties = if resource_type.eq_ignore_ascii_case(kinds::DATA_STORE_TYPE) {
        let wire: DataStoreResourceProperties = decode(properties)?;
        ResourceKindProperties::DataStore(DataStoreProperties {
            environment: wire.environment,
            application: wire.application,
            managed: wire.managed,
            resource: wire.resource,
            database_name: wire.database_name,
            max_connections: wire.max_connections,
        })
    } else if resource_type.eq_ignore_ascii_case(kinds::CACHE_TYPE) {
        let wire: CacheResourceProperties = decode(properties)?;
        ResourceKindProperties::Cache(CacheProperties {
            environment: wire.environment,
            application: wire.application,
            managed: wire.managed,
            resource: wire.resource,
            host: wire.host,
            port: wire.port,
            tls: wire.tls,
        })
    } else if resource_type.eq_ignore_ascii_case(kinds::SERVICE_TYPE) {
        let wire: ServiceResourceProperties = decode(properties)?;
        ResourceKindProperties::Service(ServiceProperties {
            environment: wire.environment,
            application: wire.application,
            data_store: wire.data_store,
            cache: wire.cache,
            env_prefix: wire.env_prefix,
        })
    } else {
        return Err(conversion_error(resource_type, VERSION));
    };

    Ok(NewResource {
        location: envelope.location,
        tags: envelope.tags,
        properties,
    })
}

pub(super) fn properties_doc(envelope: &ResourceEnvelope) -> Result<serde_json::Value> {
    let doc = match &envelope.properties {
        ResourceKindProperties::DataStore(p) => encode(DataStoreResourceProperties {
            environment: p.environment.clone(),
            application: p.application.clone(),
            managed: p.managed,
            resource: p.resource.clone(),
            database_name: p.database_name.clone(),
            max_connections: p.max_connections,
        })?,
        ResourceKindProperties::Cache(p) => encode(CacheResourceProperties {
            environment: p.environment.clone(),
            application: p.application.clone(),
            managed: p.managed,
            resource: p.resource.clone(),
            host: p.host.clone(),
            port: p.port,
            tls: p.tls,
        })?,
        ResourceKindProperties::Service(p) => encode(ServiceResourceProperties {
            environment: p.environment.clone(),
            application: p.application.clone(),
            data_store: p.data_store.clone(),
            cache: p.cache.clone(),
            env_prefix: p.env_prefix.clone(),
        })?,
    };
    Ok(doc)
}

fn decode<T: serde::de::DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    serde_json::from_value(value)
        .map_err(|e| Error::InvalidModel(format!("malformed properties: {e}")))
}

fn encode<T: Serialize>(value: T) -> Result<serde_json::Value> {
    serde_json::to_value(value)
        .map_err(|e| Error::Internal(anyhow::anyhow!("encoding wire properties: {e}")))
}
