pub mod v2024_01_01;
pub mod v2024_06_01;

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::model::{ResourceEnvelope, ResourceKindProperties};

/// Supported wire-format versions. One converter pair exists per
/// (resource kind × version); anything else is a hard conversion error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiVersion {
    V2024_01_01,
    V2024_06_01,
}

pub const SUPPORTED_VERSIONS: &[ApiVersion] = &[ApiVersion::V2024_01_01, ApiVersion::V2024_06_01];

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ApiVersion::V2024_01_01 => "2024-01-01",
            ApiVersion::V2024_06_01 => "2024-06-01",
        };
        f.write_str(s)
    }
}

impl FromStr for ApiVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "2024-01-01" => Ok(ApiVersion::V2024_01_01),
            "2024-06-01" => Ok(ApiVersion::V2024_06_01),
            other => Err(Error::InvalidModel(format!(
                "unsupported api-version '{other}'"
            ))),
        }
    }
}

/// Caller-controlled fields of an inbound mutation, in the internal model.
/// Identity fields (id/name/type) come from the request context, system
/// data from the pipeline's merge step.
#[derive(Debug, Clone)]
pub struct NewResource {
    pub location: Option<String>,
    pub tags: BTreeMap<String, String>,
    pub properties: ResourceKindProperties,
}

/// Convert an inbound wire document to the internal model.
pub fn to_internal(
    resource_type: &str,
    version: ApiVersion,
    body: &serde_json::Value,
) -> Result<NewResource> {
    match version {
        ApiVersion::V2024_01_01 => v2024_01_01::to_internal(resource_type, body),
        ApiVersion::V2024_06_01 => v2024_06_01::to_internal(resource_type, body),
    }
}

/// Convert an internal envelope to the wire document of one version.
/// Fields the version does not define are omitted, not defaulted.
pub fn from_internal(envelope: &ResourceEnvelope, version: ApiVersion) -> Result<serde_json::Value> {
    let properties = match version {
        ApiVersion::V2024_01_01 => v2024_01_01::properties_doc(envelope)?,
        ApiVersion::V2024_06_01 => v2024_06_01::properties_doc(envelope)?,
    };
    Ok(envelope_doc(envelope, properties))
}

/// Common inbound shape shared by every version: the kind-specific part
/// lives under `properties`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEnvelope {
    pub location: Option<String>,
    #[serde(default)]
    pub tags: BTreeMap<String, String>,
    pub properties: Option<serde_json::Value>,
}

pub(crate) fn parse_wire_envelope(body: &serde_json::Value) -> Result<(WireEnvelope, serde_json::Value)> {
    let envelope: WireEnvelope = serde_json::from_value(body.clone())
        .map_err(|e| Error::InvalidModel(format!("malformed resource document: {e}")))?;
    let properties = envelope
        .properties
        .clone()
        .ok_or_else(|| Error::InvalidModel("'properties' is required".to_string()))?;
    Ok((envelope, properties))
}

pub(crate) fn conversion_error(resource_type: &str, version: ApiVersion) -> Error {
    Error::InvalidModel(format!(
        "resource type '{resource_type}' is not supported in api-version {version}"
    ))
}

/// Read-only scaffolding shared by every outbound conversion: identity,
/// system data, provisioning state, and deployed output-resource records.
fn envelope_doc(envelope: &ResourceEnvelope, mut properties: serde_json::Value) -> serde_json::Value {
    if let Some(props) = properties.as_object_mut() {
        props.insert(
            "provisioningState".to_string(),
            json!(envelope.provisioning_state.to_string()),
        );
        if let Some(output) = &envelope.output {
            let resources: Vec<serde_json::Value> = output
                .resources
                .iter()
                .map(|r| {
                    json!({
                        "localId": r.local_id,
                        "provider": r.resource_type.provider,
                        "type": r.resource_type.kind,
                        "identity": r.identity,
                    })
                })
                .collect();
            props.insert("status".to_string(), json!({ "outputResources": resources }));
        }
    }

    let mut doc = json!({
        "id": envelope.id.as_str(),
        "name": envelope.name,
        "type": envelope.resource_type,
        "location": envelope.location,
        "systemData": envelope.system_data,
        "properties": properties,
    });
    if !envelope.tags.is_empty() {
        doc["tags"] = json!(envelope.tags);
    }
    doc
}
