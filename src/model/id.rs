use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Hierarchical resource identifier:
/// `/planes/{plane}/resourceGroups/{group}/providers/{namespace}/{type}/{name}`.
///
/// Parsed and validated once at the boundary; the canonical lowercased form
/// (`index_key`) is the store key for the envelope and the per-resource
/// operation index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceId {
    raw: String,
    plane: String,
    resource_group: String,
    namespace: String,
    type_name: String,
    name: String,
}

impl ResourceId {
    pub fn parse(raw: &str) -> Result<Self, Error> {
        let parts: Vec<&str> = raw.split('/').collect();
        // ["", "planes", plane, "resourceGroups", group, "providers", ns, type, name]
        if parts.len() != 9
            || !parts[0].is_empty()
            || !parts[1].eq_ignore_ascii_case("planes")
            || !parts[3].eq_ignore_ascii_case("resourceGroups")
            || !parts[5].eq_ignore_ascii_case("providers")
        {
            return Err(Error::InvalidModel(format!(
                "'{}' is not a valid resource id",
                raw
            )));
        }
        for segment in &parts[2..] {
            if segment.is_empty() {
                return Err(Error::InvalidModel(format!(
                    "'{}' is not a valid resource id: empty path segment",
                    raw
                )));
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            plane: parts[2].to_string(),
            resource_group: parts[4].to_string(),
            namespace: parts[6].to_string(),
            type_name: parts[7].to_string(),
            name: parts[8].to_string(),
        })
    }

    pub fn plane(&self) -> &str {
        &self.plane
    }

    pub fn resource_group(&self) -> &str {
        &self.resource_group
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Provider-qualified type, e.g. `Rudder.Resources/dataStores`.
    pub fn qualified_type(&self) -> String {
        format!("{}/{}", self.namespace, self.type_name)
    }

    /// Case-normalized form used as the store key.
    pub fn index_key(&self) -> String {
        self.raw.to_lowercase()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ResourceId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ResourceId {
    type Error = Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ResourceId> for String {
    fn from(id: ResourceId) -> Self {
        id.raw
    }
}
