use serde_json::json;

use super::{
    OutputResource, OutputResourceType, RenderDependencies, RendererOutput, ResourceRenderer,
};
use crate::error::{Error, Result};
use crate::model::{kinds, ResourceEnvelope, ResourceId};

pub const LOCAL_ID_BINDING: &str = "ServiceBinding";

const BINDING_KIND: &str = "azure.app/bindings";

/// Renders the binding that connects an application service to the
/// dataStores/caches it references, embedding the dependencies' resolved
/// computed values into the binding's desired state.
pub struct ServiceRenderer;

impl ResourceRenderer for ServiceRenderer {
    fn kind(&self) -> &'static str {
        kinds::SERVICE_TYPE
    }

    fn render(
        &self,
        resource: &ResourceEnvelope,
        deps: &RenderDependencies,
    ) -> Result<RendererOutput> {
        let kinds::ResourceKindProperties::Service(props) = &resource.properties else {
            return Err(Error::RenderValidation(format!(
                "service renderer invoked for '{}'",
                resource.resource_type
            )));
        };

        if props.data_store.is_none() && props.cache.is_none() {
            return Err(Error::RenderValidation(
                "a service must reference at least one data store or cache".to_string(),
            ));
        }

        let mut bindings = serde_json::Map::new();

        if let Some(id) = &props.data_store {
            let dep = lookup(deps, id, kinds::DATA_STORE_TYPE)?;
            bindings.insert(
                "dataStore".to_string(),
                json!({
                    "server": required_value(dep, id, "server")?,
                    "database": required_value(dep, id, "database")?,
                }),
            );
        }

        if let Some(id) = &props.cache {
            let dep = lookup(deps, id, kinds::CACHE_TYPE)?;
            bindings.insert(
                "cache".to_string(),
                json!({
                    "host": required_value(dep, id, "host")?,
                    "port": required_value(dep, id, "port")?,
                }),
            );
        }

        let mut properties = json!({
            "service": resource.name,
            "bindings": bindings,
        });
        if let Some(prefix) = &props.env_prefix {
            properties["envPrefix"] = json!(prefix);
        }

        let binding = OutputResource {
            local_id: LOCAL_ID_BINDING.to_string(),
            resource_type: OutputResourceType::new("azure", BINDING_KIND),
            identity: None,
            managed: true,
            depends_on: Vec::new(),
            desired: json!({ "properties": properties }),
        };

        Ok(RendererOutput {
            resources: vec![binding],
            ..Default::default()
        })
    }
}

fn lookup<'a>(
    deps: &'a RenderDependencies,
    id: &str,
    expected_type: &str,
) -> Result<&'a super::DependencyOutput> {
    let parsed = ResourceId::parse(id)?;
    if !parsed.qualified_type().eq_ignore_ascii_case(expected_type) {
        return Err(Error::RenderValidation(format!(
            "'{id}' must refer to a {expected_type}"
        )));
    }
    deps.get(&parsed.index_key()).ok_or_else(|| {
        Error::DependencyUnresolved(format!("referenced resource '{id}' has no rendered output"))
    })
}

fn required_value(
    dep: &super::DependencyOutput,
    id: &str,
    name: &str,
) -> Result<serde_json::Value> {
    dep.computed(name).cloned().ok_or_else(|| {
        Error::DependencyUnresolved(format!(
            "computed value '{name}' of referenced resource '{id}' is not available"
        ))
    })
}
