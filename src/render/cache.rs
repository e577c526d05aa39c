use serde_json::json;

use super::{
    ComputedValueReference, OutputResource, OutputResourceType, RenderDependencies,
    RendererOutput, ResourceRenderer, SecretValueReference,
};
use crate::error::{Error, Result};
use crate::model::{kinds, ResourceEnvelope};

pub const LOCAL_ID_CACHE: &str = "Cache";

const CACHE_KIND: &str = "azure.cache/redis";
const DEFAULT_PORT: u16 = 6379;

/// Expands a logical cache into a single cache output resource, exposing
/// host/port as computed values and the connection string as a secret
/// reference.
pub struct CacheRenderer;

impl ResourceRenderer for CacheRenderer {
    fn kind(&self) -> &'static str {
        kinds::CACHE_TYPE
    }

    fn render(
        &self,
        resource: &ResourceEnvelope,
        _deps: &RenderDependencies,
    ) -> Result<RendererOutput> {
        let kinds::ResourceKindProperties::Cache(props) = &resource.properties else {
            return Err(Error::RenderValidation(format!(
                "cache renderer invoked for '{}'",
                resource.resource_type
            )));
        };

        if props.managed && props.resource.is_some() {
            return Err(Error::RenderValidation(
                "a managed cache cannot also reference an existing resource".to_string(),
            ));
        }

        let identity = match (&props.resource, props.managed) {
            (Some(external), false) => Some(validate_external_cache(external)?),
            (None, true) => None,
            (None, false) => {
                return Err(Error::RenderValidation(
                    "either 'managed' must be true or 'resource' must reference an existing cache"
                        .to_string(),
                ))
            }
            (Some(_), true) => unreachable!(),
        };

        let cache_name = identity
            .as_deref()
            .and_then(|id| id.rsplit('/').next())
            .unwrap_or(resource.name.as_str())
            .to_string();
        let host = props
            .host
            .clone()
            .unwrap_or_else(|| format!("{cache_name}.cache.rudder.internal"));
        let port = props.port.unwrap_or(DEFAULT_PORT);

        let mut properties = json!({
            "name": cache_name,
            "hostName": host,
            "port": port,
        });
        if let Some(tls) = props.tls {
            properties["tlsEnabled"] = json!(tls);
        }

        let cache = OutputResource {
            local_id: LOCAL_ID_CACHE.to_string(),
            resource_type: OutputResourceType::new("azure", CACHE_KIND),
            identity,
            managed: props.managed,
            depends_on: Vec::new(),
            desired: json!({ "properties": properties }),
        };

        let mut output = RendererOutput {
            resources: vec![cache],
            ..Default::default()
        };
        output.computed_values.insert(
            "host".to_string(),
            ComputedValueReference::pointer(LOCAL_ID_CACHE, "/properties/hostName"),
        );
        output.computed_values.insert(
            "port".to_string(),
            ComputedValueReference::pointer(LOCAL_ID_CACHE, "/properties/port"),
        );
        output.secret_values.insert(
            "connectionString".to_string(),
            SecretValueReference::pointer(LOCAL_ID_CACHE, "/properties/primaryConnectionString"),
        );
        Ok(output)
    }
}

/// Accepts `.../caches/{name}` or `.../redis/{name}` external IDs.
fn validate_external_cache(id: &str) -> Result<String> {
    let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    let marker = segments
        .iter()
        .position(|s| *s == "caches" || *s == "redis");
    match marker {
        Some(pos) if pos + 1 < segments.len() => Ok(id.to_string()),
        _ => Err(Error::RenderValidation(
            "the 'resource' field must refer to a cache".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::kinds::CacheProperties;
    use crate::render::test_support::envelope_with;

    fn cache(props: CacheProperties) -> ResourceEnvelope {
        envelope_with(
            "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/caches/cache0",
            kinds::ResourceKindProperties::Cache(props),
        )
    }

    #[test]
    fn renders_single_cache_resource() {
        let resource = cache(CacheProperties {
            environment: "env".into(),
            resource: Some("/external/azure/redis/test-cache".into()),
            port: Some(10255),
            ..Default::default()
        });

        let output = CacheRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap();

        assert_eq!(output.resources.len(), 1);
        let out = &output.resources[0];
        assert_eq!(out.local_id, LOCAL_ID_CACHE);
        assert_eq!(out.identity.as_deref(), Some("/external/azure/redis/test-cache"));
        assert_eq!(out.desired["properties"]["port"], json!(10255));

        assert_eq!(
            output.secret_values["connectionString"],
            SecretValueReference::pointer(LOCAL_ID_CACHE, "/properties/primaryConnectionString")
        );
    }

    #[test]
    fn managed_and_resource_are_mutually_exclusive() {
        let resource = cache(CacheProperties {
            environment: "env".into(),
            managed: true,
            resource: Some("/external/azure/redis/test-cache".into()),
            ..Default::default()
        });

        let err = CacheRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap_err();
        assert!(matches!(err, Error::RenderValidation(_)));
    }

    #[test]
    fn wrong_external_resource_type_is_rejected() {
        let resource = cache(CacheProperties {
            environment: "env".into(),
            resource: Some("/external/azure/servers/not-a-cache".into()),
            ..Default::default()
        });

        let err = CacheRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap_err();
        assert!(matches!(err, Error::RenderValidation(_)));
    }

    #[test]
    fn tls_flag_flows_into_desired_state() {
        let resource = cache(CacheProperties {
            environment: "env".into(),
            managed: true,
            tls: Some(true),
            ..Default::default()
        });

        let output = CacheRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap();
        assert_eq!(
            output.resources[0].desired["properties"]["tlsEnabled"],
            json!(true)
        );
    }
}
