use serde_json::json;

use super::{
    ComputedValueReference, OutputResource, OutputResourceType, RenderDependencies,
    RendererOutput, ResourceRenderer,
};
use crate::error::{Error, Result};
use crate::model::{kinds, ResourceEnvelope};

pub const LOCAL_ID_SERVER: &str = "DataStoreServer";
pub const LOCAL_ID_DATABASE: &str = "DataStoreDatabase";

const SERVER_KIND: &str = "azure.sql/servers";
const DATABASE_KIND: &str = "azure.sql/databases";

/// Expands a logical data store into a server plus a database that
/// depends on it. Unmanaged mode binds both to an existing external
/// server+database resource ID.
pub struct DataStoreRenderer;

impl ResourceRenderer for DataStoreRenderer {
    fn kind(&self) -> &'static str {
        kinds::DATA_STORE_TYPE
    }

    fn render(
        &self,
        resource: &ResourceEnvelope,
        _deps: &RenderDependencies,
    ) -> Result<RendererOutput> {
        let kinds::ResourceKindProperties::DataStore(props) = &resource.properties else {
            return Err(Error::RenderValidation(format!(
                "data store renderer invoked for '{}'",
                resource.resource_type
            )));
        };

        if props.managed && props.resource.is_some() {
            return Err(Error::RenderValidation(
                "a managed data store cannot also reference an existing resource".to_string(),
            ));
        }

        let binding = match (&props.resource, props.managed) {
            (Some(external), false) => Some(parse_external_database(external)?),
            (None, true) => None,
            (None, false) => {
                return Err(Error::RenderValidation(
                    "either 'managed' must be true or 'resource' must reference an existing database"
                        .to_string(),
                ))
            }
            // Unreachable given the managed+resource check above; keep the
            // match exhaustive without a wildcard.
            (Some(_), true) => unreachable!(),
        };

        let server_name = binding
            .as_ref()
            .map(|b| b.server.clone())
            .unwrap_or_else(|| format!("{}-server", resource.name));
        let database_name = props
            .database_name
            .clone()
            .or_else(|| binding.as_ref().map(|b| b.database.clone()))
            .unwrap_or_else(|| resource.name.clone());

        let server = OutputResource {
            local_id: LOCAL_ID_SERVER.to_string(),
            resource_type: OutputResourceType::new("azure", SERVER_KIND),
            identity: binding.as_ref().map(|b| b.server_id.clone()),
            managed: props.managed,
            depends_on: Vec::new(),
            desired: json!({
                "properties": {
                    "name": server_name,
                    "fullyQualifiedDomainName": format!("{server_name}.sql.rudder.internal"),
                }
            }),
        };

        let mut database_properties = json!({
            "name": database_name,
            "server": server_name,
        });
        if let Some(max) = props.max_connections {
            database_properties["maxConnections"] = json!(max);
        }
        let database = OutputResource {
            local_id: LOCAL_ID_DATABASE.to_string(),
            resource_type: OutputResourceType::new("azure", DATABASE_KIND),
            identity: binding.as_ref().map(|b| b.database_id.clone()),
            managed: props.managed,
            depends_on: vec![LOCAL_ID_SERVER.to_string()],
            desired: json!({ "properties": database_properties }),
        };

        let mut output = RendererOutput {
            resources: vec![server, database],
            ..Default::default()
        };
        output.computed_values.insert(
            "database".to_string(),
            ComputedValueReference::value(json!(database_name)),
        );
        output.computed_values.insert(
            "server".to_string(),
            ComputedValueReference::pointer(
                LOCAL_ID_SERVER,
                "/properties/fullyQualifiedDomainName",
            ),
        );
        Ok(output)
    }
}

struct ExternalDatabase {
    server: String,
    database: String,
    server_id: String,
    database_id: String,
}

/// Accepts `.../servers/{server}/databases/{database}` external IDs.
fn parse_external_database(id: &str) -> Result<ExternalDatabase> {
    let segments: Vec<&str> = id.split('/').filter(|s| !s.is_empty()).collect();
    let server_pos = segments.iter().position(|s| *s == "servers");
    let database_pos = segments.iter().position(|s| *s == "databases");
    match (server_pos, database_pos) {
        (Some(s), Some(d))
            if d == s + 2 && s + 1 < segments.len() && d + 1 < segments.len() =>
        {
            let server = segments[s + 1].to_string();
            let database = segments[d + 1].to_string();
            let database_id = id.to_string();
            let server_id = id
                .split("/databases/")
                .next()
                .unwrap_or(id)
                .to_string();
            Ok(ExternalDatabase {
                server,
                database,
                server_id,
                database_id,
            })
        }
        _ => Err(Error::RenderValidation(
            "the 'resource' field must refer to a database under a server".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::kinds::DataStoreProperties;
    use crate::render::test_support::envelope_with;

    fn data_store(props: DataStoreProperties) -> ResourceEnvelope {
        envelope_with(
            "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/dataStores/db0",
            kinds::ResourceKindProperties::DataStore(props),
        )
    }

    #[test]
    fn renders_unmanaged_server_and_database() {
        let resource = data_store(DataStoreProperties {
            environment: "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/environments/env0".into(),
            resource: Some("/external/azure/servers/test-server/databases/test-database".into()),
            ..Default::default()
        });

        let output = DataStoreRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap();

        assert_eq!(output.resources.len(), 2);
        let server = &output.resources[0];
        let database = &output.resources[1];

        assert_eq!(server.local_id, LOCAL_ID_SERVER);
        assert_eq!(
            server.identity.as_deref(),
            Some("/external/azure/servers/test-server")
        );
        assert_eq!(database.local_id, LOCAL_ID_DATABASE);
        assert_eq!(database.depends_on, vec![LOCAL_ID_SERVER.to_string()]);
        assert_eq!(
            database.identity.as_deref(),
            Some("/external/azure/servers/test-server/databases/test-database")
        );

        assert_eq!(
            output.computed_values["database"].value,
            Some(serde_json::json!("test-database"))
        );
        let server_ref = &output.computed_values["server"];
        assert_eq!(server_ref.local_id.as_deref(), Some(LOCAL_ID_SERVER));
        assert_eq!(
            server_ref.json_pointer.as_deref(),
            Some("/properties/fullyQualifiedDomainName")
        );
        assert!(output.secret_values.is_empty());
    }

    #[test]
    fn managed_and_resource_are_mutually_exclusive() {
        let resource = data_store(DataStoreProperties {
            environment: "env".into(),
            managed: true,
            resource: Some("/external/azure/servers/s/databases/d".into()),
            ..Default::default()
        });

        let err = DataStoreRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap_err();
        assert!(matches!(err, Error::RenderValidation(_)));
    }

    #[test]
    fn missing_resource_and_unmanaged_is_rejected() {
        let resource = data_store(DataStoreProperties {
            environment: "env".into(),
            ..Default::default()
        });

        let err = DataStoreRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap_err();
        assert!(matches!(err, Error::RenderValidation(_)));
    }

    #[test]
    fn wrong_external_resource_type_is_rejected() {
        let resource = data_store(DataStoreProperties {
            environment: "env".into(),
            resource: Some("/external/azure/buckets/not-a-database".into()),
            ..Default::default()
        });

        let err = DataStoreRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap_err();
        assert!(matches!(err, Error::RenderValidation(_)));
    }

    #[test]
    fn render_is_deterministic() {
        let resource = data_store(DataStoreProperties {
            environment: "env".into(),
            managed: true,
            ..Default::default()
        });

        let first = DataStoreRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap();
        let second = DataStoreRenderer
            .render(&resource, &RenderDependencies::empty())
            .unwrap();
        assert_eq!(first.resources, second.resources);
    }
}
