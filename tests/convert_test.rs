use serde_json::json;

use rudder::api::{self, ApiVersion};
use rudder::model::kinds::{
    CacheProperties, DataStoreProperties, ServiceProperties, CACHE_TYPE, DATA_STORE_TYPE,
    SERVICE_TYPE,
};
use rudder::model::{
    CallerIdentity, ProvisioningState, ResourceEnvelope, ResourceId, ResourceKindProperties,
    SystemData,
};

fn envelope(id: &str, properties: ResourceKindProperties) -> ResourceEnvelope {
    let id = ResourceId::parse(id).unwrap();
    ResourceEnvelope {
        name: id.name().to_string(),
        resource_type: properties.qualified_type().to_string(),
        location: "global".to_string(),
        tags: [("team".to_string(), "platform".to_string())].into(),
        system_data: SystemData::merge(None, &CallerIdentity::new("tests")),
        provisioning_state: ProvisioningState::Succeeded,
        created_api_version: "2024-06-01".to_string(),
        properties,
        output: None,
        id,
    }
}

fn cache_envelope() -> ResourceEnvelope {
    envelope(
        "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/caches/cache0",
        ResourceKindProperties::Cache(CacheProperties {
            environment: "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/environments/env0".to_string(),
            application: Some("billing".to_string()),
            managed: true,
            resource: None,
            host: Some("cache0.internal".to_string()),
            port: Some(10255),
            tls: Some(true),
        }),
    )
}

/// Outbound then inbound through the same version must round-trip every
/// field that version defines.
#[test]
fn cache_round_trips_through_2024_06_01() {
    let original = cache_envelope();
    let doc = api::from_internal(&original, ApiVersion::V2024_06_01).unwrap();

    assert_eq!(doc["id"], json!(original.id.as_str()));
    assert_eq!(doc["type"], json!(CACHE_TYPE));
    assert_eq!(doc["properties"]["provisioningState"], json!("Succeeded"));

    let back = api::to_internal(CACHE_TYPE, ApiVersion::V2024_06_01, &doc).unwrap();
    assert_eq!(back.properties, original.properties);
    assert_eq!(back.location.as_deref(), Some("global"));
    assert_eq!(back.tags, original.tags);
}

#[test]
fn data_store_round_trips_through_2024_06_01() {
    let original = envelope(
        "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/dataStores/db0",
        ResourceKindProperties::DataStore(DataStoreProperties {
            environment: "env0".to_string(),
            application: None,
            managed: false,
            resource: Some("/external/azure/servers/s0/databases/d0".to_string()),
            database_name: Some("orders".to_string()),
            max_connections: Some(50),
        }),
    );
    let doc = api::from_internal(&original, ApiVersion::V2024_06_01).unwrap();
    let back = api::to_internal(DATA_STORE_TYPE, ApiVersion::V2024_06_01, &doc).unwrap();
    assert_eq!(back.properties, original.properties);
}

#[test]
fn service_round_trips_through_2024_01_01() {
    let original = envelope(
        "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/services/svc0",
        ResourceKindProperties::Service(ServiceProperties {
            environment: "env0".to_string(),
            application: Some("billing".to_string()),
            data_store: Some(
                "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/dataStores/db0"
                    .to_string(),
            ),
            cache: None,
            env_prefix: None,
        }),
    );
    let doc = api::from_internal(&original, ApiVersion::V2024_01_01).unwrap();
    let back = api::to_internal(SERVICE_TYPE, ApiVersion::V2024_01_01, &doc).unwrap();
    assert_eq!(back.properties, original.properties);
}

/// Fields a version does not define round-trip as absent, not defaulted.
#[test]
fn version_absent_fields_stay_absent() {
    let original = cache_envelope();

    let doc = api::from_internal(&original, ApiVersion::V2024_01_01).unwrap();
    assert!(
        doc["properties"].get("tls").is_none(),
        "2024-01-01 must not carry a tls field"
    );

    let back = api::to_internal(CACHE_TYPE, ApiVersion::V2024_01_01, &doc).unwrap();
    let ResourceKindProperties::Cache(props) = back.properties else {
        panic!("expected cache properties");
    };
    assert_eq!(props.tls, None);
    // Everything the old version does define survives.
    assert_eq!(props.host.as_deref(), Some("cache0.internal"));
    assert_eq!(props.port, Some(10255));
}

#[test]
fn unknown_api_version_is_rejected() {
    let err = "2019-01-01".parse::<ApiVersion>().unwrap_err();
    assert_eq!(err.code(), "InvalidModel");
}

#[test]
fn unknown_resource_type_is_a_hard_conversion_error() {
    let body = json!({"properties": {"environment": "env0"}});
    for version in [ApiVersion::V2024_01_01, ApiVersion::V2024_06_01] {
        let err = api::to_internal("Rudder.Resources/volcanoes", version, &body).unwrap_err();
        assert_eq!(err.code(), "InvalidModel", "{version}");
    }
}

#[test]
fn missing_properties_is_invalid() {
    let err = api::to_internal(CACHE_TYPE, ApiVersion::V2024_06_01, &json!({})).unwrap_err();
    assert_eq!(err.code(), "InvalidModel");
}

#[test]
fn type_matching_is_case_insensitive() {
    let body = json!({"properties": {"environment": "env0", "managed": true}});
    let converted =
        api::to_internal("rudder.resources/CACHES", ApiVersion::V2024_06_01, &body).unwrap();
    assert!(matches!(
        converted.properties,
        ResourceKindProperties::Cache(_)
    ));
}

#[test]
fn outbound_doc_carries_output_resource_records() {
    let mut original = cache_envelope();
    original.output = Some(rudder::model::ResourceOutput {
        resources: vec![rudder::render::OutputResource {
            local_id: "Cache".to_string(),
            resource_type: rudder::render::OutputResourceType::new("azure", "azure.cache/redis"),
            identity: Some("/providers/azure/generated/1".to_string()),
            managed: true,
            depends_on: vec![],
            desired: json!({}),
        }],
        computed_values: Default::default(),
        secrets: Default::default(),
    });

    let doc = api::from_internal(&original, ApiVersion::V2024_06_01).unwrap();
    let records = doc["properties"]["status"]["outputResources"]
        .as_array()
        .unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0]["localId"], json!("Cache"));
    assert_eq!(records[0]["provider"], json!("azure"));
}
