pub mod cache;
pub mod datastore;
pub mod service;

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::model::ResourceEnvelope;

/// Provider-qualified type of one concrete output resource,
/// e.g. `azure` / `azure.sql/servers`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OutputResourceType {
    pub provider: String,
    pub kind: String,
}

impl OutputResourceType {
    pub fn new(provider: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            kind: kind.into(),
        }
    }
}

impl fmt::Display for OutputResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.provider, self.kind)
    }
}

/// One concrete resource produced by rendering a logical resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OutputResource {
    /// Unique within one rendering of one logical resource; stable across
    /// re-renders of identical input.
    pub local_id: String,
    pub resource_type: OutputResourceType,
    /// Opaque handle into the external system. `None` until deploy
    /// assigns one for managed resources.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub identity: Option<String>,
    /// Whether this plane provisions the external resource or merely
    /// binds to a caller-supplied one.
    pub managed: bool,
    /// Local IDs of output resources that must deploy before this one.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Desired state handed to the provider client.
    pub desired: serde_json::Value,
}

/// A named value exposed by a rendered resource for consumption by
/// dependents: either a static value known at render time, or a JSON
/// pointer into an output resource's live properties.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedValueReference {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub local_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub json_pointer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

impl ComputedValueReference {
    pub fn value(value: serde_json::Value) -> Self {
        Self {
            value: Some(value),
            ..Default::default()
        }
    }

    pub fn pointer(local_id: impl Into<String>, json_pointer: impl Into<String>) -> Self {
        Self {
            local_id: Some(local_id.into()),
            json_pointer: Some(json_pointer.into()),
            value: None,
        }
    }
}

/// Like [`ComputedValueReference`], but resolved lazily and never
/// persisted or logged in resolved form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretValueReference {
    pub local_id: String,
    pub json_pointer: String,
}

impl SecretValueReference {
    pub fn pointer(local_id: impl Into<String>, json_pointer: impl Into<String>) -> Self {
        Self {
            local_id: local_id.into(),
            json_pointer: json_pointer.into(),
        }
    }
}

/// Result of rendering one logical resource.
#[derive(Debug, Clone, Default)]
pub struct RendererOutput {
    pub resources: Vec<OutputResource>,
    pub computed_values: BTreeMap<String, ComputedValueReference>,
    pub secret_values: BTreeMap<String, SecretValueReference>,
}

/// Rendered outputs of the logical resources a resource references,
/// keyed by the referenced resource's index key.
#[derive(Debug, Clone, Default)]
pub struct RenderDependencies {
    outputs: BTreeMap<String, DependencyOutput>,
}

impl RenderDependencies {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, index_key: String, output: DependencyOutput) {
        self.outputs.insert(index_key, output);
    }

    pub fn get(&self, index_key: &str) -> Option<&DependencyOutput> {
        self.outputs.get(index_key)
    }
}

/// Resolved, non-secret values of one dependency.
#[derive(Debug, Clone)]
pub struct DependencyOutput {
    pub resource_id: String,
    pub resource_type: String,
    pub computed_values: BTreeMap<String, serde_json::Value>,
}

impl DependencyOutput {
    pub fn computed(&self, name: &str) -> Option<&serde_json::Value> {
        self.computed_values.get(name)
    }
}

/// Capability of rendering one kind of logical resource into its
/// output-resource graph. Implementations are pure and deterministic:
/// identical input must produce identical local IDs and wiring, so a
/// re-render after a crash reconciles against the earlier deploy instead
/// of duplicating it.
pub trait ResourceRenderer: Send + Sync {
    /// Provider-qualified logical type this renderer handles.
    fn kind(&self) -> &'static str;

    fn render(
        &self,
        resource: &ResourceEnvelope,
        deps: &RenderDependencies,
    ) -> Result<RendererOutput>;
}

/// Kind-to-renderer dispatch table. Built once at startup, read-only
/// afterwards, shared by handle. Kinds match case-insensitively, like
/// every other type comparison at the boundary.
#[derive(Default)]
pub struct RendererRegistry {
    renderers: HashMap<String, Box<dyn ResourceRenderer>>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in kind wired up.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        registry.register(Box::new(datastore::DataStoreRenderer));
        registry.register(Box::new(cache::CacheRenderer));
        registry.register(Box::new(service::ServiceRenderer));
        registry
    }

    pub fn register(&mut self, renderer: Box<dyn ResourceRenderer>) {
        self.renderers
            .insert(renderer.kind().to_ascii_lowercase(), renderer);
    }

    /// Dispatch by logical kind, then validate the produced graph.
    pub fn render(
        &self,
        resource: &ResourceEnvelope,
        deps: &RenderDependencies,
    ) -> Result<RendererOutput> {
        let renderer = self
            .renderers
            .get(&resource.resource_type.to_ascii_lowercase())
            .ok_or_else(|| {
                Error::InvalidModel(format!(
                    "no renderer registered for '{}'",
                    resource.resource_type
                ))
            })?;
        let output = renderer.render(resource, deps)?;
        validate_graph(&output.resources)?;
        Ok(output)
    }
}

/// Check the rendered set forms a well-defined DAG: unique local IDs,
/// known dependency references, no cycles.
pub fn validate_graph(resources: &[OutputResource]) -> Result<()> {
    let mut seen: HashMap<&str, usize> = HashMap::new();
    for (idx, resource) in resources.iter().enumerate() {
        if seen.insert(resource.local_id.as_str(), idx).is_some() {
            return Err(Error::RenderValidation(format!(
                "duplicate output resource local id '{}'",
                resource.local_id
            )));
        }
    }
    for resource in resources {
        for dep in &resource.depends_on {
            if !seen.contains_key(dep.as_str()) {
                return Err(Error::RenderValidation(format!(
                    "output resource '{}' depends on unknown local id '{}'",
                    resource.local_id, dep
                )));
            }
        }
    }

    let (graph, _) = build_graph(resources);
    if petgraph::algo::is_cyclic_directed(&graph) {
        return Err(Error::RenderValidation(
            "circular dependency in output resource graph".to_string(),
        ));
    }
    Ok(())
}

/// Indices of `resources` in dependency order (dependencies first).
/// The order is stable for identical input.
pub fn deploy_order(resources: &[OutputResource]) -> Result<Vec<usize>> {
    validate_graph(resources)?;
    let (graph, _) = build_graph(resources);
    let sorted = petgraph::algo::toposort(&graph, None).map_err(|_| {
        Error::RenderValidation("circular dependency in output resource graph".to_string())
    })?;
    Ok(sorted.into_iter().map(|idx| graph[idx]).collect())
}

/// Graph where each node carries the index into the input slice and an
/// edge A -> B means B depends on A (A deploys first).
fn build_graph(resources: &[OutputResource]) -> (DiGraph<usize, ()>, HashMap<&str, NodeIndex>) {
    let mut graph = DiGraph::new();
    let mut node_map: HashMap<&str, NodeIndex> = HashMap::new();
    for (idx, resource) in resources.iter().enumerate() {
        let node = graph.add_node(idx);
        node_map.insert(resource.local_id.as_str(), node);
    }
    for resource in resources {
        let to = node_map[resource.local_id.as_str()];
        for dep in &resource.depends_on {
            if let Some(&from) = node_map.get(dep.as_str()) {
                graph.add_edge(from, to, ());
            }
        }
    }
    (graph, node_map)
}
