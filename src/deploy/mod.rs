pub mod clients;

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use tracing::{debug, info};

pub use clients::{ClientRegistry, CloudClient, FakeCloudClient, FailingCloudClient};

use crate::error::{Error, Result};
use crate::model::{ResourceEnvelope, ResourceId, ResourceOutput};
use crate::render::{self, DependencyOutput, RenderDependencies, RendererOutput};
use crate::store::StorageClient;

/// Cancellation probe consulted between deploy steps. Cancellation is a
/// state request, never a forced task kill: a worker observes it at its
/// next checkpoint.
#[async_trait]
pub trait Checkpoint: Send + Sync {
    async fn cancelled(&self) -> bool;
}

/// Checkpoint for inline (synchronous) deploys, which cannot be cancelled.
pub struct NeverCancelled;

#[async_trait]
impl Checkpoint for NeverCancelled {
    async fn cancelled(&self) -> bool {
        false
    }
}

/// Outcome of a deploy walk.
pub enum DeployResult {
    Completed(ResourceOutput),
    /// The checkpoint reported cancellation before the walk finished.
    Cancelled,
}

/// Walks a rendered output-resource graph in dependency order, invoking
/// the owning provider client per node and resolving computed-value
/// references against accumulated live state.
pub struct DeploymentProcessor {
    clients: ClientRegistry,
}

impl DeploymentProcessor {
    pub fn new(clients: ClientRegistry) -> Self {
        Self { clients }
    }

    pub async fn deploy(
        &self,
        resource: &ResourceEnvelope,
        rendered: &RendererOutput,
        checkpoint: &dyn Checkpoint,
    ) -> Result<DeployResult> {
        let order = render::deploy_order(&rendered.resources)?;
        let mut deployed = rendered.resources.clone();
        let mut live_states: HashMap<String, serde_json::Value> = HashMap::new();

        for idx in order {
            if checkpoint.cancelled().await {
                info!(resource_id = %resource.id, "deploy cancelled at checkpoint");
                return Ok(DeployResult::Cancelled);
            }

            let output = &mut deployed[idx];
            let client = self.clients.get(&output.resource_type).ok_or_else(|| {
                Error::DeployFailed {
                    resource: output.local_id.clone(),
                    source: anyhow::anyhow!(
                        "no provider client registered for '{}'",
                        output.resource_type
                    ),
                }
            })?;

            debug!(
                resource_id = %resource.id,
                local_id = %output.local_id,
                output_type = %output.resource_type,
                "deploying output resource"
            );
            let live = client
                .put(output.identity.as_deref(), &output.desired)
                .await
                .map_err(|e| Error::DeployFailed {
                    resource: output.local_id.clone(),
                    source: e,
                })?;

            if output.identity.is_none() {
                let assigned = live
                    .get("id")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                match assigned {
                    Some(id) => output.identity = Some(id),
                    None => {
                        return Err(Error::DeployFailed {
                            resource: output.local_id.clone(),
                            source: anyhow::anyhow!(
                                "provider returned no identity for a managed resource"
                            ),
                        })
                    }
                }
            }
            live_states.insert(output.local_id.clone(), live);
        }

        let mut computed_values = BTreeMap::new();
        for (name, reference) in &rendered.computed_values {
            let value = resolve_reference(
                &live_states,
                reference.value.as_ref(),
                reference.local_id.as_deref(),
                reference.json_pointer.as_deref(),
            )
            .ok_or_else(|| {
                Error::DependencyUnresolved(format!(
                    "computed value '{name}' of {} could not be resolved",
                    resource.id
                ))
            })?;
            computed_values.insert(name.clone(), value);
        }

        // Secrets stay references; resolving them here only proves the
        // reference is satisfiable. The resolved value is dropped.
        for (name, secret) in &rendered.secret_values {
            let resolved = resolve_reference(
                &live_states,
                None,
                Some(secret.local_id.as_str()),
                Some(secret.json_pointer.as_str()),
            );
            if resolved.is_none() {
                return Err(Error::DependencyUnresolved(format!(
                    "secret value '{name}' of {} could not be resolved",
                    resource.id
                )));
            }
        }

        info!(
            resource_id = %resource.id,
            output_resources = deployed.len(),
            "deploy complete"
        );
        Ok(DeployResult::Completed(ResourceOutput {
            resources: deployed,
            computed_values,
            secrets: rendered.secret_values.clone(),
        }))
    }

    /// Tears down a resource's recorded output resources in reverse
    /// dependency order. Unknown identities are treated as already gone.
    pub async fn delete(
        &self,
        resource: &ResourceEnvelope,
        checkpoint: &dyn Checkpoint,
    ) -> Result<DeployResult> {
        let Some(output) = &resource.output else {
            return Ok(DeployResult::Completed(ResourceOutput::default()));
        };

        let mut order = render::deploy_order(&output.resources)?;
        order.reverse();

        for idx in order {
            if checkpoint.cancelled().await {
                info!(resource_id = %resource.id, "teardown cancelled at checkpoint");
                return Ok(DeployResult::Cancelled);
            }

            let record = &output.resources[idx];
            // Bound-but-unmanaged resources are left in place; the plane
            // never provisioned them.
            if !record.managed {
                debug!(
                    resource_id = %resource.id,
                    local_id = %record.local_id,
                    "skipping teardown of unmanaged resource"
                );
                continue;
            }
            let Some(identity) = &record.identity else {
                continue;
            };
            let client = self.clients.get(&record.resource_type).ok_or_else(|| {
                Error::DeployFailed {
                    resource: record.local_id.clone(),
                    source: anyhow::anyhow!(
                        "no provider client registered for '{}'",
                        record.resource_type
                    ),
                }
            })?;
            client
                .delete(identity)
                .await
                .map_err(|e| Error::DeployFailed {
                    resource: record.local_id.clone(),
                    source: e,
                })?;
        }

        info!(resource_id = %resource.id, "teardown complete");
        Ok(DeployResult::Completed(ResourceOutput::default()))
    }
}

fn resolve_reference(
    live_states: &HashMap<String, serde_json::Value>,
    static_value: Option<&serde_json::Value>,
    local_id: Option<&str>,
    json_pointer: Option<&str>,
) -> Option<serde_json::Value> {
    if let Some(value) = static_value {
        return Some(value.clone());
    }
    let local_id = local_id?;
    let pointer = json_pointer?;
    live_states.get(local_id)?.pointer(pointer).cloned()
}

/// Load the rendered outputs of every logical resource `envelope`
/// references. A missing or still-provisioning dependency is
/// `DependencyUnresolved` (transient while it provisions).
pub async fn resolve_dependencies(
    store: &dyn StorageClient,
    envelope: &ResourceEnvelope,
) -> Result<RenderDependencies> {
    let mut deps = RenderDependencies::empty();
    for reference in envelope.properties.referenced_resources() {
        let id = ResourceId::parse(reference)?;
        let obj = match store.get(&id.index_key()).await {
            Ok(obj) => obj,
            Err(Error::NotFound(_)) => {
                return Err(Error::DependencyUnresolved(format!(
                    "referenced resource '{reference}' does not exist"
                )))
            }
            Err(e) => return Err(e),
        };
        let dep: ResourceEnvelope = obj.decode()?;
        if dep.provisioning_state != crate::model::ProvisioningState::Succeeded {
            return Err(Error::DependencyUnresolved(format!(
                "referenced resource '{reference}' is in state {}",
                dep.provisioning_state
            )));
        }
        let computed_values = dep
            .output
            .as_ref()
            .map(|o| o.computed_values.clone())
            .unwrap_or_default();
        deps.insert(
            id.index_key(),
            DependencyOutput {
                resource_id: reference.to_string(),
                resource_type: dep.resource_type.clone(),
                computed_values,
            },
        );
    }
    Ok(deps)
}
