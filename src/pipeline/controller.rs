use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{DeleteOutcome, Precondition, RequestContext, UpsertOutcome};
use crate::api;
use crate::config::PipelineConfig;
use crate::deploy::{self, DeployResult, DeploymentProcessor, NeverCancelled};
use crate::error::{Error, Result};
use crate::model::{ProvisioningState, ResourceEnvelope, SystemData};
use crate::operations::{AsyncOperation, OperationKind, StatusManager};
use crate::render::RendererRegistry;
use crate::store::{ETag, StorageClient, WriteCondition};
use crate::validate::SchemaValidator;

/// Orchestrates one resource mutation end to end:
/// validate → convert → load → precondition → merge → render → deploy or
/// queue → persist → convert outward.
///
/// The save in step 7 uses the token observed in step 2 as its expected
/// token; that compare-and-swap is the single synchronization point
/// preventing lost updates between the read and the write.
pub struct ResourceController {
    store: Arc<dyn StorageClient>,
    status: Arc<StatusManager>,
    registry: Arc<RendererRegistry>,
    deployer: Arc<DeploymentProcessor>,
    validator: Arc<dyn SchemaValidator>,
    config: PipelineConfig,
}

impl ResourceController {
    pub fn new(
        store: Arc<dyn StorageClient>,
        status: Arc<StatusManager>,
        registry: Arc<RendererRegistry>,
        deployer: Arc<DeploymentProcessor>,
        validator: Arc<dyn SchemaValidator>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            status,
            registry,
            deployer,
            validator,
            config,
        }
    }

    /// Create or update one logical resource.
    pub async fn upsert(
        &self,
        ctx: &RequestContext,
        body: &serde_json::Value,
    ) -> Result<UpsertOutcome> {
        let resource_type = ctx.resource_id.qualified_type();

        // Validation and conversion happen before any store access;
        // a request that fails here never persists partial state.
        if let Err(failures) = self.validator.validate(&resource_type, body) {
            let joined = failures
                .iter()
                .map(|f| f.to_string())
                .collect::<Vec<_>>()
                .join("; ");
            return Err(Error::InvalidModel(joined));
        }
        let new_resource = api::to_internal(&resource_type, ctx.api_version, body)?;

        let key = ctx.resource_id.index_key();
        let (existing, current_etag) = self.read_current(&key).await?;
        evaluate_precondition(&ctx.precondition, current_etag.as_ref())?;

        let mut envelope = ResourceEnvelope {
            id: ctx.resource_id.clone(),
            name: ctx.resource_id.name().to_string(),
            resource_type: resource_type.clone(),
            location: new_resource
                .location
                .or_else(|| existing.as_ref().map(|e| e.location.clone()))
                .unwrap_or_else(|| "global".to_string()),
            tags: new_resource.tags,
            system_data: SystemData::merge(
                existing.as_ref().map(|e| &e.system_data),
                &ctx.caller,
            ),
            provisioning_state: if existing.is_some() {
                ProvisioningState::Updating
            } else {
                ProvisioningState::Creating
            },
            created_api_version: existing
                .as_ref()
                .map(|e| e.created_api_version.clone())
                .unwrap_or_else(|| ctx.api_version.to_string()),
            properties: new_resource.properties,
            // Carry the previous deploy's output until a new deploy
            // supersedes it, so dependents keep resolving.
            output: existing.as_ref().and_then(|e| e.output.clone()),
        };

        let deps = deploy::resolve_dependencies(self.store.as_ref(), &envelope).await?;
        let rendered = self.registry.render(&envelope, &deps)?;
        let write_condition = save_condition(current_etag);

        if rendered.resources.len() <= self.config.inline_deploy_limit {
            // Small graph: deploy inside the request.
            let output = match self
                .deployer
                .deploy(&envelope, &rendered, &NeverCancelled)
                .await?
            {
                DeployResult::Completed(output) => output,
                DeployResult::Cancelled => unreachable!("inline deploys cannot be cancelled"),
            };
            envelope.output = Some(output);
            envelope.provisioning_state = ProvisioningState::Succeeded;

            let value = serde_json::to_value(&envelope).map_err(anyhow::Error::from)?;
            let etag = self.store.save(&key, &value, write_condition).await?;
            info!(resource_id = %ctx.resource_id, "resource deployed inline");

            let body = api::from_internal(&envelope, ctx.api_version)?;
            return Ok(UpsertOutcome::Completed { body, etag });
        }

        // Long-running: record intent, then hand the work to the async
        // subsystem. The idle check narrows the race window; the status
        // manager's claim write closes it.
        self.status.assert_idle(&ctx.resource_id).await?;

        let value = serde_json::to_value(&envelope).map_err(anyhow::Error::from)?;
        self.store.save(&key, &value, write_condition).await?;

        let operation = match self
            .status
            .queue_operation(
                &ctx.resource_id,
                OperationKind::Put,
                &ctx.api_version.to_string(),
            )
            .await
        {
            Ok(operation) => operation,
            Err(e) => {
                self.mark_failed(&key).await;
                return Err(e);
            }
        };
        info!(
            resource_id = %ctx.resource_id,
            operation_id = %operation.id,
            "resource mutation accepted"
        );
        Ok(UpsertOutcome::Accepted { operation })
    }

    /// Delete one logical resource. Absent resources delete successfully.
    pub async fn delete(&self, ctx: &RequestContext) -> Result<DeleteOutcome> {
        let key = ctx.resource_id.index_key();
        let (Some(envelope), Some(etag)) = self.read_current(&key).await? else {
            debug!(resource_id = %ctx.resource_id, "delete of absent resource");
            return Ok(DeleteOutcome::AlreadyGone);
        };
        evaluate_precondition(&ctx.precondition, Some(&etag))?;

        let deployed = envelope
            .output
            .as_ref()
            .map(|o| o.resources.len())
            .unwrap_or(0);
        if deployed > self.config.inline_deploy_limit {
            self.status.assert_idle(&ctx.resource_id).await?;

            let mut envelope = envelope;
            envelope.provisioning_state = ProvisioningState::Deleting;
            let value = serde_json::to_value(&envelope).map_err(anyhow::Error::from)?;
            self.store
                .save(&key, &value, WriteCondition::IfMatch(etag))
                .await?;

            let operation = match self
                .status
                .queue_operation(
                    &ctx.resource_id,
                    OperationKind::Delete,
                    &ctx.api_version.to_string(),
                )
                .await
            {
                Ok(operation) => operation,
                Err(e) => {
                    self.mark_failed(&key).await;
                    return Err(e);
                }
            };
            info!(
                resource_id = %ctx.resource_id,
                operation_id = %operation.id,
                "resource deletion accepted"
            );
            return Ok(DeleteOutcome::Accepted { operation });
        }

        match self.deployer.delete(&envelope, &NeverCancelled).await? {
            DeployResult::Completed(_) => {}
            DeployResult::Cancelled => unreachable!("inline teardowns cannot be cancelled"),
        }
        match self
            .store
            .delete(&key, WriteCondition::IfMatch(etag))
            .await
        {
            Ok(()) => {}
            // Gone already: a concurrent delete finished first.
            Err(Error::NotFound(_)) => return Ok(DeleteOutcome::AlreadyGone),
            Err(e) => return Err(e),
        }
        info!(resource_id = %ctx.resource_id, "resource deleted");
        Ok(DeleteOutcome::Deleted)
    }

    /// Read one resource in the requested wire format.
    pub async fn get(&self, ctx: &RequestContext) -> Result<(serde_json::Value, ETag)> {
        let key = ctx.resource_id.index_key();
        let obj = self.store.get(&key).await.map_err(|e| match e {
            Error::NotFound(_) => Error::NotFound(ctx.resource_id.to_string()),
            other => other,
        })?;
        let envelope: ResourceEnvelope = obj.decode()?;
        let body = api::from_internal(&envelope, ctx.api_version)?;
        Ok((body, obj.etag))
    }

    /// Operation polling surface: read-only, idempotent, safe at any
    /// frequency.
    pub async fn operation_status(&self, operation_id: Uuid) -> Result<AsyncOperation> {
        self.status.get(operation_id).await
    }

    /// Request cancellation of a Running operation. The owning worker
    /// observes the intent at its next checkpoint.
    pub async fn cancel_operation(&self, operation_id: Uuid) -> Result<AsyncOperation> {
        self.status.request_cancel(operation_id).await
    }

    async fn read_current(&self, key: &str) -> Result<(Option<ResourceEnvelope>, Option<ETag>)> {
        match self.store.get(key).await {
            Ok(obj) => {
                let envelope: ResourceEnvelope = obj.decode()?;
                Ok((Some(envelope), Some(obj.etag)))
            }
            Err(Error::NotFound(_)) => Ok((None, None)),
            Err(e) => Err(e),
        }
    }

    /// Corrective write after the async hand-off failed post-save.
    async fn mark_failed(&self, key: &str) {
        let Ok(obj) = self.store.get(key).await else {
            return;
        };
        let Ok(mut envelope) = obj.decode::<ResourceEnvelope>() else {
            return;
        };
        envelope.provisioning_state = ProvisioningState::Failed;
        let Ok(value) = serde_json::to_value(&envelope) else {
            return;
        };
        if let Err(e) = self
            .store
            .save(key, &value, WriteCondition::Unconditional)
            .await
        {
            warn!(key, error = %e, "corrective failed-state write did not apply");
        }
    }
}

/// Step 3: the request's concurrency precondition against the currently
/// stored token. A mismatch stops the pipeline before anything mutates.
fn evaluate_precondition(precondition: &Precondition, current: Option<&ETag>) -> Result<()> {
    match (precondition, current) {
        (Precondition::None, _) => Ok(()),
        (Precondition::IfMatchAny, Some(_)) => Ok(()),
        (Precondition::IfMatchAny, None) => Err(Error::PreconditionFailed(
            "resource does not exist".to_string(),
        )),
        (Precondition::IfMatch(expected), Some(stored)) if expected == stored => Ok(()),
        (Precondition::IfMatch(_), Some(_)) => Err(Error::PreconditionFailed(
            "resource was modified by another writer".to_string(),
        )),
        (Precondition::IfMatch(_), None) => Err(Error::PreconditionFailed(
            "resource does not exist".to_string(),
        )),
        (Precondition::IfNoneMatchAny, None) => Ok(()),
        (Precondition::IfNoneMatchAny, Some(_)) => Err(Error::PreconditionFailed(
            "resource already exists".to_string(),
        )),
    }
}

/// Step 7's expected token is exactly what step 2 observed.
fn save_condition(current_etag: Option<ETag>) -> WriteCondition {
    match current_etag {
        Some(etag) => WriteCondition::IfMatch(etag),
        None => WriteCondition::IfNoneMatchAny,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precondition_semantics() {
        let etag = ETag::from("rev-1");
        let other = ETag::from("rev-2");

        assert!(evaluate_precondition(&Precondition::None, None).is_ok());
        assert!(evaluate_precondition(&Precondition::None, Some(&etag)).is_ok());

        assert!(evaluate_precondition(&Precondition::IfNoneMatchAny, None).is_ok());
        assert!(evaluate_precondition(&Precondition::IfNoneMatchAny, Some(&etag)).is_err());

        assert!(evaluate_precondition(&Precondition::IfMatchAny, Some(&etag)).is_ok());
        assert!(evaluate_precondition(&Precondition::IfMatchAny, None).is_err());

        assert!(evaluate_precondition(&Precondition::IfMatch(etag.clone()), Some(&etag)).is_ok());
        assert!(evaluate_precondition(&Precondition::IfMatch(etag.clone()), Some(&other)).is_err());
        assert!(evaluate_precondition(&Precondition::IfMatch(etag), None).is_err());
    }
}
