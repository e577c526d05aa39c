use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};
use uuid::Uuid;

use super::{index_key, operation_key, AsyncOperation, OperationClaim, OperationKind, OperationStatus};
use crate::error::{Error, ErrorDetail, Result};
use crate::model::{ProvisioningState, ResourceEnvelope, ResourceId};
use crate::queue::QueueClient;
use crate::store::{self, StorageClient, WriteCondition};

/// Owns the async-operation lifecycle: creates operation records under
/// single-flight per resource, transitions them, and keeps the owning
/// envelope's provisioning state in agreement on every terminal
/// transition.
pub struct StatusManager {
    store: Arc<dyn StorageClient>,
    queue: Arc<dyn QueueClient>,
    cas_retry_limit: u32,
}

impl StatusManager {
    pub fn new(
        store: Arc<dyn StorageClient>,
        queue: Arc<dyn QueueClient>,
        cas_retry_limit: u32,
    ) -> Self {
        Self {
            store,
            queue,
            cas_retry_limit,
        }
    }

    /// Fails unless no operation for the resource is currently Running.
    /// The pipeline calls this before persisting an envelope destined for
    /// the async path; `queue_operation` re-checks atomically.
    pub async fn assert_idle(&self, resource_id: &ResourceId) -> Result<()> {
        let idx = index_key(&resource_id.index_key());
        let claim = match self.store.get(&idx).await {
            Ok(obj) => obj.decode::<OperationClaim>()?,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        match self.get(claim.operation_id).await {
            Ok(op) if !op.status.is_terminal() => {
                Err(Error::OperationAlreadyRunning(resource_id.to_string()))
            }
            Ok(_) | Err(Error::NotFound(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// Create a Running operation for the resource and enqueue its work
    /// message. Single-flight: the per-resource index entry is claimed
    /// with a create-only write, so of two racing creators exactly one
    /// wins and the other observes `OperationAlreadyRunning`.
    pub async fn queue_operation(
        &self,
        resource_id: &ResourceId,
        kind: OperationKind,
        api_version: &str,
    ) -> Result<AsyncOperation> {
        let idx = index_key(&resource_id.index_key());
        self.reap_stale_claim(resource_id, &idx).await?;

        let operation = AsyncOperation {
            id: Uuid::new_v4(),
            resource_id: resource_id.as_str().to_string(),
            kind,
            status: OperationStatus::Running,
            start_time: Utc::now(),
            end_time: None,
            error: None,
            retry_count: 0,
            cancel_requested: false,
            api_version: api_version.to_string(),
        };
        let op_key = operation_key(operation.id);
        self.store
            .save(
                &op_key,
                &serde_json::to_value(&operation).map_err(anyhow::Error::from)?,
                WriteCondition::IfNoneMatchAny,
            )
            .await?;

        let claim = serde_json::to_value(OperationClaim {
            operation_id: operation.id,
        })
        .map_err(anyhow::Error::from)?;
        match self
            .store
            .save(&idx, &claim, WriteCondition::IfNoneMatchAny)
            .await
        {
            Ok(_) => {}
            Err(Error::PreconditionFailed(_)) => {
                // Lost the claim race; discard the orphan record.
                let _ = self.store.delete(&op_key, WriteCondition::Unconditional).await;
                return Err(Error::OperationAlreadyRunning(resource_id.to_string()));
            }
            Err(e) => return Err(e),
        }

        let message = super::OperationMessage {
            operation_id: operation.id,
            resource_id: operation.resource_id.clone(),
            kind,
            api_version: operation.api_version.clone(),
        };
        if let Err(e) = self
            .queue
            .enqueue(serde_json::to_value(&message).map_err(anyhow::Error::from)?)
            .await
        {
            warn!(operation_id = %operation.id, error = %e, "enqueue failed, aborting operation");
            let mut failed = operation.clone();
            failed.status = OperationStatus::Failed;
            failed.end_time = Some(Utc::now());
            failed.error = Some(ErrorDetail::new("Internal", "failed to enqueue work message"));
            let _ = self
                .store
                .save(
                    &op_key,
                    &serde_json::to_value(&failed).map_err(anyhow::Error::from)?,
                    WriteCondition::Unconditional,
                )
                .await;
            let _ = self.store.delete(&idx, WriteCondition::Unconditional).await;
            return Err(e);
        }

        debug!(
            operation_id = %operation.id,
            resource_id = %resource_id,
            kind = %kind,
            "operation queued"
        );
        Ok(operation)
    }

    pub async fn get(&self, id: Uuid) -> Result<AsyncOperation> {
        match self.store.get(&operation_key(id)).await {
            Ok(obj) => obj.decode(),
            Err(Error::NotFound(_)) => Err(Error::NotFound(format!("operation {id}"))),
            Err(e) => Err(e),
        }
    }

    /// Transition an operation. Terminal operations reject further
    /// updates; a terminal transition stamps the end time, releases the
    /// single-flight claim, and reconciles the envelope's provisioning
    /// state.
    pub async fn update(
        &self,
        id: Uuid,
        status: OperationStatus,
        error: Option<ErrorDetail>,
    ) -> Result<AsyncOperation> {
        let key = operation_key(id);
        let mut attempt = 0;
        let updated = loop {
            let (mut op, etag) = store::get_as::<AsyncOperation>(self.store.as_ref(), &key)
                .await
                .map_err(|e| match e {
                    Error::NotFound(_) => Error::NotFound(format!("operation {id}")),
                    other => other,
                })?;
            if op.status.is_terminal() {
                return Err(Error::OperationCompleted(id.to_string()));
            }
            op.status = status;
            op.error = error.clone();
            if status.is_terminal() {
                op.end_time = Some(Utc::now());
            }

            match self
                .store
                .save(
                    &key,
                    &serde_json::to_value(&op).map_err(anyhow::Error::from)?,
                    WriteCondition::IfMatch(etag),
                )
                .await
            {
                Ok(_) => break op,
                Err(Error::PreconditionFailed(_)) if attempt < self.cas_retry_limit => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        };

        if status.is_terminal() {
            self.release_claim(&updated).await;
            self.sync_provisioning_state(&updated).await?;
        }
        Ok(updated)
    }

    /// Record the redelivery count on a Running operation. Best effort:
    /// contention here never blocks the work itself.
    pub async fn record_attempt(&self, id: Uuid, retry_count: u32) {
        let key = operation_key(id);
        for _ in 0..=self.cas_retry_limit {
            let Ok((mut op, etag)) = store::get_as::<AsyncOperation>(self.store.as_ref(), &key).await
            else {
                return;
            };
            if op.status.is_terminal() || op.retry_count == retry_count {
                return;
            }
            op.retry_count = retry_count;
            let Ok(value) = serde_json::to_value(&op) else {
                return;
            };
            match self.store.save(&key, &value, WriteCondition::IfMatch(etag)).await {
                Ok(_) => return,
                Err(Error::PreconditionFailed(_)) => continue,
                Err(_) => return,
            }
        }
    }

    /// Mark cancellation intent. The owning worker observes the flag at
    /// its next checkpoint; this call never force-kills work.
    pub async fn request_cancel(&self, id: Uuid) -> Result<AsyncOperation> {
        let key = operation_key(id);
        let mut attempt = 0;
        loop {
            let (mut op, etag) = store::get_as::<AsyncOperation>(self.store.as_ref(), &key)
                .await
                .map_err(|e| match e {
                    Error::NotFound(_) => Error::NotFound(format!("operation {id}")),
                    other => other,
                })?;
            if op.status.is_terminal() {
                return Err(Error::OperationCompleted(id.to_string()));
            }
            if op.cancel_requested {
                return Ok(op);
            }
            op.cancel_requested = true;
            match self
                .store
                .save(
                    &key,
                    &serde_json::to_value(&op).map_err(anyhow::Error::from)?,
                    WriteCondition::IfMatch(etag),
                )
                .await
            {
                Ok(_) => return Ok(op),
                Err(Error::PreconditionFailed(_)) if attempt < self.cas_retry_limit => {
                    attempt += 1;
                    continue;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Drop a leftover claim whose operation already finished (or is
    /// gone). A claim owned by a live operation is a single-flight
    /// violation.
    async fn reap_stale_claim(&self, resource_id: &ResourceId, idx: &str) -> Result<()> {
        let obj = match self.store.get(idx).await {
            Ok(obj) => obj,
            Err(Error::NotFound(_)) => return Ok(()),
            Err(e) => return Err(e),
        };
        let claim: OperationClaim = obj.decode()?;
        match self.get(claim.operation_id).await {
            Ok(op) if !op.status.is_terminal() => {
                return Err(Error::OperationAlreadyRunning(resource_id.to_string()))
            }
            Ok(_) | Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }
        match self.store.delete(idx, WriteCondition::IfMatch(obj.etag)).await {
            Ok(()) | Err(Error::NotFound(_)) => Ok(()),
            // Someone re-claimed between our read and delete.
            Err(Error::PreconditionFailed(_)) => {
                Err(Error::OperationAlreadyRunning(resource_id.to_string()))
            }
            Err(e) => Err(e),
        }
    }

    async fn release_claim(&self, operation: &AsyncOperation) {
        let Ok(resource_id) = ResourceId::parse(&operation.resource_id) else {
            return;
        };
        let idx = index_key(&resource_id.index_key());
        let obj = match self.store.get(&idx).await {
            Ok(obj) => obj,
            Err(_) => return,
        };
        let owned = obj
            .decode::<OperationClaim>()
            .map(|c| c.operation_id == operation.id)
            .unwrap_or(false);
        if owned {
            let _ = self.store.delete(&idx, WriteCondition::IfMatch(obj.etag)).await;
        }
    }

    /// Reflect a terminal operation status into the envelope's
    /// provisioning state, retrying on token conflicts by re-reading and
    /// re-applying — a concurrent writer may have bumped the token
    /// without changing provisioning semantics.
    async fn sync_provisioning_state(&self, operation: &AsyncOperation) -> Result<()> {
        let state = match operation.status {
            OperationStatus::Succeeded => ProvisioningState::Succeeded,
            OperationStatus::Failed => ProvisioningState::Failed,
            OperationStatus::Canceled => ProvisioningState::Canceled,
            OperationStatus::Running => return Ok(()),
        };
        let resource_id = ResourceId::parse(&operation.resource_id)?;
        let key = resource_id.index_key();

        let mut attempt = 0;
        loop {
            let (mut envelope, etag) =
                match store::get_as::<ResourceEnvelope>(self.store.as_ref(), &key).await {
                    Ok(pair) => pair,
                    // Deleted out from under the operation (e.g. a
                    // successful async delete); nothing to reconcile.
                    Err(Error::NotFound(_)) => return Ok(()),
                    Err(e) => return Err(e),
                };
            if envelope.provisioning_state == state {
                return Ok(());
            }
            envelope.provisioning_state = state;
            match self
                .store
                .save(
                    &key,
                    &serde_json::to_value(&envelope).map_err(anyhow::Error::from)?,
                    WriteCondition::IfMatch(etag),
                )
                .await
            {
                Ok(_) => return Ok(()),
                Err(Error::PreconditionFailed(_)) if attempt < self.cas_retry_limit => {
                    attempt += 1;
                    continue;
                }
                Err(Error::PreconditionFailed(_)) => {
                    warn!(
                        resource_id = %operation.resource_id,
                        "provisioning state reconciliation exhausted retries"
                    );
                    return Err(Error::Internal(anyhow::anyhow!(
                        "could not reconcile provisioning state for {}",
                        operation.resource_id
                    )));
                }
                Err(e) => return Err(e),
            }
        }
    }
}
