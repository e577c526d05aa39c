use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{OperationKind, OperationMessage, OperationStatus, StatusManager};
use crate::config::WorkerConfig;
use crate::deploy::{self, Checkpoint, DeployResult, DeploymentProcessor};
use crate::error::{Error, ErrorDetail, Result};
use crate::model::{ResourceEnvelope, ResourceId};
use crate::queue::{LeasedMessage, QueueClient};
use crate::render::RendererRegistry;
use crate::store::{self, StorageClient, WriteCondition};

enum Outcome {
    Done,
    Cancelled,
}

/// Dequeue loop of the async subsystem. Each worker owns one leased
/// message at a time per task; deploy-resumption is idempotent, so
/// at-least-once delivery is safe. Every deploy error is converted to a
/// terminal status update before the message is acknowledged — nothing
/// crosses the queue boundary as an unhandled task failure.
pub struct Worker {
    store: Arc<dyn StorageClient>,
    queue: Arc<dyn QueueClient>,
    status: Arc<StatusManager>,
    registry: Arc<RendererRegistry>,
    deployer: Arc<DeploymentProcessor>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(
        store: Arc<dyn StorageClient>,
        queue: Arc<dyn QueueClient>,
        status: Arc<StatusManager>,
        registry: Arc<RendererRegistry>,
        deployer: Arc<DeploymentProcessor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            store,
            queue,
            status,
            registry,
            deployer,
            config,
        }
    }

    /// Run until the task is dropped, processing up to
    /// `config.parallelism` messages concurrently.
    pub async fn run(self: Arc<Self>) {
        info!(parallelism = self.config.parallelism, "worker started");
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism));
        loop {
            let message = match self.queue.dequeue().await {
                Ok(Some(message)) => message,
                Ok(None) => {
                    tokio::time::sleep(self.config.poll_interval()).await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "dequeue failed");
                    tokio::time::sleep(self.config.poll_interval()).await;
                    continue;
                }
            };

            let permit = match Arc::clone(&semaphore).acquire_owned().await {
                Ok(permit) => permit,
                Err(_) => return,
            };
            let worker = Arc::clone(&self);
            tokio::spawn(async move {
                worker.process_message(message).await;
                drop(permit);
            });
        }
    }

    /// Process messages one at a time until the queue is visibly empty.
    /// Used by tests and the single-process host to settle queued work.
    pub async fn drain(&self) {
        while let Ok(Some(message)) = self.queue.dequeue().await {
            self.process_message(message).await;
        }
    }

    async fn process_message(&self, message: LeasedMessage) {
        let parsed: OperationMessage = match serde_json::from_value(message.body.clone()) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "dropping undecodable message");
                let _ = self.queue.finish(&message).await;
                return;
            }
        };

        if let Err(e) = self.handle(&message, &parsed).await {
            warn!(
                operation_id = %parsed.operation_id,
                resource_id = %parsed.resource_id,
                error = %e,
                "operation failed"
            );
            match self
                .status
                .update(parsed.operation_id, OperationStatus::Failed, Some(ErrorDetail::from(&e)))
                .await
            {
                Ok(_) | Err(Error::OperationCompleted(_)) => {}
                Err(update_err) => warn!(
                    operation_id = %parsed.operation_id,
                    error = %update_err,
                    "failed to record terminal failure"
                ),
            }
        }

        // The terminal state is durable by now; acknowledging after it is
        // what makes redelivery a no-op.
        if let Err(e) = self.queue.finish(&message).await {
            warn!(message_id = %message.id, error = %e, "acknowledge failed; message will be redelivered");
        }
    }

    async fn handle(&self, message: &LeasedMessage, m: &OperationMessage) -> Result<()> {
        let operation = match self.status.get(m.operation_id).await {
            Ok(operation) => operation,
            Err(Error::NotFound(_)) => {
                debug!(operation_id = %m.operation_id, "message for unknown operation; dropping");
                return Ok(());
            }
            Err(e) => return Err(e),
        };

        if operation.status.is_terminal() {
            debug!(operation_id = %operation.id, status = %operation.status, "redelivery after terminal state; dropping");
            return Ok(());
        }

        if message.dequeue_count > self.config.max_dequeue_count {
            info!(
                operation_id = %operation.id,
                dequeue_count = message.dequeue_count,
                "dead-letter ceiling reached"
            );
            self.status
                .update(
                    operation.id,
                    OperationStatus::Failed,
                    Some(ErrorDetail::new(
                        "RetryLimitExceeded",
                        format!("work message delivered {} times", message.dequeue_count),
                    )),
                )
                .await?;
            return Ok(());
        }

        self.status
            .record_attempt(operation.id, message.dequeue_count.saturating_sub(1))
            .await;

        // Redelivery handler must re-check cancellation intent before
        // resuming work.
        if operation.cancel_requested {
            self.status
                .update(operation.id, OperationStatus::Canceled, None)
                .await?;
            return Ok(());
        }

        let outcome = self.execute_with_lease(message, m).await?;
        match outcome {
            Outcome::Done => {
                self.status
                    .update(operation.id, OperationStatus::Succeeded, None)
                    .await?;
            }
            Outcome::Cancelled => {
                self.status
                    .update(operation.id, OperationStatus::Canceled, None)
                    .await?;
            }
        }
        Ok(())
    }

    /// Drive the deploy while keeping the message lease alive.
    async fn execute_with_lease(
        &self,
        message: &LeasedMessage,
        m: &OperationMessage,
    ) -> Result<Outcome> {
        let work = self.execute(m);
        tokio::pin!(work);

        let mut ticker = tokio::time::interval(self.config.lease_extend_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker.tick().await; // first tick fires immediately

        loop {
            tokio::select! {
                result = &mut work => return result,
                _ = ticker.tick() => {
                    if let Err(e) = self.queue.extend(message).await {
                        // Lease gone: another consumer may pick the
                        // message up, but terminal recording is
                        // idempotent, so keep going.
                        warn!(message_id = %message.id, error = %e, "lease extension failed");
                    }
                }
            }
        }
    }

    async fn execute(&self, m: &OperationMessage) -> Result<Outcome> {
        let resource_id = ResourceId::parse(&m.resource_id)?;
        let key = resource_id.index_key();
        let probe = CancelProbe {
            status: self.status.as_ref(),
            id: m.operation_id,
        };

        match m.kind {
            OperationKind::Put => {
                let (envelope, mut etag) =
                    store::get_as::<ResourceEnvelope>(self.store.as_ref(), &key).await?;

                let deps = deploy::resolve_dependencies(self.store.as_ref(), &envelope).await?;
                let rendered = self.registry.render(&envelope, &deps)?;
                let output = match self.deployer.deploy(&envelope, &rendered, &probe).await? {
                    DeployResult::Completed(output) => output,
                    DeployResult::Cancelled => return Ok(Outcome::Cancelled),
                };

                // Persist the deploy output under the token we read. A
                // conflicting write only means someone bumped the token;
                // re-read and re-apply, bounded.
                let mut envelope = envelope;
                let mut attempt = 0;
                loop {
                    envelope.output = Some(output.clone());
                    let value = serde_json::to_value(&envelope).map_err(anyhow::Error::from)?;
                    match self
                        .store
                        .save(&key, &value, WriteCondition::IfMatch(etag.clone()))
                        .await
                    {
                        Ok(_) => break,
                        Err(Error::PreconditionFailed(_)) if attempt < self.config.cas_retry_limit => {
                            attempt += 1;
                            let (reread, fresh) =
                                store::get_as::<ResourceEnvelope>(self.store.as_ref(), &key).await?;
                            envelope = reread;
                            etag = fresh;
                        }
                        Err(e) => return Err(e),
                    }
                }
                Ok(Outcome::Done)
            }
            OperationKind::Delete => {
                let envelope = match store::get_as::<ResourceEnvelope>(self.store.as_ref(), &key).await
                {
                    Ok((envelope, _)) => envelope,
                    // Already gone; deletion is idempotent.
                    Err(Error::NotFound(_)) => return Ok(Outcome::Done),
                    Err(e) => return Err(e),
                };
                match self.deployer.delete(&envelope, &probe).await? {
                    DeployResult::Completed(_) => {}
                    DeployResult::Cancelled => return Ok(Outcome::Cancelled),
                }
                match self.store.delete(&key, WriteCondition::Unconditional).await {
                    Ok(()) | Err(Error::NotFound(_)) => Ok(Outcome::Done),
                    Err(e) => Err(e),
                }
            }
        }
    }
}

/// Checkpoint backed by the operation record's cancellation flag.
struct CancelProbe<'a> {
    status: &'a StatusManager,
    id: Uuid,
}

#[async_trait]
impl Checkpoint for CancelProbe<'_> {
    async fn cancelled(&self) -> bool {
        match self.status.get(self.id).await {
            Ok(op) => op.cancel_requested || op.status.is_terminal(),
            Err(_) => false,
        }
    }
}
