use std::sync::Arc;
use std::time::Duration;

use rudder::config::WorkerConfig;
use rudder::deploy::{ClientRegistry, CloudClient, DeploymentProcessor, FailingCloudClient, FakeCloudClient};
use rudder::error::{Error, ErrorDetail};
use rudder::model::{
    CallerIdentity, ProvisioningState, ResourceEnvelope, ResourceId, ResourceKindProperties,
    SystemData,
};
use rudder::model::kinds::CacheProperties;
use rudder::operations::{OperationKind, OperationStatus, StatusManager, Worker};
use rudder::queue::memory::InMemoryQueue;
use rudder::queue::QueueClient;
use rudder::render::{OutputResourceType, RendererRegistry};
use rudder::store::memory::InMemoryStorage;
use rudder::store::{StorageClient, WriteCondition};

const CACHE_ID: &str =
    "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/caches/cache0";

struct Harness {
    store: Arc<dyn StorageClient>,
    queue: Arc<InMemoryQueue>,
    status: Arc<StatusManager>,
    worker: Arc<Worker>,
    redis: Arc<FakeCloudClient>,
}

fn worker_config() -> WorkerConfig {
    WorkerConfig {
        parallelism: 1,
        poll_interval_ms: 10,
        lease_secs: 60,
        lease_extend_secs: 20,
        max_dequeue_count: 5,
        cas_retry_limit: 5,
    }
}

fn harness_with(config: WorkerConfig, cache_client: Option<Arc<dyn CloudClient>>) -> Harness {
    let store: Arc<dyn StorageClient> = Arc::new(InMemoryStorage::new());
    let queue = Arc::new(InMemoryQueue::new(Duration::from_secs(60)));
    let status = Arc::new(StatusManager::new(
        Arc::clone(&store),
        queue.clone(),
        config.cas_retry_limit,
    ));

    let redis = Arc::new(FakeCloudClient::new("azure").with_live_defaults(serde_json::json!({
        "primaryConnectionString": "redis://cache0.internal:6379",
    })));
    let mut clients = ClientRegistry::new();
    clients.register(
        OutputResourceType::new("azure", "azure.cache/redis"),
        cache_client.unwrap_or_else(|| redis.clone() as Arc<dyn CloudClient>),
    );

    let worker = Arc::new(Worker::new(
        Arc::clone(&store),
        queue.clone(),
        status.clone(),
        Arc::new(RendererRegistry::builtin()),
        Arc::new(DeploymentProcessor::new(clients)),
        config,
    ));

    Harness {
        store,
        queue,
        status,
        worker,
        redis,
    }
}

fn harness() -> Harness {
    harness_with(worker_config(), None)
}

fn cache_id() -> ResourceId {
    ResourceId::parse(CACHE_ID).unwrap()
}

fn cache_envelope() -> ResourceEnvelope {
    let id = cache_id();
    ResourceEnvelope {
        name: id.name().to_string(),
        resource_type: "Rudder.Resources/caches".to_string(),
        location: "global".to_string(),
        tags: Default::default(),
        system_data: SystemData::merge(None, &CallerIdentity::new("tests")),
        provisioning_state: ProvisioningState::Creating,
        created_api_version: "2024-06-01".to_string(),
        properties: ResourceKindProperties::Cache(CacheProperties {
            environment: "/planes/rudder/resourceGroups/rg0/providers/Rudder.Resources/environments/env0".to_string(),
            managed: true,
            ..Default::default()
        }),
        output: None,
        id,
    }
}

async fn seed_envelope(store: &dyn StorageClient, envelope: &ResourceEnvelope) {
    store
        .save(
            &envelope.id.index_key(),
            &serde_json::to_value(envelope).unwrap(),
            WriteCondition::IfNoneMatchAny,
        )
        .await
        .unwrap();
}

async fn provisioning_state(store: &dyn StorageClient, id: &ResourceId) -> ProvisioningState {
    let obj = store.get(&id.index_key()).await.unwrap();
    let envelope: ResourceEnvelope = obj.decode().unwrap();
    envelope.provisioning_state
}

// ─── Status manager ─────────────────────────────────────────────────────────

#[tokio::test]
async fn queue_operation_enforces_single_flight() {
    let h = harness();
    let id = cache_id();

    let first = h
        .status
        .queue_operation(&id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
    assert_eq!(first.status, OperationStatus::Running);
    assert_eq!(h.queue.len(), 1);

    let err = h
        .status
        .queue_operation(&id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap_err();
    assert!(matches!(err, Error::OperationAlreadyRunning(_)));

    // A terminal operation releases the slot.
    h.status
        .update(first.id, OperationStatus::Canceled, None)
        .await
        .unwrap();
    h.status
        .queue_operation(&id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
}

#[tokio::test]
async fn terminal_transition_is_absorbing() {
    let h = harness();
    let op = h
        .status
        .queue_operation(&cache_id(), OperationKind::Put, "2024-06-01")
        .await
        .unwrap();

    let done = h
        .status
        .update(op.id, OperationStatus::Succeeded, None)
        .await
        .unwrap();
    assert!(done.end_time.is_some());

    for next in [
        OperationStatus::Failed,
        OperationStatus::Succeeded,
        OperationStatus::Canceled,
    ] {
        let err = h.status.update(op.id, next, None).await.unwrap_err();
        assert!(matches!(err, Error::OperationCompleted(_)), "{next}");
    }
}

#[tokio::test]
async fn terminal_transition_reconciles_provisioning_state() {
    let h = harness();
    let envelope = cache_envelope();
    seed_envelope(h.store.as_ref(), &envelope).await;

    let op = h
        .status
        .queue_operation(&envelope.id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
    h.status
        .update(
            op.id,
            OperationStatus::Failed,
            Some(ErrorDetail::new("DeployFailed", "boom")),
        )
        .await
        .unwrap();

    assert_eq!(
        provisioning_state(h.store.as_ref(), &envelope.id).await,
        ProvisioningState::Failed
    );
    let stored = h.status.get(op.id).await.unwrap();
    assert_eq!(stored.error.unwrap().code, "DeployFailed");
}

#[tokio::test]
async fn cancel_marks_intent_only_while_running() {
    let h = harness();
    let op = h
        .status
        .queue_operation(&cache_id(), OperationKind::Put, "2024-06-01")
        .await
        .unwrap();

    let cancelled = h.status.request_cancel(op.id).await.unwrap();
    assert!(cancelled.cancel_requested);
    // Still running: cancel is intent, not a kill.
    assert_eq!(cancelled.status, OperationStatus::Running);

    h.status
        .update(op.id, OperationStatus::Canceled, None)
        .await
        .unwrap();
    let err = h.status.request_cancel(op.id).await.unwrap_err();
    assert!(matches!(err, Error::OperationCompleted(_)));
}

#[tokio::test]
async fn unknown_operation_is_not_found() {
    let h = harness();
    let err = h.status.get(uuid::Uuid::new_v4()).await.unwrap_err();
    assert!(err.is_not_found());
}

// ─── Worker ─────────────────────────────────────────────────────────────────

#[tokio::test]
async fn worker_deploys_put_to_succeeded() {
    let h = harness();
    let envelope = cache_envelope();
    seed_envelope(h.store.as_ref(), &envelope).await;

    let op = h
        .status
        .queue_operation(&envelope.id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
    h.worker.drain().await;

    let finished = h.status.get(op.id).await.unwrap();
    assert_eq!(finished.status, OperationStatus::Succeeded);
    assert!(finished.end_time.is_some());
    assert_eq!(h.redis.put_count(), 1);
    assert!(h.queue.is_empty());

    let obj = h.store.get(&envelope.id.index_key()).await.unwrap();
    let stored: ResourceEnvelope = obj.decode().unwrap();
    assert_eq!(stored.provisioning_state, ProvisioningState::Succeeded);
    let output = stored.output.unwrap();
    assert_eq!(output.resources.len(), 1);
    assert!(output.resources[0].identity.is_some());
    assert!(output.computed_values.contains_key("host"));
    // Secrets persist as references only.
    assert!(output.secrets.contains_key("connectionString"));
}

#[tokio::test]
async fn redelivery_after_terminal_state_is_a_noop() {
    let h = harness();
    let envelope = cache_envelope();
    seed_envelope(h.store.as_ref(), &envelope).await;

    let op = h
        .status
        .queue_operation(&envelope.id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
    h.worker.drain().await;
    assert_eq!(h.redis.put_count(), 1);

    // Simulate at-least-once delivery: the same message shows up again.
    let duplicate = serde_json::json!({
        "operationId": op.id,
        "resourceId": CACHE_ID,
        "kind": "put",
        "apiVersion": "2024-06-01",
    });
    h.queue.enqueue(duplicate).await.unwrap();
    h.worker.drain().await;

    // Immediately acknowledged, no duplicate deploy side effects.
    assert!(h.queue.is_empty());
    assert_eq!(h.redis.put_count(), 1);
    assert_eq!(
        h.status.get(op.id).await.unwrap().status,
        OperationStatus::Succeeded
    );
}

#[tokio::test]
async fn deploy_failure_becomes_terminal_failed() {
    let failing: Arc<dyn CloudClient> = Arc::new(FailingCloudClient {
        message: "provider unavailable".to_string(),
    });
    let h = harness_with(worker_config(), Some(failing));
    let envelope = cache_envelope();
    seed_envelope(h.store.as_ref(), &envelope).await;

    let op = h
        .status
        .queue_operation(&envelope.id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
    h.worker.drain().await;

    let finished = h.status.get(op.id).await.unwrap();
    assert_eq!(finished.status, OperationStatus::Failed);
    let error = finished.error.unwrap();
    assert_eq!(error.code, "DeployFailed");
    assert!(error.message.contains("provider unavailable"));

    assert_eq!(
        provisioning_state(h.store.as_ref(), &envelope.id).await,
        ProvisioningState::Failed
    );
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn dead_letter_ceiling_routes_to_failed() {
    let mut config = worker_config();
    config.max_dequeue_count = 0;
    let h = harness_with(config, None);
    let envelope = cache_envelope();
    seed_envelope(h.store.as_ref(), &envelope).await;

    let op = h
        .status
        .queue_operation(&envelope.id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
    h.worker.drain().await;

    let finished = h.status.get(op.id).await.unwrap();
    assert_eq!(finished.status, OperationStatus::Failed);
    assert_eq!(finished.error.unwrap().code, "RetryLimitExceeded");
    // The deploy never ran.
    assert_eq!(h.redis.put_count(), 0);
    assert!(h.queue.is_empty());
}

#[tokio::test]
async fn cancellation_intent_is_observed_before_deploy() {
    let h = harness();
    let envelope = cache_envelope();
    seed_envelope(h.store.as_ref(), &envelope).await;

    let op = h
        .status
        .queue_operation(&envelope.id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
    h.status.request_cancel(op.id).await.unwrap();
    h.worker.drain().await;

    let finished = h.status.get(op.id).await.unwrap();
    assert_eq!(finished.status, OperationStatus::Canceled);
    assert_eq!(h.redis.put_count(), 0);
    assert_eq!(
        provisioning_state(h.store.as_ref(), &envelope.id).await,
        ProvisioningState::Canceled
    );
}

#[tokio::test]
async fn worker_delete_removes_envelope_and_teardown_is_idempotent() {
    let h = harness();
    let envelope = cache_envelope();
    seed_envelope(h.store.as_ref(), &envelope).await;

    // Provision first so there is something to tear down.
    let put = h
        .status
        .queue_operation(&envelope.id, OperationKind::Put, "2024-06-01")
        .await
        .unwrap();
    h.worker.drain().await;
    assert_eq!(
        h.status.get(put.id).await.unwrap().status,
        OperationStatus::Succeeded
    );

    let del = h
        .status
        .queue_operation(&envelope.id, OperationKind::Delete, "2024-06-01")
        .await
        .unwrap();
    h.worker.drain().await;

    assert_eq!(
        h.status.get(del.id).await.unwrap().status,
        OperationStatus::Succeeded
    );
    assert!(h
        .store
        .get(&envelope.id.index_key())
        .await
        .unwrap_err()
        .is_not_found());

    // Deleting again (resource already gone) still succeeds.
    let again = h
        .status
        .queue_operation(&envelope.id, OperationKind::Delete, "2024-06-01")
        .await
        .unwrap();
    h.worker.drain().await;
    assert_eq!(
        h.status.get(again.id).await.unwrap().status,
        OperationStatus::Succeeded
    );
}
