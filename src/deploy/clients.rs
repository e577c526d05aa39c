use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::render::OutputResourceType;

/// One concrete provider client, keyed by output-resource type.
///
/// Opaque, possibly slow, possibly failing: the deployment processor maps
/// every error to `Error::DeployFailed`. `delete` of an unknown identity
/// must succeed (teardown is idempotent).
#[async_trait]
pub trait CloudClient: Send + Sync {
    /// Create or update the external resource and return its live state.
    /// When `identity` is `None` the provider assigns one; the returned
    /// state carries it under `"id"`.
    async fn put(
        &self,
        identity: Option<&str>,
        desired: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value>;

    async fn get(&self, identity: &str) -> anyhow::Result<Option<serde_json::Value>>;

    async fn delete(&self, identity: &str) -> anyhow::Result<()>;
}

/// Output-resource-type to client dispatch table; constructed at startup,
/// read-only afterwards.
#[derive(Default)]
pub struct ClientRegistry {
    clients: HashMap<OutputResourceType, Arc<dyn CloudClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, resource_type: OutputResourceType, client: Arc<dyn CloudClient>) {
        self.clients.insert(resource_type, client);
    }

    pub fn get(&self, resource_type: &OutputResourceType) -> Option<Arc<dyn CloudClient>> {
        self.clients.get(resource_type).cloned()
    }
}

/// In-process provider used by tests and the single-process dev host.
///
/// `put` echoes the desired state back as live state, assigns
/// deterministic identities to managed resources, and merges per-instance
/// default properties (standing in for provider-assigned fields such as
/// connection strings).
pub struct FakeCloudClient {
    provider: String,
    resources: DashMap<String, serde_json::Value>,
    live_defaults: serde_json::Map<String, serde_json::Value>,
    put_calls: AtomicU64,
    next_id: AtomicU64,
}

impl FakeCloudClient {
    pub fn new(provider: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            resources: DashMap::new(),
            live_defaults: serde_json::Map::new(),
            put_calls: AtomicU64::new(0),
            next_id: AtomicU64::new(1),
        }
    }

    /// Properties merged into every live state this client returns,
    /// standing in for values only the real provider would know.
    pub fn with_live_defaults(mut self, defaults: serde_json::Value) -> Self {
        if let serde_json::Value::Object(map) = defaults {
            self.live_defaults = map;
        }
        self
    }

    pub fn put_count(&self) -> u64 {
        self.put_calls.load(Ordering::SeqCst)
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.resources.contains_key(identity)
    }
}

#[async_trait]
impl CloudClient for FakeCloudClient {
    async fn put(
        &self,
        identity: Option<&str>,
        desired: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        self.put_calls.fetch_add(1, Ordering::SeqCst);
        let identity = match identity {
            Some(id) => id.to_string(),
            None => format!(
                "/providers/{}/generated/{}",
                self.provider,
                self.next_id.fetch_add(1, Ordering::SeqCst)
            ),
        };

        let mut live = desired.clone();
        if !live.is_object() {
            live = serde_json::json!({});
        }
        live["id"] = serde_json::json!(identity);
        if let Some(props) = live
            .get_mut("properties")
            .and_then(|p| p.as_object_mut())
        {
            for (key, value) in &self.live_defaults {
                props.entry(key.clone()).or_insert_with(|| value.clone());
            }
        }

        self.resources.insert(identity, live.clone());
        Ok(live)
    }

    async fn get(&self, identity: &str) -> anyhow::Result<Option<serde_json::Value>> {
        Ok(self.resources.get(identity).map(|v| v.value().clone()))
    }

    async fn delete(&self, identity: &str) -> anyhow::Result<()> {
        self.resources.remove(identity);
        Ok(())
    }
}

/// A client that fails every call; used to exercise deploy-failure paths.
pub struct FailingCloudClient {
    pub message: String,
}

#[async_trait]
impl CloudClient for FailingCloudClient {
    async fn put(
        &self,
        _identity: Option<&str>,
        _desired: &serde_json::Value,
    ) -> anyhow::Result<serde_json::Value> {
        anyhow::bail!("{}", self.message)
    }

    async fn get(&self, _identity: &str) -> anyhow::Result<Option<serde_json::Value>> {
        anyhow::bail!("{}", self.message)
    }

    async fn delete(&self, _identity: &str) -> anyhow::Result<()> {
        anyhow::bail!("{}", self.message)
    }
}
