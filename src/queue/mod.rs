pub mod memory;

use async_trait::async_trait;

use crate::error::Result;

/// One dequeued message together with the lease the consumer holds on it.
#[derive(Debug, Clone)]
pub struct LeasedMessage {
    pub id: String,
    /// Lease token; invalidated when the lease expires or the message is
    /// redelivered to another consumer.
    pub lease: String,
    /// Number of times this message has been delivered, this delivery
    /// included.
    pub dequeue_count: u32,
    pub body: serde_json::Value,
}

/// At-least-once delivery channel with lease-based visibility.
///
/// A dequeued message stays invisible for the lease duration; a consumer
/// that neither finishes nor extends in time loses the lease and the
/// message becomes redeliverable. Consumers must therefore make their
/// processing idempotent.
#[async_trait]
pub trait QueueClient: Send + Sync {
    async fn enqueue(&self, body: serde_json::Value) -> Result<()>;

    /// Lease the next visible message, if any.
    async fn dequeue(&self) -> Result<Option<LeasedMessage>>;

    /// Acknowledge and remove a message. Fails with `LeaseLost` if the
    /// lease is no longer held.
    async fn finish(&self, msg: &LeasedMessage) -> Result<()>;

    /// Push the lease expiry out by another lease duration.
    async fn extend(&self, msg: &LeasedMessage) -> Result<()>;
}
