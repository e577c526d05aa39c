use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::{LeasedMessage, QueueClient};
use crate::error::{Error, Result};

struct Entry {
    id: String,
    body: serde_json::Value,
    dequeue_count: u32,
    /// When the message next becomes deliverable. In the past (or unset
    /// lease) means visible now.
    visible_at: DateTime<Utc>,
    lease: Option<String>,
}

/// In-process queue with real lease semantics: visibility timeout,
/// redelivery with an incremented dequeue count, and stale-lease rejection
/// on finish/extend.
pub struct InMemoryQueue {
    entries: Mutex<Vec<Entry>>,
    lease_duration: chrono::Duration,
}

impl InMemoryQueue {
    pub fn new(lease_duration: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            lease_duration: chrono::Duration::from_std(lease_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(60)),
        }
    }

    /// Messages currently in the queue, leased or not.
    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl QueueClient for InMemoryQueue {
    async fn enqueue(&self, body: serde_json::Value) -> Result<()> {
        let mut entries = self.entries.lock().unwrap();
        entries.push(Entry {
            id: uuid::Uuid::new_v4().to_string(),
            body,
            dequeue_count: 0,
            visible_at: Utc::now(),
            lease: None,
        });
        Ok(())
    }

    async fn dequeue(&self) -> Result<Option<LeasedMessage>> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let Some(entry) = entries.iter_mut().find(|e| e.visible_at <= now) else {
            return Ok(None);
        };

        let lease = uuid::Uuid::new_v4().to_string();
        entry.lease = Some(lease.clone());
        entry.visible_at = now + self.lease_duration;
        entry.dequeue_count += 1;

        Ok(Some(LeasedMessage {
            id: entry.id.clone(),
            lease,
            dequeue_count: entry.dequeue_count,
            body: entry.body.clone(),
        }))
    }

    async fn finish(&self, msg: &LeasedMessage) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let held = entries.iter().position(|e| {
            e.id == msg.id && e.lease.as_deref() == Some(msg.lease.as_str()) && e.visible_at > now
        });
        match held {
            Some(idx) => {
                entries.remove(idx);
                Ok(())
            }
            None => Err(Error::LeaseLost(msg.id.clone())),
        }
    }

    async fn extend(&self, msg: &LeasedMessage) -> Result<()> {
        let now = Utc::now();
        let mut entries = self.entries.lock().unwrap();
        let held = entries.iter_mut().find(|e| {
            e.id == msg.id && e.lease.as_deref() == Some(msg.lease.as_str()) && e.visible_at > now
        });
        match held {
            Some(entry) => {
                entry.visible_at = now + self.lease_duration;
                Ok(())
            }
            None => Err(Error::LeaseLost(msg.id.clone())),
        }
    }
}
