use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;

use super::{check_condition, ETag, StorageClient, StoredObject, WriteCondition};
use crate::error::{Error, Result};

struct Entry {
    etag: ETag,
    data: serde_json::Value,
}

/// In-memory store. The mutex-guarded map makes the condition check and
/// the write one atomic step, so racing writers serialize exactly like the
/// durable backends.
///
/// Backs tests and the single-process dev host.
#[derive(Default)]
pub struct InMemoryStorage {
    objects: Mutex<HashMap<String, Entry>>,
}

impl InMemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl StorageClient for InMemoryStorage {
    async fn get(&self, id: &str) -> Result<StoredObject> {
        let objects = self.objects.lock().unwrap();
        match objects.get(id) {
            Some(entry) => Ok(StoredObject {
                id: id.to_string(),
                etag: entry.etag.clone(),
                data: entry.data.clone(),
            }),
            None => Err(Error::NotFound(id.to_string())),
        }
    }

    async fn save(
        &self,
        id: &str,
        data: &serde_json::Value,
        condition: WriteCondition,
    ) -> Result<ETag> {
        let mut objects = self.objects.lock().unwrap();
        check_condition(id, objects.get(id).map(|e| &e.etag), &condition)?;
        let etag = ETag::issue();
        objects.insert(
            id.to_string(),
            Entry {
                etag: etag.clone(),
                data: data.clone(),
            },
        );
        Ok(etag)
    }

    async fn delete(&self, id: &str, condition: WriteCondition) -> Result<()> {
        let mut objects = self.objects.lock().unwrap();
        match objects.get(id) {
            None => Err(Error::NotFound(id.to_string())),
            Some(entry) => {
                check_condition(id, Some(&entry.etag), &condition)?;
                objects.remove(id);
                Ok(())
            }
        }
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let objects = self.objects.lock().unwrap();
        let mut result: Vec<StoredObject> = objects
            .iter()
            .filter(|(id, _)| id.starts_with(prefix))
            .map(|(id, entry)| StoredObject {
                id: id.clone(),
                etag: entry.etag.clone(),
                data: entry.data.clone(),
            })
            .collect();
        result.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(result)
    }
}
