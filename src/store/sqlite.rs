use std::path::Path;
use std::sync::Mutex;

use anyhow::Context;
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};

use super::{check_condition, ETag, StorageClient, StoredObject, WriteCondition};
use crate::error::{Error, Result};

const CREATE_TABLES_SQL: &str = "
    CREATE TABLE IF NOT EXISTS objects (
        id TEXT PRIMARY KEY,
        etag TEXT NOT NULL,
        data TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
";

/// SQLite-backed store for single-node deployments.
///
/// The connection mutex makes the condition check and the write one atomic
/// step; cross-process deployments would use a backend whose conditional
/// write is native (e.g. a CosmosDB/etcd client) behind the same trait.
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open or create the state database.
    pub fn open(db_path: &str) -> Result<Self> {
        if let Some(dir) = Path::new(db_path).parent() {
            if !dir.as_os_str().is_empty() {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("creating state directory for {db_path}"))?;
            }
        }
        let conn = Connection::open(db_path)
            .with_context(|| format!("opening state database at {db_path}"))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")
            .context("setting journal mode")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize()?;
        Ok(storage)
    }

    /// Open an in-memory database (tests and throwaway runs).
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("opening in-memory database")?;
        let storage = Self {
            conn: Mutex::new(conn),
        };
        storage.initialize()?;
        Ok(storage)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(CREATE_TABLES_SQL)
            .context("creating tables")?;
        Ok(())
    }

    fn now() -> String {
        chrono::Utc::now().to_rfc3339()
    }
}

#[async_trait]
impl StorageClient for SqliteStorage {
    async fn get(&self, id: &str) -> Result<StoredObject> {
        let conn = self.conn.lock().unwrap();
        let row: Option<(String, String)> = conn
            .query_row(
                "SELECT etag, data FROM objects WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()
            .context("reading object")?;

        match row {
            Some((etag, data)) => Ok(StoredObject {
                id: id.to_string(),
                etag: ETag::from(etag.as_str()),
                data: serde_json::from_str(&data)
                    .with_context(|| format!("decoding stored json for {id}"))?,
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
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row(
                "SELECT etag FROM objects WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("reading current etag")?;
        let current_etag = current.as_deref().map(ETag::from);
        check_condition(id, current_etag.as_ref(), &condition)?;

        let etag = ETag::issue();
        let encoded = serde_json::to_string(data).context("encoding object")?;
        conn.execute(
            "INSERT INTO objects (id, etag, data, updated_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(id) DO UPDATE SET etag = ?2, data = ?3, updated_at = ?4",
            params![id, etag.as_str(), encoded, Self::now()],
        )
        .context("writing object")?;
        Ok(etag)
    }

    async fn delete(&self, id: &str, condition: WriteCondition) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        let current: Option<String> = conn
            .query_row(
                "SELECT etag FROM objects WHERE id = ?1",
                params![id],
                |row| row.get(0),
            )
            .optional()
            .context("reading current etag")?;
        let Some(current) = current else {
            return Err(Error::NotFound(id.to_string()));
        };
        check_condition(id, Some(&ETag::from(current.as_str())), &condition)?;

        conn.execute("DELETE FROM objects WHERE id = ?1", params![id])
            .context("deleting object")?;
        Ok(())
    }

    async fn list_prefix(&self, prefix: &str) -> Result<Vec<StoredObject>> {
        let conn = self.conn.lock().unwrap();
        let pattern = format!("{}%", prefix.replace('%', "\\%").replace('_', "\\_"));
        let mut stmt = conn
            .prepare(
                "SELECT id, etag, data FROM objects WHERE id LIKE ?1 ESCAPE '\\' ORDER BY id",
            )
            .context("preparing list query")?;
        let rows = stmt
            .query_map(params![pattern], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })
            .context("listing objects")?
            .collect::<std::result::Result<Vec<_>, _>>()
            .context("reading listed rows")?;

        let mut result = Vec::with_capacity(rows.len());
        for (id, etag, data) in rows {
            result.push(StoredObject {
                id: id.clone(),
                etag: ETag::from(etag.as_str()),
                data: serde_json::from_str(&data)
                    .with_context(|| format!("decoding stored json for {id}"))?,
            });
        }
        Ok(result)
    }
}
