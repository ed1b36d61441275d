//! SQLite implementation of the durable state store
//!
//! WAL mode, one connection behind a mutex, idempotent schema setup. Each
//! engine gets its own two-column-keyed table; records are JSON blobs.

use super::{StateKind, StateStore, StoredRecord};
use async_trait::async_trait;
use rusqlite::Connection;
use std::sync::{Arc, Mutex};

pub struct SqliteStateStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStateStore {
    /// Open (or create) the database and set up the schema.
    pub fn new(db_path: &str) -> Result<Self, Box<dyn std::error::Error + Send + Sync>> {
        let conn = Connection::open(db_path)?;

        conn.pragma_update(None, "journal_mode", "WAL")?;
        log::info!("Opened state store {} (WAL mode)", db_path);

        for kind in [StateKind::Aggregation, StateKind::Blacklist] {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    source      TEXT NOT NULL,
                    key         TEXT NOT NULL,
                    record      TEXT NOT NULL,
                    updated_at  INTEGER NOT NULL,
                    PRIMARY KEY (source, key)
                )",
                kind.table()
            ))?;
        }

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn upsert(
        &self,
        kind: StateKind,
        source: &str,
        key: &str,
        record: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!(
                "INSERT INTO {} (source, key, record, updated_at)
                 VALUES (?, ?, ?, ?)
                 ON CONFLICT(source, key) DO UPDATE SET
                     record = excluded.record,
                     updated_at = excluded.updated_at",
                kind.table()
            ),
            rusqlite::params![source, key, record, chrono::Utc::now().timestamp()],
        )?;
        Ok(())
    }

    async fn delete(
        &self,
        kind: StateKind,
        source: &str,
        key: &str,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            &format!("DELETE FROM {} WHERE source = ? AND key = ?", kind.table()),
            rusqlite::params![source, key],
        )?;
        Ok(())
    }

    async fn load_all(
        &self,
        kind: StateKind,
    ) -> Result<Vec<StoredRecord>, Box<dyn std::error::Error + Send + Sync>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "SELECT source, key, record FROM {}",
            kind.table()
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok(StoredRecord {
                source: row.get(0)?,
                key: row.get(1)?,
                record: row.get(2)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn create_test_store() -> (NamedTempFile, SqliteStateStore) {
        let temp_file = NamedTempFile::new().unwrap();
        let store = SqliteStateStore::new(temp_file.path().to_str().unwrap()).unwrap();
        (temp_file, store)
    }

    #[tokio::test]
    async fn test_upsert_insert_then_update() {
        let (_temp, store) = create_test_store();

        store
            .upsert(StateKind::Aggregation, "prov.chan", "g1", r#"{"count":1}"#)
            .await
            .unwrap();
        store
            .upsert(StateKind::Aggregation, "prov.chan", "g1", r#"{"count":2}"#)
            .await
            .unwrap();

        let records = store.load_all(StateKind::Aggregation).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source, "prov.chan");
        assert_eq!(records[0].key, "g1");
        assert_eq!(records[0].record, r#"{"count":2}"#);
    }

    #[tokio::test]
    async fn test_tables_are_isolated() {
        let (_temp, store) = create_test_store();

        store
            .upsert(StateKind::Aggregation, "prov.chan", "k", "agg")
            .await
            .unwrap();
        store
            .upsert(StateKind::Blacklist, "prov.chan", "k", "bl")
            .await
            .unwrap();

        let agg = store.load_all(StateKind::Aggregation).await.unwrap();
        let bl = store.load_all(StateKind::Blacklist).await.unwrap();
        assert_eq!(agg.len(), 1);
        assert_eq!(bl.len(), 1);
        assert_eq!(agg[0].record, "agg");
        assert_eq!(bl[0].record, "bl");
    }

    #[tokio::test]
    async fn test_delete_removes_single_key() {
        let (_temp, store) = create_test_store();

        store
            .upsert(StateKind::Blacklist, "prov.chan", "a", "1")
            .await
            .unwrap();
        store
            .upsert(StateKind::Blacklist, "prov.chan", "b", "2")
            .await
            .unwrap();
        store
            .delete(StateKind::Blacklist, "prov.chan", "a")
            .await
            .unwrap();

        let records = store.load_all(StateKind::Blacklist).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "b");

        // Deleting a missing key is not an error
        store
            .delete(StateKind::Blacklist, "prov.chan", "a")
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_state_survives_reopen() {
        let temp_file = NamedTempFile::new().unwrap();
        let path = temp_file.path().to_str().unwrap().to_string();

        {
            let store = SqliteStateStore::new(&path).unwrap();
            store
                .upsert(StateKind::Aggregation, "prov.chan", "g1", "persisted")
                .await
                .unwrap();
        }

        let reopened = SqliteStateStore::new(&path).unwrap();
        let records = reopened.load_all(StateKind::Aggregation).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].record, "persisted");
    }
}
