// SQLite-backed document store.
//
// Documents live in a single table keyed by path with a JSON body; field
// queries go through SQLite's JSON functions. Subscriptions see writes
// made through this handle only.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use anyhow::{Context, Result};
use async_trait::async_trait;
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use tracing::debug;

use crate::error::CoreError;
use crate::model::{Collection, DocPath, Record};
use crate::store::DocumentStore;
use crate::subscription::{Snapshot, SubscriberRegistry, Subscription};

/// SQLite persistence for documents plus the subscriber registry that
/// turns writes into snapshots.
pub struct Database {
    conn: Mutex<Connection>,
    /// Held across a write and its notification.
    writes: Mutex<()>,
    registry: SubscriberRegistry,
    id_counter: AtomicU64,
}

impl Database {
    /// Open (or create) a SQLite database at `path` and ensure the schema
    /// exists. Pass `":memory:"` for an ephemeral database.
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to set database pragmas")?;

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS documents (
                path            TEXT PRIMARY KEY,
                collection_path TEXT NOT NULL,
                collection_id   TEXT NOT NULL,
                body            TEXT NOT NULL,
                updated_at      TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%fZ', 'now'))
            );

            CREATE INDEX IF NOT EXISTS idx_documents_collection_path
                ON documents(collection_path);
            CREATE INDEX IF NOT EXISTS idx_documents_collection_id
                ON documents(collection_id);
            ",
        )
        .context("failed to create database schema")?;

        Ok(Self {
            conn: Mutex::new(conn),
            writes: Mutex::new(()),
            registry: SubscriberRegistry::new(),
            id_counter: AtomicU64::new(0),
        })
    }

    /// Acquire the database connection.
    ///
    /// Panics if the mutex is poisoned (another thread panicked while
    /// holding the lock).
    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().expect("database mutex poisoned")
    }

    /// Writers hold this until their subscribers have been notified, so
    /// snapshots reach every subscriber in write order.
    fn serialize_writes(&self) -> MutexGuard<'_, ()> {
        self.writes.lock().expect("database write mutex poisoned")
    }

    /// Generate a document id: UTC timestamp with millisecond precision
    /// plus a per-handle counter so ids sort by creation time.
    fn generate_id(&self) -> String {
        let seq = self.id_counter.fetch_add(1, Ordering::SeqCst);
        let now = chrono::Utc::now();
        format!("{}{:04}", now.format("%Y%m%d%H%M%S%3f"), seq % 10_000)
    }

    pub fn document_count(&self) -> Result<usize> {
        let count: i64 = self
            .conn()
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .context("failed to count documents")?;
        Ok(count as usize)
    }

    /// Write many documents in one transaction. Subscribers are notified
    /// once per written path after the commit.
    pub fn import_documents(&self, docs: &[(DocPath, Map<String, Value>)]) -> Result<()> {
        let _serial = self.serialize_writes();
        {
            let mut conn = self.conn();
            let tx = conn.transaction().context("failed to begin import transaction")?;
            for (path, fields) in docs {
                let body = serde_json::to_string(fields).context("failed to serialize document")?;
                upsert(&tx, path, &body).with_context(|| format!("failed to write {path}"))?;
            }
            tx.commit().context("failed to commit import")?;
        }
        for (path, _) in docs {
            self.notify(path);
        }
        Ok(())
    }

    fn write(&self, path: &DocPath, fields: &Map<String, Value>) -> Result<(), CoreError> {
        let body = serde_json::to_string(fields)?;
        let _serial = self.serialize_writes();
        upsert(&self.conn(), path, &body)?;
        debug!(%path, "document written");
        self.notify(path);
        Ok(())
    }

    fn notify(&self, path: &DocPath) {
        self.registry
            .notify_change(path, |collection| self.snapshot(collection));
    }

    fn snapshot(&self, collection: &Collection) -> Result<Snapshot, CoreError> {
        let (column, key) = collection_filter(collection);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT path, body FROM documents WHERE {column} = ?1 ORDER BY path"
        ))?;
        let rows = stmt
            .query_map(params![key], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|(p, b)| decode_row(&p, &b)).collect()
    }

    fn count_range_sync(
        &self,
        collection: &Collection,
        field: &str,
        lower: f64,
        upper: Option<f64>,
    ) -> Result<u64, CoreError> {
        let (column, key) = collection_filter(collection);
        let json_path = json_path(field);
        let count: i64 = self.conn().query_row(
            &format!(
                "SELECT COUNT(*) FROM documents
                 WHERE {column} = ?1
                   AND json_type(body, ?2) IN ('integer', 'real')
                   AND json_extract(body, ?2) >= ?3
                   AND (?4 IS NULL OR json_extract(body, ?2) < ?4)"
            ),
            params![key, json_path, lower, upper],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn query_recent_sync(
        &self,
        collection: &Collection,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<Record>, CoreError> {
        let (column, key) = collection_filter(collection);
        let json_path = json_path(order_field);
        let conn = self.conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT path, body FROM documents
             WHERE {column} = ?1 AND json_extract(body, ?2) IS NOT NULL
             ORDER BY json_extract(body, ?2) DESC, path ASC
             LIMIT ?3"
        ))?;
        let rows = stmt
            .query_map(params![key, json_path, limit as i64], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(|(p, b)| decode_row(&p, &b)).collect()
    }

    fn get_sync(&self, path: &DocPath) -> Result<Option<Record>, CoreError> {
        let body: Option<String> = self
            .conn()
            .query_row(
                "SELECT body FROM documents WHERE path = ?1",
                params![path.as_str()],
                |row| row.get(0),
            )
            .optional()?;
        body.map(|b| decode_row(path.as_str(), &b)).transpose()
    }
}

fn upsert(conn: &Connection, path: &DocPath, body: &str) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT INTO documents (path, collection_path, collection_id, body)
         VALUES (?1, ?2, ?3, ?4)
         ON CONFLICT(path) DO UPDATE SET
            body       = excluded.body,
            updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        params![path.as_str(), path.collection_path(), path.collection_id(), body],
    )
}

fn collection_filter(collection: &Collection) -> (&'static str, &str) {
    match collection {
        Collection::Group(id) => ("collection_id", id.as_str()),
        Collection::Path(path) => ("collection_path", path.as_str()),
    }
}

/// JSON path for a top-level field, quoted so field names with dots or
/// spaces address a single key.
fn json_path(field: &str) -> String {
    format!("$.\"{}\"", field.replace('"', ""))
}

fn decode_row(path: &str, body: &str) -> Result<Record, CoreError> {
    let path = DocPath::parse(path)?;
    match serde_json::from_str::<Value>(body)? {
        Value::Object(fields) => Ok(Record::new(path, fields)),
        _ => Err(CoreError::query(format!("document {path} is not a JSON object"))),
    }
}

#[async_trait]
impl DocumentStore for Database {
    fn backend_tag(&self) -> &'static str {
        "sqlite"
    }

    async fn count_range(
        &self,
        collection: &Collection,
        field: &str,
        lower: f64,
        upper: Option<f64>,
    ) -> Result<u64, CoreError> {
        self.count_range_sync(collection, field, lower, upper)
    }

    async fn query_recent(
        &self,
        collection: &Collection,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<Record>, CoreError> {
        self.query_recent_sync(collection, order_field, limit)
    }

    async fn get(&self, path: &DocPath) -> Result<Option<Record>, CoreError> {
        self.get_sync(path)
    }

    async fn list(&self, collection: &Collection) -> Result<Vec<Record>, CoreError> {
        self.snapshot(collection)
    }

    async fn set(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), CoreError> {
        self.write(path, &fields)
    }

    async fn add(
        &self,
        collection_path: &str,
        fields: Map<String, Value>,
    ) -> Result<DocPath, CoreError> {
        Collection::path(collection_path).validate()?;
        let path = DocPath::child(collection_path, &self.generate_id())?;
        self.write(&path, &fields)?;
        Ok(path)
    }

    fn subscribe(&self, collection: &Collection) -> Result<Subscription, CoreError> {
        collection.validate()?;
        let initial = self.snapshot(collection);
        Ok(self.registry.register(collection.clone(), initial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Helper: create a fresh in-memory database for each test.
    fn test_db() -> Database {
        Database::open(":memory:").expect("in-memory database should open")
    }

    fn body(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => panic!("test body must be an object"),
        }
    }

    fn path(p: &str) -> DocPath {
        DocPath::parse(p).unwrap()
    }

    async fn seed_loans(db: &Database, loans: &[(&str, Value)]) {
        for (p, loan) in loans {
            db.set(&path(p), body(json!({ "loan": loan }))).await.unwrap();
        }
    }

    #[test]
    fn open_creates_documents_table() {
        let db = test_db();
        let conn = db.conn();
        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();
        assert!(tables.contains(&"documents".to_string()));
    }

    #[tokio::test]
    async fn set_and_get_round_trip() {
        let db = test_db();
        let p = path("users/u1");
        db.set(&p, body(json!({"name": "Ada", "age": 36}))).await.unwrap();

        let record = db.get(&p).await.unwrap().unwrap();
        assert_eq!(record.path, p);
        assert_eq!(record.get("name"), Some(&json!("Ada")));
        assert!(db.get(&path("users/missing")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn set_overwrites_existing_document() {
        let db = test_db();
        let p = path("users/u1");
        db.set(&p, body(json!({"name": "Ada"}))).await.unwrap();
        db.set(&p, body(json!({"name": "Grace"}))).await.unwrap();

        assert_eq!(db.document_count().unwrap(), 1);
        let record = db.get(&p).await.unwrap().unwrap();
        assert_eq!(record.get("name"), Some(&json!("Grace")));
    }

    #[tokio::test]
    async fn count_range_uses_half_open_bounds_across_group() {
        let db = test_db();
        seed_loans(
            &db,
            &[
                ("users/u1/mortgages/a", json!(0)),
                ("users/u1/mortgages/b", json!(199999)),
                ("users/u2/mortgages/c", json!(200000)),
                ("users/u3/mortgages/d", json!(1200000.5)),
                ("users/u3/mortgages/e", json!("n/a")),
                ("users/u3/savings/f", json!(100)),
            ],
        )
        .await;

        let group = Collection::group("mortgages");
        assert_eq!(db.count_range(&group, "loan", 0.0, Some(200000.0)).await.unwrap(), 2);
        assert_eq!(
            db.count_range(&group, "loan", 200000.0, Some(400000.0)).await.unwrap(),
            1
        );
        assert_eq!(db.count_range(&group, "loan", 1000000.0, None).await.unwrap(), 1);
        // Non-numeric and other collections never match.
        assert_eq!(db.count_range(&group, "loan", 0.0, None).await.unwrap(), 4);
    }

    #[tokio::test]
    async fn count_range_on_collection_path() {
        let db = test_db();
        seed_loans(
            &db,
            &[
                ("users/u1/mortgages/a", json!(10)),
                ("users/u2/mortgages/b", json!(10)),
            ],
        )
        .await;
        let only_u1 = Collection::path("users/u1/mortgages");
        assert_eq!(db.count_range(&only_u1, "loan", 0.0, None).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn query_recent_orders_by_field_descending() {
        let db = test_db();
        for (p, start) in [
            ("users/u1/mortgages/a", "2024-01-01T00:00:00.000Z"),
            ("users/u2/mortgages/b", "2024-06-01T00:00:00.000Z"),
            ("users/u3/mortgages/c", "2023-12-31T00:00:00.000Z"),
        ] {
            db.set(&path(p), body(json!({ "start": start }))).await.unwrap();
        }
        db.set(&path("users/u4/mortgages/d"), body(json!({"loan": 1})))
            .await
            .unwrap();

        let recent = db
            .query_recent(&Collection::group("mortgages"), "start", 2)
            .await
            .unwrap();
        let paths: Vec<&str> = recent.iter().map(|r| r.path.as_str()).collect();
        assert_eq!(paths, vec!["users/u2/mortgages/b", "users/u1/mortgages/a"]);
    }

    #[tokio::test]
    async fn add_generates_unique_paths() {
        let db = test_db();
        let a = db.add("users/u1/companyMessages", Map::new()).await.unwrap();
        let b = db.add("users/u1/companyMessages", Map::new()).await.unwrap();
        assert_ne!(a, b);
        assert_eq!(a.collection_path(), "users/u1/companyMessages");
        assert!(db.add("users/u1", Map::new()).await.is_err());
    }

    #[tokio::test]
    async fn subscription_receives_initial_and_updated_snapshots() {
        let db = test_db();
        db.set(
            &path("users/u1/clientMessages/m1"),
            body(json!({"message": "hi", "sent": "2024-01-01T10:00:00.000Z"})),
        )
        .await
        .unwrap();

        let mut sub = db
            .subscribe(&Collection::path("users/u1/clientMessages"))
            .unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 1);

        db.add("users/u1/clientMessages", body(json!({"message": "again"})))
            .await
            .unwrap();
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 2);

        // Writes elsewhere do not wake this subscriber.
        db.add("users/u2/clientMessages", Map::new()).await.unwrap();
        assert!(sub.try_next().is_none());
    }

    #[tokio::test]
    async fn import_documents_is_atomic_and_notifies() {
        let db = test_db();
        let mut sub = db.subscribe(&Collection::path("users")).unwrap();
        sub.next().await.unwrap().unwrap();

        db.import_documents(&[
            (path("users/u1"), body(json!({"name": "Ada"}))),
            (path("users/u2"), body(json!({"name": "Grace"}))),
        ])
        .unwrap();

        assert_eq!(db.document_count().unwrap(), 2);
        // Notifications run after the commit, so both see the full batch.
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 2);
        assert_eq!(sub.next().await.unwrap().unwrap().len(), 2);
    }

    #[test]
    fn json_path_quotes_field_names() {
        assert_eq!(json_path("loan"), "$.\"loan\"");
        assert_eq!(json_path("we\"ird"), "$.\"weird\"");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_writers_deliver_snapshots_in_write_order() {
        let db = std::sync::Arc::new(test_db());
        let mut sub = db
            .subscribe(&Collection::path("users/u1/companyMessages"))
            .unwrap();

        let writers: Vec<_> = (0..4)
            .map(|writer| {
                let db = std::sync::Arc::clone(&db);
                tokio::spawn(async move {
                    for n in 0..10 {
                        let p = path(&format!("users/u1/companyMessages/w{writer}n{n}"));
                        db.set(&p, body(json!({"message": "hi", "sent": n})))
                            .await
                            .unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.await.unwrap();
        }

        let mut sizes = Vec::new();
        while let Some(snapshot) = sub.try_next() {
            sizes.push(snapshot.unwrap().len());
        }
        assert_eq!(sizes.len(), 41);
        assert!(sizes.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(sizes.last(), Some(&40));
    }
}
