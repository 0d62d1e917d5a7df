// In-memory document store.
//
// Backs the test suites. Supports failure injection so the callers'
// fail-fast and view-retention behaviour can be exercised.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::model::{compare_field_values, Collection, DocPath, Record};
use crate::store::DocumentStore;
use crate::subscription::{Snapshot, SubscriberRegistry, Subscription};

#[derive(Default)]
pub struct MemoryStore {
    docs: Mutex<BTreeMap<DocPath, Map<String, Value>>>,
    /// Held across a write and its notification.
    writes: Mutex<()>,
    registry: SubscriberRegistry,
    next_id: AtomicU64,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
    /// Lower bound of the one range query that should fail.
    fail_range_lower: Mutex<Option<f64>>,
    range_queries: AtomicU64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn docs(&self) -> MutexGuard<'_, BTreeMap<DocPath, Map<String, Value>>> {
        self.docs.lock().expect("memory store mutex poisoned")
    }

    /// Insert a document from a JSON object literal. Panics on a non-object
    /// body or malformed path; meant for fixtures.
    pub fn insert(&self, path: &str, body: Value) {
        let path = DocPath::parse(path).expect("fixture path must be valid");
        let Value::Object(fields) = body else {
            panic!("fixture body for {path} must be a JSON object");
        };
        self.write(path, fields);
    }

    /// Make every subsequent read fail with a `QueryFailure`.
    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make only the range query starting at `lower` fail.
    pub fn fail_range_at(&self, lower: Option<f64>) {
        *self
            .fail_range_lower
            .lock()
            .expect("memory store mutex poisoned") = lower;
    }

    /// Number of `count_range` calls served so far.
    pub fn range_query_count(&self) -> u64 {
        self.range_queries.load(Ordering::SeqCst)
    }

    /// Push an error to the subscribers of `collection`, as a hosted store
    /// does when a listener loses permission.
    pub fn break_subscription(&self, collection: &Collection, err: CoreError) {
        self.registry.notify_error(collection, err);
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.len()
    }

    fn check_reads(&self) -> Result<(), CoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(CoreError::query("memory store: injected read failure"));
        }
        Ok(())
    }

    fn snapshot(&self, collection: &Collection) -> Snapshot {
        self.docs()
            .iter()
            .filter(|(path, _)| collection.matches(path))
            .map(|(path, fields)| Record::new(path.clone(), fields.clone()))
            .collect()
    }

    fn write(&self, path: DocPath, fields: Map<String, Value>) {
        let _serial = self.writes.lock().expect("memory store mutex poisoned");
        self.docs().insert(path.clone(), fields);
        self.registry
            .notify_change(&path, |collection| Ok(self.snapshot(collection)));
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    fn backend_tag(&self) -> &'static str {
        "memory"
    }

    async fn count_range(
        &self,
        collection: &Collection,
        field: &str,
        lower: f64,
        upper: Option<f64>,
    ) -> Result<u64, CoreError> {
        self.range_queries.fetch_add(1, Ordering::SeqCst);
        self.check_reads()?;
        let fail_at = *self
            .fail_range_lower
            .lock()
            .expect("memory store mutex poisoned");
        if fail_at == Some(lower) {
            return Err(CoreError::query(format!(
                "memory store: injected failure for range starting at {lower}"
            )));
        }

        let count = self
            .docs()
            .iter()
            .filter(|(path, _)| collection.matches(path))
            .filter_map(|(_, fields)| fields.get(field).and_then(Value::as_f64))
            .filter(|v| *v >= lower && upper.map_or(true, |u| *v < u))
            .count();
        Ok(count as u64)
    }

    async fn query_recent(
        &self,
        collection: &Collection,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<Record>, CoreError> {
        self.check_reads()?;
        let mut records: Vec<Record> = self
            .snapshot(collection)
            .into_iter()
            .filter(|r| r.get(order_field).is_some_and(|v| !v.is_null()))
            .collect();
        records.sort_by(|a, b| {
            let (Some(x), Some(y)) = (a.get(order_field), b.get(order_field)) else {
                return std::cmp::Ordering::Equal;
            };
            compare_field_values(y, x).then_with(|| a.path.cmp(&b.path))
        });
        records.truncate(limit);
        Ok(records)
    }

    async fn get(&self, path: &DocPath) -> Result<Option<Record>, CoreError> {
        self.check_reads()?;
        Ok(self
            .docs()
            .get(path)
            .map(|fields| Record::new(path.clone(), fields.clone())))
    }

    async fn list(&self, collection: &Collection) -> Result<Vec<Record>, CoreError> {
        self.check_reads()?;
        Ok(self.snapshot(collection))
    }

    async fn set(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), CoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(CoreError::query("memory store: injected write failure"));
        }
        self.write(path.clone(), fields);
        Ok(())
    }

    async fn add(
        &self,
        collection_path: &str,
        fields: Map<String, Value>,
    ) -> Result<DocPath, CoreError> {
        Collection::path(collection_path).validate()?;
        let id = format!("doc{:06}", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let path = DocPath::child(collection_path, &id)?;
        self.set(&path, fields).await?;
        Ok(path)
    }

    fn subscribe(&self, collection: &Collection) -> Result<Subscription, CoreError> {
        collection.validate()?;
        let initial = self.check_reads().map(|_| self.snapshot(collection));
        Ok(self.registry.register(collection.clone(), initial))
    }
}
