// Collaborator interfaces: the hosted document database and the identity
// provider, abstracted to what the dashboard actually calls.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;
use crate::model::{Collection, DocPath, Record};
use crate::subscription::Subscription;

#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Short name used in logs.
    fn backend_tag(&self) -> &'static str;

    /// Count documents in `collection` whose numeric `field` satisfies
    /// `lower <= value` and, when `upper` is given, `value < upper`.
    /// Documents where the field is missing or not a number never match.
    async fn count_range(
        &self,
        collection: &Collection,
        field: &str,
        lower: f64,
        upper: Option<f64>,
    ) -> Result<u64, CoreError>;

    /// Up to `limit` documents ordered by `order_field` descending.
    /// Documents without the field are excluded.
    async fn query_recent(
        &self,
        collection: &Collection,
        order_field: &str,
        limit: usize,
    ) -> Result<Vec<Record>, CoreError>;

    async fn get(&self, path: &DocPath) -> Result<Option<Record>, CoreError>;

    /// Every document in `collection`, ordered by path.
    async fn list(&self, collection: &Collection) -> Result<Vec<Record>, CoreError>;

    /// Create or replace the document at `path`.
    async fn set(&self, path: &DocPath, fields: Map<String, Value>) -> Result<(), CoreError>;

    /// Append a document with a generated id to the collection at
    /// `collection_path`, returning its path.
    async fn add(&self, collection_path: &str, fields: Map<String, Value>)
        -> Result<DocPath, CoreError>;

    /// Open a snapshot stream. The current contents arrive as the first
    /// snapshot; every later write to the collection pushes a new one.
    /// Snapshots arrive in write order, so the latest one received is
    /// always the current state.
    fn subscribe(&self, collection: &Collection) -> Result<Subscription, CoreError>;
}

/// The signed-in operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub email: String,
    pub display_name: String,
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn sign_in(&self) -> Result<Identity, CoreError>;
    async fn sign_out(&self) -> Result<(), CoreError>;
}

/// Stands in for the hosted identity provider: signs in the operator named
/// in `credentials.toml`, or rejects sign-in when none is configured.
pub struct ConfiguredOperator {
    identity: Option<Identity>,
}

impl ConfiguredOperator {
    pub fn new(identity: Option<Identity>) -> Self {
        Self { identity }
    }
}

#[async_trait]
impl AuthProvider for ConfiguredOperator {
    async fn sign_in(&self) -> Result<Identity, CoreError> {
        self.identity.clone().ok_or_else(|| {
            CoreError::AuthError("no operator configured in credentials.toml".into())
        })
    }

    async fn sign_out(&self) -> Result<(), CoreError> {
        Ok(())
    }
}
