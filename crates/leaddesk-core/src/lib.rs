// Core types and collaborators for the leaddesk back office: the document
// model, store traits, cancellable subscriptions, the bundled store
// implementations, CSV import, and configuration loading.

pub mod config;
pub mod db;
pub mod error;
pub mod import;
pub mod memory;
pub mod model;
pub mod store;
pub mod subscription;

pub use error::CoreError;
pub use model::{Collection, DocPath, Record};
pub use store::{AuthProvider, DocumentStore, Identity};
pub use subscription::{Snapshot, Subscription};
