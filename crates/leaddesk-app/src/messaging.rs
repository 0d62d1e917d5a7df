// Outbound messages.

use chrono::{DateTime, Utc};
use serde_json::{json, Map, Value};
use tracing::info;

use leaddesk_core::config::MessagesConfig;
use leaddesk_core::model::format_timestamp;
use leaddesk_core::{CoreError, DocPath, DocumentStore};

/// Append `text` to the user's outbound collection, stamped with the
/// current time. Whitespace-only text sends nothing and returns `Ok(None)`.
pub async fn send_message(
    store: &dyn DocumentStore,
    config: &MessagesConfig,
    user_id: &str,
    text: &str,
) -> Result<Option<DocPath>, CoreError> {
    send_message_at(store, config, user_id, text, Utc::now()).await
}

pub async fn send_message_at(
    store: &dyn DocumentStore,
    config: &MessagesConfig,
    user_id: &str,
    text: &str,
    sent: DateTime<Utc>,
) -> Result<Option<DocPath>, CoreError> {
    if text.trim().is_empty() {
        return Ok(None);
    }
    if user_id.is_empty() || user_id.contains('/') {
        return Err(CoreError::invalid(format!("`{user_id}` is not a user id")));
    }

    let mut body = Map::new();
    body.insert("message".into(), Value::String(text.to_string()));
    body.insert("sent".into(), json!(format_timestamp(&sent)));
    body.insert("read".into(), Value::Bool(false));

    let collection_path = format!(
        "{}/{}/{}",
        config.users_collection, user_id, config.outbound_collection
    );
    let path = store.add(&collection_path, body).await?;
    info!(%path, "Message sent");
    Ok(Some(path))
}
