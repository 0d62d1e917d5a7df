// Recent leads, lead detail lookup, and the user directory.

use chrono::{DateTime, Local, Utc};
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use leaddesk_core::config::LeadsConfig;
use leaddesk_core::{Collection, CoreError, DocPath, DocumentStore, Record};

use crate::format::{long_date, money, percent};

// ---------------------------------------------------------------------------
// Leads
// ---------------------------------------------------------------------------

/// A mortgage document as shown in the recent-leads table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Lead {
    pub path: DocPath,
    pub loan: f64,
    pub lender: String,
    pub rate: f64,
    pub rent: f64,
    pub start: DateTime<Utc>,
    pub term: u32,
}

impl Lead {
    pub fn from_record(record: &Record) -> Result<Self, CoreError> {
        let missing = |field: &str| {
            CoreError::query(format!(
                "document {} is malformed: `{field}` is missing or has the wrong type",
                record.path
            ))
        };
        let number = |field: &str| record.number(field).ok_or_else(|| missing(field));

        Ok(Lead {
            path: record.path.clone(),
            loan: number("loan")?,
            lender: text(record, "lender"),
            rate: number("rate")?,
            rent: number("rent")?,
            start: record.timestamp("start").ok_or_else(|| missing("start"))?,
            term: record
                .number("term")
                .filter(|t| *t >= 0.0)
                .map(|t| t.round() as u32)
                .ok_or_else(|| missing("term"))?,
        })
    }
}

/// Display strings for one lead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LeadRow {
    pub path: String,
    pub loan: String,
    pub lender: String,
    pub rate: String,
    pub rent: String,
    pub start: String,
    pub term: String,
}

impl LeadRow {
    pub fn new(lead: &Lead, currency: &str) -> Self {
        LeadRow {
            path: lead.path.to_string(),
            loan: money(currency, lead.loan),
            lender: lead.lender.clone(),
            rate: percent(lead.rate),
            rent: money(currency, lead.rent),
            start: long_date(&lead.start.with_timezone(&Local)),
            term: format!("{} yrs", lead.term),
        }
    }
}

/// The `limit` most recent leads ordered by the configured field,
/// newest first. Malformed documents are skipped with a warning.
pub async fn recent_leads(
    store: &dyn DocumentStore,
    config: &LeadsConfig,
    limit: usize,
) -> Result<Vec<Lead>, CoreError> {
    if limit == 0 {
        return Err(CoreError::invalid("lead limit must be greater than 0"));
    }
    let records = store
        .query_recent(
            &Collection::group(config.collection.as_str()),
            &config.order_field,
            limit,
        )
        .await?;

    let mut leads = Vec::with_capacity(records.len());
    for record in &records {
        match Lead::from_record(record) {
            Ok(lead) => leads.push(lead),
            Err(e) => warn!("skipping lead: {}", e),
        }
    }
    info!("Fetched {} recent leads", leads.len());
    Ok(leads)
}

/// The user id embedded in a lead path: the second segment.
///
/// `users/u1/mortgages/m1` -> `u1`
pub fn extract_user_id(path: &str) -> Result<String, CoreError> {
    match path.trim_matches('/').split('/').nth(1) {
        Some(id) if !id.is_empty() => Ok(id.to_string()),
        _ => Err(CoreError::invalid(format!(
            "path `{path}` does not name a user"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Users
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub name: String,
    pub address: String,
    pub age: Option<u32>,
    pub email: String,
    pub phone: String,
    pub photo_url: String,
}

impl UserProfile {
    pub fn from_record(record: &Record) -> Self {
        let age = match record.get("age") {
            Some(Value::Number(n)) => n.as_f64().filter(|a| *a >= 0.0).map(|a| a as u32),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        };
        UserProfile {
            name: text(record, "name"),
            address: text(record, "address"),
            age,
            email: text(record, "email"),
            phone: text(record, "phone"),
            photo_url: text(record, "photoURL"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserSummary {
    pub id: String,
    pub profile: UserProfile,
}

fn user_path(users_collection: &str, id: &str) -> Result<DocPath, CoreError> {
    if id.is_empty() || id.contains('/') {
        return Err(CoreError::invalid(format!("`{id}` is not a user id")));
    }
    DocPath::child(users_collection, id)
}

/// Look up one user. `Ok(None)` when no such user exists.
pub async fn fetch_user(
    store: &dyn DocumentStore,
    users_collection: &str,
    id: &str,
) -> Result<Option<UserProfile>, CoreError> {
    let path = user_path(users_collection, id)?;
    let record = store.get(&path).await?;
    Ok(record.as_ref().map(UserProfile::from_record))
}

/// Every user in the directory, ordered by path.
pub async fn list_users(
    store: &dyn DocumentStore,
    users_collection: &str,
) -> Result<Vec<UserSummary>, CoreError> {
    let records = store.list(&Collection::path(users_collection)).await?;
    let users: Vec<UserSummary> = records
        .iter()
        .map(|record| UserSummary {
            id: record.path.id().to_string(),
            profile: UserProfile::from_record(record),
        })
        .collect();
    info!("Fetched {} users", users.len());
    Ok(users)
}

/// String or number field as text; anything else is empty.
fn text(record: &Record, field: &str) -> String {
    match record.get(field) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    }
}
