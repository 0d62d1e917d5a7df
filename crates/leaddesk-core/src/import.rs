// CSV seeding for users and mortgages.
//
// Users CSV: id,name,email,phone,address,age,photo_url
// Mortgages CSV: user_id,id,loan,lender,rate,rent,start,term
//
// `start` accepts RFC 3339 or a bare `YYYY-MM-DD` date and is stored in the
// canonical timestamp form so "most recent" ordering works in every store.

use std::io::Read;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::db::Database;
use crate::model::{format_timestamp, DocPath};

#[derive(Debug, thiserror::Error)]
pub enum ImportError {
    #[error("failed to read file {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },

    #[error("CSV error in {path}: {source}")]
    Csv { path: String, source: csv::Error },

    #[error("failed to store imported documents: {0}")]
    Store(#[from] anyhow::Error),
}

/// One document ready to be written.
pub type ImportedDocument = (DocPath, Map<String, Value>);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ImportSummary {
    pub users: usize,
    pub mortgages: usize,
}

// ---------------------------------------------------------------------------
// Raw CSV rows
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct RawUser {
    id: String,
    name: String,
    #[serde(default)]
    email: String,
    #[serde(default)]
    phone: String,
    #[serde(default)]
    address: String,
    #[serde(default)]
    age: Option<u32>,
    #[serde(default)]
    photo_url: String,
}

#[derive(Debug, Deserialize)]
struct RawMortgage {
    user_id: String,
    id: String,
    loan: f64,
    lender: String,
    rate: f64,
    rent: f64,
    start: String,
    term: u32,
}

fn parse_start(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

// ---------------------------------------------------------------------------
// Reader-based loaders
// ---------------------------------------------------------------------------

fn load_users_from_reader<R: Read>(rdr: R) -> Result<Vec<ImportedDocument>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut docs = Vec::new();
    for result in reader.deserialize::<RawUser>() {
        match result {
            Ok(raw) => {
                let Ok(path) = DocPath::parse(&format!("users/{}", raw.id.trim())) else {
                    warn!("skipping user with invalid id '{}'", raw.id);
                    continue;
                };
                let mut body = object(json!({
                    "name": raw.name.trim(),
                    "email": raw.email.trim(),
                    "phone": raw.phone.trim(),
                    "address": raw.address.trim(),
                    "photoURL": raw.photo_url.trim(),
                }));
                if let Some(age) = raw.age {
                    body.insert("age".into(), json!(age));
                }
                docs.push((path, body));
            }
            Err(e) => {
                warn!("skipping malformed user row: {}", e);
            }
        }
    }
    Ok(docs)
}

fn load_mortgages_from_reader<R: Read>(rdr: R) -> Result<Vec<ImportedDocument>, csv::Error> {
    let mut reader = csv::Reader::from_reader(rdr);
    let mut docs = Vec::new();
    for result in reader.deserialize::<RawMortgage>() {
        match result {
            Ok(raw) => {
                if !(raw.loan.is_finite() && raw.rate.is_finite() && raw.rent.is_finite()) {
                    warn!("skipping mortgage '{}': non-finite amount", raw.id.trim());
                    continue;
                }
                let Some(start) = parse_start(&raw.start) else {
                    warn!(
                        "skipping mortgage '{}': unparseable start '{}'",
                        raw.id.trim(),
                        raw.start
                    );
                    continue;
                };
                let Ok(path) = DocPath::parse(&format!(
                    "users/{}/mortgages/{}",
                    raw.user_id.trim(),
                    raw.id.trim()
                )) else {
                    warn!("skipping mortgage with invalid ids '{}'/'{}'", raw.user_id, raw.id);
                    continue;
                };
                let body = object(json!({
                    "loan": raw.loan,
                    "lender": raw.lender.trim(),
                    "rate": raw.rate,
                    "rent": raw.rent,
                    "start": format_timestamp(&start),
                    "term": raw.term,
                }));
                docs.push((path, body));
            }
            Err(e) => {
                warn!("skipping malformed mortgage row: {}", e);
            }
        }
    }
    Ok(docs)
}

// ---------------------------------------------------------------------------
// Public path-based loaders
// ---------------------------------------------------------------------------

pub fn load_users(path: &Path) -> Result<Vec<ImportedDocument>, ImportError> {
    let file = std::fs::File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_users_from_reader(file).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

pub fn load_mortgages(path: &Path) -> Result<Vec<ImportedDocument>, ImportError> {
    let file = std::fs::File::open(path).map_err(|e| ImportError::Io {
        path: path.display().to_string(),
        source: e,
    })?;
    load_mortgages_from_reader(file).map_err(|e| ImportError::Csv {
        path: path.display().to_string(),
        source: e,
    })
}

/// Load whichever CSV files are given and write them in one transaction
/// per file.
pub fn import_files(
    db: &Database,
    users: Option<&Path>,
    mortgages: Option<&Path>,
) -> Result<ImportSummary, ImportError> {
    let mut summary = ImportSummary::default();

    if let Some(path) = users {
        let docs = load_users(path)?;
        db.import_documents(&docs)?;
        summary.users = docs.len();
        info!("Imported {} users from {}", docs.len(), path.display());
    }

    if let Some(path) = mortgages {
        let docs = load_mortgages(path)?;
        db.import_documents(&docs)?;
        summary.mortgages = docs.len();
        info!("Imported {} mortgages from {}", docs.len(), path.display());
    }

    Ok(summary)
}
