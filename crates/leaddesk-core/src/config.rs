// Configuration loading and parsing (leaddesk.toml, credentials.toml).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::store::Identity;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {path}")]
    FileNotFound { path: PathBuf },

    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("validation error for field `{field}`: {message}")]
    ValidationError { field: String, message: String },

    #[error("failed to initialize config from defaults: {message}")]
    DefaultsCopyError { message: String },
}

// ---------------------------------------------------------------------------
// Top-level assembled Config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub statistics: StatisticsConfig,
    pub leads: LeadsConfig,
    pub messages: MessagesConfig,
    pub display: DisplayConfig,
    pub credentials: CredentialsConfig,
}

impl Config {
    /// The operator `credentials.toml` signs in, if one is configured.
    pub fn operator_identity(&self) -> Option<Identity> {
        let email = self.credentials.operator_email.clone()?;
        let display_name = self
            .credentials
            .operator_name
            .clone()
            .unwrap_or_else(|| email.clone());
        Some(Identity {
            email,
            display_name,
        })
    }
}

// ---------------------------------------------------------------------------
// leaddesk.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
struct LeaddeskFile {
    database: DatabaseSection,
    statistics: StatisticsConfig,
    leads: LeadsConfig,
    messages: MessagesConfig,
    #[serde(default)]
    display: DisplayConfig,
}

#[derive(Debug, Clone, Deserialize)]
struct DatabaseSection {
    path: String,
}

/// Loan-amount bucket layout.
#[derive(Debug, Clone, Deserialize)]
pub struct StatisticsConfig {
    /// Collection group holding the bucketed documents.
    pub collection: String,
    pub field: String,
    pub bucket_width: f64,
    pub bucket_count: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LeadsConfig {
    pub collection: String,
    pub order_field: String,
    pub limit: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MessagesConfig {
    pub users_collection: String,
    pub inbound_collection: String,
    pub outbound_collection: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DisplayConfig {
    #[serde(default = "default_currency_symbol")]
    pub currency_symbol: String,
}

fn default_currency_symbol() -> String {
    "£".to_string()
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            currency_symbol: default_currency_symbol(),
        }
    }
}

// ---------------------------------------------------------------------------
// credentials.toml structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize, Default)]
pub struct CredentialsConfig {
    pub operator_email: Option<String>,
    pub operator_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Loading logic
// ---------------------------------------------------------------------------

/// Load and validate configuration from `config/leaddesk.toml` and
/// (optionally) `config/credentials.toml`, relative to `base_dir`.
///
/// Does not copy defaults; `load_config()` does that first.
pub fn load_config_from(base_dir: &Path) -> Result<Config, ConfigError> {
    let config_dir = base_dir.join("config");

    // --- leaddesk.toml (required) ---
    let main_path = config_dir.join("leaddesk.toml");
    let main_text = read_file(&main_path)?;
    let file: LeaddeskFile = toml::from_str(&main_text).map_err(|e| ConfigError::ParseError {
        path: main_path.clone(),
        source: e,
    })?;

    // --- credentials.toml (optional) ---
    let credentials_path = config_dir.join("credentials.toml");
    let credentials = if credentials_path.exists() {
        let cred_text = read_file(&credentials_path)?;
        toml::from_str(&cred_text).map_err(|e| ConfigError::ParseError {
            path: credentials_path.clone(),
            source: e,
        })?
    } else {
        CredentialsConfig::default()
    };

    let config = Config {
        database_path: file.database.path,
        statistics: file.statistics,
        leads: file.leads,
        messages: file.messages,
        display: file.display,
        credentials,
    };

    validate(&config)?;

    Ok(config)
}

/// Populate `config/` with the files in `defaults/` it does not have yet,
/// returning the paths written in name order. `.example` templates are not
/// copied and files already in `config/` are never touched.
pub fn ensure_config_files(base_dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let defaults_dir = base_dir.join("defaults");
    let config_dir = base_dir.join("config");

    match (defaults_dir.is_dir(), config_dir.is_dir()) {
        (true, _) => {}
        (false, true) => return Ok(Vec::new()),
        (false, false) => {
            return Err(copy_error(format!(
                "neither defaults/ nor config/ exists under {}",
                base_dir.display()
            )))
        }
    }

    std::fs::create_dir_all(&config_dir)
        .map_err(|e| copy_error(format!("cannot create {}: {e}", config_dir.display())))?;

    let mut copied = Vec::new();
    for source in default_files(&defaults_dir)? {
        let Some(name) = source.file_name() else {
            continue;
        };
        let target = config_dir.join(name);
        if copy_if_missing(&source, &target)? {
            copied.push(target);
        }
    }
    Ok(copied)
}

fn copy_error(message: String) -> ConfigError {
    ConfigError::DefaultsCopyError { message }
}

/// Regular files in `dir` other than `.example` templates, sorted.
fn default_files(dir: &Path) -> Result<Vec<PathBuf>, ConfigError> {
    let list_error = |e: std::io::Error| copy_error(format!("cannot list {}: {e}", dir.display()));

    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(list_error)? {
        let path = entry.map_err(list_error)?.path();
        let template = path.extension().is_some_and(|ext| ext == "example");
        if path.is_file() && !template {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Copy `source` to `target` unless `target` exists. Returns whether a copy
/// was made.
fn copy_if_missing(source: &Path, target: &Path) -> Result<bool, ConfigError> {
    let created = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(target);
    let mut dest = match created {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => return Ok(false),
        Err(e) => return Err(copy_error(format!("cannot create {}: {e}", target.display()))),
    };
    let mut src = std::fs::File::open(source)
        .map_err(|e| copy_error(format!("cannot open {}: {e}", source.display())))?;
    std::io::copy(&mut src, &mut dest)
        .map_err(|e| copy_error(format!("cannot copy {}: {e}", source.display())))?;
    Ok(true)
}

/// Load config relative to the current working directory, populating
/// `config/` from `defaults/` first.
pub fn load_config() -> Result<Config, ConfigError> {
    let cwd = std::env::current_dir().map_err(|_| ConfigError::FileNotFound {
        path: PathBuf::from("."),
    })?;
    ensure_config_files(&cwd)?;
    load_config_from(&cwd)
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn read_file(path: &Path) -> Result<String, ConfigError> {
    std::fs::read_to_string(path).map_err(|_| ConfigError::FileNotFound {
        path: path.to_path_buf(),
    })
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_string(),
        message: message.into(),
    }
}

fn require_segment(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.trim().is_empty() || value.contains('/') {
        return Err(invalid(field, "must be a single non-empty collection id"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.database_path.trim().is_empty() {
        return Err(invalid("database.path", "must not be empty"));
    }

    let stats = &config.statistics;
    require_segment("statistics.collection", &stats.collection)?;
    if stats.field.trim().is_empty() {
        return Err(invalid("statistics.field", "must not be empty"));
    }
    if !stats.bucket_width.is_finite() || stats.bucket_width <= 0.0 {
        return Err(invalid(
            "statistics.bucket_width",
            format!("must be a positive number, got {}", stats.bucket_width),
        ));
    }
    if stats.bucket_count == 0 {
        return Err(invalid("statistics.bucket_count", "must be at least 1"));
    }

    require_segment("leads.collection", &config.leads.collection)?;
    if config.leads.order_field.trim().is_empty() {
        return Err(invalid("leads.order_field", "must not be empty"));
    }
    if config.leads.limit == 0 {
        return Err(invalid("leads.limit", "must be greater than 0"));
    }

    require_segment("messages.users_collection", &config.messages.users_collection)?;
    require_segment(
        "messages.inbound_collection",
        &config.messages.inbound_collection,
    )?;
    require_segment(
        "messages.outbound_collection",
        &config.messages.outbound_collection,
    )?;
    if config.messages.inbound_collection == config.messages.outbound_collection {
        return Err(invalid(
            "messages.outbound_collection",
            "must differ from messages.inbound_collection",
        ));
    }

    if let Some(email) = &config.credentials.operator_email {
        if !email.contains('@') {
            return Err(invalid(
                "credentials.operator_email",
                format!("`{email}` is not an email address"),
            ));
        }
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
