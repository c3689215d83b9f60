//! Provider configuration files
//!
//! Each provider lives in its own JSON document inside the config directory.
//! The file stem is the provider id:
//!
//! ```json
//! {"id": "ops-mail", "type": "email", "enabled": true, "config": {"host": "smtp.example.com", "port": 587, "from": "relay@example.com"}}
//! ```

use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::traits::ProviderKind;

pub const CONFIG_EXTENSION: &str = "json";

static PROVIDER_ID: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^[a-z0-9-]+$").unwrap());

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("config id {id:?} does not match file name {stem:?}")]
    IdMismatch { id: String, stem: String },
}

#[derive(Deserialize)]
struct RawRecord {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    enabled: bool,
    #[serde(default)]
    config: Value,
}

/// A validated provider configuration with its content checksum
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderRecord {
    pub id: String,
    pub kind: ProviderKind,
    pub enabled: bool,
    pub config: Map<String, Value>,
    pub checksum: String,
}

impl ProviderRecord {
    pub fn new(id: &str, kind: ProviderKind, enabled: bool, config: Map<String, Value>) -> Result<Self, ConfigError> {
        validate_id(id)?;
        let checksum = compute_checksum(id, kind, enabled, &config);
        Ok(Self {
            id: id.to_string(),
            kind,
            enabled,
            config,
            checksum,
        })
    }

    /// Parse and validate a JSON document
    pub fn from_slice(bytes: &[u8]) -> Result<Self, ConfigError> {
        let raw: RawRecord = serde_json::from_slice(bytes)?;

        if raw.id.is_empty() {
            return Err(ConfigError::Invalid("id is required".into()));
        }
        if raw.kind.is_empty() {
            return Err(ConfigError::Invalid("type is required".into()));
        }
        let kind: ProviderKind = raw.kind.parse().map_err(ConfigError::Invalid)?;
        let config = match raw.config {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                return Err(ConfigError::Invalid(format!(
                    "config must be an object, got {}",
                    json_type(&other)
                )))
            }
        };

        Self::new(&raw.id, kind, raw.enabled, config)
    }
}

fn validate_id(id: &str) -> Result<(), ConfigError> {
    if !PROVIDER_ID.is_match(id) {
        return Err(ConfigError::Invalid(format!(
            "id {:?} must contain only lowercase letters, digits and hyphens",
            id
        )));
    }
    Ok(())
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Lowercase hex SHA-256 over the key-sorted JSON of `{id, type, enabled, config}`
pub fn compute_checksum(id: &str, kind: ProviderKind, enabled: bool, config: &Map<String, Value>) -> String {
    let document = serde_json::json!({
        "id": id,
        "type": kind.as_str(),
        "enabled": enabled,
        "config": Value::Object(config.clone()),
    });
    let canonical = canonicalize(&document).to_string();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Rebuild objects with keys inserted in sorted order, recursively
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::new();
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Whether a path names a provider config file
pub fn is_config_file(path: &Path) -> bool {
    path.extension().and_then(|e| e.to_str()) == Some(CONFIG_EXTENSION)
}

/// Provider id implied by a config file name
pub fn provider_id_from_path(path: &Path) -> Option<String> {
    if !is_config_file(path) {
        return None;
    }
    path.file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Read, parse and validate one config file
pub fn load_record(path: &Path) -> Result<ProviderRecord, ConfigError> {
    let bytes = std::fs::read(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let record = ProviderRecord::from_slice(&bytes)?;

    if let Some(stem) = provider_id_from_path(path) {
        if stem != record.id {
            return Err(ConfigError::IdMismatch { id: record.id, stem });
        }
    }

    Ok(record)
}

/// Result of loading every config file in a directory
#[derive(Debug, Default)]
pub struct DirectoryScan {
    pub records: Vec<(PathBuf, ProviderRecord)>,
    pub failures: Vec<(PathBuf, ConfigError)>,
}

/// Load every `*.json` file in `dir`, sorted by file name
pub fn load_directory(dir: &Path) -> Result<DirectoryScan, ConfigError> {
    let entries = std::fs::read_dir(dir).map_err(|source| ConfigError::Io {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut paths: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| path.is_file() && is_config_file(path))
        .collect();
    paths.sort();

    let mut scan = DirectoryScan::default();
    for path in paths {
        match load_record(&path) {
            Ok(record) => scan.records.push((path, record)),
            Err(e) => scan.failures.push((path, e)),
        }
    }

    tracing::debug!(
        dir = %dir.display(),
        loaded = scan.records.len(),
        failed = scan.failures.len(),
        "Scanned provider config directory"
    );
    Ok(scan)
}
