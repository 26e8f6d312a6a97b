//! Environment configuration loading and validation.
//!
//! The configuration source is a JSON mapping from environment name to entry.
//! It is read once per command; an invalid file fails the command before any
//! platform call is made.
use crate::resource::{ensure_unique_names, plan_resources, ResourceKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const DEFAULT_CONFIG_FILE: &str = "environments.json";
pub const CONFIG_PATH_ENV: &str = "ENVPROV_CONFIG";
pub const DEFAULT_TOKEN_ENV: &str = "DATABRICKS_TOKEN";

/// Longest base name whose derived app name fits the 30 character limit.
pub const MAX_BASE_NAME_LEN: usize = 26;

/// Keys from older setup files that named resources explicitly.
const DERIVED_NAME_KEYS: &[&str] = &[
    "databricks_app_name",
    "lakebase_database_name",
    "unity_catalog",
    "unity_catalog_schema",
    "unity_catalog_volume",
    "warehouse_name",
    "vector_search_database_name",
    "lakebase_schema",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no configuration file found (looked in {})", .searched.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    Missing { searched: Vec<PathBuf> },

    #[error("read config {}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("parse config {}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("environment `{name}` not found in {} (available: {})", .path.display(), .available.join(", "))]
    UnknownEnvironment {
        name: String,
        path: PathBuf,
        available: Vec<String>,
    },

    #[error("environment `{environment}`: invalid base_name {base_name:?}: {reason}")]
    InvalidBaseName {
        environment: String,
        base_name: String,
        reason: String,
    },

    #[error("environment `{environment}`: {field} {reason}")]
    InvalidField {
        environment: String,
        field: &'static str,
        reason: String,
    },

    #[error("derived name `{name}` is shared by {first} and {second}")]
    NameCollision {
        name: String,
        first: ResourceKind,
        second: ResourceKind,
    },

    #[error("environment `{environment}`: no workspace host (set workspace_url or a profile with a host)")]
    MissingHost { environment: String },

    #[error("environment `{environment}`: no token in ${token_env} or profile {}", .profile.as_deref().unwrap_or("DEFAULT"))]
    MissingCredential {
        environment: String,
        token_env: String,
        profile: Option<String>,
    },
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct WarehouseSettings {
    pub cluster_size: String,
    pub min_num_clusters: u32,
    pub max_num_clusters: u32,
    pub auto_stop_mins: u32,
    pub warehouse_type: String,
    pub enable_photon: bool,
    pub enable_serverless_compute: bool,
}

impl Default for WarehouseSettings {
    fn default() -> Self {
        Self {
            cluster_size: "Small".to_string(),
            min_num_clusters: 1,
            max_num_clusters: 1,
            auto_stop_mins: 10,
            warehouse_type: "PRO".to_string(),
            enable_photon: true,
            enable_serverless_compute: true,
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct DatabaseSettings {
    /// Instance capacity unit.
    pub capacity: String,
    /// Postgres database that holds the schema.
    pub name: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            capacity: "CU_1".to_string(),
            name: "databricks_postgres".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct VectorSearchSettings {
    pub endpoint_type: String,
}

impl Default for VectorSearchSettings {
    fn default() -> Self {
        Self {
            endpoint_type: "STANDARD".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq, Default)]
#[serde(default)]
pub struct AppSettings {
    pub description: Option<String>,
}

/// Retry and readiness tuning, in milliseconds.
#[derive(Debug, Deserialize, Serialize, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: u32,
    pub ready_checks: u32,
    pub ready_interval_ms: u64,
    /// Polling for warehouses, vector endpoints and database instances,
    /// which take minutes to start.
    pub startup_checks: u32,
    pub startup_interval_ms: u64,
    pub request_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 500,
            max_delay_ms: 8_000,
            multiplier: 2,
            ready_checks: 5,
            ready_interval_ms: 2_000,
            startup_checks: 90,
            startup_interval_ms: 10_000,
            request_timeout_ms: 60_000,
        }
    }
}

/// One entry of the mapping file, as written by operators.
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct EnvironmentEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default)]
    pub base_name: String,
    #[serde(default)]
    pub workspace_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_env: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub psql_command: Option<String>,
    #[serde(default)]
    pub warehouse: WarehouseSettings,
    #[serde(default)]
    pub database: DatabaseSettings,
    #[serde(default)]
    pub vector_search: VectorSearchSettings,
    #[serde(default)]
    pub app: AppSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub skip: Vec<ResourceKind>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

impl EnvironmentEntry {
    fn legacy_str(&self, key: &str) -> Option<&str> {
        self.extra
            .get(key)
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }

    /// Workspace URL, falling back to the older `databricks_host` key.
    pub fn resolved_workspace_url(&self) -> String {
        let url = self.workspace_url.trim();
        if !url.is_empty() {
            return url.trim_end_matches('/').to_string();
        }
        self.legacy_str("databricks_host")
            .map(|host| host.trim_end_matches('/').to_string())
            .unwrap_or_default()
    }

    /// CLI profile, falling back to the older `databricks_profile` key.
    pub fn resolved_profile(&self) -> Option<String> {
        self.profile
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .or_else(|| self.legacy_str("databricks_profile"))
            .map(str::to_string)
    }
}

/// Validated, immutable configuration for one environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EnvironmentConfig {
    pub name: String,
    pub base_name: String,
    pub workspace_url: String,
    pub profile: Option<String>,
    pub token_env: String,
    pub psql_command: Option<String>,
    pub warehouse: WarehouseSettings,
    pub database: DatabaseSettings,
    pub vector_search: VectorSearchSettings,
    pub app: AppSettings,
    pub retry: RetrySettings,
    pub skip: Vec<ResourceKind>,
}

impl EnvironmentConfig {
    /// Validate an entry and build the immutable config.
    pub fn from_entry(name: &str, entry: &EnvironmentEntry) -> Result<Self, ConfigError> {
        if let Some(declared) = entry.name.as_deref() {
            if declared != name {
                return Err(ConfigError::InvalidField {
                    environment: name.to_string(),
                    field: "name",
                    reason: format!("{declared:?} does not match its key"),
                });
            }
        }
        let base_name = entry.base_name.trim().to_string();
        validate_base_name(&base_name).map_err(|reason| ConfigError::InvalidBaseName {
            environment: name.to_string(),
            base_name: base_name.clone(),
            reason,
        })?;
        if entry.retry.max_attempts == 0 {
            return Err(ConfigError::InvalidField {
                environment: name.to_string(),
                field: "retry.max_attempts",
                reason: "must be at least 1".to_string(),
            });
        }
        let workspace_url = entry.resolved_workspace_url();
        if !workspace_url.is_empty()
            && !workspace_url.starts_with("https://")
            && !workspace_url.starts_with("http://")
        {
            return Err(ConfigError::InvalidField {
                environment: name.to_string(),
                field: "workspace_url",
                reason: format!("{workspace_url:?} is not an http(s) URL"),
            });
        }
        let token_env = entry
            .token_env
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .unwrap_or(DEFAULT_TOKEN_ENV)
            .to_string();

        let config = EnvironmentConfig {
            name: name.to_string(),
            base_name,
            workspace_url,
            profile: entry.resolved_profile(),
            token_env,
            psql_command: entry
                .psql_command
                .as_deref()
                .map(str::trim)
                .filter(|value| !value.is_empty())
                .map(str::to_string),
            warehouse: entry.warehouse.clone(),
            database: entry.database.clone(),
            vector_search: entry.vector_search.clone(),
            app: entry.app.clone(),
            retry: entry.retry.clone(),
            skip: entry.skip.clone(),
        };
        ensure_unique_names(&plan_resources(&config))?;
        Ok(config)
    }
}

/// Check a base name against the platform naming rules.
pub fn validate_base_name(base_name: &str) -> Result<(), String> {
    if base_name.is_empty() {
        return Err("must be non-empty".to_string());
    }
    if base_name.len() > MAX_BASE_NAME_LEN {
        return Err(format!(
            "must be at most {MAX_BASE_NAME_LEN} characters (got {})",
            base_name.len()
        ));
    }
    let pattern = Regex::new(r"^[a-z0-9][a-z0-9_-]*$").map_err(|err| err.to_string())?;
    if !pattern.is_match(base_name) {
        return Err(
            "must be lowercase letters, digits, hyphens, or underscores, starting with a letter or digit"
                .to_string(),
        );
    }
    Ok(())
}

/// Errors and warnings for one entry, as reported by `validate`.
#[derive(Debug, Default, Clone, Serialize)]
pub struct ValidationReport {
    pub environment: String,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl ValidationReport {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Collect every problem with an entry instead of stopping at the first.
pub fn validate_entry(name: &str, entry: &EnvironmentEntry) -> ValidationReport {
    let mut report = ValidationReport {
        environment: name.to_string(),
        ..ValidationReport::default()
    };
    if let Err(err) = EnvironmentConfig::from_entry(name, entry) {
        report.errors.push(err.to_string());
    }
    let base_name = entry.base_name.trim();
    if base_name.contains('_') {
        report.warnings.push(format!(
            "base_name {base_name:?} contains '_'; app names only accept hyphens"
        ));
    }
    let workspace_url = entry.resolved_workspace_url();
    if workspace_url.is_empty() && entry.resolved_profile().is_none() {
        report
            .errors
            .push("workspace_url is required when no profile is set".to_string());
    } else if workspace_url.starts_with("http://") {
        report
            .warnings
            .push("workspace_url should start with https://".to_string());
    }
    for key in entry.extra.keys() {
        if DERIVED_NAME_KEYS.contains(&key.as_str()) {
            report.warnings.push(format!(
                "`{key}` is ignored; resource names derive from base_name"
            ));
        } else if key == "databricks_token" {
            report.warnings.push(
                "`databricks_token` is ignored; provide the token through token_env".to_string(),
            );
        } else if key != "databricks_host" && key != "databricks_profile" {
            report.warnings.push(format!("unknown key `{key}` is ignored"));
        }
    }
    if !entry.skip.is_empty() {
        let skipped: Vec<&str> = entry.skip.iter().map(ResourceKind::as_str).collect();
        report
            .warnings
            .push(format!("resources skipped by config: {}", skipped.join(", ")));
    }
    report
}

/// The parsed mapping file.
#[derive(Debug, Clone)]
pub struct ConfigSource {
    path: PathBuf,
    environments: BTreeMap<String, EnvironmentEntry>,
}

impl ConfigSource {
    /// Locate the mapping file: explicit path, `$ENVPROV_CONFIG`, the working
    /// directory, then the user config directory.
    pub fn locate(explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }
        if let Some(path) = std::env::var_os(CONFIG_PATH_ENV) {
            return Ok(PathBuf::from(path));
        }
        let mut searched = vec![PathBuf::from(DEFAULT_CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            searched.push(dir.join("envprov").join(DEFAULT_CONFIG_FILE));
        }
        searched
            .iter()
            .find(|path| path.is_file())
            .cloned()
            .ok_or(ConfigError::Missing { searched })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let environments: BTreeMap<String, EnvironmentEntry> = serde_json::from_slice(&bytes)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        Ok(Self {
            path: path.to_path_buf(),
            environments,
        })
    }

    pub fn locate_and_load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let path = Self::locate(explicit)?;
        Self::load(&path)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn names(&self) -> Vec<String> {
        self.environments.keys().cloned().collect()
    }

    pub fn entries(&self) -> impl Iterator<Item = (&String, &EnvironmentEntry)> {
        self.environments.iter()
    }

    pub fn entry(&self, name: &str) -> Result<&EnvironmentEntry, ConfigError> {
        self.environments
            .get(name)
            .ok_or_else(|| ConfigError::UnknownEnvironment {
                name: name.to_string(),
                path: self.path.clone(),
                available: self.names(),
            })
    }

    /// Load and validate one named environment.
    pub fn load_environment(&self, name: &str) -> Result<EnvironmentConfig, ConfigError> {
        EnvironmentConfig::from_entry(name, self.entry(name)?)
    }
}

#[cfg(test)]
pub(crate) fn test_environment(name: &str, base_name: &str) -> EnvironmentConfig {
    let entry = EnvironmentEntry {
        base_name: base_name.to_string(),
        workspace_url: "https://example.cloud.databricks.com".to_string(),
        ..EnvironmentEntry::default()
    };
    EnvironmentConfig::from_entry(name, &entry).expect("valid test environment")
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
