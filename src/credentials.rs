//! Workspace host and token resolution.
use crate::config::{ConfigError, EnvironmentConfig};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

pub const CLI_CONFIG_ENV: &str = "DATABRICKS_CONFIG_FILE";
const DEFAULT_PROFILE: &str = "DEFAULT";

/// A bearer token. Never printed; cleared when dropped.
#[derive(Clone)]
pub struct Credential {
    secret: String,
}

impl Credential {
    pub fn new(secret: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
        }
    }

    /// Value for the `Authorization` header.
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.secret)
    }

    pub(crate) fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Credential(<redacted>)")
    }
}

impl Drop for Credential {
    fn drop(&mut self) {
        let mut bytes = std::mem::take(&mut self.secret).into_bytes();
        bytes.iter_mut().for_each(|byte| *byte = 0);
        std::hint::black_box(&bytes);
    }
}

/// Host and credential for one command.
#[derive(Debug)]
pub struct WorkspaceAccess {
    pub host: String,
    pub credential: Credential,
}

pub type Profiles = BTreeMap<String, BTreeMap<String, String>>;

/// Parse the CLI's INI-style profile file.
pub fn parse_profiles(text: &str) -> Profiles {
    let mut profiles = Profiles::new();
    let mut current: Option<String> = None;
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if let Some(section) = line.strip_prefix('[').and_then(|rest| rest.strip_suffix(']')) {
            let section = section.trim().to_string();
            profiles.entry(section.clone()).or_default();
            current = Some(section);
            continue;
        }
        let (Some(section), Some((key, value))) = (current.as_ref(), line.split_once('=')) else {
            continue;
        };
        if let Some(entries) = profiles.get_mut(section) {
            entries.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    profiles
}

fn profile_file_path() -> Option<PathBuf> {
    if let Some(path) = std::env::var_os(CLI_CONFIG_ENV) {
        return Some(PathBuf::from(path));
    }
    dirs::home_dir().map(|home| home.join(".databrickscfg"))
}

fn read_profiles() -> Profiles {
    let Some(path) = profile_file_path() else {
        return Profiles::new();
    };
    match std::fs::read_to_string(&path) {
        Ok(text) => parse_profiles(&text),
        Err(err) => {
            tracing::debug!(path = %path.display(), error = %err, "no CLI profile file");
            Profiles::new()
        }
    }
}

/// Resolve host and token from the process environment and profile file.
pub fn resolve(config: &EnvironmentConfig) -> Result<WorkspaceAccess, ConfigError> {
    resolve_with(config, |name| std::env::var(name).ok(), &read_profiles())
}

/// Resolution with injectable sources.
pub fn resolve_with(
    config: &EnvironmentConfig,
    lookup_env: impl Fn(&str) -> Option<String>,
    profiles: &Profiles,
) -> Result<WorkspaceAccess, ConfigError> {
    let profile_name = config.profile.as_deref().unwrap_or(DEFAULT_PROFILE);
    let profile = profiles.get(profile_name);
    let from_profile = |key: &str| {
        profile
            .and_then(|entries| entries.get(key))
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
    };

    let host = if config.workspace_url.is_empty() {
        from_profile("host")
            .map(|host| host.trim_end_matches('/').to_string())
            .ok_or_else(|| ConfigError::MissingHost {
                environment: config.name.clone(),
            })?
    } else {
        config.workspace_url.clone()
    };

    let token = lookup_env(&config.token_env)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty());
    let token = match token {
        Some(token) => token,
        None => from_profile("token").ok_or_else(|| ConfigError::MissingCredential {
            environment: config.name.clone(),
            token_env: config.token_env.clone(),
            profile: config.profile.clone(),
        })?,
    };

    Ok(WorkspaceAccess {
        host,
        credential: Credential::new(token),
    })
}
