//! Postgres statements run through `databricks psql`.
use super::{classify_text, ErrorClass, PlatformError};
use crate::config::ConfigError;
use crate::credentials::Credential;
use crate::resource::{ResourceParams, ResourceSpec};
use crate::tables::{
    create_schema_sql, create_table_set_sql, list_tables_sql, schema_exists_sql, TableDef,
};
use crate::util::truncate_string;
use std::collections::BTreeSet;
use std::process::{Command, Stdio};

const DEFAULT_COMMAND: &[&str] = &["databricks", "psql"];
const MAX_MESSAGE_BYTES: usize = 400;

/// Runs SQL against a database instance through the workspace CLI.
#[derive(Debug)]
pub struct PsqlRunner {
    command: Vec<String>,
    profile: Option<String>,
    host: String,
    credential: Option<Credential>,
}

impl PsqlRunner {
    /// `command` overrides `databricks psql` and is split like a shell would.
    /// Without a profile the host and token are passed through the child's
    /// environment.
    pub fn new(
        environment: &str,
        command: Option<&str>,
        profile: Option<String>,
        host: String,
        credential: Credential,
    ) -> Result<Self, ConfigError> {
        let command = match command {
            Some(raw) => {
                let words =
                    shell_words::split(raw).map_err(|err| ConfigError::InvalidField {
                        environment: environment.to_string(),
                        field: "psql_command",
                        reason: err.to_string(),
                    })?;
                if words.is_empty() {
                    return Err(ConfigError::InvalidField {
                        environment: environment.to_string(),
                        field: "psql_command",
                        reason: "is empty".to_string(),
                    });
                }
                words
            }
            None => DEFAULT_COMMAND.iter().map(|word| word.to_string()).collect(),
        };
        let credential = profile.is_none().then_some(credential);
        Ok(Self {
            command,
            profile,
            host,
            credential,
        })
    }

    /// Full argv for one statement.
    pub fn argv(&self, instance: &str, database: &str, sql: &str) -> Vec<String> {
        let mut argv = self.command.clone();
        let has_profile = argv
            .iter()
            .any(|arg| arg == "-p" || arg == "--profile" || arg.starts_with("--profile="));
        if let (Some(profile), false) = (&self.profile, has_profile) {
            argv.push("-p".to_string());
            argv.push(profile.clone());
        }
        argv.push(instance.to_string());
        argv.push("--".to_string());
        for arg in ["-d", database, "-X", "-q", "-t", "-A", "-v", "ON_ERROR_STOP=1", "-c", sql] {
            argv.push(arg.to_string());
        }
        argv
    }

    fn run(&self, instance: &str, database: &str, sql: &str) -> Result<String, PlatformError> {
        let mut argv = self.argv(instance, database, sql);
        let program = argv.remove(0);
        let resolved = which::which(&program).map_err(|err| {
            PlatformError::Unknown(format!("{program} not found on PATH: {err}"))
        })?;
        let mut command = Command::new(resolved);
        command
            .args(&argv)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        if let Some(credential) = &self.credential {
            command.env("DATABRICKS_HOST", &self.host);
            command.env("DATABRICKS_TOKEN", credential.secret());
        }
        tracing::debug!(program = %program, instance, database, "psql");
        let output = command
            .output()
            .map_err(|err| PlatformError::Unknown(format!("spawn {program}: {err}")))?;
        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        if output.status.success() {
            return Ok(stdout);
        }
        let stderr = String::from_utf8_lossy(&output.stderr);
        let detail = match stderr.trim() {
            "" => stdout.trim().to_string(),
            text => text.to_string(),
        };
        Err(classify_failure(output.status.code(), &detail))
    }

    /// A missing instance, database or schema reads as absent.
    pub fn exists(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        match self.query_presence(spec) {
            Err(PlatformError::NotFound(message)) => {
                tracing::debug!(kind = %spec.kind, name = %spec.name, %message, "not found");
                Ok(false)
            }
            other => other,
        }
    }

    pub fn find(&self, spec: &ResourceSpec) -> Result<Option<String>, PlatformError> {
        Ok(self.exists(spec)?.then(|| spec.qualified_name()))
    }

    fn query_presence(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        match &spec.params {
            ResourceParams::DbSchema { instance, database } => {
                let stdout = self.run(instance, database, &schema_exists_sql(&spec.name))?;
                Ok(schema_listed(&stdout))
            }
            ResourceParams::DbTableSet {
                instance,
                database,
                schema,
                tables,
            } => {
                let stdout = self.run(instance, database, &list_tables_sql(schema))?;
                let missing = missing_tables(&stdout, tables);
                if !missing.is_empty() {
                    tracing::debug!(schema = %schema, missing = ?missing, "tables missing");
                }
                Ok(missing.is_empty())
            }
            _ => Err(not_sql(spec)),
        }
    }

    pub fn create(&self, spec: &ResourceSpec) -> Result<String, PlatformError> {
        match &spec.params {
            ResourceParams::DbSchema { instance, database } => {
                self.run(instance, database, &create_schema_sql(&spec.name))?;
                Ok(spec.qualified_name())
            }
            ResourceParams::DbTableSet {
                instance,
                database,
                schema,
                tables,
            } => {
                self.run(instance, database, &create_table_set_sql(schema, tables))?;
                Ok(format!("{schema} ({} tables)", tables.len()))
            }
            _ => Err(not_sql(spec)),
        }
    }
}

fn not_sql(spec: &ResourceSpec) -> PlatformError {
    PlatformError::Invalid(format!("{} is not managed through psql", spec.kind))
}

/// Classify a failed psql run from its exit code and diagnostics.
pub fn classify_failure(code: Option<i32>, detail: &str) -> PlatformError {
    let message = truncate_string(detail, MAX_MESSAGE_BYTES);
    // No exit code means the child was killed by a signal.
    let class = match code {
        Some(_) => classify_text(detail),
        None => ErrorClass::Unknown,
    };
    PlatformError::with_class(class, message)
}

/// `-t -A` output of the schemata probe.
fn schema_listed(stdout: &str) -> bool {
    stdout.lines().any(|line| line.trim() == "1")
}

/// Tables of `tables` absent from a `-t -A` table listing.
pub fn missing_tables(stdout: &str, tables: &[TableDef]) -> Vec<&'static str> {
    let found: BTreeSet<&str> = stdout
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect();
    tables
        .iter()
        .map(|table| table.name)
        .filter(|name| !found.contains(name))
        .collect()
}
