//! Platform resource client: the seam between the provisioner and the
//! workspace.
//!
//! Every resource kind maps to one existence check and one create call. The
//! REST-backed kinds go through [`rest::WorkspaceSession`]; the Postgres schema
//! and table set go through [`psql::PsqlRunner`].
pub mod psql;
pub mod rest;

use crate::resource::{ResourceKind, ResourceSpec};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Classified failure of one platform call.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PlatformError {
    #[error("unauthorized: {0}")]
    Unauthorized(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    Conflict(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error("platform unreachable: {0}")]
    Unavailable(String),
    #[error("{0}")]
    Unknown(String),
}

/// Error class, as reported in JSON output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    Unauthorized,
    NotFound,
    Conflict,
    Invalid,
    Transient,
    Unavailable,
    Unknown,
}

impl ErrorClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Unauthorized => "unauthorized",
            ErrorClass::NotFound => "not_found",
            ErrorClass::Conflict => "conflict",
            ErrorClass::Invalid => "invalid",
            ErrorClass::Transient => "transient",
            ErrorClass::Unavailable => "unavailable",
            ErrorClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PlatformError {
    pub fn class(&self) -> ErrorClass {
        match self {
            PlatformError::Unauthorized(_) => ErrorClass::Unauthorized,
            PlatformError::NotFound(_) => ErrorClass::NotFound,
            PlatformError::Conflict(_) => ErrorClass::Conflict,
            PlatformError::Invalid(_) => ErrorClass::Invalid,
            PlatformError::Transient(_) => ErrorClass::Transient,
            PlatformError::Unavailable(_) => ErrorClass::Unavailable,
            PlatformError::Unknown(_) => ErrorClass::Unknown,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, PlatformError::Transient(_))
    }

    /// Build an error of `class` carrying `message`.
    pub fn with_class(class: ErrorClass, message: impl Into<String>) -> Self {
        let message = message.into();
        match class {
            ErrorClass::Unauthorized => PlatformError::Unauthorized(message),
            ErrorClass::NotFound => PlatformError::NotFound(message),
            ErrorClass::Conflict => PlatformError::Conflict(message),
            ErrorClass::Invalid => PlatformError::Invalid(message),
            ErrorClass::Transient => PlatformError::Transient(message),
            ErrorClass::Unavailable => PlatformError::Unavailable(message),
            ErrorClass::Unknown => PlatformError::Unknown(message),
        }
    }
}

/// Map a platform error code such as `CATALOG_DOES_NOT_EXIST`.
pub fn class_for_error_code(code: &str) -> Option<ErrorClass> {
    let code = code.trim().to_ascii_uppercase();
    if code.is_empty() {
        return None;
    }
    if code.ends_with("DOES_NOT_EXIST") || code == "NOT_FOUND" {
        return Some(ErrorClass::NotFound);
    }
    if code.ends_with("ALREADY_EXISTS") {
        return Some(ErrorClass::Conflict);
    }
    match code.as_str() {
        "PERMISSION_DENIED" | "UNAUTHENTICATED" => Some(ErrorClass::Unauthorized),
        "INVALID_PARAMETER_VALUE" | "BAD_REQUEST" | "INVALID_STATE" | "MALFORMED_REQUEST" => {
            Some(ErrorClass::Invalid)
        }
        "TEMPORARILY_UNAVAILABLE" | "REQUEST_LIMIT_EXCEEDED" | "RESOURCE_EXHAUSTED"
        | "DEADLINE_EXCEEDED" | "INTERNAL_ERROR" => Some(ErrorClass::Transient),
        _ => None,
    }
}

/// Classify free-form diagnostic text, as printed by the CLI or psql.
pub fn classify_text(text: &str) -> ErrorClass {
    let lower = text.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|needle| lower.contains(needle));
    if has(&["already exists", "already_exists", "duplicate"]) {
        ErrorClass::Conflict
    } else if has(&["does not exist", "does_not_exist", "not found"]) {
        ErrorClass::NotFound
    } else if has(&[
        "permission denied",
        "unauthorized",
        "unauthenticated",
        "invalid access token",
        "403",
        "401",
    ]) {
        ErrorClass::Unauthorized
    } else if has(&[
        "could not resolve host",
        "name or service not known",
        "connection refused",
        "no such host",
    ]) {
        ErrorClass::Unavailable
    } else if has(&[
        "timeout",
        "timed out",
        "temporarily unavailable",
        "too many requests",
        "connection reset",
        "starting",
        "429",
        "503",
    ]) {
        ErrorClass::Transient
    } else if has(&["syntax error", "invalid"]) {
        ErrorClass::Invalid
    } else {
        ErrorClass::Unknown
    }
}

/// Existence checks and creates for every resource kind.
pub trait Platform {
    /// Look the resource up. `Ok(None)` when it does not exist, otherwise the
    /// identifier the platform reports for it.
    fn find(&self, spec: &ResourceSpec) -> Result<Option<String>, PlatformError>;

    /// Whether the resource exists. A not-found answer is `Ok(false)`.
    fn exists(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        self.find(spec).map(|found| found.is_some())
    }

    /// Whether the resource is usable by its dependents. Kinds without a
    /// provisioning state are ready once they exist.
    fn ready(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        self.exists(spec)
    }

    /// Create the resource and return its identifier.
    fn create(&self, spec: &ResourceSpec) -> Result<String, PlatformError>;
}

/// Production platform: REST for workspace resources, psql for Postgres.
pub struct DatabricksPlatform {
    rest: rest::WorkspaceSession,
    sql: psql::PsqlRunner,
}

impl DatabricksPlatform {
    pub fn new(rest: rest::WorkspaceSession, sql: psql::PsqlRunner) -> Self {
        Self { rest, sql }
    }

    fn uses_sql(kind: ResourceKind) -> bool {
        matches!(kind, ResourceKind::DbSchema | ResourceKind::DbTableSet)
    }
}

impl Platform for DatabricksPlatform {
    fn find(&self, spec: &ResourceSpec) -> Result<Option<String>, PlatformError> {
        tracing::debug!(kind = %spec.kind, name = %spec.name, "check");
        if Self::uses_sql(spec.kind) {
            self.sql.find(spec)
        } else {
            self.rest.find(spec)
        }
    }

    fn ready(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        if Self::uses_sql(spec.kind) {
            self.sql.exists(spec)
        } else {
            self.rest.ready(spec)
        }
    }

    fn create(&self, spec: &ResourceSpec) -> Result<String, PlatformError> {
        tracing::info!(kind = %spec.kind, name = %spec.qualified_name(), "create");
        if Self::uses_sql(spec.kind) {
            self.sql.create(spec)
        } else {
            self.rest.create(spec)
        }
    }
}
