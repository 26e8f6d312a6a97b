//! REST calls against the workspace API.
use super::{class_for_error_code, ErrorClass, PlatformError};
use crate::credentials::{Credential, WorkspaceAccess};
use crate::resource::{ResourceKind, ResourceParams, ResourceSpec};
use crate::util::truncate_string;
use serde_json::{json, Value};
use std::time::Duration;
use ureq::Agent;

const UNITY_CATALOG: &str = "/api/2.1/unity-catalog";
const MAX_MESSAGE_BYTES: usize = 400;

/// How the existence of a resource is checked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    /// `GET path`; 404 means absent.
    Direct(String),
    /// `GET path` returns `{collection: [{name, ..}]}`; match by name.
    ListByName {
        path: String,
        collection: &'static str,
    },
}

/// A create call: path and JSON body.
#[derive(Debug, Clone, PartialEq)]
pub struct CreateRequest {
    pub path: String,
    pub body: Value,
}

/// Authenticated client for one command against one workspace.
pub struct WorkspaceSession {
    agent: Agent,
    host: String,
    credential: Credential,
}

impl WorkspaceSession {
    pub fn new(access: WorkspaceAccess, timeout: Duration) -> Self {
        let config = Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build();
        let agent: Agent = config.into();
        Self {
            agent,
            host: access.host.trim_end_matches('/').to_string(),
            credential: access.credential,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    fn get(&self, path: &str) -> Result<Value, PlatformError> {
        let auth = self.credential.bearer();
        let response = self
            .agent
            .get(&self.url(path))
            .header("Authorization", auth.as_str())
            .header("Accept", "application/json")
            .call()
            .map_err(transport_error)?;
        read_json(response)
    }

    fn post(&self, path: &str, body: &Value) -> Result<Value, PlatformError> {
        let auth = self.credential.bearer();
        let response = self
            .agent
            .post(&self.url(path))
            .header("Authorization", auth.as_str())
            .header("Accept", "application/json")
            .send_json(body)
            .map_err(transport_error)?;
        read_json(response)
    }

    /// The platform's description of the resource, `None` when absent.
    fn describe(&self, spec: &ResourceSpec) -> Result<Option<Value>, PlatformError> {
        match lookup_for(spec)? {
            Lookup::Direct(path) => match self.get(&path) {
                Ok(found) => Ok(Some(found)),
                Err(PlatformError::NotFound(_)) => Ok(None),
                Err(err) => Err(err),
            },
            Lookup::ListByName { path, collection } => {
                let listing = self.get(&path)?;
                Ok(find_by_name(&listing, collection, &spec.name).cloned())
            }
        }
    }

    pub fn find(&self, spec: &ResourceSpec) -> Result<Option<String>, PlatformError> {
        let found = self.describe(spec)?;
        Ok(found.map(|value| identifier_of(&value).unwrap_or_else(|| spec.qualified_name())))
    }

    pub fn ready(&self, spec: &ResourceSpec) -> Result<bool, PlatformError> {
        let found = self.describe(spec)?;
        if let Some(state) = found.as_ref().and_then(|value| lifecycle_state(spec.kind, value)) {
            tracing::debug!(kind = %spec.kind, name = %spec.name, state, "lifecycle state");
        }
        Ok(found.is_some_and(|value| is_ready(spec.kind, &value)))
    }

    pub fn create(&self, spec: &ResourceSpec) -> Result<String, PlatformError> {
        let request = create_request_for(spec)?;
        let created = self.post(&request.path, &request.body)?;
        Ok(identifier_of(&created).unwrap_or_else(|| spec.qualified_name()))
    }
}

/// Existence check for a REST-backed kind.
pub fn lookup_for(spec: &ResourceSpec) -> Result<Lookup, PlatformError> {
    let name = &spec.name;
    let lookup = match spec.kind {
        ResourceKind::Catalog => Lookup::Direct(format!("{UNITY_CATALOG}/catalogs/{name}")),
        ResourceKind::Schema => Lookup::Direct(format!(
            "{UNITY_CATALOG}/schemas/{}",
            spec.qualified_name()
        )),
        ResourceKind::Volume => Lookup::Direct(format!(
            "{UNITY_CATALOG}/volumes/{}",
            spec.qualified_name()
        )),
        ResourceKind::Warehouse => Lookup::ListByName {
            path: "/api/2.0/sql/warehouses".to_string(),
            collection: "warehouses",
        },
        ResourceKind::VectorIndex => {
            Lookup::Direct(format!("/api/2.0/vector-search/endpoints/{name}"))
        }
        ResourceKind::DbInstance => Lookup::Direct(format!("/api/2.0/database/instances/{name}")),
        ResourceKind::App => Lookup::Direct(format!("/api/2.0/apps/{name}")),
        ResourceKind::DbSchema | ResourceKind::DbTableSet => return Err(not_rest(spec.kind)),
    };
    Ok(lookup)
}

/// Create call for a REST-backed kind.
pub fn create_request_for(spec: &ResourceSpec) -> Result<CreateRequest, PlatformError> {
    let name = spec.name.as_str();
    let (path, body) = match &spec.params {
        ResourceParams::Catalog { comment } => (
            format!("{UNITY_CATALOG}/catalogs"),
            json!({ "name": name, "comment": comment }),
        ),
        ResourceParams::Schema { catalog } => (
            format!("{UNITY_CATALOG}/schemas"),
            json!({ "name": name, "catalog_name": catalog }),
        ),
        ResourceParams::Volume { catalog, schema } => (
            format!("{UNITY_CATALOG}/volumes"),
            json!({
                "name": name,
                "catalog_name": catalog,
                "schema_name": schema,
                "volume_type": "MANAGED",
            }),
        ),
        ResourceParams::Warehouse(settings) => (
            "/api/2.0/sql/warehouses".to_string(),
            json!({
                "name": name,
                "cluster_size": settings.cluster_size,
                "min_num_clusters": settings.min_num_clusters,
                "max_num_clusters": settings.max_num_clusters,
                "auto_stop_mins": settings.auto_stop_mins,
                "warehouse_type": settings.warehouse_type,
                "enable_photon": settings.enable_photon,
                "enable_serverless_compute": settings.enable_serverless_compute,
            }),
        ),
        ResourceParams::VectorIndex { endpoint_type } => (
            "/api/2.0/vector-search/endpoints".to_string(),
            json!({ "name": name, "endpoint_type": endpoint_type }),
        ),
        ResourceParams::DbInstance { capacity } => (
            "/api/2.0/database/instances".to_string(),
            json!({ "name": name, "capacity": capacity }),
        ),
        ResourceParams::App { description } => (
            "/api/2.0/apps".to_string(),
            json!({ "name": name, "description": description }),
        ),
        ResourceParams::DbSchema { .. } | ResourceParams::DbTableSet { .. } => {
            return Err(not_rest(spec.kind))
        }
    };
    Ok(CreateRequest { path, body })
}

fn not_rest(kind: ResourceKind) -> PlatformError {
    PlatformError::Invalid(format!("{kind} is not managed through the REST API"))
}

fn read_json(mut response: ureq::http::Response<ureq::Body>) -> Result<Value, PlatformError> {
    let status = response.status().as_u16();
    let body = response
        .body_mut()
        .read_to_string()
        .map_err(transport_error)?;
    if !(200..300).contains(&status) {
        return Err(classify_response(status, &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(&body).map_err(|err| {
        PlatformError::Unknown(format!("unreadable response ({status}): {err}"))
    })
}

/// Classify a non-success HTTP response.
pub fn classify_response(status: u16, body: &str) -> PlatformError {
    let parsed: Option<Value> = serde_json::from_str(body).ok();
    let field = |key: &str| {
        parsed
            .as_ref()
            .and_then(|value| value.get(key))
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let code = field("error_code");
    let detail = match field("message") {
        message if !message.is_empty() => message,
        _ => body.trim().to_string(),
    };
    let message = if code.is_empty() {
        format!("HTTP {status}: {detail}")
    } else {
        format!("HTTP {status} {code}: {detail}")
    };
    let message = truncate_string(&message, MAX_MESSAGE_BYTES);

    let class = match (status, class_for_error_code(&code)) {
        (401 | 403, _) => ErrorClass::Unauthorized,
        (_, Some(ErrorClass::NotFound)) | (404, _) => ErrorClass::NotFound,
        (_, Some(ErrorClass::Conflict)) | (409, _) => ErrorClass::Conflict,
        (429, _) | (500..=599, _) => ErrorClass::Transient,
        (400..=499, _) => ErrorClass::Invalid,
        _ => ErrorClass::Unknown,
    };
    PlatformError::with_class(class, message)
}

/// Classify a transport failure (no HTTP response).
pub fn transport_error(err: ureq::Error) -> PlatformError {
    match err {
        ureq::Error::Timeout(timeout) => PlatformError::Transient(format!("timeout: {timeout:?}")),
        ureq::Error::HostNotFound => PlatformError::Unavailable("host not found".to_string()),
        ureq::Error::ConnectionFailed => {
            PlatformError::Unavailable("connection failed".to_string())
        }
        ureq::Error::Io(io) if io.kind() == std::io::ErrorKind::ConnectionRefused => {
            PlatformError::Unavailable(format!("connection refused: {io}"))
        }
        ureq::Error::Io(io) => PlatformError::Transient(format!("i/o: {io}")),
        ureq::Error::StatusCode(status) => classify_response(status, ""),
        other => PlatformError::Unknown(other.to_string()),
    }
}

fn find_by_name<'a>(listing: &'a Value, collection: &str, name: &str) -> Option<&'a Value> {
    listing
        .get(collection)
        .and_then(Value::as_array)?
        .iter()
        .find(|item| item.get("name").and_then(Value::as_str) == Some(name))
}

/// Provisioning state reported for kinds that start asynchronously.
pub fn lifecycle_state(kind: ResourceKind, value: &Value) -> Option<&str> {
    let pointer = match kind {
        ResourceKind::DbInstance | ResourceKind::Warehouse => "/state",
        ResourceKind::VectorIndex => "/endpoint_status/state",
        _ => return None,
    };
    value.pointer(pointer).and_then(Value::as_str)
}

/// Whether a described resource can be used. A missing state counts as ready.
pub fn is_ready(kind: ResourceKind, value: &Value) -> bool {
    match lifecycle_state(kind, value) {
        None => true,
        Some(state) => match kind {
            ResourceKind::DbInstance => state == "AVAILABLE",
            // A stopped warehouse starts on the first query.
            ResourceKind::Warehouse => matches!(state, "RUNNING" | "STOPPED"),
            ResourceKind::VectorIndex => state == "ONLINE",
            _ => true,
        },
    }
}

/// Pick the most specific identifier the API returned.
pub fn identifier_of(value: &Value) -> Option<String> {
    ["id", "full_name", "uid", "name"]
        .iter()
        .find_map(|key| value.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}
