//! `.env` rendering for the hosted app.
//!
//! Only derived names and non-secret settings are written; the token is left
//! for the app's runtime to supply.
use crate::config::EnvironmentConfig;
use crate::resource::{derive_name, ResourceKind};

pub fn render_env_file(config: &EnvironmentConfig) -> String {
    let name = |kind| derive_name(&config.base_name, kind);
    let mut lines = vec![
        format!("# Environment: {}", config.name),
        format!("# Base name: {}", config.base_name),
        "# Generated by envprov; the access token is not written here.".to_string(),
        String::new(),
        format!("ENVIRONMENT={}", config.name),
        format!("BASE_NAME={}", config.base_name),
        "DATABASE_TYPE=lakebase_postgres".to_string(),
        String::new(),
        "# Workspace".to_string(),
        format!("DATABRICKS_HOST={}", config.workspace_url),
    ];
    if let Some(profile) = &config.profile {
        lines.push(format!("DATABRICKS_PROFILE={profile}"));
    }
    lines.extend([
        format!("DATABRICKS_APP_NAME={}", name(ResourceKind::App)),
        format!("DATABRICKS_WAREHOUSE_NAME={}", name(ResourceKind::Warehouse)),
        format!(
            "DATABRICKS_VECTOR_SEARCH_ENDPOINT={}",
            name(ResourceKind::VectorIndex)
        ),
        String::new(),
        "# Managed Postgres".to_string(),
        format!("LAKEBASE_INSTANCE={}", name(ResourceKind::DbInstance)),
        format!("LAKEBASE_DATABASE={}", config.database.name),
        format!("LAKEBASE_SCHEMA={}", name(ResourceKind::DbSchema)),
        String::new(),
        "# Unity Catalog".to_string(),
        format!("UNITY_CATALOG={}", name(ResourceKind::Catalog)),
        format!("UNITY_CATALOG_SCHEMA={}", name(ResourceKind::Schema)),
        format!("UNITY_CATALOG_VOLUME={}", name(ResourceKind::Volume)),
    ]);
    let mut rendered = lines.join("\n");
    rendered.push('\n');
    rendered
}
