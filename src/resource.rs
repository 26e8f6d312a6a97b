//! Resource kinds, derived names, and the ordered provisioning plan.
//!
//! Every resource name is a pure function of the environment's base name and
//! the resource kind, so a plan can be rebuilt at any time without consulting
//! local state.
use crate::config::{ConfigError, EnvironmentConfig, WarehouseSettings};
use crate::tables::{TableDef, CHAT_TABLES};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Closed set of resource kinds, declared in stage order.
///
/// The derived `Ord` is the provisioning order: later kinds may consume
/// identifiers produced by earlier ones.
#[derive(
    Debug,
    Deserialize,
    Serialize,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Catalog,
    Schema,
    Volume,
    Warehouse,
    #[serde(alias = "vector-index")]
    VectorIndex,
    #[serde(alias = "db-instance")]
    DbInstance,
    #[serde(alias = "db-schema")]
    DbSchema,
    #[serde(alias = "db-table-set")]
    DbTableSet,
    App,
}

impl ResourceKind {
    /// All kinds in provisioning order.
    pub const ALL: [ResourceKind; 9] = [
        ResourceKind::Catalog,
        ResourceKind::Schema,
        ResourceKind::Volume,
        ResourceKind::Warehouse,
        ResourceKind::VectorIndex,
        ResourceKind::DbInstance,
        ResourceKind::DbSchema,
        ResourceKind::DbTableSet,
        ResourceKind::App,
    ];

    /// Return the stable string identifier used in JSON artifacts.
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Catalog => "catalog",
            ResourceKind::Schema => "schema",
            ResourceKind::Volume => "volume",
            ResourceKind::Warehouse => "warehouse",
            ResourceKind::VectorIndex => "vector_index",
            ResourceKind::DbInstance => "db_instance",
            ResourceKind::DbSchema => "db_schema",
            ResourceKind::DbTableSet => "db_table_set",
            ResourceKind::App => "app",
        }
    }

    /// Fixed suffix appended to the base name.
    pub fn suffix(&self) -> &'static str {
        match self {
            ResourceKind::Catalog => "_uc",
            ResourceKind::Schema => "_uc_schema",
            ResourceKind::Volume => "_uc_volume",
            ResourceKind::Warehouse => "-wh",
            ResourceKind::VectorIndex => "-vs",
            ResourceKind::DbInstance => "-pg-db",
            ResourceKind::DbSchema => "_pg_schema",
            ResourceKind::DbTableSet => "_pg_tables",
            ResourceKind::App => "-app",
        }
    }

    /// Provisioning stage (1-based) the kind belongs to.
    pub fn stage(&self) -> u8 {
        match self {
            ResourceKind::Catalog | ResourceKind::Schema | ResourceKind::Volume => 1,
            ResourceKind::Warehouse => 2,
            ResourceKind::VectorIndex => 3,
            ResourceKind::DbInstance => 4,
            ResourceKind::DbSchema | ResourceKind::DbTableSet => 5,
            ResourceKind::App => 6,
        }
    }

    /// The hard dependency whose failure blocks this kind, if any.
    pub fn hard_dependency(&self) -> Option<ResourceKind> {
        match self {
            ResourceKind::Schema | ResourceKind::Volume => Some(ResourceKind::Catalog),
            ResourceKind::DbSchema | ResourceKind::DbTableSet => Some(ResourceKind::DbInstance),
            _ => None,
        }
    }

    /// Kinds created asynchronously that pass through a starting state.
    pub fn starts_asynchronously(&self) -> bool {
        matches!(
            self,
            ResourceKind::Warehouse | ResourceKind::VectorIndex | ResourceKind::DbInstance
        )
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceKind {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().replace('-', "_");
        ResourceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == normalized)
            .ok_or_else(|| format!("unknown resource kind {raw:?}"))
    }
}

/// Derive the platform name of a resource from the base name.
pub fn derive_name(base_name: &str, kind: ResourceKind) -> String {
    format!("{base_name}{}", kind.suffix())
}

/// Subset of the plan selected on the command line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum Step {
    /// Workspace, compute, search, database instance, and app resources.
    Resources,
    /// Database schema and tables.
    Tables,
    /// Existence checks only.
    Verify,
    /// The full plan.
    #[default]
    All,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Resources => "resources",
            Step::Tables => "tables",
            Step::Verify => "verify",
            Step::All => "all",
        }
    }

    /// Whether a kind is part of this step.
    pub fn includes(&self, kind: ResourceKind) -> bool {
        match self {
            Step::Tables => matches!(kind, ResourceKind::DbSchema | ResourceKind::DbTableSet),
            Step::Resources => !Step::Tables.includes(kind),
            Step::Verify | Step::All => true,
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind-specific creation parameters.
#[derive(Debug, Clone, PartialEq)]
pub enum ResourceParams {
    Catalog {
        comment: String,
    },
    Schema {
        catalog: String,
    },
    Volume {
        catalog: String,
        schema: String,
    },
    Warehouse(WarehouseSettings),
    VectorIndex {
        endpoint_type: String,
    },
    DbInstance {
        capacity: String,
    },
    DbSchema {
        instance: String,
        database: String,
    },
    DbTableSet {
        instance: String,
        database: String,
        schema: String,
        tables: &'static [TableDef],
    },
    App {
        description: String,
    },
}

/// One declared resource.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResourceSpec {
    pub kind: ResourceKind,
    pub name: String,
    #[serde(skip)]
    pub params: ResourceParams,
}

impl ResourceSpec {
    /// Build the spec for a single kind of an environment.
    pub fn for_kind(config: &EnvironmentConfig, kind: ResourceKind) -> Self {
        let base = config.base_name.as_str();
        let name = derive_name(base, kind);
        let params = match kind {
            ResourceKind::Catalog => ResourceParams::Catalog {
                comment: format!("Catalog for {base} ({})", config.name),
            },
            ResourceKind::Schema => ResourceParams::Schema {
                catalog: derive_name(base, ResourceKind::Catalog),
            },
            ResourceKind::Volume => ResourceParams::Volume {
                catalog: derive_name(base, ResourceKind::Catalog),
                schema: derive_name(base, ResourceKind::Schema),
            },
            ResourceKind::Warehouse => ResourceParams::Warehouse(config.warehouse.clone()),
            ResourceKind::VectorIndex => ResourceParams::VectorIndex {
                endpoint_type: config.vector_search.endpoint_type.clone(),
            },
            ResourceKind::DbInstance => ResourceParams::DbInstance {
                capacity: config.database.capacity.clone(),
            },
            ResourceKind::DbSchema => ResourceParams::DbSchema {
                instance: derive_name(base, ResourceKind::DbInstance),
                database: config.database.name.clone(),
            },
            ResourceKind::DbTableSet => ResourceParams::DbTableSet {
                instance: derive_name(base, ResourceKind::DbInstance),
                database: config.database.name.clone(),
                schema: derive_name(base, ResourceKind::DbSchema),
                tables: CHAT_TABLES,
            },
            ResourceKind::App => ResourceParams::App {
                description: config
                    .app
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("App for {name}")),
            },
        };
        ResourceSpec { kind, name, params }
    }

    /// Name as addressed on the platform (catalog-qualified where needed).
    pub fn qualified_name(&self) -> String {
        match &self.params {
            ResourceParams::Schema { catalog } => format!("{catalog}.{}", self.name),
            ResourceParams::Volume { catalog, schema } => {
                format!("{catalog}.{schema}.{}", self.name)
            }
            ResourceParams::DbSchema { database, .. } => format!("{database}.{}", self.name),
            ResourceParams::DbTableSet { schema, .. } => format!("{schema}.*"),
            _ => self.name.clone(),
        }
    }
}

/// Derive the full plan in fixed dependency order.
pub fn plan_resources(config: &EnvironmentConfig) -> Vec<ResourceSpec> {
    ResourceKind::ALL
        .into_iter()
        .map(|kind| ResourceSpec::for_kind(config, kind))
        .collect()
}

/// Derive the plan restricted to one step.
pub fn plan_for_step(config: &EnvironmentConfig, step: Step) -> Vec<ResourceSpec> {
    plan_resources(config)
        .into_iter()
        .filter(|spec| step.includes(spec.kind))
        .collect()
}

/// Reject plans whose derived names collide.
pub fn ensure_unique_names(plan: &[ResourceSpec]) -> Result<(), ConfigError> {
    let mut seen: BTreeMap<&str, ResourceKind> = BTreeMap::new();
    for spec in plan {
        if let Some(first) = seen.insert(spec.name.as_str(), spec.kind) {
            return Err(ConfigError::NameCollision {
                name: spec.name.clone(),
                first,
                second: spec.kind,
            });
        }
    }
    Ok(())
}
