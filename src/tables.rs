//! Postgres table set backing the chat application.
//!
//! Statements are rendered with `IF NOT EXISTS` so re-applying the set is
//! harmless; the whole set is applied in one transaction.

/// One column of a table definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: &'static str,
    pub sql_type: &'static str,
    pub constraints: &'static str,
}

/// A foreign key from `column` to `references_table(references_column)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ForeignKey {
    pub column: &'static str,
    pub references_table: &'static str,
    pub references_column: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TableDef {
    pub name: &'static str,
    pub columns: &'static [ColumnDef],
    pub foreign_keys: &'static [ForeignKey],
}

const fn col(
    name: &'static str,
    sql_type: &'static str,
    constraints: &'static str,
) -> ColumnDef {
    ColumnDef {
        name,
        sql_type,
        constraints,
    }
}

const fn fk(
    column: &'static str,
    references_table: &'static str,
    references_column: &'static str,
) -> ForeignKey {
    ForeignKey {
        column,
        references_table,
        references_column,
    }
}

/// Tables in creation order; referenced tables come first.
pub const CHAT_TABLES: &[TableDef] = &[
    TableDef {
        name: "users",
        columns: &[
            col("uid", "VARCHAR(255)", "PRIMARY KEY"),
            col("email", "VARCHAR(255)", "NOT NULL UNIQUE"),
            col("display_name", "VARCHAR(255)", ""),
            col("password_hash", "VARCHAR(255)", "NOT NULL"),
            col("created_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
            col("updated_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[],
    },
    TableDef {
        name: "conversations",
        columns: &[
            col("id", "VARCHAR(255)", "PRIMARY KEY"),
            col("user_id", "VARCHAR(255)", "NOT NULL"),
            col("title", "VARCHAR(500)", ""),
            col("created_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
            col("updated_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[fk("user_id", "users", "uid")],
    },
    TableDef {
        name: "messages",
        columns: &[
            col("id", "VARCHAR(255)", "PRIMARY KEY"),
            col("conversation_id", "VARCHAR(255)", "NOT NULL"),
            col("role", "VARCHAR(50)", "NOT NULL"),
            col("content", "TEXT", "NOT NULL"),
            col("created_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[fk("conversation_id", "conversations", "id")],
    },
    TableDef {
        name: "user_sessions",
        columns: &[
            col("id", "VARCHAR(255)", "PRIMARY KEY"),
            col("user_id", "VARCHAR(255)", "NOT NULL"),
            col("session_token", "VARCHAR(500)", "NOT NULL"),
            col("expires_at", "TIMESTAMP", "NOT NULL"),
            col("created_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[fk("user_id", "users", "uid")],
    },
    TableDef {
        name: "conversation_analytics",
        columns: &[
            col("id", "VARCHAR(255)", "PRIMARY KEY"),
            col("conversation_id", "VARCHAR(255)", "NOT NULL"),
            col("message_count", "INTEGER", "DEFAULT 0"),
            col("total_tokens", "INTEGER", "DEFAULT 0"),
            col("avg_response_time", "FLOAT", "DEFAULT 0"),
            col("created_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
            col("updated_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[fk("conversation_id", "conversations", "id")],
    },
    TableDef {
        name: "system_config",
        columns: &[
            col("key", "VARCHAR(255)", "PRIMARY KEY"),
            col("value", "TEXT", "NOT NULL"),
            col("description", "TEXT", ""),
            col("updated_at", "TIMESTAMP", "DEFAULT CURRENT_TIMESTAMP"),
        ],
        foreign_keys: &[],
    },
];

/// Quote a Postgres identifier.
pub fn quote_ident(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Quote a Postgres string literal.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn create_schema_sql(schema: &str) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {};", quote_ident(schema))
}

pub fn schema_exists_sql(schema: &str) -> String {
    format!(
        "SELECT 1 FROM information_schema.schemata WHERE schema_name = {};",
        quote_literal(schema)
    )
}

pub fn list_tables_sql(schema: &str) -> String {
    format!(
        "SELECT table_name FROM information_schema.tables WHERE table_schema = {};",
        quote_literal(schema)
    )
}

/// Render one `CREATE TABLE IF NOT EXISTS` statement.
pub fn create_table_sql(schema: &str, table: &TableDef) -> String {
    let schema = quote_ident(schema);
    let mut lines: Vec<String> = table
        .columns
        .iter()
        .map(|column| {
            let mut line = format!("{} {}", quote_ident(column.name), column.sql_type);
            if !column.constraints.is_empty() {
                line.push(' ');
                line.push_str(column.constraints);
            }
            line
        })
        .collect();
    lines.extend(table.foreign_keys.iter().map(|key| {
        format!(
            "FOREIGN KEY ({}) REFERENCES {schema}.{}({})",
            quote_ident(key.column),
            quote_ident(key.references_table),
            quote_ident(key.references_column)
        )
    }));
    format!(
        "CREATE TABLE IF NOT EXISTS {schema}.{} (\n    {}\n);",
        quote_ident(table.name),
        lines.join(",\n    ")
    )
}

/// Render the whole table set as a single transaction.
pub fn create_table_set_sql(schema: &str, tables: &[TableDef]) -> String {
    let mut sql = String::from("BEGIN;\n");
    for table in tables {
        sql.push_str(&create_table_sql(schema, table));
        sql.push('\n');
    }
    sql.push_str("COMMIT;");
    sql
}
