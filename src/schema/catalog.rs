use std::cell::RefCell;
use std::collections::BTreeMap;

use rusqlite::{Connection, OptionalExtension};
use tracing::{debug, info};

use super::GraphSchema;
use crate::error::{GraphError, Result};
use crate::store::{self, ColumnInfo, SCHEMA_TABLE};

/// What to do when declaring a schema whose name is taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeclareMode {
    /// Fail with `SchemaConflict`.
    CreateNew,
    /// Drop the existing schema, then declare.
    Replace,
}

/// What to do when dropping a schema that does not exist.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropMode {
    /// Fail with `SchemaNotFound`.
    MustExist,
    /// Treat as a no-op.
    IgnoreMissing,
}

/// Durable registry of declared graph schemas.
///
/// Implementors provide raw persistence and table descriptions; the
/// provided methods implement the declaration and drop contracts on top.
pub trait SchemaCatalog {
    /// Loads a schema by case-insensitive name.
    fn load(&self, name: &str) -> Result<Option<GraphSchema>>;

    /// Persists a schema, overwriting any entry with the same name.
    fn save(&self, schema: &GraphSchema) -> Result<()>;

    /// Removes a schema, reporting whether it existed.
    fn delete(&self, name: &str) -> Result<bool>;

    /// Names of every declared schema, sorted.
    fn names(&self) -> Result<Vec<String>>;

    /// Columns of a backing table, or `None` if it does not exist.
    fn describe_table(&self, table: &str) -> Result<Option<Vec<ColumnInfo>>>;

    /// Validates, binds and persists `schema`.
    ///
    /// Returns the schema as stored, with inferred property types filled in.
    fn declare(&self, mut schema: GraphSchema, mode: DeclareMode) -> Result<GraphSchema> {
        let existing = self.load(&schema.name)?;
        if existing.is_some() && mode == DeclareMode::CreateNew {
            return Err(GraphError::SchemaConflict { graph: schema.name });
        }
        schema.bind_tables(|table| self.describe_table(table))?;
        schema.validate()?;
        if existing.is_some() {
            self.delete(&schema.name)?;
            debug!(graph = %schema.name, "replacing property graph");
        }
        self.save(&schema)?;
        info!(
            graph = %schema.name,
            vertex_labels = schema.vertices.len(),
            edge_labels = schema.edges.len(),
            "declared property graph"
        );
        Ok(schema)
    }

    /// Drops a schema. Returns `false` only for a tolerated missing schema.
    fn drop_schema(&self, name: &str, mode: DropMode) -> Result<bool> {
        if self.delete(name)? {
            info!(graph = name, "dropped property graph");
            return Ok(true);
        }
        match mode {
            DropMode::MustExist => Err(GraphError::SchemaNotFound {
                graph: name.to_string(),
            }),
            DropMode::IgnoreMissing => {
                debug!(graph = name, "drop of missing property graph ignored");
                Ok(false)
            }
        }
    }

    /// Loads a schema or fails with `SchemaNotFound`.
    fn resolve(&self, name: &str) -> Result<GraphSchema> {
        self.load(name)?.ok_or_else(|| GraphError::SchemaNotFound {
            graph: name.to_string(),
        })
    }

    /// True when a schema with this name is declared.
    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.load(name)?.is_some())
    }
}

/// Catalog stored as JSON documents in a metadata table of the database.
///
/// The metadata table is created on first declaration, inside whatever
/// transaction the connection has open.
pub struct SqliteCatalog<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteCatalog<'c> {
    /// Catalog over `conn`.
    pub fn new(conn: &'c Connection) -> Self {
        Self { conn }
    }

    fn has_table(&self) -> Result<bool> {
        store::table_exists(self.conn, SCHEMA_TABLE)
    }
}

impl SchemaCatalog for SqliteCatalog<'_> {
    fn load(&self, name: &str) -> Result<Option<GraphSchema>> {
        if !self.has_table()? {
            return Ok(None);
        }
        let sql = format!(
            "SELECT definition FROM {} WHERE name = ?1",
            store::quote_ident(SCHEMA_TABLE)
        );
        let definition: Option<String> = self
            .conn
            .query_row(&sql, [name], |row| row.get(0))
            .optional()?;
        definition
            .map(|text| {
                serde_json::from_str(&text).map_err(|err| {
                    GraphError::invalid_definition(name, format!("stored definition is corrupt: {err}"))
                })
            })
            .transpose()
    }

    fn save(&self, schema: &GraphSchema) -> Result<()> {
        let table = store::quote_ident(SCHEMA_TABLE);
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (
                name TEXT PRIMARY KEY COLLATE NOCASE,
                definition TEXT NOT NULL,
                declared_at TEXT NOT NULL DEFAULT CURRENT_TIMESTAMP
            )"
        ))?;
        let definition = serde_json::to_string(schema)
            .map_err(|err| GraphError::invalid_definition(&schema.name, err.to_string()))?;
        self.conn.execute(
            &format!("INSERT OR REPLACE INTO {table} (name, definition) VALUES (?1, ?2)"),
            [schema.name.as_str(), definition.as_str()],
        )?;
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        if !self.has_table()? {
            return Ok(false);
        }
        let removed = self.conn.execute(
            &format!(
                "DELETE FROM {} WHERE name = ?1",
                store::quote_ident(SCHEMA_TABLE)
            ),
            [name],
        )?;
        Ok(removed > 0)
    }

    fn names(&self) -> Result<Vec<String>> {
        if !self.has_table()? {
            return Ok(Vec::new());
        }
        let mut stmt = self.conn.prepare(&format!(
            "SELECT name FROM {} ORDER BY name",
            store::quote_ident(SCHEMA_TABLE)
        ))?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn describe_table(&self, table: &str) -> Result<Option<Vec<ColumnInfo>>> {
        store::table_columns(self.conn, table)
    }
}

/// Catalog held in memory, with table descriptions supplied up front.
///
/// Useful for compiling queries without a database.
#[derive(Default)]
pub struct InMemoryCatalog {
    schemas: RefCell<BTreeMap<String, GraphSchema>>,
    tables: BTreeMap<String, Vec<ColumnInfo>>,
}

impl InMemoryCatalog {
    /// Empty catalog that knows no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a table description.
    pub fn with_table(mut self, table: impl Into<String>, columns: Vec<ColumnInfo>) -> Self {
        self.tables
            .insert(table.into().to_ascii_lowercase(), columns);
        self
    }
}

impl SchemaCatalog for InMemoryCatalog {
    fn load(&self, name: &str) -> Result<Option<GraphSchema>> {
        Ok(self
            .schemas
            .borrow()
            .get(&name.to_ascii_lowercase())
            .cloned())
    }

    fn save(&self, schema: &GraphSchema) -> Result<()> {
        self.schemas
            .borrow_mut()
            .insert(schema.name.to_ascii_lowercase(), schema.clone());
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<bool> {
        Ok(self
            .schemas
            .borrow_mut()
            .remove(&name.to_ascii_lowercase())
            .is_some())
    }

    fn names(&self) -> Result<Vec<String>> {
        Ok(self
            .schemas
            .borrow()
            .values()
            .map(|schema| schema.name.clone())
            .collect())
    }

    fn describe_table(&self, table: &str) -> Result<Option<Vec<ColumnInfo>>> {
        Ok(self.tables.get(&table.to_ascii_lowercase()).cloned())
    }
}
