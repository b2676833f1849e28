//! Relational access to the tables backing a graph schema.
//!
//! Everything here is plain SQL against SQLite: batched scans, key lookups,
//! row counts and single-row mutations. Identifiers come from validated
//! schema definitions and are always quoted; values are always bound.

use rusqlite::types::{Null, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use crate::error::{GraphError, Result};
use crate::query::value::Value;
use crate::schema::{EdgeLabelDefinition, PropertyType, VertexLabelDefinition};

/// Name of the table persisting declared schemas.
pub const SCHEMA_TABLE: &str = "relgraph_schemas";

/// Column description reported by the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnInfo {
    /// Column name.
    pub name: String,
    /// Declared SQL type, possibly empty.
    pub declared_type: String,
    /// Column carries a NOT NULL constraint.
    pub not_null: bool,
    /// Column is part of the primary key.
    pub primary_key: bool,
}

/// One row of a vertex table.
#[derive(Clone, Debug, PartialEq)]
pub struct VertexRecord {
    /// Key column values.
    pub key: Vec<Value>,
    /// Exposed property values in declaration order.
    pub props: Vec<Value>,
}

/// One row of an edge table.
#[derive(Clone, Debug, PartialEq)]
pub struct EdgeRecord {
    /// Composite key values.
    pub key: Vec<Value>,
    /// Source reference values.
    pub source: Vec<Value>,
    /// Destination reference values.
    pub destination: Vec<Value>,
    /// Exposed property values in declaration order.
    pub props: Vec<Value>,
}

/// Which endpoint columns of an edge table a lookup matches on.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EdgeEnd {
    /// Source reference columns.
    Source,
    /// Destination reference columns.
    Destination,
}

/// Double-quotes an identifier, doubling embedded quotes.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn column_list<'a>(columns: impl IntoIterator<Item = &'a String>) -> String {
    columns
        .into_iter()
        .map(|c| quote_ident(c))
        .collect::<Vec<_>>()
        .join(", ")
}

fn key_predicate<'a>(columns: impl IntoIterator<Item = &'a String>, first_param: usize) -> String {
    columns
        .into_iter()
        .enumerate()
        .map(|(idx, c)| format!("{} = ?{}", quote_ident(c), first_param + idx))
        .collect::<Vec<_>>()
        .join(" AND ")
}

impl ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::from(Null),
            Value::Bool(v) => ToSqlOutput::from(*v),
            Value::Int(v) => ToSqlOutput::from(*v),
            Value::Float(v) => ToSqlOutput::from(*v),
            Value::String(v) => ToSqlOutput::from(v.as_str()),
            Value::Date(_) => ToSqlOutput::from(self.to_string()),
        })
    }
}

/// Decodes a stored value according to the declared property type.
///
/// `context` names the label and property for error messages and is only
/// evaluated on failure.
pub fn decode<F>(raw: ValueRef<'_>, ty: PropertyType, context: F) -> Result<Value>
where
    F: Fn() -> String,
{
    let mismatch = |found: &str| {
        GraphError::type_mismatch(context(), format!("expected {}, found {found}", ty.name()))
    };
    let text = |bytes: &[u8]| {
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| mismatch("invalid UTF-8 text"))
    };
    match (ty, raw) {
        (_, ValueRef::Null) => Ok(Value::Null),
        (_, ValueRef::Blob(_)) => Err(mismatch("blob")),
        (PropertyType::Any, ValueRef::Integer(v)) => Ok(Value::Int(v)),
        (PropertyType::Any, ValueRef::Real(v)) => Ok(Value::Float(v)),
        (PropertyType::Any, ValueRef::Text(t)) => text(t).map(Value::String),
        (PropertyType::String, ValueRef::Text(t)) => text(t).map(Value::String),
        (PropertyType::String, ValueRef::Integer(v)) => Ok(Value::String(v.to_string())),
        (PropertyType::String, ValueRef::Real(v)) => Ok(Value::String(v.to_string())),
        (PropertyType::Integer, ValueRef::Integer(v)) => Ok(Value::Int(v)),
        (PropertyType::Integer, ValueRef::Real(v)) if v.fract() == 0.0 => Ok(Value::Int(v as i64)),
        (PropertyType::Integer, ValueRef::Real(v)) => Err(mismatch(&v.to_string())),
        (PropertyType::Integer, ValueRef::Text(t)) => {
            let s = text(t)?;
            s.trim().parse::<i64>().map(Value::Int).map_err(|_| mismatch(&format!("'{s}'")))
        }
        (PropertyType::Float, ValueRef::Integer(v)) => Ok(Value::Float(v as f64)),
        (PropertyType::Float, ValueRef::Real(v)) => Ok(Value::Float(v)),
        (PropertyType::Float, ValueRef::Text(t)) => {
            let s = text(t)?;
            s.trim().parse::<f64>().map(Value::Float).map_err(|_| mismatch(&format!("'{s}'")))
        }
        (PropertyType::Boolean, ValueRef::Integer(v)) => Ok(Value::Bool(v != 0)),
        (PropertyType::Boolean, ValueRef::Real(v)) => Ok(Value::Bool(v != 0.0)),
        (PropertyType::Boolean, ValueRef::Text(t)) => {
            let s = text(t)?;
            match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" => Ok(Value::Bool(true)),
                "false" | "0" => Ok(Value::Bool(false)),
                _ => Err(mismatch(&format!("'{s}'"))),
            }
        }
        (PropertyType::Date, ValueRef::Text(t)) => {
            let s = text(t)?;
            Value::parse_date(&s)
                .map(Value::Date)
                .ok_or_else(|| mismatch(&format!("'{s}'")))
        }
        (PropertyType::Date, ValueRef::Integer(v)) => Err(mismatch(&v.to_string())),
        (PropertyType::Date, ValueRef::Real(v)) => Err(mismatch(&v.to_string())),
    }
}

/// Describes a table's columns, or `None` if the table does not exist.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Option<Vec<ColumnInfo>>> {
    let mut stmt = conn.prepare_cached(
        "SELECT name, type, \"notnull\", pk FROM pragma_table_info(?1) ORDER BY cid",
    )?;
    let columns = stmt
        .query_map([table], |row| {
            Ok(ColumnInfo {
                name: row.get(0)?,
                declared_type: row.get::<_, Option<String>>(1)?.unwrap_or_default(),
                not_null: row.get::<_, i64>(2)? != 0,
                primary_key: row.get::<_, i64>(3)? != 0,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(if columns.is_empty() { None } else { Some(columns) })
}

/// True when a table with this name exists.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool> {
    let found = conn
        .query_row(
            "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1",
            [table],
            |_| Ok(()),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Number of rows in a table.
pub fn count_rows(conn: &Connection, table: &str) -> Result<u64> {
    let sql = format!("SELECT COUNT(*) FROM {}", quote_ident(table));
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Rows whose key has at least one NULL column.
pub fn count_null_keys(conn: &Connection, table: &str, key: &[String]) -> Result<u64> {
    let predicate = key
        .iter()
        .map(|c| format!("{} IS NULL", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" OR ");
    let sql = format!("SELECT COUNT(*) FROM {} WHERE {predicate}", quote_ident(table));
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Distinct non-null key values that occur on more than one row.
pub fn count_duplicate_keys(conn: &Connection, table: &str, key: &[String]) -> Result<u64> {
    let cols = column_list(key);
    let not_null = key
        .iter()
        .map(|c| format!("{} IS NOT NULL", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "SELECT COUNT(*) FROM (SELECT 1 FROM {} WHERE {not_null} GROUP BY {cols} HAVING COUNT(*) > 1)",
        quote_ident(table)
    );
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Edge rows whose reference columns match no row of the vertex table.
pub fn count_dangling(
    conn: &Connection,
    edge_table: &str,
    columns: &[String],
    vertex_table: &str,
    vertex_key: &[String],
) -> Result<u64> {
    let not_null = columns
        .iter()
        .map(|c| format!("e.{} IS NOT NULL", quote_ident(c)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let join = columns
        .iter()
        .zip(vertex_key)
        .map(|(e, v)| format!("v.{} = e.{}", quote_ident(v), quote_ident(e)))
        .collect::<Vec<_>>()
        .join(" AND ");
    let sql = format!(
        "SELECT COUNT(*) FROM {} AS e WHERE {not_null} AND NOT EXISTS (SELECT 1 FROM {} AS v WHERE {join})",
        quote_ident(edge_table),
        quote_ident(vertex_table)
    );
    let count: i64 = conn.query_row(&sql, [], |row| row.get(0))?;
    Ok(count.max(0) as u64)
}

/// Inserts one row.
pub fn insert_row(conn: &Connection, table: &str, columns: &[String], values: &[Value]) -> Result<usize> {
    let placeholders = (1..=values.len())
        .map(|idx| format!("?{idx}"))
        .collect::<Vec<_>>()
        .join(", ");
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({placeholders})",
        quote_ident(table),
        column_list(columns)
    );
    Ok(conn.prepare_cached(&sql)?.execute(params_from_iter(values))?)
}

/// Deletes every row whose `columns` equal `values`.
pub fn delete_rows(conn: &Connection, table: &str, columns: &[String], values: &[Value]) -> Result<usize> {
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        quote_ident(table),
        key_predicate(columns, 1)
    );
    Ok(conn.prepare_cached(&sql)?.execute(params_from_iter(values))?)
}

/// Prepared SQL for reading one vertex label's table.
#[derive(Clone, Debug)]
pub struct VertexAccess {
    label: String,
    key_len: usize,
    prop_names: Vec<String>,
    prop_types: Vec<PropertyType>,
    first_page_sql: String,
    next_page_sql: String,
    lookup_sql: String,
}

impl VertexAccess {
    /// Builds the statements for `def`.
    pub fn new(def: &VertexLabelDefinition) -> Self {
        let cols = column_list(def.key.iter().chain(def.properties.iter().map(|p| &p.column)));
        let table = quote_ident(&def.table);
        Self {
            label: def.label.clone(),
            key_len: def.key.len(),
            prop_names: def.properties.iter().map(|p| p.name.clone()).collect(),
            prop_types: def.properties.iter().map(|p| p.property_type()).collect(),
            first_page_sql: format!("SELECT rowid, {cols} FROM {table} ORDER BY rowid LIMIT ?1"),
            next_page_sql: format!(
                "SELECT rowid, {cols} FROM {table} WHERE rowid > ?1 ORDER BY rowid LIMIT ?2"
            ),
            lookup_sql: format!(
                "SELECT {cols} FROM {table} WHERE {}",
                key_predicate(&def.key, 1)
            ),
        }
    }

    /// Reads up to `limit` rows in rowid order, starting after `after` or
    /// at the first row when `after` is `None`.
    ///
    /// Rowids may be zero or negative when an `INTEGER PRIMARY KEY` aliases
    /// them, so the first page carries no lower bound.
    pub fn scan_batch(
        &self,
        conn: &Connection,
        after: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(i64, VertexRecord)>> {
        let mut stmt;
        let mut rows = match after {
            None => {
                stmt = conn.prepare_cached(&self.first_page_sql)?;
                stmt.query(params![limit as i64])?
            }
            Some(after) => {
                stmt = conn.prepare_cached(&self.next_page_sql)?;
                stmt.query(params![after, limit as i64])?
            }
        };
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let rowid: i64 = row.get(0)?;
            out.push((rowid, self.decode_row(row, 1)?));
        }
        Ok(out)
    }

    /// Rows whose key equals `key`.
    pub fn lookup(&self, conn: &Connection, key: &[Value]) -> Result<Vec<VertexRecord>> {
        if key.iter().any(Value::is_null) {
            return Ok(Vec::new());
        }
        let mut stmt = conn.prepare_cached(&self.lookup_sql)?;
        let mut rows = stmt.query(params_from_iter(key))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(self.decode_row(row, 0)?);
        }
        Ok(out)
    }

    fn decode_row(&self, row: &rusqlite::Row<'_>, offset: usize) -> Result<VertexRecord> {
        let mut key = Vec::with_capacity(self.key_len);
        for idx in 0..self.key_len {
            key.push(decode(row.get_ref(offset + idx)?, PropertyType::Any, || {
                format!("{} key", self.label)
            })?);
        }
        let mut props = Vec::with_capacity(self.prop_types.len());
        for (idx, ty) in self.prop_types.iter().enumerate() {
            let raw = row.get_ref(offset + self.key_len + idx)?;
            props.push(decode(raw, *ty, || {
                format!("{}.{}", self.label, self.prop_names[idx])
            })?);
        }
        Ok(VertexRecord { key, props })
    }
}

/// Prepared SQL for reading one edge label's table.
#[derive(Clone, Debug)]
pub struct EdgeAccess {
    label: String,
    key_len: usize,
    source_len: usize,
    destination_len: usize,
    prop_names: Vec<String>,
    prop_types: Vec<PropertyType>,
    by_source_sql: String,
    by_destination_sql: String,
}

impl EdgeAccess {
    /// Builds the statements for `def`.
    pub fn new(def: &EdgeLabelDefinition) -> Self {
        let cols = column_list(
            def.key
                .iter()
                .chain(def.source.columns.iter())
                .chain(def.destination.columns.iter())
                .chain(def.properties.iter().map(|p| &p.column)),
        );
        let table = quote_ident(&def.table);
        Self {
            label: def.label.clone(),
            key_len: def.key.len(),
            source_len: def.source.columns.len(),
            destination_len: def.destination.columns.len(),
            prop_names: def.properties.iter().map(|p| p.name.clone()).collect(),
            prop_types: def.properties.iter().map(|p| p.property_type()).collect(),
            by_source_sql: format!(
                "SELECT {cols} FROM {table} WHERE {} ORDER BY rowid",
                key_predicate(&def.source.columns, 1)
            ),
            by_destination_sql: format!(
                "SELECT {cols} FROM {table} WHERE {} ORDER BY rowid",
                key_predicate(&def.destination.columns, 1)
            ),
        }
    }

    /// Edges whose `end` columns equal `key`.
    pub fn adjacent(&self, conn: &Connection, end: EdgeEnd, key: &[Value]) -> Result<Vec<EdgeRecord>> {
        if key.iter().any(Value::is_null) {
            return Ok(Vec::new());
        }
        let sql = match end {
            EdgeEnd::Source => &self.by_source_sql,
            EdgeEnd::Destination => &self.by_destination_sql,
        };
        let mut stmt = conn.prepare_cached(sql)?;
        let mut rows = stmt.query(params_from_iter(key))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(self.decode_row(row)?);
        }
        Ok(out)
    }

    fn decode_row(&self, row: &rusqlite::Row<'_>) -> Result<EdgeRecord> {
        let mut idx = 0;
        let mut dynamic = |count: usize, what: &str| -> Result<Vec<Value>> {
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(decode(row.get_ref(idx)?, PropertyType::Any, || {
                    format!("{} {what}", self.label)
                })?);
                idx += 1;
            }
            Ok(values)
        };
        let key = dynamic(self.key_len, "key")?;
        let source = dynamic(self.source_len, "source key")?;
        let destination = dynamic(self.destination_len, "destination key")?;
        let offset = self.key_len + self.source_len + self.destination_len;
        let mut props = Vec::with_capacity(self.prop_types.len());
        for (pos, ty) in self.prop_types.iter().enumerate() {
            props.push(decode(row.get_ref(offset + pos)?, *ty, || {
                format!("{}.{}", self.label, self.prop_names[pos])
            })?);
        }
        Ok(EdgeRecord {
            key,
            source,
            destination,
            props,
        })
    }
}
