//! Sessions: one SQLite connection, one open transaction at a time.
//!
//! A [`Session`] starts a transaction as soon as it is opened and keeps one
//! open until it is closed: [`Session::commit`] and [`Session::rollback`]
//! end the current transaction and immediately begin the next. Schema
//! declarations, mutations and queries all run inside it.

use std::cell::Cell;
use std::fmt;
use std::time::Duration;

use rusqlite::{Connection, OpenFlags, Params};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{GraphError, Result};
use crate::query::ast::{PatternQuery, Statement};
use crate::query::compiler::compile;
use crate::query::cursor::Cursor;
use crate::query::executor::RowSource;
use crate::query::parser::{parse_query, parse_statement};
use crate::query::plan::CompiledQuery;
use crate::query::value::Value;
use crate::schema::{
    DeclareMode, DropMode, EdgeLabelDefinition, GraphSchema, LabelRef, PropertyDef,
    SchemaCatalog, SqliteCatalog, VertexLabelDefinition,
};
use crate::store;

/// Lifecycle state of a session's transaction.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TxState {
    /// Constructed but never opened.
    Idle,
    /// A transaction is open and usable.
    Active,
    /// An execution failure poisoned the transaction; only rollback helps.
    Aborted,
    /// Closed; may be opened again.
    Closed,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TxState::Idle => "idle",
            TxState::Active => "active",
            TxState::Aborted => "aborted",
            TxState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Row counts per label of one graph.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct GraphStats {
    /// Graph name.
    pub graph: String,
    /// `(label, rows)` for every vertex label, in declaration order.
    pub vertices: Vec<(String, u64)>,
    /// `(label, rows)` for every edge label, in declaration order.
    pub edges: Vec<(String, u64)>,
}

impl GraphStats {
    /// Total vertex rows.
    pub fn vertex_count(&self) -> u64 {
        self.vertices.iter().map(|(_, n)| n).sum()
    }

    /// Total edge rows.
    pub fn edge_count(&self) -> u64 {
        self.edges.iter().map(|(_, n)| n).sum()
    }
}

/// Integrity problem found by [`Session::verify_schema`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum IntegrityIssue {
    /// The backing table no longer exists.
    MissingTable {
        /// Label backed by the table.
        label: String,
        /// Table name.
        table: String,
    },
    /// Rows whose key contains NULL.
    NullKeys {
        /// Label.
        label: String,
        /// Offending rows.
        rows: u64,
    },
    /// Key values shared by more than one row.
    DuplicateKeys {
        /// Label.
        label: String,
        /// Distinct duplicated key values.
        keys: u64,
    },
    /// Edge rows whose reference matches no vertex.
    DanglingReferences {
        /// Edge label.
        label: String,
        /// `source` or `destination`.
        end: &'static str,
        /// Offending rows.
        rows: u64,
    },
}

impl fmt::Display for IntegrityIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IntegrityIssue::MissingTable { label, table } => {
                write!(f, "{label}: table '{table}' does not exist")
            }
            IntegrityIssue::NullKeys { label, rows } => {
                write!(f, "{label}: {rows} row(s) with a NULL key")
            }
            IntegrityIssue::DuplicateKeys { label, keys } => {
                write!(f, "{label}: {keys} duplicated key value(s)")
            }
            IntegrityIssue::DanglingReferences { label, end, rows } => {
                write!(f, "{label}: {rows} dangling {end} reference(s)")
            }
        }
    }
}

/// Result of checking a graph's tables against its declared invariants.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    /// Graph name.
    pub graph: String,
    /// Problems found; empty when the data is consistent.
    pub issues: Vec<IntegrityIssue>,
}

impl IntegrityReport {
    /// True when no issue was found.
    pub fn is_clean(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A connection to the backing store with exactly one open transaction.
///
/// Dropping an open session closes it, rolling back uncommitted work.
pub struct Session {
    config: Config,
    conn: Option<Connection>,
    tx: Cell<TxState>,
    default_graph: Option<String>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("location", &self.config.location())
            .field("state", &self.tx.get())
            .field("default_graph", &self.default_graph)
            .finish()
    }
}

impl Session {
    /// Creates an unopened session.
    pub fn new(config: Config) -> Self {
        Self {
            config,
            conn: None,
            tx: Cell::new(TxState::Idle),
            default_graph: None,
        }
    }

    /// Creates and opens a session.
    pub fn connect(config: Config) -> Result<Self> {
        let mut session = Self::new(config);
        session.open()?;
        Ok(session)
    }

    /// Opens the connection and begins the first transaction.
    pub fn open(&mut self) -> Result<()> {
        if self.conn.is_some() {
            return Err(GraphError::InvalidState("session is already open".into()));
        }
        let location = self.config.location();
        let connection_error = |source: rusqlite::Error| GraphError::Connection {
            location: location.clone(),
            source,
        };
        let conn = match &self.config.database {
            Some(path) => {
                let mut flags = if self.config.read_only {
                    OpenFlags::SQLITE_OPEN_READ_ONLY
                } else {
                    OpenFlags::SQLITE_OPEN_READ_WRITE
                };
                if self.config.create_if_missing && !self.config.read_only {
                    flags |= OpenFlags::SQLITE_OPEN_CREATE;
                }
                flags |= OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX;
                Connection::open_with_flags(path, flags)
            }
            None => Connection::open_in_memory(),
        }
        .map_err(connection_error)?;
        conn.busy_timeout(Duration::from_millis(self.config.busy_timeout_ms))
            .map_err(connection_error)?;
        conn.execute_batch("BEGIN").map_err(connection_error)?;
        self.conn = Some(conn);
        self.tx.set(TxState::Active);
        info!(location = %location, read_only = self.config.read_only, "session opened");
        Ok(())
    }

    /// Current transaction state.
    pub fn state(&self) -> TxState {
        self.tx.get()
    }

    /// Configuration the session was created with.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Graph used by queries that name none.
    pub fn default_graph(&self) -> Option<&str> {
        self.default_graph.as_deref()
    }

    /// Sets the graph used by queries without `ON`.
    pub fn set_default_graph(&mut self, graph: impl Into<String>) {
        self.default_graph = Some(graph.into());
    }

    /// Clears the default graph.
    pub fn clear_default_graph(&mut self) {
        self.default_graph = None;
    }

    fn connection(&self) -> Result<&Connection> {
        self.conn
            .as_ref()
            .ok_or_else(|| GraphError::InvalidState(format!("session is {}", self.tx.get())))
    }

    /// Connection for a new operation; fails once the transaction aborted.
    fn usable(&self) -> Result<&Connection> {
        let conn = self.connection()?;
        if self.tx.get() == TxState::Aborted {
            return Err(GraphError::Transaction(
                "transaction was aborted by an earlier failure; roll back first".into(),
            ));
        }
        Ok(conn)
    }

    /// Runs `op` and aborts the transaction if the store reported a failure
    /// or if `op` ended the transaction behind the session's back.
    fn guarded<T>(&self, op: impl FnOnce(&Connection) -> Result<T>) -> Result<T> {
        let conn = self.usable()?;
        let result = op(conn);
        if let Err(err) = &result {
            if matches!(err, GraphError::Execution(_)) {
                warn!(error = %err, "execution failed; transaction aborted");
                self.tx.set(TxState::Aborted);
            }
        }
        if conn.is_autocommit() {
            self.tx.set(TxState::Aborted);
            if let Err(err) = conn.execute_batch("BEGIN") {
                warn!(error = %err, "cannot reopen the transaction");
            }
            if result.is_ok() {
                warn!("statement ended the open transaction; transaction aborted");
                return Err(GraphError::Transaction(
                    "statements must not end the session's transaction; use commit() or rollback()"
                        .into(),
                ));
            }
        }
        result
    }

    /// Begins the next transaction, aborting the session if that fails.
    fn begin(&self, conn: &Connection) -> Result<()> {
        if let Err(err) = conn.execute_batch("BEGIN") {
            self.tx.set(TxState::Aborted);
            return Err(err.into());
        }
        Ok(())
    }

    /// Commits the open transaction and begins the next one.
    pub fn commit(&mut self) -> Result<()> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| GraphError::Transaction(format!("cannot commit: session is {}", self.tx.get())))?;
        if self.tx.get() == TxState::Aborted {
            return Err(GraphError::Transaction(
                "cannot commit an aborted transaction; roll back first".into(),
            ));
        }
        if let Err(err) = conn.execute_batch("COMMIT") {
            self.tx.set(TxState::Aborted);
            return Err(err.into());
        }
        self.begin(conn)?;
        info!(location = %self.config.location(), "transaction committed");
        Ok(())
    }

    /// Rolls back the open transaction and begins the next one.
    pub fn rollback(&mut self) -> Result<()> {
        let conn = self
            .conn
            .as_ref()
            .ok_or_else(|| GraphError::Transaction(format!("cannot roll back: session is {}", self.tx.get())))?;
        // Some failures make SQLite roll back on its own.
        if !conn.is_autocommit() {
            if let Err(err) = conn.execute_batch("ROLLBACK") {
                self.tx.set(TxState::Aborted);
                return Err(err.into());
            }
        }
        self.begin(conn)?;
        self.tx.set(TxState::Active);
        warn!(location = %self.config.location(), "transaction rolled back");
        Ok(())
    }

    /// Closes the session, rolling back any uncommitted work. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        let Some(conn) = self.conn.take() else {
            if self.tx.get() != TxState::Idle {
                self.tx.set(TxState::Closed);
            }
            return Ok(());
        };
        self.tx.set(TxState::Closed);
        if !conn.is_autocommit() {
            warn!(location = %self.config.location(), "closing session with an open transaction; rolling back");
            conn.execute_batch("ROLLBACK")?;
        }
        conn.close().map_err(|(_, err)| GraphError::Execution(err))?;
        debug!(location = %self.config.location(), "session closed");
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Schema registry

    /// Declares a graph schema, returning it as stored with inferred types.
    pub fn declare_schema(&mut self, schema: GraphSchema, mode: DeclareMode) -> Result<GraphSchema> {
        self.guarded(|conn| SqliteCatalog::new(conn).declare(schema, mode))
    }

    /// Drops a graph schema. Returns `false` when a tolerated schema was missing.
    pub fn drop_schema(&mut self, name: &str, mode: DropMode) -> Result<bool> {
        self.guarded(|conn| SqliteCatalog::new(conn).drop_schema(name, mode))
    }

    /// Loads a declared schema.
    pub fn resolve_schema(&self, name: &str) -> Result<GraphSchema> {
        self.guarded(|conn| SqliteCatalog::new(conn).resolve(name))
    }

    /// Sorted names of all declared schemas.
    pub fn list_schemas(&self) -> Result<Vec<String>> {
        self.guarded(|conn| SqliteCatalog::new(conn).names())
    }

    /// True when a schema with this name is declared.
    pub fn schema_exists(&self, name: &str) -> Result<bool> {
        self.guarded(|conn| SqliteCatalog::new(conn).exists(name))
    }

    /// Runs one DDL statement given as PGQL text.
    ///
    /// `SELECT` statements go through [`Session::query_pgql`].
    pub fn execute(&mut self, text: &str) -> Result<()> {
        match parse_statement(text)? {
            Statement::CreateGraph { schema, replace } => {
                let mode = if replace {
                    DeclareMode::Replace
                } else {
                    DeclareMode::CreateNew
                };
                self.declare_schema(schema, mode).map(drop)
            }
            Statement::DropGraph { name, if_exists } => {
                let mode = if if_exists {
                    DropMode::IgnoreMissing
                } else {
                    DropMode::MustExist
                };
                self.drop_schema(&name, mode).map(drop)
            }
            Statement::Select(_) => Err(GraphError::InvalidQuery(
                "SELECT returns rows; run it with query_pgql".into(),
            )),
        }
    }

    // ---------------------------------------------------------------------
    // Queries

    /// Compiles a query against its target graph without executing it.
    pub fn prepare(&self, query: &PatternQuery) -> Result<CompiledQuery> {
        let graph = query
            .graph
            .as_deref()
            .or(self.default_graph.as_deref())
            .ok_or_else(|| {
                GraphError::InvalidQuery("no target graph: add ON <graph> or set a default graph".into())
            })?;
        let schema = self.resolve_schema(graph)?;
        compile(&schema, query)
    }

    /// Runs a pattern query, returning a lazy cursor over its rows.
    pub fn query(&self, query: &PatternQuery) -> Result<Cursor<'_>> {
        let plan = self.prepare(query)?;
        let conn = self.usable()?;
        debug!(graph = plan.graph(), steps = plan.steps.len(), "executing pattern query");
        let source = RowSource::new(conn, &plan, self.config.effective_fetch_size());
        Ok(Cursor::new(&self.tx, plan.columns, source))
    }

    /// Parses and runs a PGQL `SELECT`.
    pub fn query_pgql(&self, text: &str) -> Result<Cursor<'_>> {
        self.query(&parse_query(text)?)
    }

    /// Human-readable plan of a query.
    pub fn explain(&self, query: &PatternQuery) -> Result<String> {
        Ok(self.prepare(query)?.explain())
    }

    // ---------------------------------------------------------------------
    // Raw statements

    /// Executes one SQL statement with bound parameters inside the open
    /// transaction, returning the number of changed rows.
    pub fn execute_sql<P: Params>(&mut self, sql: &str, params: P) -> Result<usize> {
        self.guarded(|conn| Ok(conn.execute(sql, params)?))
    }

    /// Executes a batch of SQL statements inside the open transaction.
    pub fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.guarded(|conn| Ok(conn.execute_batch(sql)?))
    }

    // ---------------------------------------------------------------------
    // Mutation through labels

    fn vertex_def(&self, graph: &str, label: &str) -> Result<VertexLabelDefinition> {
        let schema = self.resolve_schema(graph)?;
        let def = match schema.resolve_label(label)? {
            LabelRef::Vertex(def) => def.clone(),
            LabelRef::Edge(def) => {
                return Err(GraphError::type_mismatch(
                    &def.label,
                    "expected a vertex label, found an edge label",
                ))
            }
        };
        Ok(def)
    }

    fn edge_def(&self, graph: &str, label: &str) -> Result<EdgeLabelDefinition> {
        let schema = self.resolve_schema(graph)?;
        let def = match schema.resolve_label(label)? {
            LabelRef::Edge(def) => def.clone(),
            LabelRef::Vertex(def) => {
                return Err(GraphError::type_mismatch(
                    &def.label,
                    "expected an edge label, found a vertex label",
                ))
            }
        };
        Ok(def)
    }

    /// Inserts a vertex row. `values` name key columns or exposed properties.
    pub fn insert_vertex(&mut self, graph: &str, label: &str, values: &[(&str, Value)]) -> Result<()> {
        let def = self.vertex_def(graph, label)?;
        let (columns, row) = map_columns(&def.label, &def.properties, &def.key, values)?;
        require_columns(&def.label, &def.key, &columns, &row)?;
        self.guarded(|conn| store::insert_row(conn, &def.table, &columns, &row))?;
        debug!(graph, label = %def.label, "inserted vertex");
        Ok(())
    }

    /// Inserts an edge row. `values` name key, reference columns or exposed
    /// properties.
    pub fn insert_edge(&mut self, graph: &str, label: &str, values: &[(&str, Value)]) -> Result<()> {
        let def = self.edge_def(graph, label)?;
        let mut known = def.key.clone();
        for column in def.source.columns.iter().chain(&def.destination.columns) {
            if !known.iter().any(|k| k.eq_ignore_ascii_case(column)) {
                known.push(column.clone());
            }
        }
        let (columns, row) = map_columns(&def.label, &def.properties, &known, values)?;
        require_columns(&def.label, &known, &columns, &row)?;
        self.guarded(|conn| store::insert_row(conn, &def.table, &columns, &row))?;
        debug!(graph, label = %def.label, "inserted edge");
        Ok(())
    }

    /// Deletes the vertex rows with this key, returning how many were removed.
    pub fn delete_vertex(&mut self, graph: &str, label: &str, key: &[Value]) -> Result<usize> {
        let def = self.vertex_def(graph, label)?;
        check_key_arity(&def.label, &def.key, key)?;
        self.guarded(|conn| store::delete_rows(conn, &def.table, &def.key, key))
    }

    /// Deletes the edge rows with this key, returning how many were removed.
    pub fn delete_edge(&mut self, graph: &str, label: &str, key: &[Value]) -> Result<usize> {
        let def = self.edge_def(graph, label)?;
        check_key_arity(&def.label, &def.key, key)?;
        self.guarded(|conn| store::delete_rows(conn, &def.table, &def.key, key))
    }

    // ---------------------------------------------------------------------
    // Statistics and verification

    /// Row counts per label.
    pub fn graph_stats(&self, graph: &str) -> Result<GraphStats> {
        let schema = self.resolve_schema(graph)?;
        self.guarded(|conn| {
            let mut stats = GraphStats {
                graph: schema.name.clone(),
                ..GraphStats::default()
            };
            for vertex in &schema.vertices {
                stats
                    .vertices
                    .push((vertex.label.clone(), store::count_rows(conn, &vertex.table)?));
            }
            for edge in &schema.edges {
                stats
                    .edges
                    .push((edge.label.clone(), store::count_rows(conn, &edge.table)?));
            }
            Ok(stats)
        })
    }

    /// Checks keys and edge references of every label.
    pub fn verify_schema(&self, graph: &str) -> Result<IntegrityReport> {
        let schema = self.resolve_schema(graph)?;
        let report = self.guarded(|conn| verify(conn, &schema))?;
        if report.is_clean() {
            info!(graph = %report.graph, "integrity check passed");
        } else {
            warn!(graph = %report.graph, issues = report.issues.len(), "integrity check found issues");
        }
        Ok(report)
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close session cleanly");
        }
    }
}

fn map_columns(
    label: &str,
    properties: &[PropertyDef],
    columns: &[String],
    values: &[(&str, Value)],
) -> Result<(Vec<String>, Vec<Value>)> {
    let mut names: Vec<String> = Vec::with_capacity(values.len());
    let mut row = Vec::with_capacity(values.len());
    for (name, value) in values {
        let column = properties
            .iter()
            .find(|p| p.name.eq_ignore_ascii_case(name))
            .map(|p| p.column.clone())
            .or_else(|| columns.iter().find(|c| c.eq_ignore_ascii_case(name)).cloned())
            .ok_or_else(|| GraphError::UnknownProperty {
                var: label.to_string(),
                label: label.to_string(),
                prop: name.to_string(),
            })?;
        if names.iter().any(|n| n.eq_ignore_ascii_case(&column)) {
            return Err(GraphError::InvalidQuery(format!(
                "column '{column}' of '{label}' given twice"
            )));
        }
        names.push(column);
        row.push(value.clone());
    }
    Ok((names, row))
}

fn require_columns(label: &str, required: &[String], columns: &[String], row: &[Value]) -> Result<()> {
    for needed in required {
        let present = columns
            .iter()
            .zip(row)
            .any(|(c, v)| c.eq_ignore_ascii_case(needed) && !v.is_null());
        if !present {
            return Err(GraphError::InvalidQuery(format!(
                "'{label}' requires a value for key column '{needed}'"
            )));
        }
    }
    Ok(())
}

fn check_key_arity(label: &str, key: &[String], values: &[Value]) -> Result<()> {
    if key.len() != values.len() {
        return Err(GraphError::InvalidQuery(format!(
            "'{label}' is keyed by {} column(s), got {} value(s)",
            key.len(),
            values.len()
        )));
    }
    Ok(())
}

fn verify(conn: &Connection, schema: &GraphSchema) -> Result<IntegrityReport> {
    let mut report = IntegrityReport {
        graph: schema.name.clone(),
        issues: Vec::new(),
    };
    let mut check_keys = |label: &str, table: &str, key: &[String]| -> Result<bool> {
        if !store::table_exists(conn, table)? {
            report.issues.push(IntegrityIssue::MissingTable {
                label: label.to_string(),
                table: table.to_string(),
            });
            return Ok(false);
        }
        let rows = store::count_null_keys(conn, table, key)?;
        if rows > 0 {
            report.issues.push(IntegrityIssue::NullKeys {
                label: label.to_string(),
                rows,
            });
        }
        let keys = store::count_duplicate_keys(conn, table, key)?;
        if keys > 0 {
            report.issues.push(IntegrityIssue::DuplicateKeys {
                label: label.to_string(),
                keys,
            });
        }
        Ok(true)
    };
    let mut present = Vec::new();
    for vertex in &schema.vertices {
        if check_keys(&vertex.label, &vertex.table, &vertex.key)? {
            present.push(vertex.label.as_str());
        }
    }
    let mut edges = Vec::new();
    for edge in &schema.edges {
        if check_keys(&edge.label, &edge.table, &edge.key)? {
            edges.push(edge);
        }
    }
    for edge in edges {
        for (end, reference) in [("source", &edge.source), ("destination", &edge.destination)] {
            let Some(target) = schema.vertex(&reference.label) else {
                continue;
            };
            if !present.iter().any(|l| l.eq_ignore_ascii_case(&target.label)) {
                continue;
            }
            let rows = store::count_dangling(conn, &edge.table, &reference.columns, &target.table, &target.key)?;
            if rows > 0 {
                report.issues.push(IntegrityIssue::DanglingReferences {
                    label: edge.label.clone(),
                    end,
                    rows,
                });
            }
        }
    }
    Ok(report)
}
