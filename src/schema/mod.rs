//! Property-graph schema: how relational tables map to vertex and edge labels.
//!
//! A [`GraphSchema`] is declared once, persisted by a [`catalog::SchemaCatalog`]
//! and then referenced by name from pattern queries. Label and property names
//! resolve case-insensitively, the way unquoted SQL identifiers do.

use serde::{Deserialize, Serialize};

use crate::error::{GraphError, Result};
use crate::store::ColumnInfo;

/// Schema registry: declaration, lookup and removal of graph schemas.
pub mod catalog;

pub use catalog::{DeclareMode, DropMode, InMemoryCatalog, SchemaCatalog, SqliteCatalog};

/// Declared type of an exposed property.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PropertyType {
    /// Text.
    String,
    /// 64-bit integer.
    Integer,
    /// Floating point.
    Float,
    /// Boolean stored as 0/1.
    Boolean,
    /// Calendar date stored as `yyyy-mm-dd` text.
    Date,
    /// Whatever the column holds, decoded by storage class.
    Any,
}

impl PropertyType {
    /// Maps a declared SQL column type to a property type using SQLite's
    /// affinity rules, with `DATE` and `BOOL` recognised first.
    pub fn from_declared(sql_type: &str) -> Self {
        let upper = sql_type.to_ascii_uppercase();
        if upper.contains("DATE") {
            PropertyType::Date
        } else if upper.contains("BOOL") {
            PropertyType::Boolean
        } else if upper.contains("INT") {
            PropertyType::Integer
        } else if upper.contains("CHAR") || upper.contains("CLOB") || upper.contains("TEXT") {
            PropertyType::String
        } else if upper.contains("REAL") || upper.contains("FLOA") || upper.contains("DOUB") {
            PropertyType::Float
        } else {
            PropertyType::Any
        }
    }

    /// Lower-case type name.
    pub fn name(self) -> &'static str {
        match self {
            PropertyType::String => "string",
            PropertyType::Integer => "integer",
            PropertyType::Float => "float",
            PropertyType::Boolean => "boolean",
            PropertyType::Date => "date",
            PropertyType::Any => "any",
        }
    }
}

/// Exposed property: a column surfaced under a (possibly different) name.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PropertyDef {
    /// Name used in patterns.
    pub name: String,
    /// Backing column.
    pub column: String,
    /// Declared type; inferred from the column at declaration when absent.
    pub ty: Option<PropertyType>,
}

impl PropertyDef {
    /// Property backed by a column of the same name.
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            column: name.clone(),
            name,
            ty: None,
        }
    }

    /// Property exposed under `name` but stored in `column`.
    pub fn aliased(column: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column: column.into(),
            ty: None,
        }
    }

    /// Sets the declared type.
    pub fn typed(mut self, ty: PropertyType) -> Self {
        self.ty = Some(ty);
        self
    }

    /// Declared type, `Any` when still unresolved.
    pub fn property_type(&self) -> PropertyType {
        self.ty.unwrap_or(PropertyType::Any)
    }
}

/// Maps a table to a vertex label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexLabelDefinition {
    /// Label name.
    pub label: String,
    /// Backing table.
    pub table: String,
    /// Ordered key columns.
    pub key: Vec<String>,
    /// Exposed properties in declaration order.
    pub properties: Vec<PropertyDef>,
    /// Expose every column of the table when the schema is bound.
    #[serde(default)]
    pub all_columns: bool,
}

impl VertexLabelDefinition {
    /// Starts a definition for `label` backed by `table`.
    pub fn new(label: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            table: table.into(),
            key: Vec::new(),
            properties: Vec::new(),
            all_columns: false,
        }
    }

    /// Sets the key columns.
    pub fn key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an exposed property.
    pub fn property(mut self, prop: impl Into<PropertyDef>) -> Self {
        self.properties.push(prop.into());
        self
    }

    /// Adds several same-named properties.
    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties
            .extend(names.into_iter().map(|name| PropertyDef::new(name)));
        self
    }

    /// Exposes every column of the table as a property.
    pub fn all_columns(mut self) -> Self {
        self.all_columns = true;
        self
    }

    /// Position of a property by case-insensitive name.
    pub fn property_index(&self, name: &str) -> Option<usize> {
        property_index(&self.properties, name)
    }
}

/// Edge columns pointing at the key of a vertex label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyReference {
    /// Columns of the edge table.
    pub columns: Vec<String>,
    /// Referenced vertex label.
    pub label: String,
    /// Referenced vertex columns; must equal that label's key when given.
    #[serde(default)]
    pub referenced: Option<Vec<String>>,
}

impl KeyReference {
    /// Reference from `columns` to the key of `label`.
    pub fn new<I, S>(columns: I, label: impl Into<String>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
            label: label.into(),
            referenced: None,
        }
    }
}

/// Maps a table to an edge label between two vertex labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeLabelDefinition {
    /// Label name.
    pub label: String,
    /// Backing table.
    pub table: String,
    /// Composite key columns.
    pub key: Vec<String>,
    /// Source endpoint reference.
    pub source: KeyReference,
    /// Destination endpoint reference.
    pub destination: KeyReference,
    /// Exposed properties in declaration order.
    pub properties: Vec<PropertyDef>,
    /// Expose every column of the table when the schema is bound.
    #[serde(default)]
    pub all_columns: bool,
}

impl EdgeLabelDefinition {
    /// Starts an edge definition; the key defaults to source + destination columns.
    pub fn new(
        label: impl Into<String>,
        table: impl Into<String>,
        source: KeyReference,
        destination: KeyReference,
    ) -> Self {
        let key = source
            .columns
            .iter()
            .chain(destination.columns.iter())
            .cloned()
            .collect();
        Self {
            label: label.into(),
            table: table.into(),
            key,
            source,
            destination,
            properties: Vec::new(),
            all_columns: false,
        }
    }

    /// Overrides the composite key.
    pub fn key<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Adds an exposed property.
    pub fn property(mut self, prop: impl Into<PropertyDef>) -> Self {
        self.properties.push(prop.into());
        self
    }

    /// Adds several same-named properties.
    pub fn properties<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties
            .extend(names.into_iter().map(|name| PropertyDef::new(name)));
        self
    }

    /// Exposes every column of the table as a property.
    pub fn all_columns(mut self) -> Self {
        self.all_columns = true;
        self
    }

    /// Position of a property by case-insensitive name.
    pub fn property_index(&self, name: &str) -> Option<usize> {
        property_index(&self.properties, name)
    }
}

impl From<&str> for PropertyDef {
    fn from(value: &str) -> Self {
        PropertyDef::new(value)
    }
}

impl From<String> for PropertyDef {
    fn from(value: String) -> Self {
        PropertyDef::new(value)
    }
}

/// Either kind of label definition.
#[derive(Clone, Copy, Debug)]
pub enum LabelRef<'a> {
    /// Vertex label.
    Vertex(&'a VertexLabelDefinition),
    /// Edge label.
    Edge(&'a EdgeLabelDefinition),
}

/// Named collection of vertex and edge labels.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSchema {
    /// Graph name.
    pub name: String,
    /// Vertex labels.
    pub vertices: Vec<VertexLabelDefinition>,
    /// Edge labels.
    pub edges: Vec<EdgeLabelDefinition>,
}

impl GraphSchema {
    /// Empty schema named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            vertices: Vec::new(),
            edges: Vec::new(),
        }
    }

    /// Adds a vertex label.
    pub fn with_vertex(mut self, def: VertexLabelDefinition) -> Self {
        self.vertices.push(def);
        self
    }

    /// Adds an edge label.
    pub fn with_edge(mut self, def: EdgeLabelDefinition) -> Self {
        self.edges.push(def);
        self
    }

    /// Index of a vertex label.
    pub fn vertex_index(&self, label: &str) -> Option<usize> {
        self.vertices
            .iter()
            .position(|v| v.label.eq_ignore_ascii_case(label))
    }

    /// Index of an edge label.
    pub fn edge_index(&self, label: &str) -> Option<usize> {
        self.edges
            .iter()
            .position(|e| e.label.eq_ignore_ascii_case(label))
    }

    /// Vertex label by name.
    pub fn vertex(&self, label: &str) -> Option<&VertexLabelDefinition> {
        self.vertex_index(label).map(|idx| &self.vertices[idx])
    }

    /// Edge label by name.
    pub fn edge(&self, label: &str) -> Option<&EdgeLabelDefinition> {
        self.edge_index(label).map(|idx| &self.edges[idx])
    }

    /// Resolves a label of either kind.
    pub fn resolve_label(&self, label: &str) -> Result<LabelRef<'_>> {
        if let Some(def) = self.vertex(label) {
            return Ok(LabelRef::Vertex(def));
        }
        if let Some(def) = self.edge(label) {
            return Ok(LabelRef::Edge(def));
        }
        Err(GraphError::UnknownLabel {
            graph: self.name.clone(),
            label: label.to_string(),
        })
    }

    /// Checks the schema's internal consistency without touching storage.
    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(GraphError::invalid_definition("graph", "name is empty"));
        }
        for (idx, vertex) in self.vertices.iter().enumerate() {
            if self.vertices[..idx]
                .iter()
                .any(|other| other.label.eq_ignore_ascii_case(&vertex.label))
            {
                return Err(GraphError::invalid_definition(
                    &vertex.label,
                    "duplicate vertex label",
                ));
            }
            check_columns(&vertex.label, &vertex.key, &vertex.properties)?;
        }
        for (idx, edge) in self.edges.iter().enumerate() {
            if self.edges[..idx]
                .iter()
                .any(|other| other.label.eq_ignore_ascii_case(&edge.label))
            {
                return Err(GraphError::invalid_definition(
                    &edge.label,
                    "duplicate edge label",
                ));
            }
            check_columns(&edge.label, &edge.key, &edge.properties)?;
            self.check_reference(edge, &edge.source, "source")?;
            self.check_reference(edge, &edge.destination, "destination")?;
        }
        Ok(())
    }

    fn check_reference(
        &self,
        edge: &EdgeLabelDefinition,
        reference: &KeyReference,
        end: &str,
    ) -> Result<()> {
        let vertex = self
            .vertex(&reference.label)
            .ok_or_else(|| GraphError::UnknownLabel {
                graph: self.name.clone(),
                label: reference.label.clone(),
            })?;
        if reference.columns.len() != vertex.key.len() {
            return Err(GraphError::invalid_definition(
                &edge.label,
                format!(
                    "{end} key has {} column(s) but '{}' is keyed by {}",
                    reference.columns.len(),
                    vertex.label,
                    vertex.key.len()
                ),
            ));
        }
        if let Some(referenced) = &reference.referenced {
            let matches_key = referenced.len() == vertex.key.len()
                && referenced
                    .iter()
                    .zip(&vertex.key)
                    .all(|(a, b)| a.eq_ignore_ascii_case(b));
            if !matches_key {
                return Err(GraphError::invalid_definition(
                    &edge.label,
                    format!("{end} must reference the key of '{}'", vertex.label),
                ));
            }
        }
        Ok(())
    }

    /// Checks every referenced table and column against the store and fills
    /// in what the declaration left implicit: property types, vertex keys
    /// (from the table's primary key) and `ALL COLUMNS` property lists.
    ///
    /// `describe` returns the columns of a table, or `None` if it does not
    /// exist.
    pub fn bind_tables<F>(&mut self, mut describe: F) -> Result<()>
    where
        F: FnMut(&str) -> Result<Option<Vec<ColumnInfo>>>,
    {
        for vertex in &mut self.vertices {
            let columns = describe(&vertex.table)?.ok_or_else(|| {
                GraphError::invalid_definition(
                    &vertex.label,
                    format!("table '{}' does not exist", vertex.table),
                )
            })?;
            if vertex.key.is_empty() {
                vertex.key = columns
                    .iter()
                    .filter(|c| c.primary_key)
                    .map(|c| c.name.clone())
                    .collect();
            }
            if std::mem::take(&mut vertex.all_columns) {
                expose_all(&mut vertex.properties, &columns);
            }
            bind_columns(
                &vertex.label,
                &columns,
                vertex.key.iter(),
                &mut vertex.properties,
            )?;
        }
        for edge in &mut self.edges {
            let columns = describe(&edge.table)?.ok_or_else(|| {
                GraphError::invalid_definition(
                    &edge.label,
                    format!("table '{}' does not exist", edge.table),
                )
            })?;
            if std::mem::take(&mut edge.all_columns) {
                expose_all(&mut edge.properties, &columns);
            }
            let referenced = edge
                .key
                .iter()
                .chain(edge.source.columns.iter())
                .chain(edge.destination.columns.iter());
            bind_columns(&edge.label, &columns, referenced, &mut edge.properties)?;
        }
        Ok(())
    }
}

fn expose_all(properties: &mut Vec<PropertyDef>, columns: &[ColumnInfo]) {
    for column in columns {
        if property_index(properties, &column.name).is_none() {
            properties.push(PropertyDef::new(column.name.clone()));
        }
    }
}

fn property_index(props: &[PropertyDef], name: &str) -> Option<usize> {
    props.iter().position(|p| p.name.eq_ignore_ascii_case(name))
}

fn check_columns(label: &str, key: &[String], properties: &[PropertyDef]) -> Result<()> {
    if label.trim().is_empty() {
        return Err(GraphError::invalid_definition("label", "label name is empty"));
    }
    if key.is_empty() {
        return Err(GraphError::invalid_definition(label, "key has no columns"));
    }
    for (idx, prop) in properties.iter().enumerate() {
        if properties[..idx]
            .iter()
            .any(|other| other.name.eq_ignore_ascii_case(&prop.name))
        {
            return Err(GraphError::invalid_definition(
                label,
                format!("duplicate property '{}'", prop.name),
            ));
        }
    }
    Ok(())
}

fn bind_columns<'a>(
    label: &str,
    columns: &[ColumnInfo],
    referenced: impl Iterator<Item = &'a String>,
    properties: &mut [PropertyDef],
) -> Result<()> {
    let find = |name: &str| columns.iter().find(|c| c.name.eq_ignore_ascii_case(name));
    for column in referenced {
        if find(column).is_none() {
            return Err(GraphError::invalid_definition(
                label,
                format!("column '{column}' does not exist"),
            ));
        }
    }
    for prop in properties {
        let info = find(&prop.column).ok_or_else(|| {
            GraphError::invalid_definition(
                label,
                format!("column '{}' does not exist", prop.column),
            )
        })?;
        if prop.ty.is_none() {
            prop.ty = Some(PropertyType::from_declared(&info.declared_type));
        }
    }
    Ok(())
}
