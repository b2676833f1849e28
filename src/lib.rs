//! Property-graph pattern matching over relational tables.
//!
//! Vertex and edge labels are declared over ordinary SQLite tables; pattern
//! queries, written in PGQL or built with [`QueryBuilder`], are compiled
//! against the declared schema and executed lazily inside a [`Session`]'s
//! transaction.
//!
//! ```no_run
//! use relgraph::{Config, Session};
//!
//! # fn main() -> relgraph::Result<()> {
//! let session = Session::connect(Config::file("graph.db"))?;
//! let mut cursor = session.query_pgql(
//!     "SELECT p.name, w.name AS workplace \
//!      FROM MATCH (p:person)-[:worked_at]->(w:workplace) ON worked_at_graph",
//! )?;
//! while cursor.next()? {
//!     println!("{} {}", cursor.get("name")?, cursor.get("workplace")?);
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod query;
pub mod schema;
pub mod session;
pub mod store;

pub use config::Config;
pub use error::{ErrorWithCode, GraphError, Result};
pub use query::ast::{
    AggregateFunc, CmpOp, EdgeDirection, Expr, HopRange, PatternQuery, Projection, SelectExpr,
    Statement,
};
pub use query::{CompiledQuery, Cursor, QueryBuilder, Value};
pub use schema::{
    DeclareMode, DropMode, EdgeLabelDefinition, GraphSchema, KeyReference, PropertyDef,
    PropertyType, VertexLabelDefinition,
};
pub use session::{GraphStats, IntegrityIssue, IntegrityReport, Session, TxState};
