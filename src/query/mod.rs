//! Pattern-query front-ends, compilation and execution.
//!
//! Queries arrive either as PGQL text ([`parser`]) or through the fluent
//! [`QueryBuilder`]; both produce an [`ast::PatternQuery`] that the
//! [`compiler`] binds to a graph schema and the executor runs lazily
//! behind a [`Cursor`].

/// Query and statement structures shared by both front-ends.
pub mod ast;

/// Fluent construction of pattern queries.
pub mod builder;

/// Binding of pattern queries to a schema.
///
/// Resolves labels, infers unlabeled variables and type-checks filters
/// before any row is read.
pub mod compiler;

/// Forward-only result cursor.
pub mod cursor;

pub(crate) mod executor;

/// PGQL text parser.
pub mod parser;

/// Compiled plan representation and explain output.
pub mod plan;

/// Scalar values and their ordering rules.
pub mod value;

pub use builder::{EdgeSpec, MatchTarget, PredicateBuilder, ProjectionSpec, QueryBuilder};
pub use compiler::compile;
pub use cursor::Cursor;
pub use parser::{parse_query, parse_script, parse_statement};
pub use plan::CompiledQuery;
pub use value::Value;
