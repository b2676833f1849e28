//! Structured representation of pattern queries and PGQL statements.
//!
//! Both the fluent [`crate::query::builder::QueryBuilder`] and the PGQL
//! parser produce these types; the compiler binds them to a schema by
//! reference, so graph and label names never travel through query text.

use std::fmt;

use crate::query::value::Value;
use crate::schema::GraphSchema;

/// Identifier assigned to a binding (vertex or edge) within the query.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct Var(pub String);

impl Var {
    /// Wraps a variable name.
    pub fn new(name: impl Into<String>) -> Self {
        Var(name.into())
    }

    /// Variable name.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Var {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Var {
    fn from(value: &str) -> Self {
        Var(value.to_owned())
    }
}

/// Direction of an edge pattern relative to the written order.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum EdgeDirection {
    /// `(a)-[e]->(b)`: `a` is the edge's source.
    #[default]
    Out,
    /// `(a)<-[e]-(b)`: `a` is the edge's destination.
    In,
}

/// Repetition range of an edge pattern.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct HopRange {
    /// Minimum number of hops.
    pub min: u32,
    /// Maximum number of hops; `None` is unbounded.
    pub max: Option<u32>,
}

impl HopRange {
    /// Plain single-hop edge.
    pub const ONE: HopRange = HopRange {
        min: 1,
        max: Some(1),
    };

    /// Exactly `n` hops.
    pub fn exactly(n: u32) -> Self {
        Self {
            min: n,
            max: Some(n),
        }
    }

    /// Between `min` and `max` hops inclusive.
    pub fn between(min: u32, max: u32) -> Self {
        Self {
            min,
            max: Some(max),
        }
    }

    /// At least `min` hops, unbounded.
    pub fn at_least(min: u32) -> Self {
        Self { min, max: None }
    }

    /// Zero up to `max` hops.
    pub fn at_most(max: u32) -> Self {
        Self {
            min: 0,
            max: Some(max),
        }
    }

    /// True for the default fixed-hop case.
    pub fn is_single_hop(&self) -> bool {
        *self == Self::ONE
    }
}

impl Default for HopRange {
    fn default() -> Self {
        Self::ONE
    }
}

impl fmt::Display for HopRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.max {
            Some(max) if max == self.min => write!(f, "{{{max}}}"),
            Some(max) => write!(f, "{{{},{max}}}", self.min),
            None => write!(f, "{{{},}}", self.min),
        }
    }
}

/// `(var:label)` element of a path.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct VertexPattern {
    /// Bound variable; anonymous when `None`.
    pub var: Option<Var>,
    /// Explicit label.
    pub label: Option<String>,
}

impl VertexPattern {
    /// Vertex pattern from optional parts.
    pub fn new(var: Option<&str>, label: Option<&str>) -> Self {
        Self {
            var: var.map(Var::from),
            label: label.map(str::to_owned),
        }
    }
}

/// `-[var:label]->` element of a path, possibly repeated.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EdgePattern {
    /// Bound variable; anonymous when `None`.
    pub var: Option<Var>,
    /// Explicit label.
    pub label: Option<String>,
    /// Direction relative to the written order.
    pub direction: EdgeDirection,
    /// Repetition range.
    pub hops: HopRange,
}

/// One edge followed by the vertex it leads to.
#[derive(Clone, Debug, PartialEq)]
pub struct PathStep {
    /// Edge element.
    pub edge: EdgePattern,
    /// Vertex reached by the edge.
    pub vertex: VertexPattern,
}

/// A linear path pattern: a start vertex followed by zero or more steps.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PathPattern {
    /// First vertex.
    pub start: VertexPattern,
    /// Subsequent edge/vertex pairs.
    pub steps: Vec<PathStep>,
}

/// Comparison operators.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum CmpOp {
    /// `=`
    Eq,
    /// `<>`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
}

impl CmpOp {
    /// Operator text.
    pub fn symbol(self) -> &'static str {
        match self {
            CmpOp::Eq => "=",
            CmpOp::Ne => "<>",
            CmpOp::Lt => "<",
            CmpOp::Le => "<=",
            CmpOp::Gt => ">",
            CmpOp::Ge => ">=",
        }
    }
}

/// Scalar or boolean expression over bound variables.
#[derive(Clone, Debug, PartialEq)]
pub enum Expr {
    /// Constant.
    Literal(Value),
    /// `var.prop`
    Prop {
        /// Variable.
        var: Var,
        /// Exposed property name.
        prop: String,
    },
    /// `ID(var)`
    Id(Var),
    /// `LABEL(var)`
    Label(Var),
    /// Binary comparison.
    Cmp {
        /// Operator.
        op: CmpOp,
        /// Left operand.
        left: Box<Expr>,
        /// Right operand.
        right: Box<Expr>,
    },
    /// `expr IS [NOT] NULL`
    IsNull {
        /// Tested expression.
        expr: Box<Expr>,
        /// `IS NOT NULL` when set.
        negated: bool,
    },
    /// Conjunction.
    And(Vec<Expr>),
    /// Disjunction.
    Or(Vec<Expr>),
    /// Negation.
    Not(Box<Expr>),
}

impl Expr {
    /// `var.prop`
    pub fn prop(var: impl Into<String>, prop: impl Into<String>) -> Self {
        Expr::Prop {
            var: Var(var.into()),
            prop: prop.into(),
        }
    }

    /// `ID(var)`
    pub fn id(var: impl Into<String>) -> Self {
        Expr::Id(Var(var.into()))
    }

    /// `LABEL(var)`
    pub fn label(var: impl Into<String>) -> Self {
        Expr::Label(Var(var.into()))
    }

    /// Constant.
    pub fn lit(value: impl Into<Value>) -> Self {
        Expr::Literal(value.into())
    }

    /// Comparison of `self` with `other`.
    pub fn cmp(self, op: CmpOp, other: impl Into<Expr>) -> Self {
        Expr::Cmp {
            op,
            left: Box::new(self),
            right: Box::new(other.into()),
        }
    }

    /// `self = other`
    pub fn eq(self, other: impl Into<Expr>) -> Self {
        self.cmp(CmpOp::Eq, other)
    }

    /// `self <> other`
    pub fn ne(self, other: impl Into<Expr>) -> Self {
        self.cmp(CmpOp::Ne, other)
    }

    /// `self < other`
    pub fn lt(self, other: impl Into<Expr>) -> Self {
        self.cmp(CmpOp::Lt, other)
    }

    /// `self <= other`
    pub fn le(self, other: impl Into<Expr>) -> Self {
        self.cmp(CmpOp::Le, other)
    }

    /// `self > other`
    pub fn gt(self, other: impl Into<Expr>) -> Self {
        self.cmp(CmpOp::Gt, other)
    }

    /// `self >= other`
    pub fn ge(self, other: impl Into<Expr>) -> Self {
        self.cmp(CmpOp::Ge, other)
    }

    /// `self IS NULL`
    pub fn is_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: false,
        }
    }

    /// `self IS NOT NULL`
    pub fn is_not_null(self) -> Self {
        Expr::IsNull {
            expr: Box::new(self),
            negated: true,
        }
    }

    /// `self AND other`, flattening nested conjunctions.
    pub fn and(self, other: Expr) -> Self {
        let mut args = match self {
            Expr::And(args) => args,
            other => vec![other],
        };
        match other {
            Expr::And(more) => args.extend(more),
            other => args.push(other),
        }
        Expr::And(args)
    }

    /// `self OR other`, flattening nested disjunctions.
    pub fn or(self, other: Expr) -> Self {
        let mut args = match self {
            Expr::Or(args) => args,
            other => vec![other],
        };
        match other {
            Expr::Or(more) => args.extend(more),
            other => args.push(other),
        }
        Expr::Or(args)
    }

    /// `NOT self`
    pub fn negate(self) -> Self {
        Expr::Not(Box::new(self))
    }

    /// Invokes `f` on every variable the expression references.
    pub fn visit_vars<'a, F: FnMut(&'a Var)>(&'a self, f: &mut F) {
        match self {
            Expr::Literal(_) => {}
            Expr::Prop { var, .. } | Expr::Id(var) | Expr::Label(var) => f(var),
            Expr::Cmp { left, right, .. } => {
                left.visit_vars(f);
                right.visit_vars(f);
            }
            Expr::IsNull { expr, .. } | Expr::Not(expr) => expr.visit_vars(f),
            Expr::And(args) | Expr::Or(args) => args.iter().for_each(|arg| arg.visit_vars(f)),
        }
    }
}

impl From<Value> for Expr {
    fn from(value: Value) -> Self {
        Expr::Literal(value)
    }
}

impl From<&str> for Expr {
    fn from(value: &str) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<String> for Expr {
    fn from(value: String) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<i64> for Expr {
    fn from(value: i64) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<i32> for Expr {
    fn from(value: i32) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<f64> for Expr {
    fn from(value: f64) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<bool> for Expr {
    fn from(value: bool) -> Self {
        Expr::Literal(value.into())
    }
}

impl From<time::Date> for Expr {
    fn from(value: time::Date) -> Self {
        Expr::Literal(value.into())
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, value: &Value) -> fmt::Result {
    match value {
        Value::String(s) => write!(f, "'{}'", s.replace('\'', "''")),
        Value::Date(_) => write!(f, "DATE '{value}'"),
        other => write!(f, "{other}"),
    }
}

fn write_joined(f: &mut fmt::Formatter<'_>, args: &[Expr], sep: &str) -> fmt::Result {
    f.write_str("(")?;
    for (idx, arg) in args.iter().enumerate() {
        if idx > 0 {
            write!(f, " {sep} ")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Literal(value) => write_literal(f, value),
            Expr::Prop { var, prop } => write!(f, "{var}.{prop}"),
            Expr::Id(var) => write!(f, "ID({var})"),
            Expr::Label(var) => write!(f, "LABEL({var})"),
            Expr::Cmp { op, left, right } => write!(f, "{left} {} {right}", op.symbol()),
            Expr::IsNull {
                expr,
                negated: false,
            } => write!(f, "{expr} IS NULL"),
            Expr::IsNull {
                expr,
                negated: true,
            } => write!(f, "{expr} IS NOT NULL"),
            Expr::And(args) => write_joined(f, args, "AND"),
            Expr::Or(args) => write_joined(f, args, "OR"),
            Expr::Not(expr) => write!(f, "NOT ({expr})"),
        }
    }
}

/// Aggregate functions over the whole filtered row set.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum AggregateFunc {
    /// `COUNT`
    Count,
    /// `MIN`
    Min,
    /// `MAX`
    Max,
    /// `SUM`
    Sum,
    /// `AVG`
    Avg,
}

impl AggregateFunc {
    /// Upper-case function name.
    pub fn name(self) -> &'static str {
        match self {
            AggregateFunc::Count => "COUNT",
            AggregateFunc::Min => "MIN",
            AggregateFunc::Max => "MAX",
            AggregateFunc::Sum => "SUM",
            AggregateFunc::Avg => "AVG",
        }
    }
}

/// Item of the SELECT list.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectExpr {
    /// Per-row expression.
    Scalar(Expr),
    /// Whole-result aggregate; `arg: None` is `COUNT(*)`.
    Aggregate {
        /// Function.
        func: AggregateFunc,
        /// Only distinct non-null argument values contribute.
        distinct: bool,
        /// Argument expression.
        arg: Option<Expr>,
    },
}

impl SelectExpr {
    /// `COUNT(*)`
    pub fn count_star() -> Self {
        SelectExpr::Aggregate {
            func: AggregateFunc::Count,
            distinct: false,
            arg: None,
        }
    }

    /// `func(arg)`
    pub fn aggregate(func: AggregateFunc, arg: Expr) -> Self {
        SelectExpr::Aggregate {
            func,
            distinct: false,
            arg: Some(arg),
        }
    }

    /// `func(DISTINCT arg)`
    pub fn aggregate_distinct(func: AggregateFunc, arg: Expr) -> Self {
        SelectExpr::Aggregate {
            func,
            distinct: true,
            arg: Some(arg),
        }
    }

    /// True for aggregate items.
    pub fn is_aggregate(&self) -> bool {
        matches!(self, SelectExpr::Aggregate { .. })
    }
}

impl fmt::Display for SelectExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectExpr::Scalar(expr) => write!(f, "{expr}"),
            SelectExpr::Aggregate { func, arg: None, .. } => write!(f, "{}(*)", func.name()),
            SelectExpr::Aggregate {
                func,
                distinct,
                arg: Some(arg),
            } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                write!(f, "{}({distinct}{arg})", func.name())
            }
        }
    }
}

impl From<Expr> for SelectExpr {
    fn from(expr: Expr) -> Self {
        SelectExpr::Scalar(expr)
    }
}

/// Projection item included in the final result.
#[derive(Clone, Debug, PartialEq)]
pub struct Projection {
    /// Projected expression.
    pub expr: SelectExpr,
    /// Output column name; derived from the expression when absent.
    pub alias: Option<String>,
}

impl Projection {
    /// Unaliased projection.
    pub fn new(expr: impl Into<SelectExpr>) -> Self {
        Self {
            expr: expr.into(),
            alias: None,
        }
    }

    /// Projection with an explicit column name.
    pub fn aliased(expr: impl Into<SelectExpr>, alias: impl Into<String>) -> Self {
        Self {
            expr: expr.into(),
            alias: Some(alias.into()),
        }
    }

    /// Output column name.
    pub fn column_name(&self) -> String {
        if let Some(alias) = &self.alias {
            return alias.clone();
        }
        match &self.expr {
            SelectExpr::Scalar(Expr::Prop { prop, .. }) => prop.clone(),
            SelectExpr::Scalar(Expr::Id(_)) => "id".to_string(),
            SelectExpr::Scalar(Expr::Label(_)) => "label".to_string(),
            SelectExpr::Scalar(Expr::Literal(value)) => value.to_string(),
            other => other.to_string().to_lowercase(),
        }
    }
}

/// Complete pattern query.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct PatternQuery {
    /// Target graph; the session default applies when absent.
    pub graph: Option<String>,
    /// Path patterns; later paths may reuse earlier variables.
    pub paths: Vec<PathPattern>,
    /// Filter predicate.
    pub filter: Option<Expr>,
    /// SELECT list.
    pub projections: Vec<Projection>,
    /// `SELECT DISTINCT`.
    pub distinct: bool,
    /// Result cap applied last.
    pub limit: Option<u64>,
}

/// Parsed PGQL statement.
#[derive(Clone, Debug, PartialEq)]
pub enum Statement {
    /// `CREATE [OR REPLACE] PROPERTY GRAPH`
    CreateGraph {
        /// Declared schema.
        schema: GraphSchema,
        /// Replace an existing schema of the same name.
        replace: bool,
    },
    /// `DROP PROPERTY GRAPH [IF EXISTS]`
    DropGraph {
        /// Graph name.
        name: String,
        /// Tolerate a missing graph.
        if_exists: bool,
    },
    /// `SELECT ... FROM MATCH ...`
    Select(PatternQuery),
}
