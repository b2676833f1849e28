//! Fluent construction of [`PatternQuery`] values.

use std::mem;

use crate::error::{GraphError, Result};
use crate::query::ast::{
    EdgeDirection, EdgePattern, Expr, HopRange, PathPattern, PathStep, PatternQuery, Projection,
    SelectExpr, Var, VertexPattern,
};
use crate::query::value::Value;

/// Fluent builder for pattern queries.
///
/// Errors are recorded and surfaced by [`QueryBuilder::build`], so calls
/// can be chained unconditionally.
#[derive(Default)]
pub struct QueryBuilder {
    query: PatternQuery,
    pending_direction: EdgeDirection,
    error: Option<GraphError>,
}

impl QueryBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Targets a named graph.
    pub fn on(mut self, graph: impl Into<String>) -> Self {
        self.query.graph = Some(graph.into());
        self
    }

    /// Starts a new path at the given vertex.
    pub fn r#match<T>(mut self, target: T) -> Self
    where
        T: Into<MatchTarget>,
    {
        if self.error.is_some() {
            return self;
        }
        self.query.paths.push(PathPattern {
            start: target.into().into_pattern(),
            steps: Vec::new(),
        });
        self
    }

    /// Extends the current path with an edge leading to `target`.
    pub fn where_edge<E, T>(mut self, edge: E, target: T) -> Self
    where
        E: Into<EdgeSpec>,
        T: Into<MatchTarget>,
    {
        if self.error.is_some() {
            return self;
        }
        let direction = mem::take(&mut self.pending_direction);
        let Some(path) = self.query.paths.last_mut() else {
            self.error = Some(GraphError::InvalidQuery(
                "where_edge requires a preceding match".into(),
            ));
            return self;
        };
        let spec = edge.into();
        path.steps.push(PathStep {
            edge: EdgePattern {
                var: spec.var,
                label: spec.label,
                direction,
                hops: spec.hops,
            },
            vertex: target.into().into_pattern(),
        });
        self
    }

    /// Sets the direction for the next edge.
    pub fn direction(mut self, dir: EdgeDirection) -> Self {
        self.pending_direction = dir;
        self
    }

    /// Adds a predicate, AND-ed with any existing filter.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.append_bool_expr(expr);
        self
    }

    /// Adds predicates for a specific variable using the supplied builder.
    pub fn where_var<S, F>(mut self, var: S, build: F) -> Self
    where
        S: Into<String>,
        F: FnOnce(&mut PredicateBuilder),
    {
        if self.error.is_some() {
            return self;
        }
        let mut builder = PredicateBuilder::new(Var(var.into()), PredicateMode::And);
        build(&mut builder);
        match builder.finish() {
            Ok(expr) => self.append_bool_expr(expr),
            Err(err) => self.error = Some(err),
        }
        self
    }

    /// Marks the query as distinct.
    pub fn distinct(mut self) -> Self {
        self.query.distinct = true;
        self
    }

    /// Caps the number of result rows.
    pub fn limit(mut self, limit: u64) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Configures the projection list.
    pub fn select<I, P>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<ProjectionSpec>,
    {
        if self.error.is_some() {
            return self;
        }
        let mut projections = Vec::new();
        for field in fields {
            match field.into().projection {
                Ok(projection) => projections.push(projection),
                Err(err) => {
                    self.error = Some(err);
                    return self;
                }
            }
        }
        self.query.projections = projections;
        self
    }

    /// Returns the query or the first recorded error.
    pub fn build(self) -> Result<PatternQuery> {
        if let Some(err) = self.error {
            return Err(err);
        }
        Ok(self.query)
    }

    fn append_bool_expr(&mut self, expr: Expr) {
        self.query.filter = Some(match self.query.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
    }
}

/// Vertex element of a path: label only, variable only, or both.
pub struct MatchTarget {
    var: Option<Var>,
    label: Option<String>,
}

impl MatchTarget {
    /// Unlabeled named vertex; the label is inferred.
    pub fn var(name: impl Into<String>) -> Self {
        Self {
            var: Some(Var(name.into())),
            label: None,
        }
    }

    /// Anonymous vertex of a label.
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            var: None,
            label: Some(label.into()),
        }
    }

    /// Anonymous vertex with an inferred label.
    pub fn any() -> Self {
        Self {
            var: None,
            label: None,
        }
    }

    fn into_pattern(self) -> VertexPattern {
        VertexPattern {
            var: self.var,
            label: self.label,
        }
    }
}

impl From<&str> for MatchTarget {
    fn from(label: &str) -> Self {
        Self::label(label)
    }
}

impl From<String> for MatchTarget {
    fn from(label: String) -> Self {
        Self::label(label)
    }
}

impl From<(&str, &str)> for MatchTarget {
    fn from((var, label): (&str, &str)) -> Self {
        Self {
            var: Some(Var(var.to_owned())),
            label: Some(label.to_owned()),
        }
    }
}

impl From<(&str, Option<&str>)> for MatchTarget {
    fn from((var, label): (&str, Option<&str>)) -> Self {
        Self {
            var: Some(Var(var.to_owned())),
            label: label.map(str::to_owned),
        }
    }
}

/// Edge element of a path.
#[derive(Default)]
pub struct EdgeSpec {
    var: Option<Var>,
    label: Option<String>,
    hops: HopRange,
}

impl EdgeSpec {
    /// Edge from a label and/or variable.
    pub fn new(spec: impl Into<EdgeSpec>) -> Self {
        spec.into()
    }

    /// Anonymous single-hop edge of a label.
    pub fn label(label: impl Into<String>) -> Self {
        Self {
            label: Some(label.into()),
            ..Self::default()
        }
    }

    /// Anonymous edge with an inferred label.
    pub fn any() -> Self {
        Self::default()
    }

    /// Sets the repetition range, making the edge variable-length unless it
    /// is exactly one hop.
    pub fn hops(mut self, hops: HopRange) -> Self {
        self.hops = hops;
        self
    }
}

impl From<&str> for EdgeSpec {
    fn from(label: &str) -> Self {
        Self::label(label)
    }
}

impl From<Option<&str>> for EdgeSpec {
    fn from(label: Option<&str>) -> Self {
        Self {
            label: label.map(str::to_owned),
            ..Self::default()
        }
    }
}

impl From<(&str, &str)> for EdgeSpec {
    fn from((var, label): (&str, &str)) -> Self {
        Self {
            var: Some(Var(var.to_owned())),
            label: Some(label.to_owned()),
            hops: HopRange::ONE,
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum PredicateMode {
    And,
    Or,
}

/// Builder used to construct predicates bound to a single variable.
pub struct PredicateBuilder {
    var: Var,
    mode: PredicateMode,
    exprs: Vec<Expr>,
    error: Option<GraphError>,
}

impl PredicateBuilder {
    fn new(var: Var, mode: PredicateMode) -> Self {
        Self {
            var,
            mode,
            exprs: Vec::new(),
            error: None,
        }
    }

    fn prop(&self, prop: impl Into<String>) -> Expr {
        Expr::Prop {
            var: self.var.clone(),
            prop: prop.into(),
        }
    }

    fn push(&mut self, expr: Expr) -> &mut Self {
        if self.error.is_none() {
            self.exprs.push(expr);
        }
        self
    }

    fn finish(self) -> Result<Expr> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let mut exprs = self.exprs;
        match exprs.len() {
            0 => Err(GraphError::InvalidQuery(
                "predicate group must emit at least one predicate".into(),
            )),
            1 => Ok(exprs.remove(0)),
            _ => Ok(match self.mode {
                PredicateMode::And => Expr::And(exprs),
                PredicateMode::Or => Expr::Or(exprs),
            }),
        }
    }

    fn group<F>(&mut self, mode: PredicateMode, build: F) -> Option<Expr>
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        let mut nested = PredicateBuilder::new(self.var.clone(), mode);
        build(&mut nested);
        match nested.finish() {
            Ok(expr) => Some(expr),
            Err(err) => {
                self.error.get_or_insert(err);
                None
            }
        }
    }

    /// `var.prop = value`
    pub fn eq(&mut self, prop: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let expr = self.prop(prop).eq(value.into());
        self.push(expr)
    }

    /// `var.prop <> value`
    pub fn ne(&mut self, prop: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let expr = self.prop(prop).ne(value.into());
        self.push(expr)
    }

    /// `var.prop < value`
    pub fn lt(&mut self, prop: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let expr = self.prop(prop).lt(value.into());
        self.push(expr)
    }

    /// `var.prop <= value`
    pub fn le(&mut self, prop: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let expr = self.prop(prop).le(value.into());
        self.push(expr)
    }

    /// `var.prop > value`
    pub fn gt(&mut self, prop: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let expr = self.prop(prop).gt(value.into());
        self.push(expr)
    }

    /// `var.prop >= value`
    pub fn ge(&mut self, prop: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        let expr = self.prop(prop).ge(value.into());
        self.push(expr)
    }

    /// `low <= var.prop AND var.prop <= high`
    pub fn between(
        &mut self,
        prop: impl Into<String>,
        low: impl Into<Value>,
        high: impl Into<Value>,
    ) -> &mut Self {
        let prop = prop.into();
        let expr = self
            .prop(prop.clone())
            .ge(low.into())
            .and(self.prop(prop).le(high.into()));
        self.push(expr)
    }

    /// `var.prop IS NULL`
    pub fn is_null(&mut self, prop: impl Into<String>) -> &mut Self {
        let expr = self.prop(prop).is_null();
        self.push(expr)
    }

    /// `var.prop IS NOT NULL`
    pub fn is_not_null(&mut self, prop: impl Into<String>) -> &mut Self {
        let expr = self.prop(prop).is_not_null();
        self.push(expr)
    }

    /// Nests a group of predicates combined with logical AND.
    pub fn and_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        match self.group(PredicateMode::And, build) {
            Some(expr) => self.push(expr),
            None => self,
        }
    }

    /// Nests a group of predicates combined with logical OR.
    pub fn or_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        match self.group(PredicateMode::Or, build) {
            Some(expr) => self.push(expr),
            None => self,
        }
    }

    /// Nests a group of predicates and negates the result.
    pub fn not_group<F>(&mut self, build: F) -> &mut Self
    where
        F: FnOnce(&mut PredicateBuilder),
    {
        match self.group(PredicateMode::And, build) {
            Some(expr) => self.push(expr.negate()),
            None => self,
        }
    }
}

/// Projection helper used by the builder API.
pub struct ProjectionSpec {
    projection: Result<Projection>,
}

impl From<&str> for ProjectionSpec {
    /// Parses `var.prop`.
    fn from(field: &str) -> Self {
        let projection = match field.split_once('.') {
            Some((var, prop)) if !var.is_empty() && !prop.is_empty() => {
                Ok(Projection::new(Expr::prop(var, prop)))
            }
            _ => Err(GraphError::InvalidQuery(format!(
                "projection '{field}' must have the form var.prop"
            ))),
        };
        Self { projection }
    }
}

impl From<(&str, &str)> for ProjectionSpec {
    fn from((field, alias): (&str, &str)) -> Self {
        let projection = ProjectionSpec::from(field).projection.map(|mut p| {
            p.alias = Some(alias.to_owned());
            p
        });
        Self { projection }
    }
}

impl From<Projection> for ProjectionSpec {
    fn from(projection: Projection) -> Self {
        Self {
            projection: Ok(projection),
        }
    }
}

impl From<Expr> for ProjectionSpec {
    fn from(expr: Expr) -> Self {
        Projection::new(expr).into()
    }
}

impl From<SelectExpr> for ProjectionSpec {
    fn from(expr: SelectExpr) -> Self {
        Projection::new(expr).into()
    }
}
