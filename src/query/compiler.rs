//! Pattern compiler: binds a [`PatternQuery`] to a [`GraphSchema`].
//!
//! Compilation is pure. It resolves labels (inferring missing ones from
//! the edges around each vertex), assigns binding slots, orders traversal
//! steps left to right, pushes each filter conjunct down to the first point
//! where its variables are bound, and type-checks every expression.

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::debug;

use crate::error::{GraphError, Result};
use crate::query::ast::{
    AggregateFunc, EdgeDirection, EdgePattern, Expr, HopRange, PatternQuery, SelectExpr,
    VertexPattern,
};
use crate::query::plan::{
    AggregateSpec, CompiledQuery, OutputStep, PlanExpr, PlanStep, Slot, SlotKind,
};
use crate::query::value::Value;
use crate::schema::{GraphSchema, PropertyType};

/// Compiles `query` against `schema`.
pub fn compile(schema: &GraphSchema, query: &PatternQuery) -> Result<CompiledQuery> {
    Compiler::new(schema)?.compile(query)
}

struct VertexVar {
    name: String,
    explicit: Option<usize>,
    candidates: BTreeSet<usize>,
    slot: Option<usize>,
}

struct EdgeElem {
    name: String,
    anonymous: bool,
    candidates: BTreeSet<usize>,
    direction: EdgeDirection,
    hops: HopRange,
    left: usize,
    right: usize,
}

impl EdgeElem {
    fn is_path(&self) -> bool {
        !self.hops.is_single_hop()
    }

    /// Vertex vars on the (source, destination) side of the edge label.
    fn ends(&self) -> (usize, usize) {
        match self.direction {
            EdgeDirection::Out => (self.left, self.right),
            EdgeDirection::In => (self.right, self.left),
        }
    }
}

#[derive(Clone, Copy)]
enum Element {
    Vertex(usize),
    Edge(usize),
}

struct Compiler<'a> {
    schema: &'a GraphSchema,
    /// (source, destination) vertex label of every edge label.
    edge_ends: Vec<(usize, usize)>,
    vertices: Vec<VertexVar>,
    edges: Vec<EdgeElem>,
    order: Vec<Element>,
    taken: HashSet<String>,
    next_auto: usize,
}

impl<'a> Compiler<'a> {
    fn new(schema: &'a GraphSchema) -> Result<Self> {
        let edge_ends = schema
            .edges
            .iter()
            .map(|edge| {
                let end = |label: &str| {
                    schema.vertex_index(label).ok_or_else(|| GraphError::UnknownLabel {
                        graph: schema.name.clone(),
                        label: label.to_string(),
                    })
                };
                Ok((end(&edge.source.label)?, end(&edge.destination.label)?))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            schema,
            edge_ends,
            vertices: Vec::new(),
            edges: Vec::new(),
            order: Vec::new(),
            taken: HashSet::new(),
            next_auto: 0,
        })
    }

    fn compile(mut self, query: &PatternQuery) -> Result<CompiledQuery> {
        if query.paths.is_empty() {
            return Err(GraphError::InvalidQuery("MATCH pattern is empty".into()));
        }
        if query.projections.is_empty() {
            return Err(GraphError::InvalidQuery("SELECT list is empty".into()));
        }
        self.reserve_names(query);

        let mut shape = Vec::with_capacity(query.paths.len());
        for path in &query.paths {
            let (start, new) = self.vertex_var(&path.start)?;
            if new {
                self.order.push(Element::Vertex(start));
            }
            let mut left = start;
            let mut hops = Vec::with_capacity(path.steps.len());
            for step in &path.steps {
                let (right, new) = self.vertex_var(&step.vertex)?;
                let edge = self.edge_elem(&step.edge, left, right)?;
                self.order.push(Element::Edge(edge));
                if new {
                    self.order.push(Element::Vertex(right));
                }
                hops.push(edge);
                left = right;
            }
            shape.push((start, hops));
        }

        self.infer_labels()?;
        self.check_ambiguity()?;

        let mut slots: Vec<Slot> = Vec::new();
        let mut bound_at: Vec<usize> = Vec::new();
        let mut steps: Vec<PlanStep> = Vec::new();
        let mut scope: HashMap<String, Binding> = HashMap::new();

        for (start, hops) in shape {
            if self.vertices[start].slot.is_none() {
                let label = single(&self.vertices[start].candidates);
                let slot = self.bind_vertex(start, &mut slots, &mut scope);
                bound_at.push(steps.len());
                steps.push(PlanStep::ScanVertices { slot, label });
            }
            for edge in hops {
                let (left, right, direction, range, is_path) = {
                    let elem = &self.edges[edge];
                    (elem.left, elem.right, elem.direction, elem.hops, elem.is_path())
                };
                let edge_label = single(&self.edges[edge].candidates);
                let to_label = single(&self.vertices[right].candidates);
                let from = self.vertices[left]
                    .slot
                    .ok_or_else(|| GraphError::InvalidQuery("path start is unbound".into()))?;
                let to_bound = self.vertices[right].slot.is_some();
                let step_idx = steps.len();
                if is_path {
                    if !self.edges[edge].anonymous {
                        scope.insert(self.edges[edge].name.clone(), Binding::PathEdge);
                    }
                    let to = self.vertex_slot(right, step_idx, &mut slots, &mut bound_at, &mut scope);
                    steps.push(PlanStep::ExpandPath {
                        from,
                        edge: edge_label,
                        direction,
                        hops: range,
                        to,
                        to_label,
                        to_bound,
                    });
                } else {
                    let edge_slot = slots.len();
                    slots.push(Slot {
                        name: self.edges[edge].name.clone(),
                        kind: SlotKind::Edge(edge_label),
                    });
                    bound_at.push(step_idx);
                    scope.insert(self.edges[edge].name.clone(), Binding::Slot(edge_slot));
                    let to = self.vertex_slot(right, step_idx, &mut slots, &mut bound_at, &mut scope);
                    steps.push(PlanStep::Expand {
                        from,
                        edge_slot,
                        edge: edge_label,
                        direction,
                        to,
                        to_label,
                        to_bound,
                    });
                }
            }
        }

        let exprs = ExprCompiler {
            schema: self.schema,
            slots: &slots,
            scope: &scope,
        };
        let steps = exprs.push_down_filters(steps, &bound_at, query.filter.as_ref())?;
        let (output, columns) = exprs.compile_output(query)?;

        let compiled = CompiledQuery {
            schema: self.schema.clone(),
            slots,
            steps,
            output,
            columns,
            distinct: query.distinct,
            limit: query.limit,
        };
        debug!(graph = %compiled.schema.name, plan = %compiled.explain(), "compiled pattern query");
        Ok(compiled)
    }

    fn reserve_names(&mut self, query: &PatternQuery) {
        for path in &query.paths {
            if let Some(var) = &path.start.var {
                self.taken.insert(var.0.clone());
            }
            for step in &path.steps {
                for var in [&step.edge.var, &step.vertex.var].into_iter().flatten() {
                    self.taken.insert(var.0.clone());
                }
            }
        }
    }

    fn fresh_var(&mut self) -> String {
        loop {
            let name = format!("_{}", auto_var_name(self.next_auto));
            self.next_auto += 1;
            if self.taken.insert(name.clone()) {
                return name;
            }
        }
    }

    fn vertex_label(&self, var: &str, label: &str) -> Result<usize> {
        if let Some(idx) = self.schema.vertex_index(label) {
            return Ok(idx);
        }
        if self.schema.edge_index(label).is_some() {
            return Err(GraphError::type_mismatch(
                var,
                format!("'{label}' is an edge label, not a vertex label"),
            ));
        }
        Err(GraphError::UnknownLabel {
            graph: self.schema.name.clone(),
            label: label.to_string(),
        })
    }

    fn edge_label(&self, var: &str, label: &str) -> Result<usize> {
        if let Some(idx) = self.schema.edge_index(label) {
            return Ok(idx);
        }
        if self.schema.vertex_index(label).is_some() {
            return Err(GraphError::type_mismatch(
                var,
                format!("'{label}' is a vertex label, not an edge label"),
            ));
        }
        Err(GraphError::UnknownLabel {
            graph: self.schema.name.clone(),
            label: label.to_string(),
        })
    }

    /// Returns the vertex var index and whether it was newly introduced.
    fn vertex_var(&mut self, pattern: &VertexPattern) -> Result<(usize, bool)> {
        let name = match &pattern.var {
            Some(var) => var.0.clone(),
            None => self.fresh_var(),
        };
        if self.edges.iter().any(|e| e.name == name) {
            return Err(GraphError::InvalidQuery(format!(
                "variable '{name}' is bound to both a vertex and an edge"
            )));
        }
        let explicit = pattern
            .label
            .as_deref()
            .map(|label| self.vertex_label(&name, label))
            .transpose()?;

        if let Some(idx) = self.vertices.iter().position(|v| v.name == name) {
            if let Some(label) = explicit {
                let var = &mut self.vertices[idx];
                match var.explicit {
                    Some(prev) if prev != label => {
                        return Err(GraphError::type_mismatch(
                            name,
                            format!(
                                "bound to both '{}' and '{}'",
                                self.schema.vertices[prev].label, self.schema.vertices[label].label
                            ),
                        ));
                    }
                    _ => {
                        var.explicit = Some(label);
                        var.candidates = BTreeSet::from([label]);
                    }
                }
            }
            return Ok((idx, false));
        }

        let candidates: BTreeSet<usize> = match explicit {
            Some(label) => BTreeSet::from([label]),
            None => (0..self.schema.vertices.len()).collect(),
        };
        if candidates.is_empty() {
            return Err(GraphError::InvalidQuery(format!(
                "graph '{}' declares no vertex labels",
                self.schema.name
            )));
        }
        self.vertices.push(VertexVar {
            name,
            explicit,
            candidates,
            slot: None,
        });
        Ok((self.vertices.len() - 1, true))
    }

    fn edge_elem(&mut self, pattern: &EdgePattern, left: usize, right: usize) -> Result<usize> {
        if matches!(pattern.hops.max, Some(max) if pattern.hops.min > max) {
            return Err(GraphError::InvalidQuery(format!(
                "repetition range {} has a minimum above its maximum",
                pattern.hops
            )));
        }
        let (name, anonymous) = match &pattern.var {
            Some(var) => (var.0.clone(), false),
            None => (self.fresh_var(), true),
        };
        if self.edges.iter().any(|e| e.name == name) {
            return Err(GraphError::InvalidQuery(format!(
                "edge variable '{name}' appears more than once"
            )));
        }
        if self.vertices.iter().any(|v| v.name == name) {
            return Err(GraphError::InvalidQuery(format!(
                "variable '{name}' is bound to both a vertex and an edge"
            )));
        }
        let candidates: BTreeSet<usize> = match pattern.label.as_deref() {
            Some(label) => BTreeSet::from([self.edge_label(&name, label)?]),
            None => (0..self.schema.edges.len()).collect(),
        };
        if candidates.is_empty() {
            return Err(GraphError::InvalidQuery(format!(
                "graph '{}' declares no edge labels",
                self.schema.name
            )));
        }
        self.edges.push(EdgeElem {
            name,
            anonymous,
            candidates,
            direction: pattern.direction,
            hops: pattern.hops,
            left,
            right,
        });
        Ok(self.edges.len() - 1)
    }

    /// Narrows label candidates until every edge agrees with its endpoints.
    fn infer_labels(&mut self) -> Result<()> {
        loop {
            let mut changed = false;
            for idx in 0..self.edges.len() {
                let (src, dst) = self.edges[idx].ends();
                let before = self.edges[idx].candidates.clone();
                let kept: BTreeSet<usize> = before
                    .iter()
                    .copied()
                    .filter(|&label| {
                        let (s, d) = self.edge_ends[label];
                        self.vertices[src].candidates.contains(&s)
                            && self.vertices[dst].candidates.contains(&d)
                    })
                    .collect();
                if kept.is_empty() {
                    return Err(self.edge_mismatch(idx, &before));
                }
                let sources: BTreeSet<usize> = kept.iter().map(|&l| self.edge_ends[l].0).collect();
                let targets: BTreeSet<usize> = kept.iter().map(|&l| self.edge_ends[l].1).collect();
                changed |= kept.len() != before.len();
                self.edges[idx].candidates = kept;
                changed |= narrow(&mut self.vertices[src].candidates, &sources);
                changed |= narrow(&mut self.vertices[dst].candidates, &targets);
            }
            if !changed {
                return Ok(());
            }
        }
    }

    fn edge_mismatch(&self, idx: usize, labels: &BTreeSet<usize>) -> GraphError {
        let elem = &self.edges[idx];
        let (src, dst) = elem.ends();
        let edge_names: Vec<&str> = labels
            .iter()
            .map(|&l| self.schema.edges[l].label.as_str())
            .collect();
        GraphError::type_mismatch(
            elem.name.clone(),
            format!(
                "no edge label among {} runs from {} to {}",
                describe(&edge_names),
                describe(&self.vertex_labels(src)),
                describe(&self.vertex_labels(dst))
            ),
        )
    }

    fn vertex_labels(&self, var: usize) -> Vec<&str> {
        self.vertices[var]
            .candidates
            .iter()
            .map(|&l| self.schema.vertices[l].label.as_str())
            .collect()
    }

    fn check_ambiguity(&self) -> Result<()> {
        for element in &self.order {
            let (name, candidates) = match *element {
                Element::Vertex(idx) => {
                    let var = &self.vertices[idx];
                    if var.candidates.len() <= 1 {
                        continue;
                    }
                    (&var.name, self.vertex_labels(idx))
                }
                Element::Edge(idx) => {
                    let elem = &self.edges[idx];
                    if elem.candidates.len() <= 1 {
                        continue;
                    }
                    let labels = elem
                        .candidates
                        .iter()
                        .map(|&l| self.schema.edges[l].label.as_str())
                        .collect();
                    (&elem.name, labels)
                }
            };
            return Err(GraphError::AmbiguousBinding {
                var: name.clone(),
                candidates: candidates.into_iter().map(str::to_owned).collect(),
            });
        }
        Ok(())
    }

    fn bind_vertex(
        &mut self,
        var: usize,
        slots: &mut Vec<Slot>,
        scope: &mut HashMap<String, Binding>,
    ) -> usize {
        let slot = slots.len();
        let name = self.vertices[var].name.clone();
        slots.push(Slot {
            name: name.clone(),
            kind: SlotKind::Vertex(single(&self.vertices[var].candidates)),
        });
        scope.insert(name, Binding::Slot(slot));
        self.vertices[var].slot = Some(slot);
        slot
    }

    fn vertex_slot(
        &mut self,
        var: usize,
        step_idx: usize,
        slots: &mut Vec<Slot>,
        bound_at: &mut Vec<usize>,
        scope: &mut HashMap<String, Binding>,
    ) -> usize {
        if let Some(slot) = self.vertices[var].slot {
            return slot;
        }
        let slot = self.bind_vertex(var, slots, scope);
        bound_at.push(step_idx);
        slot
    }
}

fn narrow(set: &mut BTreeSet<usize>, allowed: &BTreeSet<usize>) -> bool {
    let before = set.len();
    set.retain(|label| allowed.contains(label));
    set.len() != before
}

fn single(set: &BTreeSet<usize>) -> usize {
    set.first().copied().unwrap_or_default()
}

fn describe(labels: &[&str]) -> String {
    match labels {
        [one] => format!("'{one}'"),
        many => format!("{many:?}"),
    }
}

fn auto_var_name(idx: usize) -> String {
    const FIRST: u8 = b'a';
    let letter = (FIRST + (idx % 26) as u8) as char;
    if idx < 26 {
        letter.to_string()
    } else {
        format!("{}{}", letter, idx / 26)
    }
}

#[derive(Clone, Copy, Debug)]
enum Binding {
    Slot(usize),
    PathEdge,
}

/// Static type of a compiled expression.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Ty {
    Any,
    Null,
    Bool,
    Int,
    Float,
    Str,
    Date,
}

impl Ty {
    fn of_property(ty: PropertyType) -> Self {
        match ty {
            PropertyType::String => Ty::Str,
            PropertyType::Integer => Ty::Int,
            PropertyType::Float => Ty::Float,
            PropertyType::Boolean => Ty::Bool,
            PropertyType::Date => Ty::Date,
            PropertyType::Any => Ty::Any,
        }
    }

    fn of_value(value: &Value) -> Self {
        match value {
            Value::Null => Ty::Null,
            Value::Bool(_) => Ty::Bool,
            Value::Int(_) => Ty::Int,
            Value::Float(_) => Ty::Float,
            Value::String(_) => Ty::Str,
            Value::Date(_) => Ty::Date,
        }
    }

    fn is_numeric(self) -> bool {
        matches!(self, Ty::Int | Ty::Float)
    }

    fn is_open(self) -> bool {
        matches!(self, Ty::Any | Ty::Null)
    }

    fn is_boolish(self) -> bool {
        self.is_open() || self == Ty::Bool
    }

    fn comparable(self, other: Ty) -> bool {
        self.is_open()
            || other.is_open()
            || self == other
            || (self.is_numeric() && other.is_numeric())
    }

    fn name(self) -> &'static str {
        match self {
            Ty::Any => "any",
            Ty::Null => "null",
            Ty::Bool => "boolean",
            Ty::Int => "integer",
            Ty::Float => "float",
            Ty::Str => "string",
            Ty::Date => "date",
        }
    }
}

struct ExprCompiler<'a> {
    schema: &'a GraphSchema,
    slots: &'a [Slot],
    scope: &'a HashMap<String, Binding>,
}

impl ExprCompiler<'_> {
    fn slot_of(&self, var: &str, usage: &str) -> Result<usize> {
        match self.scope.get(var) {
            Some(Binding::Slot(slot)) => Ok(*slot),
            Some(Binding::PathEdge) => Err(GraphError::InvalidQuery(format!(
                "variable-length edge variable '{var}' cannot be used in {usage}"
            ))),
            None => Err(GraphError::InvalidQuery(format!(
                "variable '{var}' is not bound by the pattern"
            ))),
        }
    }

    fn label_name(&self, kind: SlotKind) -> &str {
        match kind {
            SlotKind::Vertex(idx) => &self.schema.vertices[idx].label,
            SlotKind::Edge(idx) => &self.schema.edges[idx].label,
        }
    }

    fn compile(&self, expr: &Expr) -> Result<(PlanExpr, Ty)> {
        match expr {
            Expr::Literal(value) => Ok((PlanExpr::Const(value.clone()), Ty::of_value(value))),
            Expr::Prop { var, prop } => {
                let slot = match self.scope.get(var.as_str()) {
                    Some(Binding::Slot(slot)) => *slot,
                    Some(Binding::PathEdge) => {
                        return Err(GraphError::InvalidQuery(format!(
                            "variable-length edge variable '{var}' has no properties"
                        )))
                    }
                    None => {
                        return Err(GraphError::UnknownProperty {
                            var: var.0.clone(),
                            label: "(unbound)".into(),
                            prop: prop.clone(),
                        })
                    }
                };
                let kind = self.slots[slot].kind;
                let found = match kind {
                    SlotKind::Vertex(idx) => {
                        let def = &self.schema.vertices[idx];
                        def.property_index(prop)
                            .map(|i| (i, def.properties[i].property_type()))
                    }
                    SlotKind::Edge(idx) => {
                        let def = &self.schema.edges[idx];
                        def.property_index(prop)
                            .map(|i| (i, def.properties[i].property_type()))
                    }
                };
                let (index, ty) = found.ok_or_else(|| GraphError::UnknownProperty {
                    var: var.0.clone(),
                    label: self.label_name(kind).to_string(),
                    prop: prop.clone(),
                })?;
                Ok((PlanExpr::Prop { slot, index, ty }, Ty::of_property(ty)))
            }
            Expr::Id(var) => {
                let slot = self.slot_of(var.as_str(), "ID()")?;
                let key_len = match self.slots[slot].kind {
                    SlotKind::Vertex(idx) => self.schema.vertices[idx].key.len(),
                    SlotKind::Edge(idx) => self.schema.edges[idx].key.len(),
                };
                let ty = if key_len == 1 { Ty::Any } else { Ty::Str };
                Ok((PlanExpr::Id { slot }, ty))
            }
            Expr::Label(var) => {
                let slot = self.slot_of(var.as_str(), "LABEL()")?;
                let label = self.label_name(self.slots[slot].kind).to_string();
                Ok((PlanExpr::Const(Value::String(label)), Ty::Str))
            }
            Expr::Cmp { op, left, right } => {
                let (mut l, lt) = self.compile(left)?;
                let (mut r, rt) = self.compile(right)?;
                match (lt, rt) {
                    (Ty::Date, Ty::Str) => r = coerce_date(r, expr)?,
                    (Ty::Str, Ty::Date) => l = coerce_date(l, expr)?,
                    _ if lt.comparable(rt) => {}
                    _ => {
                        return Err(GraphError::type_mismatch(
                            expr.to_string(),
                            format!("cannot compare {} with {}", lt.name(), rt.name()),
                        ))
                    }
                }
                Ok((
                    PlanExpr::Cmp {
                        op: *op,
                        left: Box::new(l),
                        right: Box::new(r),
                    },
                    Ty::Bool,
                ))
            }
            Expr::IsNull { expr, negated } => {
                let (inner, _) = self.compile(expr)?;
                Ok((
                    PlanExpr::IsNull {
                        expr: Box::new(inner),
                        negated: *negated,
                    },
                    Ty::Bool,
                ))
            }
            Expr::And(args) => Ok((PlanExpr::And(self.compile_bools(args)?), Ty::Bool)),
            Expr::Or(args) => Ok((PlanExpr::Or(self.compile_bools(args)?), Ty::Bool)),
            Expr::Not(inner) => {
                let compiled = self.compile_bool(inner)?;
                Ok((PlanExpr::Not(Box::new(compiled)), Ty::Bool))
            }
        }
    }

    fn compile_bool(&self, expr: &Expr) -> Result<PlanExpr> {
        let (compiled, ty) = self.compile(expr)?;
        if !ty.is_boolish() {
            return Err(GraphError::type_mismatch(
                expr.to_string(),
                format!("expected boolean, found {}", ty.name()),
            ));
        }
        Ok(compiled)
    }

    fn compile_bools(&self, args: &[Expr]) -> Result<Vec<PlanExpr>> {
        args.iter().map(|arg| self.compile_bool(arg)).collect()
    }

    /// Interleaves one filter step per top-level conjunct right after the
    /// step that binds the last variable it references.
    fn push_down_filters(
        &self,
        steps: Vec<PlanStep>,
        bound_at: &[usize],
        filter: Option<&Expr>,
    ) -> Result<Vec<PlanStep>> {
        let mut conjuncts = Vec::new();
        if let Some(filter) = filter {
            flatten_and(filter, &mut conjuncts);
        }
        let mut placed: Vec<(usize, PlanStep)> = Vec::with_capacity(conjuncts.len());
        for conjunct in conjuncts {
            let predicate = self.compile_bool(conjunct)?;
            let mut referenced = Vec::new();
            referenced_slots(&predicate, &mut referenced);
            let after = referenced
                .iter()
                .map(|&slot| bound_at[slot])
                .max()
                .unwrap_or(0);
            placed.push((
                after,
                PlanStep::Filter {
                    predicate,
                    text: conjunct.to_string(),
                },
            ));
        }
        placed.sort_by_key(|(after, _)| *after);
        let mut out = Vec::with_capacity(steps.len() + placed.len());
        let mut placed = placed.into_iter().peekable();
        for (idx, step) in steps.into_iter().enumerate() {
            out.push(step);
            while let Some((_, filter)) = placed.next_if(|(after, _)| *after == idx) {
                out.push(filter);
            }
        }
        Ok(out)
    }

    fn compile_output(&self, query: &PatternQuery) -> Result<(OutputStep, Vec<String>)> {
        let aggregates = query
            .projections
            .iter()
            .filter(|p| p.expr.is_aggregate())
            .count();
        if aggregates > 0 && aggregates < query.projections.len() {
            return Err(GraphError::InvalidQuery(
                "aggregates cannot be mixed with non-aggregated columns".into(),
            ));
        }

        let mut columns: Vec<String> = Vec::with_capacity(query.projections.len());
        for projection in &query.projections {
            let name = projection.column_name();
            if columns.iter().any(|c| c.eq_ignore_ascii_case(&name)) {
                return Err(GraphError::InvalidQuery(format!(
                    "duplicate column name '{name}'"
                )));
            }
            columns.push(name);
        }

        if aggregates == 0 {
            let exprs = query
                .projections
                .iter()
                .map(|p| match &p.expr {
                    SelectExpr::Scalar(expr) => self.compile(expr).map(|(e, _)| e),
                    SelectExpr::Aggregate { .. } => {
                        Err(GraphError::InvalidQuery("unexpected aggregate".into()))
                    }
                })
                .collect::<Result<Vec<_>>>()?;
            return Ok((OutputStep::Project(exprs), columns));
        }

        let mut specs = Vec::with_capacity(query.projections.len());
        for projection in &query.projections {
            let SelectExpr::Aggregate {
                func,
                distinct,
                arg,
            } = &projection.expr
            else {
                return Err(GraphError::InvalidQuery("expected an aggregate".into()));
            };
            let arg = match arg {
                None if *func != AggregateFunc::Count => {
                    return Err(GraphError::InvalidQuery(format!(
                        "{}(*) is not supported",
                        func.name()
                    )))
                }
                None => None,
                Some(expr) => {
                    let (compiled, ty) = self.compile(expr)?;
                    let numeric_only = matches!(func, AggregateFunc::Sum | AggregateFunc::Avg);
                    if numeric_only && !(ty.is_numeric() || ty.is_open()) {
                        return Err(GraphError::type_mismatch(
                            projection.expr.to_string(),
                            format!("{} requires a numeric argument, found {}", func.name(), ty.name()),
                        ));
                    }
                    Some(compiled)
                }
            };
            specs.push(AggregateSpec {
                func: *func,
                distinct: *distinct,
                arg,
            });
        }
        Ok((OutputStep::Aggregate(specs), columns))
    }
}

fn coerce_date(expr: PlanExpr, context: &Expr) -> Result<PlanExpr> {
    match expr {
        PlanExpr::Const(Value::String(text)) => Value::parse_date(&text)
            .map(|date| PlanExpr::Const(Value::Date(date)))
            .ok_or_else(|| {
                GraphError::type_mismatch(
                    context.to_string(),
                    format!("'{text}' is not a yyyy-mm-dd date"),
                )
            }),
        _ => Err(GraphError::type_mismatch(
            context.to_string(),
            "cannot compare date with string",
        )),
    }
}

fn flatten_and<'e>(expr: &'e Expr, out: &mut Vec<&'e Expr>) {
    match expr {
        Expr::And(args) => args.iter().for_each(|arg| flatten_and(arg, out)),
        other => out.push(other),
    }
}

fn referenced_slots(expr: &PlanExpr, out: &mut Vec<usize>) {
    match expr {
        PlanExpr::Const(_) => {}
        PlanExpr::Prop { slot, .. } | PlanExpr::Id { slot } => out.push(*slot),
        PlanExpr::Cmp { left, right, .. } => {
            referenced_slots(left, out);
            referenced_slots(right, out);
        }
        PlanExpr::IsNull { expr, .. } | PlanExpr::Not(expr) => referenced_slots(expr, out),
        PlanExpr::And(args) | PlanExpr::Or(args) => {
            args.iter().for_each(|arg| referenced_slots(arg, out))
        }
    }
}
