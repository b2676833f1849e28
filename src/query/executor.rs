//! Pull-based execution of compiled pattern plans.
//!
//! Each plan step becomes a [`BindingStream`] layered over the previous one;
//! the terminal output step turns binding rows into result rows. Nothing is
//! read from the store until the first row is pulled, and vertex scans page
//! through their table `fetch_size` rows at a time.

use std::cmp::Ordering;
use std::collections::VecDeque;
use std::rc::Rc;

use rusqlite::Connection;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use crate::error::{GraphError, Result};
use crate::query::ast::{AggregateFunc, CmpOp, EdgeDirection, HopRange};
use crate::query::plan::{
    AggregateSpec, CompiledQuery, OutputStep, PlanExpr, PlanStep, SlotKind,
};
use crate::query::value::{Value, ValueKey};
use crate::store::{EdgeAccess, EdgeEnd, EdgeRecord, VertexAccess, VertexRecord};

/// Element bound to a slot.
#[derive(Clone, Debug)]
pub(crate) enum Element {
    Vertex(Rc<VertexRecord>),
    Edge(Rc<EdgeRecord>),
}

impl Element {
    fn key(&self) -> &[Value] {
        match self {
            Element::Vertex(v) => &v.key,
            Element::Edge(e) => &e.key,
        }
    }

    fn props(&self) -> &[Value] {
        match self {
            Element::Vertex(v) => &v.props,
            Element::Edge(e) => &e.props,
        }
    }
}

/// One candidate binding: an element per slot, `None` while unbound.
pub(crate) type BindingRow = Vec<Option<Element>>;

pub(crate) trait BindingStream {
    fn try_next(&mut self) -> Result<Option<BindingRow>>;
}

type BoxBindingStream<'s> = Box<dyn BindingStream + 's>;

fn key_of(values: &[Value]) -> Vec<ValueKey> {
    values.iter().map(Value::key).collect()
}

fn bound_vertex(row: &BindingRow, slot: usize) -> Result<Rc<VertexRecord>> {
    match row.get(slot) {
        Some(Some(Element::Vertex(v))) => Ok(Rc::clone(v)),
        _ => Err(GraphError::InvalidState(format!(
            "binding slot {slot} holds no vertex"
        ))),
    }
}

/// Yields a single empty row, the seed every pipeline grows from.
struct UnitStream {
    width: usize,
    done: bool,
}

impl BindingStream for UnitStream {
    fn try_next(&mut self) -> Result<Option<BindingRow>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;
        Ok(Some(vec![None; self.width]))
    }
}

/// Binds a slot to every row of a vertex table, once per upstream row.
struct ScanStream<'s> {
    input: BoxBindingStream<'s>,
    conn: &'s Connection,
    access: VertexAccess,
    slot: usize,
    fetch_size: usize,
    current: Option<BindingRow>,
    batch: VecDeque<VertexRecord>,
    after: Option<i64>,
    exhausted: bool,
}

impl BindingStream for ScanStream<'_> {
    fn try_next(&mut self) -> Result<Option<BindingRow>> {
        loop {
            if let Some(current) = &self.current {
                if let Some(vertex) = self.batch.pop_front() {
                    let mut row = current.clone();
                    row[self.slot] = Some(Element::Vertex(Rc::new(vertex)));
                    return Ok(Some(row));
                }
                if !self.exhausted {
                    let page = self
                        .access
                        .scan_batch(self.conn, self.after, self.fetch_size)?;
                    trace!(rows = page.len(), after = ?self.after, "fetched vertex page");
                    self.exhausted = page.len() < self.fetch_size;
                    if let Some((rowid, _)) = page.last() {
                        self.after = Some(*rowid);
                    }
                    self.batch.extend(page.into_iter().map(|(_, vertex)| vertex));
                    continue;
                }
                self.current = None;
            }
            let Some(row) = self.input.try_next()? else {
                return Ok(None);
            };
            self.current = Some(row);
            self.after = None;
            self.exhausted = false;
        }
    }
}

/// Which edge columns match the near vertex and which lead to the far one.
fn edge_ends(direction: EdgeDirection) -> EdgeEnd {
    match direction {
        EdgeDirection::Out => EdgeEnd::Source,
        EdgeDirection::In => EdgeEnd::Destination,
    }
}

fn far_key(edge: &EdgeRecord, direction: EdgeDirection) -> &[Value] {
    match direction {
        EdgeDirection::Out => &edge.destination,
        EdgeDirection::In => &edge.source,
    }
}

/// Single-hop join: near vertex to edge to far vertex.
///
/// Edges whose far reference matches no vertex row produce nothing.
struct ExpandStream<'s> {
    input: BoxBindingStream<'s>,
    conn: &'s Connection,
    edges: EdgeAccess,
    targets: VertexAccess,
    direction: EdgeDirection,
    from: usize,
    edge_slot: usize,
    to: usize,
    to_bound: bool,
    current: Option<BindingRow>,
    pending: VecDeque<(Rc<EdgeRecord>, Rc<VertexRecord>)>,
}

impl ExpandStream<'_> {
    fn expand(&mut self, row: &BindingRow) -> Result<()> {
        let near = bound_vertex(row, self.from)?;
        let bound_far = if self.to_bound {
            Some(bound_vertex(row, self.to)?)
        } else {
            None
        };
        for edge in self
            .edges
            .adjacent(self.conn, edge_ends(self.direction), &near.key)?
        {
            let edge = Rc::new(edge);
            let far = far_key(&edge, self.direction);
            match &bound_far {
                Some(vertex) => {
                    if far.iter().all(|v| !v.is_null()) && key_of(far) == key_of(&vertex.key) {
                        self.pending.push_back((Rc::clone(&edge), Rc::clone(vertex)));
                    }
                }
                None => {
                    for vertex in self.targets.lookup(self.conn, far)? {
                        self.pending.push_back((Rc::clone(&edge), Rc::new(vertex)));
                    }
                }
            }
        }
        Ok(())
    }
}

impl BindingStream for ExpandStream<'_> {
    fn try_next(&mut self) -> Result<Option<BindingRow>> {
        loop {
            if let Some(current) = &self.current {
                if let Some((edge, vertex)) = self.pending.pop_front() {
                    let mut row = current.clone();
                    row[self.edge_slot] = Some(Element::Edge(edge));
                    row[self.to] = Some(Element::Vertex(vertex));
                    return Ok(Some(row));
                }
                self.current = None;
            }
            let Some(row) = self.input.try_next()? else {
                return Ok(None);
            };
            self.expand(&row)?;
            self.current = Some(row);
        }
    }
}

type Endpoints = Rc<Vec<Rc<VertexRecord>>>;

/// Variable-length traversal yielding each distinct reachable endpoint once
/// per upstream row.
struct PathStream<'s> {
    input: BoxBindingStream<'s>,
    conn: &'s Connection,
    edges: EdgeAccess,
    targets: VertexAccess,
    direction: EdgeDirection,
    hops: HopRange,
    /// Near and far labels coincide, so traversal can continue past one hop.
    chainable: bool,
    from: usize,
    to: usize,
    to_bound: bool,
    current: Option<BindingRow>,
    pending: VecDeque<Rc<VertexRecord>>,
    cache: FxHashMap<Vec<ValueKey>, Endpoints>,
}

impl PathStream<'_> {
    /// Distinct vertices one hop from any vertex of `level`, in discovery order.
    fn step(&self, level: &[Rc<VertexRecord>]) -> Result<Vec<Rc<VertexRecord>>> {
        let mut seen = FxHashSet::default();
        let mut next = Vec::new();
        for vertex in level {
            for edge in self
                .edges
                .adjacent(self.conn, edge_ends(self.direction), &vertex.key)?
            {
                for found in self.targets.lookup(self.conn, far_key(&edge, self.direction))? {
                    if seen.insert(key_of(&found.key)) {
                        next.push(Rc::new(found));
                    }
                }
            }
        }
        Ok(next)
    }

    fn endpoints(&self, start: &Rc<VertexRecord>) -> Result<Vec<Rc<VertexRecord>>> {
        let min = self.hops.min;
        let max = if self.chainable {
            self.hops.max
        } else {
            Some(self.hops.max.map_or(1, |max| max.min(1)))
        };
        if max.is_some_and(|max| min > max) {
            return Ok(Vec::new());
        }
        if max == Some(0) {
            return Ok(if self.chainable {
                vec![Rc::clone(start)]
            } else {
                Vec::new()
            });
        }

        // Walks of exactly `first` hops may revisit vertices, so levels
        // up to the lower bound are only deduplicated within themselves.
        let first = min.max(1);
        let mut level = vec![Rc::clone(start)];
        for _ in 0..first {
            level = self.step(&level)?;
            if level.is_empty() {
                break;
            }
        }
        let mut visited: FxHashSet<Vec<ValueKey>> =
            level.iter().map(|v| key_of(&v.key)).collect();
        let mut result = level.clone();
        let mut depth = 0u32;
        let budget = max.map(|max| max - first);
        while !level.is_empty() && budget.map_or(true, |budget| depth < budget) {
            let next: Vec<_> = self
                .step(&level)?
                .into_iter()
                .filter(|v| visited.insert(key_of(&v.key)))
                .collect();
            result.extend(next.iter().cloned());
            level = next;
            depth += 1;
        }
        if min == 0 && self.chainable && !visited.contains(&key_of(&start.key)) {
            result.insert(0, Rc::clone(start));
        }
        Ok(result)
    }

    fn expand(&mut self, row: &BindingRow) -> Result<()> {
        let start = bound_vertex(row, self.from)?;
        let cache_key = key_of(&start.key);
        let endpoints = match self.cache.get(&cache_key) {
            Some(cached) => Rc::clone(cached),
            None => {
                let found = Rc::new(self.endpoints(&start)?);
                debug!(endpoints = found.len(), hops = %self.hops, "resolved path endpoints");
                self.cache.insert(cache_key, Rc::clone(&found));
                found
            }
        };
        if self.to_bound {
            let target = key_of(&bound_vertex(row, self.to)?.key);
            self.pending.extend(
                endpoints
                    .iter()
                    .filter(|v| key_of(&v.key) == target)
                    .cloned(),
            );
        } else {
            self.pending.extend(endpoints.iter().cloned());
        }
        Ok(())
    }
}

impl BindingStream for PathStream<'_> {
    fn try_next(&mut self) -> Result<Option<BindingRow>> {
        loop {
            if let Some(current) = &self.current {
                if let Some(vertex) = self.pending.pop_front() {
                    let mut row = current.clone();
                    row[self.to] = Some(Element::Vertex(vertex));
                    return Ok(Some(row));
                }
                self.current = None;
            }
            let Some(row) = self.input.try_next()? else {
                return Ok(None);
            };
            self.expand(&row)?;
            self.current = Some(row);
        }
    }
}

struct FilterStream<'s> {
    input: BoxBindingStream<'s>,
    predicate: PlanExpr,
}

impl BindingStream for FilterStream<'_> {
    fn try_next(&mut self) -> Result<Option<BindingRow>> {
        while let Some(row) = self.input.try_next()? {
            if truth(&self.predicate, &row)? == Some(true) {
                return Ok(Some(row));
            }
        }
        Ok(None)
    }
}

/// Builds the binding pipeline for `plan`.
pub(crate) fn bind_pipeline<'s>(
    conn: &'s Connection,
    plan: &CompiledQuery,
    fetch_size: usize,
) -> BoxBindingStream<'s> {
    let schema = &plan.schema;
    let mut stream: BoxBindingStream<'s> = Box::new(UnitStream {
        width: plan.slots.len(),
        done: false,
    });
    for step in &plan.steps {
        stream = match step {
            PlanStep::ScanVertices { slot, label } => Box::new(ScanStream {
                input: stream,
                conn,
                access: VertexAccess::new(&schema.vertices[*label]),
                slot: *slot,
                fetch_size: fetch_size.max(1),
                current: None,
                batch: VecDeque::new(),
                after: None,
                exhausted: false,
            }),
            PlanStep::Expand {
                from,
                edge_slot,
                edge,
                direction,
                to,
                to_label,
                to_bound,
            } => Box::new(ExpandStream {
                input: stream,
                conn,
                edges: EdgeAccess::new(&schema.edges[*edge]),
                targets: VertexAccess::new(&schema.vertices[*to_label]),
                direction: *direction,
                from: *from,
                edge_slot: *edge_slot,
                to: *to,
                to_bound: *to_bound,
                current: None,
                pending: VecDeque::new(),
            }),
            PlanStep::ExpandPath {
                from,
                edge,
                direction,
                hops,
                to,
                to_label,
                to_bound,
            } => Box::new(PathStream {
                input: stream,
                conn,
                edges: EdgeAccess::new(&schema.edges[*edge]),
                targets: VertexAccess::new(&schema.vertices[*to_label]),
                direction: *direction,
                hops: *hops,
                chainable: plan.slots[*from].kind == SlotKind::Vertex(*to_label),
                from: *from,
                to: *to,
                to_bound: *to_bound,
                current: None,
                pending: VecDeque::new(),
                cache: FxHashMap::default(),
            }),
            PlanStep::Filter { predicate, .. } => Box::new(FilterStream {
                input: stream,
                predicate: predicate.clone(),
            }),
        };
    }
    stream
}

/// Produces result rows from a binding pipeline.
pub(crate) struct RowSource<'s> {
    input: BoxBindingStream<'s>,
    mode: OutputMode,
    remaining: Option<u64>,
}

enum OutputMode {
    Project {
        exprs: Vec<PlanExpr>,
        seen: Option<FxHashSet<Vec<ValueKey>>>,
    },
    Aggregate {
        specs: Vec<AggregateSpec>,
        done: bool,
    },
}

impl<'s> RowSource<'s> {
    /// Lazily executes `plan` over `conn`.
    pub(crate) fn new(conn: &'s Connection, plan: &CompiledQuery, fetch_size: usize) -> Self {
        let mode = match &plan.output {
            OutputStep::Project(exprs) => OutputMode::Project {
                exprs: exprs.clone(),
                seen: plan.distinct.then(FxHashSet::default),
            },
            OutputStep::Aggregate(specs) => OutputMode::Aggregate {
                specs: specs.clone(),
                done: false,
            },
        };
        Self {
            input: bind_pipeline(conn, plan, fetch_size),
            mode,
            remaining: plan.limit,
        }
    }

    /// Next result row, or `None` once the result is exhausted.
    pub(crate) fn next_row(&mut self) -> Result<Option<Vec<Value>>> {
        if self.remaining == Some(0) {
            return Ok(None);
        }
        let row = match &mut self.mode {
            OutputMode::Project { exprs, seen } => loop {
                let Some(binding) = self.input.try_next()? else {
                    break None;
                };
                let values = exprs
                    .iter()
                    .map(|expr| eval(expr, &binding))
                    .collect::<Result<Vec<_>>>()?;
                if let Some(seen) = seen {
                    if !seen.insert(key_of(&values)) {
                        continue;
                    }
                }
                break Some(values);
            },
            OutputMode::Aggregate { specs, done } => {
                if *done {
                    None
                } else {
                    *done = true;
                    Some(aggregate(self.input.as_mut(), specs)?)
                }
            }
        };
        if row.is_some() {
            if let Some(remaining) = &mut self.remaining {
                *remaining -= 1;
            }
        }
        Ok(row)
    }
}

#[derive(Debug)]
enum AccState {
    Count(i64),
    Extreme(Option<Value>),
    Sum(Option<Value>),
    Avg { total: f64, n: u64 },
}

struct Accumulator<'a> {
    spec: &'a AggregateSpec,
    state: AccState,
    seen: FxHashSet<ValueKey>,
}

impl<'a> Accumulator<'a> {
    fn new(spec: &'a AggregateSpec) -> Self {
        let state = match spec.func {
            AggregateFunc::Count => AccState::Count(0),
            AggregateFunc::Min | AggregateFunc::Max => AccState::Extreme(None),
            AggregateFunc::Sum => AccState::Sum(None),
            AggregateFunc::Avg => AccState::Avg { total: 0.0, n: 0 },
        };
        Self {
            spec,
            state,
            seen: FxHashSet::default(),
        }
    }

    fn update(&mut self, row: &BindingRow) -> Result<()> {
        let Some(arg) = &self.spec.arg else {
            if let AccState::Count(n) = &mut self.state {
                *n += 1;
            }
            return Ok(());
        };
        let value = eval(arg, row)?;
        if value.is_null() || (self.spec.distinct && !self.seen.insert(value.key())) {
            return Ok(());
        }
        let func = self.spec.func;
        match &mut self.state {
            AccState::Count(n) => *n += 1,
            AccState::Extreme(best) => {
                let replace = match best {
                    None => true,
                    Some(current) => {
                        let ord = compare_values(&value, current, func.name())?;
                        match func {
                            AggregateFunc::Min => ord == Ordering::Less,
                            _ => ord == Ordering::Greater,
                        }
                    }
                };
                if replace {
                    *best = Some(value);
                }
            }
            AccState::Sum(total) => {
                let next = match (total.take(), &value) {
                    (None, Value::Int(_) | Value::Float(_)) => value.clone(),
                    (Some(Value::Int(a)), Value::Int(b)) => match a.checked_add(*b) {
                        Some(sum) => Value::Int(sum),
                        None => Value::Float(a as f64 + *b as f64),
                    },
                    (Some(acc), _) => match (acc.as_f64(), value.as_f64()) {
                        (Some(a), Some(b)) => Value::Float(a + b),
                        _ => return Err(not_numeric(func, &value)),
                    },
                    (None, _) => return Err(not_numeric(func, &value)),
                };
                *total = Some(next);
            }
            AccState::Avg { total, n } => {
                let v = value.as_f64().ok_or_else(|| not_numeric(func, &value))?;
                *total += v;
                *n += 1;
            }
        }
        Ok(())
    }

    fn finish(self) -> Value {
        match self.state {
            AccState::Count(n) => Value::Int(n),
            AccState::Extreme(best) => best.unwrap_or(Value::Null),
            AccState::Sum(total) => total.unwrap_or(Value::Null),
            AccState::Avg { n: 0, .. } => Value::Null,
            AccState::Avg { total, n } => Value::Float(total / n as f64),
        }
    }
}

fn not_numeric(func: AggregateFunc, value: &Value) -> GraphError {
    GraphError::type_mismatch(
        func.name(),
        format!("expected a number, found {}", value.type_name()),
    )
}

fn aggregate(input: &mut dyn BindingStream, specs: &[AggregateSpec]) -> Result<Vec<Value>> {
    let mut accs: Vec<_> = specs.iter().map(Accumulator::new).collect();
    let mut rows = 0u64;
    while let Some(row) = input.try_next()? {
        rows += 1;
        for acc in &mut accs {
            acc.update(&row)?;
        }
    }
    debug!(rows, "aggregated binding rows");
    Ok(accs.into_iter().map(Accumulator::finish).collect())
}

/// Evaluates a scalar expression against a binding row.
pub(crate) fn eval(expr: &PlanExpr, row: &BindingRow) -> Result<Value> {
    Ok(match expr {
        PlanExpr::Const(value) => value.clone(),
        PlanExpr::Prop { slot, index, .. } => match row.get(*slot) {
            Some(Some(element)) => element.props().get(*index).cloned().unwrap_or(Value::Null),
            _ => Value::Null,
        },
        PlanExpr::Id { slot } => match row.get(*slot) {
            Some(Some(element)) => identity(element.key()),
            _ => Value::Null,
        },
        PlanExpr::Cmp { .. }
        | PlanExpr::IsNull { .. }
        | PlanExpr::And(_)
        | PlanExpr::Or(_)
        | PlanExpr::Not(_) => truth(expr, row)?.map_or(Value::Null, Value::Bool),
    })
}

/// `ID()` of an element: the key value, or the key values joined by `,`.
fn identity(key: &[Value]) -> Value {
    match key {
        [single] => single.clone(),
        parts => Value::String(
            parts
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(","),
        ),
    }
}

/// Evaluates a predicate under three-valued logic; `None` is UNKNOWN.
pub(crate) fn truth(expr: &PlanExpr, row: &BindingRow) -> Result<Option<bool>> {
    match expr {
        PlanExpr::Cmp { op, left, right } => {
            let left = eval(left, row)?;
            let right = eval(right, row)?;
            if left.is_null() || right.is_null() {
                return Ok(None);
            }
            let ord = compare_values(&left, &right, op.symbol())?;
            Ok(Some(match op {
                CmpOp::Eq => ord == Ordering::Equal,
                CmpOp::Ne => ord != Ordering::Equal,
                CmpOp::Lt => ord == Ordering::Less,
                CmpOp::Le => ord != Ordering::Greater,
                CmpOp::Gt => ord == Ordering::Greater,
                CmpOp::Ge => ord != Ordering::Less,
            }))
        }
        PlanExpr::IsNull { expr, negated } => Ok(Some(eval(expr, row)?.is_null() != *negated)),
        PlanExpr::And(args) => {
            let mut result = Some(true);
            for arg in args {
                match truth(arg, row)? {
                    Some(false) => return Ok(Some(false)),
                    None => result = None,
                    Some(true) => {}
                }
            }
            Ok(result)
        }
        PlanExpr::Or(args) => {
            let mut result = Some(false);
            for arg in args {
                match truth(arg, row)? {
                    Some(true) => return Ok(Some(true)),
                    None => result = None,
                    Some(false) => {}
                }
            }
            Ok(result)
        }
        PlanExpr::Not(inner) => Ok(truth(inner, row)?.map(|b| !b)),
        other => match eval(other, row)? {
            Value::Null => Ok(None),
            Value::Bool(b) => Ok(Some(b)),
            value => Err(GraphError::type_mismatch(
                "predicate",
                format!("expected boolean, found {}", value.type_name()),
            )),
        },
    }
}

/// Orders two non-null values, reading strings as dates when compared
/// against a date.
fn compare_values(left: &Value, right: &Value, context: &str) -> Result<Ordering> {
    let mismatch = || {
        GraphError::type_mismatch(
            context,
            format!("cannot compare {} with {}", left.type_name(), right.type_name()),
        )
    };
    let as_date = |text: &str| Value::parse_date(text).map(Value::Date).ok_or_else(mismatch);
    match (left, right) {
        (Value::Date(_), Value::String(text)) => left.compare(&as_date(text)?).ok_or_else(mismatch),
        (Value::String(text), Value::Date(_)) => as_date(text)?.compare(right).ok_or_else(mismatch),
        _ => left.compare(right).ok_or_else(mismatch),
    }
}
