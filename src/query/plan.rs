//! Executable plan produced by the pattern compiler.
//!
//! A plan is an ordered list of binding steps followed by one terminal
//! output step. Every variable of the pattern owns a slot in the binding
//! row; steps fill slots left to right.

use std::fmt::{self, Write as _};

use crate::query::ast::{AggregateFunc, CmpOp, EdgeDirection, HopRange};
use crate::query::value::Value;
use crate::schema::{GraphSchema, PropertyType};

/// What a binding slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotKind {
    /// Vertex of `schema.vertices[idx]`.
    Vertex(usize),
    /// Edge of `schema.edges[idx]`.
    Edge(usize),
}

/// Named binding slot.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Slot {
    /// Variable name (generated for anonymous elements).
    pub name: String,
    /// Bound label.
    pub kind: SlotKind,
}

/// Expression with variables resolved to slots and properties to indices.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanExpr {
    /// Constant, including folded `LABEL(v)`.
    Const(Value),
    /// Property `index` of the element in `slot`.
    Prop {
        /// Binding slot.
        slot: usize,
        /// Position in the label's property list.
        index: usize,
        /// Declared property type.
        ty: PropertyType,
    },
    /// Key of the element in `slot`.
    Id {
        /// Binding slot.
        slot: usize,
    },
    /// Comparison.
    Cmp {
        /// Operator.
        op: CmpOp,
        /// Left operand.
        left: Box<PlanExpr>,
        /// Right operand.
        right: Box<PlanExpr>,
    },
    /// Null test.
    IsNull {
        /// Tested expression.
        expr: Box<PlanExpr>,
        /// `IS NOT NULL`.
        negated: bool,
    },
    /// Conjunction.
    And(Vec<PlanExpr>),
    /// Disjunction.
    Or(Vec<PlanExpr>),
    /// Negation.
    Not(Box<PlanExpr>),
}

/// Binding step.
#[derive(Clone, Debug, PartialEq)]
pub enum PlanStep {
    /// Binds `slot` to every vertex of `label`, once per upstream row.
    ScanVertices {
        /// Target slot.
        slot: usize,
        /// Vertex label index.
        label: usize,
    },
    /// Single-hop join from `from` through edge label `edge` to `to`.
    Expand {
        /// Bound vertex slot the hop starts from.
        from: usize,
        /// Slot receiving the edge.
        edge_slot: usize,
        /// Edge label index.
        edge: usize,
        /// Written direction.
        direction: EdgeDirection,
        /// Vertex slot at the far end.
        to: usize,
        /// Vertex label index at the far end.
        to_label: usize,
        /// `to` is already bound; the hop only checks it.
        to_bound: bool,
    },
    /// Variable-length traversal producing distinct reachable endpoints.
    ExpandPath {
        /// Bound vertex slot the path starts from.
        from: usize,
        /// Edge label index.
        edge: usize,
        /// Written direction.
        direction: EdgeDirection,
        /// Repetition range.
        hops: HopRange,
        /// Vertex slot at the far end.
        to: usize,
        /// Vertex label index at the far end.
        to_label: usize,
        /// `to` is already bound; the path only checks it.
        to_bound: bool,
    },
    /// Keeps rows for which the predicate is TRUE.
    Filter {
        /// Predicate.
        predicate: PlanExpr,
        /// Source text, for explain output.
        text: String,
    },
}

/// Aggregate in the terminal step.
#[derive(Clone, Debug, PartialEq)]
pub struct AggregateSpec {
    /// Function.
    pub func: AggregateFunc,
    /// Deduplicate argument values.
    pub distinct: bool,
    /// Argument; `None` counts rows.
    pub arg: Option<PlanExpr>,
}

/// Terminal step turning binding rows into result rows.
#[derive(Clone, Debug, PartialEq)]
pub enum OutputStep {
    /// One result row per binding row.
    Project(Vec<PlanExpr>),
    /// One result row for the whole binding stream.
    Aggregate(Vec<AggregateSpec>),
}

/// Compiled, schema-bound pattern query.
#[derive(Clone, Debug, PartialEq)]
pub struct CompiledQuery {
    /// Schema the plan was compiled against.
    pub schema: GraphSchema,
    /// Binding slots.
    pub slots: Vec<Slot>,
    /// Binding steps in execution order.
    pub steps: Vec<PlanStep>,
    /// Terminal step.
    pub output: OutputStep,
    /// Output column names.
    pub columns: Vec<String>,
    /// Deduplicate result rows.
    pub distinct: bool,
    /// Result cap.
    pub limit: Option<u64>,
}

impl CompiledQuery {
    /// Name of the target graph.
    pub fn graph(&self) -> &str {
        &self.schema.name
    }

    fn slot_name(&self, slot: usize) -> &str {
        self.slots.get(slot).map_or("?", |s| s.name.as_str())
    }

    fn label_name(&self, kind: SlotKind) -> &str {
        match kind {
            SlotKind::Vertex(idx) => self.schema.vertices.get(idx).map_or("?", |v| v.label.as_str()),
            SlotKind::Edge(idx) => self.schema.edges.get(idx).map_or("?", |e| e.label.as_str()),
        }
    }

    /// Human-readable plan, one operator per line.
    pub fn explain(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Graph {}", self.graph());
        for step in &self.steps {
            let _ = writeln!(out, "  {}", StepDisplay { plan: self, step });
        }
        match &self.output {
            OutputStep::Project(_) => {
                let distinct = if self.distinct { " distinct" } else { "" };
                let _ = writeln!(out, "  Project{distinct} [{}]", self.columns.join(", "));
            }
            OutputStep::Aggregate(_) => {
                let _ = writeln!(out, "  Aggregate [{}]", self.columns.join(", "));
            }
        }
        if let Some(limit) = self.limit {
            let _ = writeln!(out, "  Limit {limit}");
        }
        out
    }
}

struct StepDisplay<'a> {
    plan: &'a CompiledQuery,
    step: &'a PlanStep,
}

impl fmt::Display for StepDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let plan = self.plan;
        let arrows = |direction: EdgeDirection| match direction {
            EdgeDirection::Out => ("-", "->"),
            EdgeDirection::In => ("<-", "-"),
        };
        match self.step {
            PlanStep::ScanVertices { slot, label } => write!(
                f,
                "ScanVertices ({}:{})",
                plan.slot_name(*slot),
                plan.label_name(SlotKind::Vertex(*label))
            ),
            PlanStep::Expand {
                from,
                edge_slot,
                edge,
                direction,
                to,
                to_label,
                to_bound,
            } => {
                let (left, right) = arrows(*direction);
                write!(
                    f,
                    "Expand ({}){left}[{}:{}]{right}({}:{}){}",
                    plan.slot_name(*from),
                    plan.slot_name(*edge_slot),
                    plan.label_name(SlotKind::Edge(*edge)),
                    plan.slot_name(*to),
                    plan.label_name(SlotKind::Vertex(*to_label)),
                    if *to_bound { " check" } else { "" }
                )
            }
            PlanStep::ExpandPath {
                from,
                edge,
                direction,
                hops,
                to,
                to_label,
                to_bound,
            } => {
                let (left, right) = arrows(*direction);
                write!(
                    f,
                    "ExpandPath ({}){left}/:{}{hops}/{right}({}:{}){}",
                    plan.slot_name(*from),
                    plan.label_name(SlotKind::Edge(*edge)),
                    plan.slot_name(*to),
                    plan.label_name(SlotKind::Vertex(*to_label)),
                    if *to_bound { " check" } else { "" }
                )
            }
            PlanStep::Filter { text, .. } => write!(f, "Filter {text}"),
        }
    }
}
