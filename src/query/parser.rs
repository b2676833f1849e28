//! PGQL text front-end.
//!
//! Parses `CREATE PROPERTY GRAPH`, `DROP PROPERTY GRAPH` and
//! `SELECT ... FROM MATCH` statements into the same structures the fluent
//! builder produces. Keywords are case-insensitive; `--` starts a comment
//! running to the end of the line.

use nom::branch::alt;
use nom::bytes::complete::{is_not, tag, tag_no_case, take_while};
use nom::character::complete::{char as pchar, digit1, multispace1, none_of, not_line_ending, satisfy};
use nom::combinator::{all_consuming, cut, map, map_opt, map_res, not, opt, recognize, value};
use nom::multi::{fold_many0, many0, many0_count, separated_list1};
use nom::sequence::{delimited, pair, preceded, separated_pair, terminated, tuple};
use nom::IResult;

use crate::error::{GraphError, Result};
use crate::query::ast::{
    AggregateFunc, CmpOp, EdgeDirection, EdgePattern, Expr, HopRange, PathPattern, PathStep,
    PatternQuery, Projection, SelectExpr, Statement, Var, VertexPattern,
};
use crate::query::value::Value;
use crate::schema::{
    EdgeLabelDefinition, GraphSchema, KeyReference, PropertyDef, VertexLabelDefinition,
};

/// Parses a single statement; a trailing `;` is allowed.
pub fn parse_statement(input: &str) -> Result<Statement> {
    let (_, stmt) = all_consuming(terminated(ws(statement), opt(sym(";"))))(input)
        .map_err(parse_error)?;
    Ok(stmt)
}

/// Parses a `;`-separated sequence of statements.
pub fn parse_script(input: &str) -> Result<Vec<Statement>> {
    let (_, stmts) = all_consuming(preceded(
        sp,
        many0(alt((map(statement, Some), value(None, sym(";"))))),
    ))(input)
    .map_err(parse_error)?;
    Ok(stmts.into_iter().flatten().collect())
}

/// Parses a `SELECT` statement.
pub fn parse_query(input: &str) -> Result<PatternQuery> {
    match parse_statement(input)? {
        Statement::Select(query) => Ok(query),
        _ => Err(GraphError::InvalidQuery(
            "expected a SELECT statement".into(),
        )),
    }
}

fn parse_error(err: nom::Err<nom::error::Error<&str>>) -> GraphError {
    let rest = match err {
        nom::Err::Error(e) | nom::Err::Failure(e) => e.input,
        nom::Err::Incomplete(_) => "",
    };
    let fragment: String = rest.trim_start().chars().take(32).collect();
    GraphError::Parse {
        fragment: if fragment.is_empty() {
            "end of input".into()
        } else {
            fragment
        },
    }
}

type PResult<'a, O> = IResult<&'a str, O>;

fn sp(input: &str) -> PResult<'_, ()> {
    value(
        (),
        many0_count(alt((multispace1, preceded(tag("--"), not_line_ending)))),
    )(input)
}

fn ws<'a, F, O>(inner: F) -> impl FnMut(&'a str) -> PResult<'a, O>
where
    F: FnMut(&'a str) -> PResult<'a, O>,
{
    delimited(sp, inner, sp)
}

fn sym<'a>(s: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    ws(tag(s))
}

fn kw<'a>(word: &'static str) -> impl FnMut(&'a str) -> PResult<'a, &'a str> {
    ws(terminated(tag_no_case(word), not(satisfy(is_ident_continue))))
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_continue(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn quoted_identifier(input: &str) -> PResult<'_, String> {
    delimited(
        pchar('"'),
        fold_many0(
            alt((value('"', tag("\"\"")), none_of("\""))),
            String::new,
            |mut acc, c| {
                acc.push(c);
                acc
            },
        ),
        pchar('"'),
    )(input)
}

fn identifier(input: &str) -> PResult<'_, String> {
    ws(alt((
        quoted_identifier,
        map(
            recognize(pair(satisfy(is_ident_start), take_while(is_ident_continue))),
            str::to_owned,
        ),
    )))(input)
}

fn string_literal(input: &str) -> PResult<'_, String> {
    ws(delimited(
        pchar('\''),
        fold_many0(
            alt((value('\'', tag("''")), none_of("'"))),
            String::new,
            |mut acc, c| {
                acc.push(c);
                acc
            },
        ),
        pchar('\''),
    ))(input)
}

fn uint<T: std::str::FromStr>(input: &str) -> PResult<'_, T> {
    map_res(ws(digit1), str::parse::<T>)(input)
}

fn column_list(input: &str) -> PResult<'_, Vec<String>> {
    delimited(sym("("), separated_list1(sym(","), identifier), sym(")"))(input)
}

fn statement(input: &str) -> PResult<'_, Statement> {
    alt((create_graph, drop_graph, select))(input)
}

// ---------------------------------------------------------------------------
// CREATE / DROP PROPERTY GRAPH

#[derive(Clone, Debug)]
enum PropsSpec {
    None,
    All,
    List(Vec<PropertyDef>),
}

struct RawVertexTable {
    table: String,
    alias: Option<String>,
    key: Vec<String>,
    label: Option<String>,
    props: PropsSpec,
}

impl RawVertexTable {
    fn label(&self) -> String {
        self.label
            .clone()
            .or_else(|| self.alias.clone())
            .unwrap_or_else(|| self.table.clone())
    }
}

struct RawEndpoint {
    columns: Vec<String>,
    target: String,
    referenced: Option<Vec<String>>,
}

struct RawEdgeTable {
    table: String,
    alias: Option<String>,
    key: Option<Vec<String>>,
    source: RawEndpoint,
    destination: RawEndpoint,
    label: Option<String>,
    props: PropsSpec,
}

fn drop_graph(input: &str) -> PResult<'_, Statement> {
    let (input, _) = tuple((kw("DROP"), kw("PROPERTY"), kw("GRAPH")))(input)?;
    let (input, (if_exists, name)) =
        cut(pair(opt(pair(kw("IF"), kw("EXISTS"))), identifier))(input)?;
    Ok((
        input,
        Statement::DropGraph {
            name,
            if_exists: if_exists.is_some(),
        },
    ))
}

fn create_graph(input: &str) -> PResult<'_, Statement> {
    let (input, _) = kw("CREATE")(input)?;
    let (input, replace) = opt(pair(kw("OR"), kw("REPLACE")))(input)?;
    let (input, _) = pair(kw("PROPERTY"), kw("GRAPH"))(input)?;
    let (input, schema) = cut(create_body)(input)?;
    Ok((
        input,
        Statement::CreateGraph {
            schema,
            replace: replace.is_some(),
        },
    ))
}

fn create_body(input: &str) -> PResult<'_, GraphSchema> {
    let (input, name) = identifier(input)?;
    let (input, vertices) = preceded(
        pair(kw("VERTEX"), kw("TABLES")),
        delimited(sym("("), separated_list1(sym(","), vertex_table), sym(")")),
    )(input)?;
    let (input, edges) = opt(preceded(
        pair(kw("EDGE"), kw("TABLES")),
        delimited(sym("("), separated_list1(sym(","), edge_table), sym(")")),
    ))(input)?;
    let (input, _) = opt(preceded(
        kw("OPTIONS"),
        delimited(sym("("), opt(is_not(")")), sym(")")),
    ))(input)?;
    Ok((input, build_schema(name, vertices, edges.unwrap_or_default())))
}

fn label_clause(input: &str) -> PResult<'_, Option<String>> {
    opt(preceded(kw("LABEL"), identifier))(input)
}

fn properties(input: &str) -> PResult<'_, PropsSpec> {
    map(
        opt(alt((
            preceded(
                kw("PROPERTIES"),
                alt((
                    value(
                        PropsSpec::All,
                        tuple((opt(kw("ARE")), kw("ALL"), kw("COLUMNS"))),
                    ),
                    map(
                        delimited(sym("("), separated_list1(sym(","), property_item), sym(")")),
                        PropsSpec::List,
                    ),
                )),
            ),
            value(PropsSpec::None, pair(kw("NO"), kw("PROPERTIES"))),
        ))),
        |spec| spec.unwrap_or(PropsSpec::None),
    )(input)
}

fn property_item(input: &str) -> PResult<'_, PropertyDef> {
    map(
        pair(identifier, opt(preceded(kw("AS"), identifier))),
        |(column, name)| match name {
            Some(name) => PropertyDef::aliased(column, name),
            None => PropertyDef::new(column),
        },
    )(input)
}

/// `LABEL` and `PROPERTIES` may come in either order.
fn label_and_properties(input: &str) -> PResult<'_, (Option<String>, PropsSpec)> {
    let (input, label) = label_clause(input)?;
    let (input, props) = properties(input)?;
    let (input, label) = match label {
        Some(label) => (input, Some(label)),
        None => label_clause(input)?,
    };
    Ok((input, (label, props)))
}

fn vertex_table(input: &str) -> PResult<'_, RawVertexTable> {
    let (input, table) = identifier(input)?;
    let (input, alias) = opt(preceded(kw("AS"), identifier))(input)?;
    let (input, key) = opt(preceded(kw("KEY"), column_list))(input)?;
    let (input, (label, props)) = label_and_properties(input)?;
    Ok((
        input,
        RawVertexTable {
            table,
            alias,
            key: key.unwrap_or_default(),
            label,
            props,
        },
    ))
}

fn endpoint(input: &str) -> PResult<'_, RawEndpoint> {
    map(
        tuple((
            preceded(kw("KEY"), column_list),
            preceded(kw("REFERENCES"), identifier),
            opt(column_list),
        )),
        |(columns, target, referenced)| RawEndpoint {
            columns,
            target,
            referenced,
        },
    )(input)
}

fn edge_table(input: &str) -> PResult<'_, RawEdgeTable> {
    let (input, table) = identifier(input)?;
    let (input, alias) = opt(preceded(kw("AS"), identifier))(input)?;
    let (input, key) = opt(preceded(kw("KEY"), column_list))(input)?;
    let (input, source) = preceded(kw("SOURCE"), endpoint)(input)?;
    let (input, destination) = preceded(kw("DESTINATION"), endpoint)(input)?;
    let (input, (label, props)) = label_and_properties(input)?;
    Ok((
        input,
        RawEdgeTable {
            table,
            alias,
            key,
            source,
            destination,
            label,
            props,
        },
    ))
}

fn build_schema(name: String, vertices: Vec<RawVertexTable>, edges: Vec<RawEdgeTable>) -> GraphSchema {
    // REFERENCES may name a vertex table by label, alias or table name.
    let resolve = |target: &str| {
        let matches = |v: &&RawVertexTable| {
            v.label().eq_ignore_ascii_case(target)
                || v.alias.as_deref().is_some_and(|a| a.eq_ignore_ascii_case(target))
                || v.table.eq_ignore_ascii_case(target)
        };
        vertices
            .iter()
            .find(matches)
            .map_or_else(|| target.to_string(), RawVertexTable::label)
    };

    let mut schema = GraphSchema::new(name);
    for vertex in &vertices {
        let mut def = VertexLabelDefinition::new(vertex.label(), vertex.table.clone())
            .key(vertex.key.iter().cloned());
        apply_props(&mut def.properties, &mut def.all_columns, &vertex.props);
        schema.vertices.push(def);
    }
    for edge in edges {
        let label = edge
            .label
            .clone()
            .or_else(|| edge.alias.clone())
            .unwrap_or_else(|| edge.table.clone());
        let reference = |end: &RawEndpoint| KeyReference {
            columns: end.columns.clone(),
            label: resolve(&end.target),
            referenced: end.referenced.clone(),
        };
        let mut def = EdgeLabelDefinition::new(
            label,
            edge.table.clone(),
            reference(&edge.source),
            reference(&edge.destination),
        );
        if let Some(key) = &edge.key {
            def = def.key(key.iter().cloned());
        }
        apply_props(&mut def.properties, &mut def.all_columns, &edge.props);
        schema.edges.push(def);
    }
    schema
}

fn apply_props(properties: &mut Vec<PropertyDef>, all_columns: &mut bool, spec: &PropsSpec) {
    match spec {
        PropsSpec::None => {}
        PropsSpec::All => *all_columns = true,
        PropsSpec::List(list) => properties.extend(list.iter().cloned()),
    }
}

// ---------------------------------------------------------------------------
// SELECT ... FROM MATCH

fn select(input: &str) -> PResult<'_, Statement> {
    map(preceded(kw("SELECT"), cut(select_body)), Statement::Select)(input)
}

fn select_body(input: &str) -> PResult<'_, PatternQuery> {
    let (input, distinct) = opt(kw("DISTINCT"))(input)?;
    let (input, projections) = separated_list1(sym(","), select_item)(input)?;
    let (input, _) = pair(kw("FROM"), kw("MATCH"))(input)?;
    let (input, paths) = separated_list1(sym(","), path)(input)?;
    let (input, graph) = opt(preceded(kw("ON"), identifier))(input)?;
    let (input, filter) = opt(preceded(kw("WHERE"), or_expr))(input)?;
    let (input, limit) = opt(preceded(kw("LIMIT"), uint::<u64>))(input)?;
    Ok((
        input,
        PatternQuery {
            graph,
            paths,
            filter,
            projections,
            distinct: distinct.is_some(),
            limit,
        },
    ))
}

fn select_item(input: &str) -> PResult<'_, Projection> {
    map(
        pair(
            alt((aggregate, map(or_expr, SelectExpr::Scalar))),
            opt(preceded(kw("AS"), identifier)),
        ),
        |(expr, alias)| Projection { expr, alias },
    )(input)
}

fn aggregate(input: &str) -> PResult<'_, SelectExpr> {
    let (input, func) = alt((
        value(AggregateFunc::Count, kw("COUNT")),
        value(AggregateFunc::Min, kw("MIN")),
        value(AggregateFunc::Max, kw("MAX")),
        value(AggregateFunc::Sum, kw("SUM")),
        value(AggregateFunc::Avg, kw("AVG")),
    ))(input)?;
    let (input, _) = sym("(")(input)?;
    if let Ok((rest, _)) = pair(sym("*"), sym(")"))(input) {
        return Ok((
            rest,
            SelectExpr::Aggregate {
                func,
                distinct: false,
                arg: None,
            },
        ));
    }
    let (input, distinct) = opt(kw("DISTINCT"))(input)?;
    let (input, arg) = terminated(or_expr, sym(")"))(input)?;
    Ok((
        input,
        SelectExpr::Aggregate {
            func,
            distinct: distinct.is_some(),
            arg: Some(arg),
        },
    ))
}

fn path(input: &str) -> PResult<'_, PathPattern> {
    let (input, start) = vertex(input)?;
    let (input, steps) = many0(map(pair(edge, vertex), |(edge, vertex)| PathStep {
        edge,
        vertex,
    }))(input)?;
    Ok((input, PathPattern { start, steps }))
}

fn var_and_label(input: &str) -> PResult<'_, (Option<Var>, Option<String>)> {
    pair(
        opt(map(identifier, Var)),
        opt(preceded(sym(":"), identifier)),
    )(input)
}

fn vertex(input: &str) -> PResult<'_, VertexPattern> {
    map(
        delimited(sym("("), var_and_label, sym(")")),
        |(var, label)| VertexPattern { var, label },
    )(input)
}

fn quantifier(input: &str) -> PResult<'_, HopRange> {
    alt((
        value(HopRange::at_least(0), sym("*")),
        value(HopRange::at_least(1), sym("+")),
        value(HopRange::between(0, 1), sym("?")),
        delimited(
            sym("{"),
            alt((
                map(
                    separated_pair(opt(uint::<u32>), sym(","), opt(uint::<u32>)),
                    |(min, max)| HopRange {
                        min: min.unwrap_or(0),
                        max,
                    },
                ),
                map(uint::<u32>, HopRange::exactly),
            )),
            sym("}"),
        ),
    ))(input)
}

fn path_filler(input: &str) -> PResult<'_, (Option<Var>, Option<String>, HopRange)> {
    map(pair(var_and_label, opt(quantifier)), |((var, label), hops)| {
        (var, label, hops.unwrap_or_default())
    })(input)
}

fn edge(input: &str) -> PResult<'_, EdgePattern> {
    let fixed = |direction| {
        move |(var, label): (Option<Var>, Option<String>)| EdgePattern {
            var,
            label,
            direction,
            hops: HopRange::ONE,
        }
    };
    let repeated = |direction| {
        move |(var, label, hops): (Option<Var>, Option<String>, HopRange)| EdgePattern {
            var,
            label,
            direction,
            hops,
        }
    };
    let bare = |direction| EdgePattern {
        direction,
        ..EdgePattern::default()
    };
    alt((
        map(
            delimited(pair(sym("<-"), sym("[")), var_and_label, pair(sym("]"), sym("-"))),
            fixed(EdgeDirection::In),
        ),
        map(
            delimited(sym("<-/"), path_filler, sym("/-")),
            repeated(EdgeDirection::In),
        ),
        value(bare(EdgeDirection::In), sym("<-")),
        map(
            delimited(pair(sym("-"), sym("[")), var_and_label, pair(sym("]"), sym("->"))),
            fixed(EdgeDirection::Out),
        ),
        map(
            delimited(sym("-/"), path_filler, sym("/->")),
            repeated(EdgeDirection::Out),
        ),
        value(bare(EdgeDirection::Out), sym("->")),
    ))(input)
}

// ---------------------------------------------------------------------------
// Expressions, loosest binding first.

fn or_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = and_expr(input)?;
    let (input, rest) = many0(preceded(kw("OR"), and_expr))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::or)))
}

fn and_expr(input: &str) -> PResult<'_, Expr> {
    let (input, first) = not_expr(input)?;
    let (input, rest) = many0(preceded(kw("AND"), not_expr))(input)?;
    Ok((input, rest.into_iter().fold(first, Expr::and)))
}

fn not_expr(input: &str) -> PResult<'_, Expr> {
    alt((map(preceded(kw("NOT"), not_expr), Expr::negate), comparison))(input)
}

fn comparison(input: &str) -> PResult<'_, Expr> {
    let (input, left) = operand(input)?;
    if let Ok((rest, op)) = cmp_op(input) {
        let (rest, right) = operand(rest)?;
        return Ok((rest, left.cmp(op, right)));
    }
    if let Ok((rest, _)) = kw("IS")(input) {
        let (rest, negated) = opt(kw("NOT"))(rest)?;
        let (rest, _) = kw("NULL")(rest)?;
        let expr = if negated.is_some() {
            left.is_not_null()
        } else {
            left.is_null()
        };
        return Ok((rest, expr));
    }
    Ok((input, left))
}

fn cmp_op(input: &str) -> PResult<'_, CmpOp> {
    alt((
        value(CmpOp::Le, sym("<=")),
        value(CmpOp::Ge, sym(">=")),
        value(CmpOp::Ne, sym("<>")),
        value(CmpOp::Ne, sym("!=")),
        value(CmpOp::Eq, sym("=")),
        value(CmpOp::Lt, sym("<")),
        value(CmpOp::Gt, sym(">")),
    ))(input)
}

fn operand(input: &str) -> PResult<'_, Expr> {
    alt((
        delimited(sym("("), or_expr, sym(")")),
        map(literal, Expr::Literal),
        function,
        map(
            separated_pair(identifier, pchar('.'), identifier),
            |(var, prop)| Expr::Prop {
                var: Var(var),
                prop,
            },
        ),
    ))(input)
}

fn function(input: &str) -> PResult<'_, Expr> {
    let arg = || delimited(sym("("), identifier, sym(")"));
    alt((
        map(preceded(kw("ID"), arg()), |var| Expr::Id(Var(var))),
        map(preceded(kw("LABEL"), arg()), |var| Expr::Label(Var(var))),
    ))(input)
}

fn number(input: &str) -> PResult<'_, Value> {
    ws(alt((
        map_res(
            recognize(tuple((opt(pchar('-')), digit1, pchar('.'), digit1))),
            |text: &str| text.parse::<f64>().map(Value::Float),
        ),
        map_res(recognize(pair(opt(pchar('-')), digit1)), |text: &str| {
            text.parse::<i64>().map(Value::Int)
        }),
    )))(input)
}

fn literal(input: &str) -> PResult<'_, Value> {
    alt((
        map_opt(preceded(kw("DATE"), string_literal), |text| {
            Value::parse_date(&text).map(Value::Date)
        }),
        map(string_literal, Value::String),
        number,
        value(Value::Bool(true), kw("TRUE")),
        value(Value::Bool(false), kw("FALSE")),
        value(Value::Null, kw("NULL")),
    ))(input)
}
