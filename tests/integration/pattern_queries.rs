#![allow(clippy::all)]

mod common;

use std::collections::HashSet;

use common::{rows, seed, sorted_text, temp_db, text_rows, GRAPH};
use relgraph::{
    Config, EdgeDirection, Expr, HopRange, Projection, QueryBuilder, Result, SelectExpr, Session,
    Value,
};
use time::macros::date;

fn company() -> Result<(tempfile::TempDir, Session)> {
    let (dir, path) = temp_db();
    let session = seed(Config::file(path))?;
    Ok((dir, session))
}

#[test]
fn fixed_hop_join_returns_only_connected_pairs() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = Session::connect(Config::file(path))?;
    session.execute_batch(
        "CREATE TABLE persons (id TEXT PRIMARY KEY, name TEXT);
         CREATE TABLE workplaces (id TEXT PRIMARY KEY, name TEXT);
         CREATE TABLE worked_at_edges (person_id TEXT, workplace_id TEXT);
         INSERT INTO persons VALUES ('p1', 'Ada'), ('p2', 'Grace');
         INSERT INTO workplaces VALUES ('w1', 'Navy');
         INSERT INTO worked_at_edges VALUES ('p2', 'w1');",
    )?;
    session.execute(
        "CREATE PROPERTY GRAPH worked_at_graph
           VERTEX TABLES (
             persons KEY (id) LABEL person PROPERTIES (id, name),
             workplaces KEY (id) LABEL workplace PROPERTIES (id, name)
           )
           EDGE TABLES (
             worked_at_edges
               SOURCE KEY (person_id) REFERENCES person
               DESTINATION KEY (workplace_id) REFERENCES workplace
               LABEL worked_at
           )",
    )?;

    let mut cursor = session.query_pgql(
        "SELECT p.id AS person, w.id AS workplace \
         FROM MATCH (p:person)-[:worked_at]->(w:workplace) ON worked_at_graph",
    )?;
    assert_eq!(cursor.columns(), ["person", "workplace"]);
    assert!(cursor.next()?);
    assert_eq!(cursor.get_str("person")?, Some("p2"));
    assert_eq!(cursor.get_str("WORKPLACE")?, Some("w1"));
    assert!(!cursor.next()?);
    assert!(!cursor.next()?);
    Ok(())
}

#[test]
fn incoming_direction_matches_reversed_pattern() -> Result<()> {
    let (_dir, session) = company()?;
    let forward = rows(
        &session,
        "SELECT p.name AS person, w.name AS workplace \
         FROM MATCH (p:person)-[:worked_at]->(w:workplace) ON company",
    )?;
    let backward = rows(
        &session,
        "SELECT p.name AS person, w.name AS workplace \
         FROM MATCH (w:workplace)<-[:worked_at]-(p:person) ON company",
    )?;
    assert_eq!(sorted_text(&forward), sorted_text(&backward));
    assert_eq!(
        sorted_text(&forward),
        text_rows(&[&["Alan", "Bletchley"], &["Grace", "Navy"]])
    );
    Ok(())
}

#[test]
fn unlabeled_endpoint_is_inferred_from_edge() -> Result<()> {
    let (_dir, session) = company()?;
    let found = rows(
        &session,
        "SELECT w.type AS kind FROM MATCH (p:person)-[e:worked_at]->(w) ON company",
    )?;
    assert_eq!(
        sorted_text(&found),
        text_rows(&[&["government"], &["military"]])
    );
    Ok(())
}

#[test]
fn unconstrained_variable_is_ambiguous() -> Result<()> {
    let (_dir, session) = company()?;
    let err = session
        .query_pgql("SELECT ID(x) FROM MATCH (x) ON company")
        .unwrap_err();
    assert_eq!(err.code(), "AmbiguousBinding");
    Ok(())
}

#[test]
fn unknown_label_and_property_are_rejected_before_execution() -> Result<()> {
    let (_dir, session) = company()?;
    let err = session
        .query_pgql("SELECT p.name FROM MATCH (p:robot) ON company")
        .unwrap_err();
    assert_eq!(err.code(), "UnknownLabel");
    let err = session
        .query_pgql("SELECT p.salary FROM MATCH (p:person) ON company")
        .unwrap_err();
    assert_eq!(err.code(), "UnknownProperty");
    let err = session
        .query_pgql("SELECT p.name FROM MATCH (p:person) ON nowhere")
        .unwrap_err();
    assert_eq!(err.code(), "SchemaNotFound");
    Ok(())
}

#[test]
fn variable_length_between_person_and_workplace_stops_after_one_hop() -> Result<()> {
    let (_dir, session) = company()?;
    let found = rows(
        &session,
        "SELECT p.id AS person, w.id AS workplace \
         FROM MATCH (p:person)-/:worked_at{1,2}/->(w:workplace) ON company",
    )?;
    assert_eq!(
        sorted_text(&found),
        text_rows(&[&["p2", "w1"], &["p3", "w2"]])
    );
    let none = rows(
        &session,
        "SELECT p.id FROM MATCH (p:person)-/:worked_at{2}/->(w:workplace) ON company",
    )?;
    assert!(none.is_empty());
    Ok(())
}

#[test]
fn exact_hop_count_over_cycle() -> Result<()> {
    let (_dir, session) = company()?;
    let found = rows(
        &session,
        "SELECT a.id AS start, b.id AS reached \
         FROM MATCH (a:person)-/:knows{2}/->(b:person) ON company",
    )?;
    assert_eq!(
        sorted_text(&found),
        text_rows(&[&["p1", "p3"], &["p2", "p1"], &["p2", "p4"], &["p3", "p2"]])
    );
    Ok(())
}

#[test]
fn unbounded_traversal_over_cycle_terminates_with_distinct_endpoints() -> Result<()> {
    let (_dir, session) = company()?;
    let found = rows(
        &session,
        "SELECT a.id AS start, b.id AS reached \
         FROM MATCH (a:person)-/:knows+/->(b:person) ON company",
    )?;
    assert_eq!(found.len(), 12);
    let pairs: HashSet<Vec<String>> = sorted_text(&found).into_iter().collect();
    assert_eq!(pairs.len(), found.len());
    for start in ["p1", "p2", "p3"] {
        for reached in ["p1", "p2", "p3", "p4"] {
            assert!(pairs.contains(&vec![start.to_string(), reached.to_string()]));
        }
    }
    assert!(!pairs.iter().any(|pair| pair[0] == "p4"));
    Ok(())
}

#[test]
fn zero_hop_lower_bound_includes_start_once() -> Result<()> {
    let (_dir, session) = company()?;
    let found = rows(
        &session,
        "SELECT a.id AS start, b.id AS reached \
         FROM MATCH (a:person)-/:knows*/->(b:person) ON company",
    )?;
    assert_eq!(found.len(), 13);
    let text = sorted_text(&found);
    assert!(text.contains(&vec!["p4".to_string(), "p4".to_string()]));
    let self_loops = text.iter().filter(|pair| pair[0] == pair[1]).count();
    assert_eq!(self_loops, 4);
    Ok(())
}

#[test]
fn triangle_closes_on_repeated_variable() -> Result<()> {
    let (_dir, session) = company()?;
    let found = rows(
        &session,
        "SELECT a.id AS a, b.id AS b, c.id AS c \
         FROM MATCH (a:person)-[:knows]->(b:person)-[:knows]->(c:person)-[:knows]->(a) \
         ON company",
    )?;
    assert_eq!(
        sorted_text(&found),
        text_rows(&[&["p1", "p2", "p3"], &["p2", "p3", "p1"], &["p3", "p1", "p2"]])
    );
    Ok(())
}

#[test]
fn count_star_equals_materialised_row_count() -> Result<()> {
    let (_dir, session) = company()?;
    let pattern = "FROM MATCH (a:person)-/:knows+/->(b:person) ON company";
    let materialised = rows(&session, &format!("SELECT a.id AS src, b.id AS dst {pattern}"))?;
    let mut cursor = session.query_pgql(&format!("SELECT COUNT(*) AS total {pattern}"))?;
    assert!(cursor.next()?);
    assert_eq!(cursor.get_i64("total")?, Some(materialised.len() as i64));
    assert!(!cursor.next()?);
    Ok(())
}

#[test]
fn limit_truncates_and_zero_limit_is_empty() -> Result<()> {
    let (_dir, session) = company()?;
    let pattern = "FROM MATCH (a:person)-/:knows+/->(b:person) ON company";
    assert_eq!(rows(&session, &format!("SELECT a.id {pattern} LIMIT 5"))?.len(), 5);
    assert_eq!(rows(&session, &format!("SELECT a.id {pattern} LIMIT 100"))?.len(), 12);
    assert!(rows(&session, &format!("SELECT a.id {pattern} LIMIT 0"))?.is_empty());
    Ok(())
}

#[test]
fn distinct_removes_duplicate_rows() -> Result<()> {
    let (_dir, session) = company()?;
    let starts = rows(
        &session,
        "SELECT DISTINCT a.id AS start FROM MATCH (a:person)-/:knows+/->(b:person) ON company",
    )?;
    assert_eq!(
        sorted_text(&starts),
        text_rows(&[&["p1"], &["p2"], &["p3"]])
    );
    let limited = rows(
        &session,
        "SELECT DISTINCT a.id FROM MATCH (a:person)-/:knows+/->(b:person) ON company LIMIT 2",
    )?;
    assert_eq!(limited.len(), 2);
    assert_ne!(limited[0], limited[1]);
    Ok(())
}

#[test]
fn aggregates_over_bindings() -> Result<()> {
    let (_dir, session) = company()?;
    let mut cursor = session.query_pgql(
        "SELECT COUNT(DISTINCT b.id) AS reached, MIN(k.since) AS first, MAX(k.since) AS last, \
                SUM(k.since) AS total, AVG(k.since) AS mean \
         FROM MATCH (a:person)-[k:knows]->(b:person) ON company",
    )?;
    assert!(cursor.next()?);
    assert_eq!(cursor.get_i64("reached")?, Some(4));
    assert_eq!(cursor.get_i64("first")?, Some(1));
    assert_eq!(cursor.get_i64("last")?, Some(4));
    assert_eq!(cursor.get_i64("total")?, Some(10));
    assert_eq!(cursor.get_f64("mean")?, Some(2.5));
    assert!(!cursor.next()?);
    Ok(())
}

#[test]
fn aggregates_over_empty_input() -> Result<()> {
    let (_dir, session) = company()?;
    let found = rows(
        &session,
        "SELECT COUNT(*) AS n, MAX(p.name) AS top FROM MATCH (p:person) ON company \
         WHERE p.name = 'Nobody'",
    )?;
    assert_eq!(found, vec![vec![Value::Int(0), Value::Null]]);
    Ok(())
}

#[test]
fn null_checks_and_unknown_comparisons() -> Result<()> {
    let (_dir, session) = company()?;
    let current = rows(
        &session,
        "SELECT p.name FROM MATCH (p:person)-[e:worked_at]->(w:workplace) ON company \
         WHERE e.end_date IS NULL",
    )?;
    assert_eq!(sorted_text(&current), text_rows(&[&["Grace"]]));

    // Edsger has no birth date: the comparison is unknown in both directions.
    let early = rows(
        &session,
        "SELECT p.name FROM MATCH (p:person) ON company WHERE p.birth_date < DATE '1900-01-01'",
    )?;
    assert_eq!(sorted_text(&early), text_rows(&[&["Ada"]]));
    let late = rows(
        &session,
        "SELECT p.name FROM MATCH (p:person) ON company WHERE NOT (p.birth_date < DATE '1900-01-01')",
    )?;
    assert_eq!(sorted_text(&late), text_rows(&[&["Alan"], &["Grace"]]));
    Ok(())
}

#[test]
fn date_compares_with_date_string() -> Result<()> {
    let (_dir, session) = company()?;
    let mut cursor = session.query_pgql(
        "SELECT p.birth_date AS born FROM MATCH (p:person) ON company \
         WHERE p.birth_date > '1910-01-01'",
    )?;
    assert!(cursor.next()?);
    assert_eq!(cursor.get_date("born")?, Some(date!(1912 - 06 - 23)));
    assert!(!cursor.next()?);
    Ok(())
}

#[test]
fn boolean_precedence_in_filters() -> Result<()> {
    let (_dir, session) = company()?;
    let found = rows(
        &session,
        "SELECT p.id FROM MATCH (p:person) ON company \
         WHERE p.id = 'p1' OR p.id = 'p2' AND p.name = 'Nobody'",
    )?;
    assert_eq!(sorted_text(&found), text_rows(&[&["p1"]]));
    Ok(())
}

#[test]
fn identity_and_label_functions() -> Result<()> {
    let (_dir, session) = company()?;
    let mut cursor = session.query_pgql(
        "SELECT ID(p) AS pid, LABEL(p) AS kind, LABEL(e) AS rel \
         FROM MATCH (p:person)-[e:worked_at]->(w:workplace) ON company WHERE w.id = 'w1'",
    )?;
    assert!(cursor.next()?);
    assert_eq!(cursor.get_str("pid")?, Some("p2"));
    assert_eq!(cursor.get_str("kind")?, Some("person"));
    assert_eq!(cursor.get_str("rel")?, Some("worked_at"));
    assert!(!cursor.next()?);
    Ok(())
}

#[test]
fn builder_and_pgql_produce_same_rows_and_plan() -> Result<()> {
    let (_dir, session) = company()?;
    let pgql = "SELECT p.name AS person, w.name AS workplace \
                FROM MATCH (p:person)-[:worked_at]->(w:workplace) ON company \
                WHERE p.birth_date > DATE '1900-01-01'";
    let built = QueryBuilder::new()
        .on(GRAPH)
        .r#match(("p", "person"))
        .where_edge("worked_at", ("w", "workplace"))
        .where_var("p", |pred| {
            pred.gt("birth_date", date!(1900 - 01 - 01));
        })
        .select([("p.name", "person"), ("w.name", "workplace")])
        .build()?;
    let parsed = relgraph::query::parse_query(pgql)?;
    assert_eq!(session.explain(&built)?, session.explain(&parsed)?);

    let mut cursor = session.query(&built)?;
    let from_builder = cursor.fetch_all()?;
    let from_text = rows(&session, pgql)?;
    assert_eq!(sorted_text(&from_builder), sorted_text(&from_text));
    assert_eq!(from_builder.len(), 2);
    Ok(())
}

#[test]
fn builder_variable_length_and_aggregate() -> Result<()> {
    let (_dir, session) = company()?;
    let query = QueryBuilder::new()
        .on(GRAPH)
        .r#match(("b", "person"))
        .direction(EdgeDirection::In)
        .where_edge(
            relgraph::query::EdgeSpec::label("knows").hops(HopRange::at_least(1)),
            ("a", "person"),
        )
        .select([Projection::aliased(SelectExpr::count_star(), "paths")])
        .build()?;
    let mut cursor = session.query(&query)?;
    assert!(cursor.next()?);
    // Every person is reached from three starts over the cycle; p4 is a sink.
    assert_eq!(cursor.get_i64("paths")?, Some(12));
    Ok(())
}

#[test]
fn explain_is_deterministic_and_names_operators() -> Result<()> {
    let (_dir, session) = company()?;
    let query = relgraph::query::parse_query(
        "SELECT DISTINCT b.name FROM MATCH (a:person)-/:knows{1,3}/->(b:person) ON company \
         WHERE a.id = 'p1' LIMIT 3",
    )?;
    let first = session.explain(&query)?;
    let second = session.explain(&query)?;
    assert_eq!(first, second);
    assert!(first.starts_with("Graph company"));
    assert!(first.contains("ScanVertices (a:person)"));
    assert!(first.contains("ExpandPath"));
    assert!(first.contains("Limit 3"));
    assert_eq!(session.prepare(&query)?, session.prepare(&query)?);
    Ok(())
}

#[test]
fn default_graph_applies_without_on_clause() -> Result<()> {
    let (_dir, mut session) = company()?;
    let err = session
        .query_pgql("SELECT p.name FROM MATCH (p:person)")
        .unwrap_err();
    assert_eq!(err.code(), "InvalidQuery");
    session.set_default_graph(GRAPH);
    assert_eq!(rows(&session, "SELECT p.name FROM MATCH (p:person)")?.len(), 4);
    session.clear_default_graph();
    assert!(session.default_graph().is_none());
    Ok(())
}

#[test]
fn small_fetch_size_scans_every_vertex() -> Result<()> {
    let (_dir, path) = temp_db();
    drop(seed(Config::file(&path))?);
    let session = Session::connect(Config::file(&path).with_fetch_size(1))?;
    let found = rows(&session, "SELECT p.id FROM MATCH (p:person) ON company")?;
    assert_eq!(
        sorted_text(&found),
        text_rows(&[&["p1"], &["p2"], &["p3"], &["p4"]])
    );
    Ok(())
}

#[test]
fn filter_built_from_expressions() -> Result<()> {
    let (_dir, session) = company()?;
    let query = QueryBuilder::new()
        .on(GRAPH)
        .r#match(("p", "person"))
        .filter(
            Expr::prop("p", "name")
                .eq("Ada")
                .or(Expr::prop("p", "birth_date").is_null()),
        )
        .select(["p.id"])
        .build()?;
    let mut cursor = session.query(&query)?;
    let found = cursor.fetch_all()?;
    assert_eq!(sorted_text(&found), text_rows(&[&["p1"], &["p4"]]));
    Ok(())
}

#[test]
fn cursor_accessors_report_state_errors() -> Result<()> {
    let (_dir, session) = company()?;
    let mut cursor = session.query_pgql(
        "SELECT p.name AS name, p.birth_date AS born FROM MATCH (p:person) ON company \
         WHERE p.id = 'p1'",
    )?;
    assert_eq!(cursor.get("name").unwrap_err().code(), "InvalidState");
    assert!(cursor.next()?);
    assert_eq!(cursor.get("missing").unwrap_err().code(), "ColumnNotFound");
    assert_eq!(cursor.get_i64("name").unwrap_err().code(), "TypeMismatch");
    assert_eq!(cursor.get_at(1)?, &Value::Date(date!(1815 - 12 - 10)));
    cursor.close();
    cursor.close();
    assert!(cursor.is_closed());
    assert_eq!(cursor.next().unwrap_err().code(), "InvalidState");
    Ok(())
}

#[test]
fn scans_include_zero_and_negative_integer_keys() -> Result<()> {
    for fetch_size in [1, 256] {
        let mut session = Session::connect(Config::in_memory().with_fetch_size(fetch_size))?;
        session.execute_batch(
            "CREATE TABLE items (id INTEGER PRIMARY KEY, name TEXT);
             INSERT INTO items VALUES (-5, 'minus five'), (0, 'zero'), (7, 'seven');",
        )?;
        session.execute(
            "CREATE PROPERTY GRAPH g VERTEX TABLES (items KEY (id) LABEL item PROPERTIES (id, name))",
        )?;

        let mut cursor = session.query_pgql("SELECT COUNT(*) AS n FROM MATCH (i:item) ON g")?;
        assert!(cursor.next()?);
        assert_eq!(cursor.get_i64("n")?, Some(3), "fetch_size {fetch_size}");
        drop(cursor);

        let ids = rows(&session, "SELECT i.id FROM MATCH (i:item) ON g")?;
        assert_eq!(
            ids,
            vec![vec![Value::Int(-5)], vec![Value::Int(0)], vec![Value::Int(7)]],
            "fetch_size {fetch_size}"
        );
    }
    Ok(())
}
