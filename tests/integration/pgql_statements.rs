#![allow(clippy::all)]

mod common;

use common::{rows, sorted_text, temp_db, text_rows, ROWS, TABLES};
use relgraph::query::{parse_query, parse_script};
use relgraph::{Config, DeclareMode, DropMode, Result, Session, Statement};

const SCRIPT: &str = "
    -- graph over the company tables
    CREATE PROPERTY GRAPH \"Staff\"
      VERTEX TABLES (
        persons AS people KEY (id) LABEL person PROPERTIES (id, name AS full_name)
      )
      EDGE TABLES (
        knows_edges
          SOURCE KEY (from_id) REFERENCES people (id)
          DESTINATION KEY (to_id) REFERENCES persons
          LABEL knows PROPERTIES ARE ALL COLUMNS
      );

    select a.full_name as who, b.full_name as whom
      from match (a:person)-[k:knows]->(b:person) on \"Staff\"
      where k.since >= 3;

    DROP PROPERTY GRAPH IF EXISTS nothing_here;
";

/// Runs a script the way the command-line front-end does, collecting the
/// rows of each SELECT.
fn run_script(session: &mut Session, script: &str) -> Result<Vec<Vec<Vec<String>>>> {
    let mut results = Vec::new();
    for statement in parse_script(script)? {
        match statement {
            Statement::CreateGraph { schema, replace } => {
                let mode = if replace {
                    DeclareMode::Replace
                } else {
                    DeclareMode::CreateNew
                };
                session.declare_schema(schema, mode)?;
            }
            Statement::DropGraph { name, if_exists } => {
                let mode = if if_exists {
                    DropMode::IgnoreMissing
                } else {
                    DropMode::MustExist
                };
                session.drop_schema(&name, mode)?;
            }
            Statement::Select(query) => {
                let mut cursor = session.query(&query)?;
                results.push(sorted_text(&cursor.fetch_all()?));
            }
        }
    }
    Ok(results)
}

fn session_with_tables() -> Result<(tempfile::TempDir, Session)> {
    let (dir, path) = temp_db();
    let mut session = Session::connect(Config::file(path))?;
    session.execute_batch(TABLES)?;
    session.execute_batch(ROWS)?;
    Ok((dir, session))
}

#[test]
fn script_declares_queries_and_drops() -> Result<()> {
    let (_dir, mut session) = session_with_tables()?;
    let results = run_script(&mut session, SCRIPT)?;
    assert_eq!(
        results,
        vec![text_rows(&[&["Alan", "Ada"], &["Alan", "Edsger"]])]
    );
    assert_eq!(session.list_schemas()?, vec!["Staff".to_string()]);

    let schema = session.resolve_schema("Staff")?;
    let knows = schema.edge("knows").expect("knows label");
    let exposed: Vec<&str> = knows.properties.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(exposed, ["from_id", "to_id", "since"]);
    assert_eq!(knows.destination.label, "person");
    Ok(())
}

#[test]
fn ddl_runs_through_execute() -> Result<()> {
    let (_dir, mut session) = session_with_tables()?;
    session.execute(
        "create property graph g vertex tables (workplaces key (id) label workplace properties (name));",
    )?;
    assert!(session.schema_exists("g")?);

    let err = session
        .execute("SELECT w.name FROM MATCH (w:workplace) ON g")
        .unwrap_err();
    assert_eq!(err.code(), "InvalidQuery");
    let err = session.query_pgql("DROP PROPERTY GRAPH g").unwrap_err();
    assert_eq!(err.code(), "InvalidQuery");

    let names = rows(&session, "SELECT w.name FROM MATCH (w:workplace) ON g")?;
    assert_eq!(sorted_text(&names), text_rows(&[&["Bletchley"], &["Navy"]]));

    session.execute("DROP PROPERTY GRAPH g")?;
    let err = session.execute("DROP PROPERTY GRAPH g").unwrap_err();
    assert_eq!(err.code(), "SchemaNotFound");
    session.execute("DROP PROPERTY GRAPH IF EXISTS g")?;
    Ok(())
}

#[test]
fn aliased_property_is_queried_by_its_exposed_name() -> Result<()> {
    let (_dir, mut session) = session_with_tables()?;
    run_script(&mut session, SCRIPT)?;
    let err = session
        .query_pgql("SELECT p.name FROM MATCH (p:person) ON \"Staff\"")
        .unwrap_err();
    assert_eq!(err.code(), "UnknownProperty");
    let found = rows(
        &session,
        "SELECT p.full_name FROM MATCH (p:person) ON \"Staff\" WHERE p.id = 'p2'",
    )?;
    assert_eq!(sorted_text(&found), text_rows(&[&["Grace"]]));
    Ok(())
}

#[test]
fn parse_errors_name_the_failing_fragment() -> Result<()> {
    let (_dir, mut session) = session_with_tables()?;

    let err = session
        .query_pgql("SELECT p.name FROM MATCH (p:person ON g")
        .unwrap_err();
    assert_eq!(err.code(), "ParseError");
    assert!(err.to_string().contains("ON g"), "{err}");

    let err = session
        .execute("CREATE PROPERTY GRAPH VERTEX TABLES ()")
        .unwrap_err();
    assert_eq!(err.code(), "ParseError");

    let err = parse_query("SELECT FROM MATCH (p)").unwrap_err();
    assert_eq!(err.code(), "ParseError");

    let err = parse_script("DROP PROPERTY GRAPH g; SELEKT 1;").unwrap_err();
    assert_eq!(err.code(), "ParseError");
    assert!(err.to_string().contains("SELEKT"), "{err}");

    // Parse failures never reach the store, so the transaction stays usable.
    session.execute_batch("INSERT INTO workplaces VALUES ('w3', 'Bell Labs', 'industry')")?;
    Ok(())
}

#[test]
fn quantifier_bounds_are_validated() -> Result<()> {
    let (_dir, mut session) = session_with_tables()?;
    run_script(&mut session, SCRIPT)?;
    let err = session
        .query_pgql("SELECT b.id FROM MATCH (a:person)-/:knows{3,1}/->(b:person) ON \"Staff\"")
        .unwrap_err();
    assert_eq!(err.code(), "InvalidQuery");
    Ok(())
}
