#![allow(dead_code)]

use std::path::PathBuf;

use relgraph::{Config, Result, Session, Value};
use tempfile::TempDir;

pub const GRAPH: &str = "company";

pub const TABLES: &str = "
    CREATE TABLE persons (id TEXT PRIMARY KEY, name TEXT NOT NULL, birth_date DATE);
    CREATE TABLE workplaces (id TEXT PRIMARY KEY, name TEXT NOT NULL, type TEXT);
    CREATE TABLE worked_at_edges (person_id TEXT NOT NULL, workplace_id TEXT NOT NULL, end_date DATE);
    CREATE TABLE knows_edges (from_id TEXT NOT NULL, to_id TEXT NOT NULL, since INTEGER);
";

pub const ROWS: &str = "
    INSERT INTO persons VALUES ('p1', 'Ada', '1815-12-10');
    INSERT INTO persons VALUES ('p2', 'Grace', '1906-12-09');
    INSERT INTO persons VALUES ('p3', 'Alan', '1912-06-23');
    INSERT INTO persons VALUES ('p4', 'Edsger', NULL);
    INSERT INTO workplaces VALUES ('w1', 'Navy', 'military');
    INSERT INTO workplaces VALUES ('w2', 'Bletchley', 'government');
    INSERT INTO worked_at_edges VALUES ('p2', 'w1', NULL);
    INSERT INTO worked_at_edges VALUES ('p3', 'w2', '1945-01-01');
    INSERT INTO knows_edges VALUES ('p1', 'p2', 1);
    INSERT INTO knows_edges VALUES ('p2', 'p3', 2);
    INSERT INTO knows_edges VALUES ('p3', 'p1', 3);
    INSERT INTO knows_edges VALUES ('p3', 'p4', 4);
";

pub const CREATE_GRAPH: &str = "
    CREATE PROPERTY GRAPH company
      VERTEX TABLES (
        persons KEY (id) LABEL person PROPERTIES (id, name, birth_date),
        workplaces KEY (id) LABEL workplace PROPERTIES (id, name, type)
      )
      EDGE TABLES (
        worked_at_edges
          SOURCE KEY (person_id) REFERENCES person
          DESTINATION KEY (workplace_id) REFERENCES workplace
          LABEL worked_at PROPERTIES (end_date),
        knows_edges
          SOURCE KEY (from_id) REFERENCES person
          DESTINATION KEY (to_id) REFERENCES person
          LABEL knows PROPERTIES (since)
      )";

/// Temporary directory plus the database path inside it.
pub fn temp_db() -> (TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("graph.db");
    (dir, path)
}

/// Creates tables, rows and the `company` graph, committed.
pub fn seed(config: Config) -> Result<Session> {
    let mut session = Session::connect(config)?;
    session.execute_batch(TABLES)?;
    session.execute_batch(ROWS)?;
    session.execute(CREATE_GRAPH)?;
    session.commit()?;
    Ok(session)
}

pub fn rows(session: &Session, pgql: &str) -> Result<Vec<Vec<Value>>> {
    let mut cursor = session.query_pgql(pgql)?;
    cursor.fetch_all()
}

/// Rows rendered as strings, sorted.
pub fn sorted_text(rows: &[Vec<Value>]) -> Vec<Vec<String>> {
    let mut text: Vec<Vec<String>> = rows
        .iter()
        .map(|row| row.iter().map(Value::to_string).collect())
        .collect();
    text.sort();
    text
}

pub fn text_rows(expected: &[&[&str]]) -> Vec<Vec<String>> {
    let mut rows: Vec<Vec<String>> = expected
        .iter()
        .map(|row| row.iter().map(|cell| cell.to_string()).collect())
        .collect();
    rows.sort();
    rows
}

pub fn count_vertices(session: &Session, label: &str) -> Result<i64> {
    let mut cursor = session.query_pgql(&format!(
        "SELECT COUNT(*) AS n FROM MATCH (v:{label}) ON {GRAPH}"
    ))?;
    assert!(cursor.next()?);
    Ok(cursor.get_i64("n")?.unwrap_or_default())
}
