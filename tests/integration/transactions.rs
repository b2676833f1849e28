#![allow(clippy::all)]

mod common;

use common::{count_vertices, rows, seed, temp_db, GRAPH};
use relgraph::{Config, Result, Session, TxState, Value};

#[test]
fn failed_execution_aborts_until_rollback() -> Result<()> {
    let (_dir, path) = temp_db();
    drop(seed(Config::file(&path))?);

    let mut session = Session::connect(Config::file(&path))?;
    session.execute_sql(
        "INSERT INTO persons (id, name) VALUES (?1, ?2)",
        ["p5", "Barbara"],
    )?;
    let err = session
        .execute_sql("INSERT INTO persons (id, name) VALUES (?1, ?2)", ["p1", "Duplicate"])
        .unwrap_err();
    assert_eq!(err.code(), "ExecutionError");
    assert_eq!(session.state(), TxState::Aborted);

    let err = session.query_pgql("SELECT p.name FROM MATCH (p:person) ON company").unwrap_err();
    assert_eq!(err.code(), "TransactionError");
    assert_eq!(session.commit().unwrap_err().code(), "TransactionError");

    session.rollback()?;
    assert_eq!(session.state(), TxState::Active);
    assert_eq!(count_vertices(&session, "person")?, 4);
    session.close()?;

    let fresh = Session::connect(Config::file(&path))?;
    assert_eq!(count_vertices(&fresh, "person")?, 4);
    Ok(())
}

#[test]
fn runtime_type_mismatch_aborts_and_leaves_tables_unchanged() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut setup = seed(Config::file(&path))?;
    setup.execute_sql("UPDATE persons SET birth_date = 'someday' WHERE id = 'p3'", [])?;
    setup.commit()?;
    setup.close()?;

    let mut session = Session::connect(Config::file(&path))?;
    session.execute_sql("DELETE FROM knows_edges", [])?;
    {
        let mut cursor = session.query_pgql(
            "SELECT p.birth_date AS born FROM MATCH (p:person) ON company",
        )?;
        let err = cursor.fetch_all().unwrap_err();
        assert_eq!(err.code(), "TypeMismatch");
        assert!(!cursor.next()?);
    }
    assert_eq!(session.state(), TxState::Aborted);
    let err = session.query_pgql("SELECT p.id FROM MATCH (p:person) ON company").unwrap_err();
    assert_eq!(err.code(), "TransactionError");
    session.rollback()?;
    session.close()?;

    let fresh = Session::connect(Config::file(&path))?;
    let stats = fresh.graph_stats(GRAPH)?;
    assert_eq!(stats.edges[1], ("knows".to_string(), 4));
    Ok(())
}

#[test]
fn committed_work_is_visible_to_later_sessions() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = seed(Config::file(&path))?;
    session.insert_vertex(
        GRAPH,
        "workplace",
        &[("id", Value::from("w3")), ("name", Value::from("Bell Labs"))],
    )?;
    session.commit()?;
    assert_eq!(session.state(), TxState::Active);
    session.insert_vertex(
        GRAPH,
        "workplace",
        &[("id", Value::from("w4")), ("name", Value::from("Uncommitted"))],
    )?;
    session.close()?;
    assert_eq!(session.state(), TxState::Closed);

    let fresh = Session::connect(Config::file(&path))?;
    let names = rows(
        &fresh,
        "SELECT w.name FROM MATCH (w:workplace) ON company WHERE w.id >= 'w3'",
    )?;
    assert_eq!(names, vec![vec![Value::from("Bell Labs")]]);
    Ok(())
}

#[test]
fn dropping_an_open_session_rolls_back() -> Result<()> {
    let (_dir, path) = temp_db();
    drop(seed(Config::file(&path))?);
    {
        let mut session = Session::connect(Config::file(&path))?;
        session.delete_vertex(GRAPH, "person", &[Value::from("p1")])?;
        assert_eq!(count_vertices(&session, "person")?, 3);
    }
    let fresh = Session::connect(Config::file(&path))?;
    assert_eq!(count_vertices(&fresh, "person")?, 4);
    Ok(())
}

#[test]
fn session_state_machine() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = Session::new(Config::file(&path));
    assert_eq!(session.state(), TxState::Idle);
    assert_eq!(session.commit().unwrap_err().code(), "TransactionError");
    assert_eq!(
        session.query_pgql("SELECT p.id FROM MATCH (p:person) ON company").unwrap_err().code(),
        "InvalidState"
    );

    session.open()?;
    assert_eq!(session.state(), TxState::Active);
    assert_eq!(session.open().unwrap_err().code(), "InvalidState");
    session.rollback()?;
    session.commit()?;

    session.close()?;
    session.close()?;
    assert_eq!(session.state(), TxState::Closed);
    assert_eq!(session.rollback().unwrap_err().code(), "TransactionError");
    assert_eq!(session.list_schemas().unwrap_err().code(), "InvalidState");
    Ok(())
}

#[test]
fn missing_database_without_create_fails_to_connect() {
    let (_dir, path) = temp_db();
    let config = Config {
        create_if_missing: false,
        ..Config::file(&path)
    };
    let err = Session::connect(config).unwrap_err();
    assert_eq!(err.code(), "ConnectionError");
    assert!(!path.exists());
}

#[test]
fn read_only_session_rejects_writes() -> Result<()> {
    let (_dir, path) = temp_db();
    drop(seed(Config::file(&path))?);

    let config = Config {
        read_only: true,
        ..Config::file(&path)
    };
    let mut session = Session::connect(config)?;
    assert_eq!(count_vertices(&session, "person")?, 4);
    let err = session
        .insert_vertex(GRAPH, "person", &[("id", Value::from("p9")), ("name", Value::from("Nope"))])
        .unwrap_err();
    assert_eq!(err.code(), "ExecutionError");
    assert_eq!(session.state(), TxState::Aborted);
    session.rollback()?;
    Ok(())
}

#[test]
fn raw_statements_cannot_end_the_transaction() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = Session::connect(Config::file(&path))?;
    session.execute_batch("CREATE TABLE t (id INTEGER)")?;
    session.commit()?;

    let err = session
        .execute_batch("COMMIT; INSERT INTO t VALUES (1)")
        .unwrap_err();
    assert_eq!(err.code(), "TransactionError");
    assert_eq!(session.state(), TxState::Aborted);
    let err = session.execute_sql("INSERT INTO t VALUES (2)", []).unwrap_err();
    assert_eq!(err.code(), "TransactionError");
    assert_eq!(session.commit().unwrap_err().code(), "TransactionError");

    session.rollback()?;
    assert_eq!(session.state(), TxState::Active);
    session.execute_sql("INSERT INTO t VALUES (3)", [])?;
    session.rollback()?;
    session.close()?;

    // Only the row written right after the stray COMMIT reached disk; the
    // rolled-back insert did not.
    let mut fresh = Session::connect(Config::file(&path))?;
    assert_eq!(fresh.execute_sql("DELETE FROM t", [])?, 1);
    fresh.rollback()?;
    Ok(())
}
