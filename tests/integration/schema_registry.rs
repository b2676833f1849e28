#![allow(clippy::all)]

mod common;

use common::{count_vertices, rows, seed, temp_db, CREATE_GRAPH, GRAPH, TABLES};
use relgraph::schema::LabelRef;
use relgraph::{
    Config, DeclareMode, DropMode, EdgeLabelDefinition, GraphSchema, IntegrityIssue, KeyReference,
    PropertyType, Result, Session, Value, VertexLabelDefinition,
};

fn person_only(name: &str) -> GraphSchema {
    GraphSchema::new(name).with_vertex(
        VertexLabelDefinition::new("person", "persons")
            .key(["id"])
            .properties(["id", "name"]),
    )
}

#[test]
fn declared_schema_survives_reopen_with_inferred_types() -> Result<()> {
    let (_dir, path) = temp_db();
    seed(Config::file(&path))?.close()?;

    let session = Session::connect(Config::file(&path))?;
    assert_eq!(session.list_schemas()?, vec![GRAPH.to_string()]);
    assert!(session.schema_exists("COMPANY")?);

    let schema = session.resolve_schema(GRAPH)?;
    let person = schema.vertex("person").expect("person label");
    let born = &person.properties[person.property_index("birth_date").expect("birth_date")];
    assert_eq!(born.property_type(), PropertyType::Date);
    let knows = schema.edge("knows").expect("knows label");
    assert_eq!(knows.key, vec!["from_id", "to_id"]);
    let since = &knows.properties[knows.property_index("since").expect("since")];
    assert_eq!(since.property_type(), PropertyType::Integer);

    match schema.resolve_label("worked_at")? {
        LabelRef::Edge(def) => assert_eq!(def.table, "worked_at_edges"),
        LabelRef::Vertex(def) => panic!("expected an edge label, got {}", def.label),
    }
    assert_eq!(
        schema.resolve_label("robot").unwrap_err().code(),
        "UnknownLabel"
    );
    Ok(())
}

#[test]
fn duplicate_declaration_conflicts_unless_replacing() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = seed(Config::file(path))?;

    let err = session.execute(CREATE_GRAPH).unwrap_err();
    assert_eq!(err.code(), "SchemaConflict");
    // Compile-time failures leave the transaction usable.
    assert_eq!(count_vertices(&session, "workplace")?, 2);

    session.execute(
        "CREATE OR REPLACE PROPERTY GRAPH company
           VERTEX TABLES (persons KEY (id) LABEL person PROPERTIES (id, name))",
    )?;
    let err = session
        .query_pgql("SELECT w.name FROM MATCH (w:workplace) ON company")
        .unwrap_err();
    assert_eq!(err.code(), "UnknownLabel");
    assert_eq!(count_vertices(&session, "person")?, 4);

    let stored = session.declare_schema(person_only(GRAPH), DeclareMode::Replace)?;
    assert_eq!(stored.vertices.len(), 1);
    assert_eq!(session.list_schemas()?, vec![GRAPH.to_string()]);
    Ok(())
}

#[test]
fn drop_modes_and_queries_after_drop() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = seed(Config::file(path))?;

    let err = session.drop_schema("missing", DropMode::MustExist).unwrap_err();
    assert_eq!(err.code(), "SchemaNotFound");
    assert!(!session.drop_schema("missing", DropMode::IgnoreMissing)?);

    assert!(session.drop_schema(GRAPH, DropMode::MustExist)?);
    assert!(!session.schema_exists(GRAPH)?);
    let err = session
        .query_pgql("SELECT p.name FROM MATCH (p:person) ON company")
        .unwrap_err();
    assert_eq!(err.code(), "SchemaNotFound");

    // Backing tables are untouched by dropping the graph.
    let remaining: i64 = {
        session.declare_schema(person_only("people"), DeclareMode::CreateNew)?;
        let found = rows(&session, "SELECT COUNT(*) FROM MATCH (p:person) ON people")?;
        found[0][0].as_i64().unwrap_or_default()
    };
    assert_eq!(remaining, 4);
    Ok(())
}

#[test]
fn rolled_back_declaration_is_forgotten() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = Session::connect(Config::file(&path))?;
    session.execute_batch(TABLES)?;
    session.commit()?;

    session.execute(CREATE_GRAPH)?;
    assert!(session.schema_exists(GRAPH)?);
    session.rollback()?;
    assert!(!session.schema_exists(GRAPH)?);
    assert!(session.list_schemas()?.is_empty());
    Ok(())
}

#[test]
fn invalid_declarations_are_rejected() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = Session::connect(Config::file(path))?;
    session.execute_batch(TABLES)?;

    let missing_table = GraphSchema::new("g").with_vertex(
        VertexLabelDefinition::new("robot", "robots").key(["id"]),
    );
    let err = session
        .declare_schema(missing_table, DeclareMode::CreateNew)
        .unwrap_err();
    assert_eq!(err.code(), "InvalidDefinition");

    let missing_column = GraphSchema::new("g").with_vertex(
        VertexLabelDefinition::new("person", "persons")
            .key(["id"])
            .properties(["salary"]),
    );
    let err = session
        .declare_schema(missing_column, DeclareMode::CreateNew)
        .unwrap_err();
    assert_eq!(err.code(), "InvalidDefinition");

    let unknown_target = person_only("g").with_edge(EdgeLabelDefinition::new(
        "works_for",
        "worked_at_edges",
        KeyReference::new(["person_id"], "person"),
        KeyReference::new(["workplace_id"], "workplace"),
    ));
    let err = session
        .declare_schema(unknown_target, DeclareMode::CreateNew)
        .unwrap_err();
    assert_eq!(err.code(), "UnknownLabel");

    let arity = person_only("g").with_edge(EdgeLabelDefinition::new(
        "knows",
        "knows_edges",
        KeyReference::new(["from_id", "since"], "person"),
        KeyReference::new(["to_id"], "person"),
    ));
    let err = session.declare_schema(arity, DeclareMode::CreateNew).unwrap_err();
    assert_eq!(err.code(), "InvalidDefinition");

    let err = session
        .execute("CREATE PROPERTY GRAPH g VERTEX TABLES (persons KEY (id) LABEL person PROPERTIES (shoe_size))")
        .unwrap_err();
    assert_eq!(err.code(), "InvalidDefinition");

    assert!(session.list_schemas()?.is_empty());
    Ok(())
}

#[test]
fn all_columns_and_primary_key_defaults() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = Session::connect(Config::file(path))?;
    session.execute_batch(TABLES)?;
    session.execute_batch(common::ROWS)?;
    session.execute(
        "CREATE PROPERTY GRAPH places
           VERTEX TABLES (workplaces LABEL workplace PROPERTIES ARE ALL COLUMNS)",
    )?;
    let schema = session.resolve_schema("places")?;
    let workplace = schema.vertex("workplace").expect("workplace label");
    assert_eq!(workplace.key, vec!["id"]);
    let names: Vec<&str> = workplace.properties.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, ["id", "name", "type"]);

    let mut cursor =
        session.query_pgql("SELECT w.type AS kind FROM MATCH (w:workplace) ON places WHERE w.id = 'w2'")?;
    assert!(cursor.next()?);
    assert_eq!(cursor.get_str("kind")?, Some("government"));
    Ok(())
}

#[test]
fn stats_and_integrity_report() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = seed(Config::file(path))?;

    let stats = session.graph_stats(GRAPH)?;
    assert_eq!(
        stats.vertices,
        vec![("person".to_string(), 4), ("workplace".to_string(), 2)]
    );
    assert_eq!(
        stats.edges,
        vec![("worked_at".to_string(), 2), ("knows".to_string(), 4)]
    );
    assert_eq!(stats.vertex_count(), 6);
    assert_eq!(stats.edge_count(), 6);
    assert!(session.verify_schema(GRAPH)?.is_clean());

    session.execute_sql(
        "INSERT INTO worked_at_edges VALUES (?1, ?2, NULL)",
        ["p9", "w1"],
    )?;
    let report = session.verify_schema(GRAPH)?;
    assert_eq!(
        report.issues,
        vec![IntegrityIssue::DanglingReferences {
            label: "worked_at".into(),
            end: "source",
            rows: 1,
        }]
    );
    assert_eq!(
        report.issues[0].to_string(),
        "worked_at: 1 dangling source reference(s)"
    );
    Ok(())
}

#[test]
fn mutations_go_through_labels() -> Result<()> {
    let (_dir, path) = temp_db();
    let mut session = seed(Config::file(path))?;

    session.insert_vertex(
        GRAPH,
        "person",
        &[("id", Value::from("p5")), ("name", Value::from("Barbara"))],
    )?;
    session.insert_edge(
        GRAPH,
        "knows",
        &[
            ("from_id", Value::from("p4")),
            ("to_id", Value::from("p5")),
            ("since", Value::from(5)),
        ],
    )?;
    assert_eq!(count_vertices(&session, "person")?, 5);
    let reached = rows(
        &session,
        "SELECT b.name FROM MATCH (a:person)-/:knows+/->(b:person) ON company WHERE a.id = 'p4'",
    )?;
    assert_eq!(reached, vec![vec![Value::from("Barbara")]]);

    let err = session
        .insert_vertex(GRAPH, "person", &[("id", Value::from("p6")), ("salary", Value::from(1))])
        .unwrap_err();
    assert_eq!(err.code(), "UnknownProperty");
    let err = session
        .insert_vertex(GRAPH, "person", &[("name", Value::from("Nameless"))])
        .unwrap_err();
    assert_eq!(err.code(), "InvalidQuery");
    let err = session
        .insert_vertex(GRAPH, "knows", &[("from_id", Value::from("p1"))])
        .unwrap_err();
    assert_eq!(err.code(), "TypeMismatch");

    assert_eq!(
        session.delete_edge(GRAPH, "knows", &[Value::from("p4"), Value::from("p5")])?,
        1
    );
    assert_eq!(session.delete_vertex(GRAPH, "person", &[Value::from("p5")])?, 1);
    assert_eq!(session.delete_vertex(GRAPH, "person", &[Value::from("p5")])?, 0);
    let err = session.delete_edge(GRAPH, "knows", &[Value::from("p1")]).unwrap_err();
    assert_eq!(err.code(), "InvalidQuery");
    assert_eq!(count_vertices(&session, "person")?, 4);
    Ok(())
}
