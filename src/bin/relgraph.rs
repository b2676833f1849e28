//! Binary entry point: runs a PGQL script inside one session.
#![forbid(unsafe_code)]

use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, ValueEnum};
use relgraph::query::parse_script;
use relgraph::{Config, Cursor, DeclareMode, DropMode, ErrorWithCode, GraphError, Session, Statement, Value};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "relgraph",
    version,
    about = "Run PGQL statements against property graphs declared over SQLite tables"
)]
struct Cli {
    #[arg(long, value_name = "FILE", help = "TOML configuration file")]
    config: Option<PathBuf>,

    #[arg(long, value_name = "PATH", env = "RELGRAPH_DATABASE", help = "SQLite database file")]
    database: Option<PathBuf>,

    #[arg(long, value_name = "NAME", help = "Graph used by SELECT statements without ON")]
    graph: Option<String>,

    #[arg(long, value_enum, default_value_t = OutputFormat::Tsv, help = "Result row format")]
    format: OutputFormat,

    #[arg(long, help = "Print query plans instead of running SELECT statements")]
    explain: bool,

    #[arg(value_name = "SCRIPT", help = "PGQL script; '-' reads standard input")]
    script: PathBuf,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum OutputFormat {
    Tsv,
    Json,
}

fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    if let Err(err) = run(Cli::parse()) {
        eprintln!("error: {}", ErrorWithCode(&err));
        process::exit(1);
    }
}

fn load_config(cli: &Cli) -> relgraph::Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => match relgraph::config::default_config_path().filter(|path| path.exists()) {
            Some(path) => Config::load(&path)?,
            None => Config::default(),
        },
    };
    if let Some(database) = &cli.database {
        config.database = Some(database.clone());
    }
    Ok(config)
}

fn read_script(path: &PathBuf) -> relgraph::Result<String> {
    let io_error = |err: io::Error| GraphError::InvalidState(format!("cannot read {}: {err}", path.display()));
    if path.as_os_str() == "-" {
        let mut text = String::new();
        io::stdin().read_to_string(&mut text).map_err(io_error)?;
        Ok(text)
    } else {
        fs::read_to_string(path).map_err(io_error)
    }
}

fn run(cli: Cli) -> relgraph::Result<()> {
    let config = load_config(&cli)?;
    let statements = parse_script(&read_script(&cli.script)?)?;
    let mut session = Session::connect(config)?;
    if let Some(graph) = &cli.graph {
        session.set_default_graph(graph.clone());
    }
    let stdout = io::stdout();
    let mut out = stdout.lock();
    run_statements(&mut session, statements, &cli, &mut out)?;
    session.close()
}

/// Runs every statement in one transaction; the first failure rolls it back
/// and is returned as is.
fn run_statements(
    session: &mut Session,
    statements: Vec<Statement>,
    cli: &Cli,
    out: &mut impl Write,
) -> relgraph::Result<()> {
    for statement in statements {
        if let Err(err) = run_statement(session, statement, cli, out) {
            if let Err(rollback_err) = session.rollback() {
                warn!(error = %rollback_err, "rollback after failed statement also failed");
            }
            return Err(err);
        }
    }
    session.commit()
}

fn run_statement(
    session: &mut Session,
    statement: Statement,
    cli: &Cli,
    out: &mut impl Write,
) -> relgraph::Result<()> {
    match statement {
        Statement::CreateGraph { schema, replace } => {
            let mode = if replace {
                DeclareMode::Replace
            } else {
                DeclareMode::CreateNew
            };
            let schema = session.declare_schema(schema, mode)?;
            eprintln!("declared property graph {}", schema.name);
        }
        Statement::DropGraph { name, if_exists } => {
            let mode = if if_exists {
                DropMode::IgnoreMissing
            } else {
                DropMode::MustExist
            };
            if session.drop_schema(&name, mode)? {
                eprintln!("dropped property graph {name}");
            }
        }
        Statement::Select(query) if cli.explain => {
            let plan = session.explain(&query)?;
            write_out(out, format_args!("{plan}"))?;
        }
        Statement::Select(query) => {
            let mut cursor = session.query(&query)?;
            let result = print_rows(&mut cursor, cli.format, out);
            cursor.close();
            result?;
        }
    }
    Ok(())
}

fn write_out(out: &mut impl Write, args: std::fmt::Arguments<'_>) -> relgraph::Result<()> {
    out.write_fmt(args)
        .map_err(|err| GraphError::InvalidState(format!("cannot write output: {err}")))
}

fn print_rows(cursor: &mut Cursor<'_>, format: OutputFormat, out: &mut impl Write) -> relgraph::Result<()> {
    match format {
        OutputFormat::Tsv => {
            write_out(out, format_args!("{}\n", cursor.columns().join("\t")))?;
            while cursor.next()? {
                let cells: Vec<String> = cursor.row()?.iter().map(tsv_cell).collect();
                write_out(out, format_args!("{}\n", cells.join("\t")))?;
            }
        }
        OutputFormat::Json => {
            let columns = cursor.columns().to_vec();
            while cursor.next()? {
                let object: serde_json::Map<String, serde_json::Value> = columns
                    .iter()
                    .cloned()
                    .zip(cursor.row()?.iter().map(json_value))
                    .collect();
                write_out(out, format_args!("{}\n", serde_json::Value::Object(object)))?;
            }
        }
    }
    Ok(())
}

fn tsv_cell(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        other => other.to_string().replace(['\t', '\n'], " "),
    }
}

fn json_value(value: &Value) -> serde_json::Value {
    match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Int(i) => serde_json::Value::from(*i),
        Value::Float(f) => serde_json::Value::from(*f),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(_) => serde_json::Value::String(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_statement_error_survives_the_rollback() -> relgraph::Result<()> {
        let cli = Cli::parse_from(["relgraph", "-"]);
        let mut session = Session::connect(Config::in_memory())?;
        session.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")?;
        let statements = parse_script(
            "CREATE PROPERTY GRAPH g VERTEX TABLES (t KEY (id) LABEL item);
             DROP PROPERTY GRAPH missing;",
        )?;
        let mut out = Vec::new();
        let err = run_statements(&mut session, statements, &cli, &mut out).unwrap_err();
        assert_eq!(err.code(), "SchemaNotFound");
        assert!(session.list_schemas()?.is_empty());
        Ok(())
    }
}
