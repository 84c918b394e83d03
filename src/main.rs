use anyhow::Result;
use clap::{Parser, Subcommand};
use serde_json::json;
use std::path::PathBuf;
use std::process::ExitCode;
use table_reconciler::db::{self, fetch::select_sql, ConnectionDescriptor, FetchOptions};
use table_reconciler::reconcile::{self, Reconciler, State};
use table_reconciler::request::{ErrorReport, Invocation};
use table_reconciler::{ReconcileError, TypeRegistry};
use tracing::error;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "table-reconciler")]
#[command(about = "Converge a database table to a declared state")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Reconcile the table described by a request document
    Apply {
        /// Request document (JSON), or `-` for stdin
        request: PathBuf,

        /// Report what would change without writing
        #[arg(long)]
        check: bool,

        /// Connection string (overrides the document and DATABASE_URL)
        #[arg(long)]
        database: Option<String>,

        /// Create the table from the column specs if it does not exist
        #[arg(long)]
        create: bool,
    },
    /// Print the select a request would run, without opening the database
    Plan {
        /// Request document (JSON), or `-` for stdin
        request: PathBuf,
    },
}

fn main() -> Result<ExitCode> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    // stdout carries the result document, logs go to stderr
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let outcome = match args.command {
        Commands::Apply {
            request,
            check,
            database,
            create,
        } => apply(request, check, database, create),
        Commands::Plan { request } => plan(request),
    };

    match outcome {
        Ok(output) => {
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            error!("Reconciliation failed: {}", err);
            println!("{}", serde_json::to_string_pretty(&ErrorReport::from(&err))?);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn apply(
    request_path: PathBuf,
    check: bool,
    database: Option<String>,
    create: bool,
) -> std::result::Result<serde_json::Value, ReconcileError> {
    let invocation = Invocation::load(&request_path)?;
    let mut request = invocation.to_request()?;
    request.check_mode |= check;

    let registry = TypeRegistry::standard();
    // resolve types and operators before any statement runs
    reconcile::plan(&request, &registry)?;

    let descriptor: ConnectionDescriptor =
        invocation.connection_url(database.as_deref())?.parse()?;
    let conn = db::open(&descriptor)?;

    let result = Reconciler::new(&conn, &registry).apply(&request, create)?;
    Ok(serde_json::to_value(&result)?)
}

fn plan(request_path: PathBuf) -> std::result::Result<serde_json::Value, ReconcileError> {
    let invocation = Invocation::load(&request_path)?;
    let request = invocation.to_request()?;
    let registry = TypeRegistry::standard();
    let plan = reconcile::plan(&request, &registry)?;

    let options = FetchOptions {
        distinct: request.distinct,
        count_only: request.state == State::Count,
    };
    let (sql, params) = select_sql(&plan.schema, &plan.predicate, options);

    Ok(json!({
        "table": plan.schema.name,
        "state": request.state,
        "sql": sql,
        "params": params,
    }))
}
