//! quarz - compile FHIRPath and ViewDefinitions to SQL
//!
//! `quarz compile view.json --dialect=postgres` prints the generated SQL on
//! stdout and the declared column list (JSON) on stderr. Exit codes: 0 on
//! success, 2 on validation errors, 3 on lexer/parser errors, 1 otherwise.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;

use quarz_sof::{compile_view_str, CompileOptions, SqlDialect};

#[derive(Parser)]
#[command(name = "quarz", version, about = "FHIRPath / SQL-on-FHIR compiler")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a ViewDefinition document into a single SQL statement.
    Compile {
        /// Path to the ViewDefinition JSON file ('-' for stdin).
        file: PathBuf,

        /// Target SQL dialect.
        #[arg(long, default_value = "sqlite")]
        dialect: SqlDialect,

        /// Identifier of the source table holding (id, resource) rows.
        #[arg(long, default_value = "fhir_resources")]
        table: String,
    },

    /// Parse a FHIRPath expression and print its AST.
    Parse {
        /// The expression text.
        expression: String,
    },
}

fn main() -> ExitCode {
    init_logging();

    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            ExitCode::from(err.code)
        }
    }
}

struct Failure {
    message: String,
    code: u8,
}

impl Failure {
    fn other(message: impl std::fmt::Display) -> Self {
        Self {
            message: message.to_string(),
            code: 1,
        }
    }
}

impl From<quarz_sof::Error> for Failure {
    fn from(err: quarz_sof::Error) -> Self {
        let code = match &err {
            quarz_sof::Error::Validation { .. } => 2,
            quarz_sof::Error::Fhirpath(_) => 3,
            quarz_sof::Error::Generation(_) => 1,
        };
        Self {
            message: err.to_string(),
            code,
        }
    }
}

impl From<quarz_fhirpath::Error> for Failure {
    fn from(err: quarz_fhirpath::Error) -> Self {
        Self {
            message: err.to_string(),
            code: 3,
        }
    }
}

fn run(cli: Cli) -> Result<(), Failure> {
    match cli.command {
        Command::Compile {
            file,
            dialect,
            table,
        } => compile(&file, dialect, table),
        Command::Parse { expression } => parse(&expression),
    }
}

fn compile(file: &Path, dialect: SqlDialect, table: String) -> Result<(), Failure> {
    let document = read_document(file).map_err(|e| Failure::other(format!("{e:#}")))?;
    debug!(%dialect, table, "compiling ViewDefinition");

    let options = CompileOptions::new(dialect).with_table(table);
    let compiled = compile_view_str(&document, &options)?;

    println!("{}", compiled.sql);
    eprintln!(
        "{}",
        serde_json::to_string_pretty(&compiled.columns).map_err(Failure::other)?
    );
    Ok(())
}

fn read_document(file: &Path) -> anyhow::Result<String> {
    if file.as_os_str() == "-" {
        std::io::read_to_string(std::io::stdin()).context("cannot read stdin")
    } else {
        fs::read_to_string(file).with_context(|| format!("cannot read {}", file.display()))
    }
}

fn parse(expression: &str) -> Result<(), Failure> {
    let ast = quarz_fhirpath::Parser::parse(expression)?;
    println!("{ast:#?}");
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
