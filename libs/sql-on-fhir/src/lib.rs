//! SQL-on-FHIR ViewDefinition compiler.
//!
//! Compiles a ViewDefinition document into one SQL statement:
//!
//! ```text
//! ViewDefinition JSON
//!      |
//! Validation + translation -> Relation Tree (FHIRPath ASTs at the leaves)
//!      |
//! CTE generation           -> ordered t1..tN chain
//!      |
//! Assembly                 -> WITH ... SELECT, plus the column list
//! ```
//!
//! The generated statement reads a source table with the logical schema
//! `(id TEXT, resource JSON)` and is byte-identical across repeated
//! compilations of the same input. Executing it is the caller's concern.
//!
//! ```
//! use quarz_sof::{compile_view, CompileOptions, SqlDialect};
//! use serde_json::json;
//!
//! let view = json!({
//!     "resource": "Patient",
//!     "select": [{"column": [{"name": "id", "path": "id"}]}]
//! });
//! let compiled = compile_view(&view, &CompileOptions::new(SqlDialect::Sqlite)).unwrap();
//! assert!(compiled.sql.starts_with("WITH t1 AS ("));
//! assert_eq!(compiled.columns[0].name, "id");
//! ```

pub mod assemble;
pub mod cte;
pub mod dialect;
pub mod error;
pub mod generator;
pub mod relation;
pub mod translate;
pub mod view_definition;

use serde_json::Value;
use tracing::debug;

// Re-export main types
pub use dialect::SqlDialect;
pub use error::{Error, Result, ValidationKind};
pub use quarz_schema::{ColumnInfo, ColumnType};
pub use view_definition::ViewDefinition;

/// Compilation parameters: target dialect and source table identifier.
#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub dialect: SqlDialect,

    /// Identifier of the source table holding `(id, resource)` rows.
    pub table: String,
}

impl CompileOptions {
    pub fn new(dialect: SqlDialect) -> Self {
        Self {
            dialect,
            table: "fhir_resources".into(),
        }
    }

    pub fn with_table(mut self, table: impl Into<String>) -> Self {
        self.table = table.into();
        self
    }
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self::new(SqlDialect::default())
    }
}

/// A compiled view: the SQL statement and its declared output columns.
#[derive(Debug, Clone)]
pub struct GeneratedSql {
    pub sql: String,
    pub columns: Vec<ColumnInfo>,
}

/// Compile a ViewDefinition JSON value.
pub fn compile_view(document: &Value, options: &CompileOptions) -> Result<GeneratedSql> {
    let view = ViewDefinition::from_json(document)?;
    let tree = translate::translate(&view)?;

    let handler = options.dialect.handler();
    let generator = generator::Generator::new(handler, &options.table, &tree.resource_type);
    let query = generator.generate(&tree)?;

    debug_assert_eq!(
        query.column_names,
        tree.columns.iter().map(|c| c.name.clone()).collect::<Vec<_>>(),
        "generated projection must match the declared column list"
    );

    let sql = assemble::assemble(&query, handler);
    debug!(dialect = %options.dialect, bytes = sql.len(), "compiled view");

    Ok(GeneratedSql {
        sql,
        columns: tree.columns,
    })
}

/// Compile a ViewDefinition from JSON text.
pub fn compile_view_str(document: &str, options: &CompileOptions) -> Result<GeneratedSql> {
    let value: Value = serde_json::from_str(document)
        .map_err(|e| Error::validation(ValidationKind::Empty, e.to_string()))?;
    compile_view(&value, options)
}
