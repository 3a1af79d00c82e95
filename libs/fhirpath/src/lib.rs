//! FHIRPath frontend: lexer, parser, static analyzer
//!
//! This crate turns FHIRPath expression strings into an immutable AST:
//!
//! ```text
//! Expression String
//!      |
//!   Lexer  -> Tokens
//!      |
//!   Parser -> AST (immutable, source spans on every node)
//!      |
//! Analyzer -> annotated AST (cardinality + FHIR type per node)
//! ```
//!
//! Evaluation is out of scope; the AST is consumed by the SQL-on-FHIR
//! translator, which lowers it to SQL.

pub mod analyzer;
pub mod ast;
pub mod error;
pub mod lexer;
pub mod parser;
pub mod printer;
pub mod token;

// Re-export main types
pub use ast::{
    BinaryOp, DataType, Expr, ExprKind, LiteralValue, Population, TypeOperator, UnaryOp, Visitor,
};
pub use error::{Error, Result};
pub use lexer::Lexer;
pub use parser::{ConstantEnv, Parser};
pub use token::{Location, Span, Token, TokenKind};
