//! Error types for the FHIRPath frontend

use crate::token::{Location, TokenKind};
use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Lexer and parser errors. Every variant carries the source location at
/// which the pipeline stopped; no partial output is produced past an error.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum Error {
    #[error("lexer error at {location}: {message}")]
    Lexer { message: String, location: Location },

    #[error("parse error at {location}: {message}")]
    Parse {
        message: String,
        location: Location,
        /// Token kinds that would have been accepted instead.
        expected: Vec<TokenKind>,
    },

    #[error("undefined constant %{name} at {location}")]
    UndefinedConstant { name: String, location: Location },
}

impl Error {
    pub fn lexer(message: impl Into<String>, location: Location) -> Self {
        Self::Lexer {
            message: message.into(),
            location,
        }
    }

    pub fn parse(message: impl Into<String>, location: Location, expected: Vec<TokenKind>) -> Self {
        Self::Parse {
            message: message.into(),
            location,
            expected,
        }
    }

    /// Stable machine-readable tag, independent of the human message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Lexer { .. } => "lexer",
            Self::Parse { .. } => "parse",
            Self::UndefinedConstant { .. } => "undefined_constant",
        }
    }

    pub fn location(&self) -> Location {
        match self {
            Self::Lexer { location, .. }
            | Self::Parse { location, .. }
            | Self::UndefinedConstant { location, .. } => *location,
        }
    }
}
