//! Error types for ViewDefinition compilation

use thiserror::Error;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Machine-readable validation failure categories. The tags are part of the
/// public contract; messages are not.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValidationKind {
    /// Empty or non-object document.
    Empty,
    /// The `resource` field is missing or blank.
    MissingResource,
    /// The `select` array is missing or empty.
    MissingSelect,
    /// A FHIRPath expression failed to parse.
    InvalidPath,
    /// A `where` path is statically known not to be boolean.
    WhereNotBoolean,
    /// A `forEach` path is statically known to be scalar.
    ForeachRequiresCollection,
    /// A column with `collection = false` has a collection-valued path.
    CollectionMismatch,
    /// `unionAll` children disagree on their ordered column names.
    UnionColumnMismatch,
    /// Two columns share a name in the flattened output.
    DuplicateColumn,
    /// A `%name` reference has no matching constant.
    UndefinedConstant,
    /// A constant entry declares no value.
    InvalidConstant,
    /// A column declares an unrecognised `type`.
    UnknownType,
}

impl ValidationKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Empty => "empty",
            Self::MissingResource => "missing_resource",
            Self::MissingSelect => "missing_select",
            Self::InvalidPath => "invalid_path",
            Self::WhereNotBoolean => "where_not_boolean",
            Self::ForeachRequiresCollection => "foreach_requires_collection",
            Self::CollectionMismatch => "collection_mismatch",
            Self::UnionColumnMismatch => "union_column_mismatch",
            Self::DuplicateColumn => "duplicate_column",
            Self::UndefinedConstant => "undefined_constant",
            Self::InvalidConstant => "invalid_constant",
            Self::UnknownType => "unknown_type",
        }
    }
}

impl std::fmt::Display for ValidationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ViewDefinition compilation errors.
#[derive(Error, Debug)]
pub enum Error {
    /// The document failed structural or static validation.
    #[error("validation error ({}): {detail}", kind.as_str())]
    Validation {
        kind: ValidationKind,
        detail: String,
    },

    /// A FHIRPath expression inside the document failed to lex or parse.
    #[error(transparent)]
    Fhirpath(#[from] quarz_fhirpath::Error),

    /// The generator met a construct the target dialect cannot express.
    /// Both shipped dialects support the full operation set; reserved for
    /// future dialects.
    #[error("generation error: {0}")]
    Generation(String),
}

impl Error {
    pub fn validation(kind: ValidationKind, detail: impl Into<String>) -> Self {
        Self::Validation {
            kind,
            detail: detail.into(),
        }
    }

    /// Stable machine-readable tag.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { kind, .. } => kind.as_str(),
            Self::Fhirpath(inner) => inner.kind(),
            Self::Generation(_) => "generation",
        }
    }
}
