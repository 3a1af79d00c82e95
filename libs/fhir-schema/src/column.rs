//! Output column descriptors for generated views.

use serde::{Deserialize, Serialize};

/// Declared type hint of a view output column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    /// String-like primitives (string, code, uri, id, ...).
    #[default]
    String,

    /// Whole-number primitives.
    Integer,

    /// Arbitrary-precision decimals.
    Decimal,

    Boolean,

    /// Date values (YYYY, YYYY-MM or YYYY-MM-DD).
    Date,

    /// DateTime / instant values (ISO 8601).
    DateTime,

    /// Time-of-day values.
    Time,

    /// Base64 encoded binary data.
    Base64Binary,

    /// JSON fragment (complex types and collection columns).
    Json,
}

impl ColumnType {
    /// Parse a declared FHIR primitive type name. Unknown names are `None`;
    /// the ViewDefinition validator turns that into an error rather than
    /// silently defaulting.
    pub fn parse(type_name: &str) -> Option<Self> {
        Some(match type_name {
            "string" | "code" | "uri" | "url" | "canonical" | "id" | "oid" | "uuid"
            | "markdown" => Self::String,
            "integer" | "positiveInt" | "unsignedInt" | "integer64" => Self::Integer,
            "decimal" => Self::Decimal,
            "boolean" => Self::Boolean,
            "date" => Self::Date,
            "dateTime" | "instant" => Self::DateTime,
            "time" => Self::Time,
            "base64Binary" => Self::Base64Binary,
            _ => return None,
        })
    }

    /// Best-effort hint from an inferred FHIR type; complex types map to JSON.
    pub fn from_inferred(fhir_type: &str) -> Self {
        Self::parse(fhir_type).unwrap_or(Self::Json)
    }
}

impl std::fmt::Display for ColumnType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "dateTime",
            Self::Time => "time",
            Self::Base64Binary => "base64Binary",
            Self::Json => "json",
        };
        f.write_str(name)
    }
}

/// One column of the generated SELECT, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    pub name: String,

    /// Whether the column may be NULL (a path that can resolve to empty).
    pub nullable: bool,

    /// Declared or inferred type hint.
    #[serde(rename = "type")]
    pub type_hint: ColumnType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, type_hint: ColumnType) -> Self {
        Self {
            name: name.into(),
            nullable: true,
            type_hint,
        }
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_primitives() {
        assert_eq!(ColumnType::parse("code"), Some(ColumnType::String));
        assert_eq!(ColumnType::parse("positiveInt"), Some(ColumnType::Integer));
        assert_eq!(ColumnType::parse("instant"), Some(ColumnType::DateTime));
        assert_eq!(ColumnType::parse("Quantity"), None);
    }

    #[test]
    fn inferred_complex_is_json() {
        assert_eq!(ColumnType::from_inferred("Quantity"), ColumnType::Json);
        assert_eq!(ColumnType::from_inferred("boolean"), ColumnType::Boolean);
    }

    #[test]
    fn serializes_like_a_fhir_name() {
        let col = ColumnInfo::new("phone", ColumnType::String);
        let json = serde_json::to_value(&col).unwrap();
        assert_eq!(json["type"], "string");
        assert_eq!(json["nullable"], true);
    }
}
