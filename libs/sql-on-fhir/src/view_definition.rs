//! ViewDefinition parsing and types.
//!
//! Data structures for the ViewDefinition resource of the SQL on FHIR
//! Implementation Guide. Metadata fields a server would care about
//! (`url`, `name`, `status`, ...) are accepted and otherwise ignored; the
//! compiler consumes `resource`, `select`, `where` and `constant`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, ValidationKind};

/// A ViewDefinition resource that defines a tabular view over FHIR data.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewDefinition {
    /// Resource type discriminator (always "ViewDefinition" when present).
    #[serde(default)]
    pub resource_type: Option<String>,

    /// Canonical URL identifying this ViewDefinition.
    pub url: Option<String>,

    /// Human-readable name for the view.
    pub name: Option<String>,

    /// Publication status: draft | active | retired | unknown.
    pub status: Option<String>,

    /// Description of the view's purpose.
    pub description: Option<String>,

    /// The FHIR resource type this view is based on.
    #[serde(default)]
    pub resource: Option<String>,

    /// The columns and nested selects to include in the view.
    #[serde(default)]
    pub select: Vec<SelectElement>,

    /// Filter conditions; every row must satisfy all of them.
    /// Named `where_` because `where` is a Rust reserved word.
    #[serde(default, rename = "where")]
    pub where_: Vec<WhereClause>,

    /// Constants referenced as `%name` in FHIRPath expressions.
    #[serde(default)]
    pub constant: Vec<Constant>,
}

/// One select element: at most one iteration clause, plus columns, nested
/// selects and unionAll branches.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelectElement {
    /// Column definitions at this level.
    #[serde(default)]
    pub column: Vec<Column>,

    /// Nested select elements evaluated in this element's context.
    #[serde(default)]
    pub select: Vec<SelectElement>,

    /// FHIRPath expression unnested to one row per element.
    pub for_each: Option<String>,

    /// Like `forEach`, but an empty collection still yields one row with
    /// nulls for the dependent columns.
    pub for_each_or_null: Option<String>,

    /// Branches concatenated by SQL UNION ALL; all branches must expose the
    /// same ordered column list.
    #[serde(default)]
    pub union_all: Vec<SelectElement>,
}

/// A column definition in a ViewDefinition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    /// The column name in the output.
    pub name: String,

    /// FHIRPath expression extracting the column value.
    pub path: String,

    /// Declared FHIR primitive type of the column.
    #[serde(rename = "type")]
    pub col_type: Option<String>,

    /// Whether this column holds a collection (JSON array output).
    #[serde(default)]
    pub collection: bool,

    /// Human-readable description; ignored by the compiler.
    pub description: Option<String>,
}

/// A where clause filtering rows of the view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhereClause {
    /// FHIRPath expression that must evaluate to true.
    pub path: String,
}

/// A named constant, referenced as `%name`. Exactly one `value[x]` field is
/// expected.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constant {
    pub name: String,

    pub value_string: Option<String>,
    pub value_integer: Option<i64>,
    pub value_boolean: Option<bool>,
    pub value_decimal: Option<f64>,
    pub value_code: Option<String>,
    pub value_uri: Option<String>,
    pub value_date: Option<String>,
    pub value_date_time: Option<String>,
    pub value_time: Option<String>,
}

impl ViewDefinition {
    /// Parse a ViewDefinition from a JSON value.
    pub fn from_json(value: &Value) -> Result<Self, Error> {
        if !value.is_object() || value.as_object().is_some_and(|o| o.is_empty()) {
            return Err(Error::validation(
                ValidationKind::Empty,
                "ViewDefinition must be a non-empty JSON object",
            ));
        }
        serde_json::from_value(value.clone())
            .map_err(|e| Error::validation(ValidationKind::Empty, e.to_string()))
    }

    /// Parse a ViewDefinition from a JSON string.
    pub fn parse(s: &str) -> Result<Self, Error> {
        let value: Value = serde_json::from_str(s)
            .map_err(|e| Error::validation(ValidationKind::Empty, e.to_string()))?;
        Self::from_json(&value)
    }
}

impl SelectElement {
    /// The iteration path, if either `forEach` or `forEachOrNull` is set.
    /// The second element is `keep_null_rows`.
    pub fn iteration(&self) -> Option<(&str, bool)> {
        if let Some(path) = &self.for_each {
            Some((path, false))
        } else {
            self.for_each_or_null.as_deref().map(|path| (path, true))
        }
    }
}

impl Constant {
    /// The constant's literal value, if exactly one `value[x]` is populated.
    pub fn literal(&self) -> Option<quarz_fhirpath::LiteralValue> {
        use quarz_fhirpath::LiteralValue;

        if let Some(s) = &self.value_string {
            return Some(LiteralValue::String(s.clone()));
        }
        if let Some(s) = &self.value_code {
            return Some(LiteralValue::String(s.clone()));
        }
        if let Some(s) = &self.value_uri {
            return Some(LiteralValue::String(s.clone()));
        }
        if let Some(i) = self.value_integer {
            return Some(LiteralValue::Integer(i));
        }
        if let Some(b) = self.value_boolean {
            return Some(LiteralValue::Boolean(b));
        }
        if let Some(d) = self.value_decimal {
            return rust_decimal_from_f64(d).map(LiteralValue::Decimal);
        }
        if let Some(s) = &self.value_date {
            return Some(LiteralValue::Date(s.clone()));
        }
        if let Some(s) = &self.value_date_time {
            return Some(LiteralValue::DateTime(s.clone()));
        }
        if let Some(s) = &self.value_time {
            return Some(LiteralValue::Time(s.clone()));
        }
        None
    }
}

fn rust_decimal_from_f64(value: f64) -> Option<rust_decimal::Decimal> {
    rust_decimal::Decimal::try_from(value).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_simple_view_definition() {
        let doc = json!({
            "resourceType": "ViewDefinition",
            "name": "patient_demographics",
            "status": "active",
            "resource": "Patient",
            "select": [{
                "column": [
                    {"name": "id", "path": "id"},
                    {"name": "gender", "path": "gender"}
                ]
            }]
        });

        let view = ViewDefinition::from_json(&doc).unwrap();
        assert_eq!(view.resource.as_deref(), Some("Patient"));
        assert_eq!(view.select.len(), 1);
        assert_eq!(view.select[0].column.len(), 2);
        assert_eq!(view.select[0].column[0].name, "id");
    }

    #[test]
    fn parse_foreach() {
        let doc = json!({
            "resource": "Patient",
            "select": [{
                "forEach": "name",
                "column": [{"name": "family", "path": "family"}]
            }]
        });

        let view = ViewDefinition::from_json(&doc).unwrap();
        assert_eq!(view.select[0].iteration(), Some(("name", false)));
    }

    #[test]
    fn parse_foreach_or_null() {
        let doc = json!({
            "resource": "Patient",
            "select": [{
                "forEachOrNull": "name",
                "column": [{"name": "family", "path": "family"}]
            }]
        });

        let view = ViewDefinition::from_json(&doc).unwrap();
        assert_eq!(view.select[0].iteration(), Some(("name", true)));
    }

    #[test]
    fn empty_document_rejected() {
        let err = ViewDefinition::from_json(&json!({})).unwrap_err();
        assert_eq!(err.kind(), "empty");
        let err = ViewDefinition::from_json(&json!([1, 2])).unwrap_err();
        assert_eq!(err.kind(), "empty");
    }

    #[test]
    fn constants_resolve_to_literals() {
        let doc = json!({
            "resource": "Patient",
            "constant": [
                {"name": "system", "valueString": "phone"},
                {"name": "maxAge", "valueInteger": 65}
            ],
            "select": [{"column": [{"name": "id", "path": "id"}]}]
        });

        let view = ViewDefinition::from_json(&doc).unwrap();
        assert!(matches!(
            view.constant[0].literal(),
            Some(quarz_fhirpath::LiteralValue::String(_))
        ));
        assert!(matches!(
            view.constant[1].literal(),
            Some(quarz_fhirpath::LiteralValue::Integer(65))
        ));
    }

    #[test]
    fn constant_without_value_is_none() {
        let constant = Constant {
            name: "broken".into(),
            ..Default::default()
        };
        assert!(constant.literal().is_none());
    }
}
