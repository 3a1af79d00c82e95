//! Feature map for the target SQL dialects.
//!
//! Both dialects implement identical semantics; everything here is a pure
//! string function encoding a syntactic difference (JSON operators, unnest,
//! aggregation, casts). No business logic lives in a dialect: if a rule
//! depends on the shape of the input expression rather than the engine, it
//! belongs in the generator.

use core::fmt::Debug;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Target SQL dialect selector.
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SqlDialect {
    /// Embedded analytics engine: `->`/`->>` operators, `json_each`,
    /// `json_group_array`.
    #[default]
    Sqlite,
    /// Server engine: `jsonb` operators, `jsonb_array_elements`, `jsonb_agg`.
    Postgres,
}

impl SqlDialect {
    pub fn handler(&self) -> &'static dyn DialectHandler {
        match self {
            SqlDialect::Sqlite => &SqliteDialect,
            SqlDialect::Postgres => &PostgresDialect,
        }
    }

    pub const VARIANTS: &'static [&'static str] = &["sqlite", "postgres"];
}

impl FromStr for SqlDialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sqlite" => Ok(Self::Sqlite),
            "postgres" | "postgresql" => Ok(Self::Postgres),
            other => Err(format!(
                "unknown dialect '{}', expected one of: {}",
                other,
                Self::VARIANTS.join(", ")
            )),
        }
    }
}

impl std::fmt::Display for SqlDialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite => f.write_str("sqlite"),
            Self::Postgres => f.write_str("postgres"),
        }
    }
}

/// Syntactic surface of one SQL engine.
pub trait DialectHandler: Debug {
    /// Quote a column or table identifier.
    fn quote_ident(&self, name: &str) -> String {
        format!("\"{}\"", name.replace('"', "\"\""))
    }

    /// Quote a string literal.
    fn quote_string(&self, value: &str) -> String {
        format!("'{}'", value.replace('\'', "''"))
    }

    /// Extract an object field as SQL text.
    fn extract_text(&self, json: &str, field: &str) -> String;

    /// Extract an object field as a JSON fragment.
    fn extract_json(&self, json: &str, field: &str) -> String;

    /// JSON type name of a fragment ('object', 'array', ...).
    fn json_typeof(&self, json: &str) -> String;

    /// A single-element JSON array wrapping a JSON fragment.
    fn wrap_array(&self, json: &str) -> String;

    /// The empty JSON array literal.
    fn empty_array(&self) -> String;

    /// The JSON null literal.
    fn json_null(&self) -> String;

    /// A FROM-clause item unnesting a JSON array into rows.
    fn unnest_relation(&self, json: &str, alias: &str) -> String;

    /// The element value column of an unnest item.
    fn unnest_value(&self, alias: &str) -> String {
        format!("{alias}.value")
    }

    /// The element position column of an unnest item; only its relative
    /// order is meaningful.
    fn unnest_ordinal(&self, alias: &str) -> String;

    /// Aggregate values into a JSON array, ordered by `ord`.
    fn array_agg(&self, value: &str, ord: &str) -> String;

    /// Render a JSON scalar fragment as SQL text.
    fn scalar_text(&self, json: &str) -> String;

    /// Cast SQL text to a number.
    fn cast_to_number(&self, text: &str) -> String {
        format!("CAST({text} AS NUMERIC)")
    }

    /// Cast SQL text ('true'/'false') to the engine's boolean.
    fn cast_to_boolean(&self, text: &str) -> String;

    fn bool_true(&self) -> &'static str;

    fn bool_false(&self) -> &'static str;

    /// Test whether a JSON fragment holds a value of the given FHIR type.
    fn type_test(&self, json: &str, fhir_type: &str) -> String;

    /// String aggregation with a separator, ordered by `ord`.
    fn string_agg(&self, value: &str, separator: &str, ord: &str) -> String;

    /// 1-based position of `needle` in `haystack`, 0 when absent.
    fn strpos(&self, haystack: &str, needle: &str) -> String;

    /// Null-safe equality (`NULL` equals `NULL`), used for key joins.
    fn null_safe_eq(&self, left: &str, right: &str) -> String;

    /// Truncate a numeric expression toward zero to an integer.
    fn trunc_to_int(&self, expr: &str) -> String;

    /// Last calendar day of the month given as 'YYYY-MM' text.
    fn last_day_of_month(&self, year_month: &str) -> String;
}

/// FHIR primitive families that share a JSON representation.
fn is_number_type(fhir_type: &str) -> bool {
    matches!(
        fhir_type,
        "integer" | "positiveInt" | "unsignedInt" | "integer64" | "decimal"
    )
}

fn is_string_type(fhir_type: &str) -> bool {
    matches!(
        fhir_type,
        "string"
            | "code"
            | "uri"
            | "url"
            | "canonical"
            | "id"
            | "oid"
            | "uuid"
            | "markdown"
            | "base64Binary"
            | "date"
            | "dateTime"
            | "instant"
            | "time"
    )
}

#[derive(Debug)]
pub struct SqliteDialect;

#[derive(Debug)]
pub struct PostgresDialect;

impl DialectHandler for SqliteDialect {
    fn extract_text(&self, json: &str, field: &str) -> String {
        format!("(CASE WHEN json_valid({json}) THEN {json} ->> '$.{field}' END)")
    }

    fn extract_json(&self, json: &str, field: &str) -> String {
        format!("(CASE WHEN json_valid({json}) THEN {json} -> '$.{field}' END)")
    }

    fn json_typeof(&self, json: &str) -> String {
        format!("json_type({json})")
    }

    fn wrap_array(&self, json: &str) -> String {
        format!("json_array(json({json}))")
    }

    fn empty_array(&self) -> String {
        "json_array()".into()
    }

    fn json_null(&self) -> String {
        "json('null')".into()
    }

    fn unnest_relation(&self, json: &str, alias: &str) -> String {
        format!("json_each({json}) AS {alias}")
    }

    fn unnest_ordinal(&self, alias: &str) -> String {
        format!("{alias}.key")
    }

    fn array_agg(&self, value: &str, _ord: &str) -> String {
        // Callers feed an ORDER BY'd subquery; group_concat-family
        // aggregates follow input order.
        format!("json_group_array({value})")
    }

    fn scalar_text(&self, json: &str) -> String {
        // json_each and ->> already surface scalars as SQL values.
        json.to_string()
    }

    fn cast_to_boolean(&self, text: &str) -> String {
        format!("(CASE WHEN {text} IN ('true', 1) THEN 1 WHEN {text} IN ('false', 0) THEN 0 END)")
    }

    fn bool_true(&self) -> &'static str {
        "1"
    }

    fn bool_false(&self) -> &'static str {
        "0"
    }

    fn type_test(&self, json: &str, fhir_type: &str) -> String {
        if fhir_type == "boolean" {
            format!("(typeof({json}) = 'integer' AND {json} IN (0, 1))")
        } else if is_number_type(fhir_type) {
            if fhir_type == "decimal" {
                format!("(typeof({json}) IN ('integer', 'real'))")
            } else {
                format!("(typeof({json}) = 'integer')")
            }
        } else if is_string_type(fhir_type) {
            format!("(typeof({json}) = 'text' AND NOT (json_valid({json}) AND json_type({json}) IN ('object', 'array')))")
        } else {
            format!("(json_valid({json}) AND json_type({json}) = 'object')")
        }
    }

    fn string_agg(&self, value: &str, separator: &str, _ord: &str) -> String {
        format!("group_concat({value}, {separator})")
    }

    fn strpos(&self, haystack: &str, needle: &str) -> String {
        format!("instr({haystack}, {needle})")
    }

    fn null_safe_eq(&self, left: &str, right: &str) -> String {
        format!("{left} IS {right}")
    }

    fn trunc_to_int(&self, expr: &str) -> String {
        format!("CAST({expr} AS INTEGER)")
    }

    fn last_day_of_month(&self, year_month: &str) -> String {
        format!("strftime('%Y-%m-%d', date({year_month} || '-01', '+1 month', '-1 day'))")
    }
}

impl DialectHandler for PostgresDialect {
    fn extract_text(&self, json: &str, field: &str) -> String {
        format!("({json} ->> '{field}')")
    }

    fn extract_json(&self, json: &str, field: &str) -> String {
        format!("({json} -> '{field}')")
    }

    fn json_typeof(&self, json: &str) -> String {
        format!("jsonb_typeof({json})")
    }

    fn wrap_array(&self, json: &str) -> String {
        format!("jsonb_build_array({json})")
    }

    fn empty_array(&self) -> String {
        "'[]'::jsonb".into()
    }

    fn json_null(&self) -> String {
        "'null'::jsonb".into()
    }

    fn unnest_relation(&self, json: &str, alias: &str) -> String {
        format!("jsonb_array_elements({json}) WITH ORDINALITY AS {alias}(value, idx)")
    }

    fn unnest_ordinal(&self, alias: &str) -> String {
        format!("{alias}.idx")
    }

    fn array_agg(&self, value: &str, ord: &str) -> String {
        format!("jsonb_agg({value} ORDER BY {ord})")
    }

    fn scalar_text(&self, json: &str) -> String {
        format!("({json} #>> '{{}}')")
    }

    fn cast_to_number(&self, text: &str) -> String {
        format!("({text})::numeric")
    }

    fn cast_to_boolean(&self, text: &str) -> String {
        format!("(CASE WHEN {text} = 'true' THEN TRUE WHEN {text} = 'false' THEN FALSE END)")
    }

    fn bool_true(&self) -> &'static str {
        "TRUE"
    }

    fn bool_false(&self) -> &'static str {
        "FALSE"
    }

    fn type_test(&self, json: &str, fhir_type: &str) -> String {
        if fhir_type == "boolean" {
            format!("(jsonb_typeof({json}) = 'boolean')")
        } else if is_number_type(fhir_type) {
            format!("(jsonb_typeof({json}) = 'number')")
        } else if is_string_type(fhir_type) {
            format!("(jsonb_typeof({json}) = 'string')")
        } else {
            format!("(jsonb_typeof({json}) = 'object')")
        }
    }

    fn string_agg(&self, value: &str, separator: &str, ord: &str) -> String {
        format!("string_agg({value}, {separator} ORDER BY {ord})")
    }

    fn strpos(&self, haystack: &str, needle: &str) -> String {
        format!("strpos({haystack}, {needle})")
    }

    fn null_safe_eq(&self, left: &str, right: &str) -> String {
        format!("{left} IS NOT DISTINCT FROM {right}")
    }

    fn trunc_to_int(&self, expr: &str) -> String {
        format!("trunc({expr})")
    }

    fn last_day_of_month(&self, year_month: &str) -> String {
        format!(
            "to_char(to_date({year_month} || '-01', 'YYYY-MM-DD') + interval '1 month' - interval '1 day', 'YYYY-MM-DD')"
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialect_round_trips_from_str() {
        assert_eq!(SqlDialect::from_str("sqlite").unwrap(), SqlDialect::Sqlite);
        assert_eq!(
            SqlDialect::from_str("postgresql").unwrap(),
            SqlDialect::Postgres
        );
        assert!(SqlDialect::from_str("mysql").is_err());
    }

    #[test]
    fn extraction_syntax() {
        let sqlite = SqlDialect::Sqlite.handler();
        let postgres = SqlDialect::Postgres.handler();
        assert!(sqlite.extract_text("v", "id").contains("->> '$.id'"));
        assert_eq!(postgres.extract_text("v", "id"), "(v ->> 'id')");
    }

    #[test]
    fn unnest_syntax() {
        let sqlite = SqlDialect::Sqlite.handler();
        let postgres = SqlDialect::Postgres.handler();
        assert_eq!(sqlite.unnest_relation("v", "u"), "json_each(v) AS u");
        assert_eq!(
            postgres.unnest_relation("v", "u"),
            "jsonb_array_elements(v) WITH ORDINALITY AS u(value, idx)"
        );
        assert_eq!(sqlite.unnest_ordinal("u"), "u.key");
        assert_eq!(postgres.unnest_ordinal("u"), "u.idx");
    }

    #[test]
    fn aggregation_syntax() {
        let sqlite = SqlDialect::Sqlite.handler();
        let postgres = SqlDialect::Postgres.handler();
        assert_eq!(sqlite.array_agg("v", "ord"), "json_group_array(v)");
        assert_eq!(postgres.array_agg("v", "ord"), "jsonb_agg(v ORDER BY ord)");
    }

    #[test]
    fn string_quoting_escapes() {
        let sqlite = SqlDialect::Sqlite.handler();
        assert_eq!(sqlite.quote_string("it's"), "'it''s'");
    }
}
