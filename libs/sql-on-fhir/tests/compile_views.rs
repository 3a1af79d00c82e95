//! End-to-end compilation tests: ViewDefinition JSON in, SQL text and column
//! list out. The generated SQL is checked structurally; execution belongs to
//! the engines.

use quarz_sof::{compile_view, ColumnType, CompileOptions, SqlDialect};
use serde_json::json;

fn sqlite() -> CompileOptions {
    CompileOptions::new(SqlDialect::Sqlite)
}

fn postgres() -> CompileOptions {
    CompileOptions::new(SqlDialect::Postgres)
}

#[test]
fn basic_select() {
    let view = json!({
        "resource": "Patient",
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    });

    let compiled = compile_view(&view, &sqlite()).unwrap();
    assert!(compiled.sql.starts_with("WITH t1 AS ("));
    assert!(compiled.sql.contains("'Patient'"));
    assert!(compiled.sql.contains("fhir_resources"));
    assert!(!compiled.sql.ends_with(';'));

    assert_eq!(compiled.columns.len(), 1);
    assert_eq!(compiled.columns[0].name, "id");
    assert_eq!(compiled.columns[0].type_hint, ColumnType::String);
}

#[test]
fn compilation_is_deterministic() {
    let view = json!({
        "resource": "Patient",
        "where": [{"path": "active = true"}],
        "select": [{
            "column": [
                {"name": "id", "path": "id"},
                {"name": "phone", "path": "telecom.where(system = 'phone').value.first()"}
            ]
        }]
    });

    let first = compile_view(&view, &postgres()).unwrap();
    let second = compile_view(&view, &postgres()).unwrap();
    assert_eq!(first.sql, second.sql);
}

#[test]
fn dialects_share_structure() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "forEach": "name",
            "column": [{"name": "family", "path": "family"}]
        }]
    });

    let lite = compile_view(&view, &sqlite()).unwrap();
    let pg = compile_view(&view, &postgres()).unwrap();

    assert!(lite.sql.contains("json_each"));
    assert!(!lite.sql.contains("jsonb_array_elements"));
    assert!(pg.sql.contains("jsonb_array_elements"));
    assert!(!pg.sql.contains("json_each"));

    // Identical declared columns, identical CTE naming.
    assert_eq!(lite.columns, pg.columns);
    assert!(lite.sql.starts_with("WITH t1 AS ("));
    assert!(pg.sql.starts_with("WITH t1 AS ("));
}

#[test]
fn where_and_first() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "column": [
                {"name": "id", "path": "id"},
                {"name": "phone", "path": "telecom.where(system = 'phone').value.first()"}
            ]
        }]
    });

    let compiled = compile_view(&view, &sqlite()).unwrap();
    assert!(compiled.sql.contains("'phone'"));
    assert!(compiled.sql.contains("row_number() OVER"));
    let names: Vec<&str> = compiled.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "phone"]);
}

#[test]
fn foreach_unnests() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "forEach": "name",
            "column": [{"name": "family", "path": "family"}]
        }]
    });

    let compiled = compile_view(&view, &postgres()).unwrap();
    assert!(compiled.sql.contains("jsonb_array_elements"));
    assert_eq!(compiled.columns[0].name, "family");
}

#[test]
fn foreach_or_null_keeps_rows() {
    let make = |iteration: &str| {
        json!({
            "resource": "Patient",
            "select": [{
                iteration: "name",
                "column": [{"name": "family", "path": "family"}]
            }]
        })
    };

    let strict = compile_view(&make("forEach"), &postgres()).unwrap();
    let lenient = compile_view(&make("forEachOrNull"), &postgres()).unwrap();

    // The lenient form keeps parents with empty collections via a LEFT JOIN
    // between the parent spine and the unnested elements.
    assert!(lenient.sql.matches("LEFT JOIN").count() > strict.sql.matches("LEFT JOIN").count());
}

#[test]
fn union_all_concatenates_branches() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "unionAll": [
                {
                    "forEach": "telecom.where(system = 'phone')",
                    "column": [
                        {"name": "type", "path": "system"},
                        {"name": "value", "path": "value"}
                    ]
                },
                {
                    "forEach": "telecom.where(system = 'email')",
                    "column": [
                        {"name": "type", "path": "system"},
                        {"name": "value", "path": "value"}
                    ]
                }
            ]
        }]
    });

    let compiled = compile_view(&view, &sqlite()).unwrap();
    assert!(compiled.sql.contains("UNION ALL"));
    let names: Vec<&str> = compiled.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["type", "value"]);
}

#[test]
fn extension_shorthand() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "column": [{
                "name": "birthsex",
                "path": "extension('http://hl7.org/fhir/us/core/StructureDefinition/us-core-birthsex').value.ofType(code).first()"
            }]
        }]
    });

    let compiled = compile_view(&view, &postgres()).unwrap();
    assert!(compiled
        .sql
        .contains("http://hl7.org/fhir/us/core/StructureDefinition/us-core-birthsex"));
    // The choice downcast reads the concrete valueCode field.
    assert!(compiled.sql.contains("valueCode"));
}

#[test]
fn constants_are_resolved() {
    let view = json!({
        "resource": "Patient",
        "constant": [{"name": "sys", "valueString": "phone"}],
        "select": [{
            "column": [{"name": "phone", "path": "telecom.where(system = %sys).value.first()"}]
        }]
    });

    let compiled = compile_view(&view, &sqlite()).unwrap();
    assert!(compiled.sql.contains("'phone'"));
}

#[test]
fn final_projection_matches_declared_columns() {
    let view = json!({
        "resource": "Patient",
        "select": [
            {"column": [{"name": "id", "path": "id"}]},
            {
                "forEach": "name",
                "column": [
                    {"name": "family", "path": "family"},
                    {"name": "given", "path": "given", "collection": true}
                ]
            }
        ]
    });

    let compiled = compile_view(&view, &postgres()).unwrap();
    let names: Vec<&str> = compiled.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["id", "family", "given"]);
    // The outer SELECT lists the declared columns in order.
    let tail = compiled.sql.rsplit("SELECT ").next().unwrap();
    assert!(tail.starts_with("\"id\", \"family\", \"given\" FROM "));
}

#[test]
fn collection_column_aggregates() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "column": [{"name": "families", "path": "name.family", "collection": true}]
        }]
    });

    let lite = compile_view(&view, &sqlite()).unwrap();
    let pg = compile_view(&view, &postgres()).unwrap();
    assert!(lite.sql.contains("json_group_array"));
    assert!(pg.sql.contains("jsonb_agg"));
    assert_eq!(lite.columns[0].type_hint, ColumnType::Json);
}

#[test]
fn null_literal_column_materialises_json_null() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "column": [
                {"name": "id", "path": "id"},
                {"name": "placeholder", "path": "{}"}
            ]
        }]
    });

    let lite = compile_view(&view, &sqlite()).unwrap();
    let pg = compile_view(&view, &postgres()).unwrap();
    assert!(lite.sql.contains("json('null')"));
    assert!(pg.sql.contains("'null'::jsonb"));
}

#[test]
fn resource_and_reference_keys() {
    let view = json!({
        "resource": "Observation",
        "select": [{
            "column": [
                {"name": "key", "path": "getResourceKey()"},
                {"name": "patient_key", "path": "subject.getReferenceKey(Patient)"}
            ]
        }]
    });

    let compiled = compile_view(&view, &postgres()).unwrap();
    assert!(compiled.sql.contains("row_id AS v"));
    assert!(compiled.sql.contains("'Patient/%'"));
    // getResourceKey is derived from the base id and never null.
    assert!(!compiled.columns[0].nullable);
    assert!(compiled.columns[1].nullable);
}

#[test]
fn unfiltered_reference_key_rejects_absolute_references() {
    let view = json!({
        "resource": "Observation",
        "select": [{
            "column": [{"name": "patient_key", "path": "subject.getReferenceKey()"}]
        }]
    });

    let lite = compile_view(&view, &sqlite()).unwrap();
    let pg = compile_view(&view, &postgres()).unwrap();
    // Only relative Type/id references produce a key; absolute URLs and urn
    // forms fall out as NULL before the slash split.
    assert!(lite.sql.contains("'://'"));
    assert!(lite.sql.contains("NOT LIKE 'urn:%'"));
    assert!(pg.sql.contains("'://'"));
    assert!(pg.sql.contains("NOT LIKE 'urn:%'"));
}

#[test]
fn receiverless_type_functions_apply_to_focus() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "forEach": "name",
            "column": [
                {"name": "as_name", "path": "ofType(HumanName).text"},
                {"name": "is_name", "path": "is(HumanName)"}
            ]
        }]
    });

    let compiled = compile_view(&view, &postgres()).unwrap();
    // The implicit receiver is the iteration focus; the type test runs on it.
    assert!(compiled.sql.contains("jsonb_typeof"));
    assert_eq!(compiled.columns[1].type_hint, ColumnType::Boolean);
}

#[test]
fn boundary_functions_expand_precision() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "column": [
                {"name": "bd_low", "path": "birthDate.lowBoundary()"},
                {"name": "bd_high", "path": "birthDate.highBoundary()"}
            ]
        }]
    });

    let lite = compile_view(&view, &sqlite()).unwrap();
    assert!(lite.sql.contains("'-01-01'"));
    assert!(lite.sql.contains("'-12-31'"));
    assert!(lite.sql.contains("+1 month"));

    let pg = compile_view(&view, &postgres()).unwrap();
    assert!(pg.sql.contains("interval '1 month'"));
}

#[test]
fn aggregates_compile() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "column": [
                {"name": "n_names", "path": "name.count()"},
                {"name": "all_given", "path": "name.given.join(', ')"},
                {"name": "has_phone", "path": "telecom.where(system = 'phone').exists()"}
            ]
        }]
    });

    let lite = compile_view(&view, &sqlite()).unwrap();
    assert!(lite.sql.contains("COUNT(*)"));
    assert!(lite.sql.contains("group_concat"));
    assert_eq!(lite.columns[0].type_hint, ColumnType::Integer);
    assert_eq!(lite.columns[2].type_hint, ColumnType::Boolean);

    let pg = compile_view(&view, &postgres()).unwrap();
    assert!(pg.sql.contains("string_agg"));
}

#[test]
fn nested_select_inherits_focus() {
    let view = json!({
        "resource": "Patient",
        "select": [{
            "forEach": "contact",
            "select": [{
                "forEach": "telecom",
                "column": [{"name": "contact_value", "path": "value"}]
            }],
            "column": [{"name": "relationship", "path": "relationship.first().text"}]
        }]
    });

    let compiled = compile_view(&view, &sqlite()).unwrap();
    let names: Vec<&str> = compiled.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, vec!["relationship", "contact_value"]);
}

#[test]
fn custom_table_identifier() {
    let view = json!({
        "resource": "Patient",
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    });

    let options = sqlite().with_table("staging_resources");
    let compiled = compile_view(&view, &options).unwrap();
    assert!(compiled.sql.contains("FROM staging_resources"));
    assert!(!compiled.sql.contains("fhir_resources"));
}

#[test]
fn boolean_logic_is_three_valued() {
    let view = json!({
        "resource": "Patient",
        "where": [{"path": "deceased.exists() and active"}],
        "select": [{"column": [{"name": "id", "path": "id"}]}]
    });

    let compiled = compile_view(&view, &postgres()).unwrap();
    // Kleene logic materialises as CASE over LEFT JOINed operands.
    assert!(compiled.sql.contains("CASE WHEN"));
    assert!(compiled.sql.contains("IS NULL"));
}
