//! ViewDefinition validation and lowering to the relation tree.
//!
//! Validation runs to completion before any SQL exists: every embedded
//! FHIRPath expression is parsed and annotated here, every structural rule
//! checked. Translation therefore never fails downstream for a reason the
//! document author could see.

use std::collections::HashSet;

use quarz_fhirpath::analyzer;
use quarz_fhirpath::{ConstantEnv, Expr, ExprKind, LiteralValue, Parser, Population};
use quarz_schema::{Cardinality, ColumnInfo, ColumnType};
use tracing::debug;

use crate::error::{Error, Result, ValidationKind};
use crate::relation::{ColumnDef, ForEachClause, RelationTree, SelectNode};
use crate::view_definition::{Column, SelectElement, ViewDefinition};

/// Validate `view` and lower it to a relation tree.
pub fn translate(view: &ViewDefinition) -> Result<RelationTree> {
    let resource_type = view
        .resource
        .as_deref()
        .filter(|r| !r.trim().is_empty())
        .ok_or_else(|| {
            Error::validation(
                ValidationKind::MissingResource,
                "ViewDefinition.resource is required",
            )
        })?
        .to_string();

    if view.select.is_empty() {
        return Err(Error::validation(
            ValidationKind::MissingSelect,
            "ViewDefinition.select must contain at least one element",
        ));
    }

    let constants = constant_env(view)?;

    let base_focus = Population::scalar(resource_type.clone());
    let translator = Translator {
        resource_type: resource_type.clone(),
        constants,
    };

    let filters = translator.filters(view)?;

    let mut root = SelectNode::leaf();
    for element in &view.select {
        root.children
            .push(translator.select_node(element, &base_focus)?);
    }

    let columns = output_columns(&root)?;
    debug!(
        resource = %resource_type,
        columns = columns.len(),
        "translated ViewDefinition"
    );

    Ok(RelationTree {
        resource_type,
        filters,
        root,
        columns,
    })
}

fn constant_env(view: &ViewDefinition) -> Result<ConstantEnv> {
    let mut env = ConstantEnv::new();
    for constant in &view.constant {
        let value = constant.literal().ok_or_else(|| {
            Error::validation(
                ValidationKind::InvalidConstant,
                format!("constant '{}' declares no value", constant.name),
            )
        })?;
        env.insert(constant.name.clone(), value);
    }
    Ok(env)
}

struct Translator {
    resource_type: String,
    constants: ConstantEnv,
}

impl Translator {
    /// Parse one embedded FHIRPath expression, mapping frontend errors to
    /// the document-level validation vocabulary.
    fn parse_path(&self, path: &str) -> Result<Expr> {
        Parser::parse_with_constants(path, &self.constants).map_err(|err| match err {
            quarz_fhirpath::Error::UndefinedConstant { ref name, .. } => Error::validation(
                ValidationKind::UndefinedConstant,
                format!("path '{path}' references undefined constant %{name}"),
            ),
            other => Error::validation(
                ValidationKind::InvalidPath,
                format!("path '{path}' failed to parse: {other}"),
            ),
        })
    }

    fn filters(&self, view: &ViewDefinition) -> Result<Vec<Expr>> {
        let mut filters = Vec::new();
        for clause in &view.where_ {
            let expr = self.parse_path(&clause.path)?;
            let annotated = analyzer::annotate(&expr, &self.resource_type);
            let population = annotated.population();

            let known_non_boolean = population
                .fhir_type
                .as_deref()
                .is_some_and(|t| t != "boolean");
            let known_collection = population.cardinality == Cardinality::Collection;
            if known_non_boolean || known_collection {
                return Err(Error::validation(
                    ValidationKind::WhereNotBoolean,
                    format!(
                        "where path '{}' resolves to {} {}, expected a single boolean",
                        clause.path,
                        match population.cardinality {
                            Cardinality::Collection => "a collection of",
                            _ => "a value of type",
                        },
                        population.fhir_type.as_deref().unwrap_or("unknown")
                    ),
                ));
            }
            filters.push(annotated);
        }
        Ok(filters)
    }

    fn select_node(&self, element: &SelectElement, focus: &Population) -> Result<SelectNode> {
        let (for_each, inner_focus) = match element.iteration() {
            Some((path, keep_null_rows)) => {
                let expr = self.parse_path(path)?;
                let annotated = analyzer::annotate_with_focus(&expr, focus);
                let population = annotated.population();

                if population.cardinality == Cardinality::Scalar {
                    return Err(Error::validation(
                        ValidationKind::ForeachRequiresCollection,
                        format!("forEach path '{path}' is a scalar, not a collection"),
                    ));
                }

                let element_focus = Population {
                    cardinality: Cardinality::Scalar,
                    fhir_type: population.fhir_type.clone(),
                };
                (
                    Some(ForEachClause {
                        path: annotated,
                        keep_null_rows,
                    }),
                    element_focus,
                )
            }
            None => (None, focus.clone()),
        };

        let mut columns = Vec::new();
        for column in &element.column {
            columns.push(self.column_def(column, &inner_focus)?);
        }

        let mut children = Vec::new();
        for child in &element.select {
            children.push(self.select_node(child, &inner_focus)?);
        }

        let mut union = Vec::new();
        for branch in &element.union_all {
            union.push(self.select_node(branch, &inner_focus)?);
        }
        if let Some(first) = union.first() {
            let expected = first.column_names();
            for (i, branch) in union.iter().enumerate().skip(1) {
                let got = branch.column_names();
                if got != expected {
                    return Err(Error::validation(
                        ValidationKind::UnionColumnMismatch,
                        format!(
                            "unionAll branch {} exposes columns [{}], expected [{}]",
                            i,
                            got.join(", "),
                            expected.join(", ")
                        ),
                    ));
                }
            }
        }

        Ok(SelectNode {
            for_each,
            columns,
            children,
            union,
        })
    }

    fn column_def(&self, column: &Column, focus: &Population) -> Result<ColumnDef> {
        let expr = self.parse_path(&column.path)?;
        let annotated = analyzer::annotate_with_focus(&expr, focus);
        let population = annotated.population();

        if !column.collection && population.cardinality == Cardinality::Collection {
            return Err(Error::validation(
                ValidationKind::CollectionMismatch,
                format!(
                    "column '{}' has a collection-valued path '{}' but collection is not set",
                    column.name, column.path
                ),
            ));
        }

        let type_hint = match column.col_type.as_deref() {
            Some(declared) => ColumnType::parse(declared).ok_or_else(|| {
                Error::validation(
                    ValidationKind::UnknownType,
                    format!("column '{}' declares unknown type '{declared}'", column.name),
                )
            })?,
            None => population
                .fhir_type
                .as_deref()
                .map(ColumnType::from_inferred)
                .unwrap_or_default(),
        };

        Ok(ColumnDef {
            name: column.name.clone(),
            expr: annotated,
            collection: column.collection,
            type_hint,
        })
    }
}

/// The flattened, ordered output column list; rejects duplicate names.
fn output_columns(root: &SelectNode) -> Result<Vec<ColumnInfo>> {
    let mut columns = Vec::new();
    collect_columns(root, &mut columns);

    let mut seen = HashSet::new();
    for column in &columns {
        if !seen.insert(column.name.as_str()) {
            return Err(Error::validation(
                ValidationKind::DuplicateColumn,
                format!("column name '{}' appears more than once", column.name),
            ));
        }
    }
    Ok(columns)
}

fn collect_columns(node: &SelectNode, out: &mut Vec<ColumnInfo>) {
    for def in &node.columns {
        let mut info = def.info();
        info.nullable = !matches!(
            &def.expr.kind,
            ExprKind::Invocation { name, .. } if name == "getResourceKey"
        );
        out.push(info);
    }
    for child in &node.children {
        collect_columns(child, out);
    }
    if let Some(first) = node.union.first() {
        collect_columns(first, out);
    }
}

/// True when the column's path is the explicit `{}` literal; such a column
/// materialises a JSON null rather than an absent value.
pub(crate) fn is_null_literal(expr: &Expr) -> bool {
    matches!(&expr.kind, ExprKind::Literal(LiteralValue::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view(doc: serde_json::Value) -> ViewDefinition {
        ViewDefinition::from_json(&doc).unwrap()
    }

    #[test]
    fn lowers_basic_select() {
        let tree = translate(&view(json!({
            "resource": "Patient",
            "select": [{"column": [{"name": "id", "path": "id"}]}]
        })))
        .unwrap();

        assert_eq!(tree.resource_type, "Patient");
        assert_eq!(tree.columns.len(), 1);
        assert_eq!(tree.columns[0].name, "id");
        assert_eq!(tree.root.children.len(), 1);
    }

    #[test]
    fn missing_resource() {
        let err = translate(&view(json!({
            "select": [{"column": [{"name": "id", "path": "id"}]}]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "missing_resource");
    }

    #[test]
    fn missing_select() {
        let err = translate(&view(json!({"resource": "Patient"}))).unwrap_err();
        assert_eq!(err.kind(), "missing_select");
    }

    #[test]
    fn invalid_path() {
        let err = translate(&view(json!({
            "resource": "Patient",
            "select": [{"column": [{"name": "id", "path": "id.."}]}]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "invalid_path");
    }

    #[test]
    fn foreach_requires_collection() {
        let err = translate(&view(json!({
            "resource": "Patient",
            "select": [{
                "forEach": "birthDate",
                "column": [{"name": "bd", "path": "value"}]
            }]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "foreach_requires_collection");
    }

    #[test]
    fn where_must_be_boolean() {
        let err = translate(&view(json!({
            "resource": "Patient",
            "where": [{"path": "name.family"}],
            "select": [{"column": [{"name": "id", "path": "id"}]}]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "where_not_boolean");
    }

    #[test]
    fn where_boolean_accepted() {
        let tree = translate(&view(json!({
            "resource": "Patient",
            "where": [{"path": "active = true"}],
            "select": [{"column": [{"name": "id", "path": "id"}]}]
        })))
        .unwrap();
        assert_eq!(tree.filters.len(), 1);
    }

    #[test]
    fn union_column_mismatch() {
        let err = translate(&view(json!({
            "resource": "Patient",
            "select": [{
                "unionAll": [
                    {"column": [{"name": "a", "path": "id"}, {"name": "b", "path": "gender"}]},
                    {"column": [{"name": "a", "path": "id"}, {"name": "c", "path": "gender"}]}
                ]
            }]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "union_column_mismatch");
    }

    #[test]
    fn duplicate_column() {
        let err = translate(&view(json!({
            "resource": "Patient",
            "select": [
                {"column": [{"name": "id", "path": "id"}]},
                {"column": [{"name": "id", "path": "gender"}]}
            ]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "duplicate_column");
    }

    #[test]
    fn undefined_constant() {
        let err = translate(&view(json!({
            "resource": "Patient",
            "select": [{"column": [{"name": "id", "path": "identifier.where(system = %sys).value.first()"}]}]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "undefined_constant");
    }

    #[test]
    fn unknown_type() {
        let err = translate(&view(json!({
            "resource": "Patient",
            "select": [{"column": [{"name": "id", "path": "id", "type": "mystery"}]}]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "unknown_type");
    }

    #[test]
    fn collection_mismatch() {
        let err = translate(&view(json!({
            "resource": "Patient",
            "select": [{"column": [{"name": "family", "path": "name.family"}]}]
        })))
        .unwrap_err();
        assert_eq!(err.kind(), "collection_mismatch");
    }

    #[test]
    fn collection_column_accepted() {
        let tree = translate(&view(json!({
            "resource": "Patient",
            "select": [{"column": [
                {"name": "families", "path": "name.family", "collection": true}
            ]}]
        })))
        .unwrap();
        assert_eq!(tree.columns[0].type_hint, ColumnType::Json);
    }

    #[test]
    fn union_columns_in_output_once() {
        let tree = translate(&view(json!({
            "resource": "Patient",
            "select": [{
                "unionAll": [
                    {"forEach": "telecom.where(system = 'phone')",
                     "column": [{"name": "value", "path": "value"}]},
                    {"forEach": "telecom.where(system = 'email')",
                     "column": [{"name": "value", "path": "value"}]}
                ]
            }]
        })))
        .unwrap();
        assert_eq!(tree.columns.len(), 1);
        assert_eq!(tree.columns[0].name, "value");
    }
}
