//! Relation tree: the validated intermediate form between a ViewDefinition
//! and SQL generation.
//!
//! The tree mirrors relational semantics rather than document syntax:
//!
//! - the root is the `Base` relation (one row per resource of the named
//!   type), narrowed by the `Filter` conditions;
//! - every [`SelectNode`] with an iteration clause contributes a `ForEach`
//!   unnest; sibling nodes combine by cross join, `union` branches by
//!   UNION ALL in declared order;
//! - the flattened, ordered column vector forms the single outermost
//!   `Project`.
//!
//! All embedded FHIRPath expressions are parsed and annotated by the time a
//! tree exists; invalid documents never produce one.

use quarz_fhirpath::Expr;
use quarz_schema::{ColumnInfo, ColumnType};

/// A validated ViewDefinition, lowered to relational form.
#[derive(Debug, Clone)]
pub struct RelationTree {
    /// Root FHIR resource type of the Base relation.
    pub resource_type: String,

    /// Boolean conditions over the base resource; rows failing any are
    /// dropped.
    pub filters: Vec<Expr>,

    /// The select hierarchy. The root node itself has no iteration clause or
    /// columns; the document's top-level select elements are its children.
    pub root: SelectNode,

    /// The declared output column list, in projection order.
    pub columns: Vec<ColumnInfo>,
}

/// An iteration clause: unnest `path`, optionally keeping a null row when
/// the collection is empty.
#[derive(Debug, Clone)]
pub struct ForEachClause {
    pub path: Expr,
    pub keep_null_rows: bool,
}

/// One select scope.
#[derive(Debug, Clone)]
pub struct SelectNode {
    pub for_each: Option<ForEachClause>,

    /// Columns declared directly in this scope, evaluated against its focus.
    pub columns: Vec<ColumnDef>,

    /// Nested scopes; each contributes its rows by cross join.
    pub children: Vec<SelectNode>,

    /// UNION ALL branches; all expose the same ordered column names.
    pub union: Vec<SelectNode>,
}

impl SelectNode {
    pub fn leaf() -> Self {
        Self {
            for_each: None,
            columns: Vec::new(),
            children: Vec::new(),
            union: Vec::new(),
        }
    }

    /// Column names produced by this node, in output order: own columns,
    /// then children, then union branches (first branch declares the order).
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.columns.iter().map(|c| c.name.clone()).collect();
        for child in &self.children {
            names.extend(child.column_names());
        }
        if let Some(first) = self.union.first() {
            names.extend(first.column_names());
        }
        names
    }
}

/// One projected column.
#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,

    /// Annotated FHIRPath AST for the value.
    pub expr: Expr,

    /// Whether the column aggregates into a JSON array.
    pub collection: bool,

    /// Declared type, or the hint inferred from the annotated path.
    pub type_hint: ColumnType,
}

impl ColumnDef {
    pub fn info(&self) -> ColumnInfo {
        ColumnInfo::new(
            self.name.clone(),
            if self.collection {
                ColumnType::Json
            } else {
                self.type_hint
            },
        )
    }
}
