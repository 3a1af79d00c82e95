//! Abstract Syntax Tree (AST) representation
//!
//! The AST is an immutable tree of tagged variants. Nodes own their children,
//! carry the source span they were parsed from, and optionally a population
//! annotation produced by the static analyzer. No mutation happens after
//! construction; the analyzer builds an annotated copy instead.

use crate::token::Span;
use quarz_schema::Cardinality;
use rust_decimal::Decimal;

/// Data type of a literal value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataType {
    String,
    Integer,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    Quantity,
    Null,
}

impl DataType {
    pub fn fhir_name(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Integer => "integer",
            Self::Decimal => "decimal",
            Self::Boolean => "boolean",
            Self::Date => "date",
            Self::DateTime => "dateTime",
            Self::Time => "time",
            Self::Quantity => "Quantity",
            Self::Null => "null",
        }
    }
}

/// A literal value. Date, dateTime and time literals keep their source
/// lexeme; partial precision is significant (`@2015` is not `@2015-01-01`).
#[derive(Debug, Clone, PartialEq)]
pub enum LiteralValue {
    String(String),
    Integer(i64),
    Decimal(Decimal),
    Boolean(bool),
    Date(String),
    DateTime(String),
    Time(String),
    Quantity { value: Decimal, unit: Option<String> },
    /// The empty collection literal `{}`.
    Null,
}

impl LiteralValue {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::String(_) => DataType::String,
            Self::Integer(_) => DataType::Integer,
            Self::Decimal(_) => DataType::Decimal,
            Self::Boolean(_) => DataType::Boolean,
            Self::Date(_) => DataType::Date,
            Self::DateTime(_) => DataType::DateTime,
            Self::Time(_) => DataType::Time,
            Self::Quantity { .. } => DataType::Quantity,
            Self::Null => DataType::Null,
        }
    }
}

/// Unary operator: '+' | '-' | 'not'
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
    Not,
}

/// Binary operators, closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    // Arithmetic
    Add,       // +
    Subtract,  // -
    Multiply,  // *
    Divide,    // /
    IntDivide, // div
    Modulo,    // mod

    // Strings
    Concat, // &

    // Collections
    Union,    // |
    In,       // in
    Contains, // contains

    // Equality
    Equal,         // =
    NotEqual,      // !=
    Equivalent,    // ~
    NotEquivalent, // !~

    // Comparison
    LessThan,           // <
    LessThanOrEqual,    // <=
    GreaterThan,        // >
    GreaterThanOrEqual, // >=

    // Boolean
    And,     // and
    Or,      // or
    Xor,     // xor
    Implies, // implies
}

impl BinaryOp {
    /// Source-level spelling.
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::IntDivide => "div",
            Self::Modulo => "mod",
            Self::Concat => "&",
            Self::Union => "|",
            Self::In => "in",
            Self::Contains => "contains",
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Equivalent => "~",
            Self::NotEquivalent => "!~",
            Self::LessThan => "<",
            Self::LessThanOrEqual => "<=",
            Self::GreaterThan => ">",
            Self::GreaterThanOrEqual => ">=",
            Self::And => "and",
            Self::Or => "or",
            Self::Xor => "xor",
            Self::Implies => "implies",
        }
    }

    pub fn is_boolean(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Xor | Self::Implies)
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Equivalent
                | Self::NotEquivalent
                | Self::LessThan
                | Self::LessThanOrEqual
                | Self::GreaterThan
                | Self::GreaterThanOrEqual
        )
    }
}

/// Type operator: 'is' | 'as' | 'ofType'
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeOperator {
    Is,
    As,
    OfType,
}

/// Static population annotation: the cardinality and FHIR type an expression
/// is known to denote, when derivable from the element table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Population {
    pub cardinality: Cardinality,
    pub fhir_type: Option<String>,
}

impl Population {
    pub fn unknown() -> Self {
        Self {
            cardinality: Cardinality::Unknown,
            fhir_type: None,
        }
    }

    pub fn scalar(fhir_type: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::Scalar,
            fhir_type: Some(fhir_type.into()),
        }
    }

    pub fn collection(fhir_type: impl Into<String>) -> Self {
        Self {
            cardinality: Cardinality::Collection,
            fhir_type: Some(fhir_type.into()),
        }
    }

    pub fn is_boolean(&self) -> bool {
        self.fhir_type.as_deref() == Some("boolean")
    }
}

/// The exhaustive set of expression forms.
#[derive(Debug, Clone, PartialEq)]
pub enum ExprKind {
    /// A literal value.
    Literal(LiteralValue),

    /// A bare identifier: element access on the focus, or the resource-type
    /// assertion at the start of a path.
    Identifier(String),

    /// Dotted member access: `expr.name`.
    MemberAccess { expr: Box<Expr>, name: String },

    /// Function invocation. `receiver` is absent when the function starts the
    /// expression (`exists()` vs `name.exists()`).
    Invocation {
        receiver: Option<Box<Expr>>,
        name: String,
        args: Vec<Expr>,
    },

    /// Zero-based indexer: `expr[index]`.
    Indexer { expr: Box<Expr>, index: Box<Expr> },

    /// Unary operator application.
    Unary { op: UnaryOp, operand: Box<Expr> },

    /// Binary operator application; all operators are left-associative.
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },

    /// Type test / downcast: `expr is T`, `expr as T`, `expr.ofType(T)`.
    TypeOp {
        op: TypeOperator,
        expr: Box<Expr>,
        type_name: String,
    },
}

/// An expression node: kind, source span, optional population annotation.
#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub span: Span,
    pub meta: Option<Population>,
}

impl Expr {
    pub fn new(kind: ExprKind, span: Span) -> Self {
        Self {
            kind,
            span,
            meta: None,
        }
    }

    pub fn with_meta(kind: ExprKind, span: Span, meta: Population) -> Self {
        Self {
            kind,
            span,
            meta: Some(meta),
        }
    }

    /// The annotated population, defaulting to unknown for unanalyzed trees.
    pub fn population(&self) -> Population {
        self.meta.clone().unwrap_or_else(Population::unknown)
    }
}

/// Structural equality: spans and annotations are not part of the value.
impl PartialEq for Expr {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

/// Depth-first visitor over an expression tree. Implementors override
/// `visit_expr` (pre-order) and call `walk_expr` to descend.
pub trait Visitor {
    fn visit_expr(&mut self, expr: &Expr) {
        walk_expr(self, expr);
    }
}

/// Visit the children of `expr` depth-first, left to right.
pub fn walk_expr<V: Visitor + ?Sized>(visitor: &mut V, expr: &Expr) {
    match &expr.kind {
        ExprKind::Literal(_) | ExprKind::Identifier(_) => {}
        ExprKind::MemberAccess { expr, .. } => visitor.visit_expr(expr),
        ExprKind::Invocation { receiver, args, .. } => {
            if let Some(receiver) = receiver {
                visitor.visit_expr(receiver);
            }
            for arg in args {
                visitor.visit_expr(arg);
            }
        }
        ExprKind::Indexer { expr, index } => {
            visitor.visit_expr(expr);
            visitor.visit_expr(index);
        }
        ExprKind::Unary { operand, .. } => visitor.visit_expr(operand),
        ExprKind::Binary { left, right, .. } => {
            visitor.visit_expr(left);
            visitor.visit_expr(right);
        }
        ExprKind::TypeOp { expr, .. } => visitor.visit_expr(expr),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Location, Span};

    fn span() -> Span {
        Span::point(Location::start())
    }

    #[test]
    fn structural_equality_ignores_spans() {
        let a = Expr::new(ExprKind::Identifier("name".into()), span());
        let other_span = Span::point(Location {
            line: 3,
            column: 9,
            offset: 42,
        });
        let b = Expr::new(ExprKind::Identifier("name".into()), other_span);
        assert_eq!(a, b);
    }

    #[test]
    fn visitor_walks_depth_first() {
        struct Collect(Vec<String>);
        impl Visitor for Collect {
            fn visit_expr(&mut self, expr: &Expr) {
                if let ExprKind::Identifier(name) = &expr.kind {
                    self.0.push(name.clone());
                }
                walk_expr(self, expr);
            }
        }

        let tree = Expr::new(
            ExprKind::MemberAccess {
                expr: Box::new(Expr::new(
                    ExprKind::MemberAccess {
                        expr: Box::new(Expr::new(ExprKind::Identifier("Patient".into()), span())),
                        name: "name".into(),
                    },
                    span(),
                )),
                name: "family".into(),
            },
            span(),
        );

        let mut collect = Collect(Vec::new());
        collect.visit_expr(&tree);
        assert_eq!(collect.0, vec!["Patient"]);
    }

    #[test]
    fn literal_data_types() {
        assert_eq!(LiteralValue::Null.data_type(), DataType::Null);
        assert_eq!(
            LiteralValue::Date("2015-02".into()).data_type(),
            DataType::Date
        );
        assert_eq!(
            LiteralValue::Quantity {
                value: Decimal::new(45, 1),
                unit: Some("mg".into())
            }
            .data_type(),
            DataType::Quantity
        );
    }
}
