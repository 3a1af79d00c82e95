//! Static analysis - population annotation for FHIRPath expressions
//!
//! Walks an expression bottom-up against the element table and annotates
//! every node with the cardinality and FHIR type it is known to denote. The
//! input tree is not mutated; an annotated copy is returned. Anything the
//! element table cannot answer stays `Unknown` and is never rejected here;
//! rejection policy belongs to the ViewDefinition validator.

use crate::ast::*;
use quarz_schema::{element_info, is_choice_field, Cardinality};
use tracing::warn;

/// Annotate `expr` as evaluated against one resource of `resource_type`.
pub fn annotate(expr: &Expr, resource_type: &str) -> Expr {
    let focus = Population::scalar(resource_type);
    visit(expr, &focus)
}

/// Annotate `expr` against an arbitrary focus population (one element of a
/// `forEach` iteration, for instance).
pub fn annotate_with_focus(expr: &Expr, focus: &Population) -> Expr {
    visit(expr, focus)
}

/// The population of the whole expression (root of the annotated tree).
pub fn analyze(expr: &Expr, resource_type: &str) -> Population {
    annotate(expr, resource_type).population()
}

fn visit(expr: &Expr, focus: &Population) -> Expr {
    let (kind, population) = match &expr.kind {
        ExprKind::Literal(literal) => {
            let population = match literal {
                LiteralValue::Null => Population {
                    cardinality: Cardinality::Scalar,
                    fhir_type: None,
                },
                other => Population::scalar(other.data_type().fhir_name()),
            };
            (ExprKind::Literal(literal.clone()), population)
        }

        ExprKind::Identifier(name) => {
            // A leading identifier matching the context type is the
            // resource-type assertion, not an element access.
            let population = if focus.fhir_type.as_deref() == Some(name.as_str()) {
                focus.clone()
            } else {
                element_step(focus, name)
            };
            (ExprKind::Identifier(name.clone()), population)
        }

        ExprKind::MemberAccess { expr: inner, name } => {
            let inner = visit(inner, focus);
            let population = element_step(&inner.population(), name);
            (
                ExprKind::MemberAccess {
                    expr: Box::new(inner),
                    name: name.clone(),
                },
                population,
            )
        }

        ExprKind::Invocation {
            receiver,
            name,
            args,
        } => {
            let receiver = receiver.as_ref().map(|r| Box::new(visit(r, focus)));
            let input = receiver
                .as_ref()
                .map(|r| r.population())
                .unwrap_or_else(|| focus.clone());
            // Arguments of the filtering functions see one element of the
            // input as their focus.
            let element = element_of(&input);
            let arg_focus = match name.as_str() {
                "where" | "exists" | "all" | "select" => element.clone(),
                _ => focus.clone(),
            };
            let args: Vec<Expr> = args.iter().map(|a| visit(a, &arg_focus)).collect();

            if name == "where" {
                if let Some(cond) = args.first() {
                    let pop = cond.population();
                    if pop.fhir_type.is_some() && !pop.is_boolean() {
                        warn!(
                            condition_type = pop.fhir_type.as_deref().unwrap_or("unknown"),
                            "where() condition is not boolean; rows will be dropped"
                        );
                    }
                }
            }

            let population = invocation_population(name, &input, &element, &args);
            (
                ExprKind::Invocation {
                    receiver,
                    name: name.clone(),
                    args,
                },
                population,
            )
        }

        ExprKind::Indexer { expr: inner, index } => {
            let inner = visit(inner, focus);
            let index = visit(index, focus);
            let population = element_of(&inner.population());
            (
                ExprKind::Indexer {
                    expr: Box::new(inner),
                    index: Box::new(index),
                },
                population,
            )
        }

        ExprKind::Unary { op, operand } => {
            let operand = visit(operand, focus);
            let population = match op {
                UnaryOp::Not => Population::scalar("boolean"),
                UnaryOp::Plus | UnaryOp::Minus => operand.population(),
            };
            (
                ExprKind::Unary {
                    op: *op,
                    operand: Box::new(operand),
                },
                population,
            )
        }

        ExprKind::Binary { op, left, right } => {
            let left = visit(left, focus);
            let right = visit(right, focus);
            let population = binary_population(*op, &left, &right);
            (
                ExprKind::Binary {
                    op: *op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                population,
            )
        }

        ExprKind::TypeOp {
            op,
            expr: inner,
            type_name,
        } => {
            let inner = visit(inner, focus);
            let population = match op {
                TypeOperator::Is => Population::scalar("boolean"),
                TypeOperator::As | TypeOperator::OfType => Population {
                    cardinality: inner.population().cardinality,
                    fhir_type: Some(type_name.clone()),
                },
            };
            (
                ExprKind::TypeOp {
                    op: *op,
                    expr: Box::new(inner),
                    type_name: type_name.clone(),
                },
                population,
            )
        }
    };

    Expr::with_meta(kind, expr.span, population)
}

/// One navigation step: the population of `input.name`.
fn element_step(input: &Population, name: &str) -> Population {
    let Some(parent_type) = input.fhir_type.as_deref() else {
        return Population::unknown();
    };

    if let Some(info) = element_info(parent_type, name) {
        let cardinality = match (input.cardinality, info.collection) {
            (Cardinality::Unknown, _) => Cardinality::Unknown,
            (_, true) | (Cardinality::Collection, false) => Cardinality::Collection,
            (Cardinality::Scalar, false) => Cardinality::Scalar,
        };
        return Population {
            cardinality,
            fhir_type: Some(info.fhir_type.to_string()),
        };
    }

    // A choice base field (`value`, `onset`, ...) is a scalar of undetermined
    // type; a later ofType()/as downcast narrows it.
    if is_choice_field(name) {
        return Population {
            cardinality: input.cardinality,
            fhir_type: None,
        };
    }

    Population::unknown()
}

/// The population of one element drawn from `input`.
fn element_of(input: &Population) -> Population {
    Population {
        cardinality: match input.cardinality {
            Cardinality::Unknown => Cardinality::Unknown,
            _ => Cardinality::Scalar,
        },
        fhir_type: input.fhir_type.clone(),
    }
}

fn invocation_population(name: &str, input: &Population, element: &Population, args: &[Expr]) -> Population {
    match name {
        "exists" | "empty" | "hasValue" | "not" | "all" | "is" => Population::scalar("boolean"),
        "count" => Population::scalar("integer"),
        "join" | "toString" => Population::scalar("string"),
        "getResourceKey" | "getReferenceKey" => Population::scalar("string"),
        "first" | "last" | "single" => element.clone(),
        "tail" | "skip" | "take" | "distinct" => Population {
            cardinality: input.cardinality,
            fhir_type: input.fhir_type.clone(),
        },
        "where" | "select" => {
            if name == "select" {
                args.first()
                    .map(|a| a.population())
                    .unwrap_or_else(Population::unknown)
            } else {
                input.clone()
            }
        }
        "extension" => Population::collection("Extension"),
        "lowBoundary" | "highBoundary" => element.clone(),
        "sum" | "avg" | "min" | "max" => Population {
            cardinality: Cardinality::Scalar,
            fhir_type: input.fhir_type.clone(),
        },
        // Receiverless `ofType(T)` / `as(T)` narrow the focus to T.
        "ofType" | "as" => Population {
            cardinality: input.cardinality,
            fhir_type: args.first().and_then(|arg| match &arg.kind {
                ExprKind::Identifier(type_name) => Some(type_name.clone()),
                _ => None,
            }),
        },
        _ => Population::unknown(),
    }
}

fn binary_population(op: BinaryOp, left: &Expr, right: &Expr) -> Population {
    if op.is_boolean() || op.is_comparison() || matches!(op, BinaryOp::In | BinaryOp::Contains) {
        return Population::scalar("boolean");
    }
    match op {
        BinaryOp::Concat => Population::scalar("string"),
        BinaryOp::Union => {
            let lt = left.population().fhir_type;
            let rt = right.population().fhir_type;
            Population {
                cardinality: Cardinality::Collection,
                fhir_type: if lt == rt { lt } else { None },
            }
        }
        _ => {
            // Arithmetic: the operand type when the operands agree.
            let lt = left.population().fhir_type;
            let rt = right.population().fhir_type;
            Population {
                cardinality: Cardinality::Scalar,
                fhir_type: if lt == rt { lt } else { None },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn population(input: &str, resource: &str) -> Population {
        let expr = Parser::parse(input).unwrap();
        analyze(&expr, resource)
    }

    #[test]
    fn scalar_path() {
        let pop = population("Patient.birthDate", "Patient");
        assert_eq!(pop.cardinality, Cardinality::Scalar);
        assert_eq!(pop.fhir_type.as_deref(), Some("date"));
    }

    #[test]
    fn collection_path() {
        let pop = population("name", "Patient");
        assert_eq!(pop.cardinality, Cardinality::Collection);
        assert_eq!(pop.fhir_type.as_deref(), Some("HumanName"));
    }

    #[test]
    fn collection_propagates_through_scalar_elements() {
        // Each HumanName has one family, but name is a collection.
        let pop = population("name.family", "Patient");
        assert_eq!(pop.cardinality, Cardinality::Collection);
        assert_eq!(pop.fhir_type.as_deref(), Some("string"));
    }

    #[test]
    fn first_narrows_to_scalar() {
        let pop = population("name.family.first()", "Patient");
        assert_eq!(pop.cardinality, Cardinality::Scalar);
        assert_eq!(pop.fhir_type.as_deref(), Some("string"));
    }

    #[test]
    fn where_keeps_collection() {
        let pop = population("telecom.where(system = 'phone')", "Patient");
        assert_eq!(pop.cardinality, Cardinality::Collection);
        assert_eq!(pop.fhir_type.as_deref(), Some("ContactPoint"));
    }

    #[test]
    fn exists_is_boolean() {
        let pop = population("name.exists()", "Patient");
        assert!(pop.is_boolean());
        assert_eq!(pop.cardinality, Cardinality::Scalar);
    }

    #[test]
    fn comparison_is_boolean() {
        let pop = population("birthDate < @2000", "Patient");
        assert!(pop.is_boolean());
    }

    #[test]
    fn resource_assertion_is_transparent() {
        let pop = population("Patient.name", "Patient");
        assert_eq!(pop.cardinality, Cardinality::Collection);
    }

    #[test]
    fn unknown_elements_stay_unknown() {
        let pop = population("unknownField.whatever", "Patient");
        assert_eq!(pop.cardinality, Cardinality::Unknown);
        assert_eq!(pop.fhir_type, None);
    }

    #[test]
    fn of_type_narrows() {
        let pop = population("value.ofType(Quantity).value", "Observation");
        assert_eq!(pop.fhir_type.as_deref(), Some("decimal"));
    }

    #[test]
    fn annotation_covers_nodes() {
        let expr = Parser::parse("name.family").unwrap();
        let annotated = annotate(&expr, "Patient");
        assert!(annotated.meta.is_some());
        let ExprKind::MemberAccess { expr: inner, .. } = &annotated.kind else {
            panic!("expected member access");
        };
        assert!(inner.meta.is_some());
    }
}
