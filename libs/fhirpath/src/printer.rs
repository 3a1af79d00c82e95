//! AST printer - renders an expression tree back to FHIRPath source
//!
//! The printed form re-parses to a structurally equal tree. Parentheses are
//! re-derived from precedence, not from the original source.

use crate::ast::*;

/// Binding strength, aligned with the parser's precedence ladder.
fn precedence(expr: &Expr) -> u8 {
    match &expr.kind {
        ExprKind::Binary { op, .. } => match op {
            BinaryOp::Implies => 1,
            BinaryOp::Or | BinaryOp::Xor => 2,
            BinaryOp::And => 3,
            BinaryOp::In | BinaryOp::Contains => 4,
            BinaryOp::Equal
            | BinaryOp::NotEqual
            | BinaryOp::Equivalent
            | BinaryOp::NotEquivalent => 5,
            BinaryOp::LessThan
            | BinaryOp::LessThanOrEqual
            | BinaryOp::GreaterThan
            | BinaryOp::GreaterThanOrEqual => 6,
            BinaryOp::Union => 8,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Concat => 9,
            BinaryOp::Multiply | BinaryOp::Divide | BinaryOp::IntDivide | BinaryOp::Modulo => 10,
        },
        ExprKind::TypeOp { op, .. } => match op {
            TypeOperator::Is | TypeOperator::As => 7,
            // `.ofType(T)` is a postfix invocation.
            TypeOperator::OfType => 12,
        },
        ExprKind::Unary { .. } => 11,
        ExprKind::MemberAccess { .. } | ExprKind::Invocation { .. } | ExprKind::Indexer { .. } => {
            12
        }
        ExprKind::Literal(_) | ExprKind::Identifier(_) => 13,
    }
}

/// Render `expr` as FHIRPath source.
pub fn print(expr: &Expr) -> String {
    let mut out = String::new();
    write_expr(&mut out, expr);
    out
}

fn write_child(out: &mut String, child: &Expr, min_precedence: u8) {
    if precedence(child) < min_precedence {
        out.push('(');
        write_expr(out, child);
        out.push(')');
    } else {
        write_expr(out, child);
    }
}

fn write_expr(out: &mut String, expr: &Expr) {
    match &expr.kind {
        ExprKind::Literal(literal) => write_literal(out, literal),
        ExprKind::Identifier(name) => write_name(out, name),
        ExprKind::MemberAccess { expr, name } => {
            write_child(out, expr, 12);
            out.push('.');
            write_name(out, name);
        }
        ExprKind::Invocation {
            receiver,
            name,
            args,
        } => {
            if let Some(receiver) = receiver {
                write_child(out, receiver, 12);
                out.push('.');
            }
            write_name(out, name);
            out.push('(');
            for (i, arg) in args.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write_expr(out, arg);
            }
            out.push(')');
        }
        ExprKind::Indexer { expr, index } => {
            write_child(out, expr, 12);
            out.push('[');
            write_expr(out, index);
            out.push(']');
        }
        ExprKind::Unary { op, operand } => {
            match op {
                UnaryOp::Plus => out.push('+'),
                UnaryOp::Minus => out.push('-'),
                UnaryOp::Not => out.push_str("not "),
            }
            write_child(out, operand, 11);
        }
        ExprKind::Binary { op, left, right } => {
            let prec = precedence(expr);
            write_child(out, left, prec);
            out.push(' ');
            out.push_str(op.symbol());
            out.push(' ');
            // Left-associative: same-precedence right child keeps its parens.
            write_child(out, right, prec + 1);
        }
        ExprKind::TypeOp {
            op,
            expr: operand,
            type_name,
        } => match op {
            TypeOperator::Is | TypeOperator::As => {
                write_child(out, operand, 7);
                out.push(' ');
                out.push_str(if *op == TypeOperator::Is { "is" } else { "as" });
                out.push(' ');
                out.push_str(type_name);
            }
            TypeOperator::OfType => {
                write_child(out, operand, 12);
                out.push_str(".ofType(");
                out.push_str(type_name);
                out.push(')');
            }
        },
    }
}

fn write_literal(out: &mut String, literal: &LiteralValue) {
    match literal {
        LiteralValue::Null => out.push_str("{}"),
        LiteralValue::Boolean(b) => out.push_str(if *b { "true" } else { "false" }),
        LiteralValue::Integer(i) => out.push_str(&i.to_string()),
        LiteralValue::Decimal(d) => out.push_str(&d.to_string()),
        LiteralValue::String(s) => write_string(out, s),
        LiteralValue::Date(lexeme) => {
            out.push('@');
            out.push_str(lexeme);
        }
        LiteralValue::DateTime(lexeme) => {
            out.push('@');
            out.push_str(lexeme);
        }
        LiteralValue::Time(lexeme) => {
            out.push_str("@T");
            out.push_str(lexeme);
        }
        LiteralValue::Quantity { value, unit } => {
            out.push_str(&value.to_string());
            if let Some(unit) = unit {
                out.push(' ');
                if is_calendar_unit(unit) {
                    out.push_str(unit);
                } else {
                    write_string(out, unit);
                }
            }
        }
    }
}

fn is_calendar_unit(unit: &str) -> bool {
    matches!(
        unit,
        "years"
            | "year"
            | "months"
            | "month"
            | "weeks"
            | "week"
            | "days"
            | "day"
            | "hours"
            | "hour"
            | "minutes"
            | "minute"
            | "seconds"
            | "second"
            | "milliseconds"
            | "millisecond"
    )
}

fn write_string(out: &mut String, value: &str) {
    out.push('\'');
    for c in value.chars() {
        match c {
            '\'' => out.push_str("\\'"),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            '\x0C' => out.push_str("\\f"),
            _ => out.push(c),
        }
    }
    out.push('\'');
}

const KEYWORDS: &[&str] = &[
    "and", "or", "xor", "implies", "not", "is", "as", "in", "contains", "div", "mod", "true",
    "false",
];

fn write_name(out: &mut String, name: &str) {
    let plain = !name.is_empty()
        && name
            .chars()
            .next()
            .is_some_and(|c| c.is_alphabetic() || c == '_')
        && name.chars().all(|c| c.is_alphanumeric() || c == '_')
        && !KEYWORDS.contains(&name);
    if plain {
        out.push_str(name);
    } else {
        out.push('`');
        out.push_str(name);
        out.push('`');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn round_trip(input: &str) {
        let parsed = Parser::parse(input).unwrap();
        let printed = print(&parsed);
        let reparsed = Parser::parse(&printed)
            .unwrap_or_else(|e| panic!("printed form {printed:?} fails to parse: {e}"));
        assert_eq!(parsed, reparsed, "round trip changed tree for {printed:?}");
    }

    #[test]
    fn prints_paths() {
        let expr = Parser::parse("Patient.name.family").unwrap();
        assert_eq!(print(&expr), "Patient.name.family");
    }

    #[test]
    fn reinserts_necessary_parens() {
        let expr = Parser::parse("(1 + 2) * 3").unwrap();
        assert_eq!(print(&expr), "(1 + 2) * 3");
    }

    #[test]
    fn drops_redundant_parens() {
        let expr = Parser::parse("(((name)))").unwrap();
        assert_eq!(print(&expr), "name");
    }

    #[test]
    fn quotes_keyword_members() {
        let expr = Parser::parse("text.`div`").unwrap();
        assert_eq!(print(&expr), "text.`div`");
    }

    #[test]
    fn round_trips() {
        for input in [
            "Patient.name.family",
            "telecom.where(system = 'phone').value.first()",
            "name[0].given",
            "value.ofType(Quantity).value > 100",
            "a or b and c",
            "a and (b or c)",
            "1 - 2 - 3",
            "1 - (2 - 3)",
            "birthDate.lowBoundary()",
            "deceased.exists() and deceased != false",
            "4.5 'mg'",
            "4 days",
            "@2015-02-04T14:34:28Z < @2016",
            "@T14:30",
            "{}",
            "not active",
            "value is Quantity implies value.ofType(Quantity).value.exists()",
            "identifier | extension('http://example.org').value",
            "'it\\'s'",
            "a in b contains c",
        ] {
            round_trip(input);
        }
    }
}
