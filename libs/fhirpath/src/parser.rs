//! FHIRPath parser - converts string expressions to AST
//!
//! Recursive descent parser with precedence climbing. Precedence, lowest to
//! highest (all binary operators left-associative):
//! 1. implies
//! 2. or / xor
//! 3. and
//! 4. membership (in, contains)
//! 5. equality (=, !=, ~, !~)
//! 6. comparison (<=, <, >, >=)
//! 7. type (is, as)
//! 8. union (|)
//! 9. additive (+, -, &)
//! 10. multiplicative (*, /, div, mod)
//! 11. unary (+, -, not)
//! 12. postfix (member '.', indexer '[]', invocation '(...)')
//! 13. primary (literal, %constant, identifier, parenthesized)
//!
//! `%name` constants are resolved against a caller-supplied environment at
//! parse time, producing literal nodes that keep the reference's location.

use std::collections::HashMap;

use crate::ast::*;
use crate::error::{Error, Result};
use crate::lexer::Lexer;
use crate::token::{Location, Span, Token, TokenKind};
use rust_decimal::Decimal;
use std::str::FromStr;

/// Named literals available to `%name` references.
pub type ConstantEnv = HashMap<String, LiteralValue>;

const MAX_RECURSION_DEPTH: usize = 200;

/// Calendar duration units usable as bare quantity units (`4 days`).
const CALENDAR_UNITS: &[&str] = &[
    "years",
    "year",
    "months",
    "month",
    "weeks",
    "week",
    "days",
    "day",
    "hours",
    "hour",
    "minutes",
    "minute",
    "seconds",
    "second",
    "milliseconds",
    "millisecond",
];

/// Parser for FHIRPath expressions
pub struct Parser<'a> {
    tokens: Vec<Token>,
    pos: usize,
    constants: Option<&'a ConstantEnv>,
    depth: usize,
}

impl<'a> Parser<'a> {
    /// Parse a complete expression with no constant environment.
    pub fn parse(input: &str) -> Result<Expr> {
        Self::run(input, None)
    }

    /// Parse a complete expression, resolving `%name` against `constants`.
    pub fn parse_with_constants(input: &str, constants: &'a ConstantEnv) -> Result<Expr> {
        Self::run(input, Some(constants))
    }

    fn run(input: &str, constants: Option<&'a ConstantEnv>) -> Result<Expr> {
        let tokens = Lexer::tokenize(input)?;
        let mut parser = Parser {
            tokens,
            pos: 0,
            constants,
            depth: 0,
        };
        let expr = parser.parse_expression()?;

        let trailing = parser.current();
        if trailing.kind != TokenKind::Eof {
            return Err(Error::parse(
                format!("unexpected {}", trailing.kind),
                trailing.location,
                vec![TokenKind::Eof],
            ));
        }
        Ok(expr)
    }

    fn current(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn location(&self) -> Location {
        self.current().location
    }

    fn advance(&mut self) -> Token {
        let token = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current().kind == kind
    }

    fn check_one_of(&self, kinds: &[TokenKind]) -> bool {
        kinds.contains(&self.current().kind)
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            let found = self.current();
            Err(Error::parse(
                format!("expected {}, found {}", kind, found.kind),
                found.location,
                vec![kind],
            ))
        }
    }

    fn span_from(&self, start: Location) -> Span {
        Span::new(start, self.location())
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_RECURSION_DEPTH {
            return Err(Error::parse(
                format!("expression too deeply nested (max depth: {MAX_RECURSION_DEPTH})"),
                self.location(),
                vec![],
            ));
        }
        Ok(())
    }

    fn leave(&mut self) {
        self.depth -= 1;
    }

    /// Parse an expression (lowest precedence entry point).
    fn parse_expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let expr = self.parse_implies();
        self.leave();
        expr
    }

    /// implies
    fn parse_implies(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_or()?;

        while self.eat(TokenKind::Implies) {
            let right = self.parse_or()?;
            left = Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Implies,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// or / xor
    fn parse_or(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_and()?;

        while self.check_one_of(&[TokenKind::Or, TokenKind::Xor]) {
            let op = if self.advance().kind == TokenKind::Or {
                BinaryOp::Or
            } else {
                BinaryOp::Xor
            };
            let right = self.parse_and()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// and
    fn parse_and(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_membership()?;

        while self.eat(TokenKind::And) {
            let right = self.parse_membership()?;
            left = Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::And,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// in / contains
    fn parse_membership(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_equality()?;

        while self.check_one_of(&[TokenKind::In, TokenKind::Contains]) {
            let op = if self.advance().kind == TokenKind::In {
                BinaryOp::In
            } else {
                BinaryOp::Contains
            };
            let right = self.parse_equality()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// = / != / ~ / !~
    fn parse_equality(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_comparison()?;

        while self.check_one_of(&[
            TokenKind::Equal,
            TokenKind::NotEqual,
            TokenKind::Equivalent,
            TokenKind::NotEquivalent,
        ]) {
            let op = match self.advance().kind {
                TokenKind::Equal => BinaryOp::Equal,
                TokenKind::NotEqual => BinaryOp::NotEqual,
                TokenKind::Equivalent => BinaryOp::Equivalent,
                TokenKind::NotEquivalent => BinaryOp::NotEquivalent,
                _ => unreachable!(),
            };
            let right = self.parse_comparison()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// < / <= / > / >=
    fn parse_comparison(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_type_op()?;

        while self.check_one_of(&[
            TokenKind::LessThan,
            TokenKind::LessThanOrEqual,
            TokenKind::GreaterThan,
            TokenKind::GreaterThanOrEqual,
        ]) {
            let op = match self.advance().kind {
                TokenKind::LessThan => BinaryOp::LessThan,
                TokenKind::LessThanOrEqual => BinaryOp::LessThanOrEqual,
                TokenKind::GreaterThan => BinaryOp::GreaterThan,
                TokenKind::GreaterThanOrEqual => BinaryOp::GreaterThanOrEqual,
                _ => unreachable!(),
            };
            let right = self.parse_type_op()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// is / as with a type specifier
    fn parse_type_op(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_union()?;

        while self.check_one_of(&[TokenKind::Is, TokenKind::As]) {
            let op = if self.advance().kind == TokenKind::Is {
                TypeOperator::Is
            } else {
                TypeOperator::As
            };
            let type_name = self.parse_type_specifier()?;
            left = Expr::new(
                ExprKind::TypeOp {
                    op,
                    expr: Box::new(left),
                    type_name,
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// |
    fn parse_union(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_additive()?;

        while self.eat(TokenKind::Pipe) {
            let right = self.parse_additive()?;
            left = Expr::new(
                ExprKind::Binary {
                    op: BinaryOp::Union,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// + / - / &
    fn parse_additive(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_multiplicative()?;

        while self.check_one_of(&[TokenKind::Plus, TokenKind::Minus, TokenKind::Ampersand]) {
            let op = match self.advance().kind {
                TokenKind::Plus => BinaryOp::Add,
                TokenKind::Minus => BinaryOp::Subtract,
                TokenKind::Ampersand => BinaryOp::Concat,
                _ => unreachable!(),
            };
            let right = self.parse_multiplicative()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// * / / / div / mod
    fn parse_multiplicative(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut left = self.parse_unary()?;

        while self.check_one_of(&[
            TokenKind::Multiply,
            TokenKind::Divide,
            TokenKind::Div,
            TokenKind::Mod,
        ]) {
            let op = match self.advance().kind {
                TokenKind::Multiply => BinaryOp::Multiply,
                TokenKind::Divide => BinaryOp::Divide,
                TokenKind::Div => BinaryOp::IntDivide,
                TokenKind::Mod => BinaryOp::Modulo,
                _ => unreachable!(),
            };
            let right = self.parse_unary()?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                self.span_from(start),
            );
        }

        Ok(left)
    }

    /// + / - / not prefix
    fn parse_unary(&mut self) -> Result<Expr> {
        let start = self.location();
        if self.check_one_of(&[TokenKind::Plus, TokenKind::Minus]) {
            let op = if self.advance().kind == TokenKind::Plus {
                UnaryOp::Plus
            } else {
                UnaryOp::Minus
            };
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op,
                    operand: Box::new(operand),
                },
                self.span_from(start),
            ));
        }
        // `not expr` prefix; `.not()` still parses as an invocation.
        if self.check(TokenKind::Not) && !self.peek_is(TokenKind::OpenParen) {
            self.advance();
            let operand = self.parse_unary()?;
            return Ok(Expr::new(
                ExprKind::Unary {
                    op: UnaryOp::Not,
                    operand: Box::new(operand),
                },
                self.span_from(start),
            ));
        }
        self.parse_postfix()
    }

    fn peek_is(&self, kind: TokenKind) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| t.kind == kind)
    }

    /// Postfix chain: member access, indexer, invocation.
    fn parse_postfix(&mut self) -> Result<Expr> {
        let start = self.location();
        let mut expr = self.parse_primary()?;

        loop {
            if self.check(TokenKind::Dot) {
                let dot = self.advance();
                let name = self.parse_name_after(&dot, "expected identifier after '.'")?;
                if self.check(TokenKind::OpenParen) {
                    expr = self.parse_invocation(Some(Box::new(expr)), name, start)?;
                } else {
                    expr = Expr::new(
                        ExprKind::MemberAccess {
                            expr: Box::new(expr),
                            name,
                        },
                        self.span_from(start),
                    );
                }
                continue;
            }

            if self.eat(TokenKind::OpenBracket) {
                let index = self.parse_expression()?;
                self.expect(TokenKind::CloseBracket)?;
                expr = Expr::new(
                    ExprKind::Indexer {
                        expr: Box::new(expr),
                        index: Box::new(index),
                    },
                    self.span_from(start),
                );
                continue;
            }

            break;
        }

        Ok(expr)
    }

    /// A member or function name: identifiers, delimited identifiers, and
    /// keywords used in name position.
    fn parse_name(&mut self, context: &str) -> Result<String> {
        let token = self.current();
        if token.kind.is_name() {
            Ok(self.advance().lexeme)
        } else {
            Err(Error::parse(
                format!("{}, found {}", context, token.kind),
                token.location,
                vec![TokenKind::Identifier],
            ))
        }
    }

    /// Like `parse_name`, but a missing name at end of input is reported at
    /// the preceding token (`Patient.name.` points at the trailing dot).
    fn parse_name_after(&mut self, previous: &Token, context: &str) -> Result<String> {
        if self.check(TokenKind::Eof) {
            return Err(Error::parse(
                format!("{}, found {}", context, TokenKind::Eof),
                previous.location,
                vec![TokenKind::Identifier],
            ));
        }
        self.parse_name(context)
    }

    /// Function invocation; `ofType` / `is` / `as` with a receiver lower to
    /// `TypeOp`.
    fn parse_invocation(
        &mut self,
        receiver: Option<Box<Expr>>,
        name: String,
        start: Location,
    ) -> Result<Expr> {
        self.expect(TokenKind::OpenParen)?;

        if let (Some(receiver), "ofType" | "is" | "as") = (&receiver, name.as_str()) {
            let op = match name.as_str() {
                "ofType" => TypeOperator::OfType,
                "is" => TypeOperator::Is,
                _ => TypeOperator::As,
            };
            let type_name = self.parse_type_specifier()?;
            self.expect(TokenKind::CloseParen)?;
            return Ok(Expr::new(
                ExprKind::TypeOp {
                    op,
                    expr: receiver.clone(),
                    type_name,
                },
                self.span_from(start),
            ));
        }

        let mut args = Vec::new();
        if !self.check(TokenKind::CloseParen) {
            loop {
                args.push(self.parse_expression()?);
                if !self.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.expect(TokenKind::CloseParen)?;

        Ok(Expr::new(
            ExprKind::Invocation {
                receiver,
                name,
                args,
            },
            self.span_from(start),
        ))
    }

    /// A type specifier: identifier ('.' identifier)*
    fn parse_type_specifier(&mut self) -> Result<String> {
        let mut name = self.parse_name("expected type name")?;
        while self.check(TokenKind::Dot) && self.peek_is_name() {
            self.advance();
            name.push('.');
            name.push_str(&self.parse_name("expected type name")?);
        }
        Ok(name)
    }

    fn peek_is_name(&self) -> bool {
        self.tokens
            .get(self.pos + 1)
            .is_some_and(|t| t.kind.is_name())
    }

    /// Primary forms.
    fn parse_primary(&mut self) -> Result<Expr> {
        let start = self.location();
        let token = self.current().clone();

        match token.kind {
            TokenKind::OpenParen => {
                self.advance();
                let expr = self.parse_expression()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(expr)
            }
            TokenKind::OpenBrace => {
                self.advance();
                self.expect(TokenKind::CloseBrace)?;
                Ok(Expr::new(
                    ExprKind::Literal(LiteralValue::Null),
                    self.span_from(start),
                ))
            }
            TokenKind::ExternalConstant => {
                self.advance();
                let value = self
                    .constants
                    .and_then(|env| env.get(&token.lexeme))
                    .cloned()
                    .ok_or(Error::UndefinedConstant {
                        name: token.lexeme.clone(),
                        location: token.location,
                    })?;
                Ok(Expr::new(
                    ExprKind::Literal(value),
                    self.span_from(start),
                ))
            }
            TokenKind::StringLiteral => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Literal(LiteralValue::String(token.lexeme)),
                    self.span_from(start),
                ))
            }
            TokenKind::BooleanLiteral => {
                self.advance();
                Ok(Expr::new(
                    ExprKind::Literal(LiteralValue::Boolean(token.lexeme == "true")),
                    self.span_from(start),
                ))
            }
            TokenKind::DateLiteral => {
                self.advance();
                validate_date(&token.lexeme, token.location)?;
                Ok(Expr::new(
                    ExprKind::Literal(LiteralValue::Date(token.lexeme)),
                    self.span_from(start),
                ))
            }
            TokenKind::DateTimeLiteral => {
                self.advance();
                let date_part = token.lexeme.split('T').next().unwrap_or_default();
                validate_date(date_part, token.location)?;
                Ok(Expr::new(
                    ExprKind::Literal(LiteralValue::DateTime(token.lexeme)),
                    self.span_from(start),
                ))
            }
            TokenKind::TimeLiteral => {
                self.advance();
                validate_time(&token.lexeme, token.location)?;
                Ok(Expr::new(
                    ExprKind::Literal(LiteralValue::Time(token.lexeme)),
                    self.span_from(start),
                ))
            }
            TokenKind::NumberLiteral | TokenKind::LongNumberLiteral => {
                self.advance();
                let literal = self.parse_number_literal(&token)?;
                Ok(Expr::new(ExprKind::Literal(literal), self.span_from(start)))
            }
            kind if kind.is_name() => {
                let name = self.advance().lexeme;
                if self.check(TokenKind::OpenParen) {
                    self.parse_invocation(None, name, start)
                } else {
                    Ok(Expr::new(ExprKind::Identifier(name), self.span_from(start)))
                }
            }
            other => Err(Error::parse(
                format!("expected expression, found {}", other),
                token.location,
                vec![
                    TokenKind::Identifier,
                    TokenKind::StringLiteral,
                    TokenKind::NumberLiteral,
                    TokenKind::OpenParen,
                ],
            )),
        }
    }

    /// A number literal, optionally followed by a quantity unit.
    fn parse_number_literal(&mut self, token: &Token) -> Result<LiteralValue> {
        let digits = token.lexeme.trim_end_matches('L');

        // Quantity: number followed by a quoted UCUM unit or calendar unit.
        let unit = if self.check(TokenKind::StringLiteral) {
            Some(self.advance().lexeme)
        } else if self.check(TokenKind::Identifier)
            && CALENDAR_UNITS.contains(&self.current().lexeme.as_str())
        {
            Some(self.advance().lexeme)
        } else {
            None
        };

        if let Some(unit) = unit {
            let value = Decimal::from_str(digits).map_err(|e| {
                Error::parse(format!("invalid number: {e}"), token.location, vec![])
            })?;
            return Ok(LiteralValue::Quantity {
                value,
                unit: Some(unit),
            });
        }

        if token.kind == TokenKind::NumberLiteral && digits.contains('.') {
            let value = Decimal::from_str(digits).map_err(|e| {
                Error::parse(format!("invalid number: {e}"), token.location, vec![])
            })?;
            Ok(LiteralValue::Decimal(value))
        } else {
            let value = i64::from_str(digits).map_err(|e| {
                Error::parse(format!("invalid integer: {e}"), token.location, vec![])
            })?;
            Ok(LiteralValue::Integer(value))
        }
    }
}

/// Reject calendar-impossible date lexemes (`@2015-13-02`, `@2015-02-30`).
/// Partial dates validate the components they carry.
fn validate_date(lexeme: &str, location: Location) -> Result<()> {
    let bad = |what: &str| Error::parse(format!("invalid date: {what}"), location, vec![]);
    match lexeme.len() {
        4 => Ok(()),
        7 => {
            let month: u32 = lexeme[5..7].parse().map_err(|_| bad(lexeme))?;
            if (1..=12).contains(&month) {
                Ok(())
            } else {
                Err(bad(lexeme))
            }
        }
        10 => chrono::NaiveDate::parse_from_str(lexeme, "%Y-%m-%d")
            .map(|_| ())
            .map_err(|_| bad(lexeme)),
        _ => Err(bad(lexeme)),
    }
}

/// Reject impossible time lexemes (`@T25:00`).
fn validate_time(lexeme: &str, location: Location) -> Result<()> {
    let bad = || Error::parse(format!("invalid time: {lexeme}"), location, vec![]);
    let full = match lexeme.len() {
        2 => format!("{lexeme}:00:00"),
        5 => format!("{lexeme}:00"),
        _ => lexeme.to_string(),
    };
    let truncated = full.split('.').next().unwrap_or(&full);
    chrono::NaiveTime::parse_from_str(truncated, "%H:%M:%S")
        .map(|_| ())
        .map_err(|_| bad())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &str) -> Expr {
        Parser::parse(input).unwrap()
    }

    #[test]
    fn test_impossible_dates_rejected() {
        assert!(Parser::parse("@2015-13-02").is_err());
        assert!(Parser::parse("@2015-02-30").is_err());
        assert!(Parser::parse("@T25:00").is_err());
        assert!(Parser::parse("@2015-12-31").is_ok());
    }

    fn ident(name: &str) -> ExprKind {
        ExprKind::Identifier(name.into())
    }

    #[test]
    fn test_simple_path() {
        let expr = parse("Patient.name.family");
        let ExprKind::MemberAccess { expr: inner, name } = &expr.kind else {
            panic!("expected member access, got {:?}", expr.kind);
        };
        assert_eq!(name, "family");
        let ExprKind::MemberAccess { expr: root, name } = &inner.kind else {
            panic!("expected member access");
        };
        assert_eq!(name, "name");
        assert_eq!(root.kind, ident("Patient"));
    }

    #[test]
    fn test_function_invocation() {
        let expr = parse("telecom.where(system = 'phone')");
        let ExprKind::Invocation {
            receiver,
            name,
            args,
        } = &expr.kind
        else {
            panic!("expected invocation");
        };
        assert_eq!(name, "where");
        assert_eq!(args.len(), 1);
        assert_eq!(receiver.as_ref().unwrap().kind, ident("telecom"));
        assert!(matches!(
            args[0].kind,
            ExprKind::Binary {
                op: BinaryOp::Equal,
                ..
            }
        ));
    }

    #[test]
    fn test_leading_invocation_has_no_receiver() {
        let expr = parse("exists()");
        let ExprKind::Invocation { receiver, name, .. } = &expr.kind else {
            panic!("expected invocation");
        };
        assert!(receiver.is_none());
        assert_eq!(name, "exists");
    }

    #[test]
    fn test_precedence_and_over_or() {
        // a or b and c => a or (b and c)
        let expr = parse("a or b and c");
        let ExprKind::Binary {
            op: BinaryOp::Or,
            right,
            ..
        } = &expr.kind
        else {
            panic!("expected or at the root");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::And,
                ..
            }
        ));
    }

    #[test]
    fn test_precedence_multiplicative_over_additive() {
        // 1 + 2 * 3 => 1 + (2 * 3)
        let expr = parse("1 + 2 * 3");
        let ExprKind::Binary {
            op: BinaryOp::Add,
            right,
            ..
        } = &expr.kind
        else {
            panic!("expected + at the root");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::Multiply,
                ..
            }
        ));
    }

    #[test]
    fn test_left_associativity() {
        // 1 - 2 - 3 => (1 - 2) - 3
        let expr = parse("1 - 2 - 3");
        let ExprKind::Binary {
            op: BinaryOp::Subtract,
            left,
            ..
        } = &expr.kind
        else {
            panic!("expected - at the root");
        };
        assert!(matches!(
            left.kind,
            ExprKind::Binary {
                op: BinaryOp::Subtract,
                ..
            }
        ));
    }

    #[test]
    fn test_parenthesized_grouping() {
        // (1 + 2) * 3 keeps + below *
        let expr = parse("(1 + 2) * 3");
        let ExprKind::Binary {
            op: BinaryOp::Multiply,
            left,
            ..
        } = &expr.kind
        else {
            panic!("expected * at the root");
        };
        assert!(matches!(
            left.kind,
            ExprKind::Binary {
                op: BinaryOp::Add,
                ..
            }
        ));
    }

    #[test]
    fn test_indexer() {
        let expr = parse("name[0].given");
        let ExprKind::MemberAccess { expr: inner, .. } = &expr.kind else {
            panic!("expected member access");
        };
        assert!(matches!(inner.kind, ExprKind::Indexer { .. }));
    }

    #[test]
    fn test_is_operator_and_function_agree() {
        let op_form = parse("value is Quantity");
        let fn_form = parse("value.is(Quantity)");
        assert_eq!(op_form, fn_form);
    }

    #[test]
    fn test_of_type() {
        let expr = parse("value.ofType(Quantity)");
        let ExprKind::TypeOp {
            op: TypeOperator::OfType,
            type_name,
            ..
        } = &expr.kind
        else {
            panic!("expected TypeOp, got {:?}", expr.kind);
        };
        assert_eq!(type_name, "Quantity");
    }

    #[test]
    fn test_unary_not() {
        let expr = parse("not active");
        assert!(matches!(
            expr.kind,
            ExprKind::Unary {
                op: UnaryOp::Not,
                ..
            }
        ));
    }

    #[test]
    fn test_not_as_function_name() {
        let expr = parse("active.not()");
        let ExprKind::Invocation { name, .. } = &expr.kind else {
            panic!("expected invocation");
        };
        assert_eq!(name, "not");
    }

    #[test]
    fn test_quantity_literal() {
        let expr = parse("4.5 'mg'");
        let ExprKind::Literal(LiteralValue::Quantity { unit, .. }) = &expr.kind else {
            panic!("expected quantity, got {:?}", expr.kind);
        };
        assert_eq!(unit.as_deref(), Some("mg"));

        let expr = parse("4 days");
        assert!(matches!(
            expr.kind,
            ExprKind::Literal(LiteralValue::Quantity { .. })
        ));
    }

    #[test]
    fn test_null_literal() {
        let expr = parse("{}");
        assert_eq!(expr.kind, ExprKind::Literal(LiteralValue::Null));
    }

    #[test]
    fn test_constant_resolution() {
        let mut env = ConstantEnv::new();
        env.insert("system".into(), LiteralValue::String("phone".into()));
        let expr = Parser::parse_with_constants("telecom.where(system = %system)", &env).unwrap();
        let printed = format!("{expr:?}");
        assert!(printed.contains("phone"));
    }

    #[test]
    fn test_undefined_constant() {
        let err = Parser::parse("%missing").unwrap_err();
        assert_eq!(err.kind(), "undefined_constant");
    }

    #[test]
    fn test_trailing_dot_error() {
        let err = Parser::parse("Patient.name.").unwrap_err();
        let Error::Parse {
            message,
            location,
            expected,
        } = err
        else {
            panic!("expected parse error");
        };
        assert!(message.contains("expected identifier after '.'"));
        assert_eq!(location.offset, 12);
        assert_eq!(expected, vec![TokenKind::Identifier]);
    }

    #[test]
    fn test_first_error_wins() {
        let err = Parser::parse("a + + + [").unwrap_err();
        assert_eq!(err.kind(), "parse");
    }

    #[test]
    fn test_backtick_identifier() {
        let expr = parse("Patient.`div`");
        let ExprKind::MemberAccess { name, .. } = &expr.kind else {
            panic!("expected member access");
        };
        assert_eq!(name, "div");
    }

    #[test]
    fn test_membership_between_and_and_equality() {
        // a and b in c => a and (b in c)
        let expr = parse("a and b in c");
        let ExprKind::Binary {
            op: BinaryOp::And,
            right,
            ..
        } = &expr.kind
        else {
            panic!("expected and at the root");
        };
        assert!(matches!(
            right.kind,
            ExprKind::Binary {
                op: BinaryOp::In,
                ..
            }
        ));
    }
}
