//! FHIRPath lexer - tokenizes input strings
//!
//! Converts FHIRPath expression strings into a stream of tokens in a single
//! forward pass. Handles all lexical rules from the FHIRPath grammar.

use crate::error::{Error, Result};
use crate::token::{Location, Token, TokenKind};

/// The FHIRPath lexer
pub struct Lexer {
    chars: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
    current_char: Option<char>,
}

impl Lexer {
    /// Create a new lexer for the given input
    pub fn new(input: &str) -> Self {
        let chars: Vec<char> = input.chars().collect();
        let current_char = chars.first().copied();

        Self {
            chars,
            position: 0,
            line: 1,
            column: 1,
            current_char,
        }
    }

    /// Scan the whole input into a token vector ending with `Eof`.
    /// Stops at the first lexical error.
    pub fn tokenize(input: &str) -> Result<Vec<Token>> {
        let mut lexer = Self::new(input);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                return Ok(tokens);
            }
        }
    }

    fn location(&self) -> Location {
        Location {
            line: self.line,
            column: self.column,
            offset: self.position,
        }
    }

    /// Advance to the next character
    fn advance(&mut self) {
        if let Some(c) = self.current_char {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.position += 1;
        self.current_char = self.chars.get(self.position).copied();
    }

    /// Peek at the next character without advancing
    fn peek(&self) -> Option<char> {
        self.chars.get(self.position + 1).copied()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current_char {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }

    /// Skip comments (both // and /* */)
    fn skip_comment(&mut self) -> Result<()> {
        if self.current_char == Some('/') && self.peek() == Some('/') {
            self.advance();
            self.advance();
            while let Some(c) = self.current_char {
                if c == '\n' {
                    self.advance();
                    break;
                }
                self.advance();
            }
            Ok(())
        } else if self.current_char == Some('/') && self.peek() == Some('*') {
            let start = self.location();
            self.advance();
            self.advance();
            while let Some(c) = self.current_char {
                if c == '*' && self.peek() == Some('/') {
                    self.advance();
                    self.advance();
                    return Ok(());
                }
                self.advance();
            }
            Err(Error::lexer("unterminated block comment", start))
        } else {
            Ok(())
        }
    }

    /// Read an identifier
    fn read_identifier(&mut self) -> String {
        let start_pos = self.position;
        while let Some(c) = self.current_char {
            if c.is_alphanumeric() || c == '_' {
                self.advance();
            } else {
                break;
            }
        }
        self.chars[start_pos..self.position].iter().collect()
    }

    /// Read a delimited identifier: `identifier`
    fn read_delimited_identifier(&mut self) -> Result<String> {
        let start = self.location();
        self.advance(); // Skip opening backtick

        let mut value = String::new();
        while let Some(c) = self.current_char {
            match c {
                '`' => {
                    self.advance(); // Skip closing backtick
                    return Ok(value);
                }
                '\\' => value.push(self.read_escape()?),
                _ => {
                    value.push(c);
                    self.advance();
                }
            }
        }

        Err(Error::lexer("unterminated delimited identifier", start))
    }

    /// Read a string literal: 'string'
    fn read_string(&mut self) -> Result<String> {
        let start = self.location();
        self.advance(); // Skip opening quote

        let mut value = String::new();
        while let Some(c) = self.current_char {
            match c {
                '\'' => {
                    self.advance(); // Skip closing quote
                    return Ok(value);
                }
                '\\' => value.push(self.read_escape()?),
                _ => {
                    value.push(c);
                    self.advance();
                }
            }
        }

        Err(Error::lexer("unterminated string", start))
    }

    /// Read one backslash escape sequence, positioned on the backslash.
    fn read_escape(&mut self) -> Result<char> {
        let start = self.location();
        self.advance(); // Skip backslash
        let Some(escaped) = self.current_char else {
            return Err(Error::lexer("incomplete escape sequence", start));
        };

        let resolved = match escaped {
            '\'' => '\'',
            '"' => '"',
            '`' => '`',
            '\\' => '\\',
            '/' => '/',
            'f' => '\x0C',
            'n' => '\n',
            'r' => '\r',
            't' => '\t',
            'u' => {
                // Unicode escape: \uXXXX
                self.advance(); // Skip 'u'
                let mut hex = String::new();
                for _ in 0..4 {
                    match self.current_char {
                        Some(h) if h.is_ascii_hexdigit() => {
                            hex.push(h);
                            self.advance();
                        }
                        _ => {
                            return Err(Error::lexer("invalid unicode escape sequence", start));
                        }
                    }
                }
                let code = u32::from_str_radix(&hex, 16)
                    .map_err(|_| Error::lexer("invalid unicode code point", start))?;
                return char::from_u32(code)
                    .ok_or_else(|| Error::lexer("invalid unicode character", start));
            }
            other => {
                return Err(Error::lexer(
                    format!("unknown escape sequence: \\{}", other),
                    start,
                ));
            }
        };
        self.advance();
        Ok(resolved)
    }

    /// Read a number (NUMBER or LONGNUMBER)
    fn read_number(&mut self) -> (String, bool) {
        let start_pos = self.position;
        let mut is_long = false;
        let mut has_decimal = false;

        while let Some(c) = self.current_char {
            if c.is_ascii_digit() {
                self.advance();
            } else {
                break;
            }
        }

        // Only consume the dot when digits follow; `5.first()` leaves the
        // dot for the parser.
        if self.current_char == Some('.') && self.peek().is_some_and(|c| c.is_ascii_digit()) {
            has_decimal = true;
            self.advance();
            while let Some(c) = self.current_char {
                if c.is_ascii_digit() {
                    self.advance();
                } else {
                    break;
                }
            }
        }

        if !has_decimal && self.current_char == Some('L') {
            is_long = true;
            self.advance();
        }

        let value: String = self.chars[start_pos..self.position].iter().collect();
        (value, is_long)
    }

    /// Read a date/time literal: @DATE, @DATETIME, @TIME
    fn read_date_time(&mut self) -> Result<(String, TokenKind)> {
        self.advance(); // Skip '@'

        if self.current_char == Some('T') {
            // Time literal: @T...
            self.advance();
            return self.read_time_format().map(|s| (s, TokenKind::TimeLiteral));
        }

        let date_str = self.read_date_format()?;

        if self.current_char == Some('T') {
            self.advance();
            // Partial datetimes like @2015T carry no time component.
            if self.current_char.is_some_and(|c| c.is_ascii_digit()) {
                let time_str = self.read_time_format()?;
                let tz_str = if self.current_char_is_one_of(&['Z', '+', '-']) {
                    self.read_timezone_offset()?
                } else {
                    String::new()
                };
                Ok((
                    format!("{}T{}{}", date_str, time_str, tz_str),
                    TokenKind::DateTimeLiteral,
                ))
            } else {
                Ok((format!("{}T", date_str), TokenKind::DateTimeLiteral))
            }
        } else {
            Ok((date_str, TokenKind::DateLiteral))
        }
    }

    fn read_digits(&mut self, count: usize, what: &str) -> Result<String> {
        let mut value = String::new();
        for _ in 0..count {
            match self.current_char {
                Some(c) if c.is_ascii_digit() => {
                    value.push(c);
                    self.advance();
                }
                _ => {
                    return Err(Error::lexer(
                        format!("expected {}-digit {}", count, what),
                        self.location(),
                    ));
                }
            }
        }
        Ok(value)
    }

    /// Read date format: YYYY(-MM(-DD)?)?
    fn read_date_format(&mut self) -> Result<String> {
        let mut value = self.read_digits(4, "year")?;

        if self.current_char == Some('-') {
            value.push('-');
            self.advance();
            value.push_str(&self.read_digits(2, "month")?);

            if self.current_char == Some('-') {
                value.push('-');
                self.advance();
                value.push_str(&self.read_digits(2, "day")?);
            }
        }

        Ok(value)
    }

    /// Read time format: HH(:MM(:SS(.mmm)?)?)?
    fn read_time_format(&mut self) -> Result<String> {
        let mut value = self.read_digits(2, "hour")?;

        if self.current_char == Some(':') {
            value.push(':');
            self.advance();
            value.push_str(&self.read_digits(2, "minute")?);

            if self.current_char == Some(':') {
                value.push(':');
                self.advance();
                value.push_str(&self.read_digits(2, "second")?);

                // Fractional seconds; the dot may also start a method call
                // (@T14:34:28.is()), so only consume it before digits.
                if self.current_char == Some('.')
                    && self.peek().is_some_and(|c| c.is_ascii_digit())
                {
                    value.push('.');
                    self.advance();
                    while let Some(c) = self.current_char {
                        if c.is_ascii_digit() {
                            value.push(c);
                            self.advance();
                        } else {
                            break;
                        }
                    }
                }
            }
        }

        Ok(value)
    }

    /// Read timezone offset: Z or +/-HH:MM
    fn read_timezone_offset(&mut self) -> Result<String> {
        let mut value = String::new();

        if self.current_char == Some('Z') {
            value.push('Z');
            self.advance();
            return Ok(value);
        }

        if let Some(sign) = self.current_char {
            if sign == '+' || sign == '-' {
                value.push(sign);
                self.advance();
                value.push_str(&self.read_digits(2, "timezone hour")?);

                if self.current_char != Some(':') {
                    return Err(Error::lexer(
                        "expected ':' and 2-digit minute in timezone offset",
                        self.location(),
                    ));
                }
                value.push(':');
                self.advance();
                value.push_str(&self.read_digits(2, "timezone minute")?);
            }
        }

        Ok(value)
    }

    fn current_char_is_one_of(&self, chars: &[char]) -> bool {
        self.current_char.is_some_and(|c| chars.contains(&c))
    }

    /// Get the next token from the input
    pub fn next_token(&mut self) -> Result<Token> {
        // Skip whitespace and comments
        loop {
            self.skip_whitespace();
            if self.current_char == Some('/') && matches!(self.peek(), Some('/') | Some('*')) {
                self.skip_comment()?;
            } else {
                break;
            }
        }

        let location = self.location();

        let Some(c) = self.current_char else {
            return Ok(Token::eof(location));
        };

        let simple = |lexer: &mut Self, kind: TokenKind, lexeme: &str| {
            lexer.advance();
            Ok(Token::new(kind, lexeme.into(), location))
        };

        match c {
            '.' => simple(self, TokenKind::Dot, "."),
            ',' => simple(self, TokenKind::Comma, ","),
            '(' => simple(self, TokenKind::OpenParen, "("),
            ')' => simple(self, TokenKind::CloseParen, ")"),
            '[' => simple(self, TokenKind::OpenBracket, "["),
            ']' => simple(self, TokenKind::CloseBracket, "]"),
            '{' => simple(self, TokenKind::OpenBrace, "{"),
            '}' => simple(self, TokenKind::CloseBrace, "}"),
            '+' => simple(self, TokenKind::Plus, "+"),
            '-' => simple(self, TokenKind::Minus, "-"),
            '*' => simple(self, TokenKind::Multiply, "*"),
            '/' => simple(self, TokenKind::Divide, "/"),
            '&' => simple(self, TokenKind::Ampersand, "&"),
            '|' => simple(self, TokenKind::Pipe, "|"),
            '=' => simple(self, TokenKind::Equal, "="),
            '~' => simple(self, TokenKind::Equivalent, "~"),
            '%' => {
                self.advance();
                // External constant: %identifier, %'string' or %`delimited`
                let name = if self.current_char == Some('\'') {
                    self.read_string()?
                } else if self.current_char == Some('`') {
                    self.read_delimited_identifier()?
                } else {
                    let ident = self.read_identifier();
                    if ident.is_empty() {
                        return Err(Error::lexer("expected constant name after '%'", location));
                    }
                    ident
                };
                Ok(Token::new(TokenKind::ExternalConstant, name, location))
            }
            '@' => {
                let (lexeme, kind) = self.read_date_time()?;
                Ok(Token::new(kind, lexeme, location))
            }
            '\'' => {
                let value = self.read_string()?;
                Ok(Token::new(TokenKind::StringLiteral, value, location))
            }
            '`' => {
                let value = self.read_delimited_identifier()?;
                Ok(Token::new(TokenKind::DelimitedIdentifier, value, location))
            }
            '<' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Ok(Token::new(TokenKind::LessThanOrEqual, "<=".into(), location))
                } else {
                    Ok(Token::new(TokenKind::LessThan, "<".into(), location))
                }
            }
            '>' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Ok(Token::new(
                        TokenKind::GreaterThanOrEqual,
                        ">=".into(),
                        location,
                    ))
                } else {
                    Ok(Token::new(TokenKind::GreaterThan, ">".into(), location))
                }
            }
            '!' => {
                self.advance();
                if self.current_char == Some('=') {
                    self.advance();
                    Ok(Token::new(TokenKind::NotEqual, "!=".into(), location))
                } else if self.current_char == Some('~') {
                    self.advance();
                    Ok(Token::new(TokenKind::NotEquivalent, "!~".into(), location))
                } else {
                    Err(Error::lexer("unexpected character: '!'", location))
                }
            }
            _ => {
                if c.is_ascii_digit() {
                    let (value, is_long) = self.read_number();
                    let kind = if is_long {
                        TokenKind::LongNumberLiteral
                    } else {
                        TokenKind::NumberLiteral
                    };
                    Ok(Token::new(kind, value, location))
                } else if c.is_alphabetic() || c == '_' {
                    let ident = self.read_identifier();
                    let kind = match ident.as_str() {
                        "true" | "false" => TokenKind::BooleanLiteral,
                        "and" => TokenKind::And,
                        "or" => TokenKind::Or,
                        "xor" => TokenKind::Xor,
                        "implies" => TokenKind::Implies,
                        "not" => TokenKind::Not,
                        "is" => TokenKind::Is,
                        "as" => TokenKind::As,
                        "in" => TokenKind::In,
                        "contains" => TokenKind::Contains,
                        "div" => TokenKind::Div,
                        "mod" => TokenKind::Mod,
                        _ => TokenKind::Identifier,
                    };
                    Ok(Token::new(kind, ident, location))
                } else {
                    Err(Error::lexer(format!("unexpected character: {}", c), location))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokenize(input: &str) -> Vec<Token> {
        Lexer::tokenize(input).unwrap()
    }

    #[test]
    fn test_identifiers() {
        let tokens = tokenize("Patient name _test");
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].lexeme, "Patient");
        assert_eq!(tokens[1].lexeme, "name");
        assert_eq!(tokens[2].lexeme, "_test");
        assert_eq!(tokens[3].kind, TokenKind::Eof);
    }

    #[test]
    fn test_string_literal() {
        let tokens = tokenize("'hello' 'wo\\'rld'");
        assert_eq!(tokens[0].kind, TokenKind::StringLiteral);
        assert_eq!(tokens[0].lexeme, "hello");
        assert_eq!(tokens[1].lexeme, "wo'rld");
    }

    #[test]
    fn test_unicode_escape() {
        let tokens = tokenize("'caf\\u00e9'");
        assert_eq!(tokens[0].lexeme, "café");
    }

    #[test]
    fn test_unterminated_string() {
        let err = Lexer::tokenize("'abc").unwrap_err();
        match err {
            Error::Lexer { message, location } => {
                assert!(message.contains("unterminated string"));
                assert_eq!(location.column, 1);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_bad_escape() {
        assert!(Lexer::tokenize("'a\\qb'").is_err());
    }

    #[test]
    fn test_numbers() {
        let tokens = tokenize("123 45.67 999L");
        assert_eq!(tokens[0].kind, TokenKind::NumberLiteral);
        assert_eq!(tokens[0].lexeme, "123");
        assert_eq!(tokens[1].lexeme, "45.67");
        assert_eq!(tokens[2].kind, TokenKind::LongNumberLiteral);
        assert_eq!(tokens[2].lexeme, "999L");
    }

    #[test]
    fn test_number_then_method() {
        let tokens = tokenize("5.single()");
        assert_eq!(tokens[0].lexeme, "5");
        assert_eq!(tokens[1].kind, TokenKind::Dot);
        assert_eq!(tokens[2].lexeme, "single");
    }

    #[test]
    fn test_keywords() {
        let tokens = tokenize("and or xor implies div mod in contains as is not");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::And,
                TokenKind::Or,
                TokenKind::Xor,
                TokenKind::Implies,
                TokenKind::Div,
                TokenKind::Mod,
                TokenKind::In,
                TokenKind::Contains,
                TokenKind::As,
                TokenKind::Is,
                TokenKind::Not,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_operators() {
        let tokens = tokenize("+ - * / = != ~ !~ < <= > >= | &");
        let kinds: Vec<TokenKind> = tokens.iter().map(|t| t.kind).collect();
        assert_eq!(
            kinds,
            vec![
                TokenKind::Plus,
                TokenKind::Minus,
                TokenKind::Multiply,
                TokenKind::Divide,
                TokenKind::Equal,
                TokenKind::NotEqual,
                TokenKind::Equivalent,
                TokenKind::NotEquivalent,
                TokenKind::LessThan,
                TokenKind::LessThanOrEqual,
                TokenKind::GreaterThan,
                TokenKind::GreaterThanOrEqual,
                TokenKind::Pipe,
                TokenKind::Ampersand,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn test_date_literals() {
        let tokens = tokenize("@2015 @2015-02 @2015-02-04 @2015-02-04T14:34:28Z @T14:34:28");
        assert_eq!(tokens[0].kind, TokenKind::DateLiteral);
        assert_eq!(tokens[0].lexeme, "2015");
        assert_eq!(tokens[1].lexeme, "2015-02");
        assert_eq!(tokens[2].lexeme, "2015-02-04");
        assert_eq!(tokens[3].kind, TokenKind::DateTimeLiteral);
        assert_eq!(tokens[3].lexeme, "2015-02-04T14:34:28Z");
        assert_eq!(tokens[4].kind, TokenKind::TimeLiteral);
        assert_eq!(tokens[4].lexeme, "14:34:28");
    }

    #[test]
    fn test_external_constant() {
        let tokens = tokenize("%resource %'my constant'");
        assert_eq!(tokens[0].kind, TokenKind::ExternalConstant);
        assert_eq!(tokens[0].lexeme, "resource");
        assert_eq!(tokens[1].lexeme, "my constant");
    }

    #[test]
    fn test_delimited_identifier() {
        let tokens = tokenize("`div`");
        assert_eq!(tokens[0].kind, TokenKind::DelimitedIdentifier);
        assert_eq!(tokens[0].lexeme, "div");
    }

    #[test]
    fn test_comments() {
        let tokens = tokenize("Patient // comment\n.name /* block */ .given");
        let lexemes: Vec<&str> = tokens
            .iter()
            .filter(|t| t.kind != TokenKind::Eof)
            .map(|t| t.lexeme.as_str())
            .collect();
        assert_eq!(lexemes, vec!["Patient", ".", "name", ".", "given"]);
    }

    #[test]
    fn test_offsets_strictly_increase() {
        let tokens = tokenize("telecom.where(system = 'phone').value");
        let offsets: Vec<usize> = tokens.iter().map(|t| t.location.offset).collect();
        for pair in offsets.windows(2) {
            assert!(pair[0] < pair[1], "offsets not increasing: {offsets:?}");
        }
    }

    #[test]
    fn test_unknown_character() {
        let err = Lexer::tokenize("name # id").unwrap_err();
        assert_eq!(err.kind(), "lexer");
    }
}
