//! Subscription filter expressions over message attributes.
//!
//! Supported forms:
//!
//! ```text
//! attributes.KEY = "value"
//! attributes.KEY != "value"
//! attributes:KEY                     has KEY
//! hasPrefix(attributes.KEY, "pre")
//! NOT expr | -expr | expr AND expr | expr OR expr | ( expr )
//! ```
//!
//! Keys are bare identifiers (`[A-Za-z0-9_][A-Za-z0-9_-]*`) or quoted strings.
//! `AND` binds tighter than `OR`.

use crate::Attributes;
use thiserror::Error;

/// Longest accepted filter, in bytes
pub const MAX_FILTER_LENGTH: usize = 256;

/// Filter parse failure
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid filter at position {position}: {message}")]
pub struct FilterError {
    /// Byte offset of the offending token
    pub position: usize,
    pub message: String,
}

impl FilterError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Parsed filter expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterExpr {
    HasKey(String),
    Equals(String, String),
    NotEquals(String, String),
    HasPrefix(String, String),
    Not(Box<FilterExpr>),
    And(Vec<FilterExpr>),
    Or(Vec<FilterExpr>),
}

impl FilterExpr {
    /// Evaluate against a message's attributes
    pub fn evaluate(&self, attributes: &Attributes) -> bool {
        match self {
            Self::HasKey(key) => attributes.contains_key(key),
            Self::Equals(key, value) => attributes.get(key) == Some(value),
            Self::NotEquals(key, value) => attributes.get(key) != Some(value),
            Self::HasPrefix(key, prefix) => attributes
                .get(key)
                .is_some_and(|value| value.starts_with(prefix.as_str())),
            Self::Not(inner) => !inner.evaluate(attributes),
            Self::And(terms) => terms.iter().all(|term| term.evaluate(attributes)),
            Self::Or(terms) => terms.iter().any(|term| term.evaluate(attributes)),
        }
    }
}

/// A validated filter with its original source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Filter {
    source: String,
    expr: FilterExpr,
}

impl Filter {
    /// Parse a filter expression
    pub fn parse(source: &str) -> Result<Self, FilterError> {
        if source.len() > MAX_FILTER_LENGTH {
            return Err(FilterError::new(
                MAX_FILTER_LENGTH,
                format!("filter exceeds {MAX_FILTER_LENGTH} bytes"),
            ));
        }

        let tokens = tokenize(source)?;
        let mut parser = Parser {
            tokens,
            index: 0,
            end: source.len(),
        };
        let expr = parser.parse_or()?;
        if let Some((token, position)) = parser.peek_with_position() {
            return Err(FilterError::new(
                position,
                format!("unexpected {}", token.describe()),
            ));
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Check whether a message with these attributes passes the filter
    pub fn matches(&self, attributes: &Attributes) -> bool {
        self.expr.evaluate(attributes)
    }

    /// Original filter text
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Parsed expression tree
    pub fn expr(&self) -> &FilterExpr {
        &self.expr
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Ident(String),
    Str(String),
    Dot,
    Colon,
    Comma,
    Eq,
    NotEq,
    Minus,
    LParen,
    RParen,
    And,
    Or,
    Not,
}

impl Token {
    fn describe(&self) -> String {
        match self {
            Self::Ident(name) => format!("identifier '{name}'"),
            Self::Str(value) => format!("string \"{value}\""),
            Self::Dot => "'.'".to_string(),
            Self::Colon => "':'".to_string(),
            Self::Comma => "','".to_string(),
            Self::Eq => "'='".to_string(),
            Self::NotEq => "'!='".to_string(),
            Self::Minus => "'-'".to_string(),
            Self::LParen => "'('".to_string(),
            Self::RParen => "')'".to_string(),
            Self::And => "AND".to_string(),
            Self::Or => "OR".to_string(),
            Self::Not => "NOT".to_string(),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(Token, usize)>, FilterError> {
    let mut tokens = Vec::new();
    let mut chars = source.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '.' | ':' | ',' | '=' | '-' | '(' | ')' => {
                chars.next();
                let token = match c {
                    '.' => Token::Dot,
                    ':' => Token::Colon,
                    ',' => Token::Comma,
                    '=' => Token::Eq,
                    '-' => Token::Minus,
                    '(' => Token::LParen,
                    _ => Token::RParen,
                };
                tokens.push((token, position));
            }
            '!' => {
                chars.next();
                match chars.next() {
                    Some((_, '=')) => tokens.push((Token::NotEq, position)),
                    _ => return Err(FilterError::new(position, "expected '=' after '!'")),
                }
            }
            '"' | '\'' => {
                chars.next();
                let quote = c;
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, c)) = chars.next() {
                    match c {
                        '\\' => match chars.next() {
                            Some((_, escaped)) => value.push(escaped),
                            None => break,
                        },
                        c if c == quote => {
                            closed = true;
                            break;
                        }
                        c => value.push(c),
                    }
                }
                if !closed {
                    return Err(FilterError::new(position, "unterminated string"));
                }
                tokens.push((Token::Str(value), position));
            }
            c if c.is_ascii_alphanumeric() || c == '_' => {
                let mut ident = String::new();
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match ident.as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "NOT" => Token::Not,
                    _ => Token::Ident(ident),
                };
                tokens.push((token, position));
            }
            other => {
                return Err(FilterError::new(
                    position,
                    format!("unexpected character '{other}'"),
                ));
            }
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    index: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|(token, _)| token)
    }

    fn peek_with_position(&self) -> Option<(&Token, usize)> {
        self.tokens
            .get(self.index)
            .map(|(token, position)| (token, *position))
    }

    fn position(&self) -> usize {
        self.tokens
            .get(self.index)
            .map(|(_, position)| *position)
            .unwrap_or(self.end)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|(token, _)| token.clone());
        if token.is_some() {
            self.index += 1;
        }
        token
    }

    fn expect(&mut self, expected: Token) -> Result<(), FilterError> {
        let position = self.position();
        match self.next() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(FilterError::new(
                position,
                format!("expected {}, found {}", expected.describe(), token.describe()),
            )),
            None => Err(FilterError::new(
                position,
                format!("expected {}, found end of filter", expected.describe()),
            )),
        }
    }

    fn parse_or(&mut self) -> Result<FilterExpr, FilterError> {
        let mut terms = vec![self.parse_and()?];
        while self.peek() == Some(&Token::Or) {
            self.next();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<FilterExpr, FilterError> {
        let mut terms = vec![self.parse_unary()?];
        while self.peek() == Some(&Token::And) {
            self.next();
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            FilterExpr::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<FilterExpr, FilterError> {
        match self.peek() {
            Some(Token::Not) | Some(Token::Minus) => {
                self.next();
                Ok(FilterExpr::Not(Box::new(self.parse_unary()?)))
            }
            _ => self.parse_primary(),
        }
    }

    fn parse_primary(&mut self) -> Result<FilterExpr, FilterError> {
        let position = self.position();
        match self.next() {
            Some(Token::LParen) => {
                let expr = self.parse_or()?;
                self.expect(Token::RParen)?;
                Ok(expr)
            }
            Some(Token::Ident(name)) if name == "hasPrefix" => {
                self.expect(Token::LParen)?;
                self.expect(Token::Ident("attributes".to_string()))?;
                self.expect(Token::Dot)?;
                let key = self.parse_key()?;
                self.expect(Token::Comma)?;
                let prefix = self.parse_string()?;
                self.expect(Token::RParen)?;
                Ok(FilterExpr::HasPrefix(key, prefix))
            }
            Some(Token::Ident(name)) if name == "attributes" => self.parse_attribute_predicate(),
            Some(token) => Err(FilterError::new(
                position,
                format!("expected predicate, found {}", token.describe()),
            )),
            None => Err(FilterError::new(position, "unexpected end of filter")),
        }
    }

    fn parse_attribute_predicate(&mut self) -> Result<FilterExpr, FilterError> {
        let position = self.position();
        match self.next() {
            Some(Token::Colon) => Ok(FilterExpr::HasKey(self.parse_key()?)),
            Some(Token::Dot) => {
                let key = self.parse_key()?;
                let position = self.position();
                match self.next() {
                    Some(Token::Eq) => Ok(FilterExpr::Equals(key, self.parse_string()?)),
                    Some(Token::NotEq) => Ok(FilterExpr::NotEquals(key, self.parse_string()?)),
                    Some(token) => Err(FilterError::new(
                        position,
                        format!("expected '=' or '!=', found {}", token.describe()),
                    )),
                    None => Err(FilterError::new(position, "expected '=' or '!='")),
                }
            }
            _ => Err(FilterError::new(
                position,
                "expected '.' or ':' after 'attributes'",
            )),
        }
    }

    fn parse_key(&mut self) -> Result<String, FilterError> {
        let position = self.position();
        match self.next() {
            Some(Token::Ident(key)) | Some(Token::Str(key)) => Ok(key),
            // Keywords are valid attribute names when they follow `attributes.`
            Some(Token::And) => Ok("AND".to_string()),
            Some(Token::Or) => Ok("OR".to_string()),
            Some(Token::Not) => Ok("NOT".to_string()),
            _ => Err(FilterError::new(position, "expected attribute key")),
        }
    }

    fn parse_string(&mut self) -> Result<String, FilterError> {
        let position = self.position();
        match self.next() {
            Some(Token::Str(value)) => Ok(value),
            _ => Err(FilterError::new(position, "expected quoted string")),
        }
    }
}
