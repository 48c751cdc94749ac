//! The relaxed JSON of `@Query` strings.
//!
//! Keys may be unquoted, strings may use single quotes, and values may be `?0` or
//! `:#{...}` placeholders, `/regex/` literals or shell constructors like `ObjectId('..')`.

use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use thiserror::Error;
use uuid::Uuid;

use crate::mql::Value;

static QUOTED_PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\?(\d+)$").unwrap());
static SPEL_INDEX: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\[(\d+)\]$").unwrap());
static SPEL_NAME: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^#(\w+)$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq)]
pub(super) enum Placeholder {
    /// `?0`, `'?0'` or `:#{[0]}`
    Index(usize),
    /// `:#{#name}`
    Named(String),
    /// Any other SpEL expression
    Expression(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum JsonValue {
    Document(Vec<(String, JsonValue)>),
    Array(Vec<JsonValue>),
    Literal(Value),
    Placeholder(Placeholder),
}

impl JsonValue {
    /// The value when nothing in it depends on method arguments.
    pub(super) fn to_constant(&self) -> Option<Value> {
        match self {
            JsonValue::Literal(value) => Some(value.clone()),
            JsonValue::Placeholder(_) => None,
            JsonValue::Array(items) => items
                .iter()
                .map(JsonValue::to_constant)
                .collect::<Option<Vec<_>>>()
                .map(Value::Array),
            JsonValue::Document(pairs) => pairs
                .iter()
                .map(|(key, value)| value.to_constant().map(|value| (key.clone(), value)))
                .collect::<Option<Vec<_>>>()
                .map(Value::Document),
        }
    }

    pub(super) fn as_document(&self) -> Option<&[(String, JsonValue)]> {
        match self {
            JsonValue::Document(pairs) => Some(pairs),
            _ => None,
        }
    }

    pub(super) fn as_str(&self) -> Option<&str> {
        match self {
            JsonValue::Literal(Value::String(text)) => Some(text),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum QueryStringError {
    #[error("Unexpected end of query string")]
    UnexpectedEnd,

    #[error("Unexpected '{found}' at offset {offset}")]
    Unexpected { found: char, offset: usize },

    #[error("Unterminated string starting at offset {0}")]
    UnterminatedString(usize),

    #[error("Expected a document, found {0}")]
    NotADocument(String),
}

/// Parses a query string that must hold a single document.
pub(super) fn parse_document(text: &str) -> Result<Vec<(String, JsonValue)>, QueryStringError> {
    let mut parser = Parser::new(text);
    let value = parser.value()?;
    parser.skip_whitespace();
    if let Some(found) = parser.peek() {
        return Err(QueryStringError::Unexpected {
            found,
            offset: parser.position,
        });
    }
    match value {
        JsonValue::Document(pairs) => Ok(pairs),
        other => Err(QueryStringError::NotADocument(format!("{:?}", other))),
    }
}

struct Parser {
    chars: Vec<char>,
    position: usize,
}

impl Parser {
    fn new(text: &str) -> Self {
        Self {
            chars: text.chars().collect(),
            position: 0,
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.position).copied()
    }

    fn next(&mut self) -> Result<char, QueryStringError> {
        let found = self.peek().ok_or(QueryStringError::UnexpectedEnd)?;
        self.position += 1;
        Ok(found)
    }

    fn skip_whitespace(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.position += 1;
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), QueryStringError> {
        self.skip_whitespace();
        let offset = self.position;
        match self.next()? {
            found if found == expected => Ok(()),
            found => Err(QueryStringError::Unexpected { found, offset }),
        }
    }

    fn starts_with(&self, text: &str) -> bool {
        text.chars()
            .enumerate()
            .all(|(index, expected)| self.chars.get(self.position + index) == Some(&expected))
    }

    fn value(&mut self) -> Result<JsonValue, QueryStringError> {
        self.skip_whitespace();
        let offset = self.position;
        match self.peek().ok_or(QueryStringError::UnexpectedEnd)? {
            '{' => self.document(),
            '[' => self.array(),
            '\'' | '"' => {
                let text = self.string()?;
                Ok(match QUOTED_PLACEHOLDER.captures(&text).and_then(|captures| captures[1].parse().ok()) {
                    Some(index) => JsonValue::Placeholder(Placeholder::Index(index)),
                    None => JsonValue::Literal(Value::String(text)),
                })
            }
            '?' => {
                self.position += 1;
                let digits = self.take_while(|c| c.is_ascii_digit());
                digits
                    .parse()
                    .map(|index| JsonValue::Placeholder(Placeholder::Index(index)))
                    .map_err(|_| QueryStringError::Unexpected { found: '?', offset })
            }
            ':' if self.starts_with(":#{") => {
                self.position += 3;
                self.spel()
            }
            '/' => self.regex(),
            found if is_word_char(found) || found == '-' => {
                let word = self.take_while(|c| is_word_char(c) || matches!(c, '-' | '+'));
                self.skip_whitespace();
                if self.peek() == Some('(') {
                    self.constructor(&word)
                } else {
                    Ok(JsonValue::Literal(bare_literal(&word)))
                }
            }
            found => Err(QueryStringError::Unexpected { found, offset }),
        }
    }

    fn document(&mut self) -> Result<JsonValue, QueryStringError> {
        self.expect('{')?;
        let mut pairs = Vec::new();
        loop {
            self.skip_whitespace();
            let offset = self.position;
            let key = match self.peek().ok_or(QueryStringError::UnexpectedEnd)? {
                '}' => {
                    self.position += 1;
                    return Ok(JsonValue::Document(pairs));
                }
                '\'' | '"' => self.string()?,
                found if is_word_char(found) => self.take_while(is_word_char),
                found => return Err(QueryStringError::Unexpected { found, offset }),
            };
            self.expect(':')?;
            let value = self.value()?;
            pairs.push((key, value));

            self.skip_whitespace();
            let offset = self.position;
            match self.next()? {
                ',' => {}
                '}' => return Ok(JsonValue::Document(pairs)),
                found => return Err(QueryStringError::Unexpected { found, offset }),
            }
        }
    }

    fn array(&mut self) -> Result<JsonValue, QueryStringError> {
        self.expect('[')?;
        let mut items = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(']') {
                self.position += 1;
                return Ok(JsonValue::Array(items));
            }
            items.push(self.value()?);

            self.skip_whitespace();
            let offset = self.position;
            match self.next()? {
                ',' => {}
                ']' => return Ok(JsonValue::Array(items)),
                found => return Err(QueryStringError::Unexpected { found, offset }),
            }
        }
    }

    fn string(&mut self) -> Result<String, QueryStringError> {
        let start = self.position;
        let quote = self.next()?;
        let mut text = String::new();
        loop {
            match self.next().map_err(|_| QueryStringError::UnterminatedString(start))? {
                '\\' => {
                    let escaped = self.next().map_err(|_| QueryStringError::UnterminatedString(start))?;
                    text.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                }
                found if found == quote => return Ok(text),
                found => text.push(found),
            }
        }
    }

    /// After `:#{`, up to the matching brace.
    fn spel(&mut self) -> Result<JsonValue, QueryStringError> {
        let mut depth = 1;
        let mut expression = String::new();
        while depth > 0 {
            let found = self.next()?;
            match found {
                '{' => depth += 1,
                '}' => depth -= 1,
                _ => {}
            }
            if depth > 0 {
                expression.push(found);
            }
        }

        let expression = expression.trim();
        let placeholder = if let Some(index) = SPEL_INDEX
            .captures(expression)
            .and_then(|captures| captures[1].parse().ok())
        {
            Placeholder::Index(index)
        } else if let Some(captures) = SPEL_NAME.captures(expression) {
            Placeholder::Named(captures[1].to_string())
        } else {
            Placeholder::Expression(expression.to_string())
        };
        Ok(JsonValue::Placeholder(placeholder))
    }

    fn regex(&mut self) -> Result<JsonValue, QueryStringError> {
        let start = self.position;
        self.position += 1;
        let mut pattern = String::new();
        loop {
            match self.next().map_err(|_| QueryStringError::UnterminatedString(start))? {
                '\\' => {
                    pattern.push('\\');
                    pattern.push(self.next().map_err(|_| QueryStringError::UnterminatedString(start))?);
                }
                '/' => break,
                found => pattern.push(found),
            }
        }
        let flags = self.take_while(|c| c.is_ascii_alphabetic());
        Ok(JsonValue::Literal(Value::AsIs(format!("/{}/{}", pattern, flags))))
    }

    fn constructor(&mut self, name: &str) -> Result<JsonValue, QueryStringError> {
        self.expect('(')?;
        let mut arguments = Vec::new();
        loop {
            self.skip_whitespace();
            if self.peek() == Some(')') {
                self.position += 1;
                break;
            }
            arguments.push(self.value()?);
            self.skip_whitespace();
            let offset = self.position;
            match self.next()? {
                ',' => {}
                ')' => break,
                found => return Err(QueryStringError::Unexpected { found, offset }),
            }
        }

        let literal = match arguments.into_iter().next() {
            Some(placeholder @ JsonValue::Placeholder(_)) => return Ok(placeholder),
            Some(JsonValue::Literal(literal)) => Some(literal),
            _ => None,
        };
        Ok(JsonValue::Literal(constructed_value(name, literal)))
    }

    fn take_while(&mut self, accepts: impl Fn(char) -> bool) -> String {
        let start = self.position;
        while self.peek().is_some_and(&accepts) {
            self.position += 1;
        }
        self.chars[start..self.position].iter().collect()
    }
}

fn is_word_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '$' | '_' | '.')
}

fn bare_literal(word: &str) -> Value {
    match word {
        "true" => Value::Boolean(true),
        "false" => Value::Boolean(false),
        "null" | "undefined" => Value::Null,
        _ => {
            if let Ok(int) = word.parse::<i32>() {
                Value::Int32(int)
            } else if let Ok(long) = word.parse::<i64>() {
                Value::Int64(long)
            } else if let Ok(double) = word.parse::<f64>() {
                Value::Double(double)
            } else {
                Value::AsIs(word.to_string())
            }
        }
    }
}

fn constructed_value(name: &str, argument: Option<Value>) -> Value {
    let text = argument.as_ref().map(ToString::to_string);
    let converted = match (name, &argument) {
        ("ObjectId", Some(Value::String(hex))) => Some(Value::ObjectId(hex.clone())),
        ("ISODate" | "Date", Some(Value::String(date))) => parse_date(date).map(Value::Date),
        ("NumberLong", Some(number)) => number
            .as_i64()
            .or_else(|| number.as_str().and_then(|text| text.parse().ok()))
            .map(Value::Int64),
        ("NumberInt", Some(number)) => number
            .as_i64()
            .or_else(|| number.as_str().and_then(|text| text.parse().ok()))
            .and_then(|value| i32::try_from(value).ok())
            .map(Value::Int32),
        ("NumberDecimal", Some(_)) => text.clone().map(Value::Decimal128),
        ("UUID", Some(Value::String(uuid))) => Uuid::parse_str(uuid).ok().map(Value::Uuid),
        _ => None,
    };
    converted.unwrap_or_else(|| match text {
        Some(text) => Value::AsIs(format!("{}({:?})", name, text)),
        None => Value::AsIs(format!("{}()", name)),
    })
}

fn parse_date(text: &str) -> Option<NaiveDateTime> {
    let trimmed = text.trim_end_matches('Z');
    NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .or_else(|| NaiveDate::parse_from_str(trimmed, "%Y-%m-%d").ok()?.and_hms_opt(0, 0, 0))
}
