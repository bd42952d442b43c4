//! Record filter language.
//!
//! Additional where clauses from site configurations are parsed into a
//! [`RecordFilter`] once, at load time, and evaluated against [`Record`]s.
//!
//! Grammar (keywords case-insensitive, `AND` binds tighter than `OR`):
//!
//! ```text
//! filter     := clause ("OR" clause)*
//! clause     := condition ("AND" condition)*
//! condition  := field op literal | field ["NOT"] "IN" "(" [literal ("," literal)*] ")"
//! op         := "=" | "!=" | "<>" | "<" | "<=" | ">" | ">="
//! literal    := number | 'quoted text'
//! ```

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::types::{value_to_string, Record};

/// Comparison operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

impl Operator {
    fn symbol(self) -> &'static str {
        match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::Le => "<=",
            Operator::Gt => ">",
            Operator::Ge => ">=",
            Operator::In => "IN",
            Operator::NotIn => "NOT IN",
        }
    }
}

/// A single `field op value(s)` test.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub op: Operator,
    pub values: Vec<String>,
}

impl Condition {
    /// Evaluate against a record. Missing fields compare as empty, or as 0
    /// against numbers.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        let actual = value_to_string(&record.get(&self.field));
        let equal = |expected: &String| compare_values(&actual, expected) == Ordering::Equal;
        let first = self.values.first();
        match self.op {
            Operator::In => self.values.iter().any(equal),
            Operator::NotIn => !self.values.iter().any(equal),
            Operator::Eq => first.is_some_and(equal),
            Operator::NotEq => !first.is_some_and(equal),
            Operator::Lt => first.is_some_and(|v| compare_values(&actual, v) == Ordering::Less),
            Operator::Le => first.is_some_and(|v| compare_values(&actual, v) != Ordering::Greater),
            Operator::Gt => first.is_some_and(|v| compare_values(&actual, v) == Ordering::Greater),
            Operator::Ge => first.is_some_and(|v| compare_values(&actual, v) != Ordering::Less),
        }
    }
}

/// Numeric when the expected value is a number (missing or empty counts as 0),
/// text otherwise.
pub(crate) fn compare_values(actual: &str, expected: &str) -> Ordering {
    if let Ok(expected_number) = expected.parse::<f64>() {
        let actual_number = if actual.trim().is_empty() {
            Some(0.0)
        } else {
            actual.trim().parse::<f64>().ok()
        };
        if let Some(actual_number) = actual_number {
            return actual_number
                .partial_cmp(&expected_number)
                .unwrap_or(Ordering::Equal);
        }
    }
    actual.cmp(expected)
}

/// A filter in disjunctive normal form. No clauses means "match all".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RecordFilter {
    clauses: Vec<Vec<Condition>>,
}

impl RecordFilter {
    /// Filter matching every record.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Single condition filter.
    #[must_use]
    pub fn condition(field: &str, op: Operator, values: Vec<String>) -> Self {
        Self {
            clauses: vec![vec![Condition {
                field: field.to_string(),
                op,
                values,
            }]],
        }
    }

    /// `field = value`
    #[must_use]
    pub fn eq(field: &str, value: impl ToString) -> Self {
        Self::condition(field, Operator::Eq, vec![value.to_string()])
    }

    /// `field <op> value` for a single-valued operator.
    #[must_use]
    pub fn compare(field: &str, op: Operator, value: impl ToString) -> Self {
        Self::condition(field, op, vec![value.to_string()])
    }

    /// `field IN (values)`; an empty list matches nothing.
    #[must_use]
    pub fn in_list<I, V>(field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: ToString,
    {
        Self::condition(
            field,
            Operator::In,
            values.into_iter().map(|v| v.to_string()).collect(),
        )
    }

    /// Whether the filter has no restriction.
    #[must_use]
    pub fn is_all(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Conjunction of two filters.
    #[must_use]
    pub fn and(self, other: RecordFilter) -> Self {
        if self.is_all() {
            return other;
        }
        if other.is_all() {
            return self;
        }
        let mut clauses = Vec::with_capacity(self.clauses.len() * other.clauses.len());
        for left in &self.clauses {
            for right in &other.clauses {
                let mut clause = left.clone();
                clause.extend(right.iter().cloned());
                clauses.push(clause);
            }
        }
        Self { clauses }
    }

    /// Disjunction of two filters.
    #[must_use]
    pub fn or(mut self, other: RecordFilter) -> Self {
        if self.is_all() || other.is_all() {
            return Self::all();
        }
        self.clauses.extend(other.clauses);
        self
    }

    /// Evaluate against a record.
    #[must_use]
    pub fn matches(&self, record: &Record) -> bool {
        self.is_all()
            || self
                .clauses
                .iter()
                .any(|clause| clause.iter().all(|c| c.matches(record)))
    }

    /// Parse a filter expression.
    pub fn parse(input: &str) -> Result<Self> {
        let tokens = tokenize(input).map_err(|reason| invalid(input, &reason))?;
        if tokens.is_empty() {
            return Ok(Self::all());
        }
        Parser { tokens, pos: 0 }
            .filter()
            .map_err(|reason| invalid(input, &reason))
    }
}

fn invalid(input: &str, reason: &str) -> Error {
    Error::InvalidConfiguration(format!("invalid filter '{input}': {reason}"))
}

impl FromStr for RecordFilter {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RecordFilter {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RecordFilter> for String {
    fn from(filter: RecordFilter) -> Self {
        filter.to_string()
    }
}

fn write_literal(f: &mut fmt::Formatter<'_>, value: &str) -> fmt::Result {
    if value.parse::<f64>().is_ok() {
        f.write_str(value)
    } else {
        write!(f, "'{}'", value.replace('\'', "''"))
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ", self.field, self.op.symbol())?;
        match self.op {
            Operator::In | Operator::NotIn => {
                f.write_str("(")?;
                for (i, value) in self.values.iter().enumerate() {
                    if i > 0 {
                        f.write_str(", ")?;
                    }
                    write_literal(f, value)?;
                }
                f.write_str(")")
            }
            _ => write_literal(f, self.values.first().map_or("", String::as_str)),
        }
    }
}

impl fmt::Display for RecordFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" OR ")?;
            }
            for (j, condition) in clause.iter().enumerate() {
                if j > 0 {
                    f.write_str(" AND ")?;
                }
                write!(f, "{condition}")?;
            }
        }
        Ok(())
    }
}

// ============================================================================
// Parsing
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Literal(String),
    Op(Operator),
    LParen,
    RParen,
    Comma,
    And,
    Or,
    In,
    Not,
}

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            c if c.is_whitespace() => i += 1,
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            ',' => {
                tokens.push(Token::Comma);
                i += 1;
            }
            '=' => {
                tokens.push(Token::Op(Operator::Eq));
                i += 1;
            }
            '!' if chars.get(i + 1) == Some(&'=') => {
                tokens.push(Token::Op(Operator::NotEq));
                i += 2;
            }
            '<' | '>' => {
                let next = chars.get(i + 1).copied();
                let (op, width) = match (c, next) {
                    ('<', Some('=')) => (Operator::Le, 2),
                    ('<', Some('>')) => (Operator::NotEq, 2),
                    ('<', _) => (Operator::Lt, 1),
                    ('>', Some('=')) => (Operator::Ge, 2),
                    _ => (Operator::Gt, 1),
                };
                tokens.push(Token::Op(op));
                i += width;
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string".to_string()),
                        Some(&ch) if ch == quote => {
                            if chars.get(i + 1) == Some(&quote) {
                                value.push(quote);
                                i += 2;
                            } else {
                                i += 1;
                                break;
                            }
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                tokens.push(Token::Literal(value));
            }
            c if c.is_ascii_digit() || c == '-' || c == '.' => {
                let start = i;
                i += 1;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let number: String = chars[start..i].iter().collect();
                if number.parse::<f64>().is_err() {
                    return Err(format!("invalid number '{number}'"));
                }
                tokens.push(Token::Literal(number));
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '.')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.to_ascii_uppercase().as_str() {
                    "AND" => Token::And,
                    "OR" => Token::Or,
                    "IN" => Token::In,
                    "NOT" => Token::Not,
                    _ => Token::Ident(word),
                };
                tokens.push(token);
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> std::result::Result<(), String> {
        match self.next() {
            Some(ref token) if token == expected => Ok(()),
            Some(token) => Err(format!("expected {expected:?}, found {token:?}")),
            None => Err(format!("expected {expected:?}, found end of input")),
        }
    }

    fn filter(&mut self) -> std::result::Result<RecordFilter, String> {
        let mut clauses = vec![self.clause()?];
        while self.peek() == Some(&Token::Or) {
            self.pos += 1;
            clauses.push(self.clause()?);
        }
        if let Some(token) = self.peek() {
            return Err(format!("unexpected {token:?}"));
        }
        Ok(RecordFilter { clauses })
    }

    fn clause(&mut self) -> std::result::Result<Vec<Condition>, String> {
        let mut conditions = vec![self.condition()?];
        while self.peek() == Some(&Token::And) {
            self.pos += 1;
            conditions.push(self.condition()?);
        }
        Ok(conditions)
    }

    fn condition(&mut self) -> std::result::Result<Condition, String> {
        let field = match self.next() {
            Some(Token::Ident(field)) => field,
            Some(token) => return Err(format!("expected field name, found {token:?}")),
            None => return Err("expected field name, found end of input".to_string()),
        };

        match self.next() {
            Some(Token::Op(op)) => {
                let value = self.literal()?;
                Ok(Condition {
                    field,
                    op,
                    values: vec![value],
                })
            }
            Some(Token::In) => self.list(field, Operator::In),
            Some(Token::Not) => {
                self.expect(&Token::In)?;
                self.list(field, Operator::NotIn)
            }
            Some(token) => Err(format!("expected operator after '{field}', found {token:?}")),
            None => Err(format!("expected operator after '{field}'")),
        }
    }

    fn list(&mut self, field: String, op: Operator) -> std::result::Result<Condition, String> {
        self.expect(&Token::LParen)?;
        let mut values = Vec::new();
        if self.peek() == Some(&Token::RParen) {
            self.pos += 1;
            return Ok(Condition { field, op, values });
        }
        loop {
            values.push(self.literal()?);
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                _ => return Err(format!("unterminated value list for '{field}'")),
            }
        }
        Ok(Condition { field, op, values })
    }

    fn literal(&mut self) -> std::result::Result<String, String> {
        match self.next() {
            Some(Token::Literal(value)) => Ok(value),
            Some(token) => Err(format!("expected value, found {token:?}")),
            None => Err("expected value, found end of input".to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn page(uid: i64) -> Record {
        Record::new("pages", uid)
    }

    #[test]
    fn test_parse_empty_matches_all() {
        let filter = RecordFilter::parse("   ").unwrap();
        assert!(filter.is_all());
        assert!(filter.matches(&page(1)));
    }

    #[test]
    fn test_and_binds_tighter_than_or() {
        let filter = RecordFilter::parse("doktype = 1 AND hidden = 0 OR uid = 5").unwrap();

        assert!(filter.matches(&page(2).with("doktype", 1).with("hidden", 0)));
        assert!(!filter.matches(&page(2).with("doktype", 1).with("hidden", 1)));
        assert!(filter.matches(&page(5).with("hidden", 1)));
    }

    #[test]
    fn test_in_and_not_in() {
        let filter = RecordFilter::parse("pid in (1, 2, 3) and colPos not in (9)").unwrap();
        assert!(filter.matches(&page(10).with("pid", 2).with("colPos", 0)));
        assert!(!filter.matches(&page(10).with("pid", 4)));
        assert!(!filter.matches(&page(10).with("pid", 1).with("colPos", 9)));
    }

    #[test]
    fn test_empty_list_matches_nothing() {
        let filter = RecordFilter::in_list("pid", Vec::<i64>::new());
        assert!(!filter.matches(&page(1).with("pid", 0)));
        assert_eq!(RecordFilter::parse("pid IN ()").unwrap(), filter);
    }

    #[test]
    fn test_missing_field_compares_as_zero() {
        let filter = RecordFilter::parse("starttime <= 100").unwrap();
        assert!(filter.matches(&page(1)));
        assert!(!filter.matches(&page(1).with("starttime", 200)));
    }

    #[test]
    fn test_text_comparison() {
        let filter = RecordFilter::parse("CType = 'text' OR CType = 'it''s'").unwrap();
        assert!(filter.matches(&Record::new("tt_content", 1).with("CType", "text")));
        assert!(filter.matches(&Record::new("tt_content", 1).with("CType", "it's")));
        assert!(!filter.matches(&Record::new("tt_content", 1).with("CType", "list")));
    }

    #[test]
    fn test_and_distributes_over_or() {
        let site = RecordFilter::parse("pid = 1 OR pid = 2").unwrap();
        let visible = RecordFilter::eq("hidden", 0);
        let combined = site.and(visible);

        assert_eq!(
            combined.to_string(),
            "pid = 1 AND hidden = 0 OR pid = 2 AND hidden = 0"
        );
        assert!(combined.matches(&page(3).with("pid", 2)));
        assert!(!combined.matches(&page(3).with("pid", 2).with("hidden", 1)));
    }

    #[test]
    fn test_display_parses_back() {
        let filter = RecordFilter::parse("title != 'News' AND sorting >= 256").unwrap();
        assert_eq!(RecordFilter::parse(&filter.to_string()).unwrap(), filter);
    }

    #[test]
    fn test_invalid_filters_are_rejected() {
        for input in ["hidden", "hidden = ", "= 1", "pid IN (1, 2", "title = 'open", "a = 1 b = 2"] {
            let err = RecordFilter::parse(input).unwrap_err();
            assert!(
                matches!(err, Error::InvalidConfiguration(_)),
                "accepted '{input}'"
            );
        }
    }

    #[test]
    fn test_deserialize_from_string() {
        let filter: RecordFilter = serde_json::from_str(r#""doktype = 1""#).unwrap();
        assert!(filter.matches(&page(1).with("doktype", 1)));
        assert!(serde_json::from_str::<RecordFilter>(r#""doktype ==""#).is_err());
    }
}
