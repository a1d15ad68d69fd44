//! # Filter Evaluator
//!
//! A small boolean predicate language over [`Properties`], written in the
//! familiar parenthesised prefix form:
//!
//! ```text
//! (&(name=auth)(!(legacy=true)))
//! (|(path=/api*)(rank>=10))
//! (codec=*)
//! ```
//!
//! Expressions parse into a [`Filter`] AST that is evaluated with
//! [`Filter::matches`]. Evaluation is pure; parsing is the only fallible step.
//!
//! Supported items:
//!
//! - `(key=value)` equality, `(key=*)` presence, `(key=a*b*)` wildcard
//! - `(key~=value)` approximate (case and whitespace insensitive) equality
//! - `(key>=value)` / `(key<=value)` ordering, numeric when both sides are integers
//! - `&`, `|`, `!` composition
//!
//! Backslash escapes `*`, `(`, `)` and `\` inside values. Nesting deeper than
//! [`Filter::MAX_DEPTH`] is rejected.

use crate::{
    error::FilterError,
    properties::{Properties, PropertyValue},
};
use std::{fmt, str::FromStr};

/// A parsed filter expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Filter {
    /// `(key=value)`
    Equal {
        /// Property key.
        key: String,
        /// Expected value.
        value: String,
    },
    /// `(key~=value)`
    Approx {
        /// Property key.
        key: String,
        /// Expected value.
        value: String,
    },
    /// `(key=*)`
    Present(String),
    /// `(key=a*b*c)`; `parts` are the literal pieces between wildcards.
    Substring {
        /// Property key.
        key: String,
        /// Literal segments; the first anchors the start, the last the end.
        parts: Vec<String>,
    },
    /// `(key>=value)`
    GreaterEq {
        /// Property key.
        key: String,
        /// Lower bound.
        value: String,
    },
    /// `(key<=value)`
    LessEq {
        /// Property key.
        key: String,
        /// Upper bound.
        value: String,
    },
    /// `(&...)`
    And(Vec<Filter>),
    /// `(|...)`
    Or(Vec<Filter>),
    /// `(!...)`
    Not(Box<Filter>),
}

impl Filter {
    /// Deepest nesting of `(..)` groups [`parse`](Self::parse) accepts.
    pub const MAX_DEPTH: usize = 64;

    /// Parse a filter expression.
    pub fn parse(expression: &str) -> Result<Self, FilterError> {
        let mut parser = Parser {
            src: expression,
            pos: 0,
            depth: 0,
        };
        parser.skip_ws();
        let filter = parser.filter()?;
        parser.skip_ws();
        if parser.pos != expression.len() {
            return Err(parser.error("trailing characters after filter"));
        }
        Ok(filter)
    }

    /// Shorthand for an equality item.
    pub fn equal(key: impl Into<String>, value: impl Into<String>) -> Self {
        Filter::Equal {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Shorthand for a presence item.
    pub fn present(key: impl Into<String>) -> Self {
        Filter::Present(key.into())
    }

    /// Evaluate the filter against a property map.
    pub fn matches(&self, props: &Properties) -> bool {
        match self {
            Filter::And(items) => items.iter().all(|f| f.matches(props)),
            Filter::Or(items) => items.iter().any(|f| f.matches(props)),
            Filter::Not(inner) => !inner.matches(props),
            Filter::Present(key) => props.contains(key),
            Filter::Equal { key, value } => {
                props.get(key).is_some_and(|v| any_value(v, &|v| equals(v, value)))
            }
            Filter::Approx { key, value } => {
                props.get(key).is_some_and(|v| any_value(v, &|v| approx(v, value)))
            }
            Filter::Substring { key, parts } => props
                .get(key)
                .is_some_and(|v| any_value(v, &|v| v.as_str().is_some_and(|s| glob(parts, s)))),
            Filter::GreaterEq { key, value } => props.get(key).is_some_and(|v| {
                any_value(v, &|v| compare(v, value).is_some_and(|o| o.is_ge()))
            }),
            Filter::LessEq { key, value } => props.get(key).is_some_and(|v| {
                any_value(v, &|v| compare(v, value).is_some_and(|o| o.is_le()))
            }),
        }
    }
}

impl FromStr for Filter {
    type Err = FilterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Filter::parse(s)
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Filter::Equal { key, value } => write!(f, "({key}={})", Escaped(value)),
            Filter::Approx { key, value } => write!(f, "({key}~={})", Escaped(value)),
            Filter::Present(key) => write!(f, "({key}=*)"),
            Filter::Substring { key, parts } => {
                write!(f, "({key}=")?;
                for (i, part) in parts.iter().enumerate() {
                    if i > 0 {
                        f.write_str("*")?;
                    }
                    write!(f, "{}", Escaped(part))?;
                }
                f.write_str(")")
            }
            Filter::GreaterEq { key, value } => write!(f, "({key}>={})", Escaped(value)),
            Filter::LessEq { key, value } => write!(f, "({key}<={})", Escaped(value)),
            Filter::And(items) => write_list(f, '&', items),
            Filter::Or(items) => write_list(f, '|', items),
            Filter::Not(inner) => write!(f, "(!{inner})"),
        }
    }
}

fn write_list(f: &mut fmt::Formatter<'_>, op: char, items: &[Filter]) -> fmt::Result {
    write!(f, "({op}")?;
    for item in items {
        write!(f, "{item}")?;
    }
    f.write_str(")")
}

struct Escaped<'a>(&'a str);

impl fmt::Display for Escaped<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for c in self.0.chars() {
            if matches!(c, '\\' | '*' | '(' | ')') {
                f.write_str("\\")?;
            }
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Evaluation helpers
// ============================================================================

fn any_value(value: &PropertyValue, test: &dyn Fn(&PropertyValue) -> bool) -> bool {
    match value {
        PropertyValue::List(items) => items.iter().any(|item| any_value(item, test)),
        other => test(other),
    }
}

fn equals(value: &PropertyValue, expected: &str) -> bool {
    match value {
        PropertyValue::Str(s) => s == expected,
        PropertyValue::Bool(b) => expected.trim().eq_ignore_ascii_case(if *b { "true" } else { "false" }),
        PropertyValue::Int(i) => expected.trim().parse::<i64>() == Ok(*i),
        PropertyValue::List(_) => false,
    }
}

fn approx(value: &PropertyValue, expected: &str) -> bool {
    let normalize = |s: &str| -> String {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .flat_map(char::to_lowercase)
            .collect()
    };
    match value {
        PropertyValue::Str(s) => normalize(s) == normalize(expected),
        other => equals(other, expected),
    }
}

fn compare(value: &PropertyValue, bound: &str) -> Option<std::cmp::Ordering> {
    match value {
        PropertyValue::Int(i) => bound.trim().parse::<i64>().ok().map(|b| i.cmp(&b)),
        PropertyValue::Str(s) => match (s.trim().parse::<i64>(), bound.trim().parse::<i64>()) {
            (Ok(a), Ok(b)) => Some(a.cmp(&b)),
            _ => Some(s.as_str().cmp(bound)),
        },
        PropertyValue::Bool(_) | PropertyValue::List(_) => None,
    }
}

fn glob(parts: &[String], s: &str) -> bool {
    let Some((first, rest)) = parts.split_first() else {
        return false;
    };
    let Some((last, middle)) = rest.split_last() else {
        return s == first;
    };
    if !s.starts_with(first.as_str()) {
        return false;
    }
    let mut pos = first.len();
    for part in middle {
        match s[pos..].find(part.as_str()) {
            Some(i) => pos += i + part.len(),
            None => return false,
        }
    }
    s[pos..].ends_with(last.as_str())
}

// ============================================================================
// Parser
// ============================================================================

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    depth: usize,
}

impl Parser<'_> {
    fn peek(&self) -> Option<char> {
        self.src[self.pos..].chars().next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.pos += c.len_utf8();
        Some(c)
    }

    fn skip_ws(&mut self) {
        while self.peek().is_some_and(char::is_whitespace) {
            self.bump();
        }
    }

    fn expect(&mut self, expected: char) -> Result<(), FilterError> {
        match self.bump() {
            Some(c) if c == expected => Ok(()),
            _ => Err(self.error(format!("expected `{expected}`"))),
        }
    }

    fn error(&self, message: impl Into<String>) -> FilterError {
        FilterError::new(self.src, self.pos, message)
    }

    fn filter(&mut self) -> Result<Filter, FilterError> {
        if self.depth == Filter::MAX_DEPTH {
            return Err(self.error("filter nested too deeply"));
        }
        self.depth += 1;
        let filter = self.group();
        self.depth -= 1;
        filter
    }

    fn group(&mut self) -> Result<Filter, FilterError> {
        self.expect('(')?;
        self.skip_ws();
        let filter = match self.peek() {
            Some('&') => {
                self.bump();
                Filter::And(self.list()?)
            }
            Some('|') => {
                self.bump();
                Filter::Or(self.list()?)
            }
            Some('!') => {
                self.bump();
                self.skip_ws();
                Filter::Not(Box::new(self.filter()?))
            }
            Some(_) => self.item()?,
            None => return Err(self.error("unexpected end of filter")),
        };
        self.skip_ws();
        self.expect(')')?;
        Ok(filter)
    }

    fn list(&mut self) -> Result<Vec<Filter>, FilterError> {
        let mut items = Vec::new();
        self.skip_ws();
        while self.peek() == Some('(') {
            items.push(self.filter()?);
            self.skip_ws();
        }
        if items.is_empty() {
            return Err(self.error("expected at least one operand"));
        }
        Ok(items)
    }

    fn item(&mut self) -> Result<Filter, FilterError> {
        let start = self.pos;
        while let Some(c) = self.peek() {
            if matches!(c, '=' | '<' | '>' | '~' | '(' | ')') {
                break;
            }
            self.bump();
        }
        let key = self.src[start..self.pos].trim().to_owned();
        if key.is_empty() {
            return Err(self.error("expected attribute name"));
        }

        let op = match self.bump() {
            Some('=') => '=',
            Some(c @ ('<' | '>' | '~')) => {
                self.expect('=')?;
                c
            }
            _ => return Err(self.error("expected comparison operator")),
        };

        let parts = self.value()?;
        match op {
            '=' => Ok(match parts.as_slice() {
                [single] => Filter::Equal {
                    key,
                    value: single.clone(),
                },
                [a, b] if a.is_empty() && b.is_empty() => Filter::Present(key),
                _ => Filter::Substring { key, parts },
            }),
            _ => {
                let [value] = <[String; 1]>::try_from(parts)
                    .map_err(|_| self.error("wildcards are only allowed with `=`"))?;
                Ok(match op {
                    '~' => Filter::Approx { key, value },
                    '>' => Filter::GreaterEq { key, value },
                    _ => Filter::LessEq { key, value },
                })
            }
        }
    }

    /// Reads a value up to the closing paren, splitting on unescaped `*`.
    fn value(&mut self) -> Result<Vec<String>, FilterError> {
        let mut parts = Vec::new();
        let mut current = String::new();
        loop {
            match self.peek() {
                None => return Err(self.error("unterminated value")),
                Some(')') => break,
                Some('(') => return Err(self.error("unescaped `(` in value")),
                Some('\\') => {
                    self.bump();
                    let escaped = self
                        .bump()
                        .ok_or_else(|| self.error("dangling escape"))?;
                    current.push(escaped);
                }
                Some('*') => {
                    self.bump();
                    parts.push(std::mem::take(&mut current));
                }
                Some(c) => {
                    self.bump();
                    current.push(c);
                }
            }
        }
        parts.push(current);
        Ok(parts)
    }
}
