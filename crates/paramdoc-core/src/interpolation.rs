//! Interpolation parsing
//!
//! Parses interpolation expressions like:
//! - `${train.lr}` - absolute reference from the document root
//! - `${.sibling}` - reference relative to the enclosing mapping
//! - `${..lr}` - each extra leading `.` ascends one more level
//! - `${eval:'${..base}*2'}` - resolver call with a quoted argument
//! - `${resolve_default:5e-4,${..lr}}` - nested interpolations as arguments
//! - `\${escaped}` - escaped (literal) interpolation

use std::fmt;

use crate::error::{Error, Result};
use crate::stack::ensure_sufficient_stack;
use crate::value::PathSegment;

/// A parsed interpolation expression
#[derive(Debug, Clone, PartialEq)]
pub enum Interpolation {
    /// A literal string (no interpolation or escaped interpolation)
    Literal(String),
    /// A node reference: ${path.to.value} or ${..value}
    Reference(PathReference),
    /// A resolver call: ${resolver:arg1,arg2}
    Call {
        /// Resolver name (e.g., "eval", "if")
        name: String,
        /// Positional arguments
        args: Vec<Argument>,
    },
    /// A concatenation of multiple parts
    Concat(Vec<Interpolation>),
}

/// Where a reference starts before descending by key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Anchor {
    /// From the document root (no leading `.`)
    Root,
    /// From the referencing node's parent scope, then `ascension` levels up
    Relative { ascension: usize },
}

/// A reference to another node
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathReference {
    pub anchor: Anchor,
    pub segments: Vec<PathSegment>,
}

impl fmt::Display for PathReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Anchor::Relative { ascension } = self.anchor {
            write!(f, "{}", ".".repeat(ascension + 1))?;
        }
        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                PathSegment::Key(key) if i > 0 => write!(f, ".{}", key)?,
                other => write!(f, "{}", other)?,
            }
        }
        Ok(())
    }
}

/// An argument to a resolver call
#[derive(Debug, Clone, PartialEq)]
pub enum Argument {
    /// Bare text, typed like a YAML scalar when resolved
    Literal(String),
    /// A quoted string; always textual, may embed interpolations
    Quoted(Interpolation),
    /// A nested interpolation (or bare text mixed with one)
    Nested(Box<Interpolation>),
}

impl Argument {
    /// Get the literal value if this is a bare literal
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            Argument::Literal(s) => Some(s),
            _ => None,
        }
    }
}

const FRAGMENT_LEN: usize = 24;

/// Parser for interpolation expressions
pub struct InterpolationParser<'a> {
    input: &'a str,
    pos: usize,
}

impl<'a> InterpolationParser<'a> {
    /// Create a new parser for the given input
    pub fn new(input: &'a str) -> Self {
        Self { input, pos: 0 }
    }

    /// Parse the entire input string
    pub fn parse(&mut self) -> Result<Interpolation> {
        let mut parts = Vec::new();

        while !self.is_eof() {
            if self.check_escape() {
                self.advance_n(3);
                parts.push(Interpolation::Literal("${".to_string()));
            } else if self.check_interpolation_start() {
                parts.push(self.parse_interpolation()?);
            } else {
                let literal = self.collect_literal();
                if !literal.is_empty() {
                    parts.push(Interpolation::Literal(literal));
                }
            }
        }

        Ok(simplify(parts))
    }

    fn is_eof(&self) -> bool {
        self.pos >= self.input.len()
    }

    fn current(&self) -> Option<char> {
        self.input[self.pos..].chars().next()
    }

    fn peek_n(&self, n: usize) -> Option<char> {
        self.input[self.pos..].chars().nth(n)
    }

    fn advance(&mut self) {
        if let Some(c) = self.current() {
            self.pos += c.len_utf8();
        }
    }

    fn advance_n(&mut self, n: usize) {
        for _ in 0..n {
            self.advance();
        }
    }

    /// Check if we're at an escape sequence (\${)
    fn check_escape(&self) -> bool {
        self.current() == Some('\\') && self.peek_n(1) == Some('$') && self.peek_n(2) == Some('{')
    }

    /// Check if we're at an interpolation start (${)
    fn check_interpolation_start(&self) -> bool {
        self.current() == Some('$') && self.peek_n(1) == Some('{')
    }

    /// A short excerpt of the input starting at `start`, for error messages
    fn fragment(&self, start: usize) -> String {
        self.input[start..].chars().take(FRAGMENT_LEN).collect()
    }

    fn error(&self, message: impl Into<String>, start: usize) -> Error {
        Error::parse(message, start, self.fragment(start))
    }

    fn collect_literal(&mut self) -> String {
        let mut result = String::new();

        while let Some(c) = self.current() {
            if self.check_escape() || self.check_interpolation_start() {
                break;
            }
            result.push(c);
            self.advance();
        }

        result
    }

    /// Parse an interpolation expression (starting at ${)
    fn parse_interpolation(&mut self) -> Result<Interpolation> {
        let start = self.pos;
        self.advance_n(2);
        self.skip_whitespace();

        match self.current() {
            None => return Err(self.error("Unterminated interpolation", start)),
            Some('}') => return Err(self.error("Empty interpolation expression", start)),
            _ => {}
        }

        let body_start = self.pos;
        let body = self.collect_path_text();
        self.skip_whitespace();

        match self.current() {
            Some(':') => {
                if body.is_empty() || !is_identifier(&body) {
                    return Err(self.error(
                        format!("Resolver name must be a bare identifier, got '{}'", body),
                        body_start,
                    ));
                }
                self.advance();
                self.parse_call(body, start)
            }
            Some('}') => {
                self.advance();
                let reference = parse_reference(&body, body_start, self)?;
                Ok(Interpolation::Reference(reference))
            }
            None => Err(self.error("Unterminated interpolation", start)),
            Some(c) => Err(self.error(
                format!("Unexpected character '{}' in interpolation", c),
                self.pos,
            )),
        }
    }

    /// Parse the argument list of a resolver call, after the colon
    fn parse_call(&mut self, name: String, start: usize) -> Result<Interpolation> {
        let mut args = Vec::new();

        self.skip_whitespace();
        if self.current() == Some('}') {
            self.advance();
            return Ok(Interpolation::Call { name, args });
        }

        loop {
            args.push(ensure_sufficient_stack(|| self.parse_argument())?);
            self.skip_whitespace();

            match self.current() {
                Some(',') => self.advance(),
                Some('}') => {
                    self.advance();
                    break;
                }
                None => return Err(self.error("Unterminated interpolation", start)),
                Some(c) => {
                    return Err(self.error(
                        format!("Unexpected character '{}' after argument", c),
                        self.pos,
                    ))
                }
            }
        }

        Ok(Interpolation::Call { name, args })
    }

    /// Parse a single argument (quoted, nested or bare)
    fn parse_argument(&mut self) -> Result<Argument> {
        self.skip_whitespace();

        match self.current() {
            Some(q @ ('\'' | '"')) => self.parse_quoted(q).map(Argument::Quoted),
            _ => self.parse_bare(),
        }
    }

    /// Parse a quoted argument; the content may embed interpolations
    fn parse_quoted(&mut self, quote: char) -> Result<Interpolation> {
        let start = self.pos;
        self.advance();

        let mut parts = Vec::new();
        let mut literal = String::new();

        loop {
            match self.current() {
                None => return Err(self.error("Unterminated quoted argument", start)),
                Some('\\') if matches!(self.peek_n(1), Some(c) if c == quote || c == '\\') => {
                    self.advance();
                    if let Some(c) = self.current() {
                        literal.push(c);
                    }
                    self.advance();
                }
                Some(_) if self.check_escape() => {
                    self.advance_n(3);
                    literal.push_str("${");
                }
                Some(_) if self.check_interpolation_start() => {
                    if !literal.is_empty() {
                        parts.push(Interpolation::Literal(std::mem::take(&mut literal)));
                    }
                    parts.push(self.parse_interpolation()?);
                }
                Some(c) if c == quote => {
                    self.advance();
                    break;
                }
                Some(c) => {
                    literal.push(c);
                    self.advance();
                }
            }
        }

        if !literal.is_empty() {
            parts.push(Interpolation::Literal(literal));
        }
        Ok(simplify(parts))
    }

    /// Parse bare argument text up to the next top-level ',' or '}'
    fn parse_bare(&mut self) -> Result<Argument> {
        let mut parts = Vec::new();
        let mut literal = String::new();

        while let Some(c) = self.current() {
            if self.check_escape() {
                self.advance_n(3);
                literal.push_str("${");
            } else if self.check_interpolation_start() {
                if !literal.is_empty() {
                    parts.push(Interpolation::Literal(std::mem::take(&mut literal)));
                }
                parts.push(self.parse_interpolation()?);
            } else if c == ',' || c == '}' {
                break;
            } else {
                literal.push(c);
                self.advance();
            }
        }
        if !literal.is_empty() {
            parts.push(Interpolation::Literal(literal));
        }

        trim_edges(&mut parts);
        Ok(match simplify(parts) {
            Interpolation::Literal(s) => Argument::Literal(s),
            other => Argument::Nested(Box::new(other)),
        })
    }

    /// Collect path or identifier text (alphanumeric, _, -, ., [, ])
    fn collect_path_text(&mut self) -> String {
        let mut result = String::new();

        while let Some(c) = self.current() {
            if c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | '[' | ']') {
                result.push(c);
                self.advance();
            } else {
                break;
            }
        }

        result
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.current() {
            if c.is_whitespace() {
                self.advance();
            } else {
                break;
            }
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_alphabetic() || c == '_')
        && chars.all(|c| c.is_alphanumeric() || c == '_')
}

/// Split reference text into an anchor and key segments.
///
/// `offset` is the byte position of `text` in the parser's input.
fn parse_reference(text: &str, offset: usize, parser: &InterpolationParser<'_>) -> Result<PathReference> {
    let dots = text.chars().take_while(|&c| c == '.').count();
    let anchor = if dots == 0 {
        Anchor::Root
    } else {
        Anchor::Relative {
            ascension: dots - 1,
        }
    };

    let mut segments = Vec::new();
    let mut key = String::new();
    let mut chars = text.char_indices().skip(dots).peekable();
    // Set after a '.' separator; another '.' or the end of text is then an error.
    let mut expect_key = false;

    while let Some((i, c)) = chars.next() {
        match c {
            '.' => {
                if expect_key || (key.is_empty() && segments.is_empty()) {
                    return Err(parser.error(
                        "Ascension marker after a key segment",
                        offset + i,
                    ));
                }
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                expect_key = true;
            }
            '[' => {
                if !key.is_empty() {
                    segments.push(PathSegment::Key(std::mem::take(&mut key)));
                }
                let mut index = String::new();
                let mut closed = false;
                for (_, c) in chars.by_ref() {
                    if c == ']' {
                        closed = true;
                        break;
                    }
                    index.push(c);
                }
                let idx = index
                    .parse::<usize>()
                    .ok()
                    .filter(|_| closed)
                    .ok_or_else(|| parser.error("Invalid index in reference", offset + i))?;
                segments.push(PathSegment::Index(idx));
                expect_key = false;
            }
            ']' => return Err(parser.error("Unexpected ']' in reference", offset + i)),
            c => {
                key.push(c);
                expect_key = false;
            }
        }
    }

    if expect_key {
        return Err(parser.error(
            "Ascension marker after a key segment",
            offset + text.len() - 1,
        ));
    }
    if !key.is_empty() {
        segments.push(PathSegment::Key(key));
    }
    if segments.is_empty() && anchor == Anchor::Root {
        return Err(parser.error("Empty interpolation expression", offset));
    }

    Ok(PathReference { anchor, segments })
}

/// Strip leading whitespace from the first literal and trailing from the last
fn trim_edges(parts: &mut Vec<Interpolation>) {
    if let Some(Interpolation::Literal(s)) = parts.first_mut() {
        *s = s.trim_start().to_string();
    }
    if let Some(Interpolation::Literal(s)) = parts.last_mut() {
        *s = s.trim_end().to_string();
    }
    parts.retain(|p| !matches!(p, Interpolation::Literal(s) if s.is_empty()));
}

/// Collapse a list of parts: merge adjacent literals, unwrap single parts
fn simplify(parts: Vec<Interpolation>) -> Interpolation {
    let mut merged = merge_adjacent_literals(parts);
    match merged.len() {
        0 => Interpolation::Literal(String::new()),
        1 => merged.remove(0),
        _ => Interpolation::Concat(merged),
    }
}

/// Merge adjacent literal parts
fn merge_adjacent_literals(parts: Vec<Interpolation>) -> Vec<Interpolation> {
    let mut result = Vec::new();
    let mut current_literal = String::new();

    for part in parts {
        match part {
            Interpolation::Literal(s) => {
                current_literal.push_str(&s);
            }
            other => {
                if !current_literal.is_empty() {
                    result.push(Interpolation::Literal(std::mem::take(&mut current_literal)));
                }
                result.push(other);
            }
        }
    }

    if !current_literal.is_empty() {
        result.push(Interpolation::Literal(current_literal));
    }

    result
}

/// Parse an interpolation string
pub fn parse(input: &str) -> Result<Interpolation> {
    InterpolationParser::new(input).parse()
}

/// Check if a string contains any interpolation expressions (unescaped ${...})
pub fn contains_interpolation(input: &str) -> bool {
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '\\' {
            chars.next();
        } else if c == '$' && chars.peek() == Some(&'{') {
            return true;
        }
    }

    false
}

/// Check if a string needs processing (has interpolations OR escape sequences)
pub fn needs_processing(input: &str) -> bool {
    let mut chars = input.chars().peekable();

    while let Some(c) = chars.next() {
        if (c == '\\' && chars.peek() == Some(&'$')) || (c == '$' && chars.peek() == Some(&'{')) {
            return true;
        }
    }

    false
}
