//! Single-pass SQL classifier
//!
//! The scanner walks the text once, left to right. It does not build a syntax
//! tree: it only needs to know where statements start, which family each
//! statement belongs to, and where positional `?` placeholders sit outside of
//! quotes and comments. Placeholders are rewritten to named parameters so the
//! backend receives a canonical, fully named query.
//!
//! All characters the scanner reacts to are ASCII, so it works on bytes and
//! copies untouched ranges of the input verbatim; multi-byte UTF-8 sequences
//! pass through unchanged.

use crate::descriptor::{QueryDescriptor, QueryKind, StatementKind};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Prefix for synthesized parameter names, extended until it is absent from the source
const PARAMETER_PREFIX: &str = "$jp";

/// Parser behaviour switches
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Reject unterminated quotes and block comments instead of consuming to end of input
    pub strict: bool,
}

impl ParseOptions {
    pub fn strict() -> Self {
        Self { strict: true }
    }
}

/// Parse a query text with default (tolerant) options
pub fn parse(sql: &str) -> Result<QueryDescriptor> {
    parse_with(sql, ParseOptions::default())
}

/// Parse a query text
pub fn parse_with(sql: &str, options: ParseOptions) -> Result<QueryDescriptor> {
    Scanner::new(sql, options).run()
}

/// Choose a parameter prefix that does not occur anywhere in `sql`.
///
/// Since the prefix itself is absent, no name built from it can match any
/// substring of the source.
fn parameter_prefix(sql: &str) -> String {
    let mut prefix = PARAMETER_PREFIX.to_string();
    while sql.contains(&prefix) {
        prefix.push('_');
    }
    prefix
}

struct Scanner<'a> {
    sql: &'a str,
    bytes: &'a [u8],
    options: ParseOptions,
    prefix: String,
    /// Rewritten output
    canonical: String,
    /// Start of the input range not yet copied into `canonical`
    copied: usize,
    parameters: Vec<String>,
    statements: Vec<StatementKind>,
    kind: Option<QueryKind>,
}

impl<'a> Scanner<'a> {
    fn new(sql: &'a str, options: ParseOptions) -> Self {
        Self {
            sql,
            bytes: sql.as_bytes(),
            options,
            prefix: parameter_prefix(sql),
            canonical: String::with_capacity(sql.len() + 16),
            copied: 0,
            parameters: Vec::new(),
            statements: Vec::new(),
            kind: None,
        }
    }

    fn run(mut self) -> Result<QueryDescriptor> {
        let mut pos = 0;
        let mut statement_start = true;

        while pos < self.bytes.len() {
            let byte = self.bytes[pos];
            pos = match byte {
                b'\'' | b'"' | b'`' if statement_start => {
                    return Err(self.unexpected_start(pos));
                }
                b'\'' => self.skip_quoted(pos, byte, true)?,
                b'"' | b'`' => self.skip_quoted(pos, byte, false)?,
                b'-' if self.peek(pos + 1) == Some(b'-') => self.skip_line_comment(pos),
                b'/' if self.peek(pos + 1) == Some(b'*') => self.skip_block_comment(pos)?,
                b';' => {
                    statement_start = true;
                    pos + 1
                }
                b'?' if statement_start => return Err(self.unexpected_start(pos)),
                b'?' => {
                    self.placeholder(pos);
                    pos + 1
                }
                _ if byte.is_ascii_whitespace() => pos + 1,
                _ if statement_start => {
                    statement_start = false;
                    self.statement(pos)?
                }
                _ => pos + 1,
            };
        }

        let Some(kind) = self.kind else {
            return Err(Error::grammar(0, "query contains no statements"));
        };

        self.canonical.push_str(&self.sql[self.copied..]);

        Ok(QueryDescriptor::new(
            self.sql.to_string(),
            self.canonical,
            kind,
            self.parameters,
            self.statements,
        ))
    }

    fn peek(&self, pos: usize) -> Option<u8> {
        self.bytes.get(pos).copied()
    }

    /// Classify the statement whose first significant character is at `start`.
    /// Returns the position just past the leading keyword.
    fn statement(&mut self, start: usize) -> Result<usize> {
        let end = self.bytes[start..]
            .iter()
            .position(|b| !(b.is_ascii_alphanumeric() || *b == b'_'))
            .map_or(self.bytes.len(), |len| start + len);

        if end == start {
            return Err(self.unexpected_start(start));
        }

        let word = &self.sql[start..end];
        let statement = StatementKind::from_keyword(word).ok_or_else(|| {
            Error::grammar(start, format!("unrecognized statement keyword '{}'", word))
        })?;

        let kind = statement.query_kind();
        match self.kind {
            None => self.kind = Some(kind),
            Some(established) if established != kind => {
                return Err(Error::grammar(
                    start,
                    format!(
                        "{} statement '{}' cannot be mixed with {} statements",
                        kind, word, established
                    ),
                ));
            }
            Some(_) => {}
        }

        self.statements.push(statement);
        Ok(end)
    }

    /// Replace the `?` at `pos` with a freshly synthesized parameter name
    fn placeholder(&mut self, pos: usize) {
        let name = format!("{}{}", self.prefix, self.parameters.len() + 1);
        self.canonical.push_str(&self.sql[self.copied..pos]);
        self.canonical.push_str(&name);
        self.copied = pos + 1;
        self.parameters.push(name);
    }

    /// Skip a quoted literal or identifier opened at `start`.
    /// Returns the position just past the closing quote.
    fn skip_quoted(&self, start: usize, quote: u8, backslash_escapes: bool) -> Result<usize> {
        let mut pos = start + 1;
        while pos < self.bytes.len() {
            match self.bytes[pos] {
                b'\\' if backslash_escapes => pos += 2,
                b if b == quote => return Ok(pos + 1),
                _ => pos += 1,
            }
        }
        self.unterminated(start, "quoted literal")
    }

    fn skip_line_comment(&self, start: usize) -> usize {
        self.bytes[start..]
            .iter()
            .position(|b| *b == b'\n')
            .map_or(self.bytes.len(), |offset| start + offset + 1)
    }

    /// Skip a block comment opened at `start`, honouring nested `/* */` pairs
    fn skip_block_comment(&self, start: usize) -> Result<usize> {
        let mut depth = 1usize;
        let mut pos = start + 2;
        while pos < self.bytes.len() {
            match (self.bytes[pos], self.peek(pos + 1)) {
                (b'/', Some(b'*')) => {
                    depth += 1;
                    pos += 2;
                }
                (b'*', Some(b'/')) => {
                    depth -= 1;
                    pos += 2;
                    if depth == 0 {
                        return Ok(pos);
                    }
                }
                _ => pos += 1,
            }
        }
        self.unterminated(start, "block comment")
    }

    fn unterminated(&self, start: usize, what: &str) -> Result<usize> {
        if self.options.strict {
            Err(Error::grammar(start, format!("unterminated {}", what)))
        } else {
            tracing::debug!("Unterminated {} at {} runs to end of query", what, start);
            Ok(self.bytes.len())
        }
    }

    fn unexpected_start(&self, pos: usize) -> Error {
        let found = self.sql[pos..].chars().next().unwrap_or(' ');
        Error::grammar(
            pos,
            format!("expected statement keyword, found '{}'", found),
        )
    }
}
