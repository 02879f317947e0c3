//! Text encoding of scalar values and references.
//!
//! Each [`Value`] encodes to one compact token:
//!
//! | value            | token                         |
//! |------------------|-------------------------------|
//! | undefined        | `undefined`                   |
//! | null, opaque     | `null`                        |
//! | booleans         | `true`, `false`               |
//! | numbers          | `12`, `-0`, `1.5e-7`, `NaN`, `Infinity`, `-Infinity` |
//! | text             | JSON-quoted string            |
//! | dates            | `@` + epoch milliseconds      |
//! | references       | `<` + 24 hex digits + `>`     |
//!
//! Nested objects never appear inline in a token; they are always references.
//! Full nested renderings are produced by [`ObjectWriter`].
//!
//! A token stream is a sequence of tokens separated by commas or whitespace,
//! read in a single pass by [`Scanner`].

mod errors;
mod writer;

use chrono::{DateTime, Utc};

pub use errors::CodecError;
pub use writer::{ObjectWriter, Resolver};

use crate::constants::ID;
use crate::id::{ID_HEX_LEN, ObjectId};
use crate::value::Value;

const KEYWORDS: &[&str] = &[
    "undefined",
    "null",
    "true",
    "false",
    "NaN",
    "Infinity",
    "-Infinity",
];

fn keyword_value(keyword: &str) -> Value {
    match keyword {
        "undefined" => Value::Undefined,
        "true" => Value::Bool(true),
        "false" => Value::Bool(false),
        "NaN" => Value::Number(f64::NAN),
        "Infinity" => Value::Number(f64::INFINITY),
        "-Infinity" => Value::Number(f64::NEG_INFINITY),
        _ => Value::Null,
    }
}

/// Length of a reference token: `<`, the hex digits, `>`.
const REF_TOKEN_LEN: usize = ID_HEX_LEN + 2;

/// Encode one value as a token.
pub fn encode(value: &Value) -> String {
    match value {
        Value::Undefined => "undefined".to_string(),
        Value::Null | Value::Opaque(_) => "null".to_string(),
        Value::Bool(true) => "true".to_string(),
        Value::Bool(false) => "false".to_string(),
        Value::Number(n) => encode_number(*n),
        Value::Text(s) => quote(s),
        Value::Date(d) => format!("@{}", d.timestamp_millis()),
        Value::Ref(id) => encode_reference(id),
    }
}

/// Encode a sequence of values as a comma-separated token stream.
pub fn encode_all<'a, I>(values: I) -> String
where
    I: IntoIterator<Item = &'a Value>,
{
    values.into_iter().map(encode).collect::<Vec<_>>().join(",")
}

/// Reference token for an id.
pub fn encode_reference(id: &ObjectId) -> String {
    format!("<{id}>")
}

/// Decode exactly one token.
pub fn decode(input: &str) -> Result<Value, CodecError> {
    let mut scanner = Scanner::new(input);
    let value = scanner
        .next_value()?
        .ok_or(CodecError::EmptyInput { position: 0 })?;
    scanner.skip_separators();
    if scanner.pos < input.len() {
        return Err(CodecError::TrailingInput {
            position: scanner.pos,
        });
    }
    Ok(value)
}

/// Decode every token of a stream.
pub fn decode_all(input: &str) -> Result<Vec<Value>, CodecError> {
    Scanner::new(input).collect()
}

/// Persisted form of a field value: a token string, or `{"_id": ...}` for a link.
pub fn to_cell(value: &Value) -> serde_json::Value {
    match value {
        Value::Ref(id) => {
            let mut link = serde_json::Map::new();
            link.insert(ID.to_string(), serde_json::Value::String(id.to_hex()));
            serde_json::Value::Object(link)
        }
        other => serde_json::Value::String(encode(other)),
    }
}

/// Read a persisted field value back.
///
/// JSON `null` cells (left behind by positional inserts) read as undefined.
pub fn from_cell(cell: &serde_json::Value) -> Result<Value, CodecError> {
    match cell {
        serde_json::Value::String(token) => decode(token),
        serde_json::Value::Null => Ok(Value::Undefined),
        serde_json::Value::Object(map) if map.len() == 1 => match map.get(ID) {
            Some(serde_json::Value::String(hex)) => Ok(Value::Ref(ObjectId::parse(hex)?)),
            _ => Err(CodecError::InvalidCell {
                cell: cell.to_string(),
            }),
        },
        other => Err(CodecError::InvalidCell {
            cell: other.to_string(),
        }),
    }
}

/// The id a persisted cell links to, if any.
pub fn cell_reference(cell: &serde_json::Value) -> Option<ObjectId> {
    cell.as_object()
        .filter(|map| map.len() == 1)
        .and_then(|map| map.get(ID))
        .and_then(|v| v.as_str())
        .and_then(|hex| ObjectId::parse(hex).ok())
}

fn encode_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        if n.is_sign_negative() { "-0" } else { "0" }.to_string()
    } else if (1e-6..1e21).contains(&n.abs()) {
        format!("{n}")
    } else {
        format!("{n:e}")
    }
}

fn quote(s: &str) -> String {
    // Serializing a str cannot fail
    serde_json::to_string(s).unwrap_or_else(|_| "\"\"".to_string())
}

/// Single-pass reader over a token stream.
#[derive(Debug, Clone)]
pub struct Scanner<'a> {
    input: &'a str,
    pos: usize,
    failed: bool,
}

impl<'a> Scanner<'a> {
    /// Start reading `input` from the beginning.
    pub fn new(input: &'a str) -> Self {
        Self {
            input,
            pos: 0,
            failed: false,
        }
    }

    /// Current byte offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Read the next token, or `None` at end of input.
    pub fn next_value(&mut self) -> Result<Option<Value>, CodecError> {
        self.skip_separators();
        if self.pos >= self.input.len() {
            return Ok(None);
        }

        let start = self.pos;
        let rest = &self.input[start..];
        let (value, consumed) = match rest.as_bytes()[0] {
            b'"' => scan_string(rest, start)?,
            b'<' => scan_reference(rest)?,
            b'@' => scan_date(rest, start)?,
            first => {
                if let Some(keyword) = KEYWORDS
                    .iter()
                    .find(|kw| rest.starts_with(**kw) && at_boundary(rest, kw.len()))
                {
                    (keyword_value(keyword), keyword.len())
                } else if first == b'-' || first.is_ascii_digit() {
                    scan_number(rest, start)?
                } else {
                    return Err(unexpected(rest, start));
                }
            }
        };

        self.pos += consumed;
        if !at_boundary(self.input, self.pos) {
            return Err(unexpected(&self.input[self.pos..], self.pos));
        }
        Ok(Some(value))
    }

    fn skip_separators(&mut self) {
        let bytes = self.input.as_bytes();
        while self.pos < bytes.len()
            && (bytes[self.pos] == b',' || bytes[self.pos].is_ascii_whitespace())
        {
            self.pos += 1;
        }
    }
}

impl Iterator for Scanner<'_> {
    type Item = Result<Value, CodecError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        let item = self.next_value().transpose();
        self.failed = matches!(item, Some(Err(_)));
        item
    }
}

fn at_boundary(s: &str, at: usize) -> bool {
    match s.as_bytes().get(at) {
        None => true,
        Some(b) => *b == b',' || b.is_ascii_whitespace(),
    }
}

fn unexpected(rest: &str, position: usize) -> CodecError {
    CodecError::UnexpectedToken {
        position,
        found: rest.chars().take(16).collect(),
    }
}

fn scan_string(rest: &str, start: usize) -> Result<(Value, usize), CodecError> {
    let bytes = rest.as_bytes();
    let mut i = 1;
    while i < bytes.len() {
        match bytes[i] {
            b'\\' => i += 2,
            b'"' => {
                let text: String = serde_json::from_str(&rest[..=i]).map_err(|e| {
                    CodecError::InvalidEscape {
                        position: start,
                        reason: e.to_string(),
                    }
                })?;
                return Ok((Value::Text(text), i + 1));
            }
            _ => i += 1,
        }
    }
    Err(CodecError::UnterminatedString { position: start })
}

fn scan_reference(rest: &str) -> Result<(Value, usize), CodecError> {
    let invalid = || CodecError::InvalidReference {
        text: rest.chars().take(REF_TOKEN_LEN).collect(),
    };
    if rest.as_bytes().get(REF_TOKEN_LEN - 1) != Some(&b'>') {
        return Err(invalid());
    }
    let hex = rest.get(1..REF_TOKEN_LEN - 1).ok_or_else(invalid)?;
    let id = ObjectId::parse(hex).map_err(|_| invalid())?;
    Ok((Value::Ref(id), REF_TOKEN_LEN))
}

fn scan_date(rest: &str, start: usize) -> Result<(Value, usize), CodecError> {
    let bytes = rest.as_bytes();
    let mut end = 1;
    if bytes.get(end) == Some(&b'-') {
        end += 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end == digits_start {
        return Err(unexpected(rest, start));
    }
    let millis: i64 = rest[1..end]
        .parse()
        .map_err(|_| unexpected(rest, start))?;
    let date = DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or(CodecError::InvalidDate { millis })?;
    Ok((Value::Date(date), end))
}

fn scan_number(rest: &str, start: usize) -> Result<(Value, usize), CodecError> {
    let bytes = rest.as_bytes();
    let digits = |mut i: usize| {
        let from = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        (i, i > from)
    };

    let mut end = usize::from(bytes[0] == b'-');
    let (after_int, has_int) = digits(end);
    if !has_int {
        return Err(unexpected(rest, start));
    }
    end = after_int;

    if bytes.get(end) == Some(&b'.') {
        let (after_frac, has_frac) = digits(end + 1);
        if has_frac {
            end = after_frac;
        }
    }

    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+') | Some(b'-')) {
            exp += 1;
        }
        let (after_exp, has_exp) = digits(exp);
        if has_exp {
            end = after_exp;
        }
    }

    let n: f64 = rest[..end].parse().map_err(|_| unexpected(rest, start))?;
    Ok((Value::Number(n), end))
}
