//! Text form of [`Value`]: compact and pretty serialization plus parsing.
//!
//! The format is JSON-shaped with three differences that matter on the wire:
//! decimals always carry a fractional part, only `\n`, `\t` and `\\` are
//! escaped inside strings, and absent members are dropped instead of written
//! as `null`.

use std::fmt::{self, Write as _};
use std::str::FromStr;

use crate::error::{MAX_DEPTH, ParseError};
use crate::{Map, Value};

const INDENT: &str = "    ";

impl Value {
    /// Compact text form. Absent children and empty-array members are omitted.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        write_compact(self, &mut out);
        out
    }

    /// Indented text form for save files and logs.
    pub fn serialize_pretty(&self) -> String {
        let mut out = String::new();
        write_pretty(self, 0, &mut out);
        out
    }

    /// Parses text produced by [`serialize`](Self::serialize) or
    /// [`serialize_pretty`](Self::serialize_pretty).
    ///
    /// Whitespace outside strings is ignored and a trailing comma before a
    /// closing bracket is tolerated.
    pub fn parse(text: &str) -> Result<Value, ParseError> {
        let mut parser = Parser {
            bytes: text.as_bytes(),
            text,
            pos: 0,
        };
        parser.skip_ws();
        if parser.at_end() {
            return Err(ParseError::UnexpectedEnd);
        }
        let value = parser.value(0)?;
        parser.skip_ws();
        if !parser.at_end() {
            return Err(ParseError::TrailingCharacters(parser.pos));
        }
        Ok(value)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            f.write_str(&self.serialize_pretty())
        } else {
            f.write_str(&self.serialize())
        }
    }
}

impl FromStr for Value {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Value::parse(s)
    }
}

// ---------------------------------------------------------------------------
// Writing
// ---------------------------------------------------------------------------

/// Object members that are written: present, and for arrays holding at least
/// one present item.
fn written_members(map: &Map) -> impl Iterator<Item = (&str, &Value)> {
    map.iter().filter(|(_, v)| match v {
        Value::Array(_) => v.count() != 0,
        other => !other.is_absent(),
    })
}

fn write_leaf(value: &Value, out: &mut String) {
    match value {
        Value::Null | Value::Undefined => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Int(i) => {
            let _ = write!(out, "{i}");
        }
        Value::Decimal(d) => write_decimal(*d, out),
        Value::String(s) => write_string(s, out),
        Value::Array(_) | Value::Object(_) => {}
    }
}

fn write_decimal(d: f64, out: &mut String) {
    if !d.is_finite() {
        out.push_str("null");
        return;
    }
    let start = out.len();
    let _ = write!(out, "{d}");
    if !out[start..].contains('.') {
        out.push_str(".0");
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
}

fn write_compact(value: &Value, out: &mut String) {
    match value {
        Value::Array(items) => {
            out.push('[');
            let mut first = true;
            for item in items.iter().filter(|v| !v.is_absent()) {
                if !first {
                    out.push(',');
                }
                first = false;
                write_compact(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => {
            out.push('{');
            let mut first = true;
            for (key, member) in written_members(map) {
                if !first {
                    out.push(',');
                }
                first = false;
                write_string(key, out);
                out.push(':');
                write_compact(member, out);
            }
            out.push('}');
        }
        leaf => write_leaf(leaf, out),
    }
}

fn newline(depth: usize, out: &mut String) {
    out.push('\n');
    for _ in 0..depth {
        out.push_str(INDENT);
    }
}

fn write_pretty(value: &Value, depth: usize, out: &mut String) {
    match value {
        Value::Array(items) => {
            let mut present = items.iter().filter(|v| !v.is_absent()).peekable();
            if present.peek().is_none() {
                out.push_str("[]");
                return;
            }
            out.push('[');
            let mut first = true;
            for item in present {
                if !first {
                    out.push(',');
                }
                first = false;
                newline(depth + 1, out);
                write_pretty(item, depth + 1, out);
            }
            newline(depth, out);
            out.push(']');
        }
        Value::Object(map) => {
            let mut members = written_members(map).peekable();
            if members.peek().is_none() {
                out.push_str("{}");
                return;
            }
            out.push('{');
            let mut first = true;
            for (key, member) in members {
                if !first {
                    out.push(',');
                }
                first = false;
                newline(depth + 1, out);
                write_string(key, out);
                out.push_str(": ");
                write_pretty(member, depth + 1, out);
            }
            newline(depth, out);
            out.push('}');
        }
        leaf => write_leaf(leaf, out),
    }
}

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

struct Parser<'a> {
    bytes: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl Parser<'_> {
    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b' ' | b'\t' | b'\n' | b'\r') = self.peek() {
            self.pos += 1;
        }
    }

    fn unexpected(&self) -> ParseError {
        match self.text[self.pos..].chars().next() {
            Some(found) => ParseError::UnexpectedChar {
                found,
                offset: self.pos,
            },
            None => ParseError::UnexpectedEnd,
        }
    }

    fn expect(&mut self, byte: u8) -> Result<(), ParseError> {
        self.skip_ws();
        if self.peek() == Some(byte) {
            self.pos += 1;
            Ok(())
        } else {
            Err(self.unexpected())
        }
    }

    fn value(&mut self, depth: usize) -> Result<Value, ParseError> {
        if depth >= MAX_DEPTH {
            return Err(ParseError::TooDeep(MAX_DEPTH));
        }
        self.skip_ws();
        match self.peek() {
            None => Err(ParseError::UnexpectedEnd),
            Some(b'{') => self.object(depth),
            Some(b'[') => self.array(depth),
            Some(b'"') => self.string().map(Value::String),
            Some(_) => self.scalar(),
        }
    }

    fn object(&mut self, depth: usize) -> Result<Value, ParseError> {
        self.pos += 1;
        let mut map = Map::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(ParseError::UnexpectedEnd),
                Some(b'}') => {
                    self.pos += 1;
                    return Ok(Value::Object(map));
                }
                Some(b'"') => {}
                Some(_) => return Err(self.unexpected()),
            }
            let key = self.string()?;
            self.expect(b':')?;
            let member = self.value(depth + 1)?;
            map.insert(key, member);

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b'}') => {}
                None => return Err(ParseError::UnexpectedEnd),
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    fn array(&mut self, depth: usize) -> Result<Value, ParseError> {
        self.pos += 1;
        let mut items = Vec::new();
        loop {
            self.skip_ws();
            match self.peek() {
                None => return Err(ParseError::UnexpectedEnd),
                Some(b']') => {
                    self.pos += 1;
                    return Ok(Value::Array(items));
                }
                Some(_) => {}
            }
            items.push(self.value(depth + 1)?);

            self.skip_ws();
            match self.peek() {
                Some(b',') => self.pos += 1,
                Some(b']') => {}
                None => return Err(ParseError::UnexpectedEnd),
                Some(_) => return Err(self.unexpected()),
            }
        }
    }

    /// Reads a quoted string starting at the opening quote.
    fn string(&mut self) -> Result<String, ParseError> {
        let start = self.pos;
        self.pos += 1;
        let mut out = String::new();
        let mut chars = self.text[self.pos..].char_indices();
        while let Some((offset, c)) = chars.next() {
            match c {
                '"' => {
                    self.pos += offset + 1;
                    return Ok(out);
                }
                '\\' => match chars.next() {
                    Some((_, 'n')) => out.push('\n'),
                    Some((_, 't')) => out.push('\t'),
                    Some((_, '\\')) => out.push('\\'),
                    Some((_, '"')) => out.push('"'),
                    Some((_, other)) => {
                        out.push('\\');
                        out.push(other);
                    }
                    None => break,
                },
                c => out.push(c),
            }
        }
        Err(ParseError::UnterminatedString(start))
    }

    /// Bare token: `null`, `true`, `false` or a number.
    fn scalar(&mut self) -> Result<Value, ParseError> {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if matches!(b, b',' | b']' | b'}' | b':' | b' ' | b'\t' | b'\n' | b'\r') {
                break;
            }
            self.pos += 1;
        }
        let token = &self.text[start..self.pos];
        if token.is_empty() {
            return Err(self.unexpected());
        }
        let invalid = || ParseError::InvalidToken {
            text: token.to_owned(),
            offset: start,
        };
        let numeric = token
            .bytes()
            .all(|b| b.is_ascii_digit() || matches!(b, b'-' | b'+' | b'.' | b'e' | b'E'));
        match token {
            "null" => Ok(Value::Null),
            "true" => Ok(Value::Bool(true)),
            "false" => Ok(Value::Bool(false)),
            _ if !numeric => Err(invalid()),
            t if t.contains('.') => t.parse().map(Value::Decimal).map_err(|_| invalid()),
            t => match t.parse::<i64>() {
                Ok(i) => Ok(Value::Int(i)),
                Err(_) => t.parse().map(Value::Decimal).map_err(|_| invalid()),
            },
        }
    }
}
