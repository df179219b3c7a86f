//! Protobuf text format.
//!
//! The printer writes one `name: value` pair per line with nested messages
//! as indented `name { ... }` blocks. The parser accepts the usual relaxed
//! grammar: `#` comments, optional `,`/`;` separators, `{}` or `<>` around
//! messages, `[a, b]` lists for repeated fields and adjacent string
//! literals that concatenate.

use crate::binary::{default_value, map_entry_parts, MAX_DEPTH};
use crate::error::{Error, Result};
use proto_types::{
    MapKey, ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoMessageDescriptor,
    ProtoSchema, ProtoType,
};
use std::collections::{HashMap, HashSet};
use std::fmt::{self, Write};
use std::sync::Arc;

const INDENT: usize = 2;

/// Text format codec over a resolved schema.
pub struct TextCodec<'a> {
    schema: &'a ProtoSchema,
}

impl<'a> TextCodec<'a> {
    pub fn new(schema: &'a ProtoSchema) -> Self {
        Self { schema }
    }

    /// Parse a text format message. Empty input is an empty message.
    pub fn decode(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        data: &[u8],
    ) -> Result<ProtoMessage> {
        let tokens = Lexer::new(data).tokenize()?;
        let mut parser = Parser {
            schema: self.schema,
            tokens,
            pos: 0,
        };
        parser.parse_message(descriptor, None, 0)
    }

    /// Print a message in text format, one field per line.
    pub fn encode(&self, message: &ProtoMessage) -> Result<Vec<u8>> {
        message.check_initialized()?;
        let mut out = String::new();
        self.write_message(&mut out, message, 0)?;
        Ok(out.into_bytes())
    }

    fn write_message(&self, out: &mut String, message: &ProtoMessage, indent: usize) -> Result<()> {
        for (field, value) in message.fields() {
            match value {
                ProtoFieldValue::Repeated(values) => {
                    for value in values {
                        self.write_field(out, indent, &field.name, &field.field_type, value)?;
                    }
                }
                ProtoFieldValue::Map(entries) => {
                    let (_, key_type, value_type) = map_entry_parts(self.schema, field)?;
                    for (key, value) in entries {
                        let _ = writeln!(out, "{:indent$}{} {{", "", field.name);
                        self.write_field(out, indent + INDENT, "key", key_type, &key.to_value())?;
                        self.write_field(out, indent + INDENT, "value", value_type, value)?;
                        let _ = writeln!(out, "{:indent$}}}", "");
                    }
                }
                value => self.write_field(out, indent, &field.name, &field.field_type, value)?,
            }
        }
        Ok(())
    }

    fn write_field(
        &self,
        out: &mut String,
        indent: usize,
        name: &str,
        field_type: &ProtoType,
        value: &ProtoFieldValue,
    ) -> Result<()> {
        if let ProtoFieldValue::Message(nested) = value {
            let _ = writeln!(out, "{:indent$}{name} {{", "");
            self.write_message(out, nested, indent + INDENT)?;
            let _ = writeln!(out, "{:indent$}}}", "");
            return Ok(());
        }

        let _ = write!(out, "{:indent$}{name}: ", "");
        match value {
            ProtoFieldValue::Double(v) => write_float(out, *v, v),
            ProtoFieldValue::Float(v) => write_float(out, *v as f64, v),
            ProtoFieldValue::Int32(v) => {
                let _ = write!(out, "{v}");
            }
            ProtoFieldValue::Int64(v) => {
                let _ = write!(out, "{v}");
            }
            ProtoFieldValue::Uint32(v) => {
                let _ = write!(out, "{v}");
            }
            ProtoFieldValue::Uint64(v) => {
                let _ = write!(out, "{v}");
            }
            ProtoFieldValue::Bool(v) => {
                let _ = write!(out, "{v}");
            }
            ProtoFieldValue::String(v) => write_quoted(out, v.as_bytes()),
            ProtoFieldValue::Bytes(v) => write_quoted(out, v),
            ProtoFieldValue::Enum(number) => {
                let name = match field_type {
                    ProtoType::Enum(enum_name) => self
                        .schema
                        .get_enum(enum_name)
                        .and_then(|e| e.value_by_number(*number))
                        .map(|v| v.name.clone()),
                    _ => None,
                };
                match name {
                    Some(name) => out.push_str(&name),
                    None => {
                        let _ = write!(out, "{number}");
                    }
                }
            }
            ProtoFieldValue::Message(_)
            | ProtoFieldValue::Repeated(_)
            | ProtoFieldValue::Map(_) => {
                return Err(Error::ProtobufEncode(format!(
                    "Nested {} value for field {name}",
                    value.kind_name()
                )))
            }
        }
        out.push('\n');
        Ok(())
    }
}

/// Shortest round-trip form of `shortest`, switching to `1e+300` style
/// exponents outside `[1e-7, 1e21)`.
fn write_float<T: fmt::Display + fmt::LowerExp>(out: &mut String, v: f64, shortest: &T) {
    if v.is_nan() {
        out.push_str("nan");
    } else if v.is_infinite() {
        out.push_str(if v > 0.0 { "inf" } else { "-inf" });
    } else if v != 0.0 && !(1e-7..1e21).contains(&v.abs()) {
        let formatted = format!("{shortest:e}");
        match formatted.split_once('e') {
            Some((mantissa, exponent)) => {
                let (sign, digits) = match exponent.strip_prefix('-') {
                    Some(digits) => ('-', digits),
                    None => ('+', exponent),
                };
                let _ = write!(out, "{mantissa}e{sign}{digits:0>2}");
            }
            None => out.push_str(&formatted),
        }
    } else {
        let _ = write!(out, "{shortest}");
    }
}

fn write_quoted(out: &mut String, bytes: &[u8]) {
    out.push('"');
    for &b in bytes {
        match b {
            b'\n' => out.push_str("\\n"),
            b'\r' => out.push_str("\\r"),
            b'\t' => out.push_str("\\t"),
            b'"' => out.push_str("\\\""),
            b'\\' => out.push_str("\\\\"),
            0x20..=0x7e => out.push(b as char),
            _ => {
                let _ = write!(out, "\\{b:03o}");
            }
        }
    }
    out.push('"');
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Ident(String),
    Number(String),
    Str(Vec<u8>),
    Symbol(u8),
    Eof,
}

#[derive(Debug, Clone)]
struct Token {
    kind: TokenKind,
    line: usize,
    column: usize,
}

struct Lexer<'a> {
    input: &'a [u8],
    pos: usize,
    line: usize,
    column: usize,
}

impl<'a> Lexer<'a> {
    fn new(input: &'a [u8]) -> Self {
        Self {
            input,
            pos: 0,
            line: 1,
            column: 1,
        }
    }

    fn tokenize(mut self) -> Result<Vec<Token>> {
        let mut tokens = Vec::new();
        loop {
            let token = self.next_token()?;
            let done = token.kind == TokenKind::Eof;
            tokens.push(token);
            if done {
                return Ok(tokens);
            }
        }
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.input.get(self.pos + offset).copied()
    }

    fn bump(&mut self) -> Option<u8> {
        let c = self.peek()?;
        self.pos += 1;
        if c == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn error(&self, message: impl Into<String>) -> Error {
        Error::TextDecode {
            line: self.line,
            column: self.column,
            message: message.into(),
        }
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek() {
            if c.is_ascii_whitespace() {
                self.bump();
            } else if c == b'#' {
                while let Some(c) = self.bump() {
                    if c == b'\n' {
                        break;
                    }
                }
            } else {
                break;
            }
        }
    }

    fn next_token(&mut self) -> Result<Token> {
        self.skip_whitespace_and_comments();
        let (line, column) = (self.line, self.column);

        let kind = match self.peek() {
            None => TokenKind::Eof,
            Some(c) if c.is_ascii_alphabetic() || c == b'_' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_alphanumeric() || c == b'_') {
                    self.bump();
                }
                TokenKind::Ident(String::from_utf8_lossy(&self.input[start..self.pos]).into_owned())
            }
            Some(c)
                if c.is_ascii_digit()
                    || (c == b'.' && matches!(self.peek_at(1), Some(d) if d.is_ascii_digit())) =>
            {
                TokenKind::Number(self.number())
            }
            Some(quote @ (b'"' | b'\'')) => {
                self.bump();
                TokenKind::Str(self.string(quote)?)
            }
            Some(c) if b":{}<>[],;-".contains(&c) => {
                self.bump();
                TokenKind::Symbol(c)
            }
            Some(c) => {
                return Err(self.error(format!("unexpected character {:?}", c as char)));
            }
        };

        Ok(Token { kind, line, column })
    }

    fn number(&mut self) -> String {
        let start = self.pos;
        let hex = self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X'));
        while let Some(c) = self.peek() {
            let exponent_sign = !hex
                && (c == b'+' || c == b'-')
                && matches!(self.input.get(self.pos.wrapping_sub(1)), Some(b'e' | b'E'));
            if c.is_ascii_alphanumeric() || c == b'.' || c == b'_' || exponent_sign {
                self.bump();
            } else {
                break;
            }
        }
        String::from_utf8_lossy(&self.input[start..self.pos]).into_owned()
    }

    fn string(&mut self, quote: u8) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        loop {
            let c = match self.bump() {
                None | Some(b'\n') => return Err(self.error("unterminated string")),
                Some(c) => c,
            };
            if c == quote {
                return Ok(bytes);
            }
            if c != b'\\' {
                bytes.push(c);
                continue;
            }

            let escape = self
                .bump()
                .ok_or_else(|| self.error("unterminated string"))?;
            match escape {
                b'n' => bytes.push(b'\n'),
                b'r' => bytes.push(b'\r'),
                b't' => bytes.push(b'\t'),
                b'a' => bytes.push(0x07),
                b'b' => bytes.push(0x08),
                b'f' => bytes.push(0x0c),
                b'v' => bytes.push(0x0b),
                b'\\' | b'\'' | b'"' | b'?' => bytes.push(escape),
                b'0'..=b'7' => {
                    let mut value = u32::from(escape - b'0');
                    for _ in 0..2 {
                        match self.peek() {
                            Some(d @ b'0'..=b'7') => {
                                self.bump();
                                value = value * 8 + u32::from(d - b'0');
                            }
                            _ => break,
                        }
                    }
                    let byte = u8::try_from(value)
                        .map_err(|_| self.error("octal escape out of range"))?;
                    bytes.push(byte);
                }
                b'x' | b'X' => {
                    let value = self.hex_digits(2, 1)?;
                    bytes.push(value as u8);
                }
                b'u' | b'U' => {
                    let digits = if escape == b'u' { 4 } else { 8 };
                    let value = self.hex_digits(digits, digits)?;
                    let ch = char::from_u32(value)
                        .ok_or_else(|| self.error("invalid unicode escape"))?;
                    let mut buf = [0u8; 4];
                    bytes.extend_from_slice(ch.encode_utf8(&mut buf).as_bytes());
                }
                other => {
                    return Err(self.error(format!("invalid escape \\{}", other as char)));
                }
            }
        }
    }

    fn hex_digits(&mut self, max: usize, min: usize) -> Result<u32> {
        let mut value = 0u32;
        let mut count = 0;
        while count < max {
            match self.peek().and_then(|c| (c as char).to_digit(16)) {
                Some(d) => {
                    self.bump();
                    value = value * 16 + d;
                    count += 1;
                }
                None => break,
            }
        }
        if count < min {
            return Err(self.error("invalid hex escape"));
        }
        Ok(value)
    }
}

struct Parser<'s> {
    schema: &'s ProtoSchema,
    tokens: Vec<Token>,
    pos: usize,
}

impl<'s> Parser<'s> {
    fn peek(&self) -> &Token {
        let last = self.tokens.len().saturating_sub(1);
        &self.tokens[self.pos.min(last)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn peek_symbol(&self, symbol: u8) -> bool {
        self.peek().kind == TokenKind::Symbol(symbol)
    }

    fn consume_symbol(&mut self, symbol: u8) -> bool {
        if self.peek_symbol(symbol) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_symbol(&mut self, symbol: u8) -> Result<()> {
        if self.consume_symbol(symbol) {
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{}'", symbol as char)))
        }
    }

    fn error_at(token: &Token, message: impl Into<String>) -> Error {
        Error::TextDecode {
            line: token.line,
            column: token.column,
            message: message.into(),
        }
    }

    fn unexpected(&self, expected: &str) -> Error {
        let token = self.peek();
        let found = match &token.kind {
            TokenKind::Ident(s) | TokenKind::Number(s) => format!("{s:?}"),
            TokenKind::Str(_) => "string".to_string(),
            TokenKind::Symbol(c) => format!("'{}'", *c as char),
            TokenKind::Eof => "end of input".to_string(),
        };
        Self::error_at(token, format!("expected {expected}, found {found}"))
    }

    fn parse_message(
        &mut self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        end: Option<u8>,
        depth: usize,
    ) -> Result<ProtoMessage> {
        if depth > MAX_DEPTH {
            return Err(Self::error_at(
                self.peek(),
                format!("message nesting exceeds {MAX_DEPTH} levels"),
            ));
        }

        let mut message = ProtoMessage::new(descriptor.clone());
        let mut seen: HashSet<u32> = HashSet::new();
        let mut oneofs_seen: HashMap<usize, String> = HashMap::new();

        loop {
            let token = self.peek().clone();
            match &token.kind {
                TokenKind::Eof if end.is_none() => break,
                TokenKind::Symbol(c) if Some(*c) == end => {
                    self.advance();
                    break;
                }
                TokenKind::Ident(name) => {
                    self.advance();
                    let field = descriptor.get_field(name).ok_or_else(|| {
                        Self::error_at(
                            &token,
                            format!("unknown field {name:?} in message {}", descriptor.name()),
                        )
                    })?;

                    if !field.is_repeated() && !seen.insert(field.number) {
                        return Err(Self::error_at(
                            &token,
                            format!("non-repeated field {name:?} was repeated"),
                        ));
                    }
                    if let Some(oneof) = field.oneof_index {
                        if let Some(previous) = oneofs_seen.insert(oneof, name.clone()) {
                            let oneof_name = descriptor.oneof_name(oneof).unwrap_or_default();
                            return Err(Self::error_at(
                                &token,
                                format!(
                                    "field {name:?} conflicts with {previous:?} in oneof {oneof_name}"
                                ),
                            ));
                        }
                    }

                    self.parse_field(&mut message, field, depth)?;
                    if !self.consume_symbol(b',') {
                        self.consume_symbol(b';');
                    }
                }
                _ => {
                    let expected = match end {
                        Some(c) => format!("field name or '{}'", c as char),
                        None => "field name".to_string(),
                    };
                    return Err(self.unexpected(&expected));
                }
            }
        }

        Ok(message)
    }

    fn parse_field(
        &mut self,
        message: &mut ProtoMessage,
        field: &ProtoFieldDescriptor,
        depth: usize,
    ) -> Result<()> {
        if matches!(field.field_type, ProtoType::Message(_)) {
            self.consume_symbol(b':');
        } else {
            self.expect_symbol(b':')?;
        }

        if field.is_repeated() && self.consume_symbol(b'[') {
            if self.consume_symbol(b']') {
                return Ok(());
            }
            loop {
                self.parse_element(message, field, depth)?;
                if self.consume_symbol(b']') {
                    return Ok(());
                }
                self.expect_symbol(b',')?;
            }
        }

        self.parse_element(message, field, depth)
    }

    fn parse_element(
        &mut self,
        message: &mut ProtoMessage,
        field: &ProtoFieldDescriptor,
        depth: usize,
    ) -> Result<()> {
        let start = self.peek().clone();

        if field.is_map() {
            let (entry_descriptor, key_type, value_type) = map_entry_parts(self.schema, field)?;
            let mut entry = self.parse_nested(&entry_descriptor, depth)?;
            let key = match entry.take(1) {
                Some(key) => key,
                None => default_value(self.schema, key_type)?,
            };
            let value = match entry.take(2) {
                Some(value) => value,
                None => default_value(self.schema, value_type)?,
            };
            let key = MapKey::from_value(key)
                .ok_or_else(|| Self::error_at(&start, "invalid map key"))?;
            message.insert_map_entry(field.number, key, value)?;
            return Ok(());
        }

        let value = match &field.field_type {
            ProtoType::Message(type_name) => {
                let descriptor = self.schema.get_message(type_name).ok_or_else(|| {
                    Self::error_at(&start, format!("message type not found: {type_name}"))
                })?;
                ProtoFieldValue::Message(Box::new(self.parse_nested(descriptor, depth)?))
            }
            scalar => self.parse_scalar(scalar)?,
        };

        if field.is_repeated() {
            message.push(field.number, value)?;
        } else {
            message.set(field.number, value)?;
        }
        Ok(())
    }

    fn parse_nested(
        &mut self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        depth: usize,
    ) -> Result<ProtoMessage> {
        let end = if self.consume_symbol(b'{') {
            b'}'
        } else if self.consume_symbol(b'<') {
            b'>'
        } else {
            return Err(self.unexpected("'{' or '<'"));
        };
        self.parse_message(descriptor, Some(end), depth + 1)
    }

    fn parse_scalar(&mut self, field_type: &ProtoType) -> Result<ProtoFieldValue> {
        let start = self.peek().clone();
        let invalid = |what: &str| Self::error_at(&start, format!("invalid {what} value"));

        let value = match field_type {
            ProtoType::String => {
                let bytes = self.parse_strings()?;
                ProtoFieldValue::String(
                    String::from_utf8(bytes).map_err(|_| invalid("UTF-8 string"))?,
                )
            }
            ProtoType::Bytes => ProtoFieldValue::Bytes(self.parse_strings()?),
            ProtoType::Bool => match self.advance().kind {
                TokenKind::Ident(s) if matches!(s.as_str(), "true" | "True" | "t") => {
                    ProtoFieldValue::Bool(true)
                }
                TokenKind::Ident(s) if matches!(s.as_str(), "false" | "False" | "f") => {
                    ProtoFieldValue::Bool(false)
                }
                TokenKind::Number(s) if s == "1" => ProtoFieldValue::Bool(true),
                TokenKind::Number(s) if s == "0" => ProtoFieldValue::Bool(false),
                _ => return Err(invalid("bool")),
            },
            ProtoType::Double => ProtoFieldValue::Double(self.parse_float().ok_or_else(|| invalid("double"))?),
            ProtoType::Float => {
                let v = self.parse_float().ok_or_else(|| invalid("float"))?;
                if v.is_finite() && v.abs() > f32::MAX as f64 {
                    return Err(invalid("float"));
                }
                ProtoFieldValue::Float(v as f32)
            }
            ProtoType::Int32 | ProtoType::Sint32 | ProtoType::Sfixed32 => {
                ProtoFieldValue::Int32(self.parse_integer().ok_or_else(|| invalid("int32"))?)
            }
            ProtoType::Int64 | ProtoType::Sint64 | ProtoType::Sfixed64 => {
                ProtoFieldValue::Int64(self.parse_integer().ok_or_else(|| invalid("int64"))?)
            }
            ProtoType::Uint32 | ProtoType::Fixed32 => {
                ProtoFieldValue::Uint32(self.parse_integer().ok_or_else(|| invalid("uint32"))?)
            }
            ProtoType::Uint64 | ProtoType::Fixed64 => {
                ProtoFieldValue::Uint64(self.parse_integer().ok_or_else(|| invalid("uint64"))?)
            }
            ProtoType::Enum(enum_name) => {
                if let TokenKind::Ident(name) = &start.kind {
                    self.advance();
                    let number = self
                        .schema
                        .get_enum(enum_name)
                        .and_then(|e| e.value_by_name(name))
                        .map(|v| v.number)
                        .ok_or_else(|| {
                            Self::error_at(
                                &start,
                                format!("unknown value {name:?} for enum {enum_name}"),
                            )
                        })?;
                    ProtoFieldValue::Enum(number)
                } else {
                    ProtoFieldValue::Enum(self.parse_integer().ok_or_else(|| invalid("enum"))?)
                }
            }
            ProtoType::Message(_) => return Err(invalid("message")),
        };
        Ok(value)
    }

    fn parse_strings(&mut self) -> Result<Vec<u8>> {
        let TokenKind::Str(first) = &self.peek().kind else {
            return Err(self.unexpected("string"));
        };
        let mut bytes = first.clone();
        self.advance();
        while let TokenKind::Str(more) = &self.peek().kind {
            bytes.extend_from_slice(more);
            self.advance();
        }
        Ok(bytes)
    }

    fn parse_integer<T: TryFrom<i128>>(&mut self) -> Option<T> {
        let negative = self.consume_symbol(b'-');
        let TokenKind::Number(text) = self.advance().kind else {
            return None;
        };
        let magnitude = i128::from(parse_unsigned(&text)?);
        T::try_from(if negative { -magnitude } else { magnitude }).ok()
    }

    fn parse_float(&mut self) -> Option<f64> {
        let negative = self.consume_symbol(b'-');
        let value = match self.advance().kind {
            TokenKind::Number(text) => parse_float_literal(&text)?,
            TokenKind::Ident(text) => match text.to_ascii_lowercase().as_str() {
                "inf" | "infinity" => f64::INFINITY,
                "nan" => f64::NAN,
                _ => return None,
            },
            _ => return None,
        };
        Some(if negative { -value } else { value })
    }
}

/// Decimal, `0x` hex or leading-zero octal.
fn parse_unsigned(text: &str) -> Option<u64> {
    if let Some(hex) = text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16).ok()
    } else if text.len() > 1 && text.starts_with('0') {
        u64::from_str_radix(&text[1..], 8).ok()
    } else {
        text.parse().ok()
    }
}

fn parse_float_literal(text: &str) -> Option<f64> {
    if text.starts_with("0x") || text.starts_with("0X") {
        return parse_unsigned(text).map(|v| v as f64);
    }
    let trimmed = text
        .strip_suffix('f')
        .or_else(|| text.strip_suffix('F'))
        .unwrap_or(text);
    trimmed.parse::<f64>().ok()
}
