//! Conversion settings and parsing of their string forms.

use crate::error::{ConvertError, Result};
use crate::filter::FilterKind;
use proto_codec::Encoding;

/// Everything a conversion needs besides the schema and the streams.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConverterConfig {
    /// Fully qualified (or unique simple) message type name
    pub message_name: String,
    pub input_encoding: Encoding,
    pub output_encoding: Encoding,
    /// Frame delimiter; `None` reads the whole input as one message
    pub delimiter: Option<u8>,
    pub filter: Option<FilterKind>,
}

impl ConverterConfig {
    pub fn new(
        message_name: impl Into<String>,
        input_encoding: Encoding,
        output_encoding: Encoding,
    ) -> Self {
        Self {
            message_name: message_name.into(),
            input_encoding,
            output_encoding,
            delimiter: None,
            filter: None,
        }
    }

    pub fn with_delimiter(mut self, delimiter: Option<u8>) -> Self {
        self.delimiter = delimiter;
        self
    }

    pub fn with_filter(mut self, filter: Option<FilterKind>) -> Self {
        self.filter = filter;
        self
    }
}

pub fn parse_encoding(s: &str) -> Result<Encoding> {
    s.parse()
        .map_err(|_| ConvertError::UnknownEncoding(s.to_string()))
}

/// An empty string means no filter.
pub fn parse_filter(s: &str) -> Result<Option<FilterKind>> {
    if s.is_empty() {
        Ok(None)
    } else {
        s.parse().map(Some)
    }
}

/// Parse a delimiter flag value.
///
/// The empty string means no delimiter. Escapes `\n`, `\r`, `\t`, `\0`,
/// `\\` and `\xHH` name a single byte; anything encoding to more than one
/// byte is rejected.
pub fn parse_delimiter(s: &str) -> Result<Option<u8>> {
    let bytes = s.as_bytes();
    let byte = match bytes {
        [] => return Ok(None),
        [b] => *b,
        [b'\\', b'n'] => b'\n',
        [b'\\', b'r'] => b'\r',
        [b'\\', b't'] => b'\t',
        [b'\\', b'0'] => 0,
        [b'\\', b'\\'] => b'\\',
        [b'\\', b'x' | b'X', hex @ ..] if hex.len() == 2 => {
            let digits = std::str::from_utf8(hex).unwrap_or_default();
            u8::from_str_radix(digits, 16).map_err(|_| {
                ConvertError::InvalidConfig(format!("invalid delimiter escape {s:?}"))
            })?
        }
        _ => {
            return Err(ConvertError::InvalidConfig(
                "delimiter cannot be longer than 1 character".to_string(),
            ))
        }
    };
    Ok(Some(byte))
}
