//! Byte transforms applied to encoded output.

use crate::error::ConvertError;
use base64::Engine;
use std::fmt;
use std::str::FromStr;

/// A post-encode output filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterKind {
    /// Standard alphabet, padded base64
    Base64,
}

impl FilterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterKind::Base64 => "base64",
        }
    }

    pub fn apply(&self, bytes: &[u8]) -> Vec<u8> {
        match self {
            FilterKind::Base64 => base64::engine::general_purpose::STANDARD
                .encode(bytes)
                .into_bytes(),
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = ConvertError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "base64" => Ok(FilterKind::Base64),
            other => Err(ConvertError::UnknownFilter(other.to_string())),
        }
    }
}

/// Apply an optional filter; `None` passes bytes through unchanged.
pub fn apply(bytes: Vec<u8>, kind: Option<FilterKind>) -> Vec<u8> {
    match kind {
        Some(kind) => kind.apply(&bytes),
        None => bytes,
    }
}
