use thiserror::Error;

/// Errors that abort a conversion.
///
/// Configuration, schema and message lookup errors are raised before any
/// input is read. The remaining variants carry the zero-based index of the
/// frame being processed when the failure happened.
#[derive(Error, Debug)]
pub enum ConvertError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error("Unknown filter: {0}")]
    UnknownFilter(String),

    #[error("Failed to resolve schema")]
    Schema(#[source] proto_codec::Error),

    #[error("Failed to look up message type")]
    MessageNotFound(#[source] proto_codec::Error),

    #[error("Failed to read frame {frame}")]
    Framing {
        frame: usize,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to decode frame {frame} ({preview})")]
    Decode {
        frame: usize,
        preview: String,
        #[source]
        source: proto_codec::Error,
    },

    #[error("Failed to encode frame {frame}")]
    Encode {
        frame: usize,
        #[source]
        source: proto_codec::Error,
    },

    #[error("Failed to write frame {frame}")]
    Write {
        frame: usize,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, ConvertError>;
