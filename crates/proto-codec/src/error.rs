use proto_types::ProtoTypesError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Protobuf parse error: {0}")]
    ProtobufParse(String),

    #[error("Protobuf decode error: {0}")]
    ProtobufDecode(String),

    #[error("Protobuf encode error: {0}")]
    ProtobufEncode(String),

    #[error("JSON decode error at {path}: {message}")]
    JsonDecode { path: String, message: String },

    #[error("JSON encode error: {0}")]
    JsonEncode(String),

    #[error("Text decode error at line {line}, column {column}: {message}")]
    TextDecode {
        line: usize,
        column: usize,
        message: String,
    },

    #[error("Unknown encoding: {0}")]
    UnknownEncoding(String),

    #[error(transparent)]
    Types(#[from] ProtoTypesError),
}

pub type Result<T> = std::result::Result<T, Error>;
