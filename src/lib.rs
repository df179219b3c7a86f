//! Proton Library
//!
//! Converts streams of protobuf messages between the binary wire format, the
//! proto3 JSON mapping and the text format, using a `.proto` schema loaded
//! at runtime instead of generated code.
//!
//! # Pipeline
//!
//! ```text
//! input ──FrameReader──▶ frame ──decode──▶ ProtoMessage ──encode──▶ bytes ──filter──▶ output
//! ```
//!
//! Frames are split on an optional one-byte delimiter, converted strictly in
//! order, and the delimiter is written after every output frame. The first
//! malformed frame aborts the whole conversion.
//!
//! # CLI Usage
//!
//! ```bash
//! # Newline-delimited JSON to text
//! proton convert -f schema.proto -m shop.Order -i json -o text -d '\n' < orders.jsonl
//!
//! # One binary message to base64-encoded JSON
//! proton convert -f schema.proto -m shop.Order -i binary -o json --filter base64 < order.bin
//!
//! # List message types
//! proton messages -f schema.proto
//! ```

use clap::Parser;
use std::path::PathBuf;

pub mod config;
pub mod convert;
pub mod error;
pub mod filter;
pub mod frame;

pub use config::{parse_delimiter, parse_encoding, parse_filter, ConverterConfig};
pub use convert::{convert, ConvertStats, Converter};
pub use error::{ConvertError, Result};
pub use filter::FilterKind;
pub use frame::{Frame, FrameReader};
pub use proto_codec::Encoding;

/// Where to load the message schema from.
#[derive(Parser, Clone, Debug)]
pub struct SchemaOpts {
    /// Path to the .proto file defining the messages
    #[arg(short = 'f', long = "proto-file", env = "PROTON_PROTO_FILE")]
    pub proto_file: PathBuf,

    /// Directories to search for imported .proto files
    #[arg(
        short = 'I',
        long = "import-path",
        env = "PROTON_IMPORT_PATHS",
        value_delimiter = ','
    )]
    pub import_paths: Vec<PathBuf>,
}

impl SchemaOpts {
    /// Load and type-check the schema with all its imports.
    pub fn load(&self) -> Result<proto_types::ProtoSchema> {
        proto_codec::load_file(&self.proto_file, &self.import_paths).map_err(ConvertError::Schema)
    }
}
