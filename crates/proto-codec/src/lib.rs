//! Schema-driven protobuf codecs for proton.
//!
//! Features:
//!
//! - Runtime Protobuf Support: Parse `.proto` files at runtime, no code generation
//! - Binary wire format with unknown-field preservation
//! - Proto3 JSON mapping, including the well-known types
//! - Protobuf text format (printer and relaxed parser)
//!
//! ```text
//! .proto ──schema::load_file──▶ ProtoSchema ──▶ ProtoCodec::decode(bytes, Encoding)
//!                                                    │
//!                                               ProtoMessage
//!                                                    │
//!                                   ProtoCodec::encode(message, Encoding) ──▶ bytes
//! ```

pub mod binary;
pub mod codec;
pub mod error;
pub mod json;
pub mod schema;
pub mod text;

// Re-export main types for easy access
pub use binary::BinaryCodec;
pub use codec::{Encoding, ProtoCodec};
pub use error::{Error, Result};
pub use json::JsonCodec;
pub use schema::{build_schema, load_file, parse_str};
pub use text::TextCodec;
