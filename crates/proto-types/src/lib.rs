//! Runtime protobuf type model for proton.
//!
//! This crate provides the schema-bound, reflection-style data model that the
//! codecs in `proto-codec` read and write. Nothing here knows about wire
//! formats.
//!
//! # Architecture
//!
//! ```text
//! ProtoSchema ──find_message──▶ Arc<ProtoMessageDescriptor>
//!                                      │
//!                          ProtoMessage::new(descriptor)
//!                                      │
//!                 field number ──▶ ProtoFieldValue (scalar | enum | message | repeated | map)
//! ```
//!
//! # Modules
//!
//! - [`proto`] - Descriptors: schema, messages, fields, enums
//! - [`message`] - Dynamic message and tagged field values
//! - [`error`] - Error types for lookups and value validation

pub mod error;
pub mod message;
pub mod proto;

// Re-export main types for convenient access
pub use error::{ProtoTypesError, Result};
pub use message::{MapKey, ProtoFieldValue, ProtoMessage, UnknownField, UnknownValue};
pub use proto::{
    Label, MapEntryTypes, ProtoEnumDescriptor, ProtoEnumValue, ProtoFieldDescriptor,
    ProtoMessageDescriptor, ProtoSchema, ProtoType,
};
