//! Protobuf descriptor definitions.
//!
//! These types describe a schema that was resolved at runtime: message types,
//! their fields and the enums they reference. They are produced by the schema
//! provider in `proto-codec` and consumed read-only by every codec.
//!
//! ## Sharing
//!
//! A [`ProtoSchema`] is built once and never mutated afterwards. Message and
//! enum descriptors are handed out as `Arc`s so a single descriptor instance is
//! shared by every [`ProtoMessage`](crate::ProtoMessage) bound to it.
//!
//! ## Type references
//!
//! Fields reference other messages and enums by fully-qualified name (without
//! the leading `.`). Codecs resolve those names through the schema when they
//! need the referenced descriptor, which keeps recursive message types simple.

use crate::error::{ProtoTypesError, Result};
use std::collections::HashMap;
use std::sync::Arc;

/// Protobuf field type enumeration.
///
/// Cardinality (repeated/optional/required) lives on the field descriptor, not
/// on the type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoType {
    Double,
    Float,
    Int32,
    Int64,
    Uint32,
    Uint64,
    Sint32,
    Sint64,
    Fixed32,
    Fixed64,
    Sfixed32,
    Sfixed64,
    Bool,
    String,
    Bytes,
    Message(String),
    Enum(String),
}

impl std::fmt::Display for ProtoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.type_name())
    }
}

impl ProtoType {
    /// Get the human-readable type name.
    pub fn type_name(&self) -> String {
        match self {
            ProtoType::Double => "double".to_string(),
            ProtoType::Float => "float".to_string(),
            ProtoType::Int32 => "int32".to_string(),
            ProtoType::Int64 => "int64".to_string(),
            ProtoType::Uint32 => "uint32".to_string(),
            ProtoType::Uint64 => "uint64".to_string(),
            ProtoType::Sint32 => "sint32".to_string(),
            ProtoType::Sint64 => "sint64".to_string(),
            ProtoType::Fixed32 => "fixed32".to_string(),
            ProtoType::Fixed64 => "fixed64".to_string(),
            ProtoType::Sfixed32 => "sfixed32".to_string(),
            ProtoType::Sfixed64 => "sfixed64".to_string(),
            ProtoType::Bool => "bool".to_string(),
            ProtoType::String => "string".to_string(),
            ProtoType::Bytes => "bytes".to_string(),
            ProtoType::Message(name) => format!("message:{name}"),
            ProtoType::Enum(name) => format!("enum:{name}"),
        }
    }

    /// Whether values of this type may use the packed repeated encoding.
    pub fn is_packable(&self) -> bool {
        !matches!(
            self,
            ProtoType::String | ProtoType::Bytes | ProtoType::Message(_)
        )
    }
}

/// Field cardinality as declared in the schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Label {
    Optional,
    Required,
    Repeated,
}

/// Key and value types of a `map<K, V>` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MapEntryTypes {
    pub key: ProtoType,
    pub value: ProtoType,
}

/// Describes a single field in a protobuf message.
#[derive(Debug, Clone)]
pub struct ProtoFieldDescriptor {
    /// Field name as written in the .proto file
    pub name: String,
    /// lowerCamelCase name used by the JSON mapping
    pub json_name: String,
    /// Field number (tag)
    pub number: u32,
    /// Field type
    pub field_type: ProtoType,
    /// Declared cardinality
    pub label: Label,
    /// Whether "set to the default value" is distinguishable from "unset"
    pub has_presence: bool,
    /// Whether repeated values are written in packed form
    pub is_packed: bool,
    /// Index into the owning message's oneof list
    pub oneof_index: Option<usize>,
    /// Present when the field is a `map<K, V>`
    pub map_entry: Option<MapEntryTypes>,
}

impl ProtoFieldDescriptor {
    pub fn is_repeated(&self) -> bool {
        self.label == Label::Repeated
    }

    pub fn is_required(&self) -> bool {
        self.label == Label::Required
    }

    pub fn is_map(&self) -> bool {
        self.map_entry.is_some()
    }
}

/// Describes a protobuf message type.
#[derive(Debug, Clone)]
pub struct ProtoMessageDescriptor {
    name: String,
    fields: Vec<ProtoFieldDescriptor>,
    oneofs: Vec<String>,
    is_map_entry: bool,
    by_name: HashMap<String, usize>,
    by_json_name: HashMap<String, usize>,
    by_number: HashMap<u32, usize>,
}

impl ProtoMessageDescriptor {
    /// Build a descriptor; `fields` must be in declaration order.
    pub fn new(
        name: impl Into<String>,
        fields: Vec<ProtoFieldDescriptor>,
        oneofs: Vec<String>,
        is_map_entry: bool,
    ) -> Self {
        let mut by_name = HashMap::with_capacity(fields.len());
        let mut by_json_name = HashMap::with_capacity(fields.len());
        let mut by_number = HashMap::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            by_name.insert(field.name.clone(), index);
            by_json_name.insert(field.json_name.clone(), index);
            by_number.insert(field.number, index);
        }

        Self {
            name: name.into(),
            fields,
            oneofs,
            is_map_entry,
            by_name,
            by_json_name,
            by_number,
        }
    }

    /// Fully qualified message name (e.g., "mypackage.MyMessage")
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Message name without its package and parent messages.
    pub fn simple_name(&self) -> &str {
        self.name.rsplit('.').next().unwrap_or(&self.name)
    }

    /// Fields in declaration order.
    pub fn fields(&self) -> &[ProtoFieldDescriptor] {
        &self.fields
    }

    /// Name of the oneof at `index`, as referenced by `ProtoFieldDescriptor::oneof_index`.
    pub fn oneof_name(&self, index: usize) -> Option<&str> {
        self.oneofs.get(index).map(String::as_str)
    }

    /// Whether this is the synthetic entry type of a map field.
    pub fn is_map_entry(&self) -> bool {
        self.is_map_entry
    }

    /// Get a field descriptor by its .proto name.
    pub fn get_field(&self, name: &str) -> Option<&ProtoFieldDescriptor> {
        self.by_name.get(name).map(|&i| &self.fields[i])
    }

    /// Get a field descriptor by number.
    pub fn get_field_by_number(&self, number: u32) -> Option<&ProtoFieldDescriptor> {
        self.by_number.get(&number).map(|&i| &self.fields[i])
    }

    /// Resolve a JSON object key: the JSON name wins, the .proto name is
    /// accepted as well.
    pub fn get_field_by_json_key(&self, key: &str) -> Option<&ProtoFieldDescriptor> {
        self.by_json_name
            .get(key)
            .or_else(|| self.by_name.get(key))
            .map(|&i| &self.fields[i])
    }

    /// List all field names in definition order.
    pub fn list_fields(&self) -> Vec<&str> {
        self.fields.iter().map(|f| f.name.as_str()).collect()
    }
}

/// A single named enum value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtoEnumValue {
    pub name: String,
    pub number: i32,
}

/// Describes a protobuf enum type.
#[derive(Debug, Clone)]
pub struct ProtoEnumDescriptor {
    pub name: String,
    pub values: Vec<ProtoEnumValue>,
}

impl ProtoEnumDescriptor {
    pub fn value_by_name(&self, name: &str) -> Option<&ProtoEnumValue> {
        self.values.iter().find(|v| v.name == name)
    }

    /// First declared value with this number (aliases share numbers).
    pub fn value_by_number(&self, number: i32) -> Option<&ProtoEnumValue> {
        self.values.iter().find(|v| v.number == number)
    }
}

/// Represents a resolved protobuf schema containing message and enum types.
#[derive(Debug, Clone, Default)]
pub struct ProtoSchema {
    messages: HashMap<String, Arc<ProtoMessageDescriptor>>,
    enums: HashMap<String, Arc<ProtoEnumDescriptor>>,
}

impl ProtoSchema {
    /// Assemble a schema from fully resolved descriptors.
    pub fn from_parts(
        messages: impl IntoIterator<Item = ProtoMessageDescriptor>,
        enums: impl IntoIterator<Item = ProtoEnumDescriptor>,
    ) -> Self {
        let messages = messages
            .into_iter()
            .map(|m| (m.name().to_string(), Arc::new(m)))
            .collect();
        let enums = enums
            .into_iter()
            .map(|e| (e.name.clone(), Arc::new(e)))
            .collect();
        Self { messages, enums }
    }

    /// Get a message descriptor by its fully qualified name.
    ///
    /// A leading `.` (as used in descriptor type references) is ignored.
    pub fn get_message(&self, name: &str) -> Option<&Arc<ProtoMessageDescriptor>> {
        self.messages.get(name.strip_prefix('.').unwrap_or(name))
    }

    /// Get an enum descriptor by its fully qualified name.
    pub fn get_enum(&self, name: &str) -> Option<&Arc<ProtoEnumDescriptor>> {
        self.enums.get(name.strip_prefix('.').unwrap_or(name))
    }

    /// Find a message by name for user-facing lookups.
    ///
    /// Fully qualified names match exactly. An unqualified name matches when
    /// exactly one message in the schema has that simple name.
    pub fn find_message(&self, name: &str) -> Result<Arc<ProtoMessageDescriptor>> {
        if let Some(descriptor) = self.get_message(name) {
            return Ok(descriptor.clone());
        }

        if name.contains('.') {
            return Err(ProtoTypesError::MessageNotFound(name.to_string()));
        }

        let mut candidates: Vec<&Arc<ProtoMessageDescriptor>> = self
            .messages
            .values()
            .filter(|m| !m.is_map_entry() && m.simple_name() == name)
            .collect();

        match candidates.len() {
            0 => Err(ProtoTypesError::MessageNotFound(name.to_string())),
            1 => Ok(candidates.remove(0).clone()),
            _ => {
                let mut names: Vec<String> =
                    candidates.iter().map(|m| m.name().to_string()).collect();
                names.sort();
                Err(ProtoTypesError::AmbiguousMessage {
                    name: name.to_string(),
                    candidates: names,
                })
            }
        }
    }

    /// List all user-visible message type names, sorted.
    pub fn list_messages(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .messages
            .values()
            .filter(|m| !m.is_map_entry())
            .map(|m| m.name().to_string())
            .collect();
        names.sort();
        names
    }
}
