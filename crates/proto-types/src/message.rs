//! Dynamic message values.
//!
//! A [`ProtoMessage`] is the runtime representation of one protobuf message
//! whose layout is only known through its [`ProtoMessageDescriptor`]. Values
//! are stored as tagged [`ProtoFieldValue`]s keyed by field number.
//!
//! Setting a value goes through [`ProtoMessage::set`], which enforces the
//! descriptor: the value must fit the field type and cardinality, a oneof
//! member evicts its siblings, and an implicit-presence field set to its
//! default value is cleared. The last rule keeps messages produced by
//! different decoders structurally comparable.

use crate::error::{ProtoTypesError, Result};
use crate::proto::{ProtoFieldDescriptor, ProtoMessageDescriptor, ProtoType};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Represents a field value in a dynamic protobuf message.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtoFieldValue {
    Double(f64),
    Float(f32),
    /// int32, sint32 and sfixed32
    Int32(i32),
    /// int64, sint64 and sfixed64
    Int64(i64),
    /// uint32 and fixed32
    Uint32(u32),
    /// uint64 and fixed64
    Uint64(u64),
    Bool(bool),
    String(String),
    Bytes(Vec<u8>),
    /// Enum value number; numbers unknown to the enum are kept as-is
    Enum(i32),
    Message(Box<ProtoMessage>),
    Repeated(Vec<ProtoFieldValue>),
    Map(BTreeMap<MapKey, ProtoFieldValue>),
}

impl ProtoFieldValue {
    /// Short name of the value variant, for error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            ProtoFieldValue::Double(_) => "double",
            ProtoFieldValue::Float(_) => "float",
            ProtoFieldValue::Int32(_) => "int32",
            ProtoFieldValue::Int64(_) => "int64",
            ProtoFieldValue::Uint32(_) => "uint32",
            ProtoFieldValue::Uint64(_) => "uint64",
            ProtoFieldValue::Bool(_) => "bool",
            ProtoFieldValue::String(_) => "string",
            ProtoFieldValue::Bytes(_) => "bytes",
            ProtoFieldValue::Enum(_) => "enum",
            ProtoFieldValue::Message(_) => "message",
            ProtoFieldValue::Repeated(_) => "repeated",
            ProtoFieldValue::Map(_) => "map",
        }
    }

    /// The zero value of a scalar or enum type. Messages have none.
    pub fn default_for(field_type: &ProtoType) -> Option<ProtoFieldValue> {
        Some(match field_type {
            ProtoType::Double => ProtoFieldValue::Double(0.0),
            ProtoType::Float => ProtoFieldValue::Float(0.0),
            ProtoType::Int32 | ProtoType::Sint32 | ProtoType::Sfixed32 => {
                ProtoFieldValue::Int32(0)
            }
            ProtoType::Int64 | ProtoType::Sint64 | ProtoType::Sfixed64 => {
                ProtoFieldValue::Int64(0)
            }
            ProtoType::Uint32 | ProtoType::Fixed32 => ProtoFieldValue::Uint32(0),
            ProtoType::Uint64 | ProtoType::Fixed64 => ProtoFieldValue::Uint64(0),
            ProtoType::Bool => ProtoFieldValue::Bool(false),
            ProtoType::String => ProtoFieldValue::String(String::new()),
            ProtoType::Bytes => ProtoFieldValue::Bytes(Vec::new()),
            ProtoType::Enum(_) => ProtoFieldValue::Enum(0),
            ProtoType::Message(_) => return None,
        })
    }

    /// Whether a single (non-repeated) value has the shape required by `field_type`.
    pub fn fits(&self, field_type: &ProtoType) -> bool {
        match (field_type, self) {
            (ProtoType::Double, ProtoFieldValue::Double(_))
            | (ProtoType::Float, ProtoFieldValue::Float(_))
            | (
                ProtoType::Int32 | ProtoType::Sint32 | ProtoType::Sfixed32,
                ProtoFieldValue::Int32(_),
            )
            | (
                ProtoType::Int64 | ProtoType::Sint64 | ProtoType::Sfixed64,
                ProtoFieldValue::Int64(_),
            )
            | (ProtoType::Uint32 | ProtoType::Fixed32, ProtoFieldValue::Uint32(_))
            | (ProtoType::Uint64 | ProtoType::Fixed64, ProtoFieldValue::Uint64(_))
            | (ProtoType::Bool, ProtoFieldValue::Bool(_))
            | (ProtoType::String, ProtoFieldValue::String(_))
            | (ProtoType::Bytes, ProtoFieldValue::Bytes(_))
            | (ProtoType::Enum(_), ProtoFieldValue::Enum(_)) => true,
            (ProtoType::Message(type_name), ProtoFieldValue::Message(message)) => {
                type_name.strip_prefix('.').unwrap_or(type_name) == message.message_type()
            }
            _ => false,
        }
    }

    /// Whether this is the zero value of its scalar type.
    pub fn is_default(&self) -> bool {
        match self {
            // -0.0 is distinguishable on the wire, so only +0.0 counts.
            ProtoFieldValue::Double(v) => v.to_bits() == 0,
            ProtoFieldValue::Float(v) => v.to_bits() == 0,
            ProtoFieldValue::Int32(v) => *v == 0,
            ProtoFieldValue::Int64(v) => *v == 0,
            ProtoFieldValue::Uint32(v) => *v == 0,
            ProtoFieldValue::Uint64(v) => *v == 0,
            ProtoFieldValue::Bool(v) => !*v,
            ProtoFieldValue::String(v) => v.is_empty(),
            ProtoFieldValue::Bytes(v) => v.is_empty(),
            ProtoFieldValue::Enum(v) => *v == 0,
            ProtoFieldValue::Message(_) => false,
            ProtoFieldValue::Repeated(v) => v.is_empty(),
            ProtoFieldValue::Map(v) => v.is_empty(),
        }
    }
}

/// A map key. Protobuf restricts map keys to integral, bool and string types.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum MapKey {
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Uint32(u32),
    Uint64(u64),
    String(String),
}

impl MapKey {
    /// Convert a decoded key value into a map key.
    pub fn from_value(value: ProtoFieldValue) -> Option<MapKey> {
        match value {
            ProtoFieldValue::Bool(v) => Some(MapKey::Bool(v)),
            ProtoFieldValue::Int32(v) => Some(MapKey::Int32(v)),
            ProtoFieldValue::Int64(v) => Some(MapKey::Int64(v)),
            ProtoFieldValue::Uint32(v) => Some(MapKey::Uint32(v)),
            ProtoFieldValue::Uint64(v) => Some(MapKey::Uint64(v)),
            ProtoFieldValue::String(v) => Some(MapKey::String(v)),
            _ => None,
        }
    }

    pub fn to_value(&self) -> ProtoFieldValue {
        match self {
            MapKey::Bool(v) => ProtoFieldValue::Bool(*v),
            MapKey::Int32(v) => ProtoFieldValue::Int32(*v),
            MapKey::Int64(v) => ProtoFieldValue::Int64(*v),
            MapKey::Uint32(v) => ProtoFieldValue::Uint32(*v),
            MapKey::Uint64(v) => ProtoFieldValue::Uint64(*v),
            MapKey::String(v) => ProtoFieldValue::String(v.clone()),
        }
    }
}

impl std::fmt::Display for MapKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MapKey::Bool(v) => write!(f, "{v}"),
            MapKey::Int32(v) => write!(f, "{v}"),
            MapKey::Int64(v) => write!(f, "{v}"),
            MapKey::Uint32(v) => write!(f, "{v}"),
            MapKey::Uint64(v) => write!(f, "{v}"),
            MapKey::String(v) => write!(f, "{v}"),
        }
    }
}

/// A field whose number is not in the descriptor, kept verbatim from the
/// binary input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownField {
    pub number: u32,
    pub value: UnknownValue,
}

/// Raw payload of an unknown field, by wire type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnknownValue {
    Varint(u64),
    Fixed64(u64),
    LengthDelimited(Vec<u8>),
    /// A proto2 group: the fields between its start and end tags.
    Group(Vec<UnknownField>),
    Fixed32(u32),
}

/// A dynamic protobuf message bound to one descriptor.
#[derive(Debug, Clone)]
pub struct ProtoMessage {
    descriptor: Arc<ProtoMessageDescriptor>,
    fields: BTreeMap<u32, ProtoFieldValue>,
    unknown_fields: Vec<UnknownField>,
}

impl PartialEq for ProtoMessage {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor.name() == other.descriptor.name()
            && self.fields == other.fields
            && self.unknown_fields == other.unknown_fields
    }
}

impl ProtoMessage {
    /// Create an empty message of the given type.
    pub fn new(descriptor: Arc<ProtoMessageDescriptor>) -> Self {
        Self {
            descriptor,
            fields: BTreeMap::new(),
            unknown_fields: Vec::new(),
        }
    }

    pub fn descriptor(&self) -> &Arc<ProtoMessageDescriptor> {
        &self.descriptor
    }

    /// Fully qualified message type name.
    pub fn message_type(&self) -> &str {
        self.descriptor.name()
    }

    /// Whether no field (known or unknown) is set.
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty() && self.unknown_fields.is_empty()
    }

    pub fn get(&self, number: u32) -> Option<&ProtoFieldValue> {
        self.fields.get(&number)
    }

    pub fn get_by_name(&self, name: &str) -> Option<&ProtoFieldValue> {
        let field = self.descriptor.get_field(name)?;
        self.fields.get(&field.number)
    }

    pub fn has_field(&self, number: u32) -> bool {
        self.fields.contains_key(&number)
    }

    /// Set fields in field-number order, paired with their descriptors.
    pub fn fields(
        &self,
    ) -> impl Iterator<Item = (&ProtoFieldDescriptor, &ProtoFieldValue)> + '_ {
        self.fields.iter().filter_map(|(number, value)| {
            self.descriptor
                .get_field_by_number(*number)
                .map(|field| (field, value))
        })
    }

    pub fn unknown_fields(&self) -> &[UnknownField] {
        &self.unknown_fields
    }

    pub fn push_unknown(&mut self, field: UnknownField) {
        self.unknown_fields.push(field);
    }

    /// Remove and return a field value.
    pub fn take(&mut self, number: u32) -> Option<ProtoFieldValue> {
        self.fields.remove(&number)
    }

    /// Set a field, validating the value against the descriptor.
    pub fn set(&mut self, number: u32, value: ProtoFieldValue) -> Result<()> {
        let field = self.field(number)?.clone();
        check_shape(&field, &value)?;

        if let Some(oneof) = field.oneof_index {
            let siblings: Vec<u32> = self
                .descriptor
                .fields()
                .iter()
                .filter(|f| f.oneof_index == Some(oneof) && f.number != number)
                .map(|f| f.number)
                .collect();
            for sibling in siblings {
                self.fields.remove(&sibling);
            }
        }

        let collection = field.is_repeated();
        if (collection || !field.has_presence) && value.is_default() {
            self.fields.remove(&number);
        } else {
            self.fields.insert(number, value);
        }
        Ok(())
    }

    /// Append one element to a repeated (non-map) field.
    pub fn push(&mut self, number: u32, value: ProtoFieldValue) -> Result<()> {
        let field = self.field(number)?;
        if !field.is_repeated() || field.is_map() || !value.fits(&field.field_type) {
            return Err(mismatch(field, &value));
        }

        match self
            .fields
            .entry(number)
            .or_insert_with(|| ProtoFieldValue::Repeated(Vec::new()))
        {
            ProtoFieldValue::Repeated(values) => values.push(value),
            other => *other = ProtoFieldValue::Repeated(vec![value]),
        }
        Ok(())
    }

    /// Insert one entry into a map field; later keys overwrite earlier ones.
    pub fn insert_map_entry(
        &mut self,
        number: u32,
        key: MapKey,
        value: ProtoFieldValue,
    ) -> Result<()> {
        let field = self.field(number)?;
        let Some(entry) = &field.map_entry else {
            return Err(mismatch(field, &value));
        };
        if !key.to_value().fits(&entry.key) {
            return Err(mismatch(field, &key.to_value()));
        }
        if !value.fits(&entry.value) {
            return Err(mismatch(field, &value));
        }

        match self
            .fields
            .entry(number)
            .or_insert_with(|| ProtoFieldValue::Map(BTreeMap::new()))
        {
            ProtoFieldValue::Map(entries) => {
                entries.insert(key, value);
            }
            other => *other = ProtoFieldValue::Map(BTreeMap::from([(key, value)])),
        }
        Ok(())
    }

    /// Verify that every required field is set, recursively.
    ///
    /// The error names the dotted path of the first missing field.
    pub fn check_initialized(&self) -> Result<()> {
        for field in self.descriptor.fields() {
            match self.fields.get(&field.number) {
                None if field.is_required() => {
                    return Err(ProtoTypesError::MissingRequiredField(format!(
                        "{}.{}",
                        self.message_type(),
                        field.name
                    )));
                }
                Some(value) => check_value_initialized(value)?,
                None => {}
            }
        }
        Ok(())
    }

    fn field(&self, number: u32) -> Result<&ProtoFieldDescriptor> {
        self.descriptor
            .get_field_by_number(number)
            .ok_or_else(|| ProtoTypesError::UnknownField {
                message: self.message_type().to_string(),
                number,
            })
    }
}

fn check_value_initialized(value: &ProtoFieldValue) -> Result<()> {
    match value {
        ProtoFieldValue::Message(message) => message.check_initialized(),
        ProtoFieldValue::Repeated(values) => values.iter().try_for_each(check_value_initialized),
        ProtoFieldValue::Map(entries) => entries.values().try_for_each(check_value_initialized),
        _ => Ok(()),
    }
}

fn check_shape(field: &ProtoFieldDescriptor, value: &ProtoFieldValue) -> Result<()> {
    let ok = match (value, &field.map_entry) {
        (ProtoFieldValue::Map(entries), Some(entry)) => entries
            .iter()
            .all(|(k, v)| k.to_value().fits(&entry.key) && v.fits(&entry.value)),
        (_, Some(_)) => false,
        (ProtoFieldValue::Repeated(values), None) => {
            field.is_repeated() && values.iter().all(|v| v.fits(&field.field_type))
        }
        (other, None) => !field.is_repeated() && other.fits(&field.field_type),
    };

    if ok {
        Ok(())
    } else {
        Err(mismatch(field, value))
    }
}

fn mismatch(field: &ProtoFieldDescriptor, value: &ProtoFieldValue) -> ProtoTypesError {
    let expected = if field.is_map() {
        "map".to_string()
    } else if field.is_repeated() {
        format!("repeated {}", field.field_type)
    } else {
        field.field_type.to_string()
    };
    ProtoTypesError::TypeMismatch {
        field: field.name.clone(),
        expected,
        actual: value.kind_name().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proto::{Label, MapEntryTypes};

    fn field(name: &str, number: u32, field_type: ProtoType) -> ProtoFieldDescriptor {
        ProtoFieldDescriptor {
            name: name.to_string(),
            json_name: name.to_string(),
            number,
            field_type,
            label: Label::Optional,
            has_presence: false,
            is_packed: false,
            oneof_index: None,
            map_entry: None,
        }
    }

    fn user_descriptor() -> Arc<ProtoMessageDescriptor> {
        let mut nickname = field("nickname", 3, ProtoType::String);
        nickname.has_presence = true;
        let mut tags = field("tags", 4, ProtoType::String);
        tags.label = Label::Repeated;
        let mut email = field("email", 5, ProtoType::String);
        email.oneof_index = Some(0);
        email.has_presence = true;
        let mut phone = field("phone", 6, ProtoType::String);
        phone.oneof_index = Some(0);
        phone.has_presence = true;
        let mut labels = field("labels", 7, ProtoType::Message("User.LabelsEntry".into()));
        labels.label = Label::Repeated;
        labels.map_entry = Some(MapEntryTypes {
            key: ProtoType::String,
            value: ProtoType::Int32,
        });
        let mut id = field("id", 8, ProtoType::Int64);
        id.label = Label::Required;

        Arc::new(ProtoMessageDescriptor::new(
            "User",
            vec![
                field("name", 1, ProtoType::String),
                field("age", 2, ProtoType::Int32),
                nickname,
                tags,
                email,
                phone,
                labels,
                id,
            ],
            vec!["contact".to_string()],
            false,
        ))
    }

    #[test]
    fn test_set_and_get_scalar() {
        let mut msg = ProtoMessage::new(user_descriptor());
        msg.set(1, ProtoFieldValue::String("Ada".into()))
            .expect("set name");
        assert_eq!(
            msg.get_by_name("name"),
            Some(&ProtoFieldValue::String("Ada".into()))
        );
        assert_eq!(msg.message_type(), "User");
    }

    #[test]
    fn test_set_rejects_wrong_type() {
        let mut msg = ProtoMessage::new(user_descriptor());
        let err = msg.set(2, ProtoFieldValue::String("old".into())).unwrap_err();
        assert!(matches!(err, ProtoTypesError::TypeMismatch { .. }));
        let err = msg.set(42, ProtoFieldValue::Bool(true)).unwrap_err();
        assert!(matches!(err, ProtoTypesError::UnknownField { number: 42, .. }));
    }

    #[test]
    fn test_implicit_default_is_cleared() {
        let mut msg = ProtoMessage::new(user_descriptor());
        msg.set(2, ProtoFieldValue::Int32(7)).unwrap();
        msg.set(2, ProtoFieldValue::Int32(0)).unwrap();
        assert!(!msg.has_field(2));

        // Explicit presence keeps the default value.
        msg.set(3, ProtoFieldValue::String(String::new())).unwrap();
        assert!(msg.has_field(3));
    }

    #[test]
    fn test_oneof_member_evicts_sibling() {
        let mut msg = ProtoMessage::new(user_descriptor());
        msg.set(5, ProtoFieldValue::String("a@b.c".into())).unwrap();
        msg.set(6, ProtoFieldValue::String("555".into())).unwrap();
        assert!(!msg.has_field(5));
        assert!(msg.has_field(6));
    }

    #[test]
    fn test_push_repeated_and_map_entries() {
        let mut msg = ProtoMessage::new(user_descriptor());
        msg.push(4, ProtoFieldValue::String("x".into())).unwrap();
        msg.push(4, ProtoFieldValue::String("y".into())).unwrap();
        assert_eq!(
            msg.get(4),
            Some(&ProtoFieldValue::Repeated(vec![
                ProtoFieldValue::String("x".into()),
                ProtoFieldValue::String("y".into()),
            ]))
        );

        msg.insert_map_entry(7, MapKey::String("k".into()), ProtoFieldValue::Int32(1))
            .unwrap();
        msg.insert_map_entry(7, MapKey::String("k".into()), ProtoFieldValue::Int32(2))
            .unwrap();
        match msg.get(7) {
            Some(ProtoFieldValue::Map(entries)) => {
                assert_eq!(entries.len(), 1);
                assert_eq!(
                    entries.get(&MapKey::String("k".into())),
                    Some(&ProtoFieldValue::Int32(2))
                );
            }
            other => panic!("Expected map value, got {other:?}"),
        }

        assert!(msg.push(1, ProtoFieldValue::String("z".into())).is_err());
        assert!(msg
            .insert_map_entry(7, MapKey::Int32(1), ProtoFieldValue::Int32(1))
            .is_err());
    }

    #[test]
    fn test_check_initialized_reports_missing_required() {
        let mut msg = ProtoMessage::new(user_descriptor());
        let err = msg.check_initialized().unwrap_err();
        assert_eq!(
            err,
            ProtoTypesError::MissingRequiredField("User.id".to_string())
        );

        msg.set(8, ProtoFieldValue::Int64(1)).unwrap();
        assert!(msg.check_initialized().is_ok());
    }

    #[test]
    fn test_messages_compare_structurally() {
        let mut a = ProtoMessage::new(user_descriptor());
        let mut b = ProtoMessage::new(user_descriptor());
        a.set(1, ProtoFieldValue::String("Ada".into())).unwrap();
        b.set(2, ProtoFieldValue::Int32(0)).unwrap();
        assert_ne!(a, b);
        b.set(1, ProtoFieldValue::String("Ada".into())).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_is_default_treats_negative_zero_as_set() {
        assert!(ProtoFieldValue::Double(0.0).is_default());
        assert!(!ProtoFieldValue::Double(-0.0).is_default());
        assert!(ProtoFieldValue::Repeated(vec![]).is_default());
    }
}
