//! Protobuf binary wire format.
//!
//! Decoding reads a buffer with `protobuf::CodedInputStream` and produces a
//! [`ProtoMessage`] bound to the requested descriptor; encoding walks a
//! message and writes it with `protobuf::CodedOutputStream`.
//!
//! Every field is a (tag, value) pair where
//! `tag = (field_number << 3) | wire_type` and the wire types are
//! 0=varint, 1=64-bit, 2=length-delimited, 3/4=group start/end, 5=32-bit.
//!
//! Decoding follows the usual merge rules: the last occurrence of a scalar
//! wins, occurrences of a singular message field are merged, repeated
//! scalars are accepted packed and unpacked. Fields missing from the
//! descriptor are kept as unknown fields and written back out on encode;
//! an unknown group keeps its inner fields up to the matching end tag.

use crate::error::{Error, Result};
use proto_types::{
    MapKey, ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoMessageDescriptor,
    ProtoSchema, ProtoType, UnknownField, UnknownValue,
};
use protobuf::{CodedInputStream, CodedOutputStream};
use std::sync::Arc;

/// Maximum message nesting accepted by the decoder.
pub const MAX_DEPTH: usize = 100;

const WIRE_VARINT: u32 = 0;
const WIRE_FIXED64: u32 = 1;
const WIRE_LEN: u32 = 2;
const WIRE_START_GROUP: u32 = 3;
const WIRE_END_GROUP: u32 = 4;
const WIRE_FIXED32: u32 = 5;

/// Binary codec over a resolved schema.
pub struct BinaryCodec<'a> {
    schema: &'a ProtoSchema,
}

impl<'a> BinaryCodec<'a> {
    pub fn new(schema: &'a ProtoSchema) -> Self {
        Self { schema }
    }

    /// Decode one message from `data`. An empty buffer is an empty message.
    pub fn decode(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        data: &[u8],
    ) -> Result<ProtoMessage> {
        let mut stream = CodedInputStream::from_bytes(data);
        let mut message = ProtoMessage::new(descriptor.clone());
        self.merge_message(&mut message, &mut stream, 0)?;
        Ok(message)
    }

    /// Encode a message, failing if a required field is missing.
    pub fn encode(&self, message: &ProtoMessage) -> Result<Vec<u8>> {
        message.check_initialized()?;
        self.message_bytes(message)
    }

    fn merge_message(
        &self,
        message: &mut ProtoMessage,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<()> {
        if depth > MAX_DEPTH {
            return Err(Error::ProtobufDecode(format!(
                "Message nesting exceeds {MAX_DEPTH} levels"
            )));
        }

        while !stream.eof().map_err(decode_error)? {
            let tag = stream.read_raw_varint32().map_err(decode_error)?;
            let number = tag >> 3;
            let wire_type = tag & 7;

            if number == 0 {
                return Err(Error::ProtobufDecode(format!(
                    "Invalid field number 0 in message {}",
                    message.message_type()
                )));
            }

            let field = message.descriptor().get_field_by_number(number).cloned();
            match field {
                Some(field) => self.merge_field(message, &field, wire_type, stream, depth)?,
                None => {
                    let value = read_unknown(stream, number, wire_type, depth)?;
                    message.push_unknown(UnknownField { number, value });
                }
            }
        }
        Ok(())
    }

    fn merge_field(
        &self,
        message: &mut ProtoMessage,
        field: &ProtoFieldDescriptor,
        wire_type: u32,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<()> {
        let expected = wire_type_of(&field.field_type);

        if field.is_map() {
            check_wire_type(field, wire_type, WIRE_LEN)?;
            return self.merge_map_entry(message, field, stream, depth);
        }

        if field.is_repeated() {
            if wire_type == WIRE_LEN && expected != WIRE_LEN {
                let len = stream.read_raw_varint64().map_err(decode_error)?;
                let old_limit = stream.push_limit(len).map_err(decode_error)?;
                while !stream.eof().map_err(decode_error)? {
                    let value = self.read_value(&field.field_type, stream, depth)?;
                    message.push(field.number, value)?;
                }
                stream.pop_limit(old_limit);
            } else {
                check_wire_type(field, wire_type, expected)?;
                let value = self.read_value(&field.field_type, stream, depth)?;
                message.push(field.number, value)?;
            }
            return Ok(());
        }

        check_wire_type(field, wire_type, expected)?;
        let value = match &field.field_type {
            ProtoType::Message(_) => match message.take(field.number) {
                Some(ProtoFieldValue::Message(mut existing)) => {
                    self.merge_length_delimited(&mut existing, stream, depth)?;
                    ProtoFieldValue::Message(existing)
                }
                _ => self.read_value(&field.field_type, stream, depth)?,
            },
            field_type => self.read_value(field_type, stream, depth)?,
        };
        message.set(field.number, value)?;
        Ok(())
    }

    fn merge_map_entry(
        &self,
        message: &mut ProtoMessage,
        field: &ProtoFieldDescriptor,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<()> {
        let (entry_descriptor, key_type, value_type) = map_entry_parts(self.schema, field)?;
        let mut entry = ProtoMessage::new(entry_descriptor);
        self.merge_length_delimited(&mut entry, stream, depth)?;

        let key = match entry.take(1) {
            Some(key) => key,
            None => default_value(self.schema, key_type)?,
        };
        let value = match entry.take(2) {
            Some(value) => value,
            None => default_value(self.schema, value_type)?,
        };
        let key = MapKey::from_value(key).ok_or_else(|| {
            Error::ProtobufDecode(format!("Invalid key type for map field {}", field.name))
        })?;

        message.insert_map_entry(field.number, key, value)?;
        Ok(())
    }

    fn merge_length_delimited(
        &self,
        message: &mut ProtoMessage,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<()> {
        let len = stream.read_raw_varint64().map_err(decode_error)?;
        let old_limit = stream.push_limit(len).map_err(decode_error)?;
        self.merge_message(message, stream, depth + 1)?;
        stream.pop_limit(old_limit);
        Ok(())
    }

    fn read_value(
        &self,
        field_type: &ProtoType,
        stream: &mut CodedInputStream,
        depth: usize,
    ) -> Result<ProtoFieldValue> {
        let value = match field_type {
            ProtoType::Double => ProtoFieldValue::Double(stream.read_double().map_err(decode_error)?),
            ProtoType::Float => ProtoFieldValue::Float(stream.read_float().map_err(decode_error)?),
            ProtoType::Int32 => ProtoFieldValue::Int32(stream.read_int32().map_err(decode_error)?),
            ProtoType::Sint32 => ProtoFieldValue::Int32(stream.read_sint32().map_err(decode_error)?),
            ProtoType::Sfixed32 => {
                ProtoFieldValue::Int32(stream.read_sfixed32().map_err(decode_error)?)
            }
            ProtoType::Int64 => ProtoFieldValue::Int64(stream.read_int64().map_err(decode_error)?),
            ProtoType::Sint64 => ProtoFieldValue::Int64(stream.read_sint64().map_err(decode_error)?),
            ProtoType::Sfixed64 => {
                ProtoFieldValue::Int64(stream.read_sfixed64().map_err(decode_error)?)
            }
            ProtoType::Uint32 => {
                ProtoFieldValue::Uint32(stream.read_uint32().map_err(decode_error)?)
            }
            ProtoType::Fixed32 => {
                ProtoFieldValue::Uint32(stream.read_fixed32().map_err(decode_error)?)
            }
            ProtoType::Uint64 => {
                ProtoFieldValue::Uint64(stream.read_uint64().map_err(decode_error)?)
            }
            ProtoType::Fixed64 => {
                ProtoFieldValue::Uint64(stream.read_fixed64().map_err(decode_error)?)
            }
            ProtoType::Bool => ProtoFieldValue::Bool(stream.read_bool().map_err(decode_error)?),
            ProtoType::String => {
                ProtoFieldValue::String(stream.read_string().map_err(decode_error)?)
            }
            ProtoType::Bytes => ProtoFieldValue::Bytes(stream.read_bytes().map_err(decode_error)?),
            ProtoType::Enum(_) => ProtoFieldValue::Enum(stream.read_int32().map_err(decode_error)?),
            ProtoType::Message(type_name) => {
                let descriptor = self.schema.get_message(type_name).ok_or_else(|| {
                    Error::ProtobufDecode(format!("Message type not found: {type_name}"))
                })?;
                let mut nested = ProtoMessage::new(descriptor.clone());
                self.merge_length_delimited(&mut nested, stream, depth)?;
                ProtoFieldValue::Message(Box::new(nested))
            }
        };
        Ok(value)
    }

    fn message_bytes(&self, message: &ProtoMessage) -> Result<Vec<u8>> {
        let mut buffer = Vec::new();
        {
            let mut stream = CodedOutputStream::vec(&mut buffer);
            self.write_message(&mut stream, message)?;
            stream.flush().map_err(encode_error)?;
        }
        Ok(buffer)
    }

    fn write_message(&self, stream: &mut CodedOutputStream, message: &ProtoMessage) -> Result<()> {
        for (field, value) in message.fields() {
            match value {
                ProtoFieldValue::Map(entries) => {
                    let (_, key_type, value_type) = map_entry_parts(self.schema, field)?;
                    for (key, value) in entries {
                        let mut entry = Vec::new();
                        {
                            let mut entry_stream = CodedOutputStream::vec(&mut entry);
                            self.write_field(&mut entry_stream, 1, key_type, &key.to_value())?;
                            self.write_field(&mut entry_stream, 2, value_type, value)?;
                            entry_stream.flush().map_err(encode_error)?;
                        }
                        write_tag(stream, field.number, WIRE_LEN)?;
                        stream.write_bytes_no_tag(&entry).map_err(encode_error)?;
                    }
                }
                ProtoFieldValue::Repeated(values) if field.is_packed => {
                    let mut packed = Vec::new();
                    {
                        let mut packed_stream = CodedOutputStream::vec(&mut packed);
                        for value in values {
                            self.write_value_no_tag(&mut packed_stream, &field.field_type, value)?;
                        }
                        packed_stream.flush().map_err(encode_error)?;
                    }
                    write_tag(stream, field.number, WIRE_LEN)?;
                    stream.write_bytes_no_tag(&packed).map_err(encode_error)?;
                }
                ProtoFieldValue::Repeated(values) => {
                    for value in values {
                        self.write_field(stream, field.number, &field.field_type, value)?;
                    }
                }
                value => self.write_field(stream, field.number, &field.field_type, value)?,
            }
        }

        for unknown in message.unknown_fields() {
            write_unknown(stream, unknown)?;
        }
        Ok(())
    }

    fn write_field(
        &self,
        stream: &mut CodedOutputStream,
        number: u32,
        field_type: &ProtoType,
        value: &ProtoFieldValue,
    ) -> Result<()> {
        write_tag(stream, number, wire_type_of(field_type))?;
        self.write_value_no_tag(stream, field_type, value)
    }

    fn write_value_no_tag(
        &self,
        stream: &mut CodedOutputStream,
        field_type: &ProtoType,
        value: &ProtoFieldValue,
    ) -> Result<()> {
        match (field_type, value) {
            (ProtoType::Double, ProtoFieldValue::Double(v)) => stream.write_double_no_tag(*v),
            (ProtoType::Float, ProtoFieldValue::Float(v)) => stream.write_float_no_tag(*v),
            (ProtoType::Int32, ProtoFieldValue::Int32(v)) => stream.write_int32_no_tag(*v),
            (ProtoType::Sint32, ProtoFieldValue::Int32(v)) => stream.write_sint32_no_tag(*v),
            (ProtoType::Sfixed32, ProtoFieldValue::Int32(v)) => stream.write_sfixed32_no_tag(*v),
            (ProtoType::Int64, ProtoFieldValue::Int64(v)) => stream.write_int64_no_tag(*v),
            (ProtoType::Sint64, ProtoFieldValue::Int64(v)) => stream.write_sint64_no_tag(*v),
            (ProtoType::Sfixed64, ProtoFieldValue::Int64(v)) => stream.write_sfixed64_no_tag(*v),
            (ProtoType::Uint32, ProtoFieldValue::Uint32(v)) => stream.write_uint32_no_tag(*v),
            (ProtoType::Fixed32, ProtoFieldValue::Uint32(v)) => stream.write_fixed32_no_tag(*v),
            (ProtoType::Uint64, ProtoFieldValue::Uint64(v)) => stream.write_uint64_no_tag(*v),
            (ProtoType::Fixed64, ProtoFieldValue::Uint64(v)) => stream.write_fixed64_no_tag(*v),
            (ProtoType::Bool, ProtoFieldValue::Bool(v)) => stream.write_bool_no_tag(*v),
            (ProtoType::String, ProtoFieldValue::String(v)) => stream.write_string_no_tag(v),
            (ProtoType::Bytes, ProtoFieldValue::Bytes(v)) => stream.write_bytes_no_tag(v),
            (ProtoType::Enum(_), ProtoFieldValue::Enum(v)) => stream.write_int32_no_tag(*v),
            (ProtoType::Message(_), ProtoFieldValue::Message(nested)) => {
                let bytes = self.message_bytes(nested)?;
                stream.write_bytes_no_tag(&bytes)
            }
            (field_type, value) => {
                return Err(Error::ProtobufEncode(format!(
                    "Value of kind {} cannot be written as {field_type}",
                    value.kind_name()
                )))
            }
        }
        .map_err(encode_error)
    }
}

/// Descriptor, key type and value type of a map field's entry message.
pub(crate) fn map_entry_parts<'s>(
    schema: &ProtoSchema,
    field: &'s ProtoFieldDescriptor,
) -> Result<(Arc<ProtoMessageDescriptor>, &'s ProtoType, &'s ProtoType)> {
    let (ProtoType::Message(entry_name), Some(entry)) = (&field.field_type, &field.map_entry)
    else {
        return Err(Error::ProtobufDecode(format!(
            "Field {} is not a map field",
            field.name
        )));
    };
    let descriptor = schema.get_message(entry_name).ok_or_else(|| {
        Error::ProtobufDecode(format!("Map entry type not found: {entry_name}"))
    })?;
    Ok((descriptor.clone(), &entry.key, &entry.value))
}

/// Default value of a type; an empty message for message types.
pub(crate) fn default_value(schema: &ProtoSchema, field_type: &ProtoType) -> Result<ProtoFieldValue> {
    if let Some(value) = ProtoFieldValue::default_for(field_type) {
        return Ok(value);
    }
    match field_type {
        ProtoType::Message(type_name) => {
            let descriptor = schema.get_message(type_name).ok_or_else(|| {
                Error::ProtobufDecode(format!("Message type not found: {type_name}"))
            })?;
            Ok(ProtoFieldValue::Message(Box::new(ProtoMessage::new(
                descriptor.clone(),
            ))))
        }
        other => Err(Error::ProtobufDecode(format!("No default for type {other}"))),
    }
}

fn wire_type_of(field_type: &ProtoType) -> u32 {
    match field_type {
        ProtoType::Double | ProtoType::Fixed64 | ProtoType::Sfixed64 => WIRE_FIXED64,
        ProtoType::Float | ProtoType::Fixed32 | ProtoType::Sfixed32 => WIRE_FIXED32,
        ProtoType::String | ProtoType::Bytes | ProtoType::Message(_) => WIRE_LEN,
        _ => WIRE_VARINT,
    }
}

fn check_wire_type(field: &ProtoFieldDescriptor, actual: u32, expected: u32) -> Result<()> {
    if actual == expected {
        Ok(())
    } else {
        Err(Error::ProtobufDecode(format!(
            "Field {} (number {}) has wire type {actual}, expected {expected}",
            field.name, field.number
        )))
    }
}

fn read_unknown(
    stream: &mut CodedInputStream,
    number: u32,
    wire_type: u32,
    depth: usize,
) -> Result<UnknownValue> {
    let value = match wire_type {
        WIRE_VARINT => UnknownValue::Varint(stream.read_raw_varint64().map_err(decode_error)?),
        WIRE_FIXED64 => {
            UnknownValue::Fixed64(stream.read_raw_little_endian64().map_err(decode_error)?)
        }
        WIRE_LEN => UnknownValue::LengthDelimited(stream.read_bytes().map_err(decode_error)?),
        WIRE_FIXED32 => {
            UnknownValue::Fixed32(stream.read_raw_little_endian32().map_err(decode_error)?)
        }
        WIRE_START_GROUP => UnknownValue::Group(read_group(stream, number, depth + 1)?),
        WIRE_END_GROUP => {
            return Err(Error::ProtobufDecode(format!(
                "Unexpected end-group tag for field {number}"
            )))
        }
        other => return Err(Error::ProtobufDecode(format!("Invalid wire type {other}"))),
    };
    Ok(value)
}

/// Read the fields of a group whose start tag was already consumed, up to
/// and including the end tag carrying the same field number.
fn read_group(
    stream: &mut CodedInputStream,
    number: u32,
    depth: usize,
) -> Result<Vec<UnknownField>> {
    if depth > MAX_DEPTH {
        return Err(Error::ProtobufDecode(format!(
            "Message nesting exceeds {MAX_DEPTH} levels"
        )));
    }

    let mut fields = Vec::new();
    loop {
        if stream.eof().map_err(decode_error)? {
            return Err(Error::ProtobufDecode(format!(
                "Group for field {number} is missing its end tag"
            )));
        }
        let tag = stream.read_raw_varint32().map_err(decode_error)?;
        let inner = tag >> 3;
        let wire_type = tag & 7;

        if wire_type == WIRE_END_GROUP {
            if inner != number {
                return Err(Error::ProtobufDecode(format!(
                    "Group for field {number} closed by end tag of field {inner}"
                )));
            }
            return Ok(fields);
        }
        if inner == 0 {
            return Err(Error::ProtobufDecode(format!(
                "Invalid field number 0 in group for field {number}"
            )));
        }
        let value = read_unknown(stream, inner, wire_type, depth)?;
        fields.push(UnknownField {
            number: inner,
            value,
        });
    }
}

fn write_unknown(stream: &mut CodedOutputStream, unknown: &UnknownField) -> Result<()> {
    match &unknown.value {
        UnknownValue::Varint(v) => stream.write_uint64(unknown.number, *v),
        UnknownValue::Fixed64(v) => stream.write_fixed64(unknown.number, *v),
        UnknownValue::Fixed32(v) => stream.write_fixed32(unknown.number, *v),
        UnknownValue::LengthDelimited(v) => stream.write_bytes(unknown.number, v),
        UnknownValue::Group(fields) => {
            write_tag(stream, unknown.number, WIRE_START_GROUP)?;
            for field in fields {
                write_unknown(stream, field)?;
            }
            return write_tag(stream, unknown.number, WIRE_END_GROUP);
        }
    }
    .map_err(encode_error)
}

fn write_tag(stream: &mut CodedOutputStream, number: u32, wire_type: u32) -> Result<()> {
    stream
        .write_raw_varint32((number << 3) | wire_type)
        .map_err(encode_error)
}

fn decode_error(e: protobuf::Error) -> Error {
    Error::ProtobufDecode(e.to_string())
}

fn encode_error(e: protobuf::Error) -> Error {
    Error::ProtobufEncode(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{legacy_schema, user_schema};

    fn decode(schema: &ProtoSchema, message: &str, data: &[u8]) -> Result<ProtoMessage> {
        let descriptor = schema.find_message(message).expect("message not found");
        BinaryCodec::new(schema).decode(&descriptor, data)
    }

    #[test]
    fn test_decode_scalars() {
        let schema = user_schema();
        // name = "Ada", age = 30, delta = -1 (zigzag 1), active = true
        let data = [
            0x0a, 0x03, b'A', b'd', b'a', 0x10, 0x1e, 0x18, 0x01, 0x40, 0x01,
        ];
        let msg = decode(&schema, "User", &data).expect("decode failed");

        assert_eq!(
            msg.get_by_name("name"),
            Some(&ProtoFieldValue::String("Ada".to_string()))
        );
        assert_eq!(msg.get_by_name("age"), Some(&ProtoFieldValue::Int32(30)));
        assert_eq!(msg.get_by_name("delta"), Some(&ProtoFieldValue::Int32(-1)));
        assert_eq!(msg.get_by_name("active"), Some(&ProtoFieldValue::Bool(true)));
    }

    #[test]
    fn test_decode_empty_buffer() {
        let schema = user_schema();
        let msg = decode(&schema, "User", &[]).expect("decode failed");
        assert!(msg.is_empty());
        let bytes = BinaryCodec::new(&schema).encode(&msg).expect("encode failed");
        assert!(bytes.is_empty());
    }

    #[test]
    fn test_decode_packed_and_unpacked_repeated() {
        let schema = user_schema();
        // lucky_numbers (12): packed [1, 2] then one unpacked 3
        let data = [0x62, 0x02, 0x01, 0x02, 0x60, 0x03];
        let msg = decode(&schema, "User", &data).expect("decode failed");
        assert_eq!(
            msg.get_by_name("lucky_numbers"),
            Some(&ProtoFieldValue::Repeated(vec![
                ProtoFieldValue::Int32(1),
                ProtoFieldValue::Int32(2),
                ProtoFieldValue::Int32(3),
            ]))
        );

        // proto3 re-encodes packed
        let bytes = BinaryCodec::new(&schema).encode(&msg).expect("encode failed");
        assert_eq!(bytes, vec![0x62, 0x03, 0x01, 0x02, 0x03]);
    }

    #[test]
    fn test_singular_message_occurrences_merge() {
        let schema = user_schema();
        // address (11) twice: {street: "a"} then {city: "b"}
        let data = [
            0x5a, 0x03, 0x0a, 0x01, b'a', 0x5a, 0x03, 0x12, 0x01, b'b',
        ];
        let msg = decode(&schema, "User", &data).expect("decode failed");
        let Some(ProtoFieldValue::Message(address)) = msg.get_by_name("address") else {
            panic!("address not decoded");
        };
        assert_eq!(
            address.get_by_name("street"),
            Some(&ProtoFieldValue::String("a".to_string()))
        );
        assert_eq!(
            address.get_by_name("city"),
            Some(&ProtoFieldValue::String("b".to_string()))
        );
    }

    #[test]
    fn test_last_scalar_occurrence_wins() {
        let schema = user_schema();
        let data = [0x10, 0x01, 0x10, 0x02];
        let msg = decode(&schema, "User", &data).expect("decode failed");
        assert_eq!(msg.get_by_name("age"), Some(&ProtoFieldValue::Int32(2)));
    }

    #[test]
    fn test_unknown_fields_round_trip() {
        let schema = user_schema();
        // name = "x", then unknown field 99 varint 7 and unknown field 100 fixed32
        let data = [
            0x0a, 0x01, b'x', 0x98, 0x06, 0x07, 0xa5, 0x06, 0x01, 0x00, 0x00, 0x00,
        ];
        let msg = decode(&schema, "User", &data).expect("decode failed");
        assert_eq!(
            msg.unknown_fields(),
            &[
                UnknownField {
                    number: 99,
                    value: UnknownValue::Varint(7),
                },
                UnknownField {
                    number: 100,
                    value: UnknownValue::Fixed32(1),
                },
            ]
        );

        let bytes = BinaryCodec::new(&schema).encode(&msg).expect("encode failed");
        assert_eq!(bytes, data.to_vec());
    }

    #[test]
    fn test_unknown_group_round_trip() {
        let schema = user_schema();
        // group 20 { 1: varint 5, group 2 { 3: "a" } }, then name = "x"
        let data = [
            0xa3, 0x01, 0x08, 0x05, 0x13, 0x1a, 0x01, b'a', 0x14, 0xa4, 0x01, 0x0a, 0x01, b'x',
        ];
        let msg = decode(&schema, "User", &data).expect("decode failed");
        assert_eq!(
            msg.get_by_name("name"),
            Some(&ProtoFieldValue::String("x".to_string()))
        );
        assert_eq!(
            msg.unknown_fields(),
            &[UnknownField {
                number: 20,
                value: UnknownValue::Group(vec![
                    UnknownField {
                        number: 1,
                        value: UnknownValue::Varint(5),
                    },
                    UnknownField {
                        number: 2,
                        value: UnknownValue::Group(vec![UnknownField {
                            number: 3,
                            value: UnknownValue::LengthDelimited(b"a".to_vec()),
                        }]),
                    },
                ]),
            }]
        );

        // known fields are written before unknown ones
        let bytes = BinaryCodec::new(&schema).encode(&msg).expect("encode failed");
        let mut expected = vec![0x0a, 0x01, b'x'];
        expected.extend_from_slice(&data[..11]);
        assert_eq!(bytes, expected);
    }

    #[test]
    fn test_malformed_groups_fail() {
        let schema = user_schema();
        // start group 20 with no end tag
        assert!(decode(&schema, "User", &[0xa3, 0x01, 0x08, 0x05]).is_err());
        // start group 20 closed by end group 21
        assert!(decode(&schema, "User", &[0xa3, 0x01, 0xac, 0x01]).is_err());
        // stray end group
        assert!(decode(&schema, "User", &[0xa4, 0x01]).is_err());
    }

    #[test]
    fn test_map_round_trip() {
        let schema = user_schema();
        let user = schema.find_message("User").expect("User not found");
        let address = schema.find_message("Address").expect("Address not found");

        let mut home = ProtoMessage::new(address);
        home.set(2, ProtoFieldValue::String("Paris".to_string()))
            .expect("set city");

        let mut msg = ProtoMessage::new(user);
        msg.insert_map_entry(15, MapKey::String("a".to_string()), ProtoFieldValue::Int32(1))
            .expect("insert counts");
        msg.insert_map_entry(15, MapKey::String(String::new()), ProtoFieldValue::Int32(0))
            .expect("insert counts");
        msg.insert_map_entry(16, MapKey::Int32(7), ProtoFieldValue::Message(Box::new(home)))
            .expect("insert sites");

        let codec = BinaryCodec::new(&schema);
        let bytes = codec.encode(&msg).expect("encode failed");
        let decoded = codec.decode(msg.descriptor(), &bytes).expect("decode failed");
        assert_eq!(decoded, msg);
    }

    #[test]
    fn test_map_entry_missing_value_uses_default() {
        let schema = user_schema();
        // counts (15) entry with only key "k"
        let data = [0x7a, 0x03, 0x0a, 0x01, b'k'];
        let msg = decode(&schema, "User", &data).expect("decode failed");
        let Some(ProtoFieldValue::Map(entries)) = msg.get_by_name("counts") else {
            panic!("counts not decoded");
        };
        assert_eq!(
            entries.get(&MapKey::String("k".to_string())),
            Some(&ProtoFieldValue::Int32(0))
        );
    }

    #[test]
    fn test_oneof_last_member_wins() {
        let schema = user_schema();
        // email (18) = "e" then phone (19) = "p"
        let data = [0x92, 0x01, 0x01, b'e', 0x9a, 0x01, 0x01, b'p'];
        let msg = decode(&schema, "User", &data).expect("decode failed");
        assert!(msg.get_by_name("email").is_none());
        assert_eq!(
            msg.get_by_name("phone"),
            Some(&ProtoFieldValue::String("p".to_string()))
        );
    }

    #[test]
    fn test_truncated_input_fails() {
        let schema = user_schema();
        let result = decode(&schema, "User", &[0x0a, 0x05, b'A']);
        assert!(matches!(result, Err(Error::ProtobufDecode(_))));
    }

    #[test]
    fn test_wire_type_mismatch_fails() {
        let schema = user_schema();
        // name (1) sent as varint
        let result = decode(&schema, "User", &[0x08, 0x01]);
        assert!(matches!(result, Err(Error::ProtobufDecode(_))));
    }

    #[test]
    fn test_invalid_utf8_string_fails() {
        let schema = user_schema();
        let result = decode(&schema, "User", &[0x0a, 0x02, 0xff, 0xfe]);
        assert!(result.is_err());
    }

    #[test]
    fn test_nesting_limit() {
        let schema = user_schema();
        // Node.child (2) nested deeper than the limit
        let mut data = Vec::new();
        for _ in 0..=MAX_DEPTH + 1 {
            let mut outer = vec![0x12];
            let mut len = data.len();
            loop {
                let byte = (len & 0x7f) as u8;
                len >>= 7;
                if len == 0 {
                    outer.push(byte);
                    break;
                }
                outer.push(byte | 0x80);
            }
            outer.extend_from_slice(&data);
            data = outer;
        }
        let result = decode(&schema, "Node", &data);
        assert!(matches!(result, Err(Error::ProtobufDecode(_))));
    }

    #[test]
    fn test_encode_missing_required_fails() {
        let schema = legacy_schema();
        let record = schema.find_message("Record").expect("Record not found");
        let msg = ProtoMessage::new(record);
        let err = BinaryCodec::new(&schema).encode(&msg).unwrap_err();
        assert!(err.to_string().contains("legacy.Record.id"));
    }

    #[test]
    fn test_proto2_repeated_written_unpacked() {
        let schema = legacy_schema();
        // id = 1, values = [5, 6] packed on input
        let data = [0x08, 0x01, 0x1a, 0x02, 0x05, 0x06];
        let msg = decode(&schema, "Record", &data).expect("decode failed");
        let bytes = BinaryCodec::new(&schema).encode(&msg).expect("encode failed");
        assert_eq!(bytes, vec![0x08, 0x01, 0x18, 0x05, 0x18, 0x06]);
    }

    #[test]
    fn test_proto2_default_value_is_kept() {
        let schema = legacy_schema();
        // id = 0 is explicitly present
        let msg = decode(&schema, "Record", &[0x08, 0x00]).expect("decode failed");
        assert_eq!(msg.get_by_name("id"), Some(&ProtoFieldValue::Int64(0)));
        let bytes = BinaryCodec::new(&schema).encode(&msg).expect("encode failed");
        assert_eq!(bytes, vec![0x08, 0x00]);
    }
}
