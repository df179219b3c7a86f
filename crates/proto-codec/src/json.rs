//! Proto3 JSON mapping.
//!
//! Messages are written as compact JSON objects with fields in declaration
//! order under their JSON names. 64-bit integers are strings, bytes are
//! padded standard base64 and enums are value names.
//!
//! The parser is lenient where the mapping allows it (original field names,
//! numbers as strings, enum numbers, URL-safe base64) and strict elsewhere:
//! unknown keys and values of the wrong JSON type are errors.
//!
//! `google.protobuf` well-known types use their special forms, see
//! the `well_known` module.

mod well_known;

use crate::binary::MAX_DEPTH;
use crate::error::{Error, Result};
use base64::Engine;
use proto_types::{
    MapKey, ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoMessageDescriptor,
    ProtoSchema, ProtoType,
};
use serde_json::{Map, Number, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// JSON codec over a resolved schema.
pub struct JsonCodec<'a> {
    schema: &'a ProtoSchema,
}

impl<'a> JsonCodec<'a> {
    pub fn new(schema: &'a ProtoSchema) -> Self {
        Self { schema }
    }

    /// Parse one JSON object into a message.
    pub fn decode(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        data: &[u8],
    ) -> Result<ProtoMessage> {
        let value: Value = serde_json::from_slice(data).map_err(|e| Error::JsonDecode {
            path: descriptor.name().to_string(),
            message: e.to_string(),
        })?;
        self.message_from_json(descriptor, &value, descriptor.name(), 0)
    }

    /// Render a message as compact JSON.
    pub fn encode(&self, message: &ProtoMessage) -> Result<Vec<u8>> {
        message.check_initialized()?;
        let value = self.message_to_json(message)?;
        serde_json::to_vec(&value).map_err(|e| Error::JsonEncode(e.to_string()))
    }

    fn message_to_json(&self, message: &ProtoMessage) -> Result<Value> {
        if let Some(json) = self.well_known_to_json(message)? {
            return Ok(json);
        }
        let mut object = Map::new();
        for field in message.descriptor().fields() {
            let Some(value) = message.get(field.number) else {
                continue;
            };
            let json = match value {
                ProtoFieldValue::Repeated(values) => Value::Array(
                    values
                        .iter()
                        .map(|v| self.value_to_json(&field.field_type, v))
                        .collect::<Result<_>>()?,
                ),
                ProtoFieldValue::Map(entries) => {
                    let value_type = map_value_type(field)?;
                    let mut map = Map::new();
                    for (key, value) in entries {
                        map.insert(key.to_string(), self.value_to_json(value_type, value)?);
                    }
                    Value::Object(map)
                }
                value => self.value_to_json(&field.field_type, value)?,
            };
            object.insert(field.json_name.clone(), json);
        }
        Ok(Value::Object(object))
    }

    fn value_to_json(&self, field_type: &ProtoType, value: &ProtoFieldValue) -> Result<Value> {
        let json = match value {
            ProtoFieldValue::Double(v) => float_to_json(*v),
            ProtoFieldValue::Float(v) => {
                // Shortest f32 representation, so 0.1f32 prints as 0.1.
                float_to_json(v.to_string().parse::<f64>().unwrap_or(*v as f64))
            }
            ProtoFieldValue::Int32(v) => Value::from(*v),
            ProtoFieldValue::Uint32(v) => Value::from(*v),
            ProtoFieldValue::Int64(v) => Value::String(v.to_string()),
            ProtoFieldValue::Uint64(v) => Value::String(v.to_string()),
            ProtoFieldValue::Bool(v) => Value::Bool(*v),
            ProtoFieldValue::String(v) => Value::String(v.clone()),
            ProtoFieldValue::Bytes(v) => {
                Value::String(base64::engine::general_purpose::STANDARD.encode(v))
            }
            ProtoFieldValue::Enum(_) if well_known::is_null_value(field_type) => Value::Null,
            ProtoFieldValue::Enum(number) => {
                let ProtoType::Enum(enum_name) = field_type else {
                    return Err(Error::JsonEncode(format!(
                        "Enum value for non-enum type {field_type}"
                    )));
                };
                let descriptor = self.schema.get_enum(enum_name).ok_or_else(|| {
                    Error::JsonEncode(format!("Enum type not found: {enum_name}"))
                })?;
                match descriptor.value_by_number(*number) {
                    Some(v) => Value::String(v.name.clone()),
                    None => Value::from(*number),
                }
            }
            ProtoFieldValue::Message(nested) => self.message_to_json(nested)?,
            ProtoFieldValue::Repeated(_) | ProtoFieldValue::Map(_) => {
                return Err(Error::JsonEncode(format!(
                    "Nested {} value for type {field_type}",
                    value.kind_name()
                )))
            }
        };
        Ok(json)
    }

    fn message_from_json(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<ProtoMessage> {
        if depth > MAX_DEPTH {
            return Err(decode_error(
                path,
                format!("message nesting exceeds {MAX_DEPTH} levels"),
            ));
        }
        if let Some(message) = self.well_known_from_json(descriptor, value, path, depth)? {
            return Ok(message);
        }
        let Value::Object(object) = value else {
            return Err(decode_error(
                path,
                format!("expected object, found {}", json_kind(value)),
            ));
        };

        let mut message = ProtoMessage::new(descriptor.clone());
        let mut oneofs_seen: HashMap<usize, &str> = HashMap::new();

        for (key, value) in object {
            let field_path = format!("{path}.{key}");
            let field = descriptor.get_field_by_json_key(key).ok_or_else(|| {
                decode_error(
                    &field_path,
                    format!("unknown field in message {}", descriptor.name()),
                )
            })?;

            let null_is_value = well_known::accepts_null(&field.field_type) && !field.is_repeated();
            if value.is_null() && !null_is_value {
                continue;
            }

            if let Some(oneof) = field.oneof_index {
                if let Some(previous) = oneofs_seen.insert(oneof, key.as_str()) {
                    let name = descriptor.oneof_name(oneof).unwrap_or_default();
                    return Err(decode_error(
                        &field_path,
                        format!("oneof {name} already set by {previous}"),
                    ));
                }
            }

            self.field_from_json(&mut message, field, value, &field_path, depth)?;
        }

        Ok(message)
    }

    fn field_from_json(
        &self,
        message: &mut ProtoMessage,
        field: &ProtoFieldDescriptor,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<()> {
        if let Some(entry) = &field.map_entry {
            let Value::Object(entries) = value else {
                return Err(decode_error(
                    path,
                    format!("expected object for map, found {}", json_kind(value)),
                ));
            };
            for (key, value) in entries {
                let entry_path = format!("{path}[{key:?}]");
                let key = map_key_from_json(&entry.key, key, &entry_path)?;
                let value = self.value_from_json(&entry.value, value, &entry_path, depth)?;
                message.insert_map_entry(field.number, key, value)?;
            }
            return Ok(());
        }

        if field.is_repeated() {
            let Value::Array(items) = value else {
                return Err(decode_error(
                    path,
                    format!("expected array, found {}", json_kind(value)),
                ));
            };
            for (index, item) in items.iter().enumerate() {
                let item_path = format!("{path}[{index}]");
                let item = self.value_from_json(&field.field_type, item, &item_path, depth)?;
                message.push(field.number, item)?;
            }
            return Ok(());
        }

        let value = self.value_from_json(&field.field_type, value, path, depth)?;
        message.set(field.number, value)?;
        Ok(())
    }

    fn value_from_json(
        &self,
        field_type: &ProtoType,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<ProtoFieldValue> {
        let parsed = match field_type {
            ProtoType::Double => ProtoFieldValue::Double(float_from_json(value, path)?),
            ProtoType::Float => {
                let v = float_from_json(value, path)?;
                if v.is_finite() && v.abs() > f32::MAX as f64 {
                    return Err(decode_error(path, "value out of range for float".to_string()));
                }
                ProtoFieldValue::Float(v as f32)
            }
            ProtoType::Int32 | ProtoType::Sint32 | ProtoType::Sfixed32 => {
                ProtoFieldValue::Int32(integer_from_json(value, path)?)
            }
            ProtoType::Int64 | ProtoType::Sint64 | ProtoType::Sfixed64 => {
                ProtoFieldValue::Int64(integer_from_json(value, path)?)
            }
            ProtoType::Uint32 | ProtoType::Fixed32 => {
                ProtoFieldValue::Uint32(integer_from_json(value, path)?)
            }
            ProtoType::Uint64 | ProtoType::Fixed64 => {
                ProtoFieldValue::Uint64(integer_from_json(value, path)?)
            }
            ProtoType::Bool => match value {
                Value::Bool(v) => ProtoFieldValue::Bool(*v),
                other => {
                    return Err(decode_error(
                        path,
                        format!("expected bool, found {}", json_kind(other)),
                    ))
                }
            },
            ProtoType::String => match value {
                Value::String(v) => ProtoFieldValue::String(v.clone()),
                other => {
                    return Err(decode_error(
                        path,
                        format!("expected string, found {}", json_kind(other)),
                    ))
                }
            },
            ProtoType::Bytes => match value {
                Value::String(v) => ProtoFieldValue::Bytes(
                    decode_base64(v)
                        .ok_or_else(|| decode_error(path, "invalid base64".to_string()))?,
                ),
                other => {
                    return Err(decode_error(
                        path,
                        format!("expected base64 string, found {}", json_kind(other)),
                    ))
                }
            },
            ProtoType::Enum(enum_name) => {
                let descriptor = self.schema.get_enum(enum_name).ok_or_else(|| {
                    decode_error(path, format!("enum type not found: {enum_name}"))
                })?;
                match value {
                    Value::Null if well_known::is_null_value(field_type) => ProtoFieldValue::Enum(0),
                    Value::String(name) => {
                        let v = descriptor.value_by_name(name).ok_or_else(|| {
                            decode_error(path, format!("unknown value {name:?} for enum {enum_name}"))
                        })?;
                        ProtoFieldValue::Enum(v.number)
                    }
                    Value::Number(_) => ProtoFieldValue::Enum(integer_from_json(value, path)?),
                    other => {
                        return Err(decode_error(
                            path,
                            format!("expected enum name or number, found {}", json_kind(other)),
                        ))
                    }
                }
            }
            ProtoType::Message(type_name) => {
                let descriptor = self.schema.get_message(type_name).ok_or_else(|| {
                    decode_error(path, format!("message type not found: {type_name}"))
                })?;
                let nested = self.message_from_json(descriptor, value, path, depth + 1)?;
                ProtoFieldValue::Message(Box::new(nested))
            }
        };
        Ok(parsed)
    }
}

fn map_value_type(field: &ProtoFieldDescriptor) -> Result<&ProtoType> {
    field
        .map_entry
        .as_ref()
        .map(|entry| &entry.value)
        .ok_or_else(|| Error::JsonEncode(format!("Field {} is not a map field", field.name)))
}

fn map_key_from_json(key_type: &ProtoType, key: &str, path: &str) -> Result<MapKey> {
    let invalid = || decode_error(path, format!("invalid map key {key:?} for type {key_type}"));
    let parsed = match key_type {
        ProtoType::String => MapKey::String(key.to_string()),
        ProtoType::Bool => match key {
            "true" => MapKey::Bool(true),
            "false" => MapKey::Bool(false),
            _ => return Err(invalid()),
        },
        ProtoType::Int32 | ProtoType::Sint32 | ProtoType::Sfixed32 => {
            MapKey::Int32(key.parse().map_err(|_| invalid())?)
        }
        ProtoType::Int64 | ProtoType::Sint64 | ProtoType::Sfixed64 => {
            MapKey::Int64(key.parse().map_err(|_| invalid())?)
        }
        ProtoType::Uint32 | ProtoType::Fixed32 => {
            MapKey::Uint32(key.parse().map_err(|_| invalid())?)
        }
        ProtoType::Uint64 | ProtoType::Fixed64 => {
            MapKey::Uint64(key.parse().map_err(|_| invalid())?)
        }
        _ => return Err(invalid()),
    };
    Ok(parsed)
}

fn float_to_json(v: f64) -> Value {
    if v.is_nan() {
        Value::String("NaN".to_string())
    } else if v.is_infinite() {
        Value::String(if v > 0.0 { "Infinity" } else { "-Infinity" }.to_string())
    } else if v.fract() == 0.0 && v.abs() < 1e15 && !(v == 0.0 && v.is_sign_negative()) {
        Value::from(v as i64)
    } else {
        Number::from_f64(v).map_or(Value::Null, Value::Number)
    }
}

fn float_from_json(value: &Value, path: &str) -> Result<f64> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .ok_or_else(|| decode_error(path, format!("invalid number {n}"))),
        Value::String(s) => match s.as_str() {
            "NaN" => Ok(f64::NAN),
            "Infinity" => Ok(f64::INFINITY),
            "-Infinity" => Ok(f64::NEG_INFINITY),
            other => other
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| decode_error(path, format!("invalid number {other:?}"))),
        },
        other => Err(decode_error(
            path,
            format!("expected number, found {}", json_kind(other)),
        )),
    }
}

/// Integer from a JSON number or numeric string, range-checked for `T`.
fn integer_from_json<T: TryFrom<i128>>(value: &Value, path: &str) -> Result<T> {
    let wide = match value {
        Value::Number(n) => n
            .as_i64()
            .map(i128::from)
            .or_else(|| n.as_u64().map(i128::from))
            .or_else(|| n.as_f64().and_then(integral_f64)),
        Value::String(s) => s
            .parse::<i128>()
            .ok()
            .or_else(|| s.parse::<f64>().ok().and_then(integral_f64)),
        other => {
            return Err(decode_error(
                path,
                format!("expected integer, found {}", json_kind(other)),
            ))
        }
    };
    let wide = wide.ok_or_else(|| decode_error(path, format!("invalid integer {value}")))?;
    T::try_from(wide).map_err(|_| decode_error(path, format!("integer {wide} out of range")))
}

fn integral_f64(v: f64) -> Option<i128> {
    (v.is_finite() && v.fract() == 0.0 && v.abs() < 1.9e19).then_some(v as i128)
}

fn decode_base64(s: &str) -> Option<Vec<u8>> {
    use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};

    STANDARD
        .decode(s)
        .or_else(|_| URL_SAFE.decode(s))
        .or_else(|_| STANDARD_NO_PAD.decode(s))
        .or_else(|_| URL_SAFE_NO_PAD.decode(s))
        .ok()
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn decode_error(path: &str, message: String) -> Error {
    Error::JsonDecode {
        path: path.to_string(),
        message,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::user_schema;

    fn decode_json(schema: &ProtoSchema, json: &str) -> Result<ProtoMessage> {
        let descriptor = schema.find_message("User").expect("User not found");
        JsonCodec::new(schema).decode(&descriptor, json.as_bytes())
    }

    fn round_trip(json: &str) -> String {
        let schema = user_schema();
        let msg = decode_json(&schema, json).expect("decode failed");
        let bytes = JsonCodec::new(&schema).encode(&msg).expect("encode failed");
        String::from_utf8(bytes).expect("utf8")
    }

    #[test]
    fn test_round_trip_is_compact_and_ordered() {
        // keys out of declaration order on input
        let json = round_trip(r#"{ "age": 30, "name": "Ada", "active": true }"#);
        assert_eq!(json, r#"{"name":"Ada","age":30,"active":true}"#);
    }

    #[test]
    fn test_original_field_names_accepted() {
        let json = round_trip(r#"{"lucky_numbers":[1,2],"luckyNumbers":[3]}"#);
        assert_eq!(json, r#"{"luckyNumbers":[1,2,3]}"#);
    }

    #[test]
    fn test_defaults_and_nulls_omitted() {
        let json = round_trip(r#"{"name":"","age":0,"address":null,"tags":[]}"#);
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_64_bit_integers_are_strings() {
        let json = round_trip(r#"{"id":"-9007199254740993","big":18446744073709551615}"#);
        assert_eq!(
            json,
            r#"{"id":"-9007199254740993","big":"18446744073709551615"}"#
        );
    }

    #[test]
    fn test_numbers_as_strings_and_exponents() {
        let json = round_trip(r#"{"age":"42","delta":1e2}"#);
        assert_eq!(json, r#"{"age":42,"delta":100}"#);
    }

    #[test]
    fn test_integer_out_of_range_fails() {
        let schema = user_schema();
        let err = decode_json(&schema, r#"{"age":2147483648}"#).unwrap_err();
        assert!(matches!(err, Error::JsonDecode { ref path, .. } if path == "test.v1.User.age"));
        assert!(decode_json(&schema, r#"{"age":1.5}"#).is_err());
    }

    #[test]
    fn test_floats() {
        let json = round_trip(r#"{"score":"NaN","ratio":0.1}"#);
        assert_eq!(json, r#"{"score":"NaN","ratio":0.1}"#);
        let json = round_trip(r#"{"score":"-Infinity","ratio":2.5}"#);
        assert_eq!(json, r#"{"score":"-Infinity","ratio":2.5}"#);
    }

    #[test]
    fn test_bytes_base64_variants() {
        // 0xfb 0xff is "+/8=" in standard and "-_8" in unpadded URL-safe base64
        assert_eq!(round_trip(r#"{"avatar":"+/8="}"#), r#"{"avatar":"+/8="}"#);
        assert_eq!(round_trip(r#"{"avatar":"-_8"}"#), r#"{"avatar":"+/8="}"#);

        let schema = user_schema();
        assert!(decode_json(&schema, r#"{"avatar":"!!"}"#).is_err());
    }

    #[test]
    fn test_enums_by_name_and_number() {
        assert_eq!(
            round_trip(r#"{"status":"STATUS_ACTIVE"}"#),
            r#"{"status":"STATUS_ACTIVE"}"#
        );
        assert_eq!(round_trip(r#"{"status":2}"#), r#"{"status":"STATUS_BANNED"}"#);
        // unknown numbers survive as numbers
        assert_eq!(round_trip(r#"{"status":9}"#), r#"{"status":9}"#);

        let schema = user_schema();
        assert!(decode_json(&schema, r#"{"status":"STATUS_NOPE"}"#).is_err());
    }

    #[test]
    fn test_nested_messages_and_maps() {
        let json = round_trip(
            r#"{"address":{"city":"Paris"},"previous":[{"street":"Main"},{}],"counts":{"b":2,"a":1},"sites":{"7":{"city":"Rome"}}}"#,
        );
        assert_eq!(
            json,
            r#"{"address":{"city":"Paris"},"previous":[{"street":"Main"},{}],"counts":{"a":1,"b":2},"sites":{"7":{"city":"Rome"}}}"#
        );
    }

    #[test]
    fn test_invalid_map_key_fails() {
        let schema = user_schema();
        assert!(decode_json(&schema, r#"{"sites":{"seven":{}}}"#).is_err());
    }

    #[test]
    fn test_unknown_field_fails() {
        let schema = user_schema();
        let err = decode_json(&schema, r#"{"name":"Ada","nope":1}"#).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }

    #[test]
    fn test_oneof_conflict_fails() {
        let schema = user_schema();
        let err = decode_json(&schema, r#"{"email":"a@b.c","phone":"555"}"#).unwrap_err();
        assert!(
            err.to_string().contains("oneof contact already set by email"),
            "unexpected error: {err}"
        );
        assert_eq!(round_trip(r#"{"email":"a@b.c","phone":null}"#), r#"{"email":"a@b.c"}"#);
    }

    #[test]
    fn test_explicit_presence_keeps_default() {
        assert_eq!(round_trip(r#"{"nickname":""}"#), r#"{"nickname":""}"#);
    }

    #[test]
    fn test_wrong_json_types_fail() {
        let schema = user_schema();
        assert!(decode_json(&schema, r#"{"name":5}"#).is_err());
        assert!(decode_json(&schema, r#"{"active":"true"}"#).is_err());
        assert!(decode_json(&schema, r#"{"tags":"x"}"#).is_err());
        assert!(decode_json(&schema, r#"[]"#).is_err());
        assert!(decode_json(&schema, "").is_err());
        assert!(decode_json(&schema, r#"{"name":"a"} trailing"#).is_err());
    }
}
