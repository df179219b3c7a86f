//! JSON forms of the `google.protobuf` well-known types.
//!
//! | Type | JSON |
//! |------|------|
//! | `Timestamp` | RFC 3339 string in UTC, `"1972-01-01T10:00:20.021Z"` |
//! | `Duration` | decimal seconds with an `s` suffix, `"1.000340012s"` |
//! | `*Value` wrappers | the wrapped scalar |
//! | `Struct` / `Value` / `ListValue` | any JSON object / value / array |
//! | `FieldMask` | comma-separated lowerCamelCase paths |
//! | `Any` | the packed message with an `@type` key |
//!
//! The schema must import the matching `google/protobuf/*.proto` file for a
//! type to be recognised.

use super::{decode_error, float_to_json, json_kind, map_value_type, JsonCodec};
use crate::binary::BinaryCodec;
use crate::error::{Error, Result};
use crate::schema::to_lower_camel;
use chrono::{DateTime, SecondsFormat};
use proto_types::{MapKey, ProtoFieldDescriptor, ProtoFieldValue, ProtoMessage, ProtoMessageDescriptor, ProtoType};
use serde_json::{Map, Value};
use std::sync::Arc;

const TIMESTAMP: &str = "google.protobuf.Timestamp";
const DURATION: &str = "google.protobuf.Duration";
const STRUCT: &str = "google.protobuf.Struct";
const VALUE: &str = "google.protobuf.Value";
const LIST_VALUE: &str = "google.protobuf.ListValue";
const FIELD_MASK: &str = "google.protobuf.FieldMask";
const ANY: &str = "google.protobuf.Any";
const NULL_VALUE: &str = "google.protobuf.NullValue";

const WRAPPERS: [&str; 9] = [
    "google.protobuf.DoubleValue",
    "google.protobuf.FloatValue",
    "google.protobuf.Int64Value",
    "google.protobuf.UInt64Value",
    "google.protobuf.Int32Value",
    "google.protobuf.UInt32Value",
    "google.protobuf.BoolValue",
    "google.protobuf.StringValue",
    "google.protobuf.BytesValue",
];

/// 0001-01-01T00:00:00Z
const MIN_TIMESTAMP_SECONDS: i64 = -62_135_596_800;
/// 9999-12-31T23:59:59Z
const MAX_TIMESTAMP_SECONDS: i64 = 253_402_300_799;
/// About 10,000 years
const MAX_DURATION_SECONDS: i64 = 315_576_000_000;
const NANOS_PER_SECOND: i32 = 1_000_000_000;

pub(super) fn is_well_known(name: &str) -> bool {
    matches!(
        name,
        TIMESTAMP | DURATION | STRUCT | VALUE | LIST_VALUE | FIELD_MASK | ANY
    ) || WRAPPERS.contains(&name)
}

pub(super) fn is_null_value(field_type: &ProtoType) -> bool {
    matches!(field_type, ProtoType::Enum(name) if name == NULL_VALUE)
}

/// Whether a JSON `null` is a value of this type rather than "unset".
pub(super) fn accepts_null(field_type: &ProtoType) -> bool {
    is_null_value(field_type) || matches!(field_type, ProtoType::Message(name) if name == VALUE)
}

impl JsonCodec<'_> {
    /// The special JSON form of `message`, or `None` for ordinary messages.
    pub(super) fn well_known_to_json(&self, message: &ProtoMessage) -> Result<Option<Value>> {
        let json = match message.message_type() {
            TIMESTAMP => timestamp_to_json(message)?,
            DURATION => duration_to_json(message)?,
            STRUCT => self.struct_to_json(message)?,
            VALUE => self.dynamic_value_to_json(message)?,
            LIST_VALUE => self.list_to_json(message)?,
            FIELD_MASK => field_mask_to_json(message),
            ANY => self.any_to_json(message)?,
            name if WRAPPERS.contains(&name) => self.wrapper_to_json(message)?,
            _ => return Ok(None),
        };
        Ok(Some(json))
    }

    /// Parse the special JSON form for well-known `descriptor`s, `None` otherwise.
    pub(super) fn well_known_from_json(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<Option<ProtoMessage>> {
        let message = match descriptor.name() {
            TIMESTAMP => timestamp_from_json(descriptor, value, path)?,
            DURATION => duration_from_json(descriptor, value, path)?,
            STRUCT => self.struct_from_json(descriptor, value, path, depth)?,
            VALUE => self.dynamic_value_from_json(descriptor, value, path, depth)?,
            LIST_VALUE => self.list_from_json(descriptor, value, path, depth)?,
            FIELD_MASK => field_mask_from_json(descriptor, value, path)?,
            ANY => self.any_from_json(descriptor, value, path, depth)?,
            name if WRAPPERS.contains(&name) => {
                let field = field_by_number(descriptor, 1)?;
                let inner = self.value_from_json(&field.field_type, value, path, depth)?;
                let mut message = ProtoMessage::new(descriptor.clone());
                message.set(1, inner)?;
                message
            }
            _ => return Ok(None),
        };
        Ok(Some(message))
    }

    fn wrapper_to_json(&self, message: &ProtoMessage) -> Result<Value> {
        let field = field_by_number(message.descriptor(), 1)?;
        match message.get(1) {
            Some(value) => self.value_to_json(&field.field_type, value),
            None => {
                let zero = ProtoFieldValue::default_for(&field.field_type).ok_or_else(|| {
                    Error::JsonEncode(format!("{} wraps a message", message.message_type()))
                })?;
                self.value_to_json(&field.field_type, &zero)
            }
        }
    }

    fn struct_to_json(&self, message: &ProtoMessage) -> Result<Value> {
        let mut object = Map::new();
        if let Some(ProtoFieldValue::Map(entries)) = message.get(1) {
            let value_type = map_value_type(field_by_number(message.descriptor(), 1)?)?;
            for (key, value) in entries {
                object.insert(key.to_string(), self.value_to_json(value_type, value)?);
            }
        }
        Ok(Value::Object(object))
    }

    fn struct_from_json(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<ProtoMessage> {
        let Value::Object(object) = value else {
            return Err(decode_error(
                path,
                format!("expected object, found {}", json_kind(value)),
            ));
        };
        let value_type = map_value_type(field_by_number(descriptor, 1)?)?;
        let mut message = ProtoMessage::new(descriptor.clone());
        for (key, value) in object {
            let entry_path = format!("{path}.{key}");
            let value = self.value_from_json(value_type, value, &entry_path, depth)?;
            message.insert_map_entry(1, MapKey::String(key.clone()), value)?;
        }
        Ok(message)
    }

    fn dynamic_value_to_json(&self, message: &ProtoMessage) -> Result<Value> {
        let Some((field, value)) = message.fields().next() else {
            return Err(Error::JsonEncode(format!("{VALUE} has no kind set")));
        };
        let json = match (field.number, value) {
            (1, _) => Value::Null,
            (2, ProtoFieldValue::Double(v)) => {
                if !v.is_finite() {
                    return Err(Error::JsonEncode(format!(
                        "{VALUE} cannot hold non-finite number {v}"
                    )));
                }
                float_to_json(*v)
            }
            (3, ProtoFieldValue::String(v)) => Value::String(v.clone()),
            (4, ProtoFieldValue::Bool(v)) => Value::Bool(*v),
            (5 | 6, ProtoFieldValue::Message(nested)) => self.message_to_json(nested)?,
            (_, other) => {
                return Err(Error::JsonEncode(format!(
                    "Unexpected {} in {VALUE}.{}",
                    other.kind_name(),
                    field.name
                )))
            }
        };
        Ok(json)
    }

    fn dynamic_value_from_json(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<ProtoMessage> {
        let mut message = ProtoMessage::new(descriptor.clone());
        match value {
            Value::Null => message.set(1, ProtoFieldValue::Enum(0))?,
            Value::Number(n) => {
                let v = n
                    .as_f64()
                    .ok_or_else(|| decode_error(path, format!("invalid number {n}")))?;
                message.set(2, ProtoFieldValue::Double(v))?
            }
            Value::String(v) => message.set(3, ProtoFieldValue::String(v.clone()))?,
            Value::Bool(v) => message.set(4, ProtoFieldValue::Bool(*v))?,
            Value::Object(_) | Value::Array(_) => {
                let number = if value.is_object() { 5 } else { 6 };
                let nested_type = &field_by_number(descriptor, number)?.field_type;
                let nested = self.value_from_json(nested_type, value, path, depth)?;
                message.set(number, nested)?
            }
        }
        Ok(message)
    }

    fn list_to_json(&self, message: &ProtoMessage) -> Result<Value> {
        let field = field_by_number(message.descriptor(), 1)?;
        let items = match message.get(1) {
            Some(ProtoFieldValue::Repeated(values)) => values
                .iter()
                .map(|v| self.value_to_json(&field.field_type, v))
                .collect::<Result<_>>()?,
            _ => Vec::new(),
        };
        Ok(Value::Array(items))
    }

    fn list_from_json(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<ProtoMessage> {
        let Value::Array(items) = value else {
            return Err(decode_error(
                path,
                format!("expected array, found {}", json_kind(value)),
            ));
        };
        let field = field_by_number(descriptor, 1)?;
        let mut message = ProtoMessage::new(descriptor.clone());
        for (index, item) in items.iter().enumerate() {
            let item_path = format!("{path}[{index}]");
            let item = self.value_from_json(&field.field_type, item, &item_path, depth)?;
            message.push(1, item)?;
        }
        Ok(message)
    }

    fn any_to_json(&self, message: &ProtoMessage) -> Result<Value> {
        let type_url = match message.get(1) {
            Some(ProtoFieldValue::String(v)) => v.as_str(),
            _ => "",
        };
        let payload: &[u8] = match message.get(2) {
            Some(ProtoFieldValue::Bytes(v)) => v.as_slice(),
            _ => &[],
        };
        if type_url.is_empty() {
            if payload.is_empty() {
                return Ok(Value::Object(Map::new()));
            }
            return Err(Error::JsonEncode(format!("{ANY} has a value but no type URL")));
        }

        let descriptor = self
            .any_descriptor(type_url)
            .ok_or_else(|| Error::JsonEncode(format!("{ANY} type not in schema: {type_url}")))?;
        let packed = BinaryCodec::new(self.schema).decode(&descriptor, payload)?;

        let mut object = Map::new();
        object.insert("@type".to_string(), Value::String(type_url.to_string()));
        match self.well_known_to_json(&packed)? {
            Some(json) => {
                object.insert("value".to_string(), json);
            }
            None => {
                if let Value::Object(fields) = self.message_to_json(&packed)? {
                    object.extend(fields);
                }
            }
        }
        Ok(Value::Object(object))
    }

    fn any_from_json(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        value: &Value,
        path: &str,
        depth: usize,
    ) -> Result<ProtoMessage> {
        let Value::Object(object) = value else {
            return Err(decode_error(
                path,
                format!("expected object, found {}", json_kind(value)),
            ));
        };
        let mut message = ProtoMessage::new(descriptor.clone());
        if object.is_empty() {
            return Ok(message);
        }

        let Some(Value::String(type_url)) = object.get("@type") else {
            return Err(decode_error(path, "missing \"@type\" in Any".to_string()));
        };
        let packed_descriptor = self
            .any_descriptor(type_url)
            .ok_or_else(|| decode_error(path, format!("Any type not in schema: {type_url}")))?;

        let packed = if is_well_known(packed_descriptor.name()) {
            let inner = object
                .get("value")
                .ok_or_else(|| decode_error(path, "missing \"value\" in Any".to_string()))?;
            self.message_from_json(&packed_descriptor, inner, path, depth + 1)?
        } else {
            let mut fields = object.clone();
            fields.remove("@type");
            self.message_from_json(&packed_descriptor, &Value::Object(fields), path, depth + 1)?
        };
        let payload = BinaryCodec::new(self.schema).encode(&packed)?;

        message.set(1, ProtoFieldValue::String(type_url.clone()))?;
        message.set(2, ProtoFieldValue::Bytes(payload))?;
        Ok(message)
    }

    /// Message named by the last path segment of an `Any` type URL.
    fn any_descriptor(&self, type_url: &str) -> Option<Arc<ProtoMessageDescriptor>> {
        let name = type_url.rsplit('/').next()?;
        self.schema.get_message(name).cloned()
    }
}

fn timestamp_to_json(message: &ProtoMessage) -> Result<Value> {
    let (seconds, nanos) = seconds_and_nanos(message);
    let time = (MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS)
        .contains(&seconds)
        .then(|| u32::try_from(nanos).ok())
        .flatten()
        .filter(|nanos| *nanos < NANOS_PER_SECOND as u32)
        .and_then(|nanos| DateTime::from_timestamp(seconds, nanos))
        .ok_or_else(|| {
            Error::JsonEncode(format!("{TIMESTAMP} out of range: {seconds}s {nanos}ns"))
        })?;
    Ok(Value::String(time.to_rfc3339_opts(SecondsFormat::AutoSi, true)))
}

fn timestamp_from_json(
    descriptor: &Arc<ProtoMessageDescriptor>,
    value: &Value,
    path: &str,
) -> Result<ProtoMessage> {
    let text = expect_string(value, path)?;
    let time = DateTime::parse_from_rfc3339(text)
        .map_err(|e| decode_error(path, format!("invalid timestamp {text:?}: {e}")))?;
    let seconds = time.timestamp();
    let nanos = time.timestamp_subsec_nanos();
    if !(MIN_TIMESTAMP_SECONDS..=MAX_TIMESTAMP_SECONDS).contains(&seconds)
        || nanos >= NANOS_PER_SECOND as u32
    {
        return Err(decode_error(path, format!("timestamp out of range: {text:?}")));
    }
    seconds_and_nanos_message(descriptor, seconds, nanos as i32)
}

fn duration_to_json(message: &ProtoMessage) -> Result<Value> {
    let (seconds, nanos) = seconds_and_nanos(message);
    let mixed_signs = (seconds > 0 && nanos < 0) || (seconds < 0 && nanos > 0);
    if seconds.unsigned_abs() > MAX_DURATION_SECONDS as u64
        || nanos.unsigned_abs() >= NANOS_PER_SECOND as u32
        || mixed_signs
    {
        return Err(Error::JsonEncode(format!(
            "{DURATION} out of range: {seconds}s {nanos}ns"
        )));
    }
    let sign = if seconds < 0 || nanos < 0 { "-" } else { "" };
    Ok(Value::String(format!(
        "{sign}{}{}s",
        seconds.unsigned_abs(),
        fraction(nanos.unsigned_abs())
    )))
}

fn duration_from_json(
    descriptor: &Arc<ProtoMessageDescriptor>,
    value: &Value,
    path: &str,
) -> Result<ProtoMessage> {
    let text = expect_string(value, path)?;
    let (seconds, nanos) =
        parse_duration(text).ok_or_else(|| decode_error(path, format!("invalid duration {text:?}")))?;
    seconds_and_nanos_message(descriptor, seconds, nanos)
}

/// Parse `[-]<seconds>[.<up to 9 digits>]s`.
fn parse_duration(text: &str) -> Option<(i64, i32)> {
    let body = text.strip_suffix('s')?;
    let (negative, body) = match body.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, body),
    };
    let (whole, frac) = match body.split_once('.') {
        Some((_, "")) => return None,
        Some(parts) => parts,
        None => (body, ""),
    };
    let digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
    if whole.is_empty() || !digits(whole) || frac.len() > 9 || !digits(frac) {
        return None;
    }

    let seconds: i64 = whole.parse().ok().filter(|s| *s <= MAX_DURATION_SECONDS)?;
    let nanos: i32 = if frac.is_empty() {
        0
    } else {
        format!("{frac:0<9}").parse().ok()?
    };
    Some(if negative {
        (-seconds, -nanos)
    } else {
        (seconds, nanos)
    })
}

/// Fractional seconds with 0, 3, 6 or 9 digits.
fn fraction(nanos: u32) -> String {
    if nanos == 0 {
        String::new()
    } else if nanos % 1_000_000 == 0 {
        format!(".{:03}", nanos / 1_000_000)
    } else if nanos % 1_000 == 0 {
        format!(".{:06}", nanos / 1_000)
    } else {
        format!(".{nanos:09}")
    }
}

fn field_mask_to_json(message: &ProtoMessage) -> Value {
    let paths: Vec<String> = match message.get(1) {
        Some(ProtoFieldValue::Repeated(values)) => values
            .iter()
            .filter_map(|v| match v {
                ProtoFieldValue::String(path) => Some(to_lower_camel(path)),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };
    Value::String(paths.join(","))
}

fn field_mask_from_json(
    descriptor: &Arc<ProtoMessageDescriptor>,
    value: &Value,
    path: &str,
) -> Result<ProtoMessage> {
    let text = expect_string(value, path)?;
    let mut message = ProtoMessage::new(descriptor.clone());
    for mask_path in text.split(',').filter(|p| !p.is_empty()) {
        message.push(1, ProtoFieldValue::String(to_snake_case(mask_path)))?;
    }
    Ok(message)
}

fn to_snake_case(name: &str) -> String {
    let mut out = String::with_capacity(name.len() + 4);
    for c in name.chars() {
        if c.is_ascii_uppercase() {
            out.push('_');
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

fn seconds_and_nanos(message: &ProtoMessage) -> (i64, i32) {
    let seconds = match message.get(1) {
        Some(ProtoFieldValue::Int64(v)) => *v,
        _ => 0,
    };
    let nanos = match message.get(2) {
        Some(ProtoFieldValue::Int32(v)) => *v,
        _ => 0,
    };
    (seconds, nanos)
}

fn seconds_and_nanos_message(
    descriptor: &Arc<ProtoMessageDescriptor>,
    seconds: i64,
    nanos: i32,
) -> Result<ProtoMessage> {
    let mut message = ProtoMessage::new(descriptor.clone());
    message.set(1, ProtoFieldValue::Int64(seconds))?;
    message.set(2, ProtoFieldValue::Int32(nanos))?;
    Ok(message)
}

fn field_by_number(descriptor: &ProtoMessageDescriptor, number: u32) -> Result<&ProtoFieldDescriptor> {
    descriptor.get_field_by_number(number).ok_or_else(|| {
        Error::JsonEncode(format!("{} has no field {number}", descriptor.name()))
    })
}

fn expect_string<'v>(value: &'v Value, path: &str) -> Result<&'v str> {
    match value {
        Value::String(s) => Ok(s),
        other => Err(decode_error(
            path,
            format!("expected string, found {}", json_kind(other)),
        )),
    }
}
