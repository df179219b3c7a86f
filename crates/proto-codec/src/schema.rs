//! Runtime `.proto` schema loading.
//!
//! `.proto` sources are parsed and type-checked with `protobuf-parse` (pure
//! Rust parser, no `protoc` needed) and the resulting `FileDescriptorProto`s
//! are flattened into a [`ProtoSchema`]: every message and enum, nested ones
//! included, keyed by its fully qualified name.

use crate::error::{Error, Result};
use protobuf::descriptor::field_descriptor_proto::{Label as FieldLabel, Type};
use protobuf::descriptor::{
    DescriptorProto, EnumDescriptorProto, FieldDescriptorProto, FileDescriptorProto,
};
use proto_types::{
    Label, MapEntryTypes, ProtoEnumDescriptor, ProtoEnumValue, ProtoFieldDescriptor,
    ProtoMessageDescriptor, ProtoSchema, ProtoType,
};
use protobuf_parse::Parser;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Load a `.proto` file and everything it imports.
///
/// `proto_file` is looked up as given first and then relative to each import
/// path. When none of the import paths contains the file, its parent
/// directory is added as an import root so sibling imports resolve.
pub fn load_file(proto_file: &Path, import_paths: &[PathBuf]) -> Result<ProtoSchema> {
    let resolved = resolve_proto_file(proto_file, import_paths)?;

    let mut includes = Vec::with_capacity(import_paths.len() + 1);
    for path in import_paths {
        let canonical = path.canonicalize().map_err(|e| {
            Error::ProtobufParse(format!("Import path {}: {e}", path.display()))
        })?;
        includes.push(canonical);
    }
    if !includes.iter().any(|include| resolved.starts_with(include)) {
        if let Some(parent) = resolved.parent() {
            includes.push(parent.to_path_buf());
        }
    }

    debug!(
        "Parsing {} with import paths {:?}",
        resolved.display(),
        includes
    );

    let mut parser = Parser::new();
    parser.pure();
    for include in &includes {
        parser.include(include);
    }
    parser.input(&resolved);

    let parsed = parser
        .parse_and_typecheck()
        .map_err(|e| Error::ProtobufParse(format!("{e:#}")))?;

    let schema = build_schema(&parsed.file_descriptors)?;
    debug!(
        "Loaded {} message types from {}",
        schema.list_messages().len(),
        resolved.display()
    );
    Ok(schema)
}

/// Parse `.proto` source text. Imports resolve relative to a scratch
/// directory, so only self-contained sources and the bundled well-known types
/// are supported.
pub fn parse_str(content: &str) -> Result<ProtoSchema> {
    use std::io::Write;

    let mut temp_file = tempfile::Builder::new()
        .prefix("schema")
        .suffix(".proto")
        .tempfile()
        .map_err(|e| Error::ProtobufParse(format!("Failed to create temp file: {e}")))?;
    temp_file
        .write_all(content.as_bytes())
        .map_err(|e| Error::ProtobufParse(format!("Failed to write temp file: {e}")))?;

    load_file(temp_file.path(), &[])
}

/// Flatten type-checked file descriptors into a [`ProtoSchema`].
pub fn build_schema(files: &[FileDescriptorProto]) -> Result<ProtoSchema> {
    let mut builder = SchemaBuilder::default();

    for file in files {
        let scope = file.package.clone().unwrap_or_default();
        builder.collect_map_entries(&scope, &file.message_type)?;
    }

    for file in files {
        let scope = file.package.clone().unwrap_or_default();
        let proto3 = file.syntax.as_deref() == Some("proto3");
        for message in &file.message_type {
            builder.add_message(&scope, message, proto3)?;
        }
        for enum_type in &file.enum_type {
            builder.add_enum(&scope, enum_type);
        }
    }

    Ok(ProtoSchema::from_parts(builder.messages, builder.enums))
}

#[derive(Default)]
struct SchemaBuilder {
    messages: Vec<ProtoMessageDescriptor>,
    enums: Vec<ProtoEnumDescriptor>,
    map_entries: HashMap<String, MapEntryTypes>,
}

impl SchemaBuilder {
    fn collect_map_entries(&mut self, scope: &str, messages: &[DescriptorProto]) -> Result<()> {
        for message in messages {
            let name = qualify(scope, message.name.as_deref().unwrap_or_default());
            let is_map_entry = message
                .options
                .as_ref()
                .and_then(|o| o.map_entry)
                .unwrap_or(false);

            if is_map_entry {
                let key = entry_field_type(message, 1, &name)?;
                let value = entry_field_type(message, 2, &name)?;
                self.map_entries
                    .insert(name.clone(), MapEntryTypes { key, value });
            }

            self.collect_map_entries(&name, &message.nested_type)?;
        }
        Ok(())
    }

    fn add_message(&mut self, scope: &str, message: &DescriptorProto, proto3: bool) -> Result<()> {
        let name = qualify(scope, message.name.as_deref().unwrap_or_default());
        let is_map_entry = self.map_entries.contains_key(&name);

        let mut fields = Vec::with_capacity(message.field.len());
        for field in &message.field {
            fields.push(self.field_descriptor(field, proto3)?);
        }
        let oneofs = message
            .oneof_decl
            .iter()
            .map(|o| o.name.clone().unwrap_or_default())
            .collect();

        for nested in &message.nested_type {
            self.add_message(&name, nested, proto3)?;
        }
        for enum_type in &message.enum_type {
            self.add_enum(&name, enum_type);
        }

        self.messages
            .push(ProtoMessageDescriptor::new(name, fields, oneofs, is_map_entry));
        Ok(())
    }

    fn add_enum(&mut self, scope: &str, enum_type: &EnumDescriptorProto) {
        let values = enum_type
            .value
            .iter()
            .map(|v| ProtoEnumValue {
                name: v.name.clone().unwrap_or_default(),
                number: v.number.unwrap_or(0),
            })
            .collect();
        self.enums.push(ProtoEnumDescriptor {
            name: qualify(scope, enum_type.name.as_deref().unwrap_or_default()),
            values,
        });
    }

    fn field_descriptor(
        &self,
        field: &FieldDescriptorProto,
        proto3: bool,
    ) -> Result<ProtoFieldDescriptor> {
        let name = field.name.clone().unwrap_or_default();
        let field_type = parse_field_type(field)?;

        let label = match field.label.map(|l| l.enum_value_or_default()) {
            Some(FieldLabel::LABEL_REPEATED) => Label::Repeated,
            Some(FieldLabel::LABEL_REQUIRED) => Label::Required,
            _ => Label::Optional,
        };

        let map_entry = match (&field_type, label) {
            (ProtoType::Message(type_name), Label::Repeated) => {
                self.map_entries.get(type_name.as_str()).cloned()
            }
            _ => None,
        };

        let oneof_index = field.oneof_index.map(|i| i as usize);
        let has_presence = match label {
            Label::Repeated => false,
            Label::Required => true,
            Label::Optional => {
                !proto3
                    || field.proto3_optional.unwrap_or(false)
                    || oneof_index.is_some()
                    || matches!(field_type, ProtoType::Message(_))
            }
        };

        let is_packed = label == Label::Repeated
            && field_type.is_packable()
            && field
                .options
                .as_ref()
                .and_then(|o| o.packed)
                .unwrap_or(proto3);

        let json_name = field
            .json_name
            .clone()
            .unwrap_or_else(|| to_lower_camel(&name));

        Ok(ProtoFieldDescriptor {
            name,
            json_name,
            number: field.number.unwrap_or(0) as u32,
            field_type,
            label,
            has_presence,
            is_packed,
            oneof_index,
            map_entry,
        })
    }
}

fn entry_field_type(entry: &DescriptorProto, number: i32, entry_name: &str) -> Result<ProtoType> {
    let field = entry
        .field
        .iter()
        .find(|f| f.number == Some(number))
        .ok_or_else(|| {
            Error::ProtobufParse(format!("Map entry {entry_name} is missing field {number}"))
        })?;
    parse_field_type(field)
}

fn parse_field_type(field: &FieldDescriptorProto) -> Result<ProtoType> {
    let field_type = field
        .type_
        .ok_or_else(|| Error::ProtobufParse("Field missing type".to_string()))?
        .enum_value_or_default();

    Ok(match field_type {
        Type::TYPE_DOUBLE => ProtoType::Double,
        Type::TYPE_FLOAT => ProtoType::Float,
        Type::TYPE_INT64 => ProtoType::Int64,
        Type::TYPE_UINT64 => ProtoType::Uint64,
        Type::TYPE_INT32 => ProtoType::Int32,
        Type::TYPE_FIXED64 => ProtoType::Fixed64,
        Type::TYPE_FIXED32 => ProtoType::Fixed32,
        Type::TYPE_BOOL => ProtoType::Bool,
        Type::TYPE_STRING => ProtoType::String,
        Type::TYPE_MESSAGE => ProtoType::Message(type_reference(field)),
        Type::TYPE_BYTES => ProtoType::Bytes,
        Type::TYPE_UINT32 => ProtoType::Uint32,
        Type::TYPE_ENUM => ProtoType::Enum(type_reference(field)),
        Type::TYPE_SFIXED32 => ProtoType::Sfixed32,
        Type::TYPE_SFIXED64 => ProtoType::Sfixed64,
        Type::TYPE_SINT32 => ProtoType::Sint32,
        Type::TYPE_SINT64 => ProtoType::Sint64,
        Type::TYPE_GROUP => {
            return Err(Error::ProtobufParse(format!(
                "Field {}: groups are deprecated and not supported",
                field.name.as_deref().unwrap_or_default()
            )))
        }
    })
}

/// Referenced type name without the leading `.` the type checker adds.
fn type_reference(field: &FieldDescriptorProto) -> String {
    let type_name = field.type_name.as_deref().unwrap_or_default();
    type_name.strip_prefix('.').unwrap_or(type_name).to_string()
}

fn qualify(scope: &str, name: &str) -> String {
    if scope.is_empty() {
        name.to_string()
    } else {
        format!("{scope}.{name}")
    }
}

/// Default JSON name: underscores dropped, the following letter upper-cased.
pub(crate) fn to_lower_camel(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut upper_next = false;
    for c in name.chars() {
        if c == '_' {
            upper_next = true;
        } else if upper_next {
            out.extend(c.to_uppercase());
            upper_next = false;
        } else {
            out.push(c);
        }
    }
    out
}

fn resolve_proto_file(proto_file: &Path, import_paths: &[PathBuf]) -> Result<PathBuf> {
    if proto_file.is_file() {
        return canonical(proto_file);
    }
    if proto_file.is_relative() {
        for import_path in import_paths {
            let candidate = import_path.join(proto_file);
            if candidate.is_file() {
                return canonical(&candidate);
            }
        }
    }
    Err(Error::ProtobufParse(format!(
        "Proto file not found: {}",
        proto_file.display()
    )))
}

fn canonical(path: &Path) -> Result<PathBuf> {
    path.canonicalize()
        .map_err(|e| Error::ProtobufParse(format!("{}: {e}", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_message() {
        let proto = r#"
            syntax = "proto3";

            message User {
                string name = 1;
                int32 age = 2;
                bool active = 3;
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        assert_eq!(schema.list_messages(), vec!["User"]);

        let user_msg = schema.find_message("User").expect("User message not found");
        assert_eq!(user_msg.fields().len(), 3);

        let name_field = user_msg.get_field("name").expect("name field not found");
        assert_eq!(name_field.name, "name");
        assert_eq!(name_field.number, 1);
        assert_eq!(name_field.field_type, ProtoType::String);
        assert!(!name_field.is_repeated());
        assert!(!name_field.has_presence);

        let age_field = user_msg.get_field("age").expect("age field not found");
        assert_eq!(age_field.field_type, ProtoType::Int32);
        assert_eq!(age_field.number, 2);

        let active_field = user_msg
            .get_field("active")
            .expect("active field not found");
        assert_eq!(active_field.field_type, ProtoType::Bool);
        assert_eq!(active_field.number, 3);
    }

    #[test]
    fn test_parse_with_package() {
        let proto = r#"
            syntax = "proto3";
            package myapp.v1;

            message Product {
                string id = 1;
                double price = 2;
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        let product_msg = schema
            .find_message("Product")
            .expect("Product message not found");

        assert_eq!(product_msg.name(), "myapp.v1.Product");
        assert_eq!(product_msg.fields().len(), 2);
        assert!(schema.find_message("myapp.v1.Product").is_ok());

        let price_field = product_msg
            .get_field("price")
            .expect("price field not found");
        assert_eq!(price_field.field_type, ProtoType::Double);
    }

    #[test]
    fn test_parse_repeated_fields() {
        let proto = r#"
            syntax = "proto3";

            message Team {
                string name = 1;
                repeated string members = 2;
                repeated int64 scores = 3;
                repeated int32 legacy = 4 [packed = false];
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        let team_msg = schema.find_message("Team").expect("Team message not found");

        let members_field = team_msg
            .get_field("members")
            .expect("members field not found");
        assert!(members_field.is_repeated());
        assert!(!members_field.is_packed);
        assert_eq!(members_field.field_type, ProtoType::String);

        let scores_field = team_msg
            .get_field("scores")
            .expect("scores field not found");
        assert!(scores_field.is_repeated());
        assert!(scores_field.is_packed);
        assert_eq!(scores_field.field_type, ProtoType::Int64);

        let legacy_field = team_msg.get_field("legacy").expect("legacy not found");
        assert!(!legacy_field.is_packed);
    }

    #[test]
    fn test_parse_all_numeric_types() {
        let proto = r#"
            syntax = "proto3";

            message NumericTypes {
                int32 int32_field = 1;
                int64 int64_field = 2;
                uint32 uint32_field = 3;
                uint64 uint64_field = 4;
                sint32 sint32_field = 5;
                sint64 sint64_field = 6;
                fixed32 fixed32_field = 7;
                fixed64 fixed64_field = 8;
                sfixed32 sfixed32_field = 9;
                sfixed64 sfixed64_field = 10;
                float float_field = 11;
                double double_field = 12;
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        let msg = schema
            .find_message("NumericTypes")
            .expect("NumericTypes message not found");

        let expected = [
            ("int32_field", ProtoType::Int32),
            ("int64_field", ProtoType::Int64),
            ("uint32_field", ProtoType::Uint32),
            ("uint64_field", ProtoType::Uint64),
            ("sint32_field", ProtoType::Sint32),
            ("sint64_field", ProtoType::Sint64),
            ("fixed32_field", ProtoType::Fixed32),
            ("fixed64_field", ProtoType::Fixed64),
            ("sfixed32_field", ProtoType::Sfixed32),
            ("sfixed64_field", ProtoType::Sfixed64),
            ("float_field", ProtoType::Float),
            ("double_field", ProtoType::Double),
        ];
        for (name, field_type) in expected {
            let field = msg.get_field(name).expect("numeric field not found");
            assert_eq!(field.field_type, field_type, "field {name}");
        }
    }

    #[test]
    fn test_parse_nested_message_and_enum() {
        let proto = r#"
            syntax = "proto3";
            package shop;

            message Person {
                message Address {
                    string street = 1;
                    string city = 2;
                }
                enum Kind {
                    KIND_UNSPECIFIED = 0;
                    KIND_CUSTOMER = 1;
                }
                string name = 1;
                Address address = 2;
                Kind kind = 3;
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        assert_eq!(
            schema.list_messages(),
            vec!["shop.Person", "shop.Person.Address"]
        );

        let person_msg = schema.find_message("Person").expect("Person not found");
        let address_field = person_msg
            .get_field("address")
            .expect("address field not found");
        assert_eq!(
            address_field.field_type,
            ProtoType::Message("shop.Person.Address".to_string())
        );
        assert!(address_field.has_presence);

        let kind_field = person_msg.get_field("kind").expect("kind field not found");
        assert_eq!(
            kind_field.field_type,
            ProtoType::Enum("shop.Person.Kind".to_string())
        );

        let kind = schema
            .get_enum("shop.Person.Kind")
            .expect("Kind enum not found");
        assert_eq!(kind.value_by_number(1).map(|v| v.name.as_str()), Some("KIND_CUSTOMER"));
        assert_eq!(kind.value_by_name("KIND_UNSPECIFIED").map(|v| v.number), Some(0));
    }

    #[test]
    fn test_parse_optional_and_oneof_presence() {
        let proto = r#"
            syntax = "proto3";

            message OptionalExample {
                string implicit_field = 1;
                optional string optional_field = 2;
                oneof contact {
                    string email = 3;
                    string phone = 4;
                }
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        let msg = schema
            .find_message("OptionalExample")
            .expect("OptionalExample message not found");

        assert!(!msg.get_field("implicit_field").unwrap().has_presence);
        assert!(msg.get_field("optional_field").unwrap().has_presence);

        let email = msg.get_field("email").unwrap();
        let phone = msg.get_field("phone").unwrap();
        assert!(email.has_presence);
        assert!(email.oneof_index.is_some());
        assert_eq!(email.oneof_index, phone.oneof_index);
    }

    #[test]
    fn test_parse_proto2_required_and_presence() {
        let proto = r#"
            syntax = "proto2";

            message Legacy {
                required int64 id = 1;
                optional string label = 2;
                repeated int32 values = 3;
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        let msg = schema.find_message("Legacy").expect("Legacy not found");

        let id = msg.get_field("id").unwrap();
        assert!(id.is_required());
        assert!(id.has_presence);
        assert!(msg.get_field("label").unwrap().has_presence);
        // proto2 repeated scalars are unpacked unless asked for
        assert!(!msg.get_field("values").unwrap().is_packed);
    }

    #[test]
    fn test_parse_map_field() {
        let proto = r#"
            syntax = "proto3";

            message Inventory {
                map<string, int32> counts = 1;
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        // the synthetic entry type stays out of the listing
        assert_eq!(schema.list_messages(), vec!["Inventory"]);

        let msg = schema.find_message("Inventory").expect("Inventory not found");
        let counts = msg.get_field("counts").expect("counts not found");
        assert!(counts.is_map());
        assert_eq!(
            counts.map_entry,
            Some(MapEntryTypes {
                key: ProtoType::String,
                value: ProtoType::Int32,
            })
        );
    }

    #[test]
    fn test_parse_json_names() {
        let proto = r#"
            syntax = "proto3";

            message Names {
                string user_name = 1;
                string custom = 2 [json_name = "renamed"];
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        let msg = schema.find_message("Names").expect("Names not found");
        assert_eq!(msg.get_field("user_name").unwrap().json_name, "userName");
        assert_eq!(msg.get_field("custom").unwrap().json_name, "renamed");
    }

    #[test]
    fn test_parse_field_order() {
        let proto = r#"
            syntax = "proto3";

            message OrderedMessage {
                string field_a = 4;
                int32 field_b = 2;
                bool field_c = 3;
                double field_d = 1;
            }
        "#;

        let schema = parse_str(proto).expect("Failed to parse proto");
        let msg = schema
            .find_message("OrderedMessage")
            .expect("OrderedMessage not found");

        assert_eq!(
            msg.list_fields(),
            vec!["field_a", "field_b", "field_c", "field_d"]
        );
    }

    #[test]
    fn test_load_file_with_imports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let common = dir.path().join("common");
        std::fs::create_dir(&common).expect("mkdir");
        std::fs::write(
            common.join("money.proto"),
            r#"
                syntax = "proto3";
                package common;
                message Money { int64 units = 1; string currency = 2; }
            "#,
        )
        .expect("write money.proto");
        std::fs::write(
            dir.path().join("order.proto"),
            r#"
                syntax = "proto3";
                package shop;
                import "common/money.proto";
                message Order { string id = 1; common.Money total = 2; }
            "#,
        )
        .expect("write order.proto");

        let schema = load_file(&dir.path().join("order.proto"), &[dir.path().to_path_buf()])
            .expect("Failed to load order.proto");
        assert_eq!(schema.list_messages(), vec!["common.Money", "shop.Order"]);

        // Without explicit import paths the file's directory is used.
        let schema = load_file(&dir.path().join("order.proto"), &[])
            .expect("Failed to load without import paths");
        assert!(schema.find_message("Money").is_ok());
    }

    #[test]
    fn test_load_missing_file() {
        let result = load_file(Path::new("/nonexistent/missing.proto"), &[]);
        assert!(matches!(result, Err(Error::ProtobufParse(_))));
    }

    #[test]
    fn test_parse_invalid_proto() {
        let proto = r#"
            syntax = "proto3";

            message InvalidMessage {
                string name
            }
        "#;

        let result = parse_str(proto);
        assert!(result.is_err());
    }

    #[test]
    fn test_parse_group_rejected() {
        let proto = r#"
            syntax = "proto2";

            message WithGroup {
                optional group Item = 1 {
                    optional string name = 2;
                }
            }
        "#;

        assert!(parse_str(proto).is_err());
    }

    #[test]
    fn test_lower_camel() {
        assert_eq!(to_lower_camel("created_at"), "createdAt");
        assert_eq!(to_lower_camel("id"), "id");
        assert_eq!(to_lower_camel("a_b_c"), "aBC");
    }
}
