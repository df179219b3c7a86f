//! Encoding selection and dispatch.

use crate::binary::BinaryCodec;
use crate::error::{Error, Result};
use crate::json::JsonCodec;
use crate::text::TextCodec;
use proto_types::{ProtoMessage, ProtoMessageDescriptor, ProtoSchema};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// A message wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// Protobuf binary wire format
    Binary,
    /// Proto3 JSON mapping
    Json,
    /// Protobuf text format
    Text,
}

impl Encoding {
    pub const ALL: [Encoding; 3] = [Encoding::Binary, Encoding::Json, Encoding::Text];

    pub fn as_str(&self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Json => "json",
            Encoding::Text => "text",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Encoding {
    type Err = Error;

    /// Identifiers are case-sensitive; `proto` is accepted for `binary`.
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "binary" | "proto" => Ok(Encoding::Binary),
            "json" => Ok(Encoding::Json),
            "text" => Ok(Encoding::Text),
            other => Err(Error::UnknownEncoding(other.to_string())),
        }
    }
}

/// Decodes and encodes dynamic messages against one schema.
#[derive(Debug, Clone)]
pub struct ProtoCodec {
    schema: Arc<ProtoSchema>,
}

impl ProtoCodec {
    pub fn new(schema: Arc<ProtoSchema>) -> Self {
        Self { schema }
    }

    pub fn schema(&self) -> &ProtoSchema {
        &self.schema
    }

    /// Resolve a message type by fully qualified or unique simple name.
    pub fn find_message(&self, name: &str) -> Result<Arc<ProtoMessageDescriptor>> {
        Ok(self.schema.find_message(name)?)
    }

    /// Decode one frame and check that required fields are present.
    pub fn decode(
        &self,
        descriptor: &Arc<ProtoMessageDescriptor>,
        data: &[u8],
        encoding: Encoding,
    ) -> Result<ProtoMessage> {
        let message = match encoding {
            Encoding::Binary => BinaryCodec::new(&self.schema).decode(descriptor, data)?,
            Encoding::Json => JsonCodec::new(&self.schema).decode(descriptor, data)?,
            Encoding::Text => TextCodec::new(&self.schema).decode(descriptor, data)?,
        };
        message.check_initialized()?;
        Ok(message)
    }

    pub fn encode(&self, message: &ProtoMessage, encoding: Encoding) -> Result<Vec<u8>> {
        match encoding {
            Encoding::Binary => BinaryCodec::new(&self.schema).encode(message),
            Encoding::Json => JsonCodec::new(&self.schema).encode(message),
            Encoding::Text => TextCodec::new(&self.schema).encode(message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{legacy_schema, user_schema};

    fn codec() -> (ProtoCodec, Arc<ProtoMessageDescriptor>) {
        let codec = ProtoCodec::new(Arc::new(user_schema()));
        let descriptor = codec.find_message("test.v1.User").expect("User not found");
        (codec, descriptor)
    }

    #[test]
    fn test_encoding_identifiers() {
        assert_eq!("binary".parse::<Encoding>().unwrap(), Encoding::Binary);
        assert_eq!("proto".parse::<Encoding>().unwrap(), Encoding::Binary);
        assert_eq!("json".parse::<Encoding>().unwrap(), Encoding::Json);
        assert_eq!("text".parse::<Encoding>().unwrap(), Encoding::Text);
        assert!(matches!(
            "JSON".parse::<Encoding>(),
            Err(Error::UnknownEncoding(name)) if name == "JSON"
        ));
        assert!("yaml".parse::<Encoding>().is_err());
        for encoding in Encoding::ALL {
            assert_eq!(encoding.to_string().parse::<Encoding>().unwrap(), encoding);
        }
    }

    #[test]
    fn test_decode_is_equal_across_encodings() {
        let (codec, descriptor) = codec();
        let json = br#"{"name":"Ada","age":30,"tags":["x"],"address":{"city":"Paris"},"counts":{"k":1},"status":"STATUS_ACTIVE"}"#;
        let text = br#"name: "Ada" age: 30 tags: "x" address { city: "Paris" } counts { key: "k" value: 1 } status: STATUS_ACTIVE"#;

        let from_json = codec
            .decode(&descriptor, json, Encoding::Json)
            .expect("json decode failed");
        let from_text = codec
            .decode(&descriptor, text, Encoding::Text)
            .expect("text decode failed");
        assert_eq!(from_json, from_text);

        let binary = codec
            .encode(&from_json, Encoding::Binary)
            .expect("binary encode failed");
        let from_binary = codec
            .decode(&descriptor, &binary, Encoding::Binary)
            .expect("binary decode failed");
        assert_eq!(from_binary, from_json);
    }

    #[test]
    fn test_round_trip_every_encoding() {
        let (codec, descriptor) = codec();
        let json = br#"{"name":"Ada","id":"12","score":1.5,"avatar":"AAE=","previous":[{"street":"a"}],"sites":{"1":{}},"phone":"555","luckyNumbers":[0,-3]}"#;
        let message = codec
            .decode(&descriptor, json, Encoding::Json)
            .expect("decode failed");

        for encoding in Encoding::ALL {
            let bytes = codec.encode(&message, encoding).expect("encode failed");
            let decoded = codec
                .decode(&descriptor, &bytes, encoding)
                .expect("decode failed");
            assert_eq!(decoded, message, "round trip through {encoding}");
        }
    }

    #[test]
    fn test_decode_checks_required_fields() {
        let codec = ProtoCodec::new(Arc::new(legacy_schema()));
        let descriptor = codec.find_message("Record").expect("Record not found");
        let err = codec
            .decode(&descriptor, br#"{"note":"x"}"#, Encoding::Json)
            .unwrap_err();
        assert!(err.to_string().contains("legacy.Record.id"));
        assert!(codec
            .decode(&descriptor, br#"{"id":"1"}"#, Encoding::Json)
            .is_ok());
    }

    #[test]
    fn test_find_message_errors() {
        let (codec, _) = codec();
        assert!(codec.find_message("Missing").is_err());
        assert!(codec.find_message("other.User").is_err());
    }
}
