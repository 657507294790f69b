//! Tagged JSON values used by the primary ledger's script API
//!
//! Values travel as `{"type": .., "value": ..}` trees. Script sources and
//! arguments are sent base64 encoded, and the response body is a JSON string
//! holding the base64 encoding of one tagged value.

use crate::{Result, RuntimeError};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

/// Closed set of value kinds understood by the runtime.
///
/// Unknown `type` tags fail to decode instead of being passed through.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum TaggedValue {
    Struct(CompositeValue),
    Array(Vec<TaggedValue>),
    /// `None` is absence, not an error
    Optional(Option<Box<TaggedValue>>),
    Dictionary(Vec<DictionaryEntry>),
    String(String),
    /// Fixed point decimal carried as a string, e.g. `"12.50000000"`
    UFix64(String),
    Address(String),
    Bool(bool),
    Int(String),
    UInt64(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeValue {
    #[serde(default)]
    pub id: String,
    pub fields: Vec<CompositeField>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeField {
    pub name: String,
    pub value: TaggedValue,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DictionaryEntry {
    pub key: TaggedValue,
    pub value: TaggedValue,
}

impl TaggedValue {
    pub fn string(value: impl Into<String>) -> Self {
        TaggedValue::String(value.into())
    }

    pub fn address(value: impl Into<String>) -> Self {
        TaggedValue::Address(value.into())
    }

    pub fn optional(value: Option<TaggedValue>) -> Self {
        TaggedValue::Optional(value.map(Box::new))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            TaggedValue::Struct(_) => "Struct",
            TaggedValue::Array(_) => "Array",
            TaggedValue::Optional(_) => "Optional",
            TaggedValue::Dictionary(_) => "Dictionary",
            TaggedValue::String(_) => "String",
            TaggedValue::UFix64(_) => "UFix64",
            TaggedValue::Address(_) => "Address",
            TaggedValue::Bool(_) => "Bool",
            TaggedValue::Int(_) => "Int",
            TaggedValue::UInt64(_) => "UInt64",
        }
    }

    pub fn as_array(&self) -> Option<&[TaggedValue]> {
        match self {
            TaggedValue::Array(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&CompositeValue> {
        match self {
            TaggedValue::Struct(composite) => Some(composite),
            _ => None,
        }
    }

    /// Text payload of string-carrying primitives
    pub fn as_text(&self) -> Option<&str> {
        match self {
            TaggedValue::String(s)
            | TaggedValue::UFix64(s)
            | TaggedValue::Address(s)
            | TaggedValue::Int(s)
            | TaggedValue::UInt64(s) => Some(s),
            _ => None,
        }
    }
}

/// Transport encoding of script source text
pub fn encode_script(source: &str) -> String {
    STANDARD.encode(source.as_bytes())
}

/// Transport encoding of a single call argument
pub fn encode_argument(arg: &TaggedValue) -> Result<String> {
    let json = serde_json::to_vec(arg)?;
    Ok(STANDARD.encode(json))
}

/// Decode a successful script-execution response body.
pub fn decode_response(body: &str) -> Result<TaggedValue> {
    let trimmed = body.trim();

    let encoded = if trimmed.starts_with('"') {
        serde_json::from_str::<String>(trimmed)
            .map_err(|e| RuntimeError::decode(format!("malformed response string: {e}"), body))?
    } else if trimmed.starts_with('{') {
        // An object here is an error envelope, never a value
        let message = serde_json::from_str::<serde_json::Value>(trimmed)
            .ok()
            .and_then(|v| v.get("message").and_then(|m| m.as_str()).map(str::to_owned))
            .unwrap_or_else(|| "unexpected JSON object".to_string());
        return Err(RuntimeError::decode(
            format!("error envelope: {message}"),
            body,
        ));
    } else {
        trimmed.to_string()
    };

    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| RuntimeError::decode(format!("invalid base64: {e}"), body))?;
    let text = String::from_utf8(bytes)
        .map_err(|e| RuntimeError::decode(format!("invalid utf-8: {e}"), body))?;

    decode_value(&text)
}

/// Decode one tagged value from its JSON text.
pub fn decode_value(text: &str) -> Result<TaggedValue> {
    serde_json::from_str(text).map_err(|e| RuntimeError::decode(e.to_string(), text))
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCORES_JSON: &str = r#"{"type":"Array","value":[
        {"type":"Struct","value":{"id":"A.4fae0a028f1057ae.Leaderboard.ScoreRecord","fields":[
            {"name":"participant","value":{"type":"String","value":"alice"}},
            {"name":"score","value":{"type":"UFix64","value":"12.50000000"}}]}}
    ]}"#;

    fn quoted_base64(json: &str) -> String {
        format!("\"{}\"\n", STANDARD.encode(json))
    }

    #[test]
    fn test_decode_quoted_base64_body() {
        let value = decode_response(&quoted_base64(SCORES_JSON)).unwrap();

        let items = value.as_array().expect("array");
        assert_eq!(items.len(), 1);
        let record = items[0].as_struct().expect("struct");
        assert_eq!(record.fields[0].value.as_text(), Some("alice"));
        assert_eq!(record.fields[1].value, TaggedValue::UFix64("12.50000000".into()));
    }

    #[test]
    fn test_decode_bare_base64_body() {
        let body = STANDARD.encode(r#"{"type":"Bool","value":true}"#);
        assert_eq!(decode_response(&body).unwrap(), TaggedValue::Bool(true));
    }

    #[test]
    fn test_optional_null_is_absence() {
        let value = decode_value(r#"{"type":"Optional","value":null}"#).unwrap();
        assert_eq!(value, TaggedValue::Optional(None));

        let value = decode_value(r#"{"type":"Optional","value":{"type":"String","value":"week1"}}"#)
            .unwrap();
        assert_eq!(value, TaggedValue::optional(Some(TaggedValue::string("week1"))));
    }

    #[test]
    fn test_unknown_tag_rejected() {
        let err = decode_value(r#"{"type":"Path","value":{"domain":"storage"}}"#).unwrap_err();
        assert!(matches!(err, RuntimeError::Decode { .. }));
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = decode_value(r#"{"type":"Array","value":"not-an-array"}"#).unwrap_err();
        assert!(matches!(err, RuntimeError::Decode { .. }));
    }

    #[test]
    fn test_error_envelope_rejected() {
        let err = decode_response(r#"{"code":400,"message":"script failed"}"#).unwrap_err();
        match err {
            RuntimeError::Decode { reason, raw } => {
                assert!(reason.contains("script failed"));
                assert!(raw.contains("400"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_garbage_body_rejected() {
        assert!(decode_response("%%% not base64 %%%").is_err());
    }

    #[test]
    fn test_encode_argument_matches_wire_shape() {
        let encoded = encode_argument(&TaggedValue::optional(None)).unwrap();
        let decoded = STANDARD.decode(encoded).unwrap();
        assert_eq!(decoded, br#"{"type":"Optional","value":null}"#);

        let encoded = encode_argument(&TaggedValue::address("0xe647591c05619dba")).unwrap();
        let decoded = String::from_utf8(STANDARD.decode(encoded).unwrap()).unwrap();
        assert_eq!(decoded, r#"{"type":"Address","value":"0xe647591c05619dba"}"#);
    }

    #[test]
    fn test_encode_script_is_utf8_safe() {
        let source = "// ünïcode\naccess(all) fun main(): Int { return 1 }";
        let decoded = STANDARD.decode(encode_script(source)).unwrap();
        assert_eq!(String::from_utf8(decoded).unwrap(), source);
    }
}
