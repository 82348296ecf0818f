//! Payload codec.
//!
//! Payloads travel as canonical JSON bytes; attributes travel beside them as a
//! plain string map and are never part of the encoded body.

use crate::{PubSubError, Result};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// JSON codec for message payloads
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JsonCodec;

impl JsonCodec {
    /// Serialize a payload into bytes
    pub fn encode<T: Serialize + ?Sized>(payload: &T) -> Result<Vec<u8>> {
        serde_json::to_vec(payload).map_err(PubSubError::encoding)
    }

    /// Deserialize bytes produced by [`JsonCodec::encode`]
    pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        serde_json::from_slice(bytes).map_err(PubSubError::decoding)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde::Deserialize;
    use serde_json::{Value, json};
    use std::collections::HashMap;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Invoice {
        id: u64,
        kind: String,
        lines: Vec<String>,
        discount: Option<f64>,
    }

    #[test]
    fn test_encode_is_plain_json() {
        let fixture = json!({"message": "test with filter"});
        let actual = JsonCodec::encode(&fixture).unwrap();
        let expected = br#"{"message":"test with filter"}"#.to_vec();
        assert_eq!(actual, expected);
    }

    #[test]
    fn test_struct_round_trip() {
        let fixture = Invoice {
            id: 1,
            kind: "invoice".to_string(),
            lines: vec!["a".to_string(), "b".to_string()],
            discount: None,
        };
        let bytes = JsonCodec::encode(&fixture).unwrap();
        let actual: Invoice = JsonCodec::decode(&bytes).unwrap();
        assert_eq!(actual, fixture);
    }

    #[test]
    fn test_string_payload_round_trip() {
        let fixture = "plain string payload";
        let bytes = JsonCodec::encode(fixture).unwrap();
        let actual: String = JsonCodec::decode(&bytes).unwrap();
        assert_eq!(actual, fixture);
    }

    #[test]
    fn test_encode_rejects_non_string_map_keys() {
        let mut fixture = HashMap::new();
        fixture.insert((1, 2), "tuple keys are not representable");

        let actual = JsonCodec::encode(&fixture);
        assert!(matches!(actual, Err(PubSubError::Encoding { .. })));
    }

    #[test]
    fn test_decode_rejects_malformed_bytes() {
        let actual = JsonCodec::decode::<Value>(b"{not json");
        assert!(matches!(actual, Err(PubSubError::Decoding { .. })));
    }

    #[test]
    fn test_decode_rejects_wrong_shape() {
        let bytes = JsonCodec::encode(&json!({"id": "not-a-number"})).unwrap();
        let actual = JsonCodec::decode::<Invoice>(&bytes);
        assert!(matches!(actual, Err(PubSubError::Decoding { .. })));
    }

    fn json_value() -> impl Strategy<Value = Value> {
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(Value::from),
            any::<u64>().prop_map(Value::from),
            ".*".prop_map(Value::String),
        ];
        leaf.prop_recursive(4, 64, 8, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..8).prop_map(Value::Array),
                prop::collection::btree_map(".*", inner, 0..8)
                    .prop_map(|entries| Value::Object(entries.into_iter().collect())),
            ]
        })
    }

    proptest! {
        #[test]
        fn test_any_json_value_round_trips(fixture in json_value()) {
            let bytes = JsonCodec::encode(&fixture).unwrap();
            let actual: Value = JsonCodec::decode(&bytes).unwrap();
            prop_assert_eq!(actual, fixture);
        }
    }
}
