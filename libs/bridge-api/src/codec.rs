use serde_json::Value;

use crate::error::BrokerError;

/// Wire-codec: application value → broker bytes.
pub trait Serializer: Send + Sync {
    fn serialize(&self, topic: &str, value: &Value) -> Result<Vec<u8>, BrokerError>;
}

/// Wire-codec: broker bytes → application value.
pub trait Deserializer: Send + Sync {
    fn deserialize(&self, topic: &str, data: &[u8]) -> Result<Value, BrokerError>;
}

// ---------------------------------------------------------------------------
// Built-in codecs. Registered under the identifiers "json", "string"
// and "f64" — anything else comes from the application at startup.
// ---------------------------------------------------------------------------

/// JSON text codec.
pub struct JsonCodec;

impl Serializer for JsonCodec {
    fn serialize(&self, _topic: &str, value: &Value) -> Result<Vec<u8>, BrokerError> {
        Ok(serde_json::to_vec(value)?)
    }
}

impl Deserializer for JsonCodec {
    fn deserialize(&self, _topic: &str, data: &[u8]) -> Result<Value, BrokerError> {
        let s = std::str::from_utf8(data)?;
        Ok(serde_json::from_str(s)?)
    }
}

/// Plain UTF-8 string codec. Non-string values serialize via their
/// JSON rendering.
pub struct StringCodec;

impl Serializer for StringCodec {
    fn serialize(&self, _topic: &str, value: &Value) -> Result<Vec<u8>, BrokerError> {
        match value {
            Value::String(s) => Ok(s.clone().into_bytes()),
            other => Ok(other.to_string().into_bytes()),
        }
    }
}

impl Deserializer for StringCodec {
    fn deserialize(&self, _topic: &str, data: &[u8]) -> Result<Value, BrokerError> {
        Ok(Value::String(String::from_utf8(data.to_vec())?))
    }
}

/// Big-endian IEEE-754 double codec (8 bytes on the wire).
pub struct F64Codec;

impl Serializer for F64Codec {
    fn serialize(&self, _topic: &str, value: &Value) -> Result<Vec<u8>, BrokerError> {
        let n = value
            .as_f64()
            .ok_or_else(|| BrokerError::decode(format!("f64 codec: not a number: {value}")))?;
        Ok(n.to_be_bytes().to_vec())
    }
}

impl Deserializer for F64Codec {
    fn deserialize(&self, _topic: &str, data: &[u8]) -> Result<Value, BrokerError> {
        let bytes: [u8; 8] = data
            .try_into()
            .map_err(|_| BrokerError::decode(format!("f64 codec: expected 8 bytes, got {}", data.len())))?;
        let n = f64::from_be_bytes(bytes);
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .ok_or_else(|| BrokerError::decode(format!("f64 codec: non-finite value {n}")))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn json_round_trip() {
        let value = json!({"symbol": "EURUSD", "bid": 1.08});
        let bytes = JsonCodec.serialize("t", &value).unwrap();
        assert_eq!(JsonCodec.deserialize("t", &bytes).unwrap(), value);
    }

    #[test]
    fn json_rejects_f64_wire_bytes() {
        // The classic mismatch: a double-encoded field read by the JSON codec.
        let bytes = F64Codec.serialize("t", &json!(698745231.56)).unwrap();
        let err = JsonCodec.deserialize("t", &bytes).unwrap_err();
        assert_eq!(err.kind, ErrorKind::Decode);
    }

    #[test]
    fn string_decodes_raw_utf8() {
        assert_eq!(
            StringCodec.deserialize("t", b"hello").unwrap(),
            Value::String("hello".into())
        );
    }

    #[test]
    fn f64_rejects_short_input() {
        let err = F64Codec.deserialize("t", b"abc").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Decode);
    }
}
