//! Pluggable envelope serialization.
//!
//! The protocol layer only needs `serialize(T) -> bytes` and
//! `deserialize(bytes) -> T`. CBOR is the default wire format; JSON is
//! available for debugging and for servers that only speak JSON.

use crate::error::{CodecError, CodecResult};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Serializes and deserializes protocol envelopes.
pub trait SyncSerializer: Send + Sync {
    /// MIME type sent as the request content type.
    fn content_type(&self) -> &'static str;

    /// Serializes a value to bytes.
    fn serialize<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>>;

    /// Deserializes a value from bytes.
    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T>;
}

/// CBOR serializer backed by `ciborium`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CborSerializer;

impl SyncSerializer for CborSerializer {
    fn content_type(&self) -> &'static str {
        "application/cbor"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::into_writer(value, &mut bytes)
            .map_err(|e| CodecError::encoding_failed(e.to_string()))?;
        Ok(bytes)
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        ciborium::from_reader(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

/// JSON serializer backed by `serde_json`.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl SyncSerializer for JsonSerializer {
    fn content_type(&self) -> &'static str {
        "application/json"
    }

    fn serialize<T: Serialize>(&self, value: &T) -> CodecResult<Vec<u8>> {
        serde_json::to_vec(value).map_err(|e| CodecError::encoding_failed(e.to_string()))
    }

    fn deserialize<T: DeserializeOwned>(&self, bytes: &[u8]) -> CodecResult<T> {
        serde_json::from_slice(bytes).map_err(|e| CodecError::decoding_failed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::SyncContext;
    use crate::messages::{HttpStep, SendChangesResponse};
    use crate::rows::{ContainerSet, ContainerTable, FieldValue, SyncRow};

    fn response() -> SendChangesResponse {
        let mut response =
            SendChangesResponse::new(SyncContext::new("default"), HttpStep::GetMoreChanges);
        response.changes = Some(ContainerSet::new().with_table(
            ContainerTable::new("Customer", None).with_row(SyncRow::modified(vec![
                FieldValue::Integer(1),
                FieldValue::Double(2.5),
                FieldValue::Bytes(vec![0xde, 0xad]),
                FieldValue::Null,
            ])),
        ));
        response.batch_count = 1;
        response.is_last_batch = true;
        response.remote_clients_timestamp = 1_700;
        response
    }

    #[test]
    fn cbor_envelope_survives_the_wire() {
        let codec = CborSerializer;
        let bytes = codec.serialize(&response()).unwrap();
        let decoded: SendChangesResponse = codec.deserialize(&bytes).unwrap();
        assert_eq!(decoded, response());
    }

    #[test]
    fn json_envelope_survives_the_wire() {
        let codec = JsonSerializer;
        let bytes = codec.serialize(&response()).unwrap();
        let decoded: SendChangesResponse = codec.deserialize(&bytes).unwrap();
        assert_eq!(decoded, response());
    }

    #[test]
    fn null_body_decodes_as_none() {
        let codec = CborSerializer;
        let bytes = codec.serialize(&Option::<SendChangesResponse>::None).unwrap();
        let decoded: Option<SendChangesResponse> = codec.deserialize(&bytes).unwrap();
        assert!(decoded.is_none());
    }

    #[test]
    fn garbage_is_a_decoding_error() {
        let result: CodecResult<SendChangesResponse> = JsonSerializer.deserialize(b"{not json");
        assert!(matches!(result, Err(CodecError::DecodingFailed { .. })));
    }
}
