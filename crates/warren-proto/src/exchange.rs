use std::collections::BTreeMap;

use ciborium::value::Value;
use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Cell-store commands the c2 sends to agents running the exchange module.
/// Executed in the order: set, get, dump, prune.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeRequest {
    /// Cells to write and the values to write.
    #[serde(default)]
    pub set: BTreeMap<String, Value>,

    /// Cells to read back.
    #[serde(default)]
    pub get: Vec<String>,

    /// Whether to return the full contents of the store.
    #[serde(default)]
    pub dump: bool,

    /// Whether to drop null cells.
    #[serde(default)]
    pub prune: bool,
}

/// Result of the executed cell commands.
#[derive(Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExchangeResponse {
    /// The cells that have been written.
    pub set: Vec<String>,

    /// The contents of the requested cells, mapped to their names.
    /// Missing cells are omitted.
    pub get: BTreeMap<String, Value>,

    /// The full contents of the store, if requested.
    pub dump: Option<BTreeMap<String, Value>>,

    /// How many cells have been pruned.
    pub pruned: u64,
}

impl ExchangeRequest {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }
}

impl ExchangeResponse {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CodecError> {
        encode(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        decode(bytes)
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::new();
    ciborium::into_writer(value, &mut out).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(out)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    ciborium::from_reader(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips() {
        let request = ExchangeRequest {
            set: BTreeMap::from([("w.level".to_string(), Value::Integer(3.into()))]),
            get: vec!["w.level".into()],
            dump: true,
            prune: false,
        };
        let decoded = ExchangeRequest::from_bytes(&request.to_bytes().unwrap()).unwrap();
        assert_eq!(request, decoded);
    }

    #[test]
    fn missing_fields_default() {
        // An empty CBOR map is a valid, all-default request.
        let empty = Value::Map(Vec::new());
        let mut bytes = Vec::new();
        ciborium::into_writer(&empty, &mut bytes).unwrap();

        let request = ExchangeRequest::from_bytes(&bytes).unwrap();
        assert_eq!(request, ExchangeRequest::default());
    }

    #[test]
    fn garbage_is_a_decode_error() {
        let err = ExchangeResponse::from_bytes(b"\xff\xff").unwrap_err();
        assert!(err.is_malformed());
    }
}
