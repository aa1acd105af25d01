//! CBOR codec for frame payloads.

use bytes::Bytes;
use serde::{Serialize, de::DeserializeOwned};

use crate::error::{CodecError, Result};

/// Encode a value into CBOR bytes.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode<T: Serialize + ?Sized>(msg: &T) -> Result<Bytes> {
    let mut vec = Vec::new();
    ciborium::ser::into_writer(msg, &mut vec).map_err(CodecError::from)?;
    Ok(Bytes::from(vec))
}

/// Decode CBOR bytes into a value.
///
/// # Errors
///
/// Returns an error if the data is invalid or does not match `T`.
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> Result<T> {
    ciborium::de::from_reader(data)
        .map_err(CodecError::from)
        .map_err(Into::into)
}

/// Encode an optional final value. `None` becomes an empty payload.
///
/// # Errors
///
/// Returns an error if the value cannot be serialized.
pub fn encode_optional<T: Serialize>(value: Option<&T>) -> Result<Bytes> {
    value.map_or_else(|| Ok(Bytes::new()), encode)
}

/// Decode a payload that may be empty. An empty payload decodes to `None`.
///
/// # Errors
///
/// Returns an error if a non-empty payload does not match `T`.
pub fn decode_optional<T: DeserializeOwned>(data: &[u8]) -> Result<Option<T>> {
    if data.is_empty() {
        return Ok(None);
    }
    decode(data).map(Some)
}
