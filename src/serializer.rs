//! Value ↔ byte-string codecs.
//!
//! Every byte that reaches a storage backend passes through exactly one of
//! these codecs; the manager picks one at construction and never switches
//! per call.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{CacheError, CacheResult};

/// The serialization format used by a cache.
///
/// # Variants
///
/// * `Json` - Human-readable structured text. Rejects values that JSON
///   cannot represent.
/// * `Bincode` - Native binary encoding of arbitrary serde object graphs.
///   Opaque and compact, not self-describing.
/// * `Packed` - Bincode followed by deflate compression. Suited to large
///   records where the extra CPU is paid back in storage and transfer size.
/// * `Text` - Identity on strings. Any non-string value is rejected with a
///   serialization error.
///
/// # Examples
///
/// ```
/// use fn_cache::SerializerKind;
///
/// let codec = SerializerKind::Json;
/// let bytes = codec.encode(&vec![1, 2, 3]).unwrap();
/// let back: Vec<i32> = codec.decode(&bytes).unwrap();
/// assert_eq!(back, vec![1, 2, 3]);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SerializerKind {
    Json,
    Bincode,
    Packed,
    Text,
}

impl Default for SerializerKind {
    fn default() -> Self {
        SerializerKind::Json
    }
}

impl SerializerKind {
    /// Encodes a value into the byte form stored by the backend.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] when the value is outside the
    /// codec's domain (e.g. a struct under `Text`, or a value JSON cannot
    /// express under `Json`).
    pub fn encode<T: Serialize>(&self, value: &T) -> CacheResult<Vec<u8>> {
        match self {
            SerializerKind::Json => Ok(serde_json::to_vec(value)?),
            SerializerKind::Bincode => Ok(bincode::serialize(value)?),
            SerializerKind::Packed => {
                let raw = bincode::serialize(value)?;
                let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
                encoder.write_all(&raw)?;
                Ok(encoder.finish()?)
            }
            SerializerKind::Text => match serde_json::to_value(value)? {
                serde_json::Value::String(s) => Ok(s.into_bytes()),
                other => Err(CacheError::Serialization(format!(
                    "text serializer requires a string value, got {}",
                    json_kind(&other)
                ))),
            },
        }
    }

    /// Decodes bytes previously produced by [`encode`](Self::encode).
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Serialization`] when the bytes are corrupt or
    /// were written by a different codec.
    pub fn decode<T: DeserializeOwned>(&self, bytes: &[u8]) -> CacheResult<T> {
        match self {
            SerializerKind::Json => Ok(serde_json::from_slice(bytes)?),
            SerializerKind::Bincode => Ok(bincode::deserialize(bytes)?),
            SerializerKind::Packed => {
                let mut decoder = GzDecoder::new(bytes);
                let mut raw = Vec::new();
                decoder.read_to_end(&mut raw)?;
                Ok(bincode::deserialize(&raw)?)
            }
            SerializerKind::Text => {
                let s = String::from_utf8(bytes.to_vec())
                    .map_err(|e| CacheError::Serialization(e.to_string()))?;
                Ok(serde_json::from_value(serde_json::Value::String(s))?)
            }
        }
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
