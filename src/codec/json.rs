//! JSON codec using `serde_json`.

use crate::error::Result;

/// JSON codec. Trailing whitespace (a newline from `nc`) is accepted.
pub struct JsonCodec;

impl JsonCodec {
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}
