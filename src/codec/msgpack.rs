//! MsgPack codec using `rmp-serde`.
//!
//! Always `to_vec_named`, never `to_vec`: clients decode replies by field
//! name, and `to_vec` would write structs as positional arrays.

use crate::error::Result;

/// MessagePack codec for remote datagrams.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value with structs as maps.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
