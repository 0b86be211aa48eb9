//! Codec module - serialization for remote command datagrams.
//!
//! - [`JsonCodec`] - JSON using `serde_json`
//! - [`MsgPackCodec`] - MessagePack using `rmp-serde` (structs as maps)
//!
//! [`WireCodec`] picks one at runtime, from configuration.
//!
//! # Example
//!
//! ```
//! use insteon_gateway::codec::{MsgPackCodec, WireCodec};
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! let json = WireCodec::Json.encode(&[1, 2, 3]).unwrap();
//! assert_eq!(json, b"[1,2,3]");
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Codec selected by name in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireCodec {
    #[default]
    Json,
    #[serde(alias = "messagepack")]
    MsgPack,
}

impl WireCodec {
    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            WireCodec::Json => JsonCodec::encode(value),
            WireCodec::MsgPack => MsgPackCodec::encode(value),
        }
    }

    pub fn decode<T: serde::de::DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            WireCodec::Json => JsonCodec::decode(bytes),
            WireCodec::MsgPack => MsgPackCodec::decode(bytes),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codec_names() {
        #[derive(Deserialize)]
        struct Section {
            codec: WireCodec,
        }
        let json: Section = toml::from_str("codec = \"json\"").unwrap();
        assert_eq!(json.codec, WireCodec::Json);
        let msgpack: Section = toml::from_str("codec = \"msgpack\"").unwrap();
        assert_eq!(msgpack.codec, WireCodec::MsgPack);
        assert!(toml::from_str::<Section>("codec = \"xml\"").is_err());
    }

    #[test]
    fn test_dispatch_matches_codec() {
        let value = vec!["on", "off"];
        assert_eq!(
            WireCodec::MsgPack.encode(&value).unwrap(),
            MsgPackCodec::encode(&value).unwrap()
        );
        let back: Vec<String> = WireCodec::Json
            .decode(&WireCodec::Json.encode(&value).unwrap())
            .unwrap();
        assert_eq!(back, value);
    }
}
