//! MsgPack codec using `rmp-serde`.
//!
//! Always `to_vec_named`: envelopes must keep the `{ id, content: { type,
//! data } }` map shape so both ends agree on field names rather than field
//! order.

use crate::error::Result;

/// MessagePack codec for envelopes.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Probe {
        id: String,
        width: u32,
    }

    #[test]
    fn test_structs_encode_as_maps() {
        let probe = Probe {
            id: "abc".to_string(),
            width: 640,
        };

        let encoded = MsgPackCodec::encode(&probe).unwrap();

        // 0x82 = fixmap with 2 entries; positional encoding would be 0x92
        assert_eq!(encoded[0], 0x82, "Expected fixmap, got {:02X}", encoded[0]);

        let decoded: Probe = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, probe);
    }

    #[test]
    fn test_pixel_bytes_encode_as_bin() {
        let pixels = Bytes::from_static(&[0, 128, 255, 7]);
        let encoded = MsgPackCodec::encode(&pixels).unwrap();

        // bin8 keeps pixel data compact instead of an array of integers
        assert_eq!(encoded[0], 0xc4);
        assert_eq!(encoded[1], 4);

        let decoded: Bytes = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, pixels);
    }

    #[test]
    fn test_none_is_nil() {
        let val: Option<Probe> = None;
        let encoded = MsgPackCodec::encode(&val).unwrap();
        assert_eq!(encoded, vec![0xc0]);

        let decoded: Option<Probe> = MsgPackCodec::decode(&encoded).unwrap();
        assert_eq!(decoded, None);
    }

    #[test]
    fn test_decode_error_on_invalid_data() {
        let result: Result<Probe> = MsgPackCodec::decode(b"definitely not msgpack");
        assert!(result.is_err());
    }

    #[test]
    fn test_decode_error_on_wrong_shape() {
        let encoded = MsgPackCodec::encode(&vec![1u8, 2, 3]).unwrap();
        let result: Result<Probe> = MsgPackCodec::decode(&encoded);
        assert!(result.is_err());
    }
}
