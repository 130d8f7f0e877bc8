//! Codec module - serialization for messages crossing the worker boundary.
//!
//! Everything posted to or from the isolated decode worker is a byte
//! buffer produced by [`MsgPackCodec`]. Nothing else is shared between the
//! two sides, so a frame handed to the worker is a copy, never a borrow.
//!
//! # Example
//!
//! ```
//! use qrscan::codec::MsgPackCodec;
//!
//! let encoded = MsgPackCodec::encode(&"hello").unwrap();
//! let decoded: String = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//! ```

mod msgpack;

pub use msgpack::MsgPackCodec;
