//! MessagePack codec for typed netstring payloads.
//!
//! Structs are encoded with `rmp_serde::to_vec_named`, i.e. as maps keyed by
//! field name rather than positional arrays, so peers in other languages can
//! decode them without knowing the field order.
//!
//! # Example
//!
//! ```
//! use bufsock::codec::MsgPackCodec;
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Ping {
//!     seq: u32,
//! }
//!
//! let encoded = MsgPackCodec::encode(&Ping { seq: 7 }).unwrap();
//! let decoded: Ping = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, Ping { seq: 7 });
//! ```

use bytes::Bytes;

use crate::error::Result;

/// MessagePack codec (struct-as-map encoding).
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MessagePack.
    ///
    /// # Errors
    ///
    /// [`SocketError::MsgPackEncode`](crate::SocketError::MsgPackEncode) if
    /// the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize>(value: &T) -> Result<Bytes> {
        Ok(Bytes::from(rmp_serde::to_vec_named(value)?))
    }

    /// Decode MessagePack bytes into a value.
    ///
    /// # Errors
    ///
    /// [`SocketError::MsgPackDecode`](crate::SocketError::MsgPackDecode) if
    /// the bytes do not describe a `T`.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
