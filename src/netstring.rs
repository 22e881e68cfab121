//! Netstring framing over a [`BufferedSocket`].
//!
//! A netstring is `<length>:<payload>,` where `<length>` is the payload size
//! in ASCII decimal. `b"hello"` travels as `5:hello,`.
//!
//! # Reading
//!
//! 1. Read up to `:`, searching at most `decimal_digit_count(max) + 1` bytes
//! 2. Parse the length and reject it if it exceeds `max_message_size`
//! 3. Read exactly `length` payload bytes
//! 4. Read one byte and require it to be `,`
//!
//! Each step uses the framer's timeout on its own. After any framing error
//! the stream is no longer aligned with the peer; close the connection.
//!
//! # Example
//!
//! ```
//! use bufsock::transport::ScriptedTransport;
//! use bufsock::NetstringSocket;
//!
//! let framer = NetstringSocket::new(ScriptedTransport::new().chunk("5:hello,0:,"));
//!
//! assert_eq!(&framer.read().unwrap()[..], b"hello");
//! assert!(framer.read().unwrap().is_empty());
//!
//! framer.write(b"ok").unwrap();
//! assert_eq!(framer.get_ref().get_ref().sent(), b"2:ok,");
//! ```

use std::fmt;
use std::net::Shutdown;

use bytes::{Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::buffered::BufferedSocket;
use crate::codec::MsgPackCodec;
use crate::config::{NetstringConfig, DEFAULT_MAX_MESSAGE_SIZE};
use crate::error::{Result, SocketError};
use crate::sync::{LockPolicy, Threaded};
use crate::timeout::{MaxSize, Timeout};
use crate::transport::Transport;

/// Number of decimal digits needed to write `n`.
///
/// ```
/// use bufsock::netstring::decimal_digit_count;
///
/// assert_eq!(decimal_digit_count(0), 1);
/// assert_eq!(decimal_digit_count(32768), 5);
/// ```
#[inline]
pub fn decimal_digit_count(n: usize) -> usize {
    n.checked_ilog10().map_or(1, |log| log as usize + 1)
}

/// Frame `payload` as a netstring.
pub fn encode_netstring(payload: &[u8]) -> Bytes {
    let len = payload.len().to_string();
    let mut frame = BytesMut::with_capacity(len.len() + payload.len() + 2);
    frame.extend_from_slice(len.as_bytes());
    frame.extend_from_slice(b":");
    frame.extend_from_slice(payload);
    frame.extend_from_slice(b",");
    frame.freeze()
}

/// Parse a netstring length prefix (without the `:`).
///
/// Accepts one or more ASCII digits, leading zeros included. Values beyond
/// `u64::MAX` saturate, which any size limit then rejects.
///
/// # Errors
///
/// [`SocketError::NetstringInvalidSize`] for an empty prefix or any
/// non-digit byte (signs and whitespace included).
pub fn parse_size(prefix: &[u8]) -> Result<u64> {
    if prefix.is_empty() || !prefix.iter().all(u8::is_ascii_digit) {
        return Err(SocketError::NetstringInvalidSize {
            prefix: Bytes::copy_from_slice(prefix),
        });
    }
    Ok(prefix.iter().fold(0u64, |acc, digit| {
        acc.saturating_mul(10)
            .saturating_add(u64::from(digit - b'0'))
    }))
}

/// Longest prefix (digits plus `:`) that can announce at most `max_message_size`.
#[inline]
fn prefix_limit(max_message_size: usize) -> usize {
    decimal_digit_count(max_message_size) + 1
}

/// Netstring framer owning a [`BufferedSocket`].
///
/// The framer holds no lock across the steps of a read or write. Two threads
/// calling [`read`](Self::read) at once will interleave fragments of
/// different messages; give each direction a single caller.
pub struct NetstringSocket<T, P: LockPolicy = Threaded> {
    socket: BufferedSocket<T, P>,
    timeout: Timeout,
    max_message_size: usize,
    prefix_limit: usize,
}

impl<T: Transport> NetstringSocket<T> {
    /// Frame `transport` with default settings.
    pub fn new(transport: T) -> Self {
        Self::from_socket(BufferedSocket::new(transport))
    }

    /// Frame `transport` with an explicit configuration.
    pub fn with_config(transport: T, config: NetstringConfig) -> Result<Self> {
        Self::with_lock_policy(transport, config)
    }
}

impl<T: Transport, P: LockPolicy> NetstringSocket<T, P> {
    /// Frame `transport` using lock policy `P`.
    pub fn with_lock_policy(transport: T, config: NetstringConfig) -> Result<Self> {
        config.validate()?;
        let socket = BufferedSocket::with_lock_policy(transport, config.socket)?;
        let mut framer = Self::from_socket(socket);
        framer.timeout = config.timeout;
        framer.set_max_message_size(config.max_message_size);
        Ok(framer)
    }

    /// Frame an existing buffered socket, keeping whatever it has buffered.
    ///
    /// Uses the default timeout and a 32 KiB message limit.
    pub fn from_socket(socket: BufferedSocket<T, P>) -> Self {
        Self {
            socket,
            timeout: Timeout::default(),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            prefix_limit: prefix_limit(DEFAULT_MAX_MESSAGE_SIZE),
        }
    }

    /// Default timeout for each step of a read or write.
    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    /// Change the default timeout.
    pub fn set_timeout(&mut self, timeout: Timeout) {
        self.timeout = timeout;
    }

    /// Largest payload accepted by [`read`](Self::read) and [`write`](Self::write).
    pub fn max_message_size(&self) -> usize {
        self.max_message_size
    }

    /// Change the message limit and the derived prefix bound.
    pub fn set_max_message_size(&mut self, max_message_size: usize) {
        self.max_message_size = max_message_size;
        self.prefix_limit = prefix_limit(max_message_size);
    }

    /// Bound on the search for `:`, i.e. the longest acceptable prefix.
    pub fn prefix_limit(&self) -> usize {
        self.prefix_limit
    }

    /// Read one message using the framer's defaults.
    ///
    /// # Errors
    ///
    /// - [`SocketError::MessageTooLong`] if no `:` appears within the prefix bound
    /// - [`SocketError::NetstringInvalidSize`] for a non-numeric prefix
    /// - [`SocketError::NetstringMessageTooLong`] for a length over the limit
    /// - [`SocketError::NetstringProtocolError`] if the trailing `,` is missing
    /// - any error of the underlying [`BufferedSocket`] reads
    pub fn read(&self) -> Result<Bytes> {
        self.read_with(None, None)
    }

    /// Read one message, overriding the timeout and/or message limit for
    /// this call only.
    pub fn read_with(&self, timeout: Option<Timeout>, max_message_size: Option<usize>) -> Result<Bytes> {
        let timeout = Some(timeout.unwrap_or(self.timeout));
        let (limit, prefix_bound) = match max_message_size {
            Some(limit) => (limit, prefix_limit(limit)),
            None => (self.max_message_size, self.prefix_limit),
        };

        let prefix = self
            .socket
            .recv_until(b":", timeout, MaxSize::Limit(prefix_bound), false)?;
        let size = parse_size(&prefix)?;
        if size > limit as u64 {
            tracing::debug!("rejecting netstring of {} bytes (limit {})", size, limit);
            return Err(SocketError::NetstringMessageTooLong { size, limit });
        }

        // size <= limit, so it fits in usize
        let payload = self.socket.recv_size(size as usize, timeout)?;

        let trailer = self.socket.recv(1, timeout)?;
        if &trailer[..] != b"," {
            let detail = if trailer.is_empty() {
                format!("connection closed before ',' after {size}-byte payload")
            } else {
                format!("expected ',' after {size}-byte payload, got {trailer:?}")
            };
            tracing::debug!("netstring protocol error: {}", detail);
            return Err(SocketError::NetstringProtocolError { detail });
        }

        tracing::trace!("read {}-byte netstring", size);
        Ok(payload)
    }

    /// Send `payload` as one netstring. Returns the bytes written.
    ///
    /// # Errors
    ///
    /// [`SocketError::NetstringMessageTooLong`] if the payload exceeds the
    /// message limit; nothing is sent in that case.
    pub fn write(&self, payload: &[u8]) -> Result<usize> {
        self.write_with(payload, None)
    }

    /// Send `payload` with a per-call timeout.
    pub fn write_with(&self, payload: &[u8], timeout: Option<Timeout>) -> Result<usize> {
        if payload.len() > self.max_message_size {
            tracing::debug!(
                "refusing to send netstring of {} bytes (limit {})",
                payload.len(),
                self.max_message_size
            );
            return Err(SocketError::NetstringMessageTooLong {
                size: payload.len() as u64,
                limit: self.max_message_size,
            });
        }

        let frame = encode_netstring(payload);
        let sent = self
            .socket
            .send(&frame, Some(timeout.unwrap_or(self.timeout)))?;
        tracing::trace!("wrote {}-byte netstring", payload.len());
        Ok(sent)
    }

    /// Encode `value` as MessagePack and send it as one netstring.
    pub fn write_value<V: Serialize>(&self, value: &V) -> Result<usize> {
        let payload = MsgPackCodec::encode(value)?;
        self.write(&payload)
    }

    /// Read one netstring and decode it from MessagePack.
    pub fn read_value<V: DeserializeOwned>(&self) -> Result<V> {
        let payload = self.read()?;
        MsgPackCodec::decode(&payload)
    }

    /// The underlying buffered socket.
    pub fn get_ref(&self) -> &BufferedSocket<T, P> {
        &self.socket
    }

    /// Unwrap the buffered socket.
    pub fn into_inner(self) -> BufferedSocket<T, P> {
        self.socket
    }

    /// Close the underlying socket.
    pub fn close(&self) -> Result<()> {
        self.socket.close()
    }

    /// Shut down one or both directions of the underlying socket.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        self.socket.shutdown(how)
    }
}

impl<T: fmt::Debug, P: LockPolicy> fmt::Debug for NetstringSocket<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NetstringSocket")
            .field("socket", &self.socket)
            .field("timeout", &self.timeout)
            .field("max_message_size", &self.max_message_size)
            .finish()
    }
}
