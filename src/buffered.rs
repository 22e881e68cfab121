//! Buffered socket with deadline-aware reads and writes.
//!
//! [`BufferedSocket`] owns a connected [`Transport`] together with a receive
//! buffer and a send queue:
//!
//! - Every transport read appends straight into the receive buffer, and
//!   bytes only leave it when an operation succeeds. Whatever an operation
//!   read before failing (timeout, close, size cap) stays buffered for the
//!   next call and can be inspected with [`BufferedSocket::recv_buffer`].
//! - Outgoing data is queued, coalesced into one chunk and written in a loop
//!   that tolerates partial writes. Bytes leave the queue only once the
//!   transport accepted them.
//!
//! Compound reads and writes fix one deadline up front and recompute the
//! remaining time before every transport call.
//!
//! # Example
//!
//! ```
//! use bufsock::transport::ScriptedTransport;
//! use bufsock::{BufferedSocket, MaxSize};
//!
//! let transport = ScriptedTransport::new().chunk("GET / HT").chunk("TP/1.0\r\nHost: x\r\n");
//! let sock = BufferedSocket::new(transport);
//!
//! let line = sock.recv_until(b"\r\n", None, MaxSize::Default, false).unwrap();
//! assert_eq!(&line[..], b"GET / HTTP/1.0");
//! assert_eq!(&sock.recv_buffer()[..], b"Host: x\r\n");
//! ```

use std::fmt;
use std::io;
use std::net::Shutdown;

use bytes::{Buf, Bytes, BytesMut};

use crate::config::SocketConfig;
use crate::error::{Result, SocketError};
use crate::sync::{LockPolicy, SideLock, Threaded};
use crate::timeout::{Deadline, MaxSize, Timeout};
use crate::transport::Transport;

/// Receive-side state.
#[derive(Debug, Default)]
struct RecvState {
    /// Bytes read from the transport but not yet returned.
    buffer: BytesMut,
}

/// Send-side state.
#[derive(Debug, Default)]
struct SendState {
    /// Chunks not yet accepted by the transport.
    queue: Vec<Bytes>,
}

impl SendState {
    /// Merge all non-empty queued chunks into one.
    fn coalesce(&mut self) {
        self.queue.retain(|chunk| !chunk.is_empty());
        if self.queue.len() > 1 {
            let total = self.queue.iter().map(Bytes::len).sum();
            let mut merged = BytesMut::with_capacity(total);
            for chunk in self.queue.drain(..) {
                merged.extend_from_slice(&chunk);
            }
            self.queue.push(merged.freeze());
        }
    }

    fn unsent(&self) -> usize {
        self.queue.iter().map(Bytes::len).sum()
    }
}

/// Why a single transport read did not produce data.
enum Stop {
    /// The deadline ran out before or during the call.
    Expired,
    /// Any other transport error.
    Io(io::Error),
}

impl Stop {
    fn into_error(self, deadline: &Deadline, detail: impl FnOnce() -> String) -> SocketError {
        match self {
            Stop::Expired => {
                let detail = detail();
                tracing::debug!("socket operation timed out: {}", detail);
                SocketError::Timeout {
                    timeout: deadline.timeout().allotted(),
                    detail,
                }
            }
            Stop::Io(e) => SocketError::Io(e),
        }
    }
}

/// A connected stream socket with receive and send buffering.
///
/// Receive-side operations serialize on one lock and send-side operations
/// on another, so one thread can block in [`recv_until`](Self::recv_until)
/// while another calls [`send`](Self::send). The lock type comes from `P`
/// (see [`crate::sync`]).
///
/// Once wrapped, the transport should only be used through this type;
/// [`get_ref`](Self::get_ref) is for metadata.
pub struct BufferedSocket<T, P: LockPolicy = Threaded> {
    transport: T,
    recv: P::Lock<RecvState>,
    send: P::Lock<SendState>,
    timeout: Timeout,
    max_buffer_size: usize,
    chunk_read_size: usize,
}

impl<T: Transport> BufferedSocket<T> {
    /// Wrap `transport` with default settings.
    ///
    /// The default timeout is taken from the transport's current read
    /// timeout when it has one, and [`Timeout::default`] otherwise.
    ///
    /// `TcpStream` and `UnixStream` cannot report non-blocking mode, so a
    /// stream already switched to non-blocking gets the 10 s default and is
    /// put back into blocking mode by the first read. Use
    /// [`with_timeout`](Self::with_timeout) to keep it non-blocking.
    pub fn new(transport: T) -> Self {
        let mut config = SocketConfig::default();
        if let Ok(timeout @ (Timeout::After(_) | Timeout::NonBlocking)) = transport.recv_timeout() {
            config.timeout = timeout;
        }
        Self::build(transport, config)
    }

    /// Wrap `transport` with an explicit default timeout.
    pub fn with_timeout(transport: T, timeout: Timeout) -> Self {
        let config = SocketConfig {
            timeout,
            ..SocketConfig::default()
        };
        Self::build(transport, config)
    }

    /// Wrap `transport` with an explicit configuration.
    pub fn with_config(transport: T, config: SocketConfig) -> Result<Self> {
        Self::with_lock_policy(transport, config)
    }
}

impl<T: Transport, P: LockPolicy> BufferedSocket<T, P> {
    /// Wrap `transport` using lock policy `P`.
    ///
    /// ```
    /// use bufsock::config::SocketConfig;
    /// use bufsock::sync::SingleThreaded;
    /// use bufsock::transport::ScriptedTransport;
    /// use bufsock::BufferedSocket;
    ///
    /// let sock = BufferedSocket::<_, SingleThreaded>::with_lock_policy(
    ///     ScriptedTransport::new().chunk("hi"),
    ///     SocketConfig::default(),
    /// )
    /// .unwrap();
    /// assert_eq!(&sock.recv(8, None).unwrap()[..], b"hi");
    /// ```
    pub fn with_lock_policy(transport: T, config: SocketConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(transport, config))
    }

    fn build(transport: T, config: SocketConfig) -> Self {
        Self {
            transport,
            recv: SideLock::new(RecvState::default()),
            send: SideLock::new(SendState::default()),
            timeout: config.timeout,
            max_buffer_size: config.max_buffer_size,
            chunk_read_size: config.effective_chunk_read_size(),
        }
    }

    // ------------------------------------------------------------------
    // Settings
    // ------------------------------------------------------------------

    /// Default timeout for blocking operations.
    pub fn timeout(&self) -> Timeout {
        self.timeout
    }

    /// Change the default timeout.
    pub fn set_timeout(&mut self, timeout: Timeout) {
        self.timeout = timeout;
    }

    /// Default bound for [`recv_until`](Self::recv_until) and
    /// [`recv_close`](Self::recv_close).
    pub fn max_buffer_size(&self) -> usize {
        self.max_buffer_size
    }

    /// Change the default receive bound.
    pub fn set_max_buffer_size(&mut self, max_buffer_size: usize) {
        self.max_buffer_size = max_buffer_size;
    }

    /// Bytes requested per transport read.
    pub fn chunk_read_size(&self) -> usize {
        self.chunk_read_size
    }

    /// Change the per-read request size (at least 1).
    pub fn set_chunk_read_size(&mut self, chunk_read_size: usize) {
        self.chunk_read_size = chunk_read_size.max(1);
    }

    // ------------------------------------------------------------------
    // Receive side
    // ------------------------------------------------------------------

    /// Return up to `size` bytes.
    ///
    /// Buffered bytes are returned without touching the transport. With an
    /// empty buffer, exactly one transport read is issued and any excess
    /// beyond `size` is kept buffered. An empty result (for `size > 0`)
    /// means the peer closed the stream.
    pub fn recv(&self, size: usize, timeout: Option<Timeout>) -> Result<Bytes> {
        self.recv.with(|state| {
            if state.buffer.is_empty() && size > 0 {
                let deadline = Deadline::start(timeout.unwrap_or(self.timeout));
                self.read_chunk(state, &deadline)
                    .map_err(|stop| stop.into_error(&deadline, || "recv read 0 bytes".to_string()))?;
            }
            let n = size.min(state.buffer.len());
            Ok(state.buffer.split_to(n).freeze())
        })
    }

    /// Return exactly `size` bytes without consuming them.
    ///
    /// Reads as [`recv_size`](Self::recv_size) would, but leaves the bytes
    /// at the front of the receive buffer.
    pub fn peek(&self, size: usize, timeout: Option<Timeout>) -> Result<Bytes> {
        self.recv.with(|state| {
            if state.buffer.len() < size {
                let deadline = Deadline::start(timeout.unwrap_or(self.timeout));
                self.fill_to(state, size, &deadline)?;
            }
            Ok(Bytes::copy_from_slice(&state.buffer[..size]))
        })
    }

    /// Return exactly `size` bytes, reading as many times as needed.
    ///
    /// # Errors
    ///
    /// - [`SocketError::ConnectionClosed`] if the peer closes first
    /// - [`SocketError::Timeout`] if the deadline elapses first
    ///
    /// In both cases the bytes read so far remain buffered.
    pub fn recv_size(&self, size: usize, timeout: Option<Timeout>) -> Result<Bytes> {
        self.recv.with(|state| {
            if state.buffer.len() < size {
                let deadline = Deadline::start(timeout.unwrap_or(self.timeout));
                self.fill_to(state, size, &deadline)?;
            }
            Ok(state.buffer.split_to(size).freeze())
        })
    }

    /// Return the bytes before the first occurrence of `delimiter`.
    ///
    /// The delimiter must end within the first `max_size` buffered bytes.
    /// It is consumed either way and included in the result when
    /// `include_delimiter` is set; bytes after it stay buffered.
    ///
    /// After each read only the new bytes plus `delimiter.len() - 1` bytes of
    /// earlier context are searched, so a delimiter split across reads is
    /// still found without rescanning the whole buffer.
    ///
    /// # Errors
    ///
    /// - [`SocketError::MessageTooLong`] if more than `max_size` bytes are
    ///   buffered without a match
    /// - [`SocketError::ConnectionClosed`] if the peer closes first
    /// - [`SocketError::Timeout`] if the deadline elapses first
    /// - [`SocketError::Io`] with `InvalidInput` for an empty delimiter
    ///
    /// Scanned bytes remain buffered on every error.
    pub fn recv_until(
        &self,
        delimiter: &[u8],
        timeout: Option<Timeout>,
        max_size: MaxSize,
        include_delimiter: bool,
    ) -> Result<Bytes> {
        if delimiter.is_empty() {
            return Err(SocketError::Io(io::Error::new(
                io::ErrorKind::InvalidInput,
                "delimiter must not be empty",
            )));
        }
        let max_size = max_size.resolve(self.max_buffer_size);

        self.recv.with(|state| {
            let deadline = Deadline::start(timeout.unwrap_or(self.timeout));
            let mut scan_from = 0;

            let offset = loop {
                let window_end = state.buffer.len().min(max_size);
                let window = &state.buffer[scan_from.min(window_end)..window_end];
                if let Some(pos) = find(window, delimiter) {
                    break scan_from + pos;
                }

                if state.buffer.len() > max_size {
                    tracing::debug!(
                        "no delimiter within {} bytes ({} buffered)",
                        max_size,
                        state.buffer.len()
                    );
                    return Err(SocketError::MessageTooLong {
                        max_size,
                        delimiter: Some(Bytes::copy_from_slice(delimiter)),
                    });
                }

                let before = state.buffer.len();
                match self.read_chunk(state, &deadline) {
                    Ok(0) => {
                        tracing::debug!("connection closed after {} bytes without delimiter", before);
                        return Err(SocketError::ConnectionClosed {
                            bytes_read: before,
                            detail: format!(
                                "no delimiter {:?} found before close",
                                Bytes::copy_from_slice(delimiter)
                            ),
                        });
                    }
                    // A match can only start in the new bytes or in the
                    // last `delimiter.len() - 1` bytes before them.
                    Ok(_) => scan_from = before.saturating_sub(delimiter.len() - 1),
                    Err(stop) => {
                        return Err(stop.into_error(&deadline, || {
                            format!(
                                "read {} bytes without finding delimiter {:?}",
                                before,
                                Bytes::copy_from_slice(delimiter)
                            )
                        }))
                    }
                }
            };

            let mut data = state.buffer.split_to(offset + delimiter.len());
            if !include_delimiter {
                data.truncate(offset);
            }
            Ok(data.freeze())
        })
    }

    /// Read until the peer closes the stream and return everything.
    ///
    /// Unlike the other reads, a close is the success condition here.
    ///
    /// # Errors
    ///
    /// [`SocketError::MessageTooLong`] if more than `max_size` bytes arrive,
    /// [`SocketError::Timeout`] if the deadline elapses first. Bytes read
    /// remain buffered in both cases.
    pub fn recv_close(&self, timeout: Option<Timeout>, max_size: MaxSize) -> Result<Bytes> {
        let max_size = max_size.resolve(self.max_buffer_size);

        self.recv.with(|state| {
            let deadline = Deadline::start(timeout.unwrap_or(self.timeout));
            loop {
                if state.buffer.len() > max_size {
                    tracing::debug!("peer sent more than {} bytes before closing", max_size);
                    return Err(SocketError::MessageTooLong {
                        max_size,
                        delimiter: None,
                    });
                }

                let before = state.buffer.len();
                match self.read_chunk(state, &deadline) {
                    Ok(0) => break,
                    Ok(_) => {}
                    Err(stop) => {
                        return Err(stop.into_error(&deadline, || {
                            format!("read {before} bytes without the peer closing")
                        }))
                    }
                }
            }
            Ok(state.buffer.split().freeze())
        })
    }

    /// Read until at least `size` bytes are buffered.
    fn fill_to(&self, state: &mut RecvState, size: usize, deadline: &Deadline) -> Result<()> {
        while state.buffer.len() < size {
            let have = state.buffer.len();
            match self.read_chunk(state, deadline) {
                Ok(0) => {
                    tracing::debug!("connection closed after {} of {} bytes", have, size);
                    return Err(SocketError::ConnectionClosed {
                        bytes_read: have,
                        detail: format!("read {have} of {size} requested bytes"),
                    });
                }
                Ok(_) => {}
                Err(stop) => {
                    return Err(stop.into_error(deadline, || format!("read {have} of {size} bytes")))
                }
            }
        }
        Ok(())
    }

    /// Issue one transport read, appending the result to the buffer.
    ///
    /// Returns the number of bytes read; 0 means the peer closed.
    fn read_chunk(&self, state: &mut RecvState, deadline: &Deadline) -> std::result::Result<usize, Stop> {
        let timeout = deadline.remaining().ok_or(Stop::Expired)?;
        self.transport.set_recv_timeout(timeout).map_err(Stop::Io)?;

        let start = state.buffer.len();
        state.buffer.resize(start + self.chunk_read_size, 0);

        let result = loop {
            match self.transport.receive(&mut state.buffer[start..]) {
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                other => break other,
            }
        };

        match result {
            Ok(n) => {
                state.buffer.truncate(start + n);
                tracing::trace!("read {} bytes from transport", n);
                Ok(n)
            }
            Err(e) => {
                state.buffer.truncate(start);
                if deadline.is_expiry(&e) {
                    Err(Stop::Expired)
                } else {
                    Err(Stop::Io(e))
                }
            }
        }
    }

    /// Copy of the bytes buffered but not yet consumed.
    ///
    /// After a failed read this is where the partial data is.
    pub fn recv_buffer(&self) -> Bytes {
        self.recv.with(|state| Bytes::copy_from_slice(&state.buffer))
    }

    /// Number of bytes buffered but not yet consumed.
    pub fn recv_buffer_len(&self) -> usize {
        self.recv.with(|state| state.buffer.len())
    }

    // ------------------------------------------------------------------
    // Send side
    // ------------------------------------------------------------------

    /// Queue `data` and transmit everything queued.
    ///
    /// Returns the number of bytes written by this call, which includes any
    /// previously [`buffer`](Self::buffer)ed data.
    ///
    /// # Errors
    ///
    /// [`SocketError::Timeout`] if the deadline elapses first. The unsent
    /// remainder stays queued and is visible via
    /// [`send_buffer`](Self::send_buffer); a later `send` or
    /// [`flush`](Self::flush) retries it.
    pub fn send(&self, data: &[u8], timeout: Option<Timeout>) -> Result<usize> {
        self.send.with(|state| {
            if !data.is_empty() {
                state.queue.push(Bytes::copy_from_slice(data));
            }
            state.coalesce();

            let deadline = Deadline::start(timeout.unwrap_or(self.timeout));
            let mut total_sent = 0;

            loop {
                let Some(chunk) = state.queue.first_mut() else {
                    break;
                };
                if chunk.is_empty() {
                    break;
                }

                let Some(remaining) = deadline.remaining() else {
                    tracing::debug!("send timed out with {} bytes unsent", chunk.len());
                    return Err(SocketError::Timeout {
                        timeout: deadline.timeout().allotted(),
                        detail: format!("{} bytes unsent", chunk.len()),
                    });
                };
                self.transport.set_send_timeout(remaining)?;

                match self.transport.send(chunk) {
                    Ok(0) => {
                        return Err(SocketError::Io(io::Error::new(
                            io::ErrorKind::WriteZero,
                            "transport accepted 0 bytes",
                        )))
                    }
                    Ok(n) => {
                        chunk.advance(n);
                        total_sent += n;
                        tracing::trace!("wrote {} bytes to transport", n);
                    }
                    Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                    Err(e) if deadline.is_expiry(&e) => {
                        tracing::debug!("send timed out with {} bytes unsent", chunk.len());
                        return Err(SocketError::Timeout {
                            timeout: deadline.timeout().allotted(),
                            detail: format!("{} bytes unsent", chunk.len()),
                        });
                    }
                    Err(e) => return Err(SocketError::Io(e)),
                }
            }

            state.queue.clear();
            Ok(total_sent)
        })
    }

    /// Queue `data` without sending it.
    pub fn buffer(&self, data: &[u8]) {
        if data.is_empty() {
            return;
        }
        self.send
            .with(|state| state.queue.push(Bytes::copy_from_slice(data)));
    }

    /// Transmit everything previously queued.
    pub fn flush(&self, timeout: Option<Timeout>) -> Result<usize> {
        self.send(&[], timeout)
    }

    /// Chunks queued but not yet accepted by the transport.
    pub fn send_buffer(&self) -> Vec<Bytes> {
        self.send.with(|state| state.queue.clone())
    }

    /// Number of bytes queued but not yet accepted by the transport.
    pub fn send_buffer_len(&self) -> usize {
        self.send.with(|state| state.unsent())
    }

    // ------------------------------------------------------------------
    // Lifecycle and metadata
    // ------------------------------------------------------------------

    /// Close the transport and drop both buffers.
    ///
    /// The transport is closed before the locks are taken, so a thread
    /// blocked in a read on this socket is released rather than waited on.
    pub fn close(&self) -> Result<()> {
        let result = self.transport.close();
        self.clear_buffers();
        tracing::debug!("socket closed");
        result.map_err(SocketError::Io)
    }

    /// Shut down one or both directions and drop both buffers.
    pub fn shutdown(&self, how: Shutdown) -> Result<()> {
        let result = self.transport.shutdown(how);
        self.clear_buffers();
        tracing::debug!("socket shut down ({:?})", how);
        result.map_err(SocketError::Io)
    }

    fn clear_buffers(&self) {
        self.recv.with(|state| state.buffer.clear());
        self.send.with(|state| state.queue.clear());
    }

    /// Local address of the transport.
    pub fn local_addr(&self) -> Result<T::Addr> {
        Ok(self.transport.local_addr()?)
    }

    /// Peer address of the transport.
    pub fn peer_addr(&self) -> Result<T::Addr> {
        Ok(self.transport.peer_addr()?)
    }

    /// The wrapped transport, for metadata and socket options.
    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    /// Unwrap the transport, discarding anything still buffered.
    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl<T: fmt::Debug, P: LockPolicy> fmt::Debug for BufferedSocket<T, P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferedSocket")
            .field("transport", &self.transport)
            .field("timeout", &self.timeout)
            .field("max_buffer_size", &self.max_buffer_size)
            .field("chunk_read_size", &self.chunk_read_size)
            .finish_non_exhaustive()
    }
}

/// Position of the first occurrence of `needle` in `haystack`.
fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    match needle {
        [byte] => haystack.iter().position(|b| b == byte),
        _ => haystack
            .windows(needle.len())
            .position(|window| window == needle),
    }
}
