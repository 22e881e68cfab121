//! Transport module - the connected stream socket a buffered socket wraps.
//!
//! Provides:
//! - The [`Transport`] trait every wrapped socket implements
//! - Implementations for `TcpStream` and, on Unix, `UnixStream`
//! - [`ScriptedTransport`], an in-memory transport replaying canned reads
//!
//! All methods take `&self` so the receive and send sides of a socket can
//! drive the transport concurrently, the same way `&TcpStream` implements
//! both `Read` and `Write`.

use std::io;
use std::net::Shutdown;

use crate::timeout::Timeout;

mod scripted;
mod stream;

pub use scripted::{ScriptEnd, ScriptedTransport};

/// A connected, bidirectional, stream-oriented socket.
pub trait Transport {
    /// Address type reported by [`local_addr`](Transport::local_addr) and
    /// [`peer_addr`](Transport::peer_addr).
    type Addr;

    /// Read up to `buf.len()` bytes. `Ok(0)` means the peer closed the stream.
    fn receive(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write some prefix of `data`, returning how many bytes were written.
    fn send(&self, data: &[u8]) -> io::Result<usize>;

    /// Timeout currently applied to reads.
    fn recv_timeout(&self) -> io::Result<Timeout>;

    /// Apply `timeout` to subsequent reads.
    fn set_recv_timeout(&self, timeout: Timeout) -> io::Result<()>;

    /// Apply `timeout` to subsequent writes.
    fn set_send_timeout(&self, timeout: Timeout) -> io::Result<()>;

    /// Shut down one or both directions.
    fn shutdown(&self, how: Shutdown) -> io::Result<()>;

    /// Close the connection; blocked reads on other threads return.
    fn close(&self) -> io::Result<()> {
        match self.shutdown(Shutdown::Both) {
            Err(e) if e.kind() == io::ErrorKind::NotConnected => Ok(()),
            other => other,
        }
    }

    /// Local address of the socket.
    fn local_addr(&self) -> io::Result<Self::Addr>;

    /// Address of the connected peer.
    fn peer_addr(&self) -> io::Result<Self::Addr>;
}
