//! In-memory transport replaying a fixed script of reads.
//!
//! Lets tests (and fuzzers) control exactly how the peer's bytes are chunked
//! across reads, inject read stalls, and cap how much each write accepts.
//!
//! # Example
//!
//! ```
//! use bufsock::transport::{ScriptedTransport, Transport};
//!
//! let transport = ScriptedTransport::new().chunk("ab").chunk("cd").then_close();
//!
//! let mut buf = [0u8; 8];
//! assert_eq!(transport.receive(&mut buf).unwrap(), 2);
//! assert_eq!(transport.receive(&mut buf).unwrap(), 2);
//! assert_eq!(transport.receive(&mut buf).unwrap(), 0);
//! ```

use std::collections::VecDeque;
use std::io;
use std::net::Shutdown;

use bytes::{Buf, Bytes};
use parking_lot::Mutex;

use super::Transport;
use crate::timeout::Timeout;

/// What a [`ScriptedTransport`] does once its reads are used up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScriptEnd {
    /// Report a closed stream (`Ok(0)`).
    #[default]
    Close,
    /// Fail every further read as if its timeout elapsed.
    Stall,
}

#[derive(Debug)]
enum ReadStep {
    Data(Bytes),
    Stall,
}

#[derive(Debug, Default)]
struct ScriptState {
    reads: VecDeque<ReadStep>,
    end: ScriptEnd,
    sent: Vec<u8>,
    max_write: Option<usize>,
    write_capacity: Option<usize>,
    recv_timeout: Option<Timeout>,
    send_timeout: Option<Timeout>,
    recv_timeouts: Vec<Timeout>,
    read_shut: bool,
    write_shut: bool,
}

/// Scripted in-memory [`Transport`].
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    state: Mutex<ScriptState>,
}

impl ScriptedTransport {
    /// Empty script that reports a closed stream on the first read.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one read returning `data` (split if the caller's buffer is smaller).
    pub fn chunk(self, data: impl Into<Bytes>) -> Self {
        self.state.lock().reads.push_back(ReadStep::Data(data.into()));
        self
    }

    /// Queue one read that fails as timed out.
    pub fn stall(self) -> Self {
        self.state.lock().reads.push_back(ReadStep::Stall);
        self
    }

    /// Report a closed stream once the script is exhausted (the default).
    pub fn then_close(self) -> Self {
        self.state.lock().end = ScriptEnd::Close;
        self
    }

    /// Stall forever once the script is exhausted.
    pub fn then_stall(self) -> Self {
        self.state.lock().end = ScriptEnd::Stall;
        self
    }

    /// Accept at most `n` bytes per write call.
    pub fn max_write(self, n: usize) -> Self {
        self.state.lock().max_write = Some(n);
        self
    }

    /// Accept `n` bytes in total, then stall every write.
    pub fn write_capacity(self, n: usize) -> Self {
        self.state.lock().write_capacity = Some(n);
        self
    }

    /// Extend the total write capacity by `n` bytes.
    pub fn grant_write_capacity(&self, n: usize) {
        let mut state = self.state.lock();
        if let Some(cap) = state.write_capacity.as_mut() {
            *cap += n;
        }
    }

    /// Everything written so far.
    pub fn sent(&self) -> Vec<u8> {
        self.state.lock().sent.clone()
    }

    /// Every read timeout applied so far, in order.
    pub fn recv_timeouts(&self) -> Vec<Timeout> {
        self.state.lock().recv_timeouts.clone()
    }

    /// Reads still queued.
    pub fn pending_reads(&self) -> usize {
        self.state.lock().reads.len()
    }
}

fn stall_error(timeout: Option<Timeout>) -> io::Error {
    match timeout {
        Some(Timeout::NonBlocking) => io::Error::from(io::ErrorKind::WouldBlock),
        _ => io::Error::new(io::ErrorKind::TimedOut, "scripted stall"),
    }
}

impl Transport for ScriptedTransport {
    type Addr = String;

    fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.read_shut || buf.is_empty() {
            return Ok(0);
        }

        match state.reads.pop_front() {
            Some(ReadStep::Data(mut data)) => {
                let n = buf.len().min(data.len());
                buf[..n].copy_from_slice(&data[..n]);
                data.advance(n);
                if !data.is_empty() {
                    state.reads.push_front(ReadStep::Data(data));
                }
                Ok(n)
            }
            Some(ReadStep::Stall) => Err(stall_error(state.recv_timeout)),
            None => match state.end {
                ScriptEnd::Close => Ok(0),
                ScriptEnd::Stall => Err(stall_error(state.recv_timeout)),
            },
        }
    }

    fn send(&self, data: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.write_shut {
            return Err(io::Error::from(io::ErrorKind::BrokenPipe));
        }

        let mut n = data.len();
        if let Some(max) = state.max_write {
            n = n.min(max);
        }
        if let Some(cap) = state.write_capacity {
            if cap == 0 && n > 0 {
                return Err(stall_error(state.send_timeout));
            }
            n = n.min(cap);
            state.write_capacity = Some(cap - n);
        }

        state.sent.extend_from_slice(&data[..n]);
        Ok(n)
    }

    fn recv_timeout(&self) -> io::Result<Timeout> {
        Ok(self.state.lock().recv_timeout.unwrap_or(Timeout::Never))
    }

    fn set_recv_timeout(&self, timeout: Timeout) -> io::Result<()> {
        let mut state = self.state.lock();
        state.recv_timeout = Some(timeout);
        state.recv_timeouts.push(timeout);
        Ok(())
    }

    fn set_send_timeout(&self, timeout: Timeout) -> io::Result<()> {
        self.state.lock().send_timeout = Some(timeout);
        Ok(())
    }

    fn shutdown(&self, how: Shutdown) -> io::Result<()> {
        let mut state = self.state.lock();
        match how {
            Shutdown::Read => state.read_shut = true,
            Shutdown::Write => state.write_shut = true,
            Shutdown::Both => {
                state.read_shut = true;
                state.write_shut = true;
            }
        }
        Ok(())
    }

    fn local_addr(&self) -> io::Result<Self::Addr> {
        Ok("scripted:local".to_string())
    }

    fn peer_addr(&self) -> io::Result<Self::Addr> {
        Ok("scripted:peer".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_chunks_split_by_buffer_size() {
        let t = ScriptedTransport::new().chunk("abcdef");
        let mut buf = [0u8; 4];

        assert_eq!(t.receive(&mut buf).unwrap(), 4);
        assert_eq!(&buf, b"abcd");
        assert_eq!(t.receive(&mut buf).unwrap(), 2);
        assert_eq!(&buf[..2], b"ef");
        assert_eq!(t.receive(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_stall_kind_follows_timeout() {
        let t = ScriptedTransport::new().stall().stall();
        let mut buf = [0u8; 4];

        t.set_recv_timeout(Timeout::After(Duration::from_secs(1)))
            .unwrap();
        assert_eq!(t.receive(&mut buf).unwrap_err().kind(), io::ErrorKind::TimedOut);

        t.set_recv_timeout(Timeout::NonBlocking).unwrap();
        assert_eq!(t.receive(&mut buf).unwrap_err().kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_then_stall() {
        let t = ScriptedTransport::new().chunk("x").then_stall();
        let mut buf = [0u8; 4];
        assert_eq!(t.receive(&mut buf).unwrap(), 1);
        assert!(t.receive(&mut buf).is_err());
        assert!(t.receive(&mut buf).is_err());
    }

    #[test]
    fn test_partial_writes() {
        let t = ScriptedTransport::new().max_write(3);
        assert_eq!(t.send(b"hello").unwrap(), 3);
        assert_eq!(t.send(b"lo").unwrap(), 2);
        assert_eq!(t.sent(), b"hello");
    }

    #[test]
    fn test_write_capacity() {
        let t = ScriptedTransport::new().write_capacity(4);
        assert_eq!(t.send(b"hello").unwrap(), 4);
        assert!(t.send(b"o").is_err());

        t.grant_write_capacity(1);
        assert_eq!(t.send(b"o").unwrap(), 1);
        assert_eq!(t.sent(), b"hello");
    }

    #[test]
    fn test_shutdown() {
        let t = ScriptedTransport::new().chunk("data");
        t.close().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(t.receive(&mut buf).unwrap(), 0);
        assert_eq!(t.send(b"x").unwrap_err().kind(), io::ErrorKind::BrokenPipe);
    }
}
