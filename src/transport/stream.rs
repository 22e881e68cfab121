//! `Transport` for the standard library's stream sockets.
//!
//! - All platforms: `TcpStream`
//! - Unix: `UnixStream`
//!
//! Non-blocking mode is a socket-wide flag on these types, so a
//! [`Timeout::NonBlocking`] applied to one direction also affects the other
//! until the next timeout change. Timed and untimed modes use the separate
//! read and write timeouts and do not interfere.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};

use super::Transport;
use crate::timeout::Timeout;

/// Generates the `Transport` impl for a std stream type exposing the usual
/// `set_read_timeout` / `set_write_timeout` / `set_nonblocking` trio.
macro_rules! std_stream_transport {
    ($stream:ty, $addr:ty) => {
        impl Transport for $stream {
            type Addr = $addr;

            fn receive(&self, buf: &mut [u8]) -> io::Result<usize> {
                let mut stream: &$stream = self;
                stream.read(buf)
            }

            fn send(&self, data: &[u8]) -> io::Result<usize> {
                let mut stream: &$stream = self;
                stream.write(data)
            }

            fn recv_timeout(&self) -> io::Result<Timeout> {
                Ok(match self.read_timeout()? {
                    Some(d) => Timeout::after(d),
                    None => Timeout::Never,
                })
            }

            fn set_recv_timeout(&self, timeout: Timeout) -> io::Result<()> {
                match timeout {
                    Timeout::NonBlocking => self.set_nonblocking(true),
                    Timeout::Never => {
                        self.set_nonblocking(false)?;
                        self.set_read_timeout(None)
                    }
                    Timeout::After(d) => {
                        self.set_nonblocking(false)?;
                        self.set_read_timeout(Some(d))
                    }
                }
            }

            fn set_send_timeout(&self, timeout: Timeout) -> io::Result<()> {
                match timeout {
                    Timeout::NonBlocking => self.set_nonblocking(true),
                    Timeout::Never => {
                        self.set_nonblocking(false)?;
                        self.set_write_timeout(None)
                    }
                    Timeout::After(d) => {
                        self.set_nonblocking(false)?;
                        self.set_write_timeout(Some(d))
                    }
                }
            }

            fn shutdown(&self, how: Shutdown) -> io::Result<()> {
                <$stream>::shutdown(self, how)
            }

            fn local_addr(&self) -> io::Result<Self::Addr> {
                <$stream>::local_addr(self)
            }

            fn peer_addr(&self) -> io::Result<Self::Addr> {
                <$stream>::peer_addr(self)
            }
        }
    };
}

std_stream_transport!(TcpStream, SocketAddr);

// ============================================================================
// Unix Implementation
// ============================================================================

#[cfg(unix)]
mod unix_impl {
    use super::*;
    use std::os::unix::net::{SocketAddr, UnixStream};

    std_stream_transport!(UnixStream, SocketAddr);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::time::Duration;

    fn tcp_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_tcp_send_receive() {
        let (a, b) = tcp_pair();
        assert_eq!(Transport::send(&a, b"ping").unwrap(), 4);

        let mut buf = [0u8; 16];
        let n = b.receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn test_tcp_recv_timeout_roundtrip() {
        let (a, _b) = tcp_pair();
        assert_eq!(a.recv_timeout().unwrap(), Timeout::Never);

        a.set_recv_timeout(Timeout::After(Duration::from_millis(250)))
            .unwrap();
        // The kernel rounds to its timer tick
        match a.recv_timeout().unwrap() {
            Timeout::After(d) => assert!(
                (Duration::from_millis(250)..=Duration::from_millis(300)).contains(&d),
                "read back {d:?}"
            ),
            other => panic!("unexpected timeout: {other:?}"),
        }
    }

    #[test]
    fn test_tcp_timed_read_fails_with_timeout_kind() {
        let (a, _b) = tcp_pair();
        a.set_recv_timeout(Timeout::After(Duration::from_millis(20)))
            .unwrap();

        let mut buf = [0u8; 4];
        let err = a.receive(&mut buf).unwrap_err();
        assert!(matches!(
            err.kind(),
            io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut
        ));
    }

    #[test]
    fn test_tcp_nonblocking_read_would_block() {
        let (a, _b) = tcp_pair();
        a.set_recv_timeout(Timeout::NonBlocking).unwrap();

        let mut buf = [0u8; 4];
        let err = a.receive(&mut buf).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::WouldBlock);
    }

    #[test]
    fn test_tcp_close_reads_eof_on_peer() {
        let (a, b) = tcp_pair();
        a.close().unwrap();

        let mut buf = [0u8; 4];
        assert_eq!(b.receive(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_tcp_addresses() {
        let (a, b) = tcp_pair();
        assert_eq!(Transport::local_addr(&a).unwrap(), Transport::peer_addr(&b).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn test_unix_pair() {
        use std::os::unix::net::UnixStream;

        let (a, b) = UnixStream::pair().unwrap();
        Transport::send(&a, b"hi").unwrap();

        let mut buf = [0u8; 8];
        let n = b.receive(&mut buf).unwrap();
        assert_eq!(&buf[..n], b"hi");

        Transport::shutdown(&a, Shutdown::Write).unwrap();
        assert_eq!(b.receive(&mut buf).unwrap(), 0);
    }
}
