//! # bufsock
//!
//! Buffered blocking stream sockets with deadline-aware reads and writes,
//! plus netstring message framing on top.
//!
//! ## Layers
//!
//! - **[`BufferedSocket`]**: wraps a connected [`Transport`] (`TcpStream`,
//!   `UnixStream`, ...) with a receive buffer and a send queue. Reads by size,
//!   by delimiter or until close; partial data survives timeouts and errors.
//! - **[`NetstringSocket`]**: frames messages as `<len>:<payload>,` with a
//!   per-message size cap, optionally carrying MessagePack values.
//!
//! Every blocking operation takes an `Option<Timeout>`; `None` uses the
//! instance default. A timeout bounds the whole operation, however many
//! transport calls it takes.
//!
//! ## Example
//!
//! ```no_run
//! use std::net::TcpStream;
//! use bufsock::{BufferedSocket, MaxSize, NetstringSocket};
//!
//! # fn main() -> bufsock::Result<()> {
//! let stream = TcpStream::connect("127.0.0.1:7000")?;
//! let sock = BufferedSocket::new(stream);
//!
//! sock.send(b"HELLO\r\n", None)?;
//! let banner = sock.recv_until(b"\r\n", None, MaxSize::Default, false)?;
//! println!("server says {:?}", banner);
//!
//! let framer = NetstringSocket::from_socket(sock);
//! framer.write(b"ping")?;
//! let reply = framer.read()?;
//! # let _ = reply;
//! # Ok(())
//! # }
//! ```

pub mod buffered;
pub mod codec;
pub mod config;
pub mod error;
pub mod netstring;
pub mod sync;
pub mod timeout;
pub mod transport;

pub use buffered::BufferedSocket;
pub use config::{NetstringConfig, SocketConfig};
pub use error::{Result, SocketError};
pub use netstring::NetstringSocket;
pub use sync::{SingleThreaded, Threaded};
pub use timeout::{MaxSize, Timeout};
pub use transport::Transport;
