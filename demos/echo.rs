//! Netstring echo over TCP.
//!
//! Starts a server on an ephemeral port, connects a client to it, and sends
//! a few messages that come back unchanged. One thread per connection.
//!
//! ```text
//! RUST_LOG=bufsock=trace cargo run --example echo
//! ```

use std::net::{TcpListener, TcpStream};
use std::thread;
use std::time::Duration;

use bufsock::config::NetstringConfig;
use bufsock::{NetstringSocket, Result, Timeout};

fn serve(stream: TcpStream) -> Result<()> {
    let peer = stream.peer_addr()?;
    let config = NetstringConfig {
        timeout: Timeout::Never,
        ..NetstringConfig::default()
    };
    let framer = NetstringSocket::with_config(stream, config)?;

    loop {
        match framer.read() {
            Ok(message) => {
                framer.write(&message)?;
            }
            Err(e) if e.is_connection_closed() => {
                tracing::info!("{} disconnected", peer);
                return Ok(());
            }
            Err(e) => {
                tracing::error!("closing {} after error: {}", peer, e);
                framer.close()?;
                return Err(e);
            }
        }
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let listener = TcpListener::bind("127.0.0.1:0")?;
    let addr = listener.local_addr()?;
    tracing::info!("echo server listening on {}", addr);

    thread::spawn(move || {
        for stream in listener.incoming() {
            match stream {
                Ok(stream) => {
                    thread::spawn(move || {
                        if let Err(e) = serve(stream) {
                            tracing::warn!("connection failed: {}", e);
                        }
                    });
                }
                Err(e) => tracing::warn!("accept failed: {}", e),
            }
        }
    });

    let client = NetstringSocket::new(TcpStream::connect(addr)?);
    let timeout = Some(Timeout::After(Duration::from_secs(2)));

    for message in ["hello", "netstrings: 5:hello,", ""] {
        client.write(message.as_bytes())?;
        let reply = client.read_with(timeout, None)?;
        tracing::info!("sent {:?}, got back {:?}", message, reply);
    }

    client.close()?;
    Ok(())
}
