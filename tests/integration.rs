//! Integration tests for bufsock over real sockets.
//!
//! These tests drive `BufferedSocket` and `NetstringSocket` across connected
//! TCP (and, on Unix, Unix domain) socket pairs, with the peer on another
//! thread.

use std::io::{Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::{Arc, Once};
use std::thread;
use std::time::{Duration, Instant};

use bufsock::config::{NetstringConfig, SocketConfig};
use bufsock::{BufferedSocket, MaxSize, NetstringSocket, SocketError, Timeout};

fn init_tracing() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn tcp_pair() -> (TcpStream, TcpStream) {
    init_tracing();
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
    let (server, _) = listener.accept().unwrap();
    (client, server)
}

fn millis(ms: u64) -> Option<Timeout> {
    Some(Timeout::After(Duration::from_millis(ms)))
}

/// Lines written in odd-sized pieces come back whole.
#[test]
fn test_recv_until_over_tcp() {
    let (client, mut server) = tcp_pair();
    let sock = BufferedSocket::new(client);

    let writer = thread::spawn(move || {
        let pieces: [&[u8]; 4] = [b"first li", b"ne\r", b"\nsecond line\r\nthi", b"rd\r\n"];
        for piece in pieces {
            server.write_all(piece).unwrap();
            server.flush().unwrap();
            thread::sleep(Duration::from_millis(5));
        }
        server
    });

    let mut lines = Vec::new();
    for _ in 0..3 {
        let line = sock
            .recv_until(b"\r\n", millis(2000), MaxSize::Default, false)
            .unwrap();
        lines.push(String::from_utf8(line.to_vec()).unwrap());
    }
    assert_eq!(lines, ["first line", "second line", "third"]);

    writer.join().unwrap();
}

/// Timeout with no data arrives after roughly the allotted time.
#[test]
fn test_recv_until_timeout_elapses() {
    let (client, _server) = tcp_pair();
    let sock = BufferedSocket::new(client);

    let start = Instant::now();
    let err = sock
        .recv_until(b"\n", millis(100), MaxSize::Default, false)
        .unwrap_err();
    let elapsed = start.elapsed();

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(elapsed >= Duration::from_millis(90), "returned after {elapsed:?}");
    assert!(elapsed < Duration::from_secs(2), "returned after {elapsed:?}");
}

/// A deadline covers the whole operation, not each read.
#[test]
fn test_deadline_spans_multiple_reads() {
    let (client, mut server) = tcp_pair();
    let sock = BufferedSocket::new(client);

    // Trickle one byte every 40ms; never enough within 200ms
    let writer = thread::spawn(move || {
        for _ in 0..20 {
            if server.write_all(b"x").is_err() {
                break;
            }
            thread::sleep(Duration::from_millis(40));
        }
    });

    let start = Instant::now();
    let err = sock.recv_size(100, millis(200)).unwrap_err();
    assert!(err.is_timeout());
    assert!(start.elapsed() < Duration::from_millis(600));

    // The trickled bytes were kept
    assert!(sock.recv_buffer_len() > 0);

    sock.close().unwrap();
    writer.join().unwrap();
}

#[test]
fn test_recv_size_closed_keeps_partial_over_tcp() {
    let (client, mut server) = tcp_pair();
    let sock = BufferedSocket::new(client);

    server.write_all(b"abcd").unwrap();
    server.shutdown(Shutdown::Write).unwrap();

    let err = sock.recv_size(10, millis(2000)).unwrap_err();
    match err {
        SocketError::ConnectionClosed { bytes_read, .. } => assert_eq!(bytes_read, 4),
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(&sock.recv_buffer()[..], b"abcd");
}

#[test]
fn test_recv_close_over_tcp() {
    let (client, mut server) = tcp_pair();
    let sock = BufferedSocket::new(client);

    let writer = thread::spawn(move || {
        for i in 0..10 {
            server.write_all(format!("chunk{i};").as_bytes()).unwrap();
        }
    });
    writer.join().unwrap();

    let all = sock.recv_close(millis(2000), MaxSize::Default).unwrap();
    assert!(all.starts_with(b"chunk0;"));
    assert!(all.ends_with(b"chunk9;"));
}

/// Two threads share one socket: one receives while the other sends.
#[test]
fn test_full_duplex_across_threads() {
    let (client, server) = tcp_pair();
    let sock = Arc::new(BufferedSocket::new(client));

    // Echo peer
    let echo = thread::spawn(move || {
        let peer = BufferedSocket::new(server);
        loop {
            match peer.recv(4096, millis(2000)) {
                Ok(data) if data.is_empty() => break,
                Ok(data) => {
                    peer.send(&data, millis(2000)).unwrap();
                }
                Err(e) => panic!("echo peer failed: {e}"),
            }
        }
    });

    let reader = {
        let sock = Arc::clone(&sock);
        thread::spawn(move || sock.recv_size(1000 * 8, millis(5000)).unwrap())
    };

    for i in 0..1000u32 {
        sock.send(format!("{i:08}").as_bytes(), millis(2000)).unwrap();
    }

    let echoed = reader.join().unwrap();
    assert_eq!(&echoed[..8], b"00000000");
    assert_eq!(&echoed[echoed.len() - 8..], b"00000999");

    sock.shutdown(Shutdown::Write).unwrap();
    echo.join().unwrap();
}

/// Closing from another thread releases a blocked reader.
#[test]
fn test_close_unblocks_reader() {
    let (client, _server) = tcp_pair();
    let sock = Arc::new(BufferedSocket::new(client));

    let reader = {
        let sock = Arc::clone(&sock);
        thread::spawn(move || sock.recv_until(b"\n", Some(Timeout::Never), MaxSize::Default, false))
    };

    thread::sleep(Duration::from_millis(50));
    sock.close().unwrap();

    let result = reader.join().unwrap();
    assert!(result.is_err());
}

#[test]
fn test_nonblocking_recv_would_block() {
    let (client, _server) = tcp_pair();
    let sock = BufferedSocket::new(client);

    let err = sock.recv(16, Some(Timeout::NonBlocking)).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);
}

/// A stream already in non-blocking mode stays that way when its timeout is
/// given explicitly.
#[test]
fn test_with_timeout_keeps_stream_nonblocking() {
    let (client, mut server) = tcp_pair();
    client.set_nonblocking(true).unwrap();
    let sock = BufferedSocket::with_timeout(client, Timeout::NonBlocking);
    assert_eq!(sock.timeout(), Timeout::NonBlocking);

    let err = sock.recv(16, None).unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::WouldBlock);

    server.write_all(b"ready\n").unwrap();
    let deadline = Instant::now() + Duration::from_secs(2);
    let line = loop {
        match sock.recv_until(b"\n", None, MaxSize::Default, false) {
            Ok(line) => break line,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock && Instant::now() < deadline => {
                thread::sleep(Duration::from_millis(5));
            }
            Err(e) => panic!("unexpected error: {e:?}"),
        }
    };
    assert_eq!(&line[..], b"ready");
}

#[test]
fn test_buffer_and_flush_over_tcp() {
    let (client, mut server) = tcp_pair();
    let sock = BufferedSocket::new(client);

    sock.buffer(b"GET / HTTP/1.0\r\n");
    sock.buffer(b"Host: example\r\n");
    assert_eq!(sock.send(b"\r\n", None).unwrap(), 33);

    let mut received = vec![0u8; 33];
    server.read_exact(&mut received).unwrap();
    assert_eq!(&received[..], b"GET / HTTP/1.0\r\nHost: example\r\n\r\n");
}

#[test]
fn test_netstring_round_trip_over_tcp() {
    let (client, server) = tcp_pair();
    let a = NetstringSocket::new(client);
    let b = NetstringSocket::new(server);

    let payloads: Vec<Vec<u8>> = vec![
        b"".to_vec(),
        b"hello".to_vec(),
        b"with:colon,and,commas".to_vec(),
        vec![0u8; 20_000],
    ];
    for p in &payloads {
        a.write(p).unwrap();
    }
    for p in &payloads {
        assert_eq!(&b.read().unwrap()[..], &p[..]);
    }
}

#[test]
fn test_netstring_values_over_tcp() {
    #[derive(Debug, PartialEq, serde::Serialize, serde::Deserialize)]
    struct Event {
        kind: String,
        at: u64,
        tags: Vec<String>,
    }

    let (client, server) = tcp_pair();
    let a = NetstringSocket::new(client);
    let b = NetstringSocket::new(server);

    let event = Event {
        kind: "deploy".to_string(),
        at: 1_700_000_000,
        tags: vec!["prod".to_string(), "eu".to_string()],
    };
    a.write_value(&event).unwrap();
    assert_eq!(b.read_value::<Event>().unwrap(), event);
}

#[test]
fn test_netstring_oversize_prefix_over_tcp() {
    let (client, mut server) = tcp_pair();
    let config = NetstringConfig {
        max_message_size: 999,
        ..NetstringConfig::default()
    };
    let framer = NetstringSocket::with_config(client, config).unwrap();

    server.write_all(b"123456:").unwrap();

    let err = framer.read_with(millis(2000), None).unwrap_err();
    assert!(matches!(err, SocketError::MessageTooLong { max_size: 4, .. }), "{err:?}");
}

#[test]
fn test_netstring_missing_trailer_over_tcp() {
    let (client, mut server) = tcp_pair();
    let framer = NetstringSocket::new(client);

    server.write_all(b"6:abcdef").unwrap();
    drop(server);

    let err = framer.read_with(millis(2000), None).unwrap_err();
    assert!(matches!(err, SocketError::NetstringProtocolError { .. }));
}

#[test]
fn test_config_from_json() {
    let (client, mut server) = tcp_pair();
    let config = SocketConfig::from_json(r#"{"timeout": 0.1, "chunk_read_size": 2}"#).unwrap();
    let sock = BufferedSocket::with_config(client, config).unwrap();

    server.write_all(b"abcdef").unwrap();
    thread::sleep(Duration::from_millis(20));

    // One read of chunk_read_size
    assert_eq!(&sock.recv(10, None).unwrap()[..], b"ab");

    let start = Instant::now();
    let err = sock.recv_size(100, None).unwrap_err();
    assert!(err.is_timeout());
    assert!(start.elapsed() < Duration::from_secs(2));
    assert_eq!(&sock.recv_buffer()[..], b"cdef");
}

#[cfg(unix)]
#[test]
fn test_unix_stream_pair() {
    use std::os::unix::net::UnixStream;

    init_tracing();
    let (a, b) = UnixStream::pair().unwrap();
    let a = NetstringSocket::new(a);
    let b = NetstringSocket::new(b);

    a.write(b"over a unix socket").unwrap();
    assert_eq!(&b.read().unwrap()[..], b"over a unix socket");

    a.close().unwrap();
    assert!(b.read().unwrap_err().is_connection_closed());
}
