//! End-to-end tests for the plain TCP front-end: admission over real
//! sockets, backend bridging, and teardown behavior.

mod common;

use common::*;
use std::io::Write as _;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn happy_path_roundtrip() {
    let backend = echo_backend().await;
    let (gateway, tcp_addr, _) = start_gateway(test_config(backend)).await;

    let mut client = TcpStream::connect(tcp_addr).await.unwrap();
    client.write_all(b"HELLO\r\n").await.unwrap();

    let mut buf = [0u8; 7];
    client.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"HELLO\r\n");

    // Client closes; the pump tears down both sides and releases the slot.
    drop(client);
    wait_for_drain(&gateway, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn large_transfer_is_preserved() {
    let backend = echo_backend().await;
    let (_gateway, tcp_addr, _) = start_gateway(test_config(backend)).await;

    let mut client = TcpStream::connect(tcp_addr).await.unwrap();
    let payload: Vec<u8> = (0..100_000u32).map(|i| (i % 253) as u8).collect();

    let expected = payload.clone();
    let (mut read_half, mut write_half) = client.split();
    let write = async {
        write_half.write_all(&payload).await.unwrap();
        write_half.flush().await.unwrap();
    };
    let read = async {
        let mut received = vec![0u8; expected.len()];
        read_half.read_exact(&mut received).await.unwrap();
        received
    };
    let (_, received) = tokio::join!(write, read);
    assert_eq!(received, expected);
}

#[tokio::test]
async fn blocklist_refuses_loopback_cidr() {
    let backend = echo_backend().await;

    let mut blocklist = tempfile::NamedTempFile::new().unwrap();
    writeln!(blocklist, "# local test block").unwrap();
    writeln!(blocklist, "127.0.0.0/24").unwrap();

    let mut config = test_config(backend);
    config.blocklist_path = Some(blocklist.path().to_path_buf());
    let (gateway, tcp_addr, _) = start_gateway(config).await;

    let mut client = TcpStream::connect(tcp_addr).await.unwrap();
    assert_refused(&mut client).await;
    assert_eq!(gateway.active_connections(), 0);
}

#[tokio::test]
async fn whitelist_overrides_blocklist() {
    let backend = echo_backend().await;

    let mut blocklist = tempfile::NamedTempFile::new().unwrap();
    writeln!(blocklist, "127.0.0.1").unwrap();
    let mut whitelist = tempfile::NamedTempFile::new().unwrap();
    writeln!(whitelist, "127.0.0.0/8").unwrap();

    let mut config = test_config(backend);
    config.blocklist_path = Some(blocklist.path().to_path_buf());
    config.whitelist_path = Some(whitelist.path().to_path_buf());
    // A tiny rate budget proves whitelisted peers are exempt from it too.
    config.rate_limit_enabled = true;
    config.max_connections_per_window = 1;
    let (_gateway, tcp_addr, _) = start_gateway(config).await;

    for _ in 0..4 {
        let mut client = TcpStream::connect(tcp_addr).await.unwrap();
        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        client.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}

#[tokio::test]
async fn rate_limit_trips_after_budget() {
    let backend = echo_backend().await;

    let mut config = test_config(backend);
    config.rate_limit_enabled = true;
    config.max_connections_per_window = 2;
    let (_gateway, tcp_addr, _) = start_gateway(config).await;

    for _ in 0..2 {
        let mut client = TcpStream::connect(tcp_addr).await.unwrap();
        client.write_all(b"ok").await.unwrap();
        let mut buf = [0u8; 2];
        client.read_exact(&mut buf).await.unwrap();
    }

    let mut third = TcpStream::connect(tcp_addr).await.unwrap();
    assert_refused(&mut third).await;
}

#[tokio::test]
async fn global_cap_closes_excess_connections() {
    let backend = echo_backend().await;

    let mut config = test_config(backend);
    config.max_connections = 1;
    let (gateway, tcp_addr, _) = start_gateway(config).await;

    let mut first = TcpStream::connect(tcp_addr).await.unwrap();
    first.write_all(b"hold").await.unwrap();
    let mut buf = [0u8; 4];
    first.read_exact(&mut buf).await.unwrap();

    let mut second = TcpStream::connect(tcp_addr).await.unwrap();
    assert_refused(&mut second).await;

    // Freeing the slot lets the next connection through.
    drop(first);
    wait_for_drain(&gateway, Duration::from_secs(5)).await;
    let mut third = TcpStream::connect(tcp_addr).await.unwrap();
    third.write_all(b"next").await.unwrap();
    third.read_exact(&mut buf).await.unwrap();
    assert_eq!(&buf, b"next");
}

#[tokio::test]
async fn backend_dial_failure_closes_client() {
    // Bind-then-drop to get a port with nothing listening.
    let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let dead_addr = unused.local_addr().unwrap();
    drop(unused);

    let (gateway, tcp_addr, _) = start_gateway(test_config(dead_addr)).await;

    let mut client = TcpStream::connect(tcp_addr).await.unwrap();
    assert_refused(&mut client).await;
    wait_for_drain(&gateway, Duration::from_secs(5)).await;
}

#[tokio::test]
async fn idle_timeout_tears_down_the_session() {
    let backend = echo_backend().await;

    let mut config = test_config(backend);
    config.connection_timeout = Some(Duration::from_millis(300));
    let (gateway, tcp_addr, _) = start_gateway(config).await;

    let mut client = TcpStream::connect(tcp_addr).await.unwrap();
    client.write_all(b"one").await.unwrap();
    let mut buf = [0u8; 3];
    client.read_exact(&mut buf).await.unwrap();

    // No traffic from either side: the gateway closes both ends.
    let mut scratch = [0u8; 8];
    let n = tokio::time::timeout(Duration::from_secs(5), client.read(&mut scratch))
        .await
        .expect("idle timeout did not fire")
        .unwrap_or(0);
    assert_eq!(n, 0);
    wait_for_drain(&gateway, Duration::from_secs(5)).await;
}
