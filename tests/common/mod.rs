//! Shared fixtures for the integration tests: throwaway backends and a
//! gateway bootstrapped on ephemeral ports.

#![allow(dead_code)]

use bbsgate::server::Listeners;
use bbsgate::{Gateway, GatewayConfig};
use std::collections::HashSet;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Spawn a backend that sends `banner` on accept, then echoes every byte
/// it receives.
pub async fn banner_echo_backend(banner: &'static [u8]) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                if !banner.is_empty() && stream.write_all(banner).await.is_err() {
                    return;
                }
                let mut buf = [0u8; 4096];
                loop {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => {
                            if stream.write_all(&buf[..n]).await.is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }
    });
    addr
}

/// Plain echo backend.
pub async fn echo_backend() -> SocketAddr {
    banner_echo_backend(b"").await
}

/// Gateway configuration pointed at `backend`, everything else at
/// permissive test defaults: ephemeral ports, rate limiter off, no
/// lists, no geo database, SSH off.
pub fn test_config(backend: SocketAddr) -> GatewayConfig {
    GatewayConfig {
        listen_port: 0,
        backend_host: backend.ip().to_string(),
        backend_port: backend.port(),
        backend_port_utf8: backend.port(),
        backend_port_cp437: backend.port(),
        encoding_detection: true,
        max_connections: 100,
        connection_timeout: Some(Duration::from_secs(30)),
        blocked_countries: HashSet::new(),
        block_unknown_countries: false,
        blocklist_path: None,
        whitelist_path: None,
        geoip_db_path: PathBuf::from("/nonexistent/GeoLite2-Country.mmdb"),
        rate_limit_enabled: false,
        max_connections_per_window: 10,
        rate_limit_window: Duration::from_secs(60),
        rate_limit_block_duration: Duration::from_secs(300),
        ssh_enabled: false,
        ssh_listen_port: 0,
        ssh_host_key: PathBuf::from("./ssh_host_key"),
        ssh_ciphers: vec![
            "aes128-ctr".into(),
            "aes192-ctr".into(),
            "aes256-ctr".into(),
            "aes256-gcm@openssh.com".into(),
            "chacha20-poly1305@openssh.com".into(),
        ],
        log_level: "info".into(),
    }
}

/// Bind and serve a gateway, returning it plus the bound addresses.
pub async fn start_gateway(config: GatewayConfig) -> (Arc<Gateway>, SocketAddr, Option<SocketAddr>) {
    let gateway = Arc::new(Gateway::new(config));
    let listeners: Listeners = gateway.bind().await.unwrap();
    let tcp_addr = listeners.tcp_addr();
    let ssh_addr = listeners.ssh_addr();
    tokio::spawn(gateway.clone().serve(listeners));
    (gateway, tcp_addr, ssh_addr)
}

/// Wait until the gateway reports no active sessions.
pub async fn wait_for_drain(gateway: &Gateway, deadline: Duration) {
    let end = tokio::time::Instant::now() + deadline;
    while gateway.active_connections() > 0 {
        assert!(
            tokio::time::Instant::now() < end,
            "sessions still active after {deadline:?}"
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
}

/// Assert that the gateway closed this connection without sending a byte.
pub async fn assert_refused(stream: &mut tokio::net::TcpStream) {
    let mut buf = [0u8; 16];
    match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
        Ok(Ok(0)) | Ok(Err(_)) => {}
        Ok(Ok(n)) => panic!("expected immediate close, got {n} bytes"),
        Err(_) => panic!("expected immediate close, connection still open"),
    }
}
