//! bbsgate: admission-filtering gateway for legacy BBS backends.
//!
//! Accepts telnet-style TCP connections (and, optionally, SSH sessions),
//! runs each peer through a layered admission pipeline (whitelist,
//! blocklist, per-source rate limit, country filter, global connection
//! cap) and shuttles raw bytes between admitted clients and a backend
//! TCP endpoint. SSH sessions are terminated here; the shell channel's
//! payload is bridged onto the backend byte-for-byte.

pub mod config;
pub mod encoding;
pub mod error;
pub mod filter;
pub mod pump;
pub mod server;
pub mod session;

// Re-export commonly used items at crate root.
pub use config::GatewayConfig;
pub use error::{GatewayError, GatewayResult};
pub use server::Gateway;
