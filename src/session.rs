//! Session identity and terminal accounting.

use crate::encoding::TermEncoding;
use crate::pump::{EndReason, PumpReport};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::{error, info};

/// Generate a session id: a monotonic sequence number plus a short
/// random suffix so ids stay unique across restarts in aggregated logs.
pub fn next_session_id() -> String {
    static SEQ: AtomicU64 = AtomicU64::new(1);
    let seq = SEQ.fetch_add(1, Ordering::Relaxed);
    let suffix: [u8; 4] = rand::random();
    format!("{seq:06}-{}", hex::encode(suffix))
}

/// One admitted session, owned by the task that pumps it.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub client_addr: SocketAddr,
    pub backend_addr: String,
    pub encoding: TermEncoding,
    pub terminal_type: Option<String>,
    pub started: Instant,
}

impl Session {
    pub fn begin(
        id: String,
        client_addr: SocketAddr,
        backend_addr: String,
        encoding: TermEncoding,
        terminal_type: Option<String>,
    ) -> Self {
        info!(
            session_id = %id,
            peer = %client_addr,
            backend = %backend_addr,
            encoding = %encoding,
            term = terminal_type.as_deref().unwrap_or("-"),
            "session established"
        );
        Self {
            id,
            client_addr,
            backend_addr,
            encoding,
            terminal_type,
            started: Instant::now(),
        }
    }

    /// Log the terminal accounting line for a session that ran a pump.
    /// Transport errors surface at error level, everything else at info.
    pub fn finish(&self, report: &PumpReport) {
        let duration_ms = self.started.elapsed().as_millis() as u64;
        if matches!(report.reason, EndReason::ClientError | EndReason::BackendError) {
            error!(
                session_id = %self.id,
                peer = %self.client_addr,
                backend = %self.backend_addr,
                reason = %report.reason,
                client_to_backend = report.client_to_backend,
                backend_to_client = report.backend_to_client,
                duration_ms,
                "session ended"
            );
        } else {
            info!(
                session_id = %self.id,
                peer = %self.client_addr,
                backend = %self.backend_addr,
                reason = %report.reason,
                client_to_backend = report.client_to_backend,
                backend_to_client = report.backend_to_client,
                duration_ms,
                "session ended"
            );
        }
    }

    /// Log a session that never got a working backend connection.
    pub fn refused(&self, reason: EndReason) {
        error!(
            session_id = %self.id,
            peer = %self.client_addr,
            backend = %self.backend_addr,
            reason = %reason,
            "session not established"
        );
    }
}
