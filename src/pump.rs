//! The byte pump: bidirectional copy between a client endpoint and the
//! backend socket.
//!
//! One pump runs per session, as a single task selecting over both read
//! directions plus an idle deadline. Writes are awaited inline, so the
//! substrate's flow control is the backpressure mechanism: a slow reader
//! on one side pauses the opposite reader until the write drains. Each
//! direction's byte counter is touched only by that direction and read
//! only after the loop ends.
//!
//! There is no half-open state. EOF or an error on either side tears
//! down both endpoints; the first terminating cause is the session's end
//! reason, and any errors encountered during teardown are logged at
//! debug without changing it.

use std::fmt;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::Instant;
use tracing::debug;

const CHUNK_SIZE: usize = 8192;

/// Why a session ended. The wire values appear in session logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndReason {
    /// The client closed its side cleanly.
    ClientClose,
    /// The backend closed its side cleanly.
    BackendClose,
    /// Read or write on the client side failed mid-stream.
    ClientError,
    /// Read or write on the backend side failed mid-stream.
    BackendError,
    /// Neither direction moved a byte within the idle timeout.
    Timeout,
    /// The peer address could not be determined at setup.
    NoPeerAddress,
    /// The backend TCP dial failed; no bytes ever flowed.
    BackendDialError,
}

impl EndReason {
    pub fn as_str(self) -> &'static str {
        match self {
            EndReason::ClientClose => "client-close",
            EndReason::BackendClose => "backend-close",
            EndReason::ClientError => "client-error",
            EndReason::BackendError => "backend-error",
            EndReason::Timeout => "timeout",
            EndReason::NoPeerAddress => "no-peer-address",
            EndReason::BackendDialError => "backend-dial-error",
        }
    }
}

impl fmt::Display for EndReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal accounting for one pump run.
#[derive(Debug)]
pub struct PumpReport {
    pub reason: EndReason,
    pub client_to_backend: u64,
    pub backend_to_client: u64,
}

/// Copy bytes between `client` and `backend` in both directions until
/// either side closes, errors, or the idle timeout fires.
pub async fn run<C, B>(client: C, backend: B, idle_timeout: Option<Duration>) -> PumpReport
where
    C: AsyncRead + AsyncWrite + Unpin,
    B: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut backend_read, mut backend_write) = tokio::io::split(backend);
    let mut client_buf = vec![0u8; CHUNK_SIZE];
    let mut backend_buf = vec![0u8; CHUNK_SIZE];
    let mut client_to_backend: u64 = 0;
    let mut backend_to_client: u64 = 0;

    let idle_enabled = idle_timeout.is_some();
    let timeout = idle_timeout.unwrap_or(Duration::ZERO);
    let idle = tokio::time::sleep(timeout);
    tokio::pin!(idle);

    let reason = loop {
        tokio::select! {
            res = client_read.read(&mut client_buf) => match res {
                Ok(0) => break EndReason::ClientClose,
                Ok(n) => {
                    if let Err(e) = backend_write.write_all(&client_buf[..n]).await {
                        debug!(error = %e, "backend write failed");
                        break EndReason::BackendError;
                    }
                    client_to_backend += n as u64;
                    if idle_enabled {
                        idle.as_mut().reset(Instant::now() + timeout);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "client read failed");
                    break EndReason::ClientError;
                }
            },
            res = backend_read.read(&mut backend_buf) => match res {
                Ok(0) => break EndReason::BackendClose,
                Ok(n) => {
                    if let Err(e) = client_write.write_all(&backend_buf[..n]).await {
                        debug!(error = %e, "client write failed");
                        break EndReason::ClientError;
                    }
                    backend_to_client += n as u64;
                    if idle_enabled {
                        idle.as_mut().reset(Instant::now() + timeout);
                    }
                }
                Err(e) => {
                    debug!(error = %e, "backend read failed");
                    break EndReason::BackendError;
                }
            },
            _ = &mut idle, if idle_enabled => break EndReason::Timeout,
        }
    };

    // Tear down both sides regardless of which one terminated first.
    if let Err(e) = client_write.shutdown().await {
        debug!(error = %e, "client shutdown during teardown");
    }
    if let Err(e) = backend_write.shutdown().await {
        debug!(error = %e, "backend shutdown during teardown");
    }

    PumpReport {
        reason,
        client_to_backend,
        backend_to_client,
    }
}
