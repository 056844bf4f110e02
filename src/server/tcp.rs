//! Plain TCP (telnet) front-end.
//!
//! Accepts raw TCP connections, runs each through admission, dials the
//! backend, and hands both sockets to the byte pump. A raw connection
//! carries no environment or terminal hints, so encoding classification
//! always lands on the CP437 default here; the port still goes through
//! the shared selection call so the policy lives in one place.

use super::Gateway;
use crate::error::GatewayResult;
use crate::pump::{self, EndReason};
use crate::session::{self, Session};
use crate::encoding;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Keepalive probe interval on the backend hop.
const BACKEND_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

pub(crate) async fn accept_loop(gateway: Arc<Gateway>, listener: TcpListener) -> GatewayResult<()> {
    let addr = listener.local_addr()?;
    info!(addr = %addr, "telnet front-end listening");
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                let gateway = gateway.clone();
                tokio::spawn(async move {
                    handle_connection(gateway, stream, peer).await;
                });
            }
            Err(e) => {
                warn!(error = %e, "accept failed");
            }
        }
    }
}

async fn handle_connection(gateway: Arc<Gateway>, client: TcpStream, peer: SocketAddr) {
    let session_id = session::next_session_id();

    let admission = match gateway.admit(Some(peer)) {
        Ok(admission) => admission,
        Err(reason) => {
            // Rejected clients see an immediate close, no banner.
            info!(session_id = %session_id, peer = %peer, reason = %reason, "connection refused");
            return;
        }
    };
    debug!(session_id = %session_id, peer = %peer, whitelisted = admission.whitelisted, "connection admitted");
    let _guard = admission.guard;

    let encoding = encoding::detect(&HashMap::new(), None);
    let backend_addr = gateway.config().backend_addr_for(encoding);
    let session = Session::begin(session_id, peer, backend_addr.clone(), encoding, None);

    let backend = match TcpStream::connect(&backend_addr).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(session_id = %session.id, backend = %backend_addr, error = %e, "backend dial failed");
            session.refused(EndReason::BackendDialError);
            return;
        }
    };

    if let Err(e) = super::tune_socket(&client, None) {
        debug!(session_id = %session.id, error = %e, "client socket tuning failed");
    }
    if let Err(e) = super::tune_socket(&backend, Some(BACKEND_KEEPALIVE_INTERVAL)) {
        debug!(session_id = %session.id, error = %e, "backend socket tuning failed");
    }

    let report = pump::run(client, backend, gateway.config().connection_timeout).await;
    session.finish(&report);
}
