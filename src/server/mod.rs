//! The supervisor: owns the front-end listeners, the admission pipeline,
//! and the global connection budget.
//!
//! # Data Flow
//!
//! ```text
//! accept (tcp.rs / ssh.rs)
//!   → Gateway::admit
//!       → global-cap pre-check
//!       → IpFilter::evaluate (whitelist short-circuits)
//!       → GeoFilter::check (skipped for whitelisted peers)
//!       → ConnectionGuard::try_acquire (CAS against max_connections)
//!   → encoding detection → backend dial → pump::run
//! ```
//!
//! The active-session count is only ever moved by `try_acquire` and the
//! guard's `Drop`, so it can never exceed the configured cap and every
//! admitted session decrements exactly once.

pub mod ssh;
pub mod tcp;

use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::filter::{GeoFilter, IpFilter, IpFilterStats, IpSet, RateLimitSettings};
use socket2::{SockRef, TcpKeepalive};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info};

/// How often the janitor prunes the IP filter's tracking maps.
const JANITOR_PERIOD: Duration = Duration::from_secs(60);

/// Snapshot of gateway-wide counters.
#[derive(Debug, Clone)]
pub struct GatewayStats {
    pub active_connections: usize,
    pub uptime: Duration,
    pub ip_filter: IpFilterStats,
}

/// Bound front-end listeners, produced by [`Gateway::bind`] so that bind
/// and host-key failures surface before serving starts.
pub struct Listeners {
    tcp: TcpListener,
    tcp_addr: SocketAddr,
    ssh: Option<ssh::SshListener>,
}

impl Listeners {
    /// Local address of the plain TCP front-end.
    pub fn tcp_addr(&self) -> SocketAddr {
        self.tcp_addr
    }

    /// Local address of the SSH front-end, when enabled.
    pub fn ssh_addr(&self) -> Option<SocketAddr> {
        self.ssh.as_ref().map(|s| s.addr)
    }
}

/// The gateway supervisor. Construct once, [`bind`](Self::bind), then
/// [`serve`](Self::serve).
pub struct Gateway {
    config: GatewayConfig,
    ip_filter: Arc<IpFilter>,
    geo_filter: Arc<GeoFilter>,
    active: Arc<AtomicUsize>,
    started: Instant,
}

impl Gateway {
    /// Build the gateway: load the whitelist/blocklist files and open the
    /// geo database. List and database problems degrade the respective
    /// filter with a warning; they never abort startup.
    pub fn new(config: GatewayConfig) -> Self {
        let whitelist = IpSet::load_or_empty(config.whitelist_path.as_deref(), "whitelist");
        let blocklist = IpSet::load_or_empty(config.blocklist_path.as_deref(), "blocklist");
        let ip_filter = Arc::new(IpFilter::new(
            RateLimitSettings::from(&config),
            whitelist,
            blocklist,
        ));
        let geo_filter = Arc::new(GeoFilter::open(
            &config.geoip_db_path,
            config.blocked_countries.clone(),
            config.block_unknown_countries,
        ));
        Self {
            config,
            ip_filter,
            geo_filter,
            active: Arc::new(AtomicUsize::new(0)),
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn active_connections(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> GatewayStats {
        GatewayStats {
            active_connections: self.active_connections(),
            uptime: self.started.elapsed(),
            ip_filter: self.ip_filter.stats(),
        }
    }

    /// Bind the front-end listeners. SSH host-key and cipher problems are
    /// caught here too, so a misconfigured SSH front-end fails the whole
    /// startup rather than surfacing on the first connection.
    pub async fn bind(&self) -> GatewayResult<Listeners> {
        let tcp_bind = ("0.0.0.0", self.config.listen_port);
        let tcp = TcpListener::bind(tcp_bind).await.map_err(|e| GatewayError::Bind {
            addr: format!("0.0.0.0:{}", self.config.listen_port),
            source: e,
        })?;
        let tcp_addr = tcp.local_addr()?;

        let ssh = if self.config.ssh_enabled {
            Some(ssh::bind(&self.config).await?)
        } else {
            None
        };

        Ok(Listeners { tcp, tcp_addr, ssh })
    }

    /// Run the accept loops, the janitor, and the periodic stats log.
    /// Returns only on a fatal listener error; dropping the future stops
    /// accepting without touching in-flight sessions.
    pub async fn serve(self: Arc<Self>, listeners: Listeners) -> GatewayResult<()> {
        let janitor = {
            let filter = self.ip_filter.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(JANITOR_PERIOD);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    filter.sweep();
                }
            })
        };
        let stats_log = {
            let gateway = self.clone();
            tokio::spawn(async move {
                let mut tick = tokio::time::interval(JANITOR_PERIOD);
                tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    tick.tick().await;
                    let stats = gateway.stats();
                    debug!(
                        active = stats.active_connections,
                        tracked_sources = stats.ip_filter.tracked_sources,
                        temp_blocks = stats.ip_filter.active_blocks,
                        uptime_secs = stats.uptime.as_secs(),
                        "gateway stats"
                    );
                }
            })
        };

        let result = match listeners.ssh {
            Some(ssh_listener) => {
                tokio::try_join!(
                    tcp::accept_loop(self.clone(), listeners.tcp),
                    ssh::accept_loop(self.clone(), ssh_listener),
                )
                .map(|_| ())
            }
            None => tcp::accept_loop(self.clone(), listeners.tcp).await,
        };

        janitor.abort();
        stats_log.abort();
        result
    }

    /// Wait for in-flight sessions to finish, up to `deadline`.
    pub async fn drain(&self, deadline: Duration) -> GatewayResult<()> {
        let end = tokio::time::Instant::now() + deadline;
        loop {
            let active = self.active_connections();
            if active == 0 {
                return Ok(());
            }
            if tokio::time::Instant::now() >= end {
                info!(active, "drain deadline expired");
                return Err(GatewayError::ShutdownTimeout);
            }
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    /// Run the admission pipeline for a new connection. On success the
    /// returned [`Admission`] holds the connection-budget guard; dropping
    /// it releases the slot.
    pub(crate) fn admit(&self, peer: Option<SocketAddr>) -> Result<Admission, String> {
        if self.active_connections() >= self.config.max_connections {
            return Err("max-connections".into());
        }

        let peer = match peer {
            Some(p) => p,
            None => return Err(crate::pump::EndReason::NoPeerAddress.as_str().into()),
        };
        let ip = peer.ip().to_string();

        let whitelisted = match self.ip_filter.evaluate(&ip) {
            crate::filter::Verdict::Allowed { whitelisted } => whitelisted,
            crate::filter::Verdict::Denied { reason } => return Err(reason),
        };

        if !whitelisted {
            if let Some(reason) = self.geo_filter.check(&ip) {
                return Err(reason);
            }
        }

        let guard = ConnectionGuard::try_acquire(&self.active, self.config.max_connections)
            .ok_or_else(|| String::from("max-connections"))?;

        Ok(Admission {
            guard,
            whitelisted,
            peer,
        })
    }
}

/// Successful admission: the peer address, whether the whitelist
/// short-circuited, and the held connection slot.
pub(crate) struct Admission {
    pub guard: ConnectionGuard,
    pub whitelisted: bool,
    pub peer: SocketAddr,
}

/// RAII slot in the global connection budget. Acquisition is a CAS loop,
/// so concurrent admissions can never push the count past the cap.
pub(crate) struct ConnectionGuard {
    counter: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn try_acquire(counter: &Arc<AtomicUsize>, max: usize) -> Option<Self> {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < max).then_some(n + 1)
            })
            .ok()?;
        Some(Self {
            counter: counter.clone(),
        })
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Apply the gateway's TCP tuning to a socket: no-delay plus keepalive,
/// with an optional keepalive probe interval (used on the backend hop).
pub(crate) fn tune_socket(
    stream: &TcpStream,
    keepalive_interval: Option<Duration>,
) -> std::io::Result<()> {
    stream.set_nodelay(true)?;
    let sock = SockRef::from(stream);
    let mut keepalive = TcpKeepalive::new().with_time(Duration::from_secs(60));
    if let Some(interval) = keepalive_interval {
        keepalive = keepalive.with_interval(interval);
    }
    sock.set_tcp_keepalive(&keepalive)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_acquire_respects_cap() {
        let counter = Arc::new(AtomicUsize::new(0));
        let g1 = ConnectionGuard::try_acquire(&counter, 2).unwrap();
        let g2 = ConnectionGuard::try_acquire(&counter, 2).unwrap();
        assert!(ConnectionGuard::try_acquire(&counter, 2).is_none());
        assert_eq!(counter.load(Ordering::Acquire), 2);

        drop(g1);
        assert_eq!(counter.load(Ordering::Acquire), 1);
        let _g3 = ConnectionGuard::try_acquire(&counter, 2).unwrap();
        drop(g2);
    }

    #[test]
    fn guard_zero_cap_denies_everything() {
        let counter = Arc::new(AtomicUsize::new(0));
        assert!(ConnectionGuard::try_acquire(&counter, 0).is_none());
        assert_eq!(counter.load(Ordering::Acquire), 0);
    }
}
