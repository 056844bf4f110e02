//! Per-source admission filter: whitelist, blocklist, sliding-window
//! rate limiting, and temporary blocks.
//!
//! One [`IpFilter`] is shared by every front-end. Admission happens once
//! per new connection, well off the data path, so all mutable tracking
//! state sits behind a single coarse mutex. Timestamps older than the
//! window are pruned lazily on access and eagerly by [`IpFilter::sweep`],
//! which the supervisor runs once a minute.

use super::addr::{canonical_ip, IpSet};
use crate::config::GatewayConfig;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Rate-limiter knobs, lifted out of [`GatewayConfig`] so the filter can
/// be built directly in tests.
#[derive(Debug, Clone)]
pub struct RateLimitSettings {
    pub enabled: bool,
    /// Attempts allowed within one window; the `max + 1`-th triggers a block.
    pub max_per_window: u32,
    pub window: Duration,
    pub block_duration: Duration,
}

impl From<&GatewayConfig> for RateLimitSettings {
    fn from(cfg: &GatewayConfig) -> Self {
        Self {
            enabled: cfg.rate_limit_enabled,
            max_per_window: cfg.max_connections_per_window,
            window: cfg.rate_limit_window,
            block_duration: cfg.rate_limit_block_duration,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed {
        /// Set when the whitelist short-circuited the pipeline; such
        /// peers never touch rate-limit state.
        whitelisted: bool,
    },
    Denied {
        reason: String,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed { .. })
    }

    pub fn reason(&self) -> Option<&str> {
        match self {
            Verdict::Allowed { .. } => None,
            Verdict::Denied { reason } => Some(reason),
        }
    }
}

/// A time-bounded rejection imposed on a source that breached the limit.
#[derive(Debug)]
struct TempBlock {
    reason: String,
    blocked_until: Instant,
}

#[derive(Debug, Default)]
struct FilterState {
    /// Connection-attempt timestamps per canonical source address.
    attempts: HashMap<String, Vec<Instant>>,
    /// Active temporary blocks per canonical source address.
    blocked: HashMap<String, TempBlock>,
}

/// Observability snapshot of the filter's tracking maps.
#[derive(Debug, Clone)]
pub struct IpFilterStats {
    pub tracked_sources: usize,
    pub active_blocks: usize,
    pub whitelist_entries: usize,
    pub blocklist_entries: usize,
    pub rate_limit_enabled: bool,
}

/// The per-source admission filter.
pub struct IpFilter {
    settings: RateLimitSettings,
    whitelist: IpSet,
    blocklist: IpSet,
    state: Mutex<FilterState>,
}

impl IpFilter {
    pub fn new(settings: RateLimitSettings, whitelist: IpSet, blocklist: IpSet) -> Self {
        Self {
            settings,
            whitelist,
            blocklist,
            state: Mutex::new(FilterState::default()),
        }
    }

    /// Evaluate one connection attempt from `ip` and record it.
    ///
    /// Order: whitelist (short-circuits, records nothing), blocklist,
    /// temporary block (expired entries are purged on sight), then the
    /// sliding-window rate limit. Exactly `max_per_window` attempts in a
    /// window pass; the next one trips a temporary block and clears the
    /// attempt history so the source starts fresh once the block lapses.
    pub fn evaluate(&self, ip: &str) -> Verdict {
        let original = ip.trim();
        if original.is_empty() {
            return Verdict::Denied {
                reason: "Invalid IP address".into(),
            };
        }
        let canonical = canonical_ip(original);

        if self.whitelist.contains(canonical, original) {
            return Verdict::Allowed { whitelisted: true };
        }

        if self.blocklist.contains(canonical, original) {
            return Verdict::Denied {
                reason: "IP in blocklist".into(),
            };
        }

        let now = Instant::now();
        let mut state = self.state.lock().expect("ip filter lock poisoned");

        if let Some(block) = state.blocked.get(canonical) {
            if block.blocked_until > now {
                return Verdict::Denied {
                    reason: block.reason.clone(),
                };
            }
            state.blocked.remove(canonical);
            debug!(ip = canonical, "temporary block expired");
        }

        if self.settings.enabled {
            let cutoff = now.checked_sub(self.settings.window);
            let attempts = state.attempts.entry(canonical.to_string()).or_default();
            attempts.push(now);
            if let Some(cutoff) = cutoff {
                attempts.retain(|t| *t > cutoff);
            }
            let count = attempts.len() as u32;
            if count > self.settings.max_per_window {
                let reason = format!(
                    "Rate limit exceeded: {} in {}ms",
                    count,
                    self.settings.window.as_millis()
                );
                drop(state);
                self.block(canonical, self.settings.block_duration, reason);
                return Verdict::Denied {
                    reason: "Rate limit exceeded".into(),
                };
            }
        }

        Verdict::Allowed { whitelisted: false }
    }

    /// Impose a temporary block on `ip`. The attempt history is cleared
    /// so the window restarts once the block expires.
    pub fn block(&self, ip: &str, duration: Duration, reason: String) {
        let canonical = canonical_ip(ip);
        warn!(ip = canonical, duration_ms = duration.as_millis() as u64, reason = %reason, "source temporarily blocked");
        let mut state = self.state.lock().expect("ip filter lock poisoned");
        state.attempts.remove(canonical);
        state.blocked.insert(
            canonical.to_string(),
            TempBlock {
                reason,
                blocked_until: Instant::now() + duration,
            },
        );
    }

    /// Janitor pass: prune aged attempt timestamps (dropping sources with
    /// none left) and expired temporary blocks.
    pub fn sweep(&self) {
        let now = Instant::now();
        let cutoff = now.checked_sub(self.settings.window);
        let mut state = self.state.lock().expect("ip filter lock poisoned");
        state.attempts.retain(|_, timestamps| {
            if let Some(cutoff) = cutoff {
                timestamps.retain(|t| *t > cutoff);
            }
            !timestamps.is_empty()
        });
        let before = state.blocked.len();
        state.blocked.retain(|_, block| block.blocked_until > now);
        let expired = before - state.blocked.len();
        if expired > 0 {
            info!(expired, "expired temporary blocks removed");
        }
    }

    pub fn stats(&self) -> IpFilterStats {
        let now = Instant::now();
        let state = self.state.lock().expect("ip filter lock poisoned");
        IpFilterStats {
            tracked_sources: state.attempts.len(),
            active_blocks: state
                .blocked
                .values()
                .filter(|b| b.blocked_until > now)
                .count(),
            whitelist_entries: self.whitelist.len(),
            blocklist_entries: self.blocklist.len(),
            rate_limit_enabled: self.settings.enabled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(max: u32, window_ms: u64, block_ms: u64) -> RateLimitSettings {
        RateLimitSettings {
            enabled: true,
            max_per_window: max,
            window: Duration::from_millis(window_ms),
            block_duration: Duration::from_millis(block_ms),
        }
    }

    fn filter(max: u32, window_ms: u64, block_ms: u64) -> IpFilter {
        IpFilter::new(settings(max, window_ms, block_ms), IpSet::default(), IpSet::default())
    }

    #[test]
    fn empty_ip_is_invalid() {
        let f = filter(10, 60_000, 1_000);
        assert_eq!(
            f.evaluate("").reason(),
            Some("Invalid IP address")
        );
        assert_eq!(f.evaluate("   ").reason(), Some("Invalid IP address"));
    }

    #[test]
    fn allows_up_to_max_then_blocks() {
        let f = filter(3, 60_000, 60_000);
        for _ in 0..3 {
            assert!(f.evaluate("198.51.100.9").is_allowed());
        }
        let fourth = f.evaluate("198.51.100.9");
        assert_eq!(fourth.reason(), Some("Rate limit exceeded"));

        // Subsequent attempts observe the stored block reason.
        let fifth = f.evaluate("198.51.100.9");
        assert_eq!(fifth.reason(), Some("Rate limit exceeded: 4 in 60000ms"));
    }

    #[test]
    fn block_expires_and_window_restarts() {
        let f = filter(3, 60_000, 50);
        for _ in 0..4 {
            f.evaluate("198.51.100.9");
        }
        assert!(!f.evaluate("198.51.100.9").is_allowed());

        std::thread::sleep(Duration::from_millis(80));
        // Block lapsed; the attempt history was cleared at block time, so
        // the source gets a fresh window.
        assert!(f.evaluate("198.51.100.9").is_allowed());
    }

    #[test]
    fn old_attempts_age_out_of_the_window() {
        let f = filter(2, 1_000, 60_000);
        assert!(f.evaluate("203.0.113.5").is_allowed());
        assert!(f.evaluate("203.0.113.5").is_allowed());
        std::thread::sleep(Duration::from_millis(1_100));
        assert!(f.evaluate("203.0.113.5").is_allowed());
    }

    #[test]
    fn sources_are_tracked_independently() {
        let f = filter(1, 60_000, 60_000);
        assert!(f.evaluate("10.0.0.1").is_allowed());
        assert!(f.evaluate("10.0.0.2").is_allowed());
        assert!(!f.evaluate("10.0.0.1").is_allowed());
        assert!(!f.evaluate("10.0.0.2").is_allowed());
    }

    #[test]
    fn blocklist_hit() {
        let f = IpFilter::new(
            settings(10, 60_000, 1_000),
            IpSet::default(),
            IpSet::from_entries(["10.0.0.0/24"]),
        );
        assert_eq!(f.evaluate("10.0.0.50").reason(), Some("IP in blocklist"));
        assert!(f.evaluate("10.0.1.1").is_allowed());
    }

    #[test]
    fn mapped_address_hits_blocklist() {
        let f = IpFilter::new(
            settings(10, 60_000, 1_000),
            IpSet::default(),
            IpSet::from_entries(["10.0.0.50"]),
        );
        assert_eq!(
            f.evaluate("::ffff:10.0.0.50").reason(),
            Some("IP in blocklist")
        );
    }

    #[test]
    fn whitelist_bypasses_blocklist_and_rate_limit() {
        let f = IpFilter::new(
            settings(1, 60_000, 60_000),
            IpSet::from_entries(["10.0.0.0/8"]),
            IpSet::from_entries(["10.1.2.3"]),
        );
        for _ in 0..5 {
            assert_eq!(
                f.evaluate("10.1.2.3"),
                Verdict::Allowed { whitelisted: true }
            );
        }
        // Whitelisted peers never touch the tracking maps.
        let stats = f.stats();
        assert_eq!(stats.tracked_sources, 0);
        assert_eq!(stats.active_blocks, 0);
    }

    #[test]
    fn disabled_rate_limit_records_nothing() {
        let mut s = settings(1, 60_000, 60_000);
        s.enabled = false;
        let f = IpFilter::new(s, IpSet::default(), IpSet::default());
        for _ in 0..10 {
            assert!(f.evaluate("192.0.2.1").is_allowed());
        }
        assert_eq!(f.stats().tracked_sources, 0);
    }

    #[test]
    fn sweep_prunes_empty_sources_and_expired_blocks() {
        let f = filter(5, 50, 50);
        f.evaluate("192.0.2.1");
        f.block("192.0.2.2", Duration::from_millis(20), "test".into());
        assert_eq!(f.stats().tracked_sources, 1);

        std::thread::sleep(Duration::from_millis(80));
        f.sweep();
        let stats = f.stats();
        assert_eq!(stats.tracked_sources, 0);
        assert_eq!(stats.active_blocks, 0);
    }

    #[test]
    fn manual_block_is_observed_until_expiry() {
        let f = filter(100, 60_000, 60_000);
        f.block("192.0.2.9", Duration::from_millis(60), "manual".into());
        assert_eq!(f.evaluate("192.0.2.9").reason(), Some("manual"));
        std::thread::sleep(Duration::from_millis(90));
        assert!(f.evaluate("192.0.2.9").is_allowed());
    }
}
