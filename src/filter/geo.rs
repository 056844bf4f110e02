//! Country filter: a thin, fail-open adapter over a GeoLite2-Country
//! database.
//!
//! A missing or unreadable database disables the filter entirely (it
//! never blocks); per-lookup failures are treated as "unknown country"
//! and handled by the `block_unknown` policy. The reader is immutable
//! after load and safe for concurrent lookups.

use super::addr::canonical_ip;
use maxminddb::geoip2;
use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use tracing::{debug, info, warn};

/// Result of one country lookup. Produced on demand, never cached.
#[derive(Debug, Clone)]
pub struct GeoRecord {
    pub ip: String,
    /// ISO 3166-1 alpha-2, upper-cased.
    pub country_code: Option<String>,
    pub country_name: Option<String>,
}

pub struct GeoFilter {
    reader: Option<maxminddb::Reader<Vec<u8>>>,
    blocked: HashSet<String>,
    block_unknown: bool,
}

impl GeoFilter {
    /// Open the database at `path`. Load failure logs a warning and
    /// leaves the filter permissive.
    pub fn open(path: &Path, blocked: HashSet<String>, block_unknown: bool) -> Self {
        let reader = match maxminddb::Reader::open_readfile(path) {
            Ok(reader) => {
                info!(path = %path.display(), blocked_countries = blocked.len(), "geo database loaded");
                Some(reader)
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "geo database unavailable, country filter disabled");
                None
            }
        };
        Self {
            reader,
            blocked,
            block_unknown,
        }
    }

    /// A filter with no database: never blocks.
    pub fn disabled() -> Self {
        Self {
            reader: None,
            blocked: HashSet::new(),
            block_unknown: false,
        }
    }

    /// Look up the country for an address. `None` when the database is
    /// not loaded, the address does not parse, or the lookup fails.
    pub fn lookup(&self, ip: &str) -> Option<GeoRecord> {
        let reader = self.reader.as_ref()?;
        let canonical = canonical_ip(ip);
        let addr: IpAddr = canonical.parse().ok()?;
        match reader.lookup::<geoip2::Country>(addr) {
            Ok(record) => {
                let country = record.country;
                let country_code = country
                    .as_ref()
                    .and_then(|c| c.iso_code)
                    .map(|c| c.to_ascii_uppercase());
                let country_name = country
                    .as_ref()
                    .and_then(|c| c.names.as_ref())
                    .and_then(|names| names.get("en"))
                    .map(|name| name.to_string());
                Some(GeoRecord {
                    ip: canonical.to_string(),
                    country_code,
                    country_name,
                })
            }
            Err(e) => {
                debug!(ip = canonical, error = %e, "geo lookup failed");
                None
            }
        }
    }

    /// Country-policy check. Returns a denial reason, or `None` when the
    /// peer passes (including whenever the database is unavailable).
    pub fn check(&self, ip: &str) -> Option<String> {
        if self.reader.is_none() {
            return None;
        }
        let record = self.lookup(ip);
        decide(
            record.as_ref().and_then(|r| r.country_code.as_deref()),
            &self.blocked,
            self.block_unknown,
        )
    }
}

/// The pure country-policy decision: an unknown country follows the
/// `block_unknown` switch, a known one is checked against the blocked
/// set (upper-case comparison).
fn decide(
    country_code: Option<&str>,
    blocked: &HashSet<String>,
    block_unknown: bool,
) -> Option<String> {
    match country_code {
        None => block_unknown.then(|| "Blocked unknown country".to_string()),
        Some(code) => {
            let code = code.to_ascii_uppercase();
            blocked
                .contains(&code)
                .then(|| format!("Blocked country: {code}"))
        }
    }
}
