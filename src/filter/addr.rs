//! Address utilities: canonical peer-address forms, list-entry parsing,
//! and CIDR matching.
//!
//! List entries are parsed once at load time into a tagged form so that
//! malformed lines surface immediately instead of failing silently on
//! every lookup. IPv6 networks are not structurally supported: an IPv6
//! entry (with or without a prefix) is retained as a literal and matches
//! by exact string equality only.

use ipnet::Ipv4Net;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::path::Path;
use tracing::{info, warn};

/// Strip any leading IPv4-mapped prefix (`::ffff:`) from an address
/// string, case-insensitively. Idempotent; unparseable input is returned
/// unchanged so it can still participate in exact-string matching.
pub fn canonical_ip(ip: &str) -> &str {
    const MAPPED: &str = "::ffff:";
    let mut out = ip;
    while out.len() > MAPPED.len() && out[..MAPPED.len()].eq_ignore_ascii_case(MAPPED) {
        out = &out[MAPPED.len()..];
    }
    out
}

/// One parsed whitelist/blocklist entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CidrEntry {
    /// Literal entry, matched by string equality (single addresses,
    /// IPv6 literals, and anything that failed to parse as IPv4 CIDR).
    Exact(String),
    /// IPv4 network in `A.B.C.D/N` form. `/0` matches every IPv4 address.
    V4Cidr(Ipv4Net),
}

impl CidrEntry {
    /// Parse a single trimmed list line. Never fails: anything that is
    /// not a valid IPv4 CIDR becomes an [`CidrEntry::Exact`] literal.
    pub fn parse(entry: &str) -> Self {
        let raw = entry.trim();
        if let Some((addr, prefix)) = raw.split_once('/') {
            if let (Ok(ip), Ok(n)) = (addr.parse::<Ipv4Addr>(), prefix.parse::<u8>()) {
                if let Ok(net) = Ipv4Net::new(ip, n) {
                    return CidrEntry::V4Cidr(net.trunc());
                }
            }
        }
        CidrEntry::Exact(raw.to_string())
    }

    /// Whether the entry matches the given address. `canonical` is the
    /// mapped-prefix-stripped form, `original` the address as observed;
    /// literals are compared against both.
    pub fn matches(&self, canonical: &str, original: &str) -> bool {
        match self {
            CidrEntry::Exact(e) => e == canonical || e == original,
            CidrEntry::V4Cidr(net) => canonical
                .parse::<Ipv4Addr>()
                .map(|ip| net.contains(&ip))
                .unwrap_or(false),
        }
    }
}

/// A loaded whitelist or blocklist: exact literals in a set for O(1)
/// hits, CIDR networks in a vector for a linear scan.
#[derive(Debug, Default)]
pub struct IpSet {
    exact: HashSet<String>,
    cidrs: Vec<Ipv4Net>,
}

impl IpSet {
    /// Build a set from pre-split entry strings (comments and blank
    /// lines already removed).
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut set = Self::default();
        for entry in entries {
            match CidrEntry::parse(entry.as_ref()) {
                CidrEntry::Exact(s) => {
                    set.exact.insert(s);
                }
                CidrEntry::V4Cidr(net) => set.cidrs.push(net),
            }
        }
        set
    }

    /// Load a list file: UTF-8, one entry per line, `#` comments and
    /// blank lines skipped, surrounding whitespace trimmed.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(Self::from_entries(
            content
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#')),
        ))
    }

    /// Load a list file if configured, degrading to an empty set (with a
    /// warning) when the file cannot be read. A missing list never
    /// aborts startup; it only disables that list.
    pub fn load_or_empty(path: Option<&Path>, which: &str) -> Self {
        let Some(path) = path else {
            return Self::default();
        };
        match Self::load(path) {
            Ok(set) => {
                info!(list = which, path = %path.display(), entries = set.len(), "address list loaded");
                set
            }
            Err(e) => {
                warn!(list = which, path = %path.display(), error = %e, "cannot read address list, continuing without it");
                Self::default()
            }
        }
    }

    /// Whether the set matches an address: exact canonical form, exact
    /// original form, then a linear CIDR scan.
    pub fn contains(&self, canonical: &str, original: &str) -> bool {
        if self.exact.contains(canonical) || self.exact.contains(original) {
            return true;
        }
        match canonical.parse::<Ipv4Addr>() {
            Ok(ip) => self.cidrs.iter().any(|net| net.contains(&ip)),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.exact.len() + self.cidrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.cidrs.is_empty()
    }
}
