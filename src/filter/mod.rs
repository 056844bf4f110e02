//! Admission filtering: everything that decides whether a peer may talk
//! to the backend at all.
//!
//! The filter layer is composed of three cooperating submodules:
//!
//! - **[`addr`]**: canonical IP forms (IPv4-mapped IPv6 stripping), the
//!   tagged [`CidrEntry`](addr::CidrEntry) list-entry type, and [`IpSet`](addr::IpSet),
//!   the loaded whitelist/blocklist representation.
//!
//! - **[`ip`]**: the [`IpFilter`](ip::IpFilter) with whitelist short-circuit,
//!   blocklist rejection, sliding-window rate limiting with temporary
//!   blocks, and the janitor sweep that keeps the tracking maps bounded.
//!
//! - **[`geo`]**: the [`GeoFilter`](geo::GeoFilter), a fail-open adapter
//!   over a GeoLite2-Country database that rejects peers by country code.
//!
//! Evaluation order for a new connection: whitelist (bypasses everything
//! below), blocklist, temporary block, rate limit, then country filter.

pub mod addr;
pub mod geo;
pub mod ip;

pub use addr::{canonical_ip, CidrEntry, IpSet};
pub use geo::{GeoFilter, GeoRecord};
pub use ip::{IpFilter, IpFilterStats, RateLimitSettings, Verdict};
