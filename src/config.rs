//! Gateway configuration: environment variables + CLI overrides.
//!
//! The deployment contract is environment-driven; the CLI exposes a small
//! set of overrides for interactive use. Precedence: CLI flag, then
//! environment variable, then default. All validation happens here so the
//! rest of the gateway can trust the resolved values.

use crate::encoding::TermEncoding;
use crate::error::{GatewayError, GatewayResult};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;

/// Default cipher preference advertised to SSH clients, oldest-friendly
/// first. Legacy BBS terminals (SyncTERM, NetRunner) negotiate the CTR
/// family; modern OpenSSH picks one of the AEAD entries.
pub const DEFAULT_SSH_CIPHERS: &str =
    "aes128-ctr,aes192-ctr,aes256-ctr,aes256-gcm@openssh.com,chacha20-poly1305@openssh.com";

/// CLI overrides applied on top of the environment.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub listen_port: Option<u16>,
    pub ssh_listen_port: Option<u16>,
    pub log_level: Option<String>,
}

/// Resolved gateway configuration (validated, ready to use).
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Port for the plain TCP front-end.
    pub listen_port: u16,
    /// Backend host (IP or name) every admitted session is bridged to.
    pub backend_host: String,
    /// Default backend port.
    pub backend_port: u16,
    /// Backend port for sessions classified as UTF-8.
    pub backend_port_utf8: u16,
    /// Backend port for sessions classified as CP437.
    pub backend_port_cp437: u16,
    /// Whether encoding detection drives backend port selection.
    pub encoding_detection: bool,
    /// Global cap on concurrently active sessions.
    pub max_connections: usize,
    /// Per-session idle timeout; `None` when disabled.
    pub connection_timeout: Option<Duration>,
    /// ISO 3166-1 alpha-2 codes to reject (upper-cased).
    pub blocked_countries: HashSet<String>,
    /// Whether peers with no resolvable country are rejected.
    pub block_unknown_countries: bool,
    /// Blocklist file, one IP or CIDR per line.
    pub blocklist_path: Option<PathBuf>,
    /// Whitelist file, one IP or CIDR per line.
    pub whitelist_path: Option<PathBuf>,
    /// GeoLite2-Country database file.
    pub geoip_db_path: PathBuf,
    /// Master switch for the per-source rate limiter.
    pub rate_limit_enabled: bool,
    /// Connection attempts allowed per source within one window.
    pub max_connections_per_window: u32,
    /// Sliding rate-limit window.
    pub rate_limit_window: Duration,
    /// Temporary block imposed on a source that breaches the limit.
    pub rate_limit_block_duration: Duration,
    /// Whether the SSH front-end runs at all.
    pub ssh_enabled: bool,
    /// Port for the SSH front-end.
    pub ssh_listen_port: u16,
    /// PEM host key presented by the SSH front-end.
    pub ssh_host_key: PathBuf,
    /// Cipher names advertised during key exchange, in preference order.
    pub ssh_ciphers: Vec<String>,
    /// Default log filter (overridden by `RUST_LOG`).
    pub log_level: String,
}

impl GatewayConfig {
    /// Resolve configuration from the process environment.
    pub fn from_env(overrides: Overrides) -> GatewayResult<Self> {
        let vars: HashMap<String, String> = std::env::vars().collect();
        Self::resolve(&vars, overrides)
    }

    /// Resolve configuration from an explicit variable map. Split out from
    /// [`from_env`] so tests never touch process-global state.
    pub fn resolve(vars: &HashMap<String, String>, overrides: Overrides) -> GatewayResult<Self> {
        let listen_port = match overrides.listen_port {
            Some(0) => {
                return Err(GatewayError::Config(
                    "--listen-port: expected a port in 1..65535".into(),
                ))
            }
            Some(p) => p,
            None => port(vars, "LISTEN_PORT", 23)?,
        };

        let backend_host = str_var(vars, "BACKEND_HOST", "127.0.0.1");
        if backend_host.is_empty() {
            return Err(GatewayError::Config(
                "BACKEND_HOST must not be empty".into(),
            ));
        }

        let backend_port = port(vars, "BACKEND_PORT", 2323)?;
        let backend_port_utf8 = port(vars, "BACKEND_PORT_UTF8", backend_port)?;
        let backend_port_cp437 = port(vars, "BACKEND_PORT_CP437", backend_port)?;

        let max_connections_per_window = u32_var(vars, "MAX_CONNECTIONS_PER_WINDOW", 10)?;
        if max_connections_per_window < 1 {
            return Err(GatewayError::Config(
                "MAX_CONNECTIONS_PER_WINDOW must be at least 1".into(),
            ));
        }

        let window_ms = u64_var(vars, "RATE_LIMIT_WINDOW_MS", 60_000)?;
        if window_ms < 1_000 {
            return Err(GatewayError::Config(
                "RATE_LIMIT_WINDOW_MS must be at least 1000".into(),
            ));
        }

        let timeout_ms = u64_var(vars, "CONNECTION_TIMEOUT", 300_000)?;

        let blocked_countries = str_var(vars, "BLOCKED_COUNTRIES", "")
            .split(',')
            .map(|c| c.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
            .collect();

        let ssh_listen_port = match overrides.ssh_listen_port {
            Some(0) => {
                return Err(GatewayError::Config(
                    "--ssh-port: expected a port in 1..65535".into(),
                ))
            }
            Some(p) => p,
            None => port(vars, "SSH_LISTEN_PORT", 2222)?,
        };

        let ssh_ciphers = str_var(vars, "SSH_CIPHERS", DEFAULT_SSH_CIPHERS)
            .split(',')
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>();
        if ssh_ciphers.is_empty() {
            return Err(GatewayError::Config("SSH_CIPHERS must not be empty".into()));
        }

        let log_level = overrides
            .log_level
            .unwrap_or_else(|| str_var(vars, "LOG_LEVEL", "info"));

        Ok(Self {
            listen_port,
            backend_host,
            backend_port,
            backend_port_utf8,
            backend_port_cp437,
            encoding_detection: bool_var(vars, "ENCODING_DETECTION_ENABLED", true)?,
            max_connections: u64_var(vars, "MAX_CONNECTIONS", 100)? as usize,
            connection_timeout: match timeout_ms {
                0 => None,
                ms => Some(Duration::from_millis(ms)),
            },
            blocked_countries,
            block_unknown_countries: bool_var(vars, "BLOCK_UNKNOWN_COUNTRIES", false)?,
            blocklist_path: path_var(vars, "BLOCKLIST_PATH"),
            whitelist_path: path_var(vars, "WHITELIST_PATH"),
            geoip_db_path: path_var(vars, "GEOIP_DB_PATH")
                .unwrap_or_else(|| PathBuf::from("./GeoLite2-Country.mmdb")),
            rate_limit_enabled: bool_var(vars, "RATE_LIMIT_ENABLED", true)?,
            max_connections_per_window,
            rate_limit_window: Duration::from_millis(window_ms),
            rate_limit_block_duration: Duration::from_millis(u64_var(
                vars,
                "RATE_LIMIT_BLOCK_DURATION_MS",
                300_000,
            )?),
            ssh_enabled: bool_var(vars, "SSH_ENABLED", false)?,
            ssh_listen_port,
            ssh_host_key: path_var(vars, "SSH_HOST_KEY")
                .unwrap_or_else(|| PathBuf::from("./ssh_host_key")),
            ssh_ciphers,
            log_level,
        })
    }

    /// Backend port for a session with the given encoding. With detection
    /// disabled every session lands on the default port.
    pub fn backend_port_for(&self, encoding: TermEncoding) -> u16 {
        if !self.encoding_detection {
            return self.backend_port;
        }
        match encoding {
            TermEncoding::Utf8 => self.backend_port_utf8,
            TermEncoding::Cp437 => self.backend_port_cp437,
        }
    }

    /// Backend address string for the given encoding, ready to dial.
    pub fn backend_addr_for(&self, encoding: TermEncoding) -> String {
        format!("{}:{}", self.backend_host, self.backend_port_for(encoding))
    }
}

fn str_var(vars: &HashMap<String, String>, key: &str, default: &str) -> String {
    match vars.get(key) {
        Some(v) => v.trim().to_string(),
        None => default.to_string(),
    }
}

fn path_var(vars: &HashMap<String, String>, key: &str) -> Option<PathBuf> {
    vars.get(key)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}

fn u64_var(vars: &HashMap<String, String>, key: &str, default: u64) -> GatewayResult<u64> {
    match vars.get(key) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<u64>()
            .map_err(|_| GatewayError::Config(format!("{key}: not a number: {v:?}"))),
    }
}

fn u32_var(vars: &HashMap<String, String>, key: &str, default: u32) -> GatewayResult<u32> {
    match vars.get(key) {
        None => Ok(default),
        Some(v) => v
            .trim()
            .parse::<u32>()
            .map_err(|_| GatewayError::Config(format!("{key}: not a number: {v:?}"))),
    }
}

fn port(vars: &HashMap<String, String>, key: &str, default: u16) -> GatewayResult<u16> {
    match vars.get(key) {
        None => Ok(default),
        Some(v) => match v.trim().parse::<u16>() {
            Ok(0) | Err(_) => Err(GatewayError::Config(format!(
                "{key}: expected a port in 1..65535, got {v:?}"
            ))),
            Ok(p) => Ok(p),
        },
    }
}

fn bool_var(vars: &HashMap<String, String>, key: &str, default: bool) -> GatewayResult<bool> {
    match vars.get(key) {
        None => Ok(default),
        Some(v) => match v.trim().to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(GatewayError::Config(format!(
                "{key}: expected a boolean, got {other:?}"
            ))),
        },
    }
}
