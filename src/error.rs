use thiserror::Error;

/// Errors produced by the gateway.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("cannot read SSH host key {path}: {source}")]
    HostKey {
        path: String,
        #[source]
        source: russh_keys::Error,
    },

    #[error("listener bind failed on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("ssh transport error: {0}")]
    Ssh(#[from] russh::Error),

    #[error("shutdown timed out with sessions still active")]
    ShutdownTimeout,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type GatewayResult<T> = Result<T, GatewayError>;
