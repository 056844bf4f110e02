//! bbsgate: admission-filtering telnet/SSH gateway for legacy BBS
//! backends.
//!
//! Configuration is environment-driven (see `config.rs`); the CLI only
//! carries a few overrides for interactive use.

use bbsgate::config::Overrides;
use bbsgate::{Gateway, GatewayConfig};
use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// bbsgate: admission-filtering BBS gateway
#[derive(Parser, Debug)]
#[command(name = "bbsgate", version, about = "Admission-filtering BBS gateway")]
struct Cli {
    /// Telnet front-end port (overrides LISTEN_PORT)
    #[arg(long)]
    listen_port: Option<u16>,

    /// SSH front-end port (overrides SSH_LISTEN_PORT)
    #[arg(long)]
    ssh_port: Option<u16>,

    /// Log level (trace, debug, info, warn, error; overrides LOG_LEVEL)
    #[arg(long)]
    log_level: Option<String>,
}

/// Grace period between the shutdown signal and a forced exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing. RUST_LOG wins when set; otherwise the CLI flag
    // or the LOG_LEVEL variable seeds the filter.
    use tracing_subscriber::EnvFilter;
    let default_level = cli
        .log_level
        .clone()
        .or_else(|| std::env::var("LOG_LEVEL").ok())
        .unwrap_or_else(|| "info".to_string());
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&default_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    let config = match GatewayConfig::from_env(Overrides {
        listen_port: cli.listen_port,
        ssh_listen_port: cli.ssh_port,
        log_level: cli.log_level,
    }) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let gateway = Arc::new(Gateway::new(config));

    let listeners = match gateway.bind().await {
        Ok(listeners) => listeners,
        Err(e) => {
            error!(error = %e, "startup failed");
            std::process::exit(1);
        }
    };

    info!(
        version = env!("CARGO_PKG_VERSION"),
        telnet = %listeners.tcp_addr(),
        ssh = listeners.ssh_addr().map(|a| a.to_string()).as_deref().unwrap_or("disabled"),
        backend = %gateway.config().backend_host,
        "bbsgate started"
    );

    tokio::select! {
        result = gateway.clone().serve(listeners) => {
            if let Err(e) = result {
                error!(error = %e, "gateway error");
                std::process::exit(1);
            }
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal, draining sessions");
        }
    }

    // Listeners are gone; give in-flight sessions a bounded window to
    // finish before forcing the exit.
    match gateway.drain(SHUTDOWN_GRACE).await {
        Ok(()) => info!("bbsgate stopped"),
        Err(e) => {
            error!(error = %e, "forced exit");
            std::process::exit(1);
        }
    }
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler");
        tokio::select! {
            _ = ctrl_c => {}
            _ = sigterm.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}
