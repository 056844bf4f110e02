//! SSH front-end: terminates the SSH transport and bridges the shell
//! channel onto the backend TCP connection.
//!
//! The gateway is not an authentication point: any `password` or `none`
//! attempt is accepted and the username is recorded for logging only;
//! the backend owns whatever login flow it runs over the bridged bytes.
//! Admission runs on the raw TCP peer before a single SSH byte is
//! exchanged, so filtered sources never cost a key exchange.
//!
//! Channel lifecycle per connection: one `session` channel; `pty-req`
//! accepted unconditionally (the `term` string feeds encoding detection,
//! no terminal modes are applied, the stream is raw binary end-to-end);
//! `env` values accumulate; `window-change` is accepted and ignored;
//! `shell` starts the bridge; `exec`, `subsystem`, and everything else
//! are refused without disturbing an active shell. PTY-before-shell is
//! not required; a shell without a PTY gets identical treatment.

use super::{Admission, ConnectionGuard, Gateway};
use crate::config::GatewayConfig;
use crate::error::{GatewayError, GatewayResult};
use crate::pump::{self, EndReason};
use crate::session::{self, Session};
use crate::encoding;
use async_trait::async_trait;
use russh::server::{Auth, Handler, Msg, Session as SshTransport};
use russh::{Channel, ChannelId, MethodSet, Pty};
use std::borrow::Cow;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Keepalive probe interval on the backend hop.
const BACKEND_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);

/// A bound SSH front-end: the raw listener plus the transport config
/// (host key, cipher preference, accepted auth methods).
pub(crate) struct SshListener {
    pub listener: TcpListener,
    pub addr: SocketAddr,
    pub config: Arc<russh::server::Config>,
}

/// Load the host key, resolve the cipher policy, and bind the listener.
/// All failures here are startup-fatal.
pub(crate) async fn bind(cfg: &GatewayConfig) -> GatewayResult<SshListener> {
    let host_key =
        russh_keys::load_secret_key(&cfg.ssh_host_key, None).map_err(|e| GatewayError::HostKey {
            path: cfg.ssh_host_key.display().to_string(),
            source: e,
        })?;

    let ciphers = cipher_preferences(&cfg.ssh_ciphers)?;

    let server_config = russh::server::Config {
        methods: MethodSet::PASSWORD | MethodSet::NONE,
        keys: vec![host_key],
        preferred: russh::Preferred {
            cipher: Cow::Owned(ciphers),
            ..Default::default()
        },
        auth_rejection_time: Duration::from_millis(100),
        auth_rejection_time_initial: Some(Duration::ZERO),
        inactivity_timeout: None,
        ..Default::default()
    };

    let listener = TcpListener::bind(("0.0.0.0", cfg.ssh_listen_port))
        .await
        .map_err(|e| GatewayError::Bind {
            addr: format!("0.0.0.0:{}", cfg.ssh_listen_port),
            source: e,
        })?;
    let addr = listener.local_addr()?;

    Ok(SshListener {
        listener,
        addr,
        config: Arc::new(server_config),
    })
}

/// Map the configured cipher names onto the implementation, preserving
/// order. Unknown names are skipped with a warning; ending up with none
/// is a configuration error.
fn cipher_preferences(names: &[String]) -> GatewayResult<Vec<russh::cipher::Name>> {
    let mut out = Vec::with_capacity(names.len());
    for name in names {
        match cipher_by_name(name) {
            Some(cipher) => out.push(cipher),
            None => warn!(cipher = %name, "unsupported cipher in SSH_CIPHERS, skipping"),
        }
    }
    if out.is_empty() {
        return Err(GatewayError::Config(
            "SSH_CIPHERS contains no usable cipher".into(),
        ));
    }
    Ok(out)
}

fn cipher_by_name(name: &str) -> Option<russh::cipher::Name> {
    use russh::cipher;
    Some(match name {
        "aes128-ctr" => cipher::AES_128_CTR,
        "aes192-ctr" => cipher::AES_192_CTR,
        "aes256-ctr" => cipher::AES_256_CTR,
        "aes256-gcm@openssh.com" => cipher::AES_256_GCM,
        "chacha20-poly1305@openssh.com" => cipher::CHACHA20_POLY1305,
        _ => return None,
    })
}

pub(crate) async fn accept_loop(gateway: Arc<Gateway>, ssh: SshListener) -> GatewayResult<()> {
    info!(addr = %ssh.addr, "ssh front-end listening");
    loop {
        match ssh.listener.accept().await {
            Ok((stream, peer)) => {
                let session_id = session::next_session_id();
                let admission = match gateway.admit(Some(peer)) {
                    Ok(admission) => admission,
                    Err(reason) => {
                        info!(session_id = %session_id, peer = %peer, reason = %reason, "ssh connection refused");
                        continue;
                    }
                };

                debug!(session_id = %session_id, peer = %peer, whitelisted = admission.whitelisted, "connection admitted");
                if let Err(e) = super::tune_socket(&stream, None) {
                    debug!(session_id = %session_id, error = %e, "client socket tuning failed");
                }

                let handler = SshConnection::new(gateway.clone(), session_id, admission);
                let config = ssh.config.clone();
                tokio::spawn(async move {
                    match russh::server::run_stream(config, stream, handler).await {
                        Ok(transport) => {
                            if let Err(e) = transport.await {
                                debug!(peer = %peer, error = %e, "ssh transport ended with error");
                            }
                        }
                        Err(e) => {
                            debug!(peer = %peer, error = %e, "ssh handshake failed");
                        }
                    }
                });
            }
            Err(e) => {
                warn!(error = %e, "ssh accept failed");
            }
        }
    }
}

/// Shell-channel progression for one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChannelPhase {
    Init,
    PtyReady,
    ShellActive,
}

/// Per-connection handler state. The connection-budget guard lives here
/// until the shell starts, then moves into the bridge task so the slot
/// frees as soon as the pump finishes.
pub(crate) struct SshConnection {
    gateway: Arc<Gateway>,
    session_id: String,
    peer: SocketAddr,
    guard: Option<ConnectionGuard>,
    username: Option<String>,
    env: HashMap<String, String>,
    term: Option<String>,
    channel: Option<Channel<Msg>>,
    phase: ChannelPhase,
}

impl SshConnection {
    fn new(gateway: Arc<Gateway>, session_id: String, admission: Admission) -> Self {
        Self {
            gateway,
            session_id,
            peer: admission.peer,
            guard: Some(admission.guard),
            username: None,
            env: HashMap::new(),
            term: None,
            channel: None,
            phase: ChannelPhase::Init,
        }
    }

    fn accept_auth(&mut self, user: &str, method: &str) -> Auth {
        self.username = Some(user.to_string());
        info!(
            session_id = %self.session_id,
            peer = %self.peer,
            user = %user,
            method = method,
            "ssh auth accepted"
        );
        Auth::Accept
    }

    /// Start the backend bridge for the shell channel. Called once, from
    /// `shell_request`, after the success reply is queued.
    fn start_bridge(&mut self, channel: Channel<Msg>) {
        let detected = encoding::detect(&self.env, self.term.as_deref());
        debug!(
            session_id = %self.session_id,
            user = self.username.as_deref().unwrap_or("-"),
            encoding = %detected,
            "starting shell bridge"
        );
        let backend_addr = self.gateway.config().backend_addr_for(detected);
        let session = Session::begin(
            self.session_id.clone(),
            self.peer,
            backend_addr.clone(),
            detected,
            self.term.clone(),
        );
        let guard = self.guard.take();
        let idle_timeout = self.gateway.config().connection_timeout;

        tokio::spawn(async move {
            let _guard = guard;
            let backend = match TcpStream::connect(&backend_addr).await {
                Ok(stream) => stream,
                Err(e) => {
                    error!(session_id = %session.id, backend = %backend_addr, error = %e, "backend dial failed");
                    session.refused(EndReason::BackendDialError);
                    // Dropping the channel closes it; the transport stays
                    // up until the client gives up.
                    drop(channel);
                    return;
                }
            };
            if let Err(e) = super::tune_socket(&backend, Some(BACKEND_KEEPALIVE_INTERVAL)) {
                debug!(session_id = %session.id, error = %e, "backend socket tuning failed");
            }

            let report = pump::run(channel.into_stream(), backend, idle_timeout).await;
            session.finish(&report);
        });
    }
}

#[async_trait]
impl Handler for SshConnection {
    type Error = GatewayError;

    async fn auth_none(&mut self, user: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept_auth(user, "none"))
    }

    async fn auth_password(&mut self, user: &str, _password: &str) -> Result<Auth, Self::Error> {
        Ok(self.accept_auth(user, "password"))
    }

    async fn auth_publickey(
        &mut self,
        user: &str,
        _public_key: &russh_keys::key::PublicKey,
    ) -> Result<Auth, Self::Error> {
        debug!(session_id = %self.session_id, user = %user, "publickey auth refused");
        Ok(Auth::Reject {
            proceed_with_methods: Some(MethodSet::PASSWORD | MethodSet::NONE),
        })
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        _transport: &mut SshTransport,
    ) -> Result<bool, Self::Error> {
        if self.channel.is_some() || self.phase == ChannelPhase::ShellActive {
            debug!(session_id = %self.session_id, "additional session channel refused");
            return Ok(false);
        }
        self.channel = Some(channel);
        Ok(true)
    }

    async fn env_request(
        &mut self,
        _channel: ChannelId,
        name: &str,
        value: &str,
        _transport: &mut SshTransport,
    ) -> Result<(), Self::Error> {
        self.env.insert(name.to_string(), value.to_string());
        Ok(())
    }

    async fn pty_request(
        &mut self,
        channel: ChannelId,
        term: &str,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _modes: &[(Pty, u32)],
        transport: &mut SshTransport,
    ) -> Result<(), Self::Error> {
        // Accepted unconditionally. No terminal modes are applied: the
        // bridged stream is raw binary end-to-end.
        debug!(session_id = %self.session_id, term = %term, "pty accepted");
        self.term = Some(term.to_string());
        if self.phase == ChannelPhase::Init {
            self.phase = ChannelPhase::PtyReady;
        }
        transport.channel_success(channel);
        Ok(())
    }

    async fn window_change_request(
        &mut self,
        _channel: ChannelId,
        _col_width: u32,
        _row_height: u32,
        _pix_width: u32,
        _pix_height: u32,
        _transport: &mut SshTransport,
    ) -> Result<(), Self::Error> {
        // Accepted and ignored; the backend has no notion of the window.
        Ok(())
    }

    async fn shell_request(
        &mut self,
        channel: ChannelId,
        transport: &mut SshTransport,
    ) -> Result<(), Self::Error> {
        if self.phase == ChannelPhase::ShellActive {
            transport.channel_failure(channel);
            return Ok(());
        }
        let Some(chan) = self.channel.take() else {
            transport.channel_failure(channel);
            return Ok(());
        };
        self.phase = ChannelPhase::ShellActive;
        transport.channel_success(channel);
        self.start_bridge(chan);
        Ok(())
    }

    async fn exec_request(
        &mut self,
        channel: ChannelId,
        _data: &[u8],
        transport: &mut SshTransport,
    ) -> Result<(), Self::Error> {
        // Interactive shell only. An active shell is left untouched.
        debug!(session_id = %self.session_id, "exec request refused");
        transport.channel_failure(channel);
        Ok(())
    }

    async fn subsystem_request(
        &mut self,
        channel: ChannelId,
        name: &str,
        transport: &mut SshTransport,
    ) -> Result<(), Self::Error> {
        debug!(session_id = %self.session_id, subsystem = %name, "subsystem request refused");
        transport.channel_failure(channel);
        Ok(())
    }
}
