//! SSH transport implementation using russh.

use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use log::{debug, warn};
use russh::client::{self, Handle, KeyboardInteractiveAuthResponse, Msg};
use russh::keys::{PrivateKeyWithHashAlg, PublicKey, load_secret_key};
use russh::{ChannelMsg, ChannelStream};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt, ReadBuf};

use super::config::{AuthMethod, Credential, HostKeyVerification, SshConfig};
use super::link::{Connector, ExecConnector, ExecOutput, Link, Runner};
use crate::error::{ChannelError, Result, TransportError};

/// Keyboard-interactive rounds answered before giving up.
const MAX_KBD_ROUNDS: usize = 3;

const KEEPALIVE_INTERVAL: Duration = Duration::from_secs(30);
const KEEPALIVE_MAX: usize = 3;

/// SSH transport wrapping russh client.
pub struct SshTransport {
    /// The russh session handle.
    session: Handle<SshHandler>,

    /// Configuration used for this connection.
    config: SshConfig,
}

impl SshTransport {
    /// Connect to the SSH server and authenticate.
    ///
    /// `timeout` bounds the TCP connect, the handshake and authentication together.
    pub async fn connect(config: SshConfig, timeout: Duration) -> Result<Self> {
        let endpoint = config.endpoint.clone();
        tokio::time::timeout(timeout, Self::establish(config))
            .await
            .map_err(|_| {
                warn!("ssh connect to {} timed out after {:?}", endpoint, timeout);
                TransportError::Timeout(timeout)
            })?
    }

    async fn establish(config: SshConfig) -> Result<Self> {
        // Consoles sit idle between commands for arbitrarily long; liveness comes
        // from keepalives rather than an inactivity cutoff.
        let ssh_config = Arc::new(client::Config {
            inactivity_timeout: None,
            keepalive_interval: Some(KEEPALIVE_INTERVAL),
            keepalive_max: KEEPALIVE_MAX,
            ..Default::default()
        });

        let host_key_error: Arc<Mutex<Option<TransportError>>> = Arc::new(Mutex::new(None));

        let handler = SshHandler {
            host: config.endpoint.host().to_string(),
            port: config.endpoint.port(),
            host_key_verification: config.host_key_verification.clone(),
            known_hosts_path: config.known_hosts_path.clone(),
            host_key_error: host_key_error.clone(),
        };

        debug!("ssh connect to {}", config.endpoint.socket_addr());
        let mut session = client::connect(
            ssh_config,
            (config.endpoint.host(), config.endpoint.port()),
            handler,
        )
        .await
        .map_err(|e| {
            // check_server_key may have stored something more specific than UnknownKey
            let stored = host_key_error
                .lock()
                .ok()
                .and_then(|mut slot| slot.take());
            match (stored, e) {
                (Some(hk_err), _) => hk_err,
                (None, russh::Error::IO(source)) => TransportError::ConnectionFailed {
                    host: config.endpoint.host().to_string(),
                    port: config.endpoint.port(),
                    source,
                },
                (None, e) => TransportError::Ssh(e),
            }
        })?;

        Self::authenticate(&mut session, &config).await?;
        debug!("ssh authenticated as '{}' on {}", config.username(), config.endpoint);

        Ok(Self { session, config })
    }

    /// Authenticate with the server.
    async fn authenticate(session: &mut Handle<SshHandler>, config: &SshConfig) -> Result<()> {
        let success = match &config.auth {
            AuthMethod::Password(credential) => {
                let accepted = session
                    .authenticate_password(credential.username(), credential.secret())
                    .await
                    .map_err(TransportError::Ssh)?
                    .success();
                if accepted {
                    true
                } else {
                    debug!("password rejected, trying keyboard-interactive");
                    Self::keyboard_interactive(session, credential).await?
                }
            }
            AuthMethod::PrivateKey {
                username,
                path,
                passphrase,
            } => {
                let key = load_secret_key(path, passphrase.as_ref().map(Credential::secret))
                    .map_err(|e| TransportError::Key(e.to_string()))?;

                // Get the best RSA hash algorithm supported by the server
                let hash_alg = session
                    .best_supported_rsa_hash()
                    .await
                    .map_err(TransportError::Ssh)?
                    .flatten();

                session
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg),
                    )
                    .await
                    .map_err(TransportError::Ssh)?
                    .success()
            }
        };

        if !success {
            return Err(TransportError::AuthenticationFailed {
                user: config.username().to_string(),
            }
            .into());
        }

        Ok(())
    }

    /// Answer every keyboard-interactive prompt with the password.
    ///
    /// Console servers commonly only offer this method.
    async fn keyboard_interactive(
        session: &mut Handle<SshHandler>,
        credential: &Credential,
    ) -> Result<bool> {
        let mut response = session
            .authenticate_keyboard_interactive_start(credential.username(), None::<String>)
            .await
            .map_err(TransportError::Ssh)?;

        for _ in 0..MAX_KBD_ROUNDS {
            match response {
                KeyboardInteractiveAuthResponse::Success => return Ok(true),
                KeyboardInteractiveAuthResponse::InfoRequest { prompts, .. } => {
                    let answers = prompts
                        .iter()
                        .map(|_| credential.secret().to_string())
                        .collect();
                    response = session
                        .authenticate_keyboard_interactive_respond(answers)
                        .await
                        .map_err(TransportError::Ssh)?;
                }
                _ => return Ok(false),
            }
        }
        Ok(matches!(response, KeyboardInteractiveAuthResponse::Success))
    }

    /// Open a PTY shell channel and wrap it as a byte-stream link.
    pub async fn open_shell(self) -> Result<SshShell> {
        let channel = self
            .session
            .channel_open_session()
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_pty(
                true,
                "xterm",
                self.config.terminal_width,
                self.config.terminal_height,
                0,
                0,
                &[],
            )
            .await
            .map_err(TransportError::Ssh)?;

        channel
            .request_shell(true)
            .await
            .map_err(TransportError::Ssh)?;

        Ok(SshShell {
            stream: Box::pin(channel.into_stream()),
            transport: self,
        })
    }

    /// Run one command on its own exec channel and collect its output.
    pub async fn exec_command(&mut self, command: &str) -> Result<ExecOutput> {
        let mut channel = self
            .session
            .channel_open_session()
            .await
            .map_err(|e| self.channel_fault(e))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| self.channel_fault(e))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_status = None;

        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext: 1 } => stderr.extend_from_slice(data),
                ChannelMsg::ExitStatus { exit_status: code } => exit_status = Some(code),
                _ => {}
            }
        }

        if exit_status.is_none() && self.session.is_closed() {
            return Err(TransportError::Disconnected.into());
        }

        Ok(ExecOutput {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_status,
        })
    }

    fn channel_fault(&self, e: russh::Error) -> crate::error::Error {
        if self.session.is_closed() {
            TransportError::Disconnected.into()
        } else {
            ChannelError::Ssh(e).into()
        }
    }

    /// Whether the session's background task has ended.
    pub fn is_closed(&self) -> bool {
        self.session.is_closed()
    }

    /// Close the connection.
    pub async fn disconnect(self) -> Result<()> {
        if self.session.is_closed() {
            return Ok(());
        }
        self.session
            .disconnect(russh::Disconnect::ByApplication, "", "en")
            .await
            .map_err(TransportError::Ssh)?;
        Ok(())
    }
}

impl Runner for SshTransport {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        self.exec_command(command).await
    }

    fn is_alive(&self) -> bool {
        !self.is_closed()
    }

    async fn close(self) -> Result<()> {
        self.disconnect().await
    }
}

/// Interactive PTY shell over SSH, usable as a [`Link`].
pub struct SshShell {
    stream: Pin<Box<ChannelStream<Msg>>>,
    transport: SshTransport,
}

impl AsyncRead for SshShell {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_read(cx, buf)
    }
}

impl AsyncWrite for SshShell {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.stream.as_mut().poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.stream.as_mut().poll_shutdown(cx)
    }
}

impl Link for SshShell {
    async fn close(mut self) -> Result<()> {
        if let Err(e) = self.stream.shutdown().await {
            debug!("shell channel shutdown: {}", e);
        }
        self.transport.disconnect().await
    }
}

/// Opens SSH connections for both console links and direct command runners.
#[derive(Debug, Clone)]
pub struct SshConnector {
    config: SshConfig,
}

impl SshConnector {
    pub fn new(config: SshConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SshConfig {
        &self.config
    }
}

impl Connector for SshConnector {
    type Link = SshShell;

    async fn connect(&self, timeout: Duration) -> Result<SshShell> {
        // One deadline covers the handshake and the PTY shell request.
        let open = async {
            let transport = SshTransport::establish(self.config.clone()).await?;
            transport.open_shell().await
        };
        tokio::time::timeout(timeout, open).await.map_err(|_| {
            warn!(
                "ssh shell on {} not ready after {:?}",
                self.config.endpoint.socket_addr(),
                timeout
            );
            TransportError::Timeout(timeout)
        })?
    }

    fn target(&self) -> String {
        format!("{}@{}", self.config.username(), self.config.endpoint)
    }
}

impl ExecConnector for SshConnector {
    type Runner = SshTransport;

    async fn connect(&self, timeout: Duration) -> Result<SshTransport> {
        SshTransport::connect(self.config.clone(), timeout).await
    }

    fn target(&self) -> String {
        format!("{}@{}", self.config.username(), self.config.endpoint)
    }
}

/// SSH client handler for russh.
struct SshHandler {
    host: String,
    port: u16,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
    /// Why the key was rejected; russh itself only reports `UnknownKey`.
    host_key_error: Arc<Mutex<Option<TransportError>>>,
}

impl SshHandler {
    /// `Ok(false)` when the host has no entry; a mismatching entry is an error.
    fn check_known_hosts(&self, pubkey: &PublicKey) -> std::result::Result<bool, TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::check_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::check_known_hosts(&self.host, self.port, pubkey)
        };

        match result {
            Ok(matched) => Ok(matched),
            Err(russh::keys::Error::KeyChanged { line }) => Err(TransportError::HostKeyChanged {
                host: self.host.clone(),
                port: self.port,
                line,
            }),
            Err(e) => Err(TransportError::KnownHosts(e.to_string())),
        }
    }

    /// Record the key of a first-seen host.
    fn learn_host_key(&self, pubkey: &PublicKey) -> std::result::Result<(), TransportError> {
        let result = if let Some(ref path) = self.known_hosts_path {
            russh::keys::known_hosts::learn_known_hosts_path(&self.host, self.port, pubkey, path)
        } else {
            russh::keys::known_hosts::learn_known_hosts(&self.host, self.port, pubkey)
        };

        result.map_err(|e| TransportError::KnownHosts(e.to_string()))
    }

    fn reject(&self, error: TransportError) -> bool {
        if let Ok(mut slot) = self.host_key_error.lock() {
            *slot = Some(error);
        }
        false
    }
}

impl client::Handler for SshHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match self.host_key_verification {
            HostKeyVerification::Disabled => Ok(true),

            HostKeyVerification::AcceptNew => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => {
                    if let Err(e) = self.learn_host_key(server_public_key) {
                        warn!("Failed to save host key: {}", e);
                    }
                    Ok(true)
                }
                Err(e) => Ok(self.reject(e)),
            },

            HostKeyVerification::Strict => match self.check_known_hosts(server_public_key) {
                Ok(true) => Ok(true),
                Ok(false) => Ok(self.reject(TransportError::HostKeyUnknown {
                    host: self.host.clone(),
                    port: self.port,
                })),
                Err(e) => Ok(self.reject(e)),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Connector, Endpoint};
    use std::time::Instant;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_console_open_bounded_by_one_deadline() {
        // Accepts TCP but never sends an SSH identification line.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut config = SshConfig::new(
            Endpoint::console("127.0.0.1", port),
            Credential::new("administrator", "ufispace"),
        );
        config.host_key_verification = HostKeyVerification::Disabled;
        let connector = SshConnector::new(config);

        let timeout = Duration::from_millis(300);
        let start = Instant::now();
        let err = match Connector::connect(&connector, timeout).await {
            Ok(_) => panic!("called `Result::unwrap_err()` on an `Ok` value"),
            Err(e) => e,
        };
        assert!(matches!(
            err,
            crate::Error::Transport(TransportError::Timeout(t)) if t == timeout
        ));
        assert!(start.elapsed() < timeout * 2);
    }
}
