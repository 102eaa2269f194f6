//! Builder for SSH-backed sessions.

use std::path::PathBuf;

use super::config::{SessionConfig, seconds};
use super::console::ConsoleSession;
use super::shell::{ShellRole, ShellSession};
use crate::error::{ConfigError, Result};
use crate::transport::{
    AuthMethod, Credential, DEFAULT_SSH_PORT, Endpoint, HostKeyVerification, SshConfig,
    SshConnector,
};

enum Auth {
    None,
    Password(String),
    PrivateKey {
        path: PathBuf,
        passphrase: Option<String>,
    },
}

/// Builder for constructing sessions over SSH.
///
/// # Example
///
/// ```rust,no_run
/// use dutshell::session::{Session, SessionBuilder, ShellRole};
///
/// # async fn example() -> Result<(), dutshell::Error> {
/// let mut host = SessionBuilder::new("10.58.1.20")
///     .username("root")
///     .password("secret")
///     .timeout_secs(30.0)
///     .build_shell(ShellRole::Host)?;
///
/// host.connect().await?;
/// # Ok(())
/// # }
/// ```
pub struct SessionBuilder {
    host: String,
    port: u16,
    username: Option<String>,
    auth: Auth,
    config: SessionConfig,
    timeout_secs: Option<f64>,
    terminal_width: u32,
    terminal_height: u32,
    host_key_verification: HostKeyVerification,
    known_hosts_path: Option<PathBuf>,
}

impl SessionBuilder {
    /// Create a new builder for the specified host.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port: DEFAULT_SSH_PORT,
            username: None,
            auth: Auth::None,
            config: SessionConfig::default(),
            timeout_secs: None,
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    /// Set the SSH port (default: 22). For consoles this selects the serial line.
    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the username for SSH authentication.
    pub fn username(mut self, username: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self
    }

    /// Set password authentication.
    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.auth = Auth::Password(password.into());
        self
    }

    /// Set private key authentication.
    pub fn private_key(mut self, key_path: impl Into<PathBuf>) -> Self {
        self.auth = Auth::PrivateKey {
            path: key_path.into(),
            passphrase: None,
        };
        self
    }

    /// Set private key authentication with passphrase.
    pub fn private_key_with_passphrase(
        mut self,
        key_path: impl Into<PathBuf>,
        passphrase: impl Into<String>,
    ) -> Self {
        self.auth = Auth::PrivateKey {
            path: key_path.into(),
            passphrase: Some(passphrase.into()),
        };
        self
    }

    /// Replace the session tunables wholesale.
    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Default deadline in seconds. Negative values are rejected at build time.
    pub fn timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = Some(secs);
        self
    }

    /// Set terminal dimensions.
    pub fn terminal_size(mut self, width: u32, height: u32) -> Self {
        self.terminal_width = width;
        self.terminal_height = height;
        self
    }

    /// Set the host key verification mode.
    pub fn host_key_verification(mut self, mode: HostKeyVerification) -> Self {
        self.host_key_verification = mode;
        self
    }

    /// Use a known_hosts file other than `~/.ssh/known_hosts`.
    pub fn known_hosts(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_path = Some(path.into());
        self
    }

    /// Build a console session; `login` is the device account used at the login prompt.
    ///
    /// Does not connect.
    pub fn build_console(self, login: Credential) -> Result<ConsoleSession<SshConnector>> {
        let endpoint = Endpoint::console(self.host.clone(), self.port);
        let (ssh, config) = self.into_parts(endpoint)?;
        ConsoleSession::new(SshConnector::new(ssh), login, config)
    }

    /// Build a direct shell session. Does not connect.
    pub fn build_shell(self, role: ShellRole) -> Result<ShellSession<SshConnector>> {
        let endpoint = Endpoint::direct_with_port(self.host.clone(), self.port);
        let (ssh, config) = self.into_parts(endpoint)?;
        ShellSession::new(SshConnector::new(ssh), role, config)
    }

    fn into_parts(self, endpoint: Endpoint) -> Result<(SshConfig, SessionConfig)> {
        let username = self
            .username
            .ok_or_else(|| ConfigError::invalid("username", "username is required"))?;

        let auth = match self.auth {
            Auth::None => {
                return Err(ConfigError::invalid("auth", "password or private key is required").into());
            }
            Auth::Password(password) => AuthMethod::Password(Credential::new(username, password)),
            Auth::PrivateKey { path, passphrase } => AuthMethod::PrivateKey {
                passphrase: passphrase.map(|p| Credential::new(username.clone(), p)),
                username,
                path,
            },
        };

        let mut config = self.config;
        if let Some(secs) = self.timeout_secs {
            seconds("timeout_secs", secs)?;
            config.timeout_secs = secs;
        }

        let ssh = SshConfig {
            endpoint,
            auth,
            terminal_width: self.terminal_width,
            terminal_height: self.terminal_height,
            host_key_verification: self.host_key_verification,
            known_hosts_path: self.known_hosts_path,
        };
        Ok((ssh, config))
    }
}
