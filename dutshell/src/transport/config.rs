//! Endpoint, credential and SSH connection configuration.

use std::fmt;
use std::path::PathBuf;

use secrecy::{ExposeSecret, SecretString};

/// Default SSH port for direct-network endpoints.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// What sits behind an endpoint address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    /// A console server; the port selects one of many physical serial lines.
    ConsoleServer,

    /// A single networked host (host OS or management controller).
    Direct,
}

/// Where to connect. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
    kind: EndpointKind,
}

impl Endpoint {
    /// A console-server line at `host:port`.
    pub fn console(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            kind: EndpointKind::ConsoleServer,
        }
    }

    /// A directly reachable host on the default SSH port.
    pub fn direct(host: impl Into<String>) -> Self {
        Self::direct_with_port(host, DEFAULT_SSH_PORT)
    }

    /// A directly reachable host on a specific port.
    pub fn direct_with_port(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            kind: EndpointKind::Direct,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn kind(&self) -> EndpointKind {
        self.kind
    }

    /// Get the socket address for connection.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Username and secret for one endpoint.
pub struct Credential {
    username: String,
    secret: SecretString,
}

impl Credential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: SecretString::from(secret.into()),
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub(crate) fn secret(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl Clone for Credential {
    fn clone(&self) -> Self {
        Self::new(self.username.clone(), self.secret())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Host key verification mode, analogous to OpenSSH's `StrictHostKeyChecking`.
#[derive(Debug, Clone, Default)]
pub enum HostKeyVerification {
    /// Reject unknown and changed keys. Connection fails if the host
    /// is not already in known_hosts.
    Strict,

    /// Accept and auto-learn unknown keys, but reject changed keys.
    #[default]
    AcceptNew,

    /// Accept all keys without checking. Lab consoles are re-imaged often enough
    /// that this is a common choice for them.
    Disabled,
}

/// Authentication method for SSH connections.
#[derive(Clone)]
pub enum AuthMethod {
    /// Password authentication; keyboard-interactive prompts are answered with it too.
    Password(Credential),

    /// Private key authentication.
    PrivateKey {
        username: String,
        /// Path to the private key file.
        path: PathBuf,
        /// Optional passphrase for encrypted keys.
        passphrase: Option<Credential>,
    },
}

impl AuthMethod {
    pub fn username(&self) -> &str {
        match self {
            AuthMethod::Password(credential) => credential.username(),
            AuthMethod::PrivateKey { username, .. } => username,
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Password(credential) => f.debug_tuple("Password").field(credential).finish(),
            AuthMethod::PrivateKey { username, path, .. } => f
                .debug_struct("PrivateKey")
                .field("username", username)
                .field("path", path)
                .finish(),
        }
    }
}

/// SSH connection configuration.
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target endpoint.
    pub endpoint: Endpoint,

    /// Authentication method.
    pub auth: AuthMethod,

    /// Terminal width for PTY.
    pub terminal_width: u32,

    /// Terminal height for PTY.
    pub terminal_height: u32,

    /// Host key verification mode.
    pub host_key_verification: HostKeyVerification,

    /// Path to known_hosts file.
    pub known_hosts_path: Option<PathBuf>,
}

impl SshConfig {
    /// Password-authenticated config with default terminal settings.
    pub fn new(endpoint: Endpoint, credential: Credential) -> Self {
        Self {
            endpoint,
            auth: AuthMethod::Password(credential),
            terminal_width: 511,
            terminal_height: 24,
            host_key_verification: HostKeyVerification::default(),
            known_hosts_path: None,
        }
    }

    pub fn username(&self) -> &str {
        self.auth.username()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_flavors() {
        let console = Endpoint::console("192.168.162.2", 5102);
        assert_eq!(console.kind(), EndpointKind::ConsoleServer);
        assert_eq!(console.socket_addr(), "192.168.162.2:5102");

        let host = Endpoint::direct("10.58.1.20");
        assert_eq!(host.kind(), EndpointKind::Direct);
        assert_eq!(host.port(), DEFAULT_SSH_PORT);
        assert_eq!(host.to_string(), "10.58.1.20:22");
    }

    #[test]
    fn test_credential_debug_redacts_secret() {
        let credential = Credential::new("root", "hunter2");
        let shown = format!("{:?}", credential);
        assert!(shown.contains("root"));
        assert!(!shown.contains("hunter2"));
        assert_eq!(credential.clone().secret(), "hunter2");
    }

    #[test]
    fn test_ssh_config_username() {
        let config = SshConfig::new(Endpoint::direct("h"), Credential::new("sysadmin", "x"));
        assert_eq!(config.username(), "sysadmin");
        assert!(matches!(
            config.host_key_verification,
            HostKeyVerification::AcceptNew
        ));
    }
}
