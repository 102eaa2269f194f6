//! Transport layer: the raw byte streams and command runners sessions sit on.
//!
//! The session engine only sees the [`Connector`], [`Link`] and [`Runner`] traits;
//! the SSH implementation wrapping russh lives in [`SshTransport`].

pub mod config;
mod link;
mod ssh;

pub use config::{
    AuthMethod, Credential, DEFAULT_SSH_PORT, Endpoint, EndpointKind, HostKeyVerification,
    SshConfig,
};
pub use link::{Connector, ExecConnector, ExecOutput, Link, Runner};
pub use ssh::{SshConnector, SshShell, SshTransport};
