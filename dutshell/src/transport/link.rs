//! Transport seams: byte-stream links for console sessions, command runners for
//! direct shells, and the connectors that open them.

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::error::{ChannelError, Result};

/// A bidirectional byte stream to a remote terminal.
pub trait Link: AsyncRead + AsyncWrite + Unpin + Send {
    /// Release the link.
    ///
    /// The default shuts down the write half, which is enough for in-memory and
    /// process-attached streams.
    fn close(self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized,
    {
        async move {
            let mut link = self;
            link.shutdown().await.map_err(ChannelError::Io)?;
            Ok(())
        }
    }
}

impl Link for tokio::io::DuplexStream {}

/// Opens console links.
pub trait Connector: Send + Sync {
    /// The link type produced.
    type Link: Link;

    /// Open a new link. The whole attempt, handshake included, must finish within `timeout`.
    fn connect(&self, timeout: Duration) -> impl Future<Output = Result<Self::Link>> + Send;

    /// Human-readable target for logs.
    fn target(&self) -> String;
}

/// Output of one non-interactive command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_status: Option<u32>,
}

/// Runs commands on an authenticated remote shell, one request per command.
pub trait Runner: Send {
    /// Run `command` to completion. Deadline handling is the caller's job.
    fn exec(&mut self, command: &str) -> impl Future<Output = Result<ExecOutput>> + Send;

    /// Whether the underlying connection is still up.
    fn is_alive(&self) -> bool;

    /// Release the connection.
    fn close(self) -> impl Future<Output = Result<()>> + Send
    where
        Self: Sized;
}

/// Opens command runners.
pub trait ExecConnector: Send + Sync {
    /// The runner type produced.
    type Runner: Runner;

    /// Connect and authenticate within `timeout`.
    fn connect(&self, timeout: Duration) -> impl Future<Output = Result<Self::Runner>> + Send;

    /// Human-readable target for logs.
    fn target(&self) -> String;
}
