//! Stateful command sessions.
//!
//! A session owns one remote shell and moves through a small state machine:
//!
//! ```text
//! Disconnected -> Connecting -> Authenticating -> Connected -> Disconnected
//!                                    |                 ^
//!                                    v                 |
//!                                 Faulted ------ disconnect()
//! ```
//!
//! [`ConsoleSession`] drives a device's serial console through a console server,
//! logging in by watching the byte stream for prompts. [`ShellSession`] runs
//! commands over a direct SSH connection to the host OS or management controller.

mod builder;
mod config;
mod console;
pub(crate) mod response;
mod shell;

pub use builder::SessionBuilder;
pub use config::SessionConfig;
pub use console::ConsoleSession;
pub use response::CommandResult;
pub use shell::{ShellRole, ShellSession};

use std::fmt;
use std::future::Future;
use std::time::Duration;

use crate::error::Result;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No channel. `connect()` is the only useful operation.
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Transport is open and the login dialog is running.
    Authenticating,
    /// Ready for commands.
    Connected,
    /// Login failed part way; `disconnect()` before reuse.
    Faulted,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Disconnected => "disconnected",
            SessionState::Connecting => "connecting",
            SessionState::Authenticating => "authenticating",
            SessionState::Connected => "connected",
            SessionState::Faulted => "faulted",
        };
        f.write_str(name)
    }
}

/// A remote shell that runs one command at a time.
///
/// Operations take `&mut self`, so a session serves exactly one caller at a time.
/// Two sessions to different endpoints can run concurrently.
pub trait Session: Send {
    /// Open the channel and log in. Fails with `AlreadyConnected` when connected.
    fn connect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Release the channel. Idempotent.
    fn disconnect(&mut self) -> impl Future<Output = Result<()>> + Send;

    /// Run `command` and wait for its output, overriding the default deadline.
    fn execute_with_timeout(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> impl Future<Output = Result<CommandResult>> + Send;

    /// Run `command` with the session's default deadline.
    fn execute(&mut self, command: &str) -> impl Future<Output = Result<CommandResult>> + Send {
        self.execute_with_timeout(command, None)
    }

    /// Run commands in order, stopping at the first failure.
    fn execute_all(
        &mut self,
        commands: &[&str],
    ) -> impl Future<Output = Result<Vec<CommandResult>>> + Send {
        async move {
            let mut results = Vec::with_capacity(commands.len());
            for cmd in commands {
                results.push(self.execute(cmd).await?);
            }
            Ok(results)
        }
    }

    /// Current lifecycle state.
    fn state(&self) -> SessionState;

    /// Whether commands can be executed.
    fn is_connected(&self) -> bool {
        self.state() == SessionState::Connected
    }

    /// Tunables the session was built with.
    fn config(&self) -> &SessionConfig;
}
