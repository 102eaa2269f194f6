//! Error types for dutshell.

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Main error type for dutshell operations.
#[derive(Error, Debug)]
pub enum Error {
    /// SSH transport-level errors
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Channel read/write and pattern matching errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Session state machine errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Command output did not have the expected shape
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Invalid construction argument or configuration document
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Coarse failure category, for callers that branch on what went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Connection or login never completed; retry with a fresh `connect()`.
    Connect,
    /// One operation exceeded its deadline; the session is still usable.
    Timeout,
    /// The channel died; the session must be reconnected.
    Closed,
    /// The command ran but its output was not what the query expected.
    Parse,
    /// A construction argument or config document was rejected.
    Validation,
    /// The operation is not valid in the session's current state.
    State,
    /// Local I/O failure.
    Io,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Transport(TransportError::Disconnected) => ErrorKind::Closed,
            Error::Transport(TransportError::Io(_)) => ErrorKind::Io,
            Error::Transport(_) => ErrorKind::Connect,
            Error::Channel(ChannelError::Timeout(_)) => ErrorKind::Timeout,
            Error::Channel(ChannelError::Closed) => ErrorKind::Closed,
            Error::Channel(ChannelError::Io(_)) => ErrorKind::Closed,
            Error::Channel(ChannelError::Ssh(_)) => ErrorKind::Closed,
            Error::Channel(ChannelError::InvalidPattern(_)) => ErrorKind::Validation,
            Error::Channel(ChannelError::DuplicateLabel(_)) => ErrorKind::Validation,
            Error::Session(SessionError::LoginFailed { .. }) => ErrorKind::Connect,
            Error::Session(_) => ErrorKind::State,
            Error::Parse(_) => ErrorKind::Parse,
            Error::Config(ConfigError::Read { .. }) => ErrorKind::Io,
            Error::Config(_) => ErrorKind::Validation,
        }
    }

    /// Whether the operation hit its deadline.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::Timeout
    }

    /// Whether the underlying channel is gone.
    pub fn is_closed(&self) -> bool {
        self.kind() == ErrorKind::Closed
    }
}

/// Transport layer errors (SSH connection, authentication).
#[derive(Error, Debug)]
pub enum TransportError {
    /// Failed to connect to host
    #[error("Connection failed to {host}:{port}: {source}")]
    ConnectionFailed {
        host: String,
        port: u16,
        #[source]
        source: io::Error,
    },

    /// SSH handshake or protocol error
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),

    /// Authentication failed
    #[error("Authentication failed for user '{user}'")]
    AuthenticationFailed { user: String },

    /// SSH key error
    #[error("SSH key error: {0}")]
    Key(String),

    /// Server presented a key that differs from known_hosts
    #[error("Host key for {host}:{port} changed (known_hosts line {line})")]
    HostKeyChanged { host: String, port: u16, line: usize },

    /// Server is not in known_hosts and verification is strict
    #[error("Host key for {host}:{port} is unknown")]
    HostKeyUnknown { host: String, port: u16 },

    /// Reading or writing known_hosts failed
    #[error("known_hosts error: {0}")]
    KnownHosts(String),

    /// Connection was closed unexpectedly
    #[error("Connection disconnected")]
    Disconnected,

    /// Connection attempt timed out
    #[error("Connection attempt timed out after {0:?}")]
    Timeout(Duration),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Channel layer errors (reads, writes, pattern matching).
#[derive(Error, Debug)]
pub enum ChannelError {
    /// No pattern matched before the deadline
    #[error("Pattern not found within {0:?}")]
    Timeout(Duration),

    /// Remote end closed the stream
    #[error("Channel closed")]
    Closed,

    /// Read or write on the stream failed
    #[error("Channel I/O error: {0}")]
    Io(#[from] io::Error),

    /// SSH protocol error on the channel
    #[error("Channel SSH error: {0}")]
    Ssh(russh::Error),

    /// Invalid regex pattern
    #[error("Invalid regex pattern: {0}")]
    InvalidPattern(#[from] regex::Error),

    /// Two patterns in one set share a label
    #[error("Duplicate pattern label '{0}'")]
    DuplicateLabel(String),
}

/// Session layer errors (state machine, login).
#[derive(Error, Debug)]
pub enum SessionError {
    /// Session not connected
    #[error("Session not connected - call connect() first")]
    NotConnected,

    /// Session already connected
    #[error("Session already connected")]
    AlreadyConnected,

    /// Session is faulted and must be disconnected before reuse
    #[error("Session faulted - call disconnect() before reconnecting")]
    Faulted,

    /// The console login dialog did not complete
    #[error("Login failed at {stage}: {reason}")]
    LoginFailed {
        stage: LoginStage,
        reason: String,
    },

    /// IP discovery has not run for this endpoint yet
    #[error("No address discovered for {endpoint} - run discovery first")]
    NotDiscovered { endpoint: &'static str },
}

/// Step of the console login dialog that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoginStage {
    /// Waiting for the console server banner.
    Banner,
    /// Poking the console until the login prompt appears.
    LoginPrompt,
    /// Waiting for the password prompt after sending the username.
    PasswordPrompt,
    /// Waiting for the shell prompt after sending the password.
    ShellPrompt,
}

impl std::fmt::Display for LoginStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LoginStage::Banner => "console banner",
            LoginStage::LoginPrompt => "login prompt",
            LoginStage::PasswordPrompt => "password prompt",
            LoginStage::ShellPrompt => "shell prompt",
        };
        f.write_str(name)
    }
}

/// Output of a query command did not match what was expected.
#[derive(Error, Debug)]
#[error("{query}: unexpected output {output:?}")]
pub struct ParseError {
    /// Name of the query that failed.
    pub query: &'static str,
    /// The captured output that could not be parsed.
    pub output: String,
}

impl ParseError {
    pub fn new(query: &'static str, output: impl Into<String>) -> Self {
        Self {
            query,
            output: output.into(),
        }
    }
}

/// Configuration and argument validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// A field had an invalid value
    #[error("Invalid {field}: {message}")]
    Invalid { field: &'static str, message: String },

    /// The configuration document could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },

    /// The configuration document is malformed or missing keys
    #[error("Malformed configuration: {0}")]
    Malformed(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            message: message.into(),
        }
    }
}

/// Result type alias using dutshell's Error.
pub type Result<T> = std::result::Result<T, Error>;
