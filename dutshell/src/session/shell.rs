//! Direct SSH sessions to the host OS or the management controller.

use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::config::SessionConfig;
use super::response::CommandResult;
use super::{Session, SessionState};
use crate::error::{ChannelError, Result, SessionError};
use crate::transport::{ExecConnector, Runner};

/// Which side of the device a direct shell talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellRole {
    /// The host operating system.
    Host,
    /// The baseboard management controller.
    Management,
}

impl fmt::Display for ShellRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShellRole::Host => f.write_str("host"),
            ShellRole::Management => f.write_str("bmc"),
        }
    }
}

/// Non-interactive command session over a direct network connection.
///
/// Each command runs as its own request, so output arrives already separated
/// into stdout and stderr with an exit status; no prompt matching is involved.
pub struct ShellSession<C: ExecConnector> {
    connector: C,
    role: ShellRole,
    config: SessionConfig,

    /// Live runner (None when disconnected).
    runner: Option<C::Runner>,

    state: SessionState,
}

impl<C: ExecConnector> ShellSession<C> {
    /// Create a disconnected session. Rejects invalid config values.
    pub fn new(connector: C, role: ShellRole, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            connector,
            role,
            config,
            runner: None,
            state: SessionState::Disconnected,
        })
    }

    pub fn role(&self) -> ShellRole {
        self.role
    }

    /// Human-readable connection target.
    pub fn target(&self) -> String {
        self.connector.target()
    }

    async fn lost(&mut self) {
        if let Some(runner) = self.runner.take() {
            if let Err(e) = runner.close().await {
                debug!("error closing {} connection: {}", self.role, e);
            }
        }
        self.state = SessionState::Disconnected;
    }
}

impl<C: ExecConnector> Session for ShellSession<C> {
    async fn connect(&mut self) -> Result<()> {
        if self.state == SessionState::Connected {
            return Err(SessionError::AlreadyConnected.into());
        }

        let target = self.connector.target();
        info!("Connecting to {} {}", self.role, target);
        self.state = SessionState::Connecting;

        match self.connector.connect(self.config.timeout()).await {
            Ok(runner) => {
                self.runner = Some(runner);
                self.state = SessionState::Connected;
                info!("Connected to {} {}", self.role, target);
                Ok(())
            }
            Err(e) => {
                error!("{} {} connect failed: {}", self.role, target, e);
                self.state = SessionState::Disconnected;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.state = SessionState::Disconnected;
        match self.runner.take() {
            Some(runner) => {
                info!("Disconnecting from {} {}", self.role, self.connector.target());
                runner.close().await
            }
            None => Ok(()),
        }
    }

    async fn execute_with_timeout(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        let runner = self.runner.as_mut().ok_or(SessionError::NotConnected)?;

        debug!("{} exec: {:?}", self.role, command);
        let start = Instant::now();
        let outcome = tokio::time::timeout(timeout, runner.exec(command)).await;
        let alive = runner.is_alive();

        match outcome {
            Ok(Ok(output)) => Ok(CommandResult::shell(
                command,
                output.stdout,
                output.stderr,
                output.exit_status,
                start.elapsed(),
            )),
            Err(_) => {
                warn!("{} command {:?} timed out after {:?}", self.role, command, timeout);
                Err(ChannelError::Timeout(timeout).into())
            }
            Ok(Err(e)) if e.is_closed() || !alive => {
                error!("{} connection lost running {:?}: {}", self.role, command, e);
                self.lost().await;
                Err(e)
            }
            Ok(Err(e)) => Err(e),
        }
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn config(&self) -> &SessionConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::testing::{FakeExecConnector, init_logging, quick_config, stdout};
    use tokio_test::assert_ok;

    fn host() -> ShellSession<FakeExecConnector> {
        init_logging();
        let connector = FakeExecConnector::new("root@10.0.0.7:22", |cmd| match cmd {
            "hostname" => stdout("ubuntu\n"),
            _ => None,
        });
        ShellSession::new(connector, ShellRole::Host, quick_config()).unwrap()
    }

    #[tokio::test]
    async fn test_execute_separates_streams() {
        let mut shell = host();
        shell.connect().await.unwrap();
        assert!(shell.is_connected());

        let ok = shell.execute("hostname").await.unwrap();
        assert_eq!(ok.stdout, "ubuntu\n");
        assert_eq!(ok.exit_status, Some(0));
        assert!(ok.is_success());
        assert_eq!(ok.raw, None);

        let missing = shell.execute("frobnicate").await.unwrap();
        assert!(!missing.is_success());
        assert!(missing.stderr.contains("command not found"));
        assert_eq!(missing.stdout, "");
    }

    #[tokio::test]
    async fn test_timeout_keeps_connection() {
        let mut shell = host();
        shell.connect().await.unwrap();

        let err = shell
            .execute_with_timeout("sleep 600", Some(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(shell.state(), SessionState::Connected);
        assert_ok!(shell.execute("hostname").await);
    }

    #[tokio::test]
    async fn test_lost_connection_disconnects() {
        let mut shell = host();
        shell.connect().await.unwrap();

        let err = shell.execute("hangup").await.unwrap_err();
        assert!(err.is_closed());
        assert_eq!(shell.state(), SessionState::Disconnected);
        assert!(matches!(
            shell.execute("hostname").await,
            Err(crate::Error::Session(SessionError::NotConnected))
        ));
    }

    #[tokio::test]
    async fn test_refused_connect_stays_disconnected() {
        let connector = FakeExecConnector::refusing("sysadmin@10.0.0.8:22");
        let mut bmc = ShellSession::new(connector, ShellRole::Management, quick_config()).unwrap();

        let err = bmc.connect().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Connect);
        assert_eq!(bmc.state(), SessionState::Disconnected);
        assert_eq!(bmc.role().to_string(), "bmc");

        bmc.connect().await.unwrap_err();
        assert_eq!(bmc.connector.connects(), 2);
    }

    #[tokio::test]
    async fn test_connect_disconnect_cycle() {
        let mut shell = host();
        shell.disconnect().await.unwrap();
        shell.connect().await.unwrap();
        assert!(matches!(
            shell.connect().await,
            Err(crate::Error::Session(SessionError::AlreadyConnected))
        ));
        shell.disconnect().await.unwrap();
        shell.disconnect().await.unwrap();
        assert_eq!(shell.state(), SessionState::Disconnected);
    }

    #[test]
    fn test_negative_timeout_rejected() {
        let connector = FakeExecConnector::new("h", |_| None);
        let result = ShellSession::new(connector, ShellRole::Host, quick_config().with_timeout_secs(-0.5));
        assert_eq!(result.err().unwrap().kind(), ErrorKind::Validation);
    }
}
