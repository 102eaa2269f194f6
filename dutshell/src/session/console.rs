//! Serial console sessions through a console server.

use std::time::{Duration, Instant};

use log::{debug, error, info, warn};

use super::config::{Prompts, REJECTED, SessionConfig};
use super::response::{CommandResult, normalize_output};
use super::{Session, SessionState};
use crate::channel::{Channel, PatternSet, ReadOutcome};
use crate::error::{ChannelError, LoginStage, Result, SessionError};
use crate::transport::{Connector, Credential};

/// A logged-in shell on a device's serial console.
///
/// The console server hands over a raw byte stream; login happens in-band by
/// poking the line until the device prints its login prompt.
///
/// # Example
///
/// ```rust,no_run
/// use dutshell::session::{Session, SessionBuilder};
/// use dutshell::transport::Credential;
///
/// # async fn example() -> Result<(), dutshell::Error> {
/// let mut console = SessionBuilder::new("192.168.162.2")
///     .port(5102)
///     .username("administrator")
///     .password("secret")
///     .build_console(Credential::new("root", "secret"))?;
///
/// console.connect().await?;
/// let result = console.execute("uname -r").await?;
/// println!("{}", result.stdout);
/// console.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct ConsoleSession<C: Connector> {
    connector: C,

    /// Device login, distinct from the console-server account the connector uses.
    login: Credential,

    config: SessionConfig,
    prompts: Prompts,

    /// Open channel (None when disconnected or faulted).
    channel: Option<Channel<C::Link>>,

    state: SessionState,
}

impl<C: Connector> ConsoleSession<C> {
    /// Create a disconnected session. Rejects invalid config values and prompt regexes.
    pub fn new(connector: C, login: Credential, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let prompts = config.compile()?;
        Ok(Self {
            connector,
            login,
            config,
            prompts,
            channel: None,
            state: SessionState::Disconnected,
        })
    }

    /// Human-readable connection target.
    pub fn target(&self) -> String {
        self.connector.target()
    }

    /// Write raw text to the console after discarding stale output.
    ///
    /// No terminator is appended and no reply is awaited. Use [`expect`](Self::expect)
    /// to wait for whatever the device prints next.
    pub async fn send(&mut self, data: &str) -> Result<()> {
        let drain = self.config.drain_window();
        let channel = self.live_channel()?;
        let result = match channel.drain(drain).await {
            Ok(_) => channel.send(data.as_bytes()).await,
            Err(e) => Err(e),
        };
        self.observe(result).await
    }

    /// Wait for one of `patterns` on the console.
    ///
    /// For dialogs the shell prompt does not cover, such as firmware menus or
    /// confirmation questions.
    pub async fn expect(&mut self, patterns: &PatternSet, timeout: Duration) -> Result<ReadOutcome> {
        let channel = self.live_channel()?;
        let outcome = channel.read_until(patterns, timeout).await;
        if let Ok(ReadOutcome::Closed { .. }) = outcome {
            error!("Console {} closed during expect", self.connector.target());
            self.lost().await;
            return outcome;
        }
        self.observe(outcome).await
    }

    /// Release the link when `result` shows the stream has gone away.
    async fn observe<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_closed() {
                error!("Console {} lost: {}", self.connector.target(), e);
                self.lost().await;
            }
        }
        result
    }

    fn live_channel(&mut self) -> Result<&mut Channel<C::Link>> {
        if self.state != SessionState::Connected {
            return Err(self.state_error());
        }
        self.channel
            .as_mut()
            .ok_or_else(|| SessionError::NotConnected.into())
    }

    fn state_error(&self) -> crate::Error {
        match self.state {
            SessionState::Faulted => SessionError::Faulted.into(),
            _ => SessionError::NotConnected.into(),
        }
    }

    /// Run the in-band login dialog on a freshly opened channel.
    async fn authenticate(&mut self) -> Result<()> {
        let channel = self
            .channel
            .as_mut()
            .ok_or(SessionError::NotConnected)?;
        let config = &self.config;
        let prompts = &self.prompts;

        if let Some(banner) = &prompts.banner {
            debug!("waiting for console banner");
            stage(channel.read_until(banner, config.timeout()).await?, LoginStage::Banner)?;
        }

        let mut woke = false;
        for attempt in 1..=config.login_retries {
            channel.drain(config.drain_window()).await?;
            channel.send(config.neutral_key.as_bytes()).await?;
            match channel.read_until(&prompts.login, config.login_poll()).await? {
                ReadOutcome::Matched(_) => {
                    debug!("login prompt after {} keystroke(s)", attempt);
                    woke = true;
                    break;
                }
                ReadOutcome::TimedOut { .. } => {
                    debug!(
                        "no login prompt after keystroke {}/{}",
                        attempt, config.login_retries
                    );
                }
                ReadOutcome::Closed { .. } => {
                    return Err(login_failed(LoginStage::LoginPrompt, "stream closed"));
                }
            }
        }
        if !woke {
            return Err(login_failed(
                LoginStage::LoginPrompt,
                format!("not seen after {} keystrokes", config.login_retries),
            ));
        }

        channel
            .send_line(self.login.username(), &config.line_ending)
            .await?;
        stage(
            channel.read_until(&prompts.password, config.timeout()).await?,
            LoginStage::PasswordPrompt,
        )?;

        channel
            .send_line(self.login.secret(), &config.line_ending)
            .await?;
        match channel
            .read_until(&prompts.after_password, config.timeout())
            .await?
        {
            ReadOutcome::Matched(m) if m.label == REJECTED => Err(login_failed(
                LoginStage::ShellPrompt,
                format!("credentials for '{}' rejected", self.login.username()),
            )),
            outcome => stage(outcome, LoginStage::ShellPrompt),
        }
    }

    /// Drop the channel without waiting for the remote side.
    async fn release(&mut self) {
        if let Some(channel) = self.channel.take() {
            if let Err(e) = channel.close().await {
                debug!("error closing console link: {}", e);
            }
        }
    }
}

impl<C: Connector> Session for ConsoleSession<C> {
    async fn connect(&mut self) -> Result<()> {
        match self.state {
            SessionState::Connected => return Err(SessionError::AlreadyConnected.into()),
            SessionState::Faulted => return Err(SessionError::Faulted.into()),
            _ => {}
        }

        let target = self.connector.target();
        info!("Opening console {}", target);
        self.state = SessionState::Connecting;

        let link = match self.connector.connect(self.config.timeout()).await {
            Ok(link) => link,
            Err(e) => {
                error!("Console {} unreachable: {}", target, e);
                self.state = SessionState::Disconnected;
                return Err(e);
            }
        };
        self.channel = Some(Channel::new(link, self.config.search_depth));
        self.state = SessionState::Authenticating;

        match self.authenticate().await {
            Ok(()) => {
                info!("Logged in on console {} as {}", target, self.login.username());
                self.state = SessionState::Connected;
                Ok(())
            }
            Err(e) => {
                error!("Console login on {} failed: {}", target, e);
                self.release().await;
                self.state = SessionState::Faulted;
                Err(e)
            }
        }
    }

    async fn disconnect(&mut self) -> Result<()> {
        let graceful = self.state == SessionState::Connected;
        self.state = SessionState::Disconnected;

        let Some(mut channel) = self.channel.take() else {
            return Ok(());
        };
        info!("Closing console {}", self.connector.target());

        if graceful {
            match channel.read_to_eof(self.config.drain_window()).await {
                Ok(tail) if !tail.is_empty() => debug!("discarded {} bytes at close", tail.len()),
                Ok(_) => {}
                Err(e) => debug!("error draining console at close: {}", e),
            }
        }
        channel.close().await
    }

    async fn execute_with_timeout(
        &mut self,
        command: &str,
        timeout: Option<Duration>,
    ) -> Result<CommandResult> {
        if self.state != SessionState::Connected {
            return Err(self.state_error());
        }
        let timeout = timeout.unwrap_or_else(|| self.config.timeout());
        let channel = self
            .channel
            .as_mut()
            .ok_or(SessionError::NotConnected)?;

        debug!("console exec: {:?}", command);
        channel.drain(self.config.drain_window()).await?;
        let start = Instant::now();
        let outcome = match channel.send_line(command, &self.config.line_ending).await {
            Ok(()) => channel.read_until(&self.prompts.command, timeout).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(ReadOutcome::Matched(m)) => {
                let stdout = normalize_output(&m.before, command);
                Ok(CommandResult::console(command, stdout, m.consumed(), start.elapsed()))
            }
            Ok(ReadOutcome::TimedOut { before }) => {
                warn!(
                    "{:?} produced no prompt within {:?} ({} bytes pending)",
                    command,
                    timeout,
                    before.len()
                );
                Err(ChannelError::Timeout(timeout).into())
            }
            Ok(ReadOutcome::Closed { .. }) => {
                error!("Console closed while running {:?}", command);
                self.lost().await;
                Err(ChannelError::Closed.into())
            }
            Err(e) if e.is_closed() => {
                error!("Console write failed for {:?}: {}", command, e);
                self.lost().await;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    fn state(&self) -> SessionState {
        self.state
    }

    fn config(&self) -> &SessionConfig {
        &self.config
    }
}

impl<C: Connector> ConsoleSession<C> {
    async fn lost(&mut self) {
        self.release().await;
        self.state = SessionState::Disconnected;
    }
}

impl<C: Connector> Drop for ConsoleSession<C> {
    fn drop(&mut self) {
        if self.channel.is_some() {
            warn!(
                "Console session {} dropped without disconnect()",
                self.connector.target()
            );
        }
    }
}

/// Map a login-step read onto success or a stage failure.
fn stage(outcome: ReadOutcome, stage: LoginStage) -> Result<()> {
    match outcome {
        ReadOutcome::Matched(_) => Ok(()),
        ReadOutcome::TimedOut { .. } => Err(login_failed(stage, "timed out")),
        ReadOutcome::Closed { .. } => Err(login_failed(stage, "stream closed")),
    }
}

fn login_failed(stage: LoginStage, reason: impl Into<String>) -> crate::Error {
    SessionError::LoginFailed {
        stage,
        reason: reason.into(),
    }
    .into()
}
