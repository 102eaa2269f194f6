//! In-memory devices for session tests.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt, DuplexStream};

use crate::error::{Result, TransportError};
use crate::session::SessionConfig;
use crate::transport::{Connector, ExecConnector, ExecOutput, Runner};

pub(crate) const PROMPT: &str = "root@ubuntu:~# ";
pub(crate) const PASSWORD: &str = "letmein";

/// What the fake device does with one received line.
pub(crate) enum Reply {
    Send(String),
    Silent,
    Hangup,
}

impl Reply {
    /// Echo, output and a fresh prompt, the way a login shell answers.
    pub(crate) fn output(command: &str, body: &str) -> Reply {
        if body.is_empty() {
            Reply::Send(format!("{}\r\n{}", command, PROMPT))
        } else {
            Reply::Send(format!("{}\r\n{}\r\n{}", command, body, PROMPT))
        }
    }
}

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Fast timings so failure paths finish quickly.
pub(crate) fn quick_config() -> SessionConfig {
    SessionConfig {
        timeout_secs: 1.0,
        login_poll_secs: 0.1,
        drain_millis: 5,
        login_retries: 5,
        ..SessionConfig::default()
    }
}

/// Spawn a line-oriented fake terminal and return the engine's end.
///
/// Lines are split on `\r`. Dropping out of the task closes the stream.
pub(crate) fn spawn_device<F>(greeting: &str, mut respond: F) -> DuplexStream
where
    F: FnMut(&str) -> Reply + Send + 'static,
{
    let (engine, mut device) = tokio::io::duplex(64 * 1024);
    let greeting = greeting.to_string();
    tokio::spawn(async move {
        if device.write_all(greeting.as_bytes()).await.is_err() {
            return;
        }
        let mut pending = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = match device.read(&mut chunk).await {
                Ok(0) | Err(_) => return,
                Ok(n) => n,
            };
            pending.extend_from_slice(&chunk[..n]);
            while let Some(pos) = pending.iter().position(|&b| b == b'\r') {
                let raw: Vec<u8> = pending.drain(..=pos).collect();
                let line = String::from_utf8_lossy(&raw[..pos]).into_owned();
                match respond(&line) {
                    Reply::Send(text) => {
                        if device.write_all(text.as_bytes()).await.is_err() {
                            return;
                        }
                    }
                    Reply::Silent => {}
                    Reply::Hangup => return,
                }
            }
        }
    });
    engine
}

#[derive(Clone, Copy)]
enum Stage {
    Asleep(usize),
    Username,
    Password,
    Shell,
}

/// Console line that prints the login prompt only after `wake_after` keystrokes,
/// accepts [`PASSWORD`], then hands command lines to `shell`.
pub(crate) fn console_device<F>(wake_after: usize, mut shell: F) -> DuplexStream
where
    F: FnMut(&str) -> Reply + Send + 'static,
{
    let mut stage = Stage::Asleep(0);
    spawn_device("Suspend Menu\r\n", move |line| match stage {
        Stage::Asleep(seen) if seen + 1 >= wake_after => {
            stage = Stage::Username;
            Reply::Send("\r\nUbuntu 20.04.3 LTS ubuntu ttyS0\r\n\r\nubuntu login: ".into())
        }
        Stage::Asleep(seen) => {
            stage = Stage::Asleep(seen + 1);
            Reply::Silent
        }
        Stage::Username => {
            stage = Stage::Password;
            Reply::Send(format!("{}\r\nPassword: ", line))
        }
        Stage::Password if line == PASSWORD => {
            stage = Stage::Shell;
            Reply::Send(format!("\r\nWelcome to Ubuntu 20.04.3 LTS\r\n\x1b[01;32m{}\x1b[0m", PROMPT))
        }
        Stage::Password => {
            stage = Stage::Username;
            Reply::Send("\r\n\r\nLogin incorrect\r\nubuntu login: ".into())
        }
        Stage::Shell => shell(line),
    })
}

/// Hands out pre-built links in order; refuses once they run out.
pub(crate) struct LoopbackConnector {
    links: Mutex<VecDeque<DuplexStream>>,
    attempts: AtomicUsize,
}

impl LoopbackConnector {
    pub(crate) fn new(links: Vec<DuplexStream>) -> Self {
        Self {
            links: Mutex::new(links.into()),
            attempts: AtomicUsize::new(0),
        }
    }

    pub(crate) fn refusing() -> Self {
        Self::new(Vec::new())
    }

    pub(crate) fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

impl Connector for LoopbackConnector {
    type Link = DuplexStream;

    async fn connect(&self, _timeout: Duration) -> Result<DuplexStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let link = self.links.lock().unwrap().pop_front();
        link.ok_or_else(|| {
            TransportError::ConnectionFailed {
                host: "loopback".into(),
                port: 0,
                source: io::Error::from(io::ErrorKind::ConnectionRefused),
            }
            .into()
        })
    }

    fn target(&self) -> String {
        "loopback".to_string()
    }
}

pub(crate) type Script = Arc<dyn Fn(&str) -> Option<ExecOutput> + Send + Sync>;

/// Direct shell that answers from `script`.
///
/// `sleep ...` never finishes and `hangup` kills the connection.
pub(crate) struct FakeRunner {
    script: Script,
    alive: Arc<AtomicBool>,
}

impl Runner for FakeRunner {
    async fn exec(&mut self, command: &str) -> Result<ExecOutput> {
        if !self.alive.load(Ordering::SeqCst) {
            return Err(TransportError::Disconnected.into());
        }
        if command.starts_with("sleep") {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if command == "hangup" {
            self.alive.store(false, Ordering::SeqCst);
            return Err(TransportError::Disconnected.into());
        }
        Ok((self.script)(command).unwrap_or_else(|| ExecOutput {
            stdout: String::new(),
            stderr: format!("bash: {}: command not found\n", command),
            exit_status: Some(127),
        }))
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn close(self) -> Result<()> {
        self.alive.store(false, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) struct FakeExecConnector {
    script: Script,
    refuse: bool,
    target: String,
    connects: AtomicUsize,
}

impl FakeExecConnector {
    pub(crate) fn new(
        target: impl Into<String>,
        script: impl Fn(&str) -> Option<ExecOutput> + Send + Sync + 'static,
    ) -> Self {
        Self {
            script: Arc::new(script),
            refuse: false,
            target: target.into(),
            connects: AtomicUsize::new(0),
        }
    }

    pub(crate) fn refusing(target: impl Into<String>) -> Self {
        Self {
            refuse: true,
            ..Self::new(target, |_| None)
        }
    }

    pub(crate) fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }
}

impl ExecConnector for FakeExecConnector {
    type Runner = FakeRunner;

    async fn connect(&self, _timeout: Duration) -> Result<FakeRunner> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.refuse {
            return Err(TransportError::AuthenticationFailed {
                user: "root".into(),
            }
            .into());
        }
        Ok(FakeRunner {
            script: self.script.clone(),
            alive: Arc::new(AtomicBool::new(true)),
        })
    }

    fn target(&self) -> String {
        self.target.clone()
    }
}

/// Successful command output.
pub(crate) fn stdout(text: &str) -> Option<ExecOutput> {
    Some(ExecOutput {
        stdout: text.to_string(),
        stderr: String::new(),
        exit_status: Some(0),
    })
}
