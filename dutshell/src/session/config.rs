//! Session tuning: prompts, retry ceilings and timeouts.

use std::time::Duration;

use serde::Deserialize;

use crate::channel::{Pattern, PatternSet};
use crate::error::{ChannelError, ConfigError};

/// Label of the prompt pattern in compiled sets.
pub(crate) const PROMPT: &str = "prompt";
/// Label of the login-rejected pattern.
pub(crate) const REJECTED: &str = "rejected";
/// Label of the end-of-stream sentinel.
pub(crate) const CLOSED: &str = "closed";
/// Label of the timeout sentinel.
pub(crate) const TIMED_OUT: &str = "timed_out";

/// Tunables for a session, fixed at construction.
///
/// All fields have defaults matching an Ubuntu host behind a console server, so a
/// config document only needs to name what differs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Default deadline for connect and for each command, in seconds.
    pub timeout_secs: f64,

    /// Regex matching the device shell prompt.
    pub shell_prompt: String,

    /// Regex matching the device login prompt.
    pub login_prompt: String,

    /// Regex matching the device password prompt.
    pub password_prompt: String,

    /// Regex matching the device's reply to bad credentials.
    pub login_rejected: String,

    /// Regex the console server prints once the line is attached, if any.
    pub console_banner: Option<String>,

    /// Neutral keystrokes sent while waiting for the login prompt.
    pub login_retries: u32,

    /// How long to wait for the login prompt after each keystroke, in seconds.
    pub login_poll_secs: f64,

    /// Window for discarding stale output before each write, in milliseconds.
    pub drain_millis: u64,

    /// Deadline for the fixed derived queries (IP discovery and friends), in seconds.
    pub query_timeout_secs: f64,

    /// Appended to every command and credential.
    pub line_ending: String,

    /// Sent to wake the console up.
    pub neutral_key: String,

    /// Overlap re-searched per read cycle; bounds the longest detectable match.
    pub search_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 15.0,
            shell_prompt: "root@ubuntu:~#".to_string(),
            login_prompt: "ubuntu login".to_string(),
            password_prompt: "(?i)password".to_string(),
            login_rejected: "(?i)login incorrect".to_string(),
            console_banner: Some("Suspend Menu".to_string()),
            login_retries: 10,
            login_poll_secs: 5.0,
            drain_millis: 100,
            query_timeout_secs: 5.0,
            line_ending: "\r".to_string(),
            neutral_key: "\r".to_string(),
            search_depth: 1000,
        }
    }
}

impl SessionConfig {
    /// Set the default command/connect deadline. Validated when the session is built.
    pub fn with_timeout_secs(mut self, secs: f64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_shell_prompt(mut self, pattern: impl Into<String>) -> Self {
        self.shell_prompt = pattern.into();
        self
    }

    pub fn with_login_retries(mut self, retries: u32) -> Self {
        self.login_retries = retries;
        self
    }

    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        seconds("timeout_secs", self.timeout_secs)?;
        seconds("login_poll_secs", self.login_poll_secs)?;
        seconds("query_timeout_secs", self.query_timeout_secs)?;

        if self.login_retries == 0 {
            return Err(ConfigError::invalid("login_retries", "must be at least 1"));
        }
        if self.search_depth == 0 {
            return Err(ConfigError::invalid("search_depth", "must be positive"));
        }
        if self.line_ending.is_empty() {
            return Err(ConfigError::invalid("line_ending", "must not be empty"));
        }
        self.compile().map(drop)
    }

    /// Default deadline for connect and commands.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs_f64(self.timeout_secs)
    }

    /// Wait per login keystroke.
    pub fn login_poll(&self) -> Duration {
        Duration::from_secs_f64(self.login_poll_secs)
    }

    /// Stale-output drain window.
    pub fn drain_window(&self) -> Duration {
        Duration::from_millis(self.drain_millis)
    }

    /// Deadline for derived queries.
    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.query_timeout_secs)
    }

    /// Compile the prompt regexes into the pattern sets the engine reads with.
    pub(crate) fn compile(&self) -> Result<Prompts, ConfigError> {
        let command = guarded(&self.shell_prompt, "shell_prompt")?;
        let login = guarded(&self.login_prompt, "login_prompt")?;
        let password = guarded(&self.password_prompt, "password_prompt")?;

        let rejected = Pattern::regex(&self.login_rejected)
            .map_err(|e| invalid_pattern("login_rejected", e))?;
        let shell = Pattern::regex(&self.shell_prompt)
            .map_err(|e| invalid_pattern("shell_prompt", e))?;
        let after_password = PatternSet::new()
            .with(REJECTED, rejected)
            .and_then(|s| s.with(PROMPT, shell))
            .and_then(|s| s.with_eof(CLOSED))
            .and_then(|s| s.with_timeout(TIMED_OUT))
            .map_err(|e| invalid_pattern("login_rejected", e))?;

        let banner = self
            .console_banner
            .as_deref()
            .map(|b| guarded(b, "console_banner"))
            .transpose()?;

        Ok(Prompts {
            command,
            login,
            password,
            after_password,
            banner,
        })
    }
}

/// Compiled pattern sets for one session.
#[derive(Debug, Clone)]
pub(crate) struct Prompts {
    /// Shell prompt, guarded by both sentinels.
    pub command: PatternSet,
    pub login: PatternSet,
    pub password: PatternSet,
    /// Rejection before shell prompt, so a failed login is recognised immediately.
    pub after_password: PatternSet,
    pub banner: Option<PatternSet>,
}

/// `pattern` followed by the end-of-stream and timeout sentinels.
fn guarded(pattern: &str, field: &'static str) -> Result<PatternSet, ConfigError> {
    PatternSet::new()
        .with_regex(PROMPT, pattern)
        .and_then(|s| s.with_eof(CLOSED))
        .and_then(|s| s.with_timeout(TIMED_OUT))
        .map_err(|e| invalid_pattern(field, e))
}

fn invalid_pattern(field: &'static str, e: ChannelError) -> ConfigError {
    ConfigError::invalid(field, e.to_string())
}

/// Check a seconds value is usable as a `Duration`.
pub(crate) fn seconds(field: &'static str, value: f64) -> Result<Duration, ConfigError> {
    if !value.is_finite() {
        return Err(ConfigError::invalid(field, format!("{} is not finite", value)));
    }
    if value < 0.0 {
        return Err(ConfigError::invalid(field, format!("{} must be >= 0", value)));
    }
    Duration::try_from_secs_f64(value).map_err(|e| ConfigError::invalid(field, e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate_and_compile() {
        let config = SessionConfig::default();
        assert!(config.validate().is_ok());
        let prompts = config.compile().unwrap();
        assert!(prompts.banner.is_some());
        assert_eq!(
            prompts.after_password.labels().collect::<Vec<_>>(),
            vec![REJECTED, PROMPT, CLOSED, TIMED_OUT]
        );
        assert_eq!(config.timeout(), Duration::from_secs(15));
    }

    #[test]
    fn test_non_negative_timeouts_accepted() {
        for secs in [0.0, 0.001, 1.0, 15.0, 3600.5] {
            let config = SessionConfig::default().with_timeout_secs(secs);
            assert!(config.validate().is_ok(), "{} rejected", secs);
        }
    }

    #[test]
    fn test_negative_and_non_finite_timeouts_rejected() {
        for secs in [-0.001, -1.0, -15.0, f64::NAN, f64::INFINITY] {
            let config = SessionConfig::default().with_timeout_secs(secs);
            assert!(
                matches!(
                    config.validate(),
                    Err(ConfigError::Invalid { field: "timeout_secs", .. })
                ),
                "{} accepted",
                secs
            );
        }
    }

    #[test]
    fn test_zero_retries_rejected() {
        let config = SessionConfig::default().with_login_retries(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_bad_prompt_regex_rejected() {
        let config = SessionConfig::default().with_shell_prompt("root@(");
        assert!(matches!(
            config.compile(),
            Err(ConfigError::Invalid { field: "shell_prompt", .. })
        ));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { field: "shell_prompt", .. })
        ));
    }

    #[test]
    fn test_partial_document_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{ "shell_prompt": "admin@sonic:~\\$", "login_retries": 3 }"#)
                .unwrap();
        assert_eq!(config.shell_prompt, r"admin@sonic:~\$");
        assert_eq!(config.login_retries, 3);
        assert_eq!(config.timeout_secs, 15.0);
        assert_eq!(config.console_banner.as_deref(), Some("Suspend Menu"));
    }
}
