//! Result type for command execution.

use std::time::Duration;

/// Result of one `execute()` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandResult {
    /// The command that was executed.
    pub command: String,

    /// Captured standard output (echo and trailing prompt removed on consoles).
    pub stdout: String,

    /// Captured standard error. Always empty on console channels, which merge streams.
    pub stderr: String,

    /// The raw matched response block (console channels only).
    pub raw: Option<String>,

    /// Remote exit status (direct shells only).
    pub exit_status: Option<u32>,

    /// Time from sending the command to receiving its complete output.
    pub elapsed: Duration,
}

impl CommandResult {
    /// Result from a console channel.
    pub fn console(
        command: impl Into<String>,
        stdout: impl Into<String>,
        raw: impl Into<String>,
        elapsed: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            stdout: stdout.into(),
            stderr: String::new(),
            raw: Some(raw.into()),
            exit_status: None,
            elapsed,
        }
    }

    /// Result from a direct shell.
    pub fn shell(
        command: impl Into<String>,
        stdout: impl Into<String>,
        stderr: impl Into<String>,
        exit_status: Option<u32>,
        elapsed: Duration,
    ) -> Self {
        Self {
            command: command.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
            raw: None,
            exit_status,
            elapsed,
        }
    }

    /// False only when the remote reported a non-zero exit status.
    pub fn is_success(&self) -> bool {
        self.exit_status.is_none_or(|code| code == 0)
    }

    /// Get the output lines as an iterator.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.stdout.lines()
    }

    /// Check if the output contains a substring.
    pub fn contains(&self, pattern: &str) -> bool {
        self.stdout.contains(pattern)
    }
}

impl std::fmt::Display for CommandResult {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stdout)
    }
}

/// Strip the echoed command line and the newline before the prompt.
///
/// `before` is the console text preceding the matched prompt, already free of
/// carriage returns and escape sequences.
pub(crate) fn normalize_output(before: &str, command: &str) -> String {
    let echo = command.trim();
    let body = match memchr::memchr(b'\n', before.as_bytes()) {
        Some(pos) if before[..pos].trim_end().ends_with(echo) => &before[pos + 1..],
        None if !echo.is_empty() && before.trim_end().ends_with(echo) => "",
        _ => before,
    };
    body.strip_suffix('\n').unwrap_or(body).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_and_prompt_newline_stripped() {
        let out = normalize_output("uname -a\nLinux ubuntu 5.4.0-96-generic x86_64\n", "uname -a");
        assert_eq!(out, "Linux ubuntu 5.4.0-96-generic x86_64");
    }

    #[test]
    fn test_multiline_output_kept() {
        let out = normalize_output("ls\na\nb\nc\n", "ls");
        assert_eq!(out, "a\nb\nc");
    }

    #[test]
    fn test_missing_echo_keeps_first_line() {
        let out = normalize_output("first\nsecond\n", "ls");
        assert_eq!(out, "first\nsecond");
    }

    #[test]
    fn test_command_without_output() {
        assert_eq!(normalize_output("true\n", "true"), "");
        assert_eq!(normalize_output("true", "true"), "");
    }

    #[test]
    fn test_success_follows_exit_status() {
        let ok = CommandResult::shell("true", "", "", Some(0), Duration::ZERO);
        let bad = CommandResult::shell("false", "", "", Some(1), Duration::ZERO);
        let console = CommandResult::console("x", "out", "x\nout\n#", Duration::ZERO);
        assert!(ok.is_success());
        assert!(!bad.is_success());
        assert!(console.is_success());
        assert_eq!(console.stderr, "");
        assert_eq!(console.to_string(), "out");
    }
}
