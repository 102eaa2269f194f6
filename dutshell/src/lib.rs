//! # dutshell
//!
//! Async session engine for driving switch hardware under test.
//!
//! A device is reached three ways: its serial console through a console server,
//! its host OS over SSH, and its management controller (BMC) over SSH. Only the
//! console address is known up front; the other two are discovered by querying
//! the device through the console.
//!
//! ## Features
//!
//! - Prompt-driven console login with a bounded wake-up retry loop
//! - Labelled, priority-ordered pattern sets with end-of-stream and timeout sentinels
//! - Tail-window pattern search over an ANSI-stripped receive buffer
//! - Typed session state machine with distinct timeout and closed-channel errors
//! - Derived queries (host/BMC IP, hardware error check, firmware versions)
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use dutshell::{Session, SystemUnderTest};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), dutshell::Error> {
//!     let mut dut = SystemUnderTest::from_path("dut.json")?;
//!
//!     dut.connect_console().await?;
//!     dut.discover().await?;
//!     println!("{}", dut);
//!
//!     if let Some(console) = dut.console() {
//!         let result = console.execute("uname -a").await?;
//!         println!("{}", result.stdout);
//!     }
//!
//!     dut.disconnect_all().await?;
//!     Ok(())
//! }
//! ```

pub mod channel;
pub mod dut;
pub mod error;
pub mod queries;
pub mod session;
pub mod transport;

#[cfg(test)]
mod testing;

// Re-export main types for convenience
pub use channel::{Pattern, PatternMatch, PatternSet, ReadOutcome, match_label};
pub use dut::{DutConfig, SystemUnderTest};
pub use error::{Error, ErrorKind, Result};
pub use session::{
    CommandResult, ConsoleSession, Session, SessionBuilder, SessionConfig, SessionState,
    ShellRole, ShellSession,
};
pub use transport::{Credential, Endpoint, SshConfig};
