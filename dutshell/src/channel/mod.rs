//! Channel layer: pattern matching and pattern-driven I/O.
//!
//! Everything above the transport talks to the remote terminal through a
//! [`Channel`], which owns the receive buffer and the only read/write path.

mod buffer;
mod io;
mod patterns;

pub use buffer::PatternBuffer;
pub use io::{Channel, ReadOutcome};
pub use patterns::{Pattern, PatternMatch, PatternSet, Sentinel, match_label};
