//! Pattern-driven reads and writes over a [`Link`].

use std::time::Duration;

use log::{debug, trace};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::{Instant, timeout_at};

use super::buffer::PatternBuffer;
use super::patterns::{PatternMatch, PatternSet, Sentinel};
use crate::error::{ChannelError, Result};
use crate::transport::Link;

const READ_CHUNK: usize = 4096;

/// Outcome of [`Channel::read_until`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A textual pattern matched.
    Matched(PatternMatch),

    /// The deadline passed; `before` is everything received but not matched.
    /// Only produced when the set declares the timeout sentinel.
    TimedOut { before: String },

    /// The remote end closed the stream; `before` is the unmatched remainder.
    /// Only produced when the set declares the end-of-stream sentinel.
    Closed { before: String },
}

impl ReadOutcome {
    /// Label of the matched pattern, if this is a match.
    pub fn label(&self) -> Option<&str> {
        match self {
            ReadOutcome::Matched(m) => Some(&m.label),
            _ => None,
        }
    }
}

/// Line-oriented channel over a link.
///
/// Owns the link exclusively; everything written or read goes through here.
pub struct Channel<L: Link> {
    link: L,
    buffer: PatternBuffer,
    eof: bool,
}

impl<L: Link> Channel<L> {
    pub fn new(link: L, search_depth: usize) -> Self {
        Self {
            link,
            buffer: PatternBuffer::new(search_depth),
            eof: false,
        }
    }

    /// Whether the remote end has closed the stream.
    pub fn is_eof(&self) -> bool {
        self.eof
    }

    /// Write raw bytes and flush.
    pub async fn send(&mut self, data: &[u8]) -> Result<()> {
        if self.eof {
            return Err(ChannelError::Closed.into());
        }
        trace!("send: {} bytes", data.len());
        self.write_all(data).await
    }

    /// Write `text` followed by `line_ending`.
    pub async fn send_line(&mut self, text: &str, line_ending: &str) -> Result<()> {
        let mut data = Vec::with_capacity(text.len() + line_ending.len());
        data.extend_from_slice(text.as_bytes());
        data.extend_from_slice(line_ending.as_bytes());
        self.send(&data).await
    }

    async fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let written = async {
            self.link.write_all(data).await?;
            self.link.flush().await
        }
        .await;

        match written {
            Ok(()) => Ok(()),
            Err(e) if is_disconnect(&e) => {
                self.eof = true;
                Err(ChannelError::Closed.into())
            }
            Err(e) => Err(ChannelError::Io(e).into()),
        }
    }

    /// Read until a textual pattern in `patterns` matches, the deadline passes, or
    /// the stream closes.
    ///
    /// Timeout and closure are returned as [`ReadOutcome`] values when the set
    /// declares the matching sentinel, and raised as [`ChannelError::Timeout`] /
    /// [`ChannelError::Closed`] otherwise.
    pub async fn read_until(
        &mut self,
        patterns: &PatternSet,
        timeout: Duration,
    ) -> Result<ReadOutcome> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        self.buffer.rewind();

        loop {
            if let Some(m) = self.buffer.search(patterns) {
                debug!("matched pattern '{}'", m.label);
                return Ok(ReadOutcome::Matched(m));
            }

            if self.eof {
                return match patterns.sentinel(Sentinel::Eof) {
                    Some(_) => Ok(ReadOutcome::Closed {
                        before: self.buffer.take_text(),
                    }),
                    None => Err(ChannelError::Closed.into()),
                };
            }

            match timeout_at(deadline, self.link.read(&mut chunk)).await {
                Err(_) => {
                    debug!(
                        "no pattern matched within {:?} ({} bytes pending)",
                        timeout,
                        self.buffer.len()
                    );
                    return match patterns.sentinel(Sentinel::Timeout) {
                        Some(_) => Ok(ReadOutcome::TimedOut {
                            before: self.buffer.as_str_lossy().into_owned(),
                        }),
                        None => Err(ChannelError::Timeout(timeout).into()),
                    };
                }
                Ok(Ok(0)) => {
                    debug!("stream closed by remote");
                    self.eof = true;
                }
                Ok(Ok(n)) => {
                    trace!("recv: {} bytes", n);
                    self.buffer.extend(&chunk[..n]);
                }
                Ok(Err(e)) if is_disconnect(&e) => {
                    debug!("stream reset: {}", e);
                    self.eof = true;
                }
                Ok(Err(e)) => return Err(ChannelError::Io(e).into()),
            }
        }
    }

    /// Like [`read_until`](Self::read_until), but any non-match is an error.
    pub async fn expect(&mut self, patterns: &PatternSet, timeout: Duration) -> Result<PatternMatch> {
        match self.read_until(patterns, timeout).await? {
            ReadOutcome::Matched(m) => Ok(m),
            ReadOutcome::TimedOut { .. } => Err(ChannelError::Timeout(timeout).into()),
            ReadOutcome::Closed { .. } => Err(ChannelError::Closed.into()),
        }
    }

    /// Discard buffered and in-flight output.
    ///
    /// Reads and throws away whatever arrives until `window` elapses or the stream
    /// closes. Returns the number of bytes discarded. Never fails on closure; that
    /// surfaces on the next read.
    pub async fn drain(&mut self, window: Duration) -> Result<usize> {
        let mut discarded = self.buffer.len();
        self.buffer.clear();

        let deadline = Instant::now() + window;
        let mut chunk = [0u8; READ_CHUNK];
        while !self.eof {
            match timeout_at(deadline, self.link.read(&mut chunk)).await {
                Err(_) => break,
                Ok(Ok(0)) => self.eof = true,
                Ok(Ok(n)) => discarded += n,
                Ok(Err(e)) if is_disconnect(&e) => self.eof = true,
                Ok(Err(e)) => return Err(ChannelError::Io(e).into()),
            }
        }

        if discarded > 0 {
            trace!("drained {} stale bytes", discarded);
        }
        Ok(discarded)
    }

    /// Read until the remote end closes the stream or `timeout` passes.
    ///
    /// Returns everything received. Reaching the deadline first is not an error.
    pub async fn read_to_eof(&mut self, timeout: Duration) -> Result<String> {
        let deadline = Instant::now() + timeout;
        let mut chunk = [0u8; READ_CHUNK];
        while !self.eof {
            match timeout_at(deadline, self.link.read(&mut chunk)).await {
                Err(_) => {
                    debug!("stream still open after {:?}", timeout);
                    break;
                }
                Ok(Ok(0)) => self.eof = true,
                Ok(Ok(n)) => self.buffer.extend(&chunk[..n]),
                Ok(Err(e)) if is_disconnect(&e) => self.eof = true,
                Ok(Err(e)) => return Err(ChannelError::Io(e).into()),
            }
        }
        Ok(self.buffer.take_text())
    }

    /// Close the link.
    pub async fn close(self) -> Result<()> {
        self.link.close().await
    }
}

fn is_disconnect(e: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(
        e.kind(),
        ErrorKind::BrokenPipe
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::UnexpectedEof
    )
}
