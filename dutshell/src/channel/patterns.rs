//! Ordered pattern sets for prompt and response detection.

use indexmap::IndexMap;
use regex::bytes::Regex;

use crate::error::ChannelError;

/// A single candidate in a [`PatternSet`].
#[derive(Debug, Clone)]
pub enum Pattern {
    /// Case-insensitive substring, compiled to an escaped regex.
    Literal(Regex),

    /// Regular expression; capture groups are reported on match.
    Regex(Regex),

    /// Matches when the remote end closes the stream.
    Eof,

    /// Matches when the read deadline expires.
    Timeout,
}

impl Pattern {
    /// Case-insensitive substring match.
    pub fn literal(text: &str) -> Result<Self, ChannelError> {
        let regex = Regex::new(&format!("(?i){}", regex::escape(text)))?;
        Ok(Pattern::Literal(regex))
    }

    /// Regular expression match.
    pub fn regex(pattern: &str) -> Result<Self, ChannelError> {
        Ok(Pattern::Regex(Regex::new(pattern)?))
    }

    fn text(&self) -> Option<&Regex> {
        match self {
            Pattern::Literal(re) | Pattern::Regex(re) => Some(re),
            Pattern::Eof | Pattern::Timeout => None,
        }
    }
}

/// Which stream event a sentinel stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sentinel {
    Eof,
    Timeout,
}

/// A successful textual match.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatternMatch {
    /// Label of the pattern that matched.
    pub label: String,

    /// Text preceding the match.
    pub before: String,

    /// The matched text itself.
    pub matched: String,

    /// Capture groups 1..n of a regex pattern (`None` for groups that did not participate).
    pub captures: Vec<Option<String>>,

    /// Byte offset in the searched buffer where the match ended.
    pub(crate) end: usize,
}

impl PatternMatch {
    /// Capture group `index` (1-based, like regex groups).
    pub fn capture(&self, index: usize) -> Option<&str> {
        index
            .checked_sub(1)
            .and_then(|i| self.captures.get(i))
            .and_then(|c| c.as_deref())
    }

    /// Everything consumed by this match (`before` followed by `matched`).
    pub fn consumed(&self) -> String {
        format!("{}{}", self.before, self.matched)
    }
}

/// Ordered, label-unique list of patterns.
///
/// Declaration order is priority: [`find`](Self::find) tests every textual pattern
/// against the same buffer snapshot in order and returns the first one that matches,
/// regardless of where in the buffer the other candidates would have matched.
#[derive(Debug, Clone, Default)]
pub struct PatternSet {
    entries: IndexMap<String, Pattern>,
}

impl PatternSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a pattern. Labels must be unique within a set.
    pub fn push(&mut self, label: impl Into<String>, pattern: Pattern) -> Result<(), ChannelError> {
        let label = label.into();
        if self.entries.contains_key(&label) {
            return Err(ChannelError::DuplicateLabel(label));
        }
        self.entries.insert(label, pattern);
        Ok(())
    }

    /// Builder form of [`push`](Self::push).
    pub fn with(mut self, label: impl Into<String>, pattern: Pattern) -> Result<Self, ChannelError> {
        self.push(label, pattern)?;
        Ok(self)
    }

    /// Append a case-insensitive literal.
    pub fn with_literal(self, label: impl Into<String>, text: &str) -> Result<Self, ChannelError> {
        self.with(label, Pattern::literal(text)?)
    }

    /// Append a regex.
    pub fn with_regex(self, label: impl Into<String>, pattern: &str) -> Result<Self, ChannelError> {
        self.with(label, Pattern::regex(pattern)?)
    }

    /// Append the end-of-stream sentinel.
    pub fn with_eof(self, label: impl Into<String>) -> Result<Self, ChannelError> {
        self.with(label, Pattern::Eof)
    }

    /// Append the timeout sentinel.
    pub fn with_timeout(self, label: impl Into<String>) -> Result<Self, ChannelError> {
        self.with(label, Pattern::Timeout)
    }

    /// Label of the declared sentinel for `kind`, if any.
    pub fn sentinel(&self, kind: Sentinel) -> Option<&str> {
        self.entries
            .iter()
            .find(|(_, p)| match kind {
                Sentinel::Eof => matches!(p, Pattern::Eof),
                Sentinel::Timeout => matches!(p, Pattern::Timeout),
            })
            .map(|(label, _)| label.as_str())
    }

    /// First textual pattern (in declaration order) matching `data`.
    pub fn find(&self, data: &[u8]) -> Option<PatternMatch> {
        self.find_from(data, 0)
    }

    /// Like [`find`](Self::find), but only considers matches starting at or after `scan_from`.
    ///
    /// Bytes before `scan_from` were already ruled out by a previous read cycle.
    pub(crate) fn find_from(&self, data: &[u8], scan_from: usize) -> Option<PatternMatch> {
        let scan_from = scan_from.min(data.len());

        self.entries.iter().find_map(|(label, pattern)| {
            let re = pattern.text()?;
            let caps = re.captures_at(data, scan_from)?;
            let whole = caps.get(0)?;
            let (start, end) = (whole.start(), whole.end());

            let captures = caps
                .iter()
                .skip(1)
                .map(|c| c.map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned()))
                .collect();

            Some(PatternMatch {
                label: label.clone(),
                before: String::from_utf8_lossy(&data[..start]).into_owned(),
                matched: String::from_utf8_lossy(&data[start..end]).into_owned(),
                captures,
                end,
            })
        })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Labels in declaration order.
    pub fn labels(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

/// Label of the first pattern in `patterns` that matches `buffer`.
pub fn match_label<'a>(buffer: &[u8], patterns: &'a PatternSet) -> Option<&'a str> {
    let m = patterns.find(buffer)?;
    patterns.labels().find(|label| *label == m.label)
}
