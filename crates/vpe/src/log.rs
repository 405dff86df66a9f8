//! The bounded diagnostic log.
//!
//! Messages are timestamped with the seconds elapsed since the log was
//! created. Multi-line messages are stored as one entry per line, with
//! continuation lines indented under the first. Once the log holds more
//! than its limit, the oldest lines are dropped.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Width of the `"   12.34: "` prefix.
const PREFIX_WIDTH: usize = 9;

/// Lines added to the log by one message, and how many old lines were
/// dropped to make room.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Appended {
    /// The formatted lines added.
    pub lines: Vec<String>,
    /// Number of old lines dropped from the front.
    pub trimmed: usize,
}

/// A bounded FIFO of formatted log lines.
#[derive(Debug, Clone)]
pub struct Log {
    lines: VecDeque<String>,
    maxlen: usize,
    start: Instant,
}

impl Log {
    /// An empty log holding at most `maxlen` lines.
    #[must_use]
    pub fn new(maxlen: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            maxlen,
            start: Instant::now(),
        }
    }

    /// Add a message, timestamped now.
    pub fn push(&mut self, text: &str) -> Appended {
        let elapsed = self.start.elapsed();
        self.push_at(elapsed, text)
    }

    /// Add a message with an explicit timestamp.
    pub fn push_at(&mut self, elapsed: Duration, text: &str) -> Appended {
        let mut lines: Vec<String> = text
            .lines()
            .enumerate()
            .map(|(i, line)| {
                if i == 0 {
                    format!("{:7.2}: {line}", elapsed.as_secs_f64())
                } else {
                    format!("{}{line}", " ".repeat(PREFIX_WIDTH))
                }
            })
            .collect();
        if lines.is_empty() {
            lines.push(format!("{:7.2}: ", elapsed.as_secs_f64()));
        }
        self.lines.extend(lines.iter().cloned());
        let trimmed = self.trim();
        Appended { lines, trimmed }
    }

    fn trim(&mut self) -> usize {
        let excess = self.lines.len().saturating_sub(self.maxlen);
        self.lines.drain(..excess);
        excess
    }

    /// The stored lines, oldest first.
    #[must_use]
    pub fn lines(&self) -> Vec<String> {
        self.lines.iter().cloned().collect()
    }

    /// Number of stored lines.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lines.len()
    }

    /// Whether the log is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drop every line.
    pub fn clear(&mut self) {
        self.lines.clear();
    }

    /// The line limit.
    #[must_use]
    pub const fn maxlen(&self) -> usize {
        self.maxlen
    }

    /// Change the line limit. Returns the number of lines dropped.
    pub fn set_maxlen(&mut self, maxlen: usize) -> usize {
        self.maxlen = maxlen;
        self.trim()
    }
}

impl Default for Log {
    fn default() -> Self {
        Self::new(500)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_and_continuation_lines() {
        let mut log = Log::new(10);
        let added = log.push_at(Duration::from_millis(1500), "first\nsecond");
        assert_eq!(
            added.lines,
            vec!["   1.50: first".to_string(), "         second".to_string()]
        );
        assert_eq!(added.trimmed, 0);
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_oldest_lines_dropped() {
        let mut log = Log::new(3);
        for n in 0..3 {
            log.push_at(Duration::ZERO, &format!("m{n}"));
        }
        let added = log.push_at(Duration::ZERO, "m3\nm3b");
        assert_eq!(added.trimmed, 2);
        let lines = log.lines();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("m2"));
        assert!(lines[2].ends_with("m3b"));
    }

    #[test]
    fn test_shrinking_limit_trims() {
        let mut log = Log::new(5);
        for n in 0..5 {
            log.push_at(Duration::ZERO, &format!("m{n}"));
        }
        assert_eq!(log.set_maxlen(2), 3);
        assert!(log.lines()[0].ends_with("m3"));
        log.clear();
        assert!(log.is_empty());
    }
}
