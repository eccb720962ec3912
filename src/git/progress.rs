//! Parsing of `git clone --progress` output.

use regex::Regex;
use serde::Serialize;
use std::sync::OnceLock;

/// One progress update emitted by git
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CloneProgress {
    /// Phase name as printed by git, e.g. "Receiving objects"
    pub stage: String,
    /// Completion of the phase, 0-100
    pub percent: u8,
}

fn progress_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| {
            // "remote: Counting objects:  45% (9/20)" / "Receiving objects: 100% (20/20), done."
            Regex::new(r"^(?:remote:\s*)?(?P<stage>[A-Za-z][A-Za-z ]*?):\s+(?P<pct>\d{1,3})%").ok()
        })
        .as_ref()
}

impl CloneProgress {
    /// Parse a single progress line, ignoring anything that is not a progress report
    pub fn parse(line: &str) -> Option<Self> {
        let caps = progress_pattern()?.captures(line.trim())?;
        let percent: u8 = caps["pct"].parse().ok()?;
        Some(Self {
            stage: caps["stage"].trim().to_string(),
            percent: percent.min(100),
        })
    }
}

/// Longest line kept before it is emitted unterminated
const MAX_LINE_BYTES: usize = 4096;

/// Splits a stream of stderr bytes into lines on `\r` or `\n`.
///
/// Git redraws progress with carriage returns, so both count as terminators.
/// A line longer than [`MAX_LINE_BYTES`] is emitted in pieces.
#[derive(Debug, Default)]
pub(crate) struct LineSplitter {
    pending: Vec<u8>,
}

impl LineSplitter {
    pub(crate) fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            if byte == b'\r' || byte == b'\n' {
                lines.extend(self.finish());
                continue;
            }
            self.pending.push(byte);
            if self.pending.len() >= MAX_LINE_BYTES {
                lines.extend(self.finish());
            }
        }
        lines
    }

    pub(crate) fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let line = String::from_utf8_lossy(&self.pending).into_owned();
        self.pending.clear();
        Some(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_local_and_remote_progress() {
        assert_eq!(
            CloneProgress::parse("Receiving objects:  45% (9/20)"),
            Some(CloneProgress {
                stage: "Receiving objects".to_string(),
                percent: 45
            })
        );
        assert_eq!(
            CloneProgress::parse("remote: Counting objects: 100% (20/20), done."),
            Some(CloneProgress {
                stage: "Counting objects".to_string(),
                percent: 100
            })
        );
        assert_eq!(CloneProgress::parse("Cloning into 'repo'..."), None);
        assert_eq!(CloneProgress::parse("fatal: repository not found"), None);
    }

    #[test]
    fn splitter_handles_carriage_returns_across_chunks() {
        let mut splitter = LineSplitter::default();
        let mut lines = splitter.push(b"Receiving objects:  10%");
        assert!(lines.is_empty());
        lines.extend(splitter.push(b" (1/10)\rReceiving objects: 100% (10/10)\n"));
        lines.extend(splitter.push(b"done"));
        assert_eq!(
            lines,
            vec![
                "Receiving objects:  10% (1/10)".to_string(),
                "Receiving objects: 100% (10/10)".to_string(),
            ]
        );
        assert_eq!(splitter.finish(), Some("done".to_string()));
        assert_eq!(splitter.finish(), None);
    }

    #[test]
    fn unterminated_output_is_emitted_in_bounded_pieces() {
        let mut splitter = LineSplitter::default();
        let noise = vec![b'x'; MAX_LINE_BYTES * 2 + 10];

        let lines = splitter.push(&noise);

        assert_eq!(lines.len(), 2);
        assert!(lines.iter().all(|l| l.len() == MAX_LINE_BYTES));
        assert_eq!(splitter.finish().map(|l| l.len()), Some(10));
    }
}
