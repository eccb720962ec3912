//! Terminal rendering for workflow results.
//!
//! Chatter goes to stdout and respects `--quiet`; errors go to stderr and
//! are always shown. JSON output bypasses the quiet flag.

use crate::saga::{RollbackReport, RollbackStatus};
use serde::Serialize;
use std::io::Write;
use termcolor::{Buffer, BufferWriter, Color, ColorChoice, ColorSpec, WriteColor};

/// Leading marker of a status line
struct Marker {
    symbol: &'static str,
    color: Color,
    bold: bool,
}

const INFO: Marker = Marker { symbol: "ℹ", color: Color::Cyan, bold: false };
const SUCCESS: Marker = Marker { symbol: "✓", color: Color::Green, bold: true };
const WARN: Marker = Marker { symbol: "⚠", color: Color::Yellow, bold: true };
const PROGRESS: Marker = Marker { symbol: "⋯", color: Color::Magenta, bold: false };
const DETAIL: Marker = Marker { symbol: "→", color: Color::Blue, bold: false };

fn write_marked(buffer: &mut Buffer, marker: &Marker, message: &str) -> std::io::Result<()> {
    buffer.set_color(ColorSpec::new().set_fg(Some(marker.color)).set_bold(marker.bold))?;
    write!(buffer, "{}", marker.symbol)?;
    buffer.reset()?;
    writeln!(buffer, " {}", message)
}

/// Colored output honoring `--verbose` and `--quiet`
#[derive(Debug)]
pub struct OutputManager {
    stdout: BufferWriter,
    verbose: bool,
    quiet: bool,
}

impl Clone for OutputManager {
    fn clone(&self) -> Self {
        Self::new(self.verbose, self.quiet)
    }
}

impl OutputManager {
    /// Create a new output manager
    pub fn new(verbose: bool, quiet: bool) -> Self {
        Self {
            stdout: BufferWriter::stdout(ColorChoice::Auto),
            verbose,
            quiet,
        }
    }

    fn marked(&self, marker: &Marker, message: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut buffer = self.stdout.buffer();
        write_marked(&mut buffer, marker, message)?;
        self.stdout.print(&buffer)
    }

    fn plain(&self, line: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut buffer = self.stdout.buffer();
        writeln!(buffer, "{}", line)?;
        self.stdout.print(&buffer)
    }

    /// Neutral status line
    pub fn info(&self, message: &str) -> std::io::Result<()> {
        self.marked(&INFO, message)
    }

    /// Completed workflow
    pub fn success(&self, message: &str) -> std::io::Result<()> {
        self.marked(&SUCCESS, message)
    }

    /// Something the user should look at
    pub fn warn(&self, message: &str) -> std::io::Result<()> {
        self.marked(&WARN, message)
    }

    /// Workflow starting
    pub fn progress(&self, message: &str) -> std::io::Result<()> {
        self.marked(&PROGRESS, message)
    }

    /// Extra detail, only with `--verbose`
    pub fn verbose(&self, message: &str) -> std::io::Result<()> {
        if !self.verbose {
            return Ok(());
        }
        self.marked(&DETAIL, message)
    }

    /// Print an error on stderr, even in quiet mode
    pub fn error(&self, message: &str) {
        let stderr = BufferWriter::stderr(ColorChoice::Auto);
        let mut buffer = stderr.buffer();
        let marker = Marker { symbol: "✗", color: Color::Red, bold: true };
        if write_marked(&mut buffer, &marker, message)
            .and_then(|()| stderr.print(&buffer))
            .is_err()
        {
            eprintln!("✗ {}", message);
        }
    }

    /// Heading above a block of indented lines
    pub fn section(&self, title: &str) -> std::io::Result<()> {
        if self.quiet {
            return Ok(());
        }
        let mut buffer = self.stdout.buffer();
        writeln!(buffer)?;
        buffer.set_color(ColorSpec::new().set_fg(Some(Color::Cyan)).set_bold(true))?;
        writeln!(buffer, "── {} ──", title)?;
        buffer.reset()?;
        self.stdout.print(&buffer)
    }

    /// Line nested under the previous status line
    pub fn indent(&self, message: &str) -> std::io::Result<()> {
        self.plain(&format!("    {}", message))
    }

    /// Unadorned line
    pub fn println(&self, message: &str) -> std::io::Result<()> {
        self.plain(message)
    }

    /// Print a value as pretty JSON on stdout, ignoring quiet mode
    pub fn json<T: Serialize + ?Sized>(&self, value: &T) -> crate::error::Result<()> {
        let rendered = serde_json::to_string_pretty(value)?;
        let mut buffer = self.stdout.buffer();
        writeln!(buffer, "{}", rendered)?;
        self.stdout.print(&buffer)?;
        Ok(())
    }

    /// List every compensation attempted during a rollback
    pub fn rollback_report(&self, report: &RollbackReport) -> std::io::Result<()> {
        if report.entries.is_empty() {
            return self.indent("No steps needed compensation");
        }

        for outcome in &report.entries {
            match &outcome.status {
                RollbackStatus::Compensated => {
                    self.indent(&format!("↺ {} compensated", outcome.step))?
                }
                RollbackStatus::Failed(reason) => {
                    self.warn(&format!("    {} could not be compensated: {}", outcome.step, reason))?
                }
            }
        }
        Ok(())
    }

    /// Whether `--quiet` (or `--json`) silenced chatter
    pub fn is_quiet(&self) -> bool {
        self.quiet
    }
}
