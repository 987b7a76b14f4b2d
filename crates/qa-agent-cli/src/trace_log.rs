use anyhow::{Context, Result};
use chrono::Local;
use console::style;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use strum_macros::{Display, EnumString};

/// Labels of the step trace, as shown to the user and written to the log file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum TraceLabel {
    #[strum(serialize = "INPUT SCENARIO")]
    InputScenario,
    #[strum(serialize = "INPUT")]
    Input,
    #[strum(serialize = "THOUGHT")]
    Thought,
    #[strum(serialize = "ACTION")]
    Action,
    #[strum(serialize = "OBSERVATION")]
    Observation,
    #[strum(serialize = "TOOL RESULT")]
    ToolResult,
}

/// The labelled step trace of one run.
///
/// Every entry is printed and appended, timestamped, to a plain text file.
/// The file is only ever appended to and is flushed after each entry.
pub struct TraceLog {
    path: PathBuf,
    file: File,
    console: Box<dyn Write + Send>,
}

impl TraceLog {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        Self::with_console(path, Box::new(io::stdout()))
    }

    pub fn with_console(path: impl AsRef<Path>, console: Box<dyn Write + Send>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open log file {}", path.display()))?;
        Ok(Self {
            path,
            file,
            console,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&mut self, label: TraceLabel, content: &str) -> Result<()> {
        let header = format!("[{}]", label);
        writeln!(self.console, "\n{}\n{}", style(&header).cyan().bold(), content)?;

        writeln!(
            self.file,
            "{} - \n{}\n{}",
            Local::now().format("%H:%M:%S"),
            header,
            content
        )
        .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        self.file.flush()?;
        Ok(())
    }

    /// Console-only output that is not part of the trace
    pub fn print(&mut self, text: &str) -> Result<()> {
        writeln!(self.console, "{}", text)?;
        self.console.flush()?;
        Ok(())
    }
}

impl Drop for TraceLog {
    fn drop(&mut self) {
        let _ = self.file.flush();
        let _ = self.console.flush();
    }
}
