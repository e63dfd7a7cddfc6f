// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Log sources read during outcome resolution, and the execution log sink written to.

use camino::{Utf8Path, Utf8PathBuf};
use std::{
    fs::{File, OpenOptions},
    io::{self, Write as _},
    sync::Mutex,
};
use tokio::io::{AsyncBufReadExt, BufReader, Lines};
use tracing::{debug, warn};

/// A readable text log with a stable path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogFile {
    path: Utf8PathBuf,
    description: String,
}

impl LogFile {
    /// Creates a new `LogFile`.
    pub fn new(path: impl Into<Utf8PathBuf>, description: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            description: description.into(),
        }
    }

    /// The path to the log.
    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    /// A human-readable description of the log.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Opens the log for reading a line at a time.
    pub async fn lines(&self) -> io::Result<Lines<BufReader<tokio::fs::File>>> {
        let file = tokio::fs::File::open(&self.path).await?;
        Ok(BufReader::new(file).lines())
    }

    /// Reads the whole log into memory.
    pub async fn read_to_string(&self) -> io::Result<String> {
        tokio::fs::read_to_string(&self.path).await
    }
}

/// The append-only execution log ("main log") that operators read.
pub trait ExecutionLog: Send + Sync {
    /// The path the log is written to.
    fn path(&self) -> &Utf8Path;

    /// Appends a line to the log.
    ///
    /// Failures to write are not reported to the caller.
    fn write_line(&self, line: &str);
}

impl dyn ExecutionLog + '_ {
    /// Returns a [`LogFile`] reading this log back.
    pub fn reader(&self) -> LogFile {
        LogFile::new(self.path(), "execution log")
    }
}

/// An [`ExecutionLog`] backed by a file on disk.
///
/// Every line is also emitted as a `debug` event with target `testrun_outcome::main_log`.
#[derive(Debug)]
pub struct FileExecutionLog {
    path: Utf8PathBuf,
    file: Mutex<File>,
}

impl FileExecutionLog {
    /// Opens `path` for appending, creating it if necessary.
    pub fn create(path: impl Into<Utf8PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }
}

impl ExecutionLog for FileExecutionLog {
    fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn write_line(&self, line: &str) {
        debug!(target: "testrun_outcome::main_log", "{line}");

        let result = match self.file.lock() {
            Ok(mut file) => writeln!(file, "{line}"),
            Err(_) => Err(io::Error::other("execution log mutex poisoned")),
        };
        if let Err(error) = result {
            warn!(path = %self.path, %error, "failed to write to execution log");
        }
    }
}

/// A file attached to the run's results.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Attachment {
    /// The path of the attached file.
    pub path: Utf8PathBuf,

    /// What the file contains.
    pub kind: AttachmentKind,
}

/// The kind of an [`Attachment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AttachmentKind {
    /// The final structured result document.
    XmlLog,

    /// A crash snapshot that was inspected.
    CrashReport,

    /// A JUnit failure report.
    FailureReport,
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn file_execution_log_appends_lines() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("main.log");
        std::fs::write(&path, "existing\n").expect("wrote log");

        let log = FileExecutionLog::create(&path).expect("opened log");
        log.write_line("Test run started");
        log.write_line("Test run completed");

        let log: &dyn ExecutionLog = &log;
        let reader = log.reader();
        let mut lines = reader.lines().await.expect("opened log");
        let mut seen = Vec::new();
        while let Some(line) = lines.next_line().await.expect("read line") {
            seen.push(line);
        }
        assert_eq!(seen, ["existing", "Test run started", "Test run completed"]);
    }
}
