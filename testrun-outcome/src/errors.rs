// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Errors produced while resolving the outcome of a test run.
//!
//! None of these escape [`TestReporter::resolve_outcome`](crate::reporter::TestReporter::resolve_outcome):
//! they are either recovered from locally or written to the execution log.

use camino::Utf8PathBuf;
use std::{error::Error, fmt};
use thiserror::Error;

/// An error that occurred while loading an [`OutcomeConfig`](crate::config::OutcomeConfig).
#[derive(Debug, Error)]
#[error("failed to parse outcome config at `{config_file}`")]
#[non_exhaustive]
pub struct ConfigParseError {
    config_file: Utf8PathBuf,
    #[source]
    kind: ConfigParseErrorKind,
}

impl ConfigParseError {
    pub(crate) fn new(config_file: impl Into<Utf8PathBuf>, kind: ConfigParseErrorKind) -> Self {
        Self {
            config_file: config_file.into(),
            kind,
        }
    }

    /// Returns the config file that failed to parse.
    pub fn config_file(&self) -> &Utf8PathBuf {
        &self.config_file
    }

    /// Returns the kind of error that occurred.
    pub fn kind(&self) -> &ConfigParseErrorKind {
        &self.kind
    }
}

/// The kind of [`ConfigParseError`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigParseErrorKind {
    /// Layering the config sources failed.
    #[error("error building config")]
    BuildError(#[source] Box<config::ConfigError>),

    /// The layered config could not be deserialized.
    #[error("error deserializing config")]
    DeserializeError(#[source] Box<serde_path_to_error::Error<config::ConfigError>>),
}

/// An error that occurred while processing a single crash snapshot.
///
/// This is always attributable to one snapshot, and never aborts outcome resolution.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CrashReportError {
    /// The snapshot could not be read from disk.
    #[error("failed to read crash report `{description}` at {path}")]
    Read {
        /// The description of the snapshot.
        description: String,

        /// The path of the snapshot.
        path: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// The snapshot is not a valid crash document.
    #[error("crash report is malformed")]
    Parse(#[source] serde_json::Error),
}

/// An error returned by a [`ResultParser`](crate::collaborators::ResultParser) implementation.
#[derive(Debug, Error)]
#[error("result parser failed on `{path}`")]
pub struct ResultParserError {
    path: Utf8PathBuf,
    #[source]
    error: Box<dyn Error + Send + Sync>,
}

impl ResultParserError {
    /// Creates a new `ResultParserError` for the given path.
    pub fn new(path: impl Into<Utf8PathBuf>, error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            path: path.into(),
            error: error.into(),
        }
    }

    /// The path the parser was operating on.
    pub fn path(&self) -> &Utf8PathBuf {
        &self.path
    }
}

/// An error that occurred on the structured-result path of result interpretation.
///
/// Recovered from by dumping the structured document to the execution log.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StructuredResultError {
    /// The external result parser failed.
    #[error(transparent)]
    Parser(#[from] ResultParserError),

    /// A file system operation failed.
    #[error("error operating on path {file}")]
    Fs {
        /// The file being operated on.
        file: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },
}

/// An error returned by a [`ProcessManager`](crate::collaborators::ProcessManager) while killing
/// a process tree.
#[derive(Debug, Error)]
#[error("failed to kill process tree rooted at pid {pid}")]
pub struct KillProcessError {
    pid: u32,
    #[source]
    error: Box<dyn Error + Send + Sync>,
}

impl KillProcessError {
    /// Creates a new `KillProcessError`.
    pub fn new(pid: u32, error: impl Into<Box<dyn Error + Send + Sync>>) -> Self {
        Self {
            pid,
            error: error.into(),
        }
    }

    /// The pid at the root of the tree.
    pub fn pid(&self) -> u32 {
        self.pid
    }
}

/// An error that occurred while writing a JUnit failure report.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum WriteFailureReportError {
    /// An error occurred while operating on the file system.
    #[error("error operating on path {file}")]
    Fs {
        /// The file being operated on.
        file: Utf8PathBuf,

        /// The underlying IO error.
        #[source]
        error: std::io::Error,
    },

    /// An error occurred while producing JUnit XML.
    #[error("error writing JUnit output to {file}")]
    Junit {
        /// The output file.
        file: Utf8PathBuf,

        /// The underlying error.
        #[source]
        error: quick_junit::SerializeError,
    },
}

/// Displays an error along with all of its sources, on a single line.
pub struct DisplayErrorChain<E> {
    error: E,
}

impl<E: Error> DisplayErrorChain<E> {
    /// Creates a new `DisplayErrorChain`.
    pub fn new(error: E) -> Self {
        Self { error }
    }
}

impl<E: Error> fmt::Display for DisplayErrorChain<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)?;

        let mut source = self.error.source();
        while let Some(error) = source {
            write!(f, ": {error}")?;
            source = error.source();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_error_chain_includes_sources() {
        let error = StructuredResultError::Fs {
            file: "results/test.xml".into(),
            error: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
        };
        assert_eq!(
            DisplayErrorChain::new(&error).to_string(),
            "error operating on path results/test.xml: no such file",
        );
    }
}
