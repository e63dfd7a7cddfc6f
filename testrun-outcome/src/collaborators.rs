// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Contracts for the components that outcome resolution depends on but does not own.
//!
//! Launching the app, listening for test output, capturing crash snapshots and parsing structured
//! result documents all happen elsewhere. The traits here are the seams: implementations are
//! handed to [`TestReporter::new`](crate::reporter::TestReporter::new) bundled as
//! [`Collaborators`].

use crate::{
    classify::FailureCategory,
    errors::{KillProcessError, ResultParserError},
    logs::{ExecutionLog, LogFile},
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::BoxFuture;
use serde::Deserialize;
use std::{fmt, sync::Arc, time::Duration};

/// The structured format of a result document.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq, Hash)]
pub enum XmlResultJargon {
    /// NUnit v2 XML.
    #[serde(rename = "nunit-v2")]
    NUnitV2,

    /// NUnit v3 XML. The only format that supports attachments.
    #[serde(rename = "nunit-v3")]
    NUnitV3,

    /// NUnit XML wrapped with additional data by the in-app runner.
    #[serde(rename = "touch-unit")]
    TouchUnit,

    /// xUnit XML.
    #[serde(rename = "xunit")]
    XUnit,

    /// No structured format: results are plain text.
    #[serde(rename = "missing")]
    Missing,
}

impl XmlResultJargon {
    /// Returns true if documents in this format can carry attachments.
    pub fn supports_attachments(self) -> bool {
        matches!(self, Self::NUnitV3)
    }
}

impl fmt::Display for XmlResultJargon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NUnitV2 => "nunit-v2",
            Self::NUnitV3 => "nunit-v3",
            Self::TouchUnit => "touch-unit",
            Self::XUnit => "xunit",
            Self::Missing => "missing",
        };
        f.write_str(s)
    }
}

/// The exit status of the launched process, as reported by the process runner.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProcessExecutionResult {
    /// The exit code of the process.
    pub exit_code: i32,

    /// True if the process runner gave up waiting for the process.
    pub timed_out: bool,
}

impl ProcessExecutionResult {
    /// Returns true if the process exited cleanly without timing out.
    pub fn succeeded(&self) -> bool {
        !self.timed_out && self.exit_code == 0
    }
}

/// The result of the launch step, as reported by the process runner.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LaunchResult {
    /// The app was launched.
    Started,

    /// The launch did not complete within the launch timeout.
    TimedOut,

    /// The launch step failed with an error.
    Failed(String),

    /// The launch step was cancelled.
    Cancelled,
}

/// Whether the run targets a simulator or a physical device.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunTarget {
    /// A simulator on the host.
    Simulator,

    /// A physical device.
    Device,
}

/// Identifies the app under test.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppInformation {
    /// The app name.
    pub app_name: String,

    /// The build variation, e.g. "Debug" or "Release (all optimizations)".
    pub variation: String,

    /// A human-readable name for the kind of run, used in summaries (e.g. "iOS Simulator").
    pub run_mode: String,
}

impl AppInformation {
    /// The name given to this run in structured result documents.
    pub fn test_run_name(&self) -> String {
        format!("{} {}", self.app_name, self.variation)
    }
}

/// Kills processes on behalf of the reporter.
pub trait ProcessManager: Send + Sync {
    /// Kills the process with the given pid and all of its children, writing progress to `log`.
    fn kill_tree<'a>(
        &'a self,
        pid: u32,
        log: &'a dyn ExecutionLog,
    ) -> BoxFuture<'a, Result<(), KillProcessError>>;
}

/// The listener receiving raw test output from the running app.
pub trait ResultChannel: Send + Sync {
    /// The path the listener has written (or will write) raw test output to.
    fn test_log_path(&self) -> &Utf8Path;

    /// Resolves once the listener considers itself done receiving data.
    fn completion(&self) -> BoxFuture<'_, ()>;
}

/// Captures OS crash snapshots while the run is in progress.
pub trait CrashSnapshotReporter: Send + Sync {
    /// Stops capturing after waiting `grace` for late snapshots to land.
    ///
    /// Returns the captured snapshots in discovery order. Snapshots are readable only once this
    /// future has resolved.
    fn end_capture(&self, grace: Duration) -> BoxFuture<'_, Vec<LogFile>>;
}

/// The summary produced from a structured result document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HumanReadableResults {
    /// The terminal "Tests run:" summary line, if any.
    pub result_line: Option<String>,

    /// True if any test failed.
    pub failed: bool,
}

/// A failure to report to CI, handed to [`ResultParser::generate_failure`].
#[derive(Clone, Copy, Debug)]
pub struct FailureRecord<'a> {
    /// The directory holding the run's logs. Reports are written here.
    pub logs_directory: &'a Utf8Path,

    /// The failure category.
    pub category: FailureCategory,

    /// The app name.
    pub app_name: &'a str,

    /// The build variation.
    pub variation: &'a str,

    /// A short title for the failure.
    pub title: &'a str,

    /// A longer description of the failure.
    pub detail: &'a str,

    /// The path to the main execution log.
    pub main_log_path: &'a Utf8Path,

    /// The structured result format in use.
    pub jargon: XmlResultJargon,
}

/// Parses and rewrites structured result documents.
///
/// All operations are synchronous file transformations; they run to completion once started.
pub trait ResultParser: Send + Sync {
    /// Extracts the structured document from the raw listener output at `source`, writing it to
    /// `destination`.
    fn clean_xml(&self, source: &Utf8Path, destination: &Utf8Path)
    -> Result<(), ResultParserError>;

    /// Returns the structured format of the document at `path`, or `None` if it isn't a valid
    /// structured document.
    fn validate_xml(&self, path: &Utf8Path) -> Option<XmlResultJargon>;

    /// Returns the final path for a structured document in the given format.
    fn xml_file_path(&self, path: &Utf8Path, jargon: XmlResultJargon) -> Utf8PathBuf;

    /// Returns the path CI should pick the final document up from.
    fn ci_file_path(&self, path: &Utf8Path) -> Utf8PathBuf;

    /// Writes a human-readable rendering of the document at `source` to `destination`.
    fn generate_human_readable_results(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
        jargon: XmlResultJargon,
    ) -> Result<HumanReadableResults, ResultParserError>;

    /// Copies `source` to `destination`, filling in the run name and attaching `attachments`.
    fn update_missing_data(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
        test_run_name: &str,
        attachments: &[Utf8PathBuf],
    ) -> Result<(), ResultParserError>;

    /// Writes a structured failure document for CI.
    fn generate_failure(&self, failure: &FailureRecord<'_>) -> Result<(), ResultParserError>;
}

/// The external collaborators of a [`TestReporter`](crate::reporter::TestReporter).
#[derive(Clone)]
pub struct Collaborators {
    /// Kills stuck processes.
    pub process_manager: Arc<dyn ProcessManager>,

    /// The test output listener.
    pub result_channel: Arc<dyn ResultChannel>,

    /// The crash snapshot capture.
    pub crash_reporter: Arc<dyn CrashSnapshotReporter>,

    /// The structured result parser.
    pub result_parser: Arc<dyn ResultParser>,
}

impl fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collaborators")
            .field("test_log_path", &self.result_channel.test_log_path())
            .finish_non_exhaustive()
    }
}
