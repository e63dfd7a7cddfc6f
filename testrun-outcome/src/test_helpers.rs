// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fakes shared by unit tests.

use crate::{
    collaborators::{
        AppInformation, CrashSnapshotReporter, FailureRecord, HumanReadableResults,
        ProcessManager, ResultChannel, ResultParser, XmlResultJargon,
    },
    errors::{KillProcessError, ResultParserError},
    logs::{ExecutionLog, LogFile},
};
use camino::{Utf8Path, Utf8PathBuf};
use futures::future::{self, BoxFuture, FutureExt};
use std::{
    fs::OpenOptions,
    io::Write as _,
    sync::{Arc, Mutex},
    time::Duration,
};

pub(crate) fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_test_writer()
        .try_init();
}

pub(crate) fn test_app() -> AppInformation {
    AppInformation {
        app_name: "monotouchtest".to_owned(),
        variation: "Debug".to_owned(),
        run_mode: "iOS Simulator".to_owned(),
    }
}

/// An execution log that writes through to disk and remembers every line.
#[derive(Debug)]
pub(crate) struct MemoryExecutionLog {
    path: Utf8PathBuf,
    lines: Mutex<Vec<String>>,
}

impl MemoryExecutionLog {
    pub(crate) fn new(path: impl Into<Utf8PathBuf>) -> Self {
        let path = path.into();
        std::fs::write(&path, "").expect("created execution log");
        Self {
            path,
            lines: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn lines(&self) -> Vec<String> {
        self.lines.lock().expect("lock is not poisoned").clone()
    }
}

impl ExecutionLog for MemoryExecutionLog {
    fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn write_line(&self, line: &str) {
        let mut file = OpenOptions::new()
            .append(true)
            .open(&self.path)
            .expect("opened execution log");
        writeln!(file, "{line}").expect("wrote to execution log");
        self.lines
            .lock()
            .expect("lock is not poisoned")
            .push(line.to_owned());
    }
}

#[derive(Debug, Default)]
pub(crate) struct FakeProcessManager {
    killed: Mutex<Vec<u32>>,
}

impl FakeProcessManager {
    pub(crate) fn killed(&self) -> Vec<u32> {
        self.killed.lock().expect("lock is not poisoned").clone()
    }
}

impl ProcessManager for FakeProcessManager {
    fn kill_tree<'a>(
        &'a self,
        pid: u32,
        _log: &'a dyn ExecutionLog,
    ) -> BoxFuture<'a, Result<(), KillProcessError>> {
        self.killed.lock().expect("lock is not poisoned").push(pid);
        future::ready(Ok(())).boxed()
    }
}

/// A listener that completes after `completes_after`, or never if that is `None`.
#[derive(Debug)]
pub(crate) struct FakeResultChannel {
    test_log_path: Utf8PathBuf,
    completes_after: Option<Duration>,
}

impl FakeResultChannel {
    pub(crate) fn new(test_log_path: impl Into<Utf8PathBuf>, completes_after: Option<Duration>) -> Self {
        Self {
            test_log_path: test_log_path.into(),
            completes_after,
        }
    }
}

impl ResultChannel for FakeResultChannel {
    fn test_log_path(&self) -> &Utf8Path {
        &self.test_log_path
    }

    fn completion(&self) -> BoxFuture<'_, ()> {
        match self.completes_after {
            Some(delay) => tokio::time::sleep(delay).boxed(),
            None => future::pending().boxed(),
        }
    }
}

/// Returns its snapshots once the grace period has passed. A stuck reporter never returns.
#[derive(Debug, Default)]
pub(crate) struct FakeCrashReporter {
    snapshots: Vec<LogFile>,
    stuck: bool,
    graces: Mutex<Vec<Duration>>,
}

impl FakeCrashReporter {
    pub(crate) fn new(snapshots: Vec<LogFile>) -> Self {
        Self {
            snapshots,
            ..Default::default()
        }
    }

    pub(crate) fn stuck() -> Self {
        Self {
            stuck: true,
            ..Default::default()
        }
    }

    pub(crate) fn graces(&self) -> Vec<Duration> {
        self.graces.lock().expect("lock is not poisoned").clone()
    }
}

impl CrashSnapshotReporter for FakeCrashReporter {
    fn end_capture(&self, grace: Duration) -> BoxFuture<'_, Vec<LogFile>> {
        self.graces.lock().expect("lock is not poisoned").push(grace);
        if self.stuck {
            return future::pending().boxed();
        }
        let snapshots = self.snapshots.clone();
        async move {
            tokio::time::sleep(grace).await;
            snapshots
        }
        .boxed()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ParserCall {
    CleanXml(Utf8PathBuf, Utf8PathBuf),
    UpdateMissingData {
        source: Utf8PathBuf,
        destination: Utf8PathBuf,
        test_run_name: String,
        attachments: Vec<Utf8PathBuf>,
    },
    GenerateHumanReadable(Utf8PathBuf),
    GenerateFailure {
        category: String,
        title: String,
        detail: String,
    },
}

/// A result parser that treats the raw output as the structured document.
///
/// By default nothing validates, so results are read as plain text.
#[derive(Debug, Default)]
pub(crate) struct FakeResultParser {
    valid_as: Option<XmlResultJargon>,
    result_line: String,
    failed: bool,
    fail_human_readable: bool,
    calls: Mutex<Vec<ParserCall>>,
}

impl FakeResultParser {
    pub(crate) fn valid(jargon: XmlResultJargon, result_line: &str, failed: bool) -> Self {
        Self {
            valid_as: Some(jargon),
            result_line: result_line.to_owned(),
            failed,
            ..Default::default()
        }
    }

    pub(crate) fn fail_human_readable(mut self) -> Self {
        self.fail_human_readable = true;
        self
    }

    pub(crate) fn calls(&self) -> Vec<ParserCall> {
        self.calls.lock().expect("lock is not poisoned").clone()
    }

    fn record(&self, call: ParserCall) {
        self.calls.lock().expect("lock is not poisoned").push(call);
    }
}

impl ResultParser for FakeResultParser {
    fn clean_xml(&self, source: &Utf8Path, destination: &Utf8Path) -> Result<(), ResultParserError> {
        self.record(ParserCall::CleanXml(source.to_owned(), destination.to_owned()));
        std::fs::copy(source, destination)
            .map(|_| ())
            .map_err(|error| ResultParserError::new(source, error))
    }

    fn validate_xml(&self, path: &Utf8Path) -> Option<XmlResultJargon> {
        self.valid_as.filter(|_| path.exists())
    }

    fn xml_file_path(&self, path: &Utf8Path, jargon: XmlResultJargon) -> Utf8PathBuf {
        let stem = path.file_stem().unwrap_or("results");
        path.with_file_name(format!("{stem}-{jargon}.xml"))
    }

    fn ci_file_path(&self, path: &Utf8Path) -> Utf8PathBuf {
        let name = path.file_name().unwrap_or("results.xml");
        path.with_file_name(format!("vsts-{name}"))
    }

    fn generate_human_readable_results(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
        _jargon: XmlResultJargon,
    ) -> Result<HumanReadableResults, ResultParserError> {
        self.record(ParserCall::GenerateHumanReadable(source.to_owned()));
        if self.fail_human_readable {
            return Err(ResultParserError::new(source, "malformed document"));
        }
        std::fs::write(destination, format!("{}\n", self.result_line))
            .map_err(|error| ResultParserError::new(destination, error))?;
        Ok(HumanReadableResults {
            result_line: Some(self.result_line.clone()).filter(|line| !line.is_empty()),
            failed: self.failed,
        })
    }

    fn update_missing_data(
        &self,
        source: &Utf8Path,
        destination: &Utf8Path,
        test_run_name: &str,
        attachments: &[Utf8PathBuf],
    ) -> Result<(), ResultParserError> {
        self.record(ParserCall::UpdateMissingData {
            source: source.to_owned(),
            destination: destination.to_owned(),
            test_run_name: test_run_name.to_owned(),
            attachments: attachments.to_vec(),
        });
        std::fs::copy(source, destination)
            .map(|_| ())
            .map_err(|error| ResultParserError::new(source, error))
    }

    fn generate_failure(&self, failure: &FailureRecord<'_>) -> Result<(), ResultParserError> {
        self.record(ParserCall::GenerateFailure {
            category: failure.category.to_string(),
            title: failure.title.to_owned(),
            detail: failure.detail.to_owned(),
        });
        Ok(())
    }
}

/// Bundles fakes as [`Collaborators`](crate::collaborators::Collaborators), keeping handles to
/// inspect them afterwards.
pub(crate) struct FakeCollaborators {
    pub(crate) process_manager: Arc<FakeProcessManager>,
    pub(crate) result_channel: Arc<FakeResultChannel>,
    pub(crate) crash_reporter: Arc<FakeCrashReporter>,
    pub(crate) result_parser: Arc<FakeResultParser>,
}

impl FakeCollaborators {
    pub(crate) fn collaborators(&self) -> crate::collaborators::Collaborators {
        crate::collaborators::Collaborators {
            process_manager: self.process_manager.clone(),
            result_channel: self.result_channel.clone(),
            crash_reporter: self.crash_reporter.clone(),
            result_parser: self.result_parser.clone(),
        }
    }
}
