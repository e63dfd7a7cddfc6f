// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Picking a single failure category for a run, and describing it for CI.
//!
//! Classification is a decision table evaluated once per run, after both the coarse and the
//! fine-grained outcomes are known. The first matching row wins:
//!
//! | condition | category |
//! |---|---|
//! | a crash reason was found | [`FailureCategory::Crash`] |
//! | the launch failed | [`FailureCategory::Launch`] |
//! | a device run crashed and the main log shows a TCP failure | [`FailureCategory::TcpConnection`] |
//! | the run timed out | [`FailureCategory::Timeout`] |
//!
//! Anything else that didn't succeed is an unexplained failure and produces no report.

use crate::{collaborators::RunTarget, config::CrashCaptureConfig, logs::LogFile};
use camino::Utf8PathBuf;
use std::{fmt, time::Duration};
use tracing::warn;

static PER_PROCESS_LIMIT: &str = "per-process-limit";
static TCP_FAILURE_PHRASE: &str = "Couldn't establish a TCP connection with any of the hostnames";

/// The category of a run failure reported to CI.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    /// The OS killed the app and said why.
    Crash,

    /// The app could not be launched.
    Launch,

    /// The device could not reach the host over TCP.
    TcpConnection,

    /// The run timed out.
    Timeout,
}

impl FailureCategory {
    /// The name CI knows this category by.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Crash => "crash",
            Self::Launch => "launch",
            Self::TcpConnection => "tcp-connection",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything classification depends on, apart from the TCP probe.
#[derive(Clone, Copy, Debug)]
pub struct FailureFacts<'a> {
    /// Whether the run succeeded.
    pub succeeded: bool,

    /// Whether the run crashed.
    pub crashed: bool,

    /// Whether the run timed out.
    pub timed_out: bool,

    /// Whether the launch tool reported a launch failure.
    pub launch_failure: bool,

    /// The crash reason found in a crash snapshot, if any.
    pub crash_reason: Option<&'a str>,

    /// Where the run happened.
    pub target: RunTarget,
}

impl FailureFacts<'_> {
    fn crash_reason(&self) -> Option<&str> {
        self.crash_reason.filter(|reason| !reason.is_empty())
    }

    /// Returns true if classification depends on probing the main log for a TCP failure.
    ///
    /// The probe reads the whole main log, so callers only run it when this returns true.
    pub fn needs_tcp_probe(&self) -> bool {
        !self.succeeded
            && self.crash_reason().is_none()
            && !self.launch_failure
            && self.crashed
            && self.target == RunTarget::Device
    }
}

/// Picks the failure category for a run. Returns `None` for runs that succeeded, and for failures
/// nothing explains.
pub fn classify(facts: &FailureFacts<'_>, tcp_connection_failed: bool) -> Option<FailureCategory> {
    if facts.succeeded {
        None
    } else if facts.crash_reason().is_some() {
        Some(FailureCategory::Crash)
    } else if facts.launch_failure {
        Some(FailureCategory::Launch)
    } else if facts.needs_tcp_probe() && tcp_connection_failed {
        Some(FailureCategory::TcpConnection)
    } else if facts.timed_out {
        Some(FailureCategory::Timeout)
    } else {
        None
    }
}

/// How long crash capture should wait for late snapshots before they are read.
pub fn crash_grace_period(succeeded: bool, crashed: bool, config: &CrashCaptureConfig) -> Duration {
    if crashed {
        config.crashed_grace
    } else if succeeded {
        config.succeeded_grace
    } else {
        config.failed_grace
    }
}

/// The failure message returned to the caller for a run that didn't succeed.
pub fn failure_message(
    crash_reason: Option<&str>,
    launch_failure: bool,
    crashed: bool,
) -> Option<String> {
    match crash_reason.filter(|reason| !reason.is_empty()) {
        Some(reason) if reason == PER_PROCESS_LIMIT => {
            Some("Killed due to using too much memory (per-process-limit).".to_owned())
        }
        Some(reason) => Some(format!("Killed by the OS ({reason})")),
        None if launch_failure => Some("Launch failure".to_owned()),
        None if crashed => Some("Killed by the OS".to_owned()),
        None => None,
    }
}

/// Returns true if the main log shows the device could not reach the host over TCP.
pub async fn tcp_connection_failed(main_log: &LogFile) -> bool {
    let mut lines = match main_log.lines().await {
        Ok(lines) => lines,
        Err(error) => {
            warn!(path = %main_log.path(), %error, "failed to open execution log for TCP probe");
            return false;
        }
    };
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.contains(TCP_FAILURE_PHRASE) => return true,
            Ok(Some(_)) => {}
            Ok(None) => return false,
            Err(error) => {
                warn!(path = %main_log.path(), %error, "error reading execution log for TCP probe");
                return false;
            }
        }
    }
}

/// The context a [`ReportEntry`] is described in.
#[derive(Clone, Copy, Debug)]
pub struct ReportContext<'a> {
    /// The app name.
    pub app_name: &'a str,

    /// The build variation.
    pub variation: &'a str,

    /// The device (or simulator) name.
    pub device_name: &'a str,

    /// The failure message, as returned by [`failure_message`].
    pub failure_message: Option<&'a str>,

    /// How long the run took, formatted in minutes.
    pub elapsed_minutes: &'a str,
}

/// A failure report handed to CI. At most one is produced per run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReportEntry {
    /// The failure category.
    pub category: FailureCategory,

    /// A short title.
    pub title: String,

    /// A longer description.
    pub detail: String,

    /// The log the failure was diagnosed from.
    pub source_log_path: Utf8PathBuf,
}

impl ReportEntry {
    /// Describes a failure of the given category.
    pub fn new(
        category: FailureCategory,
        cx: &ReportContext<'_>,
        source_log_path: impl Into<Utf8PathBuf>,
    ) -> Self {
        let ReportContext {
            app_name,
            variation,
            device_name,
            failure_message,
            elapsed_minutes,
        } = *cx;
        let failure_message = failure_message.unwrap_or_default();

        let (title, detail) = match category {
            FailureCategory::Crash => (
                format!("App Crash {app_name} {variation}"),
                failure_message.to_owned(),
            ),
            FailureCategory::Launch => (
                format!("App Launch {app_name} {variation} on {device_name}"),
                format!("{failure_message} on {device_name}"),
            ),
            FailureCategory::TcpConnection => (
                format!("TcpConnection on {device_name}"),
                format!("Device {device_name} could not reach the host over tcp."),
            ),
            FailureCategory::Timeout => (
                format!("App Timeout {app_name} {variation} on bot {device_name}"),
                format!(
                    "{app_name} {variation} Test run timed out after {elapsed_minutes} minute(s) on bot {device_name}."
                ),
            ),
        };

        Self {
            category,
            title,
            detail,
            source_log_path: source_log_path.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::OutcomeConfig;
    use camino_tempfile::tempdir;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn facts() -> FailureFacts<'static> {
        FailureFacts {
            succeeded: false,
            crashed: false,
            timed_out: false,
            launch_failure: false,
            crash_reason: None,
            target: RunTarget::Device,
        }
    }

    #[test]
    fn crash_beats_launch() {
        let facts = FailureFacts {
            crash_reason: Some("signal"),
            launch_failure: true,
            crashed: true,
            timed_out: true,
            ..facts()
        };
        assert_eq!(classify(&facts, true), Some(FailureCategory::Crash));
    }

    #[test_case(
        FailureFacts { launch_failure: true, timed_out: true, ..facts() },
        false,
        Some(FailureCategory::Launch)
        ; "launch beats timeout"
    )]
    #[test_case(
        FailureFacts { crashed: true, timed_out: true, ..facts() },
        true,
        Some(FailureCategory::TcpConnection)
        ; "tcp failure on device"
    )]
    #[test_case(
        FailureFacts { crashed: true, target: RunTarget::Simulator, ..facts() },
        true,
        None
        ; "no tcp probe on simulator"
    )]
    #[test_case(
        FailureFacts { crashed: true, timed_out: true, ..facts() },
        false,
        Some(FailureCategory::Timeout)
        ; "probe negative falls through to timeout"
    )]
    #[test_case(
        FailureFacts { timed_out: true, ..facts() },
        false,
        Some(FailureCategory::Timeout)
        ; "timeout"
    )]
    #[test_case(facts(), true, None ; "unexplained failure")]
    #[test_case(
        FailureFacts { succeeded: true, crash_reason: Some("signal"), ..facts() },
        false,
        None
        ; "success is never reported"
    )]
    #[test_case(
        FailureFacts { crash_reason: Some(""), timed_out: true, ..facts() },
        false,
        Some(FailureCategory::Timeout)
        ; "empty crash reason is no reason"
    )]
    fn decision_table(facts: FailureFacts<'_>, tcp_failed: bool, expected: Option<FailureCategory>) {
        assert_eq!(classify(&facts, tcp_failed), expected);
    }

    #[test_case(true, false, Duration::ZERO ; "succeeded")]
    #[test_case(false, false, Duration::from_secs(5) ; "failed")]
    #[test_case(false, true, Duration::from_secs(30) ; "crashed")]
    #[test_case(true, true, Duration::from_secs(30) ; "crash wins")]
    fn grace_periods(succeeded: bool, crashed: bool, expected: Duration) {
        let config = OutcomeConfig::default_config();
        assert_eq!(
            crash_grace_period(succeeded, crashed, config.crash_capture()),
            expected
        );
    }

    #[test_case(Some("per-process-limit"), true, true, Some("Killed due to using too much memory (per-process-limit).") ; "memory limit")]
    #[test_case(Some("vm-pageshortage"), false, true, Some("Killed by the OS (vm-pageshortage)") ; "other reason")]
    #[test_case(None, true, true, Some("Launch failure") ; "launch failure")]
    #[test_case(Some(""), false, true, Some("Killed by the OS") ; "crashed without reason")]
    #[test_case(None, false, false, None ; "plain failure")]
    fn failure_messages(
        reason: Option<&str>,
        launch_failure: bool,
        crashed: bool,
        expected: Option<&str>,
    ) {
        assert_eq!(
            failure_message(reason, launch_failure, crashed).as_deref(),
            expected
        );
    }

    #[test]
    fn report_texts() {
        let cx = ReportContext {
            app_name: "monotouchtest",
            variation: "Debug",
            device_name: "iPhone 15",
            failure_message: Some("Launch failure"),
            elapsed_minutes: "12.5",
        };
        let launch = ReportEntry::new(FailureCategory::Launch, &cx, "logs/main.log");
        assert_eq!(launch.title, "App Launch monotouchtest Debug on iPhone 15");
        assert_eq!(launch.detail, "Launch failure on iPhone 15");

        let tcp = ReportEntry::new(FailureCategory::TcpConnection, &cx, "logs/main.log");
        assert_eq!(tcp.title, "TcpConnection on iPhone 15");
        assert_eq!(tcp.detail, "Device iPhone 15 could not reach the host over tcp.");

        let timeout = ReportEntry::new(FailureCategory::Timeout, &cx, "logs/main.log");
        assert_eq!(timeout.title, "App Timeout monotouchtest Debug on bot iPhone 15");
        assert_eq!(
            timeout.detail,
            "monotouchtest Debug Test run timed out after 12.5 minute(s) on bot iPhone 15."
        );
        assert_eq!(timeout.source_log_path, "logs/main.log");
    }

    #[tokio::test]
    async fn tcp_probe_scans_main_log() {
        let dir = tempdir().expect("created temp dir");
        let path = dir.path().join("main.log");
        std::fs::write(
            &path,
            "Connecting\nCouldn't establish a TCP connection with any of the hostnames: 10.0.0.1\n",
        )
        .expect("wrote log");
        assert!(tcp_connection_failed(&LogFile::new(&path, "main log")).await);

        std::fs::write(&path, "Connecting\nConnected\n").expect("wrote log");
        assert!(!tcp_connection_failed(&LogFile::new(&path, "main log")).await);

        let missing = LogFile::new(dir.path().join("missing.log"), "main log");
        assert!(!tcp_connection_failed(&missing).await);
    }
}
