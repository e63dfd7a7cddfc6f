// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The top-level reporter: resolving what happened to a run, and why.
//!
//! A [`TestReporter`] is created per run. The process runner feeds it the launch result and the
//! pending process completion; [`TestReporter::resolve_outcome`] then correlates the coarse
//! outcome, the result file, and any crash snapshots into a single [`ResolvedOutcome`].

use crate::{
    cancel::CancellationContext,
    classify::{
        self, FailureFacts, ReportContext, ReportEntry, crash_grace_period, failure_message,
    },
    collaborators::{
        AppInformation, Collaborators, FailureRecord, LaunchResult, ProcessExecutionResult,
        RunTarget,
    },
    config::OutcomeConfig,
    crash_report::extract_reason_from_log,
    errors::DisplayErrorChain,
    junit::write_failure_report,
    logs::{Attachment, AttachmentKind, ExecutionLog, LogFile},
    pid::pid_from_main_log_file,
    result_file::ResultFileInterpreter,
    time::format_minutes,
    tracker::{OutcomeTracker, TrackerState},
};
use camino::Utf8PathBuf;
use chrono::{DateTime, Local};
use debug_ignore::DebugIgnore;
use std::{
    fmt,
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

static SUMMARY_TARGET: &str = "testrun_outcome::summary";
static UNKNOWN_DEVICE: &str = "unknown device";

/// The terminal classification of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RunOutcome {
    /// All tests ran and passed.
    Succeeded,

    /// The run finished, but it failed.
    Failed,

    /// The app crashed.
    Crashed,

    /// The run timed out.
    TimedOut,
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Crashed => "crashed",
            Self::TimedOut => "timed out",
        };
        f.write_str(s)
    }
}

/// The resolved outcome of a run.
#[derive(Clone, Debug)]
pub struct ResolvedOutcome {
    /// The terminal classification.
    pub outcome: RunOutcome,

    /// Why the run failed, if known.
    pub failure_message: Option<String>,

    /// The failure report handed to CI, if any.
    pub report: Option<ReportEntry>,

    /// A one-line summary of the run.
    pub summary: String,

    /// Files attached to the run's results.
    pub attachments: Vec<Attachment>,

    /// When the run started.
    pub start_time: DateTime<Local>,

    /// How long the run took, up to outcome resolution.
    pub elapsed: Duration,
}

/// Everything the reporter needs to know about the run, apart from its collaborators.
#[derive(Clone, Debug)]
pub struct RunContext {
    /// The app under test.
    pub app: AppInformation,

    /// The device or simulator name, if known.
    pub device_name: Option<String>,

    /// The main execution log.
    pub main_log: DebugIgnore<Arc<dyn ExecutionLog>>,

    /// The launch tool's output.
    pub run_log: LogFile,

    /// The directory holding this run's logs.
    pub logs_directory: Utf8PathBuf,

    /// The build step's log directory, if the app was built as part of this run.
    pub build_logs_directory: Option<Utf8PathBuf>,
}

/// Resolves the outcome of a single run.
#[derive(Debug)]
pub struct TestReporter {
    cx: RunContext,
    collaborators: Collaborators,
    config: OutcomeConfig,
    tracker: OutcomeTracker,
    target: Mutex<RunTarget>,
    resolved: OnceCell<ResolvedOutcome>,
}

impl TestReporter {
    /// Creates a new reporter, starting the run's stopwatch.
    pub fn new(cx: RunContext, collaborators: Collaborators, config: OutcomeConfig) -> Self {
        let tracker = OutcomeTracker::new(
            config.timeout_budget(),
            config.launch_timeout(),
            cx.main_log.0.clone(),
            cx.run_log.clone(),
            CancellationContext::new(),
        );
        Self {
            cx,
            collaborators,
            config,
            tracker,
            target: Mutex::new(RunTarget::Device),
            resolved: OnceCell::new(),
        }
    }

    /// The cancellation context for this run. It is cancelled when the launch times out.
    pub fn cancellation(&self) -> CancellationContext {
        self.tracker.cancellation().clone()
    }

    /// Records the result of the launch step.
    pub fn on_launch_completed(&self, result: LaunchResult) {
        self.tracker.on_launch_outcome(&result);
    }

    /// Waits for a simulator run's process to complete. If it didn't succeed, the app is killed in
    /// case it's still running.
    pub async fn on_simulator_process_completed(
        &self,
        process: impl Future<Output = ProcessExecutionResult>,
    ) {
        self.set_target(RunTarget::Simulator);
        let state = self
            .tracker
            .await_completion(process, &*self.collaborators.result_channel)
            .await;
        if state != (TrackerState::Completed { success: true }) {
            self.tracker
                .kill_stuck_process(&*self.collaborators.process_manager)
                .await;
        }
    }

    /// Waits for a device run's process to complete.
    pub async fn on_device_process_completed(
        &self,
        process: impl Future<Output = ProcessExecutionResult>,
    ) {
        self.set_target(RunTarget::Device);
        self.tracker
            .await_completion(process, &*self.collaborators.result_channel)
            .await;
    }

    fn set_target(&self, target: RunTarget) {
        *self
            .target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = target;
    }

    fn target(&self) -> RunTarget {
        *self
            .target
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Resolves the outcome of the run.
    ///
    /// Only the first call does any work: later calls return the same outcome without touching
    /// logs, crash snapshots, or CI reports again.
    pub async fn resolve_outcome(&self) -> ResolvedOutcome {
        self.resolved
            .get_or_init(|| self.resolve_outcome_impl())
            .await
            .clone()
    }

    async fn resolve_outcome_impl(&self) -> ResolvedOutcome {
        let main_log = &**self.cx.main_log;
        let app = &self.cx.app;
        let target = self.target();
        let timed_out = self.tracker.timed_out();
        let coarse_success = self.tracker.state() == TrackerState::Completed { success: true };
        let scan = self.tracker.launch_scan().await.clone();
        // An empty launch log means the simulator never got as far as launching the app.
        let launch_failure =
            scan.launch_failure || (target == RunTarget::Simulator && !coarse_success && scan.empty);

        let mut attachments = Vec::new();
        let test_log_path = self.collaborators.result_channel.test_log_path();
        let test_log_exists = tokio::fs::try_exists(test_log_path).await.unwrap_or(false);

        let (succeeded, crashed, summary) = if test_log_exists {
            debug!(path = %test_log_path, "interpreting result file");
            let mut interpreter = ResultFileInterpreter::new(
                &*self.collaborators.result_parser,
                main_log,
                self.config.xml_jargon(),
                app,
            );
            interpreter.add_attachment_dir(&self.cx.logs_directory);
            if let Some(dir) = &self.cx.build_logs_directory {
                interpreter.add_attachment_dir(dir);
            }

            let result = interpreter.interpret(test_log_path, timed_out).await;
            if let Some(xml_log) = &result.xml_log {
                attachments.push(Attachment {
                    path: xml_log.clone(),
                    kind: AttachmentKind::XmlLog,
                });
            }
            let verdict = result.verdict(&app.run_mode, timed_out, main_log);
            // A passing result line doesn't clear a timeout: the run is still reported.
            (verdict.succeeded && !timed_out, verdict.crashed, verdict.summary)
        } else if timed_out {
            main_log.write_line("Test run never launched");
            (false, false, format!("{} never launched", app.run_mode))
        } else if launch_failure {
            main_log.write_line("Test run failed to launch");
            (false, false, format!("{} failed to launch", app.run_mode))
        } else {
            main_log.write_line("Test run crashed before it started (no log file produced)");
            (
                false,
                true,
                format!("{} crashed at startup (no log)", app.run_mode),
            )
        };
        info!(target: SUMMARY_TARGET, "{summary}");

        let grace = crash_grace_period(succeeded, crashed, self.config.crash_capture());
        let snapshots = self.end_capture(grace).await;

        let outcome = if timed_out {
            RunOutcome::TimedOut
        } else if crashed {
            RunOutcome::Crashed
        } else if succeeded {
            RunOutcome::Succeeded
        } else {
            RunOutcome::Failed
        };

        let mut failure = None;
        let mut report = None;
        if !succeeded {
            let crash_reason = self
                .find_crash_reason(&snapshots, scan.pid, &mut attachments)
                .await;
            failure = failure_message(crash_reason.as_deref(), launch_failure, crashed);

            let facts = FailureFacts {
                succeeded,
                crashed,
                timed_out,
                launch_failure,
                crash_reason: crash_reason.as_deref(),
                target,
            };
            let tcp_connection_failed = if facts.needs_tcp_probe() {
                classify::tcp_connection_failed(&main_log.reader()).await
            } else {
                false
            };

            if let Some(category) = classify::classify(&facts, tcp_connection_failed) {
                let elapsed_minutes =
                    format_minutes(self.tracker.stopwatch_snapshot().elapsed_minutes());
                let entry = ReportEntry::new(
                    category,
                    &ReportContext {
                        app_name: &app.app_name,
                        variation: &app.variation,
                        device_name: self.cx.device_name.as_deref().unwrap_or(UNKNOWN_DEVICE),
                        failure_message: failure.as_deref(),
                        elapsed_minutes: &elapsed_minutes,
                    },
                    main_log.path(),
                );
                info!(%category, title = %entry.title, "classified run failure");
                report = Some(entry);
            }
        }

        let snapshot = self.tracker.stopwatch_snapshot();
        if let Some(entry) = &report {
            self.emit_report(entry, snapshot.start_time, snapshot.duration, &mut attachments);
        }

        ResolvedOutcome {
            outcome,
            failure_message: failure,
            report,
            summary,
            attachments,
            start_time: snapshot.start_time,
            elapsed: snapshot.duration,
        }
    }

    /// Stops crash capture after `grace`. Capture gets `end-capture-slack` on top of the grace
    /// period to finish; if it takes longer, no snapshots are read.
    async fn end_capture(&self, grace: Duration) -> Vec<LogFile> {
        let bound = grace.saturating_add(self.config.crash_capture().end_capture_slack);
        match tokio::time::timeout(bound, self.collaborators.crash_reporter.end_capture(grace)).await
        {
            Ok(snapshots) => {
                debug!(count = snapshots.len(), ?grace, "crash capture ended");
                snapshots
            }
            Err(_) => {
                warn!(?grace, ?bound, "crash capture did not end in time, ignoring snapshots");
                Vec::new()
            }
        }
    }

    /// Looks through crash snapshots in discovery order for the reason the app was killed.
    ///
    /// The pid is resolved at most once: from the launch log if it had one, otherwise from the main
    /// log.
    async fn find_crash_reason(
        &self,
        snapshots: &[LogFile],
        launch_log_pid: Option<u32>,
        attachments: &mut Vec<Attachment>,
    ) -> Option<String> {
        let main_log = &**self.cx.main_log;
        let mut cached_pid: Option<Option<u32>> = None;

        for snapshot in snapshots {
            attachments.push(Attachment {
                path: snapshot.path().to_owned(),
                kind: AttachmentKind::CrashReport,
            });

            let pid = match cached_pid {
                Some(pid) => pid,
                None => {
                    let resolved = match launch_log_pid {
                        Some(pid) => Some(pid),
                        None => pid_from_main_log_file(&main_log.reader()).await,
                    };
                    debug!(pid = ?resolved, "resolved pid for crash snapshots");
                    *cached_pid.insert(resolved)
                }
            };
            let Some(pid) = pid else {
                continue;
            };

            match extract_reason_from_log(snapshot, pid).await {
                Ok(Some(reason)) => {
                    info!(pid, %reason, snapshot = %snapshot.path(), "found crash reason");
                    return Some(reason);
                }
                Ok(None) => {}
                Err(error) => {
                    let error = DisplayErrorChain::new(&error);
                    warn!(snapshot = %snapshot.path(), %error, "failed to process crash report");
                    main_log.write_line(&format!(
                        "Failed to process crash report '{}': {error}",
                        snapshot.description()
                    ));
                }
            }
        }

        None
    }

    fn emit_report(
        &self,
        entry: &ReportEntry,
        start_time: DateTime<Local>,
        elapsed: Duration,
        attachments: &mut Vec<Attachment>,
    ) {
        if self.config.results_use_xml() {
            let record = FailureRecord {
                logs_directory: &self.cx.logs_directory,
                category: entry.category,
                app_name: &self.cx.app.app_name,
                variation: &self.cx.app.variation,
                title: &entry.title,
                detail: &entry.detail,
                main_log_path: self.cx.main_log.path(),
                jargon: self.config.xml_jargon(),
            };
            if let Err(error) = self.collaborators.result_parser.generate_failure(&record) {
                warn!(
                    category = %entry.category,
                    error = %DisplayErrorChain::new(&error),
                    "failed to generate failure document"
                );
            }
        }

        if let Some(junit_path) = self.config.junit_path() {
            match write_failure_report(junit_path, entry, &self.cx.app, start_time, elapsed) {
                Ok(()) => attachments.push(Attachment {
                    path: junit_path.to_owned(),
                    kind: AttachmentKind::FailureReport,
                }),
                Err(error) => {
                    warn!(
                        path = %junit_path,
                        error = %DisplayErrorChain::new(&error),
                        "failed to write JUnit failure report"
                    );
                }
            }
        }
    }
}
