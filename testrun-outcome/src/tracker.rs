// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tracking the coarse outcome of a run: did it complete, and did it finish in time?
//!
//! The tracker is constructed fresh for each run. It starts in [`TrackerState::Running`] and moves
//! to exactly one terminal state, after which it never changes. A launch timeout reported through
//! [`OutcomeTracker::on_launch_outcome`] cancels the run and wins over any later completion.

use crate::{
    cancel::CancellationContext,
    collaborators::{LaunchResult, ProcessExecutionResult, ProcessManager, ResultChannel},
    errors::DisplayErrorChain,
    logs::{ExecutionLog, LogFile},
    pid::{LaunchLogScan, scan_launch_log_file},
    time::{StopwatchSnapshot, StopwatchStart, format_minutes, stopwatch},
};
use debug_ignore::DebugIgnore;
use std::{
    future::Future,
    sync::{Arc, Mutex},
    time::Duration,
};
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// The coarse state of a run.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerState {
    /// The run has not finished yet.
    Running,

    /// The run, or its launch, timed out.
    TimedOut,

    /// The launched process finished within the timeout budget.
    Completed {
        /// Whether the process exited cleanly.
        success: bool,
    },
}

impl TrackerState {
    /// Returns true if this is a terminal state.
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Running)
    }
}

#[derive(Debug)]
struct TrackerInner {
    state: TrackerState,
    launch_timed_out: bool,
}

/// Tracks the coarse outcome of a single run.
#[derive(Debug)]
pub struct OutcomeTracker {
    budget: Duration,
    launch_timeout: Duration,
    stopwatch: StopwatchStart,
    cancel: CancellationContext,
    main_log: DebugIgnore<Arc<dyn ExecutionLog>>,
    run_log: LogFile,
    launch_scan: OnceCell<LaunchLogScan>,
    inner: Mutex<TrackerInner>,
}

impl OutcomeTracker {
    /// Creates a tracker and starts its stopwatch.
    ///
    /// `budget` bounds the whole run. `run_log` is the launch tool's output.
    pub fn new(
        budget: Duration,
        launch_timeout: Duration,
        main_log: Arc<dyn ExecutionLog>,
        run_log: LogFile,
        cancel: CancellationContext,
    ) -> Self {
        Self {
            budget,
            launch_timeout,
            stopwatch: stopwatch(),
            cancel,
            main_log: DebugIgnore(main_log),
            run_log,
            launch_scan: OnceCell::new(),
            inner: Mutex::new(TrackerInner {
                state: TrackerState::Running,
                launch_timed_out: false,
            }),
        }
    }

    /// The current state.
    pub fn state(&self) -> TrackerState {
        self.lock().state
    }

    /// Returns true if the run timed out.
    pub fn timed_out(&self) -> bool {
        self.state() == TrackerState::TimedOut
    }

    /// The cancellation context for this run.
    pub fn cancellation(&self) -> &CancellationContext {
        &self.cancel
    }

    pub(crate) fn stopwatch_snapshot(&self) -> StopwatchSnapshot {
        self.stopwatch.snapshot()
    }

    /// Records the result of the launch step.
    ///
    /// Only a launch timeout changes the state: it cancels the run and marks it as timed out.
    pub fn on_launch_outcome(&self, result: &LaunchResult) {
        match result {
            LaunchResult::Started => self.main_log.write_line("Test run started"),
            LaunchResult::Failed(error) => {
                self.main_log
                    .write_line(&format!("Test launch failed: {error}"));
            }
            LaunchResult::Cancelled => self.main_log.write_line("Test launch was cancelled."),
            LaunchResult::TimedOut => {
                self.cancel.cancel();
                self.main_log.write_line(&format!(
                    "Test launch timed out after {} minute(s).",
                    format_minutes(self.launch_timeout.as_secs_f64() / 60.0)
                ));
                let mut inner = self.lock();
                inner.launch_timed_out = true;
                if !inner.state.is_terminal() {
                    inner.state = TrackerState::TimedOut;
                }
            }
        }
    }

    /// The single classification pass over the launch log, performed on first use.
    pub async fn launch_scan(&self) -> &LaunchLogScan {
        self.launch_scan
            .get_or_init(|| scan_launch_log_file(&self.run_log, &**self.main_log))
            .await
    }

    /// Waits for the launched process to complete, and records the coarse outcome.
    ///
    /// If the launch tool can't tell when the app exits, the listener's completion stands in for
    /// it, bounded by whatever is left of the timeout budget. Cancellation ends the wait as a
    /// timeout. Once a terminal state is recorded, later calls return it without awaiting
    /// `process`.
    pub async fn await_completion<F>(&self, process: F, listener: &dyn ResultChannel) -> TrackerState
    where
        F: Future<Output = ProcessExecutionResult>,
    {
        let state = self.state();
        if state.is_terminal() {
            debug!(?state, "outcome already recorded, not waiting for process");
            return state;
        }

        let mut result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => ProcessExecutionResult { exit_code: -1, timed_out: true },
            result = process => result,
        };
        debug!(exit_code = result.exit_code, timed_out = result.timed_out, "process completed");

        let waited_for_exit = self.launch_scan().await.waited_for_exit;
        if !waited_for_exit && !result.timed_out {
            self.main_log
                .write_line("Waiting for listener to complete, since the launch tool won't tell.");
            let remaining = self.stopwatch.remaining(self.budget);
            let completed = tokio::select! {
                biased;
                () = self.cancel.cancelled() => false,
                completed = tokio::time::timeout(remaining, listener.completion()) => completed.is_ok(),
            };
            if !completed {
                result.timed_out = true;
            }
        }

        let new_state = if result.timed_out {
            TrackerState::TimedOut
        } else {
            TrackerState::Completed {
                success: result.succeeded(),
            }
        };
        self.record(new_state)
    }

    fn record(&self, new_state: TrackerState) -> TrackerState {
        let mut inner = self.lock();
        if inner.state.is_terminal() {
            // A launch timeout landed while we were waiting.
            return inner.state;
        }
        inner.state = new_state;
        drop(inner);

        match new_state {
            TrackerState::TimedOut => self.main_log.write_line(&format!(
                "Test run timed out after {} minute(s).",
                format_minutes(self.budget.as_secs_f64() / 60.0)
            )),
            TrackerState::Completed { success: true } => {
                self.main_log.write_line("Test run completed");
            }
            TrackerState::Completed { success: false } => {
                self.main_log.write_line("Test run failed");
            }
            TrackerState::Running => {}
        }
        info!(state = ?new_state, "recorded coarse outcome");
        new_state
    }

    /// Kills the app if it may still be running, using the pid from the launch log.
    pub async fn kill_stuck_process(&self, process_manager: &dyn ProcessManager) {
        let Some(pid) = self.launch_scan().await.pid else {
            self.main_log
                .write_line("Could not find pid in launch tool output.");
            return;
        };

        let launch_timed_out = self.lock().launch_timed_out || self.cancel.is_cancelled();
        let (kind, timeout) = if launch_timed_out {
            ("Launch", self.launch_timeout)
        } else {
            ("Completion", self.budget)
        };
        self.main_log.write_line(&format!(
            "{kind} timed out after {} seconds",
            timeout.as_secs_f64()
        ));

        if let Err(error) = process_manager.kill_tree(pid, &**self.main_log).await {
            warn!(pid, error = %DisplayErrorChain::new(&error), "failed to kill process tree");
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TrackerInner> {
        // The lock is never held across an await or a panic point.
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
