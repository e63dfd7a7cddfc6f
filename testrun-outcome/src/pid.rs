// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extracting process ids and launch markers from launch tool output.
//!
//! The launch (run) log is classified a line at a time in a single pass: each line may carry the
//! launched app's pid, a launch failure code, or a notice that the launch tool cannot wait for the
//! app to exit. The execution (main) log has its own pid marker and serves as a fallback when the
//! run log doesn't yield a pid.
//!
//! Not finding a pid is a normal outcome and never an error.

use crate::logs::{ExecutionLog, LogFile};
use tracing::{debug, warn};

static APP_LAUNCHED_PREFIX: &str = "Application launched. PID = ";
static HOSTING_LAUNCHED: &str = "Launched ";
static HOSTING_WITH_PID: &str = " with pid ";
static LAUNCH_FAILURE_CODES: [&str; 2] = ["error MT1007", "error MT1008"];
static CANNOT_WAIT_FOR_EXIT: &str = "MT1111: ";
static MAIN_LOG_PID_MARKER: &str = "was launched with pid '";

/// A recognized line in the launch log.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaunchLogLine<'a> {
    /// The app was launched with this pid.
    Launched {
        /// The pid of the app.
        pid: u32,
    },

    /// A pid marker whose numeric suffix could not be parsed.
    UnparseablePid(&'a str),

    /// The launch tool reported a known launch failure code.
    LaunchFailure,

    /// The launch tool cannot detect when the app exits.
    CannotWaitForExit,
}

/// Classifies a single line of launch tool output.
pub fn classify_launch_line(line: &str) -> Option<LaunchLogLine<'_>> {
    if let Some(pid_str) = line.strip_prefix(APP_LAUNCHED_PREFIX) {
        return Some(pid_or_unparseable(pid_str));
    }
    if line.contains(HOSTING_LAUNCHED) && line.contains(HOSTING_WITH_PID) {
        // The pid is the last word of the sentence.
        let pid_str = line.rsplit(' ').next().unwrap_or(line);
        return Some(pid_or_unparseable(pid_str));
    }
    if LAUNCH_FAILURE_CODES.iter().any(|code| line.contains(code)) {
        return Some(LaunchLogLine::LaunchFailure);
    }
    if line.contains(CANNOT_WAIT_FOR_EXIT) {
        return Some(LaunchLogLine::CannotWaitForExit);
    }
    None
}

fn pid_or_unparseable(pid_str: &str) -> LaunchLogLine<'_> {
    match parse_pid(pid_str) {
        Some(pid) => LaunchLogLine::Launched { pid },
        None => LaunchLogLine::UnparseablePid(pid_str),
    }
}

fn parse_pid(pid_str: &str) -> Option<u32> {
    pid_str.trim().parse().ok().filter(|&pid| pid > 0)
}

/// The result of classifying every line of a launch log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LaunchLogScan {
    /// The first pid found, if any.
    pub pid: Option<u32>,

    /// True if a launch failure code was seen.
    pub launch_failure: bool,

    /// False if the launch tool said it cannot wait for the app to exit.
    pub waited_for_exit: bool,

    /// True if the log had no lines at all.
    pub empty: bool,
}

impl Default for LaunchLogScan {
    fn default() -> Self {
        Self {
            pid: None,
            launch_failure: false,
            waited_for_exit: true,
            empty: true,
        }
    }
}

impl LaunchLogScan {
    /// Folds a line into the scan. Returns the offending text if the line had an unparseable pid.
    pub fn observe<'a>(&mut self, line: &'a str) -> Option<&'a str> {
        self.empty = false;
        match classify_launch_line(line)? {
            LaunchLogLine::Launched { pid } => {
                // The first pid wins.
                self.pid.get_or_insert(pid);
            }
            LaunchLogLine::UnparseablePid(pid_str) => return Some(pid_str),
            LaunchLogLine::LaunchFailure => self.launch_failure = true,
            LaunchLogLine::CannotWaitForExit => self.waited_for_exit = false,
        }
        None
    }
}

/// Classifies every line of `text`.
pub fn scan_launch_log(text: &str) -> LaunchLogScan {
    let mut scan = LaunchLogScan::default();
    for line in text.lines() {
        if let Some(pid_str) = scan.observe(line) {
            debug!(pid_str, "could not parse pid");
        }
    }
    scan
}

/// Returns the pid of the launched app from launch tool output, if present.
pub fn resolve_pid(text: &str) -> Option<u32> {
    scan_launch_log(text).pid
}

/// Classifies every line of the launch log on disk.
///
/// Unparseable pids are written to `main_log` and skipped. A log that can't be opened is treated
/// as empty.
pub async fn scan_launch_log_file(run_log: &LogFile, main_log: &dyn ExecutionLog) -> LaunchLogScan {
    let mut scan = LaunchLogScan::default();
    let mut lines = match run_log.lines().await {
        Ok(lines) => lines,
        Err(error) => {
            warn!(path = %run_log.path(), %error, "failed to open launch log");
            return scan;
        }
    };

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(pid_str) = scan.observe(&line) {
                    main_log.write_line(&format!("Could not parse pid: {pid_str}"));
                }
            }
            Ok(None) => break,
            Err(error) => {
                warn!(path = %run_log.path(), %error, "error reading launch log");
                break;
            }
        }
    }

    scan
}

/// Extracts the pid from a single execution log line of the form `...was launched with pid '<pid>'`.
pub fn pid_from_main_log_line(line: &str) -> Option<u32> {
    let idx = line.find(MAIN_LOG_PID_MARKER).filter(|&idx| idx > 0)?;
    let rest = &line[idx + MAIN_LOG_PID_MARKER.len()..];
    let end = rest.find('\'').filter(|&end| end > 0)?;
    parse_pid(&rest[..end])
}

/// Returns the first pid found in execution log text.
pub fn pid_from_main_log(text: &str) -> Option<u32> {
    text.lines().find_map(pid_from_main_log_line)
}

/// Returns the first pid found in the execution log on disk.
pub async fn pid_from_main_log_file(main_log: &LogFile) -> Option<u32> {
    let mut lines = match main_log.lines().await {
        Ok(lines) => lines,
        Err(error) => {
            warn!(path = %main_log.path(), %error, "failed to open execution log");
            return None;
        }
    };

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if let Some(pid) = pid_from_main_log_line(&line) {
                    return Some(pid);
                }
            }
            Ok(None) => return None,
            Err(error) => {
                warn!(path = %main_log.path(), %error, "error reading execution log");
                return None;
            }
        }
    }
}
