// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

#![warn(missing_docs)]

//! Resolving the outcome of a test app run on a device or simulator, and diagnosing crashes.
//!
//! After a test app has been launched, several unreliable signals arrive independently: the
//! launched process exits (or doesn't), the test output listener finishes (or doesn't), logs are
//! written, and the OS may capture crash snapshots. This crate correlates them into one
//! authoritative [`RunOutcome`](reporter::RunOutcome), plus a failure message and a CI-readable
//! [`ReportEntry`](classify::ReportEntry) explaining what went wrong.
//!
//! The entry point is [`TestReporter`](reporter::TestReporter). Launching the app, listening for
//! test output, capturing crash snapshots and parsing structured result documents are done by
//! collaborators described in [`collaborators`].
//!
//! # Logging
//!
//! Progress meant for operators is written to the run's [`ExecutionLog`](logs::ExecutionLog).
//! Everything else is logged through `tracing`. Two targets are of note:
//!
//! * `testrun_outcome::main_log`: every line written to a
//!   [`FileExecutionLog`](logs::FileExecutionLog), at debug level.
//! * `testrun_outcome::summary`: the one-line run summary, at info level.

pub mod cancel;
pub mod classify;
pub mod collaborators;
pub mod config;
pub mod crash_report;
pub mod errors;
pub mod junit;
pub mod logs;
pub mod pid;
pub mod reporter;
pub mod result_file;
#[cfg(test)]
mod test_helpers;
mod time;
pub mod tracker;
