// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Stopwatch for tracking how long a run has taken.
//!
//! The stopwatch starts when the launch attempt begins. It is consulted twice: to work out how
//! much of the timeout budget is left when falling back to the listener, and to report the total
//! elapsed time in timeout messages. We record both a `DateTime` (realtime clock, for display) and
//! a tokio `Instant` (monotonic clock, and pausable in tests).

use chrono::{DateTime, Local};
use std::time::Duration;
use tokio::time::Instant;

pub(crate) fn stopwatch() -> StopwatchStart {
    StopwatchStart::new()
}

/// The start state of a stopwatch.
#[derive(Clone, Debug)]
pub(crate) struct StopwatchStart {
    start_time: DateTime<Local>,
    instant: Instant,
}

impl StopwatchStart {
    fn new() -> Self {
        Self {
            // These two calls happen imperceptibly close to each other, which is good enough for
            // our purposes.
            start_time: Local::now(),
            instant: Instant::now(),
        }
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.instant.elapsed()
    }

    /// Returns how much of `budget` is left, saturating at zero.
    pub(crate) fn remaining(&self, budget: Duration) -> Duration {
        budget.saturating_sub(self.elapsed())
    }

    pub(crate) fn snapshot(&self) -> StopwatchSnapshot {
        StopwatchSnapshot {
            start_time: self.start_time,
            duration: self.elapsed(),
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct StopwatchSnapshot {
    pub(crate) start_time: DateTime<Local>,
    pub(crate) duration: Duration,
}

impl StopwatchSnapshot {
    /// Elapsed time in minutes, as shown in timeout messages.
    pub(crate) fn elapsed_minutes(&self) -> f64 {
        self.duration.as_secs_f64() / 60.0
    }
}

/// Formats a number of minutes for execution log and report messages, to at most two decimal
/// places. Whole numbers are printed without a fractional part.
pub(crate) fn format_minutes(minutes: f64) -> String {
    let rounded = (minutes * 100.0).round() / 100.0;
    format!("{rounded}")
}
