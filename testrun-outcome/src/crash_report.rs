// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Extracting the termination reason for a process from an OS crash snapshot.
//!
//! Snapshots are JSON. They come either as a single document, or in the native two-part layout: a
//! one-line JSON header followed by the JSON body. Process records live in a top-level `processes`
//! array, each carrying a `pid` (a number, or occasionally a numeric string) and an optional
//! `reason`.
//!
//! Snapshots may be empty, partial, or describe unrelated processes. Not finding a reason is
//! normal: the caller moves on to the next snapshot.

use crate::{errors::CrashReportError, logs::LogFile};
use serde::{Deserialize, Deserializer};

/// A single process record from a crash snapshot.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ProcessRecord {
    /// The pid of the process, if present and numeric.
    #[serde(default, deserialize_with = "deserialize_pid")]
    pub pid: Option<u32>,

    /// The process name.
    #[serde(default)]
    pub name: Option<String>,

    /// Why the process was terminated.
    #[serde(default)]
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CrashDocument {
    #[serde(default)]
    processes: Vec<ProcessRecord>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum PidRepr {
    Number(u64),
    String(String),
    Other(serde::de::IgnoredAny),
}

fn deserialize_pid<'de, D>(deserializer: D) -> Result<Option<u32>, D::Error>
where
    D: Deserializer<'de>,
{
    let pid = match PidRepr::deserialize(deserializer)? {
        PidRepr::Number(pid) => u32::try_from(pid).ok(),
        PidRepr::String(pid) => pid.trim().parse().ok(),
        PidRepr::Other(_) => None,
    };
    Ok(pid)
}

/// Parses every process record in a crash snapshot, in document order.
///
/// An empty (or whitespace-only) snapshot has no records.
pub fn parse_process_records(text: &str) -> Result<Vec<ProcessRecord>, CrashReportError> {
    let mut records = Vec::new();
    for document in serde_json::Deserializer::from_str(text).into_iter::<CrashDocument>() {
        let document = document.map_err(CrashReportError::Parse)?;
        records.extend(document.processes);
    }
    Ok(records)
}

/// Returns the termination reason recorded for `pid`, if any.
///
/// Only the first record for `pid` is considered. A missing or empty reason yields `None`.
pub fn extract_reason(text: &str, pid: u32) -> Result<Option<String>, CrashReportError> {
    let records = parse_process_records(text)?;
    let reason = records
        .into_iter()
        .find(|record| record.pid == Some(pid))
        .and_then(|record| record.reason)
        .filter(|reason| !reason.is_empty());
    Ok(reason)
}

/// Reads the snapshot at `crash_log` and returns the termination reason recorded for `pid`.
pub async fn extract_reason_from_log(
    crash_log: &LogFile,
    pid: u32,
) -> Result<Option<String>, CrashReportError> {
    let text = crash_log
        .read_to_string()
        .await
        .map_err(|error| CrashReportError::Read {
            description: crash_log.description().to_owned(),
            path: crash_log.path().to_owned(),
            error,
        })?;
    extract_reason(&text, pid)
}
