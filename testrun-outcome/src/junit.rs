// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Writing a run's failure report as JUnit XML.
//!
//! The report has one test suite named after the app, holding a single test case for the run.

use crate::{
    classify::{FailureCategory, ReportEntry},
    collaborators::AppInformation,
    errors::WriteFailureReportError,
};
use camino::Utf8Path;
use chrono::{DateTime, Local};
use quick_junit::{NonSuccessKind, Report, TestCase, TestCaseStatus, TestSuite};
use std::{fs::File, time::Duration};

static REPORT_NAME: &str = "testrun-outcome";

/// Writes `entry` to `junit_path` as a JUnit report, creating parent directories as needed.
pub fn write_failure_report(
    junit_path: &Utf8Path,
    entry: &ReportEntry,
    app: &AppInformation,
    start_time: DateTime<Local>,
    elapsed: Duration,
) -> Result<(), WriteFailureReportError> {
    let kind = match entry.category {
        FailureCategory::Crash | FailureCategory::Launch | FailureCategory::TcpConnection => {
            NonSuccessKind::Error
        }
        FailureCategory::Timeout => NonSuccessKind::Failure,
    };
    let mut status = TestCaseStatus::non_success(kind);
    status
        .set_type(entry.category.as_str())
        .set_message(entry.title.as_str())
        .set_description(entry.detail.as_str());

    let mut testcase = TestCase::new(app.test_run_name(), status);
    testcase
        .set_classname(app.app_name.as_str())
        .set_timestamp(start_time.fixed_offset())
        .set_time(elapsed)
        .set_system_out(format!("source log: {}", entry.source_log_path));

    let mut testsuite = TestSuite::new(app.app_name.as_str());
    testsuite
        .set_timestamp(start_time.fixed_offset())
        .set_time(elapsed)
        .add_test_case(testcase);

    let mut report = Report::new(REPORT_NAME);
    report
        .set_timestamp(start_time.fixed_offset())
        .set_time(elapsed)
        .add_test_suite(testsuite);

    if let Some(junit_dir) = junit_path.parent().filter(|dir| !dir.as_str().is_empty()) {
        std::fs::create_dir_all(junit_dir).map_err(|error| WriteFailureReportError::Fs {
            file: junit_dir.to_path_buf(),
            error,
        })?;
    }

    let f = File::create(junit_path).map_err(|error| WriteFailureReportError::Fs {
        file: junit_path.to_path_buf(),
        error,
    })?;
    report
        .serialize(f)
        .map_err(|error| WriteFailureReportError::Junit {
            file: junit_path.to_path_buf(),
            error,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::test_app;
    use camino_tempfile::tempdir;

    #[test]
    fn writes_one_case() {
        let dir = tempdir().expect("created temp dir");
        let junit_path = dir.path().join("reports/junit.xml");
        let entry = ReportEntry {
            category: FailureCategory::Timeout,
            title: "App Timeout monotouchtest Debug on bot iPhone 15".to_owned(),
            detail: "monotouchtest Debug Test run timed out after 15 minute(s) on bot iPhone 15."
                .to_owned(),
            source_log_path: dir.path().join("main.log"),
        };

        write_failure_report(
            &junit_path,
            &entry,
            &test_app(),
            Local::now(),
            Duration::from_secs(900),
        )
        .expect("wrote report");

        let xml = std::fs::read_to_string(&junit_path).expect("read report");
        assert!(xml.contains(r#"<testsuite name="monotouchtest""#), "{xml}");
        assert!(xml.contains(r#"<testcase name="monotouchtest Debug""#), "{xml}");
        assert!(xml.contains(r#"type="timeout""#), "{xml}");
        assert!(xml.contains("timed out after 15 minute(s)"), "{xml}");
    }
}
