// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Interpreting the test output written by the result channel.
//!
//! The listener writes raw output to a file. If a structured result document can be extracted from
//! it (and the run uses structured results), the external [`ResultParser`] summarizes it, and the
//! raw file is replaced by a human-readable rendering. Otherwise, the raw file is scanned as plain
//! text for the terminal `Tests run:` line and any `[FAIL]` lines.

use crate::{
    collaborators::{AppInformation, HumanReadableResults, ResultParser, XmlResultJargon},
    errors::{DisplayErrorChain, StructuredResultError},
    logs::ExecutionLog,
};
use camino::{Utf8Path, Utf8PathBuf};
use camino_tempfile::NamedUtf8TempFile;
use std::io;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

static TESTS_RUN_MARKER: &str = "Tests run:";
static TESTS_RUN_PREFIX: &str = "Tests run: ";
static FAIL_MARKER: &str = "[FAIL]";

/// The interpretation of a result file.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct InterpretedResult {
    /// The terminal summary line, if one was found.
    pub summary_line: Option<String>,

    /// True if any test failed.
    pub failed: bool,

    /// True if the output is evidence of a crash.
    pub crashed: bool,

    /// The final location of the structured result document, if one was processed.
    pub xml_log: Option<Utf8PathBuf>,
}

/// Whether the tests succeeded, derived from an [`InterpretedResult`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TestsVerdict {
    /// True if the tests ran to completion without failures.
    pub succeeded: bool,

    /// True if the run crashed.
    pub crashed: bool,

    /// A one-line summary for CI.
    pub summary: String,
}

impl InterpretedResult {
    /// Decides whether the tests succeeded, writing the decision to `main_log`.
    ///
    /// Without a summary line the run either timed out or crashed.
    pub fn verdict(&self, run_mode: &str, timed_out: bool, main_log: &dyn ExecutionLog) -> TestsVerdict {
        match &self.summary_line {
            Some(line) => {
                let tests_run = line.replace(TESTS_RUN_PREFIX, "");
                if self.failed {
                    main_log.write_line("Test run failed");
                    TestsVerdict {
                        succeeded: false,
                        crashed: self.crashed,
                        summary: format!("{run_mode} failed: {tests_run}"),
                    }
                } else {
                    main_log.write_line("Test run succeeded");
                    TestsVerdict {
                        succeeded: true,
                        crashed: self.crashed,
                        summary: format!("{run_mode} succeeded: {tests_run}"),
                    }
                }
            }
            None if timed_out => TestsVerdict {
                succeeded: false,
                crashed: false,
                summary: format!("{run_mode} timed out"),
            },
            None => {
                main_log.write_line("Test run crashed");
                TestsVerdict {
                    succeeded: false,
                    crashed: true,
                    summary: format!("{run_mode} crashed"),
                }
            }
        }
    }
}

/// Interprets result files for one run.
pub struct ResultFileInterpreter<'a> {
    parser: &'a dyn ResultParser,
    main_log: &'a dyn ExecutionLog,
    jargon: XmlResultJargon,
    app: &'a AppInformation,
    attachment_dirs: Vec<&'a Utf8Path>,
}

impl<'a> ResultFileInterpreter<'a> {
    /// Creates a new interpreter. Structured results are used unless `jargon` is
    /// [`XmlResultJargon::Missing`].
    pub fn new(
        parser: &'a dyn ResultParser,
        main_log: &'a dyn ExecutionLog,
        jargon: XmlResultJargon,
        app: &'a AppInformation,
    ) -> Self {
        Self {
            parser,
            main_log,
            jargon,
            app,
            attachment_dirs: Vec::new(),
        }
    }

    /// Adds a directory whose files are attached to structured documents that support it.
    pub fn add_attachment_dir(&mut self, dir: &'a Utf8Path) -> &mut Self {
        self.attachment_dirs.push(dir);
        self
    }

    fn results_use_xml(&self) -> bool {
        self.jargon != XmlResultJargon::Missing
    }

    /// Interprets the result file at `result_path`.
    ///
    /// `timed_out` decides how an unparseable structured document is classified.
    pub async fn interpret(&self, result_path: &Utf8Path, timed_out: bool) -> InterpretedResult {
        if !tokio::fs::try_exists(result_path).await.unwrap_or(false) {
            // No output at all: the app crashed.
            return InterpretedResult {
                crashed: true,
                ..Default::default()
            };
        }

        let xml_path = structured_document_path(result_path);
        let cleaned = match self.parser.clean_xml(result_path, &xml_path) {
            Ok(()) => true,
            Err(error) => {
                warn!(path = %result_path, error = %DisplayErrorChain::new(&error), "failed to extract structured results");
                false
            }
        };

        if cleaned && self.results_use_xml() {
            if let Some(jargon) = self.parser.validate_xml(&xml_path) {
                return self
                    .interpret_structured(result_path, xml_path, jargon, timed_out)
                    .await;
            }
        }

        // Delete the copy we don't need.
        if let Err(error) = tokio::fs::remove_file(&xml_path).await {
            if error.kind() != io::ErrorKind::NotFound {
                warn!(path = %xml_path, %error, "failed to remove unused structured result file");
            }
        }

        match scan_result_lines(result_path).await {
            Ok((summary_line, failed)) => InterpretedResult {
                summary_line,
                failed,
                crashed: false,
                xml_log: None,
            },
            Err(error) => {
                warn!(path = %result_path, %error, "failed to read result file");
                InterpretedResult::default()
            }
        }
    }

    async fn interpret_structured(
        &self,
        result_path: &Utf8Path,
        xml_path: Utf8PathBuf,
        jargon: XmlResultJargon,
        timed_out: bool,
    ) -> InterpretedResult {
        let mut document = xml_path;
        match self.process_structured(result_path, &mut document, jargon).await {
            Ok(results) => InterpretedResult {
                summary_line: results.result_line,
                failed: results.failed,
                crashed: false,
                xml_log: Some(document),
            },
            Err(error) => {
                self.main_log.write_line(&format!(
                    "Could not parse xml result file: {}",
                    DisplayErrorChain::new(&error)
                ));
                self.dump_document(&document).await;
                InterpretedResult {
                    crashed: !timed_out,
                    ..Default::default()
                }
            }
        }
    }

    /// Moves the structured document to its final location (updating `document` as it goes), and
    /// replaces the raw result file with a human-readable rendering.
    async fn process_structured(
        &self,
        result_path: &Utf8Path,
        document: &mut Utf8PathBuf,
        jargon: XmlResultJargon,
    ) -> Result<HumanReadableResults, StructuredResultError> {
        let mut new_path = self.parser.xml_file_path(document, jargon);
        if jargon.supports_attachments() {
            let attachments = self.collect_attachments().await;
            // CI picks up documents by prefix, so only the final version gets the CI name.
            new_path = self.parser.ci_file_path(&new_path);
            self.parser.update_missing_data(
                document,
                &new_path,
                &self.app.test_run_name(),
                &attachments,
            )?;
        } else {
            tokio::fs::rename(&*document, &new_path)
                .await
                .map_err(|error| StructuredResultError::Fs {
                    file: document.clone(),
                    error,
                })?;
        }
        *document = new_path;

        let human_readable = NamedUtf8TempFile::new().map_err(|error| StructuredResultError::Fs {
            file: Utf8PathBuf::from("<temporary file>"),
            error,
        })?;
        let results =
            self.parser
                .generate_human_readable_results(document, human_readable.path(), jargon)?;
        tokio::fs::copy(human_readable.path(), result_path)
            .await
            .map_err(|error| StructuredResultError::Fs {
                file: result_path.to_owned(),
                error,
            })?;

        debug!(document = %document, ?results, "processed structured results");
        Ok(results)
    }

    async fn collect_attachments(&self) -> Vec<Utf8PathBuf> {
        let mut attachments = Vec::new();
        for dir in &self.attachment_dirs {
            match list_files(dir).await {
                Ok(mut files) => {
                    files.sort();
                    attachments.extend(files);
                }
                Err(error) => {
                    warn!(dir = %dir, %error, "failed to list attachment directory");
                }
            }
        }
        attachments
    }

    async fn dump_document(&self, path: &Utf8Path) {
        self.main_log.write_line("File data is:");
        self.main_log.write_line(&"#".repeat(10));
        match tokio::fs::File::open(path).await {
            Ok(file) => {
                let mut lines = BufReader::new(file).lines();
                loop {
                    match lines.next_line().await {
                        Ok(Some(line)) => self.main_log.write_line(&line),
                        Ok(None) => break,
                        Err(error) => {
                            self.main_log
                                .write_line(&format!("(error reading {path}: {error})"));
                            break;
                        }
                    }
                }
            }
            Err(error) => {
                self.main_log
                    .write_line(&format!("(could not open {path}: {error})"));
            }
        }
        self.main_log.write_line(&"#".repeat(10));
        self.main_log.write_line("End of xml results.");
    }
}

/// Where the structured document extracted from `result_path` is written. Never `result_path`
/// itself, since an unused document is deleted.
fn structured_document_path(result_path: &Utf8Path) -> Utf8PathBuf {
    let xml_path = result_path.with_extension("xml");
    if xml_path != result_path {
        return xml_path;
    }
    let stem = result_path.file_stem().unwrap_or("test-results");
    result_path.with_file_name(format!("{stem}.cleaned.xml"))
}

async fn list_files(dir: &Utf8Path) -> io::Result<Vec<Utf8PathBuf>> {
    let mut files = Vec::new();
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_file() {
            continue;
        }
        match Utf8PathBuf::from_path_buf(entry.path()) {
            Ok(path) => files.push(path),
            Err(path) => debug!(path = %path.display(), "skipping non-UTF-8 attachment"),
        }
    }
    Ok(files)
}

/// Scans a plain-text result file.
///
/// Returns the first line containing `Tests run:` (scanning stops there), and whether any line
/// before it contained `[FAIL]`.
pub async fn scan_result_lines(path: &Utf8Path) -> io::Result<(Option<String>, bool)> {
    let file = tokio::fs::File::open(path).await?;
    let mut lines = BufReader::new(file).lines();
    let mut failed = false;
    while let Some(line) = lines.next_line().await? {
        if line.contains(TESTS_RUN_MARKER) {
            debug!(%line, "found result line");
            return Ok((Some(line), failed));
        } else if line.contains(FAIL_MARKER) {
            debug!(%line, "found failure");
            failed = true;
        }
    }
    Ok((None, failed))
}
