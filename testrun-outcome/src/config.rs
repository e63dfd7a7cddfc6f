// Copyright (c) The nextest Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration for outcome resolution.
//!
//! The embedded `default-config.toml` is always the lowest layer. An optional user file is layered
//! on top of it.

use crate::{
    collaborators::XmlResultJargon,
    errors::{ConfigParseError, ConfigParseErrorKind},
};
use camino::{Utf8Path, Utf8PathBuf};
use config::{Config, ConfigBuilder, File, FileFormat, builder::DefaultState};
use serde::Deserialize;
use std::time::Duration;

/// Configuration for resolving the outcome of a run.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct OutcomeConfig {
    run: RunConfig,
    crash_capture: CrashCaptureConfig,
    #[serde(default)]
    junit: JunitConfig,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct RunConfig {
    #[serde(with = "humantime_serde")]
    timeout: Duration,
    timeout_multiplier: f64,
    #[serde(with = "humantime_serde")]
    launch_timeout: Duration,
    xml_jargon: XmlResultJargon,
}

/// Grace periods given to the crash capture collaborator before snapshots are read.
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct CrashCaptureConfig {
    /// Grace period when the run succeeded.
    #[serde(with = "humantime_serde")]
    pub succeeded_grace: Duration,

    /// Grace period when the run failed without crashing.
    #[serde(with = "humantime_serde")]
    pub failed_grace: Duration,

    /// Grace period when the run crashed.
    #[serde(with = "humantime_serde")]
    pub crashed_grace: Duration,

    /// Extra time allowed for capture to end, on top of the grace period.
    #[serde(with = "humantime_serde")]
    pub end_capture_slack: Duration,
}

#[derive(Clone, Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct JunitConfig {
    #[serde(default)]
    path: Option<Utf8PathBuf>,
}

impl OutcomeConfig {
    /// The default configuration, embedded at build time.
    pub const DEFAULT_CONFIG: &'static str = include_str!("../default-config.toml");

    /// Loads the configuration, layering `config_file` (if any) over the defaults.
    pub fn from_sources(config_file: Option<&Utf8Path>) -> Result<Self, ConfigParseError> {
        let mut builder = Self::make_default_config();
        let source_name = match config_file {
            Some(config_file) => {
                builder = builder.add_source(File::new(config_file.as_str(), FileFormat::Toml));
                config_file.to_owned()
            }
            None => Utf8PathBuf::from("<default config>"),
        };

        Self::build_and_deserialize_config(&builder)
            .map_err(|kind| ConfigParseError::new(source_name, kind))
    }

    /// Returns the default configuration.
    pub fn default_config() -> Self {
        Self::build_and_deserialize_config(&Self::make_default_config())
            .expect("embedded default config is valid")
    }

    /// The timeout budget for the run: the base timeout times the multiplier.
    pub fn timeout_budget(&self) -> Duration {
        let multiplier = self.run.timeout_multiplier.max(0.0);
        Duration::try_from_secs_f64(self.run.timeout.as_secs_f64() * multiplier)
            .unwrap_or(Duration::MAX)
    }

    /// How long the launch tool may take to start the app.
    pub fn launch_timeout(&self) -> Duration {
        self.run.launch_timeout
    }

    /// The structured result format used by this run.
    pub fn xml_jargon(&self) -> XmlResultJargon {
        self.run.xml_jargon
    }

    /// Returns true if structured result documents are used for this run.
    pub fn results_use_xml(&self) -> bool {
        self.run.xml_jargon != XmlResultJargon::Missing
    }

    /// Crash capture grace periods.
    pub fn crash_capture(&self) -> &CrashCaptureConfig {
        &self.crash_capture
    }

    /// The path to write JUnit failure reports to, if configured.
    pub fn junit_path(&self) -> Option<&Utf8Path> {
        self.junit.path.as_deref()
    }

    /// Sets the base timeout.
    pub fn set_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.run.timeout = timeout;
        self
    }

    /// Sets the launch timeout.
    pub fn set_launch_timeout(&mut self, launch_timeout: Duration) -> &mut Self {
        self.run.launch_timeout = launch_timeout;
        self
    }

    /// Sets the structured result format.
    pub fn set_xml_jargon(&mut self, xml_jargon: XmlResultJargon) -> &mut Self {
        self.run.xml_jargon = xml_jargon;
        self
    }

    /// Sets the JUnit failure report path.
    pub fn set_junit_path(&mut self, path: Option<Utf8PathBuf>) -> &mut Self {
        self.junit.path = path;
        self
    }

    fn make_default_config() -> ConfigBuilder<DefaultState> {
        Config::builder().add_source(File::from_str(Self::DEFAULT_CONFIG, FileFormat::Toml))
    }

    fn build_and_deserialize_config(
        builder: &ConfigBuilder<DefaultState>,
    ) -> Result<Self, ConfigParseErrorKind> {
        let config = builder
            .build_cloned()
            .map_err(|error| ConfigParseErrorKind::BuildError(Box::new(error)))?;

        serde_path_to_error::deserialize(config)
            .map_err(|error| ConfigParseErrorKind::DeserializeError(Box::new(error)))
    }
}

impl Default for OutcomeConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use camino_tempfile::tempdir;
    use indoc::indoc;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test]
    fn default_config_is_valid() {
        let config = OutcomeConfig::default_config();
        assert_eq!(config.timeout_budget(), Duration::from_secs(15 * 60));
        assert_eq!(config.launch_timeout(), Duration::from_secs(120));
        assert_eq!(config.xml_jargon(), XmlResultJargon::NUnitV3);
        assert!(config.results_use_xml());
        assert_eq!(
            *config.crash_capture(),
            CrashCaptureConfig {
                succeeded_grace: Duration::ZERO,
                failed_grace: Duration::from_secs(5),
                crashed_grace: Duration::from_secs(30),
                end_capture_slack: Duration::from_secs(60),
            }
        );
        assert_eq!(config.junit_path(), None);
    }

    #[test_case(
        indoc! {r#"
            [run]
            timeout = "10m"
            timeout-multiplier = 1.5
        "#},
        Duration::from_secs(15 * 60),
        XmlResultJargon::NUnitV3
        ; "multiplier applies to timeout"
    )]
    #[test_case(
        indoc! {r#"
            [run]
            xml-jargon = "missing"
        "#},
        Duration::from_secs(15 * 60),
        XmlResultJargon::Missing
        ; "plain text results"
    )]
    #[test_case(
        indoc! {r#"
            [run]
            timeout = "1m"
            timeout-multiplier = -3.0
            xml-jargon = "xunit"
        "#},
        Duration::ZERO,
        XmlResultJargon::XUnit
        ; "negative multiplier clamps to zero"
    )]
    fn user_config_layers_over_defaults(
        contents: &str,
        expected_budget: Duration,
        expected_jargon: XmlResultJargon,
    ) {
        let dir = tempdir().expect("created temp dir");
        let config_file = dir.path().join("outcome.toml");
        std::fs::write(&config_file, contents).expect("wrote config");

        let config = OutcomeConfig::from_sources(Some(&config_file)).expect("config is valid");
        assert_eq!(config.timeout_budget(), expected_budget);
        assert_eq!(config.xml_jargon(), expected_jargon);
        // Untouched sections keep their defaults.
        assert_eq!(config.crash_capture().crashed_grace, Duration::from_secs(30));
    }

    #[test]
    fn invalid_config_reports_file() {
        let dir = tempdir().expect("created temp dir");
        let config_file = dir.path().join("outcome.toml");
        std::fs::write(
            &config_file,
            indoc! {r#"
                [run]
                xml-jargon = "nunit-v9"
            "#},
        )
        .expect("wrote config");

        let error = OutcomeConfig::from_sources(Some(&config_file)).expect_err("config is invalid");
        assert_eq!(error.config_file(), &config_file);
        assert!(
            matches!(error.kind(), ConfigParseErrorKind::DeserializeError(_)),
            "unexpected error kind: {:?}",
            error.kind()
        );
    }
}
