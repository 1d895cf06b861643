//! Configuration management with environment variable support.
//!
//! This module provides centralized configuration for harness-results, supporting:
//! - Environment variables for all configurable values
//! - Sensible defaults for everything except the output directory
//! - Builder pattern for programmatic configuration
//!
//! Nothing here is consulted implicitly. Callers build a [`Config`] (usually via
//! [`Config::from_env`]) and hand its parts to [`ResultPublisher::new`] and
//! [`PhaseLegacyStore::new`].
//!
//! # Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HARNESS_RESULTS_OUTPUT_DIR` | Directory holding the result document | unset |
//! | `HARNESS_RESULTS_FILE` | Result document file name | `results.json` |
//! | `HARNESS_RESULTS_LOCK_TIMEOUT` | Lock timeout in seconds (`none` waits forever) | `30` |
//! | `HARNESS_RESULTS_STATUSES` | Comma-separated status vocabulary | `queued,started,running,done,skipped` |
//! | `HARNESS_RESULTS_RESULTS` | Comma-separated result vocabulary | `passed,failed,error,skipped` |
//! | `HARNESS_RESULTS_LEGACY_DIR` | Directory holding legacy records | `legacy` |
//!
//! # Example
//!
//! ```bash
//! # Point every worker of a run at the same report
//! export HARNESS_RESULTS_OUTPUT_DIR="/var/tmp/run-42"
//!
//! # Isolate a test run
//! export HARNESS_RESULTS_FILE="results-isolated.json"
//! ```
//!
//! [`ResultPublisher::new`]: crate::publisher::ResultPublisher::new
//! [`PhaseLegacyStore::new`]: crate::legacy::PhaseLegacyStore::new

use std::env;
use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use crate::publisher::{PublishError, PublishResult, Vocabulary};

// ============================================================================
// Default Values
// ============================================================================

/// Default result document file name
pub const DEFAULT_RESULT_FILE: &str = "results.json";

/// Default lock acquisition timeout (seconds)
pub const DEFAULT_LOCK_TIMEOUT: u64 = 30;

/// Default status vocabulary
pub const DEFAULT_STATUSES: &[&str] = &["queued", "started", "running", "done", "skipped"];

/// Default result vocabulary
pub const DEFAULT_RESULTS: &[&str] = &["passed", "failed", "error", "skipped"];

/// Default legacy record directory
pub const DEFAULT_LEGACY_DIR: &str = "legacy";

// ============================================================================
// Environment Variable Names
// ============================================================================

/// Environment variable for the result document directory
pub const ENV_OUTPUT_DIR: &str = "HARNESS_RESULTS_OUTPUT_DIR";

/// Environment variable for the result document file name
pub const ENV_RESULT_FILE: &str = "HARNESS_RESULTS_FILE";

/// Environment variable for the lock timeout
pub const ENV_LOCK_TIMEOUT: &str = "HARNESS_RESULTS_LOCK_TIMEOUT";

/// Environment variable for the status vocabulary
pub const ENV_STATUSES: &str = "HARNESS_RESULTS_STATUSES";

/// Environment variable for the result vocabulary
pub const ENV_RESULTS: &str = "HARNESS_RESULTS_RESULTS";

/// Environment variable for the legacy record directory
pub const ENV_LEGACY_DIR: &str = "HARNESS_RESULTS_LEGACY_DIR";

/// Centralized configuration for harness-results
#[derive(Debug, Clone)]
pub struct Config {
    /// Result publisher configuration
    pub publisher: PublisherConfig,
    /// Legacy store configuration
    pub legacy: LegacySettings,
}

/// Settings for [`ResultPublisher`](crate::publisher::ResultPublisher)
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Directory holding the result document; must be set before publishing
    pub output_dir: Option<PathBuf>,
    /// File name of the result document
    pub file_name: String,
    /// Maximum time to wait for the file lock (`None` waits forever)
    pub lock_timeout: Option<Duration>,
    /// Recognized status and result values
    pub vocabulary: Vocabulary,
}

/// Legacy-store related settings
#[derive(Debug, Clone)]
pub struct LegacySettings {
    /// Directory holding one file per legacy record
    pub dir: PathBuf,
}

impl Config {
    /// Create configuration from environment variables, falling back to defaults.
    ///
    /// A variable that is set but cannot be parsed is a
    /// [`PublishError::Configuration`] rather than a silent default.
    pub fn from_env() -> PublishResult<Self> {
        Ok(Self {
            publisher: PublisherConfig::from_env()?,
            legacy: LegacySettings::from_env(),
        })
    }

    /// Create configuration with all defaults (ignoring environment)
    pub fn defaults() -> Self {
        Self {
            publisher: PublisherConfig::defaults(),
            legacy: LegacySettings::defaults(),
        }
    }
}

impl PublisherConfig {
    /// Create publisher settings from environment variables
    pub fn from_env() -> PublishResult<Self> {
        Self::from_lookup(|name| env::var_os(name))
    }

    /// Create publisher settings from `lookup`, which maps a variable name to its value
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<OsString>) -> PublishResult<Self> {
        let defaults = Self::defaults();
        let text = |name: &str| -> PublishResult<Option<String>> {
            lookup(name)
                .map(|value| {
                    value.into_string().map_err(|value| {
                        PublishError::Configuration(format!("{} is not valid UTF-8: {:?}", name, value))
                    })
                })
                .transpose()
        };

        let vocabulary = match (text(ENV_STATUSES)?, text(ENV_RESULTS)?) {
            (None, None) => defaults.vocabulary,
            (statuses, results) => Vocabulary::new(
                statuses
                    .as_deref()
                    .map(split_list)
                    .unwrap_or_else(|| to_owned_list(DEFAULT_STATUSES)),
                results
                    .as_deref()
                    .map(split_list)
                    .unwrap_or_else(|| to_owned_list(DEFAULT_RESULTS)),
            ),
        };

        let lock_timeout = match text(ENV_LOCK_TIMEOUT)?.filter(|value| !value.is_empty()) {
            Some(value) => parse_lock_timeout(&value).ok_or_else(|| {
                PublishError::Configuration(format!(
                    "invalid {} '{}' (seconds or 'none')",
                    ENV_LOCK_TIMEOUT, value
                ))
            })?,
            None => defaults.lock_timeout,
        };

        Ok(Self {
            output_dir: lookup(ENV_OUTPUT_DIR)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from),
            file_name: text(ENV_RESULT_FILE)?
                .filter(|name| !name.is_empty())
                .unwrap_or(defaults.file_name),
            lock_timeout,
            vocabulary,
        })
    }

    /// Create publisher settings with defaults; no output directory is set
    pub fn defaults() -> Self {
        Self {
            output_dir: None,
            file_name: DEFAULT_RESULT_FILE.to_string(),
            lock_timeout: Some(Duration::from_secs(DEFAULT_LOCK_TIMEOUT)),
            vocabulary: Vocabulary::default(),
        }
    }

    /// Set the result document directory
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Set the result document file name
    pub fn file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }

    /// Set the lock timeout (`None` waits forever)
    pub fn lock_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lock_timeout = timeout;
        self
    }

    /// Replace the status/result vocabulary
    pub fn vocabulary(mut self, vocabulary: Vocabulary) -> Self {
        self.vocabulary = vocabulary;
        self
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self::defaults()
    }
}

impl LegacySettings {
    /// Create legacy settings from environment variables
    pub fn from_env() -> Self {
        Self {
            dir: env::var_os(ENV_LEGACY_DIR)
                .filter(|dir| !dir.is_empty())
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LEGACY_DIR)),
        }
    }

    /// Create legacy settings with defaults
    pub fn defaults() -> Self {
        Self {
            dir: PathBuf::from(DEFAULT_LEGACY_DIR),
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Parse a lock timeout in seconds.
/// Supports: "none", "off", "infinite" (wait forever) or a whole number of seconds.
///
/// Returns `None` when the value is not understood, `Some(None)` for "wait forever".
pub fn parse_lock_timeout(value: &str) -> Option<Option<Duration>> {
    match value.trim().to_lowercase().as_str() {
        "none" | "off" | "infinite" => Some(None),
        secs => secs.parse().ok().map(|s| Some(Duration::from_secs(s))),
    }
}

/// Split a comma-separated list, dropping blanks
fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn to_owned_list(values: &[&str]) -> Vec<String> {
    values.iter().map(|s| s.to_string()).collect()
}
