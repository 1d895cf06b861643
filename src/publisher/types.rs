// Core types shared by the result publisher

use chrono::{DateTime, Utc};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{DEFAULT_RESULTS, DEFAULT_STATUSES};

/// Status that stamps a test's `start` time
pub const STATUS_STARTED: &str = "started";

/// Status that stamps a test's `end` time
pub const STATUS_DONE: &str = "done";

/// The set of status and result values the enclosing harness recognizes.
///
/// [`STATUS_STARTED`] and [`STATUS_DONE`] are always members of the status set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    statuses: BTreeSet<String>,
    results: BTreeSet<String>,
}

impl Vocabulary {
    /// Create a vocabulary from the harness-supplied status and result values
    pub fn new<S, R>(statuses: impl IntoIterator<Item = S>, results: impl IntoIterator<Item = R>) -> Self
    where
        S: Into<String>,
        R: Into<String>,
    {
        let mut statuses: BTreeSet<String> = statuses.into_iter().map(Into::into).collect();
        statuses.insert(STATUS_STARTED.to_string());
        statuses.insert(STATUS_DONE.to_string());

        Self {
            statuses,
            results: results.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_status(&self, status: &str) -> bool {
        self.statuses.contains(status)
    }

    pub fn is_result(&self, result: &str) -> bool {
        self.results.contains(result)
    }

    pub fn statuses(&self) -> impl Iterator<Item = &str> {
        self.statuses.iter().map(String::as_str)
    }

    pub fn results(&self) -> impl Iterator<Item = &str> {
        self.results.iter().map(String::as_str)
    }

    /// Fail with [`PublishError::Validation`] unless `status` is recognized
    pub fn validate_status(&self, status: &str) -> PublishResult<()> {
        if self.is_status(status) {
            Ok(())
        } else {
            Err(PublishError::Validation(format!(
                "unknown status '{}' (expected one of: {})",
                status,
                self.statuses().collect::<Vec<_>>().join(", ")
            )))
        }
    }

    /// Fail with [`PublishError::Validation`] if a result is given and not recognized
    pub fn validate_result(&self, result: Option<&str>) -> PublishResult<()> {
        match result {
            Some(result) if !self.is_result(result) => Err(PublishError::Validation(format!(
                "unknown result '{}' (expected one of: {})",
                result,
                self.results().collect::<Vec<_>>().join(", ")
            ))),
            _ => Ok(()),
        }
    }
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(DEFAULT_STATUSES.iter().copied(), DEFAULT_RESULTS.iter().copied())
    }
}

/// Attributes to upsert on a test case node. Unset fields leave the node untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct TestCaseUpdate {
    pub status: String,
    pub result: Option<String>,
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

impl TestCaseUpdate {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            result: None,
            start: None,
            end: None,
        }
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn start(mut self, start: DateTime<Utc>) -> Self {
        self.start = Some(start);
        self
    }

    pub fn end(mut self, end: DateTime<Utc>) -> Self {
        self.end = Some(end);
        self
    }
}

/// Attributes to upsert on a test node
#[derive(Debug, Clone, PartialEq)]
pub struct TestUpdate {
    pub status: String,
    pub result: Option<String>,
    pub message: Option<String>,
}

impl TestUpdate {
    pub fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
            result: None,
            message: None,
        }
    }

    pub fn result(mut self, result: impl Into<String>) -> Self {
        self.result = Some(result.into());
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

/// Result type for publisher operations
pub type PublishResult<T> = Result<T, PublishError>;

/// Error types for publisher operations
#[derive(Debug)]
pub enum PublishError {
    /// The result document location was not configured
    Configuration(String),

    /// A status, result or name outside what the harness recognizes
    Validation(String),

    /// The lock call itself failed
    LockAcquisition { path: PathBuf, source: std::io::Error },

    /// Another holder kept the lock past the configured timeout
    LockTimeout { path: PathBuf, waited: Duration },

    /// A transaction was started while this publisher already had one open
    Reentrancy,

    /// The existing document could not be parsed; it is left untouched
    CorruptDocument { path: PathBuf, source: serde_json::Error },

    /// I/O error
    Io(std::io::Error),

    /// Serialization error
    Serialization(serde_json::Error),
}

impl std::fmt::Display for PublishError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PublishError::Configuration(msg) => write!(f, "Configuration error: {}", msg),
            PublishError::Validation(msg) => write!(f, "Validation error: {}", msg),
            PublishError::LockAcquisition { path, source } => {
                write!(f, "Could not lock {}: {}", path.display(), source)
            }
            PublishError::LockTimeout { path, waited } => {
                write!(f, "Timed out after {:?} waiting for lock on {}", waited, path.display())
            }
            PublishError::Reentrancy => {
                write!(f, "Publisher already has an open transaction on its result file")
            }
            PublishError::CorruptDocument { path, source } => {
                write!(f, "Corrupt result document {}: {}", path.display(), source)
            }
            PublishError::Io(err) => write!(f, "I/O error: {}", err),
            PublishError::Serialization(err) => write!(f, "Serialization error: {}", err),
        }
    }
}

impl std::error::Error for PublishError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PublishError::LockAcquisition { source, .. } => Some(source),
            PublishError::CorruptDocument { source, .. } => Some(source),
            PublishError::Io(err) => Some(err),
            PublishError::Serialization(err) => Some(err),
            PublishError::Configuration(_)
            | PublishError::Validation(_)
            | PublishError::LockTimeout { .. }
            | PublishError::Reentrancy => None,
        }
    }
}

impl From<std::io::Error> for PublishError {
    fn from(err: std::io::Error) -> Self {
        PublishError::Io(err)
    }
}

impl From<serde_json::Error> for PublishError {
    fn from(err: serde_json::Error) -> Self {
        PublishError::Serialization(err)
    }
}
