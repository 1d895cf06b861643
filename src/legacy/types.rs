use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A stored legacy payload together with where and when it was written
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LegacyRecord<T> {
    /// Key the record was saved under
    pub key: String,

    /// When the record was written
    pub saved_at: DateTime<Utc>,

    /// Host name of the writing process, if it could be determined
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Process id of the writer
    pub pid: u32,

    /// Caller payload
    pub data: T,
}

/// Result type for legacy store operations
pub type LegacyResult<T> = Result<T, LegacyError>;

/// Error types for legacy store operations
#[derive(Debug)]
pub enum LegacyError {
    /// No shared key can be derived from the identity, or an explicit key is unusable
    KeyDerivation(String),

    /// Nothing has been saved under the key
    NotFound { key: String, path: PathBuf },

    /// Reading, writing or (de)serializing the record failed
    Store {
        key: String,
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl LegacyError {
    pub(crate) fn store(key: &str, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        LegacyError::Store {
            key: key.to_string(),
            source: source.into(),
        }
    }
}

impl std::fmt::Display for LegacyError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LegacyError::KeyDerivation(msg) => write!(f, "Key derivation error: {}", msg),
            LegacyError::NotFound { key, path } => {
                write!(f, "No legacy record '{}' at {}", key, path.display())
            }
            LegacyError::Store { key, source } => {
                write!(f, "Legacy store error for '{}': {}", key, source)
            }
        }
    }
}

impl std::error::Error for LegacyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            LegacyError::Store { source, .. } => Some(source.as_ref()),
            LegacyError::KeyDerivation(_) | LegacyError::NotFound { .. } => None,
        }
    }
}
