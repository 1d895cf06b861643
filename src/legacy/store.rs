//! File-backed legacy records, one JSON file per key.
//!
//! Phases of a scenario run one after another, so records are not locked.
//! Each save writes a temporary file next to the target and renames it into
//! place, so a reader sees either the previous record or the new one.

use chrono::Utc;
use log::{debug, info};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

use crate::legacy::identity::{LEGACY_SUFFIX, PhaseIdentity, Scope};
use crate::legacy::types::{LegacyError, LegacyRecord, LegacyResult};

/// Hands data from one phase of a scenario to the later ones
#[derive(Debug, Clone)]
pub struct PhaseLegacyStore {
    dir: PathBuf,
    identity: Option<PhaseIdentity>,
}

impl PhaseLegacyStore {
    /// A store rooted at `dir` that only accepts explicit keys
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            identity: None,
        }
    }

    /// Bind the identity of the currently executing test, enabling scoped keys
    pub fn with_identity(mut self, identity: PhaseIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn identity(&self) -> Option<&PhaseIdentity> {
        self.identity.as_ref()
    }

    /// Key shared by every phase for the bound identity and `scope`
    pub fn derive_key(&self, scope: Scope) -> LegacyResult<String> {
        self.identity
            .as_ref()
            .ok_or_else(|| {
                LegacyError::KeyDerivation("no test identity bound to this legacy store".to_string())
            })?
            .derive_key(scope)
    }

    /// Save `data` under the key derived for `scope`, returning that key
    pub fn save<T: Serialize + ?Sized>(&self, data: &T, scope: Scope) -> LegacyResult<String> {
        let key = self.derive_key(scope)?;
        self.save_with_key(data, &key)
    }

    /// Save `data` under an explicit key, replacing any previous record.
    /// The `.legacy` suffix is added when missing; the stored key is returned.
    pub fn save_with_key<T: Serialize + ?Sized>(&self, data: &T, key: &str) -> LegacyResult<String> {
        let key = normalize_key(key)?;
        let path = self.dir.join(&key);

        let record = LegacyRecord {
            key: key.clone(),
            saved_at: Utc::now(),
            host: hostname::get()
                .ok()
                .map(|host| host.to_string_lossy().into_owned()),
            pid: std::process::id(),
            data,
        };

        write_atomically(&self.dir, &path, &record).map_err(|err| LegacyError::store(&key, err))?;
        info!("Saved legacy record {} to {}", key, path.display());
        Ok(key)
    }

    /// Load the payload saved under the key derived for `scope`
    pub fn load<T: DeserializeOwned>(&self, scope: Scope) -> LegacyResult<T> {
        let key = self.derive_key(scope)?;
        self.load_with_key(&key)
    }

    /// Load the payload saved under an explicit key
    pub fn load_with_key<T: DeserializeOwned>(&self, key: &str) -> LegacyResult<T> {
        self.load_record_with_key(key).map(|record| record.data)
    }

    /// Load a record including its provenance
    pub fn load_record_with_key<T: DeserializeOwned>(&self, key: &str) -> LegacyResult<LegacyRecord<T>> {
        let key = normalize_key(key)?;
        let path = self.dir.join(&key);

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LegacyError::NotFound { key, path });
            }
            Err(err) => return Err(LegacyError::store(&key, err)),
        };

        let record: LegacyRecord<T> =
            serde_json::from_slice(&bytes).map_err(|err| LegacyError::store(&key, err))?;
        debug!(
            "Loaded legacy record {} written at {} by pid {}",
            key, record.saved_at, record.pid
        );
        Ok(record)
    }

    /// Keys of all stored records, sorted
    pub fn keys(&self) -> LegacyResult<Vec<String>> {
        let entries = match fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(LegacyError::store("*", err)),
        };

        let mut keys = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|err| LegacyError::store("*", err))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.ends_with(LEGACY_SUFFIX) && entry.path().is_file() {
                keys.push(name);
            }
        }
        keys.sort();
        Ok(keys)
    }
}

/// Accept a single path component, appending the legacy suffix if needed
fn normalize_key(key: &str) -> LegacyResult<String> {
    let key = key.trim();
    let invalid = key.is_empty()
        || key == "."
        || key == ".."
        || key.chars().any(|c| c == '/' || c == '\\' || c == '\0');
    if invalid {
        return Err(LegacyError::KeyDerivation(format!(
            "'{}' is not a usable legacy key",
            key
        )));
    }

    if key.ends_with(LEGACY_SUFFIX) {
        Ok(key.to_string())
    } else {
        Ok(format!("{}{}", key, LEGACY_SUFFIX))
    }
}

fn write_atomically<T: Serialize>(
    dir: &Path,
    path: &Path,
    record: &T,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    fs::create_dir_all(dir)?;
    let mut temp = NamedTempFile::new_in(dir)?;
    serde_json::to_writer_pretty(&mut temp, record)?;
    temp.write_all(b"\n")?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|err| err.error)?;
    Ok(())
}
