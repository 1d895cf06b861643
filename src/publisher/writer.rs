//! The result publisher: one locked read-modify-write per call.

use chrono::Utc;
use log::{debug, info, warn};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use crate::config::{ENV_OUTPUT_DIR, PublisherConfig};
use crate::publisher::document::ResultDocument;
use crate::publisher::lock::{self, FileLock, LockMode};
use crate::publisher::types::{PublishError, PublishResult, TestCaseUpdate, TestUpdate};

/// Records test status into a result document shared by many worker processes.
///
/// Every publish call is a self-contained transaction: open the file, take an
/// exclusive lock, parse, apply one upsert, rewrite the whole file, unlock.
/// Nothing is cached between calls, so any number of publishers in any number
/// of processes can point at the same file.
#[derive(Debug)]
pub struct ResultPublisher {
    config: PublisherConfig,
    in_transaction: AtomicBool,
}

/// Marks the publisher busy until dropped
struct TransactionGuard<'a>(&'a AtomicBool);

impl Drop for TransactionGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl ResultPublisher {
    pub fn new(config: PublisherConfig) -> Self {
        Self {
            config,
            in_transaction: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &PublisherConfig {
        &self.config
    }

    /// Location of the result document
    pub fn file_path(&self) -> PublishResult<PathBuf> {
        let dir = self.config.output_dir.as_ref().ok_or_else(|| {
            PublishError::Configuration(format!(
                "no output directory configured for the result document (set {})",
                ENV_OUTPUT_DIR
            ))
        })?;
        if self.config.file_name.is_empty() {
            return Err(PublishError::Configuration(
                "result document file name is empty".to_string(),
            ));
        }
        Ok(dir.join(&self.config.file_name))
    }

    /// Upsert a test case's status and whichever of result/start/end the update carries
    pub fn publish_test_case_status(
        &self,
        test_case: &str,
        update: TestCaseUpdate,
    ) -> PublishResult<()> {
        validate_name("test case", test_case)?;
        self.config.vocabulary.validate_status(&update.status)?;
        self.config.vocabulary.validate_result(update.result.as_deref())?;

        self.update(|document| {
            document.apply_test_case_update(test_case, &update);
            Ok(())
        })
    }

    /// Upsert a test within a test case, creating either if absent.
    ///
    /// Moving to `started` stamps the test's start time, moving to `done` its end time.
    pub fn publish_test_status(
        &self,
        test_case: &str,
        test: &str,
        status: &str,
        result: Option<&str>,
        message: Option<&str>,
    ) -> PublishResult<()> {
        validate_name("test case", test_case)?;
        validate_name("test", test)?;
        self.config.vocabulary.validate_status(status)?;
        self.config.vocabulary.validate_result(result)?;

        let update = TestUpdate {
            status: status.to_string(),
            result: result.map(str::to_string),
            message: message.map(str::to_string),
        };
        self.update(|document| {
            document.apply_test_update(test_case, test, &update, Utc::now());
            Ok(())
        })
    }

    /// Run one locked read-modify-write transaction against the result document.
    ///
    /// The document is only written if `apply` succeeds. Starting another
    /// transaction on this publisher from inside `apply` fails with
    /// [`PublishError::Reentrancy`].
    pub fn update<T, F>(&self, apply: F) -> PublishResult<T>
    where
        F: FnOnce(&mut ResultDocument) -> PublishResult<T>,
    {
        let path = self.file_path()?;
        let _transaction = self.begin()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let lock = self
            .open_locked(&path, LockMode::Exclusive, true)?
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "result document vanished"))?;
        let file = lock.file();

        let mut document = read_document_from(file, &path)?;
        let value = apply(&mut document)?;
        let serialized = document.to_pretty_json()?;

        let mut handle = file;
        handle.seek(SeekFrom::Start(0))?;
        file.set_len(0)?;
        handle.write_all(serialized.as_bytes())?;
        handle.flush()?;
        file.sync_data()?;

        debug!(
            "Committed {} test case(s) to {}",
            document.test_cases.len(),
            path.display()
        );
        Ok(value)
    }

    /// Snapshot of the current document, read under a shared lock.
    ///
    /// A missing or empty file reads as an empty document.
    pub fn read_document(&self) -> PublishResult<ResultDocument> {
        let path = self.file_path()?;
        let _transaction = self.begin()?;

        match self.open_locked(&path, LockMode::Shared, false)? {
            Some(lock) => read_document_from(lock.file(), &path),
            None => Ok(ResultDocument::default()),
        }
    }

    /// Delete the result document if it exists.
    ///
    /// Waits for the exclusive lock like a publish does, so an update in
    /// flight completes first. Publishers queued behind the removal reopen
    /// the path and start a fresh document.
    pub fn clean(&self) -> PublishResult<()> {
        let path = self.file_path()?;
        let _transaction = self.begin()?;

        let Some(_lock) = self.open_locked(&path, LockMode::Exclusive, false)? else {
            return Ok(());
        };
        match fs::remove_file(&path) {
            Ok(()) => {
                info!("Removed result document {}", path.display());
                Ok(())
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Open `path` and lock it, retrying when the file was removed or
    /// replaced while waiting for the lock.
    ///
    /// Without `create`, a missing file yields `Ok(None)`. Each retry waits
    /// for the full configured timeout again.
    fn open_locked(
        &self,
        path: &Path,
        mode: LockMode,
        create: bool,
    ) -> PublishResult<Option<FileLock>> {
        loop {
            let file = match OpenOptions::new()
                .read(true)
                .write(create)
                .create(create)
                .truncate(false)
                .open(path)
            {
                Ok(file) => file,
                Err(err) if !create && err.kind() == io::ErrorKind::NotFound => return Ok(None),
                Err(err) => return Err(err.into()),
            };

            let lock = lock::acquire(file, path, mode, self.config.lock_timeout)?;
            if lock::is_current(&lock, path)? {
                return Ok(Some(lock));
            }
            debug!("{} was replaced while waiting for the lock, reopening", path.display());
        }
    }

    fn begin(&self) -> PublishResult<TransactionGuard<'_>> {
        self.in_transaction
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| PublishError::Reentrancy)?;
        Ok(TransactionGuard(&self.in_transaction))
    }
}

fn read_document_from(file: &File, path: &Path) -> PublishResult<ResultDocument> {
    let mut contents = Vec::new();
    let mut handle = file;
    handle.seek(SeekFrom::Start(0))?;
    handle.read_to_end(&mut contents)?;

    ResultDocument::from_slice(&contents).map_err(|source| {
        warn!("Refusing to overwrite unparseable result document {}", path.display());
        PublishError::CorruptDocument {
            path: path.to_path_buf(),
            source,
        }
    })
}

fn validate_name(kind: &str, name: &str) -> PublishResult<()> {
    if name.trim().is_empty() {
        return Err(PublishError::Validation(format!("{} name must not be empty", kind)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    fn publisher_in(dir: &Path) -> ResultPublisher {
        ResultPublisher::new(
            PublisherConfig::defaults()
                .output_dir(dir)
                .lock_timeout(Some(Duration::from_secs(5))),
        )
    }

    #[test]
    fn test_file_path_requires_output_dir() {
        let publisher = ResultPublisher::new(PublisherConfig::defaults());
        assert!(matches!(publisher.file_path(), Err(PublishError::Configuration(_))));
        assert!(matches!(
            publisher.publish_test_status("Case", "t", "started", None, None),
            Err(PublishError::Configuration(_))
        ));
    }

    #[test]
    fn test_file_path_joins_dir_and_name() {
        let publisher = ResultPublisher::new(
            PublisherConfig::defaults().output_dir("/tmp/run").file_name("mine.json"),
        );
        assert_eq!(publisher.file_path().unwrap(), PathBuf::from("/tmp/run/mine.json"));
    }

    #[test]
    fn test_nested_transaction_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher_in(dir.path());

        let nested = publisher.update(|_| {
            Ok(publisher.publish_test_status("Case", "t", "started", None, None))
        });
        assert!(matches!(nested, Ok(Err(PublishError::Reentrancy))));

        // The outer transaction finished, so the publisher is usable again
        assert!(publisher.publish_test_status("Case", "t", "started", None, None).is_ok());
    }

    #[test]
    fn test_transaction_from_another_thread_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher_in(dir.path());
        let shared = &publisher;
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel::<()>();

        let refused = thread::scope(|scope| {
            let holder = scope.spawn(move || {
                shared.update(move |_| {
                    entered_tx.send(()).unwrap();
                    release_rx.recv().unwrap();
                    Ok(())
                })
            });

            entered_rx.recv().unwrap();
            let refused = shared.publish_test_status("Case", "t", "started", None, None);
            release_tx.send(()).unwrap();
            holder.join().unwrap().unwrap();
            refused
        });

        assert!(matches!(refused, Err(PublishError::Reentrancy)), "{:?}", refused);
        assert!(publisher.publish_test_status("Case", "t", "started", None, None).is_ok());
    }

    #[test]
    fn test_failed_closure_leaves_document_unchanged() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher_in(dir.path());
        publisher.publish_test_status("Case", "t", "started", None, None).unwrap();
        let before = fs::read(publisher.file_path().unwrap()).unwrap();

        let result: PublishResult<()> = publisher.update(|document| {
            document.test_cases.clear();
            Err(PublishError::Validation("abort".to_string()))
        });
        assert!(result.is_err());
        assert_eq!(fs::read(publisher.file_path().unwrap()).unwrap(), before);
    }

    #[test]
    fn test_validation_happens_before_touching_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher_in(dir.path());

        let err = publisher
            .publish_test_status("Case", "t", "done", Some("sort of"), None)
            .unwrap_err();
        assert!(matches!(err, PublishError::Validation(_)));
        assert!(matches!(
            publisher.publish_test_case_status("Case", TestCaseUpdate::new("bogus")),
            Err(PublishError::Validation(_))
        ));
        assert!(matches!(
            publisher.publish_test_case_status("Case", TestCaseUpdate::new("done").result("bogus")),
            Err(PublishError::Validation(_))
        ));
        assert!(matches!(
            publisher.publish_test_status("", "t", "started", None, None),
            Err(PublishError::Validation(_))
        ));
        assert!(!publisher.file_path().unwrap().exists());
    }

    #[test]
    fn test_read_document_of_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher_in(dir.path());
        assert_eq!(publisher.read_document().unwrap(), ResultDocument::default());
    }

    #[test]
    fn test_clean_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher_in(dir.path());
        publisher.publish_test_case_status("Case", TestCaseUpdate::new("started")).unwrap();

        publisher.clean().unwrap();
        assert!(!publisher.file_path().unwrap().exists());
        publisher.clean().unwrap();
    }

    #[test]
    fn test_clean_waits_for_the_lock() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = ResultPublisher::new(
            PublisherConfig::defaults()
                .output_dir(dir.path())
                .lock_timeout(Some(Duration::from_millis(150))),
        );
        publisher.publish_test_case_status("Case", TestCaseUpdate::new("started")).unwrap();
        let path = publisher.file_path().unwrap();

        let held = lock::acquire(File::open(&path).unwrap(), &path, LockMode::Exclusive, None).unwrap();
        assert!(matches!(publisher.clean(), Err(PublishError::LockTimeout { .. })));
        assert!(path.exists());

        drop(held);
        publisher.clean().unwrap();
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_publish_queued_behind_removal_writes_a_fresh_document() {
        let dir = tempfile::tempdir().unwrap();
        let publisher = publisher_in(dir.path());
        publisher.publish_test_case_status("Old", TestCaseUpdate::new("started")).unwrap();
        let path = publisher.file_path().unwrap();

        let held = lock::acquire(File::open(&path).unwrap(), &path, LockMode::Exclusive, None).unwrap();
        thread::scope(|scope| {
            let waiter = scope.spawn(|| {
                publisher_in(dir.path()).publish_test_status("New", "t", "started", None, None)
            });

            thread::sleep(Duration::from_millis(50));
            fs::remove_file(&path).unwrap();
            drop(held);
            waiter.join().unwrap().unwrap();
        });

        let document = publisher.read_document().unwrap();
        assert!(document.test_case("Old").is_none());
        assert!(document.test("New", "t").is_some());
    }
}
