//! Integration tests for concurrent result publishing

use std::fs::{self, OpenOptions};
use std::path::Path;
use std::process::Command;
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use pretty_assertions::assert_eq;

use harness_results::publisher::lock::{self, LockMode};
use harness_results::{PublishError, PublisherConfig, ResultDocument, ResultPublisher, TestCaseUpdate};

fn publisher_in(dir: &Path) -> ResultPublisher {
    ResultPublisher::new(
        PublisherConfig::defaults()
            .output_dir(dir)
            .file_name("results.json")
            .lock_timeout(Some(Duration::from_secs(30))),
    )
}

#[test]
fn test_login_scenario_records_start_and_end() {
    let dir = tempfile::tempdir().expect("Failed to create temp dir");
    let publisher = publisher_in(dir.path());

    publisher
        .publish_test_status("LoginCase", "testValidLogin", "started", None, None)
        .expect("Failed to publish start");
    let started = publisher.read_document().unwrap();
    let start = started.test("LoginCase", "testValidLogin").unwrap().start;
    assert!(start.is_some());

    publisher
        .publish_test_status("LoginCase", "testValidLogin", "done", Some("passed"), None)
        .expect("Failed to publish end");

    let document = publisher.read_document().unwrap();
    assert_eq!(document.test_cases.len(), 1);
    let case = &document.test_cases[0];
    assert_eq!(case.name, "LoginCase");
    assert_eq!(case.tests.len(), 1);

    let test = &case.tests[0];
    assert_eq!(test.status, "done");
    assert_eq!(test.result.as_deref(), Some("passed"));
    assert_eq!(test.start, start);
    assert!(test.end.is_some());
    assert!(test.end >= test.start);
}

#[test]
fn test_same_test_case_published_twice_stays_single() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = publisher_in(dir.path());

    publisher.publish_test_case_status("Suite", TestCaseUpdate::new("started")).unwrap();
    publisher.publish_test_case_status("Suite", TestCaseUpdate::new("started")).unwrap();

    let document = publisher.read_document().unwrap();
    assert_eq!(document.test_cases.len(), 1);
}

#[test]
fn test_status_only_publish_keeps_result() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = publisher_in(dir.path());

    publisher
        .publish_test_case_status("Suite", TestCaseUpdate::new("done").result("failed"))
        .unwrap();
    publisher.publish_test_case_status("Suite", TestCaseUpdate::new("running")).unwrap();

    let document = publisher.read_document().unwrap();
    let case = document.test_case("Suite").unwrap();
    assert_eq!(case.status.as_deref(), Some("running"));
    assert_eq!(case.result.as_deref(), Some("failed"));
}

#[test]
fn test_document_on_disk_is_pretty_and_parseable() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = publisher_in(dir.path());
    publisher
        .publish_test_status("Case", "testOne", "done", Some("passed"), Some("ok"))
        .unwrap();

    let text = fs::read_to_string(publisher.file_path().unwrap()).unwrap();
    assert!(text.contains("\n  \"test_cases\": ["), "not pretty-printed:\n{}", text);

    let parsed = ResultDocument::from_slice(text.as_bytes()).unwrap();
    assert_eq!(parsed, publisher.read_document().unwrap());
}

#[test]
fn test_corrupt_document_is_reported_and_kept() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = publisher_in(dir.path());
    let path = publisher.file_path().unwrap();
    fs::write(&path, "{ this is not json").unwrap();

    let err = publisher
        .publish_test_status("Case", "t", "started", None, None)
        .unwrap_err();
    assert!(matches!(err, PublishError::CorruptDocument { .. }), "{:?}", err);
    assert!(matches!(publisher.read_document(), Err(PublishError::CorruptDocument { .. })));
    assert_eq!(fs::read_to_string(&path).unwrap(), "{ this is not json");
}

#[test]
fn test_publish_times_out_while_another_handle_holds_the_lock() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = ResultPublisher::new(
        PublisherConfig::defaults()
            .output_dir(dir.path())
            .lock_timeout(Some(Duration::from_millis(150))),
    );
    let path = publisher.file_path().unwrap();
    let holder = OpenOptions::new()
        .read(true)
        .write(true)
        .create(true)
        .truncate(false)
        .open(&path)
        .unwrap();
    let held = lock::acquire(holder, &path, LockMode::Exclusive, None).unwrap();

    let err = publisher
        .publish_test_status("Case", "t", "started", None, None)
        .unwrap_err();
    assert!(matches!(err, PublishError::LockTimeout { .. }), "{:?}", err);

    drop(held);
    publisher
        .publish_test_status("Case", "t", "started", None, None)
        .expect("publish should succeed once the lock is free");
}

#[test]
fn test_unbounded_timeout_values_are_accepted() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = ResultPublisher::new(
        PublisherConfig::defaults()
            .output_dir(dir.path())
            .lock_timeout(Some(Duration::from_secs(u64::MAX))),
    );

    publisher
        .publish_test_status("Case", "t", "done", Some("passed"), None)
        .expect("publish with an enormous timeout should behave like waiting forever");
    let document = publisher.read_document().unwrap();
    assert_eq!(document.test("Case", "t").unwrap().result.as_deref(), Some("passed"));
    publisher.clean().unwrap();
}

#[test]
fn test_missing_directory_is_created() {
    let dir = tempfile::tempdir().unwrap();
    let publisher = publisher_in(&dir.path().join("nested").join("run"));
    publisher.publish_test_status("Case", "t", "queued", None, None).unwrap();
    assert!(publisher.file_path().unwrap().exists());
}

#[test]
fn test_concurrent_publishers_lose_no_updates() {
    const WORKERS: usize = 8;
    const UPSERTS: usize = 10;

    let dir = tempfile::tempdir().unwrap();
    let root = Arc::new(dir.path().to_path_buf());

    let handles: Vec<_> = (0..WORKERS)
        .map(|worker| {
            let root = Arc::clone(&root);
            thread::spawn(move || {
                // Separate instance per worker, like separate processes
                let publisher = publisher_in(&root);
                for i in 0..UPSERTS {
                    let case = format!("Case{}", i % 3);
                    let test = format!("worker{}_test{}", worker, i);
                    publisher
                        .publish_test_status(&case, &test, "started", None, None)
                        .expect("Failed to publish start");
                    publisher
                        .publish_test_status(&case, &test, "done", Some("passed"), None)
                        .expect("Failed to publish end");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().expect("Worker panicked");
    }

    let document = publisher_in(&root).read_document().unwrap();
    assert_eq!(document.test_cases.len(), 3);

    let summary = document.summary();
    assert_eq!(summary.tests, WORKERS * UPSERTS);
    assert_eq!(summary.results.get("passed"), Some(&(WORKERS * UPSERTS)));
    assert_eq!(summary.pending, 0);

    for worker in 0..WORKERS {
        for i in 0..UPSERTS {
            let case = format!("Case{}", i % 3);
            let test = format!("worker{}_test{}", worker, i);
            let node = document
                .test(&case, &test)
                .unwrap_or_else(|| panic!("missing {}/{}", case, test));
            assert!(node.start.is_some() && node.end.is_some());
        }
    }
}

#[test]
fn test_concurrent_processes_lose_no_updates() {
    const PROCESSES: usize = 6;
    const UPSERTS: usize = 4;

    let dir = tempfile::tempdir().unwrap();

    let children: Vec<_> = (0..PROCESSES)
        .flat_map(|process| (0..UPSERTS).map(move |i| (process, i)))
        .map(|(process, i)| {
            Command::new(env!("CARGO_BIN_EXE_harness-results"))
                .arg("--output-dir")
                .arg(dir.path())
                .arg("--lock-timeout")
                .arg("60")
                .arg("test")
                .arg("SharedCase")
                .arg(format!("process{}_test{}", process, i))
                .arg("--status")
                .arg("done")
                .arg("--result")
                .arg("passed")
                .spawn()
                .expect("Failed to spawn publisher process")
        })
        .collect();

    for mut child in children {
        let status = child.wait().expect("Failed to wait for publisher process");
        assert!(status.success(), "publisher process failed: {:?}", status);
    }

    let document = publisher_in(dir.path()).read_document().unwrap();
    let case = document.test_case("SharedCase").expect("SharedCase missing");
    assert_eq!(case.tests.len(), PROCESSES * UPSERTS);
}
