//! harness-results - shared test results and inter-phase data for distributed test harnesses.
//!
//! This crate provides:
//! - A result publisher that lets many worker processes upsert test-case and
//!   test status into one JSON report, serialized by an advisory file lock
//! - A legacy store that lets one phase of a scenario leave data for its later
//!   phases, keyed by the scenario's phase-independent identity
//! - Environment-driven configuration passed explicitly to both
//!
//! # Example
//!
//! ```rust,no_run
//! use harness_results::{Config, ResultPublisher};
//!
//! let config = Config::from_env().unwrap();
//! let publisher = ResultPublisher::new(config.publisher);
//! publisher.publish_test_status("LoginCase", "testValidLogin", "started", None, None).unwrap();
//! publisher.publish_test_status("LoginCase", "testValidLogin", "done", Some("passed"), None).unwrap();
//! ```

pub mod config;
pub mod legacy;
pub mod publisher;

// Re-export configuration
pub use config::{Config, LegacySettings, PublisherConfig};

// Re-export publisher types
pub use publisher::{
    DocumentSummary, PublishError, PublishResult, ResultDocument, ResultPublisher, TestCaseNode,
    TestCaseUpdate, TestNode, TestUpdate, Vocabulary,
};

// Re-export legacy store
pub use legacy::{LegacyError, LegacyRecord, LegacyResult, PhaseIdentity, PhaseLegacyStore, Scope, derive_key};
