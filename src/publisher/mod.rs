pub mod document;
pub mod lock;
pub mod types;
pub mod writer;

pub use document::{DocumentSummary, ResultDocument, TestCaseNode, TestNode};
pub use lock::{FileLock, LockMode};
pub use types::{
    PublishError, PublishResult, STATUS_DONE, STATUS_STARTED, TestCaseUpdate, TestUpdate, Vocabulary,
};
pub use writer::ResultPublisher;
