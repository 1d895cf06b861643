//! The shared result document and its upsert rules.
//!
//! A [`ResultDocument`] lives only for the duration of one transaction: it is
//! parsed from the backing file, receives exactly one upsert and is written
//! back in full. Field order in the structs below is the on-disk order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::publisher::types::{STATUS_DONE, STATUS_STARTED, TestCaseUpdate, TestUpdate};

/// Root of the persisted report. Test cases keep their insertion order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResultDocument {
    #[serde(default)]
    pub test_cases: Vec<TestCaseNode>,
}

/// A named scenario and the tests recorded under it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestCaseNode {
    pub name: String,

    /// Absent when the node was created by a test-level publish
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,

    #[serde(default)]
    pub tests: Vec<TestNode>,
}

/// A single test inside a test case. Names are unique per test case.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestNode {
    pub name: String,

    pub status: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
}

/// Counts over a whole document
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DocumentSummary {
    pub test_cases: usize,
    pub tests: usize,
    /// Tests per recorded result value
    pub results: BTreeMap<String, usize>,
    /// Tests that have no result yet
    pub pending: usize,
}

impl ResultDocument {
    /// Parse the raw contents of the backing file. Empty contents are an empty document.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        if bytes.is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_slice(bytes)
    }

    /// Render the canonical on-disk form
    pub fn to_pretty_json(&self) -> serde_json::Result<String> {
        let mut json = serde_json::to_string_pretty(self)?;
        json.push('\n');
        Ok(json)
    }

    pub fn test_case(&self, name: &str) -> Option<&TestCaseNode> {
        self.test_cases.iter().find(|case| case.name == name)
    }

    pub fn test(&self, test_case: &str, test: &str) -> Option<&TestNode> {
        self.test_case(test_case).and_then(|case| case.test(test))
    }

    /// Return the test case called `name`, appending a new one if there is none
    pub fn test_case_entry(&mut self, name: &str) -> &mut TestCaseNode {
        let index = match self.test_cases.iter().position(|case| case.name == name) {
            Some(index) => index,
            None => {
                self.test_cases.push(TestCaseNode::new(name));
                self.test_cases.len() - 1
            }
        };
        &mut self.test_cases[index]
    }

    /// Upsert a test case, overwriting only the attributes the update carries
    pub fn apply_test_case_update(&mut self, name: &str, update: &TestCaseUpdate) {
        let case = self.test_case_entry(name);
        case.status = Some(update.status.clone());
        if let Some(result) = &update.result {
            case.result = Some(result.clone());
        }
        if let Some(start) = update.start {
            case.start = Some(start);
        }
        if let Some(end) = update.end {
            case.end = Some(end);
        }
    }

    /// Upsert a test (and its test case), stamping `start`/`end` with `now`
    /// when the status moves to started/done.
    pub fn apply_test_update(
        &mut self,
        test_case: &str,
        test: &str,
        update: &TestUpdate,
        now: DateTime<Utc>,
    ) {
        let node = self.test_case_entry(test_case).test_entry(test);

        if node.status != update.status {
            match update.status.as_str() {
                STATUS_STARTED => node.start = Some(now),
                STATUS_DONE => node.end = Some(now),
                _ => {}
            }
        }
        node.status = update.status.clone();
        if let Some(result) = &update.result {
            node.result = Some(result.clone());
        }
        if let Some(message) = &update.message {
            node.message = Some(message.clone());
        }
    }

    pub fn summary(&self) -> DocumentSummary {
        let mut summary = DocumentSummary {
            test_cases: self.test_cases.len(),
            ..DocumentSummary::default()
        };
        for test in self.test_cases.iter().flat_map(|case| case.tests.iter()) {
            summary.tests += 1;
            match &test.result {
                Some(result) => *summary.results.entry(result.clone()).or_default() += 1,
                None => summary.pending += 1,
            }
        }
        summary
    }
}

impl TestCaseNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: None,
            result: None,
            start: None,
            end: None,
            tests: Vec::new(),
        }
    }

    pub fn test(&self, name: &str) -> Option<&TestNode> {
        self.tests.iter().find(|test| test.name == name)
    }

    /// Return the test called `name` within this case, appending a new one if there is none
    pub fn test_entry(&mut self, name: &str) -> &mut TestNode {
        let index = match self.tests.iter().position(|test| test.name == name) {
            Some(index) => index,
            None => {
                self.tests.push(TestNode::new(name));
                self.tests.len() - 1
            }
        };
        &mut self.tests[index]
    }
}

impl TestNode {
    /// A fresh node with no status yet; the first upsert fills it in
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: String::new(),
            result: None,
            message: None,
            start: None,
            end: None,
        }
    }
}
